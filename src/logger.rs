use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use log::info;
use std::rc::Rc;
use std::time::Instant;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LENGTH: usize = 128;

tokio::task_local! {
    static CURRENT_REQUEST_ID: RequestId;
}

/// Id of the request being served on this task, if any.
///
/// Set by `LoggerMiddleware` for the whole inner service call, so error
/// responses and error logs carry the id echoed in `x-request-id`.
pub fn current_request_id() -> Option<String> {
    CURRENT_REQUEST_ID.try_with(|id| id.0.clone()).ok()
}

/// Correlation id of the current request, available to handlers as
/// `web::ReqData<RequestId>`.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl RequestId {
    /// Reuse the caller's id when it is a sane header value, otherwise mint one.
    fn from_request(req: &ServiceRequest) -> Self {
        let incoming = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|h| h.to_str().ok())
            .filter(|id| !id.is_empty() && id.len() <= MAX_REQUEST_ID_LENGTH);

        match incoming {
            Some(id) => RequestId(id.to_string()),
            None => RequestId(uuid::Uuid::new_v4().to_string()),
        }
    }
}

/// Logs each request with its status and latency and echoes the request id
/// on the response.
pub struct LoggerMiddleware;

impl<S, B> Transform<S, ServiceRequest> for LoggerMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = LoggerMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(LoggerMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct LoggerMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for LoggerMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let method = req.method().to_string();
        let path = req.path().to_string();
        let request_id = RequestId::from_request(&req);

        // Query strings may carry credentials; never logged.
        info!("Request started: {} {} [{}]", method, path, request_id.0);
        req.extensions_mut().insert(request_id.clone());

        let service = self.service.clone();
        let http_req = req.request().clone();

        Box::pin(CURRENT_REQUEST_ID.scope(request_id.clone(), async move {
            // The access token check rejects with `Err`; render it so the
            // response still gets the header.
            let mut res = match service.call(req).await {
                Ok(res) => res.map_into_left_body(),
                Err(e) => ServiceResponse::from_err(e, http_req).map_into_right_body(),
            };

            let elapsed = start_time.elapsed();
            let status = res.status();

            info!(
                "Request completed: {} {} - Status: {} ({}ms) [{}]",
                method,
                path,
                status.as_u16(),
                elapsed.as_millis(),
                request_id.0
            );

            if let Ok(value) = HeaderValue::from_str(&request_id.0) {
                res.headers_mut()
                    .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
            }

            Ok(res)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_incoming_request_id_is_kept() {
        let req = TestRequest::default()
            .insert_header((REQUEST_ID_HEADER, "abc-123"))
            .to_srv_request();
        assert_eq!(RequestId::from_request(&req).0, "abc-123");
    }

    #[test]
    fn test_request_id_generated_when_absent() {
        let req = TestRequest::default().to_srv_request();
        let id = RequestId::from_request(&req).0;
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[tokio::test]
    async fn test_current_request_id_is_scoped() {
        assert!(current_request_id().is_none());

        let inside = CURRENT_REQUEST_ID
            .scope(RequestId("abc-123".to_string()), async { current_request_id() })
            .await;

        assert_eq!(inside.as_deref(), Some("abc-123"));
        assert!(current_request_id().is_none());
    }

    #[test]
    fn test_oversized_request_id_replaced() {
        let req = TestRequest::default()
            .insert_header((REQUEST_ID_HEADER, "x".repeat(MAX_REQUEST_ID_LENGTH + 1)))
            .to_srv_request();
        assert_ne!(RequestId::from_request(&req).0.len(), MAX_REQUEST_ID_LENGTH + 1);
    }
}
