/// Authentication Routes
///
/// Thin HTTP adapters over `SessionManager`: decode the request, pick the
/// credential out of the body, header or cookie, and shape the response.
/// Every authentication failure surfaces as the same 401 body.

use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::http::header::USER_AGENT;
use actix_web::{web, HttpRequest, HttpResponse, HttpResponseBuilder};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Claims;
use crate::error::{AppError, AuthError, ErrorContext};
use crate::logger::RequestId;
use crate::middleware::ACCESS_TOKEN_COOKIE;
use crate::session::{SessionManager, TokenPair};
use crate::store::DeviceFingerprint;

pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

const REFRESH_COOKIE_PATH: &str = "/refresh";
const MAX_USER_AGENT_LENGTH: usize = 512;
const UNKNOWN: &str = "unknown";

/// Attributes for the auth cookies, built once from configuration
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    pub secure: bool,
    pub access_max_age_secs: i64,
    pub refresh_max_age_secs: i64,
}

impl CookiePolicy {
    fn build(
        &self,
        name: &'static str,
        value: String,
        path: &'static str,
        max_age: i64,
    ) -> Cookie<'static> {
        Cookie::build(name, value)
            .path(path)
            .http_only(true)
            .same_site(SameSite::Strict)
            .secure(self.secure)
            .max_age(CookieDuration::seconds(max_age))
            .finish()
    }

    fn access(&self, token: String) -> Cookie<'static> {
        self.build(ACCESS_TOKEN_COOKIE, token, "/", self.access_max_age_secs)
    }

    fn refresh(&self, token: String) -> Cookie<'static> {
        self.build(
            REFRESH_TOKEN_COOKIE,
            token,
            REFRESH_COOKIE_PATH,
            self.refresh_max_age_secs,
        )
    }

    /// Expired cookies that overwrite both auth cookies
    fn removals(&self) -> [Cookie<'static>; 2] {
        [
            self.build(ACCESS_TOKEN_COOKIE, String::new(), "/", 0),
            self.build(REFRESH_TOKEN_COOKIE, String::new(), REFRESH_COOKIE_PATH, 0),
        ]
    }
}

#[derive(Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct DeleteAccountRequest {
    pub password: String,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub id: Uuid,
}

/// Token pair response
#[derive(Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl From<TokenPair> for AuthResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: pair.expires_in,
        }
    }
}

#[derive(Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct LogoutAllResponse {
    pub sessions_revoked: u64,
}

/// User agent and peer address of the caller
fn device_fingerprint(req: &HttpRequest) -> DeviceFingerprint {
    let user_agent: String = req
        .headers()
        .get(USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .unwrap_or(UNKNOWN)
        .chars()
        .take(MAX_USER_AGENT_LENGTH)
        .collect();
    let ip = req
        .peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN.to_string());

    DeviceFingerprint::new(user_agent, ip)
}

fn token_response(
    mut builder: HttpResponseBuilder,
    pair: TokenPair,
    cookies: &CookiePolicy,
) -> HttpResponse {
    builder
        .cookie(cookies.access(pair.access_token.clone()))
        .cookie(cookies.refresh(pair.refresh_token.clone()))
        .json(AuthResponse::from(pair))
}

fn cleared_cookies(mut builder: HttpResponseBuilder, cookies: &CookiePolicy) -> HttpResponseBuilder {
    for cookie in cookies.removals() {
        builder.cookie(cookie);
    }
    builder
}

/// POST /register
///
/// # Errors
/// - 400: invalid email or empty password
/// - 409: email already registered
pub async fn register(
    form: web::Json<CredentialsRequest>,
    manager: web::Data<SessionManager>,
    request_id: web::ReqData<RequestId>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("register").with_request_id(request_id.0.clone());

    let user = manager.register(&form.email, &form.password).await?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = %user.id,
        "User registered successfully"
    );

    Ok(HttpResponse::Created().json(RegisterResponse { id: user.id }))
}

/// POST /login
///
/// Opens a session for the caller's device (user agent + peer IP) and
/// returns the token pair in the body and as cookies.
///
/// # Security Notes
/// - Unknown email and wrong password produce the same 401
pub async fn login(
    req: HttpRequest,
    form: web::Json<CredentialsRequest>,
    manager: web::Data<SessionManager>,
    cookies: web::Data<CookiePolicy>,
    request_id: web::ReqData<RequestId>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("login").with_request_id(request_id.0.clone());
    let device = device_fingerprint(&req);

    let pair = manager.login(&form.email, &form.password, &device).await?;

    tracing::info!(
        request_id = %context.request_id,
        ip = %device.ip,
        "Login completed"
    );

    Ok(token_response(HttpResponse::Ok(), pair, &cookies))
}

/// POST /refresh
///
/// The refresh token comes from the JSON body or, failing that, the
/// `refresh_token` cookie.
///
/// # Token Rotation
/// - The presented token is consumed; a new one is returned
/// - Presenting a consumed token again is rejected
pub async fn refresh(
    req: HttpRequest,
    body: Option<web::Json<RefreshRequest>>,
    manager: web::Data<SessionManager>,
    cookies: web::Data<CookiePolicy>,
) -> Result<HttpResponse, AppError> {
    let token = body
        .map(|b| b.into_inner().refresh_token)
        .filter(|t| !t.is_empty())
        .or_else(|| {
            req.cookie(REFRESH_TOKEN_COOKIE)
                .map(|c| c.value().to_string())
                .filter(|t| !t.is_empty())
        })
        .ok_or(AuthError::MissingToken)?;

    let pair = manager.refresh(&token).await?;

    Ok(token_response(HttpResponse::Ok(), pair, &cookies))
}

/// POST /logout
///
/// **Requires access token.** Succeeds for an already revoked session.
pub async fn logout(
    claims: web::ReqData<Claims>,
    manager: web::Data<SessionManager>,
    cookies: web::Data<CookiePolicy>,
) -> Result<HttpResponse, AppError> {
    manager.logout(&claims).await?;

    Ok(cleared_cookies(HttpResponse::NoContent(), &cookies).finish())
}

/// POST /logout/all
///
/// **Requires access token.** Revokes every session of the user.
pub async fn logout_all(
    claims: web::ReqData<Claims>,
    manager: web::Data<SessionManager>,
    cookies: web::Data<CookiePolicy>,
) -> Result<HttpResponse, AppError> {
    let sessions_revoked = manager.logout_all(&claims).await?;

    Ok(cleared_cookies(HttpResponse::Ok(), &cookies)
        .json(LogoutAllResponse { sessions_revoked }))
}

/// DELETE /delete
///
/// **Requires access token** and the account password.
///
/// # Errors
/// - 401: token or password rejected
/// - 409: account deleted concurrently
pub async fn delete_account(
    claims: web::ReqData<Claims>,
    form: web::Json<DeleteAccountRequest>,
    manager: web::Data<SessionManager>,
    cookies: web::Data<CookiePolicy>,
    request_id: web::ReqData<RequestId>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("delete_account")
        .with_request_id(request_id.0.clone())
        .with_user_id(claims.user_id().to_string());

    manager.delete_account(&claims, &form.password).await?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = ?context.user_id,
        "Account deletion completed"
    );

    Ok(cleared_cookies(HttpResponse::NoContent(), &cookies).finish())
}

/// GET /me
///
/// **Requires access token** for a live session.
pub async fn get_current_user(
    claims: web::ReqData<Claims>,
    manager: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let user = manager.current_user(&claims).await?;

    Ok(HttpResponse::Ok().json(UserResponse {
        id: user.id,
        email: user.email,
        created_at: user.created_at.to_rfc3339(),
    }))
}
