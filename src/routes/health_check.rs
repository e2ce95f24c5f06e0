use actix_web::HttpResponse;

/// Liveness only; does not touch the store.
pub async fn health_check() -> HttpResponse {
    tracing::debug!("Health check endpoint called");
    HttpResponse::Ok().finish()
}
