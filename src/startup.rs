use actix_web::dev::Server;
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::net::TcpListener;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::error::{AppError, ValidationError};
use crate::logger::LoggerMiddleware;
use crate::middleware::JwtMiddleware;
use crate::routes::{
    delete_account, get_current_user, health_check, login, logout, logout_all, refresh, register,
    CookiePolicy,
};
use crate::session::SessionManager;

const JSON_LIMIT: usize = 16 * 1024;

/// Path-only access log line; query strings are left out.
const ACCESS_LOG_FORMAT: &str = "%a \"%m %U\" %s %b %T";

pub fn run(
    listener: TcpListener,
    manager: SessionManager,
    cookies: CookiePolicy,
) -> Result<Server, std::io::Error> {
    let codec = manager.codec().clone();
    let manager = web::Data::new(manager);
    let cookies = web::Data::new(cookies);

    let server = HttpServer::new(move || {
        let json_config = web::JsonConfig::default()
            .limit(JSON_LIMIT)
            .error_handler(|err, _req| {
                tracing::warn!(error = %err, "Rejected request body");
                AppError::Validation(ValidationError::InvalidFormat("request body".to_string()))
                    .into()
            });

        App::new()
            // Global middleware
            .wrap(Logger::new(ACCESS_LOG_FORMAT))
            .wrap(LoggerMiddleware)

            // Shared state
            .app_data(manager.clone())
            .app_data(cookies.clone())
            .app_data(json_config)

            // Public routes
            .route("/health_check", web::get().to(health_check))
            .route("/register", web::post().to(register))
            .route("/login", web::post().to(login))
            .route("/refresh", web::post().to(refresh))

            // Protected routes
            .service(
                web::resource("/logout")
                    .wrap(JwtMiddleware::new(codec.clone()))
                    .route(web::post().to(logout)),
            )
            .service(
                web::resource("/logout/all")
                    .wrap(JwtMiddleware::new(codec.clone()))
                    .route(web::post().to(logout_all)),
            )
            .service(
                web::resource("/delete")
                    .wrap(JwtMiddleware::new(codec.clone()))
                    .route(web::delete().to(delete_account)),
            )
            .service(
                web::resource("/me")
                    .wrap(JwtMiddleware::new(codec.clone()))
                    .route(web::get().to(get_current_user)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}

/// Run `SessionManager::sweep` every `every` on the current runtime.
pub fn spawn_sweeper(manager: SessionManager, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = manager.sweep().await {
                tracing::error!(error = %e, "Maintenance sweep failed");
            }
        }
    })
}
