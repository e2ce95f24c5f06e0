use auth_service::auth::TokenCodec;
use auth_service::configuration::get_configuration;
use auth_service::routes::CookiePolicy;
use auth_service::session::SessionManager;
use auth_service::startup::{run, spawn_sweeper};
use auth_service::store::PgStore;
use auth_service::telemetry::init_telemetry;
use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

fn startup_error(kind: std::io::ErrorKind, what: &str, e: impl std::fmt::Display) -> std::io::Error {
    tracing::error!("{}: {}", what, e);
    std::io::Error::new(kind, what.to_string())
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    tracing::info!("Starting application");

    let configuration = get_configuration().map_err(|e| {
        startup_error(std::io::ErrorKind::InvalidInput, "Configuration error", e)
    })?;
    tracing::info!("Configuration loaded successfully");

    tracing::info!("Attempting to connect to database");
    let pool = PgPoolOptions::new()
        .max_connections(configuration.database.max_connections)
        .connect(&configuration.database.connection_string())
        .await
        .map_err(|e| {
            startup_error(
                std::io::ErrorKind::ConnectionRefused,
                "Database connection error",
                e,
            )
        })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| startup_error(std::io::ErrorKind::Other, "Database migration error", e))?;
    tracing::info!("Database ready");

    let codec = TokenCodec::new(&configuration.jwt);
    let manager = SessionManager::new(
        Arc::new(PgStore::new(pool)),
        codec,
        &configuration.password,
        &configuration.session,
    )
    .map_err(|e| startup_error(std::io::ErrorKind::Other, "Session manager error", e))?;

    if configuration.session.sweep_interval_secs > 0 {
        spawn_sweeper(
            manager.clone(),
            Duration::from_secs(configuration.session.sweep_interval_secs),
        );
    }

    let cookies = CookiePolicy {
        secure: configuration.application.cookie_secure,
        access_max_age_secs: configuration.jwt.access_token_expiry,
        refresh_max_age_secs: configuration.session.refresh_token_max_age_secs(),
    };

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    let server = run(listener, manager, cookies)?;
    server.await
}
