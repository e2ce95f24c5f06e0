//! Integration tests for the service's public plumbing

use std::net::TcpListener;
use std::sync::Arc;

use auth_service::auth::TokenCodec;
use auth_service::configuration::{JwtSettings, PasswordSettings, SessionSettings};
use auth_service::routes::CookiePolicy;
use auth_service::session::SessionManager;
use auth_service::startup::run;
use auth_service::store::MemoryStore;

fn spawn_app() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    let codec = TokenCodec::new(&JwtSettings {
        secret: format!("health-check-secret-{}", uuid::Uuid::new_v4()),
        access_token_expiry: 900,
        issuer: "auth-service-test".to_string(),
    });
    let manager = SessionManager::new(
        Arc::new(MemoryStore::new()),
        codec,
        &PasswordSettings { hash_cost: 4 },
        &SessionSettings::default(),
    )
    .expect("Failed to build session manager");
    let cookies = CookiePolicy {
        secure: false,
        access_max_age_secs: 900,
        refresh_max_age_secs: 3600,
    };

    let server = run(listener, manager, cookies).expect("Failed to create server");
    let _ = tokio::spawn(server);

    format!("http://127.0.0.1:{}", port)
}

#[tokio::test]
async fn health_check_works() {
    let addr = spawn_app();

    let response = reqwest::Client::new()
        .get(&format!("{}/health_check", addr))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    assert!(response.text().await.unwrap().is_empty());
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let addr = spawn_app();

    let response = reqwest::Client::new()
        .get(&format!("{}/health_check", addr))
        .send()
        .await
        .expect("Failed to execute request");

    let request_id = response
        .headers()
        .get("x-request-id")
        .expect("x-request-id header missing")
        .to_str()
        .unwrap();
    assert!(uuid::Uuid::parse_str(request_id).is_ok());
}

#[tokio::test]
async fn incoming_request_id_is_echoed() {
    let addr = spawn_app();

    let response = reqwest::Client::new()
        .get(&format!("{}/health_check", addr))
        .header("x-request-id", "trace-abc-123")
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "trace-abc-123"
    );
}

#[tokio::test]
async fn rejected_access_token_still_carries_request_id() {
    let addr = spawn_app();

    let response = reqwest::Client::new()
        .post(&format!("{}/logout", addr))
        .header("x-request-id", "trace-no-token")
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(401, response.status().as_u16());
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "trace-no-token"
    );
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "UNAUTHORIZED");
    assert_eq!(body["error_id"], "trace-no-token");
}

#[tokio::test]
async fn handler_error_id_matches_request_id() {
    let addr = spawn_app();

    let response = reqwest::Client::new()
        .post(&format!("{}/login", addr))
        .header("x-request-id", "trace-bad-login")
        .json(&serde_json::json!({"email": "nobody@x.com", "password": "pw123"}))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(401, response.status().as_u16());
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "trace-bad-login"
    );
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error_id"], "trace-bad-login");
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let addr = spawn_app();

    let response = reqwest::Client::new()
        .get(&format!("{}/does-not-exist", addr))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(404, response.status().as_u16());
}
