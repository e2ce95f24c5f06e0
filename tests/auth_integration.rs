use std::net::TcpListener;
use std::sync::Arc;

use auth_service::auth::TokenCodec;
use auth_service::configuration::{JwtSettings, PasswordSettings, SessionSettings};
use auth_service::routes::CookiePolicy;
use auth_service::session::SessionManager;
use auth_service::startup::run;
use auth_service::store::MemoryStore;
use auth_service::telemetry::{get_subscriber, init_subscriber};
use reqwest::{Response, StatusCode};
use serde_json::{json, Value};

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
}

impl TestApp {
    async fn post_json(&self, path: &str, body: &Value) -> Response {
        self.client
            .post(&format!("{}{}", &self.address, path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    async fn register(&self, email: &str, password: &str) -> Response {
        self.post_json("/register", &json!({ "email": email, "password": password }))
            .await
    }

    async fn login(&self, email: &str, password: &str) -> Response {
        self.post_json("/login", &json!({ "email": email, "password": password }))
            .await
    }

    /// Register and log in, returning the token pair body
    async fn signed_in(&self, email: &str, password: &str) -> Value {
        assert_eq!(StatusCode::CREATED, self.register(email, password).await.status());
        let response = self.login(email, password).await;
        assert_eq!(StatusCode::OK, response.status());
        response.json().await.expect("Failed to parse response")
    }

    async fn refresh(&self, refresh_token: &Value) -> Response {
        self.post_json("/refresh", &json!({ "refresh_token": refresh_token }))
            .await
    }

    async fn logout(&self, access_token: &Value) -> Response {
        self.client
            .post(&format!("{}/logout", &self.address))
            .bearer_auth(access_token.as_str().unwrap())
            .send()
            .await
            .expect("Failed to execute request.")
    }

    async fn me(&self, access_token: &Value) -> Response {
        self.client
            .get(&format!("{}/me", &self.address))
            .bearer_auth(access_token.as_str().unwrap())
            .send()
            .await
            .expect("Failed to execute request.")
    }

    async fn delete(&self, access_token: &Value, password: &str) -> Response {
        self.client
            .delete(&format!("{}/delete", &self.address))
            .bearer_auth(access_token.as_str().unwrap())
            .json(&json!({ "password": password }))
            .send()
            .await
            .expect("Failed to execute request.")
    }
}

fn spawn_app() -> TestApp {
    init_subscriber(get_subscriber("warn", std::io::sink));

    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let codec = TokenCodec::new(&JwtSettings {
        secret: format!("integration-secret-{}", uuid::Uuid::new_v4()),
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
        refresh_max_age_secs: 14 * 24 * 60 * 60,
    };

    let server = run(listener, manager, cookies).expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        client: reqwest::Client::new(),
    }
}

fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

fn cookie_value(set_cookies: &[String], name: &str) -> Option<String> {
    let prefix = format!("{}=", name);
    set_cookies.iter().find_map(|c| {
        c.strip_prefix(&prefix)
            .map(|rest| rest.split(';').next().unwrap_or("").to_string())
    })
}

async fn assert_unauthorized(response: Response) {
    assert_eq!(StatusCode::UNAUTHORIZED, response.status());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["code"], "UNAUTHORIZED");
    assert_eq!(body["message"], "Unauthorized");
}

// --- Registration Tests ---

#[tokio::test]
async fn register_returns_201_with_user_id() {
    let app = spawn_app();

    let response = app.register("a@x.com", "pw123").await;

    assert_eq!(StatusCode::CREATED, response.status());
    let body: Value = response.json().await.expect("Failed to parse response");
    let id = body["id"].as_str().expect("id missing");
    assert!(uuid::Uuid::parse_str(id).is_ok());
    assert!(body.get("password_hash").is_none());
}

#[tokio::test]
async fn register_returns_400_for_invalid_input() {
    let app = spawn_app();
    let test_cases = vec![
        (json!({ "email": "not-an-email", "password": "pw123" }), "malformed email"),
        (json!({ "email": "a@x.com", "password": "" }), "empty password"),
        (json!({ "email": "", "password": "pw123" }), "empty email"),
        (json!({ "email": "a@x.com" }), "missing password"),
        (json!({ "password": "pw123" }), "missing email"),
        (json!({}), "empty object"),
    ];

    for (body, description) in test_cases {
        let response = app.post_json("/register", &body).await;

        assert_eq!(
            StatusCode::BAD_REQUEST,
            response.status(),
            "The API did not fail with 400 Bad Request for {}.",
            description
        );
        let body: Value = response.json().await.expect("Failed to parse response");
        assert_eq!(body["code"], "INVALID_INPUT");
    }
}

#[tokio::test]
async fn register_returns_400_for_non_json_body() {
    let app = spawn_app();

    let response = app
        .client
        .post(&format!("{}/register", &app.address))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(StatusCode::BAD_REQUEST, response.status());
}

#[tokio::test]
async fn register_returns_409_for_duplicate_email() {
    let app = spawn_app();
    assert_eq!(StatusCode::CREATED, app.register("a@x.com", "pw123").await.status());

    let response = app.register("A@X.COM", "other-password").await;

    assert_eq!(StatusCode::CONFLICT, response.status());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["code"], "CONFLICT");
}

// --- Login Tests ---

#[tokio::test]
async fn login_returns_token_pair_and_cookies() {
    let app = spawn_app();
    app.register("a@x.com", "pw123").await;

    let response = app.login("a@x.com", "pw123").await;

    assert_eq!(StatusCode::OK, response.status());
    let cookies = set_cookies(&response);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body["access_token"].is_string());
    assert!(body["refresh_token"].is_string());
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 900);

    assert_eq!(
        cookie_value(&cookies, "access_token").as_deref(),
        body["access_token"].as_str()
    );
    assert_eq!(
        cookie_value(&cookies, "refresh_token").as_deref(),
        body["refresh_token"].as_str()
    );
    for cookie in &cookies {
        assert!(cookie.contains("HttpOnly"), "{}", cookie);
        assert!(cookie.contains("SameSite=Strict"), "{}", cookie);
    }
}

#[tokio::test]
async fn login_failures_are_indistinguishable() {
    let app = spawn_app();
    app.register("a@x.com", "pw123").await;

    let wrong_password = app.login("a@x.com", "wrong").await;
    let unknown_user = app.login("nobody@x.com", "pw123").await;
    let malformed = app.login("not-an-email", "pw123").await;

    for response in [wrong_password, unknown_user, malformed] {
        assert_unauthorized(response).await;
    }
}

// --- Token Lifecycle Tests ---

#[tokio::test]
async fn register_login_refresh_logout_scenario() {
    let app = spawn_app();
    assert_eq!(StatusCode::CREATED, app.register("a@x.com", "pw123").await.status());

    let login = app.login("a@x.com", "pw123").await;
    assert_eq!(StatusCode::OK, login.status());
    let t1: Value = login.json().await.unwrap();

    let refreshed = app.refresh(&t1["refresh_token"]).await;
    assert_eq!(StatusCode::OK, refreshed.status());
    let t2: Value = refreshed.json().await.unwrap();

    assert_unauthorized(app.refresh(&t1["refresh_token"]).await).await;

    assert_eq!(StatusCode::NO_CONTENT, app.logout(&t2["access_token"]).await.status());

    assert_unauthorized(app.refresh(&t2["refresh_token"]).await).await;
}

#[tokio::test]
async fn refresh_accepts_cookie() {
    let app = spawn_app();
    let tokens = app.signed_in("a@x.com", "pw123").await;

    let response = app
        .client
        .post(&format!("{}/refresh", &app.address))
        .header(
            "Cookie",
            format!("refresh_token={}", tokens["refresh_token"].as_str().unwrap()),
        )
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(StatusCode::OK, response.status());
    let body: Value = response.json().await.unwrap();
    assert_ne!(body["refresh_token"], tokens["refresh_token"]);
}

#[tokio::test]
async fn refresh_without_token_returns_401() {
    let app = spawn_app();

    let empty = app
        .client
        .post(&format!("{}/refresh", &app.address))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_unauthorized(empty).await;

    assert_unauthorized(app.refresh(&json!("not-a-real-token")).await).await;
}

#[tokio::test]
async fn concurrent_refreshes_have_one_winner() {
    let app = spawn_app();
    let tokens = app.signed_in("a@x.com", "pw123").await;

    let (first, second, third) = tokio::join!(
        app.refresh(&tokens["refresh_token"]),
        app.refresh(&tokens["refresh_token"]),
        app.refresh(&tokens["refresh_token"]),
    );

    let successes = [first.status(), second.status(), third.status()]
        .iter()
        .filter(|s| **s == StatusCode::OK)
        .count();
    assert_eq!(1, successes);
}

// --- Protected Route Tests ---

#[tokio::test]
async fn protected_routes_require_a_token() {
    let app = spawn_app();

    let me = app
        .client
        .get(&format!("{}/me", &app.address))
        .send()
        .await
        .unwrap();
    assert_unauthorized(me).await;

    let logout = app
        .client
        .post(&format!("{}/logout", &app.address))
        .send()
        .await
        .unwrap();
    assert_unauthorized(logout).await;

    let delete = app
        .client
        .delete(&format!("{}/delete", &app.address))
        .json(&json!({ "password": "pw123" }))
        .send()
        .await
        .unwrap();
    assert_unauthorized(delete).await;

    assert_unauthorized(app.me(&json!("garbage.token.value")).await).await;
}

#[tokio::test]
async fn me_returns_current_user() {
    let app = spawn_app();
    let tokens = app.signed_in("a@x.com", "pw123").await;

    let response = app.me(&tokens["access_token"]).await;

    assert_eq!(StatusCode::OK, response.status());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["email"], "a@x.com");
    assert!(body["created_at"].is_string());
}

#[tokio::test]
async fn access_token_accepted_from_cookie() {
    let app = spawn_app();
    let tokens = app.signed_in("a@x.com", "pw123").await;

    let response = app
        .client
        .get(&format!("{}/me", &app.address))
        .header(
            "Cookie",
            format!("access_token={}", tokens["access_token"].as_str().unwrap()),
        )
        .send()
        .await
        .unwrap();

    assert_eq!(StatusCode::OK, response.status());
}

#[tokio::test]
async fn logout_revokes_access_token_and_clears_cookies() {
    let app = spawn_app();
    let tokens = app.signed_in("a@x.com", "pw123").await;

    let response = app.logout(&tokens["access_token"]).await;

    assert_eq!(StatusCode::NO_CONTENT, response.status());
    let cookies = set_cookies(&response);
    assert_eq!(cookie_value(&cookies, "access_token").as_deref(), Some(""));
    assert_eq!(cookie_value(&cookies, "refresh_token").as_deref(), Some(""));

    assert_unauthorized(app.me(&tokens["access_token"]).await).await;

    // idempotent
    assert_eq!(StatusCode::NO_CONTENT, app.logout(&tokens["access_token"]).await.status());
}

#[tokio::test]
async fn second_login_from_same_device_supersedes_first() {
    let app = spawn_app();
    let first = app.signed_in("a@x.com", "pw123").await;

    let second: Value = app.login("a@x.com", "pw123").await.json().await.unwrap();

    assert_unauthorized(app.me(&first["access_token"]).await).await;
    assert_unauthorized(app.refresh(&first["refresh_token"]).await).await;
    assert_eq!(StatusCode::OK, app.me(&second["access_token"]).await.status());
}

#[tokio::test]
async fn logout_all_revokes_every_session() {
    let app = spawn_app();
    let laptop = app.signed_in("a@x.com", "pw123").await;
    let phone: Value = app
        .client
        .post(&format!("{}/login", &app.address))
        .header("User-Agent", "phone")
        .json(&json!({ "email": "a@x.com", "password": "pw123" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let response = app
        .client
        .post(&format!("{}/logout/all", &app.address))
        .bearer_auth(laptop["access_token"].as_str().unwrap())
        .send()
        .await
        .unwrap();

    assert_eq!(StatusCode::OK, response.status());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["sessions_revoked"], 2);
    assert_unauthorized(app.me(&phone["access_token"]).await).await;
    assert_unauthorized(app.refresh(&phone["refresh_token"]).await).await;
}

// --- Account Deletion Tests ---

#[tokio::test]
async fn delete_requires_the_password() {
    let app = spawn_app();
    let tokens = app.signed_in("a@x.com", "pw123").await;

    assert_unauthorized(app.delete(&tokens["access_token"], "wrong").await).await;
    assert_eq!(StatusCode::OK, app.me(&tokens["access_token"]).await.status());
}

#[tokio::test]
async fn deleted_account_cannot_log_in_and_email_is_released() {
    let app = spawn_app();
    let first_id = {
        let response = app.register("a@x.com", "pw123").await;
        let body: Value = response.json().await.unwrap();
        body["id"].clone()
    };
    let tokens: Value = app.login("a@x.com", "pw123").await.json().await.unwrap();

    let response = app.delete(&tokens["access_token"], "pw123").await;
    assert_eq!(StatusCode::NO_CONTENT, response.status());

    assert_unauthorized(app.login("a@x.com", "pw123").await).await;
    assert_unauthorized(app.refresh(&tokens["refresh_token"]).await).await;
    assert_unauthorized(app.me(&tokens["access_token"]).await).await;

    let again = app.register("a@x.com", "pw456").await;
    assert_eq!(StatusCode::CREATED, again.status());
    let body: Value = again.json().await.unwrap();
    assert_ne!(body["id"], first_id);
}
