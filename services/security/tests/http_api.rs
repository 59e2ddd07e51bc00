//! HTTP surface of the security service over in-memory stores

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use common::memory::MemoryStore;
use http_body_util::BodyExt;
use security::{
    AppState,
    detector::{DetectionPolicy, SuspiciousActivityDetector},
    notifier::LogNotifier,
    repositories::{InMemoryActivityLog, InMemoryUserDirectory},
    routes::{LoginResponse, create_router},
    security::SecurityService,
    session::SessionManager,
};
use serde_json::{Value, json};
use tower::ServiceExt;

const CHROME_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";
const FIREFOX_LINUX: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:127.0) Gecko/20100101 Firefox/127.0";

struct TestApp {
    router: Router,
    store: MemoryStore,
    log: InMemoryActivityLog,
}

async fn test_app() -> TestApp {
    let store = MemoryStore::new();
    let log = InMemoryActivityLog::new();
    let users = InMemoryUserDirectory::new();
    users
        .add_user("alice", "alice@example.com", "correct horse battery")
        .await
        .unwrap();

    let sessions = SessionManager::new(Arc::new(store.clone()), 86_400);
    let detector = SuspiciousActivityDetector::new(Arc::new(log.clone()), DetectionPolicy::default());
    let state = AppState {
        security: SecurityService::new(
            sessions,
            Arc::new(log.clone()),
            Arc::new(users.clone()),
            Arc::new(LogNotifier),
            detector,
        ),
        users: Arc::new(users),
        db_pool: None,
    };

    TestApp {
        router: create_router(state),
        store,
        log,
    }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn login(&self, password: &str, user_agent: &str) -> (StatusCode, Value) {
        let request = Request::post("/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::USER_AGENT, user_agent)
            .header("x-forwarded-for", "203.0.113.50")
            .header("cf-ipcountry", "US")
            .body(Body::from(
                json!({ "username": "alice", "password": password }).to_string(),
            ))
            .unwrap();
        self.send(request).await
    }

    async fn login_token(&self, user_agent: &str) -> LoginResponse {
        let (status, body) = self.login("correct horse battery", user_agent).await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_value(body).unwrap()
    }

    async fn authorized(
        &self,
        method: &str,
        uri: &str,
        token: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"));
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }
}

#[tokio::test]
async fn test_health() {
    let app = test_app().await;
    let (status, body) = app
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_store"], true);

    app.store.set_available(false);
    let (status, _) = app
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_wrong_password_is_rejected_and_recorded() {
    let app = test_app().await;
    let (status, body) = app.login("wrong", CHROME_WINDOWS).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid username or password");

    let records = app.log.all().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].failure_reason.as_deref(), Some("Invalid password"));
    assert_eq!(records[0].browser.as_deref(), Some("Chrome"));
}

#[tokio::test]
async fn test_protected_routes_require_a_live_session() {
    let app = test_app().await;
    let (status, _) = app
        .send(Request::get("/security/devices").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let forged = format!("{}.{}.{}", uuid::Uuid::new_v4(), "a".repeat(64), "b".repeat(64));
    let (status, _) = app.authorized("GET", "/security/devices", &forged, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_listed_session_ids_do_not_grant_access() {
    let app = test_app().await;
    let victim = app.login_token(CHROME_WINDOWS).await;
    let intruder = app.login_token(FIREFOX_LINUX).await;
    let victim_secret = victim.access_token.rsplit('.').next().unwrap().to_string();

    let (status, devices) = app
        .authorized("GET", "/security/devices", &intruder.access_token, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, activity) = app
        .authorized("GET", "/security/activity", &intruder.access_token, None)
        .await;
    assert_eq!(status, StatusCode::OK);

    for body in [&devices, &activity] {
        assert!(!body.to_string().contains(&victim_secret));
    }

    let listed: Vec<String> = devices
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["session_id"].as_str().unwrap().to_string())
        .collect();
    assert!(listed.contains(&victim.session_id));

    for session_id in &listed {
        for forged in [
            format!("{}.{}", victim.user_id, session_id),
            format!("{}.{}.{}", victim.user_id, session_id, session_id),
        ] {
            let (status, _) = app.authorized("GET", "/security/devices", &forged, None).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }
    }

    // Signing out the intruder's device locks it out for good
    let target = format!("/security/devices/{}", intruder.session_id);
    let (status, _) = app.authorized("DELETE", &target, &victim.access_token, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app
        .authorized("GET", "/security/activity", &intruder.access_token, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app
        .authorized("GET", "/security/activity", &victim.access_token, None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_device_lifecycle() {
    let app = test_app().await;
    let laptop = app.login_token(CHROME_WINDOWS).await;
    let desktop = app.login_token(FIREFOX_LINUX).await;
    assert_eq!(laptop.token_type, "Bearer");

    let (status, devices) = app
        .authorized("GET", "/security/devices", &laptop.access_token, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let devices = devices.as_array().unwrap();
    assert_eq!(devices.len(), 2);
    let current: Vec<_> = devices.iter().filter(|d| d["is_current"] == true).collect();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0]["session_id"], laptop.session_id.as_str());
    assert!(devices.iter().all(|d| d["ip_address"] == "203.0.113.xxx"));

    // The current device signs out through /auth/logout only
    let own = format!("/security/devices/{}", laptop.session_id);
    let (status, _) = app.authorized("DELETE", &own, &laptop.access_token, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let other = format!("/security/devices/{}", desktop.session_id);
    let (status, _) = app
        .authorized(
            "PATCH",
            &other,
            &laptop.access_token,
            Some(json!({ "device_name": "Office desktop" })),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .authorized(
            "PATCH",
            &other,
            &laptop.access_token,
            Some(json!({ "device_name": "  " })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.authorized("DELETE", &other, &laptop.access_token, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app
        .authorized("GET", "/security/devices", &desktop.access_token, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .authorized("POST", "/auth/logout", &laptop.access_token, None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app
        .authorized("GET", "/security/devices", &laptop.access_token, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_all_and_activity_listing() {
    let app = test_app().await;
    let first = app.login_token(CHROME_WINDOWS).await;
    app.login_token(FIREFOX_LINUX).await;
    app.login("wrong", CHROME_WINDOWS).await;

    let (status, activity) = app
        .authorized("GET", "/security/activity?limit=2", &first.access_token, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let activity = activity.as_array().unwrap();
    assert_eq!(activity.len(), 2);
    assert!(activity.iter().all(|r| r["ip_address"] == "203.0.113.xxx"));

    let (status, body) = app
        .authorized("POST", "/security/devices/logout-all", &first.access_token, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revoked"], 2);

    let (status, _) = app
        .authorized("GET", "/security/activity", &first.access_token, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
