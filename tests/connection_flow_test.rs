//! # 连接流程集成测试
//!
//! 通过完整路由驱动授权、回调、断开与审计查询

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::{DateTime, Utc};
use common::{TestApp, USER_ID};
use connection_hub::oauth::{PendingStateStore, ProviderExtra, ProviderId};
use entity::oauth_connections;
use pretty_assertions::assert_eq;
use sea_orm::EntityTrait;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, ResponseTemplate};

async fn mount_google_token(app: &TestApp, expect: u64) {
    Mock::given(method("POST"))
        .and(path("/google/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.access-token-value",
            "refresh_token": "1//refresh-token-value",
            "expires_in": 3600,
            "scope": "openid email",
            "token_type": "Bearer"
        })))
        .expect(expect)
        .mount(&app.provider_server)
        .await;
}

#[tokio::test]
async fn test_requests_without_session_are_rejected() {
    let app = TestApp::spawn().await;
    let request = Request::builder()
        .uri("/api/connections")
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_session_cookie_is_accepted() {
    let app = TestApp::spawn().await;
    let request = Request::builder()
        .uri("/api/connections")
        .header(header::COOKIE, format!("theme=dark; session={}", app.token))
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_providers_listing_is_public() {
    let app = TestApp::spawn().await;
    let request = Request::builder()
        .uri("/api/oauth/providers")
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::OK);
    let names: Vec<_> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|provider| provider["provider"].as_str().unwrap().to_string())
        .collect();
    assert!(names.contains(&"google".to_string()));
    assert!(names.contains(&"shopify".to_string()));
}

#[tokio::test]
async fn test_google_connect_flow() {
    let app = TestApp::spawn().await;
    mount_google_token(&app, 1).await;

    let (status, body) = app.request("GET", "/api/oauth/google/login").await;
    assert_eq!(status, StatusCode::OK);
    let url = body["url"].as_str().unwrap();
    assert!(url.contains("client_id=google-client"));
    assert!(url.contains("access_type=offline"));
    assert!(url.contains(
        "redirect_uri=https%3A%2F%2Fhub.example.com%2Fapi%2Foauth%2Fgoogle%2Fcallback"
    ));
    let state = body["state"].as_str().unwrap();

    let (status, body) = app
        .callback("google", &format!("code=auth-code&state={state}"))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["connection"]["provider"], "google");
    assert_eq!(body["connection"]["needsReauth"], false);

    let expires_at: DateTime<Utc> = body["connection"]["expiresAt"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    let remaining = (expires_at - Utc::now()).num_seconds();
    assert!((3590..=3600).contains(&remaining), "remaining = {remaining}");

    let (status, list) = app.request("GET", "/api/connections").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (_, events) = app.request("GET", "/api/connections/audit").await;
    assert_eq!(events[0]["action"], "connected");
    assert_eq!(events[0]["provider"], "google");
}

#[tokio::test]
async fn test_tokens_are_not_stored_in_plaintext() {
    let app = TestApp::spawn().await;
    mount_google_token(&app, 1).await;

    let state = app.start_login("google", "").await;
    let (status, _) = app
        .callback("google", &format!("code=auth-code&state={state}"))
        .await;
    assert_eq!(status, StatusCode::OK);

    let rows = oauth_connections::Entity::find()
        .all(&app.context.db)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert!(!row.access_token.contains("ya29.access-token-value"));
    assert!(
        !row
            .refresh_token
            .as_deref()
            .unwrap()
            .contains("1//refresh-token-value")
    );

    let stored = app
        .context
        .store
        .get(USER_ID, ProviderId::Google)
        .await
        .unwrap();
    assert_eq!(stored.access_token, "ya29.access-token-value");
}

#[tokio::test]
async fn test_state_cannot_be_reused() {
    let app = TestApp::spawn().await;
    mount_google_token(&app, 1).await;

    let state = app.start_login("google", "").await;
    let query = format!("code=auth-code&state={state}");
    let (first, _) = app.callback("google", &query).await;
    let (second, body) = app.callback("google", &query).await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_OR_EXPIRED_STATE");
}

#[tokio::test]
async fn test_expired_state_never_reaches_provider() {
    let app = TestApp::spawn().await;
    mount_google_token(&app, 0).await;

    let stale_states = PendingStateStore::new(app.context.db.clone(), chrono::Duration::seconds(-5));
    stale_states
        .insert(
            "stale-state",
            USER_ID,
            ProviderId::Google,
            "https://hub.example.com/api/oauth/google/callback",
            &ProviderExtra::new(),
        )
        .await
        .unwrap();

    let (status, body) = app.callback("google", "code=auth-code&state=stale-state").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_OR_EXPIRED_STATE");
}

#[tokio::test]
async fn test_two_logins_produce_one_connection() {
    let app = TestApp::spawn().await;
    mount_google_token(&app, 2).await;

    let first = app.start_login("google", "").await;
    let second = app.start_login("google", "").await;
    assert_ne!(first, second);

    for state in [first, second] {
        let (status, _) = app
            .callback("google", &format!("code=auth-code&state={state}"))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, list) = app.request("GET", "/api/connections").await;
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_shopify_requires_shop() {
    let app = TestApp::spawn().await;

    let (status, body) = app.request("GET", "/api/oauth/shopify/login").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "MISSING_REQUIRED_PARAMETER");
}

#[tokio::test]
async fn test_shopify_connect_flow() {
    let app = TestApp::spawn().await;
    Mock::given(method("POST"))
        .and(path("/shopify/token"))
        .and(body_string_contains("code=shop-code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "shpat_value",
            "scope": "read_products,read_orders"
        })))
        .expect(1)
        .mount(&app.provider_server)
        .await;

    let state = app.start_login("shopify", "?shop=acme").await;
    let (status, body) = app
        .callback(
            "shopify",
            &format!("code=shop-code&state={state}&shop=acme.myshopify.com"),
        )
        .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["connection"]["expiresAt"].is_null());

    let stored = app
        .context
        .store
        .get(USER_ID, ProviderId::Shopify)
        .await
        .unwrap();
    assert_eq!(stored.extra.get("shop").map(String::as_str), Some("acme.myshopify.com"));
}

#[tokio::test]
async fn test_unknown_provider() {
    let app = TestApp::spawn().await;
    let (status, body) = app.request("GET", "/api/oauth/myspace/login").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "UNKNOWN_PROVIDER");
}

#[tokio::test]
async fn test_provider_denial_is_reported_and_audited() {
    let app = TestApp::spawn().await;
    let state = app.start_login("google", "").await;

    let (status, body) = app
        .callback(
            "google",
            &format!("error=access_denied&error_description=user+cancelled&state={state}"),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "UPSTREAM_REJECTED");

    let (_, events) = app.request("GET", "/api/connections/audit").await;
    assert_eq!(events[0]["action"], "failed");
}

#[tokio::test]
async fn test_network_failures_are_retried() {
    let app = TestApp::spawn().await;
    Mock::given(method("POST"))
        .and(path("/google/token"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&app.provider_server)
        .await;

    let state = app.start_login("google", "").await;
    let (status, body) = app
        .callback("google", &format!("code=auth-code&state={state}"))
        .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "UPSTREAM_UNREACHABLE");
}

#[tokio::test]
async fn test_disconnect_is_idempotent_and_revokes() {
    let app = TestApp::spawn().await;
    mount_google_token(&app, 1).await;
    Mock::given(method("POST"))
        .and(path("/google/revoke"))
        .and(body_string_contains("token=1%2F%2Frefresh-token-value"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.provider_server)
        .await;

    let state = app.start_login("google", "").await;
    app.callback("google", &format!("code=auth-code&state={state}"))
        .await;

    let (status, body) = app
        .request("POST", "/api/oauth/google/disconnect")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["disconnected"], true);
    assert_eq!(body["revoked"], true);

    let (status, body) = app
        .request("POST", "/api/oauth/google/disconnect")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["disconnected"], false);

    let (_, events) = app.request("GET", "/api/connections/audit").await;
    let disconnects = events
        .as_array()
        .unwrap()
        .iter()
        .filter(|event| event["action"] == "disconnected")
        .count();
    assert_eq!(disconnects, 1);
}

#[tokio::test]
async fn test_ping() {
    let app = TestApp::spawn().await;
    let request = Request::builder().uri("/ping").body(Body::empty()).unwrap();
    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
