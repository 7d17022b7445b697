//! # 集成测试公共设施
//!
//! 内存数据库 + wiremock 提供商 + 完整路由

#![allow(dead_code)]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use connection_hub::app::AppContext;
use connection_hub::config::{AppConfig, DatabaseConfig, ProviderSettings, TokenCipher};
use connection_hub::database::{init_database, run_migrations};
use connection_hub::management::ManagementServer;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::MockServer;

pub const JWT_SECRET: &str = "integration-test-secret-0123456789abcdef";
pub const USER_ID: i32 = 7;

pub struct TestApp {
    pub context: Arc<AppContext>,
    pub router: Router,
    pub provider_server: MockServer,
    pub token: String,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// 允许测试调整配置后再组装
    pub async fn spawn_with(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let provider_server = MockServer::start().await;
        let base = provider_server.uri();

        let mut config = AppConfig::with_jwt_secret(JWT_SECRET);
        config.database = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        };
        config.server.public_base_url = "https://hub.example.com".to_string();
        config.oauth.retry_base_delay_ms = 1;
        config.oauth.max_attempts = 3;
        for id in ["google", "shopify", "tiktok", "facebook", "linkedin"] {
            config.oauth.providers.insert(
                id.to_string(),
                ProviderSettings {
                    client_id: format!("{id}-client"),
                    client_secret: format!("{id}-secret"),
                    authorize_url: Some(format!("{base}/{id}/authorize")),
                    token_url: Some(format!("{base}/{id}/token")),
                    revoke_url: Some(format!("{base}/{id}/revoke")),
                    ..ProviderSettings::default()
                },
            );
        }
        adjust(&mut config);

        let db = init_database(&config.database).await.unwrap();
        run_migrations(&db).await.unwrap();
        let server_config = config.server.clone();
        let context =
            Arc::new(AppContext::assemble(config, db, TokenCipher::new(&[7u8; 32])).unwrap());
        let token = context.jwt.generate_token(USER_ID, 3600).unwrap();
        let router = ManagementServer::new(server_config, Arc::clone(&context)).router();

        Self {
            context,
            router,
            provider_server,
            token,
        }
    }

    /// 以当前用户身份发送请求
    pub async fn request(&self, method: &str, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    /// 发起授权并返回 state
    pub async fn start_login(&self, provider: &str, query: &str) -> String {
        let (status, body) = self
            .request("GET", &format!("/api/oauth/{provider}/login{query}"))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["state"].as_str().unwrap().to_string()
    }

    pub async fn callback(&self, provider: &str, query: &str) -> (StatusCode, Value) {
        self.request("GET", &format!("/api/oauth/{provider}/callback?{query}"))
            .await
    }
}
