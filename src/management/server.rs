//! # 管理服务器
//!
//! Axum HTTP服务器，挂载连接管理API

use axum::Router;
use axum::routing::get;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::system::ping_handler;
use super::middleware::request_id_middleware;
use crate::app::AppContext;
use crate::config::ServerConfig;
use crate::error::{HubError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{linfo, lwarn};

/// 管理服务器应用状态
#[derive(Clone)]
pub struct AppState {
    context: Arc<AppContext>,
}

impl AppState {
    #[must_use]
    pub const fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }
}

impl Deref for AppState {
    type Target = AppContext;

    fn deref(&self) -> &Self::Target {
        &self.context
    }
}

/// 管理服务器
pub struct ManagementServer {
    config: ServerConfig,
    router: Router,
}

impl ManagementServer {
    /// 创建新的管理服务器
    #[must_use]
    pub fn new(config: ServerConfig, context: Arc<AppContext>) -> Self {
        let router = Self::create_router(AppState::new(context), &config);
        Self { config, router }
    }

    /// 完整路由，测试中直接驱动
    #[must_use]
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    fn create_router(state: AppState, config: &ServerConfig) -> Router {
        let api_routes = super::routes::create_routes(state);

        let mut app = Router::new()
            .nest(&config.api_prefix, api_routes)
            .route("/ping", get(ping_handler));

        let service_builder = ServiceBuilder::new().layer(TraceLayer::new_for_http());
        if config.enable_cors {
            app = app.layer(service_builder.layer(Self::cors_layer(config)));
        } else {
            app = app.layer(service_builder);
        }

        app.layer(axum::middleware::from_fn(request_id_middleware))
    }

    fn cors_layer(config: &ServerConfig) -> CorsLayer {
        let cors_layer = CorsLayer::new()
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::header::AUTHORIZATION,
                axum::http::header::ACCEPT,
                axum::http::header::ORIGIN,
            ]);

        if config.cors_origins.iter().any(|origin| origin == "*") {
            return cors_layer.allow_origin(Any);
        }

        let origins = config
            .cors_origins
            .iter()
            .map(|origin| origin.parse::<axum::http::HeaderValue>())
            .collect::<std::result::Result<Vec<_>, _>>();
        match origins {
            Ok(origins) => cors_layer.allow_origin(origins),
            Err(e) => {
                lwarn!(
                    "system",
                    LogStage::Startup,
                    LogComponent::ServerSetup,
                    "cors_config_fail",
                    "CORS 源配置无效，回退为允许任意源",
                    error = %e
                );
                cors_layer.allow_origin(Any)
            }
        }
    }

    /// 启动服务器，收到取消信号后优雅退出
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let ip = self
            .config
            .bind_address
            .parse::<std::net::IpAddr>()
            .map_err(|e| {
                HubError::config(format!(
                    "无效的监听地址 '{}': {e}",
                    self.config.bind_address
                ))
            })?;
        let addr = SocketAddr::new(ip, self.config.port);

        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::ServerSetup,
            "server_start",
            "管理服务器启动",
            addr = %addr
        );

        let listener = TcpListener::bind(&addr).await?;
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        linfo!(
            "system",
            LogStage::Shutdown,
            LogComponent::ServerSetup,
            "server_stopped",
            "管理服务器已停止"
        );
        Ok(())
    }
}
