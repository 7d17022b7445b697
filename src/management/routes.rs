//! # 路由配置

use axum::{
    Router, middleware,
    routing::{get, post},
};

use super::handlers::connections;
use super::middleware::auth;
use super::server::AppState;

/// 创建API路由，除提供商列表外都需要认证
pub fn create_routes(state: AppState) -> Router {
    let protected = Router::new()
        .route("/oauth/{provider}/login", get(connections::start_login))
        .route("/oauth/{provider}/callback", get(connections::callback))
        .route("/oauth/{provider}/disconnect", post(connections::disconnect))
        .route("/connections", get(connections::list_connections))
        .route("/connections/audit", get(connections::audit_history))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth));

    Router::new()
        .route("/oauth/providers", get(connections::list_providers))
        .merge(protected)
        .with_state(state)
}
