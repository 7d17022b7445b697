//! # 连接管理处理器
//!
//! 授权发起、回调、断开以及连接与审计查询

use axum::{
    Extension,
    extract::{Path, Query, State},
    response::Response,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::linfo;
use crate::logging::{LogComponent, LogStage};
use crate::management::middleware::{AuthContext, RequestId};
use crate::management::response;
use crate::management::server::AppState;
use crate::oauth::providers::SHOP_PARAM;
use crate::oauth::{AuditQuery, CallbackParams, ConnectionSummary, ProviderExtra};

/// 发起授权的查询参数
#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    pub redirect_uri: Option<String>,
    pub shop: Option<String>,
}

#[derive(Debug, Serialize)]
struct CallbackBody {
    connection: ConnectionSummary,
}

/// 已配置的提供商
pub async fn list_providers(State(state): State<AppState>) -> Response {
    response::success(state.controller.providers())
}

/// 发起授权，返回提供商授权地址
pub async fn start_login(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Extension(auth): Extension<Arc<AuthContext>>,
    Path(provider): Path<String>,
    Query(query): Query<LoginQuery>,
) -> Response {
    let mut extra = ProviderExtra::new();
    if let Some(shop) = query.shop {
        extra.insert(SHOP_PARAM.to_string(), shop);
    }

    match state
        .controller
        .start_login(auth.user_id, &provider, query.redirect_uri.as_deref(), &extra)
        .await
    {
        Ok(url) => response::success(url),
        Err(e) => response::app_error(&request_id, &e),
    }
}

/// 授权回调
pub async fn callback(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Extension(auth): Extension<Arc<AuthContext>>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let cancel = state.shutdown_token().child_token();
    match state
        .controller
        .complete_callback(auth.user_id, &provider, &params, &cancel)
        .await
    {
        Ok(connection) => {
            linfo!(
                request_id,
                LogStage::Callback,
                LogComponent::Handler,
                "callback_completed",
                "授权回调处理完成",
                user_id = auth.user_id,
                provider = %provider
            );
            response::success_flag(CallbackBody { connection })
        }
        Err(e) => response::app_error(&request_id, &e),
    }
}

/// 断开连接
pub async fn disconnect(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Extension(auth): Extension<Arc<AuthContext>>,
    Path(provider): Path<String>,
) -> Response {
    let cancel = state.shutdown_token().child_token();
    match state
        .controller
        .disconnect(auth.user_id, &provider, &cancel)
        .await
    {
        Ok(outcome) => response::success_flag(outcome),
        Err(e) => response::app_error(&request_id, &e),
    }
}

/// 当前用户的连接列表
pub async fn list_connections(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Extension(auth): Extension<Arc<AuthContext>>,
) -> Response {
    match state.controller.list_connections(auth.user_id).await {
        Ok(connections) => response::success(connections),
        Err(e) => response::app_error(&request_id, &e),
    }
}

/// 当前用户的审计记录
pub async fn audit_history(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Extension(auth): Extension<Arc<AuthContext>>,
    Query(query): Query<AuditQuery>,
) -> Response {
    match state.controller.audit_history(auth.user_id, &query).await {
        Ok(events) => response::success(events),
        Err(e) => response::app_error(&request_id, &e),
    }
}
