//! # 认证中间件
//!
//! 从 `Authorization: Bearer` 头或会话 Cookie 中提取 JWT，验证后将用户信息注入请求扩展。

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::RequestId;
use crate::auth::{extract_bearer_token, extract_cookie};
use crate::error::HubError;
use crate::logging::{LogComponent, LogStage};
use crate::lwarn;
use crate::management::server::AppState;

/// 包含认证用户信息的上下文
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: i32,
}

/// Axum认证中间件
pub async fn auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map_or_else(|| "unknown".to_string(), ToString::to_string);

    let bearer = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
        .map(ToString::to_string);
    // 浏览器从提供商重定向回来时不会带 Authorization 头
    let token = bearer.or_else(|| {
        request
            .headers()
            .get(header::COOKIE)
            .and_then(|value| value.to_str().ok())
            .and_then(|cookies| extract_cookie(cookies, &state.config.auth.session_cookie))
            .map(ToString::to_string)
    });

    let Some(token) = token else {
        return HubError::unauthorized("缺少认证令牌").into_response();
    };

    match state.jwt.authenticate(&token) {
        Ok(user_id) => {
            request
                .extensions_mut()
                .insert(Arc::new(AuthContext { user_id }));
            next.run(request).await
        }
        Err(e) => {
            lwarn!(
                request_id,
                LogStage::Authentication,
                LogComponent::Auth,
                "auth_failed",
                "认证失败",
                error = %e
            );
            e.into_response()
        }
    }
}
