//! # API 响应结构
//!
//! 成功响应直接返回业务数据，失败响应统一为 `{success:false, error, code, timestamp}`

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{ErrorCategory, HubError};
use crate::logging::{LogComponent, LogStage};
use crate::{lerror, lwarn};

/// # 标准错误响应
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// # 带成功标记的响应
#[derive(Debug, Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub success: bool,
    #[serde(flatten)]
    pub data: T,
}

/// 直接返回数据
pub fn success<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(data)).into_response()
}

/// 返回 `{success: true, ...data}`
pub fn success_flag<T: Serialize>(data: T) -> Response {
    (
        StatusCode::OK,
        Json(SuccessResponse {
            success: true,
            data,
        }),
    )
        .into_response()
}

/// 错误响应，同时记录日志
pub fn app_error(request_id: &str, error: &HubError) -> Response {
    match error.category() {
        ErrorCategory::Client => lwarn!(
            request_id,
            LogStage::Error,
            LogComponent::Handler,
            "request_failed",
            "请求失败",
            code = error.code(),
            error = %error
        ),
        ErrorCategory::Server => lerror!(
            request_id,
            LogStage::Error,
            LogComponent::Handler,
            "request_failed",
            "请求处理出错",
            code = error.code(),
            error = ?error
        ),
    }
    error_response(error)
}

fn error_response(error: &HubError) -> Response {
    let (status, code) = error.to_http_response_parts();
    // 服务端错误不向调用方暴露内部细节
    let message = match error.category() {
        ErrorCategory::Client => error.to_string(),
        ErrorCategory::Server => match error {
            HubError::UpstreamUnreachable { .. }
            | HubError::MalformedResponse { .. }
            | HubError::Cancelled => error.to_string(),
            _ => "服务器内部错误".to_string(),
        },
    };
    (
        status,
        Json(ErrorResponse {
            success: false,
            error: message,
            code,
            timestamp: Utc::now(),
        }),
    )
        .into_response()
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        error_response(&self)
    }
}
