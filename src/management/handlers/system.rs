//! # 系统信息处理器

use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct PingResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

/// 存活检查
pub async fn ping_handler() -> Json<PingResponse> {
    Json(PingResponse {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}
