//! # Connection Hub
//!
//! 多提供商 OAuth 连接管理服务核心库

pub mod app;
pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod management;
pub mod oauth;

#[cfg(test)]
pub mod testing;

pub use config::AppConfig;
pub use error::{HubError, Result};
