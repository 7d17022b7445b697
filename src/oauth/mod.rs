//! # OAuth 连接管理模块
//!
//! 多提供商 OAuth 授权码流程的核心实现：
//! - 提供商描述注册表（google、facebook、instagram、linkedin、shopify、snapchat、tiktok）
//! - 授权地址构建与一次性 state 管理
//! - 授权码/刷新令牌交换与响应标准化
//! - 加密存储的连接记录、审计日志
//! - 后台自动续期与过期 state 清理

pub mod audit;
pub mod authorize;
pub mod cleanup_task;
pub mod controller;
pub mod credential_store;
pub mod providers;
pub mod refresh_task;
pub mod state_store;
pub mod token_exchange;

pub use audit::{AuditAction, AuditEvent, AuditLog, AuditQuery};
pub use authorize::{AuthorizationRequestBuilder, AuthorizationUrl, generate_state_token};
pub use cleanup_task::PendingStateCleanupTask;
pub use controller::{CallbackParams, ConnectionController, DisconnectOutcome};
pub use credential_store::{ConnectionKey, ConnectionSummary, CredentialStore, StoredConnection};
pub use providers::{ProviderDescriptor, ProviderId, ProviderRegistry, ProviderSummary};
pub use refresh_task::{RefreshOutcome, RefreshScheduler, RefreshSummary, TaskState, TaskStats};
pub use state_store::{PendingAuthorization, PendingStateStore};
pub use token_exchange::{RetryPolicy, TokenExchangeClient};

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// 提供商特定参数（例如 Shopify 的 `shop`）
pub type ProviderExtra = BTreeMap<String, String>;

/// 标准化后的令牌交换结果
#[derive(Clone, PartialEq, Eq)]
pub struct TokenResult {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// None 表示令牌不过期
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
    /// 提供商返回的附加字段（open_id、user_id 等）
    pub extra: ProviderExtra,
}

impl fmt::Debug for TokenResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResult")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .field("extra_keys", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_result_debug_is_redacted() {
        let token = TokenResult {
            access_token: "ya29.secret".to_string(),
            refresh_token: Some("1//refresh-secret".to_string()),
            expires_at: None,
            scope: None,
            extra: ProviderExtra::from([("open_id".to_string(), "secret-open-id".to_string())]),
        };
        let rendered = format!("{token:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("has_refresh_token: true"));
        assert!(rendered.contains("open_id"));
    }
}
