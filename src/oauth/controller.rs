//! # 连接控制器
//!
//! 面向 HTTP 层的业务入口：发起授权、处理回调、断开连接、查询连接与审计记录

use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::providers::{SHOP_PARAM, normalize_shop_domain};
use super::{
    AuditAction, AuditEvent, AuditLog, AuditQuery, AuthorizationRequestBuilder, AuthorizationUrl,
    ConnectionSummary, CredentialStore, PendingStateStore, ProviderExtra, ProviderId,
    ProviderRegistry, ProviderSummary, TokenExchangeClient,
};
use crate::error::{HubError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{lerror, linfo, lwarn};

/// 回调查询参数
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub shop: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// 断开连接结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DisconnectOutcome {
    pub provider: ProviderId,
    /// 是否确实删除了记录
    pub disconnected: bool,
    /// 提供商侧是否已撤销令牌
    pub revoked: bool,
}

/// 连接控制器
#[derive(Debug, Clone)]
pub struct ConnectionController {
    db: DatabaseConnection,
    registry: Arc<ProviderRegistry>,
    builder: Arc<AuthorizationRequestBuilder>,
    states: Arc<PendingStateStore>,
    exchange: Arc<TokenExchangeClient>,
    store: Arc<CredentialStore>,
    audit: Arc<AuditLog>,
}

impl ConnectionController {
    #[must_use]
    pub const fn new(
        db: DatabaseConnection,
        registry: Arc<ProviderRegistry>,
        builder: Arc<AuthorizationRequestBuilder>,
        states: Arc<PendingStateStore>,
        exchange: Arc<TokenExchangeClient>,
        store: Arc<CredentialStore>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            db,
            registry,
            builder,
            states,
            exchange,
            store,
            audit,
        }
    }

    /// 已配置的提供商
    #[must_use]
    pub fn providers(&self) -> Vec<ProviderSummary> {
        self.registry.list()
    }

    /// 发起授权
    pub async fn start_login(
        &self,
        user_id: i32,
        provider: &str,
        redirect_uri: Option<&str>,
        extra: &ProviderExtra,
    ) -> Result<AuthorizationUrl> {
        let provider = ProviderId::from_str(provider)?;
        self.builder
            .build_auth_url(user_id, provider, redirect_uri, extra)
            .await
    }

    /// 处理授权回调。state 在任何结果下都只能使用一次
    pub async fn complete_callback(
        &self,
        user_id: i32,
        provider: &str,
        params: &CallbackParams,
        cancel: &CancellationToken,
    ) -> Result<ConnectionSummary> {
        let state = params
            .state
            .as_deref()
            .filter(|state| !state.is_empty())
            .ok_or(HubError::InvalidOrExpiredState)?;
        let pending = self.states.consume(state).await?;

        let provider = ProviderId::from_str(provider)?;
        if pending.provider != provider || pending.user_id != user_id {
            lwarn!(
                "system",
                LogStage::Callback,
                LogComponent::Controller,
                "state_mismatch",
                "state 与回调的提供商或用户不匹配",
                user_id = user_id,
                provider = %provider,
                expected_provider = %pending.provider
            );
            return Err(HubError::InvalidOrExpiredState);
        }

        if provider.is_shop_scoped() {
            if let Some(shop) = params.shop.as_deref() {
                let shop = normalize_shop_domain(shop)?;
                if pending.extra.get(SHOP_PARAM) != Some(&shop) {
                    return Err(HubError::InvalidOrExpiredState);
                }
            }
        }

        if let Some(error) = params.error.as_deref().filter(|error| !error.is_empty()) {
            let rejected = HubError::upstream_rejected(
                provider.as_str(),
                error,
                params.error_description.clone(),
            );
            self.record_failure(user_id, provider, "authorize", &rejected)
                .await;
            return Err(rejected);
        }

        let code = params
            .code
            .as_deref()
            .filter(|code| !code.is_empty())
            .ok_or_else(|| HubError::missing_parameter("code"))?;

        let token = match self
            .exchange
            .exchange(provider, code, &pending.redirect_uri, &pending.extra, cancel)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                if !matches!(e, HubError::Cancelled) {
                    self.record_failure(user_id, provider, "exchange", &e).await;
                }
                return Err(e);
            }
        };

        let txn = self.db.begin().await?;
        let connection = self
            .store
            .upsert_with(&txn, user_id, provider, &token)
            .await?;
        self.audit
            .record_with(
                &txn,
                user_id,
                provider,
                AuditAction::Connected,
                Some(json!({
                    "scope": token.scope,
                    "hasRefreshToken": token.refresh_token.is_some(),
                    "expiresAt": token.expires_at,
                })),
            )
            .await?;
        txn.commit().await?;

        linfo!(
            "system",
            LogStage::Callback,
            LogComponent::Controller,
            "connected",
            "连接已建立",
            user_id = user_id,
            provider = %provider
        );
        Ok(connection.summary())
    }

    /// 断开连接。幂等：不存在的连接返回 `disconnected: false`
    pub async fn disconnect(
        &self,
        user_id: i32,
        provider: &str,
        cancel: &CancellationToken,
    ) -> Result<DisconnectOutcome> {
        let provider = ProviderId::from_str(provider)?;
        let mut outcome = DisconnectOutcome {
            provider,
            disconnected: false,
            revoked: false,
        };

        let txn = self.db.begin().await?;
        // 解密失败也要能删除，只是无法撤销
        let connection = match self.store.get_with(&txn, user_id, provider).await {
            Ok(connection) => Some(connection),
            Err(HubError::NotFound { .. }) => return Ok(outcome),
            Err(e @ HubError::Crypto { .. }) => {
                lwarn!(
                    "system",
                    LogStage::Revocation,
                    LogComponent::Controller,
                    "undecryptable_connection",
                    "连接令牌无法解密，跳过提供商侧撤销",
                    user_id = user_id,
                    provider = %provider,
                    error = %e
                );
                None
            }
            Err(e) => return Err(e),
        };
        match self.store.delete_with(&txn, user_id, provider).await {
            Ok(()) => {}
            Err(HubError::NotFound { .. }) => return Ok(outcome),
            Err(e) => return Err(e),
        }
        self.audit
            .record_with(&txn, user_id, provider, AuditAction::Disconnected, None)
            .await?;
        txn.commit().await?;
        outcome.disconnected = true;

        // 本地记录已删除，撤销失败只记录日志
        if let Some(connection) = connection {
            let token = connection
                .refresh_token
                .as_deref()
                .unwrap_or(&connection.access_token);
            match self
                .exchange
                .revoke(provider, token, &connection.extra, cancel)
                .await
            {
                Ok(revoked) => outcome.revoked = revoked,
                Err(e) => {
                    lwarn!(
                        "system",
                        LogStage::Revocation,
                        LogComponent::Controller,
                        "revoke_failed",
                        "提供商侧撤销令牌失败",
                        user_id = user_id,
                        provider = %provider,
                        error = %e
                    );
                }
            }
        }

        linfo!(
            "system",
            LogStage::Revocation,
            LogComponent::Controller,
            "disconnected",
            "连接已断开",
            user_id = user_id,
            provider = %provider,
            revoked = outcome.revoked
        );
        Ok(outcome)
    }

    /// 用户的连接列表
    pub async fn list_connections(&self, user_id: i32) -> Result<Vec<ConnectionSummary>> {
        Ok(self
            .store
            .list_for_user(user_id)
            .await?
            .iter()
            .map(super::StoredConnection::summary)
            .collect())
    }

    /// 用户的审计记录
    pub async fn audit_history(&self, user_id: i32, query: &AuditQuery) -> Result<Vec<AuditEvent>> {
        self.audit.query(user_id, query).await
    }

    async fn record_failure(
        &self,
        user_id: i32,
        provider: ProviderId,
        operation: &str,
        error: &HubError,
    ) {
        let details = json!({
            "operation": operation,
            "code": error.code(),
            "message": error.to_string(),
        });
        if let Err(e) = self
            .audit
            .record(user_id, provider, AuditAction::Failed, Some(details))
            .await
        {
            lerror!(
                "system",
                LogStage::Callback,
                LogComponent::Audit,
                "audit_failed",
                "记录审计事件失败",
                error = %e
            );
        }
    }
}
