//! # 待完成授权 state 存储
//!
//! state 在发起授权时写入，回调时一次性消费；无论回调成功与否，消费后即删除。

use chrono::{DateTime, Duration, Utc};
use entity::oauth_pending_states;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::str::FromStr;

use super::{ProviderExtra, ProviderId};
use crate::error::{HubError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, linfo, lwarn};

/// 待完成的授权请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuthorization {
    pub state: String,
    pub user_id: i32,
    pub provider: ProviderId,
    pub redirect_uri: String,
    pub extra: ProviderExtra,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingAuthorization {
    fn from_model(model: oauth_pending_states::Model) -> Result<Self> {
        let provider = ProviderId::from_str(&model.provider)
            .map_err(|_| HubError::InvalidOrExpiredState)?;
        let extra = model
            .extra
            .as_deref()
            .map(serde_json::from_str::<ProviderExtra>)
            .transpose()?
            .unwrap_or_default();
        Ok(Self {
            state: model.state,
            user_id: model.user_id,
            provider,
            redirect_uri: model.redirect_uri,
            extra,
            issued_at: model.issued_at.and_utc(),
            expires_at: model.expires_at.and_utc(),
        })
    }
}

/// state 存储
#[derive(Debug, Clone)]
pub struct PendingStateStore {
    db: DatabaseConnection,
    ttl: Duration,
}

impl PendingStateStore {
    #[must_use]
    pub const fn new(db: DatabaseConnection, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    /// 写入新的待完成授权
    pub async fn insert(
        &self,
        state: &str,
        user_id: i32,
        provider: ProviderId,
        redirect_uri: &str,
        extra: &ProviderExtra,
    ) -> Result<PendingAuthorization> {
        let issued_at = Utc::now();
        let expires_at = issued_at + self.ttl;
        let extra_json = if extra.is_empty() {
            None
        } else {
            Some(serde_json::to_string(extra)?)
        };

        let model = oauth_pending_states::ActiveModel {
            state: Set(state.to_string()),
            user_id: Set(user_id),
            provider: Set(provider.as_str().to_string()),
            redirect_uri: Set(redirect_uri.to_string()),
            extra: Set(extra_json),
            issued_at: Set(issued_at.naive_utc()),
            expires_at: Set(expires_at.naive_utc()),
        };
        oauth_pending_states::Entity::insert(model)
            .exec_without_returning(&self.db)
            .await?;

        ldebug!(
            "system",
            LogStage::Authorization,
            LogComponent::StateStore,
            "state_issued",
            "已写入待完成授权",
            user_id = user_id,
            provider = %provider,
            expires_at = %expires_at
        );

        Ok(PendingAuthorization {
            state: state.to_string(),
            user_id,
            provider,
            redirect_uri: redirect_uri.to_string(),
            extra: extra.clone(),
            issued_at,
            expires_at,
        })
    }

    /// state 是否存在（不区分是否过期）
    pub async fn contains(&self, state: &str) -> Result<bool> {
        Ok(oauth_pending_states::Entity::find_by_id(state.to_string())
            .one(&self.db)
            .await?
            .is_some())
    }

    /// 消费 state：查询后立即删除，删除失败说明已被并发消费
    pub async fn consume(&self, state: &str) -> Result<PendingAuthorization> {
        let Some(model) = oauth_pending_states::Entity::find_by_id(state.to_string())
            .one(&self.db)
            .await?
        else {
            lwarn!(
                "system",
                LogStage::Callback,
                LogComponent::StateStore,
                "state_unknown",
                "回调携带了未知的 state"
            );
            return Err(HubError::InvalidOrExpiredState);
        };

        let deleted = oauth_pending_states::Entity::delete_by_id(state.to_string())
            .exec(&self.db)
            .await?;
        if deleted.rows_affected == 0 {
            return Err(HubError::InvalidOrExpiredState);
        }

        if model.is_expired() {
            lwarn!(
                "system",
                LogStage::Callback,
                LogComponent::StateStore,
                "state_expired",
                "state 已过期",
                user_id = model.user_id,
                provider = %model.provider
            );
            return Err(HubError::InvalidOrExpiredState);
        }

        PendingAuthorization::from_model(model)
    }

    /// 删除所有已过期的 state
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = oauth_pending_states::Entity::delete_many()
            .filter(oauth_pending_states::Column::ExpiresAt.lt(Utc::now().naive_utc()))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            linfo!(
                "system",
                LogStage::Cleanup,
                LogComponent::StateStore,
                "states_purged",
                "已清理过期 state",
                count = result.rows_affected
            );
        }
        Ok(result.rows_affected)
    }
}
