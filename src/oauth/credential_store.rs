//! # 连接凭据存储
//!
//! 每个 (user_id, provider) 最多一条记录。令牌落库前加密，读取时解密；
//! 所有写方法都提供 `_with` 版本，便于与审计日志写入同一事务。

use chrono::{DateTime, Duration, Utc};
use entity::oauth_connections::{self, Column};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use super::{ProviderExtra, ProviderId, TokenResult};
use crate::config::{EncryptedValue, TokenCipher};
use crate::error::{HubError, Result};
use crate::ldebug;
use crate::logging::{LogComponent, LogStage};

/// 连接主键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub user_id: i32,
    pub provider: ProviderId,
}

/// 解密后的连接记录
#[derive(Clone, PartialEq, Eq)]
pub struct StoredConnection {
    pub user_id: i32,
    pub provider: ProviderId,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
    pub extra: ProviderExtra,
    pub needs_reauth: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for StoredConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredConnection")
            .field("user_id", &self.user_id)
            .field("provider", &self.provider)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("needs_reauth", &self.needs_reauth)
            .finish_non_exhaustive()
    }
}

/// 对外展示的连接摘要，不含任何令牌
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub provider: ProviderId,
    pub connected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub needs_reauth: bool,
}

impl StoredConnection {
    /// 是否需要在截止时间前续期
    #[must_use]
    pub fn is_due(&self, deadline: DateTime<Utc>) -> bool {
        !self.needs_reauth
            && self.refresh_token.is_some()
            && self.expires_at.is_some_and(|expires_at| expires_at <= deadline)
    }

    #[must_use]
    pub const fn summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            provider: self.provider,
            connected_at: self.created_at,
            updated_at: self.updated_at,
            expires_at: self.expires_at,
            needs_reauth: self.needs_reauth,
        }
    }
}

/// 凭据存储
#[derive(Debug, Clone)]
pub struct CredentialStore {
    db: DatabaseConnection,
    cipher: TokenCipher,
}

impl CredentialStore {
    #[must_use]
    pub const fn new(db: DatabaseConnection, cipher: TokenCipher) -> Self {
        Self { db, cipher }
    }

    /// 新授权写入（存在则替换令牌，保留首次连接时间）
    pub async fn upsert(
        &self,
        user_id: i32,
        provider: ProviderId,
        token: &TokenResult,
    ) -> Result<StoredConnection> {
        self.upsert_with(&self.db, user_id, provider, token).await
    }

    pub async fn upsert_with<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: i32,
        provider: ProviderId,
        token: &TokenResult,
    ) -> Result<StoredConnection> {
        let now = Utc::now().naive_utc();
        let access = self.cipher.encrypt(&token.access_token)?;
        let refresh = token
            .refresh_token
            .as_deref()
            .map(|refresh_token| self.cipher.encrypt(refresh_token))
            .transpose()?;
        let extra = if token.extra.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&token.extra)?)
        };

        let model = oauth_connections::ActiveModel {
            user_id: Set(user_id),
            provider: Set(provider.as_str().to_string()),
            access_token: Set(access.data),
            access_token_nonce: Set(access.nonce),
            refresh_token: Set(refresh.as_ref().map(|value| value.data.clone())),
            refresh_token_nonce: Set(refresh.map(|value| value.nonce)),
            expires_at: Set(token.expires_at.map(|expires_at| expires_at.naive_utc())),
            scope: Set(token.scope.clone()),
            extra: Set(extra),
            needs_reauth: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        oauth_connections::Entity::insert(model)
            .on_conflict(
                OnConflict::columns([Column::UserId, Column::Provider])
                    .update_columns([
                        Column::AccessToken,
                        Column::AccessTokenNonce,
                        Column::RefreshToken,
                        Column::RefreshTokenNonce,
                        Column::ExpiresAt,
                        Column::Scope,
                        Column::Extra,
                        Column::NeedsReauth,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;

        ldebug!(
            "system",
            LogStage::Db,
            LogComponent::CredentialStore,
            "connection_written",
            "连接记录已写入",
            user_id = user_id,
            provider = %provider
        );

        self.get_with(conn, user_id, provider).await
    }

    /// 续期写入，没有新刷新令牌时保留旧的。记录已被删除时返回 `NotFound`，不会重新创建
    pub async fn apply_refresh_with<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: i32,
        provider: ProviderId,
        token: &TokenResult,
    ) -> Result<StoredConnection> {
        let access = self.cipher.encrypt(&token.access_token)?;
        let mut update = oauth_connections::Entity::update_many()
            .col_expr(Column::AccessToken, Expr::value(access.data))
            .col_expr(Column::AccessTokenNonce, Expr::value(access.nonce))
            .col_expr(
                Column::ExpiresAt,
                Expr::value(token.expires_at.map(|expires_at| expires_at.naive_utc())),
            )
            .col_expr(Column::NeedsReauth, Expr::value(false))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().naive_utc()));

        if let Some(refresh_token) = token.refresh_token.as_deref() {
            let refresh = self.cipher.encrypt(refresh_token)?;
            update = update
                .col_expr(Column::RefreshToken, Expr::value(refresh.data))
                .col_expr(Column::RefreshTokenNonce, Expr::value(refresh.nonce));
        }
        if let Some(scope) = &token.scope {
            update = update.col_expr(Column::Scope, Expr::value(scope.clone()));
        }
        if !token.extra.is_empty() {
            update = update.col_expr(
                Column::Extra,
                Expr::value(serde_json::to_string(&token.extra)?),
            );
        }

        let result = update
            .filter(Column::UserId.eq(user_id))
            .filter(Column::Provider.eq(provider.as_str()))
            .exec(conn)
            .await?;
        if result.rows_affected == 0 {
            return Err(HubError::not_found(format!("{provider} 连接")));
        }

        ldebug!(
            "system",
            LogStage::Db,
            LogComponent::CredentialStore,
            "connection_refreshed",
            "连接令牌已续期",
            user_id = user_id,
            provider = %provider
        );

        self.get_with(conn, user_id, provider).await
    }

    /// 获取连接，不存在时返回 `NotFound`
    pub async fn get(&self, user_id: i32, provider: ProviderId) -> Result<StoredConnection> {
        self.get_with(&self.db, user_id, provider).await
    }

    pub async fn get_with<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: i32,
        provider: ProviderId,
    ) -> Result<StoredConnection> {
        let model = oauth_connections::Entity::find()
            .filter(Column::UserId.eq(user_id))
            .filter(Column::Provider.eq(provider.as_str()))
            .one(conn)
            .await?
            .ok_or_else(|| HubError::not_found(format!("{provider} 连接")))?;
        self.decrypt_model(model)
    }

    /// 删除连接，不存在时返回 `NotFound`
    pub async fn delete(&self, user_id: i32, provider: ProviderId) -> Result<()> {
        self.delete_with(&self.db, user_id, provider).await
    }

    pub async fn delete_with<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: i32,
        provider: ProviderId,
    ) -> Result<()> {
        let result = oauth_connections::Entity::delete_many()
            .filter(Column::UserId.eq(user_id))
            .filter(Column::Provider.eq(provider.as_str()))
            .exec(conn)
            .await?;
        if result.rows_affected == 0 {
            return Err(HubError::not_found(format!("{provider} 连接")));
        }
        Ok(())
    }

    /// 用户的全部连接，按提供商排序
    pub async fn list_for_user(&self, user_id: i32) -> Result<Vec<StoredConnection>> {
        oauth_connections::Entity::find()
            .filter(Column::UserId.eq(user_id))
            .order_by_asc(Column::Provider)
            .all(&self.db)
            .await?
            .into_iter()
            .map(|model| self.decrypt_model(model))
            .collect()
    }

    /// 标记需要用户重新授权
    pub async fn mark_needs_reauth(&self, user_id: i32, provider: ProviderId) -> Result<()> {
        self.mark_needs_reauth_with(&self.db, user_id, provider)
            .await
    }

    pub async fn mark_needs_reauth_with<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: i32,
        provider: ProviderId,
    ) -> Result<()> {
        oauth_connections::Entity::update_many()
            .col_expr(Column::NeedsReauth, Expr::value(true))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().naive_utc()))
            .filter(Column::UserId.eq(user_id))
            .filter(Column::Provider.eq(provider.as_str()))
            .exec(conn)
            .await?;
        Ok(())
    }

    /// 在窗口期内到期、可续期的连接，最早到期的优先
    pub async fn list_due_for_refresh(
        &self,
        window: Duration,
        limit: u64,
    ) -> Result<Vec<ConnectionKey>> {
        let deadline = (Utc::now() + window).naive_utc();
        let rows: Vec<(i32, String)> = oauth_connections::Entity::find()
            .select_only()
            .column(Column::UserId)
            .column(Column::Provider)
            .filter(Column::ExpiresAt.is_not_null())
            .filter(Column::ExpiresAt.lte(deadline))
            .filter(Column::RefreshToken.is_not_null())
            .filter(Column::NeedsReauth.eq(false))
            .order_by_asc(Column::ExpiresAt)
            .limit(limit)
            .into_tuple()
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(user_id, provider)| {
                ProviderId::from_str(&provider)
                    .ok()
                    .map(|provider| ConnectionKey { user_id, provider })
            })
            .collect())
    }

    fn decrypt_model(&self, model: oauth_connections::Model) -> Result<StoredConnection> {
        let provider = ProviderId::from_str(&model.provider).map_err(|_| {
            HubError::internal(format!("连接记录中的提供商无效: {}", model.provider))
        })?;
        let access_token = self.cipher.decrypt(&EncryptedValue {
            data: model.access_token,
            nonce: model.access_token_nonce,
        })?;
        let refresh_token = match (model.refresh_token, model.refresh_token_nonce) {
            (Some(data), Some(nonce)) => Some(self.cipher.decrypt(&EncryptedValue { data, nonce })?),
            _ => None,
        };
        let extra = model
            .extra
            .as_deref()
            .map(serde_json::from_str::<ProviderExtra>)
            .transpose()?
            .unwrap_or_default();

        Ok(StoredConnection {
            user_id: model.user_id,
            provider,
            access_token,
            refresh_token,
            expires_at: model.expires_at.map(|expires_at| expires_at.and_utc()),
            scope: model.scope,
            extra,
            needs_reauth: model.needs_reauth,
            created_at: model.created_at.and_utc(),
            updated_at: model.updated_at.and_utc(),
        })
    }
}
