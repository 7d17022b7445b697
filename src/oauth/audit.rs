//! # 连接审计日志
//!
//! 仅追加。记录 connected / refreshed / disconnected / failed 四类事件

use chrono::{DateTime, Utc};
use entity::connection_audit_logs::{self, Column};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::ProviderId;
use crate::error::Result;
use crate::ldebug;
use crate::logging::{LogComponent, LogStage};

/// 单次查询返回的最大条数
pub const MAX_AUDIT_LIMIT: u64 = 500;

/// 审计动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Connected,
    Refreshed,
    Disconnected,
    Failed,
}

impl AuditAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Refreshed => "refreshed",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value {
            "connected" => Ok(Self::Connected),
            "refreshed" => Ok(Self::Refreshed),
            "disconnected" => Ok(Self::Disconnected),
            "failed" => Ok(Self::Failed),
            other => Err(crate::internal_error!("未知的审计动作: {}", other)),
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 审计事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: i32,
    pub user_id: i32,
    pub provider: String,
    pub action: AuditAction,
    pub details: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// 审计查询条件
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u64>,
}

/// 审计日志
#[derive(Debug, Clone)]
pub struct AuditLog {
    db: DatabaseConnection,
}

impl AuditLog {
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// 追加一条审计事件
    pub async fn record(
        &self,
        user_id: i32,
        provider: ProviderId,
        action: AuditAction,
        details: Option<Value>,
    ) -> Result<()> {
        self.record_with(&self.db, user_id, provider, action, details)
            .await
    }

    pub async fn record_with<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: i32,
        provider: ProviderId,
        action: AuditAction,
        details: Option<Value>,
    ) -> Result<()> {
        let model = connection_audit_logs::ActiveModel {
            user_id: Set(user_id),
            provider: Set(provider.as_str().to_string()),
            action: Set(action.as_str().to_string()),
            details: Set(details.map(|value| value.to_string())),
            created_at: Set(Utc::now().naive_utc()),
            ..Default::default()
        };
        connection_audit_logs::Entity::insert(model)
            .exec_without_returning(conn)
            .await?;

        ldebug!(
            "system",
            LogStage::Db,
            LogComponent::Audit,
            "audit_recorded",
            "审计事件已记录",
            user_id = user_id,
            provider = %provider,
            action = %action
        );
        Ok(())
    }

    /// 按时间倒序查询用户的审计事件
    pub async fn query(&self, user_id: i32, query: &AuditQuery) -> Result<Vec<AuditEvent>> {
        let limit = query.limit.unwrap_or(100).clamp(1, MAX_AUDIT_LIMIT);
        let mut select = connection_audit_logs::Entity::find().filter(Column::UserId.eq(user_id));
        if let Some(from) = query.from {
            select = select.filter(Column::CreatedAt.gte(from.naive_utc()));
        }
        if let Some(to) = query.to {
            select = select.filter(Column::CreatedAt.lte(to.naive_utc()));
        }

        select
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?
            .into_iter()
            .map(|model| {
                Ok(AuditEvent {
                    id: model.id,
                    user_id: model.user_id,
                    provider: model.provider,
                    action: AuditAction::parse(&model.action)?,
                    details: model
                        .details
                        .as_deref()
                        .map(serde_json::from_str::<Value>)
                        .transpose()?,
                    created_at: model.created_at.and_utc(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::create_test_db;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn test_record_and_query_newest_first() {
        let audit = AuditLog::new(create_test_db().await);
        audit
            .record(1, ProviderId::Google, AuditAction::Connected, None)
            .await
            .unwrap();
        audit
            .record(
                1,
                ProviderId::Google,
                AuditAction::Failed,
                Some(json!({"code": "UPSTREAM_REJECTED"})),
            )
            .await
            .unwrap();
        audit
            .record(2, ProviderId::TikTok, AuditAction::Connected, None)
            .await
            .unwrap();

        let events = audit.query(1, &AuditQuery::default()).await.unwrap();
        let actions: Vec<_> = events.iter().map(|event| event.action).collect();
        assert_eq!(actions, vec![AuditAction::Failed, AuditAction::Connected]);
        assert_eq!(events[0].details, Some(json!({"code": "UPSTREAM_REJECTED"})));
    }

    #[tokio::test]
    async fn test_query_time_range_and_limit() {
        let audit = AuditLog::new(create_test_db().await);
        for _ in 0..3 {
            audit
                .record(1, ProviderId::LinkedIn, AuditAction::Refreshed, None)
                .await
                .unwrap();
        }

        let limited = audit
            .query(
                1,
                &AuditQuery {
                    limit: Some(2),
                    ..AuditQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);

        let future = audit
            .query(
                1,
                &AuditQuery {
                    from: Some(Utc::now() + Duration::hours(1)),
                    ..AuditQuery::default()
                },
            )
            .await
            .unwrap();
        assert!(future.is_empty());
    }

    #[test]
    fn test_action_serialization() {
        assert_eq!(
            serde_json::to_value(AuditAction::Disconnected).unwrap(),
            json!("disconnected")
        );
        assert!(AuditAction::parse("exploded").is_err());
    }
}
