//! # 连接审计日志实体定义
//!
//! 仅追加，不更新也不删除

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 连接审计日志实体
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "connection_audit_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i32,
    pub provider: String,
    /// connected / refreshed / disconnected / failed
    pub action: String,
    pub details: Option<String>, // JSON 字符串
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
