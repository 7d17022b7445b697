//! # 待完成授权请求实体定义
//!
//! 以 state 为主键，回调时一次性消费

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 待完成的授权请求
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth_pending_states")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub state: String,
    pub user_id: i32,
    pub provider: String,
    pub redirect_uri: String,
    pub extra: Option<String>, // JSON 字符串
    pub issued_at: DateTime,
    pub expires_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// 检查 state 是否已过期
    pub fn is_expired(&self) -> bool {
        chrono::Utc::now().naive_utc() > self.expires_at
    }
}
