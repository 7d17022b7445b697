//! # OAuth 连接实体定义
//!
//! 每个 (user_id, provider) 组合最多一条记录，令牌字段均为 AES-256-GCM 密文

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// OAuth 连接实体
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth_connections")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i32,
    pub provider: String,
    /// Base64 密文
    pub access_token: String,
    pub access_token_nonce: String,
    pub refresh_token: Option<String>,
    pub refresh_token_nonce: Option<String>,
    pub expires_at: Option<DateTime>,
    pub scope: Option<String>,
    pub extra: Option<String>, // JSON 字符串
    pub needs_reauth: bool,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
