//! # Entity 模块
//!
//! 包含所有 Sea-ORM 实体定义

pub mod connection_audit_logs;
pub mod oauth_connections;
pub mod oauth_pending_states;

pub use connection_audit_logs::Entity as ConnectionAuditLogs;
pub use oauth_connections::Entity as OAuthConnections;
pub use oauth_pending_states::Entity as OAuthPendingStates;
