//! # 测试辅助函数

use sea_orm::DatabaseConnection;
use std::sync::Once;

use crate::config::{DatabaseConfig, ProviderSettings, TokenCipher};
use crate::database::{init_database, run_migrations};
use crate::oauth::{ProviderDescriptor, ProviderId, ProviderRegistry};

static INIT: Once = Once::new();

/// 初始化测试日志
pub fn init_test_env() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// 创建已迁移的内存数据库
pub async fn create_test_db() -> DatabaseConnection {
    init_test_env();
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        ..DatabaseConfig::default()
    };
    let db = init_database(&config).await.unwrap();
    run_migrations(&db).await.unwrap();
    db
}

/// 固定密钥的加密器
#[must_use]
pub fn test_cipher() -> TokenCipher {
    TokenCipher::new(&[42u8; 32])
}

/// 端点指向给定基地址的提供商描述
#[must_use]
pub fn mock_descriptor(id: ProviderId, base_url: &str) -> ProviderDescriptor {
    ProviderDescriptor::from_settings(
        id,
        &ProviderSettings {
            client_id: format!("{id}-client"),
            client_secret: format!("{id}-secret"),
            authorize_url: Some(format!("{base_url}/{id}/authorize")),
            token_url: Some(format!("{base_url}/{id}/token")),
            revoke_url: Some(format!("{base_url}/{id}/revoke")),
            ..ProviderSettings::default()
        },
    )
}

/// 包含全部提供商的注册表
#[must_use]
pub fn mock_registry(base_url: &str) -> ProviderRegistry {
    ProviderRegistry::from_descriptors(
        ProviderId::ALL
            .into_iter()
            .map(|id| mock_descriptor(id, base_url)),
    )
}
