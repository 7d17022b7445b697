//! # 配置管理模块
//!
//! 处理应用配置加载、验证和令牌加密密钥

mod app_config;
mod crypto;
mod database;

pub use app_config::{
    AppConfig, AuthConfig, OAuthConfig, ProviderSettings, SchedulerConfig, ServerConfig,
};
pub use crypto::{EncryptedValue, TOKEN_KEY_ENV, TokenCipher};
pub use database::DatabaseConfig;

use crate::error::{HubError, Result};
use crate::linfo;
use crate::logging::{LogComponent, LogStage};
use std::env;
use std::path::{Path, PathBuf};

/// 根据环境变量确定配置文件路径
///
/// `CONFIG_PATH` 优先，否则为 `config/config.{RUST_ENV}.toml`（默认 dev）
#[must_use]
pub fn resolve_config_path() -> PathBuf {
    if let Ok(path) = env::var("CONFIG_PATH") {
        return PathBuf::from(path);
    }
    let env = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
    PathBuf::from(format!("config/config.{env}.toml"))
}

/// 加载配置文件
pub fn load_config() -> Result<AppConfig> {
    load_config_from(&resolve_config_path())
}

/// 从指定路径加载并验证配置
pub fn load_config_from(config_file: &Path) -> Result<AppConfig> {
    if !config_file.exists() {
        return Err(HubError::config(format!(
            "配置文件不存在: {}",
            config_file.display()
        )));
    }

    let config_content = std::fs::read_to_string(config_file).map_err(|e| {
        HubError::config_with_source(format!("读取配置文件失败: {}", config_file.display()), e)
    })?;

    let config: AppConfig = toml::from_str(&config_content)?;

    config.validate().map_err(HubError::config)?;

    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Config,
        "config_loaded",
        "配置加载完成",
        path = %config_file.display(),
        providers = config.oauth.providers.len()
    );

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9000
public_base_url = "https://hub.example.com"

[auth]
jwt_secret = "0123456789abcdef0123456789abcdef"

[oauth.providers.google]
client_id = "g-id"
client_secret = "g-secret"
"#
        )
        .unwrap();

        let config = load_config_from(file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert!(config.oauth.providers.contains_key("google"));
    }

    #[test]
    fn test_missing_file() {
        let error = load_config_from(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert_eq!(error.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[auth]\njwt_secret = \"too-short\"").unwrap();
        assert!(load_config_from(file.path()).is_err());
    }
}
