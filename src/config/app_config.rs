//! # 应用配置结构定义

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 应用主配置结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP 服务配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 数据库配置
    #[serde(default)]
    pub database: super::DatabaseConfig,
    /// 会话认证配置
    pub auth: AuthConfig,
    /// OAuth 流程与提供商配置
    #[serde(default)]
    pub oauth: OAuthConfig,
    /// 后台任务配置
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// HTTP 服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听地址
    pub bind_address: String,
    /// 监听端口
    pub port: u16,
    /// API前缀
    pub api_prefix: String,
    /// 对外可访问的基础地址，用于拼接默认回调地址
    pub public_base_url: String,
    /// 是否启用CORS
    pub enable_cors: bool,
    /// 允许的CORS源地址
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            api_prefix: "/api".to_string(),
            public_base_url: "http://localhost:8080".to_string(),
            enable_cors: true,
            cors_origins: vec!["*".to_string()],
        }
    }
}

/// 会话认证配置（JWT 由外部账号系统签发）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 密钥
    pub jwt_secret: String,
    /// 签发者
    #[serde(default = "default_issuer")]
    pub issuer: String,
    /// 受众
    #[serde(default = "default_audience")]
    pub audience: String,
    /// 浏览器会话 Cookie 名称，回调请求没有 Authorization 头时使用
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,
    /// 过期时间容差（秒）
    #[serde(default = "default_leeway")]
    pub leeway_seconds: u64,
}

fn default_issuer() -> String {
    "connection-hub".to_string()
}

fn default_audience() -> String {
    "connection-hub-users".to_string()
}

fn default_session_cookie() -> String {
    "session".to_string()
}

const fn default_leeway() -> u64 {
    30
}

impl AuthConfig {
    /// 使用指定密钥和默认值创建
    #[must_use]
    pub fn with_secret(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            issuer: default_issuer(),
            audience: default_audience(),
            session_cookie: default_session_cookie(),
            leeway_seconds: default_leeway(),
        }
    }
}

/// OAuth 流程配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// 待完成授权请求的有效期（秒）
    pub state_ttl_seconds: u64,
    /// 连接超时（秒）
    pub connect_timeout_seconds: u64,
    /// 单次请求总超时（秒）
    pub request_timeout_seconds: u64,
    /// 网络失败时的最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 指数退避基础间隔（毫秒）
    pub retry_base_delay_ms: u64,
    /// 请求提供商时使用的 User-Agent
    pub user_agent: String,
    /// 提供商配置，键为提供商标识（google、shopify ...）
    pub providers: BTreeMap<String, ProviderSettings>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            state_ttl_seconds: 600,
            connect_timeout_seconds: 10,
            request_timeout_seconds: 15,
            max_attempts: 3,
            retry_base_delay_ms: 500,
            user_agent: "connection-hub/0.1".to_string(),
            providers: BTreeMap::new(),
        }
    }
}

/// 单个提供商的配置，端点未填写时使用内置默认值
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub client_id: String,
    pub client_secret: String,
    /// 覆盖默认 scope
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    #[serde(default)]
    pub authorize_url: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub revoke_url: Option<String>,
    /// 追加到授权地址上的固定参数
    #[serde(default)]
    pub extra_params: BTreeMap<String, String>,
}

/// 后台任务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 是否启用自动续期
    pub enabled: bool,
    /// 扫描间隔（秒）
    pub interval_seconds: u64,
    /// 续期窗口（秒）：在此时间内过期的令牌会被刷新
    pub renewal_window_seconds: u64,
    /// 工作池大小
    pub max_concurrent_refreshes: usize,
    /// 单次扫描的最大连接数
    pub batch_limit: u64,
    /// 过期 state 清理间隔（秒）
    pub cleanup_interval_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 60,
            renewal_window_seconds: 300,
            max_concurrent_refreshes: 8,
            batch_limit: 500,
            cleanup_interval_seconds: 300,
        }
    }
}

impl AppConfig {
    /// 以指定 JWT 密钥构造默认配置
    #[must_use]
    pub fn with_jwt_secret(jwt_secret: impl Into<String>) -> Self {
        Self {
            server: ServerConfig::default(),
            database: super::DatabaseConfig::default(),
            auth: AuthConfig::with_secret(jwt_secret),
            oauth: OAuthConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be greater than 0".to_string());
        }
        if !self.server.api_prefix.starts_with('/') {
            return Err("server.api_prefix must start with '/'".to_string());
        }
        url::Url::parse(&self.server.public_base_url)
            .map_err(|e| format!("server.public_base_url is not a valid URL: {e}"))?;

        if self.database.url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }

        if self.auth.jwt_secret.len() < 32 {
            return Err("auth.jwt_secret must be at least 32 characters".to_string());
        }

        if self.oauth.max_attempts == 0 {
            return Err("oauth.max_attempts must be at least 1".to_string());
        }
        if self.oauth.state_ttl_seconds == 0 {
            return Err("oauth.state_ttl_seconds must be greater than 0".to_string());
        }
        for (name, provider) in &self.oauth.providers {
            if provider.client_id.is_empty() {
                return Err(format!("oauth.providers.{name}.client_id cannot be empty"));
            }
            if provider.client_secret.is_empty() {
                return Err(format!("oauth.providers.{name}.client_secret cannot be empty"));
            }
        }

        if self.scheduler.interval_seconds == 0 || self.scheduler.cleanup_interval_seconds == 0 {
            return Err("scheduler intervals must be greater than 0".to_string());
        }
        if self.scheduler.max_concurrent_refreshes == 0 {
            return Err("scheduler.max_concurrent_refreshes must be greater than 0".to_string());
        }

        Ok(())
    }
}
