//! # 错误类型定义

use axum::http::StatusCode;
use thiserror::Error;

/// 应用主要错误类型
#[derive(Debug, Error)]
pub enum HubError {
    /// 未知或未配置的提供商
    #[error("未知的提供商: {provider}")]
    UnknownProvider { provider: String },

    /// 缺少必需参数
    #[error("缺少必需参数: {parameter}")]
    MissingRequiredParameter { parameter: String },

    /// state 不存在、已使用或已过期
    #[error("state 无效或已过期")]
    InvalidOrExpiredState,

    /// 提供商返回了错误负载
    #[error("提供商 {provider} 拒绝请求: {error}{}", describe(.description))]
    UpstreamRejected {
        provider: String,
        error: String,
        description: Option<String>,
    },

    /// 网络错误或超时，可重试
    #[error("无法访问提供商 {provider}: {message}")]
    UpstreamUnreachable {
        provider: String,
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 提供商响应无法解析
    #[error("提供商 {provider} 响应格式错误: {message}")]
    MalformedResponse { provider: String, message: String },

    /// 资源不存在
    #[error("资源未找到: {resource}")]
    NotFound { resource: String },

    /// 未认证
    #[error("未认证: {message}")]
    Unauthorized { message: String },

    /// 配置相关错误
    #[error("配置错误: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 数据库相关错误
    #[error("数据库错误: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 令牌加解密错误
    #[error("加密错误: {message}")]
    Crypto {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 调用方取消或服务关闭
    #[error("请求已取消")]
    Cancelled,

    /// 系统内部错误
    #[error("内部错误: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },
}

fn describe(description: &Option<String>) -> String {
    description
        .as_ref()
        .map(|d| format!(" ({d})"))
        .unwrap_or_default()
}

impl HubError {
    /// 将错误转换为HTTP状态码和稳定错误代码
    #[must_use]
    pub const fn to_http_response_parts(&self) -> (StatusCode, &'static str) {
        match self {
            Self::UnknownProvider { .. } => (StatusCode::BAD_REQUEST, "UNKNOWN_PROVIDER"),
            Self::MissingRequiredParameter { .. } => {
                (StatusCode::BAD_REQUEST, "MISSING_REQUIRED_PARAMETER")
            }
            Self::InvalidOrExpiredState => (StatusCode::BAD_REQUEST, "INVALID_OR_EXPIRED_STATE"),
            Self::UpstreamRejected { .. } => (StatusCode::BAD_REQUEST, "UPSTREAM_REJECTED"),
            Self::UpstreamUnreachable { .. } => (StatusCode::BAD_GATEWAY, "UPSTREAM_UNREACHABLE"),
            Self::MalformedResponse { .. } => (StatusCode::BAD_GATEWAY, "MALFORMED_RESPONSE"),
            Self::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Unauthorized { .. } => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Config { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            Self::Database { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            Self::Crypto { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "CRYPTO_ERROR"),
            Self::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "REQUEST_CANCELLED"),
            Self::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    /// 稳定错误代码
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.to_http_response_parts().1
    }

    /// 授权码一次性使用，只有网络层失败可以重试
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamUnreachable { .. })
    }

    /// 错误归类
    #[must_use]
    pub fn category(&self) -> super::ErrorCategory {
        if self.to_http_response_parts().0.is_client_error() {
            super::ErrorCategory::Client
        } else {
            super::ErrorCategory::Server
        }
    }

    /// 创建未知提供商错误
    pub fn unknown_provider<T: Into<String>>(provider: T) -> Self {
        Self::UnknownProvider {
            provider: provider.into(),
        }
    }

    /// 创建缺少参数错误
    pub fn missing_parameter<T: Into<String>>(parameter: T) -> Self {
        Self::MissingRequiredParameter {
            parameter: parameter.into(),
        }
    }

    /// 创建上游拒绝错误
    pub fn upstream_rejected<P: Into<String>, E: Into<String>>(
        provider: P,
        error: E,
        description: Option<String>,
    ) -> Self {
        Self::UpstreamRejected {
            provider: provider.into(),
            error: error.into(),
            description,
        }
    }

    /// 创建上游不可达错误
    pub fn upstream_unreachable<P: Into<String>, T: Into<String>>(provider: P, message: T) -> Self {
        Self::UpstreamUnreachable {
            provider: provider.into(),
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的上游不可达错误
    pub fn upstream_unreachable_with_source<P: Into<String>, T: Into<String>, E: Into<anyhow::Error>>(
        provider: P,
        message: T,
        source: E,
    ) -> Self {
        Self::UpstreamUnreachable {
            provider: provider.into(),
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建响应格式错误
    pub fn malformed<P: Into<String>, T: Into<String>>(provider: P, message: T) -> Self {
        Self::MalformedResponse {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// 创建资源未找到错误
    pub fn not_found<T: Into<String>>(resource: T) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// 创建未认证错误
    pub fn unauthorized<T: Into<String>>(message: T) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// 创建配置错误
    pub fn config<T: Into<String>>(message: T) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的配置错误
    pub fn config_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建数据库错误
    pub fn database<T: Into<String>>(message: T) -> Self {
        Self::Database {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的数据库错误
    pub fn database_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Database {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建加密错误
    pub fn crypto<T: Into<String>>(message: T) -> Self {
        Self::Crypto {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的加密错误
    pub fn crypto_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Crypto {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建内部错误
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的内部错误
    pub fn internal_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

impl From<sea_orm::DbErr> for HubError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::database_with_source(err.to_string(), err)
    }
}

impl From<sea_orm::TransactionError<Self>> for HubError {
    fn from(err: sea_orm::TransactionError<Self>) -> Self {
        match err {
            sea_orm::TransactionError::Connection(db_err) => db_err.into(),
            sea_orm::TransactionError::Transaction(inner) => inner,
        }
    }
}

impl From<std::io::Error> for HubError {
    fn from(err: std::io::Error) -> Self {
        Self::internal_with_source(format!("IO错误: {err}"), err)
    }
}

impl From<toml::de::Error> for HubError {
    fn from(err: toml::de::Error) -> Self {
        Self::config_with_source("配置文件解析失败", err)
    }
}

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal_with_source("JSON 序列化失败", err)
    }
}
