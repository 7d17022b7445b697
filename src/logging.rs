//! # 日志配置模块
//!
//! 初始化 tracing 订阅器，并提供带阶段/组件标签的结构化日志宏。
//!
//! 所有日志宏的调用形式一致：
//!
//! ```ignore
//! linfo!(request_id, LogStage::Callback, LogComponent::Controller, "callback_done", "回调处理完成", user_id = 1);
//! ```

use std::env;
use std::fmt;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// 日志所处的处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStage {
    Startup,
    Shutdown,
    Authentication,
    Authorization,
    Callback,
    TokenExchange,
    Refresh,
    Revocation,
    Scheduling,
    Cleanup,
    Db,
    Internal,
    Error,
}

impl LogStage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Shutdown => "shutdown",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::Callback => "callback",
            Self::TokenExchange => "token_exchange",
            Self::Refresh => "refresh",
            Self::Revocation => "revocation",
            Self::Scheduling => "scheduling",
            Self::Cleanup => "cleanup",
            Self::Db => "db",
            Self::Internal => "internal",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 产生日志的组件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogComponent {
    Main,
    Config,
    Database,
    ServerSetup,
    Auth,
    Registry,
    AuthorizeBuilder,
    StateStore,
    TokenExchange,
    CredentialStore,
    Audit,
    RefreshScheduler,
    CleanupTask,
    Controller,
    Handler,
}

impl LogComponent {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Config => "config",
            Self::Database => "database",
            Self::ServerSetup => "server_setup",
            Self::Auth => "auth",
            Self::Registry => "registry",
            Self::AuthorizeBuilder => "authorize_builder",
            Self::StateStore => "state_store",
            Self::TokenExchange => "token_exchange",
            Self::CredentialStore => "credential_store",
            Self::Audit => "audit",
            Self::RefreshScheduler => "refresh_scheduler",
            Self::CleanupTask => "cleanup_task",
            Self::Controller => "controller",
            Self::Handler => "handler",
        }
    }
}

impl fmt::Display for LogComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __hub_log {
    ($level:ident, $request_id:expr, $stage:expr, $component:expr, $operation:expr, $message:expr $(,)?) => {
        ::tracing::$level!(
            request_id = %$request_id,
            stage = %$stage,
            component = %$component,
            operation = $operation,
            "{}",
            $message
        )
    };
    ($level:ident, $request_id:expr, $stage:expr, $component:expr, $operation:expr, $message:expr, $($fields:tt)+) => {
        ::tracing::$level!(
            request_id = %$request_id,
            stage = %$stage,
            component = %$component,
            operation = $operation,
            $($fields)+,
            "{}",
            $message
        )
    };
}

/// INFO 级结构化日志
#[macro_export]
macro_rules! linfo {
    ($($args:tt)+) => {
        $crate::__hub_log!(info, $($args)+)
    };
}

/// DEBUG 级结构化日志
#[macro_export]
macro_rules! ldebug {
    ($($args:tt)+) => {
        $crate::__hub_log!(debug, $($args)+)
    };
}

/// WARN 级结构化日志
#[macro_export]
macro_rules! lwarn {
    ($($args:tt)+) => {
        $crate::__hub_log!(warn, $($args)+)
    };
}

/// ERROR 级结构化日志
#[macro_export]
macro_rules! lerror {
    ($($args:tt)+) => {
        $crate::__hub_log!(error, $($args)+)
    };
}

/// 默认过滤规则：屏蔽 SQL 查询明细
fn default_filter(level: &str) -> String {
    format!("{level},connection_hub=debug,sqlx::query=off,sea_orm::query=warn,sqlx=warn")
}

/// 初始化日志系统
///
/// `RUST_LOG` 优先于传入的级别。重复调用（例如在测试中）会被忽略。
pub fn init_optimized_logging(log_level: Option<&String>) {
    let level = log_level.map_or("info", String::as_str);
    let log_filter = env::var("RUST_LOG").unwrap_or_else(|_| default_filter(level));

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| log_filter.into()))
        .with(
            tracing_fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init();
}
