//! 应用上下文（DI 容器）
//!
//! 统一持有跨模块共享的服务实例，负责后台任务的启动与关闭。

use std::sync::Arc;
use std::time::Duration;

use sea_orm::DatabaseConnection;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::auth::JwtManager;
use crate::config::{AppConfig, TokenCipher};
use crate::database::{init_database, run_migrations};
use crate::error::Result;
use crate::logging::{LogComponent, LogStage};
use crate::oauth::{
    AuditLog, AuthorizationRequestBuilder, ConnectionController, CredentialStore,
    PendingStateCleanupTask, PendingStateStore, ProviderRegistry, RefreshScheduler,
    TokenExchangeClient,
};
use crate::{ldebug, linfo};

pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub jwt: Arc<JwtManager>,
    pub registry: Arc<ProviderRegistry>,
    pub states: Arc<PendingStateStore>,
    pub exchange: Arc<TokenExchangeClient>,
    pub store: Arc<CredentialStore>,
    pub audit: Arc<AuditLog>,
    pub controller: Arc<ConnectionController>,
    pub scheduler: Arc<RefreshScheduler>,
    shutdown: CancellationToken,
    cleanup_handle: Mutex<Option<JoinHandle<()>>>,
}

impl AppContext {
    /// 连接数据库、运行迁移并组装所有服务
    pub async fn initialize(config: AppConfig, cipher: TokenCipher) -> Result<Self> {
        let db = init_database(&config.database).await?;
        run_migrations(&db).await?;
        Self::assemble(config, db, cipher)
    }

    /// 使用已迁移的数据库组装服务
    pub fn assemble(config: AppConfig, db: DatabaseConnection, cipher: TokenCipher) -> Result<Self> {
        let shutdown = CancellationToken::new();
        let registry = Arc::new(ProviderRegistry::from_config(&config.oauth)?);
        let states = Arc::new(PendingStateStore::new(
            db.clone(),
            chrono::Duration::seconds(i64::try_from(config.oauth.state_ttl_seconds).unwrap_or(i64::MAX)),
        ));
        let builder = Arc::new(AuthorizationRequestBuilder::new(
            Arc::clone(&registry),
            Arc::clone(&states),
            &config.server.public_base_url,
            &config.server.api_prefix,
        ));
        let exchange = Arc::new(TokenExchangeClient::new(Arc::clone(&registry), &config.oauth)?);
        let store = Arc::new(CredentialStore::new(db.clone(), cipher));
        let audit = Arc::new(AuditLog::new(db.clone()));
        let controller = Arc::new(ConnectionController::new(
            db.clone(),
            Arc::clone(&registry),
            builder,
            Arc::clone(&states),
            Arc::clone(&exchange),
            Arc::clone(&store),
            Arc::clone(&audit),
        ));
        let scheduler = Arc::new(RefreshScheduler::new(
            db.clone(),
            Arc::clone(&store),
            Arc::clone(&audit),
            Arc::clone(&exchange),
            &config.scheduler,
            shutdown.child_token(),
        ));

        ldebug!(
            "system",
            LogStage::Startup,
            LogComponent::Main,
            "context_assembled",
            "应用上下文组装完成"
        );

        Ok(Self {
            jwt: Arc::new(JwtManager::new(&config.auth)),
            config: Arc::new(config),
            db,
            registry,
            states,
            exchange,
            store,
            audit,
            controller,
            scheduler,
            shutdown,
            cleanup_handle: Mutex::new(None),
        })
    }

    /// 根取消令牌，关闭时触发
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// 启动续期与清理后台任务
    pub async fn start_background_tasks(&self) -> Result<()> {
        if self.config.scheduler.enabled {
            self.scheduler.start().await?;
        }

        let task = PendingStateCleanupTask::new(
            Arc::clone(&self.states),
            Duration::from_secs(self.config.scheduler.cleanup_interval_seconds.max(1)),
        );
        let token = self.shutdown.child_token();
        let handle = tokio::spawn(async move { task.run(token).await });
        *self.cleanup_handle.lock().await = Some(handle);
        Ok(())
    }

    /// 取消所有进行中的请求并等待后台任务退出
    pub async fn shutdown(&self) {
        linfo!(
            "system",
            LogStage::Shutdown,
            LogComponent::Main,
            "shutdown",
            "正在关闭后台任务"
        );
        self.shutdown.cancel();
        self.scheduler.stop().await;
        if let Some(handle) = self.cleanup_handle.lock().await.take() {
            let _ = handle.await;
        }
    }
}
