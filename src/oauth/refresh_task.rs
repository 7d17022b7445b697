//! # 令牌自动续期后台任务
//!
//! 定期扫描即将到期的连接并提前续期：
//! - 同一连接同一时刻只有一个续期在进行（进程内租约）
//! - 并发续期数量受信号量限制
//! - 提供商拒绝刷新令牌时标记需要重新授权
//! - 支持反复启动、停止

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use super::{AuditAction, AuditLog, ConnectionKey, CredentialStore, TokenExchangeClient, TokenResult};
use crate::config::SchedulerConfig;
use crate::error::{HubError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, lerror, linfo, lwarn};

/// 任务状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// 未启动
    NotStarted,
    /// 运行中
    Running,
    /// 停止中
    Stopping,
    /// 已停止
    Stopped,
}

/// 单个连接的续期结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    Skipped,
    ReauthRequired,
    Failed,
}

/// 一轮扫描的汇总
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSummary {
    pub scanned: usize,
    pub refreshed: usize,
    pub skipped: usize,
    pub reauth_required: usize,
    pub failed: usize,
}

impl RefreshSummary {
    const fn record(&mut self, outcome: RefreshOutcome) {
        match outcome {
            RefreshOutcome::Refreshed => self.refreshed += 1,
            RefreshOutcome::Skipped => self.skipped += 1,
            RefreshOutcome::ReauthRequired => self.reauth_required += 1,
            RefreshOutcome::Failed => self.failed += 1,
        }
    }
}

/// 任务统计信息
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct TaskStats {
    /// 任务启动时间
    pub started_at: Option<DateTime<Utc>>,
    /// 最后执行时间
    pub last_execution_time: Option<DateTime<Utc>>,
    /// 总执行次数
    pub total_executions: u64,
    /// 失败执行次数
    pub failed_executions: u64,
    /// 成功续期的连接数
    pub total_refreshed: u64,
    /// 需要重新授权的连接数
    pub total_reauth_required: u64,
    /// 续期失败的连接数
    pub total_failed: u64,
    /// 最后一次执行时长（毫秒）
    pub last_duration_ms: u64,
    /// 最后一次错误
    pub last_error: Option<String>,
}

/// 续期执行者，扫描与单连接续期逻辑
#[derive(Debug)]
struct RefreshWorker {
    db: DatabaseConnection,
    store: Arc<CredentialStore>,
    audit: Arc<AuditLog>,
    exchange: Arc<TokenExchangeClient>,
    leases: Arc<DashMap<ConnectionKey, ()>>,
    permits: Arc<Semaphore>,
    window: Duration,
    batch_limit: u64,
}

/// 租约，释放时自动归还
struct LeaseGuard {
    leases: Arc<DashMap<ConnectionKey, ()>>,
    key: ConnectionKey,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.leases.remove(&self.key);
    }
}

impl RefreshWorker {
    fn try_lease(&self, key: ConnectionKey) -> Option<LeaseGuard> {
        match self.leases.entry(key) {
            Entry::Occupied(_) => None,
            Entry::Vacant(entry) => {
                entry.insert(());
                Some(LeaseGuard {
                    leases: Arc::clone(&self.leases),
                    key,
                })
            }
        }
    }

    async fn run_once(self: &Arc<Self>, cancel: &CancellationToken) -> Result<RefreshSummary> {
        let due = self
            .store
            .list_due_for_refresh(self.window, self.batch_limit)
            .await?;
        let mut summary = RefreshSummary {
            scanned: due.len(),
            ..RefreshSummary::default()
        };

        let mut join_set = JoinSet::new();
        for key in due {
            // 其他轮次正在处理
            let Some(lease) = self.try_lease(key) else {
                summary.skipped += 1;
                continue;
            };

            let worker = Arc::clone(self);
            let cancel = cancel.clone();
            join_set.spawn(async move {
                let _lease = lease;
                let Ok(_permit) = Arc::clone(&worker.permits).acquire_owned().await else {
                    return RefreshOutcome::Failed;
                };
                worker.refresh_one(key, &cancel).await
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    lerror!(
                        "system",
                        LogStage::Refresh,
                        LogComponent::RefreshScheduler,
                        "refresh_task_panicked",
                        "续期子任务异常退出",
                        error = %e
                    );
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    async fn refresh_one(&self, key: ConnectionKey, cancel: &CancellationToken) -> RefreshOutcome {
        // 持有租约后重新读取，可能已被断开或已被其他路径续期
        let connection = match self.store.get(key.user_id, key.provider).await {
            Ok(connection) => connection,
            Err(HubError::NotFound { .. }) => return RefreshOutcome::Skipped,
            Err(e) => {
                lerror!(
                    "system",
                    LogStage::Refresh,
                    LogComponent::RefreshScheduler,
                    "load_connection_failed",
                    "读取连接失败",
                    user_id = key.user_id,
                    provider = %key.provider,
                    error = %e
                );
                return RefreshOutcome::Failed;
            }
        };
        if !connection.is_due(Utc::now() + self.window) {
            return RefreshOutcome::Skipped;
        }
        let Some(refresh_token) = connection.refresh_token.as_deref() else {
            return RefreshOutcome::Skipped;
        };

        match self
            .exchange
            .refresh(key.provider, refresh_token, &connection.extra, cancel)
            .await
        {
            Ok(token) => match self.persist_refresh(key, &token).await {
                Ok(()) => {
                    ldebug!(
                        "system",
                        LogStage::Refresh,
                        LogComponent::RefreshScheduler,
                        "connection_refreshed",
                        "连接续期成功",
                        user_id = key.user_id,
                        provider = %key.provider
                    );
                    RefreshOutcome::Refreshed
                }
                Err(HubError::NotFound { .. }) => RefreshOutcome::Skipped,
                Err(e) => {
                    self.record_failure(key, &e).await;
                    RefreshOutcome::Failed
                }
            },
            Err(HubError::Cancelled) => RefreshOutcome::Skipped,
            Err(e @ HubError::UpstreamRejected { .. }) => {
                lwarn!(
                    "system",
                    LogStage::Refresh,
                    LogComponent::RefreshScheduler,
                    "refresh_rejected",
                    "提供商拒绝刷新令牌，需要重新授权",
                    user_id = key.user_id,
                    provider = %key.provider,
                    error = %e
                );
                match self.mark_reauth(key, &e).await {
                    Ok(()) => RefreshOutcome::ReauthRequired,
                    Err(db_error) => {
                        lerror!(
                            "system",
                            LogStage::Refresh,
                            LogComponent::RefreshScheduler,
                            "mark_reauth_failed",
                            "标记重新授权失败",
                            user_id = key.user_id,
                            provider = %key.provider,
                            error = %db_error
                        );
                        RefreshOutcome::Failed
                    }
                }
            }
            Err(e) => {
                self.record_failure(key, &e).await;
                RefreshOutcome::Failed
            }
        }
    }

    async fn persist_refresh(&self, key: ConnectionKey, token: &TokenResult) -> Result<()> {
        let txn = self.db.begin().await?;
        self.store
            .apply_refresh_with(&txn, key.user_id, key.provider, token)
            .await?;
        self.audit
            .record_with(
                &txn,
                key.user_id,
                key.provider,
                AuditAction::Refreshed,
                Some(json!({ "expiresAt": token.expires_at })),
            )
            .await?;
        txn.commit().await?;
        Ok(())
    }

    async fn mark_reauth(&self, key: ConnectionKey, error: &HubError) -> Result<()> {
        let txn = self.db.begin().await?;
        self.store
            .mark_needs_reauth_with(&txn, key.user_id, key.provider)
            .await?;
        self.audit
            .record_with(
                &txn,
                key.user_id,
                key.provider,
                AuditAction::Failed,
                Some(failure_details(error)),
            )
            .await?;
        txn.commit().await?;
        Ok(())
    }

    /// 失败不影响连接状态，下一轮重试
    async fn record_failure(&self, key: ConnectionKey, error: &HubError) {
        lwarn!(
            "system",
            LogStage::Refresh,
            LogComponent::RefreshScheduler,
            "refresh_failed",
            "连接续期失败，等待下一轮",
            user_id = key.user_id,
            provider = %key.provider,
            error = %error
        );
        if let Err(e) = self
            .audit
            .record(
                key.user_id,
                key.provider,
                AuditAction::Failed,
                Some(failure_details(error)),
            )
            .await
        {
            lerror!(
                "system",
                LogStage::Refresh,
                LogComponent::Audit,
                "audit_failed",
                "记录审计事件失败",
                error = %e
            );
        }
    }
}

fn failure_details(error: &HubError) -> serde_json::Value {
    json!({
        "operation": "refresh",
        "code": error.code(),
        "message": error.to_string(),
    })
}

/// 令牌自动续期调度器
pub struct RefreshScheduler {
    worker: Arc<RefreshWorker>,
    interval: StdDuration,
    /// 任务状态
    task_state: Arc<RwLock<TaskState>>,
    /// 任务统计信息
    task_stats: Arc<RwLock<TaskStats>>,
    /// 应用关闭令牌，每次启动从它派生本轮运行令牌
    shutdown: CancellationToken,
    /// 当前后台循环的运行令牌，停止时只取消它
    run_token: RwLock<CancellationToken>,
    /// 任务句柄
    task_handle: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl RefreshScheduler {
    #[must_use]
    pub fn new(
        db: DatabaseConnection,
        store: Arc<CredentialStore>,
        audit: Arc<AuditLog>,
        exchange: Arc<TokenExchangeClient>,
        config: &SchedulerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let window = Duration::seconds(i64::try_from(config.renewal_window_seconds).unwrap_or(i64::MAX));

        Self {
            worker: Arc::new(RefreshWorker {
                db,
                store,
                audit,
                exchange,
                leases: Arc::new(DashMap::new()),
                permits: Arc::new(Semaphore::new(config.max_concurrent_refreshes.max(1))),
                window,
                batch_limit: config.batch_limit,
            }),
            interval: StdDuration::from_secs(config.interval_seconds.max(1)),
            task_state: Arc::new(RwLock::new(TaskState::NotStarted)),
            task_stats: Arc::new(RwLock::new(TaskStats::default())),
            run_token: RwLock::new(shutdown.child_token()),
            shutdown,
            task_handle: Arc::new(RwLock::new(None)),
        }
    }

    /// 执行一轮扫描与续期
    pub async fn run_once(&self) -> Result<RefreshSummary> {
        let cancel = self.shutdown.child_token();
        Self::execute(&self.worker, &self.task_stats, &cancel).await
    }

    /// 启动后台循环
    pub async fn start(&self) -> Result<()> {
        let mut state = self.task_state.write().await;
        if matches!(*state, TaskState::Running) {
            return Err(HubError::internal("续期任务已在运行"));
        }
        if self.shutdown.is_cancelled() {
            return Err(HubError::Cancelled);
        }
        *state = TaskState::Running;
        drop(state);

        let run_token = self.shutdown.child_token();
        *self.run_token.write().await = run_token.clone();
        self.task_stats.write().await.started_at = Some(Utc::now());
        let handle = self.spawn_task_loop(run_token);
        *self.task_handle.write().await = Some(handle);

        linfo!(
            "system",
            LogStage::Scheduling,
            LogComponent::RefreshScheduler,
            "scheduler_started",
            "令牌续期任务已启动",
            interval_secs = self.interval.as_secs()
        );
        Ok(())
    }

    /// 停止后台循环，等待进行中的一轮结束
    pub async fn stop(&self) {
        {
            let mut state = self.task_state.write().await;
            if !matches!(*state, TaskState::Running) {
                return;
            }
            *state = TaskState::Stopping;
        }

        self.run_token.read().await.cancel();
        if let Some(handle) = self.task_handle.write().await.take() {
            let _ = handle.await;
        }

        *self.task_state.write().await = TaskState::Stopped;
        linfo!(
            "system",
            LogStage::Shutdown,
            LogComponent::RefreshScheduler,
            "scheduler_stopped",
            "令牌续期任务已停止"
        );
    }

    pub async fn state(&self) -> TaskState {
        self.task_state.read().await.clone()
    }

    pub async fn stats(&self) -> TaskStats {
        self.task_stats.read().await.clone()
    }

    fn spawn_task_loop(&self, run_token: CancellationToken) -> JoinHandle<()> {
        let worker = Arc::clone(&self.worker);
        let task_stats = Arc::clone(&self.task_stats);
        let period = self.interval;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = run_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let _ = Self::execute(&worker, &task_stats, &run_token).await;
                    }
                }
            }

            ldebug!(
                "system",
                LogStage::Shutdown,
                LogComponent::RefreshScheduler,
                "loop_exited",
                "令牌续期任务循环结束"
            );
        })
    }

    async fn execute(
        worker: &Arc<RefreshWorker>,
        task_stats: &Arc<RwLock<TaskStats>>,
        cancel: &CancellationToken,
    ) -> Result<RefreshSummary> {
        let started = Instant::now();
        let result = worker.run_once(cancel).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut stats = task_stats.write().await;
        stats.last_execution_time = Some(Utc::now());
        stats.total_executions += 1;
        stats.last_duration_ms = duration_ms;

        match &result {
            Ok(summary) => {
                stats.total_refreshed += summary.refreshed as u64;
                stats.total_reauth_required += summary.reauth_required as u64;
                stats.total_failed += summary.failed as u64;
                if summary.scanned > 0 {
                    linfo!(
                        "system",
                        LogStage::Refresh,
                        LogComponent::RefreshScheduler,
                        "refresh_round_done",
                        "本轮续期完成",
                        scanned = summary.scanned,
                        refreshed = summary.refreshed,
                        skipped = summary.skipped,
                        reauth_required = summary.reauth_required,
                        failed = summary.failed,
                        duration_ms = duration_ms
                    );
                }
            }
            Err(e) => {
                stats.failed_executions += 1;
                stats.last_error = Some(e.to_string());
                lerror!(
                    "system",
                    LogStage::Refresh,
                    LogComponent::RefreshScheduler,
                    "refresh_round_failed",
                    "本轮续期失败",
                    error = %e
                );
            }
        }
        drop(stats);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OAuthConfig;
    use crate::oauth::{AuditQuery, ProviderExtra, ProviderId, RetryPolicy};
    use crate::testing::{create_test_db, mock_registry, test_cipher};
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        store: Arc<CredentialStore>,
        audit: Arc<AuditLog>,
        scheduler: RefreshScheduler,
    }

    async fn fixture(server: &MockServer) -> Fixture {
        let db = create_test_db().await;
        let store = Arc::new(CredentialStore::new(db.clone(), test_cipher()));
        let audit = Arc::new(AuditLog::new(db.clone()));
        let exchange = Arc::new(
            TokenExchangeClient::new(Arc::new(mock_registry(&server.uri())), &OAuthConfig::default())
                .unwrap()
                .with_retry_policy(RetryPolicy {
                    max_attempts: 1,
                    base_delay: StdDuration::from_millis(1),
                }),
        );
        let scheduler = RefreshScheduler::new(
            db,
            Arc::clone(&store),
            Arc::clone(&audit),
            exchange,
            &SchedulerConfig::default(),
            CancellationToken::new(),
        );
        Fixture {
            store,
            audit,
            scheduler,
        }
    }

    fn expiring_token(refresh: Option<&str>, expires_in: i64) -> TokenResult {
        TokenResult {
            access_token: "old-access".to_string(),
            refresh_token: refresh.map(ToString::to_string),
            expires_at: Some(Utc::now() + Duration::seconds(expires_in)),
            scope: None,
            extra: ProviderExtra::new(),
        }
    }

    #[tokio::test]
    async fn test_due_connection_refreshed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/google/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new-access",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let fixture = fixture(&server).await;
        fixture
            .store
            .upsert(1, ProviderId::Google, &expiring_token(Some("r1"), 60))
            .await
            .unwrap();

        let summary = fixture.scheduler.run_once().await.unwrap();
        assert_eq!(summary.scanned, 1);
        assert_eq!(summary.refreshed, 1);

        let connection = fixture.store.get(1, ProviderId::Google).await.unwrap();
        assert_eq!(connection.access_token, "new-access");
        assert_eq!(connection.refresh_token.as_deref(), Some("r1"));

        let events = fixture.audit.query(1, &AuditQuery::default()).await.unwrap();
        assert_eq!(events[0].action, AuditAction::Refreshed);
    }

    #[tokio::test]
    async fn test_rejected_refresh_requires_reauth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/linkedin/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let fixture = fixture(&server).await;
        fixture
            .store
            .upsert(3, ProviderId::LinkedIn, &expiring_token(Some("revoked"), 30))
            .await
            .unwrap();

        let summary = fixture.scheduler.run_once().await.unwrap();
        assert_eq!(summary.reauth_required, 1);
        assert!(fixture.store.get(3, ProviderId::LinkedIn).await.unwrap().needs_reauth);

        // 已标记的连接不再被扫描
        let summary = fixture.scheduler.run_once().await.unwrap();
        assert_eq!(summary.scanned, 0);
    }

    #[tokio::test]
    async fn test_unreachable_keeps_connection_for_next_round() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/google/token"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fixture = fixture(&server).await;
        fixture
            .store
            .upsert(1, ProviderId::Google, &expiring_token(Some("r1"), 60))
            .await
            .unwrap();

        let summary = fixture.scheduler.run_once().await.unwrap();
        assert_eq!(summary.failed, 1);
        let connection = fixture.store.get(1, ProviderId::Google).await.unwrap();
        assert!(!connection.needs_reauth);
        assert_eq!(connection.access_token, "old-access");
    }

    #[tokio::test]
    async fn test_leased_connection_is_skipped() {
        let server = MockServer::start().await;
        let fixture = fixture(&server).await;
        fixture
            .store
            .upsert(1, ProviderId::Google, &expiring_token(Some("r1"), 60))
            .await
            .unwrap();

        let key = ConnectionKey {
            user_id: 1,
            provider: ProviderId::Google,
        };
        let lease = fixture.scheduler.worker.try_lease(key).unwrap();
        assert!(fixture.scheduler.worker.try_lease(key).is_none());

        let summary = fixture.scheduler.run_once().await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert!(server.received_requests().await.unwrap().is_empty());

        drop(lease);
        assert!(fixture.scheduler.worker.try_lease(key).is_some());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let server = MockServer::start().await;
        let fixture = fixture(&server).await;

        fixture.scheduler.start().await.unwrap();
        assert_eq!(fixture.scheduler.state().await, TaskState::Running);
        assert!(fixture.scheduler.start().await.is_err());

        fixture.scheduler.stop().await;
        assert_eq!(fixture.scheduler.state().await, TaskState::Stopped);
        assert!(fixture.scheduler.stats().await.started_at.is_some());
    }

    #[tokio::test]
    async fn test_restart_after_stop_still_refreshes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/google/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "after-restart",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;
        let fixture = fixture(&server).await;

        fixture.scheduler.start().await.unwrap();
        fixture.scheduler.stop().await;
        let executions = fixture.scheduler.stats().await.total_executions;
        fixture.scheduler.start().await.unwrap();
        assert_eq!(fixture.scheduler.state().await, TaskState::Running);

        // 等待重启后的循环完成首轮扫描
        tokio::time::timeout(StdDuration::from_secs(5), async {
            while fixture.scheduler.stats().await.total_executions == executions {
                tokio::time::sleep(StdDuration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        fixture
            .store
            .upsert(1, ProviderId::Google, &expiring_token(Some("r1"), 60))
            .await
            .unwrap();
        let summary = fixture.scheduler.run_once().await.unwrap();
        assert_eq!(summary.refreshed, 1);

        let connection = fixture.store.get(1, ProviderId::Google).await.unwrap();
        assert_eq!(connection.access_token, "after-restart");
        assert_eq!(fixture.scheduler.stats().await.total_refreshed, 1);

        fixture.scheduler.stop().await;
        assert_eq!(fixture.scheduler.state().await, TaskState::Stopped);
    }
}
