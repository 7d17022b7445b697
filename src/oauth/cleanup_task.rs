use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;

use super::PendingStateStore;
use crate::error::Result;
use crate::logging::{LogComponent, LogStage};
use crate::{lerror, linfo};

/// 过期 state 清理任务
pub struct PendingStateCleanupTask {
    states: Arc<PendingStateStore>,
    interval: Duration,
}

impl PendingStateCleanupTask {
    #[must_use]
    pub const fn new(states: Arc<PendingStateStore>, interval: Duration) -> Self {
        Self { states, interval }
    }

    /// 启动清理循环，直到收到取消信号
    pub async fn run(&self, shutdown: CancellationToken) {
        linfo!(
            "system",
            LogStage::Cleanup,
            LogComponent::CleanupTask,
            "cleanup_started",
            "state 清理任务已启动",
            interval_secs = self.interval.as_secs()
        );

        let mut interval = time::interval(self.interval);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.cleanup_once().await {
                        lerror!(
                            "system",
                            LogStage::Cleanup,
                            LogComponent::CleanupTask,
                            "cleanup_failed",
                            "清理过期 state 失败",
                            error = %e
                        );
                    }
                }
            }
        }

        linfo!(
            "system",
            LogStage::Shutdown,
            LogComponent::CleanupTask,
            "cleanup_stopped",
            "state 清理任务已停止"
        );
    }

    /// 清理一次，返回删除条数
    pub async fn cleanup_once(&self) -> Result<u64> {
        self.states.purge_expired().await
    }
}
