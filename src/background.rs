//! 统计 sidecar 的周期性同步任务。

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::stats::StatsStore;

/// 启动后台任务；间隔为 0 时不启动。
pub fn spawn_background_tasks(
    stats: Arc<StatsStore>,
    flush_interval: Duration,
) -> Option<JoinHandle<()>> {
    if flush_interval.is_zero() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(flush_interval);
        loop {
            interval.tick().await;
            match stats.flush_if_dirty().await {
                Ok(true) => debug!("periodic stats flush"),
                Ok(false) => {}
                Err(err) => warn!(
                    path = ?stats.sidecar_path(),
                    error = %err,
                    "periodic stats flush failed"
                ),
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn zero_interval_disables_task() {
        let stats = Arc::new(StatsStore::new("unused.json".into()));
        assert!(spawn_background_tasks(stats, Duration::ZERO).is_none());
    }

    #[tokio::test]
    async fn dirty_stats_are_flushed_periodically() {
        let temp = tempdir().expect("tempdir");
        let sidecar = temp.path().join("stats.json");
        let stats = Arc::new(StatsStore::new(sidecar.clone()));
        stats.begin_request("phone").await;

        let handle = spawn_background_tasks(stats, Duration::from_millis(10)).expect("task");
        for _ in 0..100 {
            if sidecar.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();
        assert!(sidecar.exists());
    }
}
