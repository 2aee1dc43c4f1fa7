//! 按文件名的内存锁：串行化写入同一目标文件的上传。

use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time;

type LockTable = SyncMutex<HashMap<String, Arc<Mutex<()>>>>;

/// Manages asynchronous mutexes keyed by synthesized file name.
///
/// The table itself sits behind a synchronous mutex that is never held
/// across an await, so guards can prune their entry from `Drop`.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: Arc<LockTable>,
}

/// Holds a name lock until dropped; the entry leaves the table once unused.
#[derive(Debug)]
pub struct NameGuard {
    key: String,
    table: Arc<LockTable>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl LockManager {
    /// 创建新的锁管理器实例。
    pub fn new() -> Self {
        Self::default()
    }

    /// 在给定超时时间内获取文件名锁，超时返回 Err。
    pub async fn lock_name_with_timeout(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<NameGuard, ()> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        // 超时后 `lock` 已随等待的 future 一起释放。
        let acquired = time::timeout(timeout, lock.lock_owned()).await;
        match acquired {
            Ok(guard) => Ok(NameGuard {
                key: name.to_string(),
                table: self.locks.clone(),
                guard: Some(guard),
            }),
            Err(_) => {
                prune(&self.locks, name);
                Err(())
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for NameGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        prune(&self.table, &self.key);
    }
}

/// 无人持有或等待时移除表项。
fn prune(table: &LockTable, key: &str) {
    let mut locks = table.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(entry) = locks.get(key)
        && Arc::strong_count(entry) == 1
    {
        locks.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_lock_on_same_name_times_out() {
        let manager = LockManager::new();
        let held = manager
            .lock_name_with_timeout("photo_a_1", Duration::from_secs(1))
            .await
            .unwrap_or_else(|_| panic!("first lock"));
        let second = manager
            .lock_name_with_timeout("photo_a_1", Duration::from_millis(20))
            .await;
        assert!(second.is_err());
        assert_eq!(manager.len(), 1);

        let other = manager
            .lock_name_with_timeout("photo_b_1", Duration::from_millis(20))
            .await;
        assert!(other.is_ok());
        drop(other);
        drop(held);
        assert_eq!(manager.len(), 0);
    }

    #[tokio::test]
    async fn dropping_guard_prunes_idle_entries() {
        let manager = LockManager::new();
        let guard = manager
            .lock_name_with_timeout("audio_a_1", Duration::from_secs(1))
            .await
            .unwrap_or_else(|_| panic!("lock"));
        assert_eq!(manager.len(), 1);
        drop(guard);
        assert_eq!(manager.len(), 0);
    }

    #[tokio::test]
    async fn cancelled_holder_leaves_no_entry() {
        let manager = Arc::new(LockManager::new());
        let worker = {
            let manager = manager.clone();
            tokio::spawn(async move {
                let _guard = manager
                    .lock_name_with_timeout("data_a_1", Duration::from_secs(1))
                    .await
                    .unwrap_or_else(|_| panic!("lock"));
                std::future::pending::<()>().await;
            })
        };
        for _ in 0..100 {
            if manager.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(manager.len(), 1);

        worker.abort();
        assert!(worker.await.is_err_and(|err| err.is_cancelled()));
        assert_eq!(manager.len(), 0);
    }

    #[tokio::test]
    async fn waiter_keeps_entry_until_holder_releases() {
        let manager = Arc::new(LockManager::new());
        let held = manager
            .lock_name_with_timeout("photo_c_1", Duration::from_secs(1))
            .await
            .unwrap_or_else(|_| panic!("lock"));
        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .lock_name_with_timeout("photo_c_1", Duration::from_secs(5))
                    .await
                    .is_ok()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);
        assert!(waiter.await.expect("join"));
        assert_eq!(manager.len(), 0);
    }
}
