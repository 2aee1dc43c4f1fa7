//! 运行统计：计数器、设备集合与 sidecar 文件同步。

use axum::extract::Extension;
use axum::response::Json as JsonResponse;
use chrono::{Local, SecondsFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::atomic::write_atomic;
use crate::decoder::Category;
use crate::error::ApiError;
use crate::persist::Persisted;
use crate::storage::Storage;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total_requests: u64,
    pub photos_received: u64,
    pub audios_received: u64,
    pub last_connection: Option<String>,
    pub devices: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct StatsState {
    stats: Stats,
    dirty: bool,
}

/// Shared statistics handle; every mutation goes through its methods.
#[derive(Debug)]
pub struct StatsStore {
    sidecar: PathBuf,
    state: Mutex<StatsState>,
    flush_lock: Mutex<()>,
}

impl StatsStore {
    pub fn new(sidecar: PathBuf) -> Self {
        Self {
            sidecar,
            state: Mutex::new(StatsState::default()),
            flush_lock: Mutex::new(()),
        }
    }

    pub fn sidecar_path(&self) -> &Path {
        &self.sidecar
    }

    /// 记录一次上传请求：总数加一、刷新最近连接时间并登记设备。
    pub async fn begin_request(&self, device_id: &str) {
        let mut state = self.state.lock().await;
        state.stats.total_requests += 1;
        state.stats.last_connection = Some(local_timestamp());
        if !state.stats.devices.contains(device_id) {
            state.stats.devices.insert(device_id.to_string());
        }
        state.dirty = true;
    }

    /// 按写入结果累加对应类别计数。
    pub async fn record_artifact(&self, category: &Category, persisted: Persisted) {
        let mut state = self.state.lock().await;
        match (category, persisted) {
            (Category::Photo | Category::Screenshot, Persisted::Binary(_)) => {
                state.stats.photos_received += 1;
            }
            (Category::Audio, Persisted::Binary(_) | Persisted::Placeholder) => {
                state.stats.audios_received += 1;
            }
            _ => return,
        }
        state.dirty = true;
    }

    pub async fn snapshot(&self) -> Stats {
        self.state.lock().await.stats.clone()
    }

    /// 清空全部统计。
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.stats = Stats::default();
        state.dirty = true;
    }

    /// Rewrites the sidecar file with the current snapshot.
    pub async fn flush(&self) -> io::Result<()> {
        let _flush = self.flush_lock.lock().await;
        let snapshot = {
            let mut state = self.state.lock().await;
            state.dirty = false;
            state.stats.clone()
        };
        let result = self.write_snapshot(&snapshot).await;
        if result.is_err() {
            self.state.lock().await.dirty = true;
        }
        result
    }

    /// 仅在有未同步的修改时写入，返回是否执行了写入。
    pub async fn flush_if_dirty(&self) -> io::Result<bool> {
        if !self.state.lock().await.dirty {
            return Ok(false);
        }
        self.flush().await?;
        Ok(true)
    }

    async fn write_snapshot(&self, snapshot: &Stats) -> io::Result<()> {
        if let Some(parent) = self.sidecar.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_vec_pretty(snapshot).map_err(io::Error::other)?;
        write_atomic(&self.sidecar, &content).await?;
        debug!(path = ?self.sidecar, total = snapshot.total_requests, "stats flushed");
        Ok(())
    }
}

/// 当前本地时间（RFC 3339，微秒精度）。
pub fn local_timestamp() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[derive(Serialize)]
pub struct StatsReport {
    #[serde(flatten)]
    stats: Stats,
    upload_folder_size: u64,
}

/// 返回统计快照与上传目录大小。
pub async fn get_stats(
    Extension(stats): Extension<Arc<StatsStore>>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<JsonResponse<StatsReport>, ApiError> {
    let upload_folder_size = storage.folder_size().await?;
    Ok(JsonResponse(StatsReport {
        stats: stats.snapshot().await,
        upload_folder_size,
    }))
}
