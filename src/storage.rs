use chrono::{DateTime, Local};
use serde::Serialize;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::ErrorKind;

use crate::config::{CollisionPolicy, MAX_COLLISION_SUFFIX};

#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// Resolves a bare file name inside the upload directory.
    ///
    /// Only a single plain component is accepted: no separators, no `..`,
    /// no hidden names.
    pub fn resolve_file_name(&self, name: &str) -> Result<PathBuf, StorageError> {
        if name.is_empty() || name.starts_with('.') {
            return Err(StorageError::InvalidPath);
        }
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(segment)), None) if segment == name => {
                Ok(self.root.join(segment))
            }
            _ => Err(StorageError::InvalidPath),
        }
    }

    /// 解析已存在的普通文件，拒绝符号链接与目录。
    pub async fn resolve_existing_file(&self, name: &str) -> Result<PathBuf, StorageError> {
        let target = self.resolve_file_name(name)?;
        let metadata = fs::symlink_metadata(&target).await?;
        if metadata.file_type().is_symlink() || !metadata.is_file() {
            return Err(StorageError::InvalidPath);
        }
        Ok(target)
    }

    /// 按冲突策略确定最终写入的文件名与路径。
    pub async fn claim_target(
        &self,
        file_name: &str,
        policy: CollisionPolicy,
    ) -> Result<(String, PathBuf), StorageError> {
        let target = self.resolve_file_name(file_name)?;
        if policy == CollisionPolicy::Overwrite || !path_exists(&target).await? {
            return Ok((file_name.to_string(), target));
        }

        let (stem, ext) = match file_name.rsplit_once('.') {
            Some((stem, ext)) => (stem, Some(ext)),
            None => (file_name, None),
        };
        for n in 1..=MAX_COLLISION_SUFFIX {
            let candidate = match ext {
                Some(ext) => format!("{stem}_{n}.{ext}"),
                None => format!("{stem}_{n}"),
            };
            let path = self.resolve_file_name(&candidate)?;
            if !path_exists(&path).await? {
                return Ok((candidate, path));
            }
        }
        Err(StorageError::Io(io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free name left for {file_name}"),
        )))
    }

    /// 列出上传目录中的文件，按文件名倒序。
    pub async fn list_artifacts(
        &self,
        filter: Option<ArtifactKind>,
    ) -> Result<Vec<ArtifactEntry>, StorageError> {
        let mut dir = fs::read_dir(&self.root).await?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let kind = ArtifactKind::from_file_name(&name);
            if filter.is_some_and(|wanted| wanted != kind) {
                continue;
            }
            entries.push(ArtifactEntry {
                device: device_from_file_name(&name).to_string(),
                kind,
                size: metadata.len(),
                date: metadata.modified().ok().map(format_timestamp),
                name,
            });
        }

        entries.sort_by(|a, b| b.name.cmp(&a.name));
        Ok(entries)
    }

    /// 递归统计上传目录占用的字节数。
    pub async fn folder_size(&self) -> Result<u64, StorageError> {
        let mut total = 0;
        let mut pending = vec![self.root.clone()];
        while let Some(dir_path) = pending.pop() {
            let mut dir = fs::read_dir(&dir_path).await?;
            while let Some(entry) = dir.next_entry().await? {
                let metadata = match entry.metadata().await {
                    Ok(metadata) => metadata,
                    Err(err) if err.kind() == ErrorKind::NotFound => continue,
                    Err(err) => return Err(err.into()),
                };
                if metadata.is_dir() {
                    pending.push(entry.path());
                } else {
                    total += metadata.len();
                }
            }
        }
        Ok(total)
    }

    /// 删除上传目录中的全部普通文件，返回删除数量。
    pub async fn clear_files(&self) -> Result<usize, StorageError> {
        let mut dir = fs::read_dir(&self.root).await?;
        let mut removed = 0;
        while let Some(entry) = dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(removed)
    }
}

async fn path_exists(path: &Path) -> io::Result<bool> {
    match fs::symlink_metadata(path).await {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// 文件名第二个 `_` 分段即设备标识（设备标识自身含 `_` 时会被截断）。
pub fn device_from_file_name(name: &str) -> &str {
    if name.contains('_') {
        name.split('_').nth(1).unwrap_or("unknown")
    } else {
        "unknown"
    }
}

fn format_timestamp(timestamp: SystemTime) -> String {
    let datetime: DateTime<Local> = timestamp.into();
    datetime.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Debug)]
pub enum StorageError {
    InvalidPath,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Photo,
    Audio,
    Data,
    Unknown,
}

impl ArtifactKind {
    pub fn from_file_name(name: &str) -> Self {
        if name.ends_with(".jpg") {
            ArtifactKind::Photo
        } else if name.ends_with(".m4a") {
            ArtifactKind::Audio
        } else if name.ends_with(".json") {
            ArtifactKind::Data
        } else {
            ArtifactKind::Unknown
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ArtifactEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    pub size: u64,
    pub date: Option<String>,
    pub device: String,
}
