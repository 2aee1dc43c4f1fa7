//! 文件列表、下载与清空处理器。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Path, Query};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use httpdate::fmt_http_date;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::etag::{etag_from_metadata, is_not_modified};
use crate::stats::StatsStore;
use crate::storage::{ArtifactEntry, ArtifactKind, Storage, StorageError};

#[derive(Debug)]
pub struct ListingConfig {
    pub default_limit: usize,
}

#[derive(Deserialize)]
pub(crate) struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
pub struct FileListing {
    files: Vec<ArtifactEntry>,
}

#[derive(Serialize)]
pub struct ClearResponse {
    success: bool,
    message: &'static str,
    removed: usize,
}

/// 列出全部文件（默认最多返回配置的条数）。
pub async fn list_files(
    Query(query): Query<LimitQuery>,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(listing): Extension<Arc<ListingConfig>>,
) -> Result<JsonResponse<FileListing>, ApiError> {
    let limit = query.limit.unwrap_or(listing.default_limit);
    list_kind(&storage, None, Some(limit)).await
}

/// 仅列出图片。
pub async fn list_photos(
    Query(query): Query<LimitQuery>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<JsonResponse<FileListing>, ApiError> {
    list_kind(&storage, Some(ArtifactKind::Photo), query.limit).await
}

/// 仅列出音频。
pub async fn list_audios(
    Query(query): Query<LimitQuery>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<JsonResponse<FileListing>, ApiError> {
    list_kind(&storage, Some(ArtifactKind::Audio), query.limit).await
}

async fn list_kind(
    storage: &Storage,
    kind: Option<ArtifactKind>,
    limit: Option<usize>,
) -> Result<JsonResponse<FileListing>, ApiError> {
    let mut files = storage.list_artifacts(kind).await?;
    // 0 means no limit
    if let Some(limit) = limit.filter(|limit| *limit > 0) {
        files.truncate(limit);
    }
    info!(kind = ?kind, count = files.len(), "list files");
    Ok(JsonResponse(FileListing { files }))
}

/// 以附件形式下载单个文件。
pub async fn download_file(
    Path(filename): Path<String>,
    request_headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<Response, ApiError> {
    let target = storage
        .resolve_existing_file(&filename)
        .await
        .map_err(|err| match err {
            StorageError::InvalidPath => ApiError::BadRequest("invalid file name".into()),
            StorageError::Io(_) => ApiError::NotFound("File not found".into()),
        })?;
    let file = File::open(&target)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    let metadata = file
        .metadata()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    let etag = etag_from_metadata(&metadata);
    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::ETAG,
        HeaderValue::from_str(&etag).map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
    );
    if is_not_modified(&request_headers, &etag) {
        return Ok((StatusCode::NOT_MODIFIED, response_headers).into_response());
    }

    let mime = mime_guess::from_path(&target).first_or_octet_stream();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("无效的 MIME 类型".into()))?,
    );
    response_headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
            .map_err(|_| ApiError::BadRequest("invalid file name".into()))?,
    );
    response_headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&metadata.len().to_string())
            .map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
    );
    if let Ok(modified) = metadata.modified() {
        response_headers.insert(
            header::LAST_MODIFIED,
            HeaderValue::from_str(&fmt_http_date(modified))
                .map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
        );
    }

    info!(filename, size = metadata.len(), "download file");
    Ok((
        StatusCode::OK,
        response_headers,
        AxumBody::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

/// 删除全部上传文件并重置统计。
pub async fn clear_files(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(stats): Extension<Arc<StatsStore>>,
) -> Result<JsonResponse<ClearResponse>, ApiError> {
    let removed = storage.clear_files().await?;
    stats.reset().await;
    if let Err(err) = stats.flush().await {
        warn!(path = ?stats.sidecar_path(), error = %err, "stats flush failed");
    }
    info!(removed, "cleared upload directory");
    Ok(JsonResponse(ClearResponse {
        success: true,
        message: "All files cleared",
        removed,
    }))
}
