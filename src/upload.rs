//! 上传接口：解析请求、解码类型、生成文件名、写入内容并更新统计。

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Json};
use axum::http::StatusCode;
use axum::response::Json as JsonResponse;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::CollisionPolicy;
use crate::decoder::Category;
use crate::error::ApiError;
use crate::locking::LockManager;
use crate::naming::{file_name, synthesize, validate_category, validate_device_id};
use crate::persist::{Payload, Persisted, persist};
use crate::stats::{StatsStore, local_timestamp};
use crate::storage::Storage;

#[derive(Debug)]
pub struct IngestConfig {
    pub on_collision: CollisionPolicy,
    pub lock_timeout: Duration,
}

/// A validated upload: every field needed to name and store the artifact.
#[derive(Debug, PartialEq)]
pub(crate) struct IngestRequest<'a> {
    category: Category,
    device_id: String,
    base: String,
    payload: Payload<'a>,
}

impl<'a> IngestRequest<'a> {
    /// 校验请求体并生成文件名；任何失败都发生在统计变更之前。
    fn from_body(body: &'a Value) -> Result<Self, ApiError> {
        let fields = match body {
            Value::Object(fields) if !fields.is_empty() => fields,
            _ => return Err(ApiError::BadRequest("No data received".into())),
        };

        let category = Category::decode(&text_field(fields.get("type")));
        validate_category(category.as_str())?;
        let device_id = text_field(fields.get("device_id"));
        validate_device_id(&device_id)?;

        let timestamp_ms = match fields.get("timestamp") {
            None | Some(Value::Null) => Utc::now().timestamp_millis(),
            Some(Value::Number(number)) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|value| value as i64))
                .ok_or_else(|| ApiError::BadRequest("invalid timestamp".into()))?,
            Some(_) => return Err(ApiError::BadRequest("invalid timestamp".into())),
        };
        let base = synthesize(category.as_str(), &device_id, timestamp_ms)?;

        Ok(Self {
            category,
            device_id,
            base,
            payload: Payload::from_body(body),
        })
    }
}

fn text_field(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "unknown".to_string(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    success: bool,
    message: &'static str,
    filename: String,
    received_at: String,
}

/// 接收客户端上传的数据。
pub async fn upload(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(stats): Extension<Arc<StatsStore>>,
    Extension(locks): Extension<Arc<LockManager>>,
    Extension(ingest): Extension<Arc<IngestConfig>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<JsonResponse<UploadResponse>, ApiError> {
    let Json(body) = payload.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "rejected upload body");
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge("Payload too large".into())
        } else {
            ApiError::BadRequest("No data received".into())
        }
    })?;
    let request = IngestRequest::from_body(&body)?;
    let category = &request.category;

    stats.begin_request(&request.device_id).await;

    let guard = locks
        .lock_name_with_timeout(&request.base, ingest.lock_timeout)
        .await
        .map_err(|_| ApiError::Conflict("file is busy, retry later".into()))?;
    let result = store_artifact(&storage, &ingest, &request, &body).await;
    drop(guard);
    let (filename, persisted) = result?;

    stats.record_artifact(category, persisted).await;
    match persisted {
        Persisted::Binary(bytes) | Persisted::Document(bytes) => {
            info!(filename, category = category.as_str(), bytes, "upload stored");
        }
        Persisted::Placeholder => {
            info!(filename, category = category.as_str(), "audio placeholder stored");
        }
        Persisted::Skipped => {
            warn!(
                filename,
                category = category.as_str(),
                "image upload without data, nothing stored"
            );
        }
    }

    if let Err(err) = stats.flush().await {
        warn!(path = ?stats.sidecar_path(), error = %err, "stats flush failed");
    }

    Ok(JsonResponse(UploadResponse {
        success: true,
        message: "File received successfully",
        filename,
        received_at: local_timestamp(),
    }))
}

async fn store_artifact(
    storage: &Storage,
    ingest: &IngestConfig,
    request: &IngestRequest<'_>,
    body: &Value,
) -> Result<(String, Persisted), ApiError> {
    let (filename, target) = storage
        .claim_target(
            &file_name(&request.category, &request.base),
            ingest.on_collision,
        )
        .await?;
    let persisted = persist(&request.category, &target, request.payload, body)
        .await
        .inspect_err(|err| warn!(filename, error = ?err, "failed to store upload"))?;
    Ok((filename, persisted))
}
