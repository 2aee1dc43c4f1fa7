//! 统一的 API 错误类型与转换。

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::io::ErrorKind;

use crate::naming::NamingError;
use crate::persist::PersistError;
use crate::storage::StorageError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    PayloadTooLarge(String),
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::PayloadTooLarge(msg)
            | ApiError::Internal(msg) => msg,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.message() }))).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidPath => ApiError::BadRequest("invalid file name".into()),
            StorageError::Io(err) => match err.kind() {
                ErrorKind::NotFound => ApiError::NotFound("File not found".into()),
                _ => ApiError::Internal(err.to_string()),
            },
        }
    }
}

impl From<PersistError> for ApiError {
    fn from(error: PersistError) -> Self {
        match error {
            PersistError::InvalidImage(_) => ApiError::BadRequest("Invalid image data".into()),
            PersistError::Encode(err) => ApiError::Internal(err.to_string()),
            PersistError::Io(err) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<NamingError> for ApiError {
    fn from(error: NamingError) -> Self {
        match error {
            NamingError::TimestampOutOfRange(ts) => {
                ApiError::BadRequest(format!("timestamp out of range: {ts}"))
            }
            NamingError::UnsafeDeviceId => {
                ApiError::BadRequest("device_id is not a valid file name segment".into())
            }
            NamingError::UnsafeCategory => {
                ApiError::BadRequest("type is not a valid file name segment".into())
            }
            NamingError::NameTooLong(len) => {
                ApiError::BadRequest(format!("file name too long: {len} bytes"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::io;

    #[tokio::test]
    async fn errors_render_as_json_body() {
        let response = ApiError::BadRequest("No data received".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(value, json!({ "error": "No data received" }));
    }

    #[test]
    fn storage_not_found_maps_to_404() {
        let error: ApiError = StorageError::Io(io::Error::from(ErrorKind::NotFound)).into();
        assert!(matches!(error, ApiError::NotFound(_)));
        let error: ApiError = StorageError::InvalidPath.into();
        assert!(matches!(error, ApiError::BadRequest(_)));
    }

    #[test]
    fn naming_errors_map_to_bad_request() {
        for error in [
            NamingError::TimestampOutOfRange(i64::MAX),
            NamingError::UnsafeDeviceId,
            NamingError::UnsafeCategory,
            NamingError::NameTooLong(400),
        ] {
            let error: ApiError = error.into();
            assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn invalid_image_maps_to_bad_request() {
        let error: ApiError = PersistError::InvalidImage("bad".into()).into();
        assert_eq!(error.message(), "Invalid image data");
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }
}
