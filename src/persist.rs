//! 按类别将上传内容解码并写入磁盘。

use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::Value;
use std::io;
use std::path::Path;
use tracing::warn;

use crate::atomic::write_atomic;
use crate::decoder::Category;

/// Marker written in place of audio content that is missing or undecodable.
pub const AUDIO_PLACEHOLDER: &str = "audio_placeholder";

/// The `data` field of an upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Payload<'a> {
    /// 字段缺失或为假值：null、false、0、空串、空数组、空对象。
    Absent,
    Text(&'a str),
    /// 存在但不是字符串，无法作为 base64 解码。
    Malformed,
}

impl<'a> Payload<'a> {
    pub fn from_body(body: &'a Value) -> Self {
        match body.get("data") {
            None | Some(Value::Null) | Some(Value::Bool(false)) => Payload::Absent,
            Some(Value::Number(number)) if number.as_f64() == Some(0.0) => Payload::Absent,
            Some(Value::String(text)) if text.is_empty() => Payload::Absent,
            Some(Value::Array(items)) if items.is_empty() => Payload::Absent,
            Some(Value::Object(fields)) if fields.is_empty() => Payload::Absent,
            Some(Value::String(text)) => Payload::Text(text),
            Some(_) => Payload::Malformed,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Persisted {
    Binary(u64),
    Placeholder,
    Document(u64),
    /// 图片类别但没有携带数据，未写入任何文件。
    Skipped,
}

#[derive(Debug)]
pub enum PersistError {
    InvalidImage(String),
    Encode(serde_json::Error),
    Io(io::Error),
}

impl From<io::Error> for PersistError {
    fn from(err: io::Error) -> Self {
        PersistError::Io(err)
    }
}

/// 解码 base64 负载；换行等空白字符会被忽略。
pub fn decode_payload(raw: &str) -> Result<Vec<u8>, base64::DecodeError> {
    if raw.bytes().any(|b| b.is_ascii_whitespace()) {
        let compact: String = raw.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        STANDARD.decode(compact)
    } else {
        STANDARD.decode(raw)
    }
}

/// Writes exactly one file at `target` for the given category, or none when
/// an image upload carries no data.
pub async fn persist(
    category: &Category,
    target: &Path,
    payload: Payload<'_>,
    body: &Value,
) -> Result<Persisted, PersistError> {
    match category {
        Category::Photo | Category::Screenshot => {
            let raw = match payload {
                Payload::Absent => return Ok(Persisted::Skipped),
                Payload::Malformed => {
                    return Err(PersistError::InvalidImage("data is not a string".into()));
                }
                Payload::Text(raw) => raw,
            };
            let bytes =
                decode_payload(raw).map_err(|err| PersistError::InvalidImage(err.to_string()))?;
            let written = write_atomic(target, &bytes).await?;
            Ok(Persisted::Binary(written))
        }
        Category::Audio => match payload {
            Payload::Text(raw) if raw != AUDIO_PLACEHOLDER => match decode_payload(raw) {
                Ok(bytes) => {
                    let written = write_atomic(target, &bytes).await?;
                    Ok(Persisted::Binary(written))
                }
                Err(err) => {
                    warn!(
                        path = ?target,
                        error = %err,
                        "audio payload undecodable, storing placeholder"
                    );
                    write_placeholder(target).await
                }
            },
            Payload::Malformed => {
                warn!(path = ?target, "audio payload is not a string, storing placeholder");
                write_placeholder(target).await
            }
            _ => write_placeholder(target).await,
        },
        Category::Data | Category::Other(_) => {
            let document = serde_json::to_vec_pretty(body).map_err(PersistError::Encode)?;
            let written = write_atomic(target, &document).await?;
            Ok(Persisted::Document(written))
        }
    }
}

async fn write_placeholder(target: &Path) -> Result<Persisted, PersistError> {
    write_atomic(target, AUDIO_PLACEHOLDER.as_bytes()).await?;
    Ok(Persisted::Placeholder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn photo_payload_is_decoded_to_exact_bytes() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("photo.jpg");
        let raw = STANDARD.encode([0xffu8, 0xd8, 0xff, 0xe0, 0x00]);
        let body = json!({ "data": raw });

        let result = persist(&Category::Photo, &target, Payload::from_body(&body), &body)
            .await
            .expect("persist");
        assert_eq!(result, Persisted::Binary(5));
        assert_eq!(std::fs::read(&target).expect("read"), vec![0xff, 0xd8, 0xff, 0xe0, 0x00]);
    }

    #[tokio::test]
    async fn invalid_image_writes_nothing() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("shot.jpg");
        let body = json!({ "data": "***not base64***" });

        let result = persist(&Category::Screenshot, &target, Payload::from_body(&body), &body).await;
        assert!(matches!(result, Err(PersistError::InvalidImage(_))));
        assert!(!target.exists());
        assert_eq!(std::fs::read_dir(temp.path()).expect("dir").count(), 0);
    }

    #[tokio::test]
    async fn non_string_image_payload_is_rejected() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("photo.jpg");
        let body = json!({ "data": 42 });

        let result = persist(&Category::Photo, &target, Payload::from_body(&body), &body).await;
        assert!(matches!(result, Err(PersistError::InvalidImage(_))));
    }

    #[tokio::test]
    async fn photo_without_data_is_skipped() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("photo.jpg");
        for data in [json!(""), json!(0), json!(0.0), json!([]), json!({}), json!(false)] {
            let body = json!({ "data": data });
            let result = persist(&Category::Photo, &target, Payload::from_body(&body), &body)
                .await
                .expect("persist");
            assert_eq!(result, Persisted::Skipped, "{body}");
        }
        assert!(!target.exists());
    }

    #[test]
    fn truthy_non_string_payload_is_malformed() {
        for data in [json!(1), json!([0]), json!({ "a": 1 }), json!(true)] {
            let body = json!({ "data": data });
            assert_eq!(Payload::from_body(&body), Payload::Malformed, "{body}");
        }
    }

    #[tokio::test]
    async fn audio_sentinel_and_bad_data_fall_back_to_placeholder() {
        let temp = tempdir().expect("tempdir");
        for (index, body) in [
            json!({ "data": AUDIO_PLACEHOLDER }),
            json!({ "data": "%%%" }),
            json!({}),
        ]
        .iter()
        .enumerate()
        {
            let target = temp.path().join(format!("audio_{index}.m4a"));
            let result = persist(&Category::Audio, &target, Payload::from_body(body), body)
                .await
                .expect("persist");
            assert_eq!(result, Persisted::Placeholder);
            assert_eq!(
                std::fs::read_to_string(&target).expect("read"),
                AUDIO_PLACEHOLDER
            );
        }
    }

    #[tokio::test]
    async fn audio_payload_is_decoded() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("audio.m4a");
        let body = json!({ "data": STANDARD.encode(b"m4a-bytes") });

        let result = persist(&Category::Audio, &target, Payload::from_body(&body), &body)
            .await
            .expect("persist");
        assert_eq!(result, Persisted::Binary(9));
        assert_eq!(std::fs::read(&target).expect("read"), b"m4a-bytes");
    }

    #[tokio::test]
    async fn generic_category_round_trips_full_body() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("data.json");
        let body = json!({
            "type": "device_info",
            "device_id": "tablet",
            "timestamp": 1_700_000_000_000i64,
            "data": { "battery": 81, "model": "Ação" }
        });

        let result = persist(&Category::Data, &target, Payload::from_body(&body), &body)
            .await
            .expect("persist");
        assert!(matches!(result, Persisted::Document(_)));

        let text = std::fs::read_to_string(&target).expect("read");
        assert!(text.contains("Ação"));
        assert!(text.contains("\n  \"type\""));
        let stored: Value = serde_json::from_str(&text).expect("json");
        assert_eq!(stored, body);
    }

    #[test]
    fn decode_payload_ignores_line_breaks() {
        let wrapped = "aGVsbG8g\nd29ybGQ=\n";
        assert_eq!(decode_payload(wrapped).expect("decode"), b"hello world");
    }
}
