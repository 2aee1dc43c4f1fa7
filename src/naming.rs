//! 存储文件名生成与设备标识校验。

use chrono::{Local, TimeZone};

use crate::config::{MAX_CATEGORY_LEN, MAX_DEVICE_ID_LEN, MAX_FILE_NAME_LEN};
use crate::decoder::Category;

/// Room kept after the base name for a `_999` collision suffix and `.json`.
const RESERVED_TAIL_LEN: usize = "_999".len() + ".json".len();

#[derive(Debug, PartialEq, Eq)]
pub enum NamingError {
    TimestampOutOfRange(i64),
    UnsafeDeviceId,
    UnsafeCategory,
    NameTooLong(usize),
}

/// 生成不含扩展名的文件名：`{category}_{device_id}_{YYYYMMDD_HHMMSS}`。
///
/// 时间按本地时区格式化，精度为秒。
pub fn synthesize(category: &str, device_id: &str, timestamp_ms: i64) -> Result<String, NamingError> {
    let date = Local
        .timestamp_millis_opt(timestamp_ms)
        .single()
        .ok_or(NamingError::TimestampOutOfRange(timestamp_ms))?;
    let base = format!(
        "{category}_{device_id}_{}",
        date.format("%Y%m%d_%H%M%S")
    );
    if base.len() + RESERVED_TAIL_LEN > MAX_FILE_NAME_LEN {
        return Err(NamingError::NameTooLong(base.len()));
    }
    Ok(base)
}

/// 拼接类别对应的扩展名。
pub fn file_name(category: &Category, base: &str) -> String {
    format!("{base}.{}", category.extension())
}

/// 拒绝无法作为单个路径片段的设备标识。
pub fn validate_device_id(device_id: &str) -> Result<(), NamingError> {
    let dot_segment = device_id == "." || device_id == "..";
    if dot_segment || !is_plain_segment(device_id, MAX_DEVICE_ID_LEN) {
        return Err(NamingError::UnsafeDeviceId);
    }
    Ok(())
}

/// 类别名位于文件名开头，额外禁止以 `.` 开头生成隐藏文件。
pub fn validate_category(category: &str) -> Result<(), NamingError> {
    if category.starts_with('.') || !is_plain_segment(category, MAX_CATEGORY_LEN) {
        return Err(NamingError::UnsafeCategory);
    }
    Ok(())
}

fn is_plain_segment(value: &str, max_len: usize) -> bool {
    value.len() <= max_len
        && !value
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control())
}
