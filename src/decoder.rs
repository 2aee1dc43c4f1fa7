//! 客户端类型标签解码为规范文件类别。

/// Maps a client label to its canonical category name.
///
/// Unknown labels are returned unchanged.
pub fn decode_label(label: &str) -> &str {
    match label {
        "backup_image" => "photo",
        "backup_audio" => "audio",
        "device_info" => "data",
        "app_snapshot" => "screenshot",
        other => other,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Category {
    Photo,
    Screenshot,
    Audio,
    Data,
    /// 未识别的标签，原样保留并按通用数据存储。
    Other(String),
}

impl Category {
    /// 解码标签并映射到存储分支。
    pub fn decode(label: &str) -> Self {
        match decode_label(label) {
            "photo" => Category::Photo,
            "screenshot" => Category::Screenshot,
            "audio" => Category::Audio,
            "data" => Category::Data,
            other => Category::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Category::Photo => "photo",
            Category::Screenshot => "screenshot",
            Category::Audio => "audio",
            Category::Data => "data",
            Category::Other(name) => name,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Category::Photo | Category::Screenshot => "jpg",
            Category::Audio => "m4a",
            Category::Data | Category::Other(_) => "json",
        }
    }
}
