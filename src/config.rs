//! CLI arguments and server configuration defaults.

use clap::{Parser, ValueEnum};
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_HTTP_PORT: u16 = 10000;
pub const DEFAULT_MAX_BODY_BYTES: usize = 50 * 1024 * 1024;
pub const DEFAULT_LIST_LIMIT: usize = 100;
pub const DEFAULT_LOCK_WAIT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_STATS_FLUSH_INTERVAL_SECS: u64 = 30;
pub const MAX_DEVICE_ID_LEN: usize = 128;
pub const MAX_CATEGORY_LEN: usize = 64;
pub const MAX_FILE_NAME_LEN: usize = 255;
pub const MAX_COLLISION_SUFFIX: u32 = 999;

/// What to do when a synthesized filename already exists on disk.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CollisionPolicy {
    /// 覆盖同名文件（同一秒内的重复提交只保留最后一份）。
    #[default]
    Overwrite,
    /// 在扩展名前追加 `_1`、`_2` 等序号。
    Suffix,
}

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "backup-relay", version = VERSION_INFO, about = "Backup relay server")]
pub struct Args {
    #[arg(
        short = 's',
        long,
        env = "RELAY_UPLOAD_DIR",
        default_value = "uploads",
        help = "Directory received files are written to"
    )]
    pub upload_dir: String,
    #[arg(
        long,
        env = "RELAY_STATS_FILE",
        default_value = "stats.json",
        help = "Sidecar file mirroring the in-memory statistics"
    )]
    pub stats_file: String,
    #[arg(
        short = 'b',
        long = "bind",
        env = "RELAY_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP/HTTPS"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long = "port",
        env = "PORT",
        default_value_t = DEFAULT_HTTP_PORT,
        help = "HTTP port"
    )]
    pub http_port: u16,
    #[arg(
        short = 'P',
        long,
        env = "RELAY_HTTPS_PORT",
        help = "HTTPS port (HTTPS is disabled when unset)"
    )]
    pub https_port: Option<u16>,
    #[arg(short = 'c', long, env = "RELAY_TLS_CERT", help = "TLS cert path")]
    pub tls_cert: Option<String>,
    #[arg(short = 'k', long, env = "RELAY_TLS_KEY", help = "TLS key path")]
    pub tls_key: Option<String>,
    #[arg(
        long,
        env = "RELAY_CORS_ORIGINS",
        default_value = "*",
        help = "Comma separated CORS origins, `*` for any"
    )]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "RELAY_MAX_BODY_BYTES",
        default_value_t = DEFAULT_MAX_BODY_BYTES,
        help = "Max upload request body in bytes"
    )]
    pub max_body_bytes: usize,
    #[arg(
        long,
        env = "RELAY_LIST_LIMIT",
        default_value_t = DEFAULT_LIST_LIMIT,
        help = "Default number of entries returned by /files"
    )]
    pub list_limit: usize,
    #[arg(
        long,
        env = "RELAY_ON_COLLISION",
        value_enum,
        default_value_t = CollisionPolicy::Overwrite,
        help = "Behaviour when a synthesized filename already exists"
    )]
    pub on_collision: CollisionPolicy,
    #[arg(
        long,
        env = "RELAY_LOCK_TIMEOUT_SECS",
        default_value_t = DEFAULT_LOCK_WAIT_TIMEOUT_SECS,
        help = "Max seconds an upload waits for a busy filename"
    )]
    pub lock_timeout_secs: u64,
    #[arg(
        long,
        env = "RELAY_STATS_FLUSH_INTERVAL_SECS",
        default_value_t = DEFAULT_STATS_FLUSH_INTERVAL_SECS,
        help = "Background stats flush interval in seconds (0 to disable)"
    )]
    pub stats_flush_interval_secs: u64,
}
