use clap::Parser;
use std::time::Duration;

/// Server configuration. Every field can be set via the environment variable
/// named below, or overridden on the command line; falls back to the
/// documented default when neither is present.
#[derive(Parser, Debug, Clone)]
#[command(name = "rdm-server", about = "Watch Together room-and-sync server")]
pub struct Config {
    /// Bind address.
    #[arg(long, env = "RDM_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Bind port.
    #[arg(long, env = "RDM_PORT", default_value_t = 8765)]
    pub port: u16,

    /// Root directory under which per-room upload directories are created.
    #[arg(long, env = "RDM_UPLOAD_DIR", default_value = "./uploads")]
    pub upload_dir: String,

    /// Per-file upload cap, in megabytes.
    #[arg(long, env = "RDM_MAX_FILE_SIZE_MB", default_value_t = 500)]
    pub max_file_size_mb: u64,

    /// Seconds of inactivity after which an empty or idle room is reaped.
    #[arg(long, env = "RDM_ROOM_EXPIRY_SECONDS", default_value_t = 14400)]
    pub room_expiry_seconds: u64,
}

impl Config {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }

    pub fn room_expiry(&self) -> Duration {
        Duration::from_secs(self.room_expiry_seconds)
    }
}

/// Deadline for the signaling channel's `auth` handshake (§5).
pub const AUTH_HANDSHAKE_DEADLINE: Duration = Duration::from_secs(10);

/// Ready-sync barrier timeout (§4.F).
pub const READY_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the registry sweeps for expired rooms.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Rate limiter: window and attempt ceiling for `/rooms/{code}/join`.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
pub const RATE_LIMIT_MAX_ATTEMPTS: usize = 10;

/// Chunk size used when streaming range reads from the blob store (§5).
pub const RANGE_READ_CHUNK_SIZE: usize = 64 * 1024;

/// Chunk size used when writing an incoming upload to disk.
pub const UPLOAD_WRITE_CHUNK_SIZE: usize = 64 * 1024;

/// Client-side ping interval (§4.G).
pub const PING_INTERVAL: Duration = Duration::from_secs(5);

/// Client-side reconnect backoff schedule, capped at 30s, five attempts (§5).
pub const RECONNECT_BACKOFF_SECONDS: [u64; 5] = [2, 4, 8, 16, 30];

/// Client-side progress notification throttle: at most 20/s (§4.G).
pub const PROGRESS_NOTIFICATION_INTERVAL: Duration = Duration::from_millis(50);

/// Username bounds (§6/§8).
pub const USERNAME_MIN_LEN: usize = 1;
pub const USERNAME_MAX_LEN: usize = 32;

/// Password minimum length (§6).
pub const PASSWORD_MIN_LEN: usize = 4;
