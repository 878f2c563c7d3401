use crate::error::{AppError, Result};

pub const SCOREBOARD_API_URL: &str = "https://site.api.espn.com/apis/site/v2/sports";

/// KV key of the hot full-scan snapshot (expires after `full_cache_ttl_secs`).
pub const KEY_ALL_ODDS: &str = "all_odds";
/// KV key of the durable full-scan backup. Never expires.
pub const KEY_LAST_ODDS: &str = "last_odds";
/// KV key of the overlay snapshot (expires after `fast_cache_ttl_secs`).
pub const KEY_FAST_ODDS: &str = "fast_odds";

/// Largest `changed + removed` count still broadcast as an incremental update.
pub const MAX_DELTA_CHANGES: usize = 250;

/// Upper bound for the `limit` query parameter of the read API.
pub const MAX_PAGE_SIZE: usize = 500;

/// Upper bound for the `window_hours` query parameter.
pub const MAX_WINDOW_HOURS: i64 = 168;

/// Matches that kicked off this many seconds ago still fall inside a `window_hours` window.
pub const WINDOW_LOOKBACK_SECS: i64 = 2 * 3600;

/// `Cache-Control: max-age` never exceeds this, whatever the snapshot TTL says.
pub const MAX_HTTP_CACHE_SECS: u64 = 300;

pub const STALE_WHILE_REVALIDATE_SECS: u64 = 60;

/// Prefix of every ETag served by the read API. Bump when the response shape changes.
pub const ETAG_PREFIX: &str = "odds-v1";

/// Default request-body cap of the two ingest routes. A full scan of every
/// tracked league runs to several megabytes, far past axum's 2 MiB default.
pub const MAX_INGEST_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Channel capacity for internal message routing.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Per-socket outbound queue. A full queue means the client is too slow and gets dropped.
pub const CLIENT_OUTBOUND_CAPACITY: usize = 64;

/// Heartbeat ping interval for realtime sockets (seconds).
pub const WS_PING_INTERVAL_SECS: u64 = 30;

pub const SCOREBOARD_CACHE_TTL_SECS: u64 = 30;
pub const SCOREBOARD_TIMEOUT_SECS: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvBackendKind {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    pub kv_backend: KvBackendKind,
    /// Shared ingest secret (ODDS_API_KEY). `None` rejects every ingest call.
    pub api_key: Option<String>,
    /// TTL of the hot full snapshot (FULL_CACHE_TTL_SECS)
    pub full_cache_ttl_secs: u64,
    /// TTL of the overlay snapshot (FAST_CACHE_TTL_SECS)
    pub fast_cache_ttl_secs: u64,
    pub max_delta_changes: usize,
    /// Request-body cap of the ingest routes (MAX_INGEST_BODY_BYTES)
    pub max_ingest_body_bytes: usize,
    pub history_enabled: bool,
    pub scoreboard_api_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "odds.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            kv_backend: match std::env::var("KV_BACKEND").as_deref() {
                Ok("memory") => KvBackendKind::Memory,
                Ok("sqlite") | Err(_) => KvBackendKind::Sqlite,
                Ok(other) => {
                    return Err(AppError::Config(format!(
                        "KV_BACKEND must be 'sqlite' or 'memory', got '{other}'"
                    )))
                }
            },
            api_key: std::env::var("ODDS_API_KEY")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            full_cache_ttl_secs: std::env::var("FULL_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "900".to_string())
                .parse::<u64>()
                .unwrap_or(900),
            fast_cache_ttl_secs: std::env::var("FAST_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "180".to_string())
                .parse::<u64>()
                .unwrap_or(180),
            max_delta_changes: std::env::var("MAX_DELTA_CHANGES")
                .unwrap_or_else(|_| MAX_DELTA_CHANGES.to_string())
                .parse::<usize>()
                .unwrap_or(MAX_DELTA_CHANGES),
            max_ingest_body_bytes: std::env::var("MAX_INGEST_BODY_BYTES")
                .unwrap_or_else(|_| MAX_INGEST_BODY_BYTES.to_string())
                .parse::<usize>()
                .unwrap_or(MAX_INGEST_BODY_BYTES),
            history_enabled: std::env::var("HISTORY_ENABLED")
                .map(|v| !matches!(v.trim(), "0" | "false" | "no" | "off"))
                .unwrap_or(true),
            scoreboard_api_url: std::env::var("SCOREBOARD_API_URL")
                .unwrap_or_else(|_| SCOREBOARD_API_URL.to_string()),
        })
    }

    /// Defaults used by unit tests: in-memory KV, no history, fixed secret.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            log_level: "debug".to_string(),
            db_path: ":memory:".to_string(),
            api_port: 0,
            kv_backend: KvBackendKind::Memory,
            api_key: Some("test-secret".to_string()),
            full_cache_ttl_secs: 900,
            fast_cache_ttl_secs: 180,
            max_delta_changes: MAX_DELTA_CHANGES,
            max_ingest_body_bytes: MAX_INGEST_BODY_BYTES,
            history_enabled: false,
            scoreboard_api_url: "http://127.0.0.1:9".to_string(),
        }
    }
}
