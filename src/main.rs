mod api;
mod config;
mod db;
mod error;
mod ingest;
mod league;
mod snapshot;
mod store;
mod stream;
mod types;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::routes::{router, ApiState};
use crate::config::{Config, KvBackendKind, CHANNEL_CAPACITY};
use crate::db::{HistoryJob, HistoryWriter};
use crate::error::Result;
use crate::store::KvStore;
use crate::stream::Broadcaster;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", cfg.db_path)).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    let kv = match cfg.kv_backend {
        KvBackendKind::Sqlite => KvStore::sqlite(pool.clone()),
        KvBackendKind::Memory => {
            warn!("KV_BACKEND=memory: snapshots will not survive a restart");
            KvStore::memory()
        }
    };

    if cfg.api_key.is_none() {
        warn!("ODDS_API_KEY not set; every ingest request will be rejected");
    }

    // --- Spawn tasks ---

    // Realtime broadcaster (single owner of all live sockets)
    let (broadcaster, broadcaster_handle) = Broadcaster::new();
    tokio::spawn(async move { broadcaster.run().await });

    // History archive writer (full snapshots only)
    let history_tx = if cfg.history_enabled {
        let (tx, rx) = mpsc::channel::<HistoryJob>(CHANNEL_CAPACITY);
        let writer = HistoryWriter::new(pool.clone(), rx);
        tokio::spawn(async move { writer.run().await });
        Some(tx)
    } else {
        info!("HISTORY_ENABLED=false: full snapshots will not be archived");
        None
    };

    // HTTP API server
    let api_state = ApiState::new(&cfg, kv, pool, broadcaster_handle, history_tx)?;
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(
        "HTTP API listening on {bind_addr} (kv={:?}, full_ttl={}s, fast_ttl={}s, max_delta={})",
        cfg.kv_backend, cfg.full_cache_ttl_secs, cfg.fast_cache_ttl_secs, cfg.max_delta_changes,
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}
