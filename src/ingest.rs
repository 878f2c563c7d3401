use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::health::HealthState;
use crate::db::HistoryJob;
use crate::error::{AppError, Result};
use crate::snapshot::{build_snapshot, compute_delta, Delta};
use crate::store::SnapshotStore;
use crate::stream::{BroadcasterHandle, ServerMessage};
use crate::types::{LeagueGroup, OddsResponse, SnapshotKind};

/// Optional tags supplied by the scraper (`X-Run-Id`, `X-Run-Updated`).
#[derive(Debug, Clone, Default)]
pub struct RunMeta {
    pub run_id: Option<String>,
    pub run_updated: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestAck {
    pub success: bool,
    pub message: String,
    pub kind: SnapshotKind,
    pub leagues: usize,
    pub matches: usize,
    /// `partial`, `full_refresh` or `none`.
    pub broadcast: &'static str,
    pub last_updated: String,
}

/// Write path for both snapshot kinds.
///
/// The canonical store write is the durability boundary: errors before and
/// during it are returned to the caller, everything after it (delta,
/// broadcast, history) is best-effort and only logged.
#[derive(Clone)]
pub struct IngestService {
    snapshots: SnapshotStore,
    broadcaster: BroadcasterHandle,
    history_tx: Option<mpsc::Sender<HistoryJob>>,
    api_key: Option<Arc<str>>,
    max_delta_changes: usize,
    health: Arc<HealthState>,
}

impl IngestService {
    pub fn new(
        snapshots: SnapshotStore,
        broadcaster: BroadcasterHandle,
        history_tx: Option<mpsc::Sender<HistoryJob>>,
        api_key: Option<String>,
        max_delta_changes: usize,
        health: Arc<HealthState>,
    ) -> Self {
        Self {
            snapshots,
            broadcaster,
            history_tx,
            api_key: api_key.map(Arc::from),
            max_delta_changes,
            health,
        }
    }

    /// Checks the shared secret. With no secret configured nothing is accepted.
    pub fn authorize(&self, provided: Option<&str>) -> Result<()> {
        match (self.api_key.as_deref(), provided) {
            (Some(expected), Some(given)) if constant_time_eq(expected.as_bytes(), given.as_bytes()) => Ok(()),
            _ => Err(AppError::Unauthorized),
        }
    }

    pub async fn ingest(
        &self,
        kind: SnapshotKind,
        provided_key: Option<&str>,
        body: &[u8],
        run: RunMeta,
    ) -> Result<IngestAck> {
        self.authorize(provided_key)?;
        let groups = parse_body(body)?;

        let now = Utc::now();
        let last_updated = now.to_rfc3339_opts(SecondsFormat::Millis, true);
        let snapshot = build_snapshot(groups, last_updated, self.snapshots.ttl_secs(kind));

        let previous = match self.snapshots.read_previous(kind).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!(%kind, "previous snapshot unreadable, diffing against nothing: {e}");
                None
            }
        };

        self.snapshots.write(kind, &snapshot).await?;
        self.health.record_ingest(kind, now.timestamp_millis().max(0) as u64);
        info!(
            %kind,
            leagues = snapshot.leagues.len(),
            matches = snapshot.total_matches,
            bookmakers = snapshot.bookmakers_count,
            "snapshot stored"
        );

        let delta = compute_delta(previous.as_ref(), &snapshot, self.max_delta_changes, kind.into());
        let broadcast = self.broadcast(kind, delta, &snapshot).await;

        if kind == SnapshotKind::Full {
            self.archive(&snapshot, run);
        }

        Ok(IngestAck {
            success: true,
            message: format!(
                "{kind} odds updated: {} matches in {} leagues",
                snapshot.total_matches,
                snapshot.leagues.len()
            ),
            kind,
            leagues: snapshot.leagues.len(),
            matches: snapshot.total_matches,
            broadcast,
            last_updated: snapshot.last_updated,
        })
    }

    async fn broadcast(&self, kind: SnapshotKind, delta: Option<Delta>, snapshot: &OddsResponse) -> &'static str {
        let Some(delta) = delta else {
            debug!(%kind, "no changes since previous snapshot");
            return "none";
        };
        let label = match &delta {
            Delta::Partial { changed, removed_ids, league_keys } => {
                info!(
                    %kind,
                    changed = changed.len(),
                    removed = removed_ids.len(),
                    league_keys = ?league_keys,
                    "delta computed"
                );
                "partial"
            }
            Delta::FullRefresh { reason, count } => {
                info!(%kind, %reason, count, "full refresh required");
                "full_refresh"
            }
        };
        let msg = ServerMessage::from_delta(delta, snapshot.last_updated.clone());
        if let Err(e) = self.broadcaster.publish(msg).await {
            self.health.inc_broadcast_failures();
            warn!(%kind, "broadcast failed: {e}");
        }
        label
    }

    fn archive(&self, snapshot: &OddsResponse, run: RunMeta) {
        let Some(tx) = &self.history_tx else {
            return;
        };
        let run_id = run
            .run_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("run-{}", Utc::now().timestamp_millis()));
        let job = HistoryJob {
            run_id,
            run_updated: run.run_updated,
            snapshot: Arc::new(snapshot.clone()),
        };
        if let Err(e) = tx.try_send(job) {
            self.health.inc_history_dropped();
            warn!("history writer unavailable, run not archived: {e}");
        }
    }
}

/// Decodes an ingest body. It must be a JSON array of league groups; missing
/// fields inside a group default to empty.
pub fn parse_body(body: &[u8]) -> Result<Vec<LeagueGroup>> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("body is not valid JSON: {e}")))?;
    if !value.is_array() {
        return Err(AppError::Validation(
            "body must be an array of league groups".to_string(),
        ));
    }
    serde_json::from_value(value)
        .map_err(|e| AppError::Validation(format!("malformed league group: {e}")))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
