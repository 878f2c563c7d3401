use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{ws::WebSocketUpgrade, DefaultBodyLimit, Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::api::health::HealthState;
use crate::api::live_scores::{LiveScore, ScoreboardClient, StateFilter};
use crate::api::odds_view::{cached_response, OddsQuery};
use crate::config::Config;
use crate::db::models::{self, HistoryRunRow, OddsHistoryRow};
use crate::db::HistoryJob;
use crate::error::{AppError, Result};
use crate::ingest::{IngestAck, IngestService, RunMeta};
use crate::league::slug;
use crate::store::{KvStore, SnapshotStore};
use crate::stream::messages::parse_league_keys_csv;
use crate::stream::socket::serve_socket;
use crate::stream::BroadcasterHandle;
use crate::types::{LeagueGroup, Match, OddsResponse, SnapshotKind};

const DEFAULT_HISTORY_LIMIT: i64 = 100;
const MAX_HISTORY_LIMIT: i64 = 1000;

#[derive(Clone)]
pub struct ApiState {
    pub snapshots: SnapshotStore,
    pub ingest: IngestService,
    pub broadcaster: BroadcasterHandle,
    pub health: Arc<HealthState>,
    pub scores: Arc<ScoreboardClient>,
    pub pool: sqlx::SqlitePool,
    pub ingest_body_limit: usize,
}

impl ApiState {
    pub fn new(
        cfg: &Config,
        kv: KvStore,
        pool: sqlx::SqlitePool,
        broadcaster: BroadcasterHandle,
        history_tx: Option<tokio::sync::mpsc::Sender<HistoryJob>>,
    ) -> Result<Self> {
        let snapshots = SnapshotStore::new(Arc::new(kv), cfg.full_cache_ttl_secs, cfg.fast_cache_ttl_secs);
        let health = Arc::new(HealthState::new(history_tx.is_some()));
        let ingest = IngestService::new(
            snapshots.clone(),
            broadcaster.clone(),
            history_tx,
            cfg.api_key.clone(),
            cfg.max_delta_changes,
            Arc::clone(&health),
        );
        Ok(Self {
            snapshots,
            ingest,
            broadcaster,
            health,
            scores: Arc::new(ScoreboardClient::new(&cfg.scoreboard_api_url)?),
            pool,
            ingest_body_limit: cfg.max_ingest_body_bytes,
        })
    }
}

pub fn router(state: ApiState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.ingest_body_limit);
    Router::new()
        .route("/health", get(get_health))
        .route("/api/odds", get(get_odds))
        .route("/api/odds/stream", get(get_stream))
        .route("/api/odds/update", post(post_full_update).layer(body_limit.clone()))
        .route("/api/odds/fast", post(post_fast_update).layer(body_limit))
        .route("/api/odds/match/:id", get(get_match))
        .route("/api/odds/:league", get(get_league_odds))
        .route("/api/live-scores", get(get_live_scores))
        .route("/api/history/:match_id", get(get_match_history))
        .fallback(not_found)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct LiveScoresQuery {
    pub league_keys: Option<String>,
    pub state: Option<String>,
}

#[derive(Deserialize)]
pub struct StreamQuery {
    pub league_keys: Option<String>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct MatchResponse {
    pub success: bool,
    pub league: String,
    pub league_key: Option<String>,
    #[serde(rename = "match")]
    pub fixture: Match,
    pub last_updated: String,
}

#[derive(Serialize)]
pub struct LiveScoresResponse {
    pub success: bool,
    pub leagues: BTreeMap<String, Vec<LiveScore>>,
    pub fetched_at: String,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub success: bool,
    pub match_id: String,
    pub rows: Vec<OddsHistoryRow>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connections: Option<usize>,
    pub delivered_total: Option<u64>,
    pub dropped_total: Option<u64>,
    pub full_ingests: u64,
    pub fast_ingests: u64,
    pub last_full_ingest: Option<String>,
    pub last_fast_ingest: Option<String>,
    pub broadcast_failures: u64,
    pub history_enabled: bool,
    pub history_dropped: u64,
    pub latest_history_run: Option<HistoryRunRow>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_odds(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response> {
    let query = OddsQuery::from_params(&params)?;
    let mut snapshot = state.snapshots.read_merged().await?.ok_or(AppError::NoData)?;
    let now = Utc::now().timestamp();
    query.apply(&mut snapshot, now);
    Ok(cached_response(snapshot, &query.cache_key("all", now), &headers))
}

async fn get_league_odds(
    State(state): State<ApiState>,
    Path(league): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response> {
    let query = OddsQuery::from_params(&params)?;
    let mut snapshot = state.snapshots.read_merged().await?.ok_or(AppError::NoData)?;
    if !retain_league(&mut snapshot, &league) {
        return Err(AppError::NotFound(format!("league '{league}'")));
    }
    let now = Utc::now().timestamp();
    query.apply(&mut snapshot, now);
    let scope = format!("league-{}", slug(&league));
    Ok(cached_response(snapshot, &query.cache_key(&scope, now), &headers))
}

/// Keeps only the groups (or matches) labelled `label`, case-insensitively
/// (Unicode lowercase). Returns false when nothing matched.
fn retain_league(snapshot: &mut OddsResponse, label: &str) -> bool {
    let wanted = label.trim().to_lowercase();
    let same = |other: &str| other.trim().to_lowercase() == wanted;
    let groups: Vec<LeagueGroup> = std::mem::take(&mut snapshot.leagues)
        .into_iter()
        .filter_map(|mut group| {
            if !same(&group.league) {
                group.matches.retain(|m| same(&m.league));
            }
            (!group.matches.is_empty()).then_some(group)
        })
        .collect();
    snapshot.leagues = groups;
    snapshot.recount();
    !snapshot.leagues.is_empty()
}

async fn get_match(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<MatchResponse>> {
    let snapshot = state.snapshots.read_merged().await?.ok_or(AppError::NoData)?;
    let found = snapshot.leagues.iter().find_map(|group| {
        group
            .matches
            .iter()
            .find(|m| m.identity() == id)
            .map(|m| (group, m))
    });
    let Some((group, fixture)) = found else {
        return Err(AppError::NotFound(format!("match '{id}'")));
    };
    Ok(Json(MatchResponse {
        success: true,
        league: group.league.clone(),
        league_key: fixture.league_key.clone().or_else(|| group.league_key.clone()),
        fixture: fixture.clone(),
        last_updated: snapshot.last_updated.clone(),
    }))
}

async fn get_stream(
    State(state): State<ApiState>,
    Query(params): Query<StreamQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let league_keys = parse_league_keys_csv(params.league_keys.as_deref());
    let broadcaster = state.broadcaster.clone();
    ws.on_upgrade(move |socket| serve_socket(socket, broadcaster, league_keys))
}

async fn post_full_update(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestAck>> {
    ingest(&state, SnapshotKind::Full, &headers, &body).await
}

async fn post_fast_update(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestAck>> {
    ingest(&state, SnapshotKind::Fast, &headers, &body).await
}

async fn ingest(state: &ApiState, kind: SnapshotKind, headers: &HeaderMap, body: &[u8]) -> Result<Json<IngestAck>> {
    let run = RunMeta {
        run_id: header_str(headers, "x-run-id").map(str::to_string),
        run_updated: header_str(headers, "x-run-updated").map(str::to_string),
    };
    let ack = state
        .ingest
        .ingest(kind, header_str(headers, "x-api-key"), body, run)
        .await?;
    Ok(Json(ack))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

async fn get_live_scores(
    State(state): State<ApiState>,
    Query(params): Query<LiveScoresQuery>,
) -> Result<Json<LiveScoresResponse>> {
    let league_keys = parse_league_keys_csv(params.league_keys.as_deref());
    if league_keys.is_empty() {
        return Err(AppError::Validation("league_keys is required".to_string()));
    }
    let filter = StateFilter::parse(params.state.as_deref());
    let leagues = state.scores.live_scores(&league_keys, filter).await;
    Ok(Json(LiveScoresResponse {
        success: true,
        leagues,
        fetched_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }))
}

async fn get_match_history(
    State(state): State<ApiState>,
    Path(match_id): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
    let rows = models::match_history(&state.pool, &match_id, limit).await?;
    Ok(Json(HistoryResponse {
        success: true,
        match_id,
        rows,
    }))
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let stats = state.broadcaster.stats().await.ok();
    let history_enabled = state.health.history_enabled();
    let latest_history_run = if history_enabled {
        models::latest_run(&state.pool).await.ok().flatten()
    } else {
        None
    };
    let stamp = |kind: SnapshotKind| {
        state
            .health
            .last_ingest_ms(kind)
            .and_then(|ms| DateTime::<Utc>::from_timestamp_millis(ms as i64))
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
    };

    Json(HealthResponse {
        status: "ok",
        connections: stats.as_ref().map(|s| s.connections),
        delivered_total: stats.as_ref().map(|s| s.delivered_total),
        dropped_total: stats.as_ref().map(|s| s.dropped_total),
        full_ingests: state.health.ingests(SnapshotKind::Full),
        fast_ingests: state.health.ingests(SnapshotKind::Fast),
        last_full_ingest: stamp(SnapshotKind::Full),
        last_fast_ingest: stamp(SnapshotKind::Fast),
        broadcast_failures: state.health.broadcast_failures(),
        history_enabled,
        history_dropped: state.health.history_dropped(),
        latest_history_run,
    })
}

async fn not_found() -> Response {
    AppError::NotFound("route".to_string()).into_response()
}
