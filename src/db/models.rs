//! Row types for the history tables in `migrations/0001_init.sql`.
use serde::Serialize;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct HistoryRunRow {
    pub run_id: String,
    pub run_updated: Option<String>,
    pub created_at: i64,
    pub league_count: i64,
    pub match_count: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OddsHistoryRow {
    pub run_id: String,
    pub match_id: String,
    pub league: String,
    pub league_key: Option<String>,
    pub home_team: String,
    pub away_team: String,
    pub start_time: i64,
    pub bookmaker: String,
    pub home_odds: Option<f64>,
    pub draw_odds: Option<f64>,
    pub away_odds: Option<f64>,
    pub url: Option<String>,
    pub recorded_at: i64,
}

pub async fn latest_run(pool: &sqlx::SqlitePool) -> sqlx::Result<Option<HistoryRunRow>> {
    sqlx::query_as::<_, HistoryRunRow>(
        r#"
        SELECT run_id, run_updated, created_at, league_count, match_count
        FROM history_runs
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await
}

pub async fn match_history(
    pool: &sqlx::SqlitePool,
    match_id: &str,
    limit: i64,
) -> sqlx::Result<Vec<OddsHistoryRow>> {
    sqlx::query_as::<_, OddsHistoryRow>(
        r#"
        SELECT run_id, match_id, league, league_key, home_team, away_team, start_time,
               bookmaker, home_odds, draw_odds, away_odds, url, recorded_at
        FROM odds_history
        WHERE match_id = ?
        ORDER BY recorded_at DESC, bookmaker ASC
        LIMIT ?
        "#,
    )
    .bind(match_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}
