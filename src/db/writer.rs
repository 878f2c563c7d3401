use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::error::Result;
use crate::types::{BookmakerOdds, OddsResponse};

/// One full ingest to archive.
#[derive(Debug, Clone)]
pub struct HistoryJob {
    pub run_id: String,
    pub run_updated: Option<String>,
    pub snapshot: Arc<OddsResponse>,
}

/// Receives full snapshots from ingest and archives them to SQLite.
/// Runs as a dedicated background task; failures are logged and dropped.
pub struct HistoryWriter {
    pool: sqlx::SqlitePool,
    job_rx: mpsc::Receiver<HistoryJob>,
}

impl HistoryWriter {
    pub fn new(pool: sqlx::SqlitePool, job_rx: mpsc::Receiver<HistoryJob>) -> Self {
        Self { pool, job_rx }
    }

    pub async fn run(mut self) {
        while let Some(job) = self.job_rx.recv().await {
            match self.write_run(&job).await {
                Ok(rows) => info!(run_id = %job.run_id, rows, "history run stored"),
                Err(e) => error!(run_id = %job.run_id, "history write error: {e}"),
            }
        }
    }

    /// Writes the run header and one row per (match, bookmaker) in a single
    /// transaction. Re-sending a run id replaces its rows.
    pub async fn write_run(&self, job: &HistoryJob) -> Result<usize> {
        let recorded_at = Utc::now().timestamp_millis();
        let snapshot = &job.snapshot;
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM odds_history WHERE run_id = ?")
            .bind(&job.run_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO history_runs (run_id, run_updated, created_at, league_count, match_count)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.run_id)
        .bind(&job.run_updated)
        .bind(recorded_at)
        .bind(snapshot.leagues.len() as i64)
        .bind(snapshot.total_matches as i64)
        .execute(&mut *tx)
        .await?;

        let mut rows = 0usize;
        for group in &snapshot.leagues {
            for m in &group.matches {
                let match_id = m.identity();
                let league_key = m.league_key.as_ref().or(group.league_key.as_ref());
                for book in &m.bookmakers {
                    sqlx::query(
                        r#"
                        INSERT INTO odds_history (
                            run_id, match_id, league, league_key, home_team, away_team, start_time,
                            bookmaker, home_odds, draw_odds, away_odds, url, recorded_at
                        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                        "#,
                    )
                    .bind(&job.run_id)
                    .bind(&match_id)
                    .bind(&m.league)
                    .bind(league_key)
                    .bind(&m.home_team)
                    .bind(&m.away_team)
                    .bind(m.start_time)
                    .bind(&book.name)
                    .bind(BookmakerOdds::valid_price(book.home_odds))
                    .bind(BookmakerOdds::valid_price(book.draw_odds))
                    .bind(BookmakerOdds::valid_price(book.away_odds))
                    .bind(&book.url)
                    .bind(recorded_at)
                    .execute(&mut *tx)
                    .await?;
                    rows += 1;
                }
            }
        }

        tx.commit().await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{latest_run, match_history};
    use crate::snapshot::build_snapshot;
    use crate::store::kv::test_pool;
    use crate::types::{LeagueGroup, Match};

    fn job(run_id: &str, home_price: f64) -> HistoryJob {
        let snapshot = build_snapshot(
            vec![LeagueGroup {
                league: "England. Premier League".to_string(),
                league_key: None,
                matches: vec![Match {
                    home_team: "Arsenal".to_string(),
                    away_team: "Chelsea".to_string(),
                    start_time: 100,
                    bookmakers: vec![
                        BookmakerOdds {
                            name: "Bet365".to_string(),
                            home_odds: Some(home_price),
                            draw_odds: Some(1.0),
                            away_odds: Some(4.0),
                            ..Default::default()
                        },
                        BookmakerOdds {
                            name: "Unibet".to_string(),
                            home_odds: Some(home_price),
                            ..Default::default()
                        },
                    ],
                    ..Default::default()
                }],
            }],
            "2026-01-01T00:00:00Z".to_string(),
            900,
        );
        HistoryJob {
            run_id: run_id.to_string(),
            run_updated: Some("2026-01-01T00:00:00Z".to_string()),
            snapshot: Arc::new(snapshot),
        }
    }

    #[tokio::test]
    async fn stores_one_row_per_bookmaker() {
        let pool = test_pool().await;
        let (_tx, rx) = mpsc::channel(1);
        let writer = HistoryWriter::new(pool.clone(), rx);

        let rows = writer.write_run(&job("run-1", 1.8)).await.unwrap();
        assert_eq!(rows, 2);

        let run = latest_run(&pool).await.unwrap().expect("run");
        assert_eq!(run.run_id, "run-1");
        assert_eq!(run.match_count, 1);
        assert_eq!(run.league_count, 1);

        let history = match_history(&pool, "arsenal_vs_chelsea_100", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].bookmaker, "Bet365");
        assert_eq!(history[0].league_key.as_deref(), Some("premier"));
        assert_eq!(history[0].draw_odds, None, "sentinel price stored as NULL");
    }

    #[tokio::test]
    async fn rewriting_a_run_replaces_its_rows() {
        let pool = test_pool().await;
        let (_tx, rx) = mpsc::channel(1);
        let writer = HistoryWriter::new(pool.clone(), rx);

        writer.write_run(&job("run-1", 1.8)).await.unwrap();
        writer.write_run(&job("run-1", 1.9)).await.unwrap();

        let history = match_history(&pool, "arsenal_vs_chelsea_100", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|r| r.home_odds == Some(1.9)));
    }
}
