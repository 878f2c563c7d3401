use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::{KEY_ALL_ODDS, KEY_FAST_ODDS, KEY_LAST_ODDS};
use crate::error::Result;
use crate::snapshot::merge_sources;
use crate::store::kv::KvStore;
use crate::types::{OddsResponse, SnapshotKind};

/// Typed access to the three stored snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    kv: Arc<KvStore>,
    full_ttl: Duration,
    fast_ttl: Duration,
}

impl SnapshotStore {
    pub fn new(kv: Arc<KvStore>, full_ttl_secs: u64, fast_ttl_secs: u64) -> Self {
        Self {
            kv,
            full_ttl: Duration::from_secs(full_ttl_secs),
            fast_ttl: Duration::from_secs(fast_ttl_secs),
        }
    }

    /// Hot full snapshot, or the durable backup marked `stale` once the hot copy expired.
    pub async fn read_full(&self) -> Result<Option<OddsResponse>> {
        if let Some(hot) = self.kv.get_json::<OddsResponse>(KEY_ALL_ODDS).await? {
            return Ok(Some(hot));
        }
        let backup = self.kv.get_json::<OddsResponse>(KEY_LAST_ODDS).await?;
        Ok(backup.map(|mut snapshot| {
            debug!("serving full snapshot from durable backup");
            snapshot.stale = Some(true);
            snapshot
        }))
    }

    pub async fn read_overlay(&self) -> Result<Option<OddsResponse>> {
        self.kv.get_json(KEY_FAST_ODDS).await
    }

    /// The snapshot a new ingest of `kind` is diffed against.
    pub async fn read_previous(&self, kind: SnapshotKind) -> Result<Option<OddsResponse>> {
        match kind {
            SnapshotKind::Full => self.kv.get_json(KEY_LAST_ODDS).await,
            SnapshotKind::Fast => self.kv.get_json(KEY_FAST_ODDS).await,
        }
    }

    /// Replaces the stored snapshot of `kind`. A full snapshot updates the
    /// durable backup and the short-lived hot key together.
    pub async fn write(&self, kind: SnapshotKind, snapshot: &OddsResponse) -> Result<()> {
        match kind {
            SnapshotKind::Full => {
                let raw = serde_json::to_string(snapshot)?;
                self.kv
                    .put_many(vec![
                        (KEY_LAST_ODDS, raw.clone(), None),
                        (KEY_ALL_ODDS, raw, Some(self.full_ttl)),
                    ])
                    .await?;
            }
            SnapshotKind::Fast => {
                self.kv.put_json(KEY_FAST_ODDS, snapshot, Some(self.fast_ttl)).await?;
            }
        }
        Ok(())
    }

    /// Full and overlay merged, computed fresh on every call.
    pub async fn read_merged(&self) -> Result<Option<OddsResponse>> {
        let full = self.read_full().await?;
        let overlay = self.read_overlay().await?;
        Ok(merge_sources(full, overlay))
    }

    pub fn ttl_secs(&self, kind: SnapshotKind) -> u64 {
        match kind {
            SnapshotKind::Full => self.full_ttl.as_secs(),
            SnapshotKind::Fast => self.fast_ttl.as_secs(),
        }
    }

    #[cfg(test)]
    pub fn kv(&self) -> &KvStore {
        &self.kv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::build_snapshot;
    use crate::types::{LeagueGroup, Match};

    fn snapshot(home: &str, updated: &str) -> OddsResponse {
        build_snapshot(
            vec![LeagueGroup {
                league: "EPL".to_string(),
                league_key: None,
                matches: vec![Match {
                    home_team: home.to_string(),
                    away_team: "Away".to_string(),
                    start_time: 10,
                    ..Default::default()
                }],
            }],
            updated.to_string(),
            900,
        )
    }

    #[tokio::test]
    async fn full_write_populates_hot_and_backup() {
        let store = SnapshotStore::new(Arc::new(KvStore::memory()), 900, 180);
        store.write(SnapshotKind::Full, &snapshot("A", "t1")).await.unwrap();

        let full = store.read_full().await.unwrap().expect("full");
        assert_eq!(full.stale, None);
        assert!(store.read_previous(SnapshotKind::Full).await.unwrap().is_some());
        assert!(store.read_previous(SnapshotKind::Fast).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_full_write_leaves_both_keys_untouched() {
        let pool = crate::store::kv::test_pool().await;
        let store = SnapshotStore::new(Arc::new(KvStore::sqlite(pool.clone())), 900, 180);
        store.write(SnapshotKind::Full, &snapshot("A", "t1")).await.unwrap();

        sqlx::query(
            "CREATE TRIGGER reject_hot BEFORE UPDATE ON kv_cache WHEN NEW.key = 'all_odds' \
             BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .execute(&pool)
        .await
        .unwrap();
        assert!(store.write(SnapshotKind::Full, &snapshot("B", "t2")).await.is_err());

        let backup = store.read_previous(SnapshotKind::Full).await.unwrap().expect("backup");
        let hot = store.read_full().await.unwrap().expect("hot");
        assert_eq!(backup.last_updated, "t1");
        assert_eq!(hot.last_updated, "t1");
    }

    #[tokio::test]
    async fn expired_hot_key_falls_back_to_stale_backup() {
        let store = SnapshotStore::new(Arc::new(KvStore::memory()), 0, 180);
        store.write(SnapshotKind::Full, &snapshot("A", "t1")).await.unwrap();

        let full = store.read_full().await.unwrap().expect("backup");
        assert_eq!(full.stale, Some(true));
        assert_eq!(full.total_matches, 1);
    }

    #[tokio::test]
    async fn merged_read_sees_overlay_until_it_disappears() {
        let store = SnapshotStore::new(Arc::new(KvStore::memory()), 900, 180);
        assert!(store.read_merged().await.unwrap().is_none());

        store.write(SnapshotKind::Full, &snapshot("A", "t1")).await.unwrap();
        store.write(SnapshotKind::Fast, &snapshot("B", "t2")).await.unwrap();
        let merged = store.read_merged().await.unwrap().expect("merged");
        assert_eq!(merged.total_matches, 2);
        assert_eq!(merged.last_updated, "t2");
        assert_eq!(merged.cache_ttl, 900);

        store.kv().delete(KEY_FAST_ODDS).await.unwrap();
        let merged = store.read_merged().await.unwrap().expect("merged");
        assert_eq!(merged.total_matches, 1);
        assert_eq!(merged.last_updated, "t1");
    }
}
