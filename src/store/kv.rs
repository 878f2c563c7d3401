use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::Row;
use tracing::{debug, warn};

use crate::error::Result;

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

/// Process-local backend. Contents vanish on restart.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: DashMap<String, MemoryEntry>,
}

/// Durable backend on the `kv_cache` table.
#[derive(Debug, Clone)]
pub struct SqliteKv {
    pool: sqlx::SqlitePool,
}

enum Lookup {
    Hit(String),
    Expired,
    Miss,
}

// ---------------------------------------------------------------------------
// KvStore
// ---------------------------------------------------------------------------

/// Key/value cache with optional per-key expiration. Every `put` replaces the
/// whole value (last write wins); expired keys read as absent.
#[derive(Debug)]
pub enum KvStore {
    Memory(MemoryKv),
    Sqlite(SqliteKv),
}

impl KvStore {
    pub fn memory() -> Self {
        KvStore::Memory(MemoryKv::default())
    }

    pub fn sqlite(pool: sqlx::SqlitePool) -> Self {
        KvStore::Sqlite(SqliteKv { pool })
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let lookup = match self {
            KvStore::Memory(mem) => match mem.entries.get(key) {
                Some(entry) if entry.expires_at.map_or(false, |at| at <= Instant::now()) => {
                    Lookup::Expired
                }
                Some(entry) => Lookup::Hit(entry.value.clone()),
                None => Lookup::Miss,
            },
            KvStore::Sqlite(db) => {
                let row = sqlx::query("SELECT value, expires_at FROM kv_cache WHERE key = ?")
                    .bind(key)
                    .fetch_optional(&db.pool)
                    .await?;
                match row {
                    Some(row) => {
                        let expires_at: Option<i64> = row.try_get("expires_at")?;
                        if expires_at.map_or(false, |at| at <= Utc::now().timestamp_millis()) {
                            Lookup::Expired
                        } else {
                            Lookup::Hit(row.try_get("value")?)
                        }
                    }
                    None => Lookup::Miss,
                }
            }
        };

        match lookup {
            Lookup::Hit(value) => Ok(Some(value)),
            Lookup::Miss => Ok(None),
            Lookup::Expired => {
                debug!(key, "kv entry expired");
                self.purge_expired(key).await?;
                Ok(None)
            }
        }
    }

    pub async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        match self {
            KvStore::Memory(mem) => {
                let expires_at = ttl.map(|ttl| Instant::now() + ttl);
                mem.entries.insert(key.to_string(), MemoryEntry { value, expires_at });
            }
            KvStore::Sqlite(db) => {
                let expires_at = ttl.map(|ttl| Utc::now().timestamp_millis() + ttl.as_millis() as i64);
                sqlx::query(
                    r#"
                    INSERT INTO kv_cache (key, value, expires_at) VALUES (?, ?, ?)
                    ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
                    "#,
                )
                .bind(key)
                .bind(value)
                .bind(expires_at)
                .execute(&db.pool)
                .await?;
            }
        }
        Ok(())
    }

    /// Writes several entries at once. On SQLite they commit in one
    /// transaction, so either all of them land or none do.
    pub async fn put_many(&self, entries: Vec<(&str, String, Option<Duration>)>) -> Result<()> {
        match self {
            KvStore::Memory(mem) => {
                for (key, value, ttl) in entries {
                    let expires_at = ttl.map(|ttl| Instant::now() + ttl);
                    mem.entries.insert(key.to_string(), MemoryEntry { value, expires_at });
                }
            }
            KvStore::Sqlite(db) => {
                let now_ms = Utc::now().timestamp_millis();
                let mut tx = db.pool.begin().await?;
                for (key, value, ttl) in entries {
                    let expires_at = ttl.map(|ttl| now_ms + ttl.as_millis() as i64);
                    sqlx::query(
                        r#"
                        INSERT INTO kv_cache (key, value, expires_at) VALUES (?, ?, ?)
                        ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
                        "#,
                    )
                    .bind(key)
                    .bind(value)
                    .bind(expires_at)
                    .execute(&mut *tx)
                    .await?;
                }
                tx.commit().await?;
            }
        }
        Ok(())
    }

    /// Removes `key` only if it is still expired. A concurrent `put` that
    /// landed after the read is left alone.
    async fn purge_expired(&self, key: &str) -> Result<()> {
        match self {
            KvStore::Memory(mem) => {
                let now = Instant::now();
                mem.entries
                    .remove_if(key, |_, entry| entry.expires_at.is_some_and(|at| at <= now));
            }
            KvStore::Sqlite(db) => {
                sqlx::query("DELETE FROM kv_cache WHERE key = ? AND expires_at IS NOT NULL AND expires_at <= ?")
                    .bind(key)
                    .bind(Utc::now().timestamp_millis())
                    .execute(&db.pool)
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        match self {
            KvStore::Memory(mem) => {
                mem.entries.remove(key);
            }
            KvStore::Sqlite(db) => {
                sqlx::query("DELETE FROM kv_cache WHERE key = ?")
                    .bind(key)
                    .execute(&db.pool)
                    .await?;
            }
        }
        Ok(())
    }

    /// Reads and decodes a JSON value. An undecodable value reads as absent.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, "ignoring undecodable kv value: {e}");
                Ok(None)
            }
        }
    }

    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.put(key, raw, ttl).await
    }
}

/// Single-connection in-memory SQLite pool with migrations applied.
#[cfg(test)]
pub async fn test_pool() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    sqlx::migrate!("./migrations").run(&pool).await.expect("migrations");
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exercise(kv: KvStore) {
        assert_eq!(kv.get("a").await.unwrap(), None);

        kv.put("a", "one".to_string(), None).await.unwrap();
        kv.put("a", "two".to_string(), None).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("two"));

        kv.put("short", "x".to_string(), Some(Duration::from_millis(0))).await.unwrap();
        assert_eq!(kv.get("short").await.unwrap(), None);

        kv.put("long", "y".to_string(), Some(Duration::from_secs(60))).await.unwrap();
        assert_eq!(kv.get("long").await.unwrap().as_deref(), Some("y"));

        kv.delete("a").await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_backend_honours_ttl_and_replace() {
        exercise(KvStore::memory()).await;
    }

    #[tokio::test]
    async fn sqlite_backend_honours_ttl_and_replace() {
        exercise(KvStore::sqlite(test_pool().await)).await;
    }

    async fn purge_spares_fresh_value(kv: KvStore) {
        kv.put("k", "old".to_string(), Some(Duration::from_millis(0))).await.unwrap();
        // A writer replaces the value between the expired read and the purge.
        kv.put("k", "new".to_string(), Some(Duration::from_secs(60))).await.unwrap();
        kv.purge_expired("k").await.unwrap();
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("new"));

        kv.put("gone", "x".to_string(), Some(Duration::from_millis(0))).await.unwrap();
        kv.purge_expired("gone").await.unwrap();
        kv.put("keep", "y".to_string(), None).await.unwrap();
        kv.purge_expired("keep").await.unwrap();
        assert_eq!(kv.get("keep").await.unwrap().as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn memory_purge_leaves_rewritten_key() {
        purge_spares_fresh_value(KvStore::memory()).await;
    }

    #[tokio::test]
    async fn sqlite_purge_leaves_rewritten_key() {
        purge_spares_fresh_value(KvStore::sqlite(test_pool().await)).await;
    }

    #[tokio::test]
    async fn put_many_writes_every_entry() {
        for kv in [KvStore::memory(), KvStore::sqlite(test_pool().await)] {
            kv.put_many(vec![
                ("a", "1".to_string(), None),
                ("b", "2".to_string(), Some(Duration::from_secs(60))),
            ])
            .await
            .unwrap();
            assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("1"));
            assert_eq!(kv.get("b").await.unwrap().as_deref(), Some("2"));
        }
    }

    #[tokio::test]
    async fn sqlite_put_many_is_all_or_nothing() {
        let pool = test_pool().await;
        let kv = KvStore::sqlite(pool.clone());
        kv.put("a", "before".to_string(), None).await.unwrap();
        // Reject the second row so the transaction aborts after the first upsert.
        sqlx::query(
            "CREATE TRIGGER reject_b BEFORE INSERT ON kv_cache WHEN NEW.key = 'b' \
             BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .execute(&pool)
        .await
        .unwrap();

        let result = kv
            .put_many(vec![("a", "after".to_string(), None), ("b", "2".to_string(), None)])
            .await;
        assert!(result.is_err());
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("before"));
        assert_eq!(kv.get("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn json_helpers_tolerate_garbage() {
        let kv = KvStore::memory();
        kv.put("bad", "{not json".to_string(), None).await.unwrap();
        let value: Option<Vec<u32>> = kv.get_json("bad").await.unwrap();
        assert!(value.is_none());

        kv.put_json("good", &vec![1u32, 2, 3], None).await.unwrap();
        let value: Option<Vec<u32>> = kv.get_json("good").await.unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));
    }
}
