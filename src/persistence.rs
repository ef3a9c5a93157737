//! Persisted limiter and cache state
//!
//! Rate limit buckets and cached explanations are kept in SQLite so that
//! restarting the daemon neither resets rate limits nor forgets answers.

use crate::cache::CacheEntry;
use crate::core::ExplanationResult;
use crate::error::StorageError;
use crate::rate_limit::RateLimitSnapshot;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// SQLite-backed store for state that must survive restarts
#[derive(Debug, Clone)]
pub struct StateStore {
    db_path: PathBuf,
}

impl StateStore {
    pub fn new(db_path: PathBuf) -> Result<Self, StorageError> {
        let store = Self { db_path };
        store.init_db()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn init_db(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS rate_limits (
                provider TEXT PRIMARY KEY,
                tokens REAL NOT NULL,
                updated_at_ms INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS response_cache (
                key TEXT PRIMARY KEY,
                explanation TEXT NOT NULL,
                provider TEXT NOT NULL,
                examples TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                created_at_ms INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Replace stored buckets with `snapshots`
    pub fn save_rate_limits(&self, snapshots: &[RateLimitSnapshot]) -> Result<(), StorageError> {
        let mut conn = Connection::open(&self.db_path)?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM rate_limits", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO rate_limits (provider, tokens, updated_at_ms) VALUES (?1, ?2, ?3)",
            )?;
            for snapshot in snapshots {
                stmt.execute(params![
                    snapshot.provider,
                    snapshot.tokens,
                    snapshot.updated_at.timestamp_millis()
                ])?;
            }
        }
        tx.commit()?;
        debug!("💾 Saved {} rate limit buckets", snapshots.len());
        Ok(())
    }

    pub fn load_rate_limits(&self) -> Result<Vec<RateLimitSnapshot>, StorageError> {
        let conn = Connection::open(&self.db_path)?;
        let mut stmt =
            conn.prepare("SELECT provider, tokens, updated_at_ms FROM rate_limits")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut snapshots = Vec::new();
        for row in rows {
            let (provider, tokens, updated_at_ms) = row?;
            let Some(updated_at) = from_millis(updated_at_ms) else {
                warn!("Skipping rate limit row for {} with bad timestamp", provider);
                continue;
            };
            snapshots.push(RateLimitSnapshot {
                provider,
                tokens,
                updated_at,
            });
        }
        Ok(snapshots)
    }

    /// Replace stored cache entries with `entries`
    pub fn save_cache(&self, entries: &[CacheEntry]) -> Result<(), StorageError> {
        let mut conn = Connection::open(&self.db_path)?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM response_cache", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO response_cache
                    (key, explanation, provider, examples, timestamp_ms, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for entry in entries {
                let examples = serde_json::to_string(&entry.result.examples)?;
                stmt.execute(params![
                    entry.key,
                    entry.result.explanation,
                    entry.result.provider,
                    examples,
                    entry.result.timestamp.timestamp_millis(),
                    entry.created_at.timestamp_millis()
                ])?;
            }
        }
        tx.commit()?;
        debug!("💾 Saved {} cache entries", entries.len());
        Ok(())
    }

    pub fn load_cache(&self) -> Result<Vec<CacheEntry>, StorageError> {
        let conn = Connection::open(&self.db_path)?;
        let mut stmt = conn.prepare(
            "SELECT key, explanation, provider, examples, timestamp_ms, created_at_ms
             FROM response_cache ORDER BY created_at_ms",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (key, explanation, provider, examples, timestamp_ms, created_at_ms) = row?;
            let (Some(timestamp), Some(created_at)) =
                (from_millis(timestamp_ms), from_millis(created_at_ms))
            else {
                warn!("Skipping cache row with bad timestamp");
                continue;
            };
            let examples: Vec<String> = serde_json::from_str(&examples).unwrap_or_default();
            entries.push(CacheEntry {
                key,
                result: ExplanationResult {
                    explanation,
                    provider,
                    timestamp,
                    examples,
                    cached: false,
                },
                created_at,
            });
        }
        Ok(entries)
    }
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nested/state.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_rate_limits_roundtrip() {
        let (_dir, store) = store();
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let snapshots = vec![
            RateLimitSnapshot {
                provider: "gemini".to_string(),
                tokens: 0.25,
                updated_at: now,
            },
            RateLimitSnapshot {
                provider: "groq".to_string(),
                tokens: 3.0,
                updated_at: now,
            },
        ];
        store.save_rate_limits(&snapshots).unwrap();

        let mut loaded = store.load_rate_limits().unwrap();
        loaded.sort_by(|a, b| a.provider.cmp(&b.provider));
        assert_eq!(loaded, snapshots);

        // Saving again replaces rather than appends
        store.save_rate_limits(&snapshots[..1]).unwrap();
        assert_eq!(store.load_rate_limits().unwrap().len(), 1);
    }

    #[test]
    fn test_cache_roundtrip() {
        let (_dir, store) = store();
        let created_at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let entry = CacheEntry {
            key: "abc".to_string(),
            result: ExplanationResult {
                explanation: "An answer.".to_string(),
                provider: "groq".to_string(),
                timestamp: created_at,
                examples: vec!["An example.".to_string()],
                cached: false,
            },
            created_at,
        };
        store.save_cache(std::slice::from_ref(&entry)).unwrap();

        let loaded = store.load_cache().unwrap();
        assert_eq!(loaded, vec![entry]);
    }

    #[test]
    fn test_empty_database_loads_nothing() {
        let (_dir, store) = store();
        assert!(store.load_rate_limits().unwrap().is_empty());
        assert!(store.load_cache().unwrap().is_empty());
    }
}
