//! Persistent cache of visited URLs.
//!
//! Successfully probed URLs are recorded in an embedded SQLite database so
//! subsequent invocations can skip the network entirely while the entry is
//! within its validity window. Jitter narrows the window
//! (`age + uniform(0, jitter) <= validity`), smearing revalidation across
//! runs instead of letting every entry expire at once.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use rusqlite::{Connection, OptionalExtension};

use crate::error::{CheckError, Result};

/// SQLite-backed store of visited URLs. Writes go through an internal
/// mutex; the validator owns the handle for the process lifetime.
pub struct UrlCache {
    conn: Mutex<Connection>,
    validity: Duration,
    jitter: Duration,
}

impl UrlCache {
    /// Open (or create) the cache database and ensure the schema exists.
    /// With `clear` set, any existing entries are dropped first.
    pub fn open(
        path: &Path,
        validity: Duration,
        jitter: Duration,
        clear: bool,
    ) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| CheckError::Cache(format!("unable to open cache database file: {}", e)))?;

        if clear {
            conn.execute("DROP TABLE IF EXISTS visited", [])?;
        }
        conn.execute(
            "CREATE TABLE IF NOT EXISTS visited (id INTEGER PRIMARY KEY, url TEXT, visited INT, timestamp DATETIME)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_visited ON visited (url)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            validity,
            jitter,
        })
    }

    /// Whether the URL was visited within the (jittered) validity window.
    /// Age, jitter and validity are compared at millisecond resolution so
    /// sub-second jitter windows still smear revalidation.
    pub fn is_cached(&self, url: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("cache lock poisoned");
        let timestamp_ms: Option<i64> = conn
            .query_row(
                "SELECT timestamp FROM visited WHERE url = ?1 ORDER BY timestamp DESC LIMIT 1",
                [url],
                |row| row.get(0),
            )
            .optional()?;

        let Some(timestamp_ms) = timestamp_ms else {
            return Ok(false);
        };

        let age_ms = Utc::now().timestamp_millis().saturating_sub(timestamp_ms);
        let jitter_ms = if self.jitter > Duration::ZERO {
            rand::thread_rng().gen_range(0..=self.jitter.as_millis() as i64)
        } else {
            0
        };
        Ok(age_ms + jitter_ms <= self.validity.as_millis() as i64)
    }

    /// Record a visit for the URL with the current UTC timestamp (epoch
    /// milliseconds). Any prior row for the URL is deleted first, keeping a
    /// single row per URL.
    pub fn cache_url(&self, url: &str) -> Result<()> {
        let conn = self.conn.lock().expect("cache lock poisoned");
        conn.execute("DELETE FROM visited WHERE url = ?1", [url])?;
        conn.execute(
            "INSERT INTO visited (url, visited, timestamp) VALUES (?1, 1, ?2)",
            rusqlite::params![url, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    /// Remove the URL from the cache.
    pub fn delete_url(&self, url: &str) -> Result<()> {
        let conn = self.conn.lock().expect("cache lock poisoned");
        conn.execute("DELETE FROM visited WHERE url = ?1", [url])?;
        Ok(())
    }

    /// Close the database handle explicitly, surfacing any flush error.
    pub fn close(self) -> Result<()> {
        let conn = self.conn.into_inner().expect("cache lock poisoned");
        conn.close()
            .map_err(|(_, e)| CheckError::Cache(format!("closing cache database: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_cache(validity: Duration, jitter: Duration) -> (tempfile::TempDir, UrlCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = UrlCache::open(&dir.path().join("cache.db"), validity, jitter, false).unwrap();
        (dir, cache)
    }

    #[test]
    fn test_miss_then_hit() {
        let (_dir, cache) = temp_cache(Duration::from_secs(3600), Duration::ZERO);
        assert!(!cache.is_cached("https://example.com/a").unwrap());
        cache.cache_url("https://example.com/a").unwrap();
        assert!(cache.is_cached("https://example.com/a").unwrap());
        assert!(!cache.is_cached("https://example.com/b").unwrap());
    }

    #[test]
    fn test_zero_validity_expires_immediately() {
        let (_dir, cache) = temp_cache(Duration::ZERO, Duration::ZERO);
        cache.cache_url("https://example.com/a").unwrap();
        // age 0 + jitter 0 <= validity 0 holds only at the insert instant;
        // a past timestamp must be expired.
        {
            let conn = cache.conn.lock().unwrap();
            conn.execute(
                "UPDATE visited SET timestamp = ?1 WHERE url = ?2",
                rusqlite::params![
                    Utc::now().timestamp_millis() - 10_000,
                    "https://example.com/a"
                ],
            )
            .unwrap();
        }
        assert!(!cache.is_cached("https://example.com/a").unwrap());
    }

    #[test]
    fn test_sub_second_jitter_is_sampled_not_discarded() {
        // A 250ms jitter is a valid window; it must neither panic nor be
        // truncated away. With a large validity the entry stays cached for
        // every sample.
        let (_dir, cache) = temp_cache(Duration::from_secs(3600), Duration::from_millis(250));
        cache.cache_url("https://example.com/a").unwrap();
        for _ in 0..50 {
            assert!(cache.is_cached("https://example.com/a").unwrap());
        }
    }

    #[test]
    fn test_jitter_narrows_the_validity_window() {
        // Entry aged past validity is expired no matter what jitter value is
        // sampled; the comparison happens at millisecond resolution.
        let (_dir, cache) = temp_cache(Duration::from_millis(200), Duration::from_millis(250));
        cache.cache_url("https://example.com/a").unwrap();
        {
            let conn = cache.conn.lock().unwrap();
            conn.execute(
                "UPDATE visited SET timestamp = ?1 WHERE url = ?2",
                rusqlite::params![
                    Utc::now().timestamp_millis() - 300,
                    "https://example.com/a"
                ],
            )
            .unwrap();
        }
        for _ in 0..50 {
            assert!(!cache.is_cached("https://example.com/a").unwrap());
        }
    }

    #[test]
    fn test_cache_keeps_single_row_per_url() {
        let (_dir, cache) = temp_cache(Duration::from_secs(3600), Duration::ZERO);
        cache.cache_url("https://example.com/a").unwrap();
        cache.cache_url("https://example.com/a").unwrap();
        let conn = cache.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM visited WHERE url = ?1",
                ["https://example.com/a"],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_delete_url() {
        let (_dir, cache) = temp_cache(Duration::from_secs(3600), Duration::ZERO);
        cache.cache_url("https://example.com/a").unwrap();
        cache.delete_url("https://example.com/a").unwrap();
        assert!(!cache.is_cached("https://example.com/a").unwrap());
    }

    #[test]
    fn test_clear_drops_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let cache =
            UrlCache::open(&path, Duration::from_secs(3600), Duration::ZERO, false).unwrap();
        cache.cache_url("https://example.com/a").unwrap();
        drop(cache);

        let cache =
            UrlCache::open(&path, Duration::from_secs(3600), Duration::ZERO, true).unwrap();
        assert!(!cache.is_cached("https://example.com/a").unwrap());
    }

    #[test]
    fn test_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let cache =
            UrlCache::open(&path, Duration::from_secs(3600), Duration::ZERO, false).unwrap();
        cache.cache_url("https://example.com/a").unwrap();
        cache.close().unwrap();

        let cache =
            UrlCache::open(&path, Duration::from_secs(3600), Duration::ZERO, false).unwrap();
        assert!(cache.is_cached("https://example.com/a").unwrap());
    }
}
