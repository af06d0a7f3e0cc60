//! kforge persistence: size- and age-bounded SQLite cache of raw definitions
//! documents, keyed by `(version_tag, schema_key)`.

#![forbid(unsafe_code)]

use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use chrono::{Duration, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DEFAULT_MAX_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_MAX_AGE_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheUsage {
    pub entries: u64,
    pub bytes: u64,
    pub max_bytes: u64,
}

pub trait SchemaCacheStore {
    /// Expired entries are deleted and reported as a miss.
    fn get(&self, version_tag: &str, schema_key: &str) -> Result<Option<Vec<u8>>>;
    /// Returns false when the entry is larger than the byte bound and was not stored.
    fn put(&self, version_tag: &str, schema_key: &str, bytes: &[u8]) -> Result<bool>;
    fn purge_expired(&self) -> Result<usize>;
    fn usage(&self) -> Result<CacheUsage>;
}

/// SQLite-backed store. Synchronous; the CLI touches it once per load.
pub struct SqliteSchemaCache {
    db: Mutex<rusqlite::Connection>,
    max_bytes: u64,
    max_age: Duration,
}

impl SqliteSchemaCache {
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("KFORGE_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = std::time::Instant::now();
        let db = rusqlite::Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        db.execute(
            "CREATE TABLE IF NOT EXISTS schema_cache (
                version_tag TEXT NOT NULL,
                schema_key  TEXT NOT NULL,
                stored_at   INTEGER NOT NULL,
                size        INTEGER NOT NULL,
                blob        BLOB NOT NULL,
                PRIMARY KEY (version_tag, schema_key)
            )",
            [],
        )
        .context("creating schema_cache table")?;
        db.execute("CREATE INDEX IF NOT EXISTS idx_schema_cache_stored_at ON schema_cache(stored_at)", []).ok();
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(Self { db: Mutex::new(db), max_bytes: DEFAULT_MAX_BYTES, max_age: Duration::days(DEFAULT_MAX_AGE_DAYS) })
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    fn conn(&self) -> Result<MutexGuard<'_, rusqlite::Connection>> {
        self.db.lock().map_err(|_| anyhow!("schema cache connection poisoned"))
    }

    fn cutoff(&self) -> i64 {
        (Utc::now() - self.max_age).timestamp_millis()
    }
}

impl SchemaCacheStore for SqliteSchemaCache {
    fn get(&self, version_tag: &str, schema_key: &str) -> Result<Option<Vec<u8>>> {
        let started = std::time::Instant::now();
        let db = self.conn()?;
        let row: Option<(i64, Vec<u8>)> = {
            let mut stmt =
                db.prepare_cached("SELECT stored_at, blob FROM schema_cache WHERE version_tag = ?1 AND schema_key = ?2")?;
            let mut rows = stmt.query((version_tag, schema_key))?;
            let found = match rows.next()? {
                Some(r) => Some((r.get(0)?, r.get(1)?)),
                None => None,
            };
            found
        };
        let out = match row {
            Some((stored_at, _)) if stored_at < self.cutoff() => {
                db.execute(
                    "DELETE FROM schema_cache WHERE version_tag = ?1 AND schema_key = ?2",
                    (version_tag, schema_key),
                )?;
                debug!(version_tag, schema_key, "expired schema cache entry dropped");
                counter!("persist_expired_total", 1u64);
                None
            }
            Some((_, blob)) => Some(maybe_decompress(&blob)),
            None => None,
        };
        if out.is_some() {
            counter!("persist_hits_total", 1u64);
        } else {
            counter!("persist_misses_total", 1u64);
        }
        histogram!("persist_get_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }

    fn put(&self, version_tag: &str, schema_key: &str, bytes: &[u8]) -> Result<bool> {
        let started = std::time::Instant::now();
        let blob = maybe_compress(bytes);
        let size = blob.len() as u64;
        if size > self.max_bytes {
            info!(version_tag, schema_key, size, max_bytes = self.max_bytes, "entry exceeds cache bound; not stored");
            return Ok(false);
        }
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO schema_cache(version_tag, schema_key, stored_at, size, blob)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            (version_tag, schema_key, Utc::now().timestamp_millis(), size as i64, &blob),
        )?;
        // Evict oldest until the total fits
        let mut evicted = 0usize;
        loop {
            let total: i64 = tx.query_row("SELECT COALESCE(SUM(size), 0) FROM schema_cache", [], |r| r.get(0))?;
            if total as u64 <= self.max_bytes {
                break;
            }
            let n = tx.execute(
                "DELETE FROM schema_cache WHERE rowid = (
                    SELECT rowid FROM schema_cache
                    WHERE NOT (version_tag = ?1 AND schema_key = ?2)
                    ORDER BY stored_at ASC, rowid ASC LIMIT 1
                )",
                (version_tag, schema_key),
            )?;
            if n == 0 {
                break;
            }
            evicted += n;
        }
        tx.commit()?;
        if evicted > 0 {
            debug!(evicted, "schema cache evicted oldest entries");
            counter!("persist_evicted_total", evicted as u64);
        }
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        Ok(true)
    }

    fn purge_expired(&self) -> Result<usize> {
        let db = self.conn()?;
        let n = db.execute("DELETE FROM schema_cache WHERE stored_at < ?1", [self.cutoff()])?;
        if n > 0 {
            counter!("persist_expired_total", n as u64);
        }
        Ok(n)
    }

    fn usage(&self) -> Result<CacheUsage> {
        let db = self.conn()?;
        let (entries, bytes): (i64, i64) =
            db.query_row("SELECT COUNT(*), COALESCE(SUM(size), 0) FROM schema_cache", [], |r| Ok((r.get(0)?, r.get(1)?)))?;
        Ok(CacheUsage { entries: entries as u64, bytes: bytes as u64, max_bytes: self.max_bytes })
    }
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".kforge");
        let _ = std::fs::create_dir_all(&p);
        p.push("schema-cache.db");
        return p.to_string_lossy().to_string();
    }
    "schema-cache.db".to_string()
}

pub fn maybe_compress(bytes: &[u8]) -> Vec<u8> {
    #[cfg(feature = "zstd")]
    {
        let lvl: i32 = std::env::var("KFORGE_ZSTD_LEVEL").ok().and_then(|s| s.parse().ok()).unwrap_or(3);
        return zstd::encode_all(bytes, lvl).unwrap_or_else(|_| bytes.to_vec());
    }
    bytes.to_vec()
}

pub fn maybe_decompress(blob: &[u8]) -> Vec<u8> {
    #[cfg(feature = "zstd")]
    {
        if let Ok(de) = zstd::decode_all(std::io::Cursor::new(blob)) {
            return de;
        }
    }
    blob.to_vec()
}
