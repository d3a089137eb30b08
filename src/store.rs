//! Local key-value persistence and the chunked bookmark layout on top of it.
//!
//! The bookmark list is split into fixed-size chunks stored under
//! `bookmarked_tweets_<i>`, with a `bookmarked_tweets_meta` record giving the
//! chunk count. Chunks and meta are written in one `set_many` call, which is a
//! single transaction on [`SqliteKv`]. Readers walk `0..totalChunks` in order
//! and report any chunk they cannot read instead of failing.

use crate::error::{Result, ResultExt, XbmError};
use crate::model::{Chunk, ChunkMeta, Tweet};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// Tweets per persisted chunk.
pub const CHUNK_SIZE: usize = 100;

/// Key prefix for chunk records.
pub const CHUNK_KEY_PREFIX: &str = "bookmarked_tweets_";

/// Key of the chunk index record.
pub const META_KEY: &str = "bookmarked_tweets_meta";

const SCHEMA_VERSION: i32 = 1;

/// Key of chunk `index`.
#[must_use]
pub fn chunk_key(index: usize) -> String {
    format!("{CHUNK_KEY_PREFIX}{index}")
}

fn chunk_index_of(key: &str) -> Option<usize> {
    key.strip_prefix(CHUNK_KEY_PREFIX)?.parse().ok()
}

// =============================================================================
// Key-value backends
// =============================================================================

/// Minimal JSON key-value store, modelled on browser extension local storage.
pub trait KvStore: Send + Sync {
    /// Read a value. `Ok(None)` when the key is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or the stored value is not JSON.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write a single value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or the value exceeds the quota.
    fn set(&self, key: &str, value: &Value) -> Result<()>;

    /// Write several values. Backends that can should make this atomic; the
    /// default writes in order and stops at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first write error.
    fn set_many(&self, entries: &[(String, Value)]) -> Result<()> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Delete a key. Deleting an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn remove(&self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Read and decode a typed value.
///
/// # Errors
///
/// Returns an error if the backend fails or the value has the wrong shape.
pub fn get_typed<T: DeserializeOwned>(kv: &dyn KvStore, key: &str) -> Result<Option<T>> {
    kv.get(key)?
        .map(|v| serde_json::from_value(v).with_context(|| format!("decoding '{key}'")))
        .transpose()
}

/// Encode and write a typed value.
///
/// # Errors
///
/// Returns an error if encoding or the write fails.
pub fn set_typed<T: Serialize>(kv: &dyn KvStore, key: &str, value: &T) -> Result<()> {
    kv.set(key, &serde_json::to_value(value)?)
}

/// `SQLite`-backed store: one `kv` table of JSON text values.
pub struct SqliteKv {
    conn: Mutex<Connection>,
    max_value_bytes: Option<usize>,
}

impl SqliteKv {
    /// Open or create the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        Self::init(conn)
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be initialized.
    pub fn open_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            max_value_bytes: None,
        };
        store.migrate()?;
        Ok(store)
    }

    /// Reject single values larger than `limit` bytes of JSON text.
    #[must_use]
    pub const fn with_value_limit(mut self, limit: usize) -> Self {
        self.max_value_bytes = Some(limit);
        self
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )?;

        let found: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let found = found.and_then(|v| v.parse::<i32>().ok()).unwrap_or(0);

        if found > SCHEMA_VERSION {
            return Err(XbmError::SchemaMismatch {
                expected: SCHEMA_VERSION,
                found,
            });
        }
        if found < SCHEMA_VERSION {
            info!("Initializing database schema version {}", SCHEMA_VERSION);
            conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?)",
                params![SCHEMA_VERSION.to_string()],
            )?;
        }
        Ok(())
    }

    fn encode(&self, key: &str, value: &Value) -> Result<String> {
        let text = serde_json::to_string(value)?;
        match self.max_value_bytes {
            Some(limit) if text.len() > limit => Err(XbmError::ValueTooLarge {
                key: key.to_string(),
                size: text.len(),
                limit,
            }),
            _ => Ok(text),
        }
    }

    /// Stored JSON size in bytes for every key.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn value_sizes(&self) -> Result<Vec<(String, usize)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT key, length(value) FROM kv ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            let size: i64 = row.get(1)?;
            Ok((row.get::<_, String>(0)?, usize::try_from(size).unwrap_or(0)))
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }
}

impl KvStore for SqliteKv {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let text: Option<String> = self
            .conn
            .lock()
            .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        text.map(|t| serde_json::from_str(&t).map_err(Into::into))
            .transpose()
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        let text = self.encode(key, value)?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?, ?, ?)",
            params![key, text, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn set_many(&self, entries: &[(String, Value)]) -> Result<()> {
        // Encode (and size-check) everything before touching the database.
        let encoded = entries
            .iter()
            .map(|(k, v)| Ok((k.as_str(), self.encode(k, v)?)))
            .collect::<Result<Vec<_>>>()?;

        let now = Utc::now().to_rfc3339();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?, ?, ?)",
            )?;
            for (key, text) in &encoded {
                stmt.execute(params![key, text, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.conn
            .lock()
            .execute("DELETE FROM kv WHERE key = ?", params![key])?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT key FROM kv WHERE substr(key, 1, ?) = ? ORDER BY key")?;
        let len = i64::try_from(prefix.chars().count()).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![len, prefix], |row| row.get(0))?;
        rows.collect::<std::result::Result<Vec<String>, _>>()
            .map_err(Into::into)
    }
}

/// In-process store. Counts writes and can be told to fail writes to a key
/// prefix, which tests use to simulate quota errors mid-commit.
#[derive(Default)]
pub struct MemoryKv {
    values: Mutex<BTreeMap<String, String>>,
    writes: AtomicUsize,
    fail_prefix: Mutex<Option<String>>,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `set` calls so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// Make every subsequent write to a key starting with `prefix` fail.
    pub fn fail_writes_with_prefix(&self, prefix: Option<&str>) {
        *self.fail_prefix.lock() = prefix.map(String::from);
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        self.values
            .lock()
            .get(key)
            .map(|t| serde_json::from_str(t).map_err(Into::into))
            .transpose()
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        let blocked = self
            .fail_prefix
            .lock()
            .as_deref()
            .is_some_and(|prefix| key.starts_with(prefix));
        if blocked {
            return Err(XbmError::ValueTooLarge {
                key: key.to_string(),
                size: 0,
                limit: 0,
            });
        }
        let text = serde_json::to_string(value)?;
        self.values.lock().insert(key.to_string(), text);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.lock().remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .values
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

// =============================================================================
// Chunked bookmark store
// =============================================================================

/// Result of reading the stored bookmark list.
#[derive(Debug, Clone, Default)]
pub struct LoadOutcome {
    pub tweets: Vec<Tweet>,
    /// `None` when nothing has been imported yet.
    pub meta: Option<ChunkMeta>,
    /// Chunk indexes below `totalChunks` that were absent or undecodable.
    pub missing_chunks: Vec<usize>,
}

impl LoadOutcome {
    #[must_use]
    pub const fn is_imported(&self) -> bool {
        self.meta.is_some()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing_chunks.is_empty()
    }
}

/// Consistency report between the meta record and chunk records.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreReport {
    pub meta: Option<ChunkMeta>,
    pub chunk_keys: usize,
    pub missing_chunks: Vec<usize>,
    /// Chunk records at or beyond `totalChunks`.
    pub orphan_chunks: Vec<usize>,
    pub loaded_tweets: usize,
}

impl StoreReport {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.missing_chunks.is_empty()
            && self.orphan_chunks.is_empty()
            && self
                .meta
                .is_none_or(|m| m.total_tweets == self.loaded_tweets)
    }
}

/// Splits the bookmark list across fixed-size records in a [`KvStore`].
#[derive(Clone)]
pub struct ChunkedStore {
    kv: Arc<dyn KvStore>,
    chunk_size: usize,
}

impl ChunkedStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            chunk_size: CHUNK_SIZE,
        }
    }

    /// Underlying key-value store.
    #[must_use]
    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    /// Replace the stored list with `tweets`.
    ///
    /// # Errors
    ///
    /// Returns an error if a chunk or the meta record cannot be written. With
    /// a non-transactional backend some chunks may already be overwritten.
    pub fn persist(&self, tweets: &[Tweet]) -> Result<ChunkMeta> {
        let now = Utc::now();
        let total_chunks = tweets.len().div_ceil(self.chunk_size);

        let mut entries = Vec::with_capacity(total_chunks + 1);
        for (index, slice) in tweets.chunks(self.chunk_size).enumerate() {
            let chunk = Chunk {
                tweets: slice.to_vec(),
                chunk_index: index,
                total_chunks,
                last_updated: now,
            };
            entries.push((chunk_key(index), serde_json::to_value(&chunk)?));
        }

        let meta = ChunkMeta {
            total_tweets: tweets.len(),
            total_chunks,
            last_updated: now,
        };
        // Meta goes last so a partial commit never points past written chunks.
        entries.push((META_KEY.to_string(), serde_json::to_value(meta)?));
        self.kv.set_many(&entries)?;

        for key in self.kv.keys_with_prefix(CHUNK_KEY_PREFIX)? {
            if chunk_index_of(&key).is_some_and(|i| i >= total_chunks) {
                debug!(key = %key, "Removing stale chunk");
                self.kv.remove(&key)?;
            }
        }

        info!(
            tweets = meta.total_tweets,
            chunks = meta.total_chunks,
            "Persisted bookmarks"
        );
        Ok(meta)
    }

    /// Read the stored list, concatenating chunks in index order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or the meta record is unreadable.
    /// Missing chunks are reported in [`LoadOutcome::missing_chunks`].
    pub fn load(&self) -> Result<LoadOutcome> {
        let Some(raw) = self.kv.get(META_KEY)? else {
            return Ok(LoadOutcome::default());
        };
        let meta: ChunkMeta = serde_json::from_value(raw).map_err(|e| {
            XbmError::inconsistency(format!("meta record is unreadable: {e}"))
        })?;

        let mut tweets = Vec::with_capacity(meta.total_tweets);
        let mut missing_chunks = Vec::new();

        for index in 0..meta.total_chunks {
            match get_typed::<Chunk>(self.kv.as_ref(), &chunk_key(index)) {
                Ok(Some(chunk)) => tweets.extend(chunk.tweets),
                Ok(None) => missing_chunks.push(index),
                Err(e) => {
                    warn!(chunk = index, error = %e, "Skipping undecodable chunk");
                    missing_chunks.push(index);
                }
            }
        }

        if !missing_chunks.is_empty() {
            let err = XbmError::inconsistency(format!(
                "{} of {} chunks missing",
                missing_chunks.len(),
                meta.total_chunks
            ));
            warn!(missing = ?missing_chunks, "{err}");
        }

        Ok(LoadOutcome {
            tweets,
            meta: Some(meta),
            missing_chunks,
        })
    }

    /// Check meta against the chunk records present.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn verify(&self) -> Result<StoreReport> {
        let outcome = self.load()?;
        let total = outcome.meta.map_or(0, |m| m.total_chunks);
        let indexes: Vec<usize> = self
            .kv
            .keys_with_prefix(CHUNK_KEY_PREFIX)?
            .iter()
            .filter_map(|k| chunk_index_of(k))
            .collect();

        Ok(StoreReport {
            meta: outcome.meta,
            chunk_keys: indexes.len(),
            missing_chunks: outcome.missing_chunks,
            orphan_chunks: indexes.into_iter().filter(|&i| i >= total).collect(),
            loaded_tweets: outcome.tweets.len(),
        })
    }

    /// Remove every chunk and the meta record.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn clear(&self) -> Result<()> {
        self.kv.remove(META_KEY)?;
        for key in self.kv.keys_with_prefix(CHUNK_KEY_PREFIX)? {
            self.kv.remove(&key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Author;
    use serde_json::json;

    fn create_test_tweet(n: usize) -> Tweet {
        Tweet {
            id: format!("tweet-{n}"),
            full_text: format!("post number {n}"),
            timestamp: None,
            media: None,
            author: Author {
                name: "Tester".into(),
                screen_name: "tester".into(),
                profile_image_url: String::new(),
            },
            embedding: None,
        }
    }

    fn tweets(n: usize) -> Vec<Tweet> {
        (0..n).map(create_test_tweet).collect()
    }

    fn memory_store() -> (Arc<MemoryKv>, ChunkedStore) {
        let kv = Arc::new(MemoryKv::new());
        let store = ChunkedStore::new(kv.clone());
        (kv, store)
    }

    #[test]
    fn test_round_trip_chunk_boundaries() {
        for (n, chunks) in [(0, 0), (1, 1), (100, 1), (250, 3)] {
            let (_, store) = memory_store();
            let meta = store.persist(&tweets(n)).unwrap();
            assert_eq!(meta.total_chunks, chunks, "n={n}");
            assert_eq!(meta.total_tweets, n);

            let loaded = store.load().unwrap();
            assert!(loaded.is_imported());
            assert!(loaded.is_complete());
            assert_eq!(loaded.tweets, tweets(n), "n={n}");
        }
    }

    #[test]
    fn test_chunk_layout_keys() {
        let (kv, store) = memory_store();
        store.persist(&tweets(250)).unwrap();
        let keys = kv.keys_with_prefix(CHUNK_KEY_PREFIX).unwrap();
        assert_eq!(
            keys,
            vec![
                "bookmarked_tweets_0",
                "bookmarked_tweets_1",
                "bookmarked_tweets_2",
                "bookmarked_tweets_meta"
            ]
        );
        let chunk: Chunk = get_typed(kv.as_ref(), "bookmarked_tweets_2").unwrap().unwrap();
        assert_eq!(chunk.tweets.len(), 50);
        assert_eq!(chunk.chunk_index, 2);
        assert_eq!(chunk.total_chunks, 3);
    }

    #[test]
    fn test_not_imported_when_meta_absent() {
        let (_, store) = memory_store();
        let loaded = store.load().unwrap();
        assert!(!loaded.is_imported());
        assert!(loaded.tweets.is_empty());
    }

    #[test]
    fn test_shrinking_import_removes_stale_chunks() {
        let (kv, store) = memory_store();
        store.persist(&tweets(350)).unwrap();
        store.persist(&tweets(120)).unwrap();
        assert!(kv.get("bookmarked_tweets_2").unwrap().is_none());
        assert!(kv.get("bookmarked_tweets_3").unwrap().is_none());
        assert_eq!(store.load().unwrap().tweets.len(), 120);
        assert!(store.verify().unwrap().is_consistent());
    }

    #[test]
    fn test_missing_chunk_yields_partial_result() {
        let (kv, store) = memory_store();
        store.persist(&tweets(250)).unwrap();
        kv.remove("bookmarked_tweets_1").unwrap();
        kv.set("bookmarked_tweets_2", &json!("garbage")).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.missing_chunks, vec![1, 2]);
        assert_eq!(loaded.tweets.len(), 100);

        let report = store.verify().unwrap();
        assert!(!report.is_consistent());
    }

    #[test]
    fn test_failed_meta_write_keeps_previous_meta() {
        let (kv, store) = memory_store();
        store.persist(&tweets(150)).unwrap();
        kv.fail_writes_with_prefix(Some(META_KEY));

        assert!(store.persist(&tweets(30)).is_err());
        // Previous meta still describes two chunks; chunk 0 was overwritten.
        let loaded = store.load().unwrap();
        assert_eq!(loaded.meta.unwrap().total_chunks, 2);
        assert_eq!(loaded.tweets.len(), 80);
    }

    #[test]
    fn test_sqlite_round_trip_and_prefix_scan() {
        let kv = SqliteKv::open_memory().unwrap();
        kv.set("a_1", &json!({"x": 1})).unwrap();
        kv.set("a_2", &json!([1, 2])).unwrap();
        kv.set("b_1", &json!(null)).unwrap();
        assert_eq!(kv.get("a_1").unwrap(), Some(json!({"x": 1})));
        assert_eq!(kv.keys_with_prefix("a_").unwrap(), vec!["a_1", "a_2"]);
        kv.remove("a_1").unwrap();
        assert!(kv.get("a_1").unwrap().is_none());
        kv.remove("never-existed").unwrap();
    }

    #[test]
    fn test_sqlite_value_limit_rejects_whole_batch() {
        let kv = SqliteKv::open_memory().unwrap().with_value_limit(64);
        let entries = vec![
            ("small".to_string(), json!("ok")),
            ("big".to_string(), json!("x".repeat(200))),
        ];
        let err = kv.set_many(&entries).unwrap_err();
        assert!(matches!(err, XbmError::ValueTooLarge { .. }));
        assert!(kv.get("small").unwrap().is_none());
    }

    #[test]
    fn test_sqlite_on_disk_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("xbm.db");
        {
            let store = ChunkedStore::new(Arc::new(SqliteKv::open(&path).unwrap()));
            store.persist(&tweets(101)).unwrap();
        }
        let store = ChunkedStore::new(Arc::new(SqliteKv::open(&path).unwrap()));
        let loaded = store.load().unwrap();
        assert_eq!(loaded.tweets.len(), 101);
        assert_eq!(loaded.meta.unwrap().total_chunks, 2);
    }

    #[test]
    fn test_clear_removes_everything() {
        let (kv, store) = memory_store();
        store.persist(&tweets(10)).unwrap();
        store.clear().unwrap();
        assert!(kv.keys_with_prefix(CHUNK_KEY_PREFIX).unwrap().is_empty());
        assert!(!store.load().unwrap().is_imported());
    }
}
