//! xbm - X bookmark harvester with a local semantic index
//!
//! Harvests a signed-in user's bookmarks through the private GraphQL
//! endpoint, stores them locally in fixed-size chunks, and indexes them for
//! similarity search with either dense embeddings or TF-IDF vectors.
//!
//! # Modules
//!
//! - [`credentials`] - Session capture and the readiness signal
//! - [`crawler`] - Paged bookmark crawl with rate-limit backoff
//! - [`parser`] - Timeline entry normalization
//! - [`store`] - Key-value persistence and the chunked layout
//! - [`ingest`] - Single-flight import orchestration and events
//! - [`indexer`] - Incremental embedding with a per-post cache
//! - [`search`] - Similarity ranking, debouncing, and the search service
//! - [`stats`] - Collection summary

pub mod canonicalize;
pub mod cli;
pub mod config;
pub mod crawler;
pub mod credentials;
pub mod embedder;
pub mod error;
#[cfg(feature = "semantic")]
pub mod fast_embedder;
pub mod hash_embedder;
pub mod indexer;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod parser;
pub mod repl;
pub mod search;
pub mod stats;
pub mod store;
pub mod tfidf;

pub use config::Config;
pub use crawler::{BookmarkApi, BookmarkCrawler, CrawlConfig, HttpBookmarkApi, StopReason, YearFilter};
pub use credentials::{CredentialMonitor, CredentialProvider, StaticCredentials};
pub use embedder::Embedder;
pub use error::{Result, ResultExt, XbmError, format_error};
pub use hash_embedder::HashEmbedder;
pub use indexer::{EmbeddingIndexer, IndexReport};
pub use ingest::{ImportMode, IngestEvent, IngestReport, IngestionService};
pub use model::*;
pub use parser::TweetParser;
pub use search::{Debouncer, SearchResponse, SearchService, SimilaritySearch, Strategy};
pub use stats::WrappedStats;
pub use store::{ChunkedStore, KvStore, MemoryKv, SqliteKv};
pub use tfidf::TfIdfModel;

use chrono::{DateTime, Datelike, Utc};
use std::path::PathBuf;

/// Default database filename
pub const DEFAULT_DB_NAME: &str = "xbm.db";

/// Standard width for dividers in CLI output
pub const CONTENT_DIVIDER_WIDTH: usize = 60;

/// Platform data directory for xbm (models and the default database).
#[must_use]
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("xbm")
}

#[must_use]
pub fn default_db_path() -> PathBuf {
    default_data_dir().join(DEFAULT_DB_NAME)
}

/// Thousands separators: `12345` → `"12,345"`.
#[must_use]
pub fn format_count(value: usize) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Short relative form for recent times, calendar date otherwise.
#[must_use]
pub fn format_relative_date(dt: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(dt);
    if elapsed.num_seconds() < 0 {
        return dt.format("%b %d, %Y").to_string();
    }
    match (elapsed.num_minutes(), elapsed.num_hours(), elapsed.num_days()) {
        (m, _, _) if m < 1 => "just now".to_string(),
        (m, _, _) if m < 60 => format!("{m}m ago"),
        (_, h, _) if h < 24 => format!("{h}h ago"),
        (_, _, d) if d < 7 => format!("{d}d ago"),
        _ if dt.year() == now.year() => dt.format("%b %d").to_string(),
        _ => dt.format("%b %d, %Y").to_string(),
    }
}

/// `"unknown date"` for posts whose timestamp did not parse.
#[must_use]
pub fn format_post_date(value: Option<DateTime<Utc>>) -> String {
    value.map_or_else(
        || "unknown date".to_string(),
        |dt| format_relative_date(dt, Utc::now()),
    )
}

/// Human-readable byte count with one decimal.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut unit = 0;
    let mut scale = 1u64;
    while unit + 1 < UNITS.len() && bytes >= scale * 1024 {
        scale *= 1024;
        unit += 1;
    }
    if unit == 0 {
        return format!("{bytes} B");
    }
    let whole = bytes / scale;
    let tenths = (bytes % scale) * 10 / scale;
    format!("{whole}.{tenths} {}", UNITS[unit])
}
