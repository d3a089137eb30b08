//! Error types for xbm.
//!
//! Every failure surfaced by the ingestion pipeline, the local store, and the
//! semantic index is an [`XbmError`]. Only [`XbmError::RateLimited`] is
//! retried internally (by the crawler); everything else propagates.

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for xbm operations.
#[derive(Error, Debug)]
pub enum XbmError {
    // =========================================================================
    // Session / Credential Errors
    // =========================================================================
    /// Session credentials were not captured within the wait window.
    #[error("Session credentials not available after waiting {waited_ms} ms (missing: {missing})")]
    MissingCredentials { waited_ms: u64, missing: String },

    // =========================================================================
    // Remote API Errors
    // =========================================================================
    /// The bookmarks endpoint answered 429.
    #[error("Rate limited by the bookmarks API")]
    RateLimited,

    /// Non-success HTTP status other than 429.
    #[error("Bookmarks API returned HTTP {status}{}", body_excerpt(.body))]
    Http { status: u16, body: String },

    /// Transport-level failure talking to the API.
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    /// Chunk metadata and chunk records disagree.
    #[error("Stored bookmarks are inconsistent: {reason}")]
    PersistenceInconsistency { reason: String },

    /// A single stored value exceeds the backend's per-item quota.
    #[error("Value for '{key}' is {size} bytes, exceeding the {limit}-byte limit")]
    ValueTooLarge {
        key: String,
        size: usize,
        limit: usize,
    },

    /// Database schema version mismatch.
    #[error(
        "Database schema version mismatch: expected {expected}, found {found}. Remove the database and re-import."
    )]
    SchemaMismatch { expected: i32, found: i32 },

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON encode/decode failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // =========================================================================
    // Index Errors
    // =========================================================================
    /// The embedding model failed on a batch.
    #[error("Embedding failed: {reason}")]
    EmbeddingFailure { reason: String },

    /// An operation that allows a single run at a time is already running.
    #[error("{operation} is already in progress")]
    Busy { operation: &'static str },

    // =========================================================================
    // Configuration / CLI Errors
    // =========================================================================
    /// Configuration file parsing error.
    #[error("Invalid configuration in '{path}': {reason}")]
    Config { path: PathBuf, reason: String },

    /// Invalid command-line argument.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// Data not found.
    #[error("{item_type} with ID '{id}' not found")]
    NotFound { item_type: &'static str, id: String },

    /// File read/write error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    /// Catch-all for other errors with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Wrapped anyhow error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for xbm operations.
pub type Result<T> = std::result::Result<T, XbmError>;

fn body_excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let excerpt: String = trimmed.chars().take(160).collect();
    format!(": {excerpt}")
}

impl XbmError {
    /// Create an HTTP status error.
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self::Http {
            status,
            body: body.into(),
        }
    }

    /// Create a persistence inconsistency error.
    pub fn inconsistency(reason: impl Into<String>) -> Self {
        Self::PersistenceInconsistency {
            reason: reason.into(),
        }
    }

    /// Create an embedding failure.
    pub fn embedding(reason: impl Into<String>) -> Self {
        Self::EmbeddingFailure {
            reason: reason.into(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(item_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            item_type,
            id: id.into(),
        }
    }

    /// Wrap an error with additional context.
    pub fn with_context<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::WithContext {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Check if the failure means the captured session is no longer valid.
    #[must_use]
    pub const fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Http { status: 401 | 403, .. })
    }

    /// Get a suggestion for how to fix this error, if applicable.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            _ if self.is_auth_failure() => Some(
                "The captured session has expired. Reload x.com/i/bookmarks and capture it again.",
            ),
            Self::MissingCredentials { .. } => Some(
                "Capture a session with 'xbm auth import-har <file>' or 'xbm auth set', after opening your bookmarks on x.com.",
            ),
            Self::Http { status: 404, .. } => Some(
                "The Bookmarks endpoint id changed. Capture a fresh request with 'xbm auth import-har'.",
            ),
            Self::RateLimited => Some("Wait a minute and retry; the crawler backs off automatically."),
            Self::PersistenceInconsistency { .. } => {
                Some("Run 'xbm doctor' to inspect the store, then re-run 'xbm import'.")
            }
            Self::SchemaMismatch { .. } => Some("Delete the database file and run 'xbm import' again."),
            Self::Busy { .. } => Some("Wait for the running operation to finish."),
            Self::EmbeddingFailure { .. } => Some("Re-run 'xbm index'; failed batches are retried."),
            _ => None,
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped with additional context.
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily (only evaluated on error).
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped with additional context.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| XbmError::with_context(context, e))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| XbmError::with_context(f(), e))
    }
}

// =============================================================================
// CLI Error Formatting Utilities
// =============================================================================

use colored::Colorize;

/// Format a structured CLI error with explanation and suggestions.
#[must_use]
pub fn format_error(title: &str, explanation: &str, suggestions: &[&str]) -> String {
    use std::fmt::Write;

    let mut output = format!("{} {}", "✗".red().bold(), title.bold());

    if !explanation.is_empty() {
        let _ = write!(output, "\n\n   {explanation}");
    }

    match suggestions {
        [] => {}
        [only] => {
            let _ = write!(output, "\n\n   {} {only}", "Hint:".cyan());
        }
        many => {
            let _ = write!(output, "\n\n   {}:", "Try".cyan());
            for suggestion in many {
                let _ = write!(output, "\n     {} {suggestion}", "•".dimmed());
            }
        }
    }

    output
}

/// Render an [`XbmError`] for the terminal, including its hint if any.
#[must_use]
pub fn format_xbm_error(err: &XbmError) -> String {
    let hints: Vec<&str> = err.suggestion().into_iter().collect();
    format_error(&err.to_string(), "", &hints)
}

/// Levenshtein edit distance, used for "did you mean?" hints.
#[must_use]
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a_chars.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}

/// Find the closest candidate within edit distance 2 (exact matches excluded).
#[must_use]
pub fn find_closest_match<'a>(input: &str, candidates: &[&'a str]) -> Option<&'a str> {
    let input = input.to_lowercase();
    candidates
        .iter()
        .map(|&c| (c, levenshtein_distance(&input, &c.to_lowercase())))
        .filter(|&(_, d)| d > 0 && d <= 2)
        .min_by_key(|&(_, d)| d)
        .map(|(c, _)| c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_display_includes_status_and_excerpt() {
        let err = XbmError::http(403, "  {\"errors\":[{\"message\":\"Forbidden\"}]}  ");
        let text = err.to_string();
        assert!(text.contains("HTTP 403"));
        assert!(text.contains("Forbidden"));
        assert!(err.is_auth_failure());
    }

    #[test]
    fn test_http_error_without_body() {
        let err = XbmError::http(500, "");
        assert_eq!(err.to_string(), "Bookmarks API returned HTTP 500");
        assert!(!err.is_auth_failure());
        assert!(err.suggestion().is_none());
    }

    #[test]
    fn test_missing_credentials_has_suggestion() {
        let err = XbmError::MissingCredentials {
            waited_ms: 5000,
            missing: "cookie".into(),
        };
        assert!(err.to_string().contains("5000 ms"));
        assert!(err.suggestion().is_some());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: XbmError = io_err.into();
        assert!(matches!(err, XbmError::Io(_)));
    }

    #[test]
    fn test_from_rusqlite_error() {
        let err: XbmError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, XbmError::Database(_)));
    }

    #[test]
    fn test_result_ext_wraps_context() {
        let res: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::other("disk gone"));
        let err = res.context("writing chunk").unwrap_err();
        assert_eq!(err.to_string(), "writing chunk: disk gone");
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein_distance("dense", "dense"), 0);
        assert_eq!(levenshtein_distance("dense", "dens"), 1);
        assert_eq!(levenshtein_distance("", "abc"), 3);
    }

    #[test]
    fn closest_match_skips_exact_and_far() {
        let options = ["dense", "sparse"];
        assert_eq!(find_closest_match("spars", &options), Some("sparse"));
        assert_eq!(find_closest_match("dense", &options), None);
        assert_eq!(find_closest_match("zzzzzz", &options), None);
    }

    #[test]
    fn format_error_variants() {
        let single = format_error("Title", "Body", &["Only hint"]);
        assert!(single.contains("Only hint"));
        let many = format_error("Title", "", &["one", "two"]);
        assert!(many.contains("one") && many.contains("two"));
    }

    #[test]
    fn auth_failures_suggest_recapture() {
        for status in [401, 403] {
            let hint = XbmError::http(status, "").suggestion().unwrap();
            assert!(hint.contains("capture it again"));
        }
        let hint = XbmError::http(404, "").suggestion().unwrap();
        assert!(hint.contains("endpoint id changed"));
    }
}
