//! Configuration for xbm.
//!
//! Layered, lowest to highest priority:
//!
//! 1. **Compiled defaults**
//! 2. **User config file** - `~/.config/xbm/config.toml`
//! 3. **Environment variables** - `XBM_*` prefix
//! 4. **CLI arguments** - applied by the binary on top of the result
//!
//! # Example Configuration File
//!
//! ```toml
//! [paths]
//! db = "~/.local/share/xbm/xbm.db"
//!
//! [crawl]
//! all_years = false
//! page_size = 100
//! rate_limit_cooldown_secs = 60
//!
//! [index]
//! strategy = "dense"
//!
//! [search]
//! min_score = 0.3
//! dense_limit = 10
//!
//! [ingest]
//! import_mode = "replace"
//!
//! [output]
//! format = "text"
//! colors = true
//! ```

use crate::crawler::{CrawlConfig, DEFAULT_API_ROOT, YearFilter};
use crate::error::{Result, XbmError};
use crate::ingest::ImportMode;
use crate::search::{
    DEBOUNCE_DELAY, DENSE_LIMIT, DENSE_MIN_SCORE, ResultLimits, SPARSE_LIMIT, SimilaritySearch,
    Strategy,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub crawl: CrawlSettings,
    pub index: IndexSettings,
    pub search: SearchSettings,
    pub ingest: IngestSettings,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// `SQLite` database holding bookmarks, vectors, and credentials.
    /// Environment variable: `XBM_DB`
    pub db: Option<PathBuf>,
}

/// Crawl behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlSettings {
    /// Environment variable: `XBM_API_ROOT`
    pub api_root: String,
    /// Year to keep; unset means the current year.
    /// Environment variable: `XBM_YEAR`
    pub target_year: Option<i32>,
    /// Keep every post regardless of year.
    /// Environment variable: `XBM_ALL_YEARS`
    pub all_years: bool,
    pub page_size: usize,
    pub max_consecutive_misses: usize,
    pub rate_limit_cooldown_secs: u64,
    pub page_delay_ms: u64,
    /// Environment variable: `XBM_MAX_PAGES`
    pub max_pages: Option<usize>,
    /// How long to wait for captured credentials before giving up.
    pub credential_timeout_ms: u64,
}

/// Indexing behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// Environment variable: `XBM_STRATEGY`
    pub strategy: Strategy,
    /// Model for dense indexing: `hash` or a fastembed model name
    /// (requires the `semantic` feature).
    /// Environment variable: `XBM_MODEL`
    pub model: String,
    /// Dimension of the hash embedder.
    pub dimension: usize,
    pub batch_size: usize,
}

/// Search behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Dense results below this score are hidden.
    /// Environment variable: `XBM_MIN_SCORE`
    pub min_score: f32,
    /// Environment variable: `XBM_LIMIT` (sets both limits)
    pub dense_limit: usize,
    pub sparse_limit: usize,
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Environment variable: `XBM_IMPORT_MODE`
    pub import_mode: ImportMode,
    /// Rebuild the index after a successful import.
    pub index_after_import: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Default output format: text, json, json-pretty, compact.
    /// Environment variable: `XBM_FORMAT`
    pub format: String,
    /// Disabled by `XBM_NO_COLOR` or `NO_COLOR`.
    pub colors: bool,
    /// Suppress progress bars and informational messages.
    /// Environment variable: `XBM_QUIET`
    pub quiet: bool,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            api_root: DEFAULT_API_ROOT.to_string(),
            target_year: None,
            all_years: false,
            page_size: 100,
            max_consecutive_misses: 10,
            rate_limit_cooldown_secs: 60,
            page_delay_ms: 1000,
            max_pages: None,
            credential_timeout_ms: 5000,
        }
    }
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            strategy: Strategy::Dense,
            model: "hash".to_string(),
            dimension: crate::hash_embedder::DEFAULT_DIMENSION,
            batch_size: crate::indexer::DEFAULT_BATCH_SIZE,
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            min_score: DENSE_MIN_SCORE,
            dense_limit: DENSE_LIMIT,
            sparse_limit: SPARSE_LIMIT,
            debounce_ms: u64::try_from(DEBOUNCE_DELAY.as_millis()).unwrap_or(300),
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            import_mode: ImportMode::Replace,
            index_after_import: true,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: "text".to_string(),
            colors: true,
            quiet: false,
        }
    }
}

impl CrawlSettings {
    #[must_use]
    pub fn year_filter(&self) -> YearFilter {
        if self.all_years {
            YearFilter::Any
        } else {
            self.target_year
                .map_or_else(YearFilter::current_year, YearFilter::Year)
        }
    }

    #[must_use]
    pub fn to_crawl_config(&self) -> CrawlConfig {
        CrawlConfig {
            page_size: self.page_size.max(1),
            year_filter: self.year_filter(),
            max_consecutive_misses: self.max_consecutive_misses,
            rate_limit_cooldown: Duration::from_secs(self.rate_limit_cooldown_secs),
            page_delay: Duration::from_millis(self.page_delay_ms),
            max_pages: self.max_pages,
        }
    }

    #[must_use]
    pub const fn credential_timeout(&self) -> Duration {
        Duration::from_millis(self.credential_timeout_ms)
    }
}

impl SearchSettings {
    #[must_use]
    pub const fn engine(&self) -> SimilaritySearch {
        SimilaritySearch {
            dense: ResultLimits {
                min_score: self.min_score,
                limit: self.dense_limit,
            },
            sparse: ResultLimits {
                min_score: 0.0,
                limit: self.sparse_limit,
            },
        }
    }

    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Config {
    /// Load configuration from defaults, the user config file, and the
    /// process environment.
    #[must_use]
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(path) = Self::user_config_path() {
            match Self::load_from_file(&path) {
                Ok(Some(user)) => config.merge(user),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Ignoring user config"),
            }
        }

        config.apply_env_overrides(|key| std::env::var(key).ok());

        debug!(?config, "Configuration loaded");
        config
    }

    /// Read a config file. A missing file is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`XbmError::Config`] if the file exists but cannot be read or
    /// parsed.
    pub fn load_from_file(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found");
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(|e| XbmError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config = toml::from_str(&content).map_err(|e| XbmError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        info!(path = %path.display(), "Loaded config");
        Ok(Some(config))
    }

    #[must_use]
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("xbm").join("config.toml"))
    }

    /// Apply `XBM_*` overrides using `lookup` to read variables.
    /// Unparseable values are logged and ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Option<T> {
            let raw = raw?;
            let value = raw.trim().parse().ok();
            if value.is_none() {
                warn!(key, value = %raw, "Ignoring unparseable environment override");
            }
            value
        }
        let flag = |key: &str| {
            lookup(key).is_some_and(|v| !matches!(v.trim(), "" | "0" | "false" | "no"))
        };

        if let Some(db) = lookup("XBM_DB") {
            self.paths.db = Some(PathBuf::from(db));
        }

        if let Some(root) = lookup("XBM_API_ROOT") {
            self.crawl.api_root = root;
        }
        if let Some(year) = parsed("XBM_YEAR", lookup("XBM_YEAR")) {
            self.crawl.target_year = Some(year);
        }
        if flag("XBM_ALL_YEARS") {
            self.crawl.all_years = true;
        }
        if let Some(n) = parsed("XBM_PAGE_SIZE", lookup("XBM_PAGE_SIZE")) {
            self.crawl.page_size = n;
        }
        if let Some(n) = parsed("XBM_MAX_PAGES", lookup("XBM_MAX_PAGES")) {
            self.crawl.max_pages = Some(n);
        }
        if let Some(n) = parsed("XBM_RATE_LIMIT_COOLDOWN_SECS", lookup("XBM_RATE_LIMIT_COOLDOWN_SECS")) {
            self.crawl.rate_limit_cooldown_secs = n;
        }
        if let Some(n) = parsed("XBM_PAGE_DELAY_MS", lookup("XBM_PAGE_DELAY_MS")) {
            self.crawl.page_delay_ms = n;
        }

        if let Some(strategy) = parsed("XBM_STRATEGY", lookup("XBM_STRATEGY")) {
            self.index.strategy = strategy;
        }
        if let Some(model) = lookup("XBM_MODEL") {
            self.index.model = model;
        }

        if let Some(score) = parsed("XBM_MIN_SCORE", lookup("XBM_MIN_SCORE")) {
            self.search.min_score = score;
        }
        if let Some(n) = parsed("XBM_LIMIT", lookup("XBM_LIMIT")) {
            self.search.dense_limit = n;
            self.search.sparse_limit = n;
        }

        if let Some(mode) = parsed("XBM_IMPORT_MODE", lookup("XBM_IMPORT_MODE")) {
            self.ingest.import_mode = mode;
        }

        if let Some(format) = lookup("XBM_FORMAT") {
            self.output.format = format;
        }
        if lookup("XBM_NO_COLOR").is_some() || lookup("NO_COLOR").is_some() {
            self.output.colors = false;
        }
        if flag("XBM_QUIET") {
            self.output.quiet = true;
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Self) {
        if other.paths.db.is_some() {
            self.paths.db = other.paths.db;
        }
        self.crawl = other.crawl;
        self.index = other.index;
        self.search = other.search;
        self.ingest = other.ingest;
        self.output = other.output;
    }

    /// Database path, falling back to the platform data directory.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.paths
            .db
            .clone()
            .unwrap_or_else(crate::default_db_path)
    }

    /// TOML text of the default configuration, with a header explaining
    /// how to switch dense indexing to a learned model.
    #[must_use]
    pub fn default_config_content() -> String {
        let body = toml::to_string_pretty(&Self::default()).unwrap_or_default();
        format!("{CONFIG_TEMPLATE_HEADER}\n{body}")
    }

    /// Write [`Self::default_config_content`] to `path`, creating parent
    /// directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, Self::default_config_content())?;
        info!(path = %path.display(), "Wrote config template");
        Ok(())
    }
}

const CONFIG_TEMPLATE_HEADER: &str = "\
# xbm configuration
#
# Dense indexing defaults to the built-in `hash` embedder, which matches
# shared words rather than meaning. For semantic search, install with
# `cargo install xbm --features semantic` and set:
#
#   [index]
#   model = \"all-minilm-l6-v2\"
#
# Other models: bge-small-en-v1.5, bge-base-en-v1.5. Run `xbm index`
# again after changing the model.
";

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.search.dense_limit, 10);
        assert_eq!(config.search.sparse_limit, 50);
        assert!((config.search.min_score - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.crawl.page_size, 100);
        assert_eq!(config.ingest.import_mode, ImportMode::Replace);
        assert_eq!(config.index.strategy, Strategy::Dense);
        assert!(config.output.colors);
    }

    #[test]
    fn test_config_roundtrips_through_toml() {
        let mut config = Config::default();
        config.crawl.target_year = Some(2023);
        config.index.strategy = Strategy::Sparse;
        let text = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.crawl.target_year, Some(2023));
        assert_eq!(parsed.index.strategy, Strategy::Sparse);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: Config = toml::from_str("[ingest]\nimport_mode = \"merge\"\n").unwrap();
        assert_eq!(parsed.ingest.import_mode, ImportMode::Merge);
        assert_eq!(parsed.crawl.max_consecutive_misses, 10);
        assert!(parsed.ingest.index_after_import);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_overrides(env(&[
            ("XBM_DB", "/tmp/x.db"),
            ("XBM_ALL_YEARS", "1"),
            ("XBM_STRATEGY", "sparse"),
            ("XBM_LIMIT", "7"),
            ("XBM_IMPORT_MODE", "merge"),
            ("NO_COLOR", ""),
        ]));
        assert_eq!(config.db_path(), PathBuf::from("/tmp/x.db"));
        assert_eq!(config.crawl.year_filter(), YearFilter::Any);
        assert_eq!(config.index.strategy, Strategy::Sparse);
        assert_eq!(config.search.dense_limit, 7);
        assert_eq!(config.search.sparse_limit, 7);
        assert_eq!(config.ingest.import_mode, ImportMode::Merge);
        assert!(!config.output.colors);
    }

    #[test]
    fn test_bad_env_values_are_ignored() {
        let mut config = Config::default();
        config.apply_env_overrides(env(&[
            ("XBM_PAGE_SIZE", "lots"),
            ("XBM_STRATEGY", "psychic"),
            ("XBM_ALL_YEARS", "false"),
        ]));
        assert_eq!(config.crawl.page_size, 100);
        assert_eq!(config.index.strategy, Strategy::Dense);
        assert!(!config.crawl.all_years);
    }

    #[test]
    fn test_year_filter_and_crawl_config() {
        let mut crawl = CrawlSettings {
            target_year: Some(2022),
            ..CrawlSettings::default()
        };
        assert_eq!(crawl.year_filter(), YearFilter::Year(2022));
        crawl.all_years = true;
        crawl.rate_limit_cooldown_secs = 5;
        let cfg = crawl.to_crawl_config();
        assert_eq!(cfg.year_filter, YearFilter::Any);
        assert_eq!(cfg.rate_limit_cooldown, Duration::from_secs(5));
    }

    #[test]
    fn test_merge_prefers_other() {
        let mut base = Config::default();
        let mut other = Config::default();
        other.search.dense_limit = 25;
        other.paths.db = Some(PathBuf::from("/custom/path"));
        base.merge(other);
        assert_eq!(base.search.dense_limit, 25);
        assert_eq!(base.paths.db, Some(PathBuf::from("/custom/path")));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert!(Config::load_from_file(&path).unwrap().is_none());

        let mut config = Config::default();
        config.search.sparse_limit = 3;
        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();
        let loaded = Config::load_from_file(&path).unwrap().unwrap();
        assert_eq!(loaded.search.sparse_limit, 3);

        std::fs::write(&path, "[search\nbroken").unwrap();
        assert!(matches!(
            Config::load_from_file(&path),
            Err(XbmError::Config { .. })
        ));
    }

    #[test]
    fn test_default_config_content() {
        let content = Config::default_config_content();
        for section in ["[crawl]", "[index]", "[search]", "[ingest]", "[output]"] {
            assert!(content.contains(section), "missing {section}");
        }
        assert!(content.contains("--features semantic"));
        assert!(content.contains("#   model = \"all-minilm-l6-v2\""));
    }

    #[test]
    fn test_write_template_parses_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested/config.toml");
        Config::write_template(&path).unwrap();
        let loaded = Config::load_from_file(&path).unwrap().unwrap();
        assert_eq!(loaded.index.model, "hash");
        assert!(std::fs::read_to_string(&path).unwrap().starts_with("# xbm configuration"));
    }
}
