//! CLI definitions for xbm.
//!
//! Uses clap for argument parsing with derive macros.

use crate::search::Strategy;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// xbm - X bookmark harvester with local semantic search
#[derive(Parser, Debug)]
#[command(name = "xbm")]
#[command(version)]
#[command(about = "Harvest your X bookmarks and search them locally")]
#[command(long_about = r#"
xbm pulls your X (Twitter) bookmarks through the same private API the web
app uses, stores them in a local SQLite database, and indexes them for
similarity search.

Quick start:
  1. Copy a Bookmarks request from your browser's network panel:
       xbm auth observe '<request url>' -H 'cookie: …' -H 'x-csrf-token: …' -H 'authorization: …'
     or export the session as HAR and run: xbm auth import-har session.har
  2. Import this year's bookmarks: xbm import
  3. Search them: xbm search "borrow checker"
"#)]
pub struct Cli {
    /// Path to the database file
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Output format (defaults to the configured format)
    #[arg(long, short = 'f', global = true)]
    pub format: Option<OutputFormat>,

    /// More diagnostic output (-v debug, -vv trace)
    #[arg(long, short = 'v', global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Suppress progress and informational output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Capture or inspect session credentials
    #[command(subcommand)]
    Auth(AuthCommand),

    /// Crawl bookmarks and store them locally
    Import(ImportArgs),

    /// Attach vectors to stored bookmarks
    Index(IndexArgs),

    /// Search stored bookmarks by similarity
    Search(SearchArgs),

    /// List stored bookmarks in feed order
    List(ListArgs),

    /// Show one stored bookmark
    Show(ShowArgs),

    /// Summarize the collection
    Stats,

    /// Check stored data for consistency
    Doctor,

    /// Interactive search shell
    Repl,

    /// Show or initialize configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Subcommand, Debug)]
pub enum AuthCommand {
    /// Record credentials from a captured Bookmarks request
    Observe(ObserveArgs),

    /// Replay every request in a HAR export through the credential monitor
    ImportHar(ImportHarArgs),

    /// Set credentials directly
    Set(SetAuthArgs),

    /// Show which credential fields are captured
    Show,

    /// Forget stored credentials
    Clear,
}

#[derive(Args, Debug)]
pub struct ObserveArgs {
    /// Full request URL, including the `features` query parameter
    pub url: String,

    /// Request header as 'Name: value' (repeatable)
    #[arg(long = "header", short = 'H', value_name = "HEADER")]
    pub headers: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ImportHarArgs {
    /// HAR file exported from the browser
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct SetAuthArgs {
    #[arg(long)]
    pub cookie: Option<String>,

    #[arg(long)]
    pub csrf_token: Option<String>,

    /// Full `Authorization` header value (`Bearer …`)
    #[arg(long)]
    pub authorization: Option<String>,

    /// GraphQL operation id of the Bookmarks endpoint
    #[arg(long)]
    pub endpoint_id: Option<String>,

    /// JSON object of feature flags sent with every request
    #[arg(long, default_value = "{}")]
    pub features: String,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Keep posts from this year (default: current year)
    #[arg(long, conflicts_with = "all_years")]
    pub year: Option<i32>,

    /// Keep posts from every year
    #[arg(long)]
    pub all_years: bool,

    /// Resume from a cursor printed by an earlier run
    #[arg(long)]
    pub cursor: Option<String>,

    /// Stop after this many pages
    #[arg(long)]
    pub max_pages: Option<usize>,

    /// How to combine with already stored posts
    #[arg(long)]
    pub mode: Option<ImportModeArg>,

    /// Skip indexing after the import
    #[arg(long)]
    pub no_index: bool,
}

#[derive(Args, Debug)]
pub struct IndexArgs {
    /// Indexing strategy (defaults to the configured strategy)
    #[arg(long, short = 's')]
    pub strategy: Option<Strategy>,

    /// Ignore cached vectors and re-embed everything
    #[arg(long, short = 'F')]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Search query
    pub query: String,

    /// Strategy to search with (defaults to the configured strategy)
    #[arg(long, short = 's')]
    pub strategy: Option<Strategy>,

    /// Maximum number of results
    #[arg(long, short = 'n')]
    pub limit: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Limit number of items
    #[arg(long, short = 'n', default_value = "20")]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Entry id (`tweet-…`) or numeric status id
    pub id: String,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Print the effective configuration
    #[arg(long)]
    pub show: bool,

    /// Write a default config file if none exists
    #[arg(long, conflicts_with = "show")]
    pub init: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    JsonPretty,
    Compact,
}

impl OutputFormat {
    /// Parse a configured format name, falling back to text.
    #[must_use]
    pub fn from_config(value: &str) -> Self {
        <Self as ValueEnum>::from_str(value, true).unwrap_or_default()
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImportModeArg {
    Replace,
    Merge,
}

impl From<ImportModeArg> for crate::ingest::ImportMode {
    fn from(value: ImportModeArg) -> Self {
        match value {
            ImportModeArg::Replace => Self::Replace,
            ImportModeArg::Merge => Self::Merge,
        }
    }
}

/// Split a `Name: value` header argument.
#[must_use]
pub fn parse_header(raw: &str) -> Option<(String, String)> {
    let (name, value) = raw.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}
