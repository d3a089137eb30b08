//! xbm - X bookmark harvester with local semantic search
//!
//! Main entry point for the xbm command-line tool.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use xbm::cli::{
    AuthCommand, Cli, Commands, ConfigArgs, ImportArgs, IndexArgs, ListArgs, OutputFormat,
    SearchArgs, ShowArgs, parse_header,
};
use xbm::embedder::load_embedder;
use xbm::error::format_xbm_error;
use xbm::indexer::index_sparse;
use xbm::logging::init_cli_logging;
use xbm::stats::{month_name, sparkline};
use xbm::store::StoreReport;
use xbm::*;

struct App {
    config: Config,
    format: OutputFormat,
}

impl App {
    const fn quiet(&self) -> bool {
        self.config.output.quiet
    }

    const fn json(&self) -> bool {
        matches!(self.format, OutputFormat::Json | OutputFormat::JsonPretty)
    }

    fn open_kv(&self) -> Result<Arc<dyn KvStore>> {
        Ok(Arc::new(self.open_sqlite()?))
    }

    fn open_sqlite(&self) -> Result<SqliteKv> {
        let path = self.config.db_path();
        debug!(path = %path.display(), "Opening database");
        Ok(SqliteKv::open(&path)?)
    }

    fn print_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let text = if self.format == OutputFormat::JsonPretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        println!("{text}");
        Ok(())
    }

    fn spinner(&self, message: impl Into<String>) -> Result<ProgressBar> {
        if self.quiet() || self.json() {
            return Ok(ProgressBar::hidden());
        }
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?,
        );
        pb.set_message(message.into());
        pb.enable_steady_tick(Duration::from_millis(120));
        Ok(pb)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load();
    if let Some(db) = &cli.db {
        config.paths.db = Some(db.clone());
    }
    if cli.quiet {
        config.output.quiet = true;
    }
    if !config.output.colors {
        colored::control::set_override(false);
    }
    init_cli_logging(config.output.quiet, cli.verbose, config.output.colors);

    let format = cli
        .format
        .unwrap_or_else(|| OutputFormat::from_config(&config.output.format));
    let app = App { config, format };

    match run(&app, &cli.command).await {
        Ok(()) => Ok(()),
        Err(e) => match e.downcast_ref::<XbmError>() {
            Some(err) => {
                eprintln!("{}", format_xbm_error(err));
                std::process::exit(1);
            }
            None => Err(e),
        },
    }
}

async fn run(app: &App, command: &Commands) -> Result<()> {
    match command {
        Commands::Auth(cmd) => cmd_auth(app, cmd),
        Commands::Import(args) => cmd_import(app, args).await,
        Commands::Index(args) => cmd_index(app, args),
        Commands::Search(args) => cmd_search(app, args),
        Commands::List(args) => cmd_list(app, args),
        Commands::Show(args) => cmd_show(app, args),
        Commands::Stats => cmd_stats(app),
        Commands::Doctor => cmd_doctor(app),
        Commands::Repl => cmd_repl(app),
        Commands::Config(args) => cmd_config(app, args),
        Commands::Completions(args) => {
            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "xbm", &mut io::stdout());
            Ok(())
        }
    }
}

// =============================================================================
// auth
// =============================================================================

fn cmd_auth(app: &App, cmd: &AuthCommand) -> Result<()> {
    let monitor = CredentialMonitor::with_store(app.open_kv()?)?;

    match cmd {
        AuthCommand::Observe(args) => {
            let headers = args
                .headers
                .iter()
                .map(|raw| {
                    parse_header(raw).ok_or_else(|| {
                        XbmError::invalid_argument(format!("header '{raw}' is not 'Name: value'"))
                    })
                })
                .collect::<xbm::Result<Vec<_>>>()?;
            if !monitor.observe_request(&args.url, headers) {
                println!(
                    "{} Nothing captured: the request is not an X Bookmarks call or carries no session headers",
                    "!".yellow()
                );
            }
        }
        AuthCommand::ImportHar(args) => {
            let raw = Context::with_context(std::fs::read_to_string(&args.file), || {
                format!("reading {}", args.file.display())
            })?;
            let har: serde_json::Value = serde_json::from_str(&raw)
                .map_err(|e| XbmError::with_context("HAR file is not valid JSON", e))?;
            let captured = monitor.observe_har(&har)?;
            if !app.quiet() {
                println!("Captured credentials from {captured} request(s)");
            }
        }
        AuthCommand::Set(args) => {
            let mut changed = false;
            match (&args.cookie, &args.csrf_token, &args.authorization) {
                (Some(cookie), Some(csrf), Some(auth)) => {
                    monitor.set_session(cookie, csrf, auth);
                    changed = true;
                }
                (None, None, None) => {}
                _ => {
                    return Err(XbmError::invalid_argument(
                        "--cookie, --csrf-token and --authorization must be given together",
                    )
                    .into());
                }
            }
            if let Some(endpoint) = &args.endpoint_id {
                let features: serde_json::Value = serde_json::from_str(&args.features)
                    .map_err(|e| XbmError::invalid_argument(format!("--features: {e}")))?;
                monitor.set_endpoint(endpoint, features);
                changed = true;
            }
            if !changed {
                return Err(XbmError::invalid_argument("nothing to set").into());
            }
        }
        AuthCommand::Show => {}
        AuthCommand::Clear => {
            monitor.clear();
            if !app.quiet() {
                println!("{} Credentials cleared", "✓".green());
            }
            return Ok(());
        }
    }

    print_credential_status(app, &monitor.snapshot())
}

fn print_credential_status(app: &App, creds: &PartialCredentials) -> Result<()> {
    let missing = creds.missing();

    if app.json() {
        #[derive(Serialize)]
        struct Status<'a> {
            ready: bool,
            missing: &'a [&'static str],
        }
        return app.print_json(&Status {
            ready: missing.is_empty(),
            missing: &missing,
        });
    }

    let fields = [
        ("cookie", creds.cookie.is_some()),
        ("csrf_token", creds.csrf_token.is_some()),
        ("authorization", creds.authorization.is_some()),
        ("api_endpoint_id", creds.api_endpoint_id.is_some()),
        ("features", creds.features.is_some()),
    ];
    println!("{}", "Session credentials".bold().cyan());
    for (name, present) in fields {
        let mark = if present { "✓".green() } else { "✗".red() };
        println!("  {mark} {name}");
    }
    if missing.is_empty() {
        println!("\n{} Ready to import", "✓".green());
    } else {
        println!("\n{} Missing: {}", "!".yellow(), missing.join(", "));
    }
    Ok(())
}

// =============================================================================
// import / index
// =============================================================================

async fn cmd_import(app: &App, args: &ImportArgs) -> Result<()> {
    let kv = app.open_kv()?;

    let mut crawl = app.config.crawl.clone();
    if let Some(year) = args.year {
        crawl.target_year = Some(year);
        crawl.all_years = false;
    }
    if args.all_years {
        crawl.all_years = true;
    }
    if args.max_pages.is_some() {
        crawl.max_pages = args.max_pages;
    }
    let mode = args.mode.map_or(app.config.ingest.import_mode, Into::into);

    let monitor = Arc::new(CredentialMonitor::with_store(kv.clone())?);
    let api = HttpBookmarkApi::new().with_api_root(crawl.api_root.clone());
    let crawler = BookmarkCrawler::new(Arc::new(api), crawl.to_crawl_config());
    let service = IngestionService::new(crawler, monitor, ChunkedStore::new(kv.clone()))
        .with_credential_timeout(crawl.credential_timeout())
        .with_mode(mode);

    let pb = app.spinner("Waiting for credentials...")?;
    let mut events = service.subscribe();
    let progress_pb = pb.clone();
    let progress = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(IngestEvent::Started) => progress_pb.set_message("Fetching bookmarks..."),
                Ok(IngestEvent::Progress(p)) => progress_pb.set_message(format!(
                    "Page {}: {} kept of {} parsed{}",
                    p.pages,
                    format_count(p.kept),
                    format_count(p.parsed),
                    if p.rate_limit_retries > 0 {
                        format!(" ({} rate-limit waits)", p.rate_limit_retries)
                    } else {
                        String::new()
                    }
                )),
                Ok(IngestEvent::Complete { .. } | IngestEvent::Failed { .. })
                | Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Progress events lagged"),
            }
        }
    });

    let result = service.start_ingestion_from(args.cursor.clone()).await;
    drop(service);
    let _ = progress.await;
    pb.finish_and_clear();
    let report = result?;

    if app.json() {
        app.print_json(&report)?;
    } else if !app.quiet() {
        println!(
            "{} Imported {} bookmarks ({} stored, {} mode)",
            "✓".green(),
            format_count(report.fetched).cyan(),
            format_count(report.stored),
            report.mode
        );
        println!(
            "  {} pages, {} posts parsed, stopped because it {}",
            report.pages, report.parsed, report.stop_reason
        );
        if report.rate_limit_retries > 0 {
            println!("  Waited out {} rate limit(s)", report.rate_limit_retries);
        }
        if let Some(cursor) = &report.next_cursor {
            println!("  Resume with: xbm import --cursor '{cursor}'");
        }
    }

    if args.no_index || !app.config.ingest.index_after_import || report.stored == 0 {
        return Ok(());
    }

    let mut tweets = load_tweets(&kv)?;
    let strategy = app.config.index.strategy;
    index_collection(app, &kv, &mut tweets, strategy, false)
}

fn cmd_index(app: &App, args: &IndexArgs) -> Result<()> {
    let kv = app.open_kv()?;
    let mut tweets = load_tweets(&kv)?;
    if tweets.is_empty() {
        println!("No bookmarks stored yet. Run `xbm import` first.");
        return Ok(());
    }
    let strategy = args.strategy.unwrap_or(app.config.index.strategy);
    index_collection(app, &kv, &mut tweets, strategy, args.force)
}

/// Attach vectors for `strategy` and write the collection back.
fn index_collection(
    app: &App,
    kv: &Arc<dyn KvStore>,
    tweets: &mut [Tweet],
    strategy: Strategy,
    force: bool,
) -> Result<()> {
    let pb = app.spinner(format!(
        "Indexing {} bookmarks ({strategy})...",
        format_count(tweets.len())
    ))?;

    let report = match strategy {
        Strategy::Dense => {
            let embedder = load_dense_embedder(app)?;
            let indexer = EmbeddingIndexer::new(embedder, kv.clone())
                .with_batch_size(app.config.index.batch_size);
            let report = if force {
                indexer.reindex(tweets)?
            } else {
                indexer.index(tweets)?
            };
            Some(report)
        }
        Strategy::Sparse => {
            let model = index_sparse(tweets);
            info!(terms = model.vocabulary_size(), "Sparse vectors attached");
            None
        }
    };

    ChunkedStore::new(kv.clone()).persist(tweets)?;
    pb.finish_and_clear();

    if app.json() {
        #[derive(Serialize)]
        struct Summary<'a> {
            strategy: Strategy,
            posts: usize,
            #[serde(skip_serializing_if = "Option::is_none")]
            dense: Option<&'a IndexReport>,
        }
        return app.print_json(&Summary {
            strategy,
            posts: tweets.len(),
            dense: report.as_ref(),
        });
    }
    if app.quiet() {
        return Ok(());
    }

    match report {
        Some(r) => {
            println!(
                "{} Indexed {} bookmarks with {} ({} cached, {} embedded in {} batches)",
                "✓".green(),
                format_count(r.total()).cyan(),
                r.model,
                r.cached,
                r.computed,
                r.batches
            );
            if r.failed > 0 {
                println!(
                    "  {} {} bookmarks could not be embedded; they stay out of dense results",
                    "!".yellow(),
                    r.failed
                );
            }
        }
        None => println!(
            "{} Indexed {} bookmarks with TF-IDF",
            "✓".green(),
            format_count(tweets.len()).cyan()
        ),
    }
    Ok(())
}

fn load_dense_embedder(app: &App) -> Result<Arc<dyn Embedder>> {
    let cache_dir = default_data_dir().join("models");
    Ok(load_embedder(
        &app.config.index.model,
        app.config.index.dimension,
        &cache_dir,
    )?)
}

fn load_tweets(kv: &Arc<dyn KvStore>) -> Result<Vec<Tweet>> {
    let outcome = ChunkedStore::new(kv.clone()).load()?;
    if !outcome.missing_chunks.is_empty() {
        warn!(missing = ?outcome.missing_chunks, "Stored bookmarks are incomplete");
        eprintln!(
            "{} {} chunk(s) are missing; run `xbm doctor`",
            "!".yellow(),
            outcome.missing_chunks.len()
        );
    }
    Ok(outcome.tweets)
}

// =============================================================================
// search / browse
// =============================================================================

fn search_service(app: &App, strategy: Strategy, limit: Option<usize>) -> Result<SearchService> {
    let kv = app.open_kv()?;
    let tweets = load_tweets(&kv)?;
    let service = match strategy {
        Strategy::Dense => SearchService::dense(tweets, load_dense_embedder(app)?),
        Strategy::Sparse => SearchService::sparse(tweets),
    };
    let engine = match limit {
        Some(n) => app.config.search.engine().with_limit(n),
        None => app.config.search.engine(),
    };
    Ok(service
        .with_engine(engine)
        .with_debounce(app.config.search.debounce()))
}

fn cmd_search(app: &App, args: &SearchArgs) -> Result<()> {
    let strategy = args.strategy.unwrap_or(app.config.index.strategy);
    let service = search_service(app, strategy, args.limit)?;

    if service.corpus().is_empty() && !app.json() {
        println!("No bookmarks stored yet. Run `xbm import` first.");
        return Ok(());
    }

    let response = service.search(&args.query);

    match app.format {
        OutputFormat::Json | OutputFormat::JsonPretty => {
            let hits: Vec<PostView<'_>> = response
                .hits
                .iter()
                .map(|h| PostView::new(&h.tweet, Some(h.score)))
                .collect();
            #[derive(Serialize)]
            struct Output<'a> {
                query: &'a str,
                strategy: Strategy,
                status: Option<&'a str>,
                elapsed_ms: u64,
                hits: Vec<PostView<'a>>,
            }
            app.print_json(&Output {
                query: &response.query,
                strategy: response.strategy,
                status: response.status.as_deref(),
                elapsed_ms: response.elapsed_ms,
                hits,
            })
        }
        OutputFormat::Compact => {
            for hit in &response.hits {
                println!(
                    "{:.3}\t{}\t@{}\t{}",
                    hit.score,
                    hit.tweet.status_id(),
                    hit.tweet.author.screen_name,
                    flatten(&hit.tweet.full_text)
                );
            }
            Ok(())
        }
        OutputFormat::Text => {
            if let Some(status) = &response.status {
                println!("{} {status}", "!".yellow());
            }
            if response.hits.is_empty() {
                println!("No results for \"{}\"", args.query);
                return Ok(());
            }
            println!(
                "Found {} results for \"{}\" ({} search, {} ms)\n",
                response.hits.len().to_string().cyan(),
                args.query.bold(),
                response.strategy,
                response.elapsed_ms
            );
            for (idx, hit) in response.hits.iter().enumerate() {
                print_post(&hit.tweet, Some((idx + 1, hit.score)));
            }
            Ok(())
        }
    }
}

fn cmd_list(app: &App, args: &ListArgs) -> Result<()> {
    let kv = app.open_kv()?;
    let tweets = load_tweets(&kv)?;
    let shown = &tweets[..tweets.len().min(args.limit)];

    match app.format {
        OutputFormat::Json | OutputFormat::JsonPretty => {
            let views: Vec<PostView<'_>> = shown.iter().map(|t| PostView::new(t, None)).collect();
            app.print_json(&views)
        }
        OutputFormat::Compact => {
            for tweet in shown {
                println!(
                    "{}\t@{}\t{}",
                    tweet.status_id(),
                    tweet.author.screen_name,
                    flatten(&tweet.full_text)
                );
            }
            Ok(())
        }
        OutputFormat::Text => {
            if tweets.is_empty() {
                println!("No bookmarks stored yet. Run `xbm import` first.");
                return Ok(());
            }
            for tweet in shown {
                print_post(tweet, None);
            }
            if tweets.len() > shown.len() {
                println!(
                    "{}",
                    format!("... {} more (use -n)", tweets.len() - shown.len()).dimmed()
                );
            }
            Ok(())
        }
    }
}

fn cmd_show(app: &App, args: &ShowArgs) -> Result<()> {
    let kv = app.open_kv()?;
    let tweets = load_tweets(&kv)?;
    let tweet = tweets
        .iter()
        .find(|t| t.id == args.id || t.status_id() == args.id)
        .ok_or_else(|| XbmError::not_found("Bookmark", &args.id))?;

    if app.json() {
        return app.print_json(&PostView::new(tweet, None));
    }

    println!("{}", "─".repeat(CONTENT_DIVIDER_WIDTH).dimmed());
    println!(
        "{} {}",
        tweet.author.name.bold(),
        format!("@{}", tweet.author.screen_name).green()
    );
    println!(
        "{}",
        tweet
            .timestamp
            .map_or_else(|| "unknown date".to_string(), |t| t.to_rfc2822())
            .dimmed()
    );
    println!();
    for line in textwrap::wrap(&tweet.full_text, 78) {
        println!("{line}");
    }
    if let Some(media) = &tweet.media {
        println!("\n{} {}", format!("[{}]", media.kind).cyan(), media.source);
    }
    println!("{}", "─".repeat(CONTENT_DIVIDER_WIDTH).dimmed());
    if let Some(url) = tweet.permalink() {
        println!("{}", url.blue().underline());
    }
    Ok(())
}

fn cmd_stats(app: &App) -> Result<()> {
    let kv = app.open_kv()?;
    let tweets = load_tweets(&kv)?;
    let stats = WrappedStats::compute(&tweets);

    if app.json() {
        return app.print_json(&stats);
    }

    println!("{}", "Bookmarks Wrapped".bold().cyan());
    println!("{}", "═".repeat(CONTENT_DIVIDER_WIDTH).dimmed());
    println!("  {:<18} {}", "Bookmarks:", format_count(stats.total).cyan());
    println!("  {:<18} {}", "Authors:", format_count(stats.unique_authors));
    println!(
        "  {:<18} {} words, ~{} min",
        "Reading:",
        format_count(stats.total_words),
        stats.reading_minutes
    );
    if stats.total == 0 {
        return Ok(());
    }

    if !stats.top_authors.is_empty() {
        println!("\n{}", "Top authors".bold());
        for (rank, author) in stats.top_authors.iter().enumerate() {
            println!(
                "  {}. {} {} {}",
                rank + 1,
                author.name,
                format!("@{}", author.screen_name).green(),
                format!("({})", author.count).dimmed()
            );
        }
    }

    println!("\n{}", "By month".bold());
    println!("  {}", sparkline(&stats.monthly).cyan());
    let initials: String = (0..12)
        .filter_map(|m| month_name(m).chars().next())
        .collect();
    println!("  {}", initials.dimmed());
    if let Some(busiest) = &stats.busiest_month {
        println!("  Busiest: {} ({})", busiest.month, busiest.count);
    }
    if stats.undated > 0 {
        println!("  {} without a date", stats.undated);
    }

    let media = &stats.media;
    println!("\n{}", "Media".bold());
    println!(
        "  {} photos, {} videos, {} GIFs, {} text-only",
        media.photos, media.videos, media.animated_gifs, media.text_only
    );
    Ok(())
}

fn cmd_doctor(app: &App) -> Result<()> {
    let sqlite = app.open_sqlite()?;
    let sizes = sqlite.value_sizes()?;
    let kv: Arc<dyn KvStore> = Arc::new(sqlite);
    let report = ChunkedStore::new(kv.clone()).verify()?;
    let creds = CredentialMonitor::with_store(kv)?.snapshot();

    if app.json() {
        #[derive(Serialize)]
        struct Doctor<'a> {
            store: &'a StoreReport,
            consistent: bool,
            credentials_missing: Vec<&'static str>,
            total_bytes: usize,
        }
        app.print_json(&Doctor {
            store: &report,
            consistent: report.is_consistent(),
            credentials_missing: creds.missing(),
            total_bytes: sizes.iter().map(|(_, s)| s).sum(),
        })?;
    } else {
        let check = |ok: bool| if ok { "✓".green() } else { "✗".red() };
        println!("{}", "xbm doctor".bold().cyan());
        println!("  Database: {}", app.config.db_path().display());
        match &report.meta {
            Some(meta) => println!(
                "  {} Meta: {} posts in {} chunks, updated {}",
                check(true),
                meta.total_tweets,
                meta.total_chunks,
                format_relative_date(meta.last_updated, chrono::Utc::now())
            ),
            None => println!("  {} Nothing imported yet", check(true)),
        }
        println!(
            "  {} Chunks present: {} ({} loaded posts)",
            check(report.missing_chunks.is_empty()),
            report.chunk_keys,
            report.loaded_tweets
        );
        if !report.missing_chunks.is_empty() {
            println!("      missing: {:?}", report.missing_chunks);
        }
        if !report.orphan_chunks.is_empty() {
            println!(
                "  {} Orphan chunks beyond the meta record: {:?}",
                check(false),
                report.orphan_chunks
            );
        }
        let missing = creds.missing();
        if missing.is_empty() {
            println!("  {} Credentials captured", check(true));
        } else {
            println!("  {} Credentials missing: {}", "!".yellow(), missing.join(", "));
        }
        for (key, size) in &sizes {
            println!("      {key:<32} {}", format_bytes(*size as u64).dimmed());
        }
    }

    if report.is_consistent() {
        Ok(())
    } else {
        Err(XbmError::inconsistency("run `xbm import` to rewrite the stored list").into())
    }
}

fn cmd_repl(app: &App) -> Result<()> {
    let service = search_service(app, app.config.index.strategy, None)?;
    xbm::repl::run(service)
}

fn cmd_config(app: &App, args: &ConfigArgs) -> Result<()> {
    if args.init {
        let path = Config::user_config_path().context("could not determine the config directory")?;
        if path.exists() {
            println!("Config already exists at {}", path.display());
        } else {
            Config::write_template(&path)?;
            println!("{} Wrote {}", "✓".green(), path.display());
        }
        return Ok(());
    }

    if app.json() {
        return app.print_json(&app.config);
    }
    if !args.show {
        if let Some(path) = Config::user_config_path() {
            println!("# {}", path.display());
        }
    }
    print!(
        "{}",
        Context::context(toml::to_string_pretty(&app.config), "rendering configuration")?
    );
    Ok(())
}

// =============================================================================
// Output helpers
// =============================================================================

/// Post as printed by `--format json`, without the vector.
#[derive(Serialize)]
struct PostView<'a> {
    id: &'a str,
    status_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    score: Option<f32>,
    author: &'a str,
    screen_name: &'a str,
    timestamp: Option<chrono::DateTime<chrono::Utc>>,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    media: Option<&'a TweetMedia>,
    permalink: Option<String>,
}

impl<'a> PostView<'a> {
    fn new(tweet: &'a Tweet, score: Option<f32>) -> Self {
        Self {
            id: &tweet.id,
            status_id: tweet.status_id(),
            score,
            author: &tweet.author.name,
            screen_name: &tweet.author.screen_name,
            timestamp: tweet.timestamp,
            text: &tweet.full_text,
            media: tweet.media.as_ref(),
            permalink: tweet.permalink(),
        }
    }
}

fn print_post(tweet: &Tweet, rank: Option<(usize, f32)>) {
    let prefix = rank.map_or_else(String::new, |(n, score)| {
        format!("{}. {} ", n, format!("[{score:.2}]").dimmed())
    });
    println!(
        "{prefix}{} {}  {}",
        tweet.author.name.bold(),
        format!("@{}", tweet.author.screen_name).green(),
        format_post_date(tweet.timestamp).dimmed()
    );
    for line in textwrap::wrap(&tweet.full_text, 76) {
        println!("   {line}");
    }
    if let Some(url) = tweet.permalink() {
        println!("   {}", url.blue());
    }
    println!();
}

fn flatten(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
