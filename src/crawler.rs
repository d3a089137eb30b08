//! Cursor-paginated bookmark crawler.
//!
//! Pages through the Bookmarks timeline newest-first until one of:
//!
//! - the page has no bottom cursor,
//! - the page decoded to zero posts,
//! - more than `max_consecutive_misses` posts in a row fell outside the
//!   target year (the feed is roughly reverse-chronological, so a long run
//!   of older posts means the window has been passed),
//! - the optional page cap is reached.
//!
//! HTTP 429 sleeps for the cooldown and retries the same cursor with no retry
//! limit. Any other failure ends the crawl; tweets accumulated so far stay in
//! the caller's [`CrawlState`].

use crate::error::{Result, XbmError};
use crate::model::{Credentials, Tweet};
use crate::parser::TweetParser;
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Default GraphQL root for the Bookmarks operation.
pub const DEFAULT_API_ROOT: &str = "https://x.com/i/api/graphql";

/// One page-fetch against the Bookmarks operation.
#[async_trait]
pub trait BookmarkApi: Send + Sync {
    /// Fetch one page. `cursor` is `None` for the newest page.
    ///
    /// # Errors
    ///
    /// Returns [`XbmError::RateLimited`] on HTTP 429, [`XbmError::Http`] on
    /// other non-success statuses, and transport or decode errors otherwise.
    async fn fetch_page(
        &self,
        creds: &Credentials,
        cursor: Option<&str>,
        count: usize,
    ) -> Result<Value>;
}

/// [`BookmarkApi`] over HTTPS with `reqwest`.
pub struct HttpBookmarkApi {
    client: Client,
    api_root: String,
}

impl Default for HttpBookmarkApi {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpBookmarkApi {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            api_root: DEFAULT_API_ROOT.to_string(),
        }
    }

    /// Point at a different GraphQL root (tests, proxies).
    #[must_use]
    pub fn with_api_root(mut self, root: impl Into<String>) -> Self {
        self.api_root = root.into().trim_end_matches('/').to_string();
        self
    }

    /// Use a preconfigured client (timeouts, proxies).
    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Full request URL for one page.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured root is not a valid URL.
    pub fn page_url(&self, creds: &Credentials, cursor: Option<&str>, count: usize) -> Result<Url> {
        let mut variables = json!({
            "count": count,
            "includePromotedContent": false,
        });
        if let Some(cursor) = cursor {
            variables["cursor"] = json!(cursor);
        }

        let base = format!("{}/{}/Bookmarks", self.api_root, creds.api_endpoint_id);
        let mut url = Url::parse(&base)
            .map_err(|e| XbmError::invalid_argument(format!("bad API root '{base}': {e}")))?;
        url.query_pairs_mut()
            .append_pair("features", &creds.features.to_string())
            .append_pair("variables", &variables.to_string());
        Ok(url)
    }
}

#[async_trait]
impl BookmarkApi for HttpBookmarkApi {
    async fn fetch_page(
        &self,
        creds: &Credentials,
        cursor: Option<&str>,
        count: usize,
    ) -> Result<Value> {
        let url = self.page_url(creds, cursor, count)?;
        debug!(cursor = cursor.unwrap_or(""), "GET Bookmarks page");

        let response = self
            .client
            .get(url)
            .header("Cookie", &creds.cookie)
            .header("X-Csrf-token", &creds.csrf_token)
            .header("Authorization", &creds.authorization)
            .header("Content-Type", "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(XbmError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(XbmError::http(status.as_u16(), body));
        }

        Ok(response.json::<Value>().await?)
    }
}

/// Which posts count as in-window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum YearFilter {
    /// Only posts published in this calendar year (UTC).
    Year(i32),
    /// Everything; the crawl ends only on cursor exhaustion or page cap.
    Any,
}

impl YearFilter {
    #[must_use]
    pub fn current_year() -> Self {
        Self::Year(Utc::now().year())
    }

    /// Posts without a parseable timestamp never match a specific year.
    #[must_use]
    pub fn matches(self, tweet: &Tweet) -> bool {
        match self {
            Self::Any => true,
            Self::Year(year) => tweet.year() == Some(year),
        }
    }
}

/// Crawl tunables.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub page_size: usize,
    pub year_filter: YearFilter,
    /// The crawl stops when the run of out-of-window posts exceeds this.
    pub max_consecutive_misses: usize,
    pub rate_limit_cooldown: Duration,
    pub page_delay: Duration,
    pub max_pages: Option<usize>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            year_filter: YearFilter::current_year(),
            max_consecutive_misses: 10,
            rate_limit_cooldown: Duration::from_secs(60),
            page_delay: Duration::from_secs(1),
            max_pages: None,
        }
    }
}

/// Mutable crawl progress, owned by the caller between pages.
#[derive(Debug, Clone, Default)]
pub struct CrawlState {
    /// Cursor of the next page to fetch. `None` means the newest page.
    pub cursor: Option<String>,
    /// In-window posts, in feed order.
    pub tweets: Vec<Tweet>,
    pub consecutive_misses: usize,
    /// Set once the out-of-window run exceeds the threshold.
    pub done: bool,
    pub pages: usize,
    /// Every post decoded, in-window or not.
    pub parsed: usize,
    pub rate_limit_retries: usize,
}

impl CrawlState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a cursor saved from an earlier run.
    #[must_use]
    pub fn starting_at(cursor: Option<String>) -> Self {
        Self {
            cursor,
            ..Self::default()
        }
    }
}

/// Why a crawl ended normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    NoNextCursor,
    EmptyPage,
    OutOfWindow,
    PageLimit,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::NoNextCursor => "reached the end of the bookmark list",
            Self::EmptyPage => "received a page with no posts",
            Self::OutOfWindow => "passed the target year",
            Self::PageLimit => "reached the page limit",
        };
        f.write_str(text)
    }
}

/// Per-page progress callback payload.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CrawlProgress {
    pub pages: usize,
    pub parsed: usize,
    pub kept: usize,
    pub rate_limit_retries: usize,
}

impl From<&CrawlState> for CrawlProgress {
    fn from(s: &CrawlState) -> Self {
        Self {
            pages: s.pages,
            parsed: s.parsed,
            kept: s.tweets.len(),
            rate_limit_retries: s.rate_limit_retries,
        }
    }
}

type ProgressFn = Arc<dyn Fn(CrawlProgress) + Send + Sync>;

/// Summary of a finished crawl.
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    pub tweets: Vec<Tweet>,
    pub stop_reason: StopReason,
    pub pages: usize,
    pub parsed: usize,
    pub rate_limit_retries: usize,
    /// Cursor of the page after the last one fetched.
    pub next_cursor: Option<String>,
}

/// Drives [`BookmarkApi`] page by page.
#[derive(Clone)]
pub struct BookmarkCrawler {
    api: Arc<dyn BookmarkApi>,
    parser: TweetParser,
    config: CrawlConfig,
    on_progress: Option<ProgressFn>,
}

impl BookmarkCrawler {
    pub fn new(api: Arc<dyn BookmarkApi>, config: CrawlConfig) -> Self {
        Self {
            api,
            parser: TweetParser::new(),
            config,
            on_progress: None,
        }
    }

    /// Call `f` after every page.
    #[must_use]
    pub fn with_progress(mut self, f: impl Fn(CrawlProgress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub const fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Crawl from `start_cursor` with fresh state.
    ///
    /// # Errors
    ///
    /// Returns the first non-rate-limit failure.
    pub async fn crawl_from(
        &self,
        creds: &Credentials,
        start_cursor: Option<String>,
    ) -> Result<CrawlOutcome> {
        let mut state = CrawlState::starting_at(start_cursor);
        let stop_reason = self.crawl(creds, &mut state).await?;
        Ok(CrawlOutcome {
            tweets: state.tweets,
            stop_reason,
            pages: state.pages,
            parsed: state.parsed,
            rate_limit_retries: state.rate_limit_retries,
            next_cursor: state.cursor,
        })
    }

    /// Crawl until a stop condition, mutating `state` as pages arrive.
    ///
    /// # Errors
    ///
    /// Returns the first non-rate-limit failure; `state` keeps everything
    /// accumulated up to that point.
    pub async fn crawl(&self, creds: &Credentials, state: &mut CrawlState) -> Result<StopReason> {
        loop {
            let response = self.fetch_with_backoff(creds, state).await?;
            state.pages += 1;

            let page = self.parser.parse_page(&response);
            let page_posts = page.tweets.len();
            state.parsed += page_posts;
            self.triage(state, page.tweets);

            let has_next = page.next_cursor.is_some();
            if has_next {
                state.cursor = page.next_cursor;
            }

            info!(
                page = state.pages,
                posts = page_posts,
                kept = state.tweets.len(),
                misses = state.consecutive_misses,
                "Fetched bookmarks page"
            );
            if let Some(cb) = &self.on_progress {
                cb(CrawlProgress::from(&*state));
            }

            let stop = if state.done {
                Some(StopReason::OutOfWindow)
            } else if page_posts == 0 {
                Some(StopReason::EmptyPage)
            } else if !has_next {
                Some(StopReason::NoNextCursor)
            } else if self.config.max_pages.is_some_and(|max| state.pages >= max) {
                Some(StopReason::PageLimit)
            } else {
                None
            };

            if let Some(reason) = stop {
                info!(
                    reason = %reason,
                    pages = state.pages,
                    kept = state.tweets.len(),
                    "Crawl finished"
                );
                return Ok(reason);
            }

            tokio::time::sleep(self.config.page_delay).await;
        }
    }

    async fn fetch_with_backoff(&self, creds: &Credentials, state: &mut CrawlState) -> Result<Value> {
        loop {
            match self
                .api
                .fetch_page(creds, state.cursor.as_deref(), self.config.page_size)
                .await
            {
                Err(XbmError::RateLimited) => {
                    state.rate_limit_retries += 1;
                    warn!(
                        retry = state.rate_limit_retries,
                        cooldown_secs = self.config.rate_limit_cooldown.as_secs(),
                        "Rate limited; cooling down before retrying the same cursor"
                    );
                    tokio::time::sleep(self.config.rate_limit_cooldown).await;
                }
                other => return other,
            }
        }
    }

    /// Apply the year window to one page of posts.
    fn triage(&self, state: &mut CrawlState, posts: Vec<Tweet>) {
        for tweet in posts {
            if state.done {
                break;
            }
            if self.config.year_filter.matches(&tweet) {
                state.consecutive_misses = 0;
                state.tweets.push(tweet);
            } else {
                state.consecutive_misses += 1;
                if state.consecutive_misses > self.config.max_consecutive_misses {
                    debug!(id = %tweet.id, "Out-of-window run exceeded threshold");
                    state.done = true;
                }
            }
        }
    }
}
