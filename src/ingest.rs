//! Import supervisor: one crawl at a time, persisted on completion, with
//! progress broadcast to any number of listeners.

use crate::credentials::CredentialProvider;
use crate::crawler::{BookmarkCrawler, CrawlProgress, StopReason};
use crate::error::{Result, XbmError, find_closest_match};
use crate::logging::OperationGuard;
use crate::model::{ChunkMeta, Tweet};
use crate::store::ChunkedStore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, broadcast};
use tracing::info;

/// How a finished crawl is combined with what is already stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// The crawl result becomes the whole stored list.
    #[default]
    Replace,
    /// Freshly crawled posts first, then stored posts that were not re-fetched.
    Merge,
}

impl FromStr for ImportMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "merge" => Ok(Self::Merge),
            _ => Err(match find_closest_match(s, &["replace", "merge"]) {
                Some(close) => format!("Unknown import mode: {s}. Did you mean '{close}'?"),
                None => format!("Unknown import mode: {s}. Use 'replace' or 'merge'"),
            }),
        }
    }
}

impl std::fmt::Display for ImportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Replace => write!(f, "replace"),
            Self::Merge => write!(f, "merge"),
        }
    }
}

/// Lifecycle notifications for an import.
#[derive(Debug, Clone)]
pub enum IngestEvent {
    Started,
    Progress(CrawlProgress),
    Complete {
        tweets: Arc<Vec<Tweet>>,
        stop_reason: StopReason,
    },
    Failed {
        message: String,
    },
}

/// Summary returned to the caller that started the import.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    /// Posts kept by this crawl.
    pub fetched: usize,
    /// Posts in the store after the import.
    pub stored: usize,
    pub pages: usize,
    pub parsed: usize,
    pub rate_limit_retries: usize,
    pub stop_reason: StopReason,
    pub mode: ImportMode,
    pub meta: ChunkMeta,
    pub next_cursor: Option<String>,
    pub elapsed_ms: u64,
    #[serde(skip)]
    pub tweets: Arc<Vec<Tweet>>,
}

/// Owns the crawl, the store, and the event channel.
pub struct IngestionService {
    crawler: BookmarkCrawler,
    credentials: Arc<dyn CredentialProvider>,
    store: ChunkedStore,
    events: broadcast::Sender<IngestEvent>,
    running: Mutex<()>,
    credential_timeout: Duration,
    mode: ImportMode,
}

impl IngestionService {
    pub fn new(
        crawler: BookmarkCrawler,
        credentials: Arc<dyn CredentialProvider>,
        store: ChunkedStore,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        let progress_tx = events.clone();
        let crawler = crawler.with_progress(move |p| {
            let _ = progress_tx.send(IngestEvent::Progress(p));
        });
        Self {
            crawler,
            credentials,
            store,
            events,
            running: Mutex::new(()),
            credential_timeout: crate::credentials::DEFAULT_WAIT,
            mode: ImportMode::default(),
        }
    }

    #[must_use]
    pub const fn with_credential_timeout(mut self, timeout: Duration) -> Self {
        self.credential_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_mode(mut self, mode: ImportMode) -> Self {
        self.mode = mode;
        self
    }

    /// Listen for [`IngestEvent`]s.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub const fn store(&self) -> &ChunkedStore {
        &self.store
    }

    /// Whether an import is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Import from the newest bookmark.
    ///
    /// # Errors
    ///
    /// See [`Self::start_ingestion_from`].
    pub async fn start_ingestion(&self) -> Result<IngestReport> {
        self.start_ingestion_from(None).await
    }

    /// Import starting at `cursor`.
    ///
    /// # Errors
    ///
    /// Returns [`XbmError::Busy`] if an import is already running, and
    /// otherwise the credential, crawl, or persistence error that ended it.
    /// Every error after the busy check is also broadcast as
    /// [`IngestEvent::Failed`].
    pub async fn start_ingestion_from(&self, cursor: Option<String>) -> Result<IngestReport> {
        let _guard = self.running.try_lock().map_err(|_| XbmError::Busy {
            operation: "Bookmark import",
        })?;

        let _ = self.events.send(IngestEvent::Started);
        let op = OperationGuard::new("import");
        match self.run(cursor).await {
            Ok(report) => {
                op.complete();
                let _ = self.events.send(IngestEvent::Complete {
                    tweets: report.tweets.clone(),
                    stop_reason: report.stop_reason,
                });
                Ok(report)
            }
            Err(e) => {
                op.fail(&e);
                let _ = self.events.send(IngestEvent::Failed {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run(&self, cursor: Option<String>) -> Result<IngestReport> {
        let started = Instant::now();
        let creds = self
            .credentials
            .await_credentials(self.credential_timeout)
            .await?;

        let outcome = self.crawler.crawl_from(&creds, cursor).await?;
        let fetched = outcome.tweets.len();

        let tweets = match self.mode {
            ImportMode::Replace => outcome.tweets,
            ImportMode::Merge => {
                let existing = self.store.load()?.tweets;
                merge_collections(outcome.tweets, existing)
            }
        };
        let meta = self.store.persist(&tweets)?;

        info!(
            fetched,
            stored = tweets.len(),
            mode = %self.mode,
            stop = %outcome.stop_reason,
            "Bookmark import complete"
        );

        Ok(IngestReport {
            fetched,
            stored: tweets.len(),
            pages: outcome.pages,
            parsed: outcome.parsed,
            rate_limit_retries: outcome.rate_limit_retries,
            stop_reason: outcome.stop_reason,
            mode: self.mode,
            meta,
            next_cursor: outcome.next_cursor,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            tweets: Arc::new(tweets),
        })
    }
}

/// Fresh posts first, then stored posts whose id was not re-fetched.
#[must_use]
pub fn merge_collections(fresh: Vec<Tweet>, existing: Vec<Tweet>) -> Vec<Tweet> {
    let seen: HashSet<String> = fresh.iter().map(|t| t.id.clone()).collect();
    let mut merged = fresh;
    merged.extend(existing.into_iter().filter(|t| !seen.contains(&t.id)));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CredentialMonitor, StaticCredentials};
    use crate::crawler::{BookmarkApi, CrawlConfig, YearFilter};
    use crate::model::{Author, Credentials};
    use crate::store::MemoryKv;
    use async_trait::async_trait;
    use serde_json::{Value, json};

    fn creds() -> Credentials {
        Credentials {
            cookie: "c".into(),
            csrf_token: "t".into(),
            authorization: "Bearer a".into(),
            api_endpoint_id: "Q".into(),
            features: json!({}),
        }
    }

    fn tweet(id: &str) -> Tweet {
        Tweet {
            id: id.into(),
            full_text: id.into(),
            timestamp: None,
            media: None,
            author: Author::default(),
            embedding: None,
        }
    }

    /// Serves a single page of `ids`, optionally after a delay.
    struct OnePage {
        ids: Vec<&'static str>,
        delay: Duration,
    }

    #[async_trait]
    impl BookmarkApi for OnePage {
        async fn fetch_page(&self, _: &Credentials, _: Option<&str>, _: usize) -> Result<Value> {
            tokio::time::sleep(self.delay).await;
            let entries: Vec<Value> = self
                .ids
                .iter()
                .map(|id| {
                    json!({
                        "entryId": id,
                        "content": { "itemContent": { "tweet_results": { "result": {
                            "legacy": { "full_text": id, "created_at": "Mon Jan 01 10:00:00 +0000 2024" }
                        }}}}
                    })
                })
                .collect();
            Ok(json!({ "data": { "bookmark_timeline_v2": { "timeline": {
                "instructions": [{ "entries": entries }]
            }}}}))
        }
    }

    fn service(ids: Vec<&'static str>, delay: Duration) -> IngestionService {
        let crawler = BookmarkCrawler::new(
            Arc::new(OnePage { ids, delay }),
            CrawlConfig {
                year_filter: YearFilter::Any,
                ..CrawlConfig::default()
            },
        );
        IngestionService::new(
            crawler,
            Arc::new(StaticCredentials::new(creds())),
            ChunkedStore::new(Arc::new(MemoryKv::new())),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_ingestion_persists_and_broadcasts() {
        let svc = service(vec!["tweet-1", "tweet-2"], Duration::ZERO);
        let mut rx = svc.subscribe();

        let report = svc.start_ingestion().await.unwrap();
        assert_eq!(report.fetched, 2);
        assert_eq!(report.stop_reason, StopReason::NoNextCursor);
        assert_eq!(svc.store().load().unwrap().tweets.len(), 2);

        assert!(matches!(rx.recv().await.unwrap(), IngestEvent::Started));
        assert!(matches!(rx.recv().await.unwrap(), IngestEvent::Progress(p) if p.pages == 1));
        match rx.recv().await.unwrap() {
            IngestEvent::Complete { tweets, .. } => assert_eq!(tweets.len(), 2),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_while_running_is_busy() {
        let svc = service(vec!["tweet-1"], Duration::from_secs(3));
        let (first, second) = tokio::join!(svc.start_ingestion(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            svc.start_ingestion().await
        });
        assert!(first.is_ok());
        assert!(matches!(second, Err(XbmError::Busy { .. })));
        assert!(!svc.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_credentials_fails_with_event() {
        let crawler = BookmarkCrawler::new(
            Arc::new(OnePage {
                ids: vec![],
                delay: Duration::ZERO,
            }),
            CrawlConfig::default(),
        );
        let svc = IngestionService::new(
            crawler,
            Arc::new(CredentialMonitor::new()),
            ChunkedStore::new(Arc::new(MemoryKv::new())),
        )
        .with_credential_timeout(Duration::from_millis(200));
        let mut rx = svc.subscribe();

        let err = svc.start_ingestion().await.unwrap_err();
        assert!(matches!(err, XbmError::MissingCredentials { .. }));
        assert!(matches!(rx.recv().await.unwrap(), IngestEvent::Started));
        assert!(matches!(rx.recv().await.unwrap(), IngestEvent::Failed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_merge_mode_keeps_unfetched_posts() {
        let svc = service(vec!["tweet-3", "tweet-1"], Duration::ZERO).with_mode(ImportMode::Merge);
        svc.store()
            .persist(&[tweet("tweet-1"), tweet("tweet-2")])
            .unwrap();

        let report = svc.start_ingestion().await.unwrap();
        let ids: Vec<_> = report.tweets.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["tweet-3", "tweet-1", "tweet-2"]);
        assert_eq!(report.stored, 3);
    }

    #[test]
    fn test_merge_collections_dedupes_by_id() {
        let merged = merge_collections(vec![tweet("a"), tweet("b")], vec![tweet("b"), tweet("c")]);
        let ids: Vec<_> = merged.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn test_import_mode_parsing() {
        assert_eq!("MERGE".parse::<ImportMode>().unwrap(), ImportMode::Merge);
        assert!("append".parse::<ImportMode>().is_err());
        let err = "marge".parse::<ImportMode>().unwrap_err();
        assert!(err.contains("Did you mean 'merge'?"));
    }
}
