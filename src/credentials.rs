//! Session credential capture.
//!
//! The bookmarks endpoint needs the browser session's cookie, CSRF token and
//! bearer authorization, plus the GraphQL operation id and feature flags that
//! the web client sends. [`CredentialMonitor`] picks these up from observed
//! requests (live, or replayed from a HAR export) and publishes readiness on a
//! `watch` channel so waiters wake as soon as the last field arrives.

use crate::error::{Result, XbmError};
use crate::model::{Credentials, PartialCredentials};
use crate::store::{KvStore, get_typed, set_typed};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

/// Storage key for captured session material.
pub const CREDENTIALS_KEY: &str = "session_credentials";

/// How long callers wait for credentials by default.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// Snapshot answer from a [`CredentialProvider`].
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialState {
    Ready(Credentials),
    Pending,
}

/// Source of API credentials for the crawler.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current state without waiting.
    async fn get(&self) -> CredentialState;

    /// Wait up to `timeout` for credentials to become available.
    ///
    /// # Errors
    ///
    /// Returns [`XbmError::MissingCredentials`] if they are still incomplete
    /// when the timeout elapses.
    async fn await_credentials(&self, timeout: Duration) -> Result<Credentials> {
        match self.get().await {
            CredentialState::Ready(creds) => Ok(creds),
            CredentialState::Pending => Err(XbmError::MissingCredentials {
                waited_ms: duration_ms(timeout),
                missing: "session".into(),
            }),
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Fixed credentials, e.g. supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(Option<Credentials>);

impl StaticCredentials {
    #[must_use]
    pub const fn new(creds: Credentials) -> Self {
        Self(Some(creds))
    }

    #[must_use]
    pub const fn empty() -> Self {
        Self(None)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn get(&self) -> CredentialState {
        self.0
            .clone()
            .map_or(CredentialState::Pending, CredentialState::Ready)
    }
}

/// Observes outgoing x.com requests and accumulates session credentials.
pub struct CredentialMonitor {
    state: watch::Sender<PartialCredentials>,
    kv: Option<Arc<dyn KvStore>>,
}

impl Default for CredentialMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialMonitor {
    /// Monitor with nothing captured and no persistence.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: watch::Sender::new(PartialCredentials::default()),
            kv: None,
        }
    }

    /// Monitor that restores from and saves to `kv`.
    ///
    /// # Errors
    ///
    /// Returns an error if previously saved credentials cannot be read.
    pub fn with_store(kv: Arc<dyn KvStore>) -> Result<Self> {
        let saved: PartialCredentials = get_typed(kv.as_ref(), CREDENTIALS_KEY)?.unwrap_or_default();
        if saved != PartialCredentials::default() {
            debug!(missing = ?saved.missing(), "Restored saved session credentials");
        }
        Ok(Self {
            state: watch::Sender::new(saved),
            kv: Some(kv),
        })
    }

    /// Current captured fields.
    #[must_use]
    pub fn snapshot(&self) -> PartialCredentials {
        self.state.borrow().clone()
    }

    /// Receiver that is notified on every credential change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PartialCredentials> {
        self.state.subscribe()
    }

    /// Inspect one outgoing request. Returns `true` if anything was captured.
    ///
    /// Requests to hosts other than x.com / twitter.com are ignored. The
    /// endpoint id and feature flags are stored once; the session triple is
    /// replaced whenever a request carries all three and any of them differ.
    pub fn observe_request<I, K, V>(&self, url: &str, headers: I) -> bool
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        if !parsed.host_str().is_some_and(is_x_host) {
            return false;
        }

        let endpoint = endpoint_from_url(&parsed);

        let mut cookie = None;
        let mut csrf = None;
        let mut auth = None;
        for (name, value) in headers {
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            match name.as_ref().to_ascii_lowercase().as_str() {
                "cookie" => cookie = Some(value.to_string()),
                "x-csrf-token" => csrf = Some(value.to_string()),
                "authorization" => auth = Some(value.to_string()),
                _ => {}
            }
        }

        let changed = self.state.send_if_modified(|state| {
            let mut changed = false;

            if let Some((id, features)) = &endpoint {
                if state.api_endpoint_id.is_none() {
                    info!(endpoint_id = %id, "Captured Bookmarks endpoint id");
                    state.api_endpoint_id = Some(id.clone());
                    changed = true;
                }
                if state.features.is_none() && features.is_some() {
                    state.features.clone_from(features);
                    changed = true;
                }
            }

            if let (Some(cookie), Some(csrf), Some(auth)) = (&cookie, &csrf, &auth) {
                let differs = state.cookie.as_ref() != Some(cookie)
                    || state.csrf_token.as_ref() != Some(csrf)
                    || state.authorization.as_ref() != Some(auth);
                if differs {
                    debug!("Updated session cookie, csrf token and authorization");
                    state.cookie = Some(cookie.clone());
                    state.csrf_token = Some(csrf.clone());
                    state.authorization = Some(auth.clone());
                    changed = true;
                }
            }

            changed
        });

        if changed {
            self.persist();
        }
        changed
    }

    /// Replay every request of a browser HAR export. Returns how many
    /// requests contributed credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the document has no `log.entries` array.
    pub fn observe_har(&self, har: &Value) -> Result<usize> {
        let entries = har["log"]["entries"]
            .as_array()
            .ok_or_else(|| XbmError::invalid_argument("HAR document has no log.entries"))?;

        let mut captured = 0;
        for entry in entries {
            let request = &entry["request"];
            let Some(url) = request["url"].as_str() else {
                continue;
            };
            let headers = request["headers"]
                .as_array()
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .filter_map(|h| Some((h["name"].as_str()?, h["value"].as_str()?)));
            if self.observe_request(url, headers) {
                captured += 1;
            }
        }

        info!(entries = entries.len(), captured, "Replayed HAR export");
        Ok(captured)
    }

    /// Set the session triple directly.
    pub fn set_session(&self, cookie: &str, csrf_token: &str, authorization: &str) {
        self.state.send_modify(|s| {
            s.cookie = Some(cookie.to_string());
            s.csrf_token = Some(csrf_token.to_string());
            s.authorization = Some(authorization.to_string());
        });
        self.persist();
    }

    /// Set (overwrite) the endpoint id and feature flags directly.
    pub fn set_endpoint(&self, endpoint_id: &str, features: Value) {
        self.state.send_modify(|s| {
            s.api_endpoint_id = Some(endpoint_id.to_string());
            s.features = Some(features);
        });
        self.persist();
    }

    /// Forget everything, including the saved copy.
    pub fn clear(&self) {
        self.state.send_replace(PartialCredentials::default());
        if let Some(kv) = &self.kv {
            if let Err(e) = kv.remove(CREDENTIALS_KEY) {
                warn!(error = %e, "Failed to remove saved credentials");
            }
        }
    }

    /// Wait until all five fields are present, or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`XbmError::MissingCredentials`] naming the absent fields.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<Credentials> {
        let mut rx = self.state.subscribe();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|s| s.complete().is_some())).await;

        if let Ok(Ok(state)) = waited {
            if let Some(creds) = state.complete() {
                return Ok(creds);
            }
        }

        let missing = self.snapshot().missing().join(", ");
        Err(XbmError::MissingCredentials {
            waited_ms: duration_ms(timeout),
            missing,
        })
    }

    fn persist(&self) {
        let Some(kv) = &self.kv else { return };
        let snapshot = self.snapshot();
        if let Err(e) = set_typed(kv.as_ref(), CREDENTIALS_KEY, &snapshot) {
            warn!(error = %e, "Failed to save session credentials");
        }
    }
}

#[async_trait]
impl CredentialProvider for CredentialMonitor {
    async fn get(&self) -> CredentialState {
        self.state
            .borrow()
            .complete()
            .map_or(CredentialState::Pending, CredentialState::Ready)
    }

    async fn await_credentials(&self, timeout: Duration) -> Result<Credentials> {
        self.wait_ready(timeout).await
    }
}

fn is_x_host(host: &str) -> bool {
    ["x.com", "twitter.com"].iter().any(|root| {
        host == *root
            || host
                .strip_suffix(root)
                .is_some_and(|sub| sub.ends_with('.'))
    })
}

/// Endpoint id and (if present and valid) feature flags of a Bookmarks call.
fn endpoint_from_url(url: &Url) -> Option<(String, Option<Value>)> {
    let segments: Vec<&str> = url.path_segments()?.collect();
    let id = match segments.as_slice() {
        ["i", "api", "graphql", id, "Bookmarks"] if !id.is_empty() => (*id).to_string(),
        _ => return None,
    };
    let features = url
        .query_pairs()
        .find(|(k, _)| k == "features")
        .and_then(|(_, v)| match serde_json::from_str::<Value>(&v) {
            Ok(value) if value.is_object() => Some(value),
            _ => {
                warn!("Bookmarks request carried unparseable features");
                None
            }
        });
    Some((id, features))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKv;
    use serde_json::json;

    const BOOKMARKS_URL: &str = "https://x.com/i/api/graphql/AbC123/Bookmarks?variables=%7B%22count%22%3A20%7D&features=%7B%22graphql_timeline_v2_bookmark_timeline%22%3Atrue%7D";

    fn session_headers(cookie: &str) -> Vec<(&str, &str)> {
        vec![
            ("Cookie", cookie),
            ("X-Csrf-Token", "csrf-1"),
            ("authorization", "Bearer AAA"),
            ("Accept", "*/*"),
        ]
    }

    #[test]
    fn test_captures_everything_from_bookmarks_request() {
        let monitor = CredentialMonitor::new();
        assert!(monitor.observe_request(BOOKMARKS_URL, session_headers("ct0=1")));

        let creds = monitor.snapshot().complete().unwrap();
        assert_eq!(creds.api_endpoint_id, "AbC123");
        assert_eq!(creds.cookie, "ct0=1");
        assert_eq!(creds.csrf_token, "csrf-1");
        assert_eq!(creds.authorization, "Bearer AAA");
        assert_eq!(creds.features["graphql_timeline_v2_bookmark_timeline"], json!(true));
    }

    #[test]
    fn test_ignores_foreign_hosts() {
        let monitor = CredentialMonitor::new();
        assert!(!monitor.observe_request(
            "https://notx.com/i/api/graphql/Zzz/Bookmarks?features=%7B%7D",
            session_headers("c")
        ));
        assert!(!monitor.observe_request("not a url", session_headers("c")));
        assert_eq!(monitor.snapshot(), PartialCredentials::default());
    }

    #[test]
    fn test_accepts_subdomains() {
        let monitor = CredentialMonitor::new();
        assert!(monitor.observe_request("https://api.x.com/1.1/foo.json", session_headers("c")));
        assert!(monitor.snapshot().api_endpoint_id.is_none());
    }

    #[test]
    fn test_endpoint_id_stored_once() {
        let monitor = CredentialMonitor::new();
        monitor.observe_request(BOOKMARKS_URL, Vec::<(&str, &str)>::new());
        monitor.observe_request(
            "https://x.com/i/api/graphql/Other/Bookmarks?features=%7B%7D",
            Vec::<(&str, &str)>::new(),
        );
        assert_eq!(monitor.snapshot().api_endpoint_id.as_deref(), Some("AbC123"));
    }

    #[test]
    fn test_session_triple_requires_all_three_and_updates_on_change() {
        let monitor = CredentialMonitor::new();
        assert!(!monitor.observe_request("https://x.com/home", [("cookie", "c1"), ("authorization", "b")]));
        assert!(monitor.snapshot().cookie.is_none());

        assert!(monitor.observe_request("https://x.com/home", session_headers("c1")));
        assert!(!monitor.observe_request("https://x.com/home", session_headers("c1")));
        assert!(monitor.observe_request("https://x.com/home", session_headers("c2")));
        assert_eq!(monitor.snapshot().cookie.as_deref(), Some("c2"));
    }

    #[test]
    fn test_har_replay() {
        let har = json!({ "log": { "entries": [
            { "request": { "url": "https://abs.twimg.com/x.js", "headers": [] } },
            { "request": { "url": BOOKMARKS_URL, "headers": [
                { "name": "cookie", "value": "ct0=9" },
                { "name": "x-csrf-token", "value": "t" },
                { "name": "authorization", "value": "Bearer Z" }
            ]}}
        ]}});
        let monitor = CredentialMonitor::new();
        assert_eq!(monitor.observe_har(&har).unwrap(), 1);
        assert!(monitor.snapshot().complete().is_some());
        assert!(monitor.observe_har(&json!({})).is_err());
    }

    #[test]
    fn test_persists_and_restores() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        {
            let monitor = CredentialMonitor::with_store(kv.clone()).unwrap();
            monitor.observe_request(BOOKMARKS_URL, session_headers("saved"));
        }
        let restored = CredentialMonitor::with_store(kv.clone()).unwrap();
        assert_eq!(restored.snapshot().cookie.as_deref(), Some("saved"));

        restored.clear();
        assert!(kv.get(CREDENTIALS_KEY).unwrap().is_none());
        assert!(restored.snapshot().complete().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_with_missing_fields() {
        let monitor = CredentialMonitor::new();
        monitor.set_session("c", "t", "a");
        let err = monitor.wait_ready(Duration::from_secs(5)).await.unwrap_err();
        match err {
            XbmError::MissingCredentials { waited_ms, missing } => {
                assert_eq!(waited_ms, 5000);
                assert_eq!(missing, "api_endpoint_id, features");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_wakes_when_last_field_arrives() {
        let monitor = Arc::new(CredentialMonitor::new());
        monitor.set_session("c", "t", "a");

        let waiter = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.await_credentials(DEFAULT_WAIT).await })
        };
        tokio::time::sleep(Duration::from_millis(300)).await;
        monitor.set_endpoint("Id1", json!({}));

        let creds = waiter.await.unwrap().unwrap();
        assert_eq!(creds.api_endpoint_id, "Id1");
    }

    #[tokio::test]
    async fn test_static_provider() {
        assert_eq!(StaticCredentials::empty().get().await, CredentialState::Pending);
        assert!(
            StaticCredentials::empty()
                .await_credentials(Duration::ZERO)
                .await
                .is_err()
        );
    }
}
