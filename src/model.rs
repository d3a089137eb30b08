//! Data models for harvested bookmarks.
//!
//! These structures are the normalized form of timeline entries returned by
//! the bookmarks GraphQL endpoint, and the on-disk records the chunked store
//! writes.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A saved post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tweet {
    /// Timeline entry id (e.g. `tweet-1790000000000000000`).
    pub id: String,
    #[serde(default)]
    pub full_text: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub media: Option<TweetMedia>,
    #[serde(default)]
    pub author: Author,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Embedding>,
}

impl Tweet {
    /// Numeric status id, with the `tweet-` entry prefix stripped.
    #[must_use]
    pub fn status_id(&self) -> &str {
        self.id.strip_prefix("tweet-").unwrap_or(&self.id)
    }

    /// Public URL of the post, when the author handle is known.
    #[must_use]
    pub fn permalink(&self) -> Option<String> {
        if self.author.screen_name.is_empty() {
            return None;
        }
        Some(format!(
            "https://x.com/{}/status/{}",
            self.author.screen_name,
            self.status_id()
        ))
    }

    /// Calendar year the post was published, if the timestamp parsed.
    #[must_use]
    pub fn year(&self) -> Option<i32> {
        self.timestamp.map(|t| t.year())
    }
}

/// The author of a post. Fields default to empty strings when absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub screen_name: String,
    #[serde(default)]
    pub profile_image_url: String,
}

/// First media attachment of a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TweetMedia {
    pub kind: MediaKind,
    /// Image URL, or the highest-bitrate mp4 for video-like media.
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    AnimatedGif,
}

impl MediaKind {
    /// Map the API's `type` string; unknown kinds yield `None`.
    #[must_use]
    pub fn from_api(value: &str) -> Option<Self> {
        match value {
            "photo" => Some(Self::Photo),
            "video" => Some(Self::Video),
            "animated_gif" => Some(Self::AnimatedGif),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_video_like(self) -> bool {
        matches!(self, Self::Video | Self::AnimatedGif)
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Photo => write!(f, "photo"),
            Self::Video => write!(f, "video"),
            Self::AnimatedGif => write!(f, "animated_gif"),
        }
    }
}

/// A post's vector representation under one of the two indexing strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum Embedding {
    /// Fixed-length, L2-normalized vector from an embedding model.
    Dense(Vec<f32>),
    /// Term → TF-IDF weight.
    Sparse(BTreeMap<String, f32>),
}

/// Session material required to call the bookmarks endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub cookie: String,
    pub csrf_token: String,
    pub authorization: String,
    /// Opaque GraphQL operation id from `/i/api/graphql/<id>/Bookmarks`.
    pub api_endpoint_id: String,
    /// Feature-flag object echoed back on every request.
    pub features: serde_json::Value,
}

/// Credentials as they are captured, one field at a time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialCredentials {
    pub cookie: Option<String>,
    pub csrf_token: Option<String>,
    pub authorization: Option<String>,
    pub api_endpoint_id: Option<String>,
    pub features: Option<serde_json::Value>,
}

impl PartialCredentials {
    /// All five fields present.
    #[must_use]
    pub fn complete(&self) -> Option<Credentials> {
        Some(Credentials {
            cookie: self.cookie.clone()?,
            csrf_token: self.csrf_token.clone()?,
            authorization: self.authorization.clone()?,
            api_endpoint_id: self.api_endpoint_id.clone()?,
            features: self.features.clone()?,
        })
    }

    /// Names of the fields still missing.
    #[must_use]
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.cookie.is_none() {
            missing.push("cookie");
        }
        if self.csrf_token.is_none() {
            missing.push("csrf_token");
        }
        if self.authorization.is_none() {
            missing.push("authorization");
        }
        if self.api_endpoint_id.is_none() {
            missing.push("api_endpoint_id");
        }
        if self.features.is_none() {
            missing.push("features");
        }
        missing
    }
}

impl From<Credentials> for PartialCredentials {
    fn from(c: Credentials) -> Self {
        Self {
            cookie: Some(c.cookie),
            csrf_token: Some(c.csrf_token),
            authorization: Some(c.authorization),
            api_endpoint_id: Some(c.api_endpoint_id),
            features: Some(c.features),
        }
    }
}

/// One persisted slice of the bookmark list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub tweets: Vec<Tweet>,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub last_updated: DateTime<Utc>,
}

/// Index record describing how many chunks make up the stored list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMeta {
    pub total_tweets: usize,
    pub total_chunks: usize,
    pub last_updated: DateTime<Utc>,
}

/// A ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub score: f32,
    pub tweet: Tweet,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Tweet {
        Tweet {
            id: "tweet-1790000000000000001".into(),
            full_text: "hello".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single(),
            media: None,
            author: Author {
                name: "Ada".into(),
                screen_name: "ada".into(),
                profile_image_url: String::new(),
            },
            embedding: None,
        }
    }

    #[test]
    fn permalink_uses_status_id() {
        let t = sample();
        assert_eq!(t.status_id(), "1790000000000000001");
        assert_eq!(
            t.permalink().as_deref(),
            Some("https://x.com/ada/status/1790000000000000001")
        );
        assert_eq!(t.year(), Some(2024));
    }

    #[test]
    fn permalink_requires_handle() {
        let mut t = sample();
        t.author.screen_name.clear();
        assert!(t.permalink().is_none());
    }

    #[test]
    fn partial_credentials_complete_only_when_all_present() {
        let mut p = PartialCredentials {
            cookie: Some("c".into()),
            csrf_token: Some("t".into()),
            authorization: Some("Bearer x".into()),
            api_endpoint_id: Some("abc".into()),
            features: None,
        };
        assert!(p.complete().is_none());
        assert_eq!(p.missing(), vec!["features"]);
        p.features = Some(serde_json::json!({}));
        assert!(p.complete().is_some());
        assert!(p.missing().is_empty());
    }

    #[test]
    fn chunk_meta_uses_camel_case_keys() {
        let meta = ChunkMeta {
            total_tweets: 3,
            total_chunks: 1,
            last_updated: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        let json = serde_json::to_value(meta).unwrap();
        assert_eq!(json["totalTweets"], 3);
        assert_eq!(json["totalChunks"], 1);
        assert!(json.get("lastUpdated").is_some());
    }

    #[test]
    fn embedding_is_omitted_when_absent() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!(json.get("embedding").is_none());
    }

    #[test]
    fn media_kind_from_api() {
        assert_eq!(MediaKind::from_api("animated_gif"), Some(MediaKind::AnimatedGif));
        assert!(MediaKind::from_api("audio").is_none());
        assert!(MediaKind::Video.is_video_like());
        assert!(!MediaKind::Photo.is_video_like());
    }
}
