//! Bookmark timeline parser.
//!
//! Turns raw GraphQL timeline pages into [`Tweet`]s. Parsing is total: any
//! field that is missing or has the wrong shape becomes an empty/absent value
//! instead of an error, so a schema drift on X's side degrades output rather
//! than aborting a crawl.

use crate::model::{Author, MediaKind, Tweet, TweetMedia};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, trace};

/// Entry id prefix for post entries.
pub const TWEET_ENTRY_PREFIX: &str = "tweet-";

/// Entry id prefix for the pagination cursor pointing at older items.
pub const CURSOR_BOTTOM_PREFIX: &str = "cursor-bottom-";

/// One decoded page of the bookmark timeline.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub tweets: Vec<Tweet>,
    pub next_cursor: Option<String>,
    /// Total entries on the page, including cursors and non-post modules.
    pub entry_count: usize,
}

/// Stateless parser for bookmark timeline responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct TweetParser;

impl TweetParser {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a whole response body into tweets plus the next cursor.
    #[must_use]
    pub fn parse_page(&self, response: &Value) -> Page {
        let entries = Self::timeline_entries(response);
        let tweets: Vec<Tweet> = entries
            .iter()
            .filter(|e| entry_id(e).starts_with(TWEET_ENTRY_PREFIX))
            .map(|e| self.parse_entry(e))
            .collect();
        let next_cursor = Self::next_cursor(entries);

        debug!(
            entries = entries.len(),
            tweets = tweets.len(),
            has_cursor = next_cursor.is_some(),
            "Parsed timeline page"
        );

        Page {
            tweets,
            next_cursor,
            entry_count: entries.len(),
        }
    }

    /// Entries of the first timeline instruction that carries any.
    #[must_use]
    pub fn timeline_entries(response: &Value) -> &[Value] {
        response["data"]["bookmark_timeline_v2"]["timeline"]["instructions"]
            .as_array()
            .and_then(|instructions| {
                instructions
                    .iter()
                    .find_map(|i| i["entries"].as_array().map(Vec::as_slice))
            })
            .unwrap_or_default()
    }

    /// Value of the `cursor-bottom-` entry, if the page has one.
    #[must_use]
    pub fn next_cursor(entries: &[Value]) -> Option<String> {
        entries
            .iter()
            .find(|e| entry_id(e).starts_with(CURSOR_BOTTOM_PREFIX))
            .and_then(|e| e["content"]["value"].as_str())
            .filter(|v| !v.is_empty())
            .map(String::from)
    }

    /// Parse a single timeline entry. Never fails.
    #[must_use]
    pub fn parse_entry(&self, entry: &Value) -> Tweet {
        let result = &entry["content"]["itemContent"]["tweet_results"]["result"];
        // Posts with visibility restrictions are wrapped one level deeper.
        let tweet = if result["tweet"].is_object() {
            &result["tweet"]
        } else {
            result
        };
        let legacy = &tweet["legacy"];

        let full_text = tweet["note_tweet"]["note_tweet_results"]["result"]["text"]
            .as_str()
            .or_else(|| legacy["full_text"].as_str())
            .unwrap_or_default()
            .to_string();

        let timestamp = legacy["created_at"].as_str().and_then(parse_timestamp);
        if timestamp.is_none() {
            trace!(id = entry_id(entry), "Entry has no parseable created_at");
        }

        Tweet {
            id: entry_id(entry).to_string(),
            full_text,
            timestamp,
            media: parse_media(legacy),
            author: parse_author(&tweet["core"]["user_results"]["result"]),
            embedding: None,
        }
    }
}

fn entry_id(entry: &Value) -> &str {
    entry["entryId"].as_str().unwrap_or_default()
}

fn str_field(value: &Value) -> String {
    value.as_str().unwrap_or_default().to_string()
}

/// Parse the API's `created_at` ("Wed Oct 10 20:19:24 +0000 2018"), falling
/// back to RFC 2822 and RFC 3339.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_str(raw, "%a %b %d %H:%M:%S %z %Y")
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_media(legacy: &Value) -> Option<TweetMedia> {
    let first = legacy["entities"]["media"].get(0)?;
    let kind = MediaKind::from_api(first["type"].as_str()?)?;
    let fallback = first["media_url_https"].as_str();

    let source = if kind.is_video_like() {
        best_mp4_variant(&legacy["extended_entities"]["media"][0]["video_info"]["variants"])
            .or(fallback)
    } else {
        fallback
    }?;

    Some(TweetMedia {
        kind,
        source: source.to_string(),
    })
}

/// URL of the highest-bitrate `video/mp4` variant.
fn best_mp4_variant(variants: &Value) -> Option<&str> {
    variants
        .as_array()?
        .iter()
        .filter(|v| v["content_type"].as_str() == Some("video/mp4"))
        .filter_map(|v| Some((v["bitrate"].as_u64().unwrap_or(0), v["url"].as_str()?)))
        // max_by_key keeps the last maximum; reverse so the first listed wins ties
        .rev()
        .max_by_key(|&(bitrate, _)| bitrate)
        .map(|(_, url)| url)
}

fn parse_author(user: &Value) -> Author {
    let legacy = &user["legacy"];
    let core = &user["core"];

    let pick = |primary: &Value, secondary: &Value| {
        primary
            .as_str()
            .filter(|s| !s.is_empty())
            .map_or_else(|| str_field(secondary), String::from)
    };

    Author {
        name: pick(&legacy["name"], &core["name"]),
        screen_name: pick(&legacy["screen_name"], &core["screen_name"]),
        profile_image_url: pick(
            &legacy["profile_image_url_https"],
            &user["avatar"]["image_url"],
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use serde_json::json;

    fn entry(id: &str, result: Value) -> Value {
        json!({
            "entryId": id,
            "content": { "itemContent": { "tweet_results": { "result": result } } }
        })
    }

    fn full_result() -> Value {
        json!({
            "core": { "user_results": { "result": { "legacy": {
                "name": "Grace Hopper",
                "screen_name": "grace",
                "profile_image_url_https": "https://pbs.twimg.com/profile_images/1/a.jpg"
            }}}},
            "legacy": {
                "full_text": "Compilers are fun",
                "created_at": "Wed Oct 10 20:19:24 +0000 2024",
                "entities": { "media": [{
                    "type": "video",
                    "media_url_https": "https://pbs.twimg.com/thumb.jpg"
                }]},
                "extended_entities": { "media": [{ "video_info": { "variants": [
                    { "content_type": "application/x-mpegURL", "url": "https://video/pl.m3u8" },
                    { "content_type": "video/mp4", "bitrate": 256_000, "url": "https://video/low.mp4" },
                    { "content_type": "video/mp4", "bitrate": 2_176_000, "url": "https://video/high.mp4" },
                    { "content_type": "video/mp4", "bitrate": 832_000, "url": "https://video/mid.mp4" }
                ]}}]}
            }
        })
    }

    #[test]
    fn test_parse_x_timestamp() {
        let ts = parse_timestamp("Wed Oct 10 20:19:24 +0000 2018").unwrap();
        assert_eq!(ts.year(), 2018);
        assert_eq!(ts.to_rfc3339(), "2018-10-10T20:19:24+00:00");
    }

    #[test]
    fn test_parse_fallback_timestamps() {
        assert!(parse_timestamp("2024-02-29T10:00:00Z").is_some());
        assert!(parse_timestamp("Thu, 29 Feb 2024 10:00:00 +0000").is_some());
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn test_parse_full_entry() {
        let tweet = TweetParser::new().parse_entry(&entry("tweet-42", full_result()));
        assert_eq!(tweet.id, "tweet-42");
        assert_eq!(tweet.full_text, "Compilers are fun");
        assert_eq!(tweet.year(), Some(2024));
        assert_eq!(tweet.author.name, "Grace Hopper");
        assert_eq!(tweet.author.screen_name, "grace");
        let media = tweet.media.unwrap();
        assert_eq!(media.kind, MediaKind::Video);
        assert_eq!(media.source, "https://video/high.mp4");
    }

    #[test]
    fn test_visibility_wrapper_is_unwrapped() {
        let wrapped = json!({ "__typename": "TweetWithVisibilityResults", "tweet": full_result() });
        let tweet = TweetParser::new().parse_entry(&entry("tweet-7", wrapped));
        assert_eq!(tweet.full_text, "Compilers are fun");
        assert_eq!(tweet.author.screen_name, "grace");
    }

    #[test]
    fn test_video_without_mp4_falls_back_to_thumbnail() {
        let mut result = full_result();
        result["legacy"]["extended_entities"] = json!({});
        let tweet = TweetParser::new().parse_entry(&entry("tweet-1", result));
        assert_eq!(tweet.media.unwrap().source, "https://pbs.twimg.com/thumb.jpg");
    }

    #[test]
    fn test_photo_uses_media_url() {
        let mut result = full_result();
        result["legacy"]["entities"]["media"][0]["type"] = json!("photo");
        let tweet = TweetParser::new().parse_entry(&entry("tweet-1", result));
        let media = tweet.media.unwrap();
        assert_eq!(media.kind, MediaKind::Photo);
        assert_eq!(media.source, "https://pbs.twimg.com/thumb.jpg");
    }

    #[test]
    fn test_note_tweet_text_preferred() {
        let mut result = full_result();
        result["note_tweet"] =
            json!({ "note_tweet_results": { "result": { "text": "A much longer post" } } });
        let tweet = TweetParser::new().parse_entry(&entry("tweet-1", result));
        assert_eq!(tweet.full_text, "A much longer post");
    }

    #[test]
    fn test_newer_user_layout_fallback() {
        let result = json!({
            "core": { "user_results": { "result": {
                "core": { "name": "Linus", "screen_name": "linus" },
                "avatar": { "image_url": "https://pbs.twimg.com/l.jpg" },
                "legacy": {}
            }}},
            "legacy": { "full_text": "hi" }
        });
        let tweet = TweetParser::new().parse_entry(&entry("tweet-1", result));
        assert_eq!(tweet.author.name, "Linus");
        assert_eq!(tweet.author.screen_name, "linus");
        assert_eq!(tweet.author.profile_image_url, "https://pbs.twimg.com/l.jpg");
    }

    #[test]
    fn test_malformed_entries_never_panic() {
        let parser = TweetParser::new();
        for junk in [
            json!(null),
            json!(42),
            json!("tweet-"),
            json!([]),
            json!({ "entryId": 5 }),
            json!({ "entryId": "tweet-1", "content": [] }),
            json!({ "entryId": "tweet-1", "content": { "itemContent": { "tweet_results": { "result": { "legacy": { "entities": { "media": "nope" } } } } } } }),
        ] {
            let tweet = parser.parse_entry(&junk);
            assert!(tweet.full_text.is_empty());
            assert!(tweet.timestamp.is_none());
            assert!(tweet.media.is_none());
            assert!(tweet.author.name.is_empty());
            assert!(tweet.author.screen_name.is_empty());
        }
    }

    #[test]
    fn test_parse_page_filters_entries_and_finds_cursor() {
        let response = json!({ "data": { "bookmark_timeline_v2": { "timeline": { "instructions": [
            { "type": "TimelineClearCache" },
            { "type": "TimelineAddEntries", "entries": [
                entry("tweet-1", full_result()),
                { "entryId": "cursor-top-1", "content": { "value": "TOP" } },
                entry("tweet-2", full_result()),
                { "entryId": "cursor-bottom-1", "content": { "value": "NEXT" } }
            ]}
        ]}}}});
        let page = TweetParser::new().parse_page(&response);
        assert_eq!(page.tweets.len(), 2);
        assert_eq!(page.tweets[1].id, "tweet-2");
        assert_eq!(page.next_cursor.as_deref(), Some("NEXT"));
        assert_eq!(page.entry_count, 4);
    }

    #[test]
    fn test_parse_page_on_unexpected_shape() {
        let page = TweetParser::new().parse_page(&json!({ "errors": [{ "message": "nope" }] }));
        assert!(page.tweets.is_empty());
        assert!(page.next_cursor.is_none());
    }
}
