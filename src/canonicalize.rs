//! Text preparation for embedding.
//!
//! # Pipeline
//!
//! 1. **Compose** - post text, author display name, author handle
//! 2. **Unicode NFC normalization**
//! 3. **Entity decoding** - `&amp;`, `&lt;`, `&gt;` as returned by the API
//! 4. **Link stripping** - `https://t.co/…` shorteners carry no meaning
//! 5. **Whitespace normalization** - collapse runs, trim edges
//! 6. **Truncation** - at most [`MAX_EMBED_CHARS`] characters
//!
//! The SHA-256 of the result is the cache key that decides whether a post's
//! stored vector is still valid.

use crate::model::Tweet;
use once_cell::sync::Lazy;
use regex::Regex;
use ring::digest::{self, SHA256};
use unicode_normalization::UnicodeNormalization;

/// Maximum characters to keep after canonicalization.
pub const MAX_EMBED_CHARS: usize = 2000;

static TCO_LINK: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"https?://t\.co/[A-Za-z0-9]+").ok());

/// The text a post is embedded from, before canonicalization.
#[must_use]
pub fn embedding_source(tweet: &Tweet) -> String {
    format!(
        "{} {} {}",
        tweet.full_text, tweet.author.name, tweet.author.screen_name
    )
}

/// Canonical embedding text for a post.
#[must_use]
pub fn embedding_text(tweet: &Tweet) -> String {
    canonicalize_for_embedding(&embedding_source(tweet))
}

/// Canonicalize arbitrary text (posts and queries alike).
#[must_use]
pub fn canonicalize_for_embedding(text: &str) -> String {
    let normalized: String = text.nfc().collect();
    let decoded = decode_entities(&normalized);
    let unlinked = match TCO_LINK.as_ref() {
        Some(re) => re.replace_all(&decoded, " ").into_owned(),
        None => decoded,
    };
    truncate_to_chars(&normalize_whitespace(&unlinked), MAX_EMBED_CHARS)
}

/// Hex SHA-256 of a post's canonical embedding text.
#[must_use]
pub fn tweet_content_hash(tweet: &Tweet) -> String {
    content_hash_hex(&embedding_text(tweet))
}

/// Compute SHA256 hash of text.
#[must_use]
pub fn content_hash(text: &str) -> [u8; 32] {
    let digest = digest::digest(&SHA256, text.as_bytes());
    let mut hash = [0u8; 32];
    hash.copy_from_slice(digest.as_ref());
    hash
}

/// Compute SHA256 hash and return as hex string.
#[must_use]
pub fn content_hash_hex(text: &str) -> String {
    use std::fmt::Write;

    content_hash(text)
        .iter()
        .fold(String::with_capacity(64), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    // &amp; last so "&amp;lt;" decodes to "&lt;", not "<"
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_to_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Author;

    fn tweet(text: &str) -> Tweet {
        Tweet {
            id: "tweet-1".into(),
            full_text: text.into(),
            timestamp: None,
            media: None,
            author: Author {
                name: "Rustacean".into(),
                screen_name: "ferris".into(),
                profile_image_url: String::new(),
            },
            embedding: None,
        }
    }

    #[test]
    fn test_embedding_text_includes_author() {
        assert_eq!(
            embedding_text(&tweet("Ownership  rules\n\nexplained")),
            "Ownership rules explained Rustacean ferris"
        );
    }

    #[test]
    fn test_strips_tco_links_and_decodes_entities() {
        let text = canonicalize_for_embedding("Tom &amp; Jerry &lt;3 https://t.co/AbC123xyz");
        assert_eq!(text, "Tom & Jerry <3");
        assert_eq!(canonicalize_for_embedding("&amp;lt;"), "&lt;");
    }

    #[test]
    fn test_nfc_normalization() {
        let decomposed = "cafe\u{0301}";
        assert_eq!(canonicalize_for_embedding(decomposed), "caf\u{e9}");
    }

    #[test]
    fn test_truncation_is_char_safe() {
        let long = "é".repeat(MAX_EMBED_CHARS + 50);
        assert_eq!(
            canonicalize_for_embedding(&long).chars().count(),
            MAX_EMBED_CHARS
        );
    }

    #[test]
    fn test_content_hash_tracks_text_changes() {
        let a = tweet_content_hash(&tweet("first"));
        let b = tweet_content_hash(&tweet("first"));
        let c = tweet_content_hash(&tweet("edited"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        // Whitespace-only edits do not invalidate
        assert_eq!(a, tweet_content_hash(&tweet("  first ")));
    }

    #[test]
    fn test_empty_hash_known_value() {
        assert_eq!(
            content_hash_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
