//! "Wrapped"-style summary of the saved collection.
//!
//! Everything is computed in one pass over the loaded posts; nothing here
//! touches the store.

use crate::model::{MediaKind, Tweet};
use chrono::Datelike;
use serde::Serialize;
use std::collections::HashMap;

/// Average adult silent reading speed.
pub const WORDS_PER_MINUTE: usize = 238;

/// Authors listed in the leaderboard.
pub const TOP_AUTHORS: usize = 5;

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorCount {
    pub name: String,
    pub screen_name: String,
    /// Full-size avatar (the API's `_normal` thumbnail suffix removed).
    pub profile_image_url: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthCount {
    pub month: &'static str,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MediaBreakdown {
    pub photos: usize,
    pub videos: usize,
    pub animated_gifs: usize,
    pub text_only: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WrappedStats {
    pub total: usize,
    pub top_authors: Vec<AuthorCount>,
    pub unique_authors: usize,
    pub total_words: usize,
    /// `total_words / 238`, rounded to the nearest minute.
    pub reading_minutes: usize,
    /// Posts per calendar month, January first, all years combined.
    pub monthly: [usize; 12],
    pub busiest_month: Option<MonthCount>,
    /// Posts whose timestamp could not be parsed.
    pub undated: usize,
    pub media: MediaBreakdown,
}

impl WrappedStats {
    /// Summarize `tweets`. Ties in the author and month rankings go to
    /// whichever appeared first.
    #[must_use]
    pub fn compute(tweets: &[Tweet]) -> Self {
        let mut stats = Self {
            total: tweets.len(),
            ..Self::default()
        };

        let mut authors: Vec<AuthorCount> = Vec::new();
        let mut author_slots: HashMap<&str, usize> = HashMap::new();
        let mut month_order: Vec<usize> = Vec::new();

        for tweet in tweets {
            let handle = tweet.author.screen_name.as_str();
            match author_slots.get(handle) {
                Some(&slot) => authors[slot].count += 1,
                None => {
                    author_slots.insert(handle, authors.len());
                    authors.push(AuthorCount {
                        name: tweet.author.name.clone(),
                        screen_name: tweet.author.screen_name.clone(),
                        profile_image_url: tweet.author.profile_image_url.replace("_normal", ""),
                        count: 1,
                    });
                }
            }

            stats.total_words += word_count(&tweet.full_text);

            match tweet.timestamp {
                Some(ts) => {
                    let month = ts.month0() as usize;
                    if stats.monthly[month] == 0 {
                        month_order.push(month);
                    }
                    stats.monthly[month] += 1;
                }
                None => stats.undated += 1,
            }

            match tweet.media.as_ref().map(|m| m.kind) {
                Some(MediaKind::Photo) => stats.media.photos += 1,
                Some(MediaKind::Video) => stats.media.videos += 1,
                Some(MediaKind::AnimatedGif) => stats.media.animated_gifs += 1,
                None => stats.media.text_only += 1,
            }
        }

        stats.unique_authors = authors.len();
        // stable: equal counts keep first-seen order
        authors.sort_by(|a, b| b.count.cmp(&a.count));
        authors.truncate(TOP_AUTHORS);
        stats.top_authors = authors;

        stats.reading_minutes = reading_minutes(stats.total_words);
        stats.busiest_month = month_order
            .iter()
            .copied()
            .fold(None::<usize>, |best, m| match best {
                Some(b) if stats.monthly[b] >= stats.monthly[m] => Some(b),
                _ => Some(m),
            })
            .map(|m| MonthCount {
                month: MONTH_NAMES[m],
                count: stats.monthly[m],
            });

        stats
    }
}

/// Whitespace-separated words; empty text has none.
#[must_use]
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Minutes to read `words`, rounded half up.
#[must_use]
pub const fn reading_minutes(words: usize) -> usize {
    (words + WORDS_PER_MINUTE / 2) / WORDS_PER_MINUTE
}

#[must_use]
pub const fn month_name(month0: usize) -> &'static str {
    if month0 < 12 { MONTH_NAMES[month0] } else { "" }
}

/// ASCII sparkline using `▁▂▃▄▅▆▇█`, one character per value.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn sparkline(values: &[usize]) -> String {
    const BLOCKS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    let max = values.iter().copied().max().unwrap_or(0);
    if max == 0 {
        return "▁".repeat(values.len());
    }
    values
        .iter()
        .map(|&v| BLOCKS[(((v as f64 / max as f64) * 7.0) as usize).min(7)])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Author, TweetMedia};
    use chrono::{TimeZone, Utc};

    fn tweet(handle: &str, text: &str, month: Option<u32>, media: Option<MediaKind>) -> Tweet {
        Tweet {
            id: format!("tweet-{handle}-{text}"),
            full_text: text.into(),
            timestamp: month.and_then(|m| Utc.with_ymd_and_hms(2024, m, 3, 10, 0, 0).single()),
            media: media.map(|kind| TweetMedia {
                kind,
                source: "https://pbs.twimg.com/media/x.jpg".into(),
            }),
            author: Author {
                name: handle.to_uppercase(),
                screen_name: handle.into(),
                profile_image_url: format!("https://pbs.twimg.com/{handle}_normal.jpg"),
            },
            embedding: None,
        }
    }

    #[test]
    fn test_empty_collection() {
        let stats = WrappedStats::compute(&[]);
        assert_eq!(stats.total, 0);
        assert!(stats.top_authors.is_empty());
        assert!(stats.busiest_month.is_none());
        assert_eq!(stats.reading_minutes, 0);
    }

    #[test]
    fn test_top_authors_ranked_and_capped() {
        let mut tweets = Vec::new();
        for (handle, n) in [("a", 1), ("b", 3), ("c", 2), ("d", 2), ("e", 1), ("f", 4)] {
            for i in 0..n {
                tweets.push(tweet(handle, &format!("post {i}"), Some(1), None));
            }
        }
        let stats = WrappedStats::compute(&tweets);
        let handles: Vec<_> = stats.top_authors.iter().map(|a| a.screen_name.as_str()).collect();
        assert_eq!(handles, vec!["f", "b", "c", "d", "a"]);
        assert_eq!(stats.unique_authors, 6);
        assert_eq!(
            stats.top_authors[0].profile_image_url,
            "https://pbs.twimg.com/f.jpg"
        );
    }

    #[test]
    fn test_reading_time_rounds() {
        assert_eq!(reading_minutes(0), 0);
        assert_eq!(reading_minutes(118), 0);
        assert_eq!(reading_minutes(119), 1);
        assert_eq!(reading_minutes(476), 2);

        let words = "word ".repeat(300);
        let stats = WrappedStats::compute(&[tweet("a", &words, None, None)]);
        assert_eq!(stats.total_words, 300);
        assert_eq!(stats.reading_minutes, 1);
    }

    #[test]
    fn test_busiest_month_and_undated() {
        let tweets = vec![
            tweet("a", "x", Some(3), None),
            tweet("a", "y", Some(7), None),
            tweet("a", "z", Some(7), None),
            tweet("a", "w", Some(3), None),
            tweet("a", "v", None, None),
        ];
        let stats = WrappedStats::compute(&tweets);
        // March and July tie; March was seen first
        assert_eq!(
            stats.busiest_month,
            Some(MonthCount {
                month: "March",
                count: 2
            })
        );
        assert_eq!(stats.undated, 1);
        assert_eq!(stats.monthly[6], 2);
    }

    #[test]
    fn test_media_breakdown() {
        let tweets = vec![
            tweet("a", "1", None, Some(MediaKind::Photo)),
            tweet("a", "2", None, Some(MediaKind::Video)),
            tweet("a", "3", None, Some(MediaKind::AnimatedGif)),
            tweet("a", "4", None, None),
            tweet("a", "5", None, Some(MediaKind::Photo)),
        ];
        let media = WrappedStats::compute(&tweets).media;
        assert_eq!(
            media,
            MediaBreakdown {
                photos: 2,
                videos: 1,
                animated_gifs: 1,
                text_only: 1
            }
        );
    }

    #[test]
    fn test_sparkline() {
        assert_eq!(sparkline(&[0, 0]), "▁▁");
        assert_eq!(sparkline(&[0, 7, 14]), "▁▄█");
        assert_eq!(sparkline(&[]), "");
    }
}
