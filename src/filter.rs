//! Keyword prefilter that culls articles before the language model sees them.
//!
//! An article is kept when any keyword of any metric appears in it, either
//! verbatim or as a fuzzy match against one of its tokens. Which metric the
//! article is actually about is decided later by the extraction agent.

use crate::models::MetricKeywordMap;
use std::sync::Arc;
use tracing::{debug, error};

/// OR-filter over every metric's keyword list.
#[derive(Debug, Clone)]
pub struct KeywordPrefilter {
    keywords: MetricKeywordMap,
    min_score: f64,
    min_token_chars: usize,
}

impl KeywordPrefilter {
    /// `fuzzy_threshold` is a similarity in `0.0..=1.0`.
    pub fn new(keywords: &MetricKeywordMap, fuzzy_threshold: f64, min_token_chars: usize) -> Self {
        let keywords = keywords
            .iter()
            .map(|(metric, kws)| {
                let lowered = kws
                    .iter()
                    .map(|kw| kw.trim().to_lowercase())
                    .filter(|kw| !kw.is_empty())
                    .collect();
                (metric.clone(), lowered)
            })
            .collect();
        Self {
            keywords,
            min_score: fuzzy_threshold * 100.0,
            min_token_chars,
        }
    }

    /// True as soon as one metric/keyword/token combination matches.
    pub fn is_relevant(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split_whitespace()
            .filter(|t| t.chars().count() >= self.min_token_chars)
            .collect();

        for (metric, keywords) in &self.keywords {
            for keyword in keywords {
                if lowered.contains(keyword.as_str()) {
                    debug!(%metric, %keyword, "Exact keyword match");
                    return true;
                }
                if let Some(token) = tokens
                    .iter()
                    .find(|token| partial_ratio(keyword, token) >= self.min_score)
                {
                    debug!(%metric, %keyword, %token, "Fuzzy keyword match");
                    return true;
                }
            }
        }
        false
    }

    /// Run [`Self::is_relevant`] on the blocking pool.
    pub async fn is_relevant_offloaded(self: Arc<Self>, text: String) -> bool {
        match tokio::task::spawn_blocking(move || self.is_relevant(&text)).await {
            Ok(keep) => keep,
            Err(e) => {
                error!(error = %e, "Prefilter task failed; dropping article");
                false
            }
        }
    }
}

/// Best similarity (0-100) between the shorter string and any equally long
/// window of the longer one.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let (short, long) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    let short_len = short.chars().count();
    if short_len == 0 {
        return 0.0;
    }

    let long_chars: Vec<char> = long.chars().collect();
    long_chars
        .windows(short_len)
        .map(|window| {
            let window: String = window.iter().collect();
            strsim::normalized_levenshtein(short, &window) * 100.0
        })
        .fold(0.0, f64::max)
}
