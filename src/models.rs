//! Data models shared by the pipeline stages.
//!
//! - [`SearchQuery`]: one generated query for a country/metric/year chunk
//! - [`SearchHit`]: one candidate article returned by the search backend
//! - [`Article`]: a hit as it accumulates scraped text and extracted facts
//! - [`ExtractedFact`]: a validated (country, metric, dates) triple
//! - [`VisitedUrls`]: run-wide URL dedup shared by concurrent fetch tasks

use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metric title → keywords used by the prefilter. Read-only during a run.
pub type MetricKeywordMap = BTreeMap<String, Vec<String>>;

/// A generated search query, consumed once by the retrieval step.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SearchQuery {
    pub search_text: String,
    pub country_name: String,
    pub country_code: String,
    pub metric_title: String,
    pub years: Vec<String>,
}

/// A candidate article as returned by the search backend.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SearchHit {
    /// Publisher URL, or an indirection link that redirects to it.
    pub url: String,
    pub title: String,
    pub published_date: Option<String>,
    pub description: Option<String>,
}

/// An article as it moves through the pipeline.
///
/// `full_text` is filled by the scrape stage and `parsed` by the extraction
/// stage. The record is serialized as-is at each checkpoint.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Article {
    pub url: String,
    pub country: String,
    pub search_query: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub published_date: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Landing page after redirects, set by the scrape stage.
    #[serde(default)]
    pub resolved_url: Option<String>,
    #[serde(default)]
    pub full_text: Option<String>,
    #[serde(default)]
    pub parsed: Option<Vec<ExtractedFact>>,
}

impl Article {
    pub fn from_hit(hit: SearchHit, query: &SearchQuery) -> Self {
        Self {
            url: hit.url,
            country: query.country_name.clone(),
            search_query: query.search_text.clone(),
            title: hit.title,
            published_date: hit.published_date,
            description: hit.description,
            resolved_url: None,
            full_text: None,
            parsed: None,
        }
    }
}

/// A validated fact extracted from one article.
///
/// Only produced by the extraction agent's parser: `country` is non-empty,
/// `metric` is lower-case and allow-listed, and `dates` is non-empty with
/// every entry in `MM-YYYY` (or `YYYY` when bare years are enabled).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ExtractedFact {
    pub country: String,
    pub metric: String,
    pub dates: Vec<String>,
}

/// URLs already accepted during this run.
///
/// [`VisitedUrls::claim`] is the only way in: the membership test and the
/// insertion happen under one shard lock, so two tasks racing on the same
/// URL cannot both win.
#[derive(Debug, Default)]
pub struct VisitedUrls {
    seen: DashSet<String>,
}

impl VisitedUrls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` exactly once per distinct URL.
    pub fn claim(&self, url: &str) -> bool {
        self.seen.insert(url.to_string())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }
}
