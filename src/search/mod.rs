//! Search retrieval.
//!
//! A [`SearchProvider`] turns one [`SearchRequest`] into candidate hits.
//! [`collect_articles`] fans the generated queries out over a provider,
//! absorbs per-query failures, and keeps only hits whose URL wins the
//! run-wide [`VisitedUrls`] claim.

pub mod google_news;

use crate::error::ExternalServiceError;
use crate::models::{Article, SearchHit, SearchQuery, VisitedUrls};
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use tracing::{info, instrument, warn};

/// One call to the search backend.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query_text: String,
    pub country_code: String,
    pub max_results: usize,
    /// `[start, end)` publication window.
    pub date_range: Option<(NaiveDate, NaiveDate)>,
}

impl SearchRequest {
    /// The window covers every year the query mentions.
    pub fn for_query(query: &SearchQuery, max_results: usize) -> Self {
        let years: Vec<i32> = query.years.iter().filter_map(|y| y.parse().ok()).collect();
        let date_range = match (years.iter().min(), years.iter().max()) {
            (Some(&first), Some(&last)) => NaiveDate::from_ymd_opt(first, 1, 1)
                .zip(NaiveDate::from_ymd_opt(last + 1, 1, 1)),
            _ => None,
        };
        Self {
            query_text: query.search_text.clone(),
            country_code: query.country_code.clone(),
            max_results,
            date_range,
        }
    }
}

/// A news search backend.
pub trait SearchProvider {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, ExternalServiceError>;
}

impl<T: SearchProvider> SearchProvider for &T {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, ExternalServiceError> {
        (**self).search(request).await
    }
}

/// Run every query and turn first-seen hits into articles.
#[instrument(level = "info", skip_all, fields(queries = queries.len()))]
pub async fn collect_articles<P: SearchProvider>(
    provider: &P,
    queries: &[SearchQuery],
    visited: &VisitedUrls,
    max_results: usize,
    concurrency: usize,
) -> Vec<Article> {
    let batches: Vec<Vec<Article>> = stream::iter(queries)
        .map(|query| async move {
            let request = SearchRequest::for_query(query, max_results);
            match provider.search(&request).await {
                Ok(hits) => {
                    let total = hits.len();
                    let fresh: Vec<Article> = hits
                        .into_iter()
                        .filter(|hit| visited.claim(&hit.url))
                        .map(|hit| Article::from_hit(hit, query))
                        .collect();
                    info!(
                        query = %query.search_text,
                        total,
                        fresh = fresh.len(),
                        "Search returned hits"
                    );
                    fresh
                }
                Err(e) => {
                    warn!(query = %query.search_text, error = %e, "Search failed; continuing");
                    Vec::new()
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let articles: Vec<Article> = batches.into_iter().flatten().collect();
    info!(count = articles.len(), "Collected candidate articles");
    articles
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        hits: Vec<SearchHit>,
        fail_on: Option<&'static str>,
    }

    impl SearchProvider for Fixed {
        async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, ExternalServiceError> {
            tokio::task::yield_now().await;
            if self.fail_on == Some(request.query_text.as_str()) {
                return Err(ExternalServiceError::Search("boom".to_string()));
            }
            Ok(self.hits.clone())
        }
    }

    fn query(text: &str, years: &[&str]) -> SearchQuery {
        SearchQuery {
            search_text: text.to_string(),
            country_name: "Kenya".to_string(),
            country_code: "KE".to_string(),
            metric_title: "disaster".to_string(),
            years: years.iter().map(|y| y.to_string()).collect(),
        }
    }

    fn hit(url: &str) -> SearchHit {
        SearchHit {
            url: url.to_string(),
            title: "Floods".to_string(),
            published_date: None,
            description: None,
        }
    }

    #[test]
    fn test_request_date_range_spans_years() {
        let request = SearchRequest::for_query(&query("q", &["2022", "2021"]), 20);
        assert_eq!(
            request.date_range,
            Some((
                NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()
            ))
        );
        assert_eq!(SearchRequest::for_query(&query("q", &[]), 20).date_range, None);
    }

    #[tokio::test]
    async fn test_same_url_from_concurrent_queries_yields_one_article() {
        let provider = Fixed {
            hits: vec![hit("https://example.com/floods")],
            fail_on: None,
        };
        let visited = VisitedUrls::new();
        let queries = vec![query("floods in Kenya", &["2021"]), query("drought in Kenya", &["2021"])];

        let articles = collect_articles(&provider, &queries, &visited, 20, 2).await;
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].url, "https://example.com/floods");
        assert_eq!(visited.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_query_does_not_abort_the_rest() {
        let provider = Fixed {
            hits: vec![hit("https://example.com/a"), hit("https://example.com/b")],
            fail_on: Some("broken"),
        };
        let visited = VisitedUrls::new();
        let queries = vec![query("broken", &["2021"]), query("floods in Kenya", &["2021"])];

        let articles = collect_articles(&provider, &queries, &visited, 20, 1).await;
        assert_eq!(articles.len(), 2);
        assert!(articles.iter().all(|a| a.search_query == "floods in Kenya"));
    }

    #[tokio::test]
    async fn test_urls_seen_in_earlier_runs_are_skipped() {
        let provider = Fixed {
            hits: vec![hit("https://example.com/a"), hit("https://example.com/b")],
            fail_on: None,
        };
        let visited = VisitedUrls::new();
        visited.claim("https://example.com/a");

        let articles = collect_articles(&provider, &[query("q", &["2021"])], &visited, 20, 1).await;
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].url, "https://example.com/b");
    }
}
