//! Google News RSS search client.
//!
//! Queries `news.google.com/rss/search` with the publication window folded
//! into the query text (`after:` / `before:`) and the locale passed as
//! `hl`/`gl`/`ceid`. Item links are Google News indirection URLs; the
//! browser pool resolves them to the publisher later.

use super::{SearchProvider, SearchRequest};
use crate::error::ExternalServiceError;
use crate::models::SearchHit;
use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::Client;
use scraper::Html;
use std::time::Duration;
use tracing::{debug, info, instrument};

const DEFAULT_BASE_URL: &str = "https://news.google.com/rss/search";

/// Google News RSS client
#[derive(Debug, Clone)]
pub struct GoogleNewsClient {
    client: Client,
    base_url: String,
    language: String,
    region: String,
}

impl GoogleNewsClient {
    pub fn new(language: &str, region: &str) -> Result<Self, ExternalServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("Mozilla/5.0 (compatible; risk_text_news/0.1)")
            .build()
            .map_err(|e| ExternalServiceError::Search(e.to_string()))?;
        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            language: language.to_string(),
            region: region.to_string(),
        })
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Full feed URL for one request.
    pub fn feed_url(&self, request: &SearchRequest) -> String {
        let mut query = request.query_text.clone();
        if let Some((start, end)) = request.date_range {
            query.push_str(&format!(
                " after:{} before:{}",
                start.format("%Y-%m-%d"),
                end.format("%Y-%m-%d")
            ));
        }
        format!(
            "{}?q={}&hl={lang}&gl={region}&ceid={region}:{lang}",
            self.base_url,
            urlencoding::encode(&query),
            lang = self.language,
            region = self.region,
        )
    }
}

impl SearchProvider for GoogleNewsClient {
    #[instrument(level = "info", skip_all, fields(query = %request.query_text, country = %request.country_code))]
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, ExternalServiceError> {
        let url = self.feed_url(request);
        debug!(%url, "Fetching Google News RSS");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ExternalServiceError::Search(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ExternalServiceError::Search(format!(
                "Google News returned status {}",
                response.status()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| ExternalServiceError::Search(e.to_string()))?;

        let mut hits = parse_feed(&body)?;
        hits.truncate(request.max_results);
        info!(count = hits.len(), "Google News returned items");
        Ok(hits)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Field {
    Title,
    Link,
    PubDate,
    Description,
}

#[derive(Debug, Default)]
struct ItemFields {
    title: String,
    link: String,
    pub_date: String,
    description: String,
}

impl ItemFields {
    fn push(&mut self, field: Field, text: &str) {
        let target = match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
            Field::PubDate => &mut self.pub_date,
            Field::Description => &mut self.description,
        };
        target.push_str(text);
    }

    fn into_hit(self) -> Option<SearchHit> {
        let url = self.link.trim().to_string();
        if url.is_empty() {
            return None;
        }
        let non_empty = |s: String| {
            let s = s.trim().to_string();
            (!s.is_empty()).then_some(s)
        };
        Some(SearchHit {
            url,
            title: self.title.trim().to_string(),
            published_date: non_empty(self.pub_date),
            description: non_empty(html_to_text(&self.description)),
        })
    }
}

/// Parse an RSS 2.0 document into hits, in feed order.
pub fn parse_feed(xml: &str) -> Result<Vec<SearchHit>, ExternalServiceError> {
    let mut reader = Reader::from_str(xml);
    let mut hits = Vec::new();
    let mut item: Option<ItemFields> = None;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                field = match e.name().as_ref() {
                    b"item" => {
                        item = Some(ItemFields::default());
                        None
                    }
                    b"title" => Some(Field::Title),
                    b"link" => Some(Field::Link),
                    b"pubDate" => Some(Field::PubDate),
                    b"description" => Some(Field::Description),
                    _ => None,
                };
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"item" {
                    if let Some(hit) = item.take().and_then(ItemFields::into_hit) {
                        hits.push(hit);
                    }
                }
                field = None;
            }
            Ok(Event::Text(t)) => {
                if let (Some(item), Some(field)) = (item.as_mut(), field) {
                    item.push(field, &String::from_utf8_lossy(&t));
                }
            }
            Ok(Event::CData(t)) => {
                if let (Some(item), Some(field)) = (item.as_mut(), field) {
                    item.push(field, &String::from_utf8_lossy(&t));
                }
            }
            Ok(Event::GeneralRef(r)) => {
                if let (Some(item), Some(field)) = (item.as_mut(), field) {
                    if let Some(resolved) = resolve_reference(&String::from_utf8_lossy(&r)) {
                        item.push(field, &resolved);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ExternalServiceError::Search(format!(
                    "malformed feed at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }
    Ok(hits)
}

fn resolve_reference(name: &str) -> Option<String> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code).map(String::from);
    }
    quick_xml::escape::resolve_predefined_entity(name).map(str::to_string)
}

/// Item descriptions are escaped HTML snippets.
fn html_to_text(snippet: &str) -> String {
    let fragment = Html::parse_fragment(snippet);
    fragment
        .root_element()
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
