//! Typed run configuration.
//!
//! Everything the pipeline needs is read from one YAML file at startup and
//! validated before any browser or network activity begins. A run never
//! starts with a half-usable configuration: [`Config::load`] either returns a
//! fully checked [`Config`] or a [`ConfigError`].
//!
//! # Example
//!
//! ```yaml
//! io:
//!   metrics:
//!     - title: disaster
//!       description: Natural disasters such as floods or droughts
//!       rich_search: (flood OR drought OR "crop failure")
//!   countries:
//!     - { name: Kenya, code: KE }
//!   years: [2021, 2022]
//!   search_templates: ["[metric] in [country] [year]"]
//! extraction:
//!   news_instruction: "Find events for these metrics: [all metrics]."
//!   format_instruction: " Answer like [examples] or say no."
//!   output_format: '[{"country": "Kenya", "metric": "disaster", "dates": ["03-2021"]}]'
//! ```

use crate::error::ConfigError;
use crate::models::MetricKeywordMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, instrument};

/// Root of the YAML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub io: IoConfig,
    #[serde(default)]
    pub scraping: ScrapingConfig,
    #[serde(default)]
    pub cleaning: CleaningConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub run: RunConfig,
}

/// What to search for: metrics, countries and the year range.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IoConfig {
    pub metrics: Vec<MetricDefinition>,
    pub countries: Vec<Country>,
    /// Countries that get rows in the output table. Defaults to `countries`.
    #[serde(default)]
    pub accepted_countries: Vec<String>,
    pub years: Vec<u16>,
    /// Query templates with `[country]`, `[metric]` and `[year]` placeholders.
    pub search_templates: Vec<String>,
    #[serde(default)]
    pub exclusions: Vec<String>,
}

/// A risk metric the language model is asked to detect.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MetricDefinition {
    pub title: String,
    pub description: String,
    /// Search expression in the form `(kw1 OR kw2 OR "multi word")`.
    pub rich_search: String,
}

impl MetricDefinition {
    /// Split the OR-expression into plain keywords.
    pub fn keywords(&self) -> Vec<String> {
        self.rich_search
            .replace(['(', ')'], "")
            .split(" OR ")
            .map(|kw| kw.trim().trim_matches('"').trim().to_string())
            .filter(|kw| !kw.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Country {
    pub name: String,
    pub code: String,
}

/// Browser pool and search retrieval settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScrapingConfig {
    pub max_results: usize,
    /// Search requests in flight at once.
    pub search_concurrency: usize,
    pub language: String,
    pub region: String,
    /// Years per query; `2` turns `[2021, 2022, 2023]` into two queries.
    pub year_chunk_length: usize,
    /// Number of isolated browser contexts (N).
    pub browser_contexts: usize,
    /// Global ceiling on simultaneously open pages (M).
    pub max_tabs: usize,
    pub headless: bool,
    /// Wall-clock budget for resolving and extracting one URL.
    pub page_timeout_secs: u64,
    /// Upper bound on the network-idle wait after DOM load.
    pub settle_timeout_ms: u64,
    /// Extra wait for a client-side hop off an indirection link.
    pub redirect_wait_secs: u64,
    /// How long a task may wait for a free page slot. `None` waits forever.
    pub slot_wait_secs: Option<u64>,
    pub min_page_text_length: usize,
    pub min_block_length: usize,
    pub min_word_density: f64,
    pub skip_words: Vec<String>,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            max_results: 20,
            search_concurrency: 4,
            language: "en".to_string(),
            region: "US".to_string(),
            year_chunk_length: 1,
            browser_contexts: 5,
            max_tabs: 75,
            headless: true,
            page_timeout_secs: 30,
            settle_timeout_ms: 3_000,
            redirect_wait_secs: 10,
            slot_wait_secs: None,
            min_page_text_length: 500,
            min_block_length: 40,
            min_word_density: 0.3,
            skip_words: vec![
                "blocked".to_string(),
                "captcha".to_string(),
                "consent".to_string(),
            ],
        }
    }
}

/// Text cleanup applied to scraped pages.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CleaningConfig {
    pub repeated_phrase_min_words: usize,
    pub repeated_phrase_scan_words: usize,
    pub chunk_size: usize,
    pub max_nontext_ratio: f64,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            repeated_phrase_min_words: 3,
            repeated_phrase_scan_words: 200,
            chunk_size: 50,
            max_nontext_ratio: 0.3,
        }
    }
}

/// Keyword prefilter settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Fuzzy similarity in `0.0..=1.0`; scaled to a 0-100 score.
    pub fuzzy_threshold: f64,
    /// Tokens shorter than this never take the fuzzy path.
    pub min_token_chars: usize,
    pub trim_words_start: usize,
    pub trim_words_end: usize,
    pub concurrency: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.8,
            min_token_chars: 3,
            trim_words_start: 50,
            trim_words_end: 1500,
            concurrency: 50,
        }
    }
}

/// Language model prompt and dispatch settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractionConfig {
    pub news_instruction: String,
    #[serde(default)]
    pub format_instruction: String,
    #[serde(default)]
    pub output_format: String,
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
    #[serde(default)]
    pub accept_bare_years: bool,
    #[serde(default = "default_model_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

fn default_max_prompt_chars() -> usize {
    3_500 * 4
}

fn default_model_concurrency() -> usize {
    5
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_call_timeout_secs() -> u64 {
    120
}

/// A pipeline stage that can be run, skipped, or checkpointed.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Search,
    Scrape,
    Filter,
    Extract,
    Save,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Search => "search",
            Stage::Scrape => "scrape",
            Stage::Filter => "filter",
            Stage::Extract => "extract",
            Stage::Save => "save",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RunConfig {
    pub tasks: Vec<Stage>,
    pub save_points: Vec<Stage>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tasks: vec![
                Stage::Search,
                Stage::Scrape,
                Stage::Filter,
                Stage::Extract,
                Stage::Save,
            ],
            save_points: vec![Stage::Search, Stage::Scrape, Stage::Extract],
        }
    }
}

impl RunConfig {
    pub fn runs(&self, stage: Stage) -> bool {
        self.tasks.contains(&stage)
    }

    pub fn saves(&self, stage: Stage) -> bool {
        self.save_points.contains(&stage)
    }
}

impl Config {
    /// Read, parse and validate a YAML configuration file.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_yaml(&raw).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })?;
        info!(
            metrics = config.io.metrics.len(),
            countries = config.io.countries.len(),
            years = config.io.years.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.io.metrics.is_empty() {
            return Err(ConfigError::Missing("io.metrics"));
        }
        for metric in &self.io.metrics {
            if metric.title.trim().is_empty() {
                return Err(ConfigError::Missing("io.metrics[].title"));
            }
            if metric.keywords().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "io.metrics[].rich_search",
                    reason: format!("metric '{}' has no keywords", metric.title),
                });
            }
        }
        if self.io.countries.is_empty() {
            return Err(ConfigError::Missing("io.countries"));
        }
        if self.io.years.is_empty() {
            return Err(ConfigError::Missing("io.years"));
        }
        if self.io.search_templates.is_empty() {
            return Err(ConfigError::Missing("io.search_templates"));
        }
        if self.extraction.news_instruction.trim().is_empty() {
            return Err(ConfigError::Missing("extraction.news_instruction"));
        }
        if self.run.tasks.is_empty() {
            return Err(ConfigError::Missing("run.tasks"));
        }
        if self.run.save_points.is_empty() {
            return Err(ConfigError::Missing("run.save_points"));
        }
        if self.scraping.browser_contexts == 0 {
            return Err(ConfigError::Invalid {
                field: "scraping.browser_contexts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.scraping.max_tabs == 0 {
            return Err(ConfigError::Invalid {
                field: "scraping.max_tabs",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.filter.fuzzy_threshold) {
            return Err(ConfigError::Invalid {
                field: "filter.fuzzy_threshold",
                reason: format!("{} is outside 0.0..=1.0", self.filter.fuzzy_threshold),
            });
        }
        if self.cleaning.chunk_size == 0 {
            return Err(ConfigError::Invalid {
                field: "cleaning.chunk_size",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn metric_keywords(&self) -> MetricKeywordMap {
        self.io
            .metrics
            .iter()
            .map(|m| (m.title.clone(), m.keywords()))
            .collect()
    }

    pub fn metric_titles(&self) -> Vec<String> {
        self.io.metrics.iter().map(|m| m.title.clone()).collect()
    }

    /// Countries that get rows in the output table.
    pub fn table_countries(&self) -> Vec<String> {
        if self.io.accepted_countries.is_empty() {
            self.io.countries.iter().map(|c| c.name.clone()).collect()
        } else {
            self.io.accepted_countries.clone()
        }
    }

    /// The full instruction sent with every article.
    ///
    /// `[all metrics]` expands to one `title: description` line per metric and
    /// `[examples]` to the configured output format.
    pub fn extraction_instruction(&self) -> String {
        let metrics = self
            .io
            .metrics
            .iter()
            .map(|m| format!("{}: {}", m.title, m.description))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "{}{}",
            self.extraction.news_instruction, self.extraction.format_instruction
        )
        .replace("[all metrics]", &metrics)
        .replace("[examples]", &self.extraction.output_format)
    }
}
