//! Per-country orchestration of the five stages.
//!
//! ```text
//! search → scrape → filter → extract → save
//! ```
//!
//! Each country runs the configured stages in order. A stage listed in
//! `run.save_points` writes a JSON checkpoint; a stage missing from
//! `run.tasks` is skipped and the stage after it reads the previous
//! checkpoint instead. Skipping `filter` passes articles through unchanged.
//! The save stage runs once, after every country, and writes the CSV.

use crate::agent::ExtractionAgent;
use crate::aggregate::{aggregate, flatten};
use crate::api::LanguageModel;
use crate::browser::PageFetcher;
use crate::config::{Config, Country, Stage};
use crate::error::PipelineError;
use crate::filter::KeywordPrefilter;
use crate::models::{Article, ExtractedFact, VisitedUrls};
use crate::outputs::OutputLayout;
use crate::outputs::csv::write_table;
use crate::outputs::json::{read_json, write_json};
use crate::queries::generate_queries;
use crate::run_context::RunContext;
use crate::search::{SearchProvider, collect_articles};
use crate::text::{TextCleaner, trim_words};
use futures::future::ready;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub countries: usize,
    pub facts: usize,
    pub csv: Option<PathBuf>,
}

pub struct Pipeline<S, F, M> {
    config: Config,
    layout: OutputLayout,
    provider: S,
    fetcher: F,
    agent: ExtractionAgent<M>,
    cleaner: TextCleaner,
    prefilter: Arc<KeywordPrefilter>,
    visited: VisitedUrls,
}

impl<S, F, M> Pipeline<S, F, M>
where
    S: SearchProvider,
    F: PageFetcher,
    M: LanguageModel,
{
    pub fn new(config: Config, layout: OutputLayout, provider: S, fetcher: F, agent: ExtractionAgent<M>) -> Self {
        let prefilter = KeywordPrefilter::new(
            &config.metric_keywords(),
            config.filter.fuzzy_threshold,
            config.filter.min_token_chars,
        );
        Self {
            cleaner: TextCleaner::new(config.cleaning.clone()),
            prefilter: Arc::new(prefilter),
            visited: VisitedUrls::new(),
            config,
            layout,
            provider,
            fetcher,
            agent,
        }
    }

    /// Run every configured stage for every country, then aggregate.
    #[instrument(level = "info", skip_all, fields(countries = self.config.io.countries.len()))]
    pub async fn run(&self, ctx: &mut RunContext) -> Result<RunSummary, PipelineError> {
        let mut facts = Vec::new();
        for country in &self.config.io.countries {
            info!(country = %country.name, "Processing country");
            facts.extend(self.run_country(country, ctx).await?);
        }

        let csv = if self.config.run.runs(Stage::Save) {
            let path = self.layout.csv_path(ctx.timestamp());
            let table = aggregate(
                &facts,
                &self.config.metric_titles(),
                &self.config.table_countries(),
                &self.config.io.years,
            );
            ctx.timed(Stage::Save.label(), write_table(&table, &path)).await?;
            Some(path)
        } else {
            None
        };

        Ok(RunSummary {
            countries: self.config.io.countries.len(),
            facts: facts.len(),
            csv,
        })
    }

    #[instrument(level = "info", skip_all, fields(country = %country.name))]
    async fn run_country(&self, country: &Country, ctx: &mut RunContext) -> Result<Vec<ExtractedFact>, PipelineError> {
        let run = &self.config.run;
        let name = country.name.as_str();

        let searched = if run.runs(Stage::Search) {
            let articles = ctx
                .timed(label(name, Stage::Search), self.search_articles(country))
                .await;
            self.checkpoint(Stage::Search, name, &articles).await?;
            Some(articles)
        } else {
            None
        };

        let scraped = if run.runs(Stage::Scrape) {
            let input = match searched {
                Some(articles) => articles,
                None => self.load(Stage::Search, name).await?,
            };
            let articles = ctx
                .timed(label(name, Stage::Scrape), self.scrape_articles(input))
                .await;
            self.checkpoint(Stage::Scrape, name, &articles).await?;
            Some(articles)
        } else {
            None
        };

        let filtered = if run.runs(Stage::Filter) {
            let input = match scraped {
                Some(articles) => articles,
                None => self.load(Stage::Scrape, name).await?,
            };
            let articles = ctx
                .timed(label(name, Stage::Filter), self.filter_articles(input))
                .await;
            self.checkpoint(Stage::Filter, name, &articles).await?;
            Some(articles)
        } else {
            scraped
        };

        if run.runs(Stage::Extract) {
            let input = match filtered {
                Some(articles) => articles,
                None => self.load_extract_input(name).await?,
            };
            let articles = ctx
                .timed(label(name, Stage::Extract), self.extract_facts(input))
                .await;
            self.checkpoint(Stage::Extract, name, &articles).await?;
            Ok(flatten(&articles))
        } else if run.runs(Stage::Save) {
            let articles = self.load(Stage::Extract, name).await?;
            Ok(flatten(&articles))
        } else {
            Ok(Vec::new())
        }
    }

    /// Generate the country's queries and keep first-seen hits.
    pub async fn search_articles(&self, country: &Country) -> Vec<Article> {
        let scraping = &self.config.scraping;
        let queries = generate_queries(&self.config.io, country, scraping.year_chunk_length);
        let articles = collect_articles(
            &self.provider,
            &queries,
            &self.visited,
            scraping.max_results,
            scraping.search_concurrency,
        )
        .await;
        debug!(seen_this_run = self.visited.len(), "Visited URL set");
        articles
    }

    /// Fetch and clean page text. Articles whose page yields nothing are
    /// dropped. Contexts are assigned round-robin.
    #[instrument(level = "info", skip_all, fields(articles = articles.len()))]
    pub async fn scrape_articles(&self, articles: Vec<Article>) -> Vec<Article> {
        let contexts = self.fetcher.contexts().max(1);
        let scraped: Vec<Article> = stream::iter(articles.into_iter().enumerate())
            .map(|(i, mut article)| async move {
                let fetched = self.fetcher.extract(&article.url, i % contexts).await;
                match fetched {
                    Ok(Some(page)) => {
                        let text = self.cleaner.clean(&page.text);
                        if text.is_empty() {
                            debug!(url = %article.url, "Nothing left after cleaning");
                            return None;
                        }
                        article.resolved_url = Some(page.final_url);
                        article.full_text = Some(text);
                        Some(article)
                    }
                    Ok(None) => {
                        debug!(url = %article.url, "No text extracted");
                        None
                    }
                    Err(e) => {
                        warn!(url = %article.url, error = %e, "Scrape failed; skipping article");
                        None
                    }
                }
            })
            .buffer_unordered(self.config.scraping.max_tabs.max(1))
            .filter_map(ready)
            .collect()
            .await;
        info!(count = scraped.len(), "Scraped articles");
        scraped
    }

    /// Trim each text to the configured word window and keep articles that
    /// mention any metric keyword.
    #[instrument(level = "info", skip_all, fields(articles = articles.len()))]
    pub async fn filter_articles(&self, articles: Vec<Article>) -> Vec<Article> {
        let settings = &self.config.filter;
        let kept: Vec<Article> = stream::iter(articles)
            .map(|mut article| {
                let prefilter = Arc::clone(&self.prefilter);
                async move {
                    let text = article.full_text.take()?;
                    let trimmed = trim_words(&text, settings.trim_words_start, settings.trim_words_end);
                    if !prefilter.is_relevant_offloaded(trimmed.clone()).await {
                        debug!(url = %article.url, "No metric keyword; dropping article");
                        return None;
                    }
                    article.full_text = Some(trimmed);
                    Some(article)
                }
            })
            .buffer_unordered(settings.concurrency.max(1))
            .filter_map(ready)
            .collect()
            .await;
        info!(count = kept.len(), "Articles passed the keyword filter");
        kept
    }

    /// Ask the model about every article with text. Model failures are
    /// logged and leave the article without facts.
    #[instrument(level = "info", skip_all, fields(articles = articles.len()))]
    pub async fn extract_facts(&self, articles: Vec<Article>) -> Vec<Article> {
        let extracted: Vec<Article> = stream::iter(articles)
            .map(|mut article| async move {
                let text = article.full_text.as_deref()?;
                let result = self.agent.extract(text).await;
                match result {
                    Ok(facts) => article.parsed = facts,
                    Err(e) => {
                        warn!(url = %article.url, error = %e, "Extraction failed; skipping article");
                    }
                }
                Some(article)
            })
            .buffer_unordered(self.config.extraction.concurrency.max(1))
            .filter_map(ready)
            .collect()
            .await;
        info!(
            count = extracted.len(),
            with_facts = extracted.iter().filter(|a| a.parsed.is_some()).count(),
            "Extraction finished"
        );
        extracted
    }

    fn checkpoint_path(&self, stage: Stage, country: &str) -> PathBuf {
        match stage {
            Stage::Search => self.layout.search_checkpoint(country),
            Stage::Scrape => self.layout.scrape_checkpoint(country),
            Stage::Filter => self.layout.filter_checkpoint(country),
            Stage::Extract | Stage::Save => self.layout.extract_checkpoint(country),
        }
    }

    async fn checkpoint(&self, stage: Stage, country: &str, articles: &[Article]) -> Result<(), PipelineError> {
        if !self.config.run.saves(stage) {
            return Ok(());
        }
        write_json(articles, &self.checkpoint_path(stage, country)).await
    }

    async fn load(&self, stage: Stage, country: &str) -> Result<Vec<Article>, PipelineError> {
        read_json(&self.checkpoint_path(stage, country))
            .await?
            .ok_or_else(|| PipelineError::MissingCheckpoint {
                stage: stage.label(),
                country: country.to_string(),
            })
    }

    /// Filtered articles when a filter checkpoint exists, scraped otherwise.
    async fn load_extract_input(&self, country: &str) -> Result<Vec<Article>, PipelineError> {
        if let Some(articles) = read_json(&self.checkpoint_path(Stage::Filter, country)).await? {
            return Ok(articles);
        }
        self.load(Stage::Scrape, country).await
    }
}

fn label(country: &str, stage: Stage) -> String {
    format!("{country} {}", stage.label())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::PageText;
    use crate::error::{ExternalServiceError, PoolError};
    use crate::models::SearchHit;
    use crate::search::SearchRequest;
    use std::sync::Mutex;

    const YAML: &str = r#"
io:
  metrics:
    - title: disaster
      description: Natural disasters
      rich_search: (flood OR drought)
    - title: conflict
      description: Armed conflict
      rich_search: (protest OR riot)
  countries:
    - { name: Kenya, code: KE }
  years: [2021]
  search_templates: ["[metric] in [country] [year]"]
extraction:
  news_instruction: "Metrics: [all metrics]."
  format_instruction: " Format: [examples]"
  output_format: "[]"
"#;

    struct OneHit;

    impl SearchProvider for OneHit {
        async fn search(&self, _request: &SearchRequest) -> Result<Vec<SearchHit>, ExternalServiceError> {
            Ok(vec![SearchHit {
                url: "https://news.example/kenya-floods".to_string(),
                title: "Floods in Kenya".to_string(),
                published_date: None,
                description: None,
            }])
        }
    }

    struct StaticPages {
        text: &'static str,
        seen: Mutex<Vec<usize>>,
    }

    impl StaticPages {
        fn new(text: &'static str) -> Self {
            Self {
                text,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl PageFetcher for StaticPages {
        fn contexts(&self) -> usize {
            2
        }

        async fn extract(&self, url: &str, context_index: usize) -> Result<Option<PageText>, PoolError> {
            self.seen.lock().unwrap().push(context_index);
            Ok(Some(PageText {
                final_url: format!("{url}?landed"),
                text: self.text.to_string(),
            }))
        }
    }

    struct Canned(&'static str);

    impl LanguageModel for Canned {
        async fn complete(&self, _instruction: &str, _prompt: &str) -> Result<String, ExternalServiceError> {
            Ok(self.0.to_string())
        }
    }

    fn pipeline(
        config: Config,
        root: &std::path::Path,
        pages: StaticPages,
        reply: &'static str,
    ) -> Pipeline<OneHit, StaticPages, Canned> {
        let agent = ExtractionAgent::builder()
            .instruction(config.extraction_instruction())
            .allowed_metrics(config.metric_titles())
            .model(Canned(reply))
            .build()
            .unwrap();
        Pipeline::new(config, OutputLayout::new(root), OneHit, pages, agent)
    }

    const FLOOD_PAGE: &str = "Severe floods displaced thousands in March 2021.";
    const FLOOD_REPLY: &str = r#"[{"country": "Kenya", "metric": "disaster", "dates": ["03-2021"]}]"#;

    #[tokio::test]
    async fn test_end_to_end_marks_one_cell() {
        let tmp = tempfile::tempdir().unwrap();
        let raw = YAML.replace("[metric] in [country] [year]", "floods in [country]");
        let config = Config::from_yaml(&raw).unwrap();
        let pipeline = pipeline(config, tmp.path(), StaticPages::new(FLOOD_PAGE), FLOOD_REPLY);

        let mut ctx = RunContext::new();
        let summary = pipeline.run(&mut ctx).await.unwrap();
        assert_eq!(summary.countries, 1);
        assert_eq!(summary.facts, 1);

        let csv = tokio::fs::read_to_string(summary.csv.unwrap()).await.unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "date,country,disaster,conflict");
        assert_eq!(lines.len(), 13);
        assert!(lines.contains(&"03-2021,Kenya,1,0"));
        assert_eq!(lines.iter().filter(|l| l.contains(",1")).count(), 1);

        // Default save points: search, scrape, extract.
        let searched = std::fs::read_to_string(tmp.path().join("web/search/Kenya search.json")).unwrap();
        assert!(searched.contains("floods in Kenya"));
        assert!(tmp.path().join("web/scrape/Kenya scraped.json").exists());
        assert!(tmp.path().join("llm/Kenya extracted.json").exists());
        assert!(!tmp.path().join("web/filter/Kenya filtered.json").exists());
    }

    #[tokio::test]
    async fn test_irrelevant_pages_never_reach_the_model() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::from_yaml(YAML).unwrap();
        let pipeline = pipeline(
            config,
            tmp.path(),
            StaticPages::new("The national football team won the regional cup on Sunday."),
            FLOOD_REPLY,
        );

        let summary = pipeline.run(&mut RunContext::new()).await.unwrap();
        assert_eq!(summary.facts, 0);
    }

    #[tokio::test]
    async fn test_skipped_stage_reads_checkpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let first = Config::from_yaml(YAML).unwrap();
        pipeline(first, tmp.path(), StaticPages::new(FLOOD_PAGE), FLOOD_REPLY)
            .run(&mut RunContext::new())
            .await
            .unwrap();

        let raw = format!("{YAML}run:\n  tasks: [extract, save]\n  save_points: [extract]\n");
        let second = Config::from_yaml(&raw).unwrap();
        let pages = StaticPages::new(FLOOD_PAGE);
        let rerun = pipeline(second, tmp.path(), pages, FLOOD_REPLY);
        let summary = rerun.run(&mut RunContext::new()).await.unwrap();

        assert_eq!(summary.facts, 1);
        assert!(rerun.fetcher.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_checkpoint_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let raw = format!("{YAML}run:\n  tasks: [scrape]\n  save_points: [scrape]\n");
        let config = Config::from_yaml(&raw).unwrap();
        let pipeline = pipeline(config, tmp.path(), StaticPages::new(FLOOD_PAGE), FLOOD_REPLY);

        let err = pipeline.run(&mut RunContext::new()).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingCheckpoint { stage: "search", .. }
        ));
    }

    #[tokio::test]
    async fn test_scrape_assigns_contexts_round_robin() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::from_yaml(YAML).unwrap();
        let pipeline = pipeline(config, tmp.path(), StaticPages::new(FLOOD_PAGE), FLOOD_REPLY);

        let query = crate::models::SearchQuery {
            search_text: "q".to_string(),
            country_name: "Kenya".to_string(),
            country_code: "KE".to_string(),
            metric_title: "disaster".to_string(),
            years: vec!["2021".to_string()],
        };
        let articles: Vec<Article> = (0..4)
            .map(|i| {
                let hit = SearchHit {
                    url: format!("https://news.example/{i}"),
                    title: String::new(),
                    published_date: None,
                    description: None,
                };
                Article::from_hit(hit, &query)
            })
            .collect();

        let scraped = pipeline.scrape_articles(articles).await;
        assert_eq!(scraped.len(), 4);
        assert!(scraped.iter().all(|a| a.resolved_url.as_deref().is_some_and(|u| u.ends_with("?landed"))));

        let mut seen = pipeline.fetcher.seen.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 0, 1, 1]);
    }
}
