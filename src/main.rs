//! # Risk Text News
//!
//! A news scraping pipeline that turns country news coverage into a monthly
//! table of risk indicators. For every configured country it searches Google
//! News, renders the result pages in a headless browser, drops articles that
//! never mention a metric keyword, and asks an LLM which metrics the rest
//! report and when.
//!
//! ## Usage
//!
//! ```sh
//! risk_text_news -c ./config.yaml -o ./output
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture, per country:
//! 1. **Search**: generate queries and collect candidate articles
//! 2. **Scrape**: resolve redirects and pull visible text through a browser pool
//! 3. **Filter**: clean the text and keep articles with a metric keyword
//! 4. **Extract**: ask the LLM for `(country, metric, dates)` facts
//! 5. **Save**: flatten every fact into one CSV row per month and country
//!
//! Any stage can be skipped and resumed from the previous stage's checkpoint.

use awful_aj::{config as aj_config, config_dir, template};
use clap::Parser;
use std::error::Error;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod agent;
mod aggregate;
mod api;
mod browser;
mod cli;
mod config;
mod error;
mod filter;
mod models;
mod outputs;
mod pipeline;
mod queries;
mod run_context;
mod search;
mod text;
mod utils;

use agent::ExtractionAgent;
use api::{AwfulJadeModel, RetryAsk, TimeoutAsk};
use browser::BrowserPool;
use cli::Cli;
use config::{Config, Stage};
use error::{ConfigError, PipelineError};
use outputs::OutputLayout;
use pipeline::{Pipeline, RunSummary};
use run_context::RunContext;
use search::google_news::GoogleNewsClient;
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("risk_text_news starting up");

    // Parse CLI
    let args = Cli::parse();
    debug!(?args.config, ?args.output_dir, ?args.template, "Parsed CLI arguments");

    // Early check: the output dir must be writable before anything touches the network
    let output_dir = Path::new(&args.output_dir);
    if let Err(e) = ensure_writable_dir(output_dir).await {
        error!(
            path = %args.output_dir,
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let layout = OutputLayout::new(output_dir);
    let mut ctx = RunContext::new();
    let outcome = run(&args, layout.clone(), &mut ctx).await;

    let timings_path = layout.timings_path(ctx.timestamp());
    if let Err(e) = ctx.save(&timings_path).await {
        error!(error = %e, "Failed to write run timings");
    }

    let summary = match outcome {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, "Pipeline failed");
            return Err(e.into());
        }
    };
    info!(
        countries = summary.countries,
        facts = summary.facts,
        csv = ?summary.csv,
        "Pipeline finished"
    );

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(())
}

/// Build the collaborators from the CLI and config, then run every country.
/// The browser is stopped whether or not the run succeeds.
async fn run(args: &Cli, layout: OutputLayout, ctx: &mut RunContext) -> Result<RunSummary, PipelineError> {
    // ---- Load pipeline config ----
    let config = Config::load(&args.config)?;

    // ---- Build model stack ----
    let model = load_model(args).await?;
    let extraction = &config.extraction;
    let model = RetryAsk::new(
        TimeoutAsk::new(model, Duration::from_secs(extraction.call_timeout_secs)),
        extraction.max_retries,
        Duration::from_millis(extraction.retry_base_delay_ms),
    );
    let agent = ExtractionAgent::builder()
        .instruction(config.extraction_instruction())
        .allowed_metrics(config.metric_titles())
        .max_prompt_chars(extraction.max_prompt_chars)
        .accept_bare_years(extraction.accept_bare_years)
        .model(model)
        .build()?;

    // ---- Search client & browser pool ----
    let search = GoogleNewsClient::new(&config.scraping.language, &config.scraping.region)?;
    let pool = BrowserPool::new(config.scraping.clone());
    if config.run.runs(Stage::Scrape) {
        pool.start().await?;
    }

    // ---- Run ----
    let pipeline = Pipeline::new(config, layout, search, &pool, agent);
    let outcome = pipeline.run(ctx).await;
    pool.stop().await;
    outcome
}

/// Load the awful_aj config and chat template.
async fn load_model(args: &Cli) -> Result<AwfulJadeModel, ConfigError> {
    let template = template::load_template(&args.template)
        .await
        .map_err(|e| ConfigError::Model(format!("template '{}': {e}", args.template)))?;
    info!(template = %args.template, "Loaded template");

    let conf_path = match &args.llm_config {
        Some(path) => path.clone(),
        None => config_dir()
            .map_err(|e| ConfigError::Model(e.to_string()))?
            .join("config.yaml")
            .to_string_lossy()
            .into_owned(),
    };
    let llm_config = aj_config::load_config(&conf_path)
        .map_err(|e| ConfigError::Model(format!("{conf_path}: {e}")))?;
    info!(config_path = %conf_path, "Loaded model configuration");

    Ok(AwfulJadeModel::new(llm_config, template))
}
