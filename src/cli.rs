//! Command-line interface definitions for Risk Text News.
//!
//! All arguments can be provided via command-line flags or environment variables.

use clap::Parser;

/// Command-line arguments for a pipeline run.
///
/// Everything about what to search for and how lives in the YAML file given
/// by `--config`; the flags only say where things are.
///
/// # Examples
///
/// ```sh
/// # Run with the default output directory
/// risk_text_news -c ./config.yaml
///
/// # Custom output directory and model settings
/// risk_text_news -c ./config.yaml -o /data/risk --llm-config ./aj.yaml
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Pipeline configuration (metrics, countries, years, stages)
    #[arg(short, long, env = "RISK_NEWS_CONFIG")]
    pub config: String,

    /// Root directory for checkpoints, the CSV and run timings
    #[arg(short, long, default_value = "output")]
    pub output_dir: String,

    /// awful_aj config.yaml; defaults to the one in the awful_aj config dir
    #[arg(long, env = "AJ_CONFIG")]
    pub llm_config: Option<String>,

    /// awful_aj chat template used for extraction
    #[arg(short, long, default_value = "risk_extractor")]
    pub template: String,
}
