//! Output generation: checkpoints, the indicator CSV and run timings.
//!
//! # Submodules
//!
//! - [`json`]: per-country JSON checkpoints and the timings file
//! - [`csv`]: the flattened indicator table
//!
//! # Output Structure
//!
//! ```text
//! output_dir/
//! ├── web/
//! │   ├── search/Kenya search.json
//! │   ├── scrape/Kenya scraped.json
//! │   └── filter/Kenya filtered.json
//! ├── llm/Kenya extracted.json
//! ├── csv/risk_indicators_20240301_142501.csv
//! └── timings_20240301_142501.json
//! ```

pub mod csv;
pub mod json;

use std::path::PathBuf;

/// Where every artifact of a run lives.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn search_checkpoint(&self, country: &str) -> PathBuf {
        self.root.join("web/search").join(format!("{country} search.json"))
    }

    pub fn scrape_checkpoint(&self, country: &str) -> PathBuf {
        self.root.join("web/scrape").join(format!("{country} scraped.json"))
    }

    pub fn filter_checkpoint(&self, country: &str) -> PathBuf {
        self.root.join("web/filter").join(format!("{country} filtered.json"))
    }

    /// Articles with their extracted facts.
    pub fn extract_checkpoint(&self, country: &str) -> PathBuf {
        self.root.join("llm").join(format!("{country} extracted.json"))
    }

    pub fn csv_path(&self, timestamp: &str) -> PathBuf {
        self.root.join("csv").join(format!("risk_indicators_{timestamp}.csv"))
    }

    pub fn timings_path(&self, timestamp: &str) -> PathBuf {
        self.root.join(format!("timings_{timestamp}.json"))
    }
}
