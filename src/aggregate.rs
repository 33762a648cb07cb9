//! Flattening extracted facts into the monthly indicator table.
//!
//! The table has one row per `(month, country)` for every configured year
//! and country, and one 0/1 column per metric. A cell is 1 when any fact
//! names that country, that metric and that month.

use crate::models::{Article, ExtractedFact};
use std::collections::HashSet;
use tracing::{debug, info, instrument};

/// One `(month, country)` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorRow {
    /// `MM-YYYY`
    pub date: String,
    pub country: String,
    /// Aligned with [`IndicatorTable::metrics`].
    pub values: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorTable {
    pub metrics: Vec<String>,
    pub rows: Vec<IndicatorRow>,
}

impl IndicatorTable {
    pub fn flagged(&self) -> usize {
        self.rows
            .iter()
            .flat_map(|r| r.values.iter())
            .filter(|&&v| v == 1)
            .count()
    }
}

/// Every fact from every article that has any.
pub fn flatten(articles: &[Article]) -> Vec<ExtractedFact> {
    articles
        .iter()
        .filter_map(|a| a.parsed.as_ref())
        .flatten()
        .cloned()
        .collect()
}

/// Build the table. Row order is year, month, then country as configured;
/// the order of `facts` does not matter.
#[instrument(level = "info", skip_all, fields(facts = facts.len()))]
pub fn aggregate(
    facts: &[ExtractedFact],
    metrics: &[String],
    countries: &[String],
    years: &[u16],
) -> IndicatorTable {
    let mut marks: HashSet<(String, String, String)> = HashSet::new();
    for fact in facts {
        let Some(country) = countries
            .iter()
            .find(|c| c.trim().eq_ignore_ascii_case(fact.country.trim()))
        else {
            debug!(country = %fact.country, "Fact for a country outside the table");
            continue;
        };
        let metric = fact.metric.trim().to_lowercase();
        for date in &fact.dates {
            // Bare years have no month to land in.
            if date.len() != 7 {
                debug!(%date, "Skipping date without a month");
                continue;
            }
            marks.insert((country.clone(), metric.clone(), date.clone()));
        }
    }

    let lowered: Vec<String> = metrics.iter().map(|m| m.to_lowercase()).collect();
    let mut rows = Vec::with_capacity(years.len() * 12 * countries.len());
    for year in years {
        for month in 1..=12 {
            let date = format!("{month:02}-{year}");
            for country in countries {
                let values = lowered
                    .iter()
                    .map(|m| u8::from(marks.contains(&(country.clone(), m.clone(), date.clone()))))
                    .collect();
                rows.push(IndicatorRow {
                    date: date.clone(),
                    country: country.clone(),
                    values,
                });
            }
        }
    }

    let table = IndicatorTable {
        metrics: metrics.to_vec(),
        rows,
    };
    info!(rows = table.rows.len(), flagged = table.flagged(), "Aggregated indicator table");
    table
}
