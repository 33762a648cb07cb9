//! Search query generation.
//!
//! Each template is expanded for every metric and every chunk of years:
//!
//! ```text
//! template: "[metric] in [country] [year]"
//! metric:   (flood OR drought)
//! years:    [2021, 2022], chunk length 2
//! =>        (flood OR drought) in Kenya 2021 OR 2022 -"sports"
//! ```

use crate::config::{Country, IoConfig};
use crate::models::SearchQuery;
use tracing::debug;

/// All queries for one country, in template → metric → year-chunk order.
pub fn generate_queries(io: &IoConfig, country: &Country, year_chunk_length: usize) -> Vec<SearchQuery> {
    let year_chunks: Vec<Vec<String>> = io
        .years
        .chunks(year_chunk_length.max(1))
        .map(|chunk| chunk.iter().map(u16::to_string).collect())
        .collect();
    let exclusions = exclusion_suffix(&io.exclusions);

    let mut queries = Vec::with_capacity(io.search_templates.len() * io.metrics.len() * year_chunks.len());
    for template in &io.search_templates {
        let with_country = template.replace("[country]", &country.name);
        for metric in &io.metrics {
            let with_metric = with_country.replace("[metric]", &metric.rich_search);
            for years in &year_chunks {
                let text = with_metric.replace("[year]", &years.join(" OR "));
                queries.push(SearchQuery {
                    search_text: format!("{}{}", text.trim(), exclusions),
                    country_name: country.name.clone(),
                    country_code: country.code.clone(),
                    metric_title: metric.title.clone(),
                    years: years.clone(),
                });
            }
        }
    }
    debug!(country = %country.name, count = queries.len(), "Generated search queries");
    queries
}

fn exclusion_suffix(exclusions: &[String]) -> String {
    exclusions
        .iter()
        .map(|term| term.trim())
        .filter(|term| !term.is_empty())
        .map(|term| format!(" -\"{term}\""))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricDefinition;

    fn io(years: Vec<u16>, exclusions: Vec<&str>) -> IoConfig {
        IoConfig {
            metrics: vec![
                MetricDefinition {
                    title: "disaster".to_string(),
                    description: "Natural disasters".to_string(),
                    rich_search: "(flood OR drought)".to_string(),
                },
                MetricDefinition {
                    title: "conflict".to_string(),
                    description: "Armed conflict".to_string(),
                    rich_search: "(protest OR riot)".to_string(),
                },
            ],
            countries: vec![kenya()],
            accepted_countries: Vec::new(),
            years,
            search_templates: vec!["[metric] in [country] [year]".to_string()],
            exclusions: exclusions.into_iter().map(String::from).collect(),
        }
    }

    fn kenya() -> Country {
        Country {
            name: "Kenya".to_string(),
            code: "KE".to_string(),
        }
    }

    #[test]
    fn test_one_query_per_metric_and_year() {
        let queries = generate_queries(&io(vec![2021, 2022], vec![]), &kenya(), 1);
        assert_eq!(queries.len(), 4);
        assert_eq!(queries[0].search_text, "(flood OR drought) in Kenya 2021");
        assert_eq!(queries[0].metric_title, "disaster");
        assert_eq!(queries[0].years, vec!["2021"]);
        assert_eq!(queries[3].search_text, "(protest OR riot) in Kenya 2022");
        assert!(queries.iter().all(|q| q.country_code == "KE"));
    }

    #[test]
    fn test_year_chunks_are_or_joined() {
        let queries = generate_queries(&io(vec![2021, 2022, 2023], vec![]), &kenya(), 2);
        assert_eq!(queries.len(), 4);
        assert_eq!(queries[0].search_text, "(flood OR drought) in Kenya 2021 OR 2022");
        assert_eq!(queries[1].years, vec!["2023"]);
    }

    #[test]
    fn test_exclusions_are_appended() {
        let queries = generate_queries(&io(vec![2021], vec!["sports", " ", "football"]), &kenya(), 1);
        assert_eq!(
            queries[0].search_text,
            "(flood OR drought) in Kenya 2021 -\"sports\" -\"football\""
        );
    }

    #[test]
    fn test_zero_chunk_length_is_treated_as_one() {
        let queries = generate_queries(&io(vec![2021, 2022], vec![]), &kenya(), 0);
        assert_eq!(queries.len(), 4);
    }
}
