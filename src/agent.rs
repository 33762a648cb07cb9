//! Language-model fact extraction.
//!
//! The [`ExtractionAgent`] is built in two phases: an [`ExtractionAgentBuilder`]
//! collects the instruction, the metric allow-list and the model, and
//! [`ExtractionAgentBuilder::build`] refuses to produce an agent until all
//! three are present. Every response is run through [`parse_response`], which
//! is the only place an [`ExtractedFact`] is ever created.

use crate::api::LanguageModel;
use crate::error::{AgentError, ExternalServiceError};
use crate::models::ExtractedFact;
use crate::utils::{looks_truncated, truncate_for_log};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, instrument};

/// Default prompt budget: roughly 3500 tokens at four characters per token.
pub const DEFAULT_MAX_PROMPT_CHARS: usize = 3_500 * 4;

static FENCE_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```[a-zA-Z]*\n?").unwrap());
static FENCE_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n?```$").unwrap());
static MONTH_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(0[1-9]|1[0-2])-\d{4}$").unwrap());
static BARE_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}$").unwrap());

const NEGATIVE_TOKENS: [&str; 3] = ["no", "none", "nothing"];

/// Collects everything an [`ExtractionAgent`] needs.
#[derive(Debug)]
pub struct ExtractionAgentBuilder<M> {
    instruction: Option<String>,
    allowed_metrics: Option<Vec<String>>,
    model: Option<M>,
    max_prompt_chars: usize,
    accept_bare_years: bool,
}

impl<M> Default for ExtractionAgentBuilder<M> {
    fn default() -> Self {
        Self {
            instruction: None,
            allowed_metrics: None,
            model: None,
            max_prompt_chars: DEFAULT_MAX_PROMPT_CHARS,
            accept_bare_years: false,
        }
    }
}

impl<M: LanguageModel> ExtractionAgentBuilder<M> {
    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    /// Metric titles the model may report. Compared case-insensitively.
    pub fn allowed_metrics<I, S>(mut self, metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_metrics = Some(
            metrics
                .into_iter()
                .map(|m| m.as_ref().trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        );
        self
    }

    pub fn model(mut self, model: M) -> Self {
        self.model = Some(model);
        self
    }

    pub fn max_prompt_chars(mut self, max: usize) -> Self {
        self.max_prompt_chars = max;
        self
    }

    pub fn accept_bare_years(mut self, accept: bool) -> Self {
        self.accept_bare_years = accept;
        self
    }

    pub fn build(self) -> Result<ExtractionAgent<M>, AgentError> {
        let instruction = self
            .instruction
            .filter(|i| !i.trim().is_empty())
            .ok_or(AgentError::Unconfigured("instruction"))?;
        let allowed_metrics = self
            .allowed_metrics
            .filter(|m| !m.is_empty())
            .ok_or(AgentError::Unconfigured("allowed_metrics"))?;
        let model = self.model.ok_or(AgentError::Unconfigured("model"))?;
        if self.max_prompt_chars == 0 {
            return Err(AgentError::Unconfigured("max_prompt_chars"));
        }
        Ok(ExtractionAgent {
            instruction,
            allowed_metrics,
            model,
            max_prompt_chars: self.max_prompt_chars,
            accept_bare_years: self.accept_bare_years,
        })
    }
}

/// Sends article text to a [`LanguageModel`] and validates what comes back.
#[derive(Debug)]
pub struct ExtractionAgent<M> {
    instruction: String,
    allowed_metrics: Vec<String>,
    model: M,
    max_prompt_chars: usize,
    accept_bare_years: bool,
}

impl<M: LanguageModel> ExtractionAgent<M> {
    pub fn builder() -> ExtractionAgentBuilder<M> {
        ExtractionAgentBuilder::default()
    }

    /// Ask the model about one article.
    ///
    /// `Ok(None)` means the model answered but nothing valid was in the
    /// answer. Model failures are returned as-is; retrying is up to the
    /// model stack the agent was built with.
    #[instrument(level = "info", skip_all, fields(text_chars = text.len()))]
    pub async fn extract(&self, text: &str) -> Result<Option<Vec<ExtractedFact>>, ExternalServiceError> {
        let prompt = truncate_chars(text, self.max_prompt_chars);
        let raw = self.model.complete(&self.instruction, prompt).await?;
        debug!(response = %truncate_for_log(&raw, 300), "Model response");

        let facts = parse_response(&raw, &self.allowed_metrics, self.accept_bare_years);
        debug!(facts = facts.as_ref().map_or(0, Vec::len), "Parsed model response");
        Ok(facts)
    }
}

/// Keep at most `max` characters from the front of `text`.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Turn a raw model answer into validated facts.
///
/// Returns `None` for an empty answer, an answer that opens with a negative
/// word ("no", "none", "nothing"), anything that does not parse to a list,
/// and a list in which no element survives validation. An element survives
/// when it is a mapping with a non-blank `country`, a `metric` that is in
/// `allowed_metrics` after lower-casing, and at least one valid date.
pub fn parse_response(
    raw: &str,
    allowed_metrics: &[String],
    accept_bare_years: bool,
) -> Option<Vec<ExtractedFact>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || starts_negative(trimmed) {
        return None;
    }

    let unfenced = FENCE_OPEN.replace(trimmed, "");
    let unfenced = FENCE_CLOSE.replace(&unfenced, "");
    let body = unfenced.trim();

    let value = match serde_json::from_str::<Value>(body) {
        Ok(value) => value,
        Err(e) => {
            if looks_truncated(&e) {
                debug!("Model response looks truncated");
            }
            let converted = python_literal_to_json(body)?;
            serde_json::from_str::<Value>(&converted).ok()?
        }
    };

    let Value::Array(items) = value else {
        return None;
    };

    let facts: Vec<ExtractedFact> = items
        .iter()
        .filter_map(|item| validate_fact(item, allowed_metrics, accept_bare_years))
        .collect();

    if facts.is_empty() { None } else { Some(facts) }
}

fn starts_negative(text: &str) -> bool {
    text.split(|c: char| !c.is_alphabetic())
        .find(|word| !word.is_empty())
        .is_some_and(|word| NEGATIVE_TOKENS.contains(&word.to_lowercase().as_str()))
}

fn validate_fact(item: &Value, allowed_metrics: &[String], accept_bare_years: bool) -> Option<ExtractedFact> {
    let Value::Object(map) = item else {
        return None;
    };

    let country = map.get("country").map(scalar_text).unwrap_or_default();
    let country = country.trim();
    let metric = map
        .get("metric")
        .map(scalar_text)
        .unwrap_or_default()
        .trim()
        .to_lowercase();

    if country.is_empty() || !allowed_metrics.contains(&metric) {
        return None;
    }

    let dates: Vec<String> = match map.get("dates") {
        Some(Value::Array(dates)) => dates
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|d| is_valid_date(d, accept_bare_years))
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    if dates.is_empty() {
        return None;
    }

    Some(ExtractedFact {
        country: country.to_string(),
        metric,
        dates,
    })
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// `MM-YYYY` with a real month, or `YYYY` when bare years are enabled.
pub fn is_valid_date(date: &str, accept_bare_years: bool) -> bool {
    MONTH_YEAR.is_match(date) || (accept_bare_years && BARE_YEAR.is_match(date))
}

/// Rewrite a Python-style literal into JSON.
///
/// Handles single-quoted strings, `True`/`False`/`None`, tuples and trailing
/// commas. Returns `None` on an unterminated string.
fn python_literal_to_json(src: &str) -> Option<String> {
    let mut out = String::with_capacity(src.len());
    let mut chars = src.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                let mut literal = String::new();
                loop {
                    match chars.next()? {
                        '\\' => match chars.next()? {
                            'n' => literal.push('\n'),
                            't' => literal.push('\t'),
                            other => literal.push(other),
                        },
                        ch if ch == c => break,
                        ch => literal.push(ch),
                    }
                }
                out.push_str(&serde_json::to_string(&literal).ok()?);
            }
            '(' => out.push('['),
            ')' | ']' | '}' => {
                drop_trailing_comma(&mut out);
                out.push(if c == ')' { ']' } else { c });
            }
            c if c.is_ascii_alphabetic() => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    other => other,
                });
            }
            other => out.push(other),
        }
    }
    Some(out)
}

fn drop_trailing_comma(out: &mut String) {
    let end = out.trim_end().len();
    if out[..end].ends_with(',') {
        out.truncate(end - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn allowed() -> Vec<String> {
        vec!["disaster".to_string(), "conflict".to_string()]
    }

    #[derive(Debug)]
    struct Canned {
        reply: Result<String, String>,
        seen_prompt: Mutex<Option<String>>,
    }

    impl Canned {
        fn ok(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                seen_prompt: Mutex::new(None),
            }
        }
    }

    impl LanguageModel for Canned {
        async fn complete(&self, _: &str, prompt: &str) -> Result<String, ExternalServiceError> {
            *self.seen_prompt.lock().unwrap() = Some(prompt.to_string());
            self.reply.clone().map_err(ExternalServiceError::Model)
        }
    }

    #[test]
    fn test_date_policy() {
        assert!(is_valid_date("03-2021", false));
        assert!(is_valid_date("12-1999", false));
        assert!(!is_valid_date("2021-03", false));
        assert!(!is_valid_date("13-2021", false));
        assert!(!is_valid_date("00-2021", false));
        assert!(!is_valid_date("March 2021", false));
        assert!(!is_valid_date("2021", false));
        assert!(is_valid_date("2021", true));
    }

    #[test]
    fn test_parse_strict_json() {
        let raw = r#"[{"country": "Kenya", "metric": "disaster", "dates": ["03-2021"]}]"#;
        let facts = parse_response(raw, &allowed(), false).unwrap();
        assert_eq!(
            facts,
            vec![ExtractedFact {
                country: "Kenya".to_string(),
                metric: "disaster".to_string(),
                dates: vec!["03-2021".to_string()],
            }]
        );
    }

    #[test]
    fn test_parse_strips_code_fence() {
        let raw = "```json\n[{\"country\": \"Kenya\", \"metric\": \"Disaster\", \"dates\": [\"04-2022\"]}]\n```";
        let facts = parse_response(raw, &allowed(), false).unwrap();
        assert_eq!(facts[0].metric, "disaster");
    }

    #[test]
    fn test_parse_python_literal() {
        let raw = "[{'country': ' Kenya ', 'metric': 'conflict', 'dates': ('01-2020', '02-2020',),},]";
        let facts = parse_response(raw, &allowed(), false).unwrap();
        assert_eq!(facts[0].country, "Kenya");
        assert_eq!(facts[0].dates, vec!["01-2020", "02-2020"]);
    }

    #[test]
    fn test_python_literal_keywords_and_escapes() {
        let json = python_literal_to_json("{'a': True, 'b': None, 'c': 'it\\'s'}").unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["a"], Value::Bool(true));
        assert_eq!(value["b"], Value::Null);
        assert_eq!(value["c"], "it's");
        assert!(python_literal_to_json("['unterminated").is_none());
    }

    #[test]
    fn test_negative_answers() {
        for raw in ["No", "no relevant events.", "None.", "Nothing found", "  NO  "] {
            assert_eq!(parse_response(raw, &allowed(), false), None, "raw: {raw:?}");
        }
        assert_eq!(parse_response("", &allowed(), false), None);
        assert_eq!(parse_response("   ", &allowed(), false), None);
    }

    #[test]
    fn test_words_starting_with_no_are_not_negative() {
        assert!(!starts_negative("November floods"));
        assert!(!starts_negative("[{\"country\": \"Norway\"}]"));
    }

    #[test]
    fn test_non_list_is_rejected() {
        let raw = r#"{"country": "Kenya", "metric": "disaster", "dates": ["03-2021"]}"#;
        assert_eq!(parse_response(raw, &allowed(), false), None);
        assert_eq!(parse_response("the model rambled", &allowed(), false), None);
    }

    #[test]
    fn test_invalid_elements_are_dropped() {
        let raw = r#"[
            "not a mapping",
            {"country": "", "metric": "disaster", "dates": ["03-2021"]},
            {"country": "Kenya", "metric": "weather", "dates": ["03-2021"]},
            {"country": "Kenya", "metric": "disaster", "dates": ["March 2021", "2021-03"]},
            {"country": "Kenya", "metric": "disaster", "dates": "03-2021"},
            {"country": "Kenya", "metric": "conflict", "dates": ["13-2021", "05-2021"]}
        ]"#;
        let facts = parse_response(raw, &allowed(), false).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].metric, "conflict");
        assert_eq!(facts[0].dates, vec!["05-2021"]);
    }

    #[test]
    fn test_all_invalid_is_none() {
        let raw = r#"[{"country": "Kenya", "metric": "weather", "dates": ["03-2021"]}]"#;
        assert_eq!(parse_response(raw, &allowed(), false), None);
        assert_eq!(parse_response("[]", &allowed(), false), None);
    }

    #[test]
    fn test_bare_years_behind_flag() {
        let raw = r#"[{"country": "Kenya", "metric": "disaster", "dates": ["2021"]}]"#;
        assert_eq!(parse_response(raw, &allowed(), false), None);
        assert_eq!(parse_response(raw, &allowed(), true).unwrap()[0].dates, vec!["2021"]);
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn test_builder_requires_every_part() {
        let missing_model = ExtractionAgent::<Canned>::builder()
            .instruction("Extract.")
            .allowed_metrics(["disaster"])
            .build();
        assert_eq!(missing_model.unwrap_err(), AgentError::Unconfigured("model"));

        let missing_instruction = ExtractionAgent::builder()
            .allowed_metrics(["disaster"])
            .model(Canned::ok("[]"))
            .build();
        assert_eq!(
            missing_instruction.unwrap_err(),
            AgentError::Unconfigured("instruction")
        );

        let missing_metrics = ExtractionAgent::builder()
            .instruction("Extract.")
            .model(Canned::ok("[]"))
            .build();
        assert_eq!(
            missing_metrics.unwrap_err(),
            AgentError::Unconfigured("allowed_metrics")
        );
    }

    #[tokio::test]
    async fn test_extract_truncates_prompt_and_parses() {
        let model = Canned::ok(r#"[{"country": "Kenya", "metric": "disaster", "dates": ["03-2021"]}]"#);
        let agent = ExtractionAgent::builder()
            .instruction("Extract.")
            .allowed_metrics(["Disaster"])
            .model(&model)
            .max_prompt_chars(10)
            .build()
            .unwrap();

        let facts = agent
            .extract("Severe floods displaced thousands in March 2021.")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(model.seen_prompt.lock().unwrap().as_deref(), Some("Severe flo"));
    }

    #[tokio::test]
    async fn test_extract_propagates_model_failure() {
        let model = Canned {
            reply: Err("503".to_string()),
            seen_prompt: Mutex::new(None),
        };
        let agent = ExtractionAgent::builder()
            .instruction("Extract.")
            .allowed_metrics(["disaster"])
            .model(model)
            .build()
            .unwrap();
        assert!(matches!(
            agent.extract("text").await,
            Err(ExternalServiceError::Model(_))
        ));
    }
}
