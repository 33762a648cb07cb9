//! Error types for each stage of the pipeline.
//!
//! Per-article failures (navigation, timeouts, malformed model output) never
//! show up here: they are absorbed where they happen and the article is
//! skipped. These types cover the failures a caller has to decide about.

use thiserror::Error;

/// Invalid or incomplete static configuration. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML for the expected schema.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// A required field is empty or missing.
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    /// A field is present but unusable.
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// The language-model client configuration could not be loaded.
    #[error("failed to load language model settings: {0}")]
    Model(String),
}

/// Errors raised by the browser pool itself, as opposed to a single page.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A caller asked for a context outside `[0, N)`.
    #[error("context index {index} out of range (pool has {size} contexts)")]
    InvalidArgument { index: usize, size: usize },

    /// `extract` was called before `start`.
    #[error("browser pool not started")]
    NotStarted,

    /// The browser process or one of its contexts could not be created.
    #[error("failed to launch browser: {0}")]
    Launch(String),
}

/// A remote collaborator (search backend or language model) failed.
#[derive(Debug, Error)]
pub enum ExternalServiceError {
    /// The language model call failed or returned an error status.
    #[error("language model request failed: {0}")]
    Model(String),

    /// The search backend could not be reached or returned garbage.
    #[error("search request failed: {0}")]
    Search(String),
}

/// Returned by builders that were not given everything they need.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("extraction agent is not configured: missing {0}")]
    Unconfigured(&'static str),
}

/// Run-level failures surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    External(#[from] ExternalServiceError),

    /// A stage was skipped but the checkpoint it depends on does not exist.
    #[error("no {stage} checkpoint found for {country}; run that stage first")]
    MissingCheckpoint { stage: &'static str, country: String },

    /// Reading or writing an output artifact failed.
    #[error("output error at {path}: {reason}")]
    Output { path: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(step: u8) -> Result<(), PipelineError> {
        match step {
            0 => Err(ConfigError::Missing("countries").into()),
            1 => Err(PoolError::Launch("no chrome".to_string()).into()),
            2 => Err(AgentError::Unconfigured("model").into()),
            _ => Err(ExternalServiceError::Search("bad locale".to_string()).into()),
        }
    }

    #[test]
    fn test_setup_errors_keep_their_message() {
        let messages: Vec<String> = (0..4).map(|step| setup(step).unwrap_err().to_string()).collect();
        assert_eq!(
            messages,
            vec![
                "missing required setting: countries",
                "failed to launch browser: no chrome",
                "extraction agent is not configured: missing model",
                "search request failed: bad locale",
            ]
        );
        assert!(matches!(setup(1), Err(PipelineError::Pool(PoolError::Launch(_)))));
    }
}
