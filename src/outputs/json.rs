//! JSON checkpoints.
//!
//! Every stage can persist its output so a later run can skip it. A
//! checkpoint is the stage's full output for one country, pretty-printed.

use crate::error::PipelineError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use tokio::fs;
use tracing::{error, info, instrument};

fn output_error(path: &Path, reason: impl ToString) -> PipelineError {
    PipelineError::Output {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Serialize `value` to `path`, creating parent directories.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<(), PipelineError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| output_error(path, e))?;

    if let Some(dir) = path.parent() {
        if let Err(e) = fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create checkpoint dir");
            return Err(output_error(dir, e));
        }
    }

    fs::write(path, json).await.map_err(|e| output_error(path, e))?;
    info!("Wrote JSON checkpoint");
    Ok(())
}

/// Read a checkpoint. `Ok(None)` when the file does not exist.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PipelineError> {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(output_error(path, e)),
    };
    let value = serde_json::from_str(&raw).map_err(|e| output_error(path, e))?;
    info!("Loaded JSON checkpoint");
    Ok(Some(value))
}
