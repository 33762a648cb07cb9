//! Per-run bookkeeping: the run timestamp and how long each stage took.

use crate::error::PipelineError;
use crate::outputs::json::write_json;
use crate::utils::file_timestamp;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunTimings {
    pub timestamp: String,
    pub total_seconds: f64,
    /// `"<country> <stage>"` or a run-level label, in seconds.
    pub stages: BTreeMap<String, f64>,
}

#[derive(Debug)]
pub struct RunContext {
    timestamp: String,
    started: Instant,
    stages: BTreeMap<String, f64>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            timestamp: file_timestamp(),
            started: Instant::now(),
            stages: BTreeMap::new(),
        }
    }

    /// Shared by every file this run writes.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Durations for the same label accumulate.
    pub fn record(&mut self, label: impl Into<String>, elapsed: Duration) {
        *self.stages.entry(label.into()).or_default() += elapsed.as_secs_f64();
    }

    pub async fn timed<T>(&mut self, label: impl Into<String>, fut: impl Future<Output = T>) -> T {
        let label = label.into();
        let start = Instant::now();
        let out = fut.await;
        let elapsed = start.elapsed();
        info!(stage = %label, secs = format!("{:.2}", elapsed.as_secs_f64()), "Stage finished");
        self.record(label, elapsed);
        out
    }

    pub fn timings(&self) -> RunTimings {
        RunTimings {
            timestamp: self.timestamp.clone(),
            total_seconds: self.started.elapsed().as_secs_f64(),
            stages: self.stages.clone(),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<(), PipelineError> {
        write_json(&self.timings(), path).await
    }
}
