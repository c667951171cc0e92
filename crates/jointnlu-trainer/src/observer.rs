//! Training observers: receive `(step, metric, value)` tuples so the loop
//! itself never does display or file I/O.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

pub trait TrainingObserver {
    fn on_metric(&mut self, step: usize, name: &str, value: f64);

    /// Called once after the last step.
    fn on_finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Logs every metric through `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl TrainingObserver for TracingObserver {
    fn on_metric(&mut self, step: usize, name: &str, value: f64) {
        debug!(step, metric = name, value, "metric");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub step: usize,
    pub value: f64,
}

/// Per-metric history, written as JSON on finish when a path is set.
#[derive(Debug, Default)]
pub struct LossHistory {
    series: BTreeMap<String, Vec<Point>>,
    path: Option<PathBuf>,
}

impl LossHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_file<P: AsRef<Path>>(path: P) -> Self {
        Self {
            series: BTreeMap::new(),
            path: Some(path.as_ref().to_path_buf()),
        }
    }

    pub fn series(&self, name: &str) -> &[Point] {
        self.series.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.series)?;
        fs::write(path, json)
            .with_context(|| format!("failed to write loss history {}", path.display()))?;
        info!(path = %path.display(), "loss history written");
        Ok(())
    }
}

impl TrainingObserver for LossHistory {
    fn on_metric(&mut self, step: usize, name: &str, value: f64) {
        self.series
            .entry(name.to_string())
            .or_default()
            .push(Point { step, value });
    }

    fn on_finish(&mut self) -> Result<()> {
        match &self.path {
            Some(path) => self.save(path),
            None => Ok(()),
        }
    }
}
