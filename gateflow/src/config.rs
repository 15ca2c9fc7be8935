//! Run configuration and on-disk layout.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{GateflowError, Result};
use crate::exec::NamespaceIsolation;

/// Environment variable overriding the run root.
pub const ENV_ROOT: &str = "GATEFLOW_ROOT";
/// Environment variable overriding the log filter.
pub const ENV_LOG: &str = "GATEFLOW_LOG";
/// Environment variable switching JSON log output on or off.
pub const ENV_LOG_JSON: &str = "GATEFLOW_LOG_JSON";
/// Environment variable overriding namespace isolation.
pub const ENV_ISOLATION: &str = "GATEFLOW_ISOLATION";

/// Top-level configuration for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateflowConfig {
    /// Root directory of the run. Every persisted path lives below it.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// How the execution namespace is treated between sub-analyses.
    #[serde(default)]
    pub isolation: NamespaceIsolation,
    /// Chart raster settings.
    #[serde(default)]
    pub chart: ChartConfig,
    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
    /// Interval at which the status watcher re-reads the status store.
    #[serde(default = "default_poll_interval_ms")]
    pub status_poll_interval_ms: u64,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_poll_interval_ms() -> u64 {
    2000
}

impl Default for GateflowConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            isolation: NamespaceIsolation::default(),
            chart: ChartConfig::default(),
            log: LogConfig::default(),
            status_poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl GateflowConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| GateflowError::Config(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| GateflowError::Config(format!("{}: {e}", path.display())))
    }

    /// Applies overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ENV_ROOT) {
            self.root = PathBuf::from(root);
        }
        if let Some(filter) = lookup(ENV_LOG) {
            self.log.filter = filter;
        }
        if let Some(json) = lookup(ENV_LOG_JSON) {
            self.log.json = matches!(json.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(isolation) = lookup(ENV_ISOLATION) {
            self.isolation = isolation
                .parse()
                .map_err(|e: String| GateflowError::Config(format!("{ENV_ISOLATION}: {e}")))?;
        }
        Ok(self)
    }

    /// Sets the run root.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Sets the namespace isolation mode.
    #[must_use]
    pub fn with_isolation(mut self, isolation: NamespaceIsolation) -> Self {
        self.isolation = isolation;
        self
    }

    /// Sets the chart raster size.
    #[must_use]
    pub fn with_chart_size(mut self, width: u32, height: u32) -> Self {
        self.chart.width = width;
        self.chart.height = height;
        self
    }

    /// Sets the status polling interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.status_poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Gets the status polling interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    /// Returns the on-disk layout derived from the root.
    #[must_use]
    pub fn layout(&self) -> RunLayout {
        RunLayout::new(&self.root)
    }
}

/// Chart raster settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartConfig {
    /// Image width in pixels.
    #[serde(default = "default_chart_width")]
    pub width: u32,
    /// Image height in pixels.
    #[serde(default = "default_chart_height")]
    pub height: u32,
}

fn default_chart_width() -> u32 {
    800
}

fn default_chart_height() -> u32 {
    600
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            width: default_chart_width(),
            height: default_chart_height(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// An `EnvFilter` directive string.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

/// Every path a run reads or writes, derived from the run root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    /// Creates a layout for the given root.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The run root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the tabular datasets.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    /// Directory holding validated model-stage artifacts.
    #[must_use]
    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("agents")
    }

    /// Directory holding script-stage outputs.
    #[must_use]
    pub fn scripts_dir(&self) -> PathBuf {
        self.root.join("scripts")
    }

    /// Directory holding execution snapshots.
    #[must_use]
    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("execute_code")
    }

    /// Directory holding rendered chart images.
    #[must_use]
    pub fn charts_dir(&self) -> PathBuf {
        self.snapshots_dir().join("visualizations")
    }

    /// The persisted status map.
    #[must_use]
    pub fn status_file(&self) -> PathBuf {
        self.root.join("analysis_status.json")
    }

    /// Creates every output directory.
    pub fn ensure(&self) -> Result<()> {
        for dir in [
            self.artifacts_dir(),
            self.scripts_dir(),
            self.snapshots_dir(),
            self.charts_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
