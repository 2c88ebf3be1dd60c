//! Pipeline configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Options recognized by the pipeline.
///
/// Loaded from a JSON file with [`PipelineConfig::from_file`] or built with
/// the `with_*` methods. Unknown keys in a file are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Requested number of workers for unit extraction
    pub max_workers: usize,

    /// Thread or process execution
    pub mode: ExecutionMode,

    /// Cores kept free when sizing the worker pool
    pub reserved_cores: usize,

    /// Retries for each collaborator call
    pub max_retries: u32,

    /// Linear backoff step between retries, in seconds
    pub base_delay_seconds: f64,

    /// Root directory for checkpoints and unit working directories
    pub output_root: PathBuf,

    /// Deadline for the extraction pool, in seconds (None = no deadline)
    pub unit_timeout_seconds: Option<f64>,

    /// Maximum characters per text chunk
    pub chunk_size: usize,

    /// Document id override (default: derived from the source file name)
    pub document_id: Option<String>,
}

impl PipelineConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::Config("maxWorkers must be at least 1".into()));
        }
        if !self.base_delay_seconds.is_finite() || self.base_delay_seconds < 0.0 {
            return Err(Error::Config(
                "baseDelaySeconds must be a non-negative number".into(),
            ));
        }
        if let Some(timeout) = self.unit_timeout_seconds {
            if !timeout.is_finite() || timeout <= 0.0 {
                return Err(Error::Config(
                    "unitTimeoutSeconds must be a positive number".into(),
                ));
            }
        }
        if self.chunk_size < 64 {
            return Err(Error::Config("chunkSize must be at least 64".into()));
        }
        Ok(())
    }

    /// Set the requested worker count.
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    /// Set the execution mode.
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the number of reserved cores.
    pub fn with_reserved_cores(mut self, cores: usize) -> Self {
        self.reserved_cores = cores;
        self
    }

    /// Set retries per collaborator call.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the backoff step in seconds.
    pub fn with_base_delay_seconds(mut self, seconds: f64) -> Self {
        self.base_delay_seconds = seconds;
        self
    }

    /// Set the output root.
    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = root.into();
        self
    }

    /// Set the extraction deadline in seconds.
    pub fn with_unit_timeout_seconds(mut self, seconds: f64) -> Self {
        self.unit_timeout_seconds = Some(seconds);
        self
    }

    /// Set the text chunk size.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Use a fixed document id.
    pub fn with_document_id(mut self, id: impl Into<String>) -> Self {
        self.document_id = Some(id.into());
        self
    }

    /// Run extraction strictly one unit at a time.
    pub fn sequential(mut self) -> Self {
        self.max_workers = 1;
        self
    }

    /// Backoff step as a duration.
    pub fn base_delay(&self) -> Duration {
        Duration::from_secs_f64(self.base_delay_seconds.max(0.0))
    }

    /// Extraction deadline as a duration.
    pub fn unit_timeout(&self) -> Option<Duration> {
        self.unit_timeout_seconds
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(Duration::from_secs_f64)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            mode: ExecutionMode::Thread,
            reserved_cores: 1,
            max_retries: 3,
            base_delay_seconds: 1.0,
            output_root: PathBuf::from("pagewise_output"),
            unit_timeout_seconds: None,
            chunk_size: 1200,
            document_id: None,
        }
    }
}

/// How the worker pool executes units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Worker threads sharing memory; suited to I/O-bound extraction
    #[default]
    Thread,
    /// One child process per unit; the worker must be serializable
    Process,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Thread => write!(f, "thread"),
            ExecutionMode::Process => write!(f, "process"),
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thread" | "threads" => Ok(ExecutionMode::Thread),
            "process" | "processes" => Ok(ExecutionMode::Process),
            other => Err(Error::Config(format!("unknown execution mode: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = PipelineConfig::new()
            .with_max_workers(8)
            .with_mode(ExecutionMode::Process)
            .with_reserved_cores(2)
            .with_max_retries(5)
            .with_base_delay_seconds(0.5)
            .with_output_root("out");

        assert_eq!(config.max_workers, 8);
        assert_eq!(config.mode, ExecutionMode::Process);
        assert_eq!(config.reserved_cores, 2);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.base_delay(), Duration::from_millis(500));
        assert_eq!(config.output_root, PathBuf::from("out"));
    }

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.mode, ExecutionMode::Thread);
        assert_eq!(config.reserved_cores, 1);
        assert!(config.unit_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{"maxWorkers": 2, "mode": "process", "baseDelaySeconds": 0.25}"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.mode, ExecutionMode::Process);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_config_rejects_unknown_keys() {
        let json = r#"{"maxWorkerz": 2}"#;
        assert!(serde_json::from_str::<PipelineConfig>(json).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(PipelineConfig::new().with_max_workers(0).validate().is_err());
        assert!(PipelineConfig::new()
            .with_base_delay_seconds(-1.0)
            .validate()
            .is_err());
        assert!(PipelineConfig::new()
            .with_unit_timeout_seconds(0.0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("thread".parse::<ExecutionMode>().unwrap(), ExecutionMode::Thread);
        assert_eq!(
            "Process".parse::<ExecutionMode>().unwrap(),
            ExecutionMode::Process
        );
        assert!("fiber".parse::<ExecutionMode>().is_err());
    }
}
