use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_STOP_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_READER_DRAIN_MS: u64 = 2_000;

/// Timing knobs for the streaming loops.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PacingConfig {
    pub reveal_delay_ms: u64,
    pub reveal_chunk_chars: usize,
    pub workflow_backoff_ms: u64,
    pub process_backoff_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            reveal_delay_ms: 5,
            reveal_chunk_chars: 1,
            workflow_backoff_ms: 200,
            process_backoff_ms: 100,
        }
    }
}

impl PacingConfig {
    /// No reveal delay and short backoffs. Used by tests and non-interactive callers.
    pub fn immediate() -> Self {
        Self {
            reveal_delay_ms: 0,
            reveal_chunk_chars: usize::MAX,
            workflow_backoff_ms: 10,
            process_backoff_ms: 10,
        }
    }

    pub fn reveal_delay(&self) -> Duration {
        Duration::from_millis(self.reveal_delay_ms)
    }

    pub fn workflow_backoff(&self) -> Duration {
        Duration::from_millis(self.workflow_backoff_ms)
    }

    pub fn process_backoff(&self) -> Duration {
        Duration::from_millis(self.process_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ShellConfig {
    pub output_root: PathBuf,
    pub export_root: PathBuf,
    pub log_dir: PathBuf,
    pub entry_point: String,
    pub run_command: Vec<String>,
    pub engine_command: Vec<String>,
    pub stop_timeout_ms: u64,
    pub reader_drain_ms: u64,
    pub pacing: PacingConfig,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("output"),
            export_root: PathBuf::from("zips"),
            log_dir: PathBuf::from("logs"),
            entry_point: "app.py".to_string(),
            run_command: vec!["uv".to_string(), "run".to_string(), "app.py".to_string()],
            engine_command: Vec::new(),
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
            reader_drain_ms: DEFAULT_READER_DRAIN_MS,
            pacing: PacingConfig::default(),
        }
    }
}

impl ShellConfig {
    /// Reads a JSON config file, falling back to defaults when no path is given.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|error| {
                    AppError::Io(format!("failed to read config {}: {}", path.display(), error))
                })?;
                serde_json::from_str::<ShellConfig>(&raw)?
            }
            None => ShellConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.run_command.is_empty() || self.run_command[0].trim().is_empty() {
            return Err(AppError::Validation("runCommand must name a program".to_string()));
        }
        if self.entry_point.trim().is_empty() {
            return Err(AppError::Validation("entryPoint cannot be empty".to_string()));
        }
        if self.pacing.reveal_chunk_chars == 0 {
            return Err(AppError::Validation("revealChunkChars must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn reader_drain(&self) -> Duration {
        Duration::from_millis(self.reader_drain_ms)
    }
}
