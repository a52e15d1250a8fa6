pub mod channel;
pub mod config;
pub mod errors;
pub mod export;
pub mod harness;
pub mod lifecycle;
pub mod models;
pub mod stream;
pub mod supervisor;
pub mod workflow;
pub mod workspace;

pub use crate::channel::OutputChannel;
pub use crate::config::{PacingConfig, ShellConfig};
pub use crate::errors::{AppError, AppResult};
pub use crate::export::ArtifactExporter;
pub use crate::lifecycle::LifecycleController;
pub use crate::models::{DisplayUpdate, OutputEvent, ProcessStatus, Role, Task, TaskStatus, UpdateKind};
pub use crate::stream::{StreamConsumer, UpdateStream};
pub use crate::supervisor::ProcessSupervisor;
pub use crate::workflow::{CommandEngine, WorkflowEngine, WorkflowRequest, WorkflowRunner};
pub use crate::workspace::TaskWorkspace;

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

pub fn init_tracing(log_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "crew-console.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}
