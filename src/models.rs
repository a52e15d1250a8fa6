use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const STARTUP_MESSAGE: &str = "Starting engineering crew... 🚀";
pub const COMPLETION_MESSAGE: &str = "# ✅ All done!";
pub const PROCESS_START_MESSAGE: &str = "🚀 Starting process...";
pub const STOPPED_MESSAGE: &str = "Process stopped by user.";
pub const NOTHING_RUNNING_MESSAGE: &str = "No process is running.";
pub const ESCALATED_MESSAGE: &str = "Process did not respond and was forcibly terminated.";
pub const MISSING_INPUT_MESSAGE: &str = "### ⚠️ Task name and requirements are required.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub name: String,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
}

impl Task {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TaskStatus::Pending,
            started_at: Utc::now(),
        }
    }
}

/// One record pushed through an [`OutputChannel`](crate::channel::OutputChannel).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputEvent {
    pub source_name: String,
    pub payload: String,
    pub sequence: u64,
}

impl OutputEvent {
    pub fn display_line(&self) -> String {
        format!("{}: {}", self.source_name, self.payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateKind {
    Started,
    Progress,
    Warning,
    Completed,
    Failed,
    Stopped,
    Idle,
}

impl UpdateKind {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped | Self::Idle)
    }
}

/// One unit of user-visible progress. `Progress` updates carry the whole
/// accumulated buffer, which only ever grows within one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayUpdate {
    pub kind: UpdateKind,
    pub role: Role,
    pub text: String,
}

impl DisplayUpdate {
    pub fn new(kind: UpdateKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            role: Role::Assistant,
            text: text.into(),
        }
    }

    pub fn started(text: impl Into<String>) -> Self {
        Self::new(UpdateKind::Started, text)
    }

    pub fn progress(text: impl Into<String>) -> Self {
        Self::new(UpdateKind::Progress, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            kind: UpdateKind::Warning,
            role: Role::System,
            text: text.into(),
        }
    }

    pub fn completed(text: impl Into<String>) -> Self {
        Self::new(UpdateKind::Completed, text)
    }

    pub fn failed(text: impl Into<String>) -> Self {
        Self {
            kind: UpdateKind::Failed,
            role: Role::System,
            text: text.into(),
        }
    }

    pub fn stopped(text: impl Into<String>) -> Self {
        Self::new(UpdateKind::Stopped, text)
    }

    pub fn idle(text: impl Into<String>) -> Self {
        Self {
            kind: UpdateKind::Idle,
            role: Role::System,
            text: text.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

/// How a supervised process was brought down, if it was. Ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Termination {
    None,
    Signaled,
    Killed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ProcessStatus {
    Idle,
    Running {
        task: String,
        pid: Option<u32>,
        started_at: DateTime<Utc>,
    },
}
