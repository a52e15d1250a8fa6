use crate::channel::OutputChannel;
use crate::config::PacingConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{
    DisplayUpdate, Task, TaskStatus, COMPLETION_MESSAGE, MISSING_INPUT_MESSAGE, STARTUP_MESSAGE,
};
use crate::stream::{update_stream, PacedReveal, StreamConsumer, UpdateSink, UpdateStream};
use crate::workspace::TaskWorkspace;
use anyhow::Context;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

const MAX_SOURCE_NAME_CHARS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRequest {
    pub task_name: String,
    pub requirement: String,
    pub output_dir: PathBuf,
}

/// The external engine that does the actual work. Implementations run on a
/// blocking thread and report progress by pushing into `output`.
pub trait WorkflowEngine: Send + Sync + 'static {
    fn run(&self, request: &WorkflowRequest, output: &OutputChannel) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct WorkflowRunner {
    engine: Arc<dyn WorkflowEngine>,
    workspace: TaskWorkspace,
    pacing: PacingConfig,
    current: Arc<Mutex<Option<Task>>>,
}

impl WorkflowRunner {
    pub fn new(engine: Arc<dyn WorkflowEngine>, workspace: TaskWorkspace, pacing: PacingConfig) -> Self {
        Self {
            engine,
            workspace,
            pacing,
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// The task whose stream has not yet emitted its final update.
    pub fn current_task(&self) -> Option<Task> {
        self.current.lock().ok().and_then(|current| current.clone())
    }

    /// Starts the engine for `task_name` and returns its update stream.
    ///
    /// Invalid input or an existing output directory yields a stream with one
    /// failure update and starts nothing. Must be called inside a Tokio runtime.
    pub fn launch(&self, task_name: &str, requirement: &str) -> UpdateStream {
        let request = match self.accept(task_name, requirement) {
            Ok(request) => request,
            Err(update) => return UpdateStream::single(update),
        };

        let mut task = Task::new(request.task_name.clone());
        task.status = TaskStatus::Running;
        if let Ok(mut current) = self.current.lock() {
            *current = Some(task.clone());
        }
        tracing::info!(task = %task.name, output_dir = %request.output_dir.display(), "workflow launch accepted");

        let channel = OutputChannel::new();
        let producer = {
            let engine = self.engine.clone();
            let channel = channel.clone();
            tokio::task::spawn_blocking(move || engine.run(&request, &channel))
        };

        let (sink, stream) = update_stream();
        let runner = self.clone();
        tokio::spawn(async move {
            runner.stream_workflow(task, channel, producer, sink).await;
        });
        stream
    }

    fn accept(&self, task_name: &str, requirement: &str) -> Result<WorkflowRequest, DisplayUpdate> {
        if task_name.trim().is_empty() || requirement.trim().is_empty() {
            tracing::warn!("workflow launch rejected: missing task name or requirement");
            return Err(DisplayUpdate::failed(MISSING_INPUT_MESSAGE));
        }

        let task_name = TaskWorkspace::normalize_task_name(task_name).map_err(|error| {
            tracing::warn!(error = %error, "workflow launch rejected: invalid task name");
            DisplayUpdate::failed(format!("### ❌ Failed: {}", error))
        })?;

        // Not atomic with the engine creating the directory: two launches of
        // the same name racing here can both pass.
        if self.workspace.task_exists(&task_name) {
            tracing::warn!(task = %task_name, "workflow launch rejected: task already exists");
            return Err(DisplayUpdate::failed(format!(
                "### ❌ Failed: task '{}' already exists. Please use another name.",
                task_name
            )));
        }

        Ok(WorkflowRequest {
            output_dir: self.workspace.task_dir(&task_name),
            task_name,
            requirement: requirement.trim().to_string(),
        })
    }

    async fn stream_workflow(
        self,
        mut task: Task,
        channel: OutputChannel,
        producer: JoinHandle<anyhow::Result<()>>,
        sink: UpdateSink,
    ) {
        sink.send(DisplayUpdate::started(STARTUP_MESSAGE));

        let mut consumer = StreamConsumer::new(channel, producer, self.pacing.workflow_backoff());
        let mut reveal = PacedReveal::new(self.pacing.reveal_delay(), self.pacing.reveal_chunk_chars);
        while let Some(event) = consumer.next_event().await {
            tracing::debug!(
                task = %task.name,
                source = %event.source_name,
                sequence = event.sequence,
                "workflow output"
            );
            reveal.append(&format!("{}\n\n", event.display_line()), &sink).await;
        }

        let failure = match consumer.into_producer().await {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(format!("{:#}", error)),
            Err(join_error) if join_error.is_panic() => Some("workflow engine panicked".to_string()),
            Err(join_error) => Some(join_error.to_string()),
        };
        task.status = match failure {
            None => TaskStatus::Completed,
            Some(reason) => {
                tracing::warn!(task = %task.name, error = %reason, "workflow engine failed");
                sink.send(DisplayUpdate::warning(format!("Workflow ended with an error: {}", reason)));
                TaskStatus::Failed
            }
        };

        sink.send(DisplayUpdate::completed(COMPLETION_MESSAGE));
        tracing::info!(task = %task.name, status = task.status.as_str(), "workflow finished");

        if let Ok(mut current) = self.current.lock() {
            let same_task = current
                .as_ref()
                .is_some_and(|active| active.name == task.name && active.started_at == task.started_at);
            if same_task {
                *current = None;
            }
        }
    }
}

/// Runs an external program as the workflow engine. Each stdout/stderr line
/// becomes one event; a `source: payload` prefix names the event source.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
}

impl CommandEngine {
    pub fn from_command(command: &[String]) -> AppResult<Self> {
        let (program, args) = command
            .split_first()
            .filter(|(program, _)| !program.trim().is_empty())
            .ok_or_else(|| AppError::Validation("engineCommand must name a program".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn default_source(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.clone())
    }
}

impl WorkflowEngine for CommandEngine {
    fn run(&self, request: &WorkflowRequest, output: &OutputChannel) -> anyhow::Result<()> {
        std::fs::create_dir_all(&request.output_dir).with_context(|| {
            format!("failed to create output directory {}", request.output_dir.display())
        })?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&request.output_dir)
            .env("CREW_TASK_NAME", &request.task_name)
            .env("CREW_REQUIREMENT", &request.requirement)
            .env("CREW_OUTPUT_DIR", &request.output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| {
                AppError::Spawn(format!("workflow engine '{}': {}", self.program, error))
            })?;

        let default_source = self.default_source();
        let stderr_reader = child.stderr.take().map(|stderr| {
            let output = output.clone();
            let source = default_source.clone();
            std::thread::spawn(move || forward_lines(stderr, &source, &output))
        });
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, &default_source, output);
        }
        if let Some(reader) = stderr_reader {
            let _ = reader.join();
        }

        let status = child.wait().context("failed to wait for workflow engine")?;
        if !status.success() {
            anyhow::bail!("workflow engine '{}' exited with {}", self.program, status);
        }
        Ok(())
    }
}

fn forward_lines(stream: impl std::io::Read, default_source: &str, output: &OutputChannel) {
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let (source, payload) = split_source(&line, default_source);
        output.push(source, payload);
    }
}

fn split_source<'a>(line: &'a str, default_source: &'a str) -> (&'a str, &'a str) {
    match line.split_once(": ") {
        Some((source, payload))
            if !source.trim().is_empty() && source.chars().count() <= MAX_SOURCE_NAME_CHARS =>
        {
            (source.trim(), payload)
        }
        _ => (default_source, line),
    }
}
