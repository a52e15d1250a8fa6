use crate::channel::OutputChannel;
use crate::config::ShellConfig;
use crate::harness::cli_missing::describe_spawn_failure;
use crate::harness::line_buffer::LineBuffer;
use crate::harness::sanitize::sanitize_terminal_line;
use crate::lifecycle::{ActiveSlot, LifecycleController, ProcessHandle};
use crate::models::{DisplayUpdate, ProcessStatus, Termination, PROCESS_START_MESSAGE};
use crate::stream::{update_stream, Liveness, StreamConsumer, UpdateSink, UpdateStream};
use crate::workspace::TaskWorkspace;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

const MAX_LINE_BYTES: usize = 100_000;
const READ_CHUNK_BYTES: usize = 4096;
const OUTPUT_SOURCE: &str = "output";

#[cfg(unix)]
type MergedOutput = tokio::net::unix::pipe::Receiver;
#[cfg(not(unix))]
type MergedOutput = tokio::fs::File;

#[cfg(unix)]
fn merged_output(reader: os_pipe::PipeReader) -> std::io::Result<MergedOutput> {
    tokio::net::unix::pipe::Receiver::from_owned_fd(std::os::fd::OwnedFd::from(reader))
}

#[cfg(not(unix))]
fn merged_output(reader: os_pipe::PipeReader) -> std::io::Result<MergedOutput> {
    let handle = std::os::windows::io::OwnedHandle::from(reader);
    Ok(tokio::fs::File::from_std(std::fs::File::from(handle)))
}

#[derive(Clone)]
pub struct ProcessSupervisor {
    workspace: TaskWorkspace,
    entry_point: String,
    run_command: Vec<String>,
    backoff: Duration,
    reader_drain: Duration,
    slot: ActiveSlot,
    lifecycle: LifecycleController,
}

impl ProcessSupervisor {
    pub fn new(config: &ShellConfig) -> Self {
        let slot = ActiveSlot::new();
        Self {
            workspace: TaskWorkspace::new(config.output_root.clone()),
            entry_point: config.entry_point.clone(),
            run_command: config.run_command.clone(),
            backoff: config.pacing.process_backoff(),
            reader_drain: config.reader_drain(),
            lifecycle: LifecycleController::new(slot.clone(), config.stop_timeout()),
            slot,
        }
    }

    pub fn status(&self) -> ProcessStatus {
        self.slot.status()
    }

    pub async fn stop(&self) -> DisplayUpdate {
        self.lifecycle.stop().await
    }

    /// Spawns the task's entry point and returns its output stream. A process
    /// that is already active gets terminated first. Must be called inside a
    /// Tokio runtime.
    pub fn start(&self, task_name: &str) -> UpdateStream {
        let task_name = match TaskWorkspace::normalize_task_name(task_name) {
            Ok(name) => name,
            Err(error) => {
                tracing::warn!(error = %error, "process start rejected");
                return UpdateStream::single(DisplayUpdate::failed(format!("❌ Error: {}", error)));
            }
        };
        if let Err(error) = self.workspace.entry_point(&task_name, &self.entry_point) {
            tracing::warn!(task = %task_name, error = %error, "process start rejected");
            return UpdateStream::single(DisplayUpdate::failed(format!("❌ Error: {}", error)));
        }

        let (sink, stream) = update_stream();
        sink.send(DisplayUpdate::started(PROCESS_START_MESSAGE));

        let task_dir = self.workspace.task_dir(&task_name);
        let spawned = {
            let mut slot = self.slot.lock();
            if let Some(previous) = slot.take() {
                self.lifecycle.retire(previous);
            }
            self.spawn(&task_dir).map(|(child, output)| {
                let handle = ProcessHandle::new(task_name.clone(), child);
                *slot = Some(handle.clone());
                (handle, output)
            })
        };

        let (handle, output) = match spawned {
            Ok(parts) => parts,
            Err(error) => {
                tracing::error!(task = %task_name, error = %error, "failed to spawn process");
                let program = self.run_command.first().map(String::as_str).unwrap_or_default();
                sink.send(DisplayUpdate::failed(describe_spawn_failure(program, &error)));
                return stream;
            }
        };
        tracing::info!(task = %task_name, pid = ?handle.pid(), "process spawned");

        let channel = OutputChannel::new();
        let readers = vec![tokio::spawn(read_lines(output, OUTPUT_SOURCE, channel.clone()))];

        let supervisor = self.clone();
        tokio::spawn(async move {
            supervisor.supervise(handle, channel, readers, sink).await;
        });
        stream
    }

    /// Spawns the run command with stdout and stderr sharing one pipe, so the
    /// reader sees lines in the order the process wrote them.
    fn spawn(&self, task_dir: &Path) -> std::io::Result<(tokio::process::Child, MergedOutput)> {
        let (program, args) = self
            .run_command
            .split_first()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty run command"))?;

        let (reader, writer) = os_pipe::pipe()?;
        let output = merged_output(reader)?;
        let mut command = std::process::Command::new(program);
        command
            .args(args)
            .current_dir(task_dir)
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(writer.try_clone()?)
            .stderr(writer);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // own group, so signalling it never reaches us
            command.process_group(0);
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            command.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }

        // dropping the command closes our write ends; EOF then tracks the child tree
        let child = tokio::process::Command::from(command).spawn()?;
        Ok((child, output))
    }

    async fn supervise(
        self,
        handle: ProcessHandle,
        channel: OutputChannel,
        readers: Vec<JoinHandle<()>>,
        sink: UpdateSink,
    ) {
        let liveness = ProcessLiveness::new(handle.clone(), readers, self.reader_drain);
        let mut consumer = StreamConsumer::new(channel, liveness, self.backoff);

        let mut full_output = String::new();
        while let Some(event) = consumer.next_event().await {
            full_output.push_str(&event.payload);
            full_output.push('\n');
            sink.send(DisplayUpdate::progress(full_output.clone()));
        }
        let exit = consumer.into_producer().exit;
        self.slot.clear_if(handle.id());

        match handle.termination() {
            Termination::None => {
                match exit {
                    Some(Ok(status)) if status.success() => {
                        tracing::info!(task = %handle.task(), pid = ?handle.pid(), "process finished");
                    }
                    Some(Ok(status)) => {
                        tracing::warn!(task = %handle.task(), pid = ?handle.pid(), status = %status, "process exited unsuccessfully");
                        sink.send(DisplayUpdate::warning(format!("Process exited with {}", status)));
                    }
                    Some(Err(error)) => {
                        tracing::error!(task = %handle.task(), error = %error, "failed to poll process status");
                        sink.send(DisplayUpdate::warning(format!("Lost track of the process: {}", error)));
                    }
                    None => {}
                }
                sink.send(DisplayUpdate::completed(full_output));
            }
            termination => {
                tracing::info!(task = %handle.task(), ?termination, "process stream closed after stop");
                sink.send(DisplayUpdate::stopped(full_output));
            }
        }
    }
}

/// The process counts as alive until it exits and its readers have hit EOF,
/// or the drain window after exit runs out.
struct ProcessLiveness {
    handle: ProcessHandle,
    readers: Vec<JoinHandle<()>>,
    drain_window: Duration,
    exited_at: Option<Instant>,
    exit: Option<Result<ExitStatus, String>>,
}

impl ProcessLiveness {
    fn new(handle: ProcessHandle, readers: Vec<JoinHandle<()>>, drain_window: Duration) -> Self {
        Self {
            handle,
            readers,
            drain_window,
            exited_at: None,
            exit: None,
        }
    }
}

impl Liveness for ProcessLiveness {
    fn is_alive(&mut self) -> bool {
        if self.exited_at.is_none() {
            match self.handle.try_wait() {
                Ok(None) => return true,
                Ok(Some(status)) => self.exit = Some(Ok(status)),
                Err(error) => self.exit = Some(Err(error.to_string())),
            }
            self.exited_at = Some(Instant::now());
        }

        if self.readers.iter().all(|reader| reader.is_finished()) {
            return false;
        }
        let within_window = self
            .exited_at
            .is_some_and(|exited_at| exited_at.elapsed() < self.drain_window);
        if within_window {
            return true;
        }

        // a descendant still holds the pipe open; stop reading it
        tracing::warn!(task = %self.handle.task(), "output pipe still open after exit; abandoning readers");
        for reader in &self.readers {
            reader.abort();
        }
        false
    }
}

async fn read_lines<R>(mut stream: R, source: &'static str, channel: OutputChannel)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0_u8; READ_CHUNK_BYTES];
    let mut lines = LineBuffer::new(Some(MAX_LINE_BYTES));
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(size) => {
                for line in lines.push(&chunk[..size]) {
                    channel.push(source, sanitize_terminal_line(&line));
                }
                let broken = lines.consume_forced_breaks();
                if broken > 0 {
                    tracing::warn!(stream = source, count = broken, max_line_bytes = MAX_LINE_BYTES, "split overlong output line");
                }
            }
            Err(error) => {
                tracing::warn!(stream = source, error = %error, "output read failed");
                break;
            }
        }
    }
    if let Some(rest) = lines.flush() {
        channel.push(source, sanitize_terminal_line(&rest));
    }
}

#[cfg(test)]
mod tests {
    use super::ProcessSupervisor;
    use crate::config::{PacingConfig, ShellConfig};
    use crate::models::{ProcessStatus, UpdateKind};

    fn config(root: &std::path::Path) -> ShellConfig {
        ShellConfig {
            output_root: root.join("output"),
            export_root: root.join("zips"),
            entry_point: "app.sh".to_string(),
            run_command: vec!["sh".to_string(), "app.sh".to_string()],
            stop_timeout_ms: 2_000,
            pacing: PacingConfig::immediate(),
            ..ShellConfig::default()
        }
    }

    #[tokio::test]
    async fn missing_entry_point_spawns_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let supervisor = ProcessSupervisor::new(&config(dir.path()));
        std::fs::create_dir_all(dir.path().join("output/Demo")).expect("mkdir");

        let updates = supervisor.start("Demo").collect().await;
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].kind, UpdateKind::Failed);
        assert!(updates[0].text.contains("app.sh"));
        assert_eq!(supervisor.status(), ProcessStatus::Idle);
    }

    #[tokio::test]
    async fn blank_task_name_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let supervisor = ProcessSupervisor::new(&config(dir.path()));
        let updates = supervisor.start("  ").collect().await;
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].kind, UpdateKind::Failed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawn_failure_reports_error_and_stays_idle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = config(dir.path());
        config.run_command = vec!["definitely-not-a-real-program-xyz".to_string()];
        let task_dir = dir.path().join("output/Demo");
        std::fs::create_dir_all(&task_dir).expect("mkdir");
        std::fs::write(task_dir.join("app.sh"), "echo hi\n").expect("write");

        let supervisor = ProcessSupervisor::new(&config);
        let updates = supervisor.start("Demo").collect().await;
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].kind, UpdateKind::Started);
        assert_eq!(updates[1].kind, UpdateKind::Failed);
        assert!(updates[1].text.starts_with("❌ Error:"));
        assert!(updates[1].text.contains("definitely-not-a-real-program-xyz"));
        assert_eq!(supervisor.status(), ProcessStatus::Idle);
    }

    #[tokio::test]
    async fn empty_run_command_fails_without_panicking() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = config(dir.path());
        config.run_command = Vec::new();
        let task_dir = dir.path().join("output/Demo");
        std::fs::create_dir_all(&task_dir).expect("mkdir");
        std::fs::write(task_dir.join("app.sh"), "echo hi\n").expect("write");

        let supervisor = ProcessSupervisor::new(&config);
        let updates = supervisor.start("Demo").collect().await;
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].kind, UpdateKind::Failed);
        assert!(updates[1].text.contains("empty run command"));
        assert_eq!(supervisor.status(), ProcessStatus::Idle);
    }
}
