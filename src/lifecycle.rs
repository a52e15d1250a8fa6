use crate::models::{
    DisplayUpdate, ProcessStatus, Termination, ESCALATED_MESSAGE, NOTHING_RUNNING_MESSAGE,
    STOPPED_MESSAGE,
};
use chrono::{DateTime, Utc};
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::process::Child;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// A spawned process plus what has been done to it. Clones share state.
#[derive(Clone)]
pub struct ProcessHandle {
    id: Uuid,
    task: String,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    child: Arc<Mutex<Child>>,
    termination: Arc<Mutex<Termination>>,
}

impl ProcessHandle {
    pub(crate) fn new(task: impl Into<String>, child: Child) -> Self {
        Self {
            id: Uuid::new_v4(),
            task: task.into(),
            pid: child.id(),
            started_at: Utc::now(),
            child: Arc::new(Mutex::new(child)),
            termination: Arc::new(Mutex::new(Termination::None)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn termination(&self) -> Termination {
        *self
            .termination
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a termination step; never downgrades a harsher one.
    fn mark(&self, termination: Termination) {
        let mut current = self
            .termination
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if termination > *current {
            *current = termination;
        }
    }

    pub fn try_wait(&self) -> std::io::Result<Option<ExitStatus>> {
        self.child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_wait()
    }

    fn has_exited(&self) -> bool {
        !matches!(self.try_wait(), Ok(None))
    }

    fn status(&self) -> ProcessStatus {
        ProcessStatus::Running {
            task: self.task.clone(),
            pid: self.pid,
            started_at: self.started_at,
        }
    }

    /// Polite request to the whole process group.
    fn request_stop(&self, reason: StopReason) {
        let Some(pid) = self.pid else { return };
        signal_group(pid, reason);
    }

    fn force_kill(&self) {
        if let Some(pid) = self.pid {
            kill_group(pid);
        }
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = child.start_kill();
    }

    /// Polls for exit until `limit` passes. Returns whether the process is gone.
    async fn wait_for_exit(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if self.has_exited() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.id)
            .field("task", &self.task)
            .field("pid", &self.pid)
            .field("termination", &self.termination())
            .finish()
    }
}

/// The one slot holding the active process. Every read-modify-write of it
/// goes through this lock.
#[derive(Clone, Default)]
pub struct ActiveSlot {
    inner: Arc<Mutex<Option<ProcessHandle>>>,
}

impl ActiveSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Option<ProcessHandle>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn take(&self) -> Option<ProcessHandle> {
        self.lock().take()
    }

    /// Clears the slot only if it still holds the process `id`.
    pub fn clear_if(&self, id: Uuid) -> bool {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|handle| handle.id == id) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub fn status(&self) -> ProcessStatus {
        self.lock()
            .as_ref()
            .map(ProcessHandle::status)
            .unwrap_or(ProcessStatus::Idle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    /// User asked to stop: interrupt, as Ctrl-C would.
    Interrupt,
    /// Replaced by a newer process.
    Replace,
}

#[derive(Clone)]
pub struct LifecycleController {
    slot: ActiveSlot,
    stop_timeout: Duration,
}

impl LifecycleController {
    pub fn new(slot: ActiveSlot, stop_timeout: Duration) -> Self {
        Self { slot, stop_timeout }
    }

    /// Stops the active process, escalating to a kill after the stop timeout.
    /// With nothing active this is a no-op.
    pub async fn stop(&self) -> DisplayUpdate {
        let Some(handle) = self.slot.take() else {
            return DisplayUpdate::idle(NOTHING_RUNNING_MESSAGE);
        };

        tracing::warn!(task = %handle.task, pid = ?handle.pid, "stopping process");
        handle.mark(Termination::Signaled);
        if !handle.has_exited() {
            handle.request_stop(StopReason::Interrupt);
        }
        if handle.wait_for_exit(self.stop_timeout).await {
            tracing::info!(task = %handle.task, pid = ?handle.pid, "process stopped");
            return DisplayUpdate::stopped(STOPPED_MESSAGE);
        }

        handle.mark(Termination::Killed);
        handle.force_kill();
        if !handle.wait_for_exit(KILL_REAP_TIMEOUT).await {
            tracing::error!(task = %handle.task, pid = ?handle.pid, "process still present after kill");
        }
        tracing::error!(
            task = %handle.task,
            pid = ?handle.pid,
            timeout_ms = self.stop_timeout.as_millis() as u64,
            "process did not respond to interrupt; killed"
        );
        DisplayUpdate::warning(ESCALATED_MESSAGE)
    }

    /// Brings down a process that lost its slot to a newer one. Returns
    /// immediately; the kill escalation runs in the background.
    pub(crate) fn retire(&self, handle: ProcessHandle) {
        tracing::info!(task = %handle.task, pid = ?handle.pid, "terminating previous process");
        handle.mark(Termination::Signaled);
        if handle.has_exited() {
            return;
        }
        handle.request_stop(StopReason::Replace);
        let stop_timeout = self.stop_timeout;
        tokio::spawn(async move {
            if handle.wait_for_exit(stop_timeout).await {
                return;
            }
            handle.mark(Termination::Killed);
            handle.force_kill();
            let _ = handle.wait_for_exit(KILL_REAP_TIMEOUT).await;
            tracing::warn!(task = %handle.task, pid = ?handle.pid, "previous process killed after timeout");
        });
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, reason: StopReason) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let signal = match reason {
        StopReason::Interrupt => Signal::SIGINT,
        StopReason::Replace => Signal::SIGTERM,
    };
    if let Err(error) = killpg(Pid::from_raw(pid as i32), signal) {
        tracing::debug!(pid, error = %error, "failed to signal process group");
    }
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Err(error) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        tracing::debug!(pid, error = %error, "failed to kill process group");
    }
}

#[cfg(windows)]
fn signal_group(pid: u32, _reason: StopReason) {
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T"])
        .status();
}

#[cfg(windows)]
fn kill_group(pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .status();
}

#[cfg(test)]
mod tests {
    use super::{ActiveSlot, LifecycleController, ProcessHandle};
    use crate::models::{ProcessStatus, Termination, UpdateKind, NOTHING_RUNNING_MESSAGE};
    use std::time::Duration;

    #[tokio::test]
    async fn stop_without_process_is_a_no_op() {
        let slot = ActiveSlot::new();
        let controller = LifecycleController::new(slot.clone(), Duration::from_millis(100));
        let first = controller.stop().await;
        let second = controller.stop().await;
        assert_eq!(first.kind, UpdateKind::Idle);
        assert_eq!(first.text, NOTHING_RUNNING_MESSAGE);
        assert_eq!(first, second);
        assert_eq!(slot.status(), ProcessStatus::Idle);
    }

    #[cfg(unix)]
    fn spawn_sleeper() -> tokio::process::Child {
        let mut command = std::process::Command::new("sleep");
        command.arg("30");
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        tokio::process::Command::from(command)
            .spawn()
            .expect("spawn sleep")
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn clear_if_ignores_other_handles() {
        let slot = ActiveSlot::new();
        let handle = ProcessHandle::new("Demo", spawn_sleeper());
        *slot.lock() = Some(handle.clone());
        assert!(!slot.clear_if(uuid::Uuid::new_v4()));
        assert!(matches!(slot.status(), ProcessStatus::Running { ref task, .. } if task == "Demo"));
        assert!(slot.clear_if(handle.id()));
        assert_eq!(slot.status(), ProcessStatus::Idle);
        handle.force_kill();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_interrupts_and_clears_slot() {
        let slot = ActiveSlot::new();
        let handle = ProcessHandle::new("Demo", spawn_sleeper());
        *slot.lock() = Some(handle.clone());

        let controller = LifecycleController::new(slot.clone(), Duration::from_secs(5));
        let update = controller.stop().await;
        assert_eq!(update.kind, UpdateKind::Stopped);
        assert_eq!(handle.termination(), Termination::Signaled);
        assert!(handle.try_wait().expect("poll").is_some());
        assert_eq!(controller.stop().await.kind, UpdateKind::Idle);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn retire_returns_without_waiting() {
        let controller = LifecycleController::new(ActiveSlot::new(), Duration::from_secs(5));
        let handle = ProcessHandle::new("Old", spawn_sleeper());
        let started = std::time::Instant::now();
        controller.retire(handle.clone());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(handle.termination(), Termination::Signaled);
        assert!(handle.wait_for_exit(Duration::from_secs(5)).await);
    }
}
