#![cfg(unix)]

use crew_console::models::{ESCALATED_MESSAGE, NOTHING_RUNNING_MESSAGE, STOPPED_MESSAGE};
use crew_console::{
    DisplayUpdate, PacingConfig, ProcessStatus, ProcessSupervisor, ShellConfig, UpdateKind,
    UpdateStream,
};
use std::path::Path;
use std::time::{Duration, Instant};

fn config(root: &Path, stop_timeout_ms: u64) -> ShellConfig {
    ShellConfig {
        output_root: root.join("output"),
        export_root: root.join("zips"),
        log_dir: root.join("logs"),
        entry_point: "app.sh".to_string(),
        run_command: vec!["sh".to_string(), "app.sh".to_string()],
        stop_timeout_ms,
        reader_drain_ms: 500,
        pacing: PacingConfig::immediate(),
        ..ShellConfig::default()
    }
}

fn write_task(root: &Path, task: &str, script: &str) {
    let task_dir = root.join("output").join(task);
    std::fs::create_dir_all(&task_dir).expect("mkdir");
    std::fs::write(task_dir.join("app.sh"), script).expect("write script");
}

/// Reads until a progress update mentions `needle`.
async fn wait_for_output(stream: &mut UpdateStream, needle: &str) -> Vec<DisplayUpdate> {
    let mut seen = Vec::new();
    let deadline = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(update) = stream.next().await {
            let found = update.kind == UpdateKind::Progress && update.text.contains(needle);
            seen.push(update);
            if found {
                return;
            }
        }
        panic!("stream ended before '{needle}' appeared");
    });
    deadline.await.expect("output within deadline");
    seen
}

async fn drain(mut stream: UpdateStream) -> Vec<DisplayUpdate> {
    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(update) = stream.next().await {
            rest.push(update);
        }
    })
    .await
    .expect("stream closes");
    rest
}

#[tokio::test]
async fn natural_exit_streams_all_output_then_completes() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_task(dir.path(), "Demo", "echo one\necho two >&2\necho three\n");
    let supervisor = ProcessSupervisor::new(&config(dir.path(), 2_000));

    let updates = drain(supervisor.start("Demo")).await;
    assert_eq!(updates.first().map(|u| u.kind), Some(UpdateKind::Started));
    let last = updates.last().expect("final update");
    assert_eq!(last.kind, UpdateKind::Completed);
    for line in ["one\n", "two\n", "three\n"] {
        assert!(last.text.contains(line), "missing {line:?} in {:?}", last.text);
    }

    let progress: Vec<&str> = updates
        .iter()
        .filter(|u| u.kind == UpdateKind::Progress)
        .map(|u| u.text.as_str())
        .collect();
    assert_eq!(progress.len(), 3);
    for pair in progress.windows(2) {
        assert!(pair[1].starts_with(pair[0]));
    }
    assert_eq!(progress.last().copied(), Some(last.text.as_str()));
    assert_eq!(supervisor.status(), ProcessStatus::Idle);
}

#[tokio::test]
async fn interleaved_stdout_and_stderr_keep_emission_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_task(
        dir.path(),
        "Demo",
        "i=0\nwhile [ $i -lt 200 ]; do\n  echo out$i\n  echo err$i >&2\n  i=$((i + 1))\ndone\n",
    );
    let supervisor = ProcessSupervisor::new(&config(dir.path(), 2_000));

    let updates = drain(supervisor.start("Demo")).await;
    let last = updates.last().expect("final update");
    assert_eq!(last.kind, UpdateKind::Completed);

    let expected: String = (0..200).map(|i| format!("out{i}\nerr{i}\n")).collect();
    assert_eq!(last.text, expected);
}

#[tokio::test]
async fn nonzero_exit_warns_before_completing() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_task(dir.path(), "Demo", "echo crashing\nexit 4\n");
    let supervisor = ProcessSupervisor::new(&config(dir.path(), 2_000));

    let updates = drain(supervisor.start("Demo")).await;
    let kinds: Vec<UpdateKind> = updates.iter().map(|u| u.kind).collect();
    assert!(kinds.contains(&UpdateKind::Warning));
    assert_eq!(kinds.last(), Some(&UpdateKind::Completed));
}

#[tokio::test]
async fn stop_interrupts_running_process() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_task(dir.path(), "Demo", "echo ready\nexec sleep 30\n");
    let supervisor = ProcessSupervisor::new(&config(dir.path(), 5_000));

    let mut stream = supervisor.start("Demo");
    wait_for_output(&mut stream, "ready").await;
    assert!(matches!(supervisor.status(), ProcessStatus::Running { ref task, .. } if task == "Demo"));

    let started = Instant::now();
    let update = supervisor.stop().await;
    assert_eq!(update.kind, UpdateKind::Stopped);
    assert_eq!(update.text, STOPPED_MESSAGE);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(supervisor.status(), ProcessStatus::Idle);

    let rest = drain(stream).await;
    let last = rest.last().expect("final update");
    assert_eq!(last.kind, UpdateKind::Stopped);
    assert!(last.text.contains("ready\n"));

    let again = supervisor.stop().await;
    assert_eq!(again.kind, UpdateKind::Idle);
    assert_eq!(again.text, NOTHING_RUNNING_MESSAGE);
}

#[tokio::test]
async fn unresponsive_process_is_killed_after_timeout() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_task(dir.path(), "Stubborn", "trap '' INT TERM\necho ready\nsleep 30\n");
    let supervisor = ProcessSupervisor::new(&config(dir.path(), 300));

    let mut stream = supervisor.start("Stubborn");
    wait_for_output(&mut stream, "ready").await;

    let started = Instant::now();
    let update = supervisor.stop().await;
    let elapsed = started.elapsed();
    assert_eq!(update.kind, UpdateKind::Warning);
    assert_eq!(update.text, ESCALATED_MESSAGE);
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(3), "stop took {elapsed:?}");
    assert_eq!(supervisor.status(), ProcessStatus::Idle);

    let rest = drain(stream).await;
    assert_eq!(rest.last().map(|u| u.kind), Some(UpdateKind::Stopped));
}

#[tokio::test]
async fn starting_again_replaces_the_active_process() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_task(dir.path(), "First", "echo first ready\nexec sleep 30\n");
    write_task(dir.path(), "Second", "echo second ready\nexec sleep 30\n");
    let supervisor = ProcessSupervisor::new(&config(dir.path(), 2_000));

    let mut first = supervisor.start("First");
    wait_for_output(&mut first, "first ready").await;

    let mut second = supervisor.start("Second");
    wait_for_output(&mut second, "second ready").await;
    assert!(matches!(supervisor.status(), ProcessStatus::Running { ref task, .. } if task == "Second"));

    let first_rest = drain(first).await;
    assert_eq!(first_rest.last().map(|u| u.kind), Some(UpdateKind::Stopped));
    // the replaced process finishing must not clear the newer one
    assert!(matches!(supervisor.status(), ProcessStatus::Running { ref task, .. } if task == "Second"));

    assert_eq!(supervisor.stop().await.kind, UpdateKind::Stopped);
    let second_rest = drain(second).await;
    assert_eq!(second_rest.last().map(|u| u.kind), Some(UpdateKind::Stopped));
    assert_eq!(supervisor.status(), ProcessStatus::Idle);
}

#[tokio::test]
async fn missing_task_reports_error_without_spawning() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = ProcessSupervisor::new(&config(dir.path(), 2_000));

    let updates = drain(supervisor.start("Ghost")).await;
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].kind, UpdateKind::Failed);
    assert!(updates[0].text.starts_with("❌ Error:"));
    assert_eq!(supervisor.status(), ProcessStatus::Idle);
}
