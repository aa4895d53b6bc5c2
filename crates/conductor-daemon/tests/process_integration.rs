//! Real worker processes through `/bin/sh`.

#![cfg(unix)]
#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use conductor_core::config::OrchestratorConfig;
use conductor_core::status::ProcessStatus;
use conductor_daemon::orchestration::{Orchestrator, ProcessSnapshot, TaskRequest};
use conductor_daemon::subprocess::{LaunchSpec, ProcessLauncher, WorkerEvent, WorkerLauncher};

fn shell(script: &str) -> OrchestratorConfig {
    OrchestratorConfig {
        max_concurrent_processes: 2,
        worker_executable_path: Some("/bin/sh".into()),
        worker_args: vec!["-c".into(), script.into()],
        ..Default::default()
    }
}

async fn started(script: &str) -> Orchestrator {
    let orchestrator = Orchestrator::new(shell(script), Arc::new(ProcessLauncher::new()));
    orchestrator.start().await;
    orchestrator
}

async fn wait_for(orchestrator: &Orchestrator, id: &str, expected: ProcessStatus) -> ProcessSnapshot {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let snapshot = orchestrator.get(id).await.unwrap();
        if snapshot.status == expected {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "{id} stuck in {} waiting for {expected}:\n{}",
            snapshot.status,
            snapshot.output
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn launcher_streams_output_then_exit() {
    let launcher = ProcessLauncher::new();
    let mut launched = launcher
        .launch(LaunchSpec {
            program: "/bin/sh".into(),
            args: vec!["-c".into(), "echo out; echo err >&2; exit 4".into()],
            ..Default::default()
        })
        .unwrap();
    assert!(launched.handle.pid().is_some());

    let mut stdout = String::new();
    let mut stderr = String::new();
    let code = loop {
        match launched.events.recv().await.unwrap() {
            WorkerEvent::Stdout(chunk) => stdout.push_str(&chunk),
            WorkerEvent::Stderr(chunk) => stderr.push_str(&chunk),
            WorkerEvent::Exited(code) => break code,
        }
    };
    assert_eq!(stdout, "out\n");
    assert_eq!(stderr, "err\n");
    assert_eq!(code, Some(4));
}

#[tokio::test]
async fn prompt_answered_over_stdin() {
    let orchestrator = started(
        r#"printf 'Do you want to proceed? (Y/n) '; read answer; echo "got $answer""#,
    )
    .await;
    let id = orchestrator.submit(TaskRequest::new("ask first")).await;

    wait_for(&orchestrator, &id, ProcessStatus::WaitingForInput).await;
    assert!(orchestrator.send_input(&id, "y").await);

    let done = wait_for(&orchestrator, &id, ProcessStatus::Completed).await;
    assert!(done.output.contains("got y"));
    assert_eq!(done.exit_code, Some(0));
}

#[tokio::test]
async fn role_environment_reaches_the_worker() {
    let orchestrator = started(r#"echo "$CONDUCTOR_ROLE:$CONDUCTOR_TASK"; echo "{role}""#).await;
    let id = orchestrator
        .submit(TaskRequest::new("ship it").with_role("devops"))
        .await;

    let done = wait_for(&orchestrator, &id, ProcessStatus::Completed).await;
    assert!(done.output.contains("devops:ship it\n"));
    assert!(done.output.contains("\ndevops\n"));
}

#[tokio::test]
async fn working_directory_is_applied() {
    let dir = tempfile::TempDir::new().unwrap();
    let orchestrator = started("pwd").await;
    let id = orchestrator
        .submit(TaskRequest::new("where").with_working_directory(dir.path()))
        .await;

    let done = wait_for(&orchestrator, &id, ProcessStatus::Completed).await;
    let canonical = dir.path().canonicalize().unwrap();
    assert!(
        done.output.contains(&canonical.display().to_string())
            || done.output.contains(&dir.path().display().to_string())
    );
}

#[tokio::test]
async fn stop_kills_a_long_running_worker() {
    let orchestrator = started("sleep 30").await;
    let id = orchestrator.submit(TaskRequest::new("nap")).await;
    wait_for(&orchestrator, &id, ProcessStatus::Running).await;

    assert!(orchestrator.stop(&id).await);
    let snapshot = orchestrator.get(&id).await.unwrap();
    assert_eq!(snapshot.status, ProcessStatus::Canceled);

    // The exit is still recorded once the kill lands.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let snapshot = orchestrator.get(&id).await.unwrap();
        if snapshot.output.contains("[EXIT]") {
            assert_eq!(snapshot.status, ProcessStatus::Canceled);
            assert!(snapshot.pid.is_none());
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "kill never landed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn missing_executable_fails_the_record() {
    let orchestrator = Orchestrator::new(
        OrchestratorConfig {
            worker_executable_path: Some("/definitely/not/here".into()),
            ..Default::default()
        },
        Arc::new(ProcessLauncher::new()),
    );
    orchestrator.start().await;
    let id = orchestrator.submit(TaskRequest::new("doomed")).await;

    let snapshot = orchestrator.get(&id).await.unwrap();
    assert_eq!(snapshot.status, ProcessStatus::Failed);
    assert!(snapshot.output.contains("[ERROR] Failed to launch worker"));
}
