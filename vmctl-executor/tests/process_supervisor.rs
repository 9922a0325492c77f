//! Process supervisor against real `/bin/sh` children standing in for the
//! hypervisor binary.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use vmctl_executor::{ExecutorError, HypervisorProcess, ProcessSupervisor};

fn tempdir() -> tempfile::TempDir {
    match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => panic!("tempdir failed: {e}"),
    }
}

/// Write an executable shell script that ignores its `--api-socket` args.
fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    if let Err(e) = std::fs::write(&path, format!("#!/bin/sh\n{body}\n")) {
        panic!("write {name} failed: {e}");
    }
    if let Err(e) = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)) {
        panic!("chmod {name} failed: {e}");
    }
    path
}

async fn spawn(supervisor: &ProcessSupervisor, binary: &Path, socket: &Path) -> HypervisorProcess {
    // Retry briefly: exec of a just-written script can race with a fork in
    // a parallel test and fail with ETXTBSY.
    let mut last = None;
    for _ in 0..5 {
        match supervisor.spawn(binary, socket, "test-vm") {
            Ok(p) => return p,
            Err(e) => last = Some(e),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("spawn failed: {last:?}");
}

#[tokio::test]
async fn terminate_stops_a_cooperative_process() {
    let dir = tempdir();
    let binary = script(dir.path(), "hv", "exec sleep 30");
    let supervisor = ProcessSupervisor::new(Duration::from_secs(5));

    let mut process = spawn(&supervisor, &binary, &dir.path().join("hv.sock")).await;
    assert!(process.pid().is_some());
    assert!(process.is_alive());

    let started = Instant::now();
    if let Err(e) = supervisor.terminate(&mut process).await {
        panic!("terminate failed: {e}");
    }
    assert!(!process.is_alive());
    assert!(started.elapsed() < Duration::from_secs(5), "SIGTERM alone should suffice");
}

#[tokio::test]
async fn terminate_escalates_to_sigkill_after_grace_period() {
    let dir = tempdir();
    let binary = script(dir.path(), "stubborn", "trap '' TERM\nwhile true; do sleep 1; done");
    let grace = Duration::from_millis(300);
    let supervisor = ProcessSupervisor::new(grace);

    let mut process = spawn(&supervisor, &binary, &dir.path().join("hv.sock")).await;
    // Give the shell time to install its trap.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    if let Err(e) = supervisor.terminate(&mut process).await {
        panic!("terminate failed: {e}");
    }
    let elapsed = started.elapsed();
    assert!(!process.is_alive());
    assert!(elapsed >= grace, "SIGKILL must wait out the grace period, took {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "must not block past grace plus kill, took {elapsed:?}");
}

#[tokio::test]
async fn crashed_process_is_observed_and_terminate_is_a_no_op() {
    let dir = tempdir();
    let binary = script(dir.path(), "crashy", "exit 3");
    let supervisor = ProcessSupervisor::default();

    let mut process = spawn(&supervisor, &binary, &dir.path().join("hv.sock")).await;
    let deadline = Instant::now() + Duration::from_secs(5);
    while process.is_alive() {
        assert!(Instant::now() < deadline, "child never exited");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let started = Instant::now();
    assert!(supervisor.terminate(&mut process).await.is_ok());
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn spawn_of_non_executable_file_fails_synchronously() {
    let dir = tempdir();
    let path = dir.path().join("not-executable");
    if let Err(e) = std::fs::write(&path, "plain text") {
        panic!("write failed: {e}");
    }
    let result = ProcessSupervisor::default().spawn(&path, &dir.path().join("hv.sock"), "test-vm");
    assert!(matches!(result, Err(ExecutorError::SpawnFailed(_))), "got {result:?}");
}
