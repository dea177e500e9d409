use crate::backend::{BackendConfig, BackendError, BackendGuard, BackendState};

use std::path::PathBuf;

use serial_test::serial;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(port: u16, binary: PathBuf) -> BackendConfig {
    let mut config = BackendConfig::default();
    config.backend.port = port;
    config.backend.binary = binary;
    config.probe.poll_interval_ms = 10;
    config.probe.max_poll_attempts = 3;
    config.probe.shutdown_grace_secs = 1;
    config
}

/// A port nothing listens on. The listener is dropped immediately, so
/// probes against it see connection refused.
fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).expect("bind");
    listener.local_addr().expect("local addr").port()
}

#[cfg(unix)]
fn write_script(dir: &std::path::Path, name: &str, contents: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join(name);
    std::fs::write(&script, contents).expect("write script");
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    script
}

#[tokio::test]
#[serial]
async fn test_start_reuses_reachable_backend_without_spawning() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(
        server.address().port(),
        PathBuf::from("/nonexistent/wa-backend"),
    );
    let guard = BackendGuard::new(config, dir.path().join("data"));
    let mut ready_rx = guard.take_ready_events().await.unwrap();

    guard.start().await.expect("fast path succeeds");

    assert_eq!(guard.pid().await, None);
    assert_eq!(
        guard.state(),
        BackendState::Ready { port: guard.port() }
    );
    assert!(matches!(ready_rx.try_recv(), Ok(true)));
    assert!(ready_rx.try_recv().is_err());
}

#[tokio::test]
#[serial]
async fn test_sequential_starts_never_double_spawn() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(
        server.address().port(),
        PathBuf::from("/nonexistent/wa-backend"),
    );
    let guard = BackendGuard::new(config, dir.path().join("data"));
    let mut ready_rx = guard.take_ready_events().await.unwrap();

    guard.start().await.expect("first start");
    guard.start().await.expect("second start");

    assert_eq!(guard.pid().await, None);

    // One readiness notification per call, no more
    assert!(matches!(ready_rx.try_recv(), Ok(true)));
    assert!(matches!(ready_rx.try_recv(), Ok(true)));
    assert!(ready_rx.try_recv().is_err());
}

#[cfg(unix)]
#[tokio::test]
#[serial]
async fn test_start_spawns_once_and_fails_after_budget() {
    let dir = TempDir::new().unwrap();
    let script = write_script(
        dir.path(),
        "fake-backend",
        "#!/bin/sh\ntouch started-here\nsleep 30\n",
    );
    let data_dir = dir.path().join("data");
    let config = test_config(free_port(), script);
    let guard = BackendGuard::new(config, data_dir.clone());
    let mut ready_rx = guard.take_ready_events().await.unwrap();

    let err = guard.start().await.unwrap_err();
    assert!(matches!(err, BackendError::StartupTimeout { attempts: 3, .. }));

    let pid = guard.pid().await.expect("unhealthy process stays tracked");
    assert!(matches!(guard.state(), BackendState::Failed { .. }));
    assert!(matches!(ready_rx.try_recv(), Ok(false)));
    assert!(ready_rx.try_recv().is_err());

    // Working directory of the spawned process is the data directory
    for _ in 0..50 {
        if data_dir.join("started-here").exists() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(data_dir.join("started-here").exists());

    // A retry re-probes and reuses the still-running process
    guard.start().await.unwrap_err();
    assert_eq!(guard.pid().await, Some(pid));

    guard.stop().await;
    assert_eq!(guard.pid().await, None);
}

#[tokio::test]
async fn test_stop_without_tracked_process_is_noop() {
    let dir = TempDir::new().unwrap();
    let config = test_config(free_port(), PathBuf::from("/nonexistent/wa-backend"));
    let guard = BackendGuard::new(config, dir.path().join("data"));

    guard.stop().await;

    assert_eq!(guard.pid().await, None);
    assert_eq!(guard.state(), BackendState::Untracked);
}

#[cfg(unix)]
#[tokio::test]
#[serial]
async fn test_stop_terminates_cooperative_child() {
    let dir = TempDir::new().unwrap();
    let script = write_script(dir.path(), "fake-backend", "#!/bin/sh\nsleep 30\n");
    let config = test_config(free_port(), script);
    let guard = BackendGuard::new(config, dir.path().join("data"));

    guard.start().await.unwrap_err();
    let pid = guard.pid().await.expect("tracked");

    guard.stop().await;

    assert_eq!(guard.pid().await, None);
    assert_eq!(guard.state(), BackendState::Untracked);

    // Process is gone and reaped
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    assert!(kill(Pid::from_raw(pid as i32), None).is_err());
}

#[cfg(unix)]
#[tokio::test]
#[serial]
async fn test_stop_force_kills_stubborn_child() {
    let dir = TempDir::new().unwrap();
    let script = write_script(
        dir.path(),
        "stubborn-backend",
        "#!/bin/sh\ntrap '' TERM\nwhile true; do sleep 1; done\n",
    );
    let mut config = test_config(free_port(), script);
    config.probe.max_poll_attempts = 1;
    let guard = BackendGuard::new(config, dir.path().join("data"));

    guard.start().await.unwrap_err();
    let pid = guard.pid().await.expect("tracked");

    // Give the shell a moment to install its TERM trap
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    guard.stop().await;

    // Handle cleared even though the grace window expired
    assert_eq!(guard.pid().await, None);

    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    assert!(kill(Pid::from_raw(pid as i32), None).is_err());
}

#[tokio::test]
#[serial]
async fn test_spawn_failure_reported_not_panicked() {
    let dir = TempDir::new().unwrap();
    let config = test_config(free_port(), dir.path().join("missing-backend"));
    let guard = BackendGuard::new(config, dir.path().join("data"));
    let mut ready_rx = guard.take_ready_events().await.unwrap();

    let err = guard.start().await.unwrap_err();

    assert!(matches!(err, BackendError::ProcessSpawn { .. }));
    assert_eq!(guard.pid().await, None);
    assert!(matches!(guard.state(), BackendState::Failed { .. }));
    assert!(matches!(ready_rx.try_recv(), Ok(false)));
    assert!(ready_rx.try_recv().is_err());
}

#[test]
fn test_ensure_data_dir_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let config = test_config(free_port(), PathBuf::from("/nonexistent/wa-backend"));
    let guard = BackendGuard::new(config, dir.path().join("nested").join("data"));

    guard.ensure_data_dir().unwrap();
    assert!(guard.data_dir().is_dir());

    guard.ensure_data_dir().unwrap();
}
