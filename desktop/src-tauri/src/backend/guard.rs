//! Backend process lifecycle guard.

use crate::backend::{
    BackendConfig, BackendError, BackendResult, BackendState, HealthProbe, ProbeResult,
    poll_until_alive,
};

use std::panic::Location;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use error_location::ErrorLocation;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, error, info, warn};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Supervises the external backend executable.
///
/// Responsibilities:
/// - Ensure at most one backend instance is running (probe before spawn)
/// - Spawn the backend rooted in the per-user data directory
/// - Poll the status endpoint until ready or the attempt budget runs out
/// - Tear the process down gracefully, force-killing as a fallback
///
/// The guard owns its process handle; independent instances can coexist
/// in tests. `start()` and `stop()` are expected to be called
/// sequentially: the internal lock protects the handle, not the whole
/// start sequence.
pub struct BackendGuard {
    config: BackendConfig,
    data_dir: PathBuf,
    probe: HealthProbe,
    child: Mutex<Option<Child>>,
    state_tx: watch::Sender<BackendState>,
    state_rx: watch::Receiver<BackendState>,
    ready_tx: mpsc::UnboundedSender<bool>,
    ready_rx: Mutex<Option<mpsc::UnboundedReceiver<bool>>>,
}

impl BackendGuard {
    /// Create a guard for the configured backend, rooted at `data_dir`.
    pub fn new(config: BackendConfig, data_dir: PathBuf) -> Self {
        let probe = HealthProbe::new(
            &config.backend.host,
            config.backend.port,
            &config.backend.status_path,
            &config.probe,
        );
        let (state_tx, state_rx) = watch::channel(BackendState::Untracked);
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();

        Self {
            config,
            data_dir,
            probe,
            child: Mutex::new(None),
            state_tx,
            state_rx,
            ready_tx,
            ready_rx: Mutex::new(Some(ready_rx)),
        }
    }

    /// Create the data directory tree if absent. Idempotent.
    pub fn ensure_data_dir(&self) -> BackendResult<()> {
        std::fs::create_dir_all(&self.data_dir).map_err(|e| BackendError::DataDirCreation {
            path: self.data_dir.clone(),
            source: e,
            location: ErrorLocation::from(Location::caller()),
        })
    }

    /// Start the backend and wait for it to become reachable.
    ///
    /// Fast path: if the status endpoint already answers, nothing is
    /// spawned. Otherwise a process is spawned unless one is already
    /// tracked and running, then the endpoint is polled up to the
    /// configured attempt budget.
    ///
    /// Exactly one readiness notification (the boolean outcome) is sent
    /// per call, on every path including errors.
    pub async fn start(&self) -> BackendResult<()> {
        self.set_state(BackendState::Starting);

        let result = self.start_inner().await;

        match &result {
            Ok(()) => self.set_state(BackendState::Ready {
                port: self.config.backend.port,
            }),
            Err(e) => self.set_state(BackendState::Failed {
                error: e.to_string(),
            }),
        }

        let _ = self.ready_tx.send(result.is_ok());

        result
    }

    async fn start_inner(&self) -> BackendResult<()> {
        self.ensure_data_dir()?;

        // An already-reachable backend is reused, never duplicated.
        if self.probe.probe().await == ProbeResult::Alive {
            info!(
                "Backend already reachable on port {}",
                self.config.backend.port
            );
            return Ok(());
        }

        self.spawn_if_untracked().await?;

        let interval = Duration::from_millis(self.config.probe.poll_interval_ms);
        let budget = self.config.probe.max_poll_attempts;

        match poll_until_alive(budget, interval, || self.probe.probe()).await {
            Some(attempts) => {
                info!("Backend ready after {attempts} probe attempt(s)");
                Ok(())
            }
            None => Err(BackendError::StartupTimeout {
                attempts: budget,
                location: ErrorLocation::from(Location::caller()),
            }),
        }
    }

    /// Spawn the backend unless a tracked child is still running.
    ///
    /// A live-but-unhealthy child keeps its handle; polling gives it
    /// more time instead of racing a second copy against it.
    async fn spawn_if_untracked(&self) -> BackendResult<()> {
        let mut child_guard = self.child.lock().await;

        if let Some(child) = child_guard.as_mut()
            && matches!(child.try_wait(), Ok(None))
        {
            debug!(
                "Tracked backend (PID {}) still running, not spawning again",
                child.id()
            );
            return Ok(());
        }

        let binary = &self.config.backend.binary;
        info!(
            "Spawning {} with working directory {}",
            binary.display(),
            self.data_dir.display()
        );

        let child = Command::new(binary)
            .current_dir(&self.data_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| BackendError::ProcessSpawn {
                binary: binary.clone(),
                source: e,
                location: ErrorLocation::from(Location::caller()),
            })?;

        info!("Spawned backend with PID {}", child.id());
        *child_guard = Some(child);

        Ok(())
    }

    /// Stop the tracked backend, if any.
    ///
    /// Requests graceful termination, waits up to the shutdown grace
    /// window, force-kills if the process is still running. The tracked
    /// handle is cleared on every path; a call with nothing tracked is
    /// a no-op. Termination is best-effort; failures are logged, not
    /// surfaced.
    pub async fn stop(&self) {
        let mut child_guard = self.child.lock().await;

        let Some(mut child) = child_guard.take() else {
            debug!("No tracked backend to stop");
            return;
        };

        let pid = child.id();
        info!("Stopping backend (PID {pid})");

        Self::request_termination(pid);

        let grace = Duration::from_secs(self.config.probe.shutdown_grace_secs);
        let start = Instant::now();

        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    info!("Backend exited with {status}");
                    break;
                }
                Ok(None) => {
                    if start.elapsed() >= grace {
                        warn!(
                            "Backend still running after {}s, force killing",
                            grace.as_secs()
                        );
                        if let Err(e) = child.kill() {
                            warn!("Force kill failed: {e}");
                        }
                        let _ = child.wait();
                        break;
                    }
                    tokio::time::sleep(STOP_POLL_INTERVAL).await;
                }
                Err(e) => {
                    error!("Error checking backend process status: {e}");
                    let _ = child.kill();
                    let _ = child.wait();
                    break;
                }
            }
        }

        self.set_state(BackendState::Untracked);
    }

    #[cfg(unix)]
    fn request_termination(pid: u32) {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        info!("Sending SIGTERM to pid {pid}");
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).ok();
    }

    #[cfg(windows)]
    fn request_termination(pid: u32) {
        use windows_sys::Win32::System::Console::{CTRL_BREAK_EVENT, GenerateConsoleCtrlEvent};

        info!("Sending CTRL_BREAK to pid {pid}");
        unsafe {
            GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid);
        }
    }

    /// Get current state.
    pub fn state(&self) -> BackendState {
        self.state_rx.borrow().clone()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<BackendState> {
        self.state_rx.clone()
    }

    /// PID of the tracked backend process (if any).
    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().map(|c| c.id())
    }

    /// Port the backend is expected on.
    pub fn port(&self) -> u16 {
        self.config.backend.port
    }

    /// Data directory the backend is rooted in.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Hand out the readiness event receiver. Yields once; subsequent
    /// calls return `None`.
    pub async fn take_ready_events(&self) -> Option<mpsc::UnboundedReceiver<bool>> {
        self.ready_rx.lock().await.take()
    }

    fn set_state(&self, state: BackendState) {
        let _ = self.state_tx.send(state);
    }
}

impl Drop for BackendGuard {
    fn drop(&mut self) {
        // Synchronous cleanup on drop
        if let Ok(mut guard) = self.child.try_lock()
            && let Some(child) = guard.as_mut()
        {
            let _ = child.kill();
            let _ = child.wait();
            *guard = None;
        }
    }
}
