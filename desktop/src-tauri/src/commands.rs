//! Tauri IPC commands for frontend communication.

use crate::backend::{BackendGuard, BackendState, BackendStatus};

use std::sync::Arc;

use tauri::State;
use tracing::error;

/// Start the backend and wait for readiness.
///
/// Returns the boolean outcome; the same boolean is delivered
/// asynchronously via the `backendReady` event.
#[tauri::command]
pub async fn start_backend(guard: State<'_, Arc<BackendGuard>>) -> Result<bool, String> {
    match guard.start().await {
        Ok(()) => Ok(true),
        Err(e) => {
            error!("Failed to start backend: {e}\nHint: {}", e.recovery_hint());
            Ok(false)
        }
    }
}

/// Stop the tracked backend process. No-op when nothing is tracked.
#[tauri::command]
pub async fn stop_backend(guard: State<'_, Arc<BackendGuard>>) -> Result<(), String> {
    guard.stop().await;
    Ok(())
}

/// Get current backend status.
///
/// Called by frontend to check backend state and get the base URL.
#[tauri::command]
pub async fn get_backend_status(
    guard: State<'_, Arc<BackendGuard>>,
) -> Result<BackendStatus, String> {
    let state = guard.state();
    let pid = guard.pid().await;

    Ok(build_backend_status(&state, pid))
}

/// Converts internal guard state to frontend-facing status.
///
/// Shared by `get_backend_status` and state change events.
pub fn build_backend_status(state: &BackendState, pid: Option<u32>) -> BackendStatus {
    let (state_str, port, error, recovery_hint) = match state {
        BackendState::Untracked => ("untracked".into(), None, None, None),
        BackendState::Starting => ("starting".into(), None, None, None),
        BackendState::Ready { port } => ("ready".into(), Some(*port), None, None),
        BackendState::Failed { error } => (
            "failed".into(),
            None,
            Some(error.clone()),
            Some("Please check the logs or restart the application.".into()),
        ),
    };

    let is_ready = matches!(state, BackendState::Ready { .. });
    let base_url = port.map(|p| format!("http://127.0.0.1:{p}"));

    BackendStatus {
        state: state_str,
        port,
        base_url,
        error,
        recovery_hint,
        is_ready,
        pid,
    }
}
