#![allow(dead_code)]

mod backend;
mod commands;
mod logging;

use backend::{BackendConfig, BackendGuard};
use logging::setup_logging;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tauri::{Emitter, Manager};
use tracing::{error, info};

// Tauri event names (must match frontend constants)
const EVENT_BACKEND_READY: &str = "backendReady";
const EVENT_BACKEND_STATE_CHANGED: &str = "backend-state-changed";

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    tauri::Builder::default()
        .plugin(tauri_plugin_single_instance::init(|app, _argv, _cwd| {
            // Focus existing window on second instance attempt
            if let Some(window) = app.get_webview_window("main") {
                window.show().ok();
                window.set_focus().ok();
            }
        }))
        .setup(|app| {
            let data_dir = app.path().app_data_dir()?;
            std::fs::create_dir_all(&data_dir)?;

            let config = BackendConfig::load_or_create(&data_dir)
                .map_err(|e| format!("Config error: {}", e))?;

            setup_logging(&data_dir, &config.logging)?;

            info!("Starting wa-desktop v{}", env!("CARGO_PKG_VERSION"));
            info!("Data directory: {:?}", data_dir);

            let guard = Arc::new(BackendGuard::new(config, data_dir));
            app.manage(guard.clone());

            // Setup signal handlers for graceful shutdown on Unix
            #[cfg(unix)]
            {
                let app_handle = app.handle().clone();
                std::thread::spawn(move || {
                    use signal_hook::consts::{SIGINT, SIGTERM};
                    use signal_hook::iterator::Signals;

                    let mut signals = match Signals::new([SIGINT, SIGTERM]) {
                        Ok(s) => s,
                        Err(e) => {
                            error!("Failed to register signal handlers: {e}");
                            return;
                        }
                    };

                    if let Some(sig) = signals.forever().next() {
                        info!("Received signal {sig}, shutting down...");

                        if let Some(guard) = app_handle.try_state::<Arc<BackendGuard>>() {
                            tauri::async_runtime::block_on(guard.stop());
                            info!("Backend stopped due to signal {sig}");
                        }

                        std::process::exit(0);
                    }
                });
            }

            // Forward readiness outcomes to the frontend, one per start call
            let app_handle = app.handle().clone();
            let guard_for_ready = guard.clone();
            tauri::async_runtime::spawn(async move {
                let Some(mut ready_rx) = guard_for_ready.take_ready_events().await else {
                    return;
                };
                while let Some(ready) = ready_rx.recv().await {
                    info!("Emitting {EVENT_BACKEND_READY}: {ready}");
                    app_handle.emit(EVENT_BACKEND_READY, ready).ok();
                }
            });

            // Subscribe to state changes for frontend status updates
            let app_handle = app.handle().clone();
            let guard_for_events = guard.clone();
            let mut state_rx = guard.subscribe();
            tauri::async_runtime::spawn(async move {
                while state_rx.changed().await.is_ok() {
                    let state = state_rx.borrow().clone();
                    let pid = guard_for_events.pid().await;

                    let status = commands::build_backend_status(&state, pid);

                    info!("Emitting {}: state={}", EVENT_BACKEND_STATE_CHANGED, status.state);
                    app_handle.emit(EVENT_BACKEND_STATE_CHANGED, status).ok();
                }
            });

            // Start backend in background
            let guard_clone = guard.clone();
            tauri::async_runtime::spawn(async move {
                match guard_clone.start().await {
                    Ok(()) => info!("Backend started successfully"),
                    Err(e) => error!("Failed to start backend: {e}"),
                }
            });

            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::start_backend,
            commands::stop_backend,
            commands::get_backend_status,
        ])
        .build(tauri::generate_context!())
        .expect("error while building tauri application")
        .run(|app_handle, event| {
            use tauri::RunEvent;

            if let RunEvent::ExitRequested { api, code, .. } = event {
                info!("Exit requested (code: {:?})", code);
                api.prevent_exit();

                let app_handle_clone = app_handle.clone();
                tauri::async_runtime::block_on(async move {
                    if let Some(guard) = app_handle_clone.try_state::<Arc<BackendGuard>>() {
                        info!("Stopping backend before exit...");
                        guard.stop().await;
                    }
                });

                std::process::exit(code.unwrap_or(0));
            }
        });
}
