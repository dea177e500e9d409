//! Liveness probing for the backend's status endpoint.

use crate::backend::ProbeSettings;

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Outcome of a single liveness probe.
///
/// Probe failures are collapsed: connection refused, timeout, and
/// transport errors all read as `NotAlive`. The distinguishing detail
/// is logged at debug level and never crosses the guard boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    Alive,
    NotAlive,
}

/// Issues bounded HTTP GETs against the backend's status endpoint.
pub struct HealthProbe {
    client: reqwest::Client,
    url: String,
}

impl HealthProbe {
    /// Create a probe for the given endpoint.
    pub fn new(host: &str, port: u16, status_path: &str, settings: &ProbeSettings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.probe_timeout_secs))
            .pool_max_idle_per_host(1)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            url: format!("http://{host}:{port}{status_path}"),
        }
    }

    /// Perform a single liveness probe.
    ///
    /// Any response counts as alive regardless of status code or body;
    /// the backend is opaque beyond answering at all.
    pub async fn probe(&self) -> ProbeResult {
        match self.client.get(&self.url).send().await {
            Ok(_) => ProbeResult::Alive,
            Err(e) => {
                debug!("Probe of {} failed: {e}", self.url);
                ProbeResult::NotAlive
            }
        }
    }
}

/// Poll until a probe reports alive or the attempt budget is exhausted.
///
/// Returns the 1-based attempt number on first success, `None` when the
/// budget runs out. No further probes are issued after a success.
pub async fn poll_until_alive<F, Fut>(
    max_attempts: u32,
    interval: Duration,
    mut probe: F,
) -> Option<u32>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProbeResult>,
{
    for attempt in 1..=max_attempts {
        if probe().await == ProbeResult::Alive {
            return Some(attempt);
        }
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }

    None
}
