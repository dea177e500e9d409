/// Current state of the backend process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendState {
    /// No process is tracked
    Untracked,
    /// Spawn issued, polling for readiness
    Starting,
    /// Backend answered the health probe
    Ready { port: u16 },
    /// Start attempt ended without a healthy backend
    Failed { error: String },
}
