use serde::Serialize;

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Number of sessions being orchestrated.
    pub sessions: usize,
    /// Number of pending session timers.
    pub pending_timers: usize,
}

impl HealthResponse {
    /// Build the response from the degraded flag and the current load.
    pub fn new(degraded: bool, sessions: usize, pending_timers: usize) -> Self {
        let status = if degraded { "degraded" } else { "ok" };
        Self {
            status: status.to_string(),
            sessions,
            pending_timers,
        }
    }
}
