use crate::{dto::health::HealthResponse, state::SharedState};

/// Report the degraded flag maintained by the storage supervisor along with the current load.
pub fn health_status(state: &SharedState) -> HealthResponse {
    HealthResponse::new(
        state.is_degraded(),
        state.sessions().len(),
        state.timers().pending(),
    )
}
