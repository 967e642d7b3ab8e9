use axum::Router;

use crate::state::SharedState;

/// `/healthcheck`.
pub mod health;
/// `/sessions` and `/sessions/{id}`.
pub mod sessions;
/// `/sse/events`.
pub mod sse;

/// Compose all route trees and wire in the shared state.
pub fn router(state: SharedState) -> Router<()> {
    health::router()
        .merge(sessions::router())
        .merge(sse::router())
        .with_state(state)
}
