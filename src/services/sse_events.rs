use serde::Serialize;
use tracing::warn;

use crate::{
    dto::sse::{
        DeletionReason, PhaseChangedEvent, ServerEvent, SessionAttachedEvent,
        SessionDeletedEvent, SessionStalledEvent, SystemStatus,
    },
    state::{
        SharedState,
        phase::{GameKind, SessionStatus},
    },
};

const EVENT_SESSION_ATTACHED: &str = "session.attached";
const EVENT_PHASE_CHANGED: &str = "phase_changed";
const EVENT_SESSION_STALLED: &str = "session.stalled";
const EVENT_SESSION_DELETED: &str = "session.deleted";
const EVENT_SYSTEM_STATUS: &str = "system_status";

/// Broadcast that the dispatcher started orchestrating a session.
pub fn broadcast_session_attached(state: &SharedState, session_id: &str, game: GameKind) {
    let payload = SessionAttachedEvent {
        session_id: session_id.to_string(),
        game,
    };
    send_event(state, EVENT_SESSION_ATTACHED, &payload);
}

/// Broadcast a session status change.
pub fn broadcast_phase_changed(
    state: &SharedState,
    session_id: &str,
    game: GameKind,
    status: SessionStatus,
) {
    let payload = PhaseChangedEvent {
        session_id: session_id.to_string(),
        game,
        status,
    };
    send_event(state, EVENT_PHASE_CHANGED, &payload);
}

/// Broadcast that a session has been stuck in `status` for `stalled_after_ms`.
pub fn broadcast_session_stalled(
    state: &SharedState,
    session_id: &str,
    status: SessionStatus,
    stalled_after_ms: u64,
) {
    let payload = SessionStalledEvent {
        session_id: session_id.to_string(),
        status,
        stalled_after_ms,
    };
    send_event(state, EVENT_SESSION_STALLED, &payload);
}

/// Broadcast that a session and its chat log are gone.
pub fn broadcast_session_deleted(state: &SharedState, session_id: &str, reason: DeletionReason) {
    let payload = SessionDeletedEvent {
        session_id: session_id.to_string(),
        reason,
    };
    send_event(state, EVENT_SESSION_DELETED, &payload);
}

/// Broadcast the degraded flag after it changed.
pub fn broadcast_system_status(state: &SharedState, degraded: bool) {
    send_event(state, EVENT_SYSTEM_STATUS, &SystemStatus { degraded });
}

fn send_event(state: &SharedState, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => state.events().broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize SSE payload"),
    }
}
