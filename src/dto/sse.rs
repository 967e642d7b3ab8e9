use serde::Serialize;

use crate::state::phase::{GameKind, SessionStatus};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// Event name, `None` for unnamed events.
    pub event: Option<String>,
    /// JSON payload.
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Whether the store health check is currently failing.
    pub degraded: bool,
    /// Number of sessions with a live actor.
    pub sessions: usize,
}

#[derive(Debug, Serialize)]
/// Broadcast when the backend enters or leaves degraded mode.
pub struct SystemStatus {
    /// Whether the store health check is currently failing.
    pub degraded: bool,
}

#[derive(Debug, Serialize)]
/// Broadcast when the dispatcher starts orchestrating a session.
pub struct SessionAttachedEvent {
    /// Attached session.
    pub session_id: String,
    /// Game resolved from its `gameId`.
    pub game: GameKind,
}

#[derive(Debug, Serialize)]
/// Broadcast whenever a session enters a new status.
pub struct PhaseChangedEvent {
    /// Session whose status changed.
    pub session_id: String,
    /// Game the session runs.
    pub game: GameKind,
    /// Status just entered.
    pub status: SessionStatus,
}

#[derive(Debug, Serialize)]
/// Broadcast when a session overstays its expected phase duration.
pub struct SessionStalledEvent {
    /// Stalled session.
    pub session_id: String,
    /// Status it is stuck in.
    pub status: SessionStatus,
    /// Time without progress after which the alarm fired.
    pub stalled_after_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
/// Why a session record disappeared.
pub enum DeletionReason {
    /// Grace period after `finished` elapsed.
    Finished,
    /// Nobody answered a round, or every player kept missing their turn.
    Abandoned,
    /// Another client deleted the record.
    Removed,
}

#[derive(Debug, Serialize)]
/// Broadcast once a session record and its chat log are gone.
pub struct SessionDeletedEvent {
    /// Deleted session.
    pub session_id: String,
    /// Why it went away.
    pub reason: DeletionReason,
}
