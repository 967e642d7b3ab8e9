use serde::Serialize;

use crate::{
    dto::format_timestamp_ms,
    state::{
        SessionEntry,
        phase::{GameKind, SessionStatus},
    },
};

/// Session as listed by `GET /sessions`.
#[derive(Debug, Serialize)]
pub struct SessionSummary {
    /// Session id, the key under `gameSessions`.
    pub id: String,
    /// Game the session runs.
    pub game: GameKind,
    /// Last routed status, absent until the first one arrives.
    pub status: Option<SessionStatus>,
    /// RFC 3339 time at which the current status was entered.
    pub phase_entered_at: Option<String>,
    /// RFC 3339 time at which the orchestrator picked the session up.
    pub attached_at: String,
    #[serde(skip)]
    pub(crate) attached_at_ms: i64,
}

impl From<(String, SessionEntry)> for SessionSummary {
    fn from((id, entry): (String, SessionEntry)) -> Self {
        Self {
            id,
            game: entry.kind,
            status: entry.status,
            phase_entered_at: entry.phase_entered_at.map(format_timestamp_ms),
            attached_at: format_timestamp_ms(entry.attached_at),
            attached_at_ms: entry.attached_at,
        }
    }
}
