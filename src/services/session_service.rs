//! Read-only projections of the sessions the orchestrator drives.

use crate::{dto::session::SessionSummary, error::ServiceError, state::SharedState};

/// Every attached session, oldest attachment first.
pub fn list_sessions(state: &SharedState) -> Vec<SessionSummary> {
    let mut sessions: Vec<SessionSummary> = state
        .sessions()
        .iter()
        .map(|entry| SessionSummary::from((entry.key().clone(), entry.value().clone())))
        .collect();
    sessions.sort_by(|a, b| {
        a.attached_at_ms
            .cmp(&b.attached_at_ms)
            .then_with(|| a.id.cmp(&b.id))
    });
    sessions
}

/// Summary of one attached session.
pub fn get_session(state: &SharedState, session_id: &str) -> Result<SessionSummary, ServiceError> {
    let entry = state
        .sessions()
        .get(session_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}`")))?;
    Ok(SessionSummary::from((session_id.to_string(), entry)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::OrchestratorConfig,
        dao::store::memory::MemoryStore,
        state::{AppState, SessionEntry, phase::{GameKind, SessionStatus}},
    };

    fn state() -> SharedState {
        AppState::new(Arc::new(MemoryStore::new()), OrchestratorConfig::default())
    }

    #[test]
    fn lists_sessions_in_attachment_order() {
        let state = state();
        let mut late = SessionEntry::attached(GameKind::RopeDude, 1);
        late.attached_at += 10;
        state.sessions().insert("b".into(), late);
        state
            .sessions()
            .insert("a".into(), SessionEntry::attached(GameKind::NeverHaveIEver, 2));
        state.record_status("a", SessionStatus::Responding);

        let sessions = list_sessions(&state);
        let ids: Vec<_> = sessions.iter().map(|session| session.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(sessions[0].status, Some(SessionStatus::Responding));
        assert!(sessions[0].phase_entered_at.is_some());
    }

    #[test]
    fn unknown_session_is_not_found() {
        let state = state();
        assert!(matches!(
            get_session(&state, "missing"),
            Err(ServiceError::NotFound(_))
        ));
    }
}
