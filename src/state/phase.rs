use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Which party game a session runs, resolved once from its `gameId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    /// "Never Have I Ever" (`gameId` "1").
    NeverHaveIEver,
    /// Word guessing game (`gameId` "2").
    RopeDude,
}

impl GameKind {
    /// Resolve the game from the raw `gameId` field, written as a string by the lobby.
    pub fn from_game_id(value: &Value) -> Option<Self> {
        let id = match value {
            Value::String(id) => id.trim().to_string(),
            Value::Number(id) => id.to_string(),
            _ => return None,
        };
        match id.as_str() {
            "1" => Some(GameKind::NeverHaveIEver),
            "2" => Some(GameKind::RopeDude),
            _ => None,
        }
    }

    /// Identifier stored in the session record.
    pub fn game_id(self) -> &'static str {
        match self {
            GameKind::NeverHaveIEver => "1",
            GameKind::RopeDude => "2",
        }
    }

    /// Parse a raw `status` value into a status this game knows about.
    pub fn parse_status(self, raw: &str) -> Option<SessionStatus> {
        let status = match raw {
            "responding" => SessionStatus::Responding,
            "confessing" => SessionStatus::Confessing,
            "playing" => SessionStatus::Playing,
            "finished" => SessionStatus::Finished,
            _ => return None,
        };
        self.statuses().contains(&status).then_some(status)
    }

    /// Statuses that make up this game's state graph.
    pub fn statuses(self) -> &'static [SessionStatus] {
        match self {
            GameKind::NeverHaveIEver => &[
                SessionStatus::Responding,
                SessionStatus::Confessing,
                SessionStatus::Finished,
            ],
            GameKind::RopeDude => &[SessionStatus::Playing, SessionStatus::Finished],
        }
    }
}

/// Status of a session; it alone decides which controller logic is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// NHIE: players submit responses for the current round.
    Responding,
    /// NHIE: players confess and lose points.
    Confessing,
    /// RopeDude: players take turns submitting letters.
    Playing,
    /// Terminal status shared by both games; the session is deleted after a grace period.
    Finished,
}

impl SessionStatus {
    /// Value written to the `status` field.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Responding => "responding",
            SessionStatus::Confessing => "confessing",
            SessionStatus::Playing => "playing",
            SessionStatus::Finished => "finished",
        }
    }
}

/// Error returned when a status change is not an edge of the game's state graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition for {kind:?}: {from:?} cannot move to {to:?}")]
pub struct InvalidTransition {
    /// Game whose graph was checked.
    pub kind: GameKind,
    /// Status that was live when the change was observed.
    pub from: SessionStatus,
    /// Status the session was moved to.
    pub to: SessionStatus,
}

/// Validate a status change. The first routed status of a session may be any status of
/// its game, which covers sessions picked up again after a restart.
pub fn check_transition(
    kind: GameKind,
    from: Option<SessionStatus>,
    to: SessionStatus,
) -> Result<(), InvalidTransition> {
    let Some(from) = from else {
        return Ok(());
    };

    let allowed = match (kind, from, to) {
        (GameKind::NeverHaveIEver, SessionStatus::Responding, SessionStatus::Confessing) => true,
        (GameKind::NeverHaveIEver, SessionStatus::Confessing, SessionStatus::Responding) => true,
        (GameKind::NeverHaveIEver, SessionStatus::Confessing, SessionStatus::Finished) => true,
        (GameKind::RopeDude, SessionStatus::Playing, SessionStatus::Finished) => true,
        _ => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(InvalidTransition { kind, from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn game_ids_resolve() {
        assert_eq!(
            GameKind::from_game_id(&json!("1")),
            Some(GameKind::NeverHaveIEver)
        );
        assert_eq!(GameKind::from_game_id(&json!(2)), Some(GameKind::RopeDude));
        assert_eq!(GameKind::from_game_id(&json!("3")), None);
        assert_eq!(GameKind::from_game_id(&Value::Null), None);
    }

    #[test]
    fn statuses_are_scoped_to_their_game() {
        assert_eq!(
            GameKind::NeverHaveIEver.parse_status("confessing"),
            Some(SessionStatus::Confessing)
        );
        assert_eq!(GameKind::NeverHaveIEver.parse_status("playing"), None);
        assert_eq!(GameKind::RopeDude.parse_status("responding"), None);
        assert_eq!(
            GameKind::RopeDude.parse_status("finished"),
            Some(SessionStatus::Finished)
        );
    }

    #[test]
    fn nhie_cycle_is_allowed() {
        let kind = GameKind::NeverHaveIEver;
        assert!(check_transition(kind, None, SessionStatus::Responding).is_ok());
        assert!(check_transition(kind, Some(SessionStatus::Responding), SessionStatus::Confessing).is_ok());
        assert!(check_transition(kind, Some(SessionStatus::Confessing), SessionStatus::Responding).is_ok());
        assert!(check_transition(kind, Some(SessionStatus::Confessing), SessionStatus::Finished).is_ok());
    }

    #[test]
    fn undeclared_edges_are_rejected() {
        let err = check_transition(
            GameKind::NeverHaveIEver,
            Some(SessionStatus::Responding),
            SessionStatus::Finished,
        )
        .unwrap_err();
        assert_eq!(err.from, SessionStatus::Responding);
        assert_eq!(err.to, SessionStatus::Finished);

        assert!(
            check_transition(
                GameKind::RopeDude,
                Some(SessionStatus::Finished),
                SessionStatus::Playing
            )
            .is_err()
        );
        assert!(
            check_transition(
                GameKind::NeverHaveIEver,
                Some(SessionStatus::Finished),
                SessionStatus::Responding
            )
            .is_err()
        );
    }
}
