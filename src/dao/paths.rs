//! Store layout shared with the game clients.

/// Root under which every game session record lives.
pub const GAME_SESSIONS: &str = "gameSessions";
/// Root under which every lobby chat log lives.
pub const LOBBY_MESSAGES: &str = "lobbyMessages";

/// Location of the whole session record.
pub fn session(session_id: &str) -> String {
    format!("{GAME_SESSIONS}/{session_id}")
}

/// Location of the chat log owned by the session.
pub fn chat_log(session_id: &str) -> String {
    format!("{LOBBY_MESSAGES}/{session_id}")
}

/// Field of the session record, e.g. `status` or `letterBank`.
pub fn session_field(session_id: &str, field: &str) -> String {
    format!("{GAME_SESSIONS}/{session_id}/{field}")
}

/// Location of a single NHIE round.
pub fn round(session_id: &str, round_key: &str) -> String {
    format!("{GAME_SESSIONS}/{session_id}/rounds/{round_key}")
}

/// Location of the responses collected for a NHIE round.
pub fn round_responses(session_id: &str, round_key: &str) -> String {
    format!("{GAME_SESSIONS}/{session_id}/rounds/{round_key}/responses")
}

/// Field names of the session record.
pub mod fields {
    /// Game identifier, `"1"` for NHIE and `"2"` for RopeDude.
    pub const GAME_ID: &str = "gameId";
    /// Current status of the session.
    pub const STATUS: &str = "status";
    /// Players keyed by user id.
    pub const PLAYERS: &str = "players";
    /// NHIE rounds keyed by push id.
    pub const ROUNDS: &str = "rounds";
    /// RopeDude elimination counter.
    pub const POINTS: &str = "points";
    /// RopeDude player currently allowed to submit a letter.
    pub const TURN: &str = "turn";
    /// Timestamp at which the current RopeDude turn started.
    pub const TURN_TIME_STARTED: &str = "turnTimeStarted";
    /// Letters submitted so far in a RopeDude game.
    pub const LETTER_BANK: &str = "letterBank";
    /// Word RopeDude players are guessing.
    pub const TARGET_WORD: &str = "targetWord";
    /// Final guess attempts of a RopeDude game.
    pub const FINAL_GUESS: &str = "finalGuess";
    /// Start timestamp of a NHIE round.
    pub const TIME_STARTED: &str = "timeStarted";
}
