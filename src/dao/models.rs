use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::Value;
use time::OffsetDateTime;

use crate::dao::storage::{StorageError, StorageResult};

/// Identifier of a player inside a session (the client's user id).
pub type PlayerId = String;

/// Player entry stored under `gameSessions/{id}/players/{uid}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerEntity {
    /// Display name chosen by the player.
    #[serde(default)]
    pub nickname: String,
    /// Lifetime number of games played.
    #[serde(default, deserialize_with = "lenient_int")]
    pub total_games_played: Option<i64>,
    /// Lifetime points.
    #[serde(default, deserialize_with = "lenient_int")]
    pub total_points: Option<i64>,
    /// Lifetime wins.
    #[serde(default, deserialize_with = "lenient_int")]
    pub wins: Option<i64>,
    /// Avatar location.
    #[serde(default)]
    pub profile_pic: Option<String>,
    /// In-game elimination counter; a player is out once it reaches zero.
    #[serde(default, deserialize_with = "lenient_int")]
    pub points: Option<i64>,
}

/// A single NHIE response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseEntity {
    /// Nickname of the author, copied by the client for display.
    #[serde(default)]
    pub nickname: String,
    /// Free text completing "Never have I ever...".
    #[serde(default)]
    pub text: String,
}

impl ResponseEntity {
    /// Whether the response carries more than a single character of text.
    pub fn is_answered(&self) -> bool {
        self.text.chars().count() > 1
    }
}

/// Milliseconds since the Unix epoch, the timestamp format clients expect.
pub fn timestamp_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Decode `value` read at `path`, reporting a malformed record on mismatch.
pub fn decode<T>(path: &str, value: Value) -> StorageResult<T>
where
    T: DeserializeOwned,
{
    serde_json::from_value(value).map_err(|err| StorageError::malformed(path, err.to_string()))
}

/// Decode the players mapping; a missing mapping is malformed since every session has players.
pub fn decode_players(path: &str, value: Value) -> StorageResult<IndexMap<PlayerId, PlayerEntity>> {
    let Value::Object(entries) = value else {
        return Err(StorageError::malformed(path, "session has no players"));
    };
    if entries.is_empty() {
        return Err(StorageError::malformed(path, "players mapping is empty"));
    }
    // Membership counts even when the profile itself is incomplete.
    Ok(entries
        .into_iter()
        .map(|(id, entry)| (id, serde_json::from_value(entry).unwrap_or_default()))
        .collect())
}

/// Player ids sorted by key, the order in which RopeDude turns rotate.
pub fn rotation_order(players: &IndexMap<PlayerId, PlayerEntity>) -> Vec<PlayerId> {
    let mut order: Vec<PlayerId> = players.keys().cloned().collect();
    order.sort();
    order
}

/// Number of responses carrying actual text, deduplicated by author.
pub fn answered_responses(value: &Value) -> usize {
    decode_entries::<ResponseEntity>(value.clone())
        .values()
        .filter(|response| response.is_answered())
        .count()
}

/// Whether any player in the mapping has run out of points.
pub fn any_player_eliminated(value: &Value) -> bool {
    decode_entries::<PlayerEntity>(value.clone())
        .values()
        .any(|player| player.points.is_some_and(|points| points <= 0))
}

/// Letters held by the letter bank, in insertion order.
///
/// Clients either push the letter as the value or use the letter itself as the key
/// (`letterBank/E = true`), so a non-string value falls back to the key.
pub fn letter_bank(value: &Value) -> IndexSet<String> {
    let Value::Object(entries) = value else {
        return IndexSet::new();
    };
    entries
        .iter()
        .filter_map(|(key, value)| letter_of(key, value))
        .collect()
}

/// Letter carried by a single letter bank entry.
pub fn letter_of(key: &str, value: &Value) -> Option<String> {
    let letter = match value {
        Value::String(letter) if !letter.trim().is_empty() => letter.trim(),
        _ => key,
    };
    (!letter.is_empty()).then(|| letter.to_uppercase())
}

/// Decode every child of an object, skipping entries that do not match `T`.
fn decode_entries<T>(value: Value) -> IndexMap<String, T>
where
    T: DeserializeOwned,
{
    let Value::Object(entries) = value else {
        return IndexMap::new();
    };
    entries
        .into_iter()
        .filter_map(|(key, entry)| match serde_json::from_value::<T>(entry) {
            Ok(decoded) => Some((key, decoded)),
            Err(err) => {
                tracing::debug!(%key, error = %err, "skipping undecodable entry");
                None
            }
        })
        .collect()
}

/// Accept integers written either as JSON numbers or as numeric strings.
fn lenient_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float.trunc() as i64)),
        Some(Value::String(text)) => parse_leading_int(&text),
        _ => None,
    })
}

/// Parse the leading integer of `text`, ignoring trailing garbage ("12pts" -> 12).
fn parse_leading_int(text: &str) -> Option<i64> {
    let trimmed = text.trim_start();
    let digits_end = trimmed
        .char_indices()
        .find(|(index, c)| !(c.is_ascii_digit() || (*index == 0 && (*c == '-' || *c == '+'))))
        .map(|(index, _)| index)
        .unwrap_or(trimmed.len());
    trimmed[..digits_end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn counts_only_responses_with_text() {
        let responses = json!({
            "a": { "nickname": "Ann", "text": "peed in a pool" },
            "b": { "nickname": "Bob", "text": "x" },
            "c": { "nickname": "Cat" },
        });
        assert_eq!(answered_responses(&responses), 1);
        assert_eq!(answered_responses(&Value::Null), 0);
    }

    #[test]
    fn elimination_accepts_string_points() {
        assert!(any_player_eliminated(&json!({
            "a": { "nickname": "Ann", "points": "0" },
            "b": { "nickname": "Bob", "points": 4 },
        })));
        assert!(!any_player_eliminated(&json!({
            "a": { "nickname": "Ann", "points": "3" },
            "b": { "nickname": "Bob" },
        })));
        assert!(any_player_eliminated(&json!({ "a": { "points": -2 } })));
    }

    #[test]
    fn missing_players_are_malformed() {
        let err = decode_players("gameSessions/s1/players", Value::Null).unwrap_err();
        assert!(matches!(err, StorageError::Malformed { .. }));
    }

    #[test]
    fn rotation_is_sorted_by_id() {
        let players = decode_players(
            "gameSessions/s1/players",
            json!({ "zed": {}, "amy": {}, "kim": {} }),
        )
        .unwrap();
        assert_eq!(rotation_order(&players), vec!["amy", "kim", "zed"]);
    }

    #[test]
    fn letters_come_from_values_or_keys() {
        let bank = letter_bank(&json!({ "-Nabc": "c", "H": true, "-Nabd": "E" }));
        let letters: Vec<_> = bank.into_iter().collect();
        assert_eq!(letters, vec!["C", "E", "H"]);
    }

    #[test]
    fn leading_int_parsing_matches_client_behaviour() {
        assert_eq!(parse_leading_int("12pts"), Some(12));
        assert_eq!(parse_leading_int(" -3"), Some(-3));
        assert_eq!(parse_leading_int("abc"), None);
    }
}
