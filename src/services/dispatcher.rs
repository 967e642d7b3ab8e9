use std::time::Duration;

use serde_json::Value;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{
        paths::{self, fields},
        store::WatchEvent,
    },
    error::{ServiceError, ServiceResult},
    services::{session, sse_events},
    state::{SharedState, phase::GameKind},
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);

/// Watch for game sessions and start one actor per session.
///
/// Sessions already present when the watch attaches are picked up as well, so a restarted
/// orchestrator resumes every live session from its current status.
pub async fn run(state: SharedState) {
    let mut delay = INITIAL_DELAY;

    loop {
        match state.store().watch_child_added(paths::GAME_SESSIONS).await {
            Ok(mut watch) => {
                info!("watching for game sessions");
                delay = INITIAL_DELAY;
                while let Some(event) = watch.next().await {
                    if let WatchEvent::ChildAdded { key, value } = event {
                        if let Err(err) = attach(&state, key, &value).await {
                            warn!(error = %err, "failed to attach session");
                        }
                    }
                }
                warn!("session watch closed; re-attaching");
            }
            Err(err) => warn!(error = %err, "failed to watch game sessions"),
        }

        sleep(delay).await;
        delay = (delay * 2).min(MAX_DELAY);
    }
}

/// Resolve the game of a newly seen session and spawn its actor, once per session.
async fn attach(state: &SharedState, session_id: String, record: &Value) -> ServiceResult<()> {
    let kind = resolve_game(state, &session_id, record).await?;
    let Some(generation) = state.register_session(&session_id, kind) else {
        // Either already driven, or a recreated record that the ending actor will pick up.
        return Ok(());
    };

    announce(state, &session_id, kind);
    tokio::spawn(drive(state.clone(), session_id, kind, generation));
    Ok(())
}

async fn resolve_game(
    state: &SharedState,
    session_id: &str,
    record: &Value,
) -> ServiceResult<GameKind> {
    if let Some(kind) = record.get(fields::GAME_ID).and_then(GameKind::from_game_id) {
        return Ok(kind);
    }
    // The lobby may write the record field by field.
    let game_id = state
        .store()
        .read_once(&paths::session_field(session_id, fields::GAME_ID))
        .await?;
    GameKind::from_game_id(&game_id).ok_or_else(|| ServiceError::UnknownGame(session_id.to_string()))
}

fn announce(state: &SharedState, session_id: &str, kind: GameKind) {
    info!(session = %session_id, game_id = kind.game_id(), "session attached");
    sse_events::broadcast_session_attached(state, session_id, kind);
}

/// Run actors for `session_id` back to back while its record keeps being recreated.
async fn drive(state: SharedState, session_id: String, mut kind: GameKind, mut generation: u64) {
    loop {
        let Some(record) = session::run(state.clone(), session_id.clone(), kind, generation).await
        else {
            return;
        };

        info!(session = %session_id, "session record recreated while releasing");
        kind = match resolve_game(&state, &session_id, &record).await {
            Ok(kind) => kind,
            Err(err) => {
                warn!(session = %session_id, error = %err, "failed to attach session");
                return;
            }
        };
        generation = match state.register_session(&session_id, kind) {
            Some(generation) => generation,
            None => return,
        };
        announce(&state, &session_id, kind);
    }
}
