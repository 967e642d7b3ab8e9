//! RopeDude controller: fixed turn rotation, letter submissions, missed-turn elimination and
//! word completion.

use std::collections::HashSet;

use indexmap::IndexSet;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::{
    dao::{
        models::{self, PlayerId, timestamp_ms},
        paths::{self, fields},
        store::{WatchEvent, WatchKind},
    },
    dto::sse::DeletionReason,
    error::ServiceResult,
    services::session::{PhaseEvent, PhaseScope, SessionContext},
    state::{phase::SessionStatus, timers::TimerPurpose},
};

/// Whether every character of `target` appears among the submitted `letters`.
///
/// Letters are compared case-insensitively and whitespace in the target is ignored. A blank
/// target is never complete.
pub fn is_word_complete(target: &str, letters: &IndexSet<String>) -> bool {
    let mut characters = target.chars().filter(|c| !c.is_whitespace()).peekable();
    if characters.peek().is_none() {
        return false;
    }
    characters.all(|c| letters.contains(&c.to_uppercase().to_string()))
}

/// Playing phase of a RopeDude session.
pub(crate) struct Playing {
    scope: PhaseScope,
    rotation: Vec<PlayerId>,
    turn_counter: usize,
    missed_turns: usize,
    current_turn: Option<PlayerId>,
    turn_timer: Option<u64>,
    seen_letters: HashSet<String>,
    seen_guesses: HashSet<String>,
    closed: bool,
}

impl Playing {
    pub(crate) async fn enter(ctx: &SessionContext, mut scope: PhaseScope) -> ServiceResult<Self> {
        let players = ctx.read_players().await?;
        let rotation = models::rotation_order(&players);

        // Letters and guesses already on record belong to an earlier run of this phase.
        let seen_letters = child_keys(&ctx.read_field(fields::LETTER_BANK).await?);
        let seen_guesses = child_keys(&ctx.read_field(fields::FINAL_GUESS).await?);

        let points = ctx.watch(fields::POINTS, WatchKind::Value).await?;
        scope.forward(points, |event| match event {
            WatchEvent::Value(value) => Some(PhaseEvent::Points(value)),
            WatchEvent::ChildAdded { .. } => None,
        });

        let mut playing = Self {
            scope,
            rotation,
            turn_counter: 0,
            missed_turns: 0,
            current_turn: None,
            turn_timer: None,
            seen_letters,
            seen_guesses,
            closed: false,
        };
        let first = playing.player_at(0).clone();
        playing.write_turn(ctx, &first).await?;

        // Attached after the first turn is written so the initial notification is that turn.
        let turn = ctx.watch(fields::TURN, WatchKind::Value).await?;
        playing.scope.forward(turn, |event| match event {
            WatchEvent::Value(value) => Some(PhaseEvent::Turn(value)),
            WatchEvent::ChildAdded { .. } => None,
        });
        let letters = ctx.watch(fields::LETTER_BANK, WatchKind::ChildAdded).await?;
        playing.scope.forward(letters, |event| match event {
            WatchEvent::ChildAdded { key, value } => Some(PhaseEvent::LetterAdded { key, value }),
            WatchEvent::Value(_) => None,
        });
        let guesses = ctx.watch(fields::FINAL_GUESS, WatchKind::ChildAdded).await?;
        playing.scope.forward(guesses, |event| match event {
            WatchEvent::ChildAdded { key, .. } => Some(PhaseEvent::FinalGuessAdded { key }),
            WatchEvent::Value(_) => None,
        });

        info!(session = %ctx.id(), rotation = ?playing.rotation, "rotation fixed");
        Ok(playing)
    }

    pub(crate) async fn handle(
        &mut self,
        ctx: &SessionContext,
        event: PhaseEvent,
    ) -> ServiceResult<()> {
        if self.closed {
            debug!(session = %ctx.id(), ?event, "game over; ignoring event");
            return Ok(());
        }

        match event {
            PhaseEvent::Points(value) => {
                if value.as_f64() == Some(0.0) {
                    info!(session = %ctx.id(), "points exhausted");
                    self.finish(ctx).await?;
                }
                Ok(())
            }
            PhaseEvent::Turn(Value::String(player)) => {
                debug!(session = %ctx.id(), %player, "turn changed");
                self.current_turn = Some(player);
                self.arm_turn_timer(ctx);
                Ok(())
            }
            PhaseEvent::Turn(other) => {
                debug!(session = %ctx.id(), turn = %other, "turn cleared");
                self.current_turn = None;
                Ok(())
            }
            PhaseEvent::TimerFired {
                purpose: TimerPurpose::TurnEnd,
                token,
            } if self.turn_timer == Some(token) => {
                self.turn_timer = None;
                self.on_turn_timeout(ctx).await
            }
            PhaseEvent::LetterAdded { key, value } => self.on_letter(ctx, key, &value).await,
            PhaseEvent::FinalGuessAdded { key } => {
                if self.seen_guesses.insert(key) {
                    // Resolving the guess is left to the clients; only the clock stops here.
                    self.cancel_turn_timer();
                    info!(session = %ctx.id(), "final guess submitted; turn clock stopped");
                }
                Ok(())
            }
            other => {
                debug!(session = %ctx.id(), event = ?other, "ignored while playing");
                Ok(())
            }
        }
    }

    /// Record a letter bank key; `false` when it was already handled.
    fn register_letter(&mut self, key: &str) -> bool {
        self.seen_letters.insert(key.to_string())
    }

    async fn on_letter(&mut self, ctx: &SessionContext, key: String, value: &Value) -> ServiceResult<()> {
        if !self.register_letter(&key) {
            return Ok(());
        }
        let letter = models::letter_of(&key, value);
        info!(session = %ctx.id(), letter = ?letter, "letter submitted");

        self.cancel_turn_timer();
        self.missed_turns = 0;
        self.advance(ctx).await?;

        if self.word_complete(ctx).await? {
            info!(session = %ctx.id(), "target word complete");
            self.finish(ctx).await?;
        }
        Ok(())
    }

    async fn on_turn_timeout(&mut self, ctx: &SessionContext) -> ServiceResult<()> {
        self.missed_turns += 1;
        info!(
            session = %ctx.id(),
            missed_turns = self.missed_turns,
            players = self.rotation.len(),
            "turn timed out"
        );

        if self.missed_turns <= self.rotation.len() {
            self.advance(ctx).await
        } else {
            self.closed = true;
            ctx.delete_session(DeletionReason::Abandoned).await
        }
    }

    /// Hand the turn to the next player of the rotation.
    async fn advance(&mut self, ctx: &SessionContext) -> ServiceResult<()> {
        self.turn_counter += 1;
        let next = self.player_at(self.turn_counter).clone();
        let unchanged = self.current_turn.as_ref() == Some(&next);
        self.write_turn(ctx, &next).await?;
        if unchanged {
            // Same player again: the turn watch has nothing to report.
            self.arm_turn_timer(ctx);
        }
        Ok(())
    }

    async fn write_turn(&self, ctx: &SessionContext, player: &PlayerId) -> ServiceResult<()> {
        let mut patch = Map::new();
        patch.insert(fields::TURN.to_string(), json!(player));
        patch.insert(fields::TURN_TIME_STARTED.to_string(), json!(timestamp_ms()));
        ctx.update("advance turn", &paths::session(ctx.id()), patch)
            .await
    }

    async fn word_complete(&self, ctx: &SessionContext) -> ServiceResult<bool> {
        let letters = models::letter_bank(&ctx.read_field(fields::LETTER_BANK).await?);
        let target: Option<String> = models::decode(
            &ctx.field_path(fields::TARGET_WORD),
            ctx.read_field(fields::TARGET_WORD).await?,
        )?;
        Ok(target.is_some_and(|target| is_word_complete(&target, &letters)))
    }

    async fn finish(&mut self, ctx: &SessionContext) -> ServiceResult<()> {
        self.closed = true;
        self.cancel_turn_timer();
        ctx.set_status(SessionStatus::Finished).await
    }

    fn arm_turn_timer(&mut self, ctx: &SessionContext) {
        self.turn_timer = Some(
            self.scope
                .arm(TimerPurpose::TurnEnd, ctx.config().turn_timeout()),
        );
        ctx.arm_stall(self.scope.epoch(), SessionStatus::Playing);
    }

    fn cancel_turn_timer(&mut self) {
        self.turn_timer = None;
        self.scope.cancel(TimerPurpose::TurnEnd);
    }

    fn player_at(&self, counter: usize) -> &PlayerId {
        &self.rotation[counter % self.rotation.len()]
    }
}

fn child_keys(value: &Value) -> HashSet<String> {
    value
        .as_object()
        .map(|children| children.keys().cloned().collect())
        .unwrap_or_default()
}
