//! "Never Have I Ever" controller: responding -> confessing -> (responding | finished).

use serde_json::{Map, Value, json};
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::{
    dao::{
        models::{self, timestamp_ms},
        paths::{self, fields},
        store::{WatchEvent, WatchKind},
    },
    dto::sse::DeletionReason,
    error::ServiceResult,
    services::session::{PhaseEvent, PhaseScope, SessionContext},
    state::{phase::SessionStatus, timers::TimerPurpose},
};

/// Responding phase: one round collecting responses until everyone answered or time runs out.
pub(crate) struct Responding {
    scope: PhaseScope,
    round_key: String,
    total_players: usize,
    round_timer: Option<u64>,
    rounds_watch: Option<AbortHandle>,
    responses_watch: Option<AbortHandle>,
    any_response: bool,
    resolved: bool,
}

impl Responding {
    pub(crate) async fn enter(ctx: &SessionContext, mut scope: PhaseScope) -> ServiceResult<Self> {
        let mut round = Map::new();
        round.insert(fields::TIME_STARTED.to_string(), json!(timestamp_ms()));
        let round_key = ctx
            .push("append round", fields::ROUNDS, Value::Object(round))
            .await?;

        // Player count is captured once; the round is sized for whoever was seated now.
        let total_players = ctx.read_players().await?.len();

        let rounds = ctx.watch(fields::ROUNDS, WatchKind::ChildAdded).await?;
        let rounds_watch = scope.forward(rounds, |event| match event {
            WatchEvent::ChildAdded { key, .. } => Some(PhaseEvent::RoundAdded { key }),
            WatchEvent::Value(_) => None,
        });

        info!(session = %ctx.id(), round = %round_key, total_players, "round opened");
        Ok(Self {
            scope,
            round_key,
            total_players,
            round_timer: None,
            rounds_watch: Some(rounds_watch),
            responses_watch: None,
            any_response: false,
            resolved: false,
        })
    }

    pub(crate) async fn handle(
        &mut self,
        ctx: &SessionContext,
        event: PhaseEvent,
    ) -> ServiceResult<()> {
        match event {
            PhaseEvent::RoundAdded { key } => self.on_round_added(ctx, key).await,
            PhaseEvent::Responses { round, value } => self.on_responses(ctx, &round, &value).await,
            PhaseEvent::TimerFired {
                purpose: TimerPurpose::RoundEnd,
                token,
            } => self.on_round_timeout(ctx, token).await,
            other => {
                debug!(session = %ctx.id(), event = ?other, "ignored while responding");
                Ok(())
            }
        }
    }

    /// Start the countdown and the response watch once our own round is visible.
    async fn on_round_added(&mut self, ctx: &SessionContext, key: String) -> ServiceResult<()> {
        if key != self.round_key || self.round_timer.is_some() || self.resolved {
            // Rounds of earlier cycles are replayed on attach.
            return Ok(());
        }

        self.round_timer = Some(
            self.scope
                .arm(TimerPurpose::RoundEnd, ctx.config().round_timeout()),
        );

        let path = paths::round_responses(ctx.id(), &key);
        let watch = ctx.state().store().watch_value(&path).await?;
        let round = key.clone();
        self.responses_watch = Some(self.scope.forward(watch, move |event| match event {
            WatchEvent::Value(value) => Some(PhaseEvent::Responses {
                round: round.clone(),
                value,
            }),
            WatchEvent::ChildAdded { .. } => None,
        }));
        Ok(())
    }

    async fn on_responses(
        &mut self,
        ctx: &SessionContext,
        round: &str,
        value: &Value,
    ) -> ServiceResult<()> {
        if round != self.round_key || self.resolved {
            return Ok(());
        }

        if value.as_object().is_some_and(|responses| !responses.is_empty()) {
            self.any_response = true;
        }
        let answered = models::answered_responses(value);
        debug!(session = %ctx.id(), answered, total = self.total_players, "responses updated");

        if answered >= self.total_players && self.resolve() {
            self.scope.cancel(TimerPurpose::RoundEnd);
            info!(session = %ctx.id(), round = %self.round_key, "every player responded");
            self.close_round(ctx).await?;
        }
        Ok(())
    }

    async fn on_round_timeout(&mut self, ctx: &SessionContext, token: u64) -> ServiceResult<()> {
        if self.round_timer != Some(token) || !self.resolve() {
            return Ok(());
        }

        if self.any_response {
            info!(session = %ctx.id(), round = %self.round_key, "round timed out with responses");
            self.close_round(ctx).await
        } else {
            info!(session = %ctx.id(), round = %self.round_key, "round timed out without responses");
            self.detach();
            ctx.delete_session(DeletionReason::Abandoned).await
        }
    }

    /// Claim the round's single outcome; only the first caller wins.
    fn resolve(&mut self) -> bool {
        !std::mem::replace(&mut self.resolved, true)
    }

    fn detach(&mut self) {
        for handle in [self.rounds_watch.take(), self.responses_watch.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }

    /// Restart the client countdown for confessions and hand over to `confessing`.
    async fn close_round(&mut self, ctx: &SessionContext) -> ServiceResult<()> {
        self.detach();

        let mut patch = Map::new();
        patch.insert(fields::TIME_STARTED.to_string(), json!(timestamp_ms()));
        let path = paths::round(ctx.id(), &self.round_key);
        ctx.update("refresh round start", &path, patch).await?;

        ctx.set_status(SessionStatus::Confessing).await
    }
}

/// Confessing phase: players lose points; the session ends once someone runs out.
pub(crate) struct Confessing {
    scope: PhaseScope,
    timer: u64,
    eliminated: bool,
    resolved: bool,
}

impl Confessing {
    pub(crate) async fn enter(ctx: &SessionContext, mut scope: PhaseScope) -> ServiceResult<Self> {
        let players = ctx.watch(fields::PLAYERS, WatchKind::Value).await?;
        scope.forward(players, |event| match event {
            WatchEvent::Value(value) => Some(PhaseEvent::Players(value)),
            WatchEvent::ChildAdded { .. } => None,
        });
        let timer = scope.arm(
            TimerPurpose::ConfessionEnd,
            ctx.config().confession_timeout(),
        );

        Ok(Self {
            scope,
            timer,
            eliminated: false,
            resolved: false,
        })
    }

    pub(crate) async fn handle(
        &mut self,
        ctx: &SessionContext,
        event: PhaseEvent,
    ) -> ServiceResult<()> {
        match event {
            PhaseEvent::Players(value) => {
                if !self.eliminated && models::any_player_eliminated(&value) {
                    info!(session = %ctx.id(), "a player ran out of points");
                    self.eliminated = true;
                }
                Ok(())
            }
            PhaseEvent::TimerFired {
                purpose: TimerPurpose::ConfessionEnd,
                token,
            } if token == self.timer => {
                if std::mem::replace(&mut self.resolved, true) {
                    return Ok(());
                }
                let next = if self.eliminated {
                    SessionStatus::Finished
                } else {
                    SessionStatus::Responding
                };
                self.scope.cancel(TimerPurpose::ConfessionEnd);
                ctx.set_status(next).await
            }
            other => {
                debug!(session = %ctx.id(), event = ?other, "ignored while confessing");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::{
        dao::{paths, store::ReactiveStore},
        services::session::testing::{Harness, advance, drain_statuses, settle},
        state::{
            phase::GameKind,
            timers::{TimerKey, TimerPurpose},
        },
    };

    fn three_player_session(status: &str) -> Value {
        json!({
            "gameSessions": {
                "s1": {
                    "gameId": "1",
                    "status": status,
                    "players": {
                        "a": { "nickname": "Ann", "points": 3 },
                        "b": { "nickname": "Bob", "points": 3 },
                        "c": { "nickname": "Cid", "points": 3 },
                    },
                },
            },
            "lobbyMessages": { "s1": { "m1": { "text": "hi" } } },
        })
    }

    async fn current_round(harness: &Harness) -> String {
        let rounds = harness.field("s1", "rounds").await;
        rounds
            .as_object()
            .and_then(|rounds| rounds.keys().last().cloned())
            .expect("a round was appended")
    }

    async fn respond(harness: &Harness, round: &str, player: &str, text: &str) {
        harness
            .store
            .set(
                &format!("{}/{player}", paths::round_responses("s1", round)),
                json!({ "nickname": player, "text": text }),
            )
            .await
            .unwrap();
    }

    fn round_count(rounds: &Value) -> usize {
        rounds.as_object().map_or(0, |rounds| rounds.len())
    }

    #[tokio::test(start_paused = true)]
    async fn silent_round_abandons_session() {
        let harness = Harness::start(three_player_session("responding")).await;
        assert_eq!(round_count(&harness.field("s1", "rounds").await), 1);

        advance(29_990).await;
        assert!(harness.session_exists("s1").await);

        advance(20).await;
        assert!(!harness.session_exists("s1").await);
        assert!(!harness.chat_exists("s1").await);
        assert!(harness.state.sessions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn partial_responses_move_to_confessing_on_timeout() {
        let harness = Harness::start(three_player_session("responding")).await;
        let round = current_round(&harness).await;
        let started = harness.field("s1", &format!("rounds/{round}/timeStarted")).await;

        respond(&harness, &round, "a", "been to Paris").await;
        advance(29_000).await;
        assert_eq!(harness.field("s1", "status").await, json!("responding"));

        advance(1_010).await;
        assert_eq!(harness.field("s1", "status").await, json!("confessing"));
        let refreshed = harness.field("s1", &format!("rounds/{round}/timeStarted")).await;
        assert!(refreshed.as_i64() >= started.as_i64());
    }

    #[tokio::test(start_paused = true)]
    async fn short_answers_do_not_count() {
        let harness = Harness::start(three_player_session("responding")).await;
        let round = current_round(&harness).await;

        respond(&harness, &round, "a", "been to Paris").await;
        respond(&harness, &round, "b", "x").await;
        respond(&harness, &round, "c", "eaten snails").await;
        settle().await;

        assert_eq!(harness.field("s1", "status").await, json!("responding"));
    }

    #[tokio::test(start_paused = true)]
    async fn full_responses_confess_immediately_once() {
        let harness = Harness::start(three_player_session("responding")).await;
        let mut log = harness.status_log("s1").await;
        let round = current_round(&harness).await;

        respond(&harness, &round, "a", "been to Paris").await;
        respond(&harness, &round, "b", "lied about my age").await;
        respond(&harness, &round, "c", "eaten snails").await;
        settle().await;
        assert_eq!(harness.field("s1", "status").await, json!("confessing"));

        // The round timer was canceled: nothing happens at the first deadline.
        advance(29_000).await;
        assert_eq!(
            drain_statuses(&mut log),
            vec![json!("responding"), json!("confessing")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_full_responses_close_the_round_once() {
        let harness = Harness::detached(three_player_session("responding"));
        let mut log = harness.status_log("s1").await;
        let (ctx, scope, _mailbox) = harness.phase_context("s1", GameKind::NeverHaveIEver);
        let mut responding = Responding::enter(&ctx, scope).await.unwrap();
        let round = responding.round_key.clone();
        responding
            .handle(&ctx, PhaseEvent::RoundAdded { key: round.clone() })
            .await
            .unwrap();
        assert!(harness.state.timers().is_armed(&TimerKey::new("s1", TimerPurpose::RoundEnd)));

        let full = json!({
            "a": { "nickname": "Ann", "text": "been to Paris" },
            "b": { "nickname": "Bob", "text": "lied about my age" },
            "c": { "nickname": "Cid", "text": "eaten snails" },
        });
        for _ in 0..2 {
            responding
                .handle(
                    &ctx,
                    PhaseEvent::Responses {
                        round: round.clone(),
                        value: full.clone(),
                    },
                )
                .await
                .unwrap();
        }
        // A late expiry of the canceled timer is ignored as well.
        let token = responding.round_timer.expect("round timer armed");
        responding
            .handle(
                &ctx,
                PhaseEvent::TimerFired {
                    purpose: TimerPurpose::RoundEnd,
                    token,
                },
            )
            .await
            .unwrap();

        assert_eq!(
            drain_statuses(&mut log),
            vec![json!("responding"), json!("confessing")]
        );
        assert!(!harness.state.timers().is_armed(&TimerKey::new("s1", TimerPurpose::RoundEnd)));
        assert!(harness.session_exists("s1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn count_and_timeout_racing_transition_once() {
        let harness = Harness::start(three_player_session("responding")).await;
        let mut log = harness.status_log("s1").await;
        let round = current_round(&harness).await;
        respond(&harness, &round, "a", "been to Paris").await;

        // Land the last responses exactly on the round deadline.
        advance(29_999).await;
        respond(&harness, &round, "b", "lied about my age").await;
        respond(&harness, &round, "c", "eaten snails").await;
        settle().await;
        settle().await;

        assert_eq!(
            drain_statuses(&mut log),
            vec![json!("responding"), json!("confessing")]
        );
        assert!(harness.session_exists("s1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn confession_without_elimination_opens_new_round() {
        let harness = Harness::start(three_player_session("responding")).await;
        let round = current_round(&harness).await;
        respond(&harness, &round, "a", "been to Paris").await;
        advance(30_010).await;
        assert_eq!(harness.field("s1", "status").await, json!("confessing"));

        advance(29_980).await;
        assert_eq!(harness.field("s1", "status").await, json!("confessing"));

        advance(30).await;
        assert_eq!(harness.field("s1", "status").await, json!("responding"));
        assert_eq!(round_count(&harness.field("s1", "rounds").await), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn elimination_finishes_after_confession() {
        let harness = Harness::start(three_player_session("confessing")).await;

        harness.set_field("s1", "players/b/points", json!(0)).await;
        settle().await;
        // Points coming back do not clear the elimination.
        harness.set_field("s1", "players/b/points", json!(1)).await;

        advance(30_010).await;
        assert_eq!(harness.field("s1", "status").await, json!("finished"));
        assert_eq!(harness.field("s1", "rounds").await, Value::Null);
    }

    #[tokio::test(start_paused = true)]
    async fn string_points_are_understood() {
        let harness = Harness::start(three_player_session("confessing")).await;

        harness.set_field("s1", "players/c/points", json!("0")).await;
        advance(30_010).await;
        assert_eq!(harness.field("s1", "status").await, json!("finished"));
    }
}
