//! Per-session actor.
//!
//! Every session gets one task that owns its status watch and a mailbox. Watch forwarders
//! and timers only post [`SessionEvent`]s; all decisions are taken sequentially by the actor,
//! so a session never runs two handlers at once and one session's fault stays contained.

use std::{
    collections::HashSet,
    ops::ControlFlow,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tokio::{
    sync::mpsc,
    task::{AbortHandle, JoinSet},
    time::sleep,
};
use tracing::{debug, info, warn};

use crate::{
    config::OrchestratorConfig,
    dao::{
        models::{self, PlayerEntity, PlayerId},
        paths::{self, fields},
        store::{ReactiveStore, Watch, WatchEvent, WatchKind},
    },
    dto::sse::DeletionReason,
    error::ServiceResult,
    services::{nhie, retry::RetryPolicy, rope_dude, sse_events, teardown},
    state::{
        SharedState,
        phase::{GameKind, SessionStatus, check_transition},
        timers::{TimerKey, TimerPurpose, TimerRegistry},
    },
};

const STATUS_RETRY_INITIAL: Duration = Duration::from_millis(1_000);
const STATUS_RETRY_MAX: Duration = Duration::from_secs(10);

/// Message delivered to a session actor.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    /// The `status` field changed (`null` once the session is deleted).
    Status(Value),
    /// Event produced by a watcher or timer of the phase entered at `epoch`.
    Phase { epoch: u64, event: PhaseEvent },
}

/// Events consumed by the game controllers.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PhaseEvent {
    /// NHIE: a round appeared under `rounds`.
    RoundAdded { key: String },
    /// NHIE: the responses of `round` changed.
    Responses { round: String, value: Value },
    /// NHIE: the players mapping changed.
    Players(Value),
    /// RopeDude: the shared `points` counter changed.
    Points(Value),
    /// RopeDude: the `turn` field changed.
    Turn(Value),
    /// RopeDude: a letter was added to the letter bank.
    LetterAdded { key: String, value: Value },
    /// RopeDude: a final guess was submitted.
    FinalGuessAdded { key: String },
    /// A timer armed through a [`PhaseScope`] (or the stall alarm) expired.
    TimerFired { purpose: TimerPurpose, token: u64 },
}

/// Everything a phase acquired: watch forwarders and timers. Dropping the scope detaches the
/// watches and cancels the timers, so leaving a phase cannot leak either.
pub(crate) struct PhaseScope {
    session: String,
    epoch: u64,
    mailbox: mpsc::UnboundedSender<SessionEvent>,
    timers: Arc<TimerRegistry>,
    armed: HashSet<TimerPurpose>,
    forwarders: JoinSet<()>,
    next_token: u64,
}

impl PhaseScope {
    /// Epoch of the phase owning this scope.
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Forward notifications of `watch` to the actor, translated by `map`. Aborting the
    /// returned handle detaches the watch early.
    pub(crate) fn forward<F>(&mut self, mut watch: Watch, map: F) -> AbortHandle
    where
        F: Fn(WatchEvent) -> Option<PhaseEvent> + Send + 'static,
    {
        let mailbox = self.mailbox.clone();
        let epoch = self.epoch;
        self.forwarders.spawn(async move {
            while let Some(event) = watch.next().await {
                let Some(event) = map(event) else {
                    continue;
                };
                if mailbox.send(SessionEvent::Phase { epoch, event }).is_err() {
                    break;
                }
            }
        })
    }

    /// Arm (or re-arm) the phase timer for `purpose`; returns the token its expiry carries.
    pub(crate) fn arm(&mut self, purpose: TimerPurpose, delay: Duration) -> u64 {
        self.next_token += 1;
        let token = self.next_token;
        let mailbox = self.mailbox.clone();
        let epoch = self.epoch;
        self.armed.insert(purpose);
        self.timers.arm(
            TimerKey::new(self.session.clone(), purpose),
            delay,
            async move {
                let _ = mailbox.send(SessionEvent::Phase {
                    epoch,
                    event: PhaseEvent::TimerFired { purpose, token },
                });
            },
        );
        token
    }

    /// Cancel the phase timer for `purpose`, if pending.
    pub(crate) fn cancel(&mut self, purpose: TimerPurpose) {
        if self.armed.remove(&purpose) {
            self.timers
                .cancel(&TimerKey::new(self.session.clone(), purpose));
        }
    }
}

impl Drop for PhaseScope {
    fn drop(&mut self) {
        for purpose in self.armed.drain() {
            self.timers
                .cancel(&TimerKey::new(self.session.clone(), purpose));
        }
        // Dropping the JoinSet aborts the forwarders, which drops their watches.
    }
}

/// Session-wide handles shared by every phase of one session.
pub(crate) struct SessionContext {
    id: String,
    kind: GameKind,
    state: SharedState,
    mailbox: mpsc::UnboundedSender<SessionEvent>,
    generation: u64,
    retry: RetryPolicy,
    stall_token: AtomicU64,
    torn_down: AtomicBool,
}

impl SessionContext {
    fn new(
        state: SharedState,
        id: String,
        kind: GameKind,
        generation: u64,
        mailbox: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let retry = RetryPolicy::new(state.config().write_retry_attempts);
        Self {
            id,
            kind,
            state,
            mailbox,
            generation,
            retry,
            stall_token: AtomicU64::new(0),
            torn_down: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn kind(&self) -> GameKind {
        self.kind
    }

    pub(crate) fn state(&self) -> &SharedState {
        &self.state
    }

    pub(crate) fn config(&self) -> &OrchestratorConfig {
        self.state.config()
    }

    fn store(&self) -> &Arc<dyn ReactiveStore> {
        self.state.store()
    }

    fn scope(&self, epoch: u64) -> PhaseScope {
        PhaseScope {
            session: self.id.clone(),
            epoch,
            mailbox: self.mailbox.clone(),
            timers: self.state.timers().clone(),
            armed: HashSet::new(),
            forwarders: JoinSet::new(),
            next_token: 0,
        }
    }

    /// Location of a field of this session.
    pub(crate) fn field_path(&self, field: &str) -> String {
        paths::session_field(&self.id, field)
    }

    /// Subscribe to a field of this session.
    pub(crate) async fn watch(&self, field: &str, kind: WatchKind) -> ServiceResult<Watch> {
        Ok(self.store().watch(&self.field_path(field), kind).await?)
    }

    /// Read a field of this session once.
    pub(crate) async fn read_field(&self, field: &str) -> ServiceResult<Value> {
        let path = self.field_path(field);
        let store = self.store();
        Ok(self.retry.run("read", || store.read_once(&path)).await?)
    }

    /// Read the players mapping once.
    pub(crate) async fn read_players(&self) -> ServiceResult<IndexMap<PlayerId, PlayerEntity>> {
        let path = self.field_path(fields::PLAYERS);
        let value = self.read_field(fields::PLAYERS).await?;
        Ok(models::decode_players(&path, value)?)
    }

    /// Write the session status.
    pub(crate) async fn set_status(&self, status: SessionStatus) -> ServiceResult<()> {
        let path = self.field_path(fields::STATUS);
        let store = self.store();
        self.retry
            .run("set status", || {
                store.set(&path, Value::String(status.as_str().to_string()))
            })
            .await?;
        info!(session = %self.id, status = status.as_str(), "status written");
        Ok(())
    }

    /// Merge `patch` into the object at `path`.
    pub(crate) async fn update(
        &self,
        what: &str,
        path: &str,
        patch: Map<String, Value>,
    ) -> ServiceResult<()> {
        let store = self.store();
        self.retry
            .run(what, || store.update(path, patch.clone()))
            .await?;
        Ok(())
    }

    /// Append `value` under a field and return the generated key.
    pub(crate) async fn push(&self, what: &str, field: &str, value: Value) -> ServiceResult<String> {
        let path = self.field_path(field);
        let store = self.store();
        Ok(self.retry.run(what, || store.push(&path, value.clone())).await?)
    }

    /// (Re-)arm the stall alarm for a session sitting in `status` during `epoch`.
    pub(crate) fn arm_stall(&self, epoch: u64, status: SessionStatus) {
        let token = self.stall_token.fetch_add(1, Ordering::SeqCst) + 1;
        let mailbox = self.mailbox.clone();
        self.state.timers().arm(
            TimerKey::new(self.id.clone(), TimerPurpose::Stall),
            self.config().stall_after(status),
            async move {
                let _ = mailbox.send(SessionEvent::Phase {
                    epoch,
                    event: PhaseEvent::TimerFired {
                        purpose: TimerPurpose::Stall,
                        token,
                    },
                });
            },
        );
    }

    fn is_current_stall(&self, token: u64) -> bool {
        self.stall_token.load(Ordering::SeqCst) == token
    }

    /// Delete the session record and its chat log in one write.
    pub(crate) async fn delete_session(&self, reason: DeletionReason) -> ServiceResult<()> {
        let mut patch = Map::new();
        patch.insert(paths::session(&self.id), Value::Null);
        patch.insert(paths::chat_log(&self.id), Value::Null);
        self.update("delete session", "", patch).await?;

        self.torn_down.store(true, Ordering::SeqCst);
        info!(session = %self.id, ?reason, "session and chat log deleted");
        sse_events::broadcast_session_deleted(&self.state, &self.id, reason);
        Ok(())
    }
}

/// Controller state of the status currently routed.
enum Phase {
    Idle,
    Responding(nhie::Responding),
    Confessing(nhie::Confessing),
    Playing(rope_dude::Playing),
    Finished(teardown::Finished),
}

impl Phase {
    async fn enter(
        ctx: &SessionContext,
        status: SessionStatus,
        scope: PhaseScope,
    ) -> ServiceResult<Self> {
        Ok(match status {
            SessionStatus::Responding => {
                Phase::Responding(nhie::Responding::enter(ctx, scope).await?)
            }
            SessionStatus::Confessing => {
                Phase::Confessing(nhie::Confessing::enter(ctx, scope).await?)
            }
            SessionStatus::Playing => Phase::Playing(rope_dude::Playing::enter(ctx, scope).await?),
            SessionStatus::Finished => Phase::Finished(teardown::Finished::enter(ctx, scope)),
        })
    }

    async fn handle(&mut self, ctx: &SessionContext, event: PhaseEvent) -> ServiceResult<()> {
        match self {
            Phase::Idle => {
                debug!(session = %ctx.id(), ?event, "no live phase; dropping event");
                Ok(())
            }
            Phase::Responding(phase) => phase.handle(ctx, event).await,
            Phase::Confessing(phase) => phase.handle(ctx, event).await,
            Phase::Playing(phase) => phase.handle(ctx, event).await,
            Phase::Finished(phase) => phase.handle(ctx, event).await,
        }
    }
}

struct SessionActor {
    ctx: SessionContext,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    status: Option<SessionStatus>,
    epoch: u64,
    phase: Phase,
}

impl SessionActor {
    /// Process the mailbox until the session record is gone.
    async fn run(&mut self) {
        while let Some(event) = self.rx.recv().await {
            match event {
                SessionEvent::Status(value) => {
                    if self.on_status(value).await.is_break() {
                        return;
                    }
                }
                SessionEvent::Phase { epoch, event } if epoch != self.epoch => {
                    debug!(session = %self.ctx.id(), epoch, ?event, "dropping event of a previous phase");
                }
                SessionEvent::Phase {
                    event:
                        PhaseEvent::TimerFired {
                            purpose: TimerPurpose::Stall,
                            token,
                        },
                    ..
                } => self.on_stall(token),
                SessionEvent::Phase { event, .. } => {
                    if let Err(err) = self.phase.handle(&self.ctx, event).await {
                        warn!(
                            session = %self.ctx.id(),
                            status = ?self.status,
                            error = %err,
                            "phase handler failed; session stalled"
                        );
                    }
                }
            }
        }
    }

    /// Route a status notification. Breaks once the session is gone.
    async fn on_status(&mut self, value: Value) -> ControlFlow<()> {
        let raw = match value {
            Value::Null => {
                info!(session = %self.ctx.id(), "session record removed");
                return ControlFlow::Break(());
            }
            Value::String(raw) => raw,
            other => {
                warn!(session = %self.ctx.id(), status = %other, "status is not a string; ignoring");
                return ControlFlow::Continue(());
            }
        };

        let Some(status) = self.ctx.kind().parse_status(&raw) else {
            warn!(session = %self.ctx.id(), game = ?self.ctx.kind(), status = %raw, "unknown status; ignoring");
            return ControlFlow::Continue(());
        };
        if self.status == Some(status) {
            debug!(session = %self.ctx.id(), status = %raw, "status unchanged");
            return ControlFlow::Continue(());
        }
        if let Err(err) = check_transition(self.ctx.kind(), self.status, status) {
            // Written by someone else; the status field stays authoritative.
            warn!(session = %self.ctx.id(), error = %err, "off-graph status change; routing it");
        }

        self.route(status).await;
        ControlFlow::Continue(())
    }

    async fn route(&mut self, status: SessionStatus) {
        // The previous phase is fully released before the next one acquires anything.
        self.phase = Phase::Idle;
        self.epoch += 1;
        self.status = Some(status);

        let ctx = &self.ctx;
        info!(session = %ctx.id(), status = status.as_str(), epoch = self.epoch, "entering phase");
        ctx.state().record_status(ctx.id(), status);
        sse_events::broadcast_phase_changed(ctx.state(), ctx.id(), ctx.kind(), status);
        ctx.arm_stall(self.epoch, status);

        let scope = ctx.scope(self.epoch);
        self.phase = match Phase::enter(ctx, status, scope).await {
            Ok(phase) => phase,
            Err(err) => {
                warn!(
                    session = %ctx.id(),
                    status = status.as_str(),
                    error = %err,
                    "phase entry failed; session stalled"
                );
                Phase::Idle
            }
        };
    }

    fn on_stall(&self, token: u64) {
        if !self.ctx.is_current_stall(token) {
            return;
        }
        let Some(status) = self.status else {
            return;
        };
        let after = self.ctx.config().stall_after(status);
        warn!(
            session = %self.ctx.id(),
            status = status.as_str(),
            stalled_after = ?after,
            "session made no progress"
        );
        sse_events::broadcast_session_stalled(
            self.ctx.state(),
            self.ctx.id(),
            status,
            u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        );
    }

    /// Give up every handle of the session. Returns the record when it was recreated while
    /// this actor was still shutting down.
    async fn release(mut self) -> Option<Value> {
        self.phase = Phase::Idle;
        let ctx = &self.ctx;
        ctx.state().timers().cancel_session(ctx.id());
        ctx.state().release_session(ctx.id(), ctx.generation);
        if !ctx.torn_down.load(Ordering::SeqCst) {
            sse_events::broadcast_session_deleted(ctx.state(), ctx.id(), DeletionReason::Removed);
        }
        info!(session = %ctx.id(), "session released");

        match ctx.store().read_once(&paths::session(ctx.id())).await {
            Ok(Value::Null) => None,
            Ok(record) => Some(record),
            Err(err) => {
                warn!(session = %ctx.id(), error = %err, "failed to check for a recreated session");
                None
            }
        }
    }
}

/// Orchestrate `session_id` until its record disappears.
///
/// Returns the session record when it was written again under the same id before this actor
/// finished releasing, so the caller can attach it anew.
pub async fn run(
    state: SharedState,
    session_id: String,
    kind: GameKind,
    generation: u64,
) -> Option<Value> {
    let (mailbox, rx) = mpsc::unbounded_channel();
    let ctx = SessionContext::new(state, session_id, kind, generation, mailbox);
    let forwarder = tokio::spawn(forward_status(
        ctx.store().clone(),
        ctx.field_path(fields::STATUS),
        ctx.mailbox.clone(),
    ));

    let mut actor = SessionActor {
        ctx,
        rx,
        status: None,
        epoch: 0,
        phase: Phase::Idle,
    };
    actor.run().await;
    forwarder.abort();
    actor.release().await
}

/// Feed status changes to the actor, re-subscribing with backoff whenever the watch drops.
async fn forward_status(
    store: Arc<dyn ReactiveStore>,
    path: String,
    mailbox: mpsc::UnboundedSender<SessionEvent>,
) {
    let mut delay = STATUS_RETRY_INITIAL;
    loop {
        match store.watch_value(&path).await {
            Ok(mut watch) => {
                delay = STATUS_RETRY_INITIAL;
                while let Some(event) = watch.next().await {
                    if let WatchEvent::Value(value) = event {
                        if mailbox.send(SessionEvent::Status(value)).is_err() {
                            return;
                        }
                    }
                }
                warn!(%path, "status watch closed; re-subscribing");
            }
            Err(err) => warn!(%path, error = %err, "failed to watch session status"),
        }
        if mailbox.is_closed() {
            return;
        }
        sleep(delay).await;
        delay = (delay * 2).min(STATUS_RETRY_MAX);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::Value;
    use tokio::{sync::mpsc, time::sleep};

    use super::{PhaseScope, SessionContext, SessionEvent};
    use crate::{
        config::OrchestratorConfig,
        dao::{
            paths,
            store::{ReactiveStore, Watch, WatchEvent, memory::MemoryStore},
        },
        services::dispatcher,
        state::{AppState, SharedState, phase::GameKind},
    };

    /// Orchestrator running against a memory store with default timings.
    pub(crate) struct Harness {
        pub(crate) state: SharedState,
        pub(crate) store: MemoryStore,
    }

    impl Harness {
        pub(crate) async fn start(root: Value) -> Self {
            let store = MemoryStore::with_root(root);
            let state = AppState::new(Arc::new(store.clone()), OrchestratorConfig::default());
            tokio::spawn(dispatcher::run(state.clone()));
            settle().await;
            Self { state, store }
        }

        /// Memory store and state without a dispatcher, for driving controllers by hand.
        pub(crate) fn detached(root: Value) -> Self {
            let store = MemoryStore::with_root(root);
            let state = AppState::new(Arc::new(store.clone()), OrchestratorConfig::default());
            Self { state, store }
        }

        /// Context and scope of a phase entered at epoch 1, with the mailbox its watches and
        /// timers post to.
        pub(crate) fn phase_context(
            &self,
            session: &str,
            kind: GameKind,
        ) -> (SessionContext, PhaseScope, mpsc::UnboundedReceiver<SessionEvent>) {
            let (mailbox, rx) = mpsc::unbounded_channel();
            let ctx = SessionContext::new(self.state.clone(), session.to_string(), kind, 1, mailbox);
            let scope = ctx.scope(1);
            (ctx, scope, rx)
        }

        pub(crate) async fn field(&self, session: &str, field: &str) -> Value {
            self.store
                .read_once(&paths::session_field(session, field))
                .await
                .unwrap()
        }

        pub(crate) async fn set_field(&self, session: &str, field: &str, value: Value) {
            self.store
                .set(&paths::session_field(session, field), value)
                .await
                .unwrap();
        }

        pub(crate) async fn push_field(&self, session: &str, field: &str, value: Value) -> String {
            self.store
                .push(&paths::session_field(session, field), value)
                .await
                .unwrap()
        }

        pub(crate) async fn session_exists(&self, session: &str) -> bool {
            !self
                .store
                .read_once(&paths::session(session))
                .await
                .unwrap()
                .is_null()
        }

        pub(crate) async fn chat_exists(&self, session: &str) -> bool {
            !self
                .store
                .read_once(&paths::chat_log(session))
                .await
                .unwrap()
                .is_null()
        }

        /// Watch of the session status, used to record every value it went through.
        pub(crate) async fn status_log(&self, session: &str) -> Watch {
            self.store
                .watch_value(&paths::session_field(session, "status"))
                .await
                .unwrap()
        }
    }

    /// Statuses queued on `log` since the last call.
    pub(crate) fn drain_statuses(log: &mut Watch) -> Vec<Value> {
        let mut statuses = Vec::new();
        while let Some(event) = log.try_next() {
            if let WatchEvent::Value(value) = event {
                statuses.push(value);
            }
        }
        statuses
    }

    /// Let every ready task run; paused time only moves past pending timers afterwards.
    pub(crate) async fn settle() {
        sleep(Duration::from_millis(1)).await;
    }

    /// Advance paused time by `ms`, processing everything due on the way.
    pub(crate) async fn advance(ms: u64) {
        sleep(Duration::from_millis(ms)).await;
    }
}
