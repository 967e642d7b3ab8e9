/// Game kinds, statuses and the transition graph.
pub mod phase;
mod sse;
/// Keyed one-shot timers.
pub mod timers;

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::watch;

use crate::{
    config::OrchestratorConfig,
    dao::{models::timestamp_ms, store::ReactiveStore},
    state::{
        phase::{GameKind, SessionStatus},
        timers::TimerRegistry,
    },
};

pub use self::sse::SseHub;

/// Handle to the application state shared across tasks.
pub type SharedState = Arc<AppState>;

const SSE_CAPACITY: usize = 64;

/// Bookkeeping kept for every session that has a live actor.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    /// Game the session runs.
    pub kind: GameKind,
    /// Last status routed by the actor, `None` until the first one arrives.
    pub status: Option<SessionStatus>,
    /// Wall clock time (ms) at which the current status was entered.
    pub phase_entered_at: Option<i64>,
    /// Wall clock time (ms) at which the dispatcher picked the session up.
    pub attached_at: i64,
    /// Actor owning the entry; a session recreated under the same id gets a new one.
    pub generation: u64,
}

impl SessionEntry {
    /// Entry for a session that was just discovered.
    pub fn attached(kind: GameKind, generation: u64) -> Self {
        Self {
            kind,
            status: None,
            phase_entered_at: None,
            attached_at: timestamp_ms(),
            generation,
        }
    }
}

/// Central application state shared by the dispatcher, the session actors and the HTTP layer.
pub struct AppState {
    store: Arc<dyn ReactiveStore>,
    config: OrchestratorConfig,
    timers: Arc<TimerRegistry>,
    sessions: DashMap<String, SessionEntry>,
    generations: AtomicU64,
    events: SseHub,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts healthy; the storage supervisor flips the degraded flag when
    /// the store stops answering.
    pub fn new(store: Arc<dyn ReactiveStore>, config: OrchestratorConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(false);
        Arc::new(Self {
            store,
            config,
            timers: TimerRegistry::new(),
            sessions: DashMap::new(),
            generations: AtomicU64::new(0),
            events: SseHub::new(SSE_CAPACITY),
            degraded: degraded_tx,
        })
    }

    /// Reactive store shared with the game clients.
    pub fn store(&self) -> &Arc<dyn ReactiveStore> {
        &self.store
    }

    /// Timing and retry settings.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Registry holding every pending session timer.
    pub fn timers(&self) -> &Arc<TimerRegistry> {
        &self.timers
    }

    /// Sessions with a live actor, keyed by session id.
    pub fn sessions(&self) -> &DashMap<String, SessionEntry> {
        &self.sessions
    }

    /// Broadcast hub used for the orchestration SSE stream.
    pub fn events(&self) -> &SseHub {
        &self.events
    }

    /// Register an actor for `session`; `None` when one is already attached.
    pub fn register_session(&self, session: &str, kind: GameKind) -> Option<u64> {
        match self.sessions.entry(session.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
                vacant.insert(SessionEntry::attached(kind, generation));
                Some(generation)
            }
        }
    }

    /// Drop the entry of `session` if it still belongs to `generation`.
    pub fn release_session(&self, session: &str, generation: u64) -> bool {
        self.sessions
            .remove_if(session, |_, entry| entry.generation == generation)
            .is_some()
    }

    /// Record that `session` entered `status`.
    pub fn record_status(&self, session: &str, status: SessionStatus) {
        if let Some(mut entry) = self.sessions.get_mut(session) {
            entry.status = Some(status);
            entry.phase_entered_at = Some(timestamp_ms());
        }
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Update and broadcast the degraded flag; returns whether the value changed.
    pub fn update_degraded(&self, value: bool) -> bool {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::store::memory::MemoryStore;

    #[test]
    fn stale_actor_cannot_release_a_newer_registration() {
        let state = AppState::new(Arc::new(MemoryStore::new()), OrchestratorConfig::default());

        let first = state
            .register_session("s1", GameKind::NeverHaveIEver)
            .expect("vacant");
        assert_eq!(state.register_session("s1", GameKind::RopeDude), None);
        assert!(state.release_session("s1", first));

        let second = state
            .register_session("s1", GameKind::RopeDude)
            .expect("vacant again");
        assert_ne!(first, second);
        assert!(!state.release_session("s1", first));
        let kind = state.sessions().get("s1").map(|entry| entry.kind);
        assert_eq!(kind, Some(GameKind::RopeDude));
    }
}
