use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::{task::AbortHandle, time::sleep};

/// What a session timer is for; a session holds at most one timer per purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerPurpose {
    /// NHIE responding window.
    RoundEnd,
    /// NHIE confession window.
    ConfessionEnd,
    /// RopeDude turn window.
    TurnEnd,
    /// Delay between `finished` and deletion.
    FinishedGrace,
    /// Alarm raised when a phase overstays its expected duration.
    Stall,
}

/// Registry key: one slot per (session, purpose).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerKey {
    /// Session the timer belongs to.
    pub session: String,
    /// Purpose of the timer within the session.
    pub purpose: TimerPurpose,
}

impl TimerKey {
    /// Key for `purpose` within `session`.
    pub fn new(session: impl Into<String>, purpose: TimerPurpose) -> Self {
        Self {
            session: session.into(),
            purpose,
        }
    }
}

struct ArmedTimer {
    ticket: u64,
    handle: AbortHandle,
}

/// Single-shot delayed actions keyed by [`TimerKey`].
///
/// Arming a key cancels whatever was pending under it. A timer that fires removes its
/// own entry before running the action, so `cancel` after that point is a no-op and the
/// action is never interrupted halfway.
#[derive(Default)]
pub struct TimerRegistry {
    timers: DashMap<TimerKey, ArmedTimer>,
    next_ticket: AtomicU64,
}

impl TimerRegistry {
    /// Empty registry shared between every session.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Run `action` once after `delay` unless the key is canceled or re-armed first.
    pub fn arm<F>(self: &Arc<Self>, key: TimerKey, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(self);
        let fired_key = key.clone();

        // The entry stays locked until the new timer is recorded, so the task can never
        // look itself up before it is registered.
        let slot = self.timers.entry(key);
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            let still_armed = registry
                .timers
                .remove_if(&fired_key, |_, armed| armed.ticket == ticket)
                .is_some();
            if still_armed {
                action.await;
            }
        });

        let armed = ArmedTimer {
            ticket,
            handle: handle.abort_handle(),
        };
        match slot {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.insert(armed);
                previous.handle.abort();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(armed);
            }
        }
    }

    /// Cancel the timer under `key`; returns whether one was pending.
    pub fn cancel(&self, key: &TimerKey) -> bool {
        match self.timers.remove(key) {
            Some((_, armed)) => {
                armed.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Whether a timer is pending under `key`.
    pub fn is_armed(&self, key: &TimerKey) -> bool {
        self.timers.contains_key(key)
    }

    /// Cancel every timer of `session`.
    pub fn cancel_session(&self, session: &str) {
        self.timers.retain(|key, armed| {
            if key.session == session {
                armed.handle.abort();
                false
            } else {
                true
            }
        });
    }

    /// Number of pending timers across all sessions.
    pub fn pending(&self) -> usize {
        self.timers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn key(purpose: TimerPurpose) -> TimerKey {
        TimerKey::new("s1", purpose)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_and_clears_key() {
        let registry = TimerRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        registry.arm(key(TimerPurpose::RoundEnd), Duration::from_secs(30), async move {
            let _ = tx.send("fired");
        });
        assert!(registry.is_armed(&key(TimerPurpose::RoundEnd)));

        sleep(Duration::from_secs(31)).await;
        assert_eq!(rx.recv().await, Some("fired"));
        assert!(!registry.is_armed(&key(TimerPurpose::RoundEnd)));
        assert_eq!(registry.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_pending_timer() {
        let registry = TimerRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first = tx.clone();
        registry.arm(key(TimerPurpose::TurnEnd), Duration::from_secs(30), async move {
            let _ = first.send(1);
        });
        sleep(Duration::from_secs(20)).await;
        registry.arm(key(TimerPurpose::TurnEnd), Duration::from_secs(30), async move {
            let _ = tx.send(2);
        });

        sleep(Duration::from_secs(15)).await;
        assert!(rx.try_recv().is_err());
        sleep(Duration::from_secs(20)).await;
        assert_eq!(rx.recv().await, Some(2));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_suppresses_action() {
        let registry = TimerRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();

        registry.arm(key(TimerPurpose::ConfessionEnd), Duration::from_secs(30), async move {
            let _ = tx.send(());
        });
        assert!(registry.cancel(&key(TimerPurpose::ConfessionEnd)));
        assert!(!registry.cancel(&key(TimerPurpose::ConfessionEnd)));

        sleep(Duration::from_secs(60)).await;
        // The sender was dropped with the aborted task.
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_session_leaves_other_sessions() {
        let registry = TimerRegistry::new();
        registry.arm(key(TimerPurpose::Stall), Duration::from_secs(60), async {});
        registry.arm(
            TimerKey::new("s2", TimerPurpose::Stall),
            Duration::from_secs(60),
            async {},
        );

        registry.cancel_session("s1");
        assert!(!registry.is_armed(&key(TimerPurpose::Stall)));
        assert!(registry.is_armed(&TimerKey::new("s2", TimerPurpose::Stall)));
    }
}
