/// Firebase Realtime Database backend.
#[cfg(feature = "firebase-store")]
pub mod firebase;
pub mod memory;
pub mod tree;

use std::collections::HashSet;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::dao::storage::StorageResult;

/// Abstraction over the reactive data store shared with the game clients.
///
/// Watches deliver notifications for one path in the order writes were committed.
/// Dropping a [`Watch`] detaches it, but events a consumer already pulled and forwarded
/// are not retracted.
pub trait ReactiveStore: Send + Sync {
    /// Subscribe to `path` for the given event class.
    fn watch(&self, path: &str, kind: WatchKind) -> BoxFuture<'static, StorageResult<Watch>>;
    /// Read the value at `path` once (`null` when absent).
    fn read_once(&self, path: &str) -> BoxFuture<'static, StorageResult<Value>>;
    /// Replace the value at `path`.
    fn set(&self, path: &str, value: Value) -> BoxFuture<'static, StorageResult<()>>;
    /// Merge `patch` into the object at `path`; keys may be nested paths.
    fn update(&self, path: &str, patch: Map<String, Value>)
    -> BoxFuture<'static, StorageResult<()>>;
    /// Append `value` under a fresh, chronologically ordered key and return the key.
    fn push(&self, path: &str, value: Value) -> BoxFuture<'static, StorageResult<String>>;
    /// Delete the value at `path`.
    fn remove(&self, path: &str) -> BoxFuture<'static, StorageResult<()>>;
    /// Cheap round-trip used by the storage supervisor.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;

    /// Watch the whole value stored at `path`.
    fn watch_value(&self, path: &str) -> BoxFuture<'static, StorageResult<Watch>> {
        self.watch(path, WatchKind::Value)
    }

    /// Watch children appearing directly under `path`.
    fn watch_child_added(&self, path: &str) -> BoxFuture<'static, StorageResult<Watch>> {
        self.watch(path, WatchKind::ChildAdded)
    }
}

/// Event class a watch subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    /// Emit the current value on attach and after every change of the subtree.
    Value,
    /// Emit every existing child on attach and every new child afterwards.
    ChildAdded,
}

/// Notification delivered by a [`Watch`].
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// The watched location now holds this value (`null` when deleted).
    Value(Value),
    /// A child appeared under the watched location.
    ChildAdded {
        /// Key of the new child.
        key: String,
        /// Value of the child when it appeared.
        value: Value,
    },
}

/// Receiving end of a subscription. Dropping it detaches the watcher.
#[derive(Debug)]
pub struct Watch {
    events: mpsc::UnboundedReceiver<WatchEvent>,
}

impl Watch {
    /// Wrap the receiving half of a feed.
    pub fn new(events: mpsc::UnboundedReceiver<WatchEvent>) -> Self {
        Self { events }
    }

    /// Wait for the next notification; `None` once the backend dropped the feed.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }

    /// Next notification if one is already queued.
    pub fn try_next(&mut self) -> Option<WatchEvent> {
        self.events.try_recv().ok()
    }
}

/// Sending half of a watch: turns successive snapshots of a location into notifications.
#[derive(Debug)]
pub struct WatchFeed {
    state: FeedState,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

#[derive(Debug)]
enum FeedState {
    Value { last: Option<Value> },
    Children { known: HashSet<String> },
}

impl WatchFeed {
    /// Create a feed and the [`Watch`] that receives from it.
    pub fn channel(kind: WatchKind) -> (Self, Watch) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = match kind {
            WatchKind::Value => FeedState::Value { last: None },
            WatchKind::ChildAdded => FeedState::Children {
                known: HashSet::new(),
            },
        };
        (Self { state, tx }, Watch::new(rx))
    }

    /// Compare `current` with what was last reported and emit the difference.
    pub fn observe(&mut self, current: &Value) {
        match &mut self.state {
            FeedState::Value { last } => {
                if last.as_ref() != Some(current) {
                    *last = Some(current.clone());
                    let _ = self.tx.send(WatchEvent::Value(current.clone()));
                }
            }
            FeedState::Children { known } => {
                let Value::Object(children) = current else {
                    known.clear();
                    return;
                };
                for (key, value) in children {
                    if !known.contains(key) {
                        let _ = self.tx.send(WatchEvent::ChildAdded {
                            key: key.clone(),
                            value: value.clone(),
                        });
                    }
                }
                *known = children.keys().cloned().collect();
            }
        }
    }

    /// Whether the watch side was dropped.
    pub fn is_detached(&self) -> bool {
        self.tx.is_closed()
    }

    /// Future resolving once the watch side is dropped, usable while the feed is borrowed.
    pub fn detach_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let tx = self.tx.clone();
        async move { tx.closed().await }
    }
}
