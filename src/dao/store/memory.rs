//! In-process reactive store used for local runs and for exercising the controllers in tests.

use std::sync::Arc;

use futures::future::BoxFuture;
use rand::Rng;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::dao::{
    models::timestamp_ms,
    storage::StorageResult,
    store::{ReactiveStore, Watch, WatchFeed, WatchKind, tree},
};

const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Reactive JSON tree guarded by a single mutex; every write notifies overlapping watchers
/// before the lock is released, so per-path ordering follows commit order.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    root: Value,
    feeds: Vec<(Vec<String>, WatchFeed)>,
    push_ids: PushIds,
}

impl Inner {
    fn notify(&mut self, written: &[String]) {
        self.feeds.retain(|(_, feed)| !feed.is_detached());
        for (path, feed) in &mut self.feeds {
            if tree::overlaps(path, written) {
                feed.observe(tree::get(&self.root, path));
            }
        }
    }
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `root`.
    pub fn with_root(root: Value) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                root: tree::normalize(root),
                ..Inner::default()
            })),
        }
    }

    /// Number of watchers still attached, pruning detached ones first.
    pub async fn attached_watchers(&self) -> usize {
        let mut inner = self.inner.lock().await;
        inner.feeds.retain(|(_, feed)| !feed.is_detached());
        inner.feeds.len()
    }

    /// Copy of the whole tree.
    pub async fn dump(&self) -> Value {
        self.inner.lock().await.root.clone()
    }

    async fn write<F>(&self, path: &str, apply: F)
    where
        F: FnOnce(&mut Value, &[String]),
    {
        let segments = tree::segments(path);
        let mut inner = self.inner.lock().await;
        apply(&mut inner.root, &segments);
        inner.notify(&segments);
    }
}

impl ReactiveStore for MemoryStore {
    fn watch(&self, path: &str, kind: WatchKind) -> BoxFuture<'static, StorageResult<Watch>> {
        let store = self.clone();
        let path = path.to_string();
        Box::pin(async move {
            let segments = tree::segments(&path);
            let (mut feed, watch) = WatchFeed::channel(kind);
            let mut inner = store.inner.lock().await;
            feed.observe(tree::get(&inner.root, &segments));
            inner.feeds.push((segments, feed));
            Ok(watch)
        })
    }

    fn read_once(&self, path: &str) -> BoxFuture<'static, StorageResult<Value>> {
        let store = self.clone();
        let segments = tree::segments(path);
        Box::pin(async move {
            let inner = store.inner.lock().await;
            Ok(tree::get(&inner.root, &segments).clone())
        })
    }

    fn set(&self, path: &str, value: Value) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let path = path.to_string();
        Box::pin(async move {
            store
                .write(&path, |root, segments| tree::set(root, segments, value))
                .await;
            Ok(())
        })
    }

    fn update(
        &self,
        path: &str,
        patch: Map<String, Value>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let path = path.to_string();
        Box::pin(async move {
            // Nested keys reach below `path`, so notify from `path` downwards.
            store
                .write(&path, |root, segments| tree::merge(root, segments, patch))
                .await;
            Ok(())
        })
    }

    fn push(&self, path: &str, value: Value) -> BoxFuture<'static, StorageResult<String>> {
        let store = self.clone();
        let path = path.to_string();
        Box::pin(async move {
            let mut segments = tree::segments(&path);
            let mut inner = store.inner.lock().await;
            let key = inner.push_ids.next(timestamp_ms());
            segments.push(key.clone());
            tree::set(&mut inner.root, &segments, value);
            inner.notify(&segments);
            Ok(key)
        })
    }

    fn remove(&self, path: &str) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let path = path.to_string();
        Box::pin(async move {
            store.write(&path, tree::remove).await;
            Ok(())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Generator of 20 character keys that sort in creation order: 8 characters of timestamp
/// followed by 12 random characters, incremented instead of re-rolled within the same
/// millisecond.
#[derive(Default)]
struct PushIds {
    last_ms: i64,
    last_random: [u8; 12],
}

impl PushIds {
    fn next(&mut self, now_ms: i64) -> String {
        if now_ms == self.last_ms {
            for digit in self.last_random.iter_mut().rev() {
                if *digit == 63 {
                    *digit = 0;
                } else {
                    *digit += 1;
                    break;
                }
            }
        } else {
            self.last_ms = now_ms;
            let mut rng = rand::rng();
            for digit in &mut self.last_random {
                *digit = rng.random_range(0..64);
            }
        }

        let mut stamp = [0u8; 8];
        let mut remaining = now_ms.max(0);
        for slot in stamp.iter_mut().rev() {
            *slot = PUSH_CHARS[(remaining % 64) as usize];
            remaining /= 64;
        }

        stamp
            .iter()
            .copied()
            .chain(self.last_random.iter().map(|digit| PUSH_CHARS[*digit as usize]))
            .map(char::from)
            .collect()
    }
}
