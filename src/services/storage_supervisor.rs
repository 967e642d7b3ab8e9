use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{services::sse_events, state::SharedState};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Poll the store and keep the shared state in degraded mode while it does not answer.
///
/// Watchers are owned by the backends and resume on their own once the connection comes
/// back; the supervisor only reports the outage.
pub async fn run(state: SharedState) {
    let mut delay = INITIAL_DELAY;

    loop {
        match state.store().health_check().await {
            Ok(()) => {
                if state.update_degraded(false) {
                    info!("storage healthy again; leaving degraded mode");
                    sse_events::broadcast_system_status(&state, false);
                }
                delay = INITIAL_DELAY;
                sleep(HEALTH_POLL_INTERVAL).await;
            }
            Err(err) => {
                if state.update_degraded(true) {
                    warn!(error = %err, "storage health check failed; entering degraded mode");
                    sse_events::broadcast_system_status(&state, true);
                } else {
                    warn!(error = %err, retry_in = ?delay, "storage still unavailable");
                }
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    use futures::future::BoxFuture;
    use serde_json::{Map, Value};

    use crate::{
        config::OrchestratorConfig,
        dao::{
            storage::{StorageError, StorageResult},
            store::{ReactiveStore, Watch, WatchKind, memory::MemoryStore},
        },
        state::AppState,
    };

    /// Memory store whose health check can be switched off.
    struct FlakyStore {
        inner: MemoryStore,
        down: Arc<AtomicBool>,
    }

    impl ReactiveStore for FlakyStore {
        fn watch(&self, path: &str, kind: WatchKind) -> BoxFuture<'static, StorageResult<Watch>> {
            self.inner.watch(path, kind)
        }
        fn read_once(&self, path: &str) -> BoxFuture<'static, StorageResult<Value>> {
            self.inner.read_once(path)
        }
        fn set(&self, path: &str, value: Value) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.set(path, value)
        }
        fn update(
            &self,
            path: &str,
            patch: Map<String, Value>,
        ) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.update(path, patch)
        }
        fn push(&self, path: &str, value: Value) -> BoxFuture<'static, StorageResult<String>> {
            self.inner.push(path, value)
        }
        fn remove(&self, path: &str) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.remove(path)
        }
        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            let down = self.down.load(Ordering::SeqCst);
            Box::pin(async move {
                if down {
                    Err(StorageError::unavailable(
                        "store unreachable".into(),
                        std::io::Error::other("connection refused"),
                    ))
                } else {
                    Ok(())
                }
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn degraded_flag_follows_health_checks() {
        let down = Arc::new(AtomicBool::new(false));
        let store = FlakyStore {
            inner: MemoryStore::new(),
            down: down.clone(),
        };
        let state = AppState::new(Arc::new(store), OrchestratorConfig::default());
        let mut events = state.events().subscribe();
        tokio::spawn(run(state.clone()));

        sleep(Duration::from_millis(10)).await;
        assert!(!state.is_degraded());

        down.store(true, Ordering::SeqCst);
        sleep(HEALTH_POLL_INTERVAL).await;
        assert!(state.is_degraded());
        let event = events.recv().await.unwrap();
        assert_eq!(event.event.as_deref(), Some("system_status"));
        assert_eq!(event.data, r#"{"degraded":true}"#);

        down.store(false, Ordering::SeqCst);
        sleep(MAX_DELAY).await;
        assert!(!state.is_degraded());
        let event = events.recv().await.unwrap();
        assert_eq!(event.data, r#"{"degraded":false}"#);
    }
}
