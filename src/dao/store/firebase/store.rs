use std::{sync::Arc, time::Duration};

use futures::{StreamExt, future::BoxFuture};
use reqwest::{Client, Method, header::ACCEPT};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::dao::{
    storage::StorageResult,
    store::{ReactiveStore, Watch, WatchFeed, WatchKind, tree},
};

use super::{
    config::FirebaseConfig,
    error::{FirebaseDaoError, FirebaseResult},
    events::{StreamPayload, server_events},
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);

/// Realtime Database client speaking the REST protocol, with watches backed by the
/// streaming endpoint.
#[derive(Clone)]
pub struct FirebaseStore {
    client: Client,
    base_url: Arc<str>,
    auth: Option<Arc<str>>,
}

#[derive(Deserialize)]
struct PushResponse {
    name: String,
}

impl FirebaseStore {
    /// Build the client and make sure the database answers.
    pub async fn connect(config: FirebaseConfig) -> FirebaseResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| FirebaseDaoError::ClientBuilder { source })?;

        let store = Self {
            client,
            base_url: Arc::<str>::from(config.database_url.trim_end_matches('/')),
            auth: config.auth.map(Arc::<str>::from),
        };

        store.ping().await?;
        Ok(store)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}.json", self.base_url, path.trim_matches('/'));
        let builder = self.client.request(method, url);
        match self.auth {
            Some(ref token) => builder.query(&[("auth", token.as_ref())]),
            None => builder,
        }
    }

    async fn send<T>(&self, builder: reqwest::RequestBuilder, path: &str) -> FirebaseResult<T>
    where
        T: DeserializeOwned,
    {
        let response = builder
            .send()
            .await
            .map_err(|source| FirebaseDaoError::RequestSend {
                path: path.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(FirebaseDaoError::RequestStatus {
                path: path.to_string(),
                status: response.status(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|source| FirebaseDaoError::DecodeResponse {
                path: path.to_string(),
                source,
            })
    }

    async fn ping(&self) -> FirebaseResult<()> {
        let builder = self
            .request(Method::GET, "")
            .query(&[("shallow", "true")]);
        self.send::<Value>(builder, "/").await.map(|_| ())
    }

    /// Keep a stream open on `path` for as long as the watch is attached, reconnecting
    /// with backoff. While disconnected the watch simply receives nothing.
    async fn follow(self, path: String, mut feed: WatchFeed) {
        let detached = feed.detach_signal();
        tokio::pin!(detached);
        let mut mirror = Value::Null;
        let mut delay = INITIAL_DELAY;

        loop {
            let outcome = tokio::select! {
                _ = &mut detached => return,
                outcome = self.stream_once(&path, &mut mirror, &mut feed, &mut delay) => outcome,
            };

            match outcome {
                Ok(()) => debug!(%path, "Firebase stream ended; reopening"),
                Err(err) => warn!(%path, error = %err, "Firebase stream failed; watcher stalled"),
            }

            tokio::select! {
                _ = &mut detached => return,
                _ = sleep(delay) => {}
            }
            delay = (delay * 2).min(MAX_DELAY);
        }
    }

    async fn stream_once(
        &self,
        path: &str,
        mirror: &mut Value,
        feed: &mut WatchFeed,
        delay: &mut Duration,
    ) -> FirebaseResult<()> {
        let response = self
            .request(Method::GET, path)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|source| FirebaseDaoError::RequestSend {
                path: path.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(FirebaseDaoError::RequestStatus {
                path: path.to_string(),
                status: response.status(),
            });
        }

        info!(%path, "Firebase stream opened");
        *delay = INITIAL_DELAY;

        let events = server_events(response.bytes_stream());
        futures::pin_mut!(events);
        while let Some(event) = events.next().await {
            let event = event?;
            match event.name.as_str() {
                "put" | "patch" => {
                    let payload: StreamPayload = serde_json::from_str(&event.data).map_err(
                        |source| FirebaseDaoError::StreamPayload {
                            path: path.to_string(),
                            source,
                        },
                    )?;
                    let target = tree::segments(&payload.path);
                    match (event.name.as_str(), payload.data) {
                        ("patch", Value::Object(patch)) => tree::merge(mirror, &target, patch),
                        (_, data) => tree::set(mirror, &target, data),
                    }
                    feed.observe(mirror);
                }
                "keep-alive" => {}
                "cancel" | "auth_revoked" => {
                    return Err(FirebaseDaoError::StreamClosed {
                        path: path.to_string(),
                        reason: event.name,
                    });
                }
                other => debug!(%path, event = other, "ignoring Firebase stream event"),
            }
        }

        Ok(())
    }
}

impl ReactiveStore for FirebaseStore {
    fn watch(&self, path: &str, kind: WatchKind) -> BoxFuture<'static, StorageResult<Watch>> {
        let store = self.clone();
        let path = path.to_string();
        Box::pin(async move {
            let (feed, watch) = WatchFeed::channel(kind);
            tokio::spawn(store.follow(path, feed));
            Ok(watch)
        })
    }

    fn read_once(&self, path: &str) -> BoxFuture<'static, StorageResult<Value>> {
        let store = self.clone();
        let path = path.to_string();
        Box::pin(async move {
            let builder = store.request(Method::GET, &path);
            store.send(builder, &path).await.map_err(Into::into)
        })
    }

    fn set(&self, path: &str, value: Value) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let path = path.to_string();
        Box::pin(async move {
            let builder = store.request(Method::PUT, &path).json(&value);
            store
                .send::<Value>(builder, &path)
                .await
                .map(|_| ())
                .map_err(Into::into)
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
            let builder = store.request(Method::PATCH, &path).json(&patch);
            store
                .send::<Value>(builder, &path)
                .await
                .map(|_| ())
                .map_err(Into::into)
        })
    }

    fn push(&self, path: &str, value: Value) -> BoxFuture<'static, StorageResult<String>> {
        let store = self.clone();
        let path = path.to_string();
        Box::pin(async move {
            let builder = store.request(Method::POST, &path).json(&value);
            store
                .send::<PushResponse>(builder, &path)
                .await
                .map(|response| response.name)
                .map_err(Into::into)
        })
    }

    fn remove(&self, path: &str) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let path = path.to_string();
        Box::pin(async move {
            let builder = store.request(Method::DELETE, &path);
            store
                .send::<Value>(builder, &path)
                .await
                .map(|_| ())
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ping().await.map_err(Into::into) })
    }
}
