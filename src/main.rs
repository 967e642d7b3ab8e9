//! Mixup orchestrator binary entrypoint wiring the reactive store, session actors, and the
//! operator-facing REST and SSE layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mixup_orchestrator::{
    config::OrchestratorConfig,
    dao::store::{ReactiveStore, memory::MemoryStore},
    routes,
    services::{dispatcher, storage_supervisor},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = OrchestratorConfig::load();
    let store = connect_store().await?;
    let app_state = AppState::new(store, config);

    tokio::spawn(storage_supervisor::run(app_state.clone()));
    tokio::spawn(dispatcher::run(app_state.clone()));
    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Pick the store backend from `STORE_BACKEND` (`firebase` or `memory`).
async fn connect_store() -> anyhow::Result<Arc<dyn ReactiveStore>> {
    let default_backend = if cfg!(feature = "firebase-store") {
        "firebase"
    } else {
        "memory"
    };
    let backend = env::var("STORE_BACKEND").unwrap_or_else(|_| default_backend.into());

    match backend.as_str() {
        "memory" => {
            info!("using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "firebase-store")]
        "firebase" => {
            use mixup_orchestrator::dao::store::firebase::{FirebaseConfig, FirebaseStore};

            let config = FirebaseConfig::from_env().context("reading Firebase configuration")?;
            let store = FirebaseStore::connect(config)
                .await
                .context("connecting to Firebase")?;
            info!("connected to Firebase Realtime Database");
            Ok(Arc::new(store))
        }
        other => anyhow::bail!("unsupported STORE_BACKEND `{other}`"),
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
