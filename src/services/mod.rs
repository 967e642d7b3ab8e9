/// Discovers game sessions and spawns one actor per session.
pub mod dispatcher;
/// Health check service.
pub mod health_service;
/// "Never Have I Ever" round and confession controllers.
pub mod nhie;
/// Retry with exponential backoff for transient store failures.
pub mod retry;
/// RopeDude turn rotation controller.
pub mod rope_dude;
/// Per-session actor routing status changes to phase controllers.
pub mod session;
/// Read-only projections of attached sessions.
pub mod session_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
/// Store health supervisor toggling degraded mode.
pub mod storage_supervisor;
/// Grace period and deletion of finished sessions.
pub mod teardown;
