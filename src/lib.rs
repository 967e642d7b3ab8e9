//! Library crate for the Mixup game session orchestrator, exposing modules for the binary
//! and integration tests.

pub mod config;
/// Reactive store access: backends, records and layout.
pub mod dao;
mod dto;
/// Service and HTTP error types.
pub mod error;
/// HTTP routes of the operator surface.
pub mod routes;
/// Dispatcher, session actors, game controllers and supporting services.
pub mod services;
/// Shared application state, timers and the status graph.
pub mod state;
