/// Typed session records and helpers to read them.
pub mod models;
pub mod paths;
/// Backend independent storage errors.
pub mod storage;
/// Reactive store trait and its backends.
pub mod store;
