mod config;
mod error;
mod events;
mod store;

pub use config::FirebaseConfig;
pub use error::{FirebaseDaoError, FirebaseResult};
pub use store::FirebaseStore;
