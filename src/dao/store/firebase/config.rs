use super::error::{FirebaseDaoError, FirebaseResult};

/// Runtime configuration describing how to reach the Firebase Realtime Database.
#[derive(Debug, Clone)]
pub struct FirebaseConfig {
    /// Database root, e.g. `https://mixup-default-rtdb.firebaseio.com`.
    pub database_url: String,
    /// Token sent as the `auth` query parameter.
    pub auth: Option<String>,
}

impl FirebaseConfig {
    /// Construct a configuration for the database at `database_url`.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            auth: None,
        }
    }

    /// Attach the token sent as the `auth` query parameter (database secret or ID token).
    pub fn with_auth(mut self, token: impl Into<String>) -> Self {
        self.auth = Some(token.into());
        self
    }

    /// Build a configuration by reading the expected environment variables.
    pub fn from_env() -> FirebaseResult<Self> {
        let database_url =
            std::env::var("FIREBASE_DATABASE_URL").map_err(|_| FirebaseDaoError::MissingEnvVar {
                var: "FIREBASE_DATABASE_URL",
            })?;

        let mut config = Self::new(database_url);
        if let Some(token) = std::env::var("FIREBASE_AUTH")
            .ok()
            .filter(|token| !token.is_empty())
        {
            config = config.with_auth(token);
        }

        Ok(config)
    }
}
