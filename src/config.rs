//! Orchestrator configuration loading: phase timeouts, the stall alarm and write retries.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::phase::SessionStatus;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/orchestrator.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "MIXUP_ORCHESTRATOR_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
/// Immutable runtime configuration shared across the application.
pub struct OrchestratorConfig {
    /// How long a NHIE round accepts responses.
    pub round_timeout_ms: u64,
    /// How long NHIE players may confess before the next round.
    pub confession_timeout_ms: u64,
    /// How long a RopeDude player has to submit a letter.
    pub turn_timeout_ms: u64,
    /// Delay between `finished` and the deletion of the session.
    pub finished_grace_ms: u64,
    /// Multiple of the expected phase duration after which a session is reported stalled.
    pub stall_factor: u32,
    /// Total attempts for a store write that fails with a transient error.
    pub write_retry_attempts: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            round_timeout_ms: 30_000,
            confession_timeout_ms: 30_000,
            turn_timeout_ms: 30_000,
            finished_grace_ms: 200_000,
            stall_factor: 2,
            write_retry_attempts: 3,
        }
    }
}

impl OrchestratorConfig {
    /// Load the configuration from disk, falling back to the built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), ?config, "loaded orchestrator config");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str(contents)
    }

    /// NHIE responding window.
    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }

    /// NHIE confession window.
    pub fn confession_timeout(&self) -> Duration {
        Duration::from_millis(self.confession_timeout_ms)
    }

    /// RopeDude turn window.
    pub fn turn_timeout(&self) -> Duration {
        Duration::from_millis(self.turn_timeout_ms)
    }

    /// Grace period before a finished session is deleted.
    pub fn finished_grace(&self) -> Duration {
        Duration::from_millis(self.finished_grace_ms)
    }

    /// Longest a session is expected to stay in `status` (or on one RopeDude turn).
    pub fn expected_duration(&self, status: SessionStatus) -> Duration {
        match status {
            SessionStatus::Responding => self.round_timeout(),
            SessionStatus::Confessing => self.confession_timeout(),
            SessionStatus::Playing => self.turn_timeout(),
            SessionStatus::Finished => self.finished_grace(),
        }
    }

    /// Delay after which a session still in `status` raises the stall alarm.
    pub fn stall_after(&self, status: SessionStatus) -> Duration {
        self.expected_duration(status) * self.stall_factor.max(1)
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_document_keeps_defaults() {
        let config = OrchestratorConfig::from_json(r#"{ "turn_timeout_ms": 15000 }"#).unwrap();
        assert_eq!(config.turn_timeout(), Duration::from_secs(15));
        assert_eq!(config.round_timeout(), Duration::from_secs(30));
        assert_eq!(config.finished_grace(), Duration::from_secs(200));
        assert_eq!(config.write_retry_attempts, 3);
    }

    #[test]
    fn stall_alarm_scales_expected_duration() {
        let config = OrchestratorConfig::default();
        assert_eq!(
            config.stall_after(SessionStatus::Confessing),
            Duration::from_secs(60)
        );
        assert_eq!(
            config.stall_after(SessionStatus::Finished),
            Duration::from_secs(400)
        );

        let disabled_factor = OrchestratorConfig {
            stall_factor: 0,
            ..OrchestratorConfig::default()
        };
        assert_eq!(
            disabled_factor.stall_after(SessionStatus::Playing),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(OrchestratorConfig::from_json(r#"{ "stall_factor": "two" }"#).is_err());
    }
}
