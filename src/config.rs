//! Client configuration loading, including reconnect and wagering knobs.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::services::reconnect::BackoffPolicy;

/// Default location on disk where the client looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/client.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "PODIUM_CLIENT_CONFIG_PATH";

const DEFAULT_BACKOFF_BASE_MS: u64 = 1000;
const DEFAULT_BACKOFF_CAP_MS: u64 = 30_000;
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 6;
const DEFAULT_MIN_WAGER: i64 = 5;
const DEFAULT_BOARD_MAX_CLUE_VALUE: i64 = 2000;
const DEFAULT_FINAL_ROUND_SECONDS: u64 = 30;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the client.
pub struct ClientConfig {
    /// Reconnect backoff parameters.
    pub backoff: BackoffPolicy,
    /// Smallest daily-double wager the client will submit.
    pub min_wager: i64,
    /// Highest clue value on the board; a player may always wager up to this
    /// even with a lower score.
    pub board_max_clue_value: i64,
    /// Fixed duration of the final-round answer window.
    pub final_round_duration: Duration,
}

impl ClientConfig {
    /// Load the client configuration from disk, falling back to baked-in
    /// defaults when the file is absent or unreadable.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(path = %path.display(), "loaded client config");
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
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy {
                base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
                cap: Duration::from_millis(DEFAULT_BACKOFF_CAP_MS),
                max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            },
            min_wager: DEFAULT_MIN_WAGER,
            board_max_clue_value: DEFAULT_BOARD_MAX_CLUE_VALUE,
            final_round_duration: Duration::from_secs(DEFAULT_FINAL_ROUND_SECONDS),
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file located at
/// [`DEFAULT_CONFIG_PATH`]. Absent fields keep their defaults.
struct RawConfig {
    backoff_base_ms: Option<u64>,
    backoff_cap_ms: Option<u64>,
    max_reconnect_attempts: Option<u32>,
    min_wager: Option<i64>,
    board_max_clue_value: Option<i64>,
    final_round_seconds: Option<u64>,
}

impl From<RawConfig> for ClientConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = Self::default();
        Self {
            backoff: BackoffPolicy {
                base: value
                    .backoff_base_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.backoff.base),
                cap: value
                    .backoff_cap_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.backoff.cap),
                max_attempts: value
                    .max_reconnect_attempts
                    .unwrap_or(defaults.backoff.max_attempts),
            },
            min_wager: value.min_wager.unwrap_or(defaults.min_wager),
            board_max_clue_value: value
                .board_max_clue_value
                .unwrap_or(defaults.board_max_clue_value),
            final_round_duration: value
                .final_round_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.final_round_duration),
        }
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
    fn defaults_match_the_documented_knobs() {
        let config = ClientConfig::default();
        assert_eq!(config.backoff.base, Duration::from_millis(1000));
        assert_eq!(config.backoff.cap, Duration::from_millis(30_000));
        assert_eq!(config.backoff.max_attempts, 6);
        assert_eq!(config.min_wager, 5);
        assert_eq!(config.board_max_clue_value, 2000);
        assert_eq!(config.final_round_duration, Duration::from_secs(30));
    }

    #[test]
    fn partial_raw_config_keeps_defaults_for_absent_fields() {
        let raw: RawConfig =
            serde_json::from_str(r#"{"backoff_base_ms": 500, "min_wager": 100}"#).expect("parse");
        let config: ClientConfig = raw.into();
        assert_eq!(config.backoff.base, Duration::from_millis(500));
        assert_eq!(config.min_wager, 100);
        assert_eq!(config.backoff.cap, Duration::from_millis(30_000));
        assert_eq!(config.board_max_clue_value, 2000);
    }
}
