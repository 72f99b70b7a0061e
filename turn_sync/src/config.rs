//! Session configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use std::time::Duration;

/// Complete session configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Connection parameters
    pub connection: ConnectionConfig,
    /// Animation phase durations
    pub timings: PhaseTimings,
    /// Hold the movement phase until the render layer acknowledges arrival
    pub await_render_ack: bool,
}

/// Connection parameters for one game session
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket base URL, e.g. `ws://localhost:8000`
    pub endpoint: String,
    /// Game to join
    pub game_id: String,
    /// Local participant id
    pub participant_id: String,
    /// Opaque identity token presented in the handshake
    pub token: String,
    /// Interval between heartbeats
    pub heartbeat_interval: Duration,
    /// Delay before reconnecting after a drop
    pub reconnect_delay: Duration,
    /// Handshake timeout
    pub connect_timeout: Duration,
}

/// Durations of each animation phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTimings {
    /// Dice tumble
    pub roll_tumble: Duration,
    /// Pause on the rolled result
    pub settle_pause: Duration,
    /// Token movement
    pub movement: Duration,
    /// Hold after the outcome is revealed
    pub reveal_hold: Duration,
    /// Ability reveal
    pub ability_reveal: Duration,
    /// Casino wheel spin
    pub casino_spin: Duration,
    /// Upper bound on any single sequence
    pub safety_timeout: Duration,
}

impl Default for PhaseTimings {
    fn default() -> Self {
        Self {
            roll_tumble: Duration::from_millis(3500),
            settle_pause: Duration::from_millis(700),
            movement: Duration::from_millis(1000),
            reveal_hold: Duration::from_millis(1200),
            ability_reveal: Duration::from_millis(2500),
            casino_spin: Duration::from_millis(3000),
            safety_timeout: Duration::from_millis(15_000),
        }
    }
}

impl PhaseTimings {
    /// Length of the longest fixed phase plan.
    pub fn longest_plan(&self) -> Duration {
        let roll = self.roll_tumble + self.settle_pause + self.movement + self.reveal_hold;
        let ability = self.ability_reveal + self.reveal_hold;
        let casino = self.casino_spin + self.settle_pause + self.reveal_hold;
        roll.max(ability).max(casino)
    }
}

/// CLI overrides applied on top of the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub endpoint: Option<String>,
    pub game_id: Option<String>,
    pub participant_id: Option<String>,
    pub token: Option<String>,
}

impl SessionConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `overrides` - Values taken from the command line, preferred over the environment
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or invalid
    pub fn from_env(overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let endpoint = overrides
            .endpoint
            .or_else(|| std::env::var("TURN_SYNC_ENDPOINT").ok())
            .unwrap_or_else(|| "ws://localhost:8000".to_string());

        let game_id = required(overrides.game_id, "TURN_SYNC_GAME_ID", "Pass --game or set the game code")?;
        let participant_id = required(
            overrides.participant_id,
            "TURN_SYNC_PARTICIPANT_ID",
            "Pass --player or set the id assigned when joining the game",
        )?;
        let token = required(
            overrides.token,
            "TURN_SYNC_TOKEN",
            "Pass --token or set the access token issued at login",
        )?;

        let connection = ConnectionConfig {
            endpoint,
            game_id: game_id.to_uppercase(),
            participant_id,
            token,
            heartbeat_interval: Duration::from_secs(parse_env_or("TURN_SYNC_HEARTBEAT_SECS", 15)),
            reconnect_delay: Duration::from_secs(parse_env_or("TURN_SYNC_RECONNECT_SECS", 3)),
            connect_timeout: Duration::from_secs(parse_env_or(
                "TURN_SYNC_CONNECT_TIMEOUT_SECS",
                10,
            )),
        };

        let defaults = PhaseTimings::default();
        let timings = PhaseTimings {
            roll_tumble: env_millis_or("TURN_SYNC_ROLL_MS", defaults.roll_tumble),
            settle_pause: env_millis_or("TURN_SYNC_SETTLE_MS", defaults.settle_pause),
            movement: env_millis_or("TURN_SYNC_MOVE_MS", defaults.movement),
            reveal_hold: env_millis_or("TURN_SYNC_REVEAL_MS", defaults.reveal_hold),
            ability_reveal: env_millis_or("TURN_SYNC_ABILITY_MS", defaults.ability_reveal),
            casino_spin: env_millis_or("TURN_SYNC_CASINO_MS", defaults.casino_spin),
            safety_timeout: env_millis_or("TURN_SYNC_SAFETY_MS", defaults.safety_timeout),
        };

        Ok(SessionConfig {
            connection,
            timings,
            await_render_ack: parse_env_or("TURN_SYNC_AWAIT_RENDER_ACK", false),
        })
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        let connection = &self.connection;

        if !(connection.endpoint.starts_with("ws://") || connection.endpoint.starts_with("wss://"))
        {
            return Err(ConfigError::Invalid {
                var: "TURN_SYNC_ENDPOINT".to_string(),
                reason: format!("Must be a ws:// or wss:// URL, got '{}'", connection.endpoint),
            });
        }

        for (var, value) in [
            ("TURN_SYNC_GAME_ID", &connection.game_id),
            ("TURN_SYNC_PARTICIPANT_ID", &connection.participant_id),
        ] {
            if !is_valid_id(value) {
                return Err(ConfigError::Invalid {
                    var: var.to_string(),
                    reason: "Must be non-empty and contain only letters, digits, '-' or '_'"
                        .to_string(),
                });
            }
        }

        if connection.token.trim().is_empty() {
            return Err(ConfigError::Invalid {
                var: "TURN_SYNC_TOKEN".to_string(),
                reason: "Must not be blank".to_string(),
            });
        }

        if connection.heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid {
                var: "TURN_SYNC_HEARTBEAT_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if connection.reconnect_delay.is_zero() {
            return Err(ConfigError::Invalid {
                var: "TURN_SYNC_RECONNECT_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        let longest = self.timings.longest_plan();
        if self.timings.safety_timeout <= longest {
            return Err(ConfigError::Invalid {
                var: "TURN_SYNC_SAFETY_MS".to_string(),
                reason: format!(
                    "Must exceed the longest animation ({} ms)",
                    longest.as_millis()
                ),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

fn required(value: Option<String>, var: &str, hint: &str) -> Result<String, ConfigError> {
    value
        .or_else(|| std::env::var(var).ok())
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingRequired {
            var: var.to_string(),
            hint: hint.to_string(),
        })
}

fn is_valid_id(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Helper to parse environment variable with default fallback
fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_millis_or(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "TURN_SYNC_ENDPOINT",
        "TURN_SYNC_GAME_ID",
        "TURN_SYNC_PARTICIPANT_ID",
        "TURN_SYNC_TOKEN",
        "TURN_SYNC_HEARTBEAT_SECS",
        "TURN_SYNC_RECONNECT_SECS",
        "TURN_SYNC_ROLL_MS",
        "TURN_SYNC_SAFETY_MS",
        "TURN_SYNC_AWAIT_RENDER_ACK",
    ];

    fn clear_env() {
        for var in VARS {
            // SAFETY: tests touching the environment are serialized
            unsafe { std::env::remove_var(var) };
        }
    }

    fn set_env(key: &str, value: &str) {
        // SAFETY: tests touching the environment are serialized
        unsafe { std::env::set_var(key, value) };
    }

    fn overrides() -> ConfigOverrides {
        ConfigOverrides {
            endpoint: None,
            game_id: Some("abc123".to_string()),
            participant_id: Some("p1".to_string()),
            token: Some("secret".to_string()),
        }
    }

    // === Loading Tests ===

    #[test]
    #[serial]
    fn test_defaults_with_overrides() {
        clear_env();
        let config = SessionConfig::from_env(overrides()).unwrap();
        assert_eq!(config.connection.endpoint, "ws://localhost:8000");
        assert_eq!(config.connection.game_id, "ABC123");
        assert_eq!(config.connection.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.connection.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.timings, PhaseTimings::default());
        assert!(!config.await_render_ack);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_missing_token_is_reported() {
        clear_env();
        let mut overrides = overrides();
        overrides.token = None;
        let err = SessionConfig::from_env(overrides).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { ref var, .. } if var == "TURN_SYNC_TOKEN"));
    }

    #[test]
    #[serial]
    fn test_env_values_are_read() {
        clear_env();
        set_env("TURN_SYNC_GAME_ID", "room7");
        set_env("TURN_SYNC_PARTICIPANT_ID", "p9");
        set_env("TURN_SYNC_TOKEN", "tok");
        set_env("TURN_SYNC_ROLL_MS", "2000");
        set_env("TURN_SYNC_AWAIT_RENDER_ACK", "true");
        let config = SessionConfig::from_env(ConfigOverrides::default()).unwrap();
        clear_env();
        assert_eq!(config.connection.game_id, "ROOM7");
        assert_eq!(config.timings.roll_tumble, Duration::from_millis(2000));
        assert!(config.await_render_ack);
    }

    #[test]
    #[serial]
    fn test_unparsable_values_fall_back() {
        clear_env();
        set_env("TURN_SYNC_HEARTBEAT_SECS", "soon");
        let config = SessionConfig::from_env(overrides()).unwrap();
        clear_env();
        assert_eq!(config.connection.heartbeat_interval, Duration::from_secs(15));
    }

    // === Validation Tests ===

    #[test]
    #[serial]
    fn test_validate_rejects_http_endpoint() {
        clear_env();
        let mut overrides = overrides();
        overrides.endpoint = Some("http://localhost:8000".to_string());
        let config = SessionConfig::from_env(overrides).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    #[serial]
    fn test_validate_rejects_short_safety_timeout() {
        clear_env();
        set_env("TURN_SYNC_SAFETY_MS", "5000");
        let config = SessionConfig::from_env(overrides()).unwrap();
        clear_env();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("TURN_SYNC_SAFETY_MS"));
    }

    #[test]
    #[serial]
    fn test_validate_rejects_bad_ids() {
        clear_env();
        let mut overrides = overrides();
        overrides.participant_id = Some("p1?x=1".to_string());
        let config = SessionConfig::from_env(overrides).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_longest_plan_is_roll() {
        let timings = PhaseTimings::default();
        assert_eq!(timings.longest_plan(), Duration::from_millis(6400));
    }
}
