//! Environment-derived world configuration.

use std::env;
use std::time::Duration;

use super::error::WorldError;

pub const NAMESPACE_ENV_VAR: &str = "CARDINAL_NAMESPACE";
pub const ROLLUP_ENV_VAR: &str = "CARDINAL_ROLLUP";
pub const TICK_RATE_ENV_VAR: &str = "CARDINAL_TICK_RATE";
pub const KV_ADDRESS_ENV_VAR: &str = "REDIS_ADDRESS";
pub const KV_PASSWORD_ENV_VAR: &str = "REDIS_PASSWORD";
pub const SEQUENCER_ADDRESS_ENV_VAR: &str = "BASE_SHARD_SEQUENCER_ADDRESS";
pub const ROUTER_KEY_ENV_VAR: &str = "BASE_SHARD_ROUTER_KEY";
pub const TELEMETRY_TRACE_ENV_VAR: &str = "TELEMETRY_TRACE_ENABLED";
pub const JWT_SECRET_ENV_VAR: &str = "JWT_SECRET";

/// Ticks per second when `CARDINAL_TICK_RATE` is unset.
pub const DEFAULT_TICK_RATE: u64 = 1;

/// World configuration. Loaded from the environment in deployments; tests
/// construct it directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldConfig {
    /// World identifier. Scopes every persisted key and sequencer blob.
    pub namespace: String,
    /// Enables the outbound router and cold-start recovery.
    pub rollup_enabled: bool,
    /// Ticks per second.
    pub tick_rate: u64,
    pub kv_address: String,
    pub kv_password: Option<String>,
    pub sequencer_address: Option<String>,
    pub router_key: Option<String>,
    pub telemetry_trace_enabled: bool,
    /// Absent secret disables the token-based auth path; auth itself is
    /// handled by the embedding server.
    pub jwt_secret: Option<String>,
}

impl WorldConfig {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            rollup_enabled: false,
            tick_rate: DEFAULT_TICK_RATE,
            kv_address: "localhost:6379".to_string(),
            kv_password: None,
            sequencer_address: None,
            router_key: None,
            telemetry_trace_enabled: false,
            jwt_secret: None,
        }
    }

    pub fn with_rollup(mut self, sequencer_address: impl Into<String>, router_key: impl Into<String>) -> Self {
        self.rollup_enabled = true;
        self.sequencer_address = Some(sequencer_address.into());
        self.router_key = Some(router_key.into());
        self
    }

    pub fn with_tick_rate(mut self, tick_rate: u64) -> Self {
        self.tick_rate = tick_rate;
        self
    }

    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, WorldError> {
        let namespace = env::var(NAMESPACE_ENV_VAR).map_err(|_| WorldError::Config {
            reason: format!("{} must be set", NAMESPACE_ENV_VAR),
        })?;

        let mut config = Self::new(namespace);
        config.rollup_enabled = env_flag(ROLLUP_ENV_VAR);
        if let Ok(raw) = env::var(TICK_RATE_ENV_VAR) {
            config.tick_rate = raw.trim().parse().map_err(|_| WorldError::Config {
                reason: format!("{} must be a positive integer, got {:?}", TICK_RATE_ENV_VAR, raw),
            })?;
        }
        if let Ok(address) = env::var(KV_ADDRESS_ENV_VAR) {
            config.kv_address = address;
        }
        config.kv_password = env::var(KV_PASSWORD_ENV_VAR).ok();
        config.sequencer_address = env::var(SEQUENCER_ADDRESS_ENV_VAR).ok();
        config.router_key = env::var(ROUTER_KEY_ENV_VAR).ok();
        config.telemetry_trace_enabled = env_flag(TELEMETRY_TRACE_ENV_VAR);
        config.jwt_secret = env::var(JWT_SECRET_ENV_VAR).ok();

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), WorldError> {
        if self.namespace.trim().is_empty() {
            return Err(WorldError::Config {
                reason: "namespace cannot be empty".to_string(),
            });
        }
        if !self
            .namespace
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(WorldError::Config {
                reason: format!(
                    "namespace may only contain alphanumerics, '_' and '-': {:?}",
                    self.namespace
                ),
            });
        }
        if self.tick_rate == 0 {
            return Err(WorldError::Config {
                reason: "tick rate must be positive".to_string(),
            });
        }
        if self.kv_address.trim().is_empty() {
            return Err(WorldError::Config {
                reason: "key-value store address cannot be empty".to_string(),
            });
        }
        if self.rollup_enabled {
            if self.sequencer_address.as_deref().unwrap_or("").trim().is_empty() {
                return Err(WorldError::Config {
                    reason: format!("rollup mode requires {}", SEQUENCER_ADDRESS_ENV_VAR),
                });
            }
            if self.router_key.as_deref().unwrap_or("").trim().is_empty() {
                return Err(WorldError::Config {
                    reason: format!("rollup mode requires {}", ROUTER_KEY_ENV_VAR),
                });
            }
        }
        Ok(())
    }

    /// Interval between tick starts.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(1_000 / self.tick_rate.max(1))
    }
}

fn env_flag(name: &str) -> bool {
    match env::var(name) {
        Ok(raw) => parse_flag(&raw),
        Err(_) => false,
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_namespace() {
        let config = WorldConfig::new("");
        assert!(matches!(config.validate(), Err(WorldError::Config { .. })));
    }

    #[test]
    fn validate_rejects_namespace_with_separators() {
        let config = WorldConfig::new("bad:namespace");
        assert!(matches!(config.validate(), Err(WorldError::Config { .. })));
    }

    #[test]
    fn validate_requires_sequencer_settings_in_rollup_mode() {
        let mut config = WorldConfig::new("w1");
        config.rollup_enabled = true;
        assert!(matches!(config.validate(), Err(WorldError::Config { .. })));

        let config = WorldConfig::new("w1").with_rollup("sequencer:9601", "router-key");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_tick_rate() {
        let config = WorldConfig::new("w1").with_tick_rate(0);
        assert!(matches!(config.validate(), Err(WorldError::Config { .. })));
    }

    #[test]
    fn tick_interval_derives_from_rate() {
        assert_eq!(
            WorldConfig::new("w1").tick_interval(),
            Duration::from_millis(1_000)
        );
        assert_eq!(
            WorldConfig::new("w1").with_tick_rate(20).tick_interval(),
            Duration::from_millis(50)
        );
    }

    #[test]
    fn parse_flag_accepts_common_truthy_spellings() {
        for raw in ["1", "true", "TRUE", " yes ", "on"] {
            assert!(parse_flag(raw), "expected {:?} to parse as true", raw);
        }
        for raw in ["0", "false", "off", ""] {
            assert!(!parse_flag(raw), "expected {:?} to parse as false", raw);
        }
    }
}
