//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Arena constants the world store depends on
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ArenaRules {
    /// Right edge of the playing field
    pub field_max_width: f64,
    /// Bottom edge of the playing field
    pub field_max_height: f64,
    /// Health removed by one hit claim
    pub hit_damage: u32,
    /// Health a freshly connected player starts with
    pub starting_health: u32,
}

impl Default for ArenaRules {
    fn default() -> Self {
        Self {
            field_max_width: 4000.0,
            field_max_height: 4000.0,
            hit_damage: 5,
            starting_health: 100,
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit logs as JSON lines instead of the human-readable format
    pub log_json: bool,

    /// Broadcast channel shared by every gateway serving this arena
    pub arena_channel: String,
    /// Redis pub/sub url; without it fanout stays inside this process
    pub redis_url: Option<String>,
    /// Simulation tick period
    pub tick_period: Duration,
    /// Liveness sweep period
    pub liveness_period: Duration,
    /// World bounds and combat constants
    pub rules: ArenaRules,

    /// Max inbound frames per second per connection
    pub input_rate_limit: u32,
    /// Outbound frames queued per connection before new ones are dropped
    pub outbound_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8888)),
            log_level: "info".to_string(),
            log_json: false,
            arena_channel: "game1".to_string(),
            redis_url: None,
            tick_period: Duration::from_millis(40),
            liveness_period: Duration::from_millis(2000),
            rules: ArenaRules::default(),
            input_rate_limit: 240,
            outbound_buffer: 64,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup; missing keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        // PORT wins over SERVER_ADDR so hosted deployments can inject it
        let server_addr = match (lookup("PORT"), lookup("SERVER_ADDR")) {
            (Some(port), _) => format!("0.0.0.0:{}", port)
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            (None, Some(addr)) => addr.parse().map_err(|_| ConfigError::InvalidAddress)?,
            (None, None) => defaults.server_addr,
        };

        let log_json = match lookup("LOG_FORMAT").as_deref() {
            None | Some("pretty") => false,
            Some("json") => true,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "LOG_FORMAT",
                    value: other.to_string(),
                })
            }
        };

        let tick_ms: u64 = parse_or(&lookup, "TICK_PERIOD_MS", 40)?;
        let liveness_ms: u64 = parse_or(&lookup, "LIVENESS_PERIOD_MS", 2000)?;
        let input_rate_limit: u32 = parse_or(&lookup, "INPUT_RATE_LIMIT", defaults.input_rate_limit)?;
        let outbound_buffer: usize = parse_or(&lookup, "OUTBOUND_BUFFER", defaults.outbound_buffer)?;

        non_zero("TICK_PERIOD_MS", tick_ms)?;
        non_zero("LIVENESS_PERIOD_MS", liveness_ms)?;
        non_zero("INPUT_RATE_LIMIT", input_rate_limit as u64)?;
        non_zero("OUTBOUND_BUFFER", outbound_buffer as u64)?;

        let rules = ArenaRules {
            field_max_width: parse_or(&lookup, "FIELD_MAX_WIDTH", defaults.rules.field_max_width)?,
            field_max_height: parse_or(&lookup, "FIELD_MAX_HEIGHT", defaults.rules.field_max_height)?,
            hit_damage: parse_or(&lookup, "HIT_DAMAGE", defaults.rules.hit_damage)?,
            starting_health: parse_or(&lookup, "STARTING_HEALTH", defaults.rules.starting_health)?,
        };

        if !(rules.field_max_width > 0.0 && rules.field_max_height > 0.0) {
            return Err(ConfigError::Invalid {
                key: "FIELD_MAX_WIDTH/FIELD_MAX_HEIGHT",
                value: format!("{}x{}", rules.field_max_width, rules.field_max_height),
            });
        }

        Ok(Self {
            server_addr,
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_json,
            arena_channel: lookup("ARENA_CHANNEL").unwrap_or(defaults.arena_channel),
            redis_url: lookup("REDIS_URL").filter(|url| !url.trim().is_empty()),
            tick_period: Duration::from_millis(tick_ms),
            liveness_period: Duration::from_millis(liveness_ms),
            rules,
            input_rate_limit,
            outbound_buffer,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

fn non_zero(key: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.server_addr.port(), 8888);
        assert_eq!(config.arena_channel, "game1");
        assert_eq!(config.tick_period, Duration::from_millis(40));
        assert_eq!(config.liveness_period, Duration::from_secs(2));
        assert_eq!(config.rules, ArenaRules::default());
        assert_eq!(config.redis_url, None);
        assert_eq!(config.input_rate_limit, 240);
        assert!(!config.log_json);
    }

    #[test]
    fn redis_url_enables_networked_fanout() {
        let config =
            Config::from_lookup(lookup_from(&[("REDIS_URL", "redis://cache:6379/")])).unwrap();
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379/"));

        let config = Config::from_lookup(lookup_from(&[("REDIS_URL", "  ")])).unwrap();
        assert_eq!(config.redis_url, None);
    }

    #[test]
    fn port_overrides_server_addr() {
        let config = Config::from_lookup(lookup_from(&[
            ("PORT", "9000"),
            ("SERVER_ADDR", "127.0.0.1:1234"),
        ]))
        .unwrap();
        assert_eq!(config.server_addr.port(), 9000);
    }

    #[test]
    fn arena_overrides_are_applied() {
        let config = Config::from_lookup(lookup_from(&[
            ("ARENA_CHANNEL", "arena-7"),
            ("TICK_PERIOD_MS", "50"),
            ("FIELD_MAX_WIDTH", "1000"),
            ("HIT_DAMAGE", "10"),
            ("LOG_FORMAT", "json"),
        ]))
        .unwrap();
        assert_eq!(config.arena_channel, "arena-7");
        assert_eq!(config.tick_period, Duration::from_millis(50));
        assert_eq!(config.rules.field_max_width, 1000.0);
        assert_eq!(config.rules.field_max_height, 4000.0);
        assert_eq!(config.rules.hit_damage, 10);
        assert!(config.log_json);
    }

    #[test]
    fn rejects_bad_values() {
        let err = Config::from_lookup(lookup_from(&[("TICK_PERIOD_MS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "TICK_PERIOD_MS", .. }));

        let err = Config::from_lookup(lookup_from(&[("HIT_DAMAGE", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "HIT_DAMAGE", .. }));

        let err = Config::from_lookup(lookup_from(&[("SERVER_ADDR", "nowhere")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress));
    }
}
