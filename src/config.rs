use anyhow::{bail, Context, Result};
#[cfg(test)]
use std::collections::HashMap;
use std::env;
use std::net::ToSocketAddrs;
use std::time::Duration;

use crate::jitter::JitterBufferConfig;

#[derive(Debug, Clone)]
pub struct Config {
    // Relay sockets
    pub listen_addr: String,
    pub forward_addr: String,

    // Buffer settings, applied to every stream
    pub target_latency_ms: u64,
    pub max_capacity: usize,

    // Distinct stream tags the relay will buffer
    pub max_streams: usize,

    // Upper bound on how long the drain loop sleeps between checks
    pub tick_ms: u64,

    // Release whatever is still buffered when shutting down
    pub flush_on_shutdown: bool,

    // Periodic stats logging, 0 disables
    pub stats_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env if present, ignore if missing
        Self::from_getter(|key| env::var(key).ok())
    }

    /// Parse config from a custom getter function (for testing)
    pub fn from_getter<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Config {
            listen_addr: get("JITTER_LISTEN_ADDR").context("JITTER_LISTEN_ADDR not set")?,
            forward_addr: get("JITTER_FORWARD_ADDR").context("JITTER_FORWARD_ADDR not set")?,

            target_latency_ms: get("JITTER_TARGET_LATENCY_MS")
                .unwrap_or_else(|| "200".to_string())
                .trim()
                .parse()
                .context("JITTER_TARGET_LATENCY_MS must be a whole number of milliseconds")?,
            max_capacity: get("JITTER_MAX_CAPACITY")
                .unwrap_or_else(|| "256".to_string())
                .trim()
                .parse()
                .context("JITTER_MAX_CAPACITY must be a whole number of packets")?,
            max_streams: get("JITTER_MAX_STREAMS")
                .unwrap_or_else(|| "16".to_string())
                .trim()
                .parse()
                .context("JITTER_MAX_STREAMS must be a whole number of streams")?,

            tick_ms: get("JITTER_TICK_MS")
                .unwrap_or_else(|| "10".to_string())
                .trim()
                .parse()
                .context("JITTER_TICK_MS must be a whole number of milliseconds")?,

            flush_on_shutdown: match get("JITTER_FLUSH_ON_SHUTDOWN") {
                Some(value) => parse_bool(&value)
                    .context("JITTER_FLUSH_ON_SHUTDOWN must be true or false")?,
                None => true,
            },

            stats_interval_secs: get("JITTER_STATS_INTERVAL_SECS")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(10),
        })
    }

    /// Create config from a HashMap (convenience for testing)
    #[cfg(test)]
    pub fn from_map(map: &HashMap<&str, &str>) -> Result<Self> {
        Self::from_getter(|key| map.get(key).map(|v| v.to_string()))
    }

    /// Validate configuration values at startup.
    /// Returns Ok(()) if all validations pass, or Err with details of what failed.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.target_latency_ms == 0 {
            errors.push("JITTER_TARGET_LATENCY_MS must be greater than 0.".to_string());
        }
        if self.max_capacity == 0 {
            errors.push("JITTER_MAX_CAPACITY must be at least 1.".to_string());
        }
        if self.max_streams == 0 || self.max_streams > 256 {
            errors.push(format!(
                "JITTER_MAX_STREAMS={} must be between 1 and 256.",
                self.max_streams
            ));
        }

        if self.tick_ms == 0 {
            errors.push("JITTER_TICK_MS must be greater than 0.".to_string());
        } else if self.target_latency_ms > 0 && self.tick_ms > self.target_latency_ms {
            errors.push(format!(
                "JITTER_TICK_MS={} is larger than JITTER_TARGET_LATENCY_MS={}; packets would wait past their release time.",
                self.tick_ms, self.target_latency_ms
            ));
        }

        if self.listen_addr.to_socket_addrs().is_err() {
            errors.push(format!(
                "JITTER_LISTEN_ADDR '{}' is not a valid socket address.",
                self.listen_addr
            ));
        }
        if self.forward_addr.to_socket_addrs().is_err() {
            errors.push(format!(
                "JITTER_FORWARD_ADDR '{}' is not a valid socket address.",
                self.forward_addr
            ));
        }
        if self.listen_addr.trim() == self.forward_addr.trim() {
            errors.push("JITTER_FORWARD_ADDR must differ from JITTER_LISTEN_ADDR.".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )
        }
    }

    /// Buffer configuration shared by every stream
    pub fn jitter_config(&self) -> JitterBufferConfig {
        JitterBufferConfig {
            target_latency: Duration::from_millis(self.target_latency_ms),
            max_capacity: self.max_capacity,
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("invalid boolean '{}'", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_valid_env() -> HashMap<&'static str, &'static str> {
        let mut m = HashMap::new();
        m.insert("JITTER_LISTEN_ADDR", "127.0.0.1:5004");
        m.insert("JITTER_FORWARD_ADDR", "127.0.0.1:6004");
        m
    }

    #[test]
    fn test_valid_minimal_config() {
        let env = minimal_valid_env();
        let config = Config::from_map(&env).expect("should parse valid config");

        assert_eq!(config.listen_addr, "127.0.0.1:5004");
        assert_eq!(config.target_latency_ms, 200); // default
        assert_eq!(config.max_capacity, 256); // default
        assert_eq!(config.max_streams, 16); // default
        assert_eq!(config.tick_ms, 10); // default
        assert!(config.flush_on_shutdown); // default
        assert_eq!(config.stats_interval_secs, 10); // default
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_jitter_config_mapping() {
        let mut env = minimal_valid_env();
        env.insert("JITTER_TARGET_LATENCY_MS", "80");
        env.insert("JITTER_MAX_CAPACITY", "32");
        let config = Config::from_map(&env).expect("should parse");
        let jitter = config.jitter_config();
        assert_eq!(jitter.target_latency, Duration::from_millis(80));
        assert_eq!(jitter.max_capacity, 32);
    }

    #[test]
    fn test_missing_required_addresses() {
        for field in ["JITTER_LISTEN_ADDR", "JITTER_FORWARD_ADDR"] {
            let mut env = minimal_valid_env();
            env.remove(field);
            let result = Config::from_map(&env);
            assert!(result.is_err(), "{} should be required", field);
            let err = result.unwrap_err().to_string();
            assert!(err.contains(field), "error should mention {}: {}", field, err);
        }
    }

    #[test]
    fn test_invalid_latency_not_numeric() {
        let mut env = minimal_valid_env();
        env.insert("JITTER_TARGET_LATENCY_MS", "fast");
        let err = Config::from_map(&env).unwrap_err().to_string();
        assert!(err.contains("JITTER_TARGET_LATENCY_MS"), "got: {}", err);
    }

    #[test]
    fn test_negative_capacity_rejected() {
        let mut env = minimal_valid_env();
        env.insert("JITTER_MAX_CAPACITY", "-1");
        assert!(Config::from_map(&env).is_err());
    }

    #[test]
    fn test_flush_flag_parsing() {
        for (value, expected) in [("false", false), ("0", false), ("YES", true), (" on ", true)] {
            let mut env = minimal_valid_env();
            env.insert("JITTER_FLUSH_ON_SHUTDOWN", value);
            let config = Config::from_map(&env).expect("should parse");
            assert_eq!(config.flush_on_shutdown, expected, "value {:?}", value);
        }

        let mut env = minimal_valid_env();
        env.insert("JITTER_FLUSH_ON_SHUTDOWN", "maybe");
        let err = Config::from_map(&env).unwrap_err().to_string();
        assert!(err.contains("JITTER_FLUSH_ON_SHUTDOWN"), "got: {}", err);
    }

    #[test]
    fn test_stats_interval_invalid_uses_default() {
        let mut env = minimal_valid_env();
        env.insert("JITTER_STATS_INTERVAL_SECS", "soon");
        let config = Config::from_map(&env).expect("should parse with default");
        assert_eq!(config.stats_interval_secs, 10);

        env.insert("JITTER_STATS_INTERVAL_SECS", "0");
        let config = Config::from_map(&env).expect("should parse");
        assert!(config.stats_interval().is_none());
    }

    #[test]
    fn test_validation_zero_latency() {
        let mut env = minimal_valid_env();
        env.insert("JITTER_TARGET_LATENCY_MS", "0");
        let config = Config::from_map(&env).expect("should parse");
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("JITTER_TARGET_LATENCY_MS"), "got: {}", err);
    }

    #[test]
    fn test_validation_zero_capacity() {
        let mut env = minimal_valid_env();
        env.insert("JITTER_MAX_CAPACITY", "0");
        let config = Config::from_map(&env).expect("should parse");
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("JITTER_MAX_CAPACITY"), "got: {}", err);
    }

    #[test]
    fn test_validation_max_streams_range() {
        for value in ["0", "257"] {
            let mut env = minimal_valid_env();
            env.insert("JITTER_MAX_STREAMS", value);
            let config = Config::from_map(&env).expect("should parse");
            let err = config.validate().unwrap_err().to_string();
            assert!(err.contains("JITTER_MAX_STREAMS"), "got: {}", err);
        }

        let mut env = minimal_valid_env();
        env.insert("JITTER_MAX_STREAMS", "256");
        assert!(Config::from_map(&env).unwrap().validate().is_ok());
    }

    #[test]
    fn test_validation_tick_larger_than_latency() {
        let mut env = minimal_valid_env();
        env.insert("JITTER_TARGET_LATENCY_MS", "20");
        env.insert("JITTER_TICK_MS", "50");
        let config = Config::from_map(&env).expect("should parse");
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("JITTER_TICK_MS"), "got: {}", err);
    }

    #[test]
    fn test_validation_bad_address() {
        let mut env = minimal_valid_env();
        env.insert("JITTER_LISTEN_ADDR", "not an address");
        let config = Config::from_map(&env).expect("should parse");
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("JITTER_LISTEN_ADDR"), "got: {}", err);
    }

    #[test]
    fn test_validation_same_addresses() {
        let mut env = minimal_valid_env();
        env.insert("JITTER_FORWARD_ADDR", "127.0.0.1:5004");
        let config = Config::from_map(&env).expect("should parse");
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("must differ"), "got: {}", err);
    }

    #[test]
    fn test_validation_reports_all_errors() {
        let mut env = minimal_valid_env();
        env.insert("JITTER_MAX_CAPACITY", "0");
        env.insert("JITTER_TICK_MS", "0");
        let config = Config::from_map(&env).expect("should parse");
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("JITTER_MAX_CAPACITY"));
        assert!(err.contains("JITTER_TICK_MS"));
    }
}


/// Kani formal verification proofs
#[cfg(kani)]
mod kani_proofs {
    use super::*;

    #[kani::proof]
    fn bool_parsing_never_panics() {
        let raw: [u8; 4] = kani::any();
        if let Ok(s) = std::str::from_utf8(&raw) {
            let _ = parse_bool(s);
        }
    }
}
