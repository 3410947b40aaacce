//! Process configuration: bind address, and the timing/sizing knobs an
//! operator may want to override without a recompile.
//!
//! Values fall back to the constants in [`crate::constants`] when not set.
//! There is no config file: the hub keeps no persisted state, so a handful
//! of env vars is enough surface area.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::constants;

/// Runtime configuration for a single hub process.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP/WebSocket listener binds to.
    pub bind_addr: SocketAddr,
    /// Read deadline before a silent connection is terminated.
    pub pong_wait: Duration,
    /// Write deadline for a single outbound frame.
    pub write_wait: Duration,
    /// Interval between server-initiated pings.
    pub ping_period: Duration,
    /// Per-connection bounded outbound queue capacity.
    pub outbound_queue_capacity: usize,
    /// Version string compared against `version_check.js_version`.
    pub server_version: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().expect("valid default bind addr"),
            pong_wait: constants::PONG_WAIT,
            write_wait: constants::WRITE_WAIT,
            ping_period: constants::PING_PERIOD,
            outbound_queue_capacity: constants::OUTBOUND_QUEUE_CAPACITY,
            server_version: constants::SERVER_VERSION.to_string(),
        }
    }
}

impl Config {
    /// Build configuration from environment variables, falling back to
    /// [`Config::default`] for anything unset.
    ///
    /// Recognized variables: `SCENEHUB_BIND_ADDR`, `SCENEHUB_PONG_WAIT_SECS`,
    /// `SCENEHUB_WRITE_WAIT_SECS`, `SCENEHUB_PING_PERIOD_SECS`,
    /// `SCENEHUB_QUEUE_CAPACITY`, `SCENEHUB_VERSION`.
    ///
    /// # Errors
    ///
    /// Returns an error if a set variable fails to parse.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("SCENEHUB_BIND_ADDR") {
            config.bind_addr = addr
                .parse()
                .with_context(|| format!("invalid SCENEHUB_BIND_ADDR: {addr}"))?;
        }
        if let Some(secs) = parse_env_secs("SCENEHUB_PONG_WAIT_SECS")? {
            config.pong_wait = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env_secs("SCENEHUB_WRITE_WAIT_SECS")? {
            config.write_wait = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env_secs("SCENEHUB_PING_PERIOD_SECS")? {
            config.ping_period = Duration::from_secs(secs);
        }
        if let Ok(cap) = std::env::var("SCENEHUB_QUEUE_CAPACITY") {
            config.outbound_queue_capacity = cap
                .parse()
                .with_context(|| format!("invalid SCENEHUB_QUEUE_CAPACITY: {cap}"))?;
        }
        if let Ok(version) = std::env::var("SCENEHUB_VERSION") {
            config.server_version = version;
        }

        Ok(config)
    }
}

fn parse_env_secs(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse::<u64>()
            .map(Some)
            .with_context(|| format!("invalid {key}: {value}")),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("invalid {key}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_binds_all_interfaces() {
        let config = Config::default();
        assert_eq!(config.bind_addr.port(), 8080);
    }

    #[test]
    fn default_config_matches_constants() {
        let config = Config::default();
        assert_eq!(config.pong_wait, constants::PONG_WAIT);
        assert_eq!(config.outbound_queue_capacity, constants::OUTBOUND_QUEUE_CAPACITY);
    }
}
