//! Aggregator configuration.

use crate::eviction::DEFAULT_WINDOW;
use crate::state::AggregatorSettings;
use aggsync_core::ClockRule;
use aggsync_proto::FrameLimits;
use anyhow::{Context, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 4567;

/// Aggregator configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address
    pub bind_addr: IpAddr,

    /// Listen port (0 picks an ephemeral port)
    pub port: u16,

    /// Inactivity window after which the content store is cleared
    pub eviction_window: Duration,

    /// How long a connection may take to deliver its request
    pub read_timeout: Duration,

    /// Largest accepted PUT body
    pub max_body_bytes: usize,

    /// Rule for reconciling received clock values
    pub clock_rule: ClockRule,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            eviction_window: DEFAULT_WINDOW,
            read_timeout: Duration::from_secs(10),
            max_body_bytes: FrameLimits::default().max_body_bytes,
            clock_rule: ClockRule::Lamport,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `AGGSYNC_BIND_ADDR`: Listen IP address
    /// - `AGGSYNC_PORT`: Listen port
    /// - `AGGSYNC_EVICTION_SECS`: Inactivity window in seconds
    /// - `AGGSYNC_READ_TIMEOUT_SECS`: Per-connection read timeout in seconds
    /// - `AGGSYNC_MAX_BODY_BYTES`: Largest accepted PUT body
    /// - `AGGSYNC_CLOCK_RULE`: "lamport" or "additive"
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns error if a value is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("AGGSYNC_BIND_ADDR") {
            config.bind_addr = parse_var("AGGSYNC_BIND_ADDR", &addr)?;
        }

        if let Some(port) = lookup("AGGSYNC_PORT") {
            config.port = parse_var("AGGSYNC_PORT", &port)?;
        }

        if let Some(secs) = lookup("AGGSYNC_EVICTION_SECS") {
            let secs: u64 = parse_var("AGGSYNC_EVICTION_SECS", &secs)?;
            anyhow::ensure!(secs > 0, "AGGSYNC_EVICTION_SECS must be positive");
            config.eviction_window = Duration::from_secs(secs);
        }

        if let Some(secs) = lookup("AGGSYNC_READ_TIMEOUT_SECS") {
            let secs: u64 = parse_var("AGGSYNC_READ_TIMEOUT_SECS", &secs)?;
            anyhow::ensure!(secs > 0, "AGGSYNC_READ_TIMEOUT_SECS must be positive");
            config.read_timeout = Duration::from_secs(secs);
        }

        if let Some(bytes) = lookup("AGGSYNC_MAX_BODY_BYTES") {
            config.max_body_bytes = parse_var("AGGSYNC_MAX_BODY_BYTES", &bytes)?;
        }

        if let Some(rule) = lookup("AGGSYNC_CLOCK_RULE") {
            config.clock_rule = parse_var("AGGSYNC_CLOCK_RULE", &rule)?;
        }

        Ok(config)
    }

    /// Apply the optional positional port argument.
    ///
    /// # Errors
    ///
    /// Returns error if the argument is not a valid port.
    pub fn with_port_arg(mut self, arg: Option<&str>) -> Result<Self> {
        if let Some(port) = arg {
            self.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid port argument '{port}'"))?;
        }
        Ok(self)
    }

    /// Socket address to listen on.
    #[must_use]
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// Settings for the aggregator state.
    #[must_use]
    pub fn aggregator_settings(&self) -> AggregatorSettings {
        AggregatorSettings {
            eviction_window: self.eviction_window,
            clock_rule: self.clock_rule,
        }
    }

    /// Limits for request parsing.
    #[must_use]
    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            max_body_bytes: self.max_body_bytes,
            ..FrameLimits::default()
        }
    }
}

fn parse_var<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("Invalid {key} value '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 4567);
        assert_eq!(config.eviction_window, Duration::from_secs(30));
        assert_eq!(config.clock_rule, ClockRule::Lamport);
        assert_eq!(config.listen_addr().to_string(), "0.0.0.0:4567");
    }

    #[test]
    fn overrides_from_lookup() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("AGGSYNC_BIND_ADDR", "127.0.0.1"),
            ("AGGSYNC_PORT", "8080"),
            ("AGGSYNC_EVICTION_SECS", "5"),
            ("AGGSYNC_READ_TIMEOUT_SECS", "2"),
            ("AGGSYNC_MAX_BODY_BYTES", "1024"),
            ("AGGSYNC_CLOCK_RULE", "additive"),
        ]))
        .unwrap();

        assert_eq!(config.listen_addr().to_string(), "127.0.0.1:8080");
        assert_eq!(config.eviction_window, Duration::from_secs(5));
        assert_eq!(config.read_timeout, Duration::from_secs(2));
        assert_eq!(config.frame_limits().max_body_bytes, 1024);
        assert_eq!(config.aggregator_settings().clock_rule, ClockRule::Additive);
    }

    #[test]
    fn invalid_values_are_errors() {
        assert!(ServerConfig::from_lookup(lookup(&[("AGGSYNC_PORT", "99999")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("AGGSYNC_EVICTION_SECS", "0")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("AGGSYNC_CLOCK_RULE", "vector")])).is_err());
    }

    #[test]
    fn port_argument_wins() {
        let config = ServerConfig::from_lookup(lookup(&[("AGGSYNC_PORT", "8080")]))
            .unwrap()
            .with_port_arg(Some("9000"))
            .unwrap();
        assert_eq!(config.port, 9000);

        assert!(ServerConfig::default().with_port_arg(Some("abc")).is_err());
        assert_eq!(
            ServerConfig::default().with_port_arg(None).unwrap().port,
            DEFAULT_PORT
        );
    }
}
