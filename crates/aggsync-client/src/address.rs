//! Aggregator address parsing.
//!
//! Accepted forms:
//!
//! - `http://host:port` (any scheme; only host and port are used)
//! - `host:port`
//! - `host`
//! - `:port` (host defaults to `localhost`)

use std::fmt;
use url::Url;

/// Default aggregator port.
pub const DEFAULT_PORT: u16 = 4567;

const DEFAULT_HOST: &str = "localhost";

/// Host and port of an aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    /// Host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerAddress {
    /// Create an address from parts.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse any of the accepted address forms.
    ///
    /// # Errors
    ///
    /// Returns error if the URL is malformed, the port is not a number, or
    /// there are too many `:` separators.
    ///
    /// # Examples
    ///
    /// ```
    /// use aggsync_client::ServerAddress;
    ///
    /// let addr = ServerAddress::parse("http://weather.local:8080").unwrap();
    /// assert_eq!(addr, ServerAddress::new("weather.local", 8080));
    ///
    /// let addr = ServerAddress::parse("weather.local").unwrap();
    /// assert_eq!(addr.port, 4567);
    /// ```
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(Self::default());
        }

        if input.contains("://") {
            let url = Url::parse(input).map_err(|e| AddressError::InvalidUrl {
                input: input.to_string(),
                reason: e.to_string(),
            })?;
            let host = url
                .host_str()
                .filter(|h| !h.is_empty())
                .ok_or_else(|| AddressError::MissingHost(input.to_string()))?;
            // `Url::port` hides the scheme's default port, so use the
            // aggregator default instead of 80/443.
            let port = url.port().unwrap_or(DEFAULT_PORT);
            return Ok(Self::new(host.trim_matches(&['[', ']'][..]), port));
        }

        let mut parts = input.split(':');
        let host = parts
            .next()
            .filter(|h| !h.is_empty())
            .unwrap_or(DEFAULT_HOST);
        let port = match parts.next() {
            None => DEFAULT_PORT,
            Some(port) => port.parse().map_err(|_| AddressError::InvalidPort {
                input: input.to_string(),
                port: port.to_string(),
            })?,
        };
        if parts.next().is_some() {
            return Err(AddressError::TooManySeparators(input.to_string()));
        }

        Ok(Self::new(host, port))
    }

    /// Base URL used for HTTP requests.
    #[must_use]
    pub fn base_url(&self) -> String {
        if self.host.contains(':') {
            format!("http://[{}]:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl std::str::FromStr for ServerAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Errors from address parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// URL form could not be parsed
    #[error("invalid URL '{input}': {reason}")]
    InvalidUrl {
        /// Original input
        input: String,
        /// Parser message
        reason: String,
    },
    /// URL form had no host
    #[error("missing host in '{0}'")]
    MissingHost(String),
    /// Port was not a valid number
    #[error("invalid port '{port}' in '{input}'")]
    InvalidPort {
        /// Original input
        input: String,
        /// Offending port text
        port: String,
    },
    /// More than one `:` outside a URL
    #[error("too many ':' separators in '{0}'")]
    TooManySeparators(String),
}
