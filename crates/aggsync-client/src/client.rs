//! HTTP client for the aggregator.
//!
//! The aggregator speaks HTTP/1.1-compatible frames, so a regular HTTP
//! client works as long as the `Lamport-Clock` header is carried both ways.

use crate::address::ServerAddress;
use aggsync_core::{ClockRule, LamportClock, Reading, Snapshot};
use aggsync_proto::{decode_snapshot, encode_reading, Status, CLOCK_HEADER};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;

/// Path used for both reading and writing aggregated data.
const DATA_PATH: &str = "/data";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Aggregator address
    pub address: ServerAddress,
    /// Request timeout
    pub timeout: Duration,
    /// Rule for reconciling the aggregator's clock values
    pub clock_rule: ClockRule,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: ServerAddress::default(),
            timeout: Duration::from_secs(30),
            clock_rule: ClockRule::Lamport,
        }
    }
}

/// Reply to a PUT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutReply {
    /// 201 on first write, 200 on update, 204 for an empty reading
    pub status: Status,
    /// Aggregator clock carried by the reply
    pub server_clock: Option<u64>,
    /// Local clock after reconciling
    pub local_clock: u64,
}

/// Reply to a GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetReply {
    /// Merged key/value state
    pub data: Snapshot,
    /// Aggregator clock carried by the reply
    pub server_clock: Option<u64>,
    /// Local clock after reconciling
    pub local_clock: u64,
}

/// Producer/consumer client with its own Lamport clock.
pub struct AggClient {
    client: Client,
    config: ClientConfig,
    clock: LamportClock,
}

impl AggClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Init(e.to_string()))?;

        Ok(Self {
            client,
            clock: LamportClock::with_rule(config.clock_rule),
            config,
        })
    }

    /// Aggregator this client talks to.
    #[must_use]
    pub fn address(&self) -> &ServerAddress {
        &self.config.address
    }

    /// Current local clock value.
    #[must_use]
    pub fn clock(&self) -> u64 {
        self.clock.snapshot()
    }

    fn url(&self) -> String {
        format!("{}{DATA_PATH}", self.config.address.base_url())
    }

    /// Reconcile with the clock header of a reply, if it carried one.
    fn observe(&mut self, headers: &HeaderMap) -> Option<u64> {
        let received = headers
            .get(CLOCK_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        self.clock.observe(received);
        received
    }

    /// Push a reading to the aggregator.
    ///
    /// An empty reading is sent without a body, which the aggregator answers
    /// with 204.
    ///
    /// # Errors
    ///
    /// Returns error on network failure or a non-success status.
    pub async fn put(&mut self, reading: &Reading) -> Result<PutReply, ClientError> {
        let sent = self.clock.tick();
        let url = self.url();

        let mut request = self.client.put(&url).header(CLOCK_HEADER, sent.to_string());
        if !reading.is_empty() {
            let body = encode_reading(reading).map_err(|e| ClientError::Encode(e.to_string()))?;
            request = request.header(CONTENT_TYPE, "application/json").body(body);
        }

        tracing::debug!(url, clock = sent, pairs = reading.len(), "PUT reading");

        let response = request
            .send()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;

        let server_clock = self.observe(response.headers());
        let code = response.status().as_u16();
        let status = Status::from_code(code);

        match status {
            Some(status @ (Status::Ok | Status::Created | Status::NoContent)) => Ok(PutReply {
                status,
                server_clock,
                local_clock: self.clock.snapshot(),
            }),
            _ => Err(ClientError::ApiError {
                status: code,
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Fetch the merged state.
    ///
    /// # Errors
    ///
    /// Returns error on network failure, a non-200 status, or a body that is
    /// not a flat JSON object.
    pub async fn get(&mut self) -> Result<GetReply, ClientError> {
        let sent = self.clock.tick();
        let url = self.url();

        tracing::debug!(url, clock = sent, "GET data");

        let response = self
            .client
            .get(&url)
            .header(CLOCK_HEADER, sent.to_string())
            .send()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;

        let server_clock = self.observe(response.headers());

        if response.status().as_u16() != Status::Ok.code() {
            return Err(ClientError::ApiError {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;
        let data = decode_snapshot(&body).map_err(|e| ClientError::Parse(e.to_string()))?;

        Ok(GetReply {
            data,
            server_clock,
            local_clock: self.clock.snapshot(),
        })
    }
}

/// Errors that can occur with the aggregator client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// Client initialization failed
    #[error("client init error: {0}")]
    Init(String),
    /// Reading could not be encoded
    #[error("encode error: {0}")]
    Encode(String),
    /// HTTP request failed
    #[error("request error: {0}")]
    Request(String),
    /// Aggregator returned an error status
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Message body from the aggregator
        message: String,
    },
    /// Response parsing failed
    #[error("parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.address, ServerAddress::new("localhost", 4567));
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.clock_rule, ClockRule::Lamport);
    }

    #[test]
    fn client_creation() {
        let client = AggClient::new(ClientConfig::default()).unwrap();
        assert_eq!(client.clock(), 0);
        assert_eq!(client.url(), "http://localhost:4567/data");
    }

    #[test]
    fn observe_reconciles_with_header() {
        let mut client = AggClient::new(ClientConfig::default()).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("lamport-clock", "41".parse().unwrap());
        assert_eq!(client.observe(&headers), Some(41));
        assert_eq!(client.clock(), 42);

        // Malformed or missing headers leave the clock alone
        let mut bad = HeaderMap::new();
        bad.insert("lamport-clock", "soon".parse().unwrap());
        assert_eq!(client.observe(&bad), None);
        assert_eq!(client.observe(&HeaderMap::new()), None);
        assert_eq!(client.clock(), 42);
    }
}
