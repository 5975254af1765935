//! Endpoint configuration.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{DurationSecondsWithFrac, serde_as};

use crate::errors::Error;

/// Addresses, intervals and limits for both endpoint workers.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use bulb_endpoint::EndpointConfig;
///
/// let config = EndpointConfig::from_json(r#"{"publish_interval": 0.5}"#).unwrap();
/// assert_eq!(config.publish_interval.as_millis(), 500);
/// assert_eq!(config.command_addr.port(), 54321);
/// ```
#[serde_as]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EndpointConfig {
    /// Where telemetry datagrams are sent.
    pub telemetry_addr: SocketAddr,
    /// Where the command listener binds.
    pub command_addr: SocketAddr,
    /// Delay between two telemetry datagrams.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub publish_interval: Duration,
    /// Delay before the listener retries after a fault or a disconnect.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub backoff: Duration,
    /// Pending connection queue length.
    pub backlog: u32,
    /// Bytes requested per read on the command connection.
    pub read_buffer_size: usize,
    /// Consecutive read errors after which the connection is dropped.
    pub max_consecutive_read_errors: u32,
    /// Largest incomplete message kept while waiting for more bytes.
    pub max_frame_len: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            telemetry_addr: SocketAddrV4::new(Ipv4Addr::LOCALHOST, Self::TELEMETRY_PORT).into(),
            command_addr: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, Self::COMMAND_PORT).into(),
            publish_interval: Duration::from_secs(2),
            backoff: Duration::from_secs(3),
            backlog: 5,
            read_buffer_size: 1024,
            max_consecutive_read_errors: 5,
            max_frame_len: 64 * 1024,
        }
    }
}

impl EndpointConfig {
    pub const TELEMETRY_PORT: u16 = 12345;
    pub const COMMAND_PORT: u16 = 54321;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(Error::JsonLoad)
    }

    pub fn telemetry_addr(mut self, addr: SocketAddr) -> Self {
        self.telemetry_addr = addr;
        self
    }

    pub fn command_addr(mut self, addr: SocketAddr) -> Self {
        self.command_addr = addr;
        self
    }

    pub fn publish_interval(mut self, interval: Duration) -> Self {
        self.publish_interval = interval;
        self
    }

    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_consecutive_read_errors(mut self, max: u32) -> Self {
        self.max_consecutive_read_errors = max;
        self
    }

    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }
}
