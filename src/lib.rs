//! # bulb_endpoint
//!
//! The network side of a smart bulb: it reports its state over UDP and takes
//! control commands over TCP.
//!
//! This crate provides a **runtime-agnostic** async endpoint built from two
//! workers that share one device:
//!
//! - the **telemetry publisher** sends a JSON snapshot of the device as one UDP
//!   datagram every interval (2 s by default), fire-and-forget;
//! - the **command listener** accepts one TCP client at a time, decodes the JSON
//!   commands it sends and applies them to the device. It tears its socket down
//!   after every client and retries after a fixed backoff (3 s) on any fault.
//!
//! ## Quick Start
//!
//! ```ignore
//! use bulb_endpoint::{Bulb, Endpoint, EndpointConfig, SharedBulb};
//!
//! async fn serve() -> Result<(), bulb_endpoint::Error> {
//!     let bulb = SharedBulb::with_id(1);
//!     let endpoint = Endpoint::start(EndpointConfig::default(), bulb.clone());
//!
//!     // A client sends {"command":2,"value":75} to TCP port 54321 ...
//!     // ... and the next datagram on UDP 127.0.0.1:12345 reports intensity 75.
//!
//!     endpoint.stop().await
//! }
//! ```
//!
//! ## Wire Formats
//!
//! Telemetry datagrams carry `{"id":int,"on":bool,"intensity":int,"color":int}`.
//!
//! Commands are JSON objects `{"command":int,"value":int}`, one after another
//! on the stream, ideally newline-terminated:
//!
//! | command | effect |
//! |---|---|
//! | 0 | set the id |
//! | 1 | power, nonzero is on |
//! | 2 | intensity, clamped to 0-100 |
//! | 3 | color by [`Color`] code; unknown codes are rejected |
//!
//! Anything else is ignored. Malformed input is logged and skipped.
//!
//! ## Runtime Selection
//!
//! Select your preferred runtime using feature flags:
//!
//! - `runtime-tokio` (default): Use the tokio async runtime
//! - `runtime-async-std`: Use the async-std runtime
//! - `runtime-smol`: Use the smol runtime
//!
//! ## Logging
//!
//! Everything is reported through the [`log`] facade; install any logger to see it.

mod command;
mod config;
mod device;
mod endpoint;
mod errors;
mod framing;
mod history;
mod listener;
pub mod runtime;
pub mod shutdown;
mod telemetry;
mod types;

// Re-export public API
pub use command::{ApplyOutcome, CommandKind, CommandRecord, Field, apply};
pub use config::EndpointConfig;
pub use device::{Bulb, BulbState, SharedBulb};
pub use endpoint::Endpoint;
pub use errors::Error;
pub use framing::{CommandDecoder, Frame};
pub use history::{HistoryEntry, HistorySummary, MessageHistory, MessageType};
pub use listener::{CommandListener, ListenerDiagnostics, ListenerPhase};
pub use telemetry::{PublisherDiagnostics, TelemetryPublisher, TelemetryRecord};
pub use types::{Color, Intensity, PowerMode};
