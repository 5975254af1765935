//! Periodic telemetry over UDP.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use crate::config::EndpointConfig;
use crate::device::{Bulb, lock};
use crate::errors::Error;
use crate::history::{MessageHistory, MessageType};
use crate::runtime::{self, AsyncUdpSocket, Mutex, UdpSocket};
use crate::shutdown::Shutdown;

type Result<T> = std::result::Result<T, Error>;

/// One state report, as sent on the wire.
///
/// ```
/// use bulb_endpoint::TelemetryRecord;
///
/// let record = TelemetryRecord { id: 4, on: true, intensity: 75, color: 2 };
/// let json = record.to_json().unwrap();
/// assert_eq!(json, r#"{"id":4,"on":true,"intensity":75,"color":2}"#);
/// assert_eq!(TelemetryRecord::from_json(json.as_bytes()).unwrap(), record);
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub id: i64,
    pub on: bool,
    pub intensity: u8,
    pub color: u8,
}

impl TelemetryRecord {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::JsonDump)
    }

    pub fn from_json(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(Error::JsonLoad)
    }
}

/// Counters for the publisher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublisherDiagnostics {
    pub running: bool,
    pub datagrams_sent: u64,
    pub send_failures: u64,
    pub last_error: Option<String>,
}

/// Sends a snapshot of the device to a fixed peer at a fixed interval.
pub struct TelemetryPublisher {
    device: Arc<dyn Bulb>,
    destination: SocketAddr,
    interval: Duration,
    history: Arc<Mutex<MessageHistory>>,
    diagnostics: Arc<StdMutex<PublisherDiagnostics>>,
}

impl TelemetryPublisher {
    pub fn new(
        device: Arc<dyn Bulb>,
        config: &EndpointConfig,
        history: Arc<Mutex<MessageHistory>>,
    ) -> Self {
        TelemetryPublisher {
            device,
            destination: config.telemetry_addr,
            interval: config.publish_interval,
            history,
            diagnostics: Arc::new(StdMutex::new(PublisherDiagnostics::default())),
        }
    }

    pub fn diagnostics(&self) -> PublisherDiagnostics {
        lock(&self.diagnostics).clone()
    }

    /// Publish until `shutdown` fires.
    ///
    /// Only failing to open the outbound socket ends the loop with an error;
    /// send failures are logged and the next cycle runs as usual.
    pub async fn run(&self, shutdown: Shutdown) -> Result<()> {
        let socket = UdpSocket::bind(unspecified_for(&self.destination))
            .await
            .map_err(|e| {
                let err = Error::socket("bind", e);
                error!("Telemetry socket setup failed: {}", err);
                lock(&self.diagnostics).last_error = Some(err.to_string());
                err
            })?;

        info!(
            "Publishing telemetry to {} every {:?}",
            self.destination, self.interval
        );
        lock(&self.diagnostics).running = true;

        while !shutdown.is_triggered() {
            match shutdown.guard(self.publish_once(&socket)).await {
                Some(Ok(record)) => debug!("Published telemetry: {:?}", record),
                Some(Err(e)) => {
                    error!("Telemetry send to {} failed: {}", self.destination, e);
                    self.history.lock().await.record_error(&e.to_string());
                    let mut diagnostics = lock(&self.diagnostics);
                    diagnostics.send_failures += 1;
                    diagnostics.last_error = Some(e.to_string());
                }
                None => break,
            }

            if shutdown.guard(runtime::sleep(self.interval)).await.is_none() {
                break;
            }
        }

        lock(&self.diagnostics).running = false;
        info!("Telemetry publisher stopped");
        Ok(())
    }

    /// Snapshot the device and send one datagram.
    pub async fn publish_once(&self, socket: &UdpSocket) -> Result<TelemetryRecord> {
        let record = self.device.snapshot();
        let payload = record.to_json()?;

        socket
            .send_to(payload.as_bytes(), self.destination)
            .await
            .map_err(|e| Error::socket("send_to", e))?;

        lock(&self.diagnostics).datagrams_sent += 1;
        if let Ok(message) = serde_json::to_value(record) {
            self.history
                .lock()
                .await
                .record(MessageType::Telemetry, message);
        }
        Ok(record)
    }
}

fn unspecified_for(destination: &SocketAddr) -> SocketAddr {
    match destination {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    }
}

#[cfg(all(test, feature = "runtime-tokio"))]
mod tests {
    use super::*;
    use crate::device::SharedBulb;
    use crate::shutdown;
    use crate::types::{Color, Intensity, PowerMode};

    async fn receiver() -> (tokio::net::UdpSocket, SocketAddr) {
        let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    async fn next_record(socket: &tokio::net::UdpSocket) -> TelemetryRecord {
        let mut buffer = [0u8; 1024];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buffer))
            .await
            .expect("no telemetry datagram")
            .unwrap();
        TelemetryRecord::from_json(&buffer[..len]).unwrap()
    }

    fn publisher(bulb: &SharedBulb, destination: SocketAddr, interval: Duration) -> TelemetryPublisher {
        let config = EndpointConfig::new()
            .telemetry_addr(destination)
            .publish_interval(interval);
        TelemetryPublisher::new(
            Arc::new(bulb.clone()),
            &config,
            Arc::new(Mutex::new(MessageHistory::new())),
        )
    }

    #[test]
    fn test_wire_field_names() {
        let json = TelemetryRecord { id: 1, on: false, intensity: 0, color: 4 }
            .to_json()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        for key in ["id", "on", "intensity", "color"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[tokio::test]
    async fn test_publish_once_round_trip() {
        let (rx, addr) = receiver().await;
        let bulb = SharedBulb::with_id(21);
        bulb.set_power(PowerMode::On);
        bulb.set_intensity(Intensity::clamped(64));
        bulb.set_color(Color::Blue);

        let publisher = publisher(&bulb, addr, Duration::from_secs(2));
        let socket = UdpSocket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let sent = publisher.publish_once(&socket).await.unwrap();

        let received = next_record(&rx).await;
        assert_eq!(received, sent);
        assert_eq!(received, TelemetryRecord::from(&bulb.state()));
        assert_eq!(publisher.diagnostics().datagrams_sent, 1);
        assert_eq!(
            publisher.history.lock().await.summary().telemetry_count,
            1
        );
    }

    #[tokio::test]
    async fn test_run_publishes_until_shutdown() {
        let (rx, addr) = receiver().await;
        let bulb = SharedBulb::with_id(5);
        let publisher = Arc::new(publisher(&bulb, addr, Duration::from_millis(20)));
        let (trigger, signal) = shutdown::channel();

        let task = {
            let publisher = Arc::clone(&publisher);
            runtime::spawn(async move { publisher.run(signal).await })
        };

        assert_eq!(next_record(&rx).await.id, 5);
        bulb.set_id(6);
        // Skip datagrams that raced with the update
        let mut record = next_record(&rx).await;
        while record.id != 6 {
            record = next_record(&rx).await;
        }

        trigger.trigger();
        task.await.unwrap();
        let diagnostics = publisher.diagnostics();
        assert!(!diagnostics.running);
        assert!(diagnostics.datagrams_sent >= 2);
    }

    #[tokio::test]
    async fn test_send_failures_do_not_stop_the_loop() {
        // Broadcast without SO_BROADCAST is refused by the kernel
        let bulb = SharedBulb::default();
        let publisher = Arc::new(publisher(
            &bulb,
            "255.255.255.255:9".parse().unwrap(),
            Duration::from_millis(10),
        ));
        let (trigger, signal) = shutdown::channel();
        let task = {
            let publisher = Arc::clone(&publisher);
            runtime::spawn(async move { publisher.run(signal).await })
        };

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while publisher.diagnostics().send_failures < 3 {
            assert!(tokio::time::Instant::now() < deadline, "no send failures recorded");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(publisher.diagnostics().running);
        assert!(publisher.history.lock().await.last_error().is_some());

        trigger.trigger();
        assert!(task.await.is_ok());
        assert_eq!(publisher.diagnostics().datagrams_sent, 0);
    }
}
