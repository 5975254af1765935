//! Command intake over TCP.
//!
//! The listener serves one client at a time. Every iteration of its loop
//! creates, binds and listens on a fresh socket, accepts a single connection,
//! serves it until the peer goes away, then tears everything down and waits
//! one backoff before starting over. Setup and accept faults take the same
//! backoff-and-retry path, so the listener never gives up on its own.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::command::{self, ApplyOutcome};
use crate::config::EndpointConfig;
use crate::device::{Bulb, lock};
use crate::errors::Error;
use crate::framing::{CommandDecoder, Frame};
use crate::history::{MessageHistory, MessageType};
use crate::runtime::{self, AsyncTcpListener, AsyncTcpStream, Mutex, TcpListener};
use crate::shutdown::Shutdown;

/// Where the listener currently is in its cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListenerPhase {
    /// Creating, binding and listening on a new socket
    #[default]
    Init,
    /// Waiting for a client
    Accepting,
    /// Reading commands from a connected client
    Serving,
    /// Waiting before the next attempt
    BackingOff,
    /// Shut down
    Stopped,
}

/// Counters and state for the listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListenerDiagnostics {
    pub phase: ListenerPhase,
    pub bound_addr: Option<SocketAddr>,
    pub peer: Option<SocketAddr>,
    /// Successful create/bind/listen cycles
    pub listens: u64,
    pub sessions: u64,
    pub setup_faults: u64,
    pub accept_faults: u64,
    pub read_faults: u64,
    pub backoffs: u64,
    pub commands_applied: u64,
    pub commands_ignored: u64,
    pub commands_rejected: u64,
    pub malformed_messages: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    PeerClosed,
    ReadFaults,
    Shutdown,
}

/// Accepts command connections and applies what they send to the device.
pub struct CommandListener {
    device: Arc<dyn Bulb>,
    config: EndpointConfig,
    history: Arc<Mutex<MessageHistory>>,
    diagnostics: Arc<StdMutex<ListenerDiagnostics>>,
}

impl CommandListener {
    pub fn new(
        device: Arc<dyn Bulb>,
        config: EndpointConfig,
        history: Arc<Mutex<MessageHistory>>,
    ) -> Self {
        CommandListener {
            device,
            config,
            history,
            diagnostics: Arc::new(StdMutex::new(ListenerDiagnostics::default())),
        }
    }

    pub fn diagnostics(&self) -> ListenerDiagnostics {
        lock(&self.diagnostics).clone()
    }

    /// Serve clients until `shutdown` fires.
    pub async fn run(&self, shutdown: Shutdown) {
        self.run_on::<TcpListener>(shutdown).await
    }

    async fn run_on<L: AsyncTcpListener>(&self, shutdown: Shutdown) {
        let addr = self.config.command_addr;
        let mut decoder = CommandDecoder::new(self.config.max_frame_len);

        while !shutdown.is_triggered() {
            self.update(|d| d.phase = ListenerPhase::Init);

            let listener = match L::listen(addr, self.config.backlog).await {
                Ok(listener) => listener,
                Err(fault) => {
                    let err = Error::from(fault);
                    error!("Command listener setup on {} failed: {}", addr, err);
                    self.update(|d| {
                        d.setup_faults += 1;
                        d.last_error = Some(err.to_string());
                    });
                    if !self.backoff(&shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            let bound = listener.local_addr().ok();
            info!("Listening for commands on {}", bound.unwrap_or(addr));
            self.update(|d| {
                d.phase = ListenerPhase::Accepting;
                d.bound_addr = bound;
                d.listens += 1;
            });

            let Some(accepted) = shutdown.guard(listener.accept()).await else {
                break;
            };
            let (stream, peer) = match accepted {
                Ok(connection) => connection,
                Err(e) => {
                    let err = Error::socket("accept", e);
                    error!("Accepting command connection failed: {}", err);
                    drop(listener);
                    self.update(|d| {
                        d.accept_faults += 1;
                        d.bound_addr = None;
                        d.last_error = Some(err.to_string());
                    });
                    if !self.backoff(&shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            info!("Accepted command connection from {}", peer);
            self.update(|d| {
                d.phase = ListenerPhase::Serving;
                d.peer = Some(peer);
                d.sessions += 1;
            });

            decoder.reset();
            let end = self.serve(stream, &mut decoder, &shutdown).await;
            drop(listener);
            self.update(|d| {
                d.peer = None;
                d.bound_addr = None;
            });

            if end == SessionEnd::Shutdown || !self.backoff(&shutdown).await {
                break;
            }
        }

        self.update(|d| {
            d.phase = ListenerPhase::Stopped;
            d.bound_addr = None;
            d.peer = None;
        });
        info!("Command listener stopped");
    }

    async fn serve<S: AsyncTcpStream>(
        &self,
        mut stream: S,
        decoder: &mut CommandDecoder,
        shutdown: &Shutdown,
    ) -> SessionEnd {
        let mut buffer = vec![0u8; self.config.read_buffer_size.max(1)];
        let max_errors = self.config.max_consecutive_read_errors.max(1);
        let mut consecutive_errors = 0;

        loop {
            let Some(read) = shutdown.guard(stream.read(&mut buffer)).await else {
                return SessionEnd::Shutdown;
            };

            match read {
                Ok(0) => {
                    info!("Command connection closed by peer");
                    return SessionEnd::PeerClosed;
                }
                Ok(len) => {
                    consecutive_errors = 0;
                    self.handle_chunk(&buffer[..len], decoder).await;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    let err = Error::socket("read", e);
                    error!("Reading command connection failed: {}", err);
                    self.update(|d| {
                        d.read_faults += 1;
                        d.last_error = Some(err.to_string());
                    });
                    if consecutive_errors >= max_errors {
                        warn!(
                            "Dropping command connection after {} consecutive read errors",
                            consecutive_errors
                        );
                        return SessionEnd::ReadFaults;
                    }
                }
            }
        }
    }

    async fn handle_chunk(&self, chunk: &[u8], decoder: &mut CommandDecoder) {
        info!(
            "Received command message: {}",
            String::from_utf8_lossy(chunk).trim_end()
        );

        for frame in decoder.push(chunk) {
            match frame {
                Frame::Command(record) => {
                    self.history
                        .lock()
                        .await
                        .record(MessageType::Command, json!(record));

                    match command::apply(self.device.as_ref(), &record) {
                        ApplyOutcome::Applied(field) => {
                            debug!("Command {} set {} to {}", record.command, field, record.value);
                            self.update(|d| d.commands_applied += 1);
                        }
                        ApplyOutcome::Ignored(selector) => {
                            debug!("Ignoring unknown command {}", selector);
                            self.update(|d| d.commands_ignored += 1);
                        }
                        ApplyOutcome::Rejected(err) => {
                            warn!("Rejected command {}: {}", record.command, err);
                            self.update(|d| {
                                d.commands_rejected += 1;
                                d.last_error = Some(err.to_string());
                            });
                        }
                    }
                }
                Frame::Empty => debug!("Skipping empty command message"),
                Frame::Malformed(err) => {
                    warn!("Discarding malformed command message: {}", err);
                    self.history.lock().await.record_error(&err.to_string());
                    self.update(|d| {
                        d.malformed_messages += 1;
                        d.last_error = Some(err.to_string());
                    });
                }
            }
        }
    }

    /// Wait one backoff. Returns false if shut down meanwhile.
    async fn backoff(&self, shutdown: &Shutdown) -> bool {
        self.update(|d| {
            d.phase = ListenerPhase::BackingOff;
            d.backoffs += 1;
        });
        debug!("Retrying command listener in {:?}", self.config.backoff);
        shutdown
            .guard(runtime::sleep(self.config.backoff))
            .await
            .is_some()
    }

    fn update(&self, f: impl FnOnce(&mut ListenerDiagnostics)) {
        let mut diagnostics = lock(&self.diagnostics);
        f(&mut *diagnostics);
    }
}

#[cfg(all(test, feature = "runtime-tokio"))]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    use crate::device::{BulbState, SharedBulb};
    use crate::runtime::SetupFault;
    use crate::shutdown::{self, ShutdownTrigger};
    use crate::types::{Color, Intensity};

    struct Harness {
        bulb: SharedBulb,
        listener: Arc<CommandListener>,
        trigger: ShutdownTrigger,
        task: runtime::JoinHandle<()>,
    }

    impl Harness {
        fn start(config: EndpointConfig, bulb: SharedBulb) -> Self {
            Self::start_on::<TcpListener>(config, bulb)
        }

        fn start_on<L: AsyncTcpListener + 'static>(
            config: EndpointConfig,
            bulb: SharedBulb,
        ) -> Self {
            let listener = Arc::new(command_listener(config, &bulb));
            let (trigger, signal) = shutdown::channel();
            let task = {
                let listener = Arc::clone(&listener);
                runtime::spawn(async move { listener.run_on::<L>(signal).await })
            };
            Harness {
                bulb,
                listener,
                trigger,
                task,
            }
        }

        async fn wait_for(&self, what: &str, f: impl Fn(&ListenerDiagnostics) -> bool) {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
            loop {
                let diagnostics = self.listener.diagnostics();
                if f(&diagnostics) {
                    return;
                }
                assert!(
                    tokio::time::Instant::now() < deadline,
                    "timed out waiting for {what}: {diagnostics:?}"
                );
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        /// Wait for the next accepting listener and connect to it.
        async fn connect(&self) -> TcpStream {
            self.wait_for("accepting listener", |d| {
                d.phase == ListenerPhase::Accepting && d.bound_addr.is_some()
            })
            .await;
            let addr = self.listener.diagnostics().bound_addr.unwrap();
            TcpStream::connect(addr).await.unwrap()
        }

        async fn stop(self) {
            self.trigger.trigger();
            tokio::time::timeout(Duration::from_secs(5), self.task)
                .await
                .expect("listener did not stop");
        }
    }

    fn command_listener(config: EndpointConfig, bulb: &SharedBulb) -> CommandListener {
        CommandListener::new(
            Arc::new(bulb.clone()),
            config,
            Arc::new(Mutex::new(MessageHistory::new())),
        )
    }

    /// Replays canned reads, then reports the peer as closed.
    struct ScriptedStream {
        reads: VecDeque<io::Result<Vec<u8>>>,
    }

    impl ScriptedStream {
        fn new(reads: impl IntoIterator<Item = io::Result<Vec<u8>>>) -> Self {
            ScriptedStream {
                reads: reads.into_iter().collect(),
            }
        }
    }

    impl AsyncTcpStream for ScriptedStream {
        async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }
    }

    fn read_failure() -> io::Result<Vec<u8>> {
        Err(io::Error::other("connection reset"))
    }

    /// Listens fine but fails every accept.
    struct RefusingListener;

    impl AsyncTcpListener for RefusingListener {
        type Stream = ScriptedStream;

        async fn listen(_addr: SocketAddr, _backlog: u32) -> Result<Self, SetupFault> {
            Ok(RefusingListener)
        }

        async fn accept(&self) -> io::Result<(ScriptedStream, SocketAddr)> {
            Err(io::Error::other("too many open files"))
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok(SocketAddr::from(([127, 0, 0, 1], 54321)))
        }
    }

    fn test_config() -> EndpointConfig {
        EndpointConfig::new()
            .command_addr("127.0.0.1:0".parse().unwrap())
            .backoff(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_command_sequence() {
        let harness = Harness::start(test_config(), SharedBulb::with_id(42));
        let mut client = harness.connect().await;

        client.write_all(b"{\"command\":1,\"value\":1}\n").await.unwrap();
        client.write_all(b"{\"command\":2,\"value\":75}\n").await.unwrap();
        client.write_all(b"{\"command\":3,\"value\":2}\n").await.unwrap();

        harness
            .wait_for("three commands", |d| d.commands_applied == 3)
            .await;
        assert_eq!(
            harness.bulb.state(),
            BulbState {
                id: 42,
                on: true,
                intensity: Intensity::clamped(75),
                color: Color::Green,
            }
        );

        drop(client);
        harness.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_input_is_survivable() {
        let bulb = SharedBulb::with_id(1);
        let before = bulb.state();
        let harness = Harness::start(test_config(), bulb);
        let mut client = harness.connect().await;

        client.write_all(b"definitely not json\n").await.unwrap();
        client.write_all(b"{\"command\":3,\"value\":99}\n").await.unwrap();
        client.write_all(b"{\"command\":8,\"value\":1}\n{}\n").await.unwrap();
        harness
            .wait_for("malformed, rejected and ignored", |d| {
                d.malformed_messages == 1 && d.commands_rejected == 1 && d.commands_ignored == 1
            })
            .await;
        assert_eq!(harness.bulb.state(), before);

        // Same connection still serves
        client.write_all(b"{\"command\":0,\"value\":9}\n").await.unwrap();
        harness.wait_for("id command", |d| d.commands_applied == 1).await;
        assert_eq!(harness.bulb.id(), 9);
        assert_eq!(harness.listener.diagnostics().sessions, 1);

        drop(client);
        harness.stop().await;
    }

    #[tokio::test]
    async fn test_disconnect_rebuilds_listener() {
        let harness = Harness::start(test_config(), SharedBulb::default());

        let client = harness.connect().await;
        harness.wait_for("first session", |d| d.sessions == 1).await;
        drop(client);

        harness
            .wait_for("second listen cycle", |d| {
                d.listens == 2 && d.phase == ListenerPhase::Accepting
            })
            .await;
        let diagnostics = harness.listener.diagnostics();
        assert_eq!(diagnostics.backoffs, 1);
        assert!(diagnostics.peer.is_none());

        let mut client = harness.connect().await;
        client.write_all(b"{\"command\":2,\"value\":10}\n").await.unwrap();
        harness.wait_for("second session", |d| d.commands_applied == 1).await;
        assert_eq!(harness.bulb.intensity().value(), 10);
        assert_eq!(harness.listener.diagnostics().sessions, 2);

        drop(client);
        harness.stop().await;
    }

    #[tokio::test]
    async fn test_port_in_use_backs_off_until_free() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = blocker.local_addr().unwrap();
        let harness = Harness::start(test_config().command_addr(addr), SharedBulb::default());

        harness.wait_for("repeated setup faults", |d| d.setup_faults >= 2).await;
        let diagnostics = harness.listener.diagnostics();
        assert_eq!(diagnostics.listens, 0);
        // One backoff per fault; the latest may still be pending
        assert!(diagnostics.backoffs <= diagnostics.setup_faults);
        assert!(diagnostics.backoffs + 1 >= diagnostics.setup_faults);

        drop(blocker);
        harness
            .wait_for("listener after port freed", |d| {
                d.phase == ListenerPhase::Accepting
            })
            .await;
        let diagnostics = harness.listener.diagnostics();
        assert_eq!(diagnostics.bound_addr, Some(addr));
        assert_eq!(diagnostics.backoffs, diagnostics.setup_faults);

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_split_message_across_writes() {
        let harness = Harness::start(test_config(), SharedBulb::default());
        let mut client = harness.connect().await;

        client.write_all(b"{\"command\":2,").await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(b"\"value\":55}\n").await.unwrap();

        harness.wait_for("joined command", |d| d.commands_applied == 1).await;
        assert_eq!(harness.bulb.intensity().value(), 55);

        drop(client);
        harness.stop().await;
    }

    #[tokio::test]
    async fn test_shutdown_while_accepting() {
        let harness = Harness::start(test_config(), SharedBulb::default());
        harness
            .wait_for("accepting", |d| d.phase == ListenerPhase::Accepting)
            .await;
        let listener = Arc::clone(&harness.listener);
        // accept() blocks without a timeout; only the signal ends it
        harness.stop().await;
        let diagnostics = listener.diagnostics();
        assert_eq!(diagnostics.phase, ListenerPhase::Stopped);
        assert!(diagnostics.bound_addr.is_none());
    }

    #[tokio::test]
    async fn test_consecutive_read_errors_end_session() {
        let listener = command_listener(
            test_config().max_consecutive_read_errors(3),
            &SharedBulb::default(),
        );
        let (_trigger, signal) = shutdown::channel();
        let mut decoder = CommandDecoder::new(1024);
        let stream = ScriptedStream::new((0..10).map(|_| read_failure()));

        let end = listener.serve(stream, &mut decoder, &signal).await;
        assert_eq!(end, SessionEnd::ReadFaults);
        assert_eq!(listener.diagnostics().read_faults, 3);
    }

    #[tokio::test]
    async fn test_successful_read_resets_error_count() {
        let bulb = SharedBulb::default();
        let listener = command_listener(test_config().max_consecutive_read_errors(3), &bulb);
        let (_trigger, signal) = shutdown::channel();
        let mut decoder = CommandDecoder::new(1024);
        let stream = ScriptedStream::new([
            read_failure(),
            read_failure(),
            Ok(b"{\"command\":2,\"value\":30}\n".to_vec()),
            read_failure(),
            read_failure(),
        ]);

        let end = listener.serve(stream, &mut decoder, &signal).await;
        assert_eq!(end, SessionEnd::PeerClosed);
        let diagnostics = listener.diagnostics();
        assert_eq!(diagnostics.read_faults, 4);
        assert_eq!(diagnostics.commands_applied, 1);
        assert_eq!(bulb.intensity().value(), 30);
    }

    #[tokio::test]
    async fn test_accept_fault_closes_and_retries() {
        let harness = Harness::start_on::<RefusingListener>(test_config(), SharedBulb::default());

        harness
            .wait_for("repeated accept faults", |d| d.accept_faults >= 2)
            .await;
        let diagnostics = harness.listener.diagnostics();
        assert_eq!(diagnostics.sessions, 0);
        assert_eq!(diagnostics.setup_faults, 0);
        assert!(diagnostics.listens >= diagnostics.accept_faults);
        assert!(diagnostics.backoffs + 1 >= diagnostics.accept_faults);
        assert!(
            diagnostics
                .last_error
                .as_deref()
                .is_some_and(|e| e.contains("accept"))
        );

        harness.stop().await;
    }
}
