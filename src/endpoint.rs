//! Running both workers against one device.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread;

use futures::FutureExt;
use log::{error, info, warn};
use serde_json::{Value, json};

use crate::config::EndpointConfig;
use crate::device::Bulb;
use crate::errors::Error;
use crate::history::MessageHistory;
use crate::listener::{CommandListener, ListenerDiagnostics};
use crate::runtime::{self, JoinHandle, Mutex};
use crate::shutdown::{self, ShutdownTrigger};
use crate::telemetry::{PublisherDiagnostics, TelemetryPublisher};

type Result<T> = std::result::Result<T, Error>;

/// A running bulb endpoint: the telemetry publisher and the command listener,
/// sharing one device.
///
/// # Example
///
/// ```no_run
/// use bulb_endpoint::{Endpoint, EndpointConfig, SharedBulb};
///
/// # async fn run() -> Result<(), bulb_endpoint::Error> {
/// let bulb = SharedBulb::with_id(1);
/// let endpoint = Endpoint::start(EndpointConfig::default(), bulb.clone());
///
/// // ... commands arrive on TCP 54321, telemetry goes to UDP 12345 ...
///
/// endpoint.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct Endpoint {
    publisher: Arc<TelemetryPublisher>,
    listener: Arc<CommandListener>,
    history: Arc<Mutex<MessageHistory>>,
    trigger: ShutdownTrigger,
    publisher_task: Option<JoinHandle<thread::Result<Result<()>>>>,
    listener_task: Option<JoinHandle<thread::Result<()>>>,
}

impl Endpoint {
    /// Spawn both workers on the active runtime.
    ///
    /// Must be called from within that runtime.
    pub fn start<B: Bulb + 'static>(config: EndpointConfig, device: B) -> Self {
        let device: Arc<dyn Bulb> = Arc::new(device);
        let history = Arc::new(Mutex::new(MessageHistory::new()));
        let publisher = Arc::new(TelemetryPublisher::new(
            Arc::clone(&device),
            &config,
            Arc::clone(&history),
        ));
        let listener = Arc::new(CommandListener::new(
            device,
            config.clone(),
            Arc::clone(&history),
        ));
        let (trigger, signal) = shutdown::channel();

        info!(
            "Starting bulb endpoint (commands on {}, telemetry to {})",
            config.command_addr, config.telemetry_addr
        );

        let publisher_task = {
            let publisher = Arc::clone(&publisher);
            let signal = signal.clone();
            runtime::spawn(
                AssertUnwindSafe(async move { publisher.run(signal).await }).catch_unwind(),
            )
        };
        let listener_task = {
            let listener = Arc::clone(&listener);
            runtime::spawn(
                AssertUnwindSafe(async move { listener.run(signal).await }).catch_unwind(),
            )
        };

        Endpoint {
            publisher,
            listener,
            history,
            trigger,
            publisher_task: Some(publisher_task),
            listener_task: Some(listener_task),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.trigger.is_triggered()
    }

    pub fn listener_diagnostics(&self) -> ListenerDiagnostics {
        self.listener.diagnostics()
    }

    pub fn publisher_diagnostics(&self) -> PublisherDiagnostics {
        self.publisher.diagnostics()
    }

    pub async fn history(&self) -> MessageHistory {
        self.history.lock().await.clone()
    }

    /// Returns diagnostics for both workers and the message history.
    pub async fn diagnostics(&self) -> Value {
        let history = self.history.lock().await.summary();
        json!({
            "running": self.is_running(),
            "listener": serde_json::to_value(self.listener_diagnostics()).unwrap_or(Value::Null),
            "publisher": serde_json::to_value(self.publisher_diagnostics()).unwrap_or(Value::Null),
            "history": serde_json::to_value(history).unwrap_or(Value::Null),
        })
    }

    /// Signal both workers and wait for them to finish.
    ///
    /// Returns [`Error::WorkerPanicked`] if either worker panicked, otherwise
    /// the publisher's setup error, if it had one.
    pub async fn stop(mut self) -> Result<()> {
        info!("Stopping bulb endpoint");
        self.trigger.trigger();

        let listener = match self.listener_task.take() {
            Some(task) => joined("listener", task.await),
            None => Ok(()),
        };
        let publisher = match self.publisher_task.take() {
            Some(task) => joined("publisher", task.await).and_then(|result| result),
            None => Ok(()),
        };
        listener.and(publisher)
    }
}

fn joined<T>(worker: &'static str, outcome: thread::Result<T>) -> Result<T> {
    outcome.map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("unknown panic");
        error!("Bulb endpoint {} worker panicked: {}", worker, message);
        Error::WorkerPanicked(worker)
    })
}

// Only tokio can abort a task; on async-std and smol the workers are
// signalled and detached, and exit at their next guarded await.
impl Drop for Endpoint {
    fn drop(&mut self) {
        if self.publisher_task.is_some() || self.listener_task.is_some() {
            warn!("Bulb endpoint dropped without stop(); signalling workers");
        }
        self.trigger.trigger();
        if let Some(task) = self.listener_task.take() {
            task.abort();
        }
        if let Some(task) = self.publisher_task.take() {
            task.abort();
        }
    }
}
