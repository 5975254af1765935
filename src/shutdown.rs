//! Stop signal shared by the endpoint workers.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::channel::oneshot;
use futures::future::{self, Either, FutureExt, Shared};

use crate::device::lock;

/// Creates a connected trigger and signal.
///
/// Dropping the trigger stops the workers as well.
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (sender, receiver) = oneshot::channel();
    let triggered = Arc::new(AtomicBool::new(false));
    (
        ShutdownTrigger {
            sender: Mutex::new(Some(sender)),
            triggered: Arc::clone(&triggered),
        },
        Shutdown {
            signal: receiver.shared(),
            triggered,
        },
    )
}

/// The sending half: fires the signal once.
#[derive(Debug)]
pub struct ShutdownTrigger {
    sender: Mutex<Option<oneshot::Sender<()>>>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        if let Some(sender) = lock(&self.sender).take() {
            let _ = sender.send(());
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

/// The receiving half, cloned into every worker.
#[derive(Clone)]
pub struct Shutdown {
    signal: Shared<oneshot::Receiver<()>>,
    triggered: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst) || self.signal.peek().is_some()
    }

    /// Resolves once the trigger fires or is dropped.
    pub async fn triggered(&self) {
        let _ = self.signal.clone().await;
    }

    /// Run `operation` unless the signal fires first.
    ///
    /// Returns `None` when the operation was abandoned.
    ///
    /// # Example
    ///
    /// ```
    /// # futures::executor::block_on(async {
    /// let (trigger, shutdown) = bulb_endpoint::shutdown::channel();
    /// assert_eq!(shutdown.guard(async { 5 }).await, Some(5));
    ///
    /// trigger.trigger();
    /// assert_eq!(shutdown.guard(futures::future::pending::<()>()).await, None);
    /// # });
    /// ```
    pub async fn guard<F: Future>(&self, operation: F) -> Option<F::Output> {
        let stop = self.triggered();
        futures::pin_mut!(operation);
        futures::pin_mut!(stop);

        match future::select(operation, stop).await {
            Either::Left((output, _)) => Some(output),
            Either::Right(_) => None,
        }
    }
}
