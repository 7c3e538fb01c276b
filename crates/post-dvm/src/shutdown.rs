//! One-shot shutdown and cancellation signal.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

#[derive(Debug)]
struct Inner {
    triggered: AtomicBool,
    sender: watch::Sender<bool>,
}

/// A signal that fires once and stays fired.
///
/// Clones share state. Any clone may trigger it, from any task, any number of times; waiters
/// observe it whether they started waiting before or after it fired.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                triggered: AtomicBool::new(false),
                sender,
            }),
        }
    }

    /// Fire the signal. Returns `true` only for the call that actually fired it.
    pub fn trigger(&self) -> bool {
        let first = !self.inner.triggered.swap(true, Ordering::SeqCst);
        if first {
            self.inner.sender.send_replace(true);
        }
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Resolve once the signal has fired.
    pub async fn wait(&self) {
        let mut receiver = self.inner.sender.subscribe();
        // The sender lives as long as `self`, so this only returns once the value is `true`.
        let _ = receiver.wait_for(|triggered| *triggered).await;
    }
}
