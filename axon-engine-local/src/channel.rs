//! In-process signal channels.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use axon_types::SignalError;
use axon_workflow::SignalReceiver;

/// A queue-backed signal channel. Senders push JSON payloads; the
/// workflow receives them in order. Cancellation of the engine context
/// surfaces as `DeadlineExceeded`, matching the contract.
pub struct LocalSignalChannel {
    queue: Mutex<VecDeque<serde_json::Value>>,
    notify: Notify,
    cancel: CancellationToken,
}

impl LocalSignalChannel {
    /// A channel tied to the engine's cancellation token.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            cancel,
        }
    }

    /// Enqueue a signal payload.
    pub fn send(&self, value: serde_json::Value) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(value);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<serde_json::Value> {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }
}

#[async_trait]
impl SignalReceiver for LocalSignalChannel {
    async fn receive(
        &self,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value, SignalError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(value) = self.pop() {
                return Ok(value);
            }
            let notified = self.notify.notified();
            // Re-check after arming the waiter so a send racing the
            // first check is not lost.
            if let Some(value) = self.pop() {
                return Ok(value);
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(SignalError::DeadlineExceeded),
                _ = notified => {}
                _ = async {
                    match deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending::<()>().await,
                    }
                } => return Err(SignalError::DeadlineExceeded),
            }
        }
    }

    fn try_receive(&self) -> Result<Option<serde_json::Value>, SignalError> {
        Ok(self.pop())
    }
}
