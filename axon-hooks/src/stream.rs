//! Streaming sink: exposes the event stream to service layers.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use axon_types::HookError;

use crate::bus::HookSubscriber;
use crate::event::RunEvent;

/// A bounded-channel subscriber for external consumers (SSE bridges,
/// dashboards). Slow consumers drop events with a warning rather than
/// blocking the bus.
pub struct StreamSink {
    sender: mpsc::Sender<RunEvent>,
}

impl StreamSink {
    /// A sink with the given channel capacity. Returns the sink to
    /// subscribe and the receiver to consume.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RunEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl HookSubscriber for StreamSink {
    async fn on_event(&self, event: &RunEvent) -> Result<(), HookError> {
        if let Err(e) = self.sender.try_send(event.clone()) {
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!(run = %event.meta.run_id, "stream sink full, dropping event");
                }
                mpsc::error::TrySendError::Closed(_) => {}
            }
        }
        Ok(())
    }
}
