//! In-process queue subscription

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::FrameSink;
use crate::error::{RelayError, Result};
use crate::session::TelemetryFrame;

/// Forwards frames into an `mpsc` queue read by another task
pub struct ChannelSink {
    name: String,
    tx: mpsc::Sender<TelemetryFrame>,
}

impl ChannelSink {
    pub fn new(name: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<TelemetryFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { name: name.into(), tx }, rx)
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&mut self, frame: TelemetryFrame) -> Result<()> {
        self.tx.send(frame).await.map_err(|_| RelayError::Sink {
            name: self.name.clone(),
            reason: "subscriber dropped".to_string(),
        })
    }
}
