//! # Telemetry Source Adapter
//!
//! Reads the flight controller's byte stream, cuts it into MAVLink frames and
//! feeds them to the session multiplexer. When the device goes away the
//! adapter reports end-of-stream and keeps trying to reopen it.

use bytes::Bytes;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{FramingConfig, SerialConfig};
use crate::mavlink::decoder::FrameDecoder;
use crate::serial::DeviceOpener;
use crate::stats::RelayStats;

/// What the source hands to the multiplexer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// One complete, checksum-verified MAVLink frame
    Frame(Bytes),
    /// The device closed or failed; frames after this come from a reopen
    EndOfStream,
}

enum PumpEnd {
    Cancelled,
    ConsumerGone,
    DeviceClosed(String),
}

pub struct SourceAdapter<O: DeviceOpener> {
    opener: O,
    decoder: FrameDecoder,
    reopen_interval: Duration,
    read_buffer_size: usize,
    stats: Arc<RelayStats>,
    reported_corrupt: u64,
    reported_discarded: u64,
}

impl<O: DeviceOpener> SourceAdapter<O> {
    pub fn new(opener: O, serial: &SerialConfig, framing: &FramingConfig, stats: Arc<RelayStats>) -> Self {
        Self {
            opener,
            decoder: FrameDecoder::new(framing.max_frame_size, framing.accept_unknown_messages),
            reopen_interval: Duration::from_millis(serial.reopen_interval_ms),
            read_buffer_size: serial.read_buffer_size.max(1),
            stats,
            reported_corrupt: 0,
            reported_discarded: 0,
        }
    }

    /// Read frames until cancelled or the multiplexer goes away
    ///
    /// Dropping `events` on return is what tells the multiplexer to finish.
    pub async fn run(mut self, events: mpsc::Sender<SourceEvent>, cancel: CancellationToken) {
        let mut missing_reported = false;

        loop {
            let opened = tokio::select! {
                _ = cancel.cancelled() => break,
                opened = self.opener.open() => opened,
            };

            match opened {
                Ok((device, path)) => {
                    missing_reported = false;
                    info!("Reading telemetry from {}", path);

                    match self.pump(device, &events, &cancel).await {
                        PumpEnd::Cancelled => break,
                        PumpEnd::ConsumerGone => {
                            debug!("Multiplexer gone, stopping source");
                            break;
                        }
                        PumpEnd::DeviceClosed(reason) => {
                            warn!("Telemetry device {} closed: {}", path, reason);
                            self.decoder.reset();
                            self.publish_counters();
                            if events.send(SourceEvent::EndOfStream).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    if !missing_reported {
                        warn!("Telemetry device unavailable, retrying every {:?}: {}", self.reopen_interval, e);
                        missing_reported = true;
                    } else {
                        debug!("Telemetry device still unavailable: {}", e);
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reopen_interval) => {}
            }
        }

        self.publish_counters();
        info!(
            corrupt = self.decoder.corrupt_frames(),
            discarded = self.decoder.discarded_bytes(),
            "Telemetry source stopped"
        );
    }

    async fn pump<R: AsyncRead + Unpin>(
        &mut self,
        mut device: R,
        events: &mpsc::Sender<SourceEvent>,
        cancel: &CancellationToken,
    ) -> PumpEnd {
        let mut buf = vec![0u8; self.read_buffer_size];

        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => return PumpEnd::Cancelled,
                read = device.read(&mut buf) => read,
            };

            match read {
                Ok(0) => return PumpEnd::DeviceClosed("end of stream".to_string()),
                Ok(n) => {
                    self.decoder.push(&buf[..n]);
                    for frame in self.decoder.frames() {
                        if events.send(SourceEvent::Frame(frame)).await.is_err() {
                            return PumpEnd::ConsumerGone;
                        }
                    }
                    self.publish_counters();
                }
                Err(e) => return PumpEnd::DeviceClosed(e.to_string()),
            }
        }
    }

    /// Push decoder counter growth into the shared stats
    fn publish_counters(&mut self) {
        let corrupt = self.decoder.corrupt_frames();
        let discarded = self.decoder.discarded_bytes();

        if corrupt > self.reported_corrupt {
            self.stats
                .corrupt_frames
                .fetch_add(corrupt - self.reported_corrupt, Ordering::Relaxed);
            self.reported_corrupt = corrupt;
        }
        if discarded > self.reported_discarded {
            self.stats
                .discarded_bytes
                .fetch_add(discarded - self.reported_discarded, Ordering::Relaxed);
            self.reported_discarded = discarded;
        }
    }
}
