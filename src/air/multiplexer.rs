//! # Session Multiplexer
//!
//! Stamps every frame from the source with its session and the next
//! sequence number, then hands it to the uplink task in arrival order.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::OnSourceClose;
use crate::error::{RelayError, Result};
use crate::session::{SequenceNumber, Session, SessionId, TelemetryFrame};
use crate::source::SourceEvent;

/// Work item for the uplink task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UplinkCommand {
    /// Frames that follow belong to this session; older replay state is stale
    StartSession(Session),
    Frame(TelemetryFrame),
}

#[derive(Debug)]
pub struct SessionMultiplexer {
    session: Session,
    next_seq: SequenceNumber,
    uplink: mpsc::Sender<UplinkCommand>,
}

impl SessionMultiplexer {
    /// Open the first session and announce it to the uplink
    pub async fn start(uplink: mpsc::Sender<UplinkCommand>) -> Result<Self> {
        let session = Session::start();
        send(&uplink, UplinkCommand::StartSession(session)).await?;
        info!(session = %session.id(), "Telemetry session started");

        Ok(Self {
            session,
            next_seq: 0,
            uplink,
        })
    }

    /// Assign the next sequence number to `payload` and pass it on
    ///
    /// Waits while the uplink queue is full.
    pub async fn submit(&mut self, payload: Bytes) -> Result<SequenceNumber> {
        let seq = self.next_seq;
        let frame = TelemetryFrame::new(self.session.id(), seq, payload);
        send(&self.uplink, UplinkCommand::Frame(frame)).await?;
        self.next_seq += 1;
        Ok(seq)
    }

    /// Replace the current session; numbering restarts at zero
    pub async fn start_session(&mut self) -> Result<SessionId> {
        let previous = self.session.id();
        let session = Session::start();
        send(&self.uplink, UplinkCommand::StartSession(session)).await?;

        info!(
            previous = %previous,
            session = %session.id(),
            frames = self.next_seq,
            "Telemetry session replaced"
        );
        self.session = session;
        self.next_seq = 0;
        Ok(session.id())
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Sequence number the next frame will get
    pub fn next_sequence(&self) -> SequenceNumber {
        self.next_seq
    }

    /// Consume source events until the source queue closes
    ///
    /// After the device went away, `NewSession` starts a fresh session with
    /// the first frame that arrives once it is back; `Continue` keeps
    /// numbering. Returning drops the uplink sender, which lets the uplink
    /// drain and stop.
    pub async fn run(
        mut self,
        mut source: mpsc::Receiver<SourceEvent>,
        on_source_close: OnSourceClose,
    ) -> Result<()> {
        let mut source_lost = false;

        while let Some(event) = source.recv().await {
            match event {
                SourceEvent::Frame(payload) => {
                    if source_lost
                        && on_source_close == OnSourceClose::NewSession
                        && self.next_seq > 0
                    {
                        self.start_session().await?;
                    }
                    source_lost = false;
                    self.submit(payload).await?;
                }
                SourceEvent::EndOfStream => {
                    info!(
                        session = %self.session.id(),
                        frames = self.next_seq,
                        "Telemetry source closed"
                    );
                    source_lost = true;
                }
            }
        }

        info!(
            session = %self.session.id(),
            frames = self.next_seq,
            "Telemetry input finished"
        );
        Ok(())
    }
}

async fn send(uplink: &mpsc::Sender<UplinkCommand>, command: UplinkCommand) -> Result<()> {
    uplink
        .send(command)
        .await
        .map_err(|_| RelayError::ChannelClosed("uplink"))
}
