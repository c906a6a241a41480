//! # Ground Demultiplexer and Sink Registry
//!
//! One task owns the registry. Frames, session announcements and sink
//! (de)registrations all arrive on the same command queue, so a sink is
//! either fully registered before a frame is routed or not at all.
//!
//! Per sink the registry remembers the last delivered `(session, seq)` and
//! drops anything at or below it. Late frames from retired sessions are
//! dropped for every sink.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backlog::{backlog, BacklogSender, Pushed};
use crate::error::{RelayError, Result};
use crate::session::{SequenceNumber, Session, SessionId, TelemetryFrame};
use crate::sinks::{run_writer, FrameSink};
use crate::stats::{bump, RelayStats, SinkCounters};

/// How many retired sessions are remembered for stale-frame detection
const RETIRED_SESSION_MEMORY: usize = 16;

pub type SinkId = u64;

/// Work item for the demultiplexer task
pub enum DemuxCommand {
    Frame(TelemetryFrame),
    Announce(Session),
    Register {
        sink: Box<dyn FrameSink>,
        reply: oneshot::Sender<SinkHandle>,
    },
    Deregister {
        id: SinkId,
        reply: oneshot::Sender<bool>,
    },
}

/// Returned on registration; counters stay readable after deregistration
#[derive(Debug, Clone)]
pub struct SinkHandle {
    pub id: SinkId,
    pub name: String,
    pub counters: Arc<SinkCounters>,
}

struct SinkState {
    name: String,
    last_delivered: Option<(SessionId, SequenceNumber)>,
    backlog: BacklogSender<TelemetryFrame>,
    counters: Arc<SinkCounters>,
    writer: JoinHandle<()>,
}

impl SinkState {
    fn already_delivered(&self, frame: &TelemetryFrame) -> bool {
        match self.last_delivered {
            Some((session, seq)) => session == frame.session() && frame.sequence() <= seq,
            None => false,
        }
    }
}

/// Active sinks and their delivery state
pub struct SinkRegistry {
    sinks: BTreeMap<SinkId, SinkState>,
    next_id: SinkId,
    backlog_capacity: usize,
    finished_writers: Vec<JoinHandle<()>>,
}

impl SinkRegistry {
    pub fn new(backlog_capacity: usize) -> Self {
        Self {
            sinks: BTreeMap::new(),
            next_id: 1,
            backlog_capacity,
            finished_writers: Vec::new(),
        }
    }

    /// Start a writer for `sink`; it sees frames routed from now on
    pub fn register(&mut self, sink: Box<dyn FrameSink>) -> SinkHandle {
        let id = self.next_id;
        self.next_id += 1;

        let name = sink.name().to_string();
        let counters = Arc::new(SinkCounters::default());
        let (tx, rx) = backlog(self.backlog_capacity);
        let writer = tokio::spawn(run_writer(sink, rx, Arc::clone(&counters)));

        info!(id, "Sink '{}' registered", name);
        self.sinks.insert(
            id,
            SinkState {
                name: name.clone(),
                last_delivered: None,
                backlog: tx,
                counters: Arc::clone(&counters),
                writer,
            },
        );

        SinkHandle { id, name, counters }
    }

    /// Remove a sink; its writer delivers what is queued and stops
    pub fn deregister(&mut self, id: SinkId) -> bool {
        match self.sinks.remove(&id) {
            Some(state) => {
                info!(id, "Sink '{}' deregistered", state.name);
                self.finished_writers.retain(|writer| !writer.is_finished());
                self.finished_writers.push(state.writer);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn contains(&self, id: SinkId) -> bool {
        self.sinks.contains_key(&id)
    }

    /// Queue `frame` for every sink that has not seen it yet
    fn dispatch(&mut self, frame: &TelemetryFrame) {
        let mut failed = Vec::new();

        for (id, state) in self.sinks.iter_mut() {
            if state.already_delivered(frame) {
                bump(&state.counters.duplicates);
                continue;
            }

            match state.backlog.push(frame.clone()) {
                Pushed::Queued => {}
                Pushed::Evicted(old) => {
                    bump(&state.counters.dropped);
                    debug!(seq = old.sequence(), "Sink '{}' backlog full, dropped oldest", state.name);
                }
                Pushed::Closed(_) => {
                    failed.push(*id);
                    continue;
                }
            }
            state.last_delivered = Some((frame.session(), frame.sequence()));
        }

        for id in failed {
            warn!(id, "Sink writer ended, removing sink");
            self.deregister(id);
        }
    }

    /// Close every backlog and wait for the writers to drain
    async fn shutdown(mut self) {
        let ids: Vec<SinkId> = self.sinks.keys().copied().collect();
        for id in ids {
            self.deregister(id);
        }
        for writer in self.finished_writers.drain(..) {
            if let Err(e) = writer.await {
                warn!("Sink writer panicked: {}", e);
            }
        }
    }
}

/// Routes inbound frames to the registered sinks
pub struct GroundDemultiplexer {
    registry: SinkRegistry,
    current: Option<SessionId>,
    retired: VecDeque<SessionId>,
    stats: Arc<RelayStats>,
}

impl GroundDemultiplexer {
    pub fn new(backlog_capacity: usize, stats: Arc<RelayStats>) -> Self {
        Self {
            registry: SinkRegistry::new(backlog_capacity),
            current: None,
            retired: VecDeque::with_capacity(RETIRED_SESSION_MEMORY),
            stats,
        }
    }

    pub fn registry(&self) -> &SinkRegistry {
        &self.registry
    }

    pub fn register(&mut self, sink: Box<dyn FrameSink>) -> SinkHandle {
        self.registry.register(sink)
    }

    pub fn deregister(&mut self, id: SinkId) -> bool {
        self.registry.deregister(id)
    }

    pub fn current_session(&self) -> Option<SessionId> {
        self.current
    }

    /// Make `session` current, retiring the previous one
    pub fn announce(&mut self, session: SessionId) {
        if self.current == Some(session) {
            return;
        }
        if self.retired.contains(&session) {
            debug!(%session, "Ignoring announcement of a retired session");
            return;
        }

        if let Some(previous) = self.current.replace(session) {
            if self.retired.len() == RETIRED_SESSION_MEMORY {
                self.retired.pop_front();
            }
            self.retired.push_back(previous);
            info!(%previous, %session, "Air relay switched session");
        } else {
            info!(%session, "Receiving session");
        }
    }

    /// Route one frame to all sinks, dropping stale and duplicate copies
    pub fn route(&mut self, frame: TelemetryFrame) {
        let session = frame.session();
        if self.retired.contains(&session) {
            bump(&self.stats.stale_session_frames);
            debug!(%session, seq = frame.sequence(), "Dropping frame from retired session");
            return;
        }
        if self.current != Some(session) {
            self.announce(session);
        }

        self.registry.dispatch(&frame);
    }

    /// Process commands until every handle is dropped, then drain the sinks
    pub async fn run(mut self, mut commands: mpsc::Receiver<DemuxCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                DemuxCommand::Frame(frame) => self.route(frame),
                DemuxCommand::Announce(session) => self.announce(session.id()),
                DemuxCommand::Register { sink, reply } => {
                    let handle = self.register(sink);
                    let _ = reply.send(handle);
                }
                DemuxCommand::Deregister { id, reply } => {
                    let _ = reply.send(self.deregister(id));
                }
            }
        }

        info!(sinks = self.registry.len(), "Demultiplexer input closed, draining sinks");
        self.registry.shutdown().await;
    }
}

/// Cloneable front end for the demultiplexer task
#[derive(Clone)]
pub struct DemuxHandle {
    tx: mpsc::Sender<DemuxCommand>,
}

impl DemuxHandle {
    /// Spawn `demux` and return a handle plus the task's join handle
    pub fn spawn(demux: GroundDemultiplexer, queue_depth: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue_depth);
        let task = tokio::spawn(demux.run(rx));
        (Self { tx }, task)
    }

    pub async fn route(&self, frame: TelemetryFrame) -> Result<()> {
        self.send(DemuxCommand::Frame(frame)).await
    }

    pub async fn announce(&self, session: Session) -> Result<()> {
        self.send(DemuxCommand::Announce(session)).await
    }

    pub async fn register(&self, sink: Box<dyn FrameSink>) -> Result<SinkHandle> {
        let (reply, rx) = oneshot::channel();
        self.send(DemuxCommand::Register { sink, reply }).await?;
        rx.await.map_err(|_| RelayError::ChannelClosed("demux"))
    }

    pub async fn deregister(&self, id: SinkId) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(DemuxCommand::Deregister { id, reply }).await?;
        rx.await.map_err(|_| RelayError::ChannelClosed("demux"))
    }

    async fn send(&self, command: DemuxCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| RelayError::ChannelClosed("demux"))
    }
}
