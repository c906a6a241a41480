//! Air and ground relays over loopback TCP, with a link the test can cut

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use uav_relay::air::{ReplayBuffer, SessionMultiplexer, Uplink};
use uav_relay::config::{AckConfig, OnSourceClose};
use uav_relay::ground::{DemuxHandle, Downlink, GroundDemultiplexer};
use uav_relay::mavlink::encoder::{encode_v1, FrameAddress};
use uav_relay::session::TelemetryFrame;
use uav_relay::sinks::ChannelSink;
use uav_relay::source::SourceEvent;
use uav_relay::stats::RelayStats;
use uav_relay::transport::{
    Backoff, ReconnectingTransport, TcpAcceptor, TcpDialer, TransportSettings,
};

fn settings() -> TransportSettings {
    TransportSettings {
        heartbeat_interval: Duration::from_millis(100),
        liveness_timeout: Duration::from_secs(1),
        max_payload: 280,
        backoff: Backoff::new(
            Duration::from_millis(50),
            Duration::from_millis(200),
            0.0,
            Duration::from_secs(10),
        ),
    }
}

fn heartbeat(seq: u8) -> Bytes {
    let payload = [0, 0, 0, 0, 2, 3, 0x81, 4, 3];
    Bytes::from(encode_v1(FrameAddress::new(seq, 1, 1), 0, &payload).unwrap())
}

/// Forwards connections to `target`; `cut()` kills the live ones
struct LinkProxy {
    address: String,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
    accept_task: JoinHandle<()>,
}

impl LinkProxy {
    async fn start(target: String) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let connections = Arc::new(Mutex::new(Vec::new()));

        let live = Arc::clone(&connections);
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((mut inbound, _)) = listener.accept().await else {
                    return;
                };
                let Ok(mut outbound) = TcpStream::connect(&target).await else {
                    continue;
                };
                let task = tokio::spawn(async move {
                    let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                });
                live.lock().await.push(task);
            }
        });

        Self {
            address,
            connections,
            accept_task,
        }
    }

    async fn cut(&self) {
        for task in self.connections.lock().await.drain(..) {
            task.abort();
        }
    }
}

impl Drop for LinkProxy {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn expect_frames(rx: &mut mpsc::Receiver<TelemetryFrame>, count: usize) -> Vec<TelemetryFrame> {
    let mut frames = Vec::new();
    for _ in 0..count {
        let frame = timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for telemetry")
            .expect("sink closed");
        frames.push(frame);
    }
    frames
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_telemetry_survives_link_loss_exactly_once() {
    // Ground: listen, demultiplex into one in-process sink
    let ground_stats = RelayStats::new();
    let acceptor = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
    let proxy = LinkProxy::start(acceptor.local_addr().to_string()).await;

    let (demux, demux_task) =
        DemuxHandle::spawn(GroundDemultiplexer::new(256, Arc::clone(&ground_stats)), 64);
    let (sink, mut sink_rx) = ChannelSink::new("dashboard", 256);
    let sink_handle = demux.register(Box::new(sink)).await.unwrap();

    let ground_transport = ReconnectingTransport::new(acceptor, settings(), Arc::clone(&ground_stats));
    let ack = AckConfig {
        interval_ms: 100,
        every_frames: 8,
    };
    let downlink = Downlink::new(ground_transport, demux, &ack, Arc::clone(&ground_stats));
    let cancel = CancellationToken::new();
    let downlink_task = tokio::spawn(downlink.run(cancel.clone()));

    // Air: dial the ground through the proxy
    let air_stats = RelayStats::new();
    let dialer = TcpDialer::new(proxy.address.clone(), Duration::from_secs(1));
    let air_transport = ReconnectingTransport::new(dialer, settings(), Arc::clone(&air_stats));
    let uplink = Uplink::new(
        air_transport,
        ReplayBuffer::new(256, None),
        Duration::from_secs(5),
        Arc::clone(&air_stats),
    );
    let (uplink_tx, uplink_rx) = mpsc::channel(64);
    let uplink_task = tokio::spawn(uplink.run(uplink_rx));

    let multiplexer = SessionMultiplexer::start(uplink_tx).await.unwrap();
    let session = multiplexer.session().id();
    let (source_tx, source_rx) = mpsc::channel(64);
    let mux_task = tokio::spawn(multiplexer.run(source_rx, OnSourceClose::NewSession));

    // Healthy link
    for seq in 0..10u8 {
        source_tx.send(SourceEvent::Frame(heartbeat(seq))).await.unwrap();
    }
    let first = expect_frames(&mut sink_rx, 10).await;

    // Dropout: frames keep coming while the link is down
    proxy.cut().await;
    for seq in 10..20u8 {
        source_tx.send(SourceEvent::Frame(heartbeat(seq))).await.unwrap();
    }
    let second = expect_frames(&mut sink_rx, 10).await;

    let delivered: Vec<TelemetryFrame> = first.into_iter().chain(second).collect();
    for (i, frame) in delivered.iter().enumerate() {
        assert_eq!(frame.session(), session);
        assert_eq!(frame.sequence(), i as u64);
        assert_eq!(frame.payload(), &heartbeat(i as u8));
    }

    // Nothing is delivered twice
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(sink_rx.try_recv().is_err());

    // Shut down: the air drains, then the ground stops
    drop(source_tx);
    timeout(Duration::from_secs(10), mux_task).await.unwrap().unwrap().unwrap();
    timeout(Duration::from_secs(10), uplink_task).await.unwrap().unwrap().unwrap();
    cancel.cancel();
    timeout(Duration::from_secs(10), downlink_task).await.unwrap().unwrap().unwrap();
    timeout(Duration::from_secs(10), demux_task).await.unwrap().unwrap();

    let air = air_stats.snapshot();
    assert!(air.frames_sent + air.frames_retransmitted >= 20);
    assert!(air.reconnects >= 1);
    assert!(air.acks_received >= 1);

    let ground = ground_stats.snapshot();
    assert!(ground.frames_received >= 20);
    assert!(ground.acks_sent >= 1);

    let counters = sink_handle.counters.snapshot();
    assert_eq!(counters.delivered, 20);
    assert_eq!(counters.duplicates, ground.frames_received - 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_new_session_after_device_loss() {
    let ground_stats = RelayStats::new();
    let acceptor = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
    let address = acceptor.local_addr().to_string();

    let (demux, demux_task) =
        DemuxHandle::spawn(GroundDemultiplexer::new(64, Arc::clone(&ground_stats)), 64);
    let (sink, mut sink_rx) = ChannelSink::new("dashboard", 64);
    demux.register(Box::new(sink)).await.unwrap();

    let ground_transport = ReconnectingTransport::new(acceptor, settings(), Arc::clone(&ground_stats));
    let downlink = Downlink::new(ground_transport, demux, &AckConfig::default(), Arc::clone(&ground_stats));
    let cancel = CancellationToken::new();
    let downlink_task = tokio::spawn(downlink.run(cancel.clone()));

    let air_stats = RelayStats::new();
    let dialer = TcpDialer::new(address, Duration::from_secs(1));
    let air_transport = ReconnectingTransport::new(dialer, settings(), Arc::clone(&air_stats));
    let uplink = Uplink::new(
        air_transport,
        ReplayBuffer::new(64, None),
        Duration::from_secs(5),
        Arc::clone(&air_stats),
    );
    let (uplink_tx, uplink_rx) = mpsc::channel(64);
    let uplink_task = tokio::spawn(uplink.run(uplink_rx));
    let multiplexer = SessionMultiplexer::start(uplink_tx).await.unwrap();
    let (source_tx, source_rx) = mpsc::channel(64);
    let mux_task = tokio::spawn(multiplexer.run(source_rx, OnSourceClose::NewSession));

    for seq in 0..3u8 {
        source_tx.send(SourceEvent::Frame(heartbeat(seq))).await.unwrap();
    }
    // A session change discards unsent frames, so let these land first
    let mut frames = expect_frames(&mut sink_rx, 3).await;

    source_tx.send(SourceEvent::EndOfStream).await.unwrap();
    for seq in 3..5u8 {
        source_tx.send(SourceEvent::Frame(heartbeat(seq))).await.unwrap();
    }
    frames.extend(expect_frames(&mut sink_rx, 2).await);
    let first = frames[0].session();
    let second = frames[3].session();
    assert_ne!(first, second);

    let numbering: Vec<(bool, u64)> = frames
        .iter()
        .map(|f| (f.session() == first, f.sequence()))
        .collect();
    assert_eq!(numbering, vec![(true, 0), (true, 1), (true, 2), (false, 0), (false, 1)]);

    drop(source_tx);
    timeout(Duration::from_secs(10), mux_task).await.unwrap().unwrap().unwrap();
    timeout(Duration::from_secs(10), uplink_task).await.unwrap().unwrap().unwrap();
    cancel.cancel();
    timeout(Duration::from_secs(10), downlink_task).await.unwrap().unwrap().unwrap();
    timeout(Duration::from_secs(10), demux_task).await.unwrap().unwrap();
}
