/// Integration tests for the relay
/// Sends framed datagrams over loopback and checks what comes out the other side

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use mediajitter::config::Config;
use mediajitter::relay::{Relay, RelayReport};
use mediajitter::wire;
use mediajitter::{Packet, StreamTag};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn relay_config(forward: SocketAddr, latency_ms: u64, flush: bool) -> Config {
    Config {
        listen_addr: "127.0.0.1:0".to_string(),
        forward_addr: forward.to_string(),
        target_latency_ms: latency_ms,
        max_capacity: 64,
        max_streams: 4,
        tick_ms: 5,
        flush_on_shutdown: flush,
        stats_interval_secs: 0,
    }
}

struct Harness {
    sink: UdpSocket,
    sender: UdpSocket,
    relay_addr: SocketAddr,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<anyhow::Result<RelayReport>>,
}

impl Harness {
    async fn start(latency_ms: u64, flush: bool) -> Self {
        let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = relay_config(sink.local_addr().unwrap(), latency_ms, flush);
        let relay = Relay::bind(&config).await.unwrap();
        let relay_addr = relay.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(relay.run(cancel.clone()));
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        Self {
            sink,
            sender,
            relay_addr,
            cancel,
            handle,
        }
    }

    async fn send(&self, tag: StreamTag, ts: i64) {
        let packet = Packet::new(tag, ts, ts.to_le_bytes().to_vec());
        self.sender
            .send_to(&wire::encode(&packet), self.relay_addr)
            .await
            .unwrap();
    }

    async fn send_raw(&self, data: &[u8]) {
        self.sender.send_to(data, self.relay_addr).await.unwrap();
    }

    async fn recv(&self) -> Packet {
        let mut buf = vec![0u8; wire::MAX_DATAGRAM_LEN];
        let len = timeout(RECV_TIMEOUT, self.sink.recv(&mut buf))
            .await
            .expect("timed out waiting for forwarded packet")
            .unwrap();
        wire::decode(&buf[..len]).expect("relay forwarded a malformed datagram")
    }

    async fn stop(self) -> RelayReport {
        self.cancel.cancel();
        self.handle.await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn test_relay_reorders_packets() {
    let harness = Harness::start(100, false).await;

    for ts in [300, 100, 200] {
        harness.send(StreamTag::VIDEO, ts).await;
    }

    let mut received = Vec::new();
    for _ in 0..3 {
        received.push(harness.recv().await);
    }
    let timestamps: Vec<i64> = received.iter().map(|p| p.presentation_timestamp).collect();
    assert_eq!(timestamps, vec![100, 200, 300]);
    for packet in &received {
        assert_eq!(packet.stream_tag, StreamTag::VIDEO);
        assert_eq!(&packet.payload[..], &packet.presentation_timestamp.to_le_bytes());
    }

    let report = harness.stop().await;
    assert_eq!(report.datagrams_received, 3);
    assert_eq!(report.forwarded, 3);
    assert_eq!(report.total.packets_released, 3);
    assert_eq!(report.total.packets_dropped(), 0);
}

#[tokio::test]
async fn test_relay_keeps_streams_separate() {
    let harness = Harness::start(50, false).await;

    harness.send(StreamTag::VIDEO, 2000).await;
    harness.send(StreamTag::AUDIO, 20).await;
    harness.send(StreamTag::VIDEO, 1000).await;
    harness.send(StreamTag::AUDIO, 10).await;

    let mut video = Vec::new();
    let mut audio = Vec::new();
    for _ in 0..4 {
        let packet = harness.recv().await;
        match packet.stream_tag {
            StreamTag::VIDEO => video.push(packet.presentation_timestamp),
            StreamTag::AUDIO => audio.push(packet.presentation_timestamp),
            other => panic!("unexpected stream {}", other),
        }
    }
    assert_eq!(video, vec![1000, 2000]);
    assert_eq!(audio, vec![10, 20]);

    let report = harness.stop().await;
    assert_eq!(report.streams.len(), 2);
    assert_eq!(report.streams[&StreamTag::AUDIO].packets_released, 2);
}

#[tokio::test]
async fn test_relay_flushes_on_shutdown() {
    // Latency far beyond the test's lifetime: only the flush can release these
    let harness = Harness::start(60_000, true).await;

    harness.send(StreamTag::AUDIO, 2).await;
    harness.send(StreamTag::AUDIO, 1).await;
    // Give the relay time to receive both before cancelling
    tokio::time::sleep(Duration::from_millis(200)).await;

    harness.cancel.cancel();
    let first = harness.recv().await;
    let second = harness.recv().await;
    assert_eq!(first.presentation_timestamp, 1);
    assert_eq!(second.presentation_timestamp, 2);

    let report = harness.stop().await;
    assert_eq!(report.flushed, 2);
    assert_eq!(report.forwarded, 2);
    assert_eq!(report.abandoned, 0);
}

#[tokio::test]
async fn test_relay_skips_malformed_datagrams() {
    let harness = Harness::start(20, false).await;

    harness.send_raw(&[0x01, 0x02, 0x03]).await;
    harness.send_raw(&[]).await;
    harness.send(StreamTag::VIDEO, 7).await;

    let packet = harness.recv().await;
    assert_eq!(packet.presentation_timestamp, 7);

    let report = harness.stop().await;
    assert_eq!(report.datagrams_received, 3);
    assert_eq!(report.malformed, 2);
    assert_eq!(report.forwarded, 1);
}
