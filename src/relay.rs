/// UDP relay around the stream demux
/// One loop receives datagrams and admits them, another drains released
/// packets on a timer and forwards them. Both share the demux behind a mutex
/// that is never held across an await.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::demux::StreamDemux;
use crate::jitter::{JitterBufferStats, Packet, PacketDropped, StreamTag};
use crate::wire;

/// Counters for the socket side of the relay
#[derive(Debug, Default)]
struct RelayCounters {
    datagrams_received: AtomicU64,
    malformed: AtomicU64,
    forwarded: AtomicU64,
    send_errors: AtomicU64,
    flushed: AtomicU64,
    abandoned: AtomicU64,
}

/// Summary returned when the relay stops
#[derive(Debug, Clone, Serialize)]
pub struct RelayReport {
    pub datagrams_received: u64,
    pub malformed: u64,
    pub forwarded: u64,
    pub send_errors: u64,
    /// Packets released by the shutdown flush (included in `forwarded` if sent)
    pub flushed: u64,
    /// Packets still buffered at shutdown and discarded because flushing is off
    pub abandoned: u64,
    /// Packets refused because their stream tag was over the stream limit
    pub refused_streams: u64,
    pub total: JitterBufferStats,
    pub streams: BTreeMap<StreamTag, JitterBufferStats>,
}

pub struct Relay {
    socket: UdpSocket,
    output: UdpSocket,
    demux: Mutex<StreamDemux>,
    config: Config,
    counters: RelayCounters,
}

impl Relay {
    /// Bind the listen socket and connect the forwarding socket
    pub async fn bind(config: &Config) -> Result<Self> {
        let demux = StreamDemux::with_max_streams(config.jitter_config(), config.max_streams)?;

        let socket = UdpSocket::bind(&config.listen_addr)
            .await
            .context(format!("Failed to bind relay socket on {}", config.listen_addr))?;

        let forward = tokio::net::lookup_host(&config.forward_addr)
            .await
            .context(format!("Failed to resolve {}", config.forward_addr))?
            .next()
            .context(format!("No address found for {}", config.forward_addr))?;
        let output = bind_output(forward).await?;

        info!(
            "Relay listening on {}, forwarding to {}",
            socket.local_addr()?,
            forward
        );

        Ok(Self {
            socket,
            output,
            demux: Mutex::new(demux),
            config: config.clone(),
            counters: RelayCounters::default(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Run until `cancel` fires, then optionally flush and report
    pub async fn run(self, cancel: CancellationToken) -> Result<RelayReport> {
        info!(
            "Buffering with {}ms target latency, {} packets per stream",
            self.config.target_latency_ms, self.config.max_capacity
        );

        tokio::join!(self.ingest(&cancel), self.drain_loop(&cancel));

        if self.config.flush_on_shutdown {
            let flushed = {
                let mut drops: Vec<PacketDropped> = Vec::new();
                let flushed = self.lock_demux().flush(&mut drops);
                log_drops(&drops);
                flushed
            };
            self.counters
                .flushed
                .fetch_add(flushed.len() as u64, Ordering::Relaxed);
            info!("Flushing {} buffered packets", flushed.len());
            self.forward(&flushed).await;
        } else {
            let abandoned = self.lock_demux().len();
            if abandoned > 0 {
                info!("Discarding {} buffered packets at shutdown", abandoned);
            }
            self.counters
                .abandoned
                .store(abandoned as u64, Ordering::Relaxed);
        }

        let report = self.report();
        info!(
            "Relay stopped: {} datagrams in, {} forwarded, {} dropped",
            report.datagrams_received,
            report.forwarded,
            report.total.packets_dropped()
        );
        Ok(report)
    }

    async fn ingest(&self, cancel: &CancellationToken) {
        let mut buf = vec![0u8; wire::MAX_DATAGRAM_LEN];
        let mut first_packet_logged = false;

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, addr)) => {
                            self.counters.datagrams_received.fetch_add(1, Ordering::Relaxed);
                            if !first_packet_logged {
                                info!("First datagram received: {} bytes from {}", len, addr);
                                first_packet_logged = true;
                            }
                            self.admit_datagram(&buf[..len], addr);
                        }
                        Err(e) => {
                            warn!("Relay receive error: {}", e);
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    debug!("Ingest cancelled by shutdown signal");
                    break;
                }
            }
        }
    }

    fn admit_datagram(&self, data: &[u8], from: SocketAddr) {
        let Some(packet) = wire::decode(data) else {
            self.counters.malformed.fetch_add(1, Ordering::Relaxed);
            warn!("Malformed datagram: {} bytes from {}", data.len(), from);
            return;
        };

        let dropped = self.lock_demux().admit(packet, Instant::now());
        if let Some(drop) = dropped {
            log_drops(&[drop]);
        }
    }

    async fn drain_loop(&self, cancel: &CancellationToken) {
        let tick = self.config.tick();
        let stats_interval = self.config.stats_interval();
        let mut last_stats = Instant::now();

        loop {
            let next_release = self.lock_demux().next_release_at();
            let wait = next_release
                .map(|at| at.saturating_duration_since(Instant::now()))
                .unwrap_or(tick)
                .min(tick);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => {
                    debug!("Drain loop cancelled by shutdown signal");
                    break;
                }
            }

            let released = {
                let mut drops: Vec<PacketDropped> = Vec::new();
                let released = self.lock_demux().drain_releasable(Instant::now(), &mut drops);
                log_drops(&drops);
                released
            };
            self.forward(&released).await;

            if let Some(interval) = stats_interval {
                if last_stats.elapsed() >= interval {
                    self.log_stats();
                    last_stats = Instant::now();
                }
            }
        }
    }

    async fn forward(&self, packets: &[Packet]) {
        for packet in packets {
            match self.output.send(&wire::encode(packet)).await {
                Ok(_) => {
                    self.counters.forwarded.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.counters.send_errors.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        "Forward failed for {} ts={}: {}",
                        packet.stream_tag, packet.presentation_timestamp, e
                    );
                }
            }
        }
    }

    fn log_stats(&self) {
        let streams = self.lock_demux().stats();
        for (tag, stats) in &streams {
            info!(
                "Stream {}: received={} released={} dropped={} (full={}, evicted={}, stale={}) depth={}",
                tag,
                stats.packets_received,
                stats.packets_released,
                stats.packets_dropped(),
                stats.dropped_buffer_full,
                stats.dropped_evicted,
                stats.dropped_stale,
                stats.current_depth
            );
        }
    }

    fn report(&self) -> RelayReport {
        let (total, streams, refused_streams) = {
            let demux = self.lock_demux();
            (demux.total_stats(), demux.stats(), demux.refused_packets())
        };
        RelayReport {
            datagrams_received: self.counters.datagrams_received.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
            forwarded: self.counters.forwarded.load(Ordering::Relaxed),
            send_errors: self.counters.send_errors.load(Ordering::Relaxed),
            flushed: self.counters.flushed.load(Ordering::Relaxed),
            abandoned: self.counters.abandoned.load(Ordering::Relaxed),
            refused_streams,
            total,
            streams,
        }
    }

    /// A panic while holding the lock cannot leave the demux half-updated, so poisoning is ignored
    fn lock_demux(&self) -> MutexGuard<'_, StreamDemux> {
        self.demux.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bind a socket of the forward address's family and connect it
async fn bind_output(forward: SocketAddr) -> Result<UdpSocket> {
    let local: SocketAddr = match forward {
        SocketAddr::V4(_) => ([0, 0, 0, 0], 0).into(),
        SocketAddr::V6(_) => ([0u16; 8], 0).into(),
    };
    let output = UdpSocket::bind(local)
        .await
        .context("Failed to bind forwarding socket")?;
    output
        .connect(forward)
        .await
        .context(format!("Failed to connect forwarding socket to {}", forward))?;
    Ok(output)
}

fn log_drops(drops: &[PacketDropped]) {
    for drop in drops {
        debug!(
            "Dropped {} packet ts={} ({} bytes): {}",
            drop.stream_tag, drop.presentation_timestamp, drop.payload_len, drop.reason
        );
    }
}

/// Bind and run a relay until cancelled
pub async fn run_relay(config: &Config, cancel: CancellationToken) -> Result<RelayReport> {
    Relay::bind(config).await?.run(cancel).await
}

/// Sleep helper used by the binary for `--duration`
pub async fn cancel_after(duration: Duration, cancel: CancellationToken) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {
            info!("Run duration elapsed, shutting down");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
    }
}
