/// Routes multiplexed packets to one jitter buffer per stream tag.
/// Streams are buffered independently; cross-stream sync is left to the consumer.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::{JitterError, Result};
use crate::jitter::{
    DropReason, DropSink, JitterBuffer, JitterBufferConfig, JitterBufferStats, Packet,
    PacketDropped, StreamTag,
};

/// Every possible tag byte
pub const DEFAULT_MAX_STREAMS: usize = 256;

#[derive(Debug)]
pub struct StreamDemux {
    config: JitterBufferConfig,
    buffers: BTreeMap<StreamTag, JitterBuffer>,
    max_streams: usize,
    /// Tags turned away by the stream limit, each warned about once
    refused_tags: BTreeSet<StreamTag>,
    refused_packets: u64,
}

impl StreamDemux {
    pub fn new(config: JitterBufferConfig) -> Result<Self> {
        Self::with_max_streams(config, DEFAULT_MAX_STREAMS)
    }

    /// Bound the number of per-tag buffers. Packets for tags beyond the limit
    /// are dropped with `StreamLimit` and never allocate a buffer.
    pub fn with_max_streams(config: JitterBufferConfig, max_streams: usize) -> Result<Self> {
        config.validate()?;
        if max_streams == 0 {
            return Err(JitterError::InvalidConfiguration(
                "max_streams must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            config,
            buffers: BTreeMap::new(),
            max_streams,
            refused_tags: BTreeSet::new(),
            refused_packets: 0,
        })
    }

    /// Admit a packet into its stream's buffer, creating the buffer on first
    /// sight while under the stream limit
    pub fn admit(&mut self, packet: Packet, now: Instant) -> Option<PacketDropped> {
        let tag = packet.stream_tag;
        if let Some(buffer) = self.buffers.get_mut(&tag) {
            return buffer.admit(packet, now);
        }

        if self.buffers.len() >= self.max_streams {
            self.refused_packets += 1;
            if self.refused_tags.insert(tag) {
                warn!(
                    "Stream limit of {} reached, refusing stream {}",
                    self.max_streams, tag
                );
            }
            return Some(PacketDropped::of(&packet, DropReason::StreamLimit));
        }

        info!("New stream: {}", tag);
        self.buffers
            .entry(tag)
            .or_insert_with(|| JitterBuffer::from_validated(self.config.clone()))
            .admit(packet, now)
    }

    pub fn max_streams(&self) -> usize {
        self.max_streams
    }

    /// Packets dropped because their stream was refused
    pub fn refused_packets(&self) -> u64 {
        self.refused_packets
    }

    /// Drain every stream. Packets are grouped by stream, each group in timestamp order.
    pub fn drain_releasable<S: DropSink>(&mut self, now: Instant, mut drops: S) -> Vec<Packet> {
        let mut released = Vec::new();
        for buffer in self.buffers.values_mut() {
            released.extend(buffer.drain_releasable(now, &mut drops));
        }
        released
    }

    pub fn is_releasable(&self, now: Instant) -> bool {
        self.buffers.values().any(|b| b.is_releasable(now))
    }

    /// Earliest instant at which any stream has a releasable packet
    pub fn next_release_at(&self) -> Option<Instant> {
        self.buffers.values().filter_map(JitterBuffer::next_release_at).min()
    }

    /// Release everything held in every stream, for shutdown
    pub fn flush<S: DropSink>(&mut self, mut drops: S) -> Vec<Packet> {
        let mut released = Vec::new();
        for buffer in self.buffers.values_mut() {
            released.extend(buffer.flush(&mut drops));
        }
        released
    }

    /// Start a new session on one stream. Returns false if the stream is unknown.
    pub fn reset_stream(&mut self, tag: StreamTag) -> bool {
        match self.buffers.get_mut(&tag) {
            Some(buffer) => {
                debug!("Resetting stream {}", tag);
                buffer.reset();
                true
            }
            None => false,
        }
    }

    pub fn stream(&self, tag: StreamTag) -> Option<&JitterBuffer> {
        self.buffers.get(&tag)
    }

    pub fn len(&self) -> usize {
        self.buffers.values().map(JitterBuffer::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.values().all(JitterBuffer::is_empty)
    }

    pub fn stats(&self) -> BTreeMap<StreamTag, JitterBufferStats> {
        self.buffers
            .iter()
            .map(|(tag, buffer)| (*tag, buffer.stats()))
            .collect()
    }

    /// Counters summed over all streams
    pub fn total_stats(&self) -> JitterBufferStats {
        let mut total = JitterBufferStats::default();
        for buffer in self.buffers.values() {
            total.accumulate(&buffer.stats());
        }
        total
    }
}
