/// Presentation-order jitter buffer
/// Absorbs arrival-time jitter and reordering for one media sub-stream
///
/// Packets are held for a fixed target latency measured from their own arrival,
/// then released in presentation timestamp order. Memory is bounded by a packet
/// capacity; under pressure the earliest packet is evicted. Time is always
/// passed in by the caller, the buffer never reads a clock.

use std::collections::BTreeMap;
use std::iter::FusedIterator;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, trace, warn};

use super::packet::{DropReason, DropSink, Packet, PacketDropped};
use crate::error::{JitterError, Result};

/// Configuration for the jitter buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitterBufferConfig {
    /// How long a packet waits after arrival before it may be released (default: 200ms)
    /// Higher values = more jitter tolerance but higher latency
    pub target_latency: Duration,
    /// Maximum number of packets held at once (default: 256)
    pub max_capacity: usize,
}

impl Default for JitterBufferConfig {
    fn default() -> Self {
        Self {
            target_latency: Duration::from_millis(200),
            max_capacity: 256,
        }
    }
}

impl JitterBufferConfig {
    pub fn validate(&self) -> Result<()> {
        if self.target_latency.is_zero() {
            return Err(JitterError::InvalidConfiguration(
                "target_latency must be greater than zero".to_string(),
            ));
        }
        if self.max_capacity == 0 {
            return Err(JitterError::InvalidConfiguration(
                "max_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Ordering key: presentation timestamp, then arrival order for ties
type ItemKey = (i64, u64);

#[derive(Debug)]
struct BufferedItem {
    packet: Packet,
    arrival_time: Instant,
}

/// Jitter buffer state
#[derive(Debug)]
pub struct JitterBuffer {
    config: JitterBufferConfig,
    items: BTreeMap<ItemKey, BufferedItem>,
    /// Assigned to each admitted packet, strictly increasing
    next_arrival_seq: u64,
    /// Timestamp of the most recently released packet, None until the first release
    last_released: Option<i64>,
    stats: JitterBufferStats,
}

impl JitterBuffer {
    pub fn new(config: JitterBufferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_validated(config))
    }

    /// Caller guarantees `config.validate()` already passed
    pub(crate) fn from_validated(config: JitterBufferConfig) -> Self {
        Self {
            config,
            items: BTreeMap::new(),
            next_arrival_seq: 0,
            last_released: None,
            stats: JitterBufferStats::default(),
        }
    }

    /// Admit a packet that arrived at `now`.
    ///
    /// Returns the drop caused by this admission, if any: either the new packet
    /// itself (`BufferFull`) or the evicted earliest packet (`EvictedForCapacity`).
    /// At most one packet is dropped per call.
    pub fn admit(&mut self, packet: Packet, now: Instant) -> Option<PacketDropped> {
        self.stats.packets_received += 1;
        let ts = packet.presentation_timestamp;
        let mut dropped = None;

        if self.items.len() >= self.config.max_capacity {
            if let Some((&(earliest, _), _)) = self.items.first_key_value() {
                if ts < earliest {
                    self.stats.dropped_buffer_full += 1;
                    warn!(
                        "Buffer full, rejecting packet: ts={} (earliest held {})",
                        ts, earliest
                    );
                    return Some(PacketDropped::of(&packet, DropReason::BufferFull));
                }
            }

            if let Some((_, evicted)) = self.items.pop_first() {
                self.stats.dropped_evicted += 1;
                warn!(
                    "Buffer full, evicted packet: ts={} to admit ts={}",
                    evicted.packet.presentation_timestamp, ts
                );
                dropped = Some(PacketDropped::of(
                    &evicted.packet,
                    DropReason::EvictedForCapacity,
                ));
            }
        }

        let seq = self.next_arrival_seq;
        self.next_arrival_seq += 1;
        self.items.insert(
            (ts, seq),
            BufferedItem {
                packet,
                arrival_time: now,
            },
        );
        trace!("Buffered packet: ts={}, depth={}", ts, self.items.len());

        dropped
    }

    /// Release every packet that has waited at least the target latency as of `now`.
    ///
    /// The returned iterator is lazy: each `next()` removes one packet. Packets
    /// that would go backwards in timestamp order are dropped into `drops` with
    /// `StaleOrder` instead of being yielded. Anything not pulled from the
    /// iterator stays buffered for the next call.
    pub fn drain_releasable<S: DropSink>(&mut self, now: Instant, drops: S) -> Drain<'_, S> {
        Drain {
            buffer: self,
            now,
            drops,
        }
    }

    /// True if the earliest packet (if any) may be released at `now`
    pub fn is_releasable(&self, now: Instant) -> bool {
        self.items
            .first_key_value()
            .is_some_and(|(_, item)| self.has_aged(item, now))
    }

    /// Instant at which the earliest packet becomes releasable
    pub fn next_release_at(&self) -> Option<Instant> {
        let (_, item) = self.items.first_key_value()?;
        item.arrival_time.checked_add(self.config.target_latency)
    }

    /// Release everything held, in order, regardless of age. For end of stream.
    pub fn flush<S: DropSink>(&mut self, mut drops: S) -> Vec<Packet> {
        let mut result = Vec::with_capacity(self.items.len());
        while let Some((_, item)) = self.items.pop_first() {
            if let Some(packet) = self.release(item.packet, &mut drops) {
                result.push(packet);
            }
        }
        debug!("Flushed {} packets", result.len());
        result
    }

    /// Start a new stream session: discard held packets and forget the last
    /// released timestamp, so a timestamp discontinuity is not treated as stale.
    pub fn reset(&mut self) {
        let discarded = self.items.len();
        self.stats.discarded_on_reset += discarded as u64;
        self.items.clear();
        self.last_released = None;
        debug!("Jitter buffer reset, discarded {} packets", discarded);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.config.max_capacity
    }

    pub fn config(&self) -> &JitterBufferConfig {
        &self.config
    }

    /// Earliest buffered presentation timestamp
    pub fn peek_timestamp(&self) -> Option<i64> {
        self.items.first_key_value().map(|(&(ts, _), _)| ts)
    }

    pub fn last_released_timestamp(&self) -> Option<i64> {
        self.last_released
    }

    /// Held timestamps in release order
    pub fn timestamps(&self) -> impl Iterator<Item = i64> + '_ {
        self.items.keys().map(|&(ts, _)| ts)
    }

    /// Get buffer statistics
    pub fn stats(&self) -> JitterBufferStats {
        JitterBufferStats {
            current_depth: self.items.len(),
            ..self.stats.clone()
        }
    }

    fn has_aged(&self, item: &BufferedItem, now: Instant) -> bool {
        now.saturating_duration_since(item.arrival_time) >= self.config.target_latency
    }

    fn pop_releasable(&mut self, now: Instant) -> Option<BufferedItem> {
        let (_, head) = self.items.first_key_value()?;
        if !self.has_aged(head, now) {
            return None;
        }
        self.items.pop_first().map(|(_, item)| item)
    }

    /// Apply the ordering rule to a packet leaving the buffer
    fn release<S: DropSink>(&mut self, packet: Packet, drops: &mut S) -> Option<Packet> {
        let ts = packet.presentation_timestamp;
        if let Some(last) = self.last_released {
            if ts < last {
                self.stats.dropped_stale += 1;
                debug!("Dropping stale packet: ts={} (already released {})", ts, last);
                drops.dropped(PacketDropped::of(&packet, DropReason::StaleOrder));
                return None;
            }
        }

        self.last_released = Some(ts);
        self.stats.packets_released += 1;
        trace!("Released packet: ts={}, depth={}", ts, self.items.len());
        Some(packet)
    }
}

/// Iterator returned by [`JitterBuffer::drain_releasable`]
#[derive(Debug)]
pub struct Drain<'a, S: DropSink> {
    buffer: &'a mut JitterBuffer,
    now: Instant,
    drops: S,
}

impl<S: DropSink> Iterator for Drain<'_, S> {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        loop {
            let item = self.buffer.pop_releasable(self.now)?;
            if let Some(packet) = self.buffer.release(item.packet, &mut self.drops) {
                return Some(packet);
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.buffer.len()))
    }
}

// `now` is fixed for the life of the iterator, so once the head is too young it stays too young
impl<S: DropSink> FusedIterator for Drain<'_, S> {}

/// Statistics about jitter buffer operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JitterBufferStats {
    pub packets_received: u64,
    pub packets_released: u64,
    pub dropped_buffer_full: u64,
    pub dropped_evicted: u64,
    pub dropped_stale: u64,
    pub discarded_on_reset: u64,
    pub current_depth: usize,
}

impl JitterBufferStats {
    pub fn packets_dropped(&self) -> u64 {
        self.dropped_buffer_full + self.dropped_evicted + self.dropped_stale
    }

    /// Add another buffer's counters into this one
    pub fn accumulate(&mut self, other: &JitterBufferStats) {
        self.packets_received += other.packets_received;
        self.packets_released += other.packets_released;
        self.dropped_buffer_full += other.dropped_buffer_full;
        self.dropped_evicted += other.dropped_evicted;
        self.dropped_stale += other.dropped_stale;
        self.discarded_on_reset += other.discarded_on_reset;
        self.current_depth += other.current_depth;
    }
}
