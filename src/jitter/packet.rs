/// Packet types flowing through the jitter buffer, and the drop signals it emits.

use bytes::Bytes;
use serde::Serialize;
use std::fmt;

/// Identifies the logical sub-stream a packet belongs to (video, audio, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StreamTag(pub u8);

impl StreamTag {
    pub const VIDEO: StreamTag = StreamTag(0);
    pub const AUDIO: StreamTag = StreamTag(1);
}

impl fmt::Display for StreamTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            StreamTag::VIDEO => write!(f, "video"),
            StreamTag::AUDIO => write!(f, "audio"),
            StreamTag(other) => write!(f, "stream-{}", other),
        }
    }
}

/// A unit of media data. The payload is opaque to the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub stream_tag: StreamTag,
    /// Caller-defined clock (90kHz ticks, microseconds, ...), consistent per buffer
    pub presentation_timestamp: i64,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(stream_tag: StreamTag, presentation_timestamp: i64, payload: impl Into<Bytes>) -> Self {
        Self {
            stream_tag,
            presentation_timestamp,
            payload: payload.into(),
        }
    }
}

/// Why a packet left the buffer without being released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DropReason {
    /// Buffer was full and the new packet was older than everything held
    BufferFull,
    /// Earliest held packet was evicted to make room for a newer one
    EvictedForCapacity,
    /// Timestamp precedes one already released downstream
    StaleOrder,
    /// Stream tag was not admitted because the stream limit is reached
    StreamLimit,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DropReason::BufferFull => "buffer full",
            DropReason::EvictedForCapacity => "evicted for capacity",
            DropReason::StaleOrder => "stale order",
            DropReason::StreamLimit => "stream limit",
        };
        f.write_str(s)
    }
}

/// Informational signal that a packet was dropped. Not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketDropped {
    pub reason: DropReason,
    pub stream_tag: StreamTag,
    pub presentation_timestamp: i64,
    pub payload_len: usize,
}

impl PacketDropped {
    pub(crate) fn of(packet: &Packet, reason: DropReason) -> Self {
        Self {
            reason,
            stream_tag: packet.stream_tag,
            presentation_timestamp: packet.presentation_timestamp,
            payload_len: packet.payload.len(),
        }
    }
}

/// Receives drop signals produced while draining.
///
/// `Vec<PacketDropped>` collects them; `()` discards them.
pub trait DropSink {
    fn dropped(&mut self, drop: PacketDropped);
}

impl DropSink for Vec<PacketDropped> {
    fn dropped(&mut self, drop: PacketDropped) {
        self.push(drop);
    }
}

impl DropSink for () {
    fn dropped(&mut self, _drop: PacketDropped) {}
}

impl<S: DropSink + ?Sized> DropSink for &mut S {
    fn dropped(&mut self, drop: PacketDropped) {
        (**self).dropped(drop);
    }
}
