//! mediajitter - presentation-order jitter buffering for live media packet streams
//!
//! The [`jitter`] module is the buffer itself and has no I/O. The rest of the
//! crate is the relay binary built around it.

pub mod cli;
pub mod config;
pub mod demux;
pub mod error;
pub mod jitter;
pub mod relay;
pub mod wire;

pub use demux::StreamDemux;
pub use error::JitterError;
pub use jitter::{
    DropReason, DropSink, JitterBuffer, JitterBufferConfig, JitterBufferStats, Packet,
    PacketDropped, StreamTag,
};
