pub mod buffer;
pub mod packet;

pub use buffer::{Drain, JitterBuffer, JitterBufferConfig, JitterBufferStats};
pub use packet::{DropReason, DropSink, Packet, PacketDropped, StreamTag};
