/// Relay datagram framing
///
/// ```text
/// 0       1                               9
/// +-------+-------------------------------+----------------
/// |  tag  |  presentation timestamp (BE)  |  payload ...
/// +-------+-------------------------------+----------------
/// ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::jitter::{Packet, StreamTag};

/// Tag byte + 8-byte timestamp
pub const HEADER_LEN: usize = 9;

/// Largest datagram the relay will receive
pub const MAX_DATAGRAM_LEN: usize = 65_535;

/// Parse a datagram. Returns None if it is too short to carry a header.
pub fn decode(data: &[u8]) -> Option<Packet> {
    if data.len() < HEADER_LEN {
        return None;
    }

    let tag = StreamTag(data[0]);
    let mut ts = [0u8; 8];
    ts.copy_from_slice(&data[1..HEADER_LEN]);

    Some(Packet {
        stream_tag: tag,
        presentation_timestamp: i64::from_be_bytes(ts),
        payload: Bytes::copy_from_slice(&data[HEADER_LEN..]),
    })
}

pub fn encode(packet: &Packet) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + packet.payload.len());
    encode_into(packet, &mut buf);
    buf.freeze()
}

pub fn encode_into(packet: &Packet, buf: &mut BytesMut) {
    buf.put_u8(packet.stream_tag.0);
    buf.put_i64(packet.presentation_timestamp);
    buf.put_slice(&packet.payload);
}


/// Kani formal verification proofs
/// Run with: cargo kani --tests
#[cfg(kani)]
mod kani_proofs {
    use super::*;

    /// Proves: decode never panics on short input
    #[kani::proof]
    fn decode_never_panics() {
        let data: [u8; 16] = kani::any();
        let len: usize = kani::any();
        kani::assume(len <= data.len());
        let _ = decode(&data[..len]);
    }

    /// Proves: decode accepts exactly the inputs that carry a full header
    #[kani::proof]
    fn decode_accepts_iff_header_present() {
        let data: [u8; 12] = kani::any();
        let len: usize = kani::any();
        kani::assume(len <= data.len());
        let result = decode(&data[..len]);
        kani::assert(result.is_some() == (len >= HEADER_LEN), "header length gate");
    }
}
