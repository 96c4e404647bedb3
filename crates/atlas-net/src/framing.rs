//! Outer wire framing for packets sent over a byte-stream transport.
//!
//! Wire format: 4-byte little-endian length prefix (covers everything that
//! follows) then `type_id: u32 (LE)` then the packet body. The transport
//! owns this length prefix; packet bodies themselves carry no length
//! prefix of their own.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too large: {0} bytes (max {MAX_FRAME_SIZE})")]
    TooLarge(usize),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single wire frame: a packet type id plus its encoded body.
#[derive(Clone, Debug)]
pub struct PacketFrame {
    pub type_id: u32,
    pub body: Vec<u8>,
}

impl PacketFrame {
    pub fn new(type_id: u32, body: Vec<u8>) -> Self {
        Self { type_id, body }
    }
}

/// Length-prefixed codec for [`PacketFrame`]s over a `tokio_util`
/// `Framed` byte stream.
#[derive(Default)]
pub struct PacketFrameCodec;

impl PacketFrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for PacketFrameCodec {
    type Item = PacketFrame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let length = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(length));
        }
        if src.len() < 4 + length {
            return Ok(None);
        }

        src.advance(4);
        let type_id = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        src.advance(4);
        let body = src.split_to(length - 4).to_vec();

        Ok(Some(PacketFrame { type_id, body }))
    }
}

impl Encoder<PacketFrame> for PacketFrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: PacketFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let length = 4 + item.body.len();
        if length > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(length));
        }
        dst.put_u32_le(length as u32);
        dst.put_u32_le(item.type_id);
        dst.put_slice(&item.body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip() {
        let mut codec = PacketFrameCodec::new();
        let frame = PacketFrame::new(7, vec![1, 2, 3, 4, 5]);

        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.type_id, frame.type_id);
        assert_eq!(decoded.body, frame.body);
    }

    #[test]
    fn partial_frame_returns_none() {
        let mut codec = PacketFrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32_le(20);
        buf.put_u32_le(1);
        buf.put_slice(&[1, 2, 3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
