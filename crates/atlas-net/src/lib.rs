//! Reliable, ordered, identity-authenticated messaging between named
//! peers (C2, C4, `spec.md` §4.1/§6): the packet codec, the outer wire
//! framing, the closed packet enum + extension registry, and the
//! concrete TCP `Transport`.

pub mod codec;
pub mod framing;
pub mod packet;
pub mod transport;

pub use codec::{ByteReader, ByteWriter, CodecError};
pub use framing::{FrameError, PacketFrame, PacketFrameCodec};
pub use packet::{Packet, PacketBody, PacketRegistry};
pub use transport::{
    AllowAllAuthorizer, ConnectionState, ConnectionTelemetry, IdentityAuthorizer, SendFlag, Transport, TransportError,
    TransportEvent,
};
