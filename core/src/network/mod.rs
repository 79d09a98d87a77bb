//! Wire formats and low-level framing
//!
//! - `wire`: endianness-stable codec primitives
//! - `packet`: 12-byte framed header, packet builder, streaming parser
//! - `messages`: the typed message catalogue

pub mod messages;
pub mod packet;
pub mod wire;

pub use packet::{
    build_packet, MessageType, PacketHeader, PacketParser, MAX_PAYLOAD_SIZE, PACKET_HEADER_SIZE,
    PROTOCOL_MAGIC, PROTOCOL_VERSION,
};
