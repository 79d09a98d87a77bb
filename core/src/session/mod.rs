//! Authenticated encrypted sessions over an external transport
//!
//! The connection layer (out of scope here) hands in a connected duplex
//! byte stream. `handshake` runs the plaintext Hello exchange and key
//! agreement; `channel` then carries every application packet inside the
//! AEAD tunnel.

pub mod channel;
pub mod handshake;

pub use channel::{
    read_plain_packet, secure_channel, write_plain_packet, ChannelMessage, ChannelReader,
    ChannelWriter, Transport,
};
pub use handshake::{handshake, HandshakeOutcome, HandshakeRole, LocalDeviceInfo};
