//! Framed packet layer
//!
//! Every message travels as a 12-byte header followed by `payload_size`
//! payload bytes:
//!
//! ```text
//! off  size  field
//! 0    4     magic        0x44414553 ("SEAD" little-endian)
//! 4    1     version      1
//! 5    1     type         message type
//! 6    2     flags        reserved, zero
//! 8    4     payload_size (<= 16 MiB)
//! ```
//!
//! [`PacketParser`] reassembles packets from an arbitrarily chunked byte
//! stream: feeds may split mid-header, mid-payload, or carry several
//! packets at once.

use crate::protocol::error::{Error, ErrorKind, Result};
use crate::network::wire::{Reader, Writer};

/// Protocol magic: "SEAD" when the u32 is laid out little-endian.
pub const PROTOCOL_MAGIC: u32 = 0x4441_4553;

/// Wire protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Serialized header size in bytes.
pub const PACKET_HEADER_SIZE: usize = 12;

/// Maximum payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Message catalogue, grouped by high nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    // Handshake (0x0x)
    Hello = 0x01,
    HelloAck = 0x02,
    VersionMismatch = 0x03,

    // Transfer control (0x1x)
    TransferRequest = 0x10,
    TransferAccept = 0x11,
    TransferReject = 0x12,
    TransferCancel = 0x13,
    TransferPause = 0x14,
    TransferResume = 0x15,

    // Data (0x2x)
    FileHeader = 0x20,
    FileChunk = 0x21,
    FileComplete = 0x22,
    ChunkAck = 0x23,
    ChunkNack = 0x24,

    // Status (0x3x)
    Progress = 0x30,
    Error = 0x31,

    // Keepalive (0x4x)
    Ping = 0x40,
    Pong = 0x41,

    // Clipboard (0x5x)
    ClipboardPush = 0x50,
    ClipboardAck = 0x51,
}

impl MessageType {
    pub fn from_byte(b: u8) -> Option<MessageType> {
        match b {
            0x01 => Some(MessageType::Hello),
            0x02 => Some(MessageType::HelloAck),
            0x03 => Some(MessageType::VersionMismatch),
            0x10 => Some(MessageType::TransferRequest),
            0x11 => Some(MessageType::TransferAccept),
            0x12 => Some(MessageType::TransferReject),
            0x13 => Some(MessageType::TransferCancel),
            0x14 => Some(MessageType::TransferPause),
            0x15 => Some(MessageType::TransferResume),
            0x20 => Some(MessageType::FileHeader),
            0x21 => Some(MessageType::FileChunk),
            0x22 => Some(MessageType::FileComplete),
            0x23 => Some(MessageType::ChunkAck),
            0x24 => Some(MessageType::ChunkNack),
            0x30 => Some(MessageType::Progress),
            0x31 => Some(MessageType::Error),
            0x40 => Some(MessageType::Ping),
            0x41 => Some(MessageType::Pong),
            0x50 => Some(MessageType::ClipboardPush),
            0x51 => Some(MessageType::ClipboardAck),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::Hello => "Hello",
            MessageType::HelloAck => "HelloAck",
            MessageType::VersionMismatch => "VersionMismatch",
            MessageType::TransferRequest => "TransferRequest",
            MessageType::TransferAccept => "TransferAccept",
            MessageType::TransferReject => "TransferReject",
            MessageType::TransferCancel => "TransferCancel",
            MessageType::TransferPause => "TransferPause",
            MessageType::TransferResume => "TransferResume",
            MessageType::FileHeader => "FileHeader",
            MessageType::FileChunk => "FileChunk",
            MessageType::FileComplete => "FileComplete",
            MessageType::ChunkAck => "ChunkAck",
            MessageType::ChunkNack => "ChunkNack",
            MessageType::Progress => "Progress",
            MessageType::Error => "Error",
            MessageType::Ping => "Ping",
            MessageType::Pong => "Pong",
            MessageType::ClipboardPush => "ClipboardPush",
            MessageType::ClipboardAck => "ClipboardAck",
        }
    }
}

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub magic: u32,
    pub version: u8,
    pub msg_type: u8,
    pub flags: u16,
    pub payload_size: u32,
}

impl PacketHeader {
    pub fn new(msg_type: MessageType, payload_size: u32) -> Self {
        PacketHeader {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
            msg_type: msg_type as u8,
            flags: 0,
            payload_size,
        }
    }

    /// Message type of this packet, if the byte is in the catalogue.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_byte(self.msg_type)
    }

    /// Serialize to the 12-byte wire layout.
    pub fn encode(&self) -> [u8; PACKET_HEADER_SIZE] {
        let mut w = Writer::with_capacity(PACKET_HEADER_SIZE);
        w.put_u32(self.magic);
        w.put_u8(self.version);
        w.put_u8(self.msg_type);
        w.put_u16(self.flags);
        w.put_u32(self.payload_size);
        let bytes = w.into_bytes();
        let mut out = [0u8; PACKET_HEADER_SIZE];
        out.copy_from_slice(&bytes);
        out
    }

    /// Decode and validate a header.
    ///
    /// Rejects bad magic, version mismatch, and oversized payloads.
    pub fn decode(buf: &[u8]) -> Result<PacketHeader> {
        let mut r = Reader::new(buf);
        let magic = r.get_u32()?;
        let version = r.get_u8()?;
        let msg_type = r.get_u8()?;
        let flags = r.get_u16()?;
        let payload_size = r.get_u32()?;

        if magic != PROTOCOL_MAGIC {
            return Err(Error::new(
                ErrorKind::ProtocolBadMagic,
                format!("expected {:#010x}, got {:#010x}", PROTOCOL_MAGIC, magic),
            ));
        }
        if version != PROTOCOL_VERSION {
            return Err(Error::new(
                ErrorKind::ProtocolVersionMismatch,
                format!("expected version {}, got {}", PROTOCOL_VERSION, version),
            ));
        }
        if payload_size > MAX_PAYLOAD_SIZE {
            return Err(Error::new(
                ErrorKind::ProtocolOverflow,
                format!("payload of {} bytes exceeds 16 MiB", payload_size),
            ));
        }

        Ok(PacketHeader {
            magic,
            version,
            msg_type,
            flags,
            payload_size,
        })
    }
}

/// Build a complete packet: header followed by the payload.
pub fn build_packet(msg_type: MessageType, payload: &[u8]) -> Vec<u8> {
    let header = PacketHeader::new(msg_type, payload.len() as u32);
    let mut out = Vec::with_capacity(PACKET_HEADER_SIZE + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    out
}

/// Incremental packet parser over a byte stream.
///
/// Feed bytes in any chunking; once a full packet is buffered,
/// [`PacketParser::next_packet`] consumes exactly that prefix.
#[derive(Debug, Default)]
pub struct PacketParser {
    buffer: Vec<u8>,
}

impl PacketParser {
    pub fn new() -> Self {
        PacketParser { buffer: Vec::new() }
    }

    /// Append incoming bytes to the internal buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// True once the buffer holds at least one complete packet.
    pub fn has_packet(&self) -> bool {
        if self.buffer.len() < PACKET_HEADER_SIZE {
            return false;
        }
        let payload_size = u32::from_le_bytes([
            self.buffer[8],
            self.buffer[9],
            self.buffer[10],
            self.buffer[11],
        ]) as usize;
        self.buffer.len() >= PACKET_HEADER_SIZE + payload_size
    }

    /// Consume and return the next complete packet.
    ///
    /// Returns `InvalidState` when no full packet is buffered; framing
    /// errors (bad magic, version, overflow) propagate from header
    /// validation and leave the buffer untouched so the caller can tear
    /// the connection down.
    pub fn next_packet(&mut self) -> Result<(PacketHeader, Vec<u8>)> {
        if !self.has_packet() {
            return Err(Error::new(
                ErrorKind::InvalidState,
                "no complete packet buffered",
            ));
        }

        let header = PacketHeader::decode(&self.buffer[..PACKET_HEADER_SIZE])?;
        let total = PACKET_HEADER_SIZE + header.payload_size as usize;
        let payload = self.buffer[PACKET_HEADER_SIZE..total].to_vec();
        self.buffer.drain(..total);

        Ok((header, payload))
    }

    pub fn buffered_size(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_wire_layout() {
        // spec scenario: type 0x10, payload_size 1024
        let header = PacketHeader::new(MessageType::TransferRequest, 1024);
        let bytes = header.encode();
        assert_eq!(
            bytes,
            [0x53, 0x45, 0x41, 0x44, 0x01, 0x10, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00]
        );
    }

    #[test]
    fn test_header_round_trip() {
        let header = PacketHeader::new(MessageType::FileChunk, 65_536);
        let decoded = PacketHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut bytes = PacketHeader::new(MessageType::Ping, 0).encode();
        bytes[0] = 0xFF;
        let err = PacketHeader::decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolBadMagic);
    }

    #[test]
    fn test_header_rejects_version_mismatch() {
        let mut bytes = PacketHeader::new(MessageType::Ping, 0).encode();
        bytes[4] = 2;
        let err = PacketHeader::decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolVersionMismatch);
    }

    #[test]
    fn test_header_payload_size_boundary() {
        // Exactly 16 MiB is accepted
        let header = PacketHeader::new(MessageType::FileChunk, MAX_PAYLOAD_SIZE);
        assert!(PacketHeader::decode(&header.encode()).is_ok());

        // One byte over is rejected
        let mut bytes = header.encode();
        bytes[8..12].copy_from_slice(&(MAX_PAYLOAD_SIZE + 1).to_le_bytes());
        let err = PacketHeader::decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolOverflow);
    }

    #[test]
    fn test_header_truncated() {
        let err = PacketHeader::decode(&[0x53, 0x45]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecodeTruncated);
    }

    #[test]
    fn test_message_type_round_trip() {
        let all = [
            MessageType::Hello,
            MessageType::HelloAck,
            MessageType::VersionMismatch,
            MessageType::TransferRequest,
            MessageType::TransferAccept,
            MessageType::TransferReject,
            MessageType::TransferCancel,
            MessageType::TransferPause,
            MessageType::TransferResume,
            MessageType::FileHeader,
            MessageType::FileChunk,
            MessageType::FileComplete,
            MessageType::ChunkAck,
            MessageType::ChunkNack,
            MessageType::Progress,
            MessageType::Error,
            MessageType::Ping,
            MessageType::Pong,
            MessageType::ClipboardPush,
            MessageType::ClipboardAck,
        ];
        for t in all {
            assert_eq!(MessageType::from_byte(t as u8), Some(t));
        }
        assert_eq!(MessageType::from_byte(0xEE), None);
    }

    #[test]
    fn test_empty_payload() {
        let packet = build_packet(MessageType::Ping, &[]);
        assert_eq!(packet.len(), PACKET_HEADER_SIZE);

        let mut parser = PacketParser::new();
        parser.feed(&packet);
        let (header, payload) = parser.next_packet().unwrap();
        assert_eq!(header.message_type(), Some(MessageType::Ping));
        assert!(payload.is_empty());
    }

    #[test]
    fn test_parser_split_feed() {
        // spec scenario: feed half, then the rest
        let packet = build_packet(MessageType::Hello, &[0xAA, 0xBB, 0xCC]);
        let half = packet.len() / 2;

        let mut parser = PacketParser::new();
        parser.feed(&packet[..half]);
        assert!(!parser.has_packet());

        parser.feed(&packet[half..]);
        assert!(parser.has_packet());

        let (header, payload) = parser.next_packet().unwrap();
        assert_eq!(header.message_type(), Some(MessageType::Hello));
        assert_eq!(payload, vec![0xAA, 0xBB, 0xCC]);
        assert_eq!(parser.buffered_size(), 0);
    }

    #[test]
    fn test_parser_byte_at_a_time() {
        let packet = build_packet(MessageType::Progress, &[1, 2, 3, 4, 5]);
        let mut parser = PacketParser::new();
        for (i, byte) in packet.iter().enumerate() {
            assert_eq!(parser.has_packet(), false, "complete at byte {}", i);
            parser.feed(std::slice::from_ref(byte));
        }
        assert!(parser.has_packet());
        let (_, payload) = parser.next_packet().unwrap();
        assert_eq!(payload, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_parser_multiple_packets_one_feed() {
        let a = build_packet(MessageType::Ping, &[]);
        let b = build_packet(MessageType::FileComplete, &[7; 24]);
        let c = build_packet(MessageType::Pong, &[]);

        let mut stream = Vec::new();
        stream.extend_from_slice(&a);
        stream.extend_from_slice(&b);
        stream.extend_from_slice(&c);

        let mut parser = PacketParser::new();
        parser.feed(&stream);

        let (h1, _) = parser.next_packet().unwrap();
        assert_eq!(h1.message_type(), Some(MessageType::Ping));
        let (h2, p2) = parser.next_packet().unwrap();
        assert_eq!(h2.message_type(), Some(MessageType::FileComplete));
        assert_eq!(p2.len(), 24);
        let (h3, _) = parser.next_packet().unwrap();
        assert_eq!(h3.message_type(), Some(MessageType::Pong));
        assert!(!parser.has_packet());
    }

    #[test]
    fn test_parser_chunked_equals_unchunked() {
        // Same stream fed in varying chunk sizes yields identical packets.
        let packets = [
            build_packet(MessageType::Hello, &[0x11; 40]),
            build_packet(MessageType::FileChunk, &[0x22; 300]),
            build_packet(MessageType::Ping, &[]),
            build_packet(MessageType::ChunkAck, &[0x33; 25]),
        ];
        let stream: Vec<u8> = packets.iter().flatten().copied().collect();

        let collect = |chunk_size: usize| {
            let mut parser = PacketParser::new();
            let mut out = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                parser.feed(chunk);
                while parser.has_packet() {
                    out.push(parser.next_packet().unwrap());
                }
            }
            out
        };

        let whole = collect(stream.len());
        for size in [1, 3, 7, 13, 64] {
            assert_eq!(collect(size), whole, "chunk size {}", size);
        }
    }

    #[test]
    fn test_parser_next_without_packet() {
        let mut parser = PacketParser::new();
        let err = parser.next_packet().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_parser_remaining_is_suffix() {
        let a = build_packet(MessageType::Ping, &[]);
        let b = build_packet(MessageType::Pong, &[]);
        let mut stream = a.clone();
        stream.extend_from_slice(&b);

        let mut parser = PacketParser::new();
        parser.feed(&stream);
        parser.next_packet().unwrap();
        assert_eq!(parser.buffered_size(), b.len());
    }

    #[test]
    fn test_parser_reset() {
        let mut parser = PacketParser::new();
        parser.feed(&[1, 2, 3]);
        parser.reset();
        assert_eq!(parser.buffered_size(), 0);
    }
}
