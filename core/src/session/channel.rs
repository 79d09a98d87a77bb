//! Encrypted packet channel over a duplex transport
//!
//! After the handshake, every packet is sealed with the session key. The
//! wire layout per packet is `[12-byte header] [24-byte nonce]
//! [ciphertext] [16-byte tag]`; the header's `payload_size` counts nonce,
//! ciphertext and tag, and the header bytes are the AEAD associated data
//! so type and size cannot be altered without detection.
//!
//! The writer half is cloneable; a mutex serializes sends so two writers
//! never interleave bytes on the stream.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tracing::warn;

use crate::network::packet::{
    MessageType, PacketHeader, PacketParser, PACKET_HEADER_SIZE,
};
use crate::protocol::error::{Error, ErrorKind, Result};
use crate::security::aead;

/// A connected duplex byte stream handed in by the connection layer.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Transport for T {}

/// Read buffer size for the channel reader.
const READ_BUF_SIZE: usize = 16 * 1024;

/// One decrypted application message.
#[derive(Debug)]
pub struct ChannelMessage {
    pub msg_type: MessageType,
    pub payload: Vec<u8>,
}

/// Write a plaintext packet. Used for the Hello exchange only.
pub async fn write_plain_packet<T: AsyncWrite + Unpin>(
    io: &mut T,
    msg_type: MessageType,
    payload: &[u8],
) -> Result<()> {
    let packet = crate::network::packet::build_packet(msg_type, payload);
    io.write_all(&packet).await?;
    io.flush().await?;
    Ok(())
}

/// Read one plaintext packet. Used for the Hello exchange only.
pub async fn read_plain_packet<T: AsyncRead + Unpin>(
    io: &mut T,
    parser: &mut PacketParser,
) -> Result<(PacketHeader, Vec<u8>)> {
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        if parser.has_packet() {
            return parser.next_packet();
        }
        let n = io.read(&mut buf).await?;
        if n == 0 {
            return Err(Error::new(
                ErrorKind::ConnectionLost,
                "transport closed during read",
            ));
        }
        parser.feed(&buf[..n]);
    }
}

/// Cloneable, serialized writer half of a secure channel.
pub struct ChannelWriter<T: Transport> {
    io: Arc<Mutex<WriteHalf<T>>>,
    key: [u8; 32],
}

impl<T: Transport> Clone for ChannelWriter<T> {
    fn clone(&self) -> Self {
        ChannelWriter {
            io: self.io.clone(),
            key: self.key,
        }
    }
}

impl<T: Transport> ChannelWriter<T> {
    /// Seal and send one message.
    pub async fn send(&self, msg_type: MessageType, payload: &[u8]) -> Result<()> {
        let sealed_len = aead::NONCE_SIZE + payload.len() + aead::TAG_SIZE;
        let header = PacketHeader::new(msg_type, sealed_len as u32);
        let header_bytes = header.encode();
        let sealed = aead::encrypt(payload, &self.key, &header_bytes)?;

        let mut packet = Vec::with_capacity(PACKET_HEADER_SIZE + sealed.len());
        packet.extend_from_slice(&header_bytes);
        packet.extend_from_slice(&sealed);

        let mut io = self.io.lock().await;
        io.write_all(&packet).await?;
        io.flush().await?;
        Ok(())
    }

    /// Close the underlying stream.
    pub async fn shutdown(&self) -> Result<()> {
        let mut io = self.io.lock().await;
        io.shutdown().await?;
        Ok(())
    }
}

/// Reader half of a secure channel.
pub struct ChannelReader<T: Transport> {
    io: ReadHalf<T>,
    parser: PacketParser,
    key: [u8; 32],
}

impl<T: Transport> ChannelReader<T> {
    /// Receive the next application message.
    ///
    /// `Ok(None)` on clean EOF. Framing errors and authentication failures
    /// propagate; both tear the connection down at the session layer.
    /// Packets with a type byte outside the catalogue are skipped.
    pub async fn next(&mut self) -> Result<Option<ChannelMessage>> {
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            while self.parser.has_packet() {
                let (header, sealed) = self.parser.next_packet()?;
                let msg_type = match header.message_type() {
                    Some(t) => t,
                    None => {
                        warn!(type_byte = header.msg_type, "skipping unknown message type");
                        continue;
                    }
                };
                let payload = aead::decrypt(&sealed, &self.key, &header.encode())?;
                return Ok(Some(ChannelMessage { msg_type, payload }));
            }

            let n = self.io.read(&mut buf).await?;
            if n == 0 {
                if self.parser.buffered_size() > 0 {
                    return Err(Error::new(
                        ErrorKind::ConnectionLost,
                        "transport closed mid-packet",
                    ));
                }
                return Ok(None);
            }
            self.parser.feed(&buf[..n]);
        }
    }
}

/// Split a transport into the encrypted reader/writer pair.
///
/// `leftover` carries any bytes that were read past the handshake
/// packets; they are replayed into the parser before new reads.
pub fn secure_channel<T: Transport>(
    transport: T,
    key: [u8; 32],
    leftover: PacketParser,
) -> (ChannelReader<T>, ChannelWriter<T>) {
    let (read_half, write_half) = tokio::io::split(transport);
    (
        ChannelReader {
            io: read_half,
            parser: leftover,
            key,
        },
        ChannelWriter {
            io: Arc::new(Mutex::new(write_half)),
            key,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; 32] {
        [0x42; 32]
    }

    #[tokio::test]
    async fn test_send_receive_round_trip() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (_reader_a, writer_a) = secure_channel(a, key(), PacketParser::new());
        let (mut reader_b, _writer_b) = secure_channel(b, key(), PacketParser::new());

        writer_a
            .send(MessageType::Ping, b"keepalive payload")
            .await
            .unwrap();

        let msg = reader_b.next().await.unwrap().unwrap();
        assert_eq!(msg.msg_type, MessageType::Ping);
        assert_eq!(msg.payload, b"keepalive payload");
    }

    #[tokio::test]
    async fn test_multiple_messages_in_order() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (_ra, writer) = secure_channel(a, key(), PacketParser::new());
        let (mut reader, _wb) = secure_channel(b, key(), PacketParser::new());

        for i in 0..10u8 {
            writer
                .send(MessageType::Progress, &[i; 40])
                .await
                .unwrap();
        }
        for i in 0..10u8 {
            let msg = reader.next().await.unwrap().unwrap();
            assert_eq!(msg.payload, vec![i; 40]);
        }
    }

    #[tokio::test]
    async fn test_wrong_key_fails_auth() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (_ra, writer) = secure_channel(a, [1; 32], PacketParser::new());
        let (mut reader, _wb) = secure_channel(b, [2; 32], PacketParser::new());

        writer.send(MessageType::Ping, b"x").await.unwrap();
        let err = reader.next().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecryptAuthFailure);
    }

    #[tokio::test]
    async fn test_payload_size_counts_nonce_and_tag() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (_ra, writer) = secure_channel(a, key(), PacketParser::new());

        writer.send(MessageType::Ping, b"12345").await.unwrap();
        drop(writer);
        drop(_ra);

        // Read the raw bytes off the peer side and inspect the header.
        let mut raw = Vec::new();
        let mut b = b;
        b.read_to_end(&mut raw).await.unwrap();
        let header = PacketHeader::decode(&raw[..PACKET_HEADER_SIZE]).unwrap();
        assert_eq!(
            header.payload_size as usize,
            aead::NONCE_SIZE + 5 + aead::TAG_SIZE
        );
    }

    #[tokio::test]
    async fn test_clean_eof_returns_none() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (mut reader, _w) = secure_channel(b, key(), PacketParser::new());
        drop(a);
        assert!(reader.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_packet_is_connection_lost() {
        let (mut a, b) = tokio::io::duplex(64 * 1024);
        let (mut reader, _w) = secure_channel(b, key(), PacketParser::new());

        // A valid header promising more bytes than ever arrive.
        let header = PacketHeader::new(MessageType::Ping, 100);
        a.write_all(&header.encode()).await.unwrap();
        a.write_all(&[0u8; 10]).await.unwrap();
        drop(a);

        let err = reader.next().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionLost);
    }

    #[tokio::test]
    async fn test_concurrent_writers_serialize() {
        let (a, b) = tokio::io::duplex(1024 * 1024);
        let (_ra, writer) = secure_channel(a, key(), PacketParser::new());
        let (mut reader, _wb) = secure_channel(b, key(), PacketParser::new());

        let mut tasks = Vec::new();
        for i in 0..8u8 {
            let writer = writer.clone();
            tasks.push(tokio::spawn(async move {
                writer
                    .send(MessageType::FileChunk, &vec![i; 1000])
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // All eight arrive whole, none interleaved.
        let mut seen = Vec::new();
        for _ in 0..8 {
            let msg = reader.next().await.unwrap().unwrap();
            assert_eq!(msg.payload.len(), 1000);
            assert!(msg.payload.iter().all(|b| *b == msg.payload[0]));
            seen.push(msg.payload[0]);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<u8>>());
    }
}
