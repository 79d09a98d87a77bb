//! Session handshake
//!
//! The only plaintext exchange. Each side sends a signed Hello carrying
//! its long-term verify key and a fresh ephemeral X25519 key; the
//! signature binds the ephemeral key and a nonce to the identity, so the
//! Hello itself authenticates the key exchange. Both sides then derive
//!
//! ```text
//! k = derive_key(x25519(eph_self, eph_peer), "SeaDrop-Session",
//!                sorted(id_a || id_b))
//! ```
//!
//! and confirm the key with an encrypted Ping/Pong before the session is
//! reported up. A decrypt failure there means the two sides disagree on
//! `k` and surfaces as `AuthenticationFailed`.

use tracing::{debug, info};
use zeroize::Zeroize;

use crate::data::TrustStore;
use crate::network::messages::HelloMessage;
use crate::network::packet::{MessageType, PacketHeader, PacketParser, PACKET_HEADER_SIZE};
use crate::protocol::error::{Error, ErrorKind, Result};
use crate::protocol::types::{Capabilities, Device, DeviceId, Platform, current_timestamp};
use crate::security::{self, aead, ExchangeKeyPair, SigningKeyPair};
use crate::session::channel::{read_plain_packet, write_plain_packet, Transport};

/// Which side of the connection we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    /// Sends Hello first.
    Initiator,
    /// Waits for Hello, replies with HelloAck.
    Responder,
}

/// Local device metadata advertised in the Hello.
#[derive(Debug, Clone)]
pub struct LocalDeviceInfo {
    pub name: String,
    pub platform: Platform,
    pub version: String,
    pub capabilities: Capabilities,
}

/// Outcome of a completed handshake.
#[derive(Debug)]
pub struct HandshakeOutcome {
    /// The peer as a device record (trust level reflects the store).
    pub peer: Device,
    pub peer_capabilities: Capabilities,
    /// Derived session key. Never persisted.
    pub session_key: [u8; 32],
    /// The peer was already trusted with a stored shared key.
    pub already_paired: bool,
    /// Parser holding any bytes read past the handshake packets.
    pub leftover: PacketParser,
}

fn build_hello(
    identity: &SigningKeyPair,
    local: &LocalDeviceInfo,
    eph: &ExchangeKeyPair,
) -> HelloMessage {
    let mut nonce = [0u8; 16];
    security::random_bytes(&mut nonce);
    let signed = HelloMessage::signed_bytes(identity.verify_key(), eph.public(), &nonce);
    HelloMessage {
        device_id: identity.device_id(),
        device_name: local.name.clone(),
        platform: local.platform,
        version: local.version.clone(),
        capabilities: local.capabilities,
        verify_key: *identity.verify_key(),
        eph_public: *eph.public(),
        nonce,
        signature: identity.sign(&signed),
    }
}

/// Validate an incoming Hello: the device id must be the hash of the
/// announced verify key, and the signature must bind the ephemeral key.
fn validate_hello(hello: &HelloMessage, local_id: &DeviceId) -> Result<()> {
    let expected_id = security::device_id_from_verify_key(&hello.verify_key);
    if hello.device_id != expected_id {
        return Err(Error::new(
            ErrorKind::AuthenticationFailed,
            "device id does not match announced key",
        ));
    }
    if hello.device_id == *local_id {
        return Err(Error::new(
            ErrorKind::ConnectionRefused,
            "peer announced our own identity",
        ));
    }
    if hello.device_id.is_zero() {
        return Err(Error::new(
            ErrorKind::AuthenticationFailed,
            "peer announced the zero device id",
        ));
    }
    let signed = HelloMessage::signed_bytes(&hello.verify_key, &hello.eph_public, &hello.nonce);
    security::verify_signature(&signed, &hello.signature, &hello.verify_key)
        .map_err(|_| Error::new(ErrorKind::AuthenticationFailed, "hello signature invalid"))
}

fn device_from_hello(hello: &HelloMessage, store: &TrustStore) -> Result<Device> {
    let now = current_timestamp();
    let mut device = match store.get(&hello.device_id)? {
        Some(mut existing) => {
            existing.last_seen = now;
            existing
        }
        None => Device::discovered(hello.device_id, hello.device_name.clone()),
    };
    device.name = hello.device_name.clone();
    device.platform = hello.platform;
    device.protocol_version = hello.version.clone();
    device.capabilities = hello.capabilities;
    device.last_seen = now;
    Ok(device)
}

async fn seal_and_send<T: Transport>(
    io: &mut T,
    msg_type: MessageType,
    payload: &[u8],
    key: &[u8; 32],
) -> Result<()> {
    let sealed_len = aead::NONCE_SIZE + payload.len() + aead::TAG_SIZE;
    let header = PacketHeader::new(msg_type, sealed_len as u32);
    let sealed = aead::encrypt(payload, key, &header.encode())?;

    let mut packet = Vec::with_capacity(PACKET_HEADER_SIZE + sealed.len());
    packet.extend_from_slice(&header.encode());
    packet.extend_from_slice(&sealed);

    use tokio::io::AsyncWriteExt;
    io.write_all(&packet).await?;
    io.flush().await?;
    Ok(())
}

async fn recv_and_open<T: Transport>(
    io: &mut T,
    parser: &mut PacketParser,
    key: &[u8; 32],
) -> Result<(MessageType, Vec<u8>)> {
    let (header, sealed) = read_plain_packet(io, parser).await?;
    let msg_type = header.message_type().ok_or_else(|| {
        Error::new(
            ErrorKind::AuthenticationFailed,
            "unexpected packet during key confirmation",
        )
    })?;
    let payload = aead::decrypt(&sealed, key, &header.encode())
        .map_err(|_| Error::new(ErrorKind::AuthenticationFailed, "session key mismatch"))?;
    Ok((msg_type, payload))
}

/// Run the handshake on a freshly connected transport.
///
/// On success the transport is ready to be split into a secure channel
/// with the returned key and leftover parser. Blocked peers are refused
/// before any key agreement happens.
pub async fn handshake<T: Transport>(
    io: &mut T,
    identity: &SigningKeyPair,
    local: &LocalDeviceInfo,
    store: &TrustStore,
    role: HandshakeRole,
) -> Result<HandshakeOutcome> {
    let eph = ExchangeKeyPair::generate()?;
    let our_hello = build_hello(identity, local, &eph);
    let local_id = identity.device_id();
    let mut parser = PacketParser::new();

    let peer_hello = match role {
        HandshakeRole::Initiator => {
            write_plain_packet(io, MessageType::Hello, &our_hello.encode()).await?;
            let (header, payload) = match read_plain_packet(io, &mut parser).await {
                Ok(ok) => ok,
                Err(e) if e.kind() == ErrorKind::ProtocolVersionMismatch => {
                    let _ = write_plain_packet(io, MessageType::VersionMismatch, &[]).await;
                    return Err(e);
                }
                Err(e) => return Err(e),
            };
            match header.message_type() {
                Some(MessageType::HelloAck) => HelloMessage::decode(&payload)?,
                Some(MessageType::VersionMismatch) => {
                    return Err(Error::new(
                        ErrorKind::ProtocolVersionMismatch,
                        "peer rejected our protocol version",
                    ));
                }
                _ => {
                    return Err(Error::new(
                        ErrorKind::ConnectionFailed,
                        "expected HelloAck in handshake",
                    ));
                }
            }
        }
        HandshakeRole::Responder => {
            let (header, payload) = match read_plain_packet(io, &mut parser).await {
                Ok(ok) => ok,
                Err(e) if e.kind() == ErrorKind::ProtocolVersionMismatch => {
                    let _ = write_plain_packet(io, MessageType::VersionMismatch, &[]).await;
                    return Err(e);
                }
                Err(e) => return Err(e),
            };
            if header.message_type() != Some(MessageType::Hello) {
                return Err(Error::new(
                    ErrorKind::ConnectionFailed,
                    "expected Hello in handshake",
                ));
            }
            let peer = HelloMessage::decode(&payload)?;
            write_plain_packet(io, MessageType::HelloAck, &our_hello.encode()).await?;
            peer
        }
    };

    validate_hello(&peer_hello, &local_id)?;

    if store.is_blocked(&peer_hello.device_id)? {
        return Err(Error::new(
            ErrorKind::ConnectionRefused,
            format!("device {} is blocked", peer_hello.device_id),
        ));
    }

    let mut shared = eph.agree(&peer_hello.eph_public)?;
    let session_key = security::derive_session_key(&shared, &local_id, &peer_hello.device_id);
    shared.zeroize();

    // Key confirmation: one encrypted Ping/Pong round under the new key.
    match role {
        HandshakeRole::Initiator => {
            seal_and_send(io, MessageType::Ping, &[], &session_key).await?;
            let (msg_type, _) = recv_and_open(io, &mut parser, &session_key).await?;
            if msg_type != MessageType::Pong {
                return Err(Error::new(
                    ErrorKind::AuthenticationFailed,
                    "key confirmation failed",
                ));
            }
        }
        HandshakeRole::Responder => {
            let (msg_type, _) = recv_and_open(io, &mut parser, &session_key).await?;
            if msg_type != MessageType::Ping {
                return Err(Error::new(
                    ErrorKind::AuthenticationFailed,
                    "key confirmation failed",
                ));
            }
            seal_and_send(io, MessageType::Pong, &[], &session_key).await?;
        }
    }

    let already_paired = store.is_trusted(&peer_hello.device_id)?
        && store.get_shared_key(&peer_hello.device_id).is_ok();

    let device = device_from_hello(&peer_hello, store)?;
    store.save(&device)?;

    info!(
        peer = %device.id,
        name = %device.name,
        paired = already_paired,
        "session established"
    );
    debug!(capabilities = device.capabilities.bits(), "peer capabilities");

    Ok(HandshakeOutcome {
        peer_capabilities: peer_hello.capabilities,
        peer: device,
        session_key,
        already_paired,
        leftover: parser,
    })
}
