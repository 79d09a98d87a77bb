//! SeaDrop Core
//!
//! Fully offline, peer-to-peer file and clipboard sharing between nearby
//! devices. This crate is the protocol core:
//! - Binary wire protocol with a streaming parser
//! - Authenticated, end-to-end-encrypted sessions (X25519 agreement,
//!   XChaCha20-Poly1305 packets, Ed25519 identities)
//! - Chunked request/accept/stream transfer engine with checksums,
//!   conflict resolution and pause/resume/cancel
//! - RSSI-based distance estimation and trust-zone classification
//! - Declared-transition state machines for transfer, connection and
//!   discovery
//! - Persistent trust store with per-device shared keys
//!
//! Physical BLE scanning, WiFi Direct group formation, the OS clipboard
//! and all UI are external collaborators: the core consumes peer
//! sightings, RSSI readings, connected duplex streams and a clipboard
//! sink, and emits everything through one event channel.
//!
//! # Module Structure
//!
//! - `protocol/`: public interface (SeaDrop, config, errors, events, types)
//! - `network/`: wire codec, framed packets, message catalogue
//! - `security/`: keys, AEAD, key derivation, hashing
//! - `session/`: handshake and the encrypted channel
//! - `pairing/`: PIN + verification-code pairing flow
//! - `data/`: SQLite persistence (trust store, identity, history)
//! - `distance/`: RSSI smoothing and trust zones
//! - `statemachine/`: transfer / connection / discovery tables
//! - `transfer/`: the send/receive engine
//! - `clipboard/`: clipboard push and received history
//! - `testing/`: in-process two-node helpers
//!
//! # Quick Start
//!
//! ```ignore
//! use seadrop_core::{SeaDrop, SeaDropConfig, SeaDropEvent};
//!
//! let node = SeaDrop::start(SeaDropConfig::new().with_device_name("laptop"))?;
//! let mut events = node.events().await.unwrap();
//!
//! // The connection layer hands in a connected duplex stream.
//! node.attach_transport(stream, HandshakeRole::Initiator).await?;
//! node.send_files(vec!["photo.jpg".into()]).await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event.name());
//! }
//! ```

// Public interface
pub mod protocol;

// Infrastructure modules
pub mod clipboard;
pub mod data;
pub mod distance;
pub mod network;
pub mod pairing;
pub mod security;
pub mod session;
pub mod statemachine;
pub mod testing;
pub mod transfer;

// Re-export the main API surface for convenience
pub use protocol::{
    Capabilities, ClipboardKind, ClipboardValue, Device, DeviceId, Error, ErrorKind, FormFactor,
    Platform, Result, SeaDrop, SeaDropConfig, SeaDropEvent, TransferDirection, TransferId,
    TrustLevel, TrustZone,
};

pub use clipboard::{ClipboardSink, ReceivedClipboard};
pub use data::TrustStore;
pub use distance::{DistanceInfo, DistanceMonitor, ZoneThresholds};
pub use session::handshake::HandshakeRole;
pub use session::Transport;
pub use statemachine::{
    ConnectionState, ConnectionStateMachine, DiscoveryState, DiscoveryStateMachine, TransferState,
    TransferStateMachine,
};
pub use transfer::{ConflictResolution, TransferProgress, TransferResult};
