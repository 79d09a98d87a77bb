//! Public interface
//!
//! - `core`: the [`SeaDrop`] façade
//! - `config`: builder-style configuration
//! - `error`: the crate-wide error taxonomy
//! - `events`: the outbound event stream
//! - `types`: identifiers, devices, trust levels, clipboard values

pub mod config;
pub mod core;
pub mod error;
pub mod events;
pub mod types;

pub use self::core::SeaDrop;
pub use config::SeaDropConfig;
pub use error::{Error, ErrorKind, Result};
pub use events::{
    ClipboardReceivedEvent, FileConflictEvent, FileReceivedEvent, PairingRequestEvent,
    SeaDropEvent, StateChangedEvent, StateScope, TransferRequestEvent, ZoneChangedEvent,
};
pub use types::{
    current_timestamp, Capabilities, ClipboardKind, ClipboardValue, Device, DeviceId, FormFactor,
    Platform, TransferDirection, TransferId, TrustLevel, TrustZone,
};
