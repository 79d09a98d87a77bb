//! Events emitted to the application layer
//!
//! Everything the core reports travels as one [`SeaDropEvent`] through the
//! single outbound channel returned by `SeaDrop::events`. Each event fires
//! at most once, from a worker task; handlers must return promptly.

use std::path::PathBuf;

use crate::distance::DistanceInfo;
use crate::protocol::error::Error;
use crate::protocol::types::{ClipboardValue, Device, DeviceId, TransferId, TrustZone};
use crate::transfer::progress::{TransferProgress, TransferResult};

/// Which state machine a [`StateChangedEvent`] refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateScope {
    Transfer(TransferId),
    Connection(DeviceId),
    Discovery,
}

/// A state machine moved between states.
#[derive(Debug, Clone)]
pub struct StateChangedEvent {
    pub scope: StateScope,
    pub from: &'static str,
    pub to: &'static str,
}

/// An incoming pairing attempt awaiting user confirmation.
#[derive(Debug, Clone)]
pub struct PairingRequestEvent {
    pub device: Device,
    /// Code both sides display; accept only when they match.
    pub verification_code: String,
    /// PIN shown on the initiating side only.
    pub pin: Option<String>,
    /// Unix seconds after which the attempt auto-fails.
    pub expires_at: i64,
}

/// An incoming transfer request awaiting accept/reject.
#[derive(Debug, Clone)]
pub struct TransferRequestEvent {
    pub transfer_id: TransferId,
    pub peer: Device,
    pub file_names: Vec<String>,
    pub file_count: u32,
    pub total_size: u64,
    /// Unix seconds after which the request auto-rejects.
    pub expires_at: i64,
}

/// One received file finished writing to disk.
#[derive(Debug, Clone)]
pub struct FileReceivedEvent {
    pub transfer_id: TransferId,
    pub peer_id: DeviceId,
    pub saved_path: PathBuf,
    pub size: u64,
}

/// A received file conflicts with an existing one under the `Ask` policy.
#[derive(Debug, Clone)]
pub struct FileConflictEvent {
    pub transfer_id: TransferId,
    pub file_index: u32,
    pub target_path: PathBuf,
}

/// A peer pushed its clipboard to us.
#[derive(Debug, Clone)]
pub struct ClipboardReceivedEvent {
    pub peer_id: DeviceId,
    pub value: ClipboardValue,
    /// Index in the received-clipboard history.
    pub history_index: usize,
    /// True when the value was applied to the local clipboard automatically.
    pub auto_applied: bool,
}

/// A device moved between trust zones.
#[derive(Debug, Clone)]
pub struct ZoneChangedEvent {
    pub device_id: DeviceId,
    pub previous_zone: TrustZone,
    pub current_zone: TrustZone,
    pub distance: DistanceInfo,
    pub is_moving_closer: bool,
    pub requires_security_alert: bool,
}

/// Events delivered to the application.
#[derive(Debug, Clone)]
pub enum SeaDropEvent {
    /// A nearby device appeared.
    DeviceDiscovered(Device),
    /// A known nearby device changed (name, signal, capabilities).
    DeviceUpdated(Device),
    /// A nearby device went silent.
    DeviceLost(DeviceId),

    /// An authenticated session is up.
    Connected(Device),
    /// The session ended.
    Disconnected { device_id: DeviceId, reason: String },

    /// Pairing needs user confirmation.
    PairingRequest(PairingRequestEvent),
    /// Pairing finished.
    PairingComplete { device_id: DeviceId, success: bool },

    /// An incoming transfer awaits accept/reject.
    TransferRequest(TransferRequestEvent),
    /// Progress update for an active transfer.
    TransferProgress(TransferProgress),
    /// A transfer reached a terminal state.
    TransferComplete(TransferResult),
    /// One file landed on disk.
    FileReceived(FileReceivedEvent),
    /// A file needs a conflict decision (`Ask` policy).
    FileConflict(FileConflictEvent),

    /// A clipboard value arrived.
    ClipboardReceived(ClipboardReceivedEvent),

    /// A device changed trust zones.
    ZoneChanged(ZoneChangedEvent),
    /// A device dropped to Far unexpectedly.
    SecurityAlert { device_id: DeviceId, message: String },

    /// A state machine transitioned.
    StateChanged(StateChangedEvent),

    /// A non-fatal error worth surfacing.
    Error {
        device_id: Option<DeviceId>,
        error: Error,
    },
}

impl SeaDropEvent {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            SeaDropEvent::DeviceDiscovered(_) => "device_discovered",
            SeaDropEvent::DeviceUpdated(_) => "device_updated",
            SeaDropEvent::DeviceLost(_) => "device_lost",
            SeaDropEvent::Connected(_) => "connected",
            SeaDropEvent::Disconnected { .. } => "disconnected",
            SeaDropEvent::PairingRequest(_) => "pairing_request",
            SeaDropEvent::PairingComplete { .. } => "pairing_complete",
            SeaDropEvent::TransferRequest(_) => "transfer_request",
            SeaDropEvent::TransferProgress(_) => "transfer_progress",
            SeaDropEvent::TransferComplete(_) => "transfer_complete",
            SeaDropEvent::FileReceived(_) => "file_received",
            SeaDropEvent::FileConflict(_) => "file_conflict",
            SeaDropEvent::ClipboardReceived(_) => "clipboard_received",
            SeaDropEvent::ZoneChanged(_) => "zone_changed",
            SeaDropEvent::SecurityAlert { .. } => "security_alert",
            SeaDropEvent::StateChanged(_) => "state_changed",
            SeaDropEvent::Error { .. } => "error",
        }
    }
}
