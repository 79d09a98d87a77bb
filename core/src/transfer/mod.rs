//! File transfer engine
//!
//! - `engine`: sender/receiver state machines over the secure channel
//! - `progress`: speed, ETA and terminal-result accounting
//! - `conflict`: save-path construction and collision policies

pub mod conflict;
pub mod engine;
pub mod progress;

pub use conflict::{ConflictResolution, PathDecision};
pub use engine::{BoxedTransport, TransferEngine};
pub use progress::{
    format_bytes, format_duration, format_speed, FileOutcome, TransferProgress, TransferResult,
};
