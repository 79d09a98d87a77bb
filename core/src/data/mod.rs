//! SQLite persistence
//!
//! Organized by domain:
//! - `schema`: table definitions
//! - `start`: open/create, integrity check, vacuum, backup
//! - `identity`: the local signing key
//! - `trust`: device records and shared keys
//! - `history`: completed-transfer rows
//! - `store`: the [`TrustStore`] façade holding the exclusive lock

pub mod history;
pub mod identity;
pub mod schema;
pub mod start;
pub mod store;
pub mod trust;

pub use history::{HistoryEntry, TransferStats};
pub use identity::{get_identity, get_or_create_identity};
pub use schema::create_all_tables;
pub use start::{start_db, start_memory_db};
pub use store::TrustStore;
