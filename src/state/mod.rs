//! State management.
//!
//! Persistent record of applied resources, stack exports and run history.

mod local;
mod lock;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use store::StateStore;
pub use types::{ResourceRecord, RunHistoryEntry, RunOperation, STATE_VERSION, StackState};
