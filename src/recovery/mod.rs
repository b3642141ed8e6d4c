//! # Recovery
//!
//! The write-ahead log and ARIES-lite crash recovery: append-only logical
//! records, redo forward from the most recent checkpoint, undo losers in
//! reverse, and a filesystem-level checkpoint snapshot promoted at the
//! next startup if the live directory is suspect.

mod log_record;
mod manager;

pub use log_record::{EditAction, LogRecord};
pub use manager::{log_path_for, prime, RecoveryManager};
