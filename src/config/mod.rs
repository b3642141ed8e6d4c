//! Compile-time configuration for the storage engine.
//!
//! Every tunable lives in [`constants`]; there is no runtime configuration
//! surface and no process-wide state.

mod constants;

pub use constants::*;
