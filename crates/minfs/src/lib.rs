#![forbid(unsafe_code)]
//! MinFS public API facade.
//!
//! Re-exports core functionality from `minfs-core` through a stable
//! external interface. This is the crate downstream consumers depend on.

pub use minfs_core::*;
