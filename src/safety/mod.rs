//! Safety and cleanup
//!
//! Run-scoped directories and their no-follow removal.

pub mod safe_cleanup;
pub mod workspace;
