//! Configuration
//!
//! Loading, validation and the shared type vocabulary.

pub mod loader;
pub mod types;
pub mod validator;
