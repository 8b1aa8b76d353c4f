//! Thin wrappers around Linux kernel primitives.
//!
//! All `unsafe` code is concentrated here with explicit SAFETY comments.
//! Dependency direction: namespace -> credentials

pub mod credentials;
pub mod namespace;
