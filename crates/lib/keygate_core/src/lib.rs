//! # keygate_core
//!
//! Core domain logic for Keygate: token signing and verification, password
//! hashing, durable refresh sessions, the revocation cache, and the
//! authentication service coordinating them.

pub mod cache;
pub mod config;
pub mod limiter;
pub mod migrate;
pub mod models;
pub mod password;
pub mod service;
pub mod store;
pub mod token;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
