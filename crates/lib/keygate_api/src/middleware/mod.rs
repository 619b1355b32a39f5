//! Request middleware: token gates and rate limiting.

pub mod auth;
pub mod rate_limit;
