//! Shared domain types for `saltctl`.
//!
//! Holds the wire-independent pieces used by both the HTTP client crate
//! and the binary: work requests, job handles, result batches, the
//! on-disk configuration model, and the core error type.

pub mod config;
pub mod error;
pub mod types;
