//! Core types, validators, and utilities for the armada control plane.
//!
//! Everything here is transport- and storage-agnostic: entity structs that
//! mirror the persisted tables, the five-code error taxonomy shared by every
//! layer, input validators, and the small crypto helpers (hashing, token
//! generation, constant-time comparison) the rest of the workspace leans on.

pub mod config;
pub mod crypto;
pub mod error;
pub mod types;
pub mod validate;

pub use error::CoreError;

/// Milliseconds since the Unix epoch. All persisted timestamps use this.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
