//! The control-plane error taxonomy.
//!
//! Every handler failure collapses into one of five caller-visible codes plus
//! an internal catch-all. The HTTP layer maps codes to status lines; the
//! engine and store only ever construct these.

use thiserror::Error;

/// Typed failure surfaced by every query and mutation.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No identity handle was presented.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The caller is known but lacks the required role.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The target entity (or its parent) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An invariant or state-machine rule was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The fixed-window budget for this key is exhausted.
    #[error("rate limited: retry at {retry_at}")]
    RateLimited {
        /// Wall-clock hint (epoch ms) for when the window reopens.
        retry_at: i64,
    },

    /// A programming or infrastructure error; never part of the contract.
    #[error("internal: {0}")]
    Internal(String),
}

impl CoreError {
    /// Wire-level code string for the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Unauthorized(_) => "unauthorized",
            CoreError::Forbidden(_) => "forbidden",
            CoreError::NotFound(_) => "not_found",
            CoreError::Conflict(_) => "conflict",
            CoreError::RateLimited { .. } => "rate_limited",
            CoreError::Internal(_) => "internal",
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        CoreError::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        CoreError::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        CoreError::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CoreError::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_taxonomy() {
        assert_eq!(CoreError::unauthorized("x").code(), "unauthorized");
        assert_eq!(CoreError::forbidden("x").code(), "forbidden");
        assert_eq!(CoreError::not_found("x").code(), "not_found");
        assert_eq!(CoreError::conflict("x").code(), "conflict");
        assert_eq!(CoreError::RateLimited { retry_at: 1 }.code(), "rate_limited");
        assert_eq!(CoreError::internal("x").code(), "internal");
    }
}
