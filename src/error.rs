//! Error Module - SGC Error Types
//!
//! Defines all error types used in SGC.
//!
//! The collector itself cannot fail: allocator exhaustion aborts the
//! runtime and sanity-check violations panic with diagnostics. Errors
//! exist only at the edges: configuration validation and the fiber
//! BIF surface.

use thiserror::Error;

/// Main error type for all SGC operations
#[derive(Debug, Error)]
pub enum SgcError {
    /// Bad argument to a fiber operation (invalid id, non-pid/ref term)
    #[error("bad argument: {0}")]
    Badarg(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SgcError {
    /// Check if this error is reportable to the calling process
    /// (as opposed to indicating a bug in the runtime itself)
    pub fn is_user_error(&self) -> bool {
        matches!(self, SgcError::Badarg(_) | SgcError::Configuration(_))
    }

    /// Check if this error indicates a bug in the code
    pub fn is_bug(&self) -> bool {
        matches!(self, SgcError::Internal(_))
    }
}

/// Result type alias for SGC operations
pub type Result<T> = std::result::Result<T, SgcError>;
