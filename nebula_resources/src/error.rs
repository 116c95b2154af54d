//! Error types for the Nebula resource layer
//!
//! This module defines the error types used throughout the crate,
//! including GPU resource creation, descriptor binding and array bookkeeping.

use std::fmt;

/// Result type for Nebula operations
pub type Result<T> = std::result::Result<T, Error>;

/// Nebula errors
#[derive(Debug, Clone)]
pub enum Error {
    /// Backend-specific error (Vulkan, root-argument backend, etc.)
    BackendError(String),

    /// Out of GPU memory
    OutOfMemory,

    /// Invalid resource (mismatched element size, unknown binding name, wrong backend type)
    InvalidResource(String),

    /// Internal bookkeeping violated (resize preconditions, dangling slot keys)
    InvalidState(String),

    /// Initialization failed (manager, array, renderer)
    InitializationFailed(String),
}

impl Error {
    /// Prepend operator-facing context to the error message
    ///
    /// Used while an error travels up the call chain so that the final log line
    /// reads like a stack: `"create lighting manager: reserve point light: ..."`.
    pub fn context(self, context: impl AsRef<str>) -> Self {
        let context = context.as_ref();
        match self {
            Error::BackendError(msg) => Error::BackendError(format!("{}: {}", context, msg)),
            Error::OutOfMemory => Error::BackendError(format!("{}: out of GPU memory", context)),
            Error::InvalidResource(msg) => Error::InvalidResource(format!("{}: {}", context, msg)),
            Error::InvalidState(msg) => Error::InvalidState(format!("{}: {}", context, msg)),
            Error::InitializationFailed(msg) => {
                Error::InitializationFailed(format!("{}: {}", context, msg))
            }
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::OutOfMemory => write!(f, "Out of GPU memory"),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
