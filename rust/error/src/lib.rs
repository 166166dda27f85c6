//! Error taxonomy for the vector-search core.
//!
//! Mirrors the shape of a gRPC-style status-code error hierarchy: a
//! small closed set of [`ErrorCode`]s that every concrete error maps
//! to, plus a [`CoreError`] trait any error type can implement so
//! callers can dispatch on the code without downcasting.

use std::error::Error;
use std::fmt::Debug;

/// The seven error kinds from the design spec (§7), plus `Internal` for
/// anything that doesn't fit the named categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    /// Null pointer, n < 0, k < 1, dim mismatch, NaN/Inf input, list id
    /// out of range, batch count above the 2^31 ceiling.
    InvalidArgument,
    /// A mutating or searching operation was attempted on an untrained index.
    NotTrained,
    /// The stack arena is exhausted on a request that cannot be split further.
    Capacity,
    /// An RPC reply carried a non-OK status, or framing was malformed.
    TransportFailure,
    /// A flag-poll deadline was exceeded.
    DeviceTimeout,
    /// qtype other than 8-bit, dim not a multiple of 16, unsupported
    /// metric, or an incompatible clone between variants.
    UnsupportedConfiguration,
    /// Anything else (bugs, panics caught at a task boundary, etc).
    Internal,
}

impl ErrorCode {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "InvalidArgument",
            ErrorCode::NotTrained => "NotTrained",
            ErrorCode::Capacity => "Capacity",
            ErrorCode::TransportFailure => "TransportFailure",
            ErrorCode::DeviceTimeout => "DeviceTimeout",
            ErrorCode::UnsupportedConfiguration => "UnsupportedConfiguration",
            ErrorCode::Internal => "Internal",
        }
    }
}

/// Implemented by every error type that crosses a public API boundary
/// in this crate family. Lets callers branch on [`ErrorCode`] without
/// knowing the concrete error type.
pub trait CoreError: Error + Send + Sync {
    fn code(&self) -> ErrorCode;

    fn boxed(self) -> Box<dyn CoreError>
    where
        Self: Sized + 'static,
    {
        Box::new(self)
    }

    /// Most errors are worth a `tracing::error!`; a few (e.g. an
    /// expected empty-selector no-op) are not.
    fn should_trace(&self) -> bool {
        true
    }
}

impl Error for Box<dyn CoreError> {}

impl CoreError for Box<dyn CoreError> {
    fn code(&self) -> ErrorCode {
        self.as_ref().code()
    }

    fn should_trace(&self) -> bool {
        self.as_ref().should_trace()
    }
}

impl CoreError for std::io::Error {
    fn code(&self) -> ErrorCode {
        ErrorCode::TransportFailure
    }
}

/// The single concrete error type threaded through every public call
/// in the engine.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("index is not trained")]
    NotTrained,

    #[error("device stack arena exhausted: requested {requested} bytes, {available} available")]
    Capacity { requested: usize, available: usize },

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("device timed out after {0:?} waiting for completion")]
    DeviceTimeout(std::time::Duration),

    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        EngineError::InvalidArgument(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        EngineError::UnsupportedConfiguration(msg.into())
    }
}

impl CoreError for EngineError {
    fn code(&self) -> ErrorCode {
        match self {
            EngineError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            EngineError::NotTrained => ErrorCode::NotTrained,
            EngineError::Capacity { .. } => ErrorCode::Capacity,
            EngineError::TransportFailure(_) => ErrorCode::TransportFailure,
            EngineError::DeviceTimeout(_) => ErrorCode::DeviceTimeout,
            EngineError::UnsupportedConfiguration(_) => ErrorCode::UnsupportedConfiguration,
            EngineError::Internal(_) => ErrorCode::Internal,
        }
    }

    fn should_trace(&self) -> bool {
        // An empty-selector remove or a n=0 search short-circuit is not
        // really an "error" worth a trace line even though it flows
        // through the same Result plumbing in a couple of call sites.
        !matches!(self, EngineError::InvalidArgument(msg) if msg == "empty")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_mapping_is_stable() {
        assert_eq!(
            EngineError::NotTrained.code(),
            ErrorCode::NotTrained
        );
        assert_eq!(
            EngineError::Capacity { requested: 10, available: 5 }.code(),
            ErrorCode::Capacity
        );
    }

    #[test]
    fn boxed_error_forwards_code() {
        let e: Box<dyn CoreError> = EngineError::DeviceTimeout(std::time::Duration::from_secs(1)).boxed();
        assert_eq!(e.code(), ErrorCode::DeviceTimeout);
    }
}
