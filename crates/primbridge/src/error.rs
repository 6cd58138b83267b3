use thiserror::Error;

use crate::memory::DataType;
use crate::primitive::Arg;

/// Status surfaced by primitive initialization, execution and the managed runtime.
///
/// Errors are `Clone` so lazily created resources can cache a failed creation and report it
/// on every later access.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    #[error("tensor rank {rank} exceeds the vendor maximum of {max}")]
    InvalidRank { rank: usize, max: usize },
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("element type {0:?} has no vendor mapping")]
    UnimplementedType(DataType),
    #[error("{what} is not implemented: {reason}")]
    Unimplemented { what: &'static str, reason: String },
    #[error("out of memory: {0}")]
    OutOfMemory(String),
    #[error("initialization failed: {0}")]
    InitializationFailed(String),
    #[error("vendor call {call} failed with status {status}")]
    VendorCallFailed { call: String, status: i32 },
    #[error("execution context has no buffer bound to {0:?}")]
    MissingArgument(Arg),
    #[error("managed runtime failure: {0}")]
    Runtime(String),
}

impl BridgeError {
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        BridgeError::InvalidArguments(message.into())
    }

    pub fn unimplemented(what: &'static str, reason: impl Into<String>) -> Self {
        BridgeError::Unimplemented {
            what,
            reason: reason.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        BridgeError::Runtime(message.into())
    }

    /// Maps any failure into `InitializationFailed` unless it already reports memory
    /// exhaustion, which callers must be able to tell apart.
    pub fn into_initialization_failure(self, what: &str) -> Self {
        match self {
            BridgeError::OutOfMemory(_) | BridgeError::InitializationFailed(_) => self,
            other => BridgeError::InitializationFailed(format!("{what}: {other}")),
        }
    }
}

/// Convenience alias for results returned across the bridge.
pub type BridgeResult<T> = Result<T, BridgeError>;
