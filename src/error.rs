//! Error types for the bridge.
//!
//! All errors are strongly typed using thiserror. Admission errors are the
//! caller's fault and are returned synchronously; runtime errors are faults
//! that occur while a request is being served. Only runtime faults ever show
//! up in the event log.

use thiserror::Error;

use crate::agent::AgentId;
use crate::persist::CheckpointId;
use crate::world::DecodeError;

/// Admission errors: the request was rejected before touching the emulator.
///
/// These are returned synchronously to the caller and are never recorded as
/// turn records.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("Unknown agent: {agent_id}")]
    UnknownAgent { agent_id: AgentId },

    #[error("Agent name '{name}' is already registered and active")]
    DuplicateName { name: String },

    #[error("Agent name cannot be empty")]
    EmptyName,

    #[error("Not agent {agent_id}'s turn (current slot holder: {holder})")]
    AgentNotTurn { agent_id: AgentId, holder: String },
}

/// Runtime errors: faults while serving an admitted request.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Adapter fault: {message}")]
    AdapterFault { message: String },

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Persistence error: {message}")]
    Persist { message: String },

    #[error("Checkpoint not found: {id}")]
    CheckpointNotFound { id: CheckpointId },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("Channel disconnected: {path}")]
    Disconnected { path: String },
}

/// Top-level error type for the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Admission error: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BridgeError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Convenience constructor for adapter faults.
    #[must_use]
    pub fn adapter_fault(message: impl Into<String>) -> Self {
        Self::Runtime(RuntimeError::AdapterFault {
            message: message.into(),
        })
    }

    /// Convenience constructor for persistence faults.
    #[must_use]
    pub fn persist(message: impl Into<String>) -> Self {
        Self::Runtime(RuntimeError::Persist {
            message: message.into(),
        })
    }

    /// Returns true if this is an admission error.
    #[must_use]
    pub const fn is_admission(&self) -> bool {
        matches!(self, Self::Admission(_))
    }

    /// Returns true if this is a runtime error.
    #[must_use]
    pub const fn is_runtime(&self) -> bool {
        matches!(self, Self::Runtime(_))
    }

    /// Returns true if retrying the same request could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            // The turn slot rotates, so a rejected slot check can succeed later.
            Self::Admission(e) => matches!(e, AdmissionError::AgentNotTurn { .. }),
            Self::Runtime(e) => matches!(
                e,
                RuntimeError::AdapterFault { .. } | RuntimeError::Timeout { .. }
            ),
            Self::Internal { .. } => false,
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::persist(err.to_string())
    }
}

/// Result type alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
