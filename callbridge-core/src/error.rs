//! Call-control errors

use crate::engine::EngineError;
use crate::identity::TargetParseError;
use crate::platform::PlatformError;
use crate::types::{ActionKind, CallUuid};
use thiserror::Error;

/// Errors delivered to callers of the call-control layer
///
/// Every failure is terminal for the action it belongs to. Nothing here is
/// retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallControlError {
    /// The platform refused the action before the engine was involved
    #[error("Platform denied {kind} action: {reason}")]
    PlatformDenied {
        /// Action that was refused
        kind: ActionKind,
        /// Platform-supplied reason
        reason: String,
    },

    /// The engine failed after the platform granted the action
    #[error("Engine {kind} operation failed: {message}")]
    EngineOperationFailed {
        /// Action being performed
        kind: ActionKind,
        /// Engine error text
        message: String,
    },

    /// No live call with this id
    #[error("Call not found: {0}")]
    NoSuchCall(CallUuid),

    /// The engine never delivered the incoming call
    #[error("No incoming call found: {0}")]
    NoIncomingCallFound(CallUuid),

    /// Local setup failed, e.g. the audio session
    #[error("Configuration error: {0}")]
    ConfigurationFailure(String),

    /// The call ended or the platform reset while this action was pending
    #[error("Transaction for call {0} was cancelled")]
    StaleTransaction(CallUuid),

    /// Push payload could not be interpreted
    #[error("Invalid push payload: {0}")]
    InvalidPushPayload(String),

    /// Call target could not be parsed
    #[error("Invalid call target: {0}")]
    InvalidTarget(#[from] TargetParseError),
}

impl CallControlError {
    /// Wrap an engine failure for the given action
    pub fn engine(kind: ActionKind, err: &EngineError) -> Self {
        Self::EngineOperationFailed {
            kind,
            message: err.to_string(),
        }
    }

    /// Wrap a platform refusal for the given action
    pub fn denied(kind: ActionKind, err: &PlatformError) -> Self {
        Self::PlatformDenied {
            kind,
            reason: err.to_string(),
        }
    }
}

/// Result alias used across the crate
pub type CallControlResult<T> = Result<T, CallControlError>;
