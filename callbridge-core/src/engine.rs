//! Call engine boundary
//!
//! The engine performs the actual network call operations. Implement
//! [`CallEngine`] over your signaling SDK and forward its callbacks as
//! [`EngineEvent`]s to
//! [`CallControlService::handle_engine_event`](crate::service::CallControlService::handle_engine_event).

use crate::identity::{MeetingLocator, Participant};
use crate::types::{CallOptions, CallState, EngineCall, EngineCallId, IncomingCallHandle};
use async_trait::async_trait;
use thiserror::Error;

/// Engine errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine has no call with this id
    #[error("Call not found: {0}")]
    CallNotFound(String),

    /// The operation was attempted and failed
    #[error("Operation failed: {0}")]
    Failed(String),

    /// Local media could not be started or stopped
    #[error("Media error: {0}")]
    Media(String),
}

/// Asynchronous call engine
#[async_trait]
pub trait CallEngine: Send + Sync {
    /// Place a call to participants
    async fn place(
        &self,
        participants: &[Participant],
        options: &CallOptions,
    ) -> Result<EngineCall, EngineError>;

    /// Join a meeting
    async fn join(
        &self,
        locator: &MeetingLocator,
        options: &CallOptions,
    ) -> Result<EngineCall, EngineError>;

    /// Accept an incoming call
    async fn accept(
        &self,
        call_id: &EngineCallId,
        options: &CallOptions,
    ) -> Result<EngineCall, EngineError>;

    /// Reject an incoming call
    async fn reject(&self, call_id: &EngineCallId) -> Result<(), EngineError>;

    /// Hang up an active call
    async fn end(&self, call_id: &EngineCallId) -> Result<(), EngineError>;

    /// Put a call on hold
    async fn hold(&self, call_id: &EngineCallId) -> Result<(), EngineError>;

    /// Resume a held call
    async fn resume(&self, call_id: &EngineCallId) -> Result<(), EngineError>;

    /// Mute or unmute outgoing audio
    async fn set_outgoing_muted(
        &self,
        call_id: &EngineCallId,
        muted: bool,
    ) -> Result<(), EngineError>;

    /// Start local capture and rendering for a call
    async fn start_audio(&self, call_id: &EngineCallId) -> Result<(), EngineError>;

    /// Stop local capture and rendering for a call
    async fn stop_audio(&self, call_id: &EngineCallId) -> Result<(), EngineError>;
}

/// Events raised by the engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A call changed state
    CallStateChanged {
        /// Engine id
        call_id: EngineCallId,
        /// New state
        state: CallState,
    },
    /// Remote participants joined or left
    RemoteParticipantsUpdated {
        /// Engine id
        call_id: EngineCallId,
        /// Participants added
        added: Vec<Participant>,
        /// Participants removed
        removed: Vec<Participant>,
    },
    /// A new inbound call arrived
    IncomingCallReceived {
        /// The incoming call
        call: IncomingCallHandle,
    },
    /// An inbound call ended before being accepted
    IncomingCallEnded {
        /// Engine id
        call_id: EngineCallId,
    },
    /// Calls were added to or removed from the engine
    CallsUpdated {
        /// Calls now known to the engine
        added: Vec<EngineCall>,
        /// Calls the engine dropped
        removed: Vec<EngineCallId>,
    },
    /// The engine replaced a call's id, e.g. once the server assigned one
    CallIdChanged {
        /// Previous engine id
        old_id: EngineCallId,
        /// New engine id
        new_id: EngineCallId,
    },
}
