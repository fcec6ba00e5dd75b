//! Platform telephony boundary
//!
//! The platform arbitrates access to the audio hardware and owns the native
//! call UI. Requests go out through [`TelephonyPlatform`]; the platform calls
//! back into [`PlatformDelegateAdapter`](crate::delegate::PlatformDelegateAdapter)
//! with [`PlatformAction`]s to perform.

use crate::identity::{CallTarget, Participant, ParticipantKind};
use crate::types::{ActionId, ActionKind, CallUuid, EndReason, IncomingCallHandle};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Platform errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// Another call already holds the call group
    #[error("Maximum calls per call group reached")]
    CallLimitReached,

    /// The platform does not know this call
    #[error("Unknown call: {0}")]
    UnknownCall(CallUuid),

    /// Refused for a platform-specific reason
    #[error("Request denied: {0}")]
    Denied(String),
}

/// Kinds of handle the platform can show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandleType {
    /// Phone number
    PhoneNumber,
    /// Opaque identifier
    Generic,
}

impl From<ParticipantKind> for HandleType {
    fn from(kind: ParticipantKind) -> Self {
        match kind {
            ParticipantKind::PhoneNumber => Self::PhoneNumber,
            ParticipantKind::CommunicationUser | ParticipantKind::Unknown => Self::Generic,
        }
    }
}

/// Provider configuration registered with the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfiguration {
    /// Calls may carry video
    pub supports_video: bool,
    /// Calls allowed in one call group; must be 1, matching the single live call
    pub maximum_calls_per_call_group: usize,
    /// Show calls in the system recents list
    pub includes_calls_in_recents: bool,
    /// Handle types the native UI accepts
    pub supported_handle_types: Vec<HandleType>,
}

impl Default for ProviderConfiguration {
    fn default() -> Self {
        Self {
            supports_video: true,
            maximum_calls_per_call_group: 1,
            includes_calls_in_recents: true,
            supported_handle_types: vec![HandleType::PhoneNumber, HandleType::Generic],
        }
    }
}

/// Remote-party information shown by the native call UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallUpdate {
    /// Handle value
    pub remote_handle: String,
    /// Handle type
    pub handle_type: HandleType,
    /// Name shown instead of the handle
    pub display_name: Option<String>,
    /// Call carries video
    pub has_video: bool,
}

impl CallUpdate {
    /// Describe a caller
    pub fn for_caller(caller: &Participant, display_name: Option<String>, has_video: bool) -> Self {
        Self {
            remote_handle: caller.raw_id.clone(),
            handle_type: caller.kind.into(),
            display_name,
            has_video,
        }
    }

    /// Describe an incoming call handle
    pub fn from_incoming(call: &IncomingCallHandle) -> Self {
        Self::for_caller(&call.caller, call.display_name.clone(), call.video_enabled)
    }
}

/// Parameters the platform carries with an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionPayload {
    /// Start an outbound call
    Start {
        /// Who to call
        target: CallTarget,
        /// Video requested
        video: bool,
    },
    /// Answer an inbound call
    Answer,
    /// End or decline a call
    End,
    /// Hold or resume
    Hold {
        /// Requested hold state
        on_hold: bool,
    },
    /// Mute or unmute
    Mute {
        /// Requested mute state
        muted: bool,
    },
}

/// An action the platform arbitrates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformAction {
    /// Action id
    pub id: ActionId,
    /// Reported id of the call the action targets
    pub call_uuid: CallUuid,
    /// Action parameters
    pub payload: ActionPayload,
}

impl PlatformAction {
    /// Create an action with a fresh id
    pub fn new(call_uuid: CallUuid, payload: ActionPayload) -> Self {
        Self {
            id: ActionId::new(),
            call_uuid,
            payload,
        }
    }

    /// Action kind
    pub fn kind(&self) -> ActionKind {
        match self.payload {
            ActionPayload::Start { .. } => ActionKind::Start,
            ActionPayload::Answer => ActionKind::Answer,
            ActionPayload::End => ActionKind::End,
            ActionPayload::Hold { .. } => ActionKind::Hold,
            ActionPayload::Mute { .. } => ActionKind::Mute,
        }
    }
}

/// Platform telephony subsystem
#[async_trait]
pub trait TelephonyPlatform: Send + Sync {
    /// Ask the platform to grant an action
    ///
    /// A granted action comes back later through the delegate.
    ///
    /// # Errors
    ///
    /// Returns the platform's reason when it refuses the action
    async fn request_transaction(&self, action: &PlatformAction) -> Result<(), PlatformError>;

    /// Show an incoming call in the native UI
    ///
    /// # Errors
    ///
    /// Returns error when the platform will not admit the call
    async fn report_new_incoming_call(
        &self,
        call_uuid: CallUuid,
        update: CallUpdate,
    ) -> Result<(), PlatformError>;

    /// An outbound call started connecting
    fn report_outgoing_connecting(&self, call_uuid: CallUuid);

    /// An outbound call connected
    fn report_outgoing_connected(&self, call_uuid: CallUuid);

    /// A call ended without a local end action
    fn report_call_ended(&self, call_uuid: CallUuid, reason: EndReason);

    /// The action was performed
    fn fulfill_action(&self, action_id: ActionId);

    /// The action could not be performed
    fn fail_action(&self, action_id: ActionId);
}
