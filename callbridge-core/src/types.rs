//! Call-control types and data structures

use crate::identity::{CallTarget, Participant};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier announced to the platform for a call
///
/// Outbound calls get a fresh one before the engine knows about the call.
/// Inbound calls reuse the engine's own id, which is a UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallUuid(pub Uuid);

impl CallUuid {
    /// Create a new random reported id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a reported id from its string form
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(Self)
    }
}

impl Default for CallUuid {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier assigned by the call engine
///
/// The raw string is kept as the engine issued it. UUID-shaped ids compare
/// and hash by their UUID value, so an id the engine spells in upper case
/// still matches the reported id derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineCallId(pub String);

impl EngineCallId {
    /// Create an engine id from any string
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reported id this engine id maps to when the engine issued a UUID
    pub fn as_call_uuid(&self) -> Option<CallUuid> {
        CallUuid::parse(&self.0)
    }
}

impl PartialEq for EngineCallId {
    fn eq(&self, other: &Self) -> bool {
        match (self.as_call_uuid(), other.as_call_uuid()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.0 == other.0,
            _ => false,
        }
    }
}

impl Eq for EngineCallId {}

impl std::hash::Hash for EngineCallId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self.as_call_uuid() {
            Some(uuid) => uuid.hash(state),
            None => self.0.hash(state),
        }
    }
}

impl From<CallUuid> for EngineCallId {
    fn from(id: CallUuid) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for EngineCallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a single platform action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(pub Uuid);

impl ActionId {
    /// Create a new random action id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    /// Placed by the local user
    Outgoing,
    /// Received from a remote party
    Incoming,
}

/// Engine-side call state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallState {
    /// Signaling in progress
    Connecting,
    /// Remote side is being alerted
    Ringing,
    /// Media is flowing
    Connected,
    /// Held locally
    Held,
    /// Terminated
    Ended,
}

impl CallState {
    /// Whether the call can still be acted upon
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Ended)
    }
}

/// Kind of action the platform arbitrates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    /// Start an outbound call
    Start,
    /// Answer an inbound call
    Answer,
    /// End or reject a call
    End,
    /// Hold or resume a call
    Hold,
    /// Mute or unmute outgoing audio
    Mute,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Answer => "answer",
            Self::End => "end",
            Self::Hold => "hold",
            Self::Mute => "mute",
        };
        f.write_str(name)
    }
}

/// Options handed to the engine when starting or accepting a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOptions {
    /// Send local video
    pub video: bool,
    /// Start with outgoing audio muted
    pub outgoing_audio_muted: bool,
    /// Start with incoming audio muted
    pub incoming_audio_muted: bool,
    /// Name shown to the remote party
    pub display_name: Option<String>,
}

impl CallOptions {
    /// Audio-only call
    pub fn audio_only() -> Self {
        Self {
            video: false,
            outgoing_audio_muted: false,
            incoming_audio_muted: false,
            display_name: None,
        }
    }

    /// Video call with audio
    pub fn video_call() -> Self {
        Self {
            video: true,
            ..Self::audio_only()
        }
    }

    /// Copy of these options with both audio directions muted
    ///
    /// Audio stays muted until the platform activates the audio session.
    #[must_use]
    pub fn with_audio_muted(&self) -> Self {
        Self {
            outgoing_audio_muted: true,
            incoming_audio_muted: true,
            ..self.clone()
        }
    }
}

impl Default for CallOptions {
    fn default() -> Self {
        Self::audio_only()
    }
}

/// Reference to a call the engine has confirmed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallHandle {
    /// Engine-assigned id
    pub engine_id: EngineCallId,
    /// Id announced to the platform
    pub reported_id: CallUuid,
    /// Call direction
    pub direction: CallDirection,
    /// Current engine state
    pub state: CallState,
    /// Outgoing audio muted by the user
    pub muted: bool,
    /// Whether local video was requested
    pub video: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// When the call reached `Connected`
    pub connected_at: Option<DateTime<Utc>>,
}

impl CallHandle {
    /// Build a handle from an engine call
    pub fn from_engine(call: &EngineCall, reported_id: CallUuid, options: &CallOptions) -> Self {
        let connected_at = (call.state == CallState::Connected).then(Utc::now);
        Self {
            engine_id: call.id.clone(),
            reported_id,
            direction: call.direction,
            state: call.state,
            muted: false,
            video: options.video,
            created_at: Utc::now(),
            connected_at,
        }
    }

    /// Apply a state change, recording when the call connected
    pub fn set_state(&mut self, state: CallState) {
        if state == CallState::Connected && self.connected_at.is_none() {
            self.connected_at = Some(Utc::now());
        }
        self.state = state;
    }

    /// Get call duration
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.connected_at.map(|start| Utc::now() - start)
    }
}

/// Reference to an inbound call that has not been accepted yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingCallHandle {
    /// Engine id (also the reported id)
    pub id: EngineCallId,
    /// Remote caller
    pub caller: Participant,
    /// Caller display name
    pub display_name: Option<String>,
    /// Caller offers video
    pub video_enabled: bool,
    /// When the engine delivered the call
    pub received_at: DateTime<Utc>,
}

impl IncomingCallHandle {
    /// Create a new incoming call handle
    pub fn new(
        id: EngineCallId,
        caller: Participant,
        display_name: Option<String>,
        video_enabled: bool,
    ) -> Self {
        Self {
            id,
            caller,
            display_name,
            video_enabled,
            received_at: Utc::now(),
        }
    }
}

/// Call object as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCall {
    /// Engine id
    pub id: EngineCallId,
    /// Direction
    pub direction: CallDirection,
    /// State at the time of reporting
    pub state: CallState,
}

/// Original request parameters kept alongside a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionRequest {
    /// Outbound call to participants or a meeting
    Start {
        /// Who or what to call
        target: CallTarget,
        /// Engine options
        options: CallOptions,
    },
    /// Accept an inbound call
    Answer {
        /// Engine options
        options: CallOptions,
    },
    /// End the call
    End,
    /// Hold (`true`) or resume (`false`)
    Hold {
        /// Requested hold state
        on_hold: bool,
    },
    /// Mute (`true`) or unmute (`false`)
    Mute {
        /// Requested mute state
        muted: bool,
    },
}

impl TransactionRequest {
    /// Action kind for this request
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Start { .. } => ActionKind::Start,
            Self::Answer { .. } => ActionKind::Answer,
            Self::End => ActionKind::End,
            Self::Hold { .. } => ActionKind::Hold,
            Self::Mute { .. } => ActionKind::Mute,
        }
    }
}

/// Why the platform should show a call as ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    /// The remote party hung up
    RemoteEnded,
    /// The call could not be established
    Failed,
    /// The call was answered or declined on another device
    AnsweredElsewhere,
}

/// Events emitted for observers of the bridge
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// An inbound call was registered
    IncomingCall {
        /// The incoming call
        call: IncomingCallHandle,
    },
    /// An inbound call ended before it was accepted
    IncomingCallEnded {
        /// Engine id of the call
        call_id: EngineCallId,
    },
    /// A call became active
    CallStarted {
        /// The active call
        call: CallHandle,
    },
    /// A call changed state
    CallStateChanged {
        /// Reported id of the call
        call_id: CallUuid,
        /// New state
        state: CallState,
    },
    /// Remote participants changed
    ParticipantsUpdated {
        /// Engine id of the call
        call_id: EngineCallId,
        /// Participants added
        added: Vec<Participant>,
        /// Participants removed
        removed: Vec<Participant>,
    },
    /// A call ended and was removed from the registry
    CallEnded {
        /// Reported id of the call
        call_id: CallUuid,
    },
    /// Local media started or stopped
    AudioSession {
        /// Whether local media is running
        active: bool,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_call_uuid() {
        let id1 = CallUuid::new();
        let id2 = CallUuid::new();
        assert_ne!(id1, id2);
        assert_eq!(CallUuid::parse(&id1.to_string()), Some(id1));
        assert_eq!(CallUuid::parse("not-a-uuid"), None);
    }

    #[test]
    fn test_engine_id_maps_to_uuid() {
        let uuid = CallUuid::new();
        let engine_id = EngineCallId::from(uuid);
        assert_eq!(engine_id.as_call_uuid(), Some(uuid));
        assert_eq!(EngineCallId::new("call-7").as_call_uuid(), None);
    }

    #[test]
    fn test_engine_id_ignores_uuid_case() {
        use std::collections::HashSet;

        let uuid = CallUuid::new();
        let upper = EngineCallId::new(uuid.to_string().to_uppercase());
        assert_eq!(upper, EngineCallId::from(uuid));
        assert_eq!(upper.as_call_uuid(), Some(uuid));
        assert_eq!(upper.as_str(), uuid.to_string().to_uppercase());

        let mut ids = HashSet::new();
        ids.insert(upper);
        assert!(ids.contains(&EngineCallId::from(uuid)));

        // Opaque ids stay case-sensitive.
        assert_ne!(EngineCallId::new("Call-7"), EngineCallId::new("call-7"));
    }

    #[test]
    fn test_options_muted_copy() {
        let options = CallOptions::video_call();
        let muted = options.with_audio_muted();
        assert!(muted.video);
        assert!(muted.outgoing_audio_muted);
        assert!(muted.incoming_audio_muted);
        assert!(!options.outgoing_audio_muted);
    }

    #[test]
    fn test_handle_records_connection_time() {
        let call = EngineCall {
            id: EngineCallId::new("e1"),
            direction: CallDirection::Outgoing,
            state: CallState::Connecting,
        };
        let mut handle = CallHandle::from_engine(&call, CallUuid::new(), &CallOptions::default());
        assert!(handle.connected_at.is_none());
        assert!(handle.duration().is_none());

        handle.set_state(CallState::Connected);
        let first = handle.connected_at.unwrap();
        handle.set_state(CallState::Held);
        handle.set_state(CallState::Connected);
        assert_eq!(handle.connected_at, Some(first));
    }

    #[test]
    fn test_request_kind() {
        assert_eq!(TransactionRequest::End.kind(), ActionKind::End);
        assert_eq!(
            TransactionRequest::Hold { on_hold: true }.kind(),
            ActionKind::Hold
        );
        assert_eq!(ActionKind::Answer.to_string(), "answer");
    }
}
