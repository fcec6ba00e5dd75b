//! Participant identity and call targets
//!
//! Callers and callees are identified by raw strings whose shape tells
//! what kind of identifier they are. A call target is either a list of
//! participants or a meeting to join.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Prefix carried by communication-service user ids
const COMMUNICATION_USER_PREFIX: &str = "8:";

/// Prefix carried by meeting links
const MEETING_LINK_PREFIX: &str = "https:";

/// Prefix marking a room id
const ROOM_PREFIX: &str = "room:";

/// Target parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetParseError {
    /// Empty input
    #[error("Call target is empty")]
    Empty,

    /// No participant in the list
    #[error("Call target has no participants")]
    NoParticipants,

    /// `room:` with nothing after it
    #[error("Room target has no room id")]
    EmptyRoomId,
}

/// Kind of participant identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantKind {
    /// Communication-service user (`8:...`)
    CommunicationUser,
    /// Phone number (`+1555...`)
    PhoneNumber,
    /// Anything else
    Unknown,
}

/// A remote party in a call
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    /// Raw identifier
    pub raw_id: String,
    /// Identifier kind
    pub kind: ParticipantKind,
}

impl Participant {
    /// Classify a raw identifier
    pub fn new(raw_id: impl Into<String>) -> Self {
        let raw_id = raw_id.into().trim().to_string();
        let kind = if raw_id.starts_with(COMMUNICATION_USER_PREFIX) {
            ParticipantKind::CommunicationUser
        } else if is_phone_number(&raw_id) {
            ParticipantKind::PhoneNumber
        } else {
            ParticipantKind::Unknown
        };
        Self { raw_id, kind }
    }

    /// Get the raw identifier
    pub fn as_str(&self) -> &str {
        &self.raw_id
    }
}

fn is_phone_number(s: &str) -> bool {
    let digits = s.strip_prefix('+').unwrap_or(s);
    !digits.is_empty()
        && digits
            .chars()
            .all(|c| c.is_ascii_digit() || c == ' ' || c == '-')
}

impl Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw_id)
    }
}

impl From<&str> for Participant {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Participant {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// A meeting that can be joined
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeetingLocator {
    /// Group call identified by a UUID
    GroupCall(Uuid),
    /// Meeting link
    MeetingLink(String),
    /// Pre-provisioned room
    Room(String),
}

impl Display for MeetingLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GroupCall(id) => write!(f, "group:{id}"),
            Self::MeetingLink(link) => write!(f, "{link}"),
            Self::Room(id) => write!(f, "{ROOM_PREFIX}{id}"),
        }
    }
}

/// What an outbound call connects to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallTarget {
    /// One or more participants
    Participants(Vec<Participant>),
    /// A meeting to join
    Meeting(MeetingLocator),
}

impl CallTarget {
    /// Call a single participant
    pub fn participant(p: impl Into<Participant>) -> Self {
        Self::Participants(vec![p.into()])
    }

    /// Handle value shown by the platform for this target
    pub fn handle_value(&self) -> String {
        match self {
            Self::Participants(list) => list
                .iter()
                .map(Participant::as_str)
                .collect::<Vec<_>>()
                .join(","),
            Self::Meeting(locator) => locator.to_string(),
        }
    }
}

impl FromStr for CallTarget {
    type Err = TargetParseError;

    /// Parse a free-form target
    ///
    /// UUIDs are group calls, `https:` links are meetings, `room:<id>` is a
    /// room, and anything else is a comma-separated participant list.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TargetParseError::Empty);
        }
        if let Ok(group_id) = Uuid::parse_str(s) {
            return Ok(Self::Meeting(MeetingLocator::GroupCall(group_id)));
        }
        if s.starts_with(MEETING_LINK_PREFIX) {
            return Ok(Self::Meeting(MeetingLocator::MeetingLink(s.to_string())));
        }
        if let Some(room_id) = s.strip_prefix(ROOM_PREFIX) {
            let room_id = room_id.trim();
            if room_id.is_empty() {
                return Err(TargetParseError::EmptyRoomId);
            }
            return Ok(Self::Meeting(MeetingLocator::Room(room_id.to_string())));
        }
        let participants: Vec<Participant> = s
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(Participant::new)
            .collect();
        if participants.is_empty() {
            return Err(TargetParseError::NoParticipants);
        }
        Ok(Self::Participants(participants))
    }
}
