//! Push notification payloads
//!
//! Only what the bridge needs is read: the call id plus the caller details
//! the native UI shows. The fields may sit under a `data` object or at the
//! top level.

use crate::error::{CallControlError, CallControlResult};
use crate::identity::Participant;
use crate::platform::CallUpdate;
use crate::types::CallUuid;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPushData {
    call_id: Option<String>,
    caller_id: Option<String>,
    display_name: Option<String>,
    video_call: Option<Value>,
}

/// Incoming-call information carried by a push notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushNotificationInfo {
    /// Id of the announced call
    pub call_id: CallUuid,
    /// Who is calling
    pub caller: Participant,
    /// Caller display name
    pub display_name: Option<String>,
    /// Caller offers video
    pub video_call: bool,
}

impl PushNotificationInfo {
    /// Parse a JSON payload
    ///
    /// # Errors
    ///
    /// Returns `InvalidPushPayload` if the payload is empty, is not an
    /// object, or has no parseable call id.
    pub fn from_json(payload: &Value) -> CallControlResult<Self> {
        let body = match payload.get("data") {
            Some(data) if data.is_object() => data,
            _ => payload,
        };
        match body.as_object() {
            Some(map) if !map.is_empty() => {}
            _ => {
                return Err(CallControlError::InvalidPushPayload(
                    "payload is empty".to_string(),
                ))
            }
        }

        let raw: RawPushData = serde_json::from_value(body.clone())
            .map_err(|e| CallControlError::InvalidPushPayload(e.to_string()))?;
        let call_id = raw
            .call_id
            .as_deref()
            .and_then(CallUuid::parse)
            .ok_or_else(|| CallControlError::InvalidPushPayload("missing callId".to_string()))?;

        Ok(Self {
            call_id,
            caller: Participant::new(raw.caller_id.unwrap_or_default()),
            display_name: raw.display_name.filter(|n| !n.is_empty()),
            video_call: raw.video_call.as_ref().is_some_and(is_truthy),
        })
    }

    /// Parse a JSON payload from bytes
    ///
    /// # Errors
    ///
    /// Returns `InvalidPushPayload` if the bytes are not JSON or lack a call id
    pub fn from_slice(payload: &[u8]) -> CallControlResult<Self> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| CallControlError::InvalidPushPayload(e.to_string()))?;
        Self::from_json(&value)
    }

    /// What the native UI should show for this call
    pub fn call_update(&self, fallback_name: Option<&str>) -> CallUpdate {
        let display_name = self
            .display_name
            .clone()
            .or_else(|| fallback_name.map(str::to_string));
        CallUpdate::for_caller(&self.caller, display_name, self.video_call)
    }
}

// The relay sends the video flag as a string.
fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true") || s == "1",
        Value::Number(n) => n.as_u64().is_some_and(|n| n != 0),
        _ => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_nested_payload() {
        let id = CallUuid::new();
        let payload = json!({
            "aps": {},
            "data": {
                "eventId": 107,
                "callId": id.to_string(),
                "callerId": "8:acs:caller",
                "displayName": "Alice",
                "videoCall": "true"
            }
        });
        let info = PushNotificationInfo::from_json(&payload).unwrap();
        assert_eq!(info.call_id, id);
        assert_eq!(info.caller.as_str(), "8:acs:caller");
        assert_eq!(info.display_name.as_deref(), Some("Alice"));
        assert!(info.video_call);
    }

    #[test]
    fn test_parse_flat_payload() {
        let id = CallUuid::new();
        let payload = json!({ "callId": id.to_string(), "videoCall": false });
        let info = PushNotificationInfo::from_json(&payload).unwrap();
        assert_eq!(info.call_id, id);
        assert!(!info.video_call);
        assert_eq!(
            info.call_update(Some("Unknown caller")).display_name.as_deref(),
            Some("Unknown caller")
        );
    }

    #[test]
    fn test_rejects_empty_and_missing_id() {
        assert!(matches!(
            PushNotificationInfo::from_json(&json!({})),
            Err(CallControlError::InvalidPushPayload(_))
        ));
        assert!(matches!(
            PushNotificationInfo::from_json(&json!({ "data": { "callId": "nope" } })),
            Err(CallControlError::InvalidPushPayload(_))
        ));
        assert!(PushNotificationInfo::from_slice(b"not json").is_err());
    }
}
