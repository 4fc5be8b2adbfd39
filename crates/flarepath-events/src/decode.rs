//! Payload inspection for opaque event payloads.
//!
//! Producers wrap their protocol events into the opaque `action` payload.
//! The recognized wrapped shape is an `action` object carrying an object
//! field `"msg"` with a string field `"type"`. Everything here decodes that
//! one shape and falls back to `None` for anything else. Unrecognized
//! payloads are still valid events, they just carry no subtype, fragment, or
//! correlation id.

use std::collections::HashSet;

use crate::AgentEvent;

/// Sentinel used in aggregate keys when the payload carries no id.
pub const ID_SENTINEL: &str = "-";

/// Configured set of delta subtypes, plus the fallback rule.
#[derive(Debug, Clone)]
pub struct DecodeConfig {
    delta_subtypes: HashSet<String>,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        let delta_subtypes = [
            "agent_message_delta",
            "agent_reasoning_delta",
            "agent_reasoning_raw_content_delta",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        Self { delta_subtypes }
    }
}

impl DecodeConfig {
    /// Build a config with an explicit delta-subtype set.
    pub fn new(delta_subtypes: impl IntoIterator<Item = String>) -> Self {
        Self {
            delta_subtypes: delta_subtypes.into_iter().collect(),
        }
    }

    /// Whether this event is a delta fragment: its subtype is in the
    /// configured set, or (fallback) the action type itself signals a delta.
    pub fn is_delta(&self, event: &AgentEvent) -> bool {
        match display_subtype(event) {
            Some(subtype) => self.delta_subtypes.contains(subtype),
            None => event.action_type.ends_with("_delta"),
        }
    }
}

/// The wrapped-protocol subtype, if the payload has the recognized shape.
pub fn display_subtype(event: &AgentEvent) -> Option<&str> {
    event.action.get("msg")?.get("type")?.as_str()
}

/// The partial text carried by a delta event, if any.
pub fn delta_fragment(event: &AgentEvent) -> Option<&str> {
    event.action.get("msg")?.get("delta")?.as_str()
}

/// The explicit correlation id, if the payload carries one.
pub fn correlation_id(event: &AgentEvent) -> Option<&str> {
    let msg = event.action.get("msg")?;
    msg.get("id")
        .and_then(|v| v.as_str())
        .or_else(|| msg.get("item_id").and_then(|v| v.as_str()))
}

/// Key used to group delta fragments into one display aggregate:
/// `id::subtype`, with a sentinel when the payload has no id.
pub fn aggregate_key(event: &AgentEvent) -> String {
    let id = correlation_id(event).unwrap_or(ID_SENTINEL);
    let subtype = display_subtype(event).unwrap_or(ID_SENTINEL);
    format!("{id}::{subtype}")
}

/// Key used to pair charging activity with its terminal event: the explicit
/// id when present, else an `actionType::subtype` composite. The composite
/// can merge unrelated concurrent activity of the same type; that collision
/// is an accepted approximation.
pub fn match_key(event: &AgentEvent) -> String {
    if let Some(id) = correlation_id(event) {
        return id.to_string();
    }
    let subtype = display_subtype(event).unwrap_or(ID_SENTINEL);
    format!("{}::{}", event.action_type, subtype)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(action: serde_json::Value) -> AgentEvent {
        AgentEvent {
            sequence: 1,
            timestamp_ms: 1000,
            action_type: "protocol_event".to_string(),
            action,
            state: None,
            conversation_id: None,
        }
    }

    #[test]
    fn wrapped_shape_yields_subtype() {
        let e = event(json!({"msg": {"type": "agent_message_delta", "delta": "Hi"}}));
        assert_eq!(display_subtype(&e), Some("agent_message_delta"));
        assert_eq!(delta_fragment(&e), Some("Hi"));
    }

    #[test]
    fn unrecognized_shape_yields_none() {
        let e = event(json!({"command": ["ls"]}));
        assert_eq!(display_subtype(&e), None);
        assert_eq!(delta_fragment(&e), None);
        assert_eq!(correlation_id(&e), None);
    }

    #[test]
    fn delta_detection_uses_configured_set() {
        let config = DecodeConfig::default();
        let delta = event(json!({"msg": {"type": "agent_message_delta", "delta": "x"}}));
        let terminal = event(json!({"msg": {"type": "agent_message", "message": "x"}}));
        assert!(config.is_delta(&delta));
        assert!(!config.is_delta(&terminal));
    }

    #[test]
    fn delta_detection_falls_back_to_action_type() {
        let config = DecodeConfig::default();
        let mut e = event(json!({"chunk": "raw"}));
        e.action_type = "stdout_delta".to_string();
        assert!(config.is_delta(&e));
    }

    #[test]
    fn correlation_id_prefers_id_over_item_id() {
        let e = event(json!({"msg": {"type": "t", "id": "a", "item_id": "b"}}));
        assert_eq!(correlation_id(&e), Some("a"));

        let e = event(json!({"msg": {"type": "t", "item_id": "b"}}));
        assert_eq!(correlation_id(&e), Some("b"));
    }

    #[test]
    fn keys_use_sentinel_without_id() {
        let e = event(json!({"msg": {"type": "agent_message_delta", "delta": "x"}}));
        assert_eq!(aggregate_key(&e), "-::agent_message_delta");
        assert_eq!(match_key(&e), "protocol_event::agent_message_delta");

        let e = event(json!({"msg": {"type": "agent_message_delta", "id": "item-1"}}));
        assert_eq!(aggregate_key(&e), "item-1::agent_message_delta");
        assert_eq!(match_key(&e), "item-1");
    }
}
