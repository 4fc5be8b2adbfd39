//! The inbound agent-execution event record.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One agent-execution event as produced by the transport layer.
///
/// Events are immutable once created. `sequence` is globally unique and
/// strictly increasing; it defines the total order over events. By contract
/// `timestamp_ms` is monotonic non-decreasing with `sequence`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEvent {
    /// Strictly increasing, globally unique. The only trusted order.
    pub sequence: u64,
    /// Absolute wall-clock milliseconds.
    pub timestamp_ms: u64,
    /// String tag describing what the agent did.
    pub action_type: String,
    /// Opaque structured payload.
    pub action: Value,
    /// Opaque state snapshot, if the producer attached one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    /// Correlation hint for multi-conversation producers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl AgentEvent {
    /// Event timestamp in fractional seconds.
    pub fn timestamp_secs(&self) -> f64 {
        self.timestamp_ms as f64 / 1000.0
    }
}
