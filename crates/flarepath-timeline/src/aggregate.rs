//! Display aggregation: folding correlated delta events into rows.
//!
//! The aggregator consumes the event log in sequence order and maintains a
//! parallel list of display entries. A run of delta fragments sharing one
//! correlation key grows a single aggregate row in place; any non-matching
//! event closes it. Closed entries are never reopened.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use flarepath_events::decode::{self, DecodeConfig};
use flarepath_events::AgentEvent;

/// A run of delta fragments merged into one row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedDelta {
    /// Correlation key (`id::subtype`) that grouped the fragments.
    pub key: String,
    /// Subtype of the folded fragments.
    pub subtype: Option<String>,
    /// All fragment text, concatenated in sequence order.
    pub combined_text: String,
    /// The raw events folded in, in sequence order.
    pub segments: Vec<AgentEvent>,
    /// Most recent non-null state snapshot among the segments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
}

/// What a display entry wraps.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisplayEntryKind {
    /// A standalone event.
    Single { event: AgentEvent },
    /// Multiple delta events merged into one growing row.
    Aggregate { delta: AggregatedDelta },
}

/// One visual row of the timeline list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayEntry {
    #[serde(flatten)]
    pub kind: DisplayEntryKind,
    /// Every sequence number this row represents, ascending and non-empty.
    pub sequences: Vec<u64>,
}

impl DisplayEntry {
    /// Sequence of the first event in this row.
    pub fn primary_sequence(&self) -> u64 {
        self.sequences.first().copied().unwrap_or_default()
    }

    /// Sequence of the most recent event folded into this row.
    pub fn latest_sequence(&self) -> u64 {
        self.sequences.last().copied().unwrap_or_default()
    }

    /// Timestamp of the first event in this row.
    pub fn timestamp_ms(&self) -> u64 {
        match &self.kind {
            DisplayEntryKind::Single { event } => event.timestamp_ms,
            DisplayEntryKind::Aggregate { delta } => {
                delta.segments.first().map(|e| e.timestamp_ms).unwrap_or_default()
            }
        }
    }

    /// Whether this row represents the given sequence number.
    pub fn contains_sequence(&self, sequence: u64) -> bool {
        self.sequences.binary_search(&sequence).is_ok()
    }
}

#[derive(Debug)]
struct PendingAggregate {
    key: String,
    index: usize,
}

/// Streaming aggregator over sequence-ordered events.
///
/// `push` and `rebuild` share the same transition function: a rebuild is just
/// a replay of `push` from empty state, after re-sorting the snapshot by
/// sequence (arrival order is untrusted).
#[derive(Debug, Default)]
pub struct Aggregator {
    config: DecodeConfig,
    entries: Vec<DisplayEntry>,
    pending: Option<PendingAggregate>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::with_config(DecodeConfig::default())
    }

    pub fn with_config(config: DecodeConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
            pending: None,
        }
    }

    /// Current display entries, oldest first.
    pub fn entries(&self) -> &[DisplayEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Process the next event in sequence order. Returns the index of the
    /// entry it affected, new or mutated.
    pub fn push(&mut self, event: &AgentEvent) -> usize {
        if self.config.is_delta(event) {
            if let Some(fragment) = decode::delta_fragment(event) {
                return self.push_fragment(event, fragment);
            }
        }
        // Not a delta, or a delta with no extractable text: close any
        // pending aggregate and emit a standalone row.
        self.pending = None;
        self.entries.push(DisplayEntry {
            kind: DisplayEntryKind::Single {
                event: event.clone(),
            },
            sequences: vec![event.sequence],
        });
        self.entries.len() - 1
    }

    fn push_fragment(&mut self, event: &AgentEvent, fragment: &str) -> usize {
        let key = decode::aggregate_key(event);

        if let Some(pending) = &self.pending {
            if pending.key == key {
                let index = pending.index;
                if let DisplayEntryKind::Aggregate { delta } = &mut self.entries[index].kind {
                    delta.combined_text.push_str(fragment);
                    delta.segments.push(event.clone());
                    if event.state.is_some() {
                        delta.state = event.state.clone();
                    }
                }
                self.entries[index].sequences.push(event.sequence);
                return index;
            }
        }

        // Key changed or is new: the previous pending aggregate (if any) is
        // closed implicitly and a fresh one opens.
        self.entries.push(DisplayEntry {
            kind: DisplayEntryKind::Aggregate {
                delta: AggregatedDelta {
                    key: key.clone(),
                    subtype: decode::display_subtype(event).map(str::to_string),
                    combined_text: fragment.to_string(),
                    segments: vec![event.clone()],
                    state: event.state.clone(),
                },
            },
            sequences: vec![event.sequence],
        });
        let index = self.entries.len() - 1;
        self.pending = Some(PendingAggregate { key, index });
        index
    }

    /// Rebuild from a full snapshot of the event log. Re-sorts by sequence
    /// first and replays the transition function from empty state.
    pub fn rebuild(&mut self, events: &[AgentEvent]) -> &[DisplayEntry] {
        debug!(events = events.len(), "rebuilding display entries");
        self.entries.clear();
        self.pending = None;

        let mut ordered: Vec<&AgentEvent> = events.iter().collect();
        ordered.sort_by_key(|e| e.sequence);
        for event in ordered {
            self.push(event);
        }
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn delta(sequence: u64, id: &str, text: &str) -> AgentEvent {
        AgentEvent {
            sequence,
            timestamp_ms: 1000 + sequence * 10,
            action_type: "protocol_event".to_string(),
            action: json!({"msg": {"type": "agent_message_delta", "id": id, "delta": text}}),
            state: None,
            conversation_id: None,
        }
    }

    fn terminal(sequence: u64, id: &str) -> AgentEvent {
        AgentEvent {
            sequence,
            timestamp_ms: 1000 + sequence * 10,
            action_type: "protocol_event".to_string(),
            action: json!({"msg": {"type": "agent_message", "id": id, "message": "done"}}),
            state: None,
            conversation_id: None,
        }
    }

    #[test]
    fn fragments_merge_into_one_entry() {
        let mut agg = Aggregator::new();
        agg.push(&delta(1, "a", "He"));
        agg.push(&delta(2, "a", "llo"));
        agg.push(&terminal(3, "a"));

        assert_eq!(agg.len(), 2);
        let entry = &agg.entries()[0];
        assert_eq!(entry.sequences, vec![1, 2]);
        match &entry.kind {
            DisplayEntryKind::Aggregate { delta } => {
                assert_eq!(delta.combined_text, "Hello");
                assert_eq!(delta.segments.len(), 2);
            }
            other => panic!("expected aggregate, got {other:?}"),
        }
        // The closing terminal event is its own standalone row.
        assert_eq!(agg.entries()[1].sequences, vec![3]);
    }

    #[test]
    fn key_change_flushes_pending() {
        let mut agg = Aggregator::new();
        agg.push(&delta(1, "a", "x"));
        agg.push(&delta(2, "b", "y"));
        agg.push(&delta(3, "a", "z"));

        // Three entries: aggregation never reopens a closed row.
        assert_eq!(agg.len(), 3);
        for (entry, text) in agg.entries().iter().zip(["x", "y", "z"]) {
            match &entry.kind {
                DisplayEntryKind::Aggregate { delta } => assert_eq!(delta.combined_text, text),
                other => panic!("expected aggregate, got {other:?}"),
            }
        }
    }

    #[test]
    fn subtype_change_with_same_id_starts_new_entry() {
        let reasoning = AgentEvent {
            action: json!({"msg": {"type": "agent_reasoning_delta", "id": "a", "delta": "think"}}),
            ..delta(2, "a", "")
        };

        let mut agg = Aggregator::new();
        agg.push(&delta(1, "a", "msg"));
        agg.push(&reasoning);
        assert_eq!(agg.len(), 2);
    }

    #[test]
    fn delta_without_fragment_text_is_standalone() {
        let mut empty = delta(2, "a", "");
        empty.action = json!({"msg": {"type": "agent_message_delta", "id": "a"}});

        let mut agg = Aggregator::new();
        agg.push(&delta(1, "a", "x"));
        agg.push(&empty);
        agg.push(&delta(3, "a", "y"));

        // The bare delta closed the aggregate; "y" starts a new one.
        assert_eq!(agg.len(), 3);
        assert!(matches!(
            agg.entries()[1].kind,
            DisplayEntryKind::Single { .. }
        ));
    }

    #[test]
    fn trailing_state_tracks_latest_snapshot() {
        let mut first = delta(1, "a", "x");
        first.state = Some(json!({"step": 1}));
        let mut second = delta(2, "a", "y");
        second.state = Some(json!({"step": 2}));
        let third = delta(3, "a", "z");

        let mut agg = Aggregator::new();
        agg.push(&first);
        agg.push(&second);
        agg.push(&third);

        match &agg.entries()[0].kind {
            DisplayEntryKind::Aggregate { delta } => {
                assert_eq!(delta.state, Some(json!({"step": 2})));
            }
            other => panic!("expected aggregate, got {other:?}"),
        }
    }

    #[test]
    fn rebuild_is_idempotent() {
        let events = vec![
            delta(1, "a", "He"),
            delta(2, "a", "llo"),
            terminal(3, "a"),
            delta(4, "b", "!"),
        ];

        let mut agg = Aggregator::new();
        let first: Vec<DisplayEntry> = agg.rebuild(&events).to_vec();
        let second: Vec<DisplayEntry> = agg.rebuild(&events).to_vec();
        assert_eq!(first, second);
    }

    #[test]
    fn incremental_push_matches_full_rebuild() {
        let events = vec![
            delta(1, "a", "He"),
            delta(2, "a", "llo"),
            terminal(3, "a"),
            delta(4, "b", "wor"),
            delta(5, "b", "ld"),
        ];

        let mut incremental = Aggregator::new();
        for event in &events {
            incremental.push(event);
        }
        let mut rebuilt = Aggregator::new();
        rebuilt.rebuild(&events);

        assert_eq!(incremental.entries(), rebuilt.entries());
    }

    proptest! {
        /// Any permutation of arrival order rebuilds to the same entries as
        /// the canonical sequence order.
        #[test]
        fn rebuild_is_order_independent(order in Just((0..8usize).collect::<Vec<_>>()).prop_shuffle()) {
            let canonical = vec![
                delta(1, "a", "He"),
                delta(2, "a", "llo"),
                terminal(3, "a"),
                delta(4, "b", "wor"),
                delta(5, "b", "ld"),
                terminal(6, "b"),
                delta(7, "a", "again"),
                terminal(8, "a"),
            ];
            let shuffled: Vec<AgentEvent> =
                order.iter().map(|&i| canonical[i].clone()).collect();

            let mut a = Aggregator::new();
            let expected = a.rebuild(&canonical).to_vec();
            let mut b = Aggregator::new();
            let got = b.rebuild(&shuffled).to_vec();
            prop_assert_eq!(expected, got);
        }
    }
}
