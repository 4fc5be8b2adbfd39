//! Replay buffer: an immutable, relative-time-stamped snapshot of the log.
//!
//! Built exactly once when replay mode is entered and treated as immutable
//! for the whole session. Times are seconds since the first event of the
//! snapshot.

use std::collections::HashMap;

use serde::Serialize;

use flarepath_events::AgentEvent;

use crate::cursor::SEEK_EPSILON;
use crate::{DisplayEntry, Result, TimelineError};

/// An event annotated with its time offset inside the replay snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayEvent {
    #[serde(flatten)]
    pub event: AgentEvent,
    /// Seconds since the first event in the snapshot.
    pub relative_time: f64,
}

/// Immutable replay snapshot of the event log.
#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    events: Vec<ReplayEvent>,
    duration: f64,
}

impl ReplayBuffer {
    /// Build from the event log, which must already be ascending by
    /// sequence. Fails on an empty log.
    pub fn build(events: &[AgentEvent]) -> Result<Self> {
        let first = events.first().ok_or(TimelineError::EmptyLog)?;
        let base = first.timestamp_ms;

        let events: Vec<ReplayEvent> = events
            .iter()
            .map(|event| ReplayEvent {
                relative_time: event.timestamp_ms.saturating_sub(base) as f64 / 1000.0,
                event: event.clone(),
            })
            .collect();
        let duration = events.last().map(|e| e.relative_time).unwrap_or(0.0);

        Ok(Self { events, duration })
    }

    pub fn events(&self) -> &[ReplayEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Relative time of the last event.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Greatest index whose event is at or before `t` (within epsilon).
    /// `None` when `t` lies before the first event.
    pub fn index_at(&self, t: f64) -> Option<usize> {
        let n = self
            .events
            .partition_point(|e| e.relative_time <= t + SEEK_EPSILON);
        n.checked_sub(1)
    }
}

/// Bidirectional mapping between replay-buffer positions and display-entry
/// positions, used to keep the timeline list in sync while scrubbing.
#[derive(Debug, Clone)]
pub struct DisplayIndex {
    sequence_to_display: HashMap<u64, usize>,
    buffer_to_display: Vec<usize>,
    display_to_buffer: Vec<Option<usize>>,
}

impl DisplayIndex {
    /// Build the maps for one replay session.
    ///
    /// Exact `sequence` membership in an entry's `sequences` set wins; a
    /// buffer event whose sequence is absent from every entry (should not
    /// normally happen) falls back to the nearest entry by timestamp.
    pub fn build(buffer: &ReplayBuffer, entries: &[DisplayEntry]) -> Self {
        let mut sequence_to_display = HashMap::new();
        for (index, entry) in entries.iter().enumerate() {
            for &sequence in &entry.sequences {
                sequence_to_display.insert(sequence, index);
            }
        }

        let mut buffer_to_display = Vec::with_capacity(buffer.len());
        let mut display_to_buffer = vec![None; entries.len()];
        for (buffer_index, replay_event) in buffer.events().iter().enumerate() {
            let display_index = sequence_to_display
                .get(&replay_event.event.sequence)
                .copied()
                .unwrap_or_else(|| {
                    nearest_by_timestamp(entries, replay_event.event.timestamp_ms)
                });
            buffer_to_display.push(display_index);
            if let Some(slot) = display_to_buffer.get_mut(display_index) {
                if slot.is_none() {
                    *slot = Some(buffer_index);
                }
            }
        }

        Self {
            sequence_to_display,
            buffer_to_display,
            display_to_buffer,
        }
    }

    /// Display-entry index for a buffer position.
    pub fn display_for_buffer(&self, buffer_index: usize) -> Option<usize> {
        self.buffer_to_display.get(buffer_index).copied()
    }

    /// First buffer position belonging to a display entry.
    pub fn buffer_for_display(&self, display_index: usize) -> Option<usize> {
        self.display_to_buffer.get(display_index).copied().flatten()
    }

    /// Display-entry index for an exact sequence number.
    pub fn display_for_sequence(&self, sequence: u64) -> Option<usize> {
        self.sequence_to_display.get(&sequence).copied()
    }
}

fn nearest_by_timestamp(entries: &[DisplayEntry], timestamp_ms: u64) -> usize {
    let mut best = 0;
    let mut best_distance = u64::MAX;
    for (index, entry) in entries.iter().enumerate() {
        let distance = entry.timestamp_ms().abs_diff(timestamp_ms);
        if distance < best_distance {
            best = index;
            best_distance = distance;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Aggregator;
    use serde_json::json;

    fn event(sequence: u64, timestamp_ms: u64) -> AgentEvent {
        AgentEvent {
            sequence,
            timestamp_ms,
            action_type: "task_started".to_string(),
            action: json!({}),
            state: None,
            conversation_id: None,
        }
    }

    #[test]
    fn build_fails_on_empty_log() {
        assert_eq!(
            ReplayBuffer::build(&[]).unwrap_err(),
            TimelineError::EmptyLog
        );
    }

    #[test]
    fn relative_times_are_seconds_from_first_event() {
        let buffer =
            ReplayBuffer::build(&[event(1, 5000), event(2, 5500), event(3, 8000)]).unwrap();
        let times: Vec<f64> = buffer.events().iter().map(|e| e.relative_time).collect();
        assert_eq!(times, vec![0.0, 0.5, 3.0]);
        assert_eq!(buffer.duration(), 3.0);
    }

    #[test]
    fn index_at_picks_greatest_at_or_before() {
        let buffer =
            ReplayBuffer::build(&[event(1, 1000), event(2, 2000), event(3, 4000)]).unwrap();
        assert_eq!(buffer.index_at(-0.5), None);
        assert_eq!(buffer.index_at(0.0), Some(0));
        assert_eq!(buffer.index_at(1.0), Some(1));
        assert_eq!(buffer.index_at(2.9), Some(1));
        assert_eq!(buffer.index_at(3.0), Some(2));
        assert_eq!(buffer.index_at(100.0), Some(2));
    }

    #[test]
    fn display_index_round_trips_sequences() {
        let events = vec![event(1, 1000), event(2, 2000), event(3, 3000)];
        let mut aggregator = Aggregator::new();
        let entries = aggregator.rebuild(&events).to_vec();
        let buffer = ReplayBuffer::build(&events).unwrap();

        let index = DisplayIndex::build(&buffer, &entries);
        assert_eq!(index.display_for_buffer(0), Some(0));
        assert_eq!(index.display_for_buffer(2), Some(2));
        assert_eq!(index.buffer_for_display(1), Some(1));
        assert_eq!(index.display_for_sequence(3), Some(2));
    }

    #[test]
    fn missing_sequence_falls_back_to_nearest_timestamp() {
        let events = vec![event(1, 1000), event(2, 2000)];
        let mut aggregator = Aggregator::new();
        // Entries built from only the first event: sequence 2 is unknown.
        let entries = aggregator.rebuild(&events[..1]).to_vec();
        let buffer = ReplayBuffer::build(&events).unwrap();

        let index = DisplayIndex::build(&buffer, &entries);
        assert_eq!(index.display_for_buffer(1), Some(0));
    }
}
