//! Cursor/seek engine over the replay buffer.
//!
//! Seeking forward yields only the newly crossed events for incremental
//! application; seeking backward (or jumping) yields the whole prefix with
//! `reset = true`, telling the consumer to discard accumulated visual state
//! and rebuild. Consumers that render via the pure time function can skip
//! event replay entirely.

use crate::flight::TRAVEL_DURATION;
use crate::replay::{ReplayBuffer, ReplayEvent};

/// Tolerance for comparing replay times.
pub const SEEK_EPSILON: f64 = 1e-6;

/// Result of a seek: which buffer events the consumer must apply, and
/// whether it has to reset its visual state first.
#[derive(Debug, PartialEq)]
pub struct SeekOutcome<'a> {
    /// Events to apply: the increment since the previous cursor on a forward
    /// advance, or the full prefix through the new cursor on a reset.
    pub events: &'a [ReplayEvent],
    /// Whether accumulated visual state must be discarded first.
    pub reset: bool,
    /// New cursor position (`-1` = before the first event).
    pub cursor: isize,
    /// New current time, clamped.
    pub time: f64,
}

/// Position within a replay buffer.
///
/// Invariant: `cursor` is always the greatest buffer index whose event time
/// is at or before `current_time` (within epsilon), or `-1` before the
/// first event.
#[derive(Debug, Clone)]
pub struct ReplayCursor {
    cursor: isize,
    current_time: f64,
}

impl Default for ReplayCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayCursor {
    /// A cursor positioned before the first event.
    pub fn new() -> Self {
        Self {
            cursor: -1,
            current_time: 0.0,
        }
    }

    pub fn cursor(&self) -> isize {
        self.cursor
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    /// Seek to an absolute replay time.
    ///
    /// `t` is clamped to `[0, duration + travel buffer]`; the travel buffer
    /// lets the final launch visibly complete past the last event.
    pub fn seek_to_time<'a>(&mut self, buffer: &'a ReplayBuffer, t: f64) -> SeekOutcome<'a> {
        let t = t.clamp(0.0, buffer.duration() + TRAVEL_DURATION);
        let new_cursor = buffer.index_at(t).map(|i| i as isize).unwrap_or(-1);

        let forward = new_cursor >= self.cursor && t >= self.current_time - SEEK_EPSILON;
        let (events, reset) = if forward {
            let start = (self.cursor + 1) as usize;
            let end = (new_cursor + 1) as usize;
            (&buffer.events()[start..end], false)
        } else {
            let end = (new_cursor + 1).max(0) as usize;
            (&buffer.events()[..end], true)
        };

        self.cursor = new_cursor;
        self.current_time = t;
        SeekOutcome {
            events,
            reset,
            cursor: new_cursor,
            time: t,
        }
    }

    /// Seek to a buffer index (clamped to the buffer).
    pub fn seek_to_index<'a>(&mut self, buffer: &'a ReplayBuffer, index: usize) -> SeekOutcome<'a> {
        let index = index.min(buffer.len().saturating_sub(1));
        let t = buffer
            .events()
            .get(index)
            .map(|e| e.relative_time)
            .unwrap_or(0.0);
        self.seek_to_time(buffer, t)
    }

    /// Move the cursor by one buffer position in either direction.
    pub fn step<'a>(&mut self, buffer: &'a ReplayBuffer, delta: i64) -> SeekOutcome<'a> {
        let target = (self.cursor as i64 + delta).max(0) as usize;
        self.seek_to_index(buffer, target)
    }
}
