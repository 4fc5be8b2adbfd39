//! Bounded, append-only event log.

use tracing::debug;

use crate::AgentEvent;

/// Default bound on retained events.
pub const DEFAULT_MAX_EVENTS: usize = 5000;

/// Result of pushing one event into the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Appended at the tail; derived state may be updated incrementally.
    Appended,
    /// Appended, but the oldest event was dropped to stay within the bound.
    /// Derived state must be rebuilt from scratch: pending aggregates may
    /// reference the discarded head.
    Truncated,
    /// Sequence already seen (replayed backlog overlap); the event was
    /// ignored.
    Stale,
}

/// Append-only, bounded, in-memory sequence of received events.
///
/// The log is the single source of truth for event order. Incremental pushes
/// must arrive in ascending `sequence` order; a full backlog replace accepts
/// any arrival order and re-sorts, because delivery order is not trusted on
/// reconnect.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<AgentEvent>,
    max_events: usize,
    last_sequence: Option<u64>,
}

impl EventLog {
    /// Create an empty log with the default bound.
    pub fn new() -> Self {
        Self::with_bound(DEFAULT_MAX_EVENTS)
    }

    /// Create an empty log with an explicit bound (must be non-zero).
    pub fn with_bound(max_events: usize) -> Self {
        Self {
            events: Vec::new(),
            max_events: max_events.max(1),
            last_sequence: None,
        }
    }

    /// All retained events, ascending by sequence.
    pub fn events(&self) -> &[AgentEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Highest sequence ever accepted, surviving truncation.
    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    /// Append one live event.
    ///
    /// Events at or below the last accepted sequence are ignored so that
    /// resuming live ingestion after a backlog replace never applies the
    /// same event twice.
    pub fn push(&mut self, event: AgentEvent) -> PushOutcome {
        if let Some(last) = self.last_sequence {
            if event.sequence <= last {
                debug!(sequence = event.sequence, "ignoring stale event");
                return PushOutcome::Stale;
            }
        }
        self.last_sequence = Some(event.sequence);
        self.events.push(event);

        if self.events.len() > self.max_events {
            let excess = self.events.len() - self.max_events;
            self.events.drain(..excess);
            return PushOutcome::Truncated;
        }
        PushOutcome::Appended
    }

    /// Install a full backlog, replacing current contents.
    ///
    /// The backlog is sorted by sequence (arrival order untrusted), deduped,
    /// and truncated to the newest `max_events` entries.
    pub fn replace(&mut self, mut backlog: Vec<AgentEvent>) {
        backlog.sort_by_key(|e| e.sequence);
        backlog.dedup_by_key(|e| e.sequence);
        if backlog.len() > self.max_events {
            let excess = backlog.len() - self.max_events;
            backlog.drain(..excess);
        }
        self.last_sequence = backlog.last().map(|e| e.sequence).or(self.last_sequence);
        self.events = backlog;
    }
}
