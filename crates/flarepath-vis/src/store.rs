//! The canonical state owner: event log, display entries, replay state.
//!
//! All mutation goes through this store; there are no ambient singletons.
//! The store handle is passed explicitly to every operation, and subscribers
//! (relay fan-out, renderers) are notified over a broadcast channel.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use flarepath_events::decode::DecodeConfig;
use flarepath_events::{AgentEvent, EventLog, PushOutcome};
use flarepath_timeline::{
    derive_tokens, evaluate_at, Aggregator, DisplayEntry, DisplayIndex, FlightToken,
    LiveFlightEngine, ReplayBuffer, ReplayCursor, ReplayEvent, TokenSnapshot, TRAVEL_DURATION,
};

/// Playback speed bounds.
pub const MIN_SPEED: f64 = 0.25;
pub const MAX_SPEED: f64 = 10.0;

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Whether the store is rendering the live stream or a frozen snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreMode {
    Live,
    Replay,
}

/// Playback status within a replay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStatus {
    Idle,
    Playing,
    Paused,
}

/// Change notifications for subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreUpdate {
    /// A live event was accepted into the log.
    Event { event: AgentEvent },
    /// Display entries were rebuilt from scratch (backlog replace or
    /// bound truncation).
    TimelineRebuilt { entries: usize },
    ReplayEntered,
    ReplayExited,
    /// The replay clock moved.
    ReplayTick { time: f64, cursor: i64 },
}

/// Owned result of a seek, for consumers outside the buffer's lifetime.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeekResult {
    /// Buffer events the consumer must apply (increment or full prefix).
    pub events: Vec<ReplayEvent>,
    /// Whether accumulated visual state must be discarded first.
    pub reset: bool,
    pub cursor: i64,
    pub time: f64,
    /// Display entry to scroll the timeline list to, if any.
    pub display_index: Option<usize>,
}

/// Snapshot of replay state for status endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayStatusView {
    pub mode: StoreMode,
    pub status: ReplayStatus,
    pub speed: f64,
    pub cursor: i64,
    pub current_time: f64,
    pub duration: f64,
    pub buffer_len: usize,
    pub token_count: usize,
}

struct ReplaySession {
    buffer: ReplayBuffer,
    tokens: Vec<FlightToken>,
    cursor: ReplayCursor,
    index: DisplayIndex,
    status: ReplayStatus,
    speed: f64,
}

/// Single mutable owner of log, display entries, and replay state.
pub struct VisualizerStore {
    log: EventLog,
    aggregator: Aggregator,
    live_engine: LiveFlightEngine,
    replay: Option<ReplaySession>,
    updates: broadcast::Sender<StoreUpdate>,
}

impl Default for VisualizerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VisualizerStore {
    pub fn new() -> Self {
        Self::with_log(EventLog::new())
    }

    /// Store over a log with an explicit bound (used by tests and small
    /// deployments).
    pub fn with_log(log: EventLog) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            log,
            aggregator: Aggregator::with_config(DecodeConfig::default()),
            live_engine: LiveFlightEngine::default(),
            replay: None,
            updates,
        }
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreUpdate> {
        self.updates.subscribe()
    }

    pub fn mode(&self) -> StoreMode {
        if self.replay.is_some() {
            StoreMode::Replay
        } else {
            StoreMode::Live
        }
    }

    pub fn events(&self) -> &[AgentEvent] {
        self.log.events()
    }

    pub fn entries(&self) -> &[DisplayEntry] {
        self.aggregator.entries()
    }

    fn notify(&self, update: StoreUpdate) {
        // Send fails only when no subscriber is connected; that is fine.
        let _ = self.updates.send(update);
    }

    // ---- live ingestion ----------------------------------------------

    /// Accept one live event. Returns the index of the display entry it
    /// affected, or `None` for a stale duplicate.
    ///
    /// Live ingestion continues even while a replay session is frozen; the
    /// replay buffer is an immutable snapshot and is not affected.
    pub fn ingest(&mut self, event: AgentEvent) -> Option<usize> {
        let index = match self.log.push(event.clone()) {
            PushOutcome::Stale => return None,
            PushOutcome::Appended => self.aggregator.push(&event),
            PushOutcome::Truncated => {
                // The log head was discarded; pending aggregates may
                // reference dropped events, so rebuild from the snapshot.
                debug!(sequence = event.sequence, "log bound hit; rebuilding timeline");
                let entries = self.aggregator.rebuild(self.log.events()).len();
                self.notify(StoreUpdate::TimelineRebuilt { entries });
                entries.saturating_sub(1)
            }
        };
        self.live_engine.observe(&event);
        self.notify(StoreUpdate::Event { event });
        Some(index)
    }

    /// Install a full backlog (reconnect path). Arrival order untrusted.
    pub fn replace_backlog(&mut self, backlog: Vec<AgentEvent>) {
        self.log.replace(backlog);
        let entries = self.aggregator.rebuild(self.log.events()).len();
        info!(events = self.log.len(), entries, "backlog installed");
        self.notify(StoreUpdate::TimelineRebuilt { entries });
    }

    /// Advance the live visual engine by one render tick.
    pub fn live_tick(&mut self, dt: f64) {
        self.live_engine.tick(dt);
    }

    /// Renderable live token state at the current engine clock.
    pub fn live_frame(&self) -> Vec<TokenSnapshot> {
        self.live_engine.snapshot()
    }

    // ---- replay ------------------------------------------------------

    /// Freeze the stream and build the replay snapshot. Returns false (a
    /// recoverable no-op) when the log is empty.
    pub fn enter_replay(&mut self) -> bool {
        let Ok(buffer) = ReplayBuffer::build(self.log.events()) else {
            return false;
        };
        let tokens = derive_tokens(&buffer, &DecodeConfig::default());
        let index = DisplayIndex::build(&buffer, self.aggregator.entries());
        info!(
            events = buffer.len(),
            tokens = tokens.len(),
            duration = buffer.duration(),
            "entering replay"
        );
        self.replay = Some(ReplaySession {
            buffer,
            tokens,
            cursor: ReplayCursor::new(),
            index,
            status: ReplayStatus::Idle,
            speed: 1.0,
        });
        self.notify(StoreUpdate::ReplayEntered);
        true
    }

    /// Release the replay snapshot and resume live rendering. Already-seen
    /// events are never re-applied: the log tracked sequences throughout.
    pub fn exit_replay(&mut self) {
        if self.replay.take().is_some() {
            info!("exiting replay");
            self.notify(StoreUpdate::ReplayExited);
        }
    }

    pub fn play(&mut self) {
        if let Some(session) = &mut self.replay {
            session.status = ReplayStatus::Playing;
        }
    }

    pub fn pause(&mut self) {
        if let Some(session) = &mut self.replay {
            session.status = ReplayStatus::Paused;
        }
    }

    /// Set the playback speed multiplier, clamped to the allowed range.
    /// Returns the effective speed.
    pub fn set_speed(&mut self, speed: f64) -> f64 {
        match &mut self.replay {
            Some(session) => {
                session.speed = speed.clamp(MIN_SPEED, MAX_SPEED);
                session.speed
            }
            None => speed.clamp(MIN_SPEED, MAX_SPEED),
        }
    }

    /// Current replay status, if a session is active.
    pub fn replay_status(&self) -> Option<ReplayStatusView> {
        let session = self.replay.as_ref()?;
        Some(ReplayStatusView {
            mode: StoreMode::Replay,
            status: session.status,
            speed: session.speed,
            cursor: session.cursor.cursor() as i64,
            current_time: session.cursor.current_time(),
            duration: session.buffer.duration(),
            buffer_len: session.buffer.len(),
            token_count: session.tokens.len(),
        })
    }

    /// Seek the replay clock to an absolute time.
    pub fn seek_to_time(&mut self, t: f64) -> Option<SeekResult> {
        let session = self.replay.as_mut()?;
        let outcome = session.cursor.seek_to_time(&session.buffer, t);
        let result = SeekResult {
            events: outcome.events.to_vec(),
            reset: outcome.reset,
            cursor: outcome.cursor as i64,
            time: outcome.time,
            display_index: usize::try_from(outcome.cursor)
                .ok()
                .and_then(|i| session.index.display_for_buffer(i)),
        };
        self.notify(StoreUpdate::ReplayTick {
            time: result.time,
            cursor: result.cursor,
        });
        Some(result)
    }

    /// Seek to a buffer index (timeline-list click path).
    pub fn seek_to_index(&mut self, index: usize) -> Option<SeekResult> {
        let t = {
            let session = self.replay.as_ref()?;
            let clamped = index.min(session.buffer.len().saturating_sub(1));
            session.buffer.events().get(clamped)?.relative_time
        };
        self.seek_to_time(t)
    }

    /// Move the cursor one buffer position in either direction.
    pub fn step(&mut self, delta: i64) -> Option<SeekResult> {
        let target = {
            let session = self.replay.as_ref()?;
            (session.cursor.cursor() as i64 + delta).max(0) as usize
        };
        self.seek_to_index(target)
    }

    /// Tick-driven advance while playing; pauses at the end of the buffer
    /// (plus the travel buffer, so the final launch completes).
    pub fn advance(&mut self, dt: f64) -> Option<SeekResult> {
        let target = {
            let session = self.replay.as_ref()?;
            if session.status != ReplayStatus::Playing {
                return None;
            }
            session.cursor.current_time() + dt * session.speed
        };
        let result = self.seek_to_time(target)?;

        if let Some(session) = &mut self.replay {
            if result.time >= session.buffer.duration() + TRAVEL_DURATION {
                session.status = ReplayStatus::Paused;
            }
        }
        Some(result)
    }

    /// Pure visual evaluation at the current replay time.
    pub fn replay_frame(&self) -> Option<Vec<TokenSnapshot>> {
        let session = self.replay.as_ref()?;
        Some(evaluate_at(&session.tokens, session.cursor.current_time()))
    }

    /// Pure visual evaluation at an arbitrary time, without moving the
    /// cursor (scrub preview).
    pub fn replay_frame_at(&self, t: f64) -> Option<Vec<TokenSnapshot>> {
        let session = self.replay.as_ref()?;
        Some(evaluate_at(&session.tokens, t))
    }

    /// Display entry for a sequence number, for timeline scrolling.
    pub fn display_for_sequence(&self, sequence: u64) -> Option<usize> {
        self.replay
            .as_ref()
            .and_then(|s| s.index.display_for_sequence(sequence))
    }
}
