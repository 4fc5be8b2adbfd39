//! Flarepath Timeline Core
//!
//! The aggregation and replay engine behind the agent-execution visualizer:
//!
//! - **Aggregation** ([`aggregate`]): folds correlated delta events into
//!   coherent display rows, in strict sequence order.
//! - **Replay** ([`replay`], [`cursor`]): snapshot of the event log with
//!   relative timestamps, plus a cursor that seeks forward incrementally and
//!   backward with full-reset semantics.
//! - **Flight engine** ([`tokens`], [`flight`]): the charge/launch token
//!   model with two evaluators that must agree exactly: an incremental one
//!   driven tick-by-tick in live mode, and a pure function of absolute time
//!   in replay mode. Both call the same growth/travel law.
//!
//! Everything here is synchronous and single-owner; callers present events in
//! ascending `sequence` order (full rebuilds re-sort internally).

mod aggregate;
mod cursor;
mod error;
mod flight;
mod replay;
mod tokens;

pub use aggregate::{AggregatedDelta, Aggregator, DisplayEntry, DisplayEntryKind};
pub use cursor::{ReplayCursor, SeekOutcome, SEEK_EPSILON};
pub use error::{Result, TimelineError};
pub use flight::{
    charge_amount, charge_radius, evaluate_at, travel_progress, LiveFlightEngine, TokenPhase,
    TokenSnapshot, BASE_RADIUS, GROWTH_RATE, MAX_RADIUS, PASSIVE_CHARGE_RATE, TRAVEL_DURATION,
    TRAVEL_OVERSHOOT,
};
pub use replay::{DisplayIndex, ReplayBuffer, ReplayEvent};
pub use tokens::{derive_tokens, FlightToken};
