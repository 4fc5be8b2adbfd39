//! Flarepath Event Model
//!
//! Agent-execution events as delivered by producers, plus the two leaf
//! structures everything else is built on:
//!
//! - [`AgentEvent`]: immutable wire record with a strictly increasing
//!   `sequence` that defines the only trusted order (arrival order is not).
//! - [`EventLog`]: append-only, bounded, in-memory sequence of received
//!   events. Truncation at the bound is reported to the caller because it
//!   invalidates any incrementally derived state.
//!
//! Payload inspection lives in [`decode`]: a small tagged-shape decoder that
//! extracts display subtype, delta fragments, and correlation keys from the
//! opaque `action` payload, with an explicit "unrecognized shape" fallback.

mod event;
mod log;

pub mod decode;

pub use event::AgentEvent;
pub use log::{EventLog, PushOutcome, DEFAULT_MAX_EVENTS};
