//! Flarepath Visualizer Service
//!
//! Canonical state plus the relay surface:
//!
//! - **Store**: single mutable owner of the event log, display entries, and
//!   replay state; notifies subscribers on change.
//! - **Server**: axum WebSocket relay (producers in, viewers out with
//!   backlog replay) and a REST API for replay control.
//!
//! # Usage
//!
//! ```ignore
//! let store = VisualizerStore::new();
//! let server = VisServer::new(store);
//! server.serve(3000).await?;
//! ```

mod server;
mod store;

pub use server::VisServer;
pub use store::{
    ReplayStatus, ReplayStatusView, SeekResult, StoreMode, StoreUpdate, VisualizerStore,
    MAX_SPEED, MIN_SPEED,
};
