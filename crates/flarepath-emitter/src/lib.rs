//! Flarepath Event Emitter
//!
//! Producer-side client: stamps agent actions with a sequence and wall-clock
//! timestamp and forwards them to the relay over WebSocket. The forwarder
//! runs as a background task with reconnection and exponential backoff; an
//! in-memory pending queue holds events across reconnects so none are lost
//! while the relay is unreachable.
//!
//! An emitter constructed without a URL is disabled: `emit` becomes a no-op,
//! so instrumented code does not need to branch on configuration.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::SinkExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, warn};
use url::Url;

use flarepath_events::AgentEvent;

/// Environment variable naming the relay WebSocket URL.
pub const RELAY_URL_ENV: &str = "FLAREPATH_WS";

const CHANNEL_CAPACITY: usize = 256;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Handle for emitting agent-execution events to the relay.
#[derive(Clone)]
pub struct EventEmitter {
    sender: Option<mpsc::Sender<AgentEvent>>,
    sequence: Arc<AtomicU64>,
}

/// An [`EventEmitter`] bound to one conversation.
#[derive(Clone)]
pub struct SessionEmitter {
    inner: EventEmitter,
    conversation_id: String,
}

impl EventEmitter {
    /// Build from the `FLAREPATH_WS` environment variable; disabled when it
    /// is unset or empty.
    pub fn from_env() -> Self {
        Self::new(std::env::var(RELAY_URL_ENV).ok())
    }

    /// Build an emitter for the given relay URL, or a disabled one on
    /// `None`.
    pub fn new(url: Option<String>) -> Self {
        let sender = url.and_then(Self::normalize_url).map(|url| {
            let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
            tokio::spawn(forwarder(url, rx));
            tx
        });
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Whether events will actually be forwarded.
    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    fn normalize_url(raw: String) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        let candidate = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("ws://{trimmed}")
        };

        match Url::parse(&candidate) {
            Ok(mut parsed) => {
                let has_role = parsed.query_pairs().any(|(key, _)| key == "role");
                if !has_role {
                    parsed.query_pairs_mut().append_pair("role", "producer");
                }
                Some(parsed.into())
            }
            Err(err) => {
                warn!("invalid relay websocket url '{candidate}': {err}; using it unvalidated");
                Some(candidate)
            }
        }
    }

    /// Stamp and enqueue one event. No-op when the emitter is disabled.
    pub async fn emit(
        &self,
        conversation_id: Option<String>,
        action_type: impl Into<String>,
        action: Value,
        state: Option<Value>,
    ) {
        let Some(tx) = &self.sender else {
            return;
        };
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0))
            .as_millis() as u64;
        let event = AgentEvent {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            timestamp_ms,
            action_type: action_type.into(),
            action,
            state,
            conversation_id,
        };
        if tx.send(event).await.is_err() {
            debug!("emitter channel dropped; disabling event stream");
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(None)
    }
}

impl SessionEmitter {
    pub fn new(inner: EventEmitter, conversation_id: impl Into<String>) -> Self {
        Self {
            inner,
            conversation_id: conversation_id.into(),
        }
    }

    pub async fn emit(&self, action_type: impl Into<String>, action: Value, state: Option<Value>) {
        self.inner
            .emit(
                Some(self.conversation_id.clone()),
                action_type,
                action,
                state,
            )
            .await;
    }
}

/// Background forwarder: drains the channel into the relay socket,
/// reconnecting with exponential backoff and requeueing the in-flight event
/// on any failure.
async fn forwarder(url: String, mut rx: mpsc::Receiver<AgentEvent>) {
    let mut pending = VecDeque::<AgentEvent>::new();
    let mut backoff = INITIAL_BACKOFF;
    let mut stream = None;

    loop {
        let next_event = if let Some(event) = pending.pop_front() {
            Some(event)
        } else {
            rx.recv().await
        };

        let Some(event) = next_event else {
            break;
        };

        let stream_ref = match stream.as_mut() {
            Some(existing) => existing,
            None => match connect_async(url.as_str()).await {
                Ok((ws, _)) => {
                    backoff = INITIAL_BACKOFF;
                    stream.insert(ws)
                }
                Err(err) => {
                    error!("failed to connect to relay websocket: {err:?}");
                    pending.push_front(event);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff.saturating_mul(2)).min(MAX_BACKOFF);
                    continue;
                }
            },
        };

        let serialized = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(err) => {
                error!("failed to serialize event: {err:?}");
                pending.push_front(event);
                continue;
            }
        };

        match stream_ref.send(Message::Text(serialized)).await {
            Ok(()) => {
                // Batch up anything that queued while sending.
                while let Ok(event) = rx.try_recv() {
                    pending.push_back(event);
                }
            }
            Err(err) => {
                error!("failed to send event to relay: {err:?}");
                pending.push_front(event);
                if let Some(mut ws) = stream.take() {
                    if let Err(close_err) = ws.close(None).await {
                        debug!("failed to close relay websocket cleanly: {close_err:?}");
                    }
                }
                tokio::time::sleep(backoff).await;
                backoff = (backoff.saturating_mul(2)).min(MAX_BACKOFF);
            }
        }
    }

    if let Some(mut ws) = stream {
        if let Err(err) = ws.close(None).await {
            debug!("failed to close relay websocket cleanly: {err:?}");
        }
    }
    debug!("emitter channel closed; stopping forwarder");
}
