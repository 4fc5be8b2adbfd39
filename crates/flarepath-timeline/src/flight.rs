//! The charge/launch flight engine.
//!
//! Two evaluators over the same token model:
//!
//! - [`LiveFlightEngine`]: incremental, mutates token state every tick and
//!   on every observed event (live mode).
//! - [`evaluate_at`]: a pure function of the precomputed token list and an
//!   absolute replay time (replay mode).
//!
//! Both must produce identical output at any instant. To make that hold
//! mechanically rather than by convention, the growth and travel math lives
//! in three shared functions ([`charge_amount`], [`charge_radius`],
//! [`travel_progress`]) parameterized by elapsed time, and both evaluators
//! call only those. Any change to the law or its constants applies to both.

use std::collections::HashMap;

use serde::Serialize;

use flarepath_events::decode::{self, DecodeConfig};
use flarepath_events::AgentEvent;

use crate::tokens::FlightToken;

/// Radius of a token that has accumulated no charge.
pub const BASE_RADIUS: f64 = 6.0;
/// Radius a token approaches asymptotically as charge grows.
pub const MAX_RADIUS: f64 = 22.0;
/// Exponential growth constant of the charge curve.
pub const GROWTH_RATE: f64 = 0.35;
/// Charge accumulated per second of elapsed time, absent new fragments.
pub const PASSIVE_CHARGE_RATE: f64 = 0.6;
/// Seconds a launched token takes to travel right edge to left edge.
pub const TRAVEL_DURATION: f64 = 4.0;
/// Travel progress beyond which a token is retired. Slightly past 1.0 so
/// the final launch visibly completes.
pub const TRAVEL_OVERSHOOT: f64 = 1.05;

/// Charge accumulated after `elapsed` seconds of charging with
/// `fragments_seen` delta events folded in (+1 each).
pub fn charge_amount(elapsed: f64, fragments_seen: usize) -> f64 {
    elapsed.max(0.0) * PASSIVE_CHARGE_RATE + fragments_seen as f64
}

/// Saturating growth law mapping charge to radius.
pub fn charge_radius(charge: f64) -> f64 {
    BASE_RADIUS + (MAX_RADIUS - BASE_RADIUS) * (1.0 - (-charge * GROWTH_RATE).exp())
}

/// Linear travel progress after `elapsed` seconds since launch.
pub fn travel_progress(elapsed: f64) -> f64 {
    elapsed / TRAVEL_DURATION
}

/// Lifecycle phase of a visible token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPhase {
    /// Still accumulating fragments at the right edge.
    Charging,
    /// Launched and traveling toward the left edge.
    Flying,
}

/// Renderable state of one token at one instant.
///
/// `x` runs from `1.0` (right edge, charging/launch point) linearly to
/// `0.0` (left edge); `lane` is the vertical stacking slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSnapshot {
    pub match_key: String,
    pub phase: TokenPhase,
    pub radius: f64,
    pub x: f64,
    pub lane: usize,
    pub primary_sequence: u64,
    pub latest_sequence: u64,
    pub action_type: String,
    pub subtype: Option<String>,
}

/// Pure evaluator: visible tokens at absolute replay time `timestamp`,
/// computed from the precomputed token list alone.
pub fn evaluate_at(tokens: &[FlightToken], timestamp: f64) -> Vec<TokenSnapshot> {
    let mut snapshots = Vec::new();

    // Charging tokens stack by charging-order rank among those currently
    // charging, not by their launch lane.
    let mut charging: Vec<&FlightToken> = tokens
        .iter()
        .filter(|token| {
            timestamp >= token.charging_start
                && token.launch_time.map_or(true, |launch| timestamp < launch)
        })
        .collect();
    charging.sort_by(|a, b| {
        a.charging_start
            .total_cmp(&b.charging_start)
            .then(a.primary_sequence.cmp(&b.primary_sequence))
    });
    for (rank, token) in charging.iter().enumerate() {
        let fragments = token
            .fragment_times
            .iter()
            .filter(|&&t| t <= timestamp)
            .count();
        let charge = charge_amount(timestamp - token.charging_start, fragments);
        snapshots.push(TokenSnapshot {
            match_key: token.match_key.clone(),
            phase: TokenPhase::Charging,
            radius: charge_radius(charge),
            x: 1.0,
            lane: rank,
            primary_sequence: token.primary_sequence,
            latest_sequence: token.latest_sequence,
            action_type: token.action_type.clone(),
            subtype: token.subtype.clone(),
        });
    }

    for token in tokens {
        let Some(launch) = token.launch_time else {
            continue;
        };
        if timestamp < launch {
            continue;
        }
        let progress = travel_progress(timestamp - launch);
        if progress > TRAVEL_OVERSHOOT {
            continue;
        }
        let charge = charge_amount(launch - token.charging_start, token.fragment_times.len());
        snapshots.push(TokenSnapshot {
            match_key: token.match_key.clone(),
            phase: TokenPhase::Flying,
            radius: charge_radius(charge),
            x: 1.0 - progress,
            lane: token.stack_index,
            primary_sequence: token.primary_sequence,
            latest_sequence: token.latest_sequence,
            action_type: token.action_type.clone(),
            subtype: token.subtype.clone(),
        });
    }

    snapshots.sort_by_key(|s| s.primary_sequence);
    snapshots
}

#[derive(Debug, Clone)]
struct LiveToken {
    match_key: String,
    charging_start: f64,
    charge: f64,
    launched_at: Option<f64>,
    lane: usize,
    primary_sequence: u64,
    latest_sequence: u64,
    action_type: String,
    subtype: Option<String>,
}

/// Incremental evaluator for live mode.
///
/// Driven by the render tick: [`LiveFlightEngine::tick`] advances passive
/// growth and travel, [`LiveFlightEngine::observe`] folds newly ingested
/// events at the current clock, and [`LiveFlightEngine::snapshot`] produces
/// the same output shape as [`evaluate_at`].
#[derive(Debug)]
pub struct LiveFlightEngine {
    config: DecodeConfig,
    clock: f64,
    charging: HashMap<String, LiveToken>,
    flying: Vec<LiveToken>,
    lanes: HashMap<i64, usize>,
}

impl Default for LiveFlightEngine {
    fn default() -> Self {
        Self::new(DecodeConfig::default())
    }
}

impl LiveFlightEngine {
    pub fn new(config: DecodeConfig) -> Self {
        Self {
            config,
            clock: 0.0,
            charging: HashMap::new(),
            flying: Vec::new(),
            lanes: HashMap::new(),
        }
    }

    /// Seconds of accumulated tick time.
    pub fn clock(&self) -> f64 {
        self.clock
    }

    /// Advance the engine clock: passive growth for charging tokens, travel
    /// for flying ones, retirement past the overshoot margin.
    pub fn tick(&mut self, dt: f64) {
        self.clock += dt;
        for token in self.charging.values_mut() {
            token.charge += dt * PASSIVE_CHARGE_RATE;
        }
        let clock = self.clock;
        self.flying.retain(|token| {
            token
                .launched_at
                .map_or(false, |launch| travel_progress(clock - launch) <= TRAVEL_OVERSHOOT)
        });
    }

    /// Fold one newly ingested event at the current clock.
    pub fn observe(&mut self, event: &AgentEvent) {
        let key = decode::match_key(event);
        let now = self.clock;

        if self.config.is_delta(event) {
            let token = self.charging.entry(key.clone()).or_insert_with(|| LiveToken {
                match_key: key,
                charging_start: now,
                charge: 0.0,
                launched_at: None,
                lane: 0,
                primary_sequence: event.sequence,
                latest_sequence: event.sequence,
                action_type: event.action_type.clone(),
                subtype: decode::display_subtype(event).map(str::to_string),
            });
            token.charge += 1.0;
            token.latest_sequence = event.sequence;
            return;
        }

        let bucket = (now * 1000.0).round() as i64;
        let counter = self.lanes.entry(bucket).or_insert(0);
        let lane = *counter;
        *counter += 1;

        match self.charging.remove(&key) {
            Some(mut token) => {
                token.launched_at = Some(now);
                token.lane = lane;
                token.latest_sequence = event.sequence;
                self.flying.push(token);
            }
            None => self.flying.push(LiveToken {
                match_key: key,
                charging_start: now,
                charge: 0.0,
                launched_at: Some(now),
                lane,
                primary_sequence: event.sequence,
                latest_sequence: event.sequence,
                action_type: event.action_type.clone(),
                subtype: decode::display_subtype(event).map(str::to_string),
            }),
        }
    }

    /// Renderable state of every visible token at the current clock.
    pub fn snapshot(&self) -> Vec<TokenSnapshot> {
        let mut snapshots = Vec::new();

        let mut charging: Vec<&LiveToken> = self.charging.values().collect();
        charging.sort_by(|a, b| {
            a.charging_start
                .total_cmp(&b.charging_start)
                .then(a.primary_sequence.cmp(&b.primary_sequence))
        });
        for (rank, token) in charging.iter().enumerate() {
            snapshots.push(TokenSnapshot {
                match_key: token.match_key.clone(),
                phase: TokenPhase::Charging,
                radius: charge_radius(token.charge),
                x: 1.0,
                lane: rank,
                primary_sequence: token.primary_sequence,
                latest_sequence: token.latest_sequence,
                action_type: token.action_type.clone(),
                subtype: token.subtype.clone(),
            });
        }

        for token in &self.flying {
            let Some(launch) = token.launched_at else {
                continue;
            };
            let progress = travel_progress(self.clock - launch);
            snapshots.push(TokenSnapshot {
                match_key: token.match_key.clone(),
                phase: TokenPhase::Flying,
                radius: charge_radius(token.charge),
                x: 1.0 - progress,
                lane: token.lane,
                primary_sequence: token.primary_sequence,
                latest_sequence: token.latest_sequence,
                action_type: token.action_type.clone(),
                subtype: token.subtype.clone(),
            });
        }

        snapshots.sort_by_key(|s| s.primary_sequence);
        snapshots
    }

    /// Discard all token state and restart the clock.
    pub fn reset(&mut self) {
        self.clock = 0.0;
        self.charging.clear();
        self.flying.clear();
        self.lanes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::ReplayBuffer;
    use crate::tokens::derive_tokens;
    use serde_json::json;

    const TOLERANCE: f64 = 1e-9;

    fn delta(sequence: u64, timestamp_ms: u64, id: &str) -> AgentEvent {
        AgentEvent {
            sequence,
            timestamp_ms,
            action_type: "protocol_event".to_string(),
            action: json!({"msg": {"type": "agent_message_delta", "id": id, "delta": "x"}}),
            state: None,
            conversation_id: None,
        }
    }

    fn terminal(sequence: u64, timestamp_ms: u64, id: &str) -> AgentEvent {
        AgentEvent {
            sequence,
            timestamp_ms,
            action_type: "protocol_event".to_string(),
            action: json!({"msg": {"type": "agent_message", "id": id}}),
            state: None,
            conversation_id: None,
        }
    }

    #[test]
    fn growth_law_saturates_at_max_radius() {
        assert!((charge_radius(0.0) - BASE_RADIUS).abs() < TOLERANCE);
        assert!(charge_radius(5.0) > charge_radius(1.0));
        assert!(charge_radius(1e6) <= MAX_RADIUS + TOLERANCE);
    }

    #[test]
    fn pure_evaluator_skips_unborn_and_retired_tokens() {
        let events = vec![delta(1, 1000, "a"), terminal(2, 2000, "a")];
        let buffer = ReplayBuffer::build(&events).unwrap();
        let tokens = derive_tokens(&buffer, &DecodeConfig::default());

        // Before the charge opens.
        assert!(evaluate_at(&tokens, -1.0).is_empty());
        // Charging.
        let charging = evaluate_at(&tokens, 0.5);
        assert_eq!(charging.len(), 1);
        assert_eq!(charging[0].phase, TokenPhase::Charging);
        // Flying.
        let flying = evaluate_at(&tokens, 1.0 + TRAVEL_DURATION / 2.0);
        assert_eq!(flying.len(), 1);
        assert_eq!(flying[0].phase, TokenPhase::Flying);
        assert!((flying[0].x - 0.5).abs() < TOLERANCE);
        // Retired past the overshoot margin.
        let gone = evaluate_at(&tokens, 1.0 + TRAVEL_DURATION * 1.2);
        assert!(gone.is_empty());
    }

    #[test]
    fn flying_radius_is_frozen_at_launch() {
        let events = vec![
            delta(1, 1000, "a"),
            delta(2, 1500, "a"),
            terminal(3, 3000, "a"),
        ];
        let buffer = ReplayBuffer::build(&events).unwrap();
        let tokens = derive_tokens(&buffer, &DecodeConfig::default());

        let at_launch = evaluate_at(&tokens, 2.0);
        let mid_flight = evaluate_at(&tokens, 3.0);
        assert!((at_launch[0].radius - mid_flight[0].radius).abs() < TOLERANCE);
    }

    #[test]
    fn charging_lanes_rank_by_charging_order() {
        let events = vec![
            delta(1, 1000, "b"),
            delta(2, 1500, "a"),
            terminal(3, 9000, "none"),
        ];
        let buffer = ReplayBuffer::build(&events).unwrap();
        let tokens = derive_tokens(&buffer, &DecodeConfig::default());

        let snapshots = evaluate_at(&tokens, 1.0);
        let b = snapshots.iter().find(|s| s.match_key == "b").unwrap();
        let a = snapshots.iter().find(|s| s.match_key == "a").unwrap();
        assert_eq!(b.lane, 0);
        assert_eq!(a.lane, 1);
    }

    /// Drive the incremental engine tick-by-tick over a synthetic stream and
    /// compare against the closed-form evaluator at every checkpoint.
    #[test]
    fn live_and_replay_evaluators_agree() {
        let base = 10_000u64;
        let events = vec![
            delta(1, base, "a"),
            delta(2, base + 200, "a"),
            delta(3, base + 400, "a"),
            delta(4, base + 600, "b"),
            terminal(5, base + 1000, "a"),
            terminal(6, base + 1500, "c"),
        ];
        let buffer = ReplayBuffer::build(&events).unwrap();
        let tokens = derive_tokens(&buffer, &DecodeConfig::default());

        let mut engine = LiveFlightEngine::default();
        let dt = 0.05;
        let checkpoints = [0.5, 1.0, 1.5, 3.0, 4.9, 5.4];
        let mut next_event = 0;

        for step in 0..=120 {
            let now = step as f64 * dt;
            // Fold events whose relative time has arrived.
            while next_event < buffer.len()
                && buffer.events()[next_event].relative_time <= now + 1e-12
            {
                engine.observe(&buffer.events()[next_event].event);
                next_event += 1;
            }

            if checkpoints.iter().any(|c| (c - now).abs() < 1e-9) {
                let live = engine.snapshot();
                let pure = evaluate_at(&tokens, now);
                assert_eq!(live.len(), pure.len(), "token count diverged at t={now}");
                for (l, p) in live.iter().zip(&pure) {
                    assert_eq!(l.match_key, p.match_key, "order diverged at t={now}");
                    assert_eq!(l.phase, p.phase, "phase diverged at t={now}");
                    assert_eq!(l.lane, p.lane, "lane diverged at t={now}");
                    assert!(
                        (l.radius - p.radius).abs() < 1e-6,
                        "radius diverged at t={now}: {} vs {}",
                        l.radius,
                        p.radius
                    );
                    assert!(
                        (l.x - p.x).abs() < 1e-6,
                        "x diverged at t={now}: {} vs {}",
                        l.x,
                        p.x
                    );
                }
            }

            engine.tick(dt);
        }
    }

    #[test]
    fn reset_discards_all_state() {
        let mut engine = LiveFlightEngine::default();
        engine.observe(&delta(1, 1000, "a"));
        engine.tick(0.5);
        assert_eq!(engine.snapshot().len(), 1);

        engine.reset();
        assert!(engine.snapshot().is_empty());
        assert_eq!(engine.clock(), 0.0);
    }
}
