//! Token derivation: pairing charge runs with their terminal events.
//!
//! One forward pass over the time-ordered replay buffer turns correlated
//! bursts of activity into flight tokens. A run of delta events opens and
//! feeds a charge; the first non-delta event with the same match key closes
//! it and sets the launch time. Non-delta events without an open charge
//! launch instantaneously.

use std::collections::HashMap;

use serde::Serialize;

use flarepath_events::decode::{self, DecodeConfig};

use crate::replay::ReplayBuffer;

/// One charge/launch unit on the animated timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightToken {
    /// Correlation key that grouped the burst.
    pub match_key: String,
    /// Relative time the first delta was seen (or the launch time for
    /// instantaneous tokens).
    pub charging_start: f64,
    /// Relative time the terminal event closed the charge. `None` while the
    /// charge never resolved within the snapshot.
    pub launch_time: Option<f64>,
    /// Lane among tokens launched at the same millisecond.
    pub stack_index: usize,
    pub primary_sequence: u64,
    pub latest_sequence: u64,
    pub action_type: String,
    pub subtype: Option<String>,
    /// Relative time of every delta event folded into the charge. The pure
    /// evaluator counts these to reproduce the incremental per-fragment
    /// charge exactly.
    pub fragment_times: Vec<f64>,
}

#[derive(Debug)]
struct OpenCharge {
    charging_start: f64,
    primary_sequence: u64,
    latest_sequence: u64,
    action_type: String,
    subtype: Option<String>,
    fragment_times: Vec<f64>,
}

fn lane_for(lanes: &mut HashMap<i64, usize>, time: f64) -> usize {
    let bucket = (time * 1000.0).round() as i64;
    let counter = lanes.entry(bucket).or_insert(0);
    let lane = *counter;
    *counter += 1;
    lane
}

/// Derive the token list from a replay buffer in one linear pass.
pub fn derive_tokens(buffer: &ReplayBuffer, config: &DecodeConfig) -> Vec<FlightToken> {
    let mut open: HashMap<String, OpenCharge> = HashMap::new();
    let mut tokens = Vec::new();
    let mut lanes: HashMap<i64, usize> = HashMap::new();

    for replay_event in buffer.events() {
        let event = &replay_event.event;
        let key = decode::match_key(event);

        if config.is_delta(event) {
            let charge = open.entry(key).or_insert_with(|| OpenCharge {
                charging_start: replay_event.relative_time,
                primary_sequence: event.sequence,
                latest_sequence: event.sequence,
                action_type: event.action_type.clone(),
                subtype: decode::display_subtype(event).map(str::to_string),
                fragment_times: Vec::new(),
            });
            charge.latest_sequence = event.sequence;
            charge.fragment_times.push(replay_event.relative_time);
            continue;
        }

        let launch = replay_event.relative_time;
        let lane = lane_for(&mut lanes, launch);
        match open.remove(&key) {
            Some(charge) => tokens.push(FlightToken {
                match_key: key,
                charging_start: charge.charging_start,
                launch_time: Some(launch),
                stack_index: lane,
                primary_sequence: charge.primary_sequence,
                latest_sequence: event.sequence,
                action_type: charge.action_type,
                subtype: charge.subtype,
                fragment_times: charge.fragment_times,
            }),
            None => tokens.push(FlightToken {
                match_key: key,
                charging_start: launch,
                launch_time: Some(launch),
                stack_index: lane,
                primary_sequence: event.sequence,
                latest_sequence: event.sequence,
                action_type: event.action_type.clone(),
                subtype: decode::display_subtype(event).map(str::to_string),
                fragment_times: Vec::new(),
            }),
        }
    }

    // Charges never closed within the snapshot become pending tokens,
    // stacked after all resolved tokens.
    let mut pending: Vec<(String, OpenCharge)> = open.into_iter().collect();
    pending.sort_by(|(_, a), (_, b)| {
        a.charging_start
            .total_cmp(&b.charging_start)
            .then(a.primary_sequence.cmp(&b.primary_sequence))
    });
    for (key, charge) in pending {
        let lane = lane_for(&mut lanes, charge.charging_start);
        tokens.push(FlightToken {
            match_key: key,
            charging_start: charge.charging_start,
            launch_time: None,
            stack_index: lane,
            primary_sequence: charge.primary_sequence,
            latest_sequence: charge.latest_sequence,
            action_type: charge.action_type,
            subtype: charge.subtype,
            fragment_times: charge.fragment_times,
        });
    }

    tokens
}
