//! Event record — the append-only log every consumer replays.
//!
//! Reducer events are numbered "ev_NNNNNN" from the battle state's
//! pre-incremented `event_sequence`. Orchestrator events use distinct
//! prefixes ("ev_mission_", "ev_policy_", "ev_obj_", "ev_done_", "ev_pack_",
//! "ev_error_") with a shared zero-padded step counter. Prefix choices are
//! load-bearing: they influence canonical-JSON ordering and therefore the
//! replay hash.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::UnitId;

/// A single log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub round: u32,
    /// Whichever unit the turn index pointed at when the event was emitted.
    pub active_unit: UnitId,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Map<String, Value>,
}

impl Event {
    /// Reducer event id from a pre-incremented sequence number.
    pub fn sequence_id(sequence: u64) -> String {
        format!("ev_{sequence:06}")
    }

    /// Orchestrator event id: prefix + zero-padded step counter.
    pub fn step_id(prefix: &str, step: u32) -> String {
        format!("{prefix}{step:04}")
    }
}
