//! The scenario result surface handed to consumers.
//!
//! The outer record uses camelCase wire names; the final-state snapshot
//! keeps the engine's snake_case keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use sk_types::event::Event;
use sk_types::ids::{PackId, UnitId};
use sk_types::state::{BattleState, Unit};

/// Why the orchestrator stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    ScriptExhausted,
    MaxSteps,
    BattleEnd,
    CommandError,
}

/// Condensed end-of-run state snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalState {
    pub battle_id: String,
    pub round: u32,
    pub active_unit: UnitId,
    pub units: BTreeMap<UnitId, Unit>,
    pub flags: BTreeMap<String, bool>,
}

impl FinalState {
    pub fn from_state(state: &BattleState) -> Self {
        Self {
            battle_id: state.battle_id.clone(),
            round: state.round_number,
            active_unit: state.active_unit_id().clone(),
            units: state.units.clone(),
            flags: state.flags.clone(),
        }
    }
}

/// Echo of the resolved content pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPackContext {
    pub pack_id: PackId,
    pub version: String,
    pub feature_tags: Vec<String>,
    pub entry_count: u32,
}

/// Everything a caller learns from a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioResult {
    pub battle_id: String,
    pub seed: u32,
    pub engine_phase: u32,
    pub executed_commands: u32,
    pub auto_executed_commands: u32,
    pub stop_reason: StopReason,
    pub event_count: u32,
    /// 64 lowercase hex chars.
    pub replay_hash: String,
    pub final_state: FinalState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_pack_context: Option<ContentPackContext>,
    pub events: Vec<Event>,
}
