//! Battle state structures — Unit, BattleMap, Effect, BattleState.
//!
//! State is plain data: every mutation happens in `sk-engine`. Collections
//! are BTreeMaps keyed by ids so iteration order is deterministic; effect
//! ids are zero-padded ordinals, which makes map order equal insertion
//! order.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::grid::TilePos;
use crate::ids::{EffectId, UnitId};

// =============================================================================
// Unit
// =============================================================================

/// A combatant on the grid.
///
/// Invariants (enforced by the reducer): `hp >= 0`; `hp == 0` implies the
/// "unconscious" condition is present; `temp_hp >= 0`; `temp_hp > 0` implies
/// `temp_hp_source` is set; stored condition values are always >= 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub team: String,
    pub hp: i32,
    pub max_hp: i32,
    pub position: TilePos,
    pub initiative: i32,
    pub attack_mod: i32,
    pub ac: i32,
    /// Damage formula string, e.g. "1d8+2".
    pub damage: String,
    #[serde(default)]
    pub temp_hp: i32,
    #[serde(default)]
    pub temp_hp_source: Option<String>,
    /// Effect that owns the temp-HP pool, if any. Owned temp HP is released
    /// when that effect expires.
    #[serde(default)]
    pub temp_hp_owner_effect: Option<EffectId>,
    #[serde(default = "default_damage_type")]
    pub attack_damage_type: String,
    #[serde(default)]
    pub attack_damage_bypass: Vec<String>,
    #[serde(default)]
    pub fortitude: i32,
    #[serde(default)]
    pub reflex: i32,
    #[serde(default)]
    pub will: i32,
    #[serde(default = "default_actions")]
    pub actions_remaining: u8,
    #[serde(default = "default_true")]
    pub reaction_available: bool,
    /// Condition name -> intensity (>= 1). Absence means not afflicted.
    #[serde(default)]
    pub conditions: BTreeMap<String, u32>,
    /// May contain the "all_conditions" sentinel.
    #[serde(default)]
    pub condition_immunities: Vec<String>,
    #[serde(default)]
    pub resistances: BTreeMap<String, i32>,
    #[serde(default)]
    pub weaknesses: BTreeMap<String, i32>,
    /// May contain the "all" sentinel.
    #[serde(default)]
    pub immunities: Vec<String>,
    #[serde(default = "default_reach")]
    pub reach: i32,
    #[serde(default = "default_speed")]
    pub speed: i32,
}

fn default_damage_type() -> String {
    "physical".to_string()
}

fn default_actions() -> u8 {
    3
}

fn default_true() -> bool {
    true
}

fn default_reach() -> i32 {
    1
}

fn default_speed() -> i32 {
    5
}

impl Unit {
    pub fn alive(&self) -> bool {
        self.hp > 0
    }
}

// =============================================================================
// Map
// =============================================================================

/// The battle grid: bounds, blocked tiles, optional per-tile movement cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleMap {
    pub width: i32,
    pub height: i32,
    #[serde(default)]
    pub blocked: BTreeSet<TilePos>,
    /// Movement cost per tile; tiles absent from the map cost 1.
    #[serde(default)]
    pub movement_cost: BTreeMap<TilePos, u32>,
}

impl BattleMap {
    pub fn in_bounds(&self, pos: TilePos) -> bool {
        pos.x >= 0 && pos.x < self.width && pos.y >= 0 && pos.y < self.height
    }

    pub fn is_blocked(&self, pos: TilePos) -> bool {
        self.blocked.contains(&pos)
    }

    pub fn movement_cost(&self, pos: TilePos) -> u32 {
        self.movement_cost.get(&pos).copied().unwrap_or(1)
    }
}

// =============================================================================
// Effects
// =============================================================================

/// Discriminator for durable effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Condition,
    TempHp,
    PersistentDamage,
    Affliction,
    Summon,
}

/// When an effect ticks relative to its target's turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickTiming {
    TurnStart,
    TurnEnd,
}

/// A durable effect stored in the battle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    pub id: EffectId,
    pub kind: EffectKind,
    pub source: Option<UnitId>,
    pub target: Option<UnitId>,
    /// Kind-specific data. The affliction machine schema-types this map;
    /// other kinds read individual keys and leave the rest opaque.
    #[serde(default)]
    pub payload: Map<String, Value>,
    /// None = lasts until cleared.
    pub duration_rounds: Option<i32>,
    pub tick_timing: Option<TickTiming>,
}

// =============================================================================
// BattleState
// =============================================================================

/// The complete battle state the reducer operates on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleState {
    pub battle_id: String,
    pub seed: u32,
    pub round_number: u32,
    pub turn_index: usize,
    pub turn_order: Vec<UnitId>,
    pub units: BTreeMap<UnitId, Unit>,
    pub battle_map: BattleMap,
    pub effects: BTreeMap<EffectId, Effect>,
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
    /// Pre-incremented before every reducer-emitted event.
    pub event_sequence: u64,
    /// Pre-incremented before every effect instantiation.
    #[serde(default)]
    pub effect_sequence: u32,
}

impl BattleState {
    /// The id of whichever unit the turn index points at.
    pub fn active_unit_id(&self) -> &UnitId {
        &self.turn_order[self.turn_index]
    }

    pub fn unit(&self, id: &UnitId) -> Option<&Unit> {
        self.units.get(id)
    }

    pub fn unit_mut(&mut self, id: &UnitId) -> Option<&mut Unit> {
        self.units.get_mut(id)
    }

    /// A tile is occupied when a living unit stands on it.
    pub fn is_occupied(&self, pos: TilePos) -> bool {
        self.units.values().any(|u| u.alive() && u.position == pos)
    }

    /// In-bounds, unblocked, and unoccupied.
    pub fn is_passable(&self, pos: TilePos) -> bool {
        self.battle_map.in_bounds(pos)
            && !self.battle_map.is_blocked(pos)
            && !self.is_occupied(pos)
    }

    /// Allocate the next effect id ("eff_0001", "eff_0002", ...).
    pub fn next_effect_id(&mut self) -> EffectId {
        self.effect_sequence += 1;
        EffectId::from(format!("eff_{:04}", self.effect_sequence))
    }
}
