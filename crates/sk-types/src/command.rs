//! Command types — discriminated union for everything the reducer can apply.
//!
//! Serialized with `"type"` as the tag field and snake_case tags, matching
//! the scenario wire format. Optional fields are real `Option`s: a required
//! field that is absent is rejected by the scenario validator, never encoded
//! as a sentinel empty string.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{EntryId, UnitId};
use crate::state::{EffectKind, TickTiming, Unit};

/// Save selector. Accepts the capitalized wire spellings as aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveType {
    #[serde(alias = "Fortitude")]
    Fortitude,
    #[serde(alias = "Reflex")]
    Reflex,
    #[serde(alias = "Will")]
    Will,
}

/// How a save gates damage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveMode {
    /// Four-degree multiplier curve (0 / ½ / 1 / 2).
    #[default]
    Basic,
    /// Full damage on failure or critical failure, none otherwise.
    Negates,
    /// Full damage regardless of degree.
    Standard,
}

/// Where a spawned unit lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementPolicy {
    #[default]
    Exact,
    NearestOpen,
}

/// How a hazard routine rewrites its configured target before selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetPolicy {
    #[default]
    AsConfigured,
    Explicit,
    NearestEnemy,
    NearestEnemyAreaCenter,
    AllEnemies,
}

/// Materialized content-entry intent, attached by the orchestrator when a
/// command carries a `content_entry_id`. Tags are always copied from the
/// entry; `uses_per_day` is carried for downstream bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentEntryIntent {
    pub entry_id: EntryId,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses_per_day: Option<u32>,
}

fn default_true() -> bool {
    true
}

fn cost_one() -> i32 {
    1
}

fn cost_two() -> i32 {
    2
}

fn default_source_type() -> String {
    "trigger_action".to_string()
}

/// All commands as a discriminated union. The reducer's dispatch covers
/// every variant exhaustively; adding a variant without a handler is a
/// compile-time error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Move {
        actor: UnitId,
        x: i32,
        y: i32,
    },

    Strike {
        actor: UnitId,
        target: UnitId,
        #[serde(default)]
        emit_forecast: bool,
    },

    EndTurn {
        actor: UnitId,
    },

    CastSpell {
        actor: UnitId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        spell_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<UnitId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dc: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        save_type: Option<SaveType>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        damage: Option<String>,
        #[serde(default = "cost_two")]
        action_cost: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        damage_type: Option<String>,
        #[serde(default)]
        damage_bypass: Vec<String>,
        #[serde(default)]
        mode: SaveMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_entry_id: Option<EntryId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_entry: Option<ContentEntryIntent>,
    },

    SaveDamage {
        actor: UnitId,
        target: UnitId,
        dc: i32,
        save_type: SaveType,
        damage: String,
        #[serde(default)]
        mode: SaveMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        damage_type: Option<String>,
        #[serde(default)]
        damage_bypass: Vec<String>,
    },

    AreaSaveDamage {
        actor: UnitId,
        center_x: i32,
        center_y: i32,
        radius_feet: i32,
        #[serde(default)]
        include_actor: bool,
        save_type: SaveType,
        dc: i32,
        damage: String,
        #[serde(default)]
        mode: SaveMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        damage_type: Option<String>,
        #[serde(default)]
        damage_bypass: Vec<String>,
    },

    ApplyEffect {
        actor: UnitId,
        target: UnitId,
        effect_kind: EffectKind,
        #[serde(default)]
        payload: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_rounds: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tick_timing: Option<TickTiming>,
    },

    UseFeat {
        actor: UnitId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feat_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<UnitId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        effect_kind: Option<EffectKind>,
        #[serde(default)]
        payload: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_rounds: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tick_timing: Option<TickTiming>,
        #[serde(default = "cost_one")]
        action_cost: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_entry_id: Option<EntryId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_entry: Option<ContentEntryIntent>,
    },

    UseItem {
        actor: UnitId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<UnitId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        effect_kind: Option<EffectKind>,
        #[serde(default)]
        payload: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_rounds: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tick_timing: Option<TickTiming>,
        #[serde(default = "cost_one")]
        action_cost: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_entry_id: Option<EntryId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_entry: Option<ContentEntryIntent>,
    },

    Interact {
        actor: UnitId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interact_id: Option<String>,
        /// Defaults to the actor.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<UnitId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        effect_kind: Option<EffectKind>,
        #[serde(default)]
        payload: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_rounds: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tick_timing: Option<TickTiming>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        flag: Option<String>,
        #[serde(default = "default_true")]
        value: bool,
        #[serde(default = "cost_one")]
        action_cost: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_entry_id: Option<EntryId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_entry: Option<ContentEntryIntent>,
    },

    SetFlag {
        /// Flag writes are allowed from mission blocks, so no active-actor
        /// precondition applies; the actor is recorded when present.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        actor: Option<UnitId>,
        flag: String,
        #[serde(default = "default_true")]
        value: bool,
    },

    SpawnUnit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        actor: Option<UnitId>,
        unit: Unit,
        #[serde(default)]
        placement_policy: PlacementPolicy,
        #[serde(default)]
        spend_action: bool,
    },

    TriggerHazardSource {
        actor: UnitId,
        hazard_id: String,
        source_name: String,
        #[serde(default = "default_source_type")]
        source_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        center_x: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        center_y: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<UnitId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model_path: Option<String>,
    },

    RunHazardRoutine {
        actor: UnitId,
        hazard_id: String,
        source_name: String,
        #[serde(default = "default_source_type")]
        source_type: String,
        #[serde(default)]
        target_policy: TargetPolicy,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        center_x: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        center_y: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<UnitId>,
    },
}

impl Command {
    /// The wire tag of this command.
    pub fn type_name(&self) -> &'static str {
        match self {
            Command::Move { .. } => "move",
            Command::Strike { .. } => "strike",
            Command::EndTurn { .. } => "end_turn",
            Command::CastSpell { .. } => "cast_spell",
            Command::SaveDamage { .. } => "save_damage",
            Command::AreaSaveDamage { .. } => "area_save_damage",
            Command::ApplyEffect { .. } => "apply_effect",
            Command::UseFeat { .. } => "use_feat",
            Command::UseItem { .. } => "use_item",
            Command::Interact { .. } => "interact",
            Command::SetFlag { .. } => "set_flag",
            Command::SpawnUnit { .. } => "spawn_unit",
            Command::TriggerHazardSource { .. } => "trigger_hazard_source",
            Command::RunHazardRoutine { .. } => "run_hazard_routine",
        }
    }

    /// The acting unit, when the variant names one.
    pub fn actor(&self) -> Option<&UnitId> {
        match self {
            Command::Move { actor, .. }
            | Command::Strike { actor, .. }
            | Command::EndTurn { actor }
            | Command::CastSpell { actor, .. }
            | Command::SaveDamage { actor, .. }
            | Command::AreaSaveDamage { actor, .. }
            | Command::ApplyEffect { actor, .. }
            | Command::UseFeat { actor, .. }
            | Command::UseItem { actor, .. }
            | Command::Interact { actor, .. }
            | Command::TriggerHazardSource { actor, .. }
            | Command::RunHazardRoutine { actor, .. } => Some(actor),
            Command::SetFlag { actor, .. } | Command::SpawnUnit { actor, .. } => actor.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_round_trips() {
        let json = r#"{"type":"move","actor":"pc","x":2,"y":1}"#;
        let cmd: Command = serde_json::from_str(json).unwrap();
        assert!(matches!(cmd, Command::Move { x: 2, y: 1, .. }));
        assert_eq!(cmd.type_name(), "move");
    }

    #[test]
    fn cast_spell_defaults() {
        let cmd: Command = serde_json::from_value(serde_json::json!({
            "type": "cast_spell",
            "actor": "caster",
            "target": "t1",
            "dc": 22,
            "save_type": "Reflex",
            "damage": "6d6"
        }))
        .unwrap();
        match cmd {
            Command::CastSpell {
                action_cost,
                mode,
                save_type,
                ..
            } => {
                assert_eq!(action_cost, 2);
                assert_eq!(mode, SaveMode::Basic);
                assert_eq!(save_type, Some(SaveType::Reflex));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn save_type_accepts_both_spellings() {
        let a: SaveType = serde_json::from_str("\"Fortitude\"").unwrap();
        let b: SaveType = serde_json::from_str("\"fortitude\"").unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"fortitude\"");
    }

    #[test]
    fn set_flag_without_actor() {
        let cmd: Command =
            serde_json::from_value(serde_json::json!({"type": "set_flag", "flag": "gate_open"}))
                .unwrap();
        match cmd {
            Command::SetFlag { actor, flag, value } => {
                assert!(actor.is_none());
                assert_eq!(flag, "gate_open");
                assert!(value);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn hazard_source_type_defaults() {
        let cmd: Command = serde_json::from_value(serde_json::json!({
            "type": "trigger_hazard_source",
            "actor": "haz",
            "hazard_id": "h1",
            "source_name": "s1"
        }))
        .unwrap();
        match cmd {
            Command::TriggerHazardSource { source_type, .. } => {
                assert_eq!(source_type, "trigger_action");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }
}
