//! Scenario schema and strict validation.
//!
//! Every top-level block deserializes with `deny_unknown_fields`; commands
//! arrive as raw JSON (they are re-shaped during content materialization)
//! and are checked against a per-variant key allowlist plus a full parse.
//! Validation rejects the whole document with a specific message; no
//! partial load is exposed.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use sk_types::command::{Command, PlacementPolicy, TargetPolicy};
use sk_types::grid::TilePos;
use sk_types::state::Unit;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScenarioError {
    #[error("scenario JSON is malformed: {0}")]
    Malformed(String),
    #[error("battle_id must be a non-empty string")]
    EmptyBattleId,
    #[error("map dimensions must be positive (got {width}x{height})")]
    BadMapDimensions { width: i32, height: i32 },
    #[error("units must be non-empty")]
    NoUnits,
    #[error("duplicate unit id {0}")]
    DuplicateUnitId(String),
    #[error("unit {unit}: {message}")]
    BadUnit { unit: String, message: String },
    #[error("unit {unit}: spawn tile ({x},{y}) {reason}")]
    BadSpawnTile {
        unit: String,
        x: i32,
        y: i32,
        reason: &'static str,
    },
    #[error("commands[{index}]: {message}")]
    BadCommand { index: usize, message: String },
    #[error("objectives[{index}]: {message}")]
    BadObjective { index: usize, message: String },
    #[error("objective_packs[{index}]: {message}")]
    BadObjectivePack { index: usize, message: String },
    #[error("mission_events[{index}] ({id}): {message}")]
    BadMissionEvent {
        index: usize,
        id: String,
        message: String,
    },
    #[error("hazard_routines[{index}] ({id}): {message}")]
    BadHazardRoutine {
        index: usize,
        id: String,
        message: String,
    },
    #[error("reinforcement_waves[{index}]: {message}")]
    BadReinforcementWave { index: usize, message: String },
    #[error("engine_phase must be >= 1")]
    BadEnginePhase,
    #[error("content_pack_id is required when multiple content packs are listed")]
    ContentPackIdRequired,
    #[error("content error: {0}")]
    Content(String),
    #[error("map source: {0}")]
    MapSource(String),
}

// =============================================================================
// Documents
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MapDoc {
    pub width: i32,
    pub height: i32,
    #[serde(default)]
    pub blocked: Vec<(i32, i32)>,
    /// Optional per-tile movement cost, keyed "x,y".
    #[serde(default)]
    pub movement_cost: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitDoc {
    pub id: String,
    pub team: String,
    pub hp: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_hp: Option<i32>,
    pub position: (i32, i32),
    pub initiative: i32,
    pub attack_mod: i32,
    pub ac: i32,
    pub damage: String,
    #[serde(default)]
    pub temp_hp: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_hp_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attack_damage_type: Option<String>,
    #[serde(default)]
    pub attack_damage_bypass: Vec<String>,
    #[serde(default)]
    pub fortitude: i32,
    #[serde(default)]
    pub reflex: i32,
    #[serde(default)]
    pub will: i32,
    #[serde(default)]
    pub resistances: BTreeMap<String, i32>,
    #[serde(default)]
    pub weaknesses: BTreeMap<String, i32>,
    #[serde(default)]
    pub immunities: Vec<String>,
    #[serde(default)]
    pub condition_immunities: Vec<String>,
    #[serde(default)]
    pub conditions: BTreeMap<String, u32>,
    #[serde(default = "default_reach")]
    pub reach: i32,
    #[serde(default = "default_speed")]
    pub speed: i32,
}

fn default_reach() -> i32 {
    1
}

fn default_speed() -> i32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_one() -> u32 {
    1
}

fn default_source_type() -> String {
    "trigger_action".to_string()
}

impl UnitDoc {
    /// Build the runtime unit with a fresh action pool.
    pub fn to_unit(&self) -> Unit {
        Unit {
            id: self.id.as_str().into(),
            team: self.team.clone(),
            hp: self.hp,
            max_hp: self.max_hp.unwrap_or(self.hp),
            position: TilePos::new(self.position.0, self.position.1),
            initiative: self.initiative,
            attack_mod: self.attack_mod,
            ac: self.ac,
            damage: self.damage.clone(),
            temp_hp: self.temp_hp,
            temp_hp_source: self.temp_hp_source.clone().or_else(|| {
                (self.temp_hp > 0).then(|| "scenario".to_string())
            }),
            temp_hp_owner_effect: None,
            attack_damage_type: self
                .attack_damage_type
                .clone()
                .unwrap_or_else(|| "physical".to_string()),
            attack_damage_bypass: self.attack_damage_bypass.clone(),
            fortitude: self.fortitude,
            reflex: self.reflex,
            will: self.will,
            actions_remaining: 3,
            reaction_available: true,
            conditions: self.conditions.clone(),
            condition_immunities: self.condition_immunities.clone(),
            resistances: self.resistances.clone(),
            weaknesses: self.weaknesses.clone(),
            immunities: self.immunities.clone(),
            reach: self.reach,
            speed: self.speed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveKind {
    TeamEliminated,
    UnitReachTile,
    FlagSet,
    RoundAtLeast,
    UnitDead,
    UnitAlive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveResult {
    #[default]
    Victory,
    Defeat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectiveDoc {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ObjectiveKind,
    #[serde(default)]
    pub result: ObjectiveResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectivePackKind {
    EliminateTeam,
    EscapeUnit,
    Holdout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectivePackDoc {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ObjectivePackKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protect_team: Option<String>,
    #[serde(default = "default_true")]
    pub defeat_on_death: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    #[default]
    StrikeNearest,
    CastSpellEntryNearest,
    UseFeatEntrySelf,
    UseItemEntrySelf,
    InteractEntrySelf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnemyPolicyDoc {
    pub enabled: bool,
    #[serde(default)]
    pub teams: Vec<String>,
    #[serde(default)]
    pub action: PolicyAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_entry_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dc: Option<i32>,
    #[serde(default)]
    pub include_rationale: bool,
    #[serde(default = "default_true")]
    pub auto_end_turn: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    TurnStart,
    RoundStart,
    UnitDead,
    UnitAlive,
    FlagSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MissionEventDoc {
    pub id: String,
    pub trigger: TriggerKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_round: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_round: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_flag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_flag: Option<String>,
    #[serde(default)]
    pub once: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_flag: Option<String>,
    #[serde(default = "default_true")]
    pub if_flag_value: bool,
    #[serde(default)]
    pub commands: Vec<Value>,
    #[serde(default)]
    pub then_commands: Vec<Value>,
    #[serde(default)]
    pub else_commands: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReinforcementWaveDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub round: u32,
    pub units: Vec<UnitDoc>,
    #[serde(default = "nearest_open")]
    pub placement_policy: PlacementPolicy,
}

fn nearest_open() -> PlacementPolicy {
    PlacementPolicy::NearestOpen
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HazardRoutineDoc {
    pub id: String,
    pub unit_id: String,
    pub hazard_id: String,
    pub source_name: String,
    #[serde(default = "default_source_type")]
    pub source_type: String,
    #[serde(default)]
    pub target_policy: TargetPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center_x: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center_y: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default = "default_one")]
    pub start_round: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_round: Option<u32>,
    #[serde(default = "default_one")]
    pub cadence_rounds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_triggers: Option<u32>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_flag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_flag: Option<String>,
    #[serde(default)]
    pub auto_end_turn: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioDoc {
    pub battle_id: String,
    pub seed: u32,
    pub map: MapDoc,
    pub units: Vec<UnitDoc>,
    #[serde(default)]
    pub commands: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_phase: Option<u32>,
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
    #[serde(default)]
    pub objectives: Vec<ObjectiveDoc>,
    #[serde(default)]
    pub objective_packs: Vec<ObjectivePackDoc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enemy_policy: Option<EnemyPolicyDoc>,
    #[serde(default)]
    pub mission_events: Vec<MissionEventDoc>,
    #[serde(default)]
    pub reinforcement_waves: Vec<ReinforcementWaveDoc>,
    #[serde(default)]
    pub hazard_routines: Vec<HazardRoutineDoc>,
    #[serde(default)]
    pub content_packs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_pack_id: Option<String>,
    #[serde(default)]
    pub required_content_features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u32>,
}

// =============================================================================
// Validation
// =============================================================================

/// Parse and validate a scenario from raw JSON text.
pub fn validate_scenario(text: &str) -> Result<ScenarioDoc, ScenarioError> {
    let doc: ScenarioDoc =
        serde_json::from_str(text).map_err(|e| ScenarioError::Malformed(e.to_string()))?;
    validate_doc(&doc)?;
    Ok(doc)
}

/// Whole-document semantic validation.
pub fn validate_doc(doc: &ScenarioDoc) -> Result<(), ScenarioError> {
    if doc.battle_id.is_empty() {
        return Err(ScenarioError::EmptyBattleId);
    }
    if doc.map.width <= 0 || doc.map.height <= 0 {
        return Err(ScenarioError::BadMapDimensions {
            width: doc.map.width,
            height: doc.map.height,
        });
    }
    if let Some(phase) = doc.engine_phase {
        if phase < 1 {
            return Err(ScenarioError::BadEnginePhase);
        }
    }
    if doc.units.is_empty() {
        return Err(ScenarioError::NoUnits);
    }

    let blocked: BTreeSet<(i32, i32)> = doc.map.blocked.iter().copied().collect();
    let mut seen_ids = BTreeSet::new();
    let mut seen_tiles = BTreeSet::new();
    for unit in &doc.units {
        validate_unit(unit)?;
        if !seen_ids.insert(unit.id.clone()) {
            return Err(ScenarioError::DuplicateUnitId(unit.id.clone()));
        }
        let (x, y) = unit.position;
        let in_bounds = x >= 0 && x < doc.map.width && y >= 0 && y < doc.map.height;
        if !in_bounds {
            return Err(ScenarioError::BadSpawnTile {
                unit: unit.id.clone(),
                x,
                y,
                reason: "is out of bounds",
            });
        }
        if blocked.contains(&(x, y)) {
            return Err(ScenarioError::BadSpawnTile {
                unit: unit.id.clone(),
                x,
                y,
                reason: "is blocked",
            });
        }
        if !seen_tiles.insert((x, y)) {
            return Err(ScenarioError::BadSpawnTile {
                unit: unit.id.clone(),
                x,
                y,
                reason: "is already occupied",
            });
        }
    }

    for (index, command) in doc.commands.iter().enumerate() {
        validate_command(command)
            .map_err(|message| ScenarioError::BadCommand { index, message })?;
    }

    for (index, objective) in doc.objectives.iter().enumerate() {
        validate_objective(objective)
            .map_err(|message| ScenarioError::BadObjective { index, message })?;
    }

    for (index, pack) in doc.objective_packs.iter().enumerate() {
        validate_objective_pack(pack)
            .map_err(|message| ScenarioError::BadObjectivePack { index, message })?;
    }

    for (index, mission) in doc.mission_events.iter().enumerate() {
        validate_mission_event(mission).map_err(|message| ScenarioError::BadMissionEvent {
            index,
            id: mission.id.clone(),
            message,
        })?;
    }

    for (index, wave) in doc.reinforcement_waves.iter().enumerate() {
        if wave.round < 1 {
            return Err(ScenarioError::BadReinforcementWave {
                index,
                message: "round must be >= 1".to_string(),
            });
        }
        if wave.units.is_empty() {
            return Err(ScenarioError::BadReinforcementWave {
                index,
                message: "units must be non-empty".to_string(),
            });
        }
        for unit in &wave.units {
            validate_unit(unit).map_err(|e| ScenarioError::BadReinforcementWave {
                index,
                message: e.to_string(),
            })?;
        }
    }

    for (index, routine) in doc.hazard_routines.iter().enumerate() {
        validate_hazard_routine(routine).map_err(|message| ScenarioError::BadHazardRoutine {
            index,
            id: routine.id.clone(),
            message,
        })?;
    }

    if doc.content_packs.len() > 1 && doc.content_pack_id.is_none() {
        return Err(ScenarioError::ContentPackIdRequired);
    }

    Ok(())
}

fn validate_unit(unit: &UnitDoc) -> Result<(), ScenarioError> {
    let bad = |message: &str| ScenarioError::BadUnit {
        unit: unit.id.clone(),
        message: message.to_string(),
    };
    if unit.id.is_empty() {
        return Err(bad("id must be non-empty"));
    }
    if unit.team.is_empty() {
        return Err(bad("team must be non-empty"));
    }
    if unit.hp <= 0 {
        return Err(bad("hp must be > 0"));
    }
    if let Some(max_hp) = unit.max_hp {
        if max_hp < unit.hp {
            return Err(bad("max_hp must be >= hp"));
        }
    }
    if unit.temp_hp < 0 {
        return Err(bad("temp_hp must be >= 0"));
    }
    if crate::damage::DamageFormula::parse(&unit.damage).is_err() {
        return Err(bad("damage is not a valid formula"));
    }
    if unit.conditions.values().any(|&v| v == 0) {
        return Err(bad("condition values must be >= 1"));
    }
    Ok(())
}

fn validate_objective(objective: &ObjectiveDoc) -> Result<(), String> {
    match objective.kind {
        ObjectiveKind::TeamEliminated => {
            if objective.team.is_none() {
                return Err("team_eliminated requires team".to_string());
            }
        }
        ObjectiveKind::UnitReachTile => {
            if objective.unit.is_none() || objective.x.is_none() || objective.y.is_none() {
                return Err("unit_reach_tile requires unit, x, y".to_string());
            }
        }
        ObjectiveKind::FlagSet => {
            if objective.flag.is_none() {
                return Err("flag_set requires flag".to_string());
            }
        }
        ObjectiveKind::RoundAtLeast => {
            if objective.round.is_none() {
                return Err("round_at_least requires round".to_string());
            }
        }
        ObjectiveKind::UnitDead | ObjectiveKind::UnitAlive => {
            if objective.unit.is_none() {
                return Err("liveness objectives require unit".to_string());
            }
        }
    }
    Ok(())
}

fn validate_objective_pack(pack: &ObjectivePackDoc) -> Result<(), String> {
    match pack.kind {
        ObjectivePackKind::EliminateTeam => {
            if pack.team.is_none() {
                return Err("eliminate_team requires team".to_string());
            }
        }
        ObjectivePackKind::EscapeUnit => {
            if pack.unit.is_none() || pack.x.is_none() || pack.y.is_none() {
                return Err("escape_unit requires unit, x, y".to_string());
            }
        }
        ObjectivePackKind::Holdout => {
            if pack.round.is_none() {
                return Err("holdout requires round".to_string());
            }
        }
    }
    Ok(())
}

fn validate_mission_event(mission: &MissionEventDoc) -> Result<(), String> {
    match mission.trigger {
        TriggerKind::UnitDead | TriggerKind::UnitAlive => {
            if mission.unit.is_none() {
                return Err("unit triggers require unit".to_string());
            }
        }
        TriggerKind::FlagSet => {
            if mission.flag.is_none() {
                return Err("flag_set trigger requires flag".to_string());
            }
        }
        TriggerKind::TurnStart | TriggerKind::RoundStart => {}
    }
    if mission.if_flag.is_some() {
        if mission.then_commands.is_empty() && mission.else_commands.is_empty() {
            return Err("if_flag requires then_commands or else_commands".to_string());
        }
    } else if !mission.then_commands.is_empty() || !mission.else_commands.is_empty() {
        return Err("then_commands/else_commands require if_flag".to_string());
    }
    for (branch, commands) in [
        ("commands", &mission.commands),
        ("then_commands", &mission.then_commands),
        ("else_commands", &mission.else_commands),
    ] {
        for (i, command) in commands.iter().enumerate() {
            validate_command(command).map_err(|e| format!("{branch}[{i}]: {e}"))?;
        }
    }
    Ok(())
}

fn validate_hazard_routine(routine: &HazardRoutineDoc) -> Result<(), String> {
    if routine.id.is_empty() {
        return Err("id must be non-empty".to_string());
    }
    if routine.unit_id.is_empty() {
        return Err("unit_id must be non-empty".to_string());
    }
    if routine.cadence_rounds < 1 {
        return Err("cadence_rounds must be >= 1".to_string());
    }
    if routine.start_round < 1 {
        return Err("start_round must be >= 1".to_string());
    }
    if let Some(end) = routine.end_round {
        if end < routine.start_round {
            return Err("end_round must be >= start_round".to_string());
        }
    }
    Ok(())
}

// =============================================================================
// Per-command shape checks
// =============================================================================

struct CommandShape {
    required: &'static [&'static str],
    optional: &'static [&'static str],
}

fn command_shape(command_type: &str) -> Option<CommandShape> {
    let shape = match command_type {
        "move" => CommandShape {
            required: &["actor", "x", "y"],
            optional: &[],
        },
        "strike" => CommandShape {
            required: &["actor", "target"],
            optional: &["emit_forecast"],
        },
        "end_turn" => CommandShape {
            required: &["actor"],
            optional: &[],
        },
        "cast_spell" => CommandShape {
            required: &["actor"],
            optional: &[
                "spell_id",
                "target",
                "dc",
                "save_type",
                "damage",
                "action_cost",
                "damage_type",
                "damage_bypass",
                "mode",
                "content_entry_id",
            ],
        },
        "save_damage" => CommandShape {
            required: &["actor", "target", "dc", "save_type", "damage"],
            optional: &["mode", "damage_type", "damage_bypass"],
        },
        "area_save_damage" => CommandShape {
            required: &[
                "actor",
                "center_x",
                "center_y",
                "radius_feet",
                "save_type",
                "dc",
                "damage",
            ],
            optional: &["include_actor", "mode", "damage_type", "damage_bypass"],
        },
        "apply_effect" => CommandShape {
            required: &["actor", "target", "effect_kind"],
            optional: &["payload", "duration_rounds", "tick_timing"],
        },
        "use_feat" => CommandShape {
            required: &["actor"],
            optional: &[
                "feat_id",
                "target",
                "effect_kind",
                "payload",
                "duration_rounds",
                "tick_timing",
                "action_cost",
                "content_entry_id",
            ],
        },
        "use_item" => CommandShape {
            required: &["actor"],
            optional: &[
                "item_id",
                "target",
                "effect_kind",
                "payload",
                "duration_rounds",
                "tick_timing",
                "action_cost",
                "content_entry_id",
            ],
        },
        "interact" => CommandShape {
            required: &["actor"],
            optional: &[
                "interact_id",
                "target",
                "effect_kind",
                "payload",
                "duration_rounds",
                "tick_timing",
                "flag",
                "value",
                "action_cost",
                "content_entry_id",
            ],
        },
        "set_flag" => CommandShape {
            required: &["flag"],
            optional: &["actor", "value"],
        },
        "spawn_unit" => CommandShape {
            required: &["unit"],
            optional: &["actor", "placement_policy", "spend_action"],
        },
        "trigger_hazard_source" => CommandShape {
            required: &["actor", "hazard_id", "source_name"],
            optional: &["source_type", "center_x", "center_y", "target", "model_path"],
        },
        "run_hazard_routine" => CommandShape {
            required: &["actor", "hazard_id", "source_name"],
            optional: &["source_type", "target_policy", "center_x", "center_y", "target"],
        },
        _ => return None,
    };
    Some(shape)
}

/// Strict shape check for one raw command, then a full parse.
pub fn validate_command(value: &Value) -> Result<(), String> {
    let map = value.as_object().ok_or("command must be an object")?;
    let command_type = map
        .get("type")
        .and_then(Value::as_str)
        .ok_or("command needs a string type")?;
    let shape =
        command_shape(command_type).ok_or_else(|| format!("unknown command type {command_type:?}"))?;

    for key in shape.required {
        if !map.contains_key(*key) {
            return Err(format!("{command_type} requires {key}"));
        }
    }
    for key in map.keys() {
        if key == "type" {
            continue;
        }
        if !shape.required.contains(&key.as_str()) && !shape.optional.contains(&key.as_str()) {
            return Err(format!("{command_type} does not accept {key}"));
        }
    }

    // Full parse catches value-level mismatches (bad enums, wrong types).
    serde_json::from_value::<Command>(value.clone()).map_err(|e| e.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_scenario() -> Value {
        json!({
            "battle_id": "skirmish_01",
            "seed": 101,
            "map": {"width": 6, "height": 6, "blocked": []},
            "units": [
                {"id": "pc", "team": "pc", "hp": 20, "position": [1, 1],
                 "initiative": 15, "attack_mod": 6, "ac": 16, "damage": "1d8+3"},
                {"id": "enemy", "team": "enemy", "hp": 20, "position": [3, 3],
                 "initiative": 10, "attack_mod": 5, "ac": 15, "damage": "1d6+2"}
            ],
            "commands": [
                {"type": "strike", "actor": "pc", "target": "enemy"},
                {"type": "end_turn", "actor": "pc"},
                {"type": "end_turn", "actor": "enemy"}
            ]
        })
    }

    #[test]
    fn minimal_scenario_validates() {
        let doc = validate_scenario(&minimal_scenario().to_string()).unwrap();
        assert_eq!(doc.battle_id, "skirmish_01");
        assert_eq!(doc.commands.len(), 3);
    }

    #[test]
    fn unknown_top_level_key_rejected() {
        let mut v = minimal_scenario();
        v["unexpected"] = json!(1);
        let err = validate_scenario(&v.to_string()).unwrap_err();
        assert!(matches!(err, ScenarioError::Malformed(_)));
    }

    #[test]
    fn unknown_command_key_rejected() {
        let mut v = minimal_scenario();
        v["commands"][0]["sneaky"] = json!(true);
        let err = validate_scenario(&v.to_string()).unwrap_err();
        match err {
            ScenarioError::BadCommand { index: 0, message } => {
                assert!(message.contains("does not accept"), "{message}");
            }
            other => panic!("wrong error: {other:?}"),
        }
    }

    #[test]
    fn unknown_command_type_rejected() {
        let mut v = minimal_scenario();
        v["commands"][0] = json!({"type": "dance", "actor": "pc"});
        let err = validate_scenario(&v.to_string()).unwrap_err();
        assert!(err.to_string().contains("unknown command type"));
    }

    #[test]
    fn missing_required_field_rejected() {
        let mut v = minimal_scenario();
        v["commands"][0] = json!({"type": "move", "actor": "pc", "x": 2});
        let err = validate_scenario(&v.to_string()).unwrap_err();
        assert!(err.to_string().contains("move requires y"));
    }

    #[test]
    fn duplicate_unit_ids_rejected() {
        let mut v = minimal_scenario();
        v["units"][1]["id"] = json!("pc");
        v["units"][1]["position"] = json!([4, 4]);
        let err = validate_scenario(&v.to_string()).unwrap_err();
        assert_eq!(err, ScenarioError::DuplicateUnitId("pc".to_string()));
    }

    #[test]
    fn spawn_on_blocked_tile_rejected() {
        let mut v = minimal_scenario();
        v["map"]["blocked"] = json!([[1, 1]]);
        let err = validate_scenario(&v.to_string()).unwrap_err();
        assert!(matches!(err, ScenarioError::BadSpawnTile { reason: "is blocked", .. }));
    }

    #[test]
    fn non_positive_hp_rejected() {
        let mut v = minimal_scenario();
        v["units"][0]["hp"] = json!(0);
        let err = validate_scenario(&v.to_string()).unwrap_err();
        assert!(err.to_string().contains("hp must be > 0"));
    }

    #[test]
    fn mission_event_branch_rules() {
        let mut v = minimal_scenario();
        v["mission_events"] = json!([{
            "id": "m1",
            "trigger": "round_start",
            "then_commands": [{"type": "set_flag", "flag": "x"}]
        }]);
        let err = validate_scenario(&v.to_string()).unwrap_err();
        assert!(err.to_string().contains("require if_flag"));

        v["mission_events"][0]["if_flag"] = json!("gate_open");
        validate_scenario(&v.to_string()).unwrap();
    }

    #[test]
    fn flag_trigger_requires_flag() {
        let mut v = minimal_scenario();
        v["mission_events"] = json!([{
            "id": "m1",
            "trigger": "flag_set",
            "commands": [{"type": "set_flag", "flag": "y"}]
        }]);
        let err = validate_scenario(&v.to_string()).unwrap_err();
        assert!(err.to_string().contains("requires flag"));
    }

    #[test]
    fn hazard_cadence_must_be_positive() {
        let mut v = minimal_scenario();
        v["hazard_routines"] = json!([{
            "id": "r1", "unit_id": "enemy", "hazard_id": "h1",
            "source_name": "s1", "cadence_rounds": 0
        }]);
        let err = validate_scenario(&v.to_string()).unwrap_err();
        assert!(err.to_string().contains("cadence_rounds"));
    }

    #[test]
    fn multiple_packs_need_selection() {
        let mut v = minimal_scenario();
        v["content_packs"] = json!(["packs/a.json", "packs/b.json"]);
        let err = validate_scenario(&v.to_string()).unwrap_err();
        assert_eq!(err, ScenarioError::ContentPackIdRequired);

        v["content_pack_id"] = json!("core");
        validate_scenario(&v.to_string()).unwrap();
    }

    #[test]
    fn validation_is_idempotent_on_unmodified_json() {
        let text = minimal_scenario().to_string();
        let doc1 = validate_scenario(&text).unwrap();
        let doc2 = validate_scenario(&serde_json::to_string(&doc1).unwrap()).unwrap();
        assert_eq!(doc1, doc2);
    }
}
