//! Command reducer — `apply()` dispatch over every command variant.
//!
//! The reducer deep-copies the input state, applies exactly one command, and
//! returns the replacement plus the events it appended. It is pure except
//! for advancing the RNG call count. Errors are typed and fail fast; the
//! orchestrator converts them into a `command_error` event.

use serde_json::{json, Map, Value};
use thiserror::Error;

use sk_data::effect_model::EffectModelCatalog;
use sk_types::command::{Command, ContentEntryIntent, PlacementPolicy, SaveMode, SaveType, TargetPolicy};
use sk_types::event::Event;
use sk_types::grid::TilePos;
use sk_types::ids::UnitId;
use sk_types::rng::RngState;
use sk_types::state::{BattleState, EffectKind, TickTiming, Unit};

use crate::checks::{self, Degree};
use crate::damage::{self, DamageFormula};
use crate::effects::{self, emit_event, obj};
use crate::forecast;
use crate::line_of_effect::{self, cover_grade};
use crate::modeled;
use crate::targeting;
use crate::turn_order;

// =============================================================================
// Error type
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReductionError {
    #[error("actor {actor} is not active unit {active}")]
    NotActive { actor: UnitId, active: UnitId },
    #[error("unknown unit {0}")]
    UnknownUnit(UnitId),
    #[error("unit {0} is dead")]
    DeadActor(UnitId),
    #[error("target {0} is dead")]
    DeadTarget(UnitId),
    #[error("unit {0} has no actions remaining")]
    NoActions(UnitId),
    #[error("action cost {0} must be positive")]
    NonPositiveActionCost(i32),
    #[error("destination ({x},{y}) is not adjacent")]
    NotAdjacent { x: i32, y: i32 },
    #[error("tile ({x},{y}) is out of bounds")]
    OutOfBounds { x: i32, y: i32 },
    #[error("tile ({x},{y}) is blocked")]
    Blocked { x: i32, y: i32 },
    #[error("tile ({x},{y}) is occupied")]
    Occupied { x: i32, y: i32 },
    #[error("no line of effect from {from} to {to}")]
    NoLineOfEffect { from: String, to: String },
    #[error("missing required field {0}")]
    MissingField(&'static str),
    #[error("invalid damage formula: {0}")]
    BadFormula(String),
    #[error("invalid effect payload: {0}")]
    BadEffectPayload(String),
    #[error("duplicate unit id {0}")]
    DuplicateUnit(UnitId),
    #[error("spawned unit {0} must have hp > 0")]
    NonPositiveHp(UnitId),
    #[error("spawned unit {0} must have a non-empty team")]
    EmptyTeam(UnitId),
    #[error("no open tile near ({x},{y})")]
    NoOpenTile { x: i32, y: i32 },
    #[error("unknown hazard source ({hazard_id}, {source_name}, {source_type})")]
    UnknownHazardSource {
        hazard_id: String,
        source_name: String,
        source_type: String,
    },
}

// =============================================================================
// Public API
// =============================================================================

/// Apply one command against a state, returning the next state and the
/// events appended during the reduction.
pub fn apply(
    state: &BattleState,
    command: &Command,
    rng: &mut RngState,
    catalog: &EffectModelCatalog,
) -> Result<(BattleState, Vec<Event>), ReductionError> {
    let mut next = state.clone();
    let mut events = Vec::new();

    match command {
        Command::Move { actor, x, y } => {
            apply_move(&mut next, &mut events, actor, *x, *y)?;
        }

        Command::Strike {
            actor,
            target,
            emit_forecast,
        } => {
            apply_strike(&mut next, rng, &mut events, actor, target, *emit_forecast)?;
        }

        Command::EndTurn { actor } => {
            apply_end_turn(&mut next, rng, &mut events, actor)?;
        }

        Command::CastSpell {
            actor,
            spell_id,
            target,
            dc,
            save_type,
            damage,
            action_cost,
            damage_type,
            damage_bypass,
            mode,
            content_entry,
            ..
        } => {
            let spell_id = spell_id.as_deref().ok_or(ReductionError::MissingField("spell_id"))?;
            let target = target.as_ref().ok_or(ReductionError::MissingField("target"))?;
            let dc = dc.ok_or(ReductionError::MissingField("dc"))?;
            let save_type = save_type.ok_or(ReductionError::MissingField("save_type"))?;
            let formula = damage.as_deref().ok_or(ReductionError::MissingField("damage"))?;
            apply_save_gated_damage(
                &mut next,
                rng,
                &mut events,
                SaveGated {
                    event_type: "cast_spell",
                    actor,
                    target,
                    dc,
                    save_type,
                    formula,
                    mode: *mode,
                    damage_type: damage_type.as_deref(),
                    damage_bypass,
                    action_cost: *action_cost,
                    spell_id: Some(spell_id),
                    with_forecast: true,
                    content_entry: content_entry.as_ref(),
                },
            )?;
        }

        Command::SaveDamage {
            actor,
            target,
            dc,
            save_type,
            damage,
            mode,
            damage_type,
            damage_bypass,
        } => {
            apply_save_gated_damage(
                &mut next,
                rng,
                &mut events,
                SaveGated {
                    event_type: "save_damage",
                    actor,
                    target,
                    dc: *dc,
                    save_type: *save_type,
                    formula: damage,
                    mode: *mode,
                    damage_type: damage_type.as_deref(),
                    damage_bypass,
                    action_cost: 1,
                    spell_id: None,
                    with_forecast: false,
                    content_entry: None,
                },
            )?;
        }

        Command::AreaSaveDamage {
            actor,
            center_x,
            center_y,
            radius_feet,
            include_actor,
            save_type,
            dc,
            damage,
            mode,
            damage_type,
            damage_bypass,
        } => {
            apply_area_save_damage(
                &mut next,
                rng,
                &mut events,
                actor,
                TilePos::new(*center_x, *center_y),
                *radius_feet,
                *include_actor,
                *save_type,
                *dc,
                damage,
                *mode,
                damage_type.as_deref(),
                damage_bypass,
            )?;
        }

        Command::ApplyEffect {
            actor,
            target,
            effect_kind,
            payload,
            duration_rounds,
            tick_timing,
        } => {
            require_active(&next, actor)?;
            require_alive(&next, actor)?;
            emit_event(
                &mut next,
                &mut events,
                "apply_effect_command",
                obj(json!({
                    "actor": actor.as_str(),
                    "target": target.as_str(),
                    "effect_kind": effect_kind,
                    "duration_rounds": duration_rounds,
                    "tick_timing": tick_timing,
                })),
            );
            effects::apply_new_effect(
                &mut next,
                rng,
                &mut events,
                *effect_kind,
                Some(actor.clone()),
                target.clone(),
                payload.clone(),
                *duration_rounds,
                *tick_timing,
            )?;
        }

        Command::UseFeat {
            actor,
            feat_id,
            target,
            effect_kind,
            payload,
            duration_rounds,
            tick_timing,
            action_cost,
            content_entry,
            ..
        } => {
            let feat_id = feat_id.as_deref().ok_or(ReductionError::MissingField("feat_id"))?;
            apply_templated_effect(
                &mut next,
                rng,
                &mut events,
                Templated {
                    event_type: "use_feat",
                    id_key: "feat_id",
                    id_value: feat_id,
                    actor,
                    target: target.as_ref(),
                    effect_kind: *effect_kind,
                    payload,
                    duration_rounds: *duration_rounds,
                    tick_timing: *tick_timing,
                    action_cost: *action_cost,
                    flag: None,
                    flag_value: true,
                    content_entry: content_entry.as_ref(),
                },
            )?;
        }

        Command::UseItem {
            actor,
            item_id,
            target,
            effect_kind,
            payload,
            duration_rounds,
            tick_timing,
            action_cost,
            content_entry,
            ..
        } => {
            let item_id = item_id.as_deref().ok_or(ReductionError::MissingField("item_id"))?;
            apply_templated_effect(
                &mut next,
                rng,
                &mut events,
                Templated {
                    event_type: "use_item",
                    id_key: "item_id",
                    id_value: item_id,
                    actor,
                    target: target.as_ref(),
                    effect_kind: *effect_kind,
                    payload,
                    duration_rounds: *duration_rounds,
                    tick_timing: *tick_timing,
                    action_cost: *action_cost,
                    flag: None,
                    flag_value: true,
                    content_entry: content_entry.as_ref(),
                },
            )?;
        }

        Command::Interact {
            actor,
            interact_id,
            target,
            effect_kind,
            payload,
            duration_rounds,
            tick_timing,
            flag,
            value,
            action_cost,
            content_entry,
            ..
        } => {
            let interact_id = interact_id
                .as_deref()
                .ok_or(ReductionError::MissingField("interact_id"))?;
            apply_templated_effect(
                &mut next,
                rng,
                &mut events,
                Templated {
                    event_type: "interact",
                    id_key: "interact_id",
                    id_value: interact_id,
                    actor,
                    target: target.as_ref(),
                    effect_kind: *effect_kind,
                    payload,
                    duration_rounds: *duration_rounds,
                    tick_timing: *tick_timing,
                    action_cost: *action_cost,
                    flag: flag.as_deref(),
                    flag_value: *value,
                    content_entry: content_entry.as_ref(),
                },
            )?;
        }

        Command::SetFlag { actor, flag, value } => {
            next.flags.insert(flag.clone(), *value);
            emit_event(
                &mut next,
                &mut events,
                "set_flag",
                obj(json!({
                    "actor": actor.as_ref().map(|a| a.as_str()),
                    "flag": flag,
                    "value": value,
                })),
            );
        }

        Command::SpawnUnit {
            actor,
            unit,
            placement_policy,
            spend_action,
        } => {
            apply_spawn_unit(
                &mut next,
                &mut events,
                actor.as_ref(),
                unit,
                *placement_policy,
                *spend_action,
            )?;
        }

        Command::TriggerHazardSource {
            actor,
            hazard_id,
            source_name,
            source_type,
            center_x,
            center_y,
            target,
            model_path,
        } => {
            let center = zip_center(*center_x, *center_y);
            apply_hazard(
                &mut next,
                rng,
                &mut events,
                catalog,
                Hazard {
                    event_type: "trigger_hazard_source",
                    actor,
                    hazard_id,
                    source_name,
                    source_type,
                    explicit_target: target.clone(),
                    center,
                    filter_enemies: false,
                    force_empty: false,
                    target_policy: None,
                    model_path: model_path.as_deref(),
                },
            )?;
        }

        Command::RunHazardRoutine {
            actor,
            hazard_id,
            source_name,
            source_type,
            target_policy,
            center_x,
            center_y,
            target,
        } => {
            let configured_center = zip_center(*center_x, *center_y);
            let mut explicit = target.clone();
            let mut center = configured_center;
            let mut filter_enemies = false;
            let mut force_empty = false;

            match target_policy {
                TargetPolicy::AsConfigured => {}
                TargetPolicy::Explicit => {
                    if explicit.is_none() {
                        return Err(ReductionError::MissingField("target"));
                    }
                }
                TargetPolicy::NearestEnemy => {
                    explicit = targeting::nearest_enemy(&next, actor);
                    force_empty = explicit.is_none();
                    center = None;
                }
                TargetPolicy::NearestEnemyAreaCenter => {
                    explicit = None;
                    center = targeting::nearest_enemy(&next, actor)
                        .and_then(|id| next.unit(&id).map(|u| u.position));
                    force_empty = center.is_none();
                }
                TargetPolicy::AllEnemies => {
                    explicit = None;
                    filter_enemies = true;
                }
            }

            apply_hazard(
                &mut next,
                rng,
                &mut events,
                catalog,
                Hazard {
                    event_type: "run_hazard_routine",
                    actor,
                    hazard_id,
                    source_name,
                    source_type,
                    explicit_target: explicit,
                    center,
                    filter_enemies,
                    force_empty,
                    target_policy: Some(*target_policy),
                    model_path: None,
                },
            )?;
        }
    }

    Ok((next, events))
}

// =============================================================================
// Common preconditions
// =============================================================================

fn require_active(state: &BattleState, actor: &UnitId) -> Result<(), ReductionError> {
    let active = state.active_unit_id();
    if actor != active {
        return Err(ReductionError::NotActive {
            actor: actor.clone(),
            active: active.clone(),
        });
    }
    Ok(())
}

fn require_alive(state: &BattleState, id: &UnitId) -> Result<(), ReductionError> {
    let unit = state
        .unit(id)
        .ok_or_else(|| ReductionError::UnknownUnit(id.clone()))?;
    if !unit.alive() {
        return Err(ReductionError::DeadActor(id.clone()));
    }
    Ok(())
}

fn spend_actions(state: &mut BattleState, actor: &UnitId, cost: i32) -> Result<(), ReductionError> {
    if cost <= 0 {
        return Err(ReductionError::NonPositiveActionCost(cost));
    }
    let unit = state
        .unit_mut(actor)
        .ok_or_else(|| ReductionError::UnknownUnit(actor.clone()))?;
    if (unit.actions_remaining as i32) < cost {
        return Err(ReductionError::NoActions(actor.clone()));
    }
    unit.actions_remaining -= cost as u8;
    Ok(())
}

fn zip_center(x: Option<i32>, y: Option<i32>) -> Option<TilePos> {
    match (x, y) {
        (Some(x), Some(y)) => Some(TilePos::new(x, y)),
        _ => None,
    }
}

/// The first passable tile ordered by (manhattan distance to the requested
/// tile, y, x). Used by nearest_open spawn placement and summons.
pub(crate) fn nearest_open_tile(state: &BattleState, requested: TilePos) -> Option<TilePos> {
    let map = &state.battle_map;
    let mut best: Option<(i32, i32, i32, TilePos)> = None;
    for y in 0..map.height {
        for x in 0..map.width {
            let pos = TilePos::new(x, y);
            if !state.is_passable(pos) {
                continue;
            }
            let key = (requested.manhattan(pos), y, x);
            if best.map_or(true, |(d, by, bx, _)| key < (d, by, bx)) {
                best = Some((key.0, key.1, key.2, pos));
            }
        }
    }
    best.map(|(_, _, _, pos)| pos)
}

// =============================================================================
// Movement
// =============================================================================

fn apply_move(
    state: &mut BattleState,
    events: &mut Vec<Event>,
    actor: &UnitId,
    x: i32,
    y: i32,
) -> Result<(), ReductionError> {
    require_active(state, actor)?;
    require_alive(state, actor)?;

    let to = TilePos::new(x, y);
    let from = state.unit(actor).expect("actor checked").position;
    if from.manhattan(to) != 1 {
        return Err(ReductionError::NotAdjacent { x, y });
    }
    if !state.battle_map.in_bounds(to) {
        return Err(ReductionError::OutOfBounds { x, y });
    }
    if state.battle_map.is_blocked(to) {
        return Err(ReductionError::Blocked { x, y });
    }
    if state.is_occupied(to) {
        return Err(ReductionError::Occupied { x, y });
    }
    spend_actions(state, actor, 1)?;

    let unit = state.unit_mut(actor).expect("actor checked");
    unit.position = to;
    let actions_remaining = unit.actions_remaining;

    emit_event(
        state,
        events,
        "move",
        obj(json!({
            "unit": actor.as_str(),
            "from": [from.x, from.y],
            "to": [to.x, to.y],
            "actions_remaining": actions_remaining,
        })),
    );
    Ok(())
}

// =============================================================================
// Strike
// =============================================================================

fn apply_strike(
    state: &mut BattleState,
    rng: &mut RngState,
    events: &mut Vec<Event>,
    actor: &UnitId,
    target: &UnitId,
    emit_forecast: bool,
) -> Result<(), ReductionError> {
    require_active(state, actor)?;
    require_alive(state, actor)?;
    let target_unit = state
        .unit(target)
        .ok_or_else(|| ReductionError::UnknownUnit(target.clone()))?;
    if !target_unit.alive() {
        return Err(ReductionError::DeadTarget(target.clone()));
    }

    let actor_unit = state.unit(actor).expect("actor checked");
    let (actor_pos, attack_mod, formula_text, damage_type, bypass) = (
        actor_unit.position,
        actor_unit.attack_mod,
        actor_unit.damage.clone(),
        actor_unit.attack_damage_type.clone(),
        actor_unit.attack_damage_bypass.clone(),
    );
    let target_pos = target_unit.position;

    if !line_of_effect::has_tile_line_of_effect(&state.battle_map, actor_pos, target_pos) {
        return Err(ReductionError::NoLineOfEffect {
            from: actor.to_string(),
            to: target.to_string(),
        });
    }
    spend_actions(state, actor, 1)?;

    let formula = DamageFormula::parse(&formula_text)
        .map_err(|e| ReductionError::BadFormula(e.to_string()))?;

    let grade = cover_grade(&state.battle_map, actor_pos, target_pos);
    let target_unit = state.unit(target).expect("target checked");
    let effective_ac = target_unit.ac + grade.ac_bonus();

    let check = checks::resolve_check(rng, attack_mod, effective_ac);
    let multiplier = match check.degree {
        Degree::CriticalSuccess => 2.0,
        Degree::Success => 1.0,
        _ => 0.0,
    };

    let mut payload = obj(json!({
        "actor": actor.as_str(),
        "target": target.as_str(),
        "cover": grade,
        "effective_ac": effective_ac,
        "check": check,
        "multiplier": multiplier,
    }));

    if multiplier > 0.0 {
        let raw = formula.roll(rng, multiplier);
        let target_unit = state.unit(target).expect("target checked");
        let applied = damage::apply_modifiers(
            raw,
            &damage_type,
            &target_unit.resistances,
            &target_unit.weaknesses,
            &target_unit.immunities,
            &bypass,
        );
        let target_unit = state.unit_mut(target).expect("target checked");
        let pool = damage::damage_unit(target_unit, applied.applied);
        payload.insert("damage".into(), json!(applied));
        payload.insert("pool".into(), json!(pool));
        payload.insert("target_hp".into(), json!(pool.new_hp));
    }

    if emit_forecast {
        let f = forecast::strike_forecast(attack_mod, effective_ac, &formula);
        payload.insert("forecast".into(), json!(f));
    }

    emit_event(state, events, "strike", payload);
    Ok(())
}

// =============================================================================
// End turn
// =============================================================================

fn apply_end_turn(
    state: &mut BattleState,
    rng: &mut RngState,
    events: &mut Vec<Event>,
    actor: &UnitId,
) -> Result<(), ReductionError> {
    require_active(state, actor)?;
    if state.unit(actor).is_none() {
        return Err(ReductionError::UnknownUnit(actor.clone()));
    }

    emit_event(
        state,
        events,
        "end_turn",
        obj(json!({ "unit": actor.as_str() })),
    );
    effects::process_timing(state, rng, events, TickTiming::TurnEnd);

    let advancement = turn_order::advance(state);
    if !advancement.reached_living {
        return Ok(());
    }

    let incoming = state.active_unit_id().clone();
    emit_event(
        state,
        events,
        "turn_start",
        obj(json!({
            "unit": incoming.as_str(),
            "round": state.round_number,
        })),
    );
    effects::process_timing(state, rng, events, TickTiming::TurnStart);
    Ok(())
}

// =============================================================================
// Save-gated damage (cast_spell, save_damage)
// =============================================================================

struct SaveGated<'a> {
    event_type: &'static str,
    actor: &'a UnitId,
    target: &'a UnitId,
    dc: i32,
    save_type: SaveType,
    formula: &'a str,
    mode: SaveMode,
    damage_type: Option<&'a str>,
    damage_bypass: &'a [String],
    action_cost: i32,
    spell_id: Option<&'a str>,
    with_forecast: bool,
    content_entry: Option<&'a ContentEntryIntent>,
}

fn apply_save_gated_damage(
    state: &mut BattleState,
    rng: &mut RngState,
    events: &mut Vec<Event>,
    cmd: SaveGated<'_>,
) -> Result<(), ReductionError> {
    require_active(state, cmd.actor)?;
    require_alive(state, cmd.actor)?;
    let target_unit = state
        .unit(cmd.target)
        .ok_or_else(|| ReductionError::UnknownUnit(cmd.target.clone()))?;
    if !target_unit.alive() {
        return Err(ReductionError::DeadTarget(cmd.target.clone()));
    }
    spend_actions(state, cmd.actor, cmd.action_cost)?;

    let formula = DamageFormula::parse(cmd.formula)
        .map_err(|e| ReductionError::BadFormula(e.to_string()))?;
    let damage_type = cmd.damage_type.unwrap_or("untyped");

    let target_unit = state.unit(cmd.target).expect("target checked");
    let save_mod = checks::save_modifier(target_unit, cmd.save_type);
    let save = checks::resolve_save(rng, cmd.save_type, target_unit, cmd.dc);
    let multiplier = modeled::mode_multiplier(cmd.mode, save.degree);

    let raw = formula.roll(rng, multiplier);
    let target_unit = state.unit(cmd.target).expect("target checked");
    let applied = damage::apply_modifiers(
        raw,
        damage_type,
        &target_unit.resistances,
        &target_unit.weaknesses,
        &target_unit.immunities,
        cmd.damage_bypass,
    );
    let target_unit = state.unit_mut(cmd.target).expect("target checked");
    let pool = damage::damage_unit(target_unit, applied.applied);

    let mut payload = obj(json!({
        "actor": cmd.actor.as_str(),
        "target": cmd.target.as_str(),
        "save_type": cmd.save_type,
        "dc": cmd.dc,
        "mode": cmd.mode,
        "action_cost": cmd.action_cost,
        "save": save,
        "multiplier": multiplier,
        "damage": applied,
        "pool": pool,
        "target_hp": pool.new_hp,
    }));
    if let Some(spell_id) = cmd.spell_id {
        payload.insert("spell_id".into(), json!(spell_id));
    }
    if cmd.with_forecast {
        let f = forecast::spell_forecast(save_mod, cmd.dc, &formula, cmd.mode);
        payload.insert("forecast".into(), json!(f));
    }
    if let Some(entry) = cmd.content_entry {
        payload.insert("content_entry".into(), json!(entry));
    }

    emit_event(state, events, cmd.event_type, payload);
    Ok(())
}

// =============================================================================
// Area save damage
// =============================================================================

#[allow(clippy::too_many_arguments)]
fn apply_area_save_damage(
    state: &mut BattleState,
    rng: &mut RngState,
    events: &mut Vec<Event>,
    actor: &UnitId,
    center: TilePos,
    radius_feet: i32,
    include_actor: bool,
    save_type: SaveType,
    dc: i32,
    formula_text: &str,
    mode: SaveMode,
    damage_type: Option<&str>,
    damage_bypass: &[String],
) -> Result<(), ReductionError> {
    require_active(state, actor)?;
    require_alive(state, actor)?;
    spend_actions(state, actor, 2)?;

    let formula = DamageFormula::parse(formula_text)
        .map_err(|e| ReductionError::BadFormula(e.to_string()))?;
    let damage_type = damage_type.unwrap_or("untyped");
    let radius_tiles = targeting::feet_to_tiles(radius_feet);

    let targets: Vec<UnitId> = state
        .units
        .values()
        .filter(|u| u.alive())
        .filter(|u| include_actor || u.id != *actor)
        .filter(|u| center.manhattan(u.position) <= radius_tiles)
        .filter(|u| {
            line_of_effect::has_tile_line_of_effect(&state.battle_map, center, u.position)
        })
        .map(|u| u.id.clone())
        .collect();

    let mut resolutions = Vec::new();
    for target in &targets {
        let target_unit = state.unit(target).expect("selected above");
        let save = checks::resolve_save(rng, save_type, target_unit, dc);
        let multiplier = modeled::mode_multiplier(mode, save.degree);
        let raw = formula.roll(rng, multiplier);
        let applied = damage::apply_modifiers(
            raw,
            damage_type,
            &target_unit.resistances,
            &target_unit.weaknesses,
            &target_unit.immunities,
            damage_bypass,
        );
        let target_unit = state.unit_mut(target).expect("selected above");
        let pool = damage::damage_unit(target_unit, applied.applied);
        resolutions.push(json!({
            "target": target.as_str(),
            "save": save,
            "multiplier": multiplier,
            "damage": applied,
            "pool": pool,
            "target_hp": pool.new_hp,
        }));
    }

    emit_event(
        state,
        events,
        "area_save_damage",
        obj(json!({
            "actor": actor.as_str(),
            "center": [center.x, center.y],
            "radius_feet": radius_feet,
            "radius_tiles": radius_tiles,
            "save_type": save_type,
            "dc": dc,
            "mode": mode,
            "resolutions": resolutions,
        })),
    );
    Ok(())
}

// =============================================================================
// Templated effect commands (use_feat, use_item, interact)
// =============================================================================

struct Templated<'a> {
    event_type: &'static str,
    id_key: &'static str,
    id_value: &'a str,
    actor: &'a UnitId,
    target: Option<&'a UnitId>,
    effect_kind: Option<EffectKind>,
    payload: &'a Map<String, Value>,
    duration_rounds: Option<i32>,
    tick_timing: Option<TickTiming>,
    action_cost: i32,
    flag: Option<&'a str>,
    flag_value: bool,
    content_entry: Option<&'a ContentEntryIntent>,
}

fn apply_templated_effect(
    state: &mut BattleState,
    rng: &mut RngState,
    events: &mut Vec<Event>,
    cmd: Templated<'_>,
) -> Result<(), ReductionError> {
    require_active(state, cmd.actor)?;
    require_alive(state, cmd.actor)?;
    spend_actions(state, cmd.actor, cmd.action_cost)?;

    let target = cmd.target.unwrap_or(cmd.actor).clone();
    if state.unit(&target).is_none() {
        return Err(ReductionError::UnknownUnit(target));
    }

    let mut payload = obj(json!({
        "actor": cmd.actor.as_str(),
        "target": target.as_str(),
        "action_cost": cmd.action_cost,
    }));
    payload.insert(cmd.id_key.to_string(), json!(cmd.id_value));
    if let Some(kind) = cmd.effect_kind {
        payload.insert("effect_kind".into(), json!(kind));
    }
    if let Some(flag) = cmd.flag {
        payload.insert("flag".into(), json!(flag));
        payload.insert("value".into(), json!(cmd.flag_value));
    }
    if let Some(entry) = cmd.content_entry {
        payload.insert("content_entry".into(), json!(entry));
    }
    emit_event(state, events, cmd.event_type, payload);

    if let Some(flag) = cmd.flag {
        state.flags.insert(flag.to_string(), cmd.flag_value);
    }

    if let Some(kind) = cmd.effect_kind {
        effects::apply_new_effect(
            state,
            rng,
            events,
            kind,
            Some(cmd.actor.clone()),
            target,
            cmd.payload.clone(),
            cmd.duration_rounds,
            cmd.tick_timing,
        )?;
    }
    Ok(())
}

// =============================================================================
// Spawn
// =============================================================================

fn apply_spawn_unit(
    state: &mut BattleState,
    events: &mut Vec<Event>,
    actor: Option<&UnitId>,
    unit: &Unit,
    placement_policy: PlacementPolicy,
    spend_action: bool,
) -> Result<(), ReductionError> {
    if state.units.contains_key(&unit.id) {
        return Err(ReductionError::DuplicateUnit(unit.id.clone()));
    }
    if unit.hp <= 0 {
        return Err(ReductionError::NonPositiveHp(unit.id.clone()));
    }
    if unit.team.is_empty() {
        return Err(ReductionError::EmptyTeam(unit.id.clone()));
    }

    if spend_action {
        let actor = actor.ok_or(ReductionError::MissingField("actor"))?;
        require_active(state, actor)?;
        require_alive(state, actor)?;
        spend_actions(state, actor, 1)?;
    }

    let requested = unit.position;
    let placed = match placement_policy {
        PlacementPolicy::Exact => {
            if !state.battle_map.in_bounds(requested) {
                return Err(ReductionError::OutOfBounds {
                    x: requested.x,
                    y: requested.y,
                });
            }
            if state.battle_map.is_blocked(requested) {
                return Err(ReductionError::Blocked {
                    x: requested.x,
                    y: requested.y,
                });
            }
            if state.is_occupied(requested) {
                return Err(ReductionError::Occupied {
                    x: requested.x,
                    y: requested.y,
                });
            }
            requested
        }
        PlacementPolicy::NearestOpen => {
            nearest_open_tile(state, requested).ok_or(ReductionError::NoOpenTile {
                x: requested.x,
                y: requested.y,
            })?
        }
    };

    let mut unit = unit.clone();
    unit.position = placed;
    let id = unit.id.clone();
    let team = unit.team.clone();
    state.units.insert(id.clone(), unit);
    turn_order::rebuild_preserving_active(state);

    emit_event(
        state,
        events,
        "spawn_unit",
        obj(json!({
            "unit": id.as_str(),
            "team": team,
            "position": [placed.x, placed.y],
            "placement_policy": placement_policy,
            "spend_action": spend_action,
        })),
    );
    Ok(())
}

// =============================================================================
// Hazard sources & routines
// =============================================================================

struct Hazard<'a> {
    event_type: &'static str,
    actor: &'a UnitId,
    hazard_id: &'a str,
    source_name: &'a str,
    source_type: &'a str,
    explicit_target: Option<UnitId>,
    center: Option<TilePos>,
    filter_enemies: bool,
    force_empty: bool,
    target_policy: Option<TargetPolicy>,
    model_path: Option<&'a str>,
}

fn apply_hazard(
    state: &mut BattleState,
    rng: &mut RngState,
    events: &mut Vec<Event>,
    catalog: &EffectModelCatalog,
    cmd: Hazard<'_>,
) -> Result<(), ReductionError> {
    require_active(state, cmd.actor)?;
    require_alive(state, cmd.actor)?;

    let source = catalog
        .lookup(cmd.hazard_id, cmd.source_name, cmd.source_type)
        .ok_or_else(|| ReductionError::UnknownHazardSource {
            hazard_id: cmd.hazard_id.to_string(),
            source_name: cmd.source_name.to_string(),
            source_type: cmd.source_type.to_string(),
        })?
        .clone();

    let mut targets = if cmd.force_empty {
        Vec::new()
    } else {
        targeting::select_targets(
            state,
            cmd.actor,
            &source.effects,
            cmd.explicit_target.as_ref(),
            cmd.center,
        )?
    };
    if cmd.filter_enemies {
        let actor_team = state
            .unit(cmd.actor)
            .map(|u| u.team.clone())
            .unwrap_or_default();
        targets.retain(|id| {
            state
                .unit(id)
                .map(|u| u.team != actor_team)
                .unwrap_or(false)
        });
    }

    let mut payload = obj(json!({
        "actor": cmd.actor.as_str(),
        "hazard_id": cmd.hazard_id,
        "source_name": cmd.source_name,
        "source_type": cmd.source_type,
        "targets": targets.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
    }));
    if let Some(center) = cmd.center {
        payload.insert("center".into(), json!([center.x, center.y]));
    }
    if let Some(policy) = cmd.target_policy {
        payload.insert("target_policy".into(), json!(policy));
    }
    if let Some(path) = cmd.model_path {
        payload.insert("model_path".into(), json!(path));
    }
    emit_event(state, events, cmd.event_type, payload);

    for target in &targets {
        let mut resolution =
            modeled::apply_modeled_effects(state, rng, events, cmd.actor, target, &source);
        resolution.insert("hazard_id".into(), json!(cmd.hazard_id));
        resolution.insert("source_name".into(), json!(cmd.source_name));
        emit_event(state, events, "hazard_resolution", resolution);
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
