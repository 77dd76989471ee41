//! Affliction stage machine.
//!
//! Entry: the target saves against the affliction DC; failure contracts at
//! stage 1, critical failure at min(2, N). Every turn_end the save is
//! re-rolled: success steps the stage down (removal at 0), critical success
//! removes outright, failure holds, critical failure steps up (capped at N).
//! A stage's effects are applied fresh on stage entry. Conditions listed in
//! `persistent_conditions` survive the affliction's removal.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use sk_data::effect_model::{DurationSpec, StageSpec};
use sk_types::command::SaveType;
use sk_types::event::Event;
use sk_types::ids::{EffectId, UnitId};
use sk_types::rng::RngState;
use sk_types::state::{BattleState, Effect, EffectKind, TickTiming};

use crate::checks::{self, Degree};
use crate::conditions;
use crate::damage;
use crate::effects::{emit_event, obj};
use crate::reducer::ReductionError;

/// Schema-typed affliction payload. Stored back into the effect's opaque
/// payload map after every mutation; unrecognized keys are preserved by the
/// round-trip being additive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AfflictionPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub save_type: SaveType,
    pub dc: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_duration: Option<DurationSpec>,
    #[serde(default)]
    pub stages: Vec<StageSpec>,
    #[serde(default)]
    pub current_stage: u32,
    #[serde(default)]
    pub persistent_conditions: Vec<String>,
    /// Conditions this affliction has written, for expiry clearing.
    #[serde(default)]
    pub applied_conditions: Vec<String>,
}

impl AfflictionPayload {
    pub fn parse(payload: &Map<String, Value>) -> Result<Self, ReductionError> {
        serde_json::from_value(Value::Object(payload.clone()))
            .map_err(|e| ReductionError::BadEffectPayload(format!("affliction payload: {e}")))
    }

    fn write_into(&self, payload: &mut Map<String, Value>) {
        let serialized = serde_json::to_value(self).expect("affliction payload serializes");
        if let Value::Object(map) = serialized {
            for (k, v) in map {
                payload.insert(k, v);
            }
        }
    }

    /// Highest stage number the affliction can reach.
    pub fn max_stage(&self) -> u32 {
        self.stages.iter().map(|s| s.stage).max().unwrap_or(1)
    }

    fn stage_spec(&self, stage: u32) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

/// Roll the entry save and store the affliction when contracted.
///
/// Returns `None` without storing anything on success or critical success.
#[allow(clippy::too_many_arguments)]
pub fn apply_entry(
    state: &mut BattleState,
    rng: &mut RngState,
    events: &mut Vec<Event>,
    source: Option<UnitId>,
    target: UnitId,
    payload: Map<String, Value>,
    duration_rounds: Option<i32>,
    tick_timing: Option<TickTiming>,
) -> Result<Option<EffectId>, ReductionError> {
    let mut spec = AfflictionPayload::parse(&payload)?;
    let target_unit = state
        .unit(&target)
        .ok_or_else(|| ReductionError::UnknownUnit(target.clone()))?;

    let save = checks::resolve_save(rng, spec.save_type, target_unit, spec.dc);
    let initial_stage = match save.degree {
        Degree::Failure => Some(1),
        Degree::CriticalFailure => Some(2.min(spec.max_stage())),
        Degree::Success | Degree::CriticalSuccess => None,
    };

    let Some(stage) = initial_stage else {
        let event_payload = obj(json!({
            "target": target.as_str(),
            "name": spec.name,
            "save": save,
        }));
        emit_event(state, events, "affliction_resisted", event_payload);
        return Ok(None);
    };

    let id = contract(
        state,
        rng,
        events,
        source,
        target,
        payload,
        stage,
        duration_rounds,
        tick_timing,
        Some(save),
    )?;
    Ok(Some(id))
}

/// Store an affliction at a known stage (the save has already been decided)
/// and apply the entry stage's effects.
#[allow(clippy::too_many_arguments)]
pub fn contract(
    state: &mut BattleState,
    rng: &mut RngState,
    events: &mut Vec<Event>,
    source: Option<UnitId>,
    target: UnitId,
    payload: Map<String, Value>,
    stage: u32,
    duration_rounds: Option<i32>,
    tick_timing: Option<TickTiming>,
    save: Option<crate::checks::CheckOutcome>,
) -> Result<EffectId, ReductionError> {
    let mut spec = AfflictionPayload::parse(&payload)?;
    spec.current_stage = stage;
    let duration = duration_rounds.or(spec.maximum_duration.as_ref().map(DurationSpec::to_rounds));

    let stage_detail = enter_stage(state, rng, &mut spec, &target, stage);

    let mut payload = payload;
    spec.write_into(&mut payload);

    let id = state.next_effect_id();
    state.effects.insert(
        id.clone(),
        Effect {
            id: id.clone(),
            kind: EffectKind::Affliction,
            source,
            target: Some(target.clone()),
            payload,
            duration_rounds: duration,
            tick_timing: tick_timing.or(Some(TickTiming::TurnEnd)),
        },
    );

    let mut event_payload = obj(json!({
        "effect_id": id.as_str(),
        "kind": "affliction",
        "target": target.as_str(),
        "name": spec.name,
        "save": save,
        "stage": stage,
        "duration_rounds": duration,
    }));
    event_payload.extend(stage_detail);
    emit_event(state, events, "effect_applied", event_payload);

    Ok(id)
}

/// Apply the effects of the stage being entered: conditions (respecting
/// immunities) and optional stage damage. Returns event detail.
fn enter_stage(
    state: &mut BattleState,
    rng: &mut RngState,
    spec: &mut AfflictionPayload,
    target: &UnitId,
    stage: u32,
) -> Map<String, Value> {
    let mut detail = Map::new();
    let Some(stage_spec) = spec.stage_spec(stage).cloned() else {
        return detail;
    };

    let mut applied = Vec::new();
    let mut skipped = Vec::new();
    if let Some(unit) = state.unit_mut(target) {
        for condition in &stage_spec.conditions {
            if conditions::is_immune(&condition.name, &unit.condition_immunities) {
                skipped.push(condition.name.clone());
                continue;
            }
            conditions::apply_condition(&mut unit.conditions, &condition.name, condition.value);
            let normalized = conditions::normalize_condition(&condition.name);
            if !spec.applied_conditions.contains(&normalized) {
                spec.applied_conditions.push(normalized.clone());
            }
            applied.push(normalized);
        }
    }
    if !applied.is_empty() {
        detail.insert("stage_conditions".into(), json!(applied));
    }
    if !skipped.is_empty() {
        detail.insert("stage_conditions_skipped".into(), json!(skipped));
    }

    if let Some(formula) = &stage_spec.damage {
        let raw = damage::roll_damage(rng, formula, 1.0).unwrap_or(0);
        if let Some(unit) = state.unit_mut(target) {
            let modifiers = damage::apply_modifiers(
                raw,
                "untyped",
                &unit.resistances,
                &unit.weaknesses,
                &unit.immunities,
                &[],
            );
            let pool = damage::damage_unit(unit, modifiers.applied);
            detail.insert("stage_damage".into(), json!(modifiers));
            detail.insert("stage_pool".into(), json!(pool));
        }
    }

    detail
}

/// Per-turn_end tick. Returns true when the affliction was removed (the
/// caller must not also age it).
pub fn tick(
    state: &mut BattleState,
    rng: &mut RngState,
    events: &mut Vec<Event>,
    id: &EffectId,
) -> bool {
    let Some(effect) = state.effects.get(id) else {
        return true;
    };
    let Some(target) = effect.target.clone() else {
        return false;
    };
    let Ok(mut spec) = AfflictionPayload::parse(&effect.payload) else {
        return false;
    };
    let Some(unit) = state.unit(&target) else {
        return false;
    };
    if !unit.alive() {
        return false;
    }

    let save = checks::resolve_save(rng, spec.save_type, unit, spec.dc);
    let previous_stage = spec.current_stage;
    let max = spec.max_stage();

    let new_stage = match save.degree {
        Degree::CriticalSuccess => 0,
        Degree::Success => previous_stage.saturating_sub(1),
        Degree::Failure => previous_stage,
        Degree::CriticalFailure => (previous_stage + 1).min(max),
    };

    if new_stage == 0 {
        let payload = obj(json!({
            "effect_id": id.as_str(),
            "kind": "affliction",
            "target": target.as_str(),
            "save": save,
            "previous_stage": previous_stage,
            "recovered": true,
        }));
        emit_event(state, events, "effect_tick", payload);
        crate::effects::expire_effect(state, events, id);
        return true;
    }

    let mut detail = Map::new();
    if new_stage != previous_stage {
        detail = enter_stage(state, rng, &mut spec, &target, new_stage);
    }
    spec.current_stage = new_stage;

    if let Some(effect) = state.effects.get_mut(id) {
        spec.write_into(&mut effect.payload);
    }

    let mut payload = obj(json!({
        "effect_id": id.as_str(),
        "kind": "affliction",
        "target": target.as_str(),
        "save": save,
        "previous_stage": previous_stage,
        "stage": new_stage,
    }));
    payload.append(&mut detail);
    emit_event(state, events, "effect_tick", payload);

    false
}

/// Clear the conditions this affliction installed, except those that
/// persist. Returns the cleared names.
pub fn clear_on_expiry(state: &mut BattleState, effect: &Effect, target: &UnitId) -> Vec<String> {
    let Ok(spec) = AfflictionPayload::parse(&effect.payload) else {
        return Vec::new();
    };
    let mut cleared = Vec::new();
    if let Some(unit) = state.unit_mut(target) {
        for name in &spec.applied_conditions {
            if spec
                .persistent_conditions
                .iter()
                .any(|p| conditions::normalize_condition(p) == *name)
            {
                continue;
            }
            if conditions::clear_condition(&mut unit.conditions, name) {
                cleared.push(name.clone());
            }
        }
    }
    cleared
}
