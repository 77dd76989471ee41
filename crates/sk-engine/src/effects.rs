//! Effect store lifecycle — instantiation, turn-boundary ticks, expiry.
//!
//! Effects are keyed by zero-padded ordinal ids, so BTreeMap order equals
//! insertion order and `process_timing` iterates deterministically. An
//! effect's owned temp HP is released when the effect is removed; unowned
//! temp HP survives independently.

use serde_json::{json, Map, Value};

use sk_types::event::Event;
use sk_types::ids::{EffectId, UnitId};
use sk_types::rng::RngState;
use sk_types::state::{BattleState, Effect, EffectKind, TickTiming, Unit};

use crate::affliction;
use crate::conditions;
use crate::damage;
use crate::reducer::ReductionError;
use crate::turn_order;

/// Unwrap a `json!` object literal into a payload map.
pub(crate) fn obj(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => unreachable!("event payloads are always object literals"),
    }
}

/// Append a reducer event, pre-incrementing the state's event sequence.
pub(crate) fn emit_event(
    state: &mut BattleState,
    events: &mut Vec<Event>,
    event_type: &str,
    payload: Map<String, Value>,
) {
    state.event_sequence += 1;
    events.push(Event {
        event_id: Event::sequence_id(state.event_sequence),
        round: state.round_number,
        active_unit: state.active_unit_id().clone(),
        event_type: event_type.to_string(),
        payload,
    });
}

/// Instantiate an effect and run its kind-specific `on_apply`.
///
/// Returns the stored effect id, or `None` when nothing was stored (an
/// affliction whose entry save succeeded).
pub fn apply_new_effect(
    state: &mut BattleState,
    rng: &mut RngState,
    events: &mut Vec<Event>,
    kind: EffectKind,
    source: Option<UnitId>,
    target: UnitId,
    mut payload: Map<String, Value>,
    duration_rounds: Option<i32>,
    tick_timing: Option<TickTiming>,
) -> Result<Option<EffectId>, ReductionError> {
    if state.unit(&target).is_none() {
        return Err(ReductionError::UnknownUnit(target));
    }

    let mut detail = Map::new();

    match kind {
        EffectKind::Condition => {
            let name = payload
                .get("condition")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ReductionError::BadEffectPayload("condition effect needs a condition name".into())
                })?
                .to_string();
            let value = payload.get("value").and_then(Value::as_u64).unwrap_or(1) as u32;
            let unit = state.unit_mut(&target).expect("target checked above");
            if conditions::is_immune(&name, &unit.condition_immunities) {
                detail.insert("condition_skipped".into(), json!(name));
            } else {
                let stored = conditions::apply_condition(&mut unit.conditions, &name, value);
                payload.insert(
                    "applied_condition".into(),
                    json!(conditions::normalize_condition(&name)),
                );
                detail.insert("condition_applied".into(), json!(name));
                detail.insert("condition_value".into(), json!(stored));
            }
        }

        EffectKind::TempHp => {
            let amount = payload.get("amount").and_then(Value::as_i64).unwrap_or(0) as i32;
            if amount <= 0 {
                return Err(ReductionError::BadEffectPayload(
                    "temp_hp effect needs a positive amount".into(),
                ));
            }
            let label = payload
                .get("source")
                .and_then(Value::as_str)
                .unwrap_or("effect")
                .to_string();
            let next_id = peek_effect_id(state);
            let unit = state.unit_mut(&target).expect("target checked above");
            // Temp HP does not stack; a smaller grant leaves the pool alone.
            if amount > unit.temp_hp {
                unit.temp_hp = amount;
                unit.temp_hp_source = Some(label.clone());
                unit.temp_hp_owner_effect = Some(next_id);
                detail.insert("temp_hp".into(), json!(amount));
                detail.insert("temp_hp_source".into(), json!(label));
            } else {
                detail.insert("temp_hp_kept_existing".into(), json!(unit.temp_hp));
            }
        }

        EffectKind::PersistentDamage => {
            let formula = payload
                .get("formula")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ReductionError::BadEffectPayload("persistent_damage effect needs a formula".into())
                })?;
            damage::DamageFormula::parse(formula)
                .map_err(|e| ReductionError::BadEffectPayload(e.to_string()))?;
            detail.insert("formula".into(), json!(formula));
        }

        EffectKind::Affliction => {
            return affliction::apply_entry(
                state,
                rng,
                events,
                source,
                target,
                payload,
                duration_rounds,
                tick_timing,
            );
        }

        EffectKind::Summon => {
            let unit_value = payload.get("unit").cloned().ok_or_else(|| {
                ReductionError::BadEffectPayload("summon effect needs a unit spec".into())
            })?;
            let unit: Unit = serde_json::from_value(unit_value)
                .map_err(|e| ReductionError::BadEffectPayload(format!("summon unit: {e}")))?;
            if state.units.contains_key(&unit.id) {
                return Err(ReductionError::DuplicateUnit(unit.id));
            }
            let placed = crate::reducer::nearest_open_tile(state, unit.position)
                .ok_or(ReductionError::NoOpenTile {
                    x: unit.position.x,
                    y: unit.position.y,
                })?;
            let mut unit = unit;
            unit.position = placed;
            let summoned = unit.id.clone();
            state.units.insert(summoned.clone(), unit);
            turn_order::rebuild_preserving_active(state);
            payload.insert("summoned_unit".into(), json!(summoned.as_str()));
            detail.insert("summoned_unit".into(), json!(summoned.as_str()));
            detail.insert("position".into(), json!([placed.x, placed.y]));
        }
    }

    let id = state.next_effect_id();
    state.effects.insert(
        id.clone(),
        Effect {
            id: id.clone(),
            kind,
            source,
            target: Some(target.clone()),
            payload,
            duration_rounds,
            tick_timing,
        },
    );

    let mut event_payload = obj(json!({
        "effect_id": id.as_str(),
        "kind": kind,
        "target": target.as_str(),
        "duration_rounds": duration_rounds,
        "tick_timing": tick_timing,
    }));
    event_payload.append(&mut detail);
    emit_event(state, events, "effect_applied", event_payload);

    Ok(Some(id))
}

/// The id the next instantiated effect will get, without allocating it.
fn peek_effect_id(state: &BattleState) -> EffectId {
    EffectId::from(format!("eff_{:04}", state.effect_sequence + 1))
}

/// When an effect participates in turn-boundary processing, and at which
/// boundary. Effects with a duration but no explicit timing age at turn_end.
fn effective_timing(effect: &Effect) -> Option<TickTiming> {
    effect
        .tick_timing
        .or(effect.duration_rounds.map(|_| TickTiming::TurnEnd))
}

/// Run all effects whose timing matches `when` and whose target is the
/// active unit, in insertion order: kind-specific tick, then duration
/// decrement, then expiry.
pub fn process_timing(
    state: &mut BattleState,
    rng: &mut RngState,
    events: &mut Vec<Event>,
    when: TickTiming,
) {
    let active = state.active_unit_id().clone();
    let ids: Vec<EffectId> = state.effects.keys().cloned().collect();

    for id in ids {
        let Some(effect) = state.effects.get(&id) else {
            continue; // removed by an earlier tick this pass
        };
        if effect.target.as_ref() != Some(&active) || effective_timing(effect) != Some(when) {
            continue;
        }

        let kind = effect.kind;
        let mut removed = false;
        match kind {
            EffectKind::PersistentDamage => tick_persistent_damage(state, rng, events, &id),
            EffectKind::Affliction => {
                removed = affliction::tick(state, rng, events, &id);
            }
            EffectKind::Condition | EffectKind::TempHp | EffectKind::Summon => {}
        }
        if removed {
            continue;
        }

        if let Some(effect) = state.effects.get_mut(&id) {
            if let Some(duration) = effect.duration_rounds.as_mut() {
                *duration -= 1;
                if *duration <= 0 {
                    expire_effect(state, events, &id);
                }
            }
        }
    }
}

fn tick_persistent_damage(
    state: &mut BattleState,
    rng: &mut RngState,
    events: &mut Vec<Event>,
    id: &EffectId,
) {
    let effect = state.effects.get(id).expect("caller checked presence");
    let target_id = effect.target.clone().expect("persistent damage has a target");
    let formula = effect
        .payload
        .get("formula")
        .and_then(Value::as_str)
        .unwrap_or("0")
        .to_string();
    let damage_type = effect
        .payload
        .get("damage_type")
        .and_then(Value::as_str)
        .unwrap_or("untyped")
        .to_string();
    let bypass: Vec<String> = effect
        .payload
        .get("bypass")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let Some(target) = state.unit(&target_id) else {
        return;
    };
    if !target.alive() {
        return;
    }

    // Formula validity is checked at apply time.
    let raw = damage::roll_damage(rng, &formula, 1.0).unwrap_or(0);
    let applied = damage::apply_modifiers(
        raw,
        &damage_type,
        &target.resistances,
        &target.weaknesses,
        &target.immunities,
        &bypass,
    );
    let target_mut = state.unit_mut(&target_id).expect("target exists");
    let pool = damage::damage_unit(target_mut, applied.applied);

    let payload = obj(json!({
        "effect_id": id.as_str(),
        "kind": "persistent_damage",
        "target": target_id.as_str(),
        "formula": formula,
        "damage_type": damage_type,
        "damage": applied,
        "pool": pool,
    }));
    emit_event(state, events, "effect_tick", payload);
}

/// Remove an effect and run its `on_expire`.
pub fn expire_effect(state: &mut BattleState, events: &mut Vec<Event>, id: &EffectId) {
    let Some(effect) = state.effects.remove(id) else {
        return;
    };
    let mut detail = Map::new();

    if let Some(target_id) = effect.target.clone() {
        match effect.kind {
            EffectKind::Condition => {
                if let Some(name) = effect.payload.get("applied_condition").and_then(Value::as_str)
                {
                    if let Some(unit) = state.unit_mut(&target_id) {
                        if conditions::clear_condition(&mut unit.conditions, name) {
                            detail.insert("cleared_condition".into(), json!(name));
                        }
                    }
                }
            }
            EffectKind::TempHp => {
                if let Some(unit) = state.unit_mut(&target_id) {
                    if unit.temp_hp_owner_effect.as_ref() == Some(id) {
                        detail.insert("released_temp_hp".into(), json!(unit.temp_hp));
                        unit.temp_hp = 0;
                        unit.temp_hp_source = None;
                        unit.temp_hp_owner_effect = None;
                    }
                }
            }
            EffectKind::Affliction => {
                let cleared = affliction::clear_on_expiry(state, &effect, &target_id);
                detail.insert("cleared_conditions".into(), json!(cleared));
                if let Some(persistent) = effect.payload.get("persistent_conditions") {
                    detail.insert("persistent_conditions".into(), persistent.clone());
                }
            }
            EffectKind::Summon => {
                if let Some(summoned) = effect.payload.get("summoned_unit").and_then(Value::as_str)
                {
                    let summoned = UnitId::from(summoned);
                    if let Some(unit) = state.unit_mut(&summoned) {
                        unit.hp = 0;
                        unit.conditions.entry("unconscious".to_string()).or_insert(1);
                        detail.insert("dismissed_unit".into(), json!(summoned.as_str()));
                    }
                }
            }
            EffectKind::PersistentDamage => {}
        }
    }

    let mut payload = obj(json!({
        "effect_id": id.as_str(),
        "kind": effect.kind,
        "target": effect.target.as_ref().map(|t| t.as_str()),
    }));
    payload.append(&mut detail);
    emit_event(state, events, "effect_expired", payload);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;

    #[test]
    fn condition_effect_applies_and_expires() {
        let (mut state, mut rng) = testkit::two_unit_state(101);
        let mut events = Vec::new();
        let id = apply_new_effect(
            &mut state,
            &mut rng,
            &mut events,
            EffectKind::Condition,
            None,
            UnitId::from("enemy"),
            obj(json!({"condition": "frightened", "value": 2})),
            Some(1),
            Some(TickTiming::TurnEnd),
        )
        .unwrap()
        .unwrap();
        assert_eq!(id.as_str(), "eff_0001");
        assert_eq!(
            state.unit(&UnitId::from("enemy")).unwrap().conditions.get("frightened"),
            Some(&2)
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "effect_applied");

        expire_effect(&mut state, &mut events, &id);
        assert!(state
            .unit(&UnitId::from("enemy"))
            .unwrap()
            .conditions
            .get("frightened")
            .is_none());
        assert!(state.effects.is_empty());
        assert_eq!(events.last().unwrap().event_type, "effect_expired");
    }

    #[test]
    fn condition_immunity_skips_write() {
        let (mut state, mut rng) = testkit::two_unit_state(101);
        state
            .unit_mut(&UnitId::from("enemy"))
            .unwrap()
            .condition_immunities
            .push("frightened".to_string());
        let mut events = Vec::new();
        apply_new_effect(
            &mut state,
            &mut rng,
            &mut events,
            EffectKind::Condition,
            None,
            UnitId::from("enemy"),
            obj(json!({"condition": "frightened"})),
            None,
            None,
        )
        .unwrap();
        assert!(state
            .unit(&UnitId::from("enemy"))
            .unwrap()
            .conditions
            .is_empty());
        assert_eq!(events[0].payload["condition_skipped"], json!("frightened"));
    }

    #[test]
    fn temp_hp_owned_and_released() {
        let (mut state, mut rng) = testkit::two_unit_state(101);
        let mut events = Vec::new();
        let id = apply_new_effect(
            &mut state,
            &mut rng,
            &mut events,
            EffectKind::TempHp,
            None,
            UnitId::from("pc"),
            obj(json!({"amount": 6, "source": "ward"})),
            Some(3),
            None,
        )
        .unwrap()
        .unwrap();
        let pc = state.unit(&UnitId::from("pc")).unwrap();
        assert_eq!(pc.temp_hp, 6);
        assert_eq!(pc.temp_hp_source.as_deref(), Some("ward"));
        assert_eq!(pc.temp_hp_owner_effect, Some(id.clone()));

        expire_effect(&mut state, &mut events, &id);
        let pc = state.unit(&UnitId::from("pc")).unwrap();
        assert_eq!(pc.temp_hp, 0);
        assert!(pc.temp_hp_source.is_none());
    }

    #[test]
    fn smaller_temp_hp_grant_keeps_pool() {
        let (mut state, mut rng) = testkit::two_unit_state(101);
        {
            let pc = state.unit_mut(&UnitId::from("pc")).unwrap();
            pc.temp_hp = 10;
            pc.temp_hp_source = Some("older ward".to_string());
        }
        let mut events = Vec::new();
        let id = apply_new_effect(
            &mut state,
            &mut rng,
            &mut events,
            EffectKind::TempHp,
            None,
            UnitId::from("pc"),
            obj(json!({"amount": 4, "source": "ward"})),
            None,
            None,
        )
        .unwrap()
        .unwrap();
        let pc = state.unit(&UnitId::from("pc")).unwrap();
        assert_eq!(pc.temp_hp, 10);
        assert_eq!(pc.temp_hp_source.as_deref(), Some("older ward"));
        assert!(pc.temp_hp_owner_effect.is_none());

        // Expiring the new effect must not release the unowned pool.
        expire_effect(&mut state, &mut events, &id);
        assert_eq!(state.unit(&UnitId::from("pc")).unwrap().temp_hp, 10);
    }

    #[test]
    fn persistent_damage_ticks_and_ages_out() {
        let (mut state, mut rng) = testkit::two_unit_state(101);
        let mut events = Vec::new();
        apply_new_effect(
            &mut state,
            &mut rng,
            &mut events,
            EffectKind::PersistentDamage,
            None,
            UnitId::from("pc"),
            obj(json!({"formula": "4", "damage_type": "fire"})),
            Some(2),
            Some(TickTiming::TurnEnd),
        )
        .unwrap();
        let hp_before = state.unit(&UnitId::from("pc")).unwrap().hp;

        // pc is the active unit in the fixture.
        process_timing(&mut state, &mut rng, &mut events, TickTiming::TurnEnd);
        assert_eq!(state.unit(&UnitId::from("pc")).unwrap().hp, hp_before - 4);
        assert!(events.iter().any(|e| e.event_type == "effect_tick"));
        assert_eq!(state.effects.len(), 1);

        process_timing(&mut state, &mut rng, &mut events, TickTiming::TurnEnd);
        assert_eq!(state.unit(&UnitId::from("pc")).unwrap().hp, hp_before - 8);
        assert!(state.effects.is_empty(), "duration 2 expires after two ticks");
        assert_eq!(events.last().unwrap().event_type, "effect_expired");
    }

    #[test]
    fn ticks_only_touch_active_unit() {
        let (mut state, mut rng) = testkit::two_unit_state(101);
        let mut events = Vec::new();
        apply_new_effect(
            &mut state,
            &mut rng,
            &mut events,
            EffectKind::PersistentDamage,
            None,
            UnitId::from("enemy"),
            obj(json!({"formula": "3"})),
            None,
            Some(TickTiming::TurnEnd),
        )
        .unwrap();
        let hp_before = state.unit(&UnitId::from("enemy")).unwrap().hp;
        process_timing(&mut state, &mut rng, &mut events, TickTiming::TurnEnd);
        assert_eq!(
            state.unit(&UnitId::from("enemy")).unwrap().hp,
            hp_before,
            "effect on the inactive unit must not tick"
        );
    }

    #[test]
    fn event_sequence_tracks_emissions() {
        let (mut state, mut rng) = testkit::two_unit_state(101);
        let mut events = Vec::new();
        apply_new_effect(
            &mut state,
            &mut rng,
            &mut events,
            EffectKind::Condition,
            None,
            UnitId::from("pc"),
            obj(json!({"condition": "prone"})),
            None,
            None,
        )
        .unwrap();
        assert_eq!(state.event_sequence, events.len() as u64);
        assert_eq!(events[0].event_id, "ev_000001");
    }
}
