//! Modeled effect application — the pipeline behind hazard sources.
//!
//! For each target: an affliction descriptor dominates the outcome; failing
//! that a save_check gates damage and secondary conditions; lethality and
//! movement descriptors add special flags. One resolution record is
//! returned per target.

use serde_json::{json, Map, Value};

use sk_data::effect_model::{ModeledEffect, ModeledSource};
use sk_types::command::SaveMode;
use sk_types::event::Event;
use sk_types::ids::UnitId;
use sk_types::rng::RngState;
use sk_types::state::{BattleState, TickTiming};

use crate::affliction;
use crate::checks::{self, basic_save_multiplier, Degree};
use crate::conditions;
use crate::damage;
use crate::effects::obj;

/// Damage multiplier for a save mode and degree.
pub fn mode_multiplier(mode: SaveMode, degree: Degree) -> f64 {
    match mode {
        SaveMode::Basic => basic_save_multiplier(degree),
        SaveMode::Negates => {
            if degree.is_failure() {
                1.0
            } else {
                0.0
            }
        }
        SaveMode::Standard => 1.0,
    }
}

/// Apply a source's modeled effects to one target. Lifecycle events (created
/// afflictions) are emitted; the returned map is the resolution record.
pub fn apply_modeled_effects(
    state: &mut BattleState,
    rng: &mut RngState,
    events: &mut Vec<Event>,
    actor: &UnitId,
    target: &UnitId,
    source: &ModeledSource,
) -> Map<String, Value> {
    let mut resolution = obj(json!({ "target": target.as_str() }));
    let mut special_flags: Vec<&str> = Vec::new();

    let save_check = source.effects.iter().find_map(|e| match e {
        ModeledEffect::SaveCheck {
            save_type,
            dc,
            mode,
        } => Some((*save_type, *dc, *mode)),
        _ => None,
    });

    let affliction_spec = source.effects.iter().find_map(|e| match e {
        ModeledEffect::Affliction {
            name,
            save_type,
            dc,
            maximum_duration,
            stages,
        } => Some((
            name.clone(),
            *save_type,
            *dc,
            maximum_duration.clone(),
            stages.clone(),
        )),
        _ => None,
    });

    // Outcome of the save step: damage multiplier plus whether secondary
    // conditions land.
    let (multiplier, secondary) = if let Some((name, save_type, dc, max_duration, stages)) =
        affliction_spec
    {
        // The affliction save, falling back to the save_check spec.
        let resolved = save_type
            .zip(dc)
            .or_else(|| save_check.map(|(st, dc, _)| (st, dc)));
        match resolved {
            None => {
                resolution.insert("affliction_skipped".into(), json!("no save spec"));
                (1.0, true)
            }
            Some((save_type, dc)) => {
                let Some(unit) = state.unit(target) else {
                    return resolution;
                };
                let save = checks::resolve_save(rng, save_type, unit, dc);
                resolution.insert("save".into(), json!(save));

                let stage = match save.degree {
                    Degree::Failure => Some(1u32),
                    Degree::CriticalFailure => Some(2),
                    _ => None,
                };
                match stage {
                    None => {
                        resolution.insert("affliction".into(), json!({"contracted": false}));
                        (0.0, false)
                    }
                    Some(stage) => {
                        let payload = obj(json!({
                            "name": name,
                            "save_type": save_type,
                            "dc": dc,
                            "maximum_duration": max_duration,
                            "stages": stages,
                            "persistent_conditions": source.persistent_conditions,
                        }));
                        let max_stage = stages.iter().map(|s| s.stage).max().unwrap_or(1);
                        let stage = stage.min(max_stage);
                        match affliction::contract(
                            state,
                            rng,
                            events,
                            Some(actor.clone()),
                            target.clone(),
                            payload,
                            stage,
                            None,
                            Some(TickTiming::TurnEnd),
                            Some(save),
                        ) {
                            Ok(id) => {
                                resolution.insert(
                                    "affliction".into(),
                                    json!({
                                        "contracted": true,
                                        "effect_id": id.as_str(),
                                        "stage": stage,
                                    }),
                                );
                            }
                            Err(err) => {
                                resolution
                                    .insert("affliction_error".into(), json!(err.to_string()));
                            }
                        }
                        (1.0, true)
                    }
                }
            }
        }
    } else if let Some((save_type, dc, mode)) = save_check {
        let Some(unit) = state.unit(target) else {
            return resolution;
        };
        let save = checks::resolve_save(rng, save_type, unit, dc);
        let multiplier = mode_multiplier(mode, save.degree);
        let secondary = save.degree.is_failure();
        resolution.insert("save".into(), json!(save));
        resolution.insert("multiplier".into(), json!(multiplier));
        (multiplier, secondary)
    } else {
        (1.0, true)
    };

    for effect in &source.effects {
        match effect {
            ModeledEffect::Damage {
                formula,
                damage_type,
                bypass,
            } => {
                let raw = damage::roll_damage(rng, formula, multiplier).unwrap_or(0);
                let damage_type = damage_type.as_deref().unwrap_or("untyped");
                let Some(unit) = state.unit(target) else {
                    continue;
                };
                let applied = damage::apply_modifiers(
                    raw,
                    damage_type,
                    &unit.resistances,
                    &unit.weaknesses,
                    &unit.immunities,
                    bypass,
                );
                let unit = state.unit_mut(target).expect("target exists");
                let pool = damage::damage_unit(unit, applied.applied);
                resolution.insert("damage".into(), json!(applied));
                resolution.insert("pool".into(), json!(pool));
            }

            ModeledEffect::ApplyCondition { condition, value } => {
                if !secondary {
                    continue;
                }
                let Some(unit) = state.unit_mut(target) else {
                    continue;
                };
                let entry = if conditions::is_immune(condition, &unit.condition_immunities) {
                    ("conditions_skipped", condition)
                } else {
                    conditions::apply_condition(&mut unit.conditions, condition, *value);
                    ("conditions_applied", condition)
                };
                push_string(&mut resolution, entry.0, entry.1);
            }

            ModeledEffect::InstantDeath | ModeledEffect::SpecialLethality => {
                if let Some(unit) = state.unit_mut(target) {
                    unit.hp = 0;
                    unit.conditions.entry("unconscious".to_string()).or_insert(1);
                }
                special_flags.push(match effect {
                    ModeledEffect::InstantDeath => "instant_death",
                    _ => "special_lethality",
                });
            }

            ModeledEffect::Transform { .. } => special_flags.push("transform"),
            ModeledEffect::Teleport { .. } => special_flags.push("teleport"),

            ModeledEffect::Affliction { .. }
            | ModeledEffect::SaveCheck { .. }
            | ModeledEffect::Area { .. }
            | ModeledEffect::Other(_) => {}
        }
    }

    if !special_flags.is_empty() {
        resolution.insert("special_flags".into(), json!(special_flags));
    }
    resolution
}

fn push_string(map: &mut Map<String, Value>, key: &str, value: &str) {
    match map.get_mut(key) {
        Some(Value::Array(list)) => list.push(json!(value)),
        _ => {
            map.insert(key.to_string(), json!([value]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;
    use sk_data::effect_model::EffectModelCatalog;
    use serde_json::json;

    fn source_from(effects: Vec<Value>, raw_text: &str) -> ModeledSource {
        let doc = json!({
            "hazards": {"entries": [{
                "hazard_id": "h1",
                "hazard_name": "Test Hazard",
                "sources": [{
                    "source_type": "trigger_action",
                    "source_name": "s1",
                    "raw_text": raw_text,
                    "effects": effects,
                }]
            }]}
        });
        EffectModelCatalog::from_json(&doc.to_string())
            .unwrap()
            .lookup("h1", "s1", "trigger_action")
            .cloned()
            .unwrap()
    }

    #[test]
    fn save_check_gates_conditions() {
        let source = source_from(
            vec![
                json!({"event": "save_check", "save_type": "reflex", "dc": 30}),
                json!({"event": "apply_condition", "condition": "prone"}),
            ],
            "",
        );
        // DC 30 with +0 reflex: only a nat 20 avoids failure. Find a seed
        // that fails outright.
        let (mut state, mut rng) = testkit::two_unit_state(3);
        let mut events = Vec::new();
        let resolution = apply_modeled_effects(
            &mut state,
            &mut rng,
            &mut events,
            &UnitId::from("pc"),
            &UnitId::from("enemy"),
            &source,
        );
        let save = resolution.get("save").unwrap();
        let degree = save["degree"].as_str().unwrap();
        if degree == "failure" || degree == "critical_failure" {
            assert_eq!(resolution["conditions_applied"], json!(["prone"]));
            assert_eq!(
                state.unit(&UnitId::from("enemy")).unwrap().conditions.get("prone"),
                Some(&1)
            );
        } else {
            assert!(resolution.get("conditions_applied").is_none());
        }
    }

    #[test]
    fn damage_without_save_is_full() {
        let source = source_from(vec![json!({"event": "damage", "formula": "5"})], "");
        let (mut state, mut rng) = testkit::two_unit_state(1);
        let mut events = Vec::new();
        let resolution = apply_modeled_effects(
            &mut state,
            &mut rng,
            &mut events,
            &UnitId::from("pc"),
            &UnitId::from("enemy"),
            &source,
        );
        assert_eq!(resolution["damage"]["applied"], json!(5));
        assert_eq!(state.unit(&UnitId::from("enemy")).unwrap().hp, 15);
    }

    #[test]
    fn instant_death_flags_and_kills() {
        let source = source_from(vec![json!({"event": "instant_death"})], "");
        let (mut state, mut rng) = testkit::two_unit_state(1);
        let mut events = Vec::new();
        let resolution = apply_modeled_effects(
            &mut state,
            &mut rng,
            &mut events,
            &UnitId::from("pc"),
            &UnitId::from("enemy"),
            &source,
        );
        assert_eq!(resolution["special_flags"], json!(["instant_death"]));
        let enemy = state.unit(&UnitId::from("enemy")).unwrap();
        assert_eq!(enemy.hp, 0);
        assert_eq!(enemy.conditions.get("unconscious"), Some(&1));
    }

    #[test]
    fn affliction_dominates_and_carries_persistence() {
        let source = source_from(
            vec![json!({
                "event": "affliction",
                "name": "fever",
                "save_type": "fortitude",
                "dc": 40,
                "maximum_duration": {"amount": 4, "unit": "round"},
                "stages": [{"stage": 1, "conditions": [{"name": "sickened", "value": 1}]}],
            })],
            "Any sickened condition persists after recovery.",
        );
        // DC 40 with +0 fortitude: every roll is a critical failure except
        // nat 20 (lifted one step to failure). Either way it contracts.
        let (mut state, mut rng) = testkit::two_unit_state(9);
        let mut events = Vec::new();
        let resolution = apply_modeled_effects(
            &mut state,
            &mut rng,
            &mut events,
            &UnitId::from("pc"),
            &UnitId::from("enemy"),
            &source,
        );
        assert_eq!(resolution["affliction"]["contracted"], json!(true));
        assert_eq!(state.effects.len(), 1);
        let effect = state.effects.values().next().unwrap();
        assert_eq!(
            effect.payload["persistent_conditions"],
            json!(["sickened"])
        );
        assert_eq!(effect.tick_timing, Some(TickTiming::TurnEnd));
        assert_eq!(effect.duration_rounds, Some(4));
    }

    #[test]
    fn mode_multipliers() {
        assert_eq!(mode_multiplier(SaveMode::Basic, Degree::Success), 0.5);
        assert_eq!(mode_multiplier(SaveMode::Negates, Degree::Success), 0.0);
        assert_eq!(mode_multiplier(SaveMode::Negates, Degree::Failure), 1.0);
        assert_eq!(mode_multiplier(SaveMode::Standard, Degree::CriticalSuccess), 1.0);
    }
}
