//! Battle construction — scenario materialization, objective-pack
//! expansion, reinforcement-wave compilation, and save restoration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use sk_types::ids::UnitId;
use sk_types::rng::RngState;
use sk_types::state::{BattleMap, BattleState, Unit};

use crate::scenario::{
    MissionEventDoc, ObjectiveDoc, ObjectiveKind, ObjectivePackDoc, ObjectivePackKind,
    ObjectiveResult, ScenarioDoc, ScenarioError, TriggerKind,
};
use crate::turn_order;

/// Assemble the initial battle state from a validated scenario.
pub fn battle_state_from_scenario(doc: &ScenarioDoc) -> BattleState {
    let units: BTreeMap<UnitId, Unit> = doc
        .units
        .iter()
        .map(|u| {
            let unit = u.to_unit();
            (unit.id.clone(), unit)
        })
        .collect();

    let blocked = doc
        .map
        .blocked
        .iter()
        .map(|&(x, y)| sk_types::grid::TilePos::new(x, y))
        .collect();
    let movement_cost = doc
        .map
        .movement_cost
        .iter()
        .filter_map(|(key, &cost)| {
            let (x, y) = key.split_once(',')?;
            Some((
                sk_types::grid::TilePos::new(x.trim().parse().ok()?, y.trim().parse().ok()?),
                cost,
            ))
        })
        .collect();

    let turn_order = turn_order::build(&units);
    BattleState {
        battle_id: doc.battle_id.clone(),
        seed: doc.seed,
        round_number: 1,
        turn_index: 0,
        turn_order,
        units,
        battle_map: BattleMap {
            width: doc.map.width,
            height: doc.map.height,
            blocked,
            movement_cost,
        },
        effects: BTreeMap::new(),
        flags: doc.flags.clone(),
        event_sequence: 0,
        effect_sequence: 0,
    }
}

/// Expand objective packs into atomic objectives, appended after the
/// scenario's own objectives.
pub fn expand_objectives(doc: &ScenarioDoc) -> Vec<ObjectiveDoc> {
    let mut objectives = doc.objectives.clone();
    for pack in &doc.objective_packs {
        objectives.extend(expand_pack(pack));
    }
    objectives
}

fn atomic(id: &str, kind: ObjectiveKind, result: ObjectiveResult) -> ObjectiveDoc {
    ObjectiveDoc {
        id: id.to_string(),
        kind,
        result,
        team: None,
        unit: None,
        x: None,
        y: None,
        flag: None,
        value: None,
        round: None,
    }
}

fn expand_pack(pack: &ObjectivePackDoc) -> Vec<ObjectiveDoc> {
    match pack.kind {
        ObjectivePackKind::EliminateTeam => {
            let mut obj = atomic(&pack.id, ObjectiveKind::TeamEliminated, ObjectiveResult::Victory);
            obj.team = pack.team.clone();
            vec![obj]
        }
        ObjectivePackKind::EscapeUnit => {
            let mut reach =
                atomic(&pack.id, ObjectiveKind::UnitReachTile, ObjectiveResult::Victory);
            reach.unit = pack.unit.clone();
            reach.x = pack.x;
            reach.y = pack.y;
            let mut out = vec![reach];
            if pack.defeat_on_death {
                let mut death = atomic(
                    &format!("{}_death", pack.id),
                    ObjectiveKind::UnitDead,
                    ObjectiveResult::Defeat,
                );
                death.unit = pack.unit.clone();
                out.push(death);
            }
            out
        }
        ObjectivePackKind::Holdout => {
            // "Survive round N" is satisfied once the round counter passes N.
            let mut hold =
                atomic(&pack.id, ObjectiveKind::RoundAtLeast, ObjectiveResult::Victory);
            hold.round = pack.round.map(|r| r + 1);
            let mut out = vec![hold];
            if let Some(team) = &pack.protect_team {
                let mut protect = atomic(
                    &format!("{}_protect", pack.id),
                    ObjectiveKind::TeamEliminated,
                    ObjectiveResult::Defeat,
                );
                protect.team = Some(team.clone());
                out.push(protect);
            }
            out
        }
    }
}

/// Compile reinforcement waves into round_start mission events appended
/// after the scenario's own mission events.
pub fn compile_reinforcements(doc: &ScenarioDoc) -> Vec<MissionEventDoc> {
    doc.reinforcement_waves
        .iter()
        .enumerate()
        .map(|(index, wave)| {
            let commands: Vec<Value> = wave
                .units
                .iter()
                .map(|unit| {
                    json!({
                        "type": "spawn_unit",
                        "unit": serde_json::to_value(unit.to_unit()).expect("unit serializes"),
                        "placement_policy": wave.placement_policy,
                    })
                })
                .collect();
            MissionEventDoc {
                id: wave
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("reinforcement_wave_{index}")),
                trigger: TriggerKind::RoundStart,
                unit: None,
                flag: None,
                value: None,
                round: Some(wave.round),
                start_round: None,
                end_round: None,
                active_unit: None,
                enabled_flag: None,
                disabled_flag: None,
                once: true,
                if_flag: None,
                if_flag_value: true,
                commands,
                then_commands: Vec::new(),
                else_commands: Vec::new(),
            }
        })
        .collect()
}

// =============================================================================
// Saved games
// =============================================================================

/// Opaque save blob: the scenario snapshot plus the RNG position. The core
/// reconstructs from (scenario, seed, skip_count).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedGame {
    pub scenario_url: String,
    pub scenario: Value,
    pub event_index: u64,
    pub seed: u32,
    pub rng_calls: u32,
}

/// Rebuild the initial state and the positioned RNG from a save.
pub fn restore(saved: &SavedGame) -> Result<(ScenarioDoc, BattleState, RngState), ScenarioError> {
    let doc = crate::scenario::validate_scenario(&saved.scenario.to_string())?;
    let state = battle_state_from_scenario(&doc);
    let rng = RngState::restore(saved.seed, saved.rng_calls);
    Ok((doc, state, rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::validate_scenario;
    use serde_json::json;

    fn scenario_json() -> Value {
        json!({
            "battle_id": "setup_test",
            "seed": 5,
            "map": {"width": 4, "height": 4, "blocked": [[0, 3]],
                    "movement_cost": {"2,2": 2}},
            "units": [
                {"id": "a", "team": "pc", "hp": 10, "position": [0, 0],
                 "initiative": 12, "attack_mod": 4, "ac": 15, "damage": "1d6"},
                {"id": "b", "team": "enemy", "hp": 8, "position": [3, 3],
                 "initiative": 18, "attack_mod": 3, "ac": 13, "damage": "1d4+1"}
            ],
            "flags": {"alarm": false}
        })
    }

    #[test]
    fn materialization_builds_order_and_flags() {
        let doc = validate_scenario(&scenario_json().to_string()).unwrap();
        let state = battle_state_from_scenario(&doc);
        assert_eq!(state.round_number, 1);
        assert_eq!(state.turn_index, 0);
        // b has higher initiative.
        assert_eq!(state.active_unit_id().as_str(), "b");
        assert_eq!(state.flags.get("alarm"), Some(&false));
        assert_eq!(state.event_sequence, 0);
        assert!(state.battle_map.is_blocked(sk_types::grid::TilePos::new(0, 3)));
        assert_eq!(
            state.battle_map.movement_cost(sk_types::grid::TilePos::new(2, 2)),
            2
        );
        let a = state.unit(&UnitId::from("a")).unwrap();
        assert_eq!(a.actions_remaining, 3);
        assert_eq!(a.max_hp, 10);
    }

    #[test]
    fn materialization_is_stable() {
        let doc = validate_scenario(&scenario_json().to_string()).unwrap();
        assert_eq!(battle_state_from_scenario(&doc), battle_state_from_scenario(&doc));
    }

    #[test]
    fn holdout_pack_expands_with_protection() {
        let mut v = scenario_json();
        v["objective_packs"] = json!([{
            "id": "hold", "type": "holdout", "round": 3, "protect_team": "pc"
        }]);
        let doc = validate_scenario(&v.to_string()).unwrap();
        let objectives = expand_objectives(&doc);
        assert_eq!(objectives.len(), 2);
        assert_eq!(objectives[0].kind, ObjectiveKind::RoundAtLeast);
        assert_eq!(objectives[0].round, Some(4));
        assert_eq!(objectives[0].result, ObjectiveResult::Victory);
        assert_eq!(objectives[1].kind, ObjectiveKind::TeamEliminated);
        assert_eq!(objectives[1].result, ObjectiveResult::Defeat);
        assert_eq!(objectives[1].team.as_deref(), Some("pc"));
    }

    #[test]
    fn escape_pack_defeat_on_death_default() {
        let mut v = scenario_json();
        v["objective_packs"] = json!([{
            "id": "run", "type": "escape_unit", "unit": "a", "x": 3, "y": 0
        }]);
        let doc = validate_scenario(&v.to_string()).unwrap();
        let objectives = expand_objectives(&doc);
        assert_eq!(objectives.len(), 2);
        assert_eq!(objectives[1].kind, ObjectiveKind::UnitDead);

        v["objective_packs"][0]["defeat_on_death"] = json!(false);
        let doc = validate_scenario(&v.to_string()).unwrap();
        assert_eq!(expand_objectives(&doc).len(), 1);
    }

    #[test]
    fn waves_compile_to_round_start_missions() {
        let mut v = scenario_json();
        v["reinforcement_waves"] = json!([{
            "round": 2,
            "units": [{"id": "w1", "team": "enemy", "hp": 6, "position": [2, 0],
                       "initiative": 9, "attack_mod": 2, "ac": 12, "damage": "1d4"}]
        }]);
        let doc = validate_scenario(&v.to_string()).unwrap();
        let missions = compile_reinforcements(&doc);
        assert_eq!(missions.len(), 1);
        let m = &missions[0];
        assert_eq!(m.trigger, TriggerKind::RoundStart);
        assert_eq!(m.round, Some(2));
        assert!(m.once);
        assert_eq!(m.commands.len(), 1);
        assert_eq!(m.commands[0]["type"], json!("spawn_unit"));
    }

    #[test]
    fn save_round_trips() {
        let saved = SavedGame {
            scenario_url: "scenarios/setup_test.json".to_string(),
            scenario: scenario_json(),
            event_index: 12,
            seed: 5,
            rng_calls: 40,
        };
        let (doc, state, rng) = restore(&saved).unwrap();
        assert_eq!(doc.battle_id, "setup_test");
        assert_eq!(state.seed, 5);
        assert_eq!(rng.call_count, 40);

        let text = serde_json::to_string(&saved).unwrap();
        let back: SavedGame = serde_json::from_str(&text).unwrap();
        assert_eq!(back, saved);
    }
}
