//! Enemy policy — the scripted-AI fallback once the command script runs dry.
//!
//! Decisions are pure functions of the state: strike the nearest reachable
//! enemy, step toward one, cast or self-target a content entry, or end the
//! turn. The orchestrator executes the decision and handles retries.

use serde_json::{json, Value};

use sk_types::command::Command;
use sk_types::grid::TilePos;
use sk_types::ids::{EntryId, UnitId};
use sk_types::state::BattleState;

use crate::line_of_effect::has_tile_line_of_effect;
use crate::scenario::{EnemyPolicyDoc, PolicyAction};

/// A policy decision ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDecision {
    pub command: Command,
    pub rationale: Option<Value>,
}

impl PolicyDecision {
    fn end_turn(state: &BattleState, reason: &str, include_rationale: bool) -> Self {
        let actor = state.active_unit_id().clone();
        Self {
            command: Command::EndTurn { actor },
            rationale: include_rationale.then(|| json!({ "fallback": reason })),
        }
    }
}

/// Decide the active unit's command under the given policy.
pub fn decide(state: &BattleState, policy: &EnemyPolicyDoc) -> PolicyDecision {
    let actor = state.active_unit_id().clone();
    let rationale = policy.include_rationale;

    let Some(actor_unit) = state.unit(&actor) else {
        return PolicyDecision::end_turn(state, "active unit missing", rationale);
    };
    if !actor_unit.alive() {
        return PolicyDecision::end_turn(state, "active unit dead", rationale);
    }
    if !policy.teams.is_empty() && !policy.teams.contains(&actor_unit.team) {
        return PolicyDecision::end_turn(state, "team not covered by policy", rationale);
    }

    match policy.action {
        PolicyAction::StrikeNearest => strike_nearest(state, &actor, rationale),
        PolicyAction::CastSpellEntryNearest => cast_entry_nearest(state, &actor, policy),
        PolicyAction::UseFeatEntrySelf => entry_self(state, &actor, policy, "use_feat"),
        PolicyAction::UseItemEntrySelf => entry_self(state, &actor, policy, "use_item"),
        PolicyAction::InteractEntrySelf => entry_self(state, &actor, policy, "interact"),
    }
}

/// Living opponents of a unit, ordered by (Chebyshev distance, id).
fn enemies_by_distance(state: &BattleState, actor: &UnitId) -> Vec<UnitId> {
    let Some(actor_unit) = state.unit(actor) else {
        return Vec::new();
    };
    let mut enemies: Vec<&sk_types::state::Unit> = state
        .units
        .values()
        .filter(|u| u.alive() && u.team != actor_unit.team && u.id != *actor)
        .collect();
    enemies.sort_by_key(|u| (actor_unit.position.chebyshev(u.position), u.id.clone()));
    enemies.into_iter().map(|u| u.id.clone()).collect()
}

fn strike_nearest(state: &BattleState, actor: &UnitId, rationale: bool) -> PolicyDecision {
    let actor_unit = state.unit(actor).expect("caller checked");
    let actor_pos = actor_unit.position;
    let reach = actor_unit.reach;

    let enemies = enemies_by_distance(state, actor);
    if enemies.is_empty() {
        return PolicyDecision::end_turn(state, "no living enemies", rationale);
    }

    // Nearest enemy we can actually hit: in reach, with line of sight.
    let strikeable = enemies.iter().find(|id| {
        let unit = state.unit(id).expect("enumerated above");
        actor_pos.chebyshev(unit.position) <= reach
            && has_tile_line_of_effect(&state.battle_map, actor_pos, unit.position)
    });
    if let Some(target) = strikeable {
        let distance = actor_pos.chebyshev(state.unit(target).unwrap().position);
        return PolicyDecision {
            command: Command::Strike {
                actor: actor.clone(),
                target: target.clone(),
                emit_forecast: false,
            },
            rationale: rationale.then(|| {
                json!({
                    "action": "strike_nearest",
                    "target": target.as_str(),
                    "distance": distance,
                    "considered": enemies.iter().map(|e| e.as_str()).collect::<Vec<_>>(),
                })
            }),
        };
    }

    // Otherwise close the gap by one tile toward the nearest enemy.
    let nearest = &enemies[0];
    let goal = state.unit(nearest).expect("enumerated above").position;
    match step_toward(state, actor_pos, goal) {
        Some(step) => PolicyDecision {
            command: Command::Move {
                actor: actor.clone(),
                x: step.x,
                y: step.y,
            },
            rationale: rationale.then(|| {
                json!({
                    "action": "strike_nearest",
                    "approaching": nearest.as_str(),
                    "step": [step.x, step.y],
                })
            }),
        },
        None => PolicyDecision::end_turn(state, "no useful step toward an enemy", rationale),
    }
}

/// The passable orthogonal neighbor that most reduces Manhattan distance to
/// the goal; ties prefer lower y then lower x. None when no step reduces it.
fn step_toward(state: &BattleState, from: TilePos, goal: TilePos) -> Option<TilePos> {
    let current = from.manhattan(goal);
    from.neighbors4()
        .into_iter()
        .filter(|&pos| state.is_passable(pos))
        .map(|pos| (pos.manhattan(goal), pos.y, pos.x, pos))
        .filter(|&(dist, _, _, _)| dist < current)
        .min()
        .map(|(_, _, _, pos)| pos)
}

fn cast_entry_nearest(
    state: &BattleState,
    actor: &UnitId,
    policy: &EnemyPolicyDoc,
) -> PolicyDecision {
    let rationale = policy.include_rationale;
    let Some(entry_id) = policy.content_entry_id.clone() else {
        return PolicyDecision::end_turn(state, "policy has no content entry", rationale);
    };
    let actor_pos = state.unit(actor).expect("caller checked").position;

    let target = enemies_by_distance(state, actor).into_iter().find(|id| {
        let unit = state.unit(id).expect("enumerated above");
        has_tile_line_of_effect(&state.battle_map, actor_pos, unit.position)
    });
    let Some(target) = target else {
        return PolicyDecision::end_turn(state, "no enemy in sight", rationale);
    };

    PolicyDecision {
        command: Command::CastSpell {
            actor: actor.clone(),
            spell_id: None,
            target: Some(target.clone()),
            dc: policy.dc,
            save_type: None,
            damage: None,
            action_cost: 2,
            damage_type: None,
            damage_bypass: Vec::new(),
            mode: Default::default(),
            content_entry_id: Some(EntryId::from(entry_id.as_str())),
            content_entry: None,
        },
        rationale: rationale.then(|| {
            json!({
                "action": "cast_spell_entry_nearest",
                "entry": entry_id,
                "target": target.as_str(),
            })
        }),
    }
}

fn entry_self(
    state: &BattleState,
    actor: &UnitId,
    policy: &EnemyPolicyDoc,
    command_type: &str,
) -> PolicyDecision {
    let rationale = policy.include_rationale;
    let Some(entry_id) = policy.content_entry_id.clone() else {
        return PolicyDecision::end_turn(state, "policy has no content entry", rationale);
    };
    let entry = EntryId::from(entry_id.as_str());

    let command = match command_type {
        "use_feat" => Command::UseFeat {
            actor: actor.clone(),
            feat_id: None,
            target: Some(actor.clone()),
            effect_kind: None,
            payload: Default::default(),
            duration_rounds: None,
            tick_timing: None,
            action_cost: 1,
            content_entry_id: Some(entry),
            content_entry: None,
        },
        "use_item" => Command::UseItem {
            actor: actor.clone(),
            item_id: None,
            target: Some(actor.clone()),
            effect_kind: None,
            payload: Default::default(),
            duration_rounds: None,
            tick_timing: None,
            action_cost: 1,
            content_entry_id: Some(entry),
            content_entry: None,
        },
        _ => Command::Interact {
            actor: actor.clone(),
            interact_id: None,
            target: Some(actor.clone()),
            effect_kind: None,
            payload: Default::default(),
            duration_rounds: None,
            tick_timing: None,
            flag: None,
            value: true,
            action_cost: 1,
            content_entry_id: Some(entry),
            content_entry: None,
        },
    };

    PolicyDecision {
        command,
        rationale: rationale.then(|| {
            json!({
                "action": format!("{command_type}_entry_self"),
                "entry": entry_id,
            })
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;

    fn policy(action: PolicyAction) -> EnemyPolicyDoc {
        EnemyPolicyDoc {
            enabled: true,
            teams: vec!["pc".to_string()],
            action,
            content_entry_id: Some("spell.arc_flash".to_string()),
            dc: Some(22),
            include_rationale: false,
            auto_end_turn: true,
        }
    }

    #[test]
    fn out_of_reach_enemy_draws_an_approach_step() {
        let (state, _) = testkit::two_unit_state(1);
        // pc at (1,1), enemy at (3,3): out of reach 1, so step toward it.
        let decision = decide(&state, &policy(PolicyAction::StrikeNearest));
        match decision.command {
            Command::Move { x, y, .. } => {
                let step = TilePos::new(x, y);
                assert_eq!(step.manhattan(TilePos::new(1, 1)), 1);
                assert!(step.manhattan(TilePos::new(3, 3)) < 4);
                // Tie between (2,1) and (1,2) resolves to lower y.
                assert_eq!(step, TilePos::new(2, 1));
            }
            other => panic!("expected a move, got {other:?}"),
        }
    }

    #[test]
    fn adjacent_enemy_is_struck() {
        let (mut state, _) = testkit::two_unit_state(1);
        state.unit_mut(&UnitId::from("enemy")).unwrap().position = TilePos::new(2, 1);
        let decision = decide(&state, &policy(PolicyAction::StrikeNearest));
        assert!(matches!(decision.command, Command::Strike { .. }));
    }

    #[test]
    fn dead_enemies_mean_end_turn() {
        let (mut state, _) = testkit::two_unit_state(1);
        state.unit_mut(&UnitId::from("enemy")).unwrap().hp = 0;
        let decision = decide(&state, &policy(PolicyAction::StrikeNearest));
        assert!(matches!(decision.command, Command::EndTurn { .. }));
    }

    #[test]
    fn uncovered_team_ends_turn() {
        let (state, _) = testkit::two_unit_state(1);
        let mut p = policy(PolicyAction::StrikeNearest);
        p.teams = vec!["enemy".to_string()];
        let decision = decide(&state, &p);
        assert!(matches!(decision.command, Command::EndTurn { .. }));
    }

    #[test]
    fn cast_entry_targets_nearest_visible() {
        let (state, _) = testkit::two_unit_state(1);
        let decision = decide(&state, &policy(PolicyAction::CastSpellEntryNearest));
        match decision.command {
            Command::CastSpell {
                target,
                dc,
                content_entry_id,
                spell_id,
                ..
            } => {
                assert_eq!(target, Some(UnitId::from("enemy")));
                assert_eq!(dc, Some(22));
                assert_eq!(content_entry_id, Some(EntryId::from("spell.arc_flash")));
                assert!(spell_id.is_none(), "spell_id is derived at materialization");
            }
            other => panic!("expected cast_spell, got {other:?}"),
        }
    }

    #[test]
    fn self_target_entries_aim_at_actor() {
        let (state, _) = testkit::two_unit_state(1);
        let decision = decide(&state, &policy(PolicyAction::UseItemEntrySelf));
        match decision.command {
            Command::UseItem { target, .. } => assert_eq!(target, Some(UnitId::from("pc"))),
            other => panic!("expected use_item, got {other:?}"),
        }
    }

    #[test]
    fn rationale_attached_when_requested() {
        let (state, _) = testkit::two_unit_state(1);
        let mut p = policy(PolicyAction::StrikeNearest);
        p.include_rationale = true;
        let decision = decide(&state, &p);
        assert!(decision.rationale.is_some());
    }

    #[test]
    fn blocked_paths_end_turn() {
        let (mut state, _) = testkit::two_unit_state(1);
        // Box the pc in completely.
        for pos in [
            TilePos::new(1, 0),
            TilePos::new(0, 1),
            TilePos::new(2, 1),
            TilePos::new(1, 2),
        ] {
            state.battle_map.blocked.insert(pos);
        }
        let decision = decide(&state, &policy(PolicyAction::StrikeNearest));
        assert!(matches!(decision.command, Command::EndTurn { .. }));
    }
}
