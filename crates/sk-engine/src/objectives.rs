//! Objective evaluation and battle-end determination.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use sk_types::ids::UnitId;
use sk_types::state::BattleState;

use crate::scenario::{ObjectiveDoc, ObjectiveKind, ObjectiveResult};

/// Snapshot of one objective's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectiveStatus {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ObjectiveKind,
    pub result: ObjectiveResult,
    pub met: bool,
}

/// Terminal battle outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleOutcome {
    Victory,
    Defeat,
}

/// Evaluate every objective against the current state.
pub fn evaluate(state: &BattleState, objectives: &[ObjectiveDoc]) -> Vec<ObjectiveStatus> {
    objectives
        .iter()
        .map(|doc| ObjectiveStatus {
            id: doc.id.clone(),
            kind: doc.kind,
            result: doc.result,
            met: objective_met(state, doc),
        })
        .collect()
}

fn objective_met(state: &BattleState, doc: &ObjectiveDoc) -> bool {
    match doc.kind {
        ObjectiveKind::TeamEliminated => {
            let Some(team) = &doc.team else { return false };
            !state.units.values().any(|u| u.alive() && &u.team == team)
        }
        ObjectiveKind::UnitReachTile => {
            let (Some(unit), Some(x), Some(y)) = (&doc.unit, doc.x, doc.y) else {
                return false;
            };
            state
                .unit(&UnitId::from(unit.as_str()))
                .map(|u| u.alive() && u.position.x == x && u.position.y == y)
                .unwrap_or(false)
        }
        ObjectiveKind::FlagSet => {
            let Some(flag) = &doc.flag else { return false };
            state.flags.get(flag).copied().unwrap_or(false) == doc.value.unwrap_or(true)
        }
        ObjectiveKind::RoundAtLeast => doc
            .round
            .map(|round| state.round_number >= round)
            .unwrap_or(false),
        ObjectiveKind::UnitDead => {
            let Some(unit) = &doc.unit else { return false };
            state
                .unit(&UnitId::from(unit.as_str()))
                .map(|u| !u.alive())
                .unwrap_or(true)
        }
        ObjectiveKind::UnitAlive => {
            let Some(unit) = &doc.unit else { return false };
            state
                .unit(&UnitId::from(unit.as_str()))
                .map(|u| u.alive())
                .unwrap_or(false)
        }
    }
}

/// The terminal outcome, if any: a met defeat objective loses outright;
/// otherwise all victory objectives met (and at least one) wins.
pub fn battle_outcome(statuses: &[ObjectiveStatus]) -> Option<BattleOutcome> {
    if statuses
        .iter()
        .any(|s| s.result == ObjectiveResult::Defeat && s.met)
    {
        return Some(BattleOutcome::Defeat);
    }
    let victory: Vec<&ObjectiveStatus> = statuses
        .iter()
        .filter(|s| s.result == ObjectiveResult::Victory)
        .collect();
    if !victory.is_empty() && victory.iter().all(|s| s.met) {
        return Some(BattleOutcome::Victory);
    }
    None
}

/// Winner team for the battle_end payload: the single team with living
/// units, "draw" when none remain, null otherwise.
pub fn winner_team(state: &BattleState) -> Value {
    let alive_teams: BTreeSet<&str> = state
        .units
        .values()
        .filter(|u| u.alive())
        .map(|u| u.team.as_str())
        .collect();
    match alive_teams.len() {
        0 => json!("draw"),
        1 => json!(alive_teams.into_iter().next().unwrap()),
        _ => Value::Null,
    }
}
