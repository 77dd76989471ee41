//! Turn order — initiative-sorted stable order and advancement.

use std::collections::BTreeMap;

use sk_types::ids::UnitId;
use sk_types::state::{BattleState, Unit};

/// Build the turn order: descending initiative, ties broken by ascending
/// unit id. The sort is stable by construction of the key.
pub fn build(units: &BTreeMap<UnitId, Unit>) -> Vec<UnitId> {
    let mut order: Vec<&Unit> = units.values().collect();
    order.sort_by(|a, b| b.initiative.cmp(&a.initiative).then_with(|| a.id.cmp(&b.id)));
    order.into_iter().map(|u| u.id.clone()).collect()
}

/// The index after `i` in a cycle of `n`.
pub fn next_index(i: usize, n: usize) -> usize {
    (i + 1) % n
}

/// Outcome of a turn advancement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advancement {
    pub new_round: bool,
    /// False when every unit is dead; the index is left where the walk
    /// stopped and no reset happens.
    pub reached_living: bool,
}

/// Advance the turn, skipping dead units, incrementing the round on every
/// wrap, and resetting the incoming unit's action pool.
pub fn advance(state: &mut BattleState) -> Advancement {
    let n = state.turn_order.len();
    let mut new_round = false;

    for _ in 0..n {
        let next = next_index(state.turn_index, n);
        if next <= state.turn_index {
            state.round_number += 1;
            new_round = true;
        }
        state.turn_index = next;

        let id = state.turn_order[state.turn_index].clone();
        let Some(unit) = state.units.get_mut(&id) else {
            continue;
        };
        if unit.alive() {
            unit.actions_remaining = 3;
            unit.reaction_available = true;
            return Advancement {
                new_round,
                reached_living: true,
            };
        }
    }

    Advancement {
        new_round,
        reached_living: false,
    }
}

/// Rebuild the order after a roster change, preserving the currently active
/// unit's position by id lookup.
pub fn rebuild_preserving_active(state: &mut BattleState) {
    let active = state.active_unit_id().clone();
    state.turn_order = build(&state.units);
    state.turn_index = state
        .turn_order
        .iter()
        .position(|id| *id == active)
        .unwrap_or(0);
}
