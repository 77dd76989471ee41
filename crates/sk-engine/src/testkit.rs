//! Shared test fixtures.

use std::collections::BTreeMap;

use sk_types::grid::TilePos;
use sk_types::ids::UnitId;
use sk_types::rng::RngState;
use sk_types::state::{BattleMap, BattleState, Unit};

use crate::turn_order;

pub fn unit(id: &str, team: &str, pos: TilePos) -> Unit {
    Unit {
        id: UnitId::from(id),
        team: team.to_string(),
        hp: 20,
        max_hp: 20,
        position: pos,
        initiative: 10,
        attack_mod: 5,
        ac: 15,
        damage: "1d6+2".to_string(),
        temp_hp: 0,
        temp_hp_source: None,
        temp_hp_owner_effect: None,
        attack_damage_type: "physical".to_string(),
        attack_damage_bypass: Vec::new(),
        fortitude: 0,
        reflex: 0,
        will: 0,
        actions_remaining: 3,
        reaction_available: true,
        conditions: BTreeMap::new(),
        condition_immunities: Vec::new(),
        resistances: BTreeMap::new(),
        weaknesses: BTreeMap::new(),
        immunities: Vec::new(),
        reach: 1,
        speed: 5,
    }
}

/// The two-unit melee fixture: "pc" (initiative 15, +6/AC 16, 1d8+3) at
/// (1,1) versus "enemy" (initiative 10, +5/AC 15, 1d6+2) at (3,3) on an
/// empty 6x6 map. "pc" is the active unit.
pub fn two_unit_state(seed: u32) -> (BattleState, RngState) {
    let mut pc = unit("pc", "pc", TilePos::new(1, 1));
    pc.initiative = 15;
    pc.attack_mod = 6;
    pc.ac = 16;
    pc.damage = "1d8+3".to_string();

    let enemy = unit("enemy", "enemy", TilePos::new(3, 3));

    let mut units = BTreeMap::new();
    units.insert(pc.id.clone(), pc);
    units.insert(enemy.id.clone(), enemy);
    let order = turn_order::build(&units);

    let state = BattleState {
        battle_id: "fixture".to_string(),
        seed,
        round_number: 1,
        turn_index: 0,
        turn_order: order,
        units,
        battle_map: BattleMap {
            width: 6,
            height: 6,
            blocked: Default::default(),
            movement_cost: Default::default(),
        },
        effects: BTreeMap::new(),
        flags: BTreeMap::new(),
        event_sequence: 0,
        effect_sequence: 0,
    };
    (state, RngState::new(seed))
}
