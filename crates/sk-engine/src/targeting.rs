//! Modeled target selection for hazard sources and area shapes.
//!
//! Selection returns unit ids in ascending id order so downstream
//! application is deterministic.

use sk_data::effect_model::ModeledEffect;
use sk_types::grid::{self, TilePos};
use sk_types::ids::UnitId;
use sk_types::state::BattleState;

use crate::line_of_effect::has_tile_line_of_effect;
use crate::reducer::ReductionError;

/// Feet to tiles: 5 ft per tile, rounding up, minimum one tile.
pub fn feet_to_tiles(feet: i32) -> i32 {
    ((feet.max(0) + 4) / 5).max(1)
}

/// The nearest living opponent of `actor` by Chebyshev distance, ties broken
/// by ascending unit id.
pub fn nearest_enemy(state: &BattleState, actor: &UnitId) -> Option<UnitId> {
    let actor_unit = state.unit(actor)?;
    state
        .units
        .values()
        .filter(|u| u.alive() && u.team != actor_unit.team && u.id != *actor)
        .min_by_key(|u| (actor_unit.position.chebyshev(u.position), u.id.clone()))
        .map(|u| u.id.clone())
}

/// Select targets for a modeled effects list.
///
/// An explicit target takes precedence and requires line of effect from the
/// actor. Otherwise an `area` descriptor selects by shape; with no area
/// descriptor, every living non-actor unit with LOE from the actor is
/// selected.
pub fn select_targets(
    state: &BattleState,
    actor: &UnitId,
    effects: &[ModeledEffect],
    explicit_target: Option<&UnitId>,
    center: Option<TilePos>,
) -> Result<Vec<UnitId>, ReductionError> {
    let actor_unit = state
        .unit(actor)
        .ok_or_else(|| ReductionError::UnknownUnit(actor.clone()))?;
    let actor_pos = actor_unit.position;
    let map = &state.battle_map;

    if let Some(target) = explicit_target {
        let target_unit = state
            .unit(target)
            .ok_or_else(|| ReductionError::UnknownUnit(target.clone()))?;
        if !has_tile_line_of_effect(map, actor_pos, target_unit.position) {
            return Err(ReductionError::NoLineOfEffect {
                from: actor.to_string(),
                to: target.to_string(),
            });
        }
        return Ok(vec![target.clone()]);
    }

    let area = effects.iter().find_map(|e| match e {
        ModeledEffect::Area {
            shape,
            size_feet,
            size_miles,
            center_x,
            center_y,
        } => Some((shape.clone(), *size_feet, *size_miles, *center_x, *center_y)),
        _ => None,
    });

    let candidates = || {
        state
            .units
            .values()
            .filter(|u| u.alive() && u.id != *actor)
    };

    if let Some((shape, size_feet, size_miles, area_cx, area_cy)) = area {
        // World-scale events reach everything.
        if size_miles.is_some() {
            return Ok(candidates().map(|u| u.id.clone()).collect());
        }

        let area_center = match (area_cx, area_cy) {
            (Some(x), Some(y)) => Some(TilePos::new(x, y)),
            _ => None,
        };
        let center = center.or(area_center).unwrap_or(actor_pos);
        let tiles = feet_to_tiles(size_feet.unwrap_or(5));

        let selected: Vec<UnitId> = match shape.as_deref() {
            Some("line") => {
                // Walk toward the center, skipping the origin, stopping at
                // the first blocked tile.
                let mut path = Vec::new();
                for pos in grid::line(actor_pos, center).into_iter().skip(1) {
                    if map.is_blocked(pos) {
                        break;
                    }
                    path.push(pos);
                }
                candidates()
                    .filter(|u| path.contains(&u.position))
                    .map(|u| u.id.clone())
                    .collect()
            }
            Some("cone") => {
                let tiles_set = grid::cone(actor_pos, center, tiles);
                candidates()
                    .filter(|u| tiles_set.contains(&u.position))
                    .filter(|u| has_tile_line_of_effect(map, actor_pos, u.position))
                    .map(|u| u.id.clone())
                    .collect()
            }
            Some("within_radius") | Some("burst") | Some("radius") | Some("emanation") | None => {
                candidates()
                    .filter(|u| center.manhattan(u.position) <= tiles)
                    .filter(|u| has_tile_line_of_effect(map, center, u.position))
                    .map(|u| u.id.clone())
                    .collect()
            }
            Some(_) => Vec::new(),
        };
        return Ok(selected);
    }

    Ok(candidates()
        .filter(|u| has_tile_line_of_effect(map, actor_pos, u.position))
        .map(|u| u.id.clone())
        .collect())
}
