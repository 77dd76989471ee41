//! Tiled map ingestion — a grid-format normalizer producing a scenario.
//!
//! The map JSON provides tile layers (row-major GIDs), object groups named
//! "Spawns", "Hazards", and "Objectives", and tileset references. External
//! tilesets are fetched through a resolver callback so the core performs no
//! IO; the CLI resolves relative to the map path. A tile is blocked when its
//! GID's per-tile "blocked" property is true (GID 0 is skipped).

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::scenario::{
    HazardRoutineDoc, MapDoc, ObjectiveDoc, ObjectiveKind, ObjectiveResult, ScenarioDoc,
    ScenarioError, UnitDoc,
};
use crate::DEFAULT_ENGINE_PHASE;

/// Resolves an external tileset reference (the `source` path) to its JSON.
pub type TilesetResolver<'a> = dyn Fn(&str) -> Result<Value, String> + 'a;

fn err(message: impl Into<String>) -> ScenarioError {
    ScenarioError::MapSource(message.into())
}

/// Ingest a Tiled map document into a scenario. The result still goes
/// through scenario validation.
pub fn ingest_tiled_map(
    map: &Value,
    resolve_tileset: &TilesetResolver<'_>,
) -> Result<ScenarioDoc, ScenarioError> {
    let root = map.as_object().ok_or_else(|| err("map must be an object"))?;
    let width = require_i32(root, "width")?;
    let height = require_i32(root, "height")?;
    let tilewidth = require_i32(root, "tilewidth")?;
    let tileheight = require_i32(root, "tileheight")?;
    if tilewidth <= 0 || tileheight <= 0 {
        return Err(err("tilewidth and tileheight must be positive"));
    }

    let properties = property_map(root.get("properties"));
    let battle_id = properties
        .get("battleId")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err("map property battleId is required and must be non-empty"))?
        .to_string();
    let seed = properties
        .get("seed")
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;
    let engine_phase = properties
        .get("enginePhase")
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(DEFAULT_ENGINE_PHASE);

    let tilesets = load_tilesets(root, resolve_tileset)?;
    let layers = root
        .get("layers")
        .and_then(Value::as_array)
        .ok_or_else(|| err("map needs a layers array"))?;

    let mut blocked = BTreeSet::new();
    let mut units: Vec<UnitDoc> = Vec::new();
    let mut hazard_routines = Vec::new();
    let mut objectives = Vec::new();

    for layer in layers {
        let layer_type = layer.get("type").and_then(Value::as_str).unwrap_or("");
        match layer_type {
            "tilelayer" => {
                collect_blocked(layer, width, &tilesets, &mut blocked)?;
            }
            "objectgroup" => {
                let name = layer.get("name").and_then(Value::as_str).unwrap_or("");
                let objects = layer
                    .get("objects")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                match name {
                    "Spawns" => {
                        for object in &objects {
                            if object.get("type").and_then(Value::as_str) == Some("spawn") {
                                units.push(spawn_to_unit(object, tilewidth, tileheight)?);
                            }
                        }
                    }
                    "Hazards" => {
                        for object in &objects {
                            hazard_routines.push(hazard_to_routine(object)?);
                        }
                    }
                    "Objectives" => {
                        for object in &objects {
                            objectives.push(objective_from_object(
                                object, tilewidth, tileheight,
                            )?);
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    Ok(ScenarioDoc {
        battle_id,
        seed,
        map: MapDoc {
            width,
            height,
            blocked: blocked.into_iter().collect(),
            movement_cost: Default::default(),
        },
        units,
        commands: Vec::new(),
        engine_phase: Some(engine_phase),
        flags: Default::default(),
        objectives,
        objective_packs: Vec::new(),
        enemy_policy: None,
        mission_events: Vec::new(),
        reinforcement_waves: Vec::new(),
        hazard_routines,
        content_packs: Vec::new(),
        content_pack_id: None,
        required_content_features: Vec::new(),
        max_steps: None,
    })
}

// =============================================================================
// Tilesets
// =============================================================================

struct ResolvedTileset {
    firstgid: u32,
    blocked_ids: BTreeSet<u32>,
}

fn load_tilesets(
    root: &Map<String, Value>,
    resolve: &TilesetResolver<'_>,
) -> Result<Vec<ResolvedTileset>, ScenarioError> {
    let mut out = Vec::new();
    let Some(list) = root.get("tilesets").and_then(Value::as_array) else {
        return Ok(out);
    };
    for entry in list {
        let firstgid = entry
            .get("firstgid")
            .and_then(Value::as_u64)
            .ok_or_else(|| err("tileset needs firstgid"))? as u32;
        let data = match entry.get("source").and_then(Value::as_str) {
            Some(source) => resolve(source)
                .map_err(|e| err(format!("tileset {source:?} failed to resolve: {e}")))?,
            None => entry.clone(),
        };
        out.push(ResolvedTileset {
            firstgid,
            blocked_ids: blocked_tile_ids(&data),
        });
    }
    // Highest firstgid first, so GID lookup picks the owning tileset.
    out.sort_by(|a, b| b.firstgid.cmp(&a.firstgid));
    Ok(out)
}

fn blocked_tile_ids(tileset: &Value) -> BTreeSet<u32> {
    let mut out = BTreeSet::new();
    let Some(tiles) = tileset.get("tiles").and_then(Value::as_array) else {
        return out;
    };
    for tile in tiles {
        let Some(id) = tile.get("id").and_then(Value::as_u64) else {
            continue;
        };
        let properties = property_map(tile.get("properties"));
        if properties.get("blocked").and_then(Value::as_bool) == Some(true) {
            out.insert(id as u32);
        }
    }
    out
}

fn collect_blocked(
    layer: &Value,
    width: i32,
    tilesets: &[ResolvedTileset],
    blocked: &mut BTreeSet<(i32, i32)>,
) -> Result<(), ScenarioError> {
    let Some(data) = layer.get("data").and_then(Value::as_array) else {
        return Ok(());
    };
    for (index, gid) in data.iter().enumerate() {
        let gid = gid
            .as_u64()
            .ok_or_else(|| err("tilelayer data must be integers"))? as u32;
        if gid == 0 {
            continue;
        }
        let Some(tileset) = tilesets.iter().find(|t| t.firstgid <= gid) else {
            continue;
        };
        if tileset.blocked_ids.contains(&(gid - tileset.firstgid)) {
            let x = index as i32 % width;
            let y = index as i32 / width;
            blocked.insert((x, y));
        }
    }
    Ok(())
}

// =============================================================================
// Objects
// =============================================================================

/// Tiled properties come as a `[{name, type, value}]` list.
fn property_map(properties: Option<&Value>) -> Map<String, Value> {
    let mut out = Map::new();
    let Some(list) = properties.and_then(Value::as_array) else {
        return out;
    };
    for property in list {
        let Some(name) = property.get("name").and_then(Value::as_str) else {
            continue;
        };
        out.insert(
            name.to_string(),
            property.get("value").cloned().unwrap_or(Value::Null),
        );
    }
    out
}

fn object_tile(object: &Value, tilewidth: i32, tileheight: i32) -> (i32, i32) {
    let x = object.get("x").and_then(Value::as_f64).unwrap_or(0.0) as i32;
    let y = object.get("y").and_then(Value::as_f64).unwrap_or(0.0) as i32;
    (x / tilewidth, y / tileheight)
}

fn spawn_to_unit(
    object: &Value,
    tilewidth: i32,
    tileheight: i32,
) -> Result<UnitDoc, ScenarioError> {
    let name = object
        .get("name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err("spawn object needs a name (the unit id)"))?;
    let props = property_map(object.get("properties"));
    let position = object_tile(object, tilewidth, tileheight);

    let get_i32 = |key: &str| props.get(key).and_then(Value::as_i64).map(|v| v as i32);
    let missing = |key: &'static str| err(format!("spawn {name:?} is missing property {key}"));

    Ok(UnitDoc {
        id: name.to_string(),
        team: props
            .get("team")
            .and_then(Value::as_str)
            .ok_or_else(|| missing("team"))?
            .to_string(),
        hp: get_i32("hp").ok_or_else(|| missing("hp"))?,
        max_hp: get_i32("maxHp"),
        position,
        initiative: get_i32("initiative").ok_or_else(|| missing("initiative"))?,
        attack_mod: get_i32("attackMod").ok_or_else(|| missing("attackMod"))?,
        ac: get_i32("ac").ok_or_else(|| missing("ac"))?,
        damage: props
            .get("damage")
            .and_then(Value::as_str)
            .ok_or_else(|| missing("damage"))?
            .to_string(),
        temp_hp: get_i32("tempHp").unwrap_or(0),
        temp_hp_source: None,
        attack_damage_type: props
            .get("attackDamageType")
            .and_then(Value::as_str)
            .map(str::to_string),
        attack_damage_bypass: Vec::new(),
        fortitude: get_i32("fortitude").unwrap_or(0),
        reflex: get_i32("reflex").unwrap_or(0),
        will: get_i32("will").unwrap_or(0),
        resistances: Default::default(),
        weaknesses: Default::default(),
        immunities: Vec::new(),
        condition_immunities: Vec::new(),
        conditions: Default::default(),
        reach: get_i32("reach").unwrap_or(1),
        speed: get_i32("speed").unwrap_or(5),
    })
}

fn hazard_to_routine(object: &Value) -> Result<HazardRoutineDoc, ScenarioError> {
    let name = object
        .get("name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err("hazard object needs a name (the routine id)"))?;
    let props = property_map(object.get("properties"));
    let get_str = |key: &str| props.get(key).and_then(Value::as_str).map(str::to_string);
    let get_u32 = |key: &str| props.get(key).and_then(Value::as_u64).map(|v| v as u32);
    let missing = |key: &'static str| err(format!("hazard {name:?} is missing property {key}"));

    Ok(HazardRoutineDoc {
        id: name.to_string(),
        unit_id: get_str("unitId").ok_or_else(|| missing("unitId"))?,
        hazard_id: get_str("hazardId").ok_or_else(|| missing("hazardId"))?,
        source_name: get_str("sourceName").ok_or_else(|| missing("sourceName"))?,
        source_type: get_str("sourceType").unwrap_or_else(|| "trigger_action".to_string()),
        target_policy: props
            .get("targetPolicy")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| err(format!("hazard {name:?}: bad targetPolicy: {e}")))?
            .unwrap_or_default(),
        center_x: None,
        center_y: None,
        target: get_str("target"),
        start_round: get_u32("startRound").unwrap_or(1),
        end_round: get_u32("endRound"),
        cadence_rounds: get_u32("cadenceRounds").unwrap_or(1),
        max_triggers: get_u32("maxTriggers"),
        priority: props
            .get("priority")
            .and_then(Value::as_i64)
            .unwrap_or(0) as i32,
        enabled_flag: get_str("enabledFlag"),
        disabled_flag: get_str("disabledFlag"),
        auto_end_turn: props
            .get("autoEndTurn")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

fn objective_from_object(
    object: &Value,
    tilewidth: i32,
    tileheight: i32,
) -> Result<ObjectiveDoc, ScenarioError> {
    let name = object
        .get("name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err("objective object needs a name (the objective id)"))?;
    let kind_str = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| err(format!("objective {name:?} needs a type")))?;
    let kind: ObjectiveKind = serde_json::from_value(Value::String(kind_str.to_string()))
        .map_err(|_| err(format!("objective {name:?}: unknown type {kind_str:?}")))?;

    let props = property_map(object.get("properties"));
    let result = match props.get("result").and_then(Value::as_str) {
        Some("defeat") => ObjectiveResult::Defeat,
        _ => ObjectiveResult::Victory,
    };
    let (x, y) = object_tile(object, tilewidth, tileheight);

    Ok(ObjectiveDoc {
        id: name.to_string(),
        kind,
        result,
        team: props.get("team").and_then(Value::as_str).map(str::to_string),
        unit: props.get("unit").and_then(Value::as_str).map(str::to_string),
        x: matches!(kind, ObjectiveKind::UnitReachTile).then_some(x),
        y: matches!(kind, ObjectiveKind::UnitReachTile).then_some(y),
        flag: props.get("flag").and_then(Value::as_str).map(str::to_string),
        value: props.get("value").and_then(Value::as_bool),
        round: props.get("round").and_then(Value::as_u64).map(|v| v as u32),
    })
}

fn require_i32(map: &Map<String, Value>, key: &'static str) -> Result<i32, ScenarioError> {
    map.get(key)
        .and_then(Value::as_i64)
        .map(|v| v as i32)
        .ok_or_else(|| err(format!("map needs integer {key}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::validate_doc;
    use serde_json::json;

    fn sample_map() -> Value {
        json!({
            "width": 4,
            "height": 3,
            "tilewidth": 32,
            "tileheight": 32,
            "properties": [
                {"name": "battleId", "type": "string", "value": "crypt_entry"},
                {"name": "seed", "type": "int", "value": 99}
            ],
            "tilesets": [
                {"firstgid": 1, "source": "terrain.tsj"}
            ],
            "layers": [
                {
                    "type": "tilelayer",
                    "name": "terrain",
                    // Row-major: tile id 1 (gid 2) is the wall.
                    "data": [1, 1, 2, 1,
                             1, 1, 1, 1,
                             2, 1, 1, 1]
                },
                {
                    "type": "objectgroup",
                    "name": "Spawns",
                    "objects": [
                        {
                            "name": "pc", "type": "spawn", "x": 32.0, "y": 32.0,
                            "properties": [
                                {"name": "team", "value": "pc"},
                                {"name": "hp", "value": 20},
                                {"name": "initiative", "value": 14},
                                {"name": "attackMod", "value": 6},
                                {"name": "ac", "value": 16},
                                {"name": "damage", "value": "1d8+3"}
                            ]
                        },
                        {
                            "name": "ghoul", "type": "spawn", "x": 96.0, "y": 64.0,
                            "properties": [
                                {"name": "team", "value": "enemy"},
                                {"name": "hp", "value": 12},
                                {"name": "initiative", "value": 10},
                                {"name": "attackMod", "value": 4},
                                {"name": "ac", "value": 13},
                                {"name": "damage", "value": "1d6+1"}
                            ]
                        }
                    ]
                },
                {
                    "type": "objectgroup",
                    "name": "Objectives",
                    "objects": [
                        {
                            "name": "escape", "type": "unit_reach_tile",
                            "x": 96.0, "y": 0.0,
                            "properties": [{"name": "unit", "value": "pc"}]
                        }
                    ]
                }
            ]
        })
    }

    fn resolver(source: &str) -> Result<Value, String> {
        if source == "terrain.tsj" {
            Ok(json!({
                "tiles": [
                    {"id": 0, "properties": []},
                    {"id": 1, "properties": [{"name": "blocked", "value": true}]}
                ]
            }))
        } else {
            Err(format!("unknown tileset {source}"))
        }
    }

    #[test]
    fn map_ingests_into_valid_scenario() {
        let doc = ingest_tiled_map(&sample_map(), &resolver).unwrap();
        assert_eq!(doc.battle_id, "crypt_entry");
        assert_eq!(doc.seed, 99);
        assert_eq!(doc.engine_phase, Some(DEFAULT_ENGINE_PHASE));
        assert_eq!(doc.map.width, 4);
        // gid 2 = tileset id 1 = blocked, at indices 2 and 8.
        assert_eq!(doc.map.blocked, vec![(0, 2), (2, 0)]);
        assert_eq!(doc.units.len(), 2);
        assert_eq!(doc.units[0].id, "pc");
        assert_eq!(doc.units[0].position, (1, 1));
        assert_eq!(doc.units[1].position, (3, 2));
        assert_eq!(doc.objectives.len(), 1);
        assert_eq!(doc.objectives[0].kind, ObjectiveKind::UnitReachTile);
        assert_eq!(doc.objectives[0].x, Some(3));
        assert_eq!(doc.objectives[0].y, Some(0));

        validate_doc(&doc).unwrap();
    }

    #[test]
    fn missing_battle_id_rejected() {
        let mut map = sample_map();
        map["properties"] = json!([]);
        let errv = ingest_tiled_map(&map, &resolver).unwrap_err();
        assert!(errv.to_string().contains("battleId"));
    }

    #[test]
    fn seed_and_phase_default() {
        let mut map = sample_map();
        map["properties"] = json!([
            {"name": "battleId", "value": "b"}
        ]);
        let doc = ingest_tiled_map(&map, &resolver).unwrap();
        assert_eq!(doc.seed, 0);
        assert_eq!(doc.engine_phase, Some(7));
    }

    #[test]
    fn unresolvable_tileset_is_an_error() {
        let mut map = sample_map();
        map["tilesets"][0]["source"] = json!("missing.tsj");
        let errv = ingest_tiled_map(&map, &resolver).unwrap_err();
        assert!(errv.to_string().contains("failed to resolve"));
    }

    #[test]
    fn hazard_objects_become_routines() {
        let mut map = sample_map();
        map["layers"].as_array_mut().unwrap().push(json!({
            "type": "objectgroup",
            "name": "Hazards",
            "objects": [{
                "name": "spores", "type": "hazard", "x": 0.0, "y": 0.0,
                "properties": [
                    {"name": "unitId", "value": "ghoul"},
                    {"name": "hazardId", "value": "h1"},
                    {"name": "sourceName", "value": "s1"},
                    {"name": "cadenceRounds", "value": 2},
                    {"name": "maxTriggers", "value": 2}
                ]
            }]
        }));
        let doc = ingest_tiled_map(&map, &resolver).unwrap();
        assert_eq!(doc.hazard_routines.len(), 1);
        let routine = &doc.hazard_routines[0];
        assert_eq!(routine.id, "spores");
        assert_eq!(routine.unit_id, "ghoul");
        assert_eq!(routine.cadence_rounds, 2);
        assert_eq!(routine.max_triggers, Some(2));
    }
}
