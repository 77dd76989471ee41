//! Effect-model catalog — hazard sources and their modeled effect lists.
//!
//! The catalog maps `(hazard_id, source_name, source_type)` to a source
//! entry carrying descriptors the engine knows how to apply (save checks,
//! damage, conditions, afflictions, area shapes, lethality, movement) plus
//! the raw rules text. Descriptors the engine does not recognize are kept as
//! opaque values and skipped at application time.
//!
//! The catalog is built once by an explicit constructor and passed by
//! reference; tests construct their own.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use sk_types::command::{SaveMode, SaveType};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("effect-model JSON is malformed: {0}")]
    Malformed(String),
    #[error("effect-model is missing the hazards.entries array")]
    MissingEntries,
    #[error("hazard entry {index} is missing {field}")]
    MissingEntryField { index: usize, field: &'static str },
    #[error("hazard {hazard_id}: source {index} is missing {field}")]
    MissingSourceField {
        hazard_id: String,
        index: usize,
        field: &'static str,
    },
    #[error("hazard {hazard_id}: duplicate source ({source_name}, {source_type})")]
    DuplicateSource {
        hazard_id: String,
        source_name: String,
        source_type: String,
    },
}

/// Duration amount + unit ("round", "minute", "hour", "day").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationSpec {
    pub amount: i32,
    pub unit: String,
}

impl DurationSpec {
    /// Convert to rounds: round=1, minute=10, hour=600, day=14400.
    /// Unknown units are treated as rounds.
    pub fn to_rounds(&self) -> i32 {
        let per_unit = match self.unit.as_str() {
            "minute" | "minutes" => 10,
            "hour" | "hours" => 600,
            "day" | "days" => 14400,
            _ => 1,
        };
        self.amount.saturating_mul(per_unit)
    }
}

/// A condition applied by an affliction stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSpec {
    pub name: String,
    #[serde(default = "one")]
    pub value: u32,
}

fn one() -> u32 {
    1
}

/// One stage of an affliction: conditions and optional damage, applied fresh
/// on stage entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub stage: u32,
    #[serde(default)]
    pub conditions: Vec<ConditionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub damage: Option<String>,
}

/// A modeled effect descriptor from a hazard source's effects list.
#[derive(Debug, Clone, PartialEq)]
pub enum ModeledEffect {
    Affliction {
        name: Option<String>,
        save_type: Option<SaveType>,
        dc: Option<i32>,
        maximum_duration: Option<DurationSpec>,
        stages: Vec<StageSpec>,
    },
    SaveCheck {
        save_type: SaveType,
        dc: i32,
        mode: SaveMode,
    },
    Damage {
        formula: String,
        damage_type: Option<String>,
        bypass: Vec<String>,
    },
    ApplyCondition {
        condition: String,
        value: u32,
    },
    Area {
        shape: Option<String>,
        size_feet: Option<i32>,
        size_miles: Option<f64>,
        center_x: Option<i32>,
        center_y: Option<i32>,
    },
    InstantDeath,
    SpecialLethality,
    Transform {
        into: Option<String>,
    },
    Teleport {
        x: Option<i32>,
        y: Option<i32>,
    },
    /// Anything the engine does not model; preserved but never applied.
    Other(Map<String, Value>),
}

impl ModeledEffect {
    /// Parse one descriptor. The `event` key selects the shape; unrecognized
    /// events land in `Other`.
    pub fn parse(value: &Value) -> Result<Self, ModelError> {
        let map = value
            .as_object()
            .ok_or_else(|| ModelError::Malformed("effect descriptor is not an object".into()))?;
        let event = map.get("event").and_then(Value::as_str).unwrap_or("");

        let field = |key: &str| map.get(key).cloned().unwrap_or(Value::Null);
        let opt_i32 = |key: &str| map.get(key).and_then(Value::as_i64).map(|v| v as i32);
        let opt_str =
            |key: &str| map.get(key).and_then(Value::as_str).map(|s| s.to_string());

        let parsed = match event {
            "affliction" => ModeledEffect::Affliction {
                name: opt_str("name"),
                save_type: serde_json::from_value(field("save_type")).ok(),
                dc: opt_i32("dc"),
                maximum_duration: serde_json::from_value(field("maximum_duration")).ok(),
                stages: serde_json::from_value(field("stages")).unwrap_or_default(),
            },
            "save_check" => ModeledEffect::SaveCheck {
                save_type: serde_json::from_value(field("save_type")).map_err(|e| {
                    ModelError::Malformed(format!("save_check.save_type: {e}"))
                })?,
                dc: opt_i32("dc")
                    .ok_or_else(|| ModelError::Malformed("save_check.dc missing".into()))?,
                mode: serde_json::from_value(field("mode")).unwrap_or_default(),
            },
            "damage" => ModeledEffect::Damage {
                formula: opt_str("formula")
                    .ok_or_else(|| ModelError::Malformed("damage.formula missing".into()))?,
                damage_type: opt_str("damage_type"),
                bypass: serde_json::from_value(field("bypass")).unwrap_or_default(),
            },
            "apply_condition" => ModeledEffect::ApplyCondition {
                condition: opt_str("condition").ok_or_else(|| {
                    ModelError::Malformed("apply_condition.condition missing".into())
                })?,
                value: map.get("value").and_then(Value::as_u64).unwrap_or(1) as u32,
            },
            "area" => ModeledEffect::Area {
                shape: opt_str("shape"),
                size_feet: opt_i32("size_feet"),
                size_miles: map.get("size_miles").and_then(Value::as_f64),
                center_x: opt_i32("center_x"),
                center_y: opt_i32("center_y"),
            },
            "instant_death" => ModeledEffect::InstantDeath,
            "special_lethality" => ModeledEffect::SpecialLethality,
            "transform" => ModeledEffect::Transform {
                into: opt_str("into"),
            },
            "teleport" => ModeledEffect::Teleport {
                x: opt_i32("x"),
                y: opt_i32("y"),
            },
            _ => ModeledEffect::Other(map.clone()),
        };
        Ok(parsed)
    }
}

/// A named source within a hazard entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeledSource {
    pub hazard_id: String,
    pub hazard_name: String,
    pub source_name: String,
    pub source_type: String,
    pub effects: Vec<ModeledEffect>,
    pub raw_text: String,
    /// Conditions that outlive an affliction from this source, inferred
    /// from the raw text at load time.
    pub persistent_conditions: Vec<String>,
}

/// The whole catalog, keyed by (hazard_id, source_name, source_type).
#[derive(Debug, Clone, Default)]
pub struct EffectModelCatalog {
    sources: BTreeMap<(String, String, String), ModeledSource>,
}

impl EffectModelCatalog {
    /// An empty catalog (every lookup misses).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse `{"hazards": {"entries": [...]}}` from raw JSON text.
    pub fn from_json(text: &str) -> Result<Self, ModelError> {
        let doc: Value =
            serde_json::from_str(text).map_err(|e| ModelError::Malformed(e.to_string()))?;
        let entries = doc
            .get("hazards")
            .and_then(|h| h.get("entries"))
            .and_then(Value::as_array)
            .ok_or(ModelError::MissingEntries)?;

        let mut sources = BTreeMap::new();
        for (index, entry) in entries.iter().enumerate() {
            let hazard_id = entry
                .get("hazard_id")
                .and_then(Value::as_str)
                .ok_or(ModelError::MissingEntryField {
                    index,
                    field: "hazard_id",
                })?
                .to_string();
            let hazard_name = entry
                .get("hazard_name")
                .and_then(Value::as_str)
                .unwrap_or(&hazard_id)
                .to_string();
            let raw_sources = entry
                .get("sources")
                .and_then(Value::as_array)
                .ok_or(ModelError::MissingEntryField {
                    index,
                    field: "sources",
                })?;

            for (sidx, raw) in raw_sources.iter().enumerate() {
                let source_name = raw
                    .get("source_name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ModelError::MissingSourceField {
                        hazard_id: hazard_id.clone(),
                        index: sidx,
                        field: "source_name",
                    })?
                    .to_string();
                let source_type = raw
                    .get("source_type")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ModelError::MissingSourceField {
                        hazard_id: hazard_id.clone(),
                        index: sidx,
                        field: "source_type",
                    })?
                    .to_string();
                let raw_text = raw
                    .get("raw_text")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                let effects = raw
                    .get("effects")
                    .and_then(Value::as_array)
                    .map(|list| list.iter().map(ModeledEffect::parse).collect())
                    .transpose()?
                    .unwrap_or_default();

                let key = (hazard_id.clone(), source_name.clone(), source_type.clone());
                if sources.contains_key(&key) {
                    return Err(ModelError::DuplicateSource {
                        hazard_id,
                        source_name,
                        source_type,
                    });
                }
                let source = ModeledSource {
                    hazard_id: hazard_id.clone(),
                    hazard_name: hazard_name.clone(),
                    persistent_conditions: infer_persistent_conditions(&raw_text),
                    source_name,
                    source_type,
                    effects,
                    raw_text,
                };
                sources.insert(key, source);
            }
        }
        Ok(Self { sources })
    }

    pub fn lookup(
        &self,
        hazard_id: &str,
        source_name: &str,
        source_type: &str,
    ) -> Option<&ModeledSource> {
        self.sources.get(&(
            hazard_id.to_string(),
            source_name.to_string(),
            source_type.to_string(),
        ))
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Find every "Any <CONDITION> condition persists" clause in the raw text
/// and return normalized condition names.
pub fn infer_persistent_conditions(raw_text: &str) -> Vec<String> {
    let re = Regex::new(r"(?i)any ([a-z][a-z \-]*?) condition persists")
        .expect("persistent-condition pattern is valid");
    let mut out = Vec::new();
    for cap in re.captures_iter(raw_text) {
        let name = cap[1].trim().to_lowercase().replace([' ', '-'], "_");
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_catalog_json() -> String {
        json!({
            "hazards": {
                "entries": [
                    {
                        "hazard_id": "h1",
                        "hazard_name": "Spore Cloud",
                        "sources": [
                            {
                                "source_type": "trigger_action",
                                "source_name": "s1",
                                "raw_text": "A burst of spores. Any sickened condition persists after the affliction ends.",
                                "effects": [
                                    {"event": "save_check", "save_type": "fortitude", "dc": 18},
                                    {"event": "damage", "formula": "2d6", "damage_type": "poison"},
                                    {"event": "apply_condition", "condition": "sickened", "value": 1},
                                    {"event": "hazard_note", "text": "unmodeled"}
                                ]
                            }
                        ]
                    }
                ]
            }
        })
        .to_string()
    }

    #[test]
    fn catalog_parses_and_looks_up() {
        let catalog = EffectModelCatalog::from_json(&sample_catalog_json()).unwrap();
        assert_eq!(catalog.len(), 1);
        let source = catalog.lookup("h1", "s1", "trigger_action").unwrap();
        assert_eq!(source.hazard_name, "Spore Cloud");
        assert_eq!(source.effects.len(), 4);
        assert!(matches!(
            source.effects[0],
            ModeledEffect::SaveCheck {
                save_type: SaveType::Fortitude,
                dc: 18,
                mode: SaveMode::Basic
            }
        ));
        assert!(matches!(source.effects[3], ModeledEffect::Other(_)));
        assert!(catalog.lookup("h1", "s1", "routine").is_none());
    }

    #[test]
    fn persistent_conditions_inferred() {
        let catalog = EffectModelCatalog::from_json(&sample_catalog_json()).unwrap();
        let source = catalog.lookup("h1", "s1", "trigger_action").unwrap();
        assert_eq!(source.persistent_conditions, vec!["sickened".to_string()]);
    }

    #[test]
    fn inference_normalizes_names() {
        let found = infer_persistent_conditions(
            "Any Flat-Footed condition persists. Any drained condition persists.",
        );
        assert_eq!(found, vec!["flat_footed".to_string(), "drained".to_string()]);
        assert!(infer_persistent_conditions("nothing here").is_empty());
    }

    #[test]
    fn missing_entries_rejected() {
        let err = EffectModelCatalog::from_json("{}").unwrap_err();
        assert_eq!(err, ModelError::MissingEntries);
    }

    #[test]
    fn affliction_descriptor_parses() {
        let effect = ModeledEffect::parse(&json!({
            "event": "affliction",
            "name": "spore fever",
            "save_type": "fortitude",
            "dc": 18,
            "maximum_duration": {"amount": 4, "unit": "round"},
            "stages": [
                {"stage": 1, "conditions": [{"name": "sickened", "value": 1}]},
                {"stage": 2, "conditions": [{"name": "sickened", "value": 2}], "damage": "1d6"}
            ]
        }))
        .unwrap();
        match effect {
            ModeledEffect::Affliction {
                dc,
                maximum_duration,
                stages,
                ..
            } => {
                assert_eq!(dc, Some(18));
                assert_eq!(maximum_duration.unwrap().to_rounds(), 4);
                assert_eq!(stages.len(), 2);
                assert_eq!(stages[1].damage.as_deref(), Some("1d6"));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn duration_units_convert() {
        let rounds = |amount, unit: &str| DurationSpec {
            amount,
            unit: unit.to_string(),
        }
        .to_rounds();
        assert_eq!(rounds(4, "round"), 4);
        assert_eq!(rounds(2, "minute"), 20);
        assert_eq!(rounds(1, "hour"), 600);
        assert_eq!(rounds(1, "day"), 14400);
    }
}
