//! Content packs — versioned template catalogs with compatibility gating.
//!
//! A pack is rejected as a whole on any validation failure; no partial load
//! is exposed. Selection picks one pack out of the loaded set, gates it on
//! the running engine phase, and checks required feature tags.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use sk_types::ids::{EntryId, PackId};

/// Kinds a content entry may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Action,
    Spell,
    Feat,
    Item,
    Trait,
    Condition,
}

/// Engine-phase compatibility window plus advertised feature tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Compatibility {
    pub min_engine_phase: u32,
    pub max_engine_phase: u32,
    #[serde(default)]
    pub feature_tags: Vec<String>,
}

/// One template entry in a pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContentEntry {
    pub id: EntryId,
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub payload: Map<String, Value>,
}

/// A full content pack document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContentPack {
    pub pack_id: PackId,
    /// MAJOR.MINOR.PATCH.
    pub version: String,
    pub compatibility: Compatibility,
    pub entries: Vec<ContentEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
    #[error("content pack JSON is malformed: {0}")]
    Malformed(String),
    #[error("pack_id must be a non-empty string")]
    EmptyPackId,
    #[error("pack {pack_id}: version {version:?} is not MAJOR.MINOR.PATCH")]
    BadVersion { pack_id: String, version: String },
    #[error("pack {pack_id}: min_engine_phase must be >= 1")]
    BadMinPhase { pack_id: String },
    #[error("pack {pack_id}: max_engine_phase {max} is below min_engine_phase {min}")]
    PhaseWindowInverted { pack_id: String, min: u32, max: u32 },
    #[error("pack {pack_id}: entries must be non-empty")]
    NoEntries { pack_id: String },
    #[error("pack {pack_id}: duplicate entry id {entry_id}")]
    DuplicateEntry { pack_id: String, entry_id: String },
    #[error("pack {pack_id}: entry {entry_id} has an empty id")]
    EmptyEntryId { pack_id: String, entry_id: String },
    #[error("no content packs loaded")]
    NoPacks,
    #[error("content_pack_id is required when multiple packs are loaded")]
    AmbiguousSelection,
    #[error("content pack {0} was not loaded")]
    UnknownPack(String),
    #[error("pack {pack_id} v{version} does not support engine phase {engine_phase} (window {min}..={max})")]
    PhaseGate {
        pack_id: String,
        version: String,
        engine_phase: u32,
        min: u32,
        max: u32,
    },
    #[error("pack {pack_id} is missing required content features: {missing:?}")]
    MissingFeatures { pack_id: String, missing: Vec<String> },
}

impl ContentPack {
    /// Parse and validate a pack from raw JSON text.
    pub fn from_json(text: &str) -> Result<Self, ContentError> {
        let pack: ContentPack =
            serde_json::from_str(text).map_err(|e| ContentError::Malformed(e.to_string()))?;
        pack.validate()?;
        Ok(pack)
    }

    /// Whole-document validation with specific messages.
    pub fn validate(&self) -> Result<(), ContentError> {
        if self.pack_id.is_empty() {
            return Err(ContentError::EmptyPackId);
        }
        let pack_id = self.pack_id.to_string();
        if parse_version(&self.version).is_none() {
            return Err(ContentError::BadVersion {
                pack_id,
                version: self.version.clone(),
            });
        }
        if self.compatibility.min_engine_phase < 1 {
            return Err(ContentError::BadMinPhase { pack_id });
        }
        if self.compatibility.max_engine_phase < self.compatibility.min_engine_phase {
            return Err(ContentError::PhaseWindowInverted {
                pack_id,
                min: self.compatibility.min_engine_phase,
                max: self.compatibility.max_engine_phase,
            });
        }
        if self.entries.is_empty() {
            return Err(ContentError::NoEntries { pack_id });
        }
        let mut seen = BTreeSet::new();
        for entry in &self.entries {
            if entry.id.is_empty() {
                return Err(ContentError::EmptyEntryId {
                    pack_id: pack_id.clone(),
                    entry_id: entry.id.to_string(),
                });
            }
            if !seen.insert(entry.id.clone()) {
                return Err(ContentError::DuplicateEntry {
                    pack_id: pack_id.clone(),
                    entry_id: entry.id.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Parse "MAJOR.MINOR.PATCH" into its numeric parts.
pub fn parse_version(version: &str) -> Option<(u32, u32, u32)> {
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}

/// The resolved content context: one selected pack with an entry index.
///
/// Read-only after resolution; the orchestrator holds it for the whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentContext {
    pub pack_id: PackId,
    pub version: String,
    pub feature_tags: Vec<String>,
    entries: BTreeMap<EntryId, ContentEntry>,
}

impl ContentContext {
    /// Select a pack from the loaded set and gate it.
    ///
    /// `selected_id` is required when more than one pack is loaded.
    /// `required_features` must all appear in the pack's feature tags.
    pub fn resolve(
        packs: &[ContentPack],
        selected_id: Option<&PackId>,
        engine_phase: u32,
        required_features: &[String],
    ) -> Result<Self, ContentError> {
        let pack = match (packs, selected_id) {
            ([], _) => return Err(ContentError::NoPacks),
            ([only], None) => only,
            (_, None) => return Err(ContentError::AmbiguousSelection),
            (many, Some(id)) => many
                .iter()
                .find(|p| &p.pack_id == id)
                .ok_or_else(|| ContentError::UnknownPack(id.to_string()))?,
        };

        let compat = &pack.compatibility;
        if engine_phase < compat.min_engine_phase || engine_phase > compat.max_engine_phase {
            return Err(ContentError::PhaseGate {
                pack_id: pack.pack_id.to_string(),
                version: pack.version.clone(),
                engine_phase,
                min: compat.min_engine_phase,
                max: compat.max_engine_phase,
            });
        }

        let missing: Vec<String> = required_features
            .iter()
            .filter(|f| !compat.feature_tags.contains(f))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ContentError::MissingFeatures {
                pack_id: pack.pack_id.to_string(),
                missing,
            });
        }

        let entries = pack
            .entries
            .iter()
            .map(|e| (e.id.clone(), e.clone()))
            .collect();
        Ok(Self {
            pack_id: pack.pack_id.clone(),
            version: pack.version.clone(),
            feature_tags: compat.feature_tags.clone(),
            entries,
        })
    }

    pub fn entry(&self, id: &EntryId) -> Option<&ContentEntry> {
        self.entries.get(id)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_pack_json() -> String {
        json!({
            "pack_id": "core_srd",
            "version": "1.4.0",
            "compatibility": {
                "min_engine_phase": 1,
                "max_engine_phase": 9,
                "feature_tags": ["spells", "afflictions"]
            },
            "entries": [
                {
                    "id": "spell.arc_flash",
                    "kind": "spell",
                    "tags": ["evocation"],
                    "payload": {
                        "command_type": "cast_spell",
                        "save_type": "reflex",
                        "damage": "6d6",
                        "damage_type": "electricity"
                    }
                },
                {
                    "id": "item.sunrod",
                    "kind": "item",
                    "payload": {"command_type": "use_item", "effect_kind": "condition"}
                }
            ]
        })
        .to_string()
    }

    #[test]
    fn valid_pack_parses() {
        let pack = ContentPack::from_json(&sample_pack_json()).unwrap();
        assert_eq!(pack.pack_id.as_str(), "core_srd");
        assert_eq!(pack.entries.len(), 2);
    }

    #[test]
    fn unknown_fields_rejected() {
        let mut v: Value = serde_json::from_str(&sample_pack_json()).unwrap();
        v["surprise"] = json!(true);
        let err = ContentPack::from_json(&v.to_string()).unwrap_err();
        assert!(matches!(err, ContentError::Malformed(_)));
    }

    #[test]
    fn bad_version_rejected() {
        let mut v: Value = serde_json::from_str(&sample_pack_json()).unwrap();
        v["version"] = json!("1.4");
        let err = ContentPack::from_json(&v.to_string()).unwrap_err();
        assert!(matches!(err, ContentError::BadVersion { .. }));
    }

    #[test]
    fn duplicate_entry_rejected() {
        let mut v: Value = serde_json::from_str(&sample_pack_json()).unwrap();
        let first = v["entries"][0].clone();
        v["entries"].as_array_mut().unwrap().push(first);
        let err = ContentPack::from_json(&v.to_string()).unwrap_err();
        assert!(matches!(err, ContentError::DuplicateEntry { .. }));
    }

    #[test]
    fn phase_gate_enforced() {
        let pack = ContentPack::from_json(&sample_pack_json()).unwrap();
        let err = ContentContext::resolve(std::slice::from_ref(&pack), None, 12, &[]).unwrap_err();
        assert!(matches!(err, ContentError::PhaseGate { engine_phase: 12, .. }));
        assert!(ContentContext::resolve(std::slice::from_ref(&pack), None, 7, &[]).is_ok());
    }

    #[test]
    fn required_features_checked() {
        let pack = ContentPack::from_json(&sample_pack_json()).unwrap();
        let err = ContentContext::resolve(
            std::slice::from_ref(&pack),
            None,
            7,
            &["spells".to_string(), "worldmap".to_string()],
        )
        .unwrap_err();
        match err {
            ContentError::MissingFeatures { missing, .. } => {
                assert_eq!(missing, vec!["worldmap".to_string()]);
            }
            other => panic!("wrong error: {other:?}"),
        }
    }

    #[test]
    fn multiple_packs_require_selection() {
        let a = ContentPack::from_json(&sample_pack_json()).unwrap();
        let mut b = a.clone();
        b.pack_id = PackId::from("expansion");
        let packs = vec![a, b];
        let err = ContentContext::resolve(&packs, None, 7, &[]).unwrap_err();
        assert_eq!(err, ContentError::AmbiguousSelection);

        let ctx =
            ContentContext::resolve(&packs, Some(&PackId::from("expansion")), 7, &[]).unwrap();
        assert_eq!(ctx.pack_id.as_str(), "expansion");
        assert!(ctx.entry(&EntryId::from("spell.arc_flash")).is_some());
    }

    #[test]
    fn parse_version_shapes() {
        assert_eq!(parse_version("1.2.3"), Some((1, 2, 3)));
        assert_eq!(parse_version("10.0.100"), Some((10, 0, 100)));
        assert_eq!(parse_version("1.2"), None);
        assert_eq!(parse_version("1.2.3.4"), None);
        assert_eq!(parse_version("a.b.c"), None);
    }
}
