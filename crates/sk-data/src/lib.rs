//! Loaded data layer for the skirmish engine.
//!
//! Two document families live here: versioned content packs (spell/feat/
//! item/interact templates behind an engine-phase compatibility gate) and
//! the hazard effect-model catalog. Both are parsed strictly, validated as a
//! whole, and read-only after resolution.

pub mod effect_model;
pub mod pack;

pub use effect_model::{EffectModelCatalog, ModeledEffect, ModeledSource};
pub use pack::{ContentContext, ContentEntry, ContentPack, EntryKind};
