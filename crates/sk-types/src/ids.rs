//! Branded/newtype ID types for type safety.
//!
//! Each ID wraps a `Box<str>` for cheap cloning and small struct size.

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Box<str>);

        impl $name {
            pub fn new(s: impl Into<Box<str>>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.into())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s.into_boxed_str())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(
    /// Stable unit identifier (e.g., "pc", "enemy_archer_2").
    UnitId
);

define_id!(
    /// Generated effect identifier ("eff_0001", "eff_0002", ...).
    EffectId
);

define_id!(
    /// Content pack identifier.
    PackId
);

define_id!(
    /// Content entry identifier ("spell.arc_flash", "item.sunrod").
    EntryId
);

define_id!(
    /// Hazard identifier in the effect-model catalog.
    HazardId
);
