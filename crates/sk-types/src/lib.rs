//! Core types for the skirmish engine — IDs, RNG, grid math, battle state,
//! the command union, and the event record.
//!
//! This crate defines every type shared across the engine and carries no
//! game logic beyond small structural helpers (occupancy, id allocation).

pub mod command;
pub mod event;
pub mod grid;
pub mod ids;
pub mod rng;
pub mod state;

// Re-export commonly used types at crate root
pub use command::{Command, PlacementPolicy, SaveMode, SaveType, TargetPolicy};
pub use event::Event;
pub use grid::TilePos;
pub use ids::*;
pub use rng::RngState;
pub use state::{BattleMap, BattleState, Effect, EffectKind, TickTiming, Unit};
