//! Degrees of success, checks, and saving throws.
//!
//! Classification is by ±10 thresholds first, then a single-step shift for
//! natural 1/20, clamped at the ends.

use serde::{Deserialize, Serialize};

use sk_types::command::SaveType;
use sk_types::rng::RngState;
use sk_types::state::Unit;

/// The four degrees of success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Degree {
    CriticalFailure,
    Failure,
    Success,
    CriticalSuccess,
}

impl Degree {
    pub fn step_up(self) -> Self {
        match self {
            Degree::CriticalFailure => Degree::Failure,
            Degree::Failure => Degree::Success,
            Degree::Success | Degree::CriticalSuccess => Degree::CriticalSuccess,
        }
    }

    pub fn step_down(self) -> Self {
        match self {
            Degree::CriticalSuccess => Degree::Success,
            Degree::Success => Degree::Failure,
            Degree::Failure | Degree::CriticalFailure => Degree::CriticalFailure,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Degree::Success | Degree::CriticalSuccess)
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Degree::Failure | Degree::CriticalFailure)
    }
}

/// Classify a total against a DC, then shift for the natural die.
pub fn degree_of_success(total: i32, dc: i32, die: i32) -> Degree {
    let base = if total >= dc + 10 {
        Degree::CriticalSuccess
    } else if total >= dc {
        Degree::Success
    } else if total <= dc - 10 {
        Degree::CriticalFailure
    } else {
        Degree::Failure
    };
    match die {
        20 => base.step_up(),
        1 => base.step_down(),
        _ => base,
    }
}

/// A resolved d20 roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub die: i32,
    pub modifier: i32,
    pub total: i32,
    pub dc: i32,
    pub degree: Degree,
}

/// Roll d20 + modifier against a DC.
pub fn resolve_check(rng: &mut RngState, modifier: i32, dc: i32) -> CheckOutcome {
    let die = rng.d20();
    let total = die + modifier;
    CheckOutcome {
        die,
        modifier,
        total,
        dc,
        degree: degree_of_success(total, dc, die),
    }
}

/// The unit's modifier for a given save.
pub fn save_modifier(unit: &Unit, save_type: SaveType) -> i32 {
    match save_type {
        SaveType::Fortitude => unit.fortitude,
        SaveType::Reflex => unit.reflex,
        SaveType::Will => unit.will,
    }
}

/// Roll a saving throw for a unit.
pub fn resolve_save(rng: &mut RngState, save_type: SaveType, unit: &Unit, dc: i32) -> CheckOutcome {
    resolve_check(rng, save_modifier(unit, save_type), dc)
}

/// Damage multiplier for a basic save: 0 / ½ / 1 / 2.
pub fn basic_save_multiplier(degree: Degree) -> f64 {
    match degree {
        Degree::CriticalSuccess => 0.0,
        Degree::Success => 0.5,
        Degree::Failure => 1.0,
        Degree::CriticalFailure => 2.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_without_nat_shift() {
        assert_eq!(degree_of_success(25, 15, 10), Degree::CriticalSuccess);
        assert_eq!(degree_of_success(15, 15, 10), Degree::Success);
        assert_eq!(degree_of_success(14, 15, 10), Degree::Failure);
        assert_eq!(degree_of_success(5, 15, 10), Degree::CriticalFailure);
    }

    #[test]
    fn nat_twenty_bumps_up() {
        // total = dc - 1 would be a failure; nat 20 lifts it to success
        assert_eq!(degree_of_success(14, 15, 20), Degree::Success);
        // total = dc + 10 is already a crit; nat 20 clamps at the top
        assert_eq!(degree_of_success(25, 15, 20), Degree::CriticalSuccess);
    }

    #[test]
    fn nat_one_bumps_down() {
        // total = dc + 10 would be a crit; nat 1 drops it to success
        assert_eq!(degree_of_success(25, 15, 1), Degree::Success);
        // already a crit failure; nat 1 clamps at the bottom
        assert_eq!(degree_of_success(5, 15, 1), Degree::CriticalFailure);
    }

    #[test]
    fn basic_save_curve() {
        assert_eq!(basic_save_multiplier(Degree::CriticalSuccess), 0.0);
        assert_eq!(basic_save_multiplier(Degree::Success), 0.5);
        assert_eq!(basic_save_multiplier(Degree::Failure), 1.0);
        assert_eq!(basic_save_multiplier(Degree::CriticalFailure), 2.0);
    }

    #[test]
    fn resolve_check_is_deterministic() {
        let mut a = RngState::new(101);
        let mut b = RngState::new(101);
        let ca = resolve_check(&mut a, 6, 15);
        let cb = resolve_check(&mut b, 6, 15);
        assert_eq!(ca, cb);
        assert_eq!(ca.total, ca.die + 6);
    }

    #[test]
    fn degree_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Degree::CriticalFailure).unwrap(),
            "\"critical_failure\""
        );
    }
}
