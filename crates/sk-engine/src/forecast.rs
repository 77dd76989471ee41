//! Deterministic damage forecasts — no RNG, exact per-face enumeration.
//!
//! Forecasts enumerate all 20 faces of the d20 through the real degree
//! function, so natural-1/20 shifts are priced in exactly.

use serde::{Deserialize, Serialize};

use sk_types::command::SaveMode;

use crate::checks::{basic_save_multiplier, degree_of_success, Degree};
use crate::damage::DamageFormula;

/// Expected damage-per-round bucket.
pub fn bucket(expected_damage: f64) -> &'static str {
    if expected_damage < 5.0 {
        "low"
    } else if expected_damage < 12.0 {
        "moderate"
    } else {
        "high"
    }
}

/// Forecast attached to a strike event on request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeForecast {
    pub hit_chance: f64,
    pub crit_chance: f64,
    pub expected_damage: f64,
    pub bucket: String,
}

/// Exact strike expectation against an effective AC (cover included).
pub fn strike_forecast(attack_mod: i32, effective_ac: i32, formula: &DamageFormula) -> StrikeForecast {
    let mut hit_faces = 0u32;
    let mut crit_faces = 0u32;
    for die in 1..=20 {
        match degree_of_success(die + attack_mod, effective_ac, die) {
            Degree::CriticalSuccess => crit_faces += 1,
            Degree::Success => hit_faces += 1,
            _ => {}
        }
    }
    let avg = formula.average();
    let expected = avg * (hit_faces as f64 + 2.0 * crit_faces as f64) / 20.0;
    StrikeForecast {
        hit_chance: hit_faces as f64 / 20.0,
        crit_chance: crit_faces as f64 / 20.0,
        expected_damage: expected,
        bucket: bucket(expected).to_string(),
    }
}

/// Forecast descriptor attached to save-gated spell events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpellForecast {
    pub dc: i32,
    pub expected_multiplier: f64,
    pub expected_damage: f64,
    pub bucket: String,
}

/// Exact save-gated expectation for one target's save modifier.
pub fn spell_forecast(save_mod: i32, dc: i32, formula: &DamageFormula, mode: SaveMode) -> SpellForecast {
    let mut multiplier_sum = 0.0;
    for die in 1..=20 {
        let degree = degree_of_success(die + save_mod, dc, die);
        multiplier_sum += match mode {
            SaveMode::Basic => basic_save_multiplier(degree),
            SaveMode::Negates => {
                if degree.is_failure() {
                    1.0
                } else {
                    0.0
                }
            }
            SaveMode::Standard => 1.0,
        };
    }
    let expected_multiplier = multiplier_sum / 20.0;
    let expected = formula.average() * expected_multiplier;
    SpellForecast {
        dc,
        expected_multiplier,
        expected_damage: expected,
        bucket: bucket(expected).to_string(),
    }
}
