//! Damage pipeline — formula parsing and rolling, type-tag modifiers,
//! temp-HP pool absorption.
//!
//! Order of operations: roll (dice + flat, × multiplier, floored, clamped at
//! 0) → resistance/weakness/immunity by tag group → temp-HP absorption →
//! HP loss.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sk_types::rng::RngState;
use sk_types::state::Unit;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormulaError {
    #[error("invalid damage formula {0:?}")]
    Invalid(String),
}

/// Parsed damage formula: `NdS[±M]` or a bare signed integer (N = 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageFormula {
    pub dice: u32,
    pub sides: u32,
    pub flat: i32,
}

impl DamageFormula {
    pub fn parse(text: &str) -> Result<Self, FormulaError> {
        let s: String = text.trim().to_lowercase().replace(' ', "");
        if s.is_empty() {
            return Err(FormulaError::Invalid(text.to_string()));
        }

        let Some(d_pos) = s.find('d') else {
            // Bare signed integer.
            let flat = s
                .parse::<i32>()
                .map_err(|_| FormulaError::Invalid(text.to_string()))?;
            return Ok(Self {
                dice: 0,
                sides: 0,
                flat,
            });
        };

        let dice: u32 = s[..d_pos]
            .parse()
            .map_err(|_| FormulaError::Invalid(text.to_string()))?;
        let rest = &s[d_pos + 1..];
        let split = rest.find(['+', '-']);
        let (sides_str, flat) = match split {
            Some(pos) => {
                let flat: i32 = rest[pos..]
                    .parse()
                    .map_err(|_| FormulaError::Invalid(text.to_string()))?;
                (&rest[..pos], flat)
            }
            None => (rest, 0),
        };
        let sides: u32 = sides_str
            .parse()
            .map_err(|_| FormulaError::Invalid(text.to_string()))?;
        if dice == 0 || sides == 0 {
            return Err(FormulaError::Invalid(text.to_string()));
        }
        Ok(Self { dice, sides, flat })
    }

    /// Roll the formula, apply a multiplier, floor, clamp at 0.
    pub fn roll(&self, rng: &mut RngState, multiplier: f64) -> i32 {
        let mut sum: i32 = 0;
        for _ in 0..self.dice {
            sum += rng.randint(1, self.sides as i32);
        }
        let total = ((sum + self.flat) as f64 * multiplier).floor() as i32;
        total.max(0)
    }

    /// Expected value of one roll at multiplier 1.
    pub fn average(&self) -> f64 {
        self.dice as f64 * (self.sides as f64 + 1.0) / 2.0 + self.flat as f64
    }
}

/// Parse and roll in one step.
pub fn roll_damage(
    rng: &mut RngState,
    formula: &str,
    multiplier: f64,
) -> Result<i32, FormulaError> {
    Ok(DamageFormula::parse(formula)?.roll(rng, multiplier))
}

/// Canonical spelling of a damage type.
pub fn normalize_damage_type(damage_type: &str) -> String {
    let t = damage_type.trim().to_lowercase();
    match t.as_str() {
        "lightning" | "electric" => "electricity".to_string(),
        "pierce" => "piercing".to_string(),
        "slash" => "slashing".to_string(),
        "bludgeon" | "blunt" => "bludgeoning".to_string(),
        "frost" => "cold".to_string(),
        "flame" => "fire".to_string(),
        _ => t,
    }
}

const PHYSICAL_TYPES: [&str; 3] = ["bludgeoning", "piercing", "slashing"];
const ENERGY_TYPES: [&str; 6] = ["acid", "cold", "electricity", "fire", "force", "sonic"];

/// The tag set a damage type matches against: the type itself plus its
/// physical/energy group tag.
pub fn damage_type_tags(damage_type: &str) -> Vec<String> {
    let t = normalize_damage_type(damage_type);
    let mut tags = vec![t.clone()];
    if PHYSICAL_TYPES.contains(&t.as_str()) {
        tags.push("physical".to_string());
    }
    if ENERGY_TYPES.contains(&t.as_str()) {
        tags.push("energy".to_string());
    }
    tags
}

/// Outcome of resistance/weakness/immunity application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedDamage {
    pub raw: i32,
    pub resistance: i32,
    pub weakness: i32,
    pub applied: i32,
    pub immune: bool,
}

/// Apply resistances, weaknesses, and immunities to a raw amount.
///
/// Immunity wins outright unless bypassed; resistance and weakness each take
/// the single largest matching entry ("all" matches everything); bypass
/// removes resistance/immunity entries but never weaknesses.
pub fn apply_modifiers(
    raw: i32,
    damage_type: &str,
    resistances: &BTreeMap<String, i32>,
    weaknesses: &BTreeMap<String, i32>,
    immunities: &[String],
    bypass: &[String],
) -> AppliedDamage {
    let tags = damage_type_tags(damage_type);
    let bypass: Vec<String> = bypass.iter().map(|b| normalize_damage_type(b)).collect();
    let bypassed = |key: &str| bypass.iter().any(|b| b == key);

    let immune = immunities.iter().any(|imm| {
        let imm = normalize_damage_type(imm);
        (imm == "all" || tags.contains(&imm)) && !bypassed(&imm)
    });
    if immune {
        return AppliedDamage {
            raw,
            resistance: 0,
            weakness: 0,
            applied: 0,
            immune: true,
        };
    }

    let max_matching = |table: &BTreeMap<String, i32>, honor_bypass: bool| -> i32 {
        table
            .iter()
            .filter_map(|(key, &amount)| {
                let key = normalize_damage_type(key);
                if honor_bypass && bypassed(&key) {
                    return None;
                }
                (key == "all" || tags.contains(&key)).then_some(amount)
            })
            .max()
            .unwrap_or(0)
    };

    let resistance = max_matching(resistances, true);
    let weakness = max_matching(weaknesses, false);
    let applied = (raw - resistance + weakness).max(0);
    AppliedDamage {
        raw,
        resistance,
        weakness,
        applied,
        immune: false,
    }
}

/// Outcome of temp-HP absorption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolResult {
    pub absorbed: i32,
    pub hp_loss: i32,
    pub new_hp: i32,
    pub new_temp_hp: i32,
}

/// Temp HP absorbs before HP; HP never drops below 0.
pub fn apply_to_pool(hp: i32, temp_hp: i32, total: i32) -> PoolResult {
    let absorbed = temp_hp.min(total);
    let hp_loss = total - absorbed;
    PoolResult {
        absorbed,
        hp_loss,
        new_hp: (hp - hp_loss).max(0),
        new_temp_hp: temp_hp - absorbed,
    }
}

/// Convenience: apply a final amount to a unit's pools, marking unconscious
/// at 0 hp. Returns the pool arithmetic.
pub fn damage_unit(unit: &mut Unit, total: i32) -> PoolResult {
    let result = apply_to_pool(unit.hp, unit.temp_hp, total);
    unit.hp = result.new_hp;
    unit.temp_hp = result.new_temp_hp;
    if unit.temp_hp == 0 {
        unit.temp_hp_source = None;
        unit.temp_hp_owner_effect = None;
    }
    if unit.hp == 0 {
        unit.conditions.entry("unconscious".to_string()).or_insert(1);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_dice_with_flat() {
        assert_eq!(
            DamageFormula::parse("1d8+3").unwrap(),
            DamageFormula {
                dice: 1,
                sides: 8,
                flat: 3
            }
        );
        assert_eq!(
            DamageFormula::parse("6d6").unwrap(),
            DamageFormula {
                dice: 6,
                sides: 6,
                flat: 0
            }
        );
        assert_eq!(
            DamageFormula::parse("2d10-1").unwrap(),
            DamageFormula {
                dice: 2,
                sides: 10,
                flat: -1
            }
        );
    }

    #[test]
    fn parse_bare_integer() {
        assert_eq!(
            DamageFormula::parse("5").unwrap(),
            DamageFormula {
                dice: 0,
                sides: 0,
                flat: 5
            }
        );
        assert_eq!(DamageFormula::parse("-2").unwrap().flat, -2);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(DamageFormula::parse("").is_err());
        assert!(DamageFormula::parse("d6").is_err());
        assert!(DamageFormula::parse("1d").is_err());
        assert!(DamageFormula::parse("one d six").is_err());
        assert!(DamageFormula::parse("0d6").is_err());
    }

    #[test]
    fn roll_respects_multiplier_and_floor() {
        let mut rng = RngState::new(1);
        // Bare 7 halved floors to 3.
        assert_eq!(DamageFormula::parse("7").unwrap().roll(&mut rng, 0.5), 3);
        // Zero multiplier always yields zero.
        assert_eq!(DamageFormula::parse("6d6").unwrap().roll(&mut rng, 0.0), 0);
        // Negative flat clamps at zero.
        assert_eq!(DamageFormula::parse("-4").unwrap().roll(&mut rng, 1.0), 0);
    }

    #[test]
    fn alias_normalization() {
        assert_eq!(normalize_damage_type("Lightning"), "electricity");
        assert_eq!(normalize_damage_type("pierce"), "piercing");
        assert_eq!(normalize_damage_type("fire"), "fire");
    }

    #[test]
    fn tag_groups() {
        assert_eq!(
            damage_type_tags("slashing"),
            vec!["slashing".to_string(), "physical".to_string()]
        );
        assert_eq!(
            damage_type_tags("lightning"),
            vec!["electricity".to_string(), "energy".to_string()]
        );
        assert_eq!(damage_type_tags("poison"), vec!["poison".to_string()]);
    }

    fn table(entries: &[(&str, i32)]) -> BTreeMap<String, i32> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn immunity_zeroes_damage() {
        let out = apply_modifiers(
            12,
            "fire",
            &BTreeMap::new(),
            &BTreeMap::new(),
            &["fire".to_string()],
            &[],
        );
        assert!(out.immune);
        assert_eq!(out.applied, 0);
    }

    #[test]
    fn group_immunity_matches() {
        let out = apply_modifiers(
            12,
            "slashing",
            &BTreeMap::new(),
            &BTreeMap::new(),
            &["physical".to_string()],
            &[],
        );
        assert!(out.immune);
    }

    #[test]
    fn bypass_defeats_immunity() {
        let out = apply_modifiers(
            12,
            "fire",
            &BTreeMap::new(),
            &BTreeMap::new(),
            &["fire".to_string()],
            &["fire".to_string()],
        );
        assert!(!out.immune);
        assert_eq!(out.applied, 12);
    }

    #[test]
    fn all_immunity_sentinel() {
        let out = apply_modifiers(
            9,
            "cold",
            &BTreeMap::new(),
            &BTreeMap::new(),
            &["all".to_string()],
            &[],
        );
        assert!(out.immune);
    }

    #[test]
    fn resistance_takes_max_matching() {
        let out = apply_modifiers(
            10,
            "slashing",
            &table(&[("physical", 3), ("slashing", 5), ("fire", 9)]),
            &BTreeMap::new(),
            &[],
            &[],
        );
        assert_eq!(out.resistance, 5);
        assert_eq!(out.applied, 5);
    }

    #[test]
    fn weakness_ignores_bypass() {
        let out = apply_modifiers(
            10,
            "fire",
            &table(&[("fire", 4)]),
            &table(&[("fire", 3)]),
            &[],
            &["fire".to_string()],
        );
        // Bypass removes the resistance but the weakness still applies.
        assert_eq!(out.resistance, 0);
        assert_eq!(out.weakness, 3);
        assert_eq!(out.applied, 13);
    }

    #[test]
    fn applied_never_negative() {
        let out = apply_modifiers(
            2,
            "cold",
            &table(&[("cold", 10)]),
            &BTreeMap::new(),
            &[],
            &[],
        );
        assert_eq!(out.applied, 0);
    }

    #[test]
    fn pool_absorbs_temp_first() {
        let out = apply_to_pool(20, 5, 9);
        assert_eq!(out.absorbed, 5);
        assert_eq!(out.hp_loss, 4);
        assert_eq!(out.new_hp, 16);
        assert_eq!(out.new_temp_hp, 0);
    }

    #[test]
    fn pool_clamps_hp_at_zero() {
        let out = apply_to_pool(3, 0, 10);
        assert_eq!(out.new_hp, 0);
        assert_eq!(out.hp_loss, 10);
    }

    proptest! {
        #[test]
        fn pool_invariants(hp in 0..200i32, temp in 0..50i32, dmg in 0..300i32) {
            let out = apply_to_pool(hp, temp, dmg);
            prop_assert!(out.new_hp >= 0);
            prop_assert!(out.new_temp_hp >= 0);
            prop_assert!(out.absorbed <= temp);
            prop_assert_eq!(out.absorbed + out.hp_loss, dmg);
        }

        #[test]
        fn modifiers_never_go_negative(raw in 0..100i32, res in 0..50i32, weak in 0..50i32) {
            let out = apply_modifiers(
                raw,
                "fire",
                &table(&[("fire", res)]),
                &table(&[("fire", weak)]),
                &[],
                &[],
            );
            prop_assert!(out.applied >= 0);
            prop_assert_eq!(out.applied, (raw - res + weak).max(0));
        }
    }
}
