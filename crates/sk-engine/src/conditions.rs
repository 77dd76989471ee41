//! Condition value semantics and immunity.
//!
//! Conditions are a name → intensity map. Applying takes the element-wise
//! max with the existing value; a value of 0 is never stored.

use std::collections::BTreeMap;

/// Canonical condition name: lowercase, spaces and hyphens to underscores.
pub fn normalize_condition(name: &str) -> String {
    name.trim().to_lowercase().replace([' ', '-'], "_")
}

/// Apply a condition at the given value (minimum 1), keeping the larger of
/// the existing and incoming values. Returns the stored value.
pub fn apply_condition(conditions: &mut BTreeMap<String, u32>, name: &str, value: u32) -> u32 {
    let name = normalize_condition(name);
    let value = value.max(1);
    let entry = conditions.entry(name).or_insert(0);
    *entry = (*entry).max(value);
    *entry
}

/// Remove a condition. Returns true when it was present.
pub fn clear_condition(conditions: &mut BTreeMap<String, u32>, name: &str) -> bool {
    conditions.remove(&normalize_condition(name)).is_some()
}

/// Immunity check against a unit's condition-immunity list, honoring the
/// "all_conditions" sentinel.
pub fn is_immune(name: &str, immunities: &[String]) -> bool {
    let name = normalize_condition(name);
    immunities.iter().any(|imm| {
        let imm = normalize_condition(imm);
        imm == "all_conditions" || imm == name
    })
}
