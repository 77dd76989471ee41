//! Canonical JSON and the replay hash.
//!
//! Canonical form: object keys in lexicographic order at every depth, no
//! whitespace, UTF-8. The replay hash is the lowercase-hex SHA-256 of the
//! canonicalized event array. Canonicalization is explicit rather than
//! relying on serializer map ordering, so the hash survives serializer
//! feature changes.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde_json::Value;
use sha2::{Digest, Sha256};

use sk_types::event::Event;

/// Serialize a value canonically.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        // serde_json's escaping and number formatting are the canonical
        // forms; both are deterministic.
        Value::Number(_) | Value::String(_) => {
            out.push_str(&serde_json::to_string(value).expect("scalar serializes"));
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (key, item)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("key serializes"));
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
    }
}

/// SHA-256 of the canonical event array, lowercase hex.
pub fn replay_hash(events: &[Event]) -> String {
    let value = serde_json::to_value(events).expect("events serialize");
    let canonical = canonical_json(&value);
    let digest = Sha256::digest(canonical.as_bytes());
    let mut hex = String::with_capacity(64);
    for byte in digest {
        write!(hex, "{byte:02x}").expect("writing to a String cannot fail");
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sk_types::ids::UnitId;

    #[test]
    fn keys_sort_at_every_depth() {
        let value = json!({"b": 1, "a": {"z": [3, {"y": 2, "x": 1}], "w": null}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"w":null,"z":[3,{"x":1,"y":2}]},"b":1}"#
        );
    }

    #[test]
    fn no_whitespace() {
        let value = json!({"k": [1, 2, 3], "s": "a b"});
        let out = canonical_json(&value);
        assert!(!out.contains(' ') || out.contains("a b"));
        assert_eq!(out, r#"{"k":[1,2,3],"s":"a b"}"#);
    }

    #[test]
    fn string_escaping_preserved() {
        let value = json!({"s": "line\nbreak \"quoted\""});
        assert_eq!(canonical_json(&value), r#"{"s":"line\nbreak \"quoted\""}"#);
    }

    fn sample_events() -> Vec<Event> {
        vec![Event {
            event_id: "ev_000001".to_string(),
            round: 1,
            active_unit: UnitId::from("pc"),
            event_type: "strike".to_string(),
            payload: serde_json::from_value(json!({"target": "enemy", "damage": 7}))
                .expect("object"),
        }]
    }

    #[test]
    fn hash_is_64_hex_chars_and_stable() {
        let events = sample_events();
        let h1 = replay_hash(&events);
        let h2 = replay_hash(&events);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hash_changes_with_content() {
        let events = sample_events();
        let mut other = sample_events();
        other[0].round = 2;
        assert_ne!(replay_hash(&events), replay_hash(&other));
    }

    #[test]
    fn empty_log_hashes() {
        assert_eq!(replay_hash(&[]).len(), 64);
    }
}
