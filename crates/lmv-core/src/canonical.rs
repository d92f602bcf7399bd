//! Canonical JSON serialization and content hashing.
//!
//! Every hash in the vault (journal entry hashes, the `prev_hash` chain, AAD
//! comparison) is computed over the output of [`canonical_json`]. The rules
//! follow RFC 8785 (JCS) where it matters for stability:
//!
//! 1. Object keys are sorted by Unicode codepoint
//! 2. No whitespace between tokens
//! 3. Strings use minimal escaping (only `"`, `\`, and C0 controls)
//! 4. Arrays preserve element order
//!
//! Canonicalization is a contract, not an optimization: two implementations
//! that disagree on a single byte produce diverging hash chains.

use std::fmt::Write as _;

use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

/// Serializes a JSON value into its canonical form.
///
/// The output is deterministic for any input value: equal values (up to
/// object key order) always produce byte-identical strings.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut output = String::new();
    emit_value(value, &mut output);
    output
}

/// Returns the lowercase hex SHA-256 digest of the UTF-8 bytes of `input`.
#[must_use]
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

fn emit_value(value: &Value, output: &mut String) {
    match value {
        Value::Null => output.push_str("null"),
        Value::Bool(b) => output.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => emit_number(n, output),
        Value::String(s) => emit_string(s, output),
        Value::Array(arr) => emit_array(arr, output),
        Value::Object(obj) => emit_object(obj, output),
    }
}

/// Emits a number in its minimal decimal form.
///
/// Integers print as plain decimals. Non-integer numbers fall back to
/// serde_json's shortest-round-trip formatting, which is stable for any
/// given bit pattern.
fn emit_number(n: &Number, output: &mut String) {
    if let Some(i) = n.as_i64() {
        let _ = write!(output, "{i}");
    } else if let Some(u) = n.as_u64() {
        let _ = write!(output, "{u}");
    } else {
        let _ = write!(output, "{n}");
    }
}

/// Emits a string with JCS minimal escaping (RFC 8785 section 3.2.2.2).
///
/// Only `"` , `\`, and the C0 control range are escaped; control characters
/// with short escapes use them, the rest use `\uXXXX`.
fn emit_string(s: &str, output: &mut String) {
    output.push('"');
    for c in s.chars() {
        match c {
            '"' => output.push_str("\\\""),
            '\\' => output.push_str("\\\\"),
            '\u{0008}' => output.push_str("\\b"),
            '\u{000C}' => output.push_str("\\f"),
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            '\t' => output.push_str("\\t"),
            c if ('\u{0000}'..='\u{001F}').contains(&c) => {
                let _ = write!(output, "\\u{:04x}", c as u32);
            },
            c => output.push(c),
        }
    }
    output.push('"');
}

fn emit_array(arr: &[Value], output: &mut String) {
    output.push('[');
    for (i, item) in arr.iter().enumerate() {
        if i > 0 {
            output.push(',');
        }
        emit_value(item, output);
    }
    output.push(']');
}

/// Emits an object with keys sorted by Unicode codepoint.
fn emit_object(obj: &Map<String, Value>, output: &mut String) {
    let mut sorted_keys: Vec<&String> = obj.keys().collect();
    sorted_keys.sort();

    output.push('{');
    for (i, key) in sorted_keys.iter().enumerate() {
        if i > 0 {
            output.push(',');
        }
        emit_string(key, output);
        output.push(':');
        emit_value(&obj[*key], output);
    }
    output.push('}');
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn sorts_object_keys() {
        let value = json!({"z": 1, "a": 2, "m": 3});
        assert_eq!(canonical_json(&value), r#"{"a":2,"m":3,"z":1}"#);
    }

    #[test]
    fn sorts_nested_objects() {
        let value = json!({"outer": {"z": 1, "a": 2}});
        assert_eq!(canonical_json(&value), r#"{"outer":{"a":2,"z":1}}"#);
    }

    #[test]
    fn preserves_array_order() {
        let value = json!([3, 1, 2]);
        assert_eq!(canonical_json(&value), "[3,1,2]");
    }

    #[test]
    fn emits_primitives() {
        assert_eq!(canonical_json(&json!(null)), "null");
        assert_eq!(canonical_json(&json!(true)), "true");
        assert_eq!(canonical_json(&json!(false)), "false");
        assert_eq!(canonical_json(&json!(42)), "42");
        assert_eq!(canonical_json(&json!(-42)), "-42");
        assert_eq!(canonical_json(&json!("hello")), r#""hello""#);
    }

    #[test]
    fn emits_empty_containers() {
        assert_eq!(canonical_json(&json!({})), "{}");
        assert_eq!(canonical_json(&json!([])), "[]");
    }

    #[test]
    fn escapes_special_chars() {
        let value = json!({"text": "line1\nline2\ttab"});
        assert_eq!(canonical_json(&value), r#"{"text":"line1\nline2\ttab"}"#);
    }

    #[test]
    fn escapes_quotes_and_backslash() {
        let value = json!({"text": "say \"hi\" and \\"});
        assert_eq!(canonical_json(&value), r#"{"text":"say \"hi\" and \\"}"#);
    }

    #[test]
    fn escapes_low_control_chars_as_unicode() {
        let value = json!({"text": "\u{0000}"});
        assert!(canonical_json(&value).contains("\\u0000"));
    }

    #[test]
    fn does_not_escape_del_or_c1() {
        // RFC 8785 only requires escapes for U+0000..U+001F, `"`, and `\`.
        let value = json!({"text": "\u{007F}\u{0085}"});
        let out = canonical_json(&value);
        assert!(!out.contains("\\u007f"));
        assert!(!out.contains("\\u0085"));
    }

    #[test]
    fn determinism_across_key_orders() {
        let a = json!({"c": 3, "a": 1, "b": [1, {"y": 2, "x": 4}]});
        let b = json!({"b": [1, {"x": 4, "y": 2}], "a": 1, "c": 3});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn idempotent_through_reparse() {
        let value = json!({"nested": {"b": 2, "a": 1}, "top": "value"});
        let once = canonical_json(&value);
        let reparsed: Value = serde_json::from_str(&once).unwrap();
        assert_eq!(once, canonical_json(&reparsed));
    }

    #[test]
    fn sha256_matches_known_vector() {
        // SHA-256 of the empty string.
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn sha256_is_lowercase_hex() {
        let digest = sha256_hex("vault");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
