//! RFC 8785-style JSON canonicalization (§4.1).
//!
//! Object keys are sorted lexicographically by UTF-16 code unit, numbers are
//! emitted in their shortest round-trip form without an exponent for integers
//! up to 2^53, booleans/null are literal, strings use the minimal JSON escapes,
//! and arrays preserve order. This is the only byte-sequence ever hashed or
//! signed anywhere in settld — callers must never fall back to
//! `serde_json::to_vec` directly for anything hash- or signature-bound.

use crate::{CryptoError, CryptoResult};
use serde::Serialize;
use serde_json::Value;

/// The largest integer exactly representable in an `f64`/IEEE-754 double,
/// matching JavaScript's `Number.MAX_SAFE_INTEGER`. serde_json always decodes
/// JSON integers into `i64`/`u64`/`f64` buckets, so this bound only matters
/// when we format numbers back out.
const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_992; // 2^53

/// Canonicalize any `Serialize` value to its RFC 8785-style byte sequence.
pub fn canonicalize<T: Serialize>(value: &T) -> CryptoResult<Vec<u8>> {
    let v = serde_json::to_value(value)
        .map_err(|e| CryptoError::CanonicalizationFailed(e.to_string()))?;
    canonicalize_value(&v)
}

/// Canonicalize an already-constructed [`serde_json::Value`].
pub fn canonicalize_value(value: &Value) -> CryptoResult<Vec<u8>> {
    let mut out = String::new();
    write_canonical(value, &mut out)?;
    Ok(out.into_bytes())
}

/// Canonicalize and hex-SHA-256 a `Serialize` value in one step — the
/// preimage computation used by every `*Hash` field in the data model.
pub fn hash_canonical<T: Serialize>(value: &T) -> CryptoResult<String> {
    let bytes = canonicalize(value)?;
    Ok(crate::hash::sha256_hex(&bytes))
}

fn write_canonical(value: &Value, out: &mut String) -> CryptoResult<()> {
    match value {
        Value::Null => {
            out.push_str("null");
            Ok(())
        }
        Value::Bool(b) => {
            out.push_str(if *b { "true" } else { "false" });
            Ok(())
        }
        Value::Number(n) => write_number(n, out),
        Value::String(s) => {
            write_json_string(s, out);
            Ok(())
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
            Ok(())
        }
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            // Lexicographic by UTF-16 code unit: for the BMP-only field names
            // used throughout settld's wire types this coincides with sorting
            // by `char`, which is what Rust's default `Ord` on `&str` gives us.
            keys.sort_by(|a, b| utf16_cmp(a, b));
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(key, out);
                out.push(':');
                write_canonical(&map[*key], out)?;
            }
            out.push('}');
            Ok(())
        }
    }
}

fn utf16_cmp(a: &str, b: &str) -> std::cmp::Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

fn write_number(n: &serde_json::Number, out: &mut String) -> CryptoResult<()> {
    if let Some(i) = n.as_i64() {
        if i.abs() <= MAX_SAFE_INTEGER {
            out.push_str(&i.to_string());
            return Ok(());
        }
    }
    if let Some(u) = n.as_u64() {
        if u <= MAX_SAFE_INTEGER as u64 {
            out.push_str(&u.to_string());
            return Ok(());
        }
    }
    if let Some(f) = n.as_f64() {
        if !f.is_finite() {
            return Err(CryptoError::CanonicalizationFailed(
                "non-finite number (NaN/Inf) cannot be canonicalized".into(),
            ));
        }
        // Large integers and genuine fractional values fall back to Rust's
        // shortest round-trip float formatting (`ryu`-backed in std since
        // 1.? via `Display`), which never emits an exponent for this range.
        out.push_str(&format_shortest_float(f));
        return Ok(());
    }
    Err(CryptoError::CanonicalizationFailed("number with no numeric representation".into()))
}

fn format_shortest_float(f: f64) -> String {
    if f == f.trunc() && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        let s = format!("{f}");
        if s.contains('e') || s.contains('E') {
            format!("{f:.17}").trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            s
        }
    }
}

fn write_json_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_keys_are_sorted_lexicographically() {
        let v = json!({"b": 1, "a": 2, "c": 3});
        let bytes = canonicalize_value(&v).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), r#"{"a":2,"b":1,"c":3}"#);
    }

    #[test]
    fn nested_objects_and_arrays_canonicalize_deterministically() {
        let a = json!({"z": [1, 2, {"y": 1, "x": 2}], "a": null});
        let b = json!({"a": null, "z": [1, 2, {"x": 2, "y": 1}]});
        assert_eq!(canonicalize_value(&a).unwrap(), canonicalize_value(&b).unwrap());
    }

    #[test]
    fn integers_never_get_an_exponent() {
        let v = json!({"n": 1000000});
        let bytes = canonicalize_value(&v).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), r#"{"n":1000000}"#);
    }

    #[test]
    fn strings_use_minimal_escapes() {
        let v = json!({"s": "line\nbreak\"quote"});
        let bytes = canonicalize_value(&v).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"s":"line\nbreak\"quote"}"#
        );
    }

    #[test]
    fn same_value_produces_same_hash() {
        let a = json!({"b": 2, "a": 1});
        let b = json!({"a": 1, "b": 2});
        assert_eq!(hash_canonical(&a).unwrap(), hash_canonical(&b).unwrap());
    }
}
