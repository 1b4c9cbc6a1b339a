//! Deterministic JSON serialization used as the exact signing input.
//!
//! Output rules:
//! - object keys sorted by code point at every nesting level
//! - no whitespace (`,` and `:` separators only)
//! - UTF-8 preserved, non-ASCII characters are not escaped
//! - scalars written exactly as `serde_json` renders them
//!
//! The same routine runs at issuance and at verification. Any change to its
//! output invalidates every token in circulation.

use crate::error::LicenseResult;
use serde::Serialize;
use serde_json::Value;

/// Returns the canonical byte encoding of a JSON value.
#[must_use]
pub fn canonicalize(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    write_value(&mut out, value);
    out
}

/// Serializes `value` to JSON and returns its canonical byte encoding.
///
/// # Errors
///
/// Returns an error if `value` cannot be represented as JSON.
pub fn canonicalize_serialize<T: Serialize + ?Sized>(value: &T) -> LicenseResult<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    Ok(canonicalize(&value))
}

/// Canonical encoding as a `String`. Always valid UTF-8.
#[must_use]
pub fn canonical_string(value: &Value) -> String {
    String::from_utf8(canonicalize(value)).unwrap_or_default()
}

fn write_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
            out.push(b'{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_scalar(out, &Value::String(key.clone()));
                out.push(b':');
                write_value(out, item);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(out, item);
            }
            out.push(b']');
        }
        scalar => write_scalar(out, scalar),
    }
}

fn write_scalar(out: &mut Vec<u8>, value: &Value) {
    // Writing into a Vec cannot fail for scalar values.
    let _ = serde_json::to_writer(&mut *out, value);
}
