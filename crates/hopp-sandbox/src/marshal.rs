//! Value marshalling between host values and their VM wire form.
//!
//! Every value that crosses the boundary travels as a tagged JSON document:
//!
//! ```text
//! {"t":"undefined"}            {"t":"null"}
//! {"t":"bool","v":true}        {"t":"number","v":1.5}   {"t":"number","v":"NaN"}
//! {"t":"string","v":"x"}       {"t":"array","v":[<wire>, ...]}
//! {"t":"object","v":[["key", <wire>], ...]}
//! {"t":"bytes","v":[0, 255, ...]}
//! ```
//!
//! The bootstrap carries the JS half (`toWire` / `fromWire`). Bytes arrive in
//! the VM as a `Uint8Array`. Inputs must be acyclic; that is the caller's job.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::SandboxError;

/// A host-side value that can cross into the sandbox and back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Wire", into = "Wire")]
pub enum HostValue {
    /// JS `undefined`.
    #[default]
    Undefined,
    /// JS `null`.
    Null,
    /// A boolean.
    Bool(bool),
    /// A number, including the non-finite ones.
    Number(f64),
    /// A string.
    String(String),
    /// An ordered array.
    Array(Vec<HostValue>),
    /// A plain object. Key order is kept but carries no meaning.
    Object(IndexMap<String, HostValue>),
    /// A byte buffer.
    Bytes(Vec<u8>),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "lowercase")]
enum Wire {
    Undefined,
    Null,
    Bool(bool),
    Number(WireNumber),
    String(String),
    Array(Vec<Wire>),
    Object(Vec<(String, Wire)>),
    Bytes(Vec<u8>),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WireNumber {
    Finite(f64),
    Special(String),
}

impl From<f64> for WireNumber {
    fn from(n: f64) -> Self {
        if n.is_finite() {
            WireNumber::Finite(n)
        } else if n.is_nan() {
            WireNumber::Special("NaN".into())
        } else if n > 0.0 {
            WireNumber::Special("Infinity".into())
        } else {
            WireNumber::Special("-Infinity".into())
        }
    }
}

impl From<WireNumber> for f64 {
    fn from(n: WireNumber) -> Self {
        match n {
            WireNumber::Finite(n) => n,
            WireNumber::Special(s) => match s.as_str() {
                "Infinity" => f64::INFINITY,
                "-Infinity" => f64::NEG_INFINITY,
                _ => f64::NAN,
            },
        }
    }
}

impl From<Wire> for HostValue {
    fn from(wire: Wire) -> Self {
        match wire {
            Wire::Undefined => HostValue::Undefined,
            Wire::Null => HostValue::Null,
            Wire::Bool(b) => HostValue::Bool(b),
            Wire::Number(n) => HostValue::Number(n.into()),
            Wire::String(s) => HostValue::String(s),
            Wire::Array(items) => HostValue::Array(items.into_iter().map(Into::into).collect()),
            Wire::Object(entries) => HostValue::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, HostValue::from(v)))
                    .collect(),
            ),
            Wire::Bytes(bytes) => HostValue::Bytes(bytes),
        }
    }
}

impl From<HostValue> for Wire {
    fn from(value: HostValue) -> Self {
        match value {
            HostValue::Undefined => Wire::Undefined,
            HostValue::Null => Wire::Null,
            HostValue::Bool(b) => Wire::Bool(b),
            HostValue::Number(n) => Wire::Number(n.into()),
            HostValue::String(s) => Wire::String(s),
            HostValue::Array(items) => Wire::Array(items.into_iter().map(Into::into).collect()),
            HostValue::Object(entries) => {
                Wire::Object(entries.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
            HostValue::Bytes(bytes) => Wire::Bytes(bytes),
        }
    }
}

/// Encode a host value into its VM wire form.
pub fn to_vm(value: &HostValue) -> Result<String, SandboxError> {
    serde_json::to_string(value).map_err(|e| SandboxError::Marshal(e.to_string()))
}

/// Decode a VM wire document into a host value.
pub fn to_host(wire: &str) -> Result<HostValue, SandboxError> {
    serde_json::from_str(wire).map_err(|e| SandboxError::Marshal(e.to_string()))
}

impl HostValue {
    /// Borrow the string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this is `null` or `undefined`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, HostValue::Null | HostValue::Undefined)
    }

    /// Lossy conversion to plain JSON for reporting: `undefined` and
    /// non-finite numbers become `null`, bytes become an integer array.
    pub fn into_json(self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            HostValue::Undefined | HostValue::Null => Value::Null,
            HostValue::Bool(b) => Value::Bool(b),
            HostValue::Number(n) => serde_json::Number::from_f64(n)
                .map(|num| {
                    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
                        Value::from(n as i64)
                    } else {
                        Value::Number(num)
                    }
                })
                .unwrap_or(Value::Null),
            HostValue::String(s) => Value::String(s),
            HostValue::Array(items) => {
                Value::Array(items.into_iter().map(HostValue::into_json).collect())
            }
            HostValue::Object(entries) => Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, v.into_json()))
                    .collect(),
            ),
            HostValue::Bytes(bytes) => Value::Array(bytes.into_iter().map(Value::from).collect()),
        }
    }

    /// Render the value the way JS template interpolation (`${value}`) does.
    pub fn to_js_string(&self) -> String {
        match self {
            HostValue::Undefined => "undefined".into(),
            HostValue::Null => "null".into(),
            HostValue::Bool(b) => b.to_string(),
            HostValue::Number(n) => format_js_number(*n),
            HostValue::String(s) => s.clone(),
            HostValue::Array(items) => items
                .iter()
                .map(|item| {
                    if item.is_nullish() {
                        String::new()
                    } else {
                        item.to_js_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(","),
            HostValue::Object(_) => "[object Object]".into(),
            HostValue::Bytes(bytes) => bytes
                .iter()
                .map(|b| b.to_string())
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

fn format_js_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".into()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.into()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}

impl From<serde_json::Value> for HostValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => HostValue::Null,
            Value::Bool(b) => HostValue::Bool(b),
            Value::Number(n) => HostValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => HostValue::String(s),
            Value::Array(items) => HostValue::Array(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => HostValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, HostValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::String(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::String(s)
    }
}

impl From<Option<String>> for HostValue {
    fn from(s: Option<String>) -> Self {
        s.map(HostValue::String).unwrap_or(HostValue::Undefined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn undefined_and_null_stay_distinct() {
        assert_eq!(to_vm(&HostValue::Undefined).unwrap(), r#"{"t":"undefined"}"#);
        assert_eq!(to_vm(&HostValue::Null).unwrap(), r#"{"t":"null"}"#);
        assert_eq!(to_host(r#"{"t":"undefined"}"#).unwrap(), HostValue::Undefined);
    }

    #[test]
    fn bytes_travel_as_integer_sequence() {
        let wire = to_vm(&HostValue::Bytes(vec![0, 127, 255])).unwrap();
        assert_eq!(wire, r#"{"t":"bytes","v":[0,127,255]}"#);
    }

    #[test]
    fn non_finite_numbers_survive() {
        let wire = to_vm(&HostValue::Number(f64::NEG_INFINITY)).unwrap();
        assert_eq!(wire, r#"{"t":"number","v":"-Infinity"}"#);
        match to_host(r#"{"t":"number","v":"NaN"}"#).unwrap() {
            HostValue::Number(n) => assert!(n.is_nan()),
            other => panic!("expected number, got {other:?}"),
        }
    }

    #[test]
    fn nested_structures_decode_from_vm_output() {
        // Shape produced by the bootstrap's toWire for `{ id: 7, tags: ["a", null] }`.
        let wire = r#"{"t":"object","v":[
            ["id",{"t":"number","v":7}],
            ["tags",{"t":"array","v":[{"t":"string","v":"a"},{"t":"null"}]}]
        ]}"#;
        let value = to_host(wire).unwrap();
        let HostValue::Object(map) = &value else {
            panic!("expected object, got {value:?}");
        };
        assert_eq!(map["id"], HostValue::Number(7.0));
        assert_eq!(
            map["tags"],
            HostValue::Array(vec![HostValue::String("a".into()), HostValue::Null])
        );
        assert_eq!(value.into_json(), json!({ "id": 7, "tags": ["a", null] }));
    }

    #[test]
    fn json_values_convert_losslessly_into_host_values() {
        let value = HostValue::from(json!({ "ok": true, "n": 1.25, "list": [1, "two"] }));
        assert_eq!(
            value.clone().into_json(),
            json!({ "ok": true, "n": 1.25, "list": [1, "two"] })
        );
        assert!(to_vm(&value).unwrap().starts_with(r#"{"t":"object""#));
    }

    #[test]
    fn js_string_rendering_matches_template_interpolation() {
        assert_eq!(HostValue::Number(200.0).to_js_string(), "200");
        assert_eq!(HostValue::Number(0.5).to_js_string(), "0.5");
        assert_eq!(
            HostValue::Array(vec![
                HostValue::Number(1.0),
                HostValue::Null,
                HostValue::String("x".into())
            ])
            .to_js_string(),
            "1,,x"
        );
        assert_eq!(
            HostValue::Object(IndexMap::new()).to_js_string(),
            "[object Object]"
        );
        assert_eq!(HostValue::Undefined.to_js_string(), "undefined");
    }
}
