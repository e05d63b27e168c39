//! Expectation matchers behind `pw.expect(...)` / `hopp.expect(...)`.
//!
//! The VM marshals the actual and expected values and the result of
//! `typeof actual`; everything else is decided here. A matcher never
//! throws: misuse becomes an `error` result, a failed assertion a `fail`.

use serde::Deserialize;

use crate::marshal::HostValue;
use crate::test_runner::{ExpectResult, ExpectStatus};

const TYPE_NAMES: &[&str] = &[
    "string",
    "boolean",
    "number",
    "object",
    "undefined",
    "bigint",
    "symbol",
    "function",
];

/// Matcher names as called from scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Matcher {
    /// `toBe(expected)`
    ToBe,
    /// `toBeLevel2xx()`
    #[serde(rename = "toBeLevel2xx")]
    ToBeLevel2xx,
    /// `toBeLevel3xx()`
    #[serde(rename = "toBeLevel3xx")]
    ToBeLevel3xx,
    /// `toBeLevel4xx()`
    #[serde(rename = "toBeLevel4xx")]
    ToBeLevel4xx,
    /// `toBeLevel5xx()`
    #[serde(rename = "toBeLevel5xx")]
    ToBeLevel5xx,
    /// `toBeType(name)`
    ToBeType,
    /// `toHaveLength(n)`
    ToHaveLength,
    /// `toInclude(needle)`
    ToInclude,
}

/// One matcher invocation as sent by the bootstrap.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatcherCall {
    /// Which matcher.
    pub matcher: Matcher,
    /// Called through `.not`.
    #[serde(default)]
    pub negated: bool,
    /// The value passed to `expect`.
    #[serde(default)]
    pub actual: HostValue,
    /// The matcher argument, `undefined` for the status matchers.
    #[serde(default)]
    pub expected: HostValue,
    /// `typeof actual`, evaluated in the VM.
    pub actual_type: String,
}

fn not(negated: bool) -> &'static str {
    if negated {
        " not"
    } else {
        ""
    }
}

fn verdict(holds: bool, negated: bool, message: String) -> ExpectResult {
    let status = if holds != negated {
        ExpectStatus::Pass
    } else {
        ExpectStatus::Fail
    };
    ExpectResult::new(status, message)
}

/// `SameValueZero` for the values that can cross the boundary.
/// SameValueZero, applied structurally to arrays and objects.
fn same_value_zero(a: &HostValue, b: &HostValue) -> bool {
    match (a, b) {
        (HostValue::Number(x), HostValue::Number(y)) => x == y || (x.is_nan() && y.is_nan()),
        (HostValue::Array(xs), HostValue::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| same_value_zero(x, y))
        }
        (HostValue::Object(xs), HostValue::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| same_value_zero(x, y)))
        }
        _ => a == b,
    }
}

fn parse_status(value: &HostValue) -> Option<i64> {
    match value {
        HostValue::Number(n) if n.is_finite() => Some(n.trunc() as i64),
        HostValue::String(s) => {
            // Mirrors parseInt: leading digits, trailing junk ignored.
            let trimmed = s.trim_start();
            let digits: String = trimmed
                .char_indices()
                .take_while(|(i, c)| c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+')))
                .map(|(_, c)| c)
                .collect();
            digits.parse().ok()
        }
        _ => None,
    }
}

fn js_length(value: &HostValue) -> Option<usize> {
    match value {
        HostValue::String(s) => Some(s.encode_utf16().count()),
        HostValue::Array(items) => Some(items.len()),
        _ => None,
    }
}

/// Evaluate one matcher call.
pub fn evaluate(call: &MatcherCall) -> ExpectResult {
    let neg = call.negated;
    let actual = call.actual.to_js_string();
    let expected = call.expected.to_js_string();

    match call.matcher {
        Matcher::ToBe => verdict(
            same_value_zero(&call.actual, &call.expected),
            neg,
            format!("Expected '{actual}' to{} be '{expected}'", not(neg)),
        ),
        Matcher::ToBeLevel2xx => status_level(call, 200),
        Matcher::ToBeLevel3xx => status_level(call, 300),
        Matcher::ToBeLevel4xx => status_level(call, 400),
        Matcher::ToBeLevel5xx => status_level(call, 500),
        Matcher::ToBeType => {
            let Some(name) = call.expected.as_str().filter(|n| TYPE_NAMES.contains(n)) else {
                return ExpectResult::new(
                    ExpectStatus::Error,
                    r#"Argument for toBeType should be "string", "boolean", "number", "object", "undefined", "bigint", "symbol" or "function""#,
                );
            };
            verdict(
                call.actual_type == name,
                neg,
                format!("Expected '{actual}' to{} be type '{name}'", not(neg)),
            )
        }
        Matcher::ToHaveLength => {
            let Some(length) = js_length(&call.actual) else {
                return ExpectResult::new(
                    ExpectStatus::Error,
                    "Expected toHaveLength to be called for an array or string",
                );
            };
            let HostValue::Number(wanted) = call.expected else {
                return ExpectResult::new(
                    ExpectStatus::Error,
                    "Argument for toHaveLength should be a number",
                );
            };
            verdict(
                length as f64 == wanted,
                neg,
                format!(
                    "Expected '{actual}' (length {length}) to{} be of length '{expected}'",
                    not(neg)
                ),
            )
        }
        Matcher::ToInclude => {
            if call.expected.is_nullish() {
                return ExpectResult::new(
                    ExpectStatus::Error,
                    "Argument for toInclude should not be null or undefined",
                );
            }
            let holds = match &call.actual {
                HostValue::String(s) => s.contains(&expected),
                HostValue::Array(items) => {
                    items.iter().any(|item| same_value_zero(item, &call.expected))
                }
                _ => {
                    return ExpectResult::new(
                        ExpectStatus::Error,
                        "Expected toInclude to be called for an array or string",
                    )
                }
            };
            verdict(
                holds,
                neg,
                format!("Expected '{actual}' to{} include '{expected}'", not(neg)),
            )
        }
    }
}

fn status_level(call: &MatcherCall, base: i64) -> ExpectResult {
    let actual = call.actual.to_js_string();
    let Some(code) = parse_status(&call.actual) else {
        return ExpectResult::new(
            ExpectStatus::Error,
            format!("Expected {base}-level status but could not parse value '{actual}'"),
        );
    };
    verdict(
        (base..base + 100).contains(&code),
        call.negated,
        format!(
            "Expected '{actual}' to{} be {base}-level status",
            not(call.negated)
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(matcher: Matcher, actual: HostValue, expected: HostValue) -> MatcherCall {
        let actual_type = match &actual {
            HostValue::Undefined => "undefined",
            HostValue::Bool(_) => "boolean",
            HostValue::Number(_) => "number",
            HostValue::String(_) => "string",
            _ => "object",
        }
        .to_string();
        MatcherCall {
            matcher,
            negated: false,
            actual,
            expected,
            actual_type,
        }
    }

    fn num(n: f64) -> HostValue {
        HostValue::Number(n)
    }

    fn object(pairs: &[(&str, HostValue)]) -> HostValue {
        HostValue::Object(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn to_be_treats_nan_as_equal() {
        let result = evaluate(&call(Matcher::ToBe, num(f64::NAN), num(f64::NAN)));
        assert_eq!(result.status, ExpectStatus::Pass, "{}", result.message);
        let result = evaluate(&call(Matcher::ToBe, num(0.0), num(-0.0)));
        assert_eq!(result.status, ExpectStatus::Pass);
    }

    #[test]
    fn to_be_compares_objects_by_structure() {
        let a = object(&[
            ("a", num(1.0)),
            ("n", HostValue::Array(vec![num(f64::NAN), HostValue::Null])),
        ]);
        let reordered = object(&[
            ("n", HostValue::Array(vec![num(f64::NAN), HostValue::Null])),
            ("a", num(1.0)),
        ]);
        let result = evaluate(&call(Matcher::ToBe, a.clone(), reordered));
        assert_eq!(result.status, ExpectStatus::Pass);

        let other = object(&[("a", num(2.0))]);
        let result = evaluate(&call(Matcher::ToBe, a, other));
        assert_eq!(result.status, ExpectStatus::Fail);
    }

    #[test]
    fn to_be_fail_and_pass() {
        let failed = evaluate(&call(Matcher::ToBe, num(1.0), num(2.0)));
        assert_eq!(failed.status, ExpectStatus::Fail);
        assert_eq!(failed.message, "Expected '1' to be '2'");

        let passed = evaluate(&call(Matcher::ToBe, num(3.0), num(3.0)));
        assert_eq!(passed.status, ExpectStatus::Pass);
    }

    #[test]
    fn negation_flips_verdict_and_message() {
        let mut c = call(Matcher::ToBe, "a".into(), "b".into());
        c.negated = true;
        let result = evaluate(&c);
        assert_eq!(result.status, ExpectStatus::Pass);
        assert_eq!(result.message, "Expected 'a' to not be 'b'");
    }

    #[test]
    fn status_levels() {
        assert_eq!(
            evaluate(&call(Matcher::ToBeLevel2xx, num(204.0), HostValue::Undefined)).status,
            ExpectStatus::Pass
        );
        let r = evaluate(&call(Matcher::ToBeLevel4xx, num(500.0), HostValue::Undefined));
        assert_eq!(r.status, ExpectStatus::Fail);
        assert_eq!(r.message, "Expected '500' to be 400-level status");
        assert_eq!(
            evaluate(&call(Matcher::ToBeLevel3xx, "302".into(), HostValue::Undefined)).status,
            ExpectStatus::Pass
        );
        let bad = evaluate(&call(Matcher::ToBeLevel5xx, "oops".into(), HostValue::Undefined));
        assert_eq!(bad.status, ExpectStatus::Error);
        assert_eq!(
            bad.message,
            "Expected 500-level status but could not parse value 'oops'"
        );
    }

    #[test]
    fn to_be_type_validates_its_argument() {
        let ok = evaluate(&call(Matcher::ToBeType, "x".into(), "string".into()));
        assert_eq!(ok.status, ExpectStatus::Pass);
        let wrong = evaluate(&call(Matcher::ToBeType, num(1.0), "string".into()));
        assert_eq!(wrong.status, ExpectStatus::Fail);
        let misuse = evaluate(&call(Matcher::ToBeType, num(1.0), "integer".into()));
        assert_eq!(misuse.status, ExpectStatus::Error);
    }

    #[test]
    fn to_have_length_misuse_is_an_error() {
        let arr = HostValue::Array(vec![num(1.0), num(2.0)]);
        assert_eq!(
            evaluate(&call(Matcher::ToHaveLength, arr.clone(), num(2.0))).status,
            ExpectStatus::Pass
        );
        let non_number = evaluate(&call(Matcher::ToHaveLength, arr, "2".into()));
        assert_eq!(non_number.status, ExpectStatus::Error);
        assert_eq!(non_number.message, "Argument for toHaveLength should be a number");
        let receiver = evaluate(&call(Matcher::ToHaveLength, num(5.0), num(1.0)));
        assert_eq!(receiver.status, ExpectStatus::Error);
    }

    #[test]
    fn string_length_counts_utf16_units() {
        assert_eq!(
            evaluate(&call(Matcher::ToHaveLength, "😀".into(), num(2.0))).status,
            ExpectStatus::Pass
        );
    }

    #[test]
    fn to_include_strings_and_arrays() {
        assert_eq!(
            evaluate(&call(Matcher::ToInclude, "hoppscotch".into(), "scotch".into())).status,
            ExpectStatus::Pass
        );
        let arr = HostValue::Array(vec![num(1.0), num(f64::NAN)]);
        assert_eq!(
            evaluate(&call(Matcher::ToInclude, arr.clone(), num(f64::NAN))).status,
            ExpectStatus::Pass
        );
        assert_eq!(
            evaluate(&call(Matcher::ToInclude, arr, HostValue::Null)).status,
            ExpectStatus::Error
        );
        assert_eq!(
            evaluate(&call(Matcher::ToInclude, num(1.0), num(1.0))).status,
            ExpectStatus::Error
        );
    }

    #[test]
    fn call_deserializes_from_bootstrap_shape() {
        let json = r#"{"matcher":"toBeLevel2xx","negated":true,
            "actual":{"t":"number","v":200},"expected":{"t":"undefined"},"actualType":"number"}"#;
        let c: MatcherCall = serde_json::from_str(json).unwrap();
        assert_eq!(c.matcher, Matcher::ToBeLevel2xx);
        assert_eq!(evaluate(&c).status, ExpectStatus::Fail);
    }
}
