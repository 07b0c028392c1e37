//! Loose value coercion for metadata defaults and stored values.
//!
//! Numbers follow the usual dynamic-language rules: strings are parsed,
//! `null` and `false` are zero, anything unparseable becomes zero.
use serde_json::Value as Json;

/// Numeric conversion; `NaN` when the value has no numeric reading.
pub(crate) fn to_number(value: &Json) -> f64 {
    match value {
        Json::Null => 0.0,
        Json::Bool(flag) => f64::from(u8::from(*flag)),
        Json::Number(number) => number.as_f64().unwrap_or(f64::NAN),
        Json::String(text) => parse_number(text),
        Json::Array(items) => match items.as_slice() {
            [] => 0.0,
            [single] => match single {
                Json::Bool(_) | Json::Object(_) => f64::NAN,
                other => to_number(other),
            },
            _ => f64::NAN,
        },
        Json::Object(_) => f64::NAN,
    }
}

fn parse_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16).map_or(f64::NAN, |v| v as f64);
    }
    let lowered = trimmed.to_ascii_lowercase();
    if lowered.contains("inf") || lowered.contains("nan") {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

/// `Number(x) || 0`.
pub(crate) fn number_or_zero(value: &Json) -> f64 {
    let number = to_number(value);
    if number.is_nan() || number == 0.0 {
        0.0
    } else {
        number
    }
}

pub(crate) fn integer(value: &Json) -> i64 {
    number_or_zero(value).floor() as i64
}

pub(crate) fn truthy(value: &Json) -> bool {
    match value {
        Json::Null => false,
        Json::Bool(flag) => *flag,
        Json::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Json::String(text) => !text.is_empty(),
        Json::Array(_) | Json::Object(_) => true,
    }
}

/// Numbers compare against 0.5, everything else uses truthiness.
pub(crate) fn boolean(value: &Json) -> bool {
    match value {
        Json::Number(_) => number_or_zero(value) >= 0.5,
        other => truthy(other),
    }
}

/// Element-wise coercion with a default per component. Non-arrays yield the defaults.
pub(crate) fn components<T: Copy>(
    value: &Json,
    defaults: &[T],
    convert: impl Fn(&Json) -> T,
) -> Vec<T> {
    let Json::Array(items) = value else {
        return defaults.to_vec();
    };
    defaults
        .iter()
        .enumerate()
        .map(|(index, fallback)| match items.get(index) {
            None | Some(Json::Null) => *fallback,
            Some(item) => convert(item),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn numbers_follow_loose_rules() {
        assert_eq!(number_or_zero(&json!("2.5")), 2.5);
        assert_eq!(number_or_zero(&json!(" 7 ")), 7.0);
        assert_eq!(number_or_zero(&json!("abc")), 0.0);
        assert_eq!(number_or_zero(&json!(true)), 1.0);
        assert_eq!(number_or_zero(&json!(null)), 0.0);
        assert_eq!(number_or_zero(&json!([4])), 4.0);
        assert_eq!(number_or_zero(&json!([1, 2])), 0.0);
        assert_eq!(number_or_zero(&json!({"a": 1})), 0.0);
        assert_eq!(number_or_zero(&json!("0x10")), 16.0);
        assert_eq!(number_or_zero(&json!("inf")), 0.0);
    }

    #[test]
    fn integers_floor() {
        assert_eq!(integer(&json!(2.9)), 2);
        assert_eq!(integer(&json!(-0.5)), -1);
        assert_eq!(integer(&json!("3.7")), 3);
    }

    #[test]
    fn booleans_accept_numbers_and_truthiness() {
        assert!(boolean(&json!(0.5)));
        assert!(!boolean(&json!(0.49)));
        assert!(boolean(&json!("no")));
        assert!(!boolean(&json!("")));
        assert!(!boolean(&json!(null)));
    }

    #[test]
    fn components_fill_missing_slots_from_defaults() {
        let coerced = components(&json!([1, null, "x"]), &[9.0, 8.0, 7.0, 6.0], number_or_zero);
        assert_eq!(coerced, vec![1.0, 8.0, 0.0, 6.0]);
        assert_eq!(components(&json!(3), &[1.0, 2.0], number_or_zero), vec![1.0, 2.0]);
    }
}
