use serde_json::{Map, Value as Json};

use super::coerce;
use crate::layer::{BlendMode, Curve};

/// Settings read from the comment that trails a uniform declaration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UniformMetadata {
    pub default: Option<Json>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
    pub enum_options: Option<Json>,
    pub curve: Option<Curve>,
    /// Editor hint such as `color`, `gradient`, `button` or `axis`.
    pub type_hint: Option<String>,
    /// Everything that was parsed, including keys the compositor ignores.
    pub raw: Map<String, Json>,
}

impl UniformMetadata {
    /// Parses a trailing comment such as `// default: 0.5, min: 0, max: 1`.
    /// Anything that does not parse yields empty metadata.
    pub fn parse(trailing: &str) -> Self {
        match parse_object(trailing) {
            Some(raw) => Self::from_map(raw),
            None => Self::default(),
        }
    }

    fn from_map(raw: Map<String, Json>) -> Self {
        let finite = |key: &str| {
            raw.get(key)
                .map(coerce::to_number)
                .filter(|number| number.is_finite())
        };
        let curve = raw.get("curve").and_then(|value| {
            serde_json::from_value::<Curve>(value.clone())
                .map_err(|err| tracing::debug!(error = %err, "ignoring malformed curve metadata"))
                .ok()
        });
        Self {
            default: raw.get("default").cloned(),
            min: finite("min"),
            max: finite("max"),
            step: finite("step"),
            enum_options: raw.get("enum").cloned(),
            curve,
            type_hint: raw.get("type").and_then(Json::as_str).map(str::to_string),
            raw,
        }
    }
}

/// Named integer choices for an enum uniform, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumOptions(pub Vec<(String, i64)>);

impl EnumOptions {
    /// Accepts an array of names, an object of name to code, or `"blendMode"`.
    pub fn from_metadata(value: &Json) -> Option<Self> {
        let options: Vec<(String, i64)> = match value {
            Json::String(name) if name == "blendMode" => BlendMode::ALL
                .iter()
                .map(|mode| (mode.name().to_string(), i64::from(mode.code())))
                .collect(),
            Json::Array(names) => names
                .iter()
                .enumerate()
                .filter_map(|(code, name)| Some((name.as_str()?.to_string(), code as i64)))
                .collect(),
            Json::Object(entries) => entries
                .iter()
                .map(|(name, code)| (name.clone(), coerce::integer(code)))
                .collect(),
            _ => return None,
        };
        (!options.is_empty()).then_some(Self(options))
    }

    pub fn code_of(&self, name: &str) -> Option<i64> {
        self.0
            .iter()
            .find(|(option, _)| option == name)
            .map(|(_, code)| *code)
    }

    pub fn contains_code(&self, code: i64) -> bool {
        self.0.iter().any(|(_, existing)| *existing == code)
    }

    pub fn first_code(&self) -> i64 {
        self.0.first().map_or(0, |(_, code)| *code)
    }
}

/// Best-effort parse of a comment into a JSON object.
pub(crate) fn parse_object(trailing: &str) -> Option<Map<String, Json>> {
    let mut text = trailing.trim();
    if let Some(rest) = text.strip_prefix("//") {
        text = rest.trim();
    } else if let Some(rest) = text.strip_prefix("/*") {
        text = rest.trim_end().strip_suffix("*/").unwrap_or(rest).trim();
    }
    if text.is_empty() {
        return None;
    }

    let wrapped = if text.starts_with('{') {
        text.to_string()
    } else {
        format!("{{{text}}}")
    };
    let quoted = quote_keys(&wrapped);
    match serde_json::from_str::<Json>(&quoted) {
        Ok(Json::Object(map)) => Some(map),
        Ok(_) => None,
        Err(err) => {
            tracing::debug!(comment = trailing, error = %err, "metadata comment is not an object");
            None
        }
    }
}

/// Wraps bare object keys in double quotes and turns single-quoted strings
/// into double-quoted ones.
fn quote_keys(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut output = String::with_capacity(input.len() + 16);
    let mut last_significant: Option<char> = None;
    let mut index = 0;

    while index < chars.len() {
        let current = chars[index];
        if current == '"' || current == '\'' {
            let quote = current;
            output.push('"');
            index += 1;
            while index < chars.len() && chars[index] != quote {
                match chars[index] {
                    '\\' if index + 1 < chars.len() => {
                        output.push('\\');
                        output.push(chars[index + 1]);
                        index += 2;
                        continue;
                    }
                    '"' => output.push_str("\\\""),
                    other => output.push(other),
                }
                index += 1;
            }
            output.push('"');
            index += 1;
            last_significant = Some('"');
            continue;
        }

        let starts_key = (current.is_ascii_alphabetic() || current == '_' || current == '$')
            && matches!(last_significant, Some('{') | Some(','));
        if starts_key {
            let start = index;
            while index < chars.len()
                && (chars[index].is_ascii_alphanumeric() || chars[index] == '_' || chars[index] == '$')
            {
                index += 1;
            }
            let word: String = chars[start..index].iter().collect();
            let mut lookahead = index;
            while lookahead < chars.len() && chars[lookahead].is_whitespace() {
                lookahead += 1;
            }
            if chars.get(lookahead) == Some(&':') {
                output.push('"');
                output.push_str(&word);
                output.push('"');
            } else {
                output.push_str(&word);
            }
            last_significant = word.chars().last();
            continue;
        }

        if !current.is_whitespace() {
            last_significant = Some(current);
        }
        output.push(current);
        index += 1;
    }
    output
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::layer::CurveInput;

    #[test]
    fn bare_keys_are_quoted() {
        let metadata = UniformMetadata::parse("// default: 0.5, min: 0, max: 2, step: 0.1");
        assert_eq!(metadata.default, Some(json!(0.5)));
        assert_eq!(metadata.min, Some(0.0));
        assert_eq!(metadata.max, Some(2.0));
        assert_eq!(metadata.step, Some(0.1));
    }

    #[test]
    fn nested_objects_and_single_quotes_parse() {
        let metadata = UniformMetadata::parse(
            "// type: 'color', default: [1, 0.5, 0], curve: { min: 0, max: 1, input: { source: 'time', duration: 2 } }",
        );
        assert_eq!(metadata.type_hint.as_deref(), Some("color"));
        assert_eq!(metadata.default, Some(json!([1, 0.5, 0])));
        let curve = metadata.curve.expect("curve");
        assert_eq!(
            curve.input,
            CurveInput::Time {
                duration: 2.0,
                repeat: true
            }
        );
    }

    #[test]
    fn values_that_look_like_keys_are_untouched() {
        let map = parse_object("// enum: [\"low: 1\", \"high\"], default: \"high\"").unwrap();
        assert_eq!(map.get("enum"), Some(&json!(["low: 1", "high"])));
        assert_eq!(map.get("default"), Some(&json!("high")));
    }

    #[test]
    fn garbage_falls_back_to_empty_metadata() {
        assert_eq!(UniformMetadata::parse("// just a note"), UniformMetadata::default());
        assert_eq!(UniformMetadata::parse(""), UniformMetadata::default());
        assert_eq!(UniformMetadata::parse("// default: [1,"), UniformMetadata::default());
    }

    #[test]
    fn enum_options_accept_all_shapes() {
        let names = EnumOptions::from_metadata(&json!(["a", "b", "c"])).unwrap();
        assert_eq!(names.code_of("c"), Some(2));
        let mapped = EnumOptions::from_metadata(&json!({"off": 0, "on": 10})).unwrap();
        assert_eq!(mapped.code_of("on"), Some(10));
        let blend = EnumOptions::from_metadata(&json!("blendMode")).unwrap();
        assert_eq!(blend.code_of("multiply"), Some(7));
        assert!(EnumOptions::from_metadata(&json!(3)).is_none());
    }
}
