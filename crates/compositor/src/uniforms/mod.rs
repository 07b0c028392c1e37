//! Uniform extraction and value reconciliation.
//!
//! [`extract_uniforms`] scans shader text for `uniform <type> <name>;`
//! declarations, reads the metadata comment trailing each one and pairs every
//! declaration with a [`ShaderValue`]. Values edited in a previous compile are
//! carried over by name, or by position when a uniform was renamed.
use std::collections::HashSet;

use serde_json::Value as Json;

use crate::gpu::UniformLocation;
use crate::layer::{
    AxisBindings, ButtonBindings, Gradient, ShaderValue, TextureDescriptor, Value, ValueKind,
};

pub(crate) mod coerce;
mod metadata;
pub(crate) mod scan;

pub use metadata::{EnumOptions, UniformMetadata};
pub(crate) use metadata::parse_object as parse_comment_object;

/// Optional numeric constraints for editors.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NumericRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UniformKind {
    Float { default: f64, range: NumericRange },
    Int { default: i64, range: NumericRange },
    Vector { default: Vec<f64>, range: NumericRange, color: bool },
    IntVector { default: Vec<i64>, range: NumericRange },
    Bool { default: bool },
    BoolVector { default: Vec<bool> },
    Enum { options: EnumOptions, default: i64 },
    Sampler { default: TextureDescriptor },
    Gradient { default: Gradient },
    Button { default: ButtonBindings },
    Axis { default: AxisBindings },
}

/// A uniform declared by a layer's code.
#[derive(Debug, Clone, PartialEq)]
pub struct Uniform {
    pub name: String,
    /// GLSL type as written in the declaration.
    pub glsl_type: String,
    pub kind: UniformKind,
    pub metadata: UniformMetadata,
    pub location: Option<UniformLocation>,
    /// Byte offsets of every occurrence of the name in the source.
    pub occurrences: Vec<usize>,
    pub shader_value: ShaderValue,
}

impl UniformKind {
    /// Maps a GLSL type plus metadata onto a kind. Unsupported types yield `None`.
    pub fn classify(glsl_type: &str, metadata: &UniformMetadata) -> Option<Self> {
        let range = NumericRange {
            min: metadata.min,
            max: metadata.max,
            step: metadata.step,
        };
        let hint = metadata.type_hint.as_deref();
        let default = metadata.default.as_ref().unwrap_or(&Json::Null);

        let kind = match glsl_type {
            "float" if hint == Some("axis") => UniformKind::Axis {
                default: structural(default).unwrap_or_default(),
            },
            "float" => UniformKind::Float {
                default: coerce::number_or_zero(default),
                range,
            },
            "int" => match metadata.enum_options.as_ref().and_then(EnumOptions::from_metadata) {
                Some(options) => {
                    let fallback = options.first_code();
                    UniformKind::Enum {
                        default: coerce_enum(default, &options, fallback),
                        options,
                    }
                }
                None => UniformKind::Int {
                    default: coerce::integer(default),
                    range,
                },
            },
            "bool" => UniformKind::Bool {
                default: coerce::boolean(default),
            },
            "vec4" if hint == Some("button") => UniformKind::Button {
                default: structural(default).unwrap_or_default(),
            },
            "vec2" | "vec3" | "vec4" => {
                let size = vector_size(glsl_type);
                let color = hint == Some("color");
                let mut zeros = vec![0.0; size];
                if color && size == 4 {
                    zeros[3] = 1.0;
                }
                UniformKind::Vector {
                    default: coerce::components(default, &zeros, coerce::number_or_zero),
                    range,
                    color,
                }
            }
            "ivec2" | "ivec3" | "ivec4" => UniformKind::IntVector {
                default: coerce::components(default, &vec![0; vector_size(glsl_type)], coerce::integer),
                range,
            },
            "bvec2" | "bvec3" | "bvec4" => UniformKind::BoolVector {
                default: coerce::components(default, &vec![false; vector_size(glsl_type)], coerce::boolean),
            },
            "sampler2D" if hint == Some("gradient") => UniformKind::Gradient {
                default: coerce_gradient(default, &Gradient::default()),
            },
            "sampler2D" => UniformKind::Sampler {
                default: coerce_sampler(default, &TextureDescriptor::default()),
            },
            _ => return None,
        };
        Some(kind)
    }

    pub fn value_kind(&self) -> ValueKind {
        match self {
            UniformKind::Float { .. } => ValueKind::Float,
            UniformKind::Int { .. } => ValueKind::Int,
            UniformKind::Vector { default, .. } => ValueKind::Vector(default.len()),
            UniformKind::IntVector { default, .. } => ValueKind::IntVector(default.len()),
            UniformKind::Bool { .. } => ValueKind::Bool,
            UniformKind::BoolVector { default } => ValueKind::BoolVector(default.len()),
            UniformKind::Enum { .. } => ValueKind::Enum,
            UniformKind::Sampler { .. } => ValueKind::Sampler,
            UniformKind::Gradient { .. } => ValueKind::Gradient,
            UniformKind::Button { .. } => ValueKind::Button,
            UniformKind::Axis { .. } => ValueKind::Axis,
        }
    }

    pub fn accepts_curve(&self) -> bool {
        matches!(self, UniformKind::Float { .. } | UniformKind::Int { .. })
    }

    pub fn default_value(&self) -> Value {
        match self {
            UniformKind::Float { default, .. } => Value::Float(*default),
            UniformKind::Int { default, .. } => Value::Int(*default),
            UniformKind::Vector { default, .. } => Value::Vector(default.clone()),
            UniformKind::IntVector { default, .. } => Value::IntVector(default.clone()),
            UniformKind::Bool { default } => Value::Bool(*default),
            UniformKind::BoolVector { default } => Value::BoolVector(default.clone()),
            UniformKind::Enum { default, .. } => Value::Enum(*default),
            UniformKind::Sampler { default } => Value::Sampler(default.clone()),
            UniformKind::Gradient { default } => Value::Gradient(default.clone()),
            UniformKind::Button { default } => Value::Button(default.clone()),
            UniformKind::Axis { default } => Value::Axis(default.clone()),
        }
    }

    /// Validates an untyped value against this kind, falling back to the
    /// kind's defaults wherever the input does not fit.
    pub fn coerce(&self, raw: &Json) -> Value {
        match self {
            UniformKind::Float { .. } => Value::Float(coerce::number_or_zero(raw)),
            UniformKind::Int { .. } => Value::Int(coerce::integer(raw)),
            UniformKind::Vector { default, .. } => {
                Value::Vector(coerce::components(raw, default, coerce::number_or_zero))
            }
            UniformKind::IntVector { default, .. } => {
                Value::IntVector(coerce::components(raw, default, coerce::integer))
            }
            UniformKind::Bool { .. } => Value::Bool(coerce::boolean(raw)),
            UniformKind::BoolVector { default } => {
                Value::BoolVector(coerce::components(raw, default, coerce::boolean))
            }
            UniformKind::Enum { options, default } => Value::Enum(coerce_enum(raw, options, *default)),
            UniformKind::Sampler { default } => Value::Sampler(coerce_sampler(raw, default)),
            UniformKind::Gradient { default } => Value::Gradient(coerce_gradient(raw, default)),
            UniformKind::Button { default } => {
                Value::Button(structural(raw).unwrap_or_else(|| default.clone()))
            }
            UniformKind::Axis { default } => {
                Value::Axis(structural(raw).unwrap_or_else(|| default.clone()))
            }
        }
    }
}

fn vector_size(glsl_type: &str) -> usize {
    glsl_type
        .chars()
        .last()
        .and_then(|digit| digit.to_digit(10))
        .map_or(4, |digit| digit as usize)
}

fn structural<T: serde::de::DeserializeOwned>(raw: &Json) -> Option<T> {
    if raw.is_null() {
        return None;
    }
    serde_json::from_value(raw.clone()).ok()
}

fn coerce_enum(raw: &Json, options: &EnumOptions, fallback: i64) -> i64 {
    match raw {
        Json::Number(_) => {
            let code = coerce::integer(raw);
            if options.contains_code(code) {
                code
            } else {
                fallback
            }
        }
        Json::String(name) => options.code_of(name).unwrap_or(fallback),
        _ => fallback,
    }
}

fn coerce_sampler(raw: &Json, fallback: &TextureDescriptor) -> TextureDescriptor {
    match raw {
        Json::String(url) => TextureDescriptor::new(url.clone()),
        other => structural(other).unwrap_or_else(|| fallback.clone()),
    }
}

fn coerce_gradient(raw: &Json, fallback: &Gradient) -> Gradient {
    match raw {
        Json::String(shorthand) => Gradient::parse_shorthand(shorthand).unwrap_or_else(|| {
            tracing::debug!(shorthand = shorthand.as_str(), "malformed gradient shorthand");
            Gradient::default()
        }),
        other => structural::<Gradient>(other)
            .filter(|gradient| !gradient.stops.is_empty())
            .unwrap_or_else(|| fallback.clone()),
    }
}

/// Extracts the uniforms declared in `source`.
///
/// `resolve` maps a uniform name to its location in the compiled program (if
/// any). `previous` holds the values from the last compile of the same layer.
pub fn extract_uniforms(
    source: &str,
    previous: &[ShaderValue],
    resolve: &mut dyn FnMut(&str) -> Option<UniformLocation>,
) -> Vec<Uniform> {
    let mut seen = HashSet::new();
    let mut declared = Vec::new();
    for declaration in scan::uniform_declarations(source) {
        if !seen.insert(declaration.name.clone()) {
            continue;
        }
        let metadata = UniformMetadata::parse(&declaration.trailing);
        match UniformKind::classify(&declaration.glsl_type, &metadata) {
            Some(kind) => declared.push((declaration, metadata, kind)),
            None => tracing::debug!(
                name = declaration.name.as_str(),
                glsl_type = declaration.glsl_type.as_str(),
                "skipping uniform of unsupported type"
            ),
        }
    }

    let new_names: HashSet<&str> = declared
        .iter()
        .map(|(declaration, _, _)| declaration.name.as_str())
        .collect();
    let mut consumed = vec![false; previous.len()];
    let mut uniforms = Vec::with_capacity(declared.len());

    for (index, (declaration, metadata, kind)) in declared.iter().enumerate() {
        let by_name = previous
            .iter()
            .enumerate()
            .find(|(i, value)| !consumed[*i] && value.name == declaration.name)
            .map(|(i, _)| i);
        let renamed = || {
            previous
                .get(index)
                .filter(|value| {
                    !consumed[index]
                        && value.value.kind() == kind.value_kind()
                        && !new_names.contains(value.name.as_str())
                })
                .map(|_| index)
        };
        let prior = by_name.or_else(renamed);

        let shader_value = match prior {
            Some(i) => {
                consumed[i] = true;
                let stored = &previous[i];
                if stored.value.kind() == kind.value_kind() {
                    ShaderValue {
                        name: declaration.name.clone(),
                        value: kind.coerce(&stored.value.to_json()),
                        curve: stored.curve.clone().filter(|_| kind.accepts_curve()),
                    }
                } else {
                    fresh_value(&declaration.name, kind, metadata)
                }
            }
            None => fresh_value(&declaration.name, kind, metadata),
        };

        uniforms.push(Uniform {
            name: declaration.name.clone(),
            glsl_type: declaration.glsl_type.clone(),
            kind: kind.clone(),
            metadata: metadata.clone(),
            location: resolve(&declaration.name),
            occurrences: scan::identifier_occurrences(source, &declaration.name),
            shader_value,
        });
    }
    uniforms
}

fn fresh_value(name: &str, kind: &UniformKind, metadata: &UniformMetadata) -> ShaderValue {
    ShaderValue {
        name: name.to_string(),
        value: kind.default_value(),
        curve: metadata.curve.clone().filter(|_| kind.accepts_curve()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{Curve, CurveInput};

    fn extract(source: &str, previous: &[ShaderValue]) -> Vec<Uniform> {
        extract_uniforms(source, previous, &mut |_| None)
    }

    fn values(uniforms: &[Uniform]) -> Vec<ShaderValue> {
        uniforms.iter().map(|u| u.shader_value.clone()).collect()
    }

    #[test]
    fn default_comes_from_metadata() {
        let uniforms = extract("uniform float blue; // default: 0.5\n", &[]);
        assert_eq!(uniforms.len(), 1);
        assert_eq!(uniforms[0].kind, UniformKind::Float {
            default: 0.5,
            range: NumericRange::default()
        });
        assert_eq!(uniforms[0].shader_value.value, Value::Float(0.5));
    }

    #[test]
    fn first_declaration_wins_and_unsupported_types_are_skipped() {
        let source = "uniform float a; // default: 1\nuniform float a; // default: 2\nuniform mat4 m;\nuniform samplerCube sky;\n";
        let uniforms = extract(source, &[]);
        assert_eq!(uniforms.len(), 1);
        assert_eq!(uniforms[0].shader_value.value, Value::Float(1.0));
    }

    #[test]
    fn extraction_is_idempotent() {
        let source = "uniform float speed; // default: 2, min: 0, max: 10\n\
                      uniform vec3 tint; // type: \"color\", default: [1, 0, 0]\n\
                      uniform int mode; // enum: [\"a\", \"b\"], default: \"b\"\n\
                      uniform sampler2D ramp; // type: \"gradient\", default: \"#000000, #ffffff\"\n";
        let first = extract(source, &[]);
        let second = extract(source, &values(&first));
        assert_eq!(first, second);
    }

    #[test]
    fn edited_values_survive_reordering() {
        let previous = vec![
            ShaderValue::new("b", Value::Float(3.0)),
            ShaderValue::new("a", Value::Float(7.0)),
        ];
        let uniforms = extract("uniform float a;\nuniform float b;\n", &previous);
        assert_eq!(uniforms[0].shader_value.value, Value::Float(7.0));
        assert_eq!(uniforms[1].shader_value.value, Value::Float(3.0));
    }

    #[test]
    fn renamed_uniform_keeps_its_value() {
        let previous = vec![ShaderValue::new("speed", Value::Float(4.0))];
        let uniforms = extract("uniform float velocity; // default: 1\n", &previous);
        assert_eq!(uniforms[0].name, "velocity");
        assert_eq!(uniforms[0].shader_value.value, Value::Float(4.0));
    }

    #[test]
    fn retyped_uniform_gets_a_fresh_default() {
        let previous = vec![ShaderValue::new("speed", Value::Float(4.0))];
        let uniforms = extract("uniform int speed; // default: 9\n", &previous);
        assert_eq!(uniforms[0].shader_value.value, Value::Int(9));

        let renamed_and_retyped = extract("uniform vec2 velocity;\n", &previous);
        assert_eq!(renamed_and_retyped[0].shader_value.value, Value::Vector(vec![0.0, 0.0]));
    }

    #[test]
    fn rename_is_not_assumed_while_old_name_is_still_declared() {
        let previous = vec![
            ShaderValue::new("a", Value::Float(5.0)),
            ShaderValue::new("b", Value::Float(6.0)),
        ];
        let uniforms = extract("uniform float c;\nuniform float a;\n", &previous);
        assert_eq!(uniforms[0].shader_value.value, Value::Float(0.0));
        assert_eq!(uniforms[1].shader_value.value, Value::Float(5.0));
    }

    #[test]
    fn metadata_curve_seeds_only_fresh_values() {
        let source = "uniform float wave; // curve: { min: 0, max: 2, input: { source: \"time\" } }\n";
        let fresh = extract(source, &[]);
        assert!(fresh[0].shader_value.curve.is_some());

        let previous = vec![ShaderValue::new("wave", Value::Float(1.0))];
        let kept = extract(source, &previous);
        assert!(kept[0].shader_value.curve.is_none());

        let curve = Curve {
            min: 0.0,
            max: 5.0,
            input: CurveInput::AudioPeak,
        };
        let previous = vec![ShaderValue::new("wave", Value::Float(1.0)).with_curve(curve.clone())];
        let kept = extract(source, &previous);
        assert_eq!(kept[0].shader_value.curve, Some(curve));
    }

    #[test]
    fn special_kinds_follow_type_hints() {
        let source = "uniform vec4 jump; // type: \"button\", default: { keyboard: \"Space\" }\n\
                      uniform float steer; // type: \"axis\"\n\
                      uniform int blend; // enum: \"blendMode\", default: \"screen\"\n\
                      uniform bvec2 flags; // default: [1, 0]\n\
                      uniform lowp ivec3 cells; // default: [1.7, \"2\"]\n";
        let uniforms = extract(source, &[]);
        assert!(matches!(uniforms[0].kind, UniformKind::Button { .. }));
        let Value::Button(bindings) = &uniforms[0].shader_value.value else {
            panic!("expected button value");
        };
        assert_eq!(bindings.0.get("keyboard").map(String::as_str), Some("Space"));
        assert!(matches!(uniforms[1].kind, UniformKind::Axis { .. }));
        assert_eq!(uniforms[2].shader_value.value, Value::Enum(12));
        assert_eq!(uniforms[3].shader_value.value, Value::BoolVector(vec![true, false]));
        assert_eq!(uniforms[4].shader_value.value, Value::IntVector(vec![1, 2, 0]));
    }

    #[test]
    fn occurrences_and_locations_are_recorded() {
        let source = "uniform float r;\nvec4 render(vec2 uv) { return vec4(r); }\n";
        let uniforms = extract_uniforms(source, &[], &mut |name| {
            (name == "r").then_some(UniformLocation(3))
        });
        assert_eq!(uniforms[0].location, Some(UniformLocation(3)));
        assert_eq!(uniforms[0].occurrences, vec![14, source.rfind('r').unwrap()]);
    }
}
