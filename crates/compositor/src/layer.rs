//! Persisted layer document.
//!
//! The document is a JSON tree of [`Layer`]s. Groups own ordered children
//! (index 0 paints on top), code layers carry their source plus the
//! user-edited [`ShaderValue`]s that survive recompiles.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The persisted document is its root layer, normally a group.
pub type Document = Layer;

/// One node of the layer document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Layer {
    Group(GroupLayer),
    Shader(CodeLayer),
    Sdf(SdfLayer),
    #[serde(rename = "javascript")]
    JavaScript(CodeLayer),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupLayer {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default = "default_group_blend")]
    pub blend_mode: BlendMode,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    #[serde(default)]
    pub layers: Vec<Layer>,
}

/// Shader and JavaScript layers share the same persisted shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeLayer {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub blend_mode: BlendMode,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub values: Vec<ShaderValue>,
}

/// SDF layers nest their operands as children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdfLayer {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub values: Vec<ShaderValue>,
    #[serde(default)]
    pub layers: Vec<Layer>,
}

fn default_visible() -> bool {
    true
}

fn default_opacity() -> f32 {
    1.0
}

fn default_group_blend() -> BlendMode {
    BlendMode::PassThrough
}

impl Layer {
    /// Parses a layer document from JSON text.
    pub fn from_json_str(input: &str) -> serde_json::Result<Self> {
        serde_json::from_str(input)
    }

    pub fn to_json_string_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn id(&self) -> &str {
        match self {
            Layer::Group(group) => &group.id,
            Layer::Shader(layer) | Layer::JavaScript(layer) => &layer.id,
            Layer::Sdf(layer) => &layer.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Layer::Group(group) => &group.name,
            Layer::Shader(layer) | Layer::JavaScript(layer) => &layer.name,
            Layer::Sdf(layer) => &layer.name,
        }
    }

    pub fn visible(&self) -> bool {
        match self {
            Layer::Group(group) => group.visible,
            Layer::Shader(layer) | Layer::JavaScript(layer) => layer.visible,
            Layer::Sdf(layer) => layer.visible,
        }
    }

    /// Child layers in paint order (index 0 topmost). Code layers have none.
    pub fn children(&self) -> &[Layer] {
        match self {
            Layer::Group(group) => &group.layers,
            Layer::Sdf(layer) => &layer.layers,
            Layer::Shader(_) | Layer::JavaScript(_) => &[],
        }
    }

    /// Source text for code-carrying layers.
    pub fn code(&self) -> Option<&str> {
        match self {
            Layer::Group(_) => None,
            Layer::Shader(layer) | Layer::JavaScript(layer) => Some(&layer.code),
            Layer::Sdf(layer) => Some(&layer.code),
        }
    }

    pub fn values(&self) -> &[ShaderValue] {
        match self {
            Layer::Group(_) => &[],
            Layer::Shader(layer) | Layer::JavaScript(layer) => &layer.values,
            Layer::Sdf(layer) => &layer.values,
        }
    }

    /// Mutable access to the persisted values of a code layer.
    pub fn values_mut(&mut self) -> Option<&mut Vec<ShaderValue>> {
        match self {
            Layer::Group(_) => None,
            Layer::Shader(layer) | Layer::JavaScript(layer) => Some(&mut layer.values),
            Layer::Sdf(layer) => Some(&mut layer.values),
        }
    }

    fn children_mut(&mut self) -> &mut [Layer] {
        match self {
            Layer::Group(group) => &mut group.layers,
            Layer::Sdf(layer) => &mut layer.layers,
            Layer::Shader(_) | Layer::JavaScript(_) => &mut [],
        }
    }

    /// Depth-first search for a layer by id.
    pub fn find(&self, id: &str) -> Option<&Layer> {
        if self.id() == id {
            return Some(self);
        }
        self.children().iter().find_map(|child| child.find(id))
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Layer> {
        if self.id() == id {
            return Some(self);
        }
        self.children_mut()
            .iter_mut()
            .find_map(|child| child.find_mut(id))
    }
}

/// Blend modes in the order of their integer codes inside generated GLSL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlendMode {
    PassThrough,
    Overwrite,
    Mask,
    None,
    Dissolve,
    #[default]
    Normal,
    Darken,
    Multiply,
    ColorBurn,
    LinearBurn,
    DarkerColor,
    Lighten,
    Screen,
    ColorDodge,
    LinearDodge,
    LighterColor,
    Overlay,
    SoftLight,
    HardLight,
    VividLight,
    LinearLight,
    PinLight,
    HardMix,
    Difference,
    Exclusion,
    Subtract,
    Divide,
}

impl BlendMode {
    pub const ALL: [BlendMode; 27] = [
        BlendMode::PassThrough,
        BlendMode::Overwrite,
        BlendMode::Mask,
        BlendMode::None,
        BlendMode::Dissolve,
        BlendMode::Normal,
        BlendMode::Darken,
        BlendMode::Multiply,
        BlendMode::ColorBurn,
        BlendMode::LinearBurn,
        BlendMode::DarkerColor,
        BlendMode::Lighten,
        BlendMode::Screen,
        BlendMode::ColorDodge,
        BlendMode::LinearDodge,
        BlendMode::LighterColor,
        BlendMode::Overlay,
        BlendMode::SoftLight,
        BlendMode::HardLight,
        BlendMode::VividLight,
        BlendMode::LinearLight,
        BlendMode::PinLight,
        BlendMode::HardMix,
        BlendMode::Difference,
        BlendMode::Exclusion,
        BlendMode::Subtract,
        BlendMode::Divide,
    ];

    /// Integer code passed to the `gBlendMode` uniform.
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i64) -> Option<Self> {
        usize::try_from(code)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
    }

    /// camelCase name used by the document and enum metadata.
    pub fn name(self) -> &'static str {
        match self {
            BlendMode::PassThrough => "passThrough",
            BlendMode::Overwrite => "overwrite",
            BlendMode::Mask => "mask",
            BlendMode::None => "none",
            BlendMode::Dissolve => "dissolve",
            BlendMode::Normal => "normal",
            BlendMode::Darken => "darken",
            BlendMode::Multiply => "multiply",
            BlendMode::ColorBurn => "colorBurn",
            BlendMode::LinearBurn => "linearBurn",
            BlendMode::DarkerColor => "darkerColor",
            BlendMode::Lighten => "lighten",
            BlendMode::Screen => "screen",
            BlendMode::ColorDodge => "colorDodge",
            BlendMode::LinearDodge => "linearDodge",
            BlendMode::LighterColor => "lighterColor",
            BlendMode::Overlay => "overlay",
            BlendMode::SoftLight => "softLight",
            BlendMode::HardLight => "hardLight",
            BlendMode::VividLight => "vividLight",
            BlendMode::LinearLight => "linearLight",
            BlendMode::PinLight => "pinLight",
            BlendMode::HardMix => "hardMix",
            BlendMode::Difference => "difference",
            BlendMode::Exclusion => "exclusion",
            BlendMode::Subtract => "subtract",
            BlendMode::Divide => "divide",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|mode| mode.name() == name)
    }

    /// Name of the `#define` emitted for this mode, e.g. `gBlendColorBurn`.
    pub fn glsl_define(self) -> String {
        let name = self.name();
        let mut chars = name.chars();
        let mut define = String::from("gBlend");
        if let Some(first) = chars.next() {
            define.push(first.to_ascii_uppercase());
            define.extend(chars);
        }
        define
    }
}

/// A user-edited parameter value, persisted on the layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShaderValue {
    pub name: String,
    #[serde(flatten)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curve: Option<Curve>,
}

impl ShaderValue {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
            curve: None,
        }
    }

    pub fn with_curve(mut self, curve: Curve) -> Self {
        self.curve = Some(curve);
        self
    }

    pub fn uses_audio_input(&self) -> bool {
        self.curve.as_ref().is_some_and(Curve::uses_audio)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Value {
    Float(f64),
    Int(i64),
    Vector(Vec<f64>),
    IntVector(Vec<i64>),
    Bool(bool),
    BoolVector(Vec<bool>),
    Enum(i64),
    Sampler(TextureDescriptor),
    Gradient(Gradient),
    Button(ButtonBindings),
    Axis(AxisBindings),
}

/// Shape of a value, used to decide whether a stored value can be adopted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Float,
    Int,
    Vector(usize),
    IntVector(usize),
    Bool,
    BoolVector(usize),
    Enum,
    Sampler,
    Gradient,
    Button,
    Axis,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Float(_) => ValueKind::Float,
            Value::Int(_) => ValueKind::Int,
            Value::Vector(values) => ValueKind::Vector(values.len()),
            Value::IntVector(values) => ValueKind::IntVector(values.len()),
            Value::Bool(_) => ValueKind::Bool,
            Value::BoolVector(values) => ValueKind::BoolVector(values.len()),
            Value::Enum(_) => ValueKind::Enum,
            Value::Sampler(_) => ValueKind::Sampler,
            Value::Gradient(_) => ValueKind::Gradient,
            Value::Button(_) => ValueKind::Button,
            Value::Axis(_) => ValueKind::Axis,
        }
    }

    /// Untyped JSON form of the payload, fed back through uniform validation.
    pub fn to_json(&self) -> serde_json::Value {
        let encoded = match self {
            Value::Float(value) => serde_json::to_value(value),
            Value::Int(value) | Value::Enum(value) => serde_json::to_value(value),
            Value::Vector(values) => serde_json::to_value(values),
            Value::IntVector(values) => serde_json::to_value(values),
            Value::Bool(value) => serde_json::to_value(value),
            Value::BoolVector(values) => serde_json::to_value(values),
            Value::Sampler(texture) => serde_json::to_value(texture),
            Value::Gradient(gradient) => serde_json::to_value(gradient),
            Value::Button(bindings) => serde_json::to_value(bindings),
            Value::Axis(bindings) => serde_json::to_value(bindings),
        };
        encoded.unwrap_or(serde_json::Value::Null)
    }
}

/// Remaps a clamped input source onto `[min, max]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Curve {
    #[serde(default)]
    pub min: f64,
    #[serde(default = "default_curve_max")]
    pub max: f64,
    pub input: CurveInput,
}

fn default_curve_max() -> f64 {
    1.0
}

impl Curve {
    pub fn uses_audio(&self) -> bool {
        matches!(
            self.input,
            CurveInput::AudioVolume
                | CurveInput::AudioPeak
                | CurveInput::AudioTrough
                | CurveInput::AudioReactive
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum CurveInput {
    Time {
        #[serde(default = "default_curve_duration")]
        duration: f64,
        #[serde(default = "default_visible")]
        repeat: bool,
    },
    Button {
        bindings: ButtonBindings,
    },
    Axis {
        bindings: AxisBindings,
    },
    AudioVolume,
    AudioPeak,
    AudioTrough,
    AudioReactive,
}

fn default_curve_duration() -> f64 {
    1.0
}

/// Device id → input id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ButtonBindings(pub BTreeMap<String, String>);

/// Device id → axis binding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AxisBindings(pub BTreeMap<String, AxisBinding>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AxisBinding {
    /// A physical axis such as a stick.
    Axis(String),
    /// An axis synthesised from buttons, each mapped to the value it selects.
    Buttons {
        buttons: BTreeMap<String, f64>,
        #[serde(default)]
        default: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureDescriptor {
    pub url: String,
    #[serde(default)]
    pub filter: TextureFilter,
    #[serde(default)]
    pub wrap: TextureWrap,
}

impl TextureDescriptor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filter: TextureFilter::default(),
            wrap: TextureWrap::default(),
        }
    }
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self::new("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureFilter {
    #[default]
    Linear,
    Nearest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureWrap {
    #[default]
    Clamp,
    Repeat,
    Mirror,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gradient {
    pub stops: Vec<GradientStop>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradientStop {
    pub position: f32,
    pub color: [f32; 4],
}

impl Default for Gradient {
    /// Opaque black to opaque white.
    fn default() -> Self {
        Self {
            stops: vec![
                GradientStop {
                    position: 0.0,
                    color: [0.0, 0.0, 0.0, 1.0],
                },
                GradientStop {
                    position: 1.0,
                    color: [1.0, 1.0, 1.0, 1.0],
                },
            ],
        }
    }
}

impl Gradient {
    /// Parses `"#rrggbb[aa] [position], ..."`. Stops without a position are
    /// spread evenly between their neighbours.
    pub fn parse_shorthand(input: &str) -> Option<Self> {
        let mut parsed = Vec::new();
        for entry in input.split(',') {
            let mut parts = entry.split_whitespace();
            let color = parse_hex_color(parts.next()?)?;
            let position = match parts.next() {
                Some(raw) => Some(raw.parse::<f32>().ok()?),
                None => None,
            };
            if parts.next().is_some() {
                return None;
            }
            parsed.push((color, position));
        }
        if parsed.len() < 2 {
            return None;
        }

        let last = parsed.len() - 1;
        let stops = parsed
            .iter()
            .enumerate()
            .map(|(index, (color, position))| GradientStop {
                position: position.unwrap_or(index as f32 / last as f32),
                color: *color,
            })
            .collect();
        Some(Self { stops })
    }

    /// Linear interpolation between the surrounding stops.
    pub fn sample(&self, t: f32) -> [f32; 4] {
        let t = t.clamp(0.0, 1.0);
        let mut stops = self.stops.clone();
        stops.sort_by(|a, b| a.position.total_cmp(&b.position));
        let Some(first) = stops.first() else {
            return [0.0; 4];
        };
        if t <= first.position {
            return first.color;
        }
        for pair in stops.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            if t <= to.position {
                let span = (to.position - from.position).max(f32::EPSILON);
                let local = (t - from.position) / span;
                return std::array::from_fn(|i| from.color[i] + (to.color[i] - from.color[i]) * local);
            }
        }
        stops.last().map(|stop| stop.color).unwrap_or([0.0; 4])
    }

    /// Rasterises the gradient into `width` RGBA8 texels.
    pub fn rasterize(&self, width: usize) -> Vec<[u8; 4]> {
        let denominator = width.saturating_sub(1).max(1) as f32;
        (0..width)
            .map(|index| {
                let color = self.sample(index as f32 / denominator);
                color.map(|channel| (channel.clamp(0.0, 1.0) * 255.0).round() as u8)
            })
            .collect()
    }

    /// Bit-exact key for texture caching.
    pub fn cache_key(&self) -> Vec<u32> {
        self.stops
            .iter()
            .flat_map(|stop| {
                std::iter::once(stop.position.to_bits())
                    .chain(stop.color.iter().map(|channel| channel.to_bits()))
            })
            .collect()
    }
}

fn parse_hex_color(raw: &str) -> Option<[f32; 4]> {
    let hex = raw.strip_prefix('#')?;
    let channel = |index: usize| -> Option<f32> {
        let digits = hex.get(index * 2..index * 2 + 2)?;
        u8::from_str_radix(digits, 16)
            .ok()
            .map(|value| value as f32 / 255.0)
    };
    match hex.len() {
        6 => Some([channel(0)?, channel(1)?, channel(2)?, 1.0]),
        8 => Some([channel(0)?, channel(1)?, channel(2)?, channel(3)?]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"{
        "type": "group",
        "id": "root",
        "layers": [
            {
                "type": "shader",
                "id": "tint",
                "blendMode": "multiply",
                "code": "vec4 render(vec2 uv) { return vec4(uv, blue, 1.0); }",
                "values": [
                    { "name": "blue", "type": "float", "value": 0.25,
                      "curve": { "min": 0, "max": 1, "input": { "source": "time", "duration": 4 } } }
                ]
            },
            { "type": "sdf", "id": "ball", "code": "", "layers": [] }
        ]
    }"#;

    #[test]
    fn parses_document_with_defaults() {
        let root = Layer::from_json_str(DOCUMENT).expect("parse document");
        let Layer::Group(group) = &root else {
            panic!("root should be a group");
        };
        assert_eq!(group.blend_mode, BlendMode::PassThrough);
        assert_eq!(group.layers.len(), 2);

        let tint = root.find("tint").expect("tint layer");
        let Layer::Shader(shader) = tint else {
            panic!("tint should be a shader layer");
        };
        assert_eq!(shader.blend_mode, BlendMode::Multiply);
        assert_eq!(shader.opacity, 1.0);
        assert!(shader.visible);
        assert_eq!(shader.values[0].value, Value::Float(0.25));
        let curve = shader.values[0].curve.as_ref().expect("curve");
        assert_eq!(
            curve.input,
            CurveInput::Time {
                duration: 4.0,
                repeat: true
            }
        );
    }

    #[test]
    fn document_survives_serialisation() {
        let root = Layer::from_json_str(DOCUMENT).unwrap();
        let text = root.to_json_string_pretty().unwrap();
        assert_eq!(Layer::from_json_str(&text).unwrap(), root);
    }

    #[test]
    fn blend_mode_codes_follow_declaration_order() {
        assert_eq!(BlendMode::PassThrough.code(), 0);
        assert_eq!(BlendMode::Normal.code(), 5);
        assert_eq!(BlendMode::from_code(7), Some(BlendMode::Multiply));
        assert_eq!(BlendMode::from_name("colorBurn"), Some(BlendMode::ColorBurn));
        assert_eq!(BlendMode::ColorBurn.glsl_define(), "gBlendColorBurn");
        assert_eq!(BlendMode::from_code(99), None);
    }

    #[test]
    fn gradient_shorthand_spreads_missing_positions() {
        let gradient = Gradient::parse_shorthand("#ff0000, #00ff00, #0000ff80 1").unwrap();
        assert_eq!(gradient.stops.len(), 3);
        assert_eq!(gradient.stops[1].position, 0.5);
        assert!((gradient.stops[2].color[3] - 128.0 / 255.0).abs() < 1e-6);
        let mid = gradient.sample(0.25);
        assert!((mid[0] - 0.5).abs() < 1e-6);
        assert!((mid[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn malformed_gradient_shorthand_is_rejected() {
        assert!(Gradient::parse_shorthand("red, blue").is_none());
        assert!(Gradient::parse_shorthand("#ff0000").is_none());
        assert!(Gradient::parse_shorthand("#ff0000 nope, #000000").is_none());
    }

    #[test]
    fn axis_bindings_accept_both_shapes() {
        let bindings: AxisBindings = serde_json::from_str(
            r#"{ "gamepad0": "leftStickX",
                 "keyboard": { "buttons": { "KeyA": -1, "KeyD": 1 } } }"#,
        )
        .unwrap();
        assert_eq!(
            bindings.0.get("gamepad0"),
            Some(&AxisBinding::Axis("leftStickX".into()))
        );
        assert!(matches!(
            bindings.0.get("keyboard"),
            Some(AxisBinding::Buttons { default, .. }) if *default == 0.0
        ));
    }
}
