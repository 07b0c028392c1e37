//! Fragment program assembly, compilation and diagnostics.
//!
//! Every user program is `header + [SDF scene] + user code + footer`. Driver
//! logs refer to lines of that whole text; [`parse_diagnostics`] maps them
//! back onto the user's own lines.
use std::fmt::{self, Write};

use serde::Serialize;

use crate::error::{CompositorError, Result};
use crate::gpu::{GpuContext, ProgramHandle, ShaderHandle, ShaderStage, UniformLocation};
use crate::render::blend;
use crate::sdf::{codegen, Arity};

pub const DEFAULT_GLSL_VERSION: &str = "300 es";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
        }
    }
}

/// A problem in user content. `line` is 1-based within the layer's code, or
/// 0 when the message cannot be attributed to a user line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompileError {
    pub line: u32,
    pub text: String,
    pub severity: Severity,
}

impl CompileError {
    pub fn error(line: u32, text: impl Into<String>) -> Self {
        Self {
            line,
            text: text.into(),
            severity: Severity::Error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.severity, self.line, self.text)
    }
}

const HELPERS_GLSL: &str = "\
vec4 gSampleGradient(sampler2D gradient, float t) {
    return texture(gradient, vec2(clamp(t, 0.0, 1.0), 0.5));
}
float gAudioFrequency(float x) {
    return texture(gAudioSpectrum, vec2(clamp(x, 0.0, 1.0), 0.25)).r;
}
float gAudioWaveform(float x) {
    return texture(gAudioSpectrum, vec2(clamp(x, 0.0, 1.0), 0.75)).r * 2.0 - 1.0;
}
";

pub(crate) const FOOTER: &str = "\
void main() {
    gFragColor = gBlend(render(gUv), texture(gPreviousLayer, gUv), gBlendMode, gOpacity);
}
";

/// Everything in front of user code: version, precision, built-in uniforms,
/// blend mode constants and helpers.
pub fn fragment_header(glsl_version: &str) -> String {
    let mut header = String::new();
    let _ = writeln!(header, "#version {glsl_version}");
    header.push_str(
        "precision highp float;
precision highp int;
in vec2 gUv;
out vec4 gFragColor;
uniform vec2 gResolution;
uniform float gTime;
uniform float gDeltaTime;
uniform int gFrame;
uniform vec4 gPointer;
uniform vec4 gDate;
uniform sampler2D gPreviousLayer;
uniform int gBlendMode;
uniform float gOpacity;
uniform float gAudioVolume;
uniform float gAudioPeak;
uniform float gAudioTrough;
uniform float gAudioReactive;
uniform sampler2D gAudioSpectrum;
",
    );
    header.push_str(&blend::glsl_defines());
    header.push_str(blend::HASH_GLSL);
    header.push_str(blend::BLEND_GLSL);
    header.push_str(HELPERS_GLSL);
    header
}

pub fn vertex_source(glsl_version: &str) -> String {
    format!(
        "#version {glsl_version}
out vec2 gUv;
void main() {{
    vec2 position = vec2(float((gl_VertexID << 1) & 2), float(gl_VertexID & 2)) * 2.0 - 1.0;
    gUv = position * 0.5 + 0.5;
    gl_Position = vec4(position, 0.0, 1.0);
}}
"
    )
}

/// A complete fragment program plus the number of lines in front of the
/// user's code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedSource {
    pub text: String,
    pub prefix_lines: u32,
    pub user_lines: u32,
}

impl WrappedSource {
    pub fn diagnostics(&self, log: &str) -> Vec<CompileError> {
        parse_diagnostics(log, self.prefix_lines, self.user_lines)
    }
}

fn line_count(text: &str) -> u32 {
    text.lines().count() as u32
}

fn assemble(prefix: String, code: &str, suffix: &str) -> WrappedSource {
    let prefix_lines = line_count(&prefix);
    let mut text = prefix;
    text.push_str(code);
    if !code.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(suffix);
    WrappedSource {
        text,
        prefix_lines,
        user_lines: line_count(code).max(1),
    }
}

/// Wraps a shader layer, injecting the SDF scene in front of the code when
/// the layer uses it.
pub fn wrap_layer(glsl_version: &str, code: &str, scene: Option<&str>) -> WrappedSource {
    let mut prefix = fragment_header(glsl_version);
    if let Some(scene) = scene {
        prefix.push_str(scene);
        if !scene.ends_with('\n') {
            prefix.push('\n');
        }
    }
    assemble(prefix, code, FOOTER)
}

/// Wraps an SDF layer on its own so its uniforms and errors can be read
/// without the rest of the scene. Operands evaluate to `gSdfEmpty()`.
pub fn wrap_standalone_sdf(glsl_version: &str, code: &str, arity: Option<Arity>) -> WrappedSource {
    let mut prefix = fragment_header(glsl_version);
    prefix.push_str(codegen::PRELUDE);
    prefix.push_str(codegen::STANDALONE_DISPATCH);

    let mut arguments = String::from("context");
    match arity {
        Some(Arity::Variadic) => {
            let zeros = vec!["0"; crate::sdf::MAX_CHILDREN].join(", ");
            let _ = write!(arguments, ", gSdfVariadic(0, int[gSdfMaxChildren]({zeros}))");
        }
        Some(Arity::Fixed(count)) => {
            for _ in 0..count {
                arguments.push_str(", gSdf(0)");
            }
        }
        None => {}
    }
    let main = format!(
        "void main() {{
    gSdfContext context = gSdfContext(vec3(gUv * 2.0 - 1.0, 0.0));
    gSdfResult result = map({arguments});
    gFragColor = result.color;
}}
"
    );
    assemble(prefix, code, &main)
}

/// Parses a driver info log into diagnostics on user lines.
///
/// Understands the Khronos/ANGLE form `ERROR: 0:12: message` and the Mesa
/// form `0:12(7): error: message`. Lines that match neither become a single
/// unattributed error each; summary lines are dropped.
pub fn parse_diagnostics(log: &str, prefix_lines: u32, user_lines: u32) -> Vec<CompileError> {
    let remap = |line: u32| {
        line.checked_sub(prefix_lines)
            .filter(|user| (1..=user_lines).contains(user))
            .unwrap_or(0)
    };

    let mut errors = Vec::new();
    for raw in log.lines() {
        let line = raw.trim().trim_end_matches('\0');
        if line.is_empty() || is_summary(line) {
            continue;
        }
        let parsed = parse_khronos(line).or_else(|| parse_mesa(line));
        match parsed {
            Some((severity, driver_line, text)) => errors.push(CompileError {
                line: remap(driver_line),
                text,
                severity,
            }),
            None => errors.push(CompileError::error(0, line)),
        }
    }
    errors
}

fn is_summary(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.contains("compilation errors") || lower.contains("no code generated")
}

fn parse_khronos(line: &str) -> Option<(Severity, u32, String)> {
    let (severity, rest) = if let Some(rest) = line.strip_prefix("ERROR:") {
        (Severity::Error, rest)
    } else if let Some(rest) = line.strip_prefix("WARNING:") {
        (Severity::Warning, rest)
    } else {
        return None;
    };
    let mut parts = rest.trim_start().splitn(3, ':');
    let _source = parts.next()?.trim().parse::<u32>().ok()?;
    let driver_line = parts.next()?.trim().parse::<u32>().ok()?;
    let text = parts.next()?.trim().to_string();
    Some((severity, driver_line, text))
}

fn parse_mesa(line: &str) -> Option<(Severity, u32, String)> {
    let (location, rest) = line.split_once(": ")?;
    let (_source, position) = location.split_once(':')?;
    let driver_line = position.split('(').next()?.trim().parse::<u32>().ok()?;
    let (severity, text) = if let Some(text) = rest.strip_prefix("error:") {
        (Severity::Error, text)
    } else if let Some(text) = rest.strip_prefix("warning:") {
        (Severity::Warning, text)
    } else {
        return None;
    };
    Some((severity, driver_line, text.trim().to_string()))
}

/// Compiles fragment programs against one shared vertex shader.
#[derive(Debug)]
pub struct ProgramCompiler {
    glsl_version: String,
    vertex: ShaderHandle,
}

impl ProgramCompiler {
    pub fn new(gpu: &mut dyn GpuContext, glsl_version: impl Into<String>) -> Result<Self> {
        let glsl_version = glsl_version.into();
        let vertex = gpu
            .create_shader(ShaderStage::Vertex, &vertex_source(&glsl_version))
            .map_err(|log| CompositorError::BuiltinShader {
                name: "fullscreen vertex",
                log,
            })?;
        Ok(Self {
            glsl_version,
            vertex,
        })
    }

    pub fn glsl_version(&self) -> &str {
        &self.glsl_version
    }

    /// Compiles and links `fragment`. The error is the compile or link log.
    pub fn build(&self, gpu: &mut dyn GpuContext, fragment: &str) -> std::result::Result<ProgramHandle, String> {
        let shader = gpu.create_shader(ShaderStage::Fragment, fragment)?;
        let linked = gpu.link_program(self.vertex, shader);
        gpu.delete_shader(shader);
        linked
    }

    /// Builds a built-in program. Any failure is fatal.
    pub fn build_builtin(
        &self,
        gpu: &mut dyn GpuContext,
        name: &'static str,
        fragment: &str,
    ) -> Result<ProgramHandle> {
        self.build(gpu, fragment)
            .map_err(|log| CompositorError::BuiltinShader { name, log })
    }

    pub fn release(self, gpu: &mut dyn GpuContext) {
        gpu.delete_shader(self.vertex);
    }
}

/// Locations of the header uniforms in one program. Any of them may be
/// missing when the driver optimised it away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuiltinLocations {
    pub resolution: Option<UniformLocation>,
    pub time: Option<UniformLocation>,
    pub delta_time: Option<UniformLocation>,
    pub frame: Option<UniformLocation>,
    pub pointer: Option<UniformLocation>,
    pub date: Option<UniformLocation>,
    pub previous_layer: Option<UniformLocation>,
    pub blend_mode: Option<UniformLocation>,
    pub opacity: Option<UniformLocation>,
    pub audio_volume: Option<UniformLocation>,
    pub audio_peak: Option<UniformLocation>,
    pub audio_trough: Option<UniformLocation>,
    pub audio_reactive: Option<UniformLocation>,
    pub audio_spectrum: Option<UniformLocation>,
}

impl BuiltinLocations {
    pub fn resolve(gpu: &mut dyn GpuContext, program: ProgramHandle) -> Self {
        let mut get = |name: &str| gpu.uniform_location(program, name);
        Self {
            resolution: get("gResolution"),
            time: get("gTime"),
            delta_time: get("gDeltaTime"),
            frame: get("gFrame"),
            pointer: get("gPointer"),
            date: get("gDate"),
            previous_layer: get("gPreviousLayer"),
            blend_mode: get("gBlendMode"),
            opacity: get("gOpacity"),
            audio_volume: get("gAudioVolume"),
            audio_peak: get("gAudioPeak"),
            audio_trough: get("gAudioTrough"),
            audio_reactive: get("gAudioReactive"),
            audio_spectrum: get("gAudioSpectrum"),
        }
    }
}

/// Resolves a uniform a built-in program cannot work without.
pub(crate) fn required_location(
    gpu: &mut dyn GpuContext,
    program: ProgramHandle,
    program_name: &'static str,
    uniform: &'static str,
) -> Result<UniformLocation> {
    gpu.uniform_location(program, uniform)
        .ok_or(CompositorError::MissingUniform {
            program: program_name,
            uniform,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessGpu;

    #[test]
    fn khronos_lines_are_mapped_back_to_user_code() {
        let log = "ERROR: 0:105: 'foo' : undeclared identifier\nWARNING: 0:103: unused\nERROR: 2 compilation errors.  No code generated.\n";
        let errors = parse_diagnostics(log, 100, 10);
        assert_eq!(
            errors,
            vec![
                CompileError::error(5, "'foo' : undeclared identifier"),
                CompileError {
                    line: 3,
                    text: "unused".into(),
                    severity: Severity::Warning
                },
            ]
        );
    }

    #[test]
    fn mesa_lines_are_understood() {
        let errors = parse_diagnostics("0:42(12): error: `x' undeclared\n", 40, 5);
        assert_eq!(errors, vec![CompileError::error(2, "`x' undeclared")]);
    }

    #[test]
    fn lines_outside_user_code_are_unattributed() {
        let errors = parse_diagnostics("ERROR: 0:7: header problem\nERROR: 0:300: footer problem\nlink failed\n", 50, 10);
        assert!(errors.iter().all(|error| error.line == 0));
        assert_eq!(errors[2].text, "link failed");
    }

    #[test]
    fn wrapped_layer_counts_prefix_lines() {
        let code = "vec4 render(vec2 uv) {\n    return vec4(uv, 0.0, 1.0);\n}\n";
        let plain = wrap_layer(DEFAULT_GLSL_VERSION, code, None);
        let header_lines = fragment_header(DEFAULT_GLSL_VERSION).lines().count() as u32;
        assert_eq!(plain.prefix_lines, header_lines);
        assert_eq!(plain.user_lines, 3);
        assert!(plain.text.starts_with("#version 300 es\n"));
        assert!(plain.text.ends_with(FOOTER));

        let with_scene = wrap_layer(DEFAULT_GLSL_VERSION, code, Some("float a;\nfloat b;\n"));
        assert_eq!(with_scene.prefix_lines, header_lines + 2);
        let user_start = with_scene.text.lines().nth(with_scene.prefix_lines as usize);
        assert_eq!(user_start, Some("vec4 render(vec2 uv) {"));
    }

    #[test]
    fn standalone_sdf_passes_empty_operands() {
        let code = "gSdfResult map(inout gSdfContext c, gSdf a, gSdf b) { return gSdfUnion(gSdfMap(c, a), gSdfMap(c, b)); }";
        let wrapped = wrap_standalone_sdf(DEFAULT_GLSL_VERSION, code, Some(Arity::Fixed(2)));
        assert!(wrapped.text.contains("map(context, gSdf(0), gSdf(0))"));
        assert!(wrapped.text.contains(codegen::STANDALONE_DISPATCH));
    }

    #[test]
    fn header_defines_every_builtin_uniform() {
        let mut gpu = HeadlessGpu::new();
        let compiler = ProgramCompiler::new(&mut gpu, DEFAULT_GLSL_VERSION).unwrap();
        let wrapped = wrap_layer(DEFAULT_GLSL_VERSION, "vec4 render(vec2 uv) { return vec4(1.0); }", None);
        let program = compiler.build(&mut gpu, &wrapped.text).unwrap();
        let locations = BuiltinLocations::resolve(&mut gpu, program);
        assert!(locations.resolution.is_some());
        assert!(locations.audio_spectrum.is_some());
        assert!(locations.previous_layer.is_some());
        assert_eq!(gpu.live_shaders(), 1, "fragment shaders are deleted after linking");
    }

    #[test]
    fn broken_builtin_is_fatal() {
        let mut gpu = HeadlessGpu::new();
        let compiler = ProgramCompiler::new(&mut gpu, DEFAULT_GLSL_VERSION).unwrap();
        let result = compiler.build_builtin(&mut gpu, "broken", "#version 300 es\n#error nope\n");
        assert!(matches!(
            result,
            Err(CompositorError::BuiltinShader { name: "broken", .. })
        ));
    }
}
