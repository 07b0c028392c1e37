//! Programs the compositor itself needs. A failure to build any of them is
//! fatal.
use crate::compile::{self, required_location, BuiltinLocations, ProgramCompiler};
use crate::error::Result;
use crate::gpu::{GpuContext, ProgramHandle, UniformLocation};

const COPY_NAME: &str = "copy";
const CHECKERBOARD_NAME: &str = "checkerboard";
const TEXTURE_NAME: &str = "custom-texture";

const CHECKERBOARD_RENDER: &str = "\
vec4 render(vec2 uv) {
    vec2 cell = floor(uv * gResolution / 8.0);
    float odd = mod(cell.x + cell.y, 2.0);
    return vec4(vec3(mix(0.8, 1.0, odd)), 1.0);
}
";

const TEXTURE_RENDER: &str = "\
uniform sampler2D gTexture;
vec4 render(vec2 uv) {
    return texture(gTexture, uv);
}
";

fn copy_source(glsl_version: &str) -> String {
    format!(
        "#version {glsl_version}
precision highp float;
in vec2 gUv;
out vec4 gFragColor;
uniform sampler2D gTexture;
uniform int gFlipY;
void main() {{
    vec2 uv = gUv;
    if (gFlipY != 0) {{
        uv.y = 1.0 - uv.y;
    }}
    gFragColor = texture(gTexture, uv);
}}
"
    )
}

/// Plain texture copy, used for downsampling and the final output.
#[derive(Debug)]
pub(crate) struct CopyProgram {
    pub program: ProgramHandle,
    pub texture: UniformLocation,
    pub flip_y: UniformLocation,
}

/// A texture composited like a layer, with blend mode and opacity.
#[derive(Debug)]
pub(crate) struct TextureProgram {
    pub program: ProgramHandle,
    pub texture: UniformLocation,
    pub builtins: BuiltinLocations,
}

#[derive(Debug)]
pub(crate) struct CheckerboardProgram {
    pub program: ProgramHandle,
    pub builtins: BuiltinLocations,
}

#[derive(Debug)]
pub(crate) struct Builtins {
    compiler: ProgramCompiler,
    pub copy: CopyProgram,
    pub texture: TextureProgram,
    pub checkerboard: CheckerboardProgram,
}

impl Builtins {
    pub fn new(gpu: &mut dyn GpuContext, glsl_version: &str) -> Result<Self> {
        let compiler = ProgramCompiler::new(gpu, glsl_version)?;

        let program = compiler.build_builtin(gpu, COPY_NAME, &copy_source(glsl_version))?;
        let copy = CopyProgram {
            program,
            texture: required_location(gpu, program, COPY_NAME, "gTexture")?,
            flip_y: required_location(gpu, program, COPY_NAME, "gFlipY")?,
        };

        let wrapped = compile::wrap_layer(glsl_version, TEXTURE_RENDER, None);
        let program = compiler.build_builtin(gpu, TEXTURE_NAME, &wrapped.text)?;
        let texture = TextureProgram {
            program,
            texture: required_location(gpu, program, TEXTURE_NAME, "gTexture")?,
            builtins: layer_locations(gpu, program, TEXTURE_NAME)?,
        };

        let wrapped = compile::wrap_layer(glsl_version, CHECKERBOARD_RENDER, None);
        let program = compiler.build_builtin(gpu, CHECKERBOARD_NAME, &wrapped.text)?;
        let checkerboard = CheckerboardProgram {
            program,
            builtins: layer_locations(gpu, program, CHECKERBOARD_NAME)?,
        };

        tracing::debug!("built-in programs ready");
        Ok(Self {
            compiler,
            copy,
            texture,
            checkerboard,
        })
    }

    pub fn release(self, gpu: &mut dyn GpuContext) {
        gpu.delete_program(self.copy.program);
        gpu.delete_program(self.texture.program);
        gpu.delete_program(self.checkerboard.program);
        self.compiler.release(gpu);
    }
}

/// Resolves the header uniforms and insists on the ones compositing needs.
fn layer_locations(
    gpu: &mut dyn GpuContext,
    program: ProgramHandle,
    name: &'static str,
) -> Result<BuiltinLocations> {
    for uniform in ["gPreviousLayer", "gBlendMode", "gOpacity"] {
        required_location(gpu, program, name, uniform)?;
    }
    Ok(BuiltinLocations::resolve(gpu, program))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::DEFAULT_GLSL_VERSION;
    use crate::error::CompositorError;
    use crate::gpu::HeadlessGpu;

    #[test]
    fn builtins_build_and_release_cleanly() {
        let mut gpu = HeadlessGpu::new();
        let builtins = Builtins::new(&mut gpu, DEFAULT_GLSL_VERSION).unwrap();
        assert_eq!(gpu.live_programs(), 3);
        builtins.release(&mut gpu);
        assert_eq!(gpu.live_programs(), 0);
        assert_eq!(gpu.live_shaders(), 0);
    }

    #[test]
    fn missing_required_uniform_is_fatal() {
        let mut gpu = HeadlessGpu::new();
        gpu.fail_link_when("gFlipY", "link error: gFlipY");
        let error = Builtins::new(&mut gpu, DEFAULT_GLSL_VERSION).unwrap_err();
        assert!(matches!(error, CompositorError::BuiltinShader { name: "copy", .. }));
    }
}
