use std::collections::HashMap;

use super::{
    FramebufferHandle, GpuContext, GpuError, ProgramHandle, ShaderHandle, ShaderStage,
    TextureHandle, TextureOptions, UniformData, UniformLocation,
};
use crate::uniforms::scan;

const DEFAULT_MAX_DIMENSION: u32 = 8192;

/// Counters for everything the headless backend has been asked to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub shaders_compiled: usize,
    pub programs_linked: usize,
    pub draws: usize,
    pub clears: usize,
    pub uniform_writes: usize,
    pub texture_uploads: usize,
    pub framebuffers_created: usize,
}

#[derive(Debug)]
struct Shader {
    stage: ShaderStage,
    uniforms: Vec<String>,
}

#[derive(Debug)]
struct Program {
    uniforms: Vec<String>,
}

#[derive(Debug)]
struct Framebuffer {
    texture: TextureHandle,
    width: u32,
    height: u32,
    fill: [u8; 4],
}

/// A [`GpuContext`] without a GPU.
///
/// Shaders are "compiled" by scanning their uniform declarations, which become
/// the program's active uniforms. A `#error` directive in a fragment shader
/// produces a driver-style diagnostic for its line, and failures can be
/// injected for sources containing a given needle. Framebuffers remember the
/// last clear colour so read-back returns something meaningful.
#[derive(Debug)]
pub struct HeadlessGpu {
    next_id: u32,
    shaders: HashMap<ShaderHandle, Shader>,
    programs: HashMap<ProgramHandle, Program>,
    locations: Vec<(ProgramHandle, String)>,
    textures: HashMap<TextureHandle, (u32, u32)>,
    framebuffers: HashMap<FramebufferHandle, Framebuffer>,
    bound: Option<FramebufferHandle>,
    output_fill: [u8; 4],
    current_program: Option<ProgramHandle>,
    uniform_values: HashMap<(ProgramHandle, String), UniformData>,
    compile_failures: Vec<(String, String)>,
    link_failures: Vec<(String, String)>,
    max_dimension: u32,
    stats: HeadlessStats,
}

impl Default for HeadlessGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessGpu {
    pub fn new() -> Self {
        Self::with_max_texture_dimension(DEFAULT_MAX_DIMENSION)
    }

    pub fn with_max_texture_dimension(max_dimension: u32) -> Self {
        Self {
            next_id: 1,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            locations: Vec::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            bound: None,
            output_fill: [0; 4],
            current_program: None,
            uniform_values: HashMap::new(),
            compile_failures: Vec::new(),
            link_failures: Vec::new(),
            max_dimension,
            stats: HeadlessStats::default(),
        }
    }

    /// Fails every fragment compile whose source contains `needle`.
    pub fn fail_compile_when(&mut self, needle: impl Into<String>, log: impl Into<String>) {
        self.compile_failures.push((needle.into(), log.into()));
    }

    /// Fails every link whose fragment declares a uniform named `needle`.
    pub fn fail_link_when(&mut self, needle: impl Into<String>, log: impl Into<String>) {
        self.link_failures.push((needle.into(), log.into()));
    }

    pub fn stats(&self) -> HeadlessStats {
        self.stats
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn live_shaders(&self) -> usize {
        self.shaders.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    /// Last value written to `name` while `program` was in use.
    pub fn uniform_value(&self, program: ProgramHandle, name: &str) -> Option<UniformData> {
        self.uniform_values
            .get(&(program, name.to_string()))
            .copied()
    }

    pub fn program_uniforms(&self, program: ProgramHandle) -> Option<&[String]> {
        self.programs
            .get(&program)
            .map(|program| program.uniforms.as_slice())
    }

    fn allocate(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn directive_error(source: &str) -> Option<String> {
        source.lines().enumerate().find_map(|(index, line)| {
            let message = line.trim_start().strip_prefix("#error")?;
            Some(format!(
                "ERROR: 0:{}: '#error' : {}",
                index + 1,
                message.trim()
            ))
        })
    }
}

impl GpuContext for HeadlessGpu {
    fn create_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderHandle, String> {
        self.stats.shaders_compiled += 1;
        if stage == ShaderStage::Fragment {
            if let Some(log) = Self::directive_error(source) {
                return Err(log);
            }
            if let Some((_, log)) = self
                .compile_failures
                .iter()
                .find(|(needle, _)| source.contains(needle.as_str()))
            {
                return Err(log.clone());
            }
        }
        let mut uniforms: Vec<String> = Vec::new();
        for declaration in scan::uniform_declarations(source) {
            if !uniforms.contains(&declaration.name) {
                uniforms.push(declaration.name);
            }
        }
        let handle = ShaderHandle(self.allocate());
        self.shaders.insert(handle, Shader { stage, uniforms });
        Ok(handle)
    }

    fn delete_shader(&mut self, shader: ShaderHandle) {
        self.shaders.remove(&shader);
    }

    fn link_program(
        &mut self,
        vertex: ShaderHandle,
        fragment: ShaderHandle,
    ) -> Result<ProgramHandle, String> {
        let vertex_ok = self
            .shaders
            .get(&vertex)
            .is_some_and(|shader| shader.stage == ShaderStage::Vertex);
        let Some(fragment_shader) = self
            .shaders
            .get(&fragment)
            .filter(|shader| shader.stage == ShaderStage::Fragment)
        else {
            return Err("fragment shader handle is not a compiled fragment shader".into());
        };
        if !vertex_ok {
            return Err("vertex shader handle is not a compiled vertex shader".into());
        }
        if let Some((_, log)) = self
            .link_failures
            .iter()
            .find(|(needle, _)| fragment_shader.uniforms.contains(needle))
        {
            return Err(log.clone());
        }

        let uniforms = fragment_shader.uniforms.clone();
        self.stats.programs_linked += 1;
        let handle = ProgramHandle(self.allocate());
        self.programs.insert(handle, Program { uniforms });
        Ok(handle)
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
        self.uniform_values.retain(|(owner, _), _| *owner != program);
        if self.current_program == Some(program) {
            self.current_program = None;
        }
    }

    fn uniform_location(&mut self, program: ProgramHandle, name: &str) -> Option<UniformLocation> {
        let declared = self.programs.get(&program)?.uniforms.iter().any(|u| u == name);
        if !declared {
            return None;
        }
        if let Some(index) = self
            .locations
            .iter()
            .position(|(owner, existing)| *owner == program && existing == name)
        {
            return Some(UniformLocation(index as u32));
        }
        self.locations.push((program, name.to_string()));
        Some(UniformLocation(self.locations.len() as u32 - 1))
    }

    fn use_program(&mut self, program: ProgramHandle) {
        self.current_program = Some(program);
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformData) {
        self.stats.uniform_writes += 1;
        let Some((owner, name)) = self.locations.get(location.0 as usize) else {
            return;
        };
        if self.current_program == Some(*owner) {
            self.uniform_values.insert((*owner, name.clone()), value);
        }
    }

    fn create_texture(&mut self, _options: TextureOptions) -> Result<TextureHandle, GpuError> {
        let handle = TextureHandle(self.allocate());
        self.textures.insert(handle, (0, 0));
        Ok(handle)
    }

    fn upload_texture(&mut self, texture: TextureHandle, width: u32, height: u32, _rgba: &[u8]) {
        self.stats.texture_uploads += 1;
        if let Some(size) = self.textures.get_mut(&texture) {
            *size = (width, height);
        }
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture);
    }

    fn create_framebuffer(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<(FramebufferHandle, TextureHandle), GpuError> {
        if width == 0 || height == 0 || width > self.max_dimension || height > self.max_dimension {
            return Err(GpuError::new(
                "framebuffer",
                format!("{width}x{height} exceeds the supported texture size"),
            ));
        }
        let texture = TextureHandle(self.allocate());
        self.textures.insert(texture, (width, height));
        let framebuffer = FramebufferHandle(self.allocate());
        self.framebuffers.insert(
            framebuffer,
            Framebuffer {
                texture,
                width,
                height,
                fill: [0; 4],
            },
        );
        self.stats.framebuffers_created += 1;
        Ok((framebuffer, texture))
    }

    fn resize_framebuffer(&mut self, framebuffer: FramebufferHandle, width: u32, height: u32) {
        if let Some(target) = self.framebuffers.get_mut(&framebuffer) {
            target.width = width;
            target.height = height;
            self.textures.insert(target.texture, (width, height));
        }
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if let Some(target) = self.framebuffers.remove(&framebuffer) {
            self.textures.remove(&target.texture);
        }
        if self.bound == Some(framebuffer) {
            self.bound = None;
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>, _width: u32, _height: u32) {
        self.bound = framebuffer;
    }

    fn bind_texture(&mut self, _unit: u32, _texture: Option<TextureHandle>) {}

    fn clear(&mut self, rgba: [f32; 4]) {
        self.stats.clears += 1;
        let fill = rgba.map(|channel| (channel.clamp(0.0, 1.0) * 255.0).round() as u8);
        match self.bound.and_then(|bound| self.framebuffers.get_mut(&bound)) {
            Some(target) => target.fill = fill,
            None => self.output_fill = fill,
        }
    }

    fn draw_fullscreen_quad(&mut self) {
        self.stats.draws += 1;
    }

    fn read_pixels(&mut self, width: u32, height: u32) -> Vec<u8> {
        let fill = self
            .bound
            .and_then(|bound| self.framebuffers.get(&bound))
            .map_or(self.output_fill, |target| target.fill);
        fill.repeat((width as usize) * (height as usize))
    }

    fn max_texture_dimension(&self) -> u32 {
        self.max_dimension
    }
}
