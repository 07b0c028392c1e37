use std::collections::HashMap;

use glow::HasContext;

use super::{
    FramebufferHandle, GpuContext, GpuError, ProgramHandle, ShaderHandle, ShaderStage,
    TextureHandle, TextureOptions, UniformData, UniformLocation,
};
use crate::layer::{TextureFilter, TextureWrap};

struct Framebuffer {
    fbo: glow::NativeFramebuffer,
    texture: TextureHandle,
}

/// [`GpuContext`] over an OpenGL (ES) 3 context owned by the host.
///
/// The host must keep the context current on the calling thread for every
/// call made through this type.
pub struct GlowGpu {
    gl: glow::Context,
    vertex_array: glow::NativeVertexArray,
    next_id: u32,
    shaders: HashMap<ShaderHandle, glow::NativeShader>,
    programs: HashMap<ProgramHandle, glow::NativeProgram>,
    textures: HashMap<TextureHandle, glow::NativeTexture>,
    framebuffers: HashMap<FramebufferHandle, Framebuffer>,
    locations: Vec<glow::NativeUniformLocation>,
    location_index: HashMap<(ProgramHandle, String), UniformLocation>,
    max_dimension: u32,
}

impl GlowGpu {
    pub fn new(gl: glow::Context) -> Result<Self, GpuError> {
        let (vertex_array, max_dimension) = unsafe {
            let vertex_array = gl
                .create_vertex_array()
                .map_err(|e| GpuError::new("vertex array", e))?;
            gl.bind_vertex_array(Some(vertex_array));
            gl.disable(glow::DEPTH_TEST);
            gl.disable(glow::BLEND);
            let max = gl.get_parameter_i32(glow::MAX_TEXTURE_SIZE).max(1) as u32;
            (vertex_array, max)
        };
        tracing::debug!(max_texture_dimension = max_dimension, "initialised GL backend");
        Ok(Self {
            gl,
            vertex_array,
            next_id: 1,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            locations: Vec::new(),
            location_index: HashMap::new(),
            max_dimension,
        })
    }

    pub fn context(&self) -> &glow::Context {
        &self.gl
    }

    /// Releases every object still owned by this backend and returns the context.
    pub fn into_inner(mut self) -> glow::Context {
        unsafe {
            for (_, program) in self.programs.drain() {
                self.gl.delete_program(program);
            }
            for (_, shader) in self.shaders.drain() {
                self.gl.delete_shader(shader);
            }
            for (_, framebuffer) in self.framebuffers.drain() {
                self.gl.delete_framebuffer(framebuffer.fbo);
            }
            for (_, texture) in self.textures.drain() {
                self.gl.delete_texture(texture);
            }
            self.gl.delete_vertex_array(self.vertex_array);
        }
        self.gl
    }

    fn allocate(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    unsafe fn allocate_storage(&self, texture: glow::NativeTexture, width: u32, height: u32, rgba: Option<&[u8]>) {
        self.gl.bind_texture(glow::TEXTURE_2D, Some(texture));
        self.gl.tex_image_2d(
            glow::TEXTURE_2D,
            0,
            glow::RGBA8 as i32,
            width.max(1) as i32,
            height.max(1) as i32,
            0,
            glow::RGBA,
            glow::UNSIGNED_BYTE,
            glow::PixelUnpackData::Slice(rgba),
        );
        self.gl.bind_texture(glow::TEXTURE_2D, None);
    }
}

fn filter_enum(filter: TextureFilter) -> i32 {
    match filter {
        TextureFilter::Linear => glow::LINEAR as i32,
        TextureFilter::Nearest => glow::NEAREST as i32,
    }
}

fn wrap_enum(wrap: TextureWrap) -> i32 {
    match wrap {
        TextureWrap::Clamp => glow::CLAMP_TO_EDGE as i32,
        TextureWrap::Repeat => glow::REPEAT as i32,
        TextureWrap::Mirror => glow::MIRRORED_REPEAT as i32,
    }
}

impl GpuContext for GlowGpu {
    fn create_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderHandle, String> {
        let kind = match stage {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        };
        let shader = unsafe {
            let shader = self.gl.create_shader(kind)?;
            self.gl.shader_source(shader, source);
            self.gl.compile_shader(shader);
            if !self.gl.get_shader_compile_status(shader) {
                let log = self.gl.get_shader_info_log(shader);
                self.gl.delete_shader(shader);
                return Err(log);
            }
            shader
        };
        let handle = ShaderHandle(self.allocate());
        self.shaders.insert(handle, shader);
        Ok(handle)
    }

    fn delete_shader(&mut self, shader: ShaderHandle) {
        if let Some(shader) = self.shaders.remove(&shader) {
            unsafe { self.gl.delete_shader(shader) };
        }
    }

    fn link_program(
        &mut self,
        vertex: ShaderHandle,
        fragment: ShaderHandle,
    ) -> Result<ProgramHandle, String> {
        let (Some(&vs), Some(&fs)) = (self.shaders.get(&vertex), self.shaders.get(&fragment)) else {
            return Err("link_program called with an unknown shader handle".into());
        };
        let program = unsafe {
            let program = self.gl.create_program()?;
            self.gl.attach_shader(program, vs);
            self.gl.attach_shader(program, fs);
            self.gl.link_program(program);
            self.gl.detach_shader(program, vs);
            self.gl.detach_shader(program, fs);
            if !self.gl.get_program_link_status(program) {
                let log = self.gl.get_program_info_log(program);
                self.gl.delete_program(program);
                return Err(log);
            }
            program
        };
        let handle = ProgramHandle(self.allocate());
        self.programs.insert(handle, program);
        Ok(handle)
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        if let Some(native) = self.programs.remove(&program) {
            unsafe { self.gl.delete_program(native) };
        }
        self.location_index.retain(|(owner, _), _| *owner != program);
    }

    fn uniform_location(&mut self, program: ProgramHandle, name: &str) -> Option<UniformLocation> {
        let key = (program, name.to_string());
        if let Some(location) = self.location_index.get(&key) {
            return Some(*location);
        }
        let native = *self.programs.get(&program)?;
        let location = unsafe { self.gl.get_uniform_location(native, name) }?;
        self.locations.push(location);
        let handle = UniformLocation(self.locations.len() as u32 - 1);
        self.location_index.insert(key, handle);
        Some(handle)
    }

    fn use_program(&mut self, program: ProgramHandle) {
        let native = self.programs.get(&program).copied();
        unsafe { self.gl.use_program(native) };
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformData) {
        let Some(native) = self.locations.get(location.0 as usize) else {
            return;
        };
        let location = Some(native);
        unsafe {
            match value {
                UniformData::Float(x) => self.gl.uniform_1_f32(location, x),
                UniformData::Vec2([x, y]) => self.gl.uniform_2_f32(location, x, y),
                UniformData::Vec3([x, y, z]) => self.gl.uniform_3_f32(location, x, y, z),
                UniformData::Vec4([x, y, z, w]) => self.gl.uniform_4_f32(location, x, y, z, w),
                UniformData::Int(x) => self.gl.uniform_1_i32(location, x),
                UniformData::IVec2([x, y]) => self.gl.uniform_2_i32(location, x, y),
                UniformData::IVec3([x, y, z]) => self.gl.uniform_3_i32(location, x, y, z),
                UniformData::IVec4([x, y, z, w]) => self.gl.uniform_4_i32(location, x, y, z, w),
            }
        }
    }

    fn create_texture(&mut self, options: TextureOptions) -> Result<TextureHandle, GpuError> {
        let texture = unsafe {
            let texture = self
                .gl
                .create_texture()
                .map_err(|e| GpuError::new("texture", e))?;
            self.gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            let filter = filter_enum(options.filter);
            let wrap = wrap_enum(options.wrap);
            self.gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, filter);
            self.gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, filter);
            self.gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, wrap);
            self.gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, wrap);
            self.gl.bind_texture(glow::TEXTURE_2D, None);
            texture
        };
        let handle = TextureHandle(self.allocate());
        self.textures.insert(handle, texture);
        Ok(handle)
    }

    fn upload_texture(&mut self, texture: TextureHandle, width: u32, height: u32, rgba: &[u8]) {
        let Some(&native) = self.textures.get(&texture) else {
            return;
        };
        let expected = (width as usize) * (height as usize) * 4;
        if rgba.len() != expected {
            tracing::warn!(%texture, width, height, len = rgba.len(), "ignoring texture upload with mismatched size");
            return;
        }
        unsafe { self.allocate_storage(native, width, height, Some(rgba)) };
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        if let Some(native) = self.textures.remove(&texture) {
            unsafe { self.gl.delete_texture(native) };
        }
    }

    fn create_framebuffer(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<(FramebufferHandle, TextureHandle), GpuError> {
        let texture = self.create_texture(TextureOptions::default())?;
        let native_texture = self
            .textures
            .get(&texture)
            .copied()
            .ok_or_else(|| GpuError::new("framebuffer", "colour texture vanished"))?;
        let fbo = unsafe {
            self.allocate_storage(native_texture, width, height, None);
            let fbo = match self.gl.create_framebuffer() {
                Ok(fbo) => fbo,
                Err(e) => {
                    self.delete_texture(texture);
                    return Err(GpuError::new("framebuffer", e));
                }
            };
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
            self.gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(native_texture),
                0,
            );
            let status = self.gl.check_framebuffer_status(glow::FRAMEBUFFER);
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            if status != glow::FRAMEBUFFER_COMPLETE {
                self.gl.delete_framebuffer(fbo);
                self.delete_texture(texture);
                return Err(GpuError::new(
                    "framebuffer",
                    format!("incomplete framebuffer: 0x{status:x}"),
                ));
            }
            fbo
        };
        let handle = FramebufferHandle(self.allocate());
        self.framebuffers.insert(handle, Framebuffer { fbo, texture });
        Ok((handle, texture))
    }

    fn resize_framebuffer(&mut self, framebuffer: FramebufferHandle, width: u32, height: u32) {
        let Some(native) = self
            .framebuffers
            .get(&framebuffer)
            .and_then(|fb| self.textures.get(&fb.texture))
            .copied()
        else {
            return;
        };
        unsafe { self.allocate_storage(native, width, height, None) };
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if let Some(target) = self.framebuffers.remove(&framebuffer) {
            unsafe { self.gl.delete_framebuffer(target.fbo) };
            self.delete_texture(target.texture);
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>, width: u32, height: u32) {
        let native = framebuffer.and_then(|fb| self.framebuffers.get(&fb)).map(|fb| fb.fbo);
        unsafe {
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, native);
            self.gl.viewport(0, 0, width as i32, height as i32);
        }
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureHandle>) {
        let native = texture.and_then(|texture| self.textures.get(&texture)).copied();
        unsafe {
            self.gl.active_texture(glow::TEXTURE0 + unit);
            self.gl.bind_texture(glow::TEXTURE_2D, native);
        }
    }

    fn clear(&mut self, [r, g, b, a]: [f32; 4]) {
        unsafe {
            self.gl.clear_color(r, g, b, a);
            self.gl.clear(glow::COLOR_BUFFER_BIT);
        }
    }

    fn draw_fullscreen_quad(&mut self) {
        unsafe {
            self.gl.bind_vertex_array(Some(self.vertex_array));
            self.gl.draw_arrays(glow::TRIANGLES, 0, 3);
        }
    }

    fn read_pixels(&mut self, width: u32, height: u32) -> Vec<u8> {
        let mut pixels = vec![0u8; (width as usize) * (height as usize) * 4];
        unsafe {
            self.gl.read_pixels(
                0,
                0,
                width as i32,
                height as i32,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::Slice(Some(&mut pixels)),
            );
        }
        pixels
    }

    fn max_texture_dimension(&self) -> u32 {
        self.max_dimension
    }
}
