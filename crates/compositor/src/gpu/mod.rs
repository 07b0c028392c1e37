//! GPU abstraction used by the compiler and the compositor.
//!
//! Only the operations the compositor needs are exposed: shader and program
//! objects, RGBA8 textures, framebuffers with a colour attachment, uniform
//! writes, a full-screen draw and pixel read-back. Handles are opaque ids
//! handed out by the backend.
use std::fmt;

use thiserror::Error;

use crate::layer::{TextureFilter, TextureWrap};

mod headless;

#[cfg(feature = "glow")]
mod gl;

pub use headless::{HeadlessGpu, HeadlessStats};

#[cfg(feature = "glow")]
pub use gl::GlowGpu;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

handle!(
    /// A compiled shader stage.
    ShaderHandle
);
handle!(
    /// A linked program.
    ProgramHandle
);
handle!(
    /// An RGBA8 2D texture.
    TextureHandle
);
handle!(
    /// A framebuffer with a single colour attachment.
    FramebufferHandle
);
handle!(
    /// A resolved uniform location within one program.
    UniformLocation
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// A value written to a uniform location. Booleans travel as ints and
/// samplers as their texture unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformData {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Int(i32),
    IVec2([i32; 2]),
    IVec3([i32; 3]),
    IVec4([i32; 4]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureOptions {
    pub filter: TextureFilter,
    pub wrap: TextureWrap,
}

#[derive(Debug, Error)]
#[error("failed to create {resource}: {reason}")]
pub struct GpuError {
    pub resource: &'static str,
    pub reason: String,
}

impl GpuError {
    pub fn new(resource: &'static str, reason: impl Into<String>) -> Self {
        Self {
            resource,
            reason: reason.into(),
        }
    }
}

/// Operations the compositor performs against a graphics context.
///
/// Compile and link failures return the driver's info log so the caller can
/// turn it into line-attributed diagnostics.
pub trait GpuContext {
    fn create_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderHandle, String>;
    fn delete_shader(&mut self, shader: ShaderHandle);
    fn link_program(
        &mut self,
        vertex: ShaderHandle,
        fragment: ShaderHandle,
    ) -> Result<ProgramHandle, String>;
    fn delete_program(&mut self, program: ProgramHandle);
    /// Returns `None` for names the program does not declare or that the
    /// driver optimised away.
    fn uniform_location(&mut self, program: ProgramHandle, name: &str) -> Option<UniformLocation>;
    fn use_program(&mut self, program: ProgramHandle);
    /// Writes to a location of the program currently in use.
    fn set_uniform(&mut self, location: UniformLocation, value: UniformData);

    fn create_texture(&mut self, options: TextureOptions) -> Result<TextureHandle, GpuError>;
    /// Replaces the texture contents with tightly packed RGBA8 rows, bottom row first.
    fn upload_texture(&mut self, texture: TextureHandle, width: u32, height: u32, rgba: &[u8]);
    fn delete_texture(&mut self, texture: TextureHandle);

    fn create_framebuffer(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<(FramebufferHandle, TextureHandle), GpuError>;
    fn resize_framebuffer(&mut self, framebuffer: FramebufferHandle, width: u32, height: u32);
    /// Deletes the framebuffer together with its colour texture.
    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle);
    /// Binds a framebuffer for drawing and sets the viewport. `None` selects
    /// the host's output surface.
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>, width: u32, height: u32);
    fn bind_texture(&mut self, unit: u32, texture: Option<TextureHandle>);

    fn clear(&mut self, rgba: [f32; 4]);
    fn draw_fullscreen_quad(&mut self);
    /// Reads the bound framebuffer, bottom row first.
    fn read_pixels(&mut self, width: u32, height: u32) -> Vec<u8>;
    fn max_texture_dimension(&self) -> u32;
}
