//! Layer compiler and compositor for shaderstack.
//!
//! A document is a tree of layers: groups, GLSL shader layers, SDF layers and
//! script layers rendered by the host. Compiling a document wraps every
//! shader in the shared header, scans its uniforms and combines all SDF
//! layers into one scene function that shader layers can call. The renderer
//! then composites the compiled tree back to front through a pool of render
//! targets:
//!
//! ```text
//!   Document ──▶ compile_document() ──▶ CompiledRoot
//!                                           │
//!   FrameInput ──▶ Renderer::render() ◀─────┘
//!                       │ shader layer: draw into new target, blend with gPreviousLayer
//!                       │ group: pass through, or isolate and composite
//!                       ▼
//!                 AA ladder ──▶ output surface
//! ```
//!
//! All GPU access goes through [`gpu::GpuContext`]. [`gpu::GlowGpu`] drives a
//! real OpenGL (ES) context; [`gpu::HeadlessGpu`] records calls for tests and
//! offline tools.

pub mod audio;
pub mod compile;
pub mod compiled;
pub mod error;
pub mod external;
pub mod gpu;
pub mod input;
pub mod layer;
pub mod render;
pub mod sdf;
pub mod targets;
pub mod textures;
pub mod types;
pub mod uniforms;

pub use audio::{AudioEnvelope, AudioFrame, AudioLevels};
pub use compile::{CompileError, Severity};
pub use compiled::{compile_document, sync_values, CompileOptions, CompiledId, CompiledLayer, CompiledRoot};
pub use error::{CompositorError, Result};
pub use external::{ExternalLayerExecutor, ExternalRenderRequest, ExternalRenderResult};
pub use input::{InputDevices, InputSnapshot, NoInputDevices};
pub use layer::{BlendMode, Document, Layer, ShaderValue, Value};
pub use render::{FrameInput, Renderer};
pub use textures::{ImageFileLoader, TextureLoader};
pub use types::{AudioSettings, FrameStats, Pointer, RendererOptions};
