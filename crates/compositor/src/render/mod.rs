//! Frame compositing.
//!
//! Layers are drawn back to front. Each shader layer renders into a fresh
//! pool target while sampling the result so far as `gPreviousLayer`, so
//! blending happens inside the layer's own program. Groups either pass their
//! children straight through or render them into an isolated target that is
//! then composited like a texture layer.
use image::imageops::flip_vertical_in_place;
use image::RgbaImage;
use serde_json::{Map, Value as Json};

use crate::audio::{AudioEnvelope, AudioFrame, AudioLevels, SPECTRUM_SIZE};
use crate::compile::BuiltinLocations;
use crate::compiled::{CompiledId, CompiledKind, CompiledLayer, CompiledRoot, CompiledShader};
use crate::error::{CompositorError, Result};
use crate::external::{ExternalGlobals, ExternalLayerExecutor, ExternalLayers, ExternalRenderRequest, ExternalRenderResult};
use crate::gpu::{GpuContext, GpuError, TextureHandle, TextureOptions, UniformData};
use crate::input::{uniform_key, CurveContext, InputDevices, InputState, NoInputDevices};
use crate::layer::{BlendMode, Value};
use crate::targets::{RenderTargets, TargetId};
use crate::textures::{NoTextureLoader, TextureCache, TextureLoader};
use crate::types::{FrameStats, Pointer, RendererOptions};
use crate::uniforms::Uniform;

pub mod blend;
mod builtins;
mod timeline;

use builtins::Builtins;
pub use timeline::FrameTime;
use timeline::{date_uniform, FrameClock};

const PREVIOUS_LAYER_UNIT: u32 = 0;
const AUDIO_SPECTRUM_UNIT: u32 = 1;
const FIRST_FREE_UNIT: u32 = 2;

const TRANSPARENT: [f32; 4] = [0.0, 0.0, 0.0, 0.0];
const FAILED_LAYER: [f32; 4] = [1.0, 0.0, 0.0, 1.0];

/// Per-frame input from the host.
#[derive(Clone, Copy)]
pub struct FrameInput<'a> {
    /// Seconds on the host clock.
    pub timestamp: f64,
    pub pointer: Pointer,
    pub devices: &'a dyn InputDevices,
    /// Latest analysed audio block, if audio is connected.
    pub audio: Option<&'a AudioFrame>,
}

impl FrameInput<'static> {
    /// A frame with no input devices and no audio.
    pub fn at(timestamp: f64) -> Self {
        Self {
            timestamp,
            pointer: Pointer::default(),
            devices: &NoInputDevices,
            audio: None,
        }
    }
}

#[derive(Clone, Copy)]
struct FrameState<'a> {
    time: FrameTime,
    date: [f32; 4],
    pointer: Pointer,
    devices: &'a dyn InputDevices,
}

/// Uniform value for this frame after curves and bindings are evaluated.
enum Resolved<'u> {
    Float(f64),
    Int(i64),
    Button([f32; 4]),
    Axis(f64),
    Stored(&'u Value),
}

pub struct Renderer<G: GpuContext> {
    gpu: G,
    options: RendererOptions,
    targets: RenderTargets,
    builtins: Builtins,
    clock: FrameClock,
    last_time: FrameTime,
    input: InputState,
    envelope: AudioEnvelope,
    spectrum: TextureHandle,
    textures: TextureCache,
    loader: Box<dyn TextureLoader>,
    external: ExternalLayers,
    rendering: bool,
}

impl<G: GpuContext> Renderer<G> {
    pub fn new(mut gpu: G, options: RendererOptions) -> Result<Self> {
        let builtins = Builtins::new(&mut gpu, &options.glsl_version)?;
        let targets = RenderTargets::create(&mut gpu, options.width, options.height, options.anti_alias)?;
        let spectrum = gpu.create_texture(TextureOptions::default())?;
        let silence = AudioFrame::default().spectrum_texels();
        gpu.upload_texture(spectrum, SPECTRUM_SIZE as u32, 2, bytemuck::cast_slice(&silence));
        tracing::info!(
            width = options.width,
            height = options.height,
            anti_alias = targets.anti_alias(),
            glsl_version = options.glsl_version.as_str(),
            "renderer ready"
        );
        Ok(Self {
            gpu,
            envelope: AudioEnvelope::new(options.audio),
            external: ExternalLayers::new(options.frames_ahead),
            options,
            targets,
            builtins,
            clock: FrameClock::default(),
            last_time: FrameTime::default(),
            input: InputState::new(),
            spectrum,
            textures: TextureCache::new(),
            loader: Box::new(NoTextureLoader),
            rendering: false,
        })
    }

    pub fn options(&self) -> &RendererOptions {
        &self.options
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut G {
        &mut self.gpu
    }

    pub fn targets(&self) -> &RenderTargets {
        &self.targets
    }

    pub fn input_state(&self) -> &InputState {
        &self.input
    }

    pub fn audio_levels(&self) -> AudioLevels {
        self.envelope.levels()
    }

    pub fn texture_cache(&self) -> &TextureCache {
        &self.textures
    }

    pub fn set_texture_loader(&mut self, loader: Box<dyn TextureLoader>) {
        self.loader = loader;
    }

    /// Registers the runner for JavaScript layers and the channel its
    /// results arrive on.
    pub fn set_external_executor(
        &mut self,
        executor: Box<dyn ExternalLayerExecutor>,
        results: crossbeam_channel::Receiver<ExternalRenderResult>,
    ) {
        self.external.set_executor(executor, results);
    }

    /// Renders one frame of `root` to the output surface.
    pub fn render(&mut self, root: &CompiledRoot, input: FrameInput<'_>) -> Result<FrameStats> {
        self.begin()?;
        let result = self.render_frame(root, input);
        if result.is_err() {
            self.reclaim_targets();
        }
        self.rendering = false;
        result
    }

    /// Renders each listed shader layer alone over a checkerboard at
    /// `width`×`height`. Images are returned top row first.
    pub fn render_layer_previews(
        &mut self,
        root: &CompiledRoot,
        layer_ids: &[&str],
        width: u32,
        height: u32,
    ) -> Result<Vec<(String, RgbaImage)>> {
        self.begin()?;
        let result = match RenderTargets::create(&mut self.gpu, width, height, 1) {
            Ok(pool) => {
                let saved = std::mem::replace(&mut self.targets, pool);
                let previews = self.render_previews(root, layer_ids);
                if previews.is_err() {
                    self.reclaim_targets();
                }
                let mut pool = std::mem::replace(&mut self.targets, saved);
                let deleted = pool.delete(&mut self.gpu);
                previews.and_then(|previews| deleted.map(|()| previews))
            }
            Err(error) => Err(error),
        };
        self.rendering = false;
        result
    }

    /// Reads the output surface back, top row first.
    pub fn read_output(&mut self) -> Result<RgbaImage> {
        let (width, height) = self.targets.output_size();
        self.gpu.bind_framebuffer(None, width, height);
        read_image(&mut self.gpu, width, height)
    }

    /// Changes the output size. Without anti-aliasing the pool is resized in
    /// place; otherwise it is rebuilt.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if self.targets.output_size() == (width.max(1), height.max(1)) {
            return Ok(());
        }
        if self.targets.anti_alias() == 1 {
            self.targets.resize(&mut self.gpu, width, height)?;
        } else {
            let rebuilt = RenderTargets::create(&mut self.gpu, width, height, self.options.anti_alias)?;
            let mut stale = std::mem::replace(&mut self.targets, rebuilt);
            stale.delete(&mut self.gpu)?;
        }
        self.options.width = width;
        self.options.height = height;
        tracing::debug!(width, height, "resized output");
        Ok(())
    }

    /// Drops input state, textures and external frames no longer referenced
    /// by `root`.
    pub fn prune_state(&mut self, root: &CompiledRoot) {
        let live = root.layer_ids();
        self.input.retain_layers(&live);
        self.external.retain_layers(&mut self.gpu, &live);
        self.textures.retain(&mut self.gpu, &root.texture_keys());
    }

    /// Releases every GPU object the renderer owns and hands back the context.
    pub fn destroy(mut self) -> Result<G> {
        self.targets.delete(&mut self.gpu)?;
        self.textures.clear(&mut self.gpu);
        self.external.clear(&mut self.gpu);
        self.gpu.delete_texture(self.spectrum);
        self.builtins.release(&mut self.gpu);
        Ok(self.gpu)
    }

    fn begin(&mut self) -> Result<()> {
        if self.rendering {
            return Err(CompositorError::AlreadyRendering);
        }
        self.rendering = true;
        Ok(())
    }

    /// Nothing outlives a frame, so targets still checked out after a failed
    /// one are stranded.
    fn reclaim_targets(&mut self) {
        let reclaimed = self.targets.reclaim();
        if reclaimed > 0 {
            tracing::warn!(reclaimed, "returned render targets stranded by a failed frame");
        }
    }

    fn render_frame(&mut self, root: &CompiledRoot, input: FrameInput<'_>) -> Result<FrameStats> {
        let time = self.clock.advance(input.timestamp);
        self.last_time = time;
        self.input.begin_frame(time.frame);
        let frame = FrameState {
            time,
            date: date_uniform(),
            pointer: input.pointer,
            devices: input.devices,
        };
        let mut stats = FrameStats {
            frame: time.frame,
            time: time.time,
            delta_time: time.delta,
            ..FrameStats::default()
        };

        stats.external_uploads = self.external.drain(&mut self.gpu)?;
        self.textures.poll(&mut self.gpu, self.loader.as_mut());
        if let Some(audio) = input.audio {
            self.envelope.update(audio, time.delta);
            if root.uses_audio_input() {
                let texels = audio.spectrum_texels();
                self.gpu
                    .upload_texture(self.spectrum, SPECTRUM_SIZE as u32, 2, bytemuck::cast_slice(&texels));
            }
        }

        let mut read = self.targets.request(&mut self.gpu)?;
        self.bind_target(read)?;
        self.gpu.clear(TRANSPARENT);
        self.composite_root(root, &frame, &mut read, &mut stats)?;
        self.present(read)?;
        self.targets.release(read)?;

        tracing::trace!(
            frame = stats.frame,
            layers = stats.layers_drawn,
            failed = stats.failed_layers,
            "rendered frame"
        );
        Ok(stats)
    }

    fn render_previews(&mut self, root: &CompiledRoot, layer_ids: &[&str]) -> Result<Vec<(String, RgbaImage)>> {
        let frame = FrameState {
            time: self.last_time,
            date: date_uniform(),
            pointer: Pointer::default(),
            devices: &NoInputDevices,
        };
        let mut stats = FrameStats::default();
        let mut previews = Vec::with_capacity(layer_ids.len());
        for &layer_id in layer_ids {
            let id = root
                .find(layer_id)
                .ok_or_else(|| CompositorError::UnknownLayer(layer_id.to_string()))?;
            let layer = root.layer(id);

            let mut read = self.targets.request(&mut self.gpu)?;
            self.bind_target(read)?;
            self.gpu.clear(TRANSPARENT);
            self.draw_checkerboard(&frame, &mut read)?;
            if let CompiledKind::Shader(shader) = &layer.kind {
                self.composite_shader(root, layer_id, layer, shader, &frame, &mut read, 1.0, &mut stats)?;
            } else {
                tracing::debug!(layer = layer_id, "previews only show shader layers");
            }

            self.bind_target(read)?;
            let (width, height) = self.targets.render_size();
            let image = read_image(&mut self.gpu, width, height);
            self.targets.release(read)?;
            previews.push((layer_id.to_string(), image?));
        }
        Ok(previews)
    }

    fn composite_root(
        &mut self,
        root: &CompiledRoot,
        frame: &FrameState<'_>,
        read: &mut TargetId,
        stats: &mut FrameStats,
    ) -> Result<()> {
        let top = root.layer(root.root());
        match &top.kind {
            CompiledKind::Group { children } if top.visible => {
                for &child in children.iter().rev() {
                    self.composite_layer(root, child, frame, read, 1.0, stats)?;
                }
                Ok(())
            }
            _ => self.composite_layer(root, root.root(), frame, read, 1.0, stats),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn composite_layer(
        &mut self,
        root: &CompiledRoot,
        id: CompiledId,
        frame: &FrameState<'_>,
        read: &mut TargetId,
        opacity_scale: f32,
        stats: &mut FrameStats,
    ) -> Result<()> {
        let layer = root.layer(id);
        if !layer.visible {
            return Ok(());
        }
        match &layer.kind {
            CompiledKind::Group { children } if layer.blend_mode == BlendMode::PassThrough => {
                let scale = opacity_scale * layer.opacity.clamp(0.0, 1.0);
                for &child in children.iter().rev() {
                    self.composite_layer(root, child, frame, read, scale, stats)?;
                }
                Ok(())
            }
            CompiledKind::Group { children } => {
                let mut isolated = self.targets.request(&mut self.gpu)?;
                self.bind_target(isolated)?;
                self.gpu.clear(TRANSPARENT);
                for &child in children.iter().rev() {
                    self.composite_layer(root, child, frame, &mut isolated, 1.0, stats)?;
                }
                let texture = self.target_texture(isolated)?;
                let composited = self.composite_texture(texture, frame, read, layer.blend_mode, layer.opacity * opacity_scale);
                self.targets.release(isolated)?;
                composited
            }
            CompiledKind::Shader(shader) => {
                self.composite_shader(root, &layer.id, layer, shader, frame, read, opacity_scale, stats)
            }
            CompiledKind::JavaScript { code } => {
                let requested = self.request_external(layer, code, frame)?;
                if requested {
                    stats.external_requests += 1;
                }
                match self.external.texture(&layer.id) {
                    Some(texture) => {
                        stats.layers_drawn += 1;
                        self.composite_texture(texture, frame, read, layer.blend_mode, layer.opacity * opacity_scale)
                    }
                    None => Ok(()),
                }
            }
            // Drawn by the shader layers that include the scene.
            CompiledKind::Sdf(_) => Ok(()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn composite_shader(
        &mut self,
        root: &CompiledRoot,
        layer_id: &str,
        layer: &CompiledLayer,
        shader: &CompiledShader,
        frame: &FrameState<'_>,
        read: &mut TargetId,
        opacity_scale: f32,
        stats: &mut FrameStats,
    ) -> Result<()> {
        let out = self.targets.request(&mut self.gpu)?;
        self.bind_target(out)?;
        let Some(program) = shader.program else {
            self.gpu.clear(FAILED_LAYER);
            stats.failed_layers += 1;
            return self.swap_read(read, out);
        };

        self.gpu.use_program(program);
        let previous = self.target_texture(*read)?;
        self.set_builtins(&shader.builtins, frame, previous, layer.blend_mode, layer.opacity * opacity_scale);
        let mut unit = FIRST_FREE_UNIT;
        for uniform in &layer.uniforms {
            if let Some(location) = uniform.location {
                if let Some(data) = self.uniform_data(layer_id, uniform, frame, &mut unit)? {
                    self.gpu.set_uniform(location, data);
                }
            }
        }
        for binding in &shader.scene_uniforms {
            let Some(location) = binding.location else {
                continue;
            };
            let owner = root.layer(binding.layer);
            if let Some(uniform) = owner.uniforms.get(binding.uniform) {
                if let Some(data) = self.uniform_data(&owner.id, uniform, frame, &mut unit)? {
                    self.gpu.set_uniform(location, data);
                }
            }
        }
        self.gpu.draw_fullscreen_quad();
        stats.layers_drawn += 1;
        self.swap_read(read, out)
    }

    fn composite_texture(
        &mut self,
        texture: TextureHandle,
        frame: &FrameState<'_>,
        read: &mut TargetId,
        blend_mode: BlendMode,
        opacity: f32,
    ) -> Result<()> {
        let out = self.targets.request(&mut self.gpu)?;
        self.bind_target(out)?;
        let program = self.builtins.texture.program;
        let builtins = self.builtins.texture.builtins;
        let texture_location = self.builtins.texture.texture;
        self.gpu.use_program(program);
        let previous = self.target_texture(*read)?;
        self.set_builtins(&builtins, frame, previous, blend_mode, opacity);
        self.gpu.bind_texture(FIRST_FREE_UNIT, Some(texture));
        self.gpu.set_uniform(texture_location, UniformData::Int(FIRST_FREE_UNIT as i32));
        self.gpu.draw_fullscreen_quad();
        self.swap_read(read, out)
    }

    fn draw_checkerboard(&mut self, frame: &FrameState<'_>, read: &mut TargetId) -> Result<()> {
        let out = self.targets.request(&mut self.gpu)?;
        self.bind_target(out)?;
        let program = self.builtins.checkerboard.program;
        let builtins = self.builtins.checkerboard.builtins;
        self.gpu.use_program(program);
        let previous = self.target_texture(*read)?;
        self.set_builtins(&builtins, frame, previous, BlendMode::Normal, 1.0);
        self.gpu.draw_fullscreen_quad();
        self.swap_read(read, out)
    }

    /// Copies the finished render down the anti-aliasing ladder and onto the
    /// output surface.
    fn present(&mut self, read: TargetId) -> Result<()> {
        let copy_program = self.builtins.copy.program;
        let copy_texture = self.builtins.copy.texture;
        let flip_location = self.builtins.copy.flip_y;
        self.gpu.use_program(copy_program);
        self.gpu.set_uniform(copy_texture, UniformData::Int(PREVIOUS_LAYER_UNIT as i32));

        let mut source = self.target_texture(read)?;
        let ladder = self.targets.ladder().to_vec();
        self.gpu.set_uniform(flip_location, UniformData::Int(0));
        for rung in ladder {
            self.bind_target(rung)?;
            self.gpu.bind_texture(PREVIOUS_LAYER_UNIT, Some(source));
            self.gpu.draw_fullscreen_quad();
            source = self.target_texture(rung)?;
        }

        let (width, height) = self.targets.output_size();
        self.gpu.bind_framebuffer(None, width, height);
        self.gpu.bind_texture(PREVIOUS_LAYER_UNIT, Some(source));
        self.gpu
            .set_uniform(flip_location, UniformData::Int(i32::from(self.options.flip_output)));
        self.gpu.draw_fullscreen_quad();
        self.gpu.bind_texture(PREVIOUS_LAYER_UNIT, None);
        Ok(())
    }

    fn set_builtins(
        &mut self,
        locations: &BuiltinLocations,
        frame: &FrameState<'_>,
        previous: TextureHandle,
        blend_mode: BlendMode,
        opacity: f32,
    ) {
        let (width, height) = self.targets.render_size();
        let scale = self.targets.anti_alias() as f32;
        let levels = self.envelope.levels();
        let pointer = frame.pointer;
        let writes = [
            (locations.resolution, UniformData::Vec2([width as f32, height as f32])),
            (locations.time, UniformData::Float(frame.time.time as f32)),
            (locations.delta_time, UniformData::Float(frame.time.delta as f32)),
            (locations.frame, UniformData::Int(frame.time.frame as i32)),
            (
                locations.pointer,
                UniformData::Vec4([pointer.x * scale, pointer.y * scale, if pointer.down { 1.0 } else { 0.0 }, 0.0]),
            ),
            (locations.date, UniformData::Vec4(frame.date)),
            (locations.previous_layer, UniformData::Int(PREVIOUS_LAYER_UNIT as i32)),
            (locations.blend_mode, UniformData::Int(blend_mode.code())),
            (locations.opacity, UniformData::Float(opacity.clamp(0.0, 1.0))),
            (locations.audio_volume, UniformData::Float(levels.volume)),
            (locations.audio_peak, UniformData::Float(levels.peak)),
            (locations.audio_trough, UniformData::Float(levels.trough)),
            (locations.audio_reactive, UniformData::Float(levels.reactive)),
            (locations.audio_spectrum, UniformData::Int(AUDIO_SPECTRUM_UNIT as i32)),
        ];
        for (location, data) in writes {
            if let Some(location) = location {
                self.gpu.set_uniform(location, data);
            }
        }
        self.gpu.bind_texture(PREVIOUS_LAYER_UNIT, Some(previous));
        if locations.audio_spectrum.is_some() {
            self.gpu.bind_texture(AUDIO_SPECTRUM_UNIT, Some(self.spectrum));
        }
    }

    fn resolve<'u>(&mut self, layer_id: &str, uniform: &'u Uniform, frame: &FrameState<'_>) -> Resolved<'u> {
        let value = &uniform.shader_value;
        if let Some(curve) = &value.curve {
            let context = CurveContext {
                time: frame.time.time,
                audio: self.envelope.levels(),
                devices: frame.devices,
            };
            let evaluated = self
                .input
                .evaluate_curve(&uniform_key(layer_id, &uniform.name, true), curve, context);
            match value.value {
                Value::Float(_) => return Resolved::Float(evaluated),
                Value::Int(_) => return Resolved::Int(evaluated.floor() as i64),
                _ => {}
            }
        }
        match &value.value {
            Value::Button(bindings) => {
                let key = uniform_key(layer_id, &uniform.name, false);
                let state = self
                    .input
                    .evaluate_button(&key, bindings, frame.devices, frame.time.time);
                Resolved::Button(state.as_uniform(frame.time.time))
            }
            Value::Axis(bindings) => {
                let key = uniform_key(layer_id, &uniform.name, false);
                Resolved::Axis(self.input.evaluate_axis(&key, bindings, frame.devices))
            }
            other => Resolved::Stored(other),
        }
    }

    /// GPU form of a uniform's current value. Samplers and gradients bind
    /// their texture to the next free unit.
    fn uniform_data(
        &mut self,
        layer_id: &str,
        uniform: &Uniform,
        frame: &FrameState<'_>,
        unit: &mut u32,
    ) -> Result<Option<UniformData>> {
        let data = match self.resolve(layer_id, uniform, frame) {
            Resolved::Float(value) | Resolved::Axis(value) => Some(UniformData::Float(value as f32)),
            Resolved::Int(value) => Some(UniformData::Int(value as i32)),
            Resolved::Button(state) => Some(UniformData::Vec4(state)),
            Resolved::Stored(value) => match value {
                Value::Float(value) => Some(UniformData::Float(*value as f32)),
                Value::Int(value) | Value::Enum(value) => Some(UniformData::Int(*value as i32)),
                Value::Bool(value) => Some(UniformData::Int(i32::from(*value))),
                Value::Vector(values) => float_vector(values),
                Value::IntVector(values) => int_vector(values.iter().map(|&value| value as i32)),
                Value::BoolVector(values) => int_vector(values.iter().map(|&value| i32::from(value))),
                Value::Sampler(descriptor) => {
                    let texture = self
                        .textures
                        .sampler(&mut self.gpu, self.loader.as_mut(), descriptor)?;
                    Some(self.bind_unit(texture, unit))
                }
                Value::Gradient(gradient) => {
                    let texture = self.textures.gradient(&mut self.gpu, gradient)?;
                    Some(self.bind_unit(texture, unit))
                }
                Value::Button(_) | Value::Axis(_) => None,
            },
        };
        Ok(data)
    }

    fn bind_unit(&mut self, texture: TextureHandle, unit: &mut u32) -> UniformData {
        let current = *unit;
        self.gpu.bind_texture(current, Some(texture));
        *unit += 1;
        UniformData::Int(current as i32)
    }

    fn request_external(&mut self, layer: &CompiledLayer, code: &str, frame: &FrameState<'_>) -> Result<bool> {
        if !self.external.wants_request(&layer.id) {
            return Ok(false);
        }
        let mut uniforms = Map::new();
        for uniform in &layer.uniforms {
            let value = match self.resolve(&layer.id, uniform, frame) {
                Resolved::Float(value) | Resolved::Axis(value) => Json::from(value),
                Resolved::Int(value) => Json::from(value),
                Resolved::Button(state) => Json::from(state.to_vec()),
                Resolved::Stored(value) => value.to_json(),
            };
            uniforms.insert(uniform.name.clone(), value);
        }
        let (width, height) = self.targets.output_size();
        let pointer = frame.pointer;
        let globals = ExternalGlobals {
            time: frame.time.time,
            delta_time: frame.time.delta,
            frame: frame.time.frame,
            resolution: [width, height],
            pointer: [pointer.x, pointer.y, if pointer.down { 1.0 } else { 0.0 }],
        };
        let requested = self.external.request(&layer.id, |request_id| ExternalRenderRequest {
            layer_id: layer.id.clone(),
            request_id,
            code: code.to_string(),
            globals,
            uniforms,
            width,
            height,
        });
        Ok(requested)
    }

    fn bind_target(&mut self, id: TargetId) -> Result<()> {
        let target = self.targets.target(id).ok_or(CompositorError::UnknownTarget(id))?;
        let (framebuffer, width, height) = (target.framebuffer, target.width, target.height);
        self.gpu.bind_framebuffer(Some(framebuffer), width, height);
        Ok(())
    }

    fn target_texture(&self, id: TargetId) -> Result<TextureHandle> {
        self.targets
            .target(id)
            .map(|target| target.texture)
            .ok_or(CompositorError::UnknownTarget(id))
    }

    fn swap_read(&mut self, read: &mut TargetId, out: TargetId) -> Result<()> {
        let previous = std::mem::replace(read, out);
        self.targets.release(previous)
    }
}

fn float_vector(values: &[f64]) -> Option<UniformData> {
    let values: Vec<f32> = values.iter().map(|&value| value as f32).collect();
    match values.as_slice() {
        &[x] => Some(UniformData::Float(x)),
        &[x, y] => Some(UniformData::Vec2([x, y])),
        &[x, y, z] => Some(UniformData::Vec3([x, y, z])),
        &[x, y, z, w] => Some(UniformData::Vec4([x, y, z, w])),
        _ => None,
    }
}

fn int_vector(values: impl Iterator<Item = i32>) -> Option<UniformData> {
    let values: Vec<i32> = values.collect();
    match values.as_slice() {
        &[x] => Some(UniformData::Int(x)),
        &[x, y] => Some(UniformData::IVec2([x, y])),
        &[x, y, z] => Some(UniformData::IVec3([x, y, z])),
        &[x, y, z, w] => Some(UniformData::IVec4([x, y, z, w])),
        _ => None,
    }
}

fn read_image(gpu: &mut dyn GpuContext, width: u32, height: u32) -> Result<RgbaImage> {
    let pixels = gpu.read_pixels(width, height);
    let mut image = RgbaImage::from_raw(width, height, pixels).ok_or_else(|| {
        GpuError::new("read-back image", format!("pixel buffer does not hold {width}x{height} RGBA texels"))
    })?;
    flip_vertical_in_place(&mut image);
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessGpu;

    fn small() -> RendererOptions {
        RendererOptions {
            width: 64,
            height: 32,
            ..RendererOptions::default()
        }
    }

    #[test]
    fn second_render_while_rendering_is_refused() {
        let mut renderer = Renderer::new(HeadlessGpu::new(), small()).unwrap();
        renderer.rendering = true;
        assert!(matches!(renderer.begin(), Err(CompositorError::AlreadyRendering)));
        renderer.rendering = false;
        assert!(renderer.begin().is_ok());
    }

    #[test]
    fn destroy_releases_everything() {
        let renderer = Renderer::new(HeadlessGpu::new(), small()).unwrap();
        let gpu = renderer.destroy().unwrap();
        assert_eq!(gpu.live_programs(), 0);
        assert_eq!(gpu.live_textures(), 0);
        assert_eq!(gpu.live_framebuffers(), 0);
    }

    #[test]
    fn vectors_map_to_matching_uniform_types() {
        assert_eq!(float_vector(&[1.0, 2.0]), Some(UniformData::Vec2([1.0, 2.0])));
        assert_eq!(int_vector([1, 0, 1].into_iter()), Some(UniformData::IVec3([1, 0, 1])));
        assert_eq!(float_vector(&[]), None);
    }
}
