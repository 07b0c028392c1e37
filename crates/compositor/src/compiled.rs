//! Compilation of a layer document into GPU programs.
//!
//! The compiled tree mirrors the document in an arena: every layer gets a
//! [`CompiledId`] and refers to its parent by id. Compilation runs in three
//! passes. SDF layers are compiled on their own first, then all SDF layers are
//! combined into one scene, and finally shader layers are compiled with the
//! scene injected where they use it.
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use crate::compile::{self, BuiltinLocations, CompileError, ProgramCompiler, DEFAULT_GLSL_VERSION};
use crate::error::{CompositorError, Result};
use crate::gpu::{GpuContext, ProgramHandle, UniformLocation};
use crate::layer::{BlendMode, Layer, ShaderValue};
use crate::sdf::{self, SceneLayer, SdfScene, SdfSignature};
use crate::textures::CacheKey;
use crate::uniforms::{extract_uniforms, scan, Uniform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompiledId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    pub glsl_version: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            glsl_version: DEFAULT_GLSL_VERSION.to_string(),
        }
    }
}

/// An SDF layer uniform as bound on a program that includes the scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneUniform {
    pub layer: CompiledId,
    pub uniform: usize,
    pub location: Option<UniformLocation>,
}

#[derive(Debug, Clone)]
pub struct CompiledShader {
    /// `None` when compiling or linking failed; the layer renders red.
    pub program: Option<ProgramHandle>,
    /// Complete fragment source handed to the driver.
    pub source: String,
    pub builtins: BuiltinLocations,
    pub scene_uniforms: Vec<SceneUniform>,
    pub uses_scene: bool,
}

#[derive(Debug, Clone)]
pub struct CompiledSdf {
    /// `None` when the signature could not be parsed.
    pub signature: Option<SdfSignature>,
    pub children: Vec<CompiledId>,
}

#[derive(Debug, Clone)]
pub enum CompiledKind {
    Group { children: Vec<CompiledId> },
    Shader(CompiledShader),
    Sdf(CompiledSdf),
    JavaScript { code: String },
}

#[derive(Debug, Clone)]
pub struct CompiledLayer {
    pub id: String,
    pub name: String,
    pub parent: Option<CompiledId>,
    pub visible: bool,
    pub blend_mode: BlendMode,
    pub opacity: f32,
    pub uniforms: Vec<Uniform>,
    pub errors: Vec<CompileError>,
    pub uses_audio_input: bool,
    pub kind: CompiledKind,
}

impl CompiledLayer {
    pub fn children(&self) -> &[CompiledId] {
        match &self.kind {
            CompiledKind::Group { children } => children,
            CompiledKind::Sdf(sdf) => &sdf.children,
            CompiledKind::Shader(_) | CompiledKind::JavaScript { .. } => &[],
        }
    }

    pub fn program(&self) -> Option<ProgramHandle> {
        match &self.kind {
            CompiledKind::Shader(shader) => shader.program,
            _ => None,
        }
    }

    pub fn has_errors(&self) -> bool {
        self.errors.iter().any(CompileError::is_error)
    }

    pub fn uniform(&self, name: &str) -> Option<&Uniform> {
        self.uniforms.iter().find(|uniform| uniform.name == name)
    }

    pub fn shader_values(&self) -> Vec<ShaderValue> {
        self.uniforms
            .iter()
            .map(|uniform| uniform.shader_value.clone())
            .collect()
    }
}

/// The compiled form of a whole document. Owns GPU programs, which must be
/// released with [`destroy`](Self::destroy) or by passing the tree as the
/// previous tree of the next compile.
#[derive(Debug)]
pub struct CompiledRoot {
    layers: Vec<CompiledLayer>,
    root: CompiledId,
    scene: Option<SdfScene>,
    compiler: Option<ProgramCompiler>,
    destroyed: bool,
}

impl CompiledRoot {
    pub fn root(&self) -> CompiledId {
        self.root
    }

    pub fn layer(&self, id: CompiledId) -> &CompiledLayer {
        &self.layers[id.0]
    }

    pub fn layers(&self) -> impl Iterator<Item = (CompiledId, &CompiledLayer)> {
        self.layers
            .iter()
            .enumerate()
            .map(|(index, layer)| (CompiledId(index), layer))
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn find(&self, layer_id: &str) -> Option<CompiledId> {
        self.layers
            .iter()
            .position(|layer| layer.id == layer_id)
            .map(CompiledId)
    }

    pub fn scene(&self) -> Option<&SdfScene> {
        self.scene.as_ref()
    }

    /// Every diagnostic in the tree, tagged with its layer id.
    pub fn errors(&self) -> impl Iterator<Item = (&str, &CompileError)> {
        self.layers
            .iter()
            .flat_map(|layer| layer.errors.iter().map(move |error| (layer.id.as_str(), error)))
    }

    pub fn has_errors(&self) -> bool {
        self.layers.iter().any(CompiledLayer::has_errors)
    }

    pub fn uses_audio_input(&self) -> bool {
        self.layer(self.root).uses_audio_input
    }

    pub fn layer_ids(&self) -> HashSet<&str> {
        self.layers.iter().map(|layer| layer.id.as_str()).collect()
    }

    /// Textures referenced by sampler and gradient uniforms.
    pub fn texture_keys(&self) -> HashSet<CacheKey> {
        self.layers
            .iter()
            .flat_map(|layer| &layer.uniforms)
            .filter_map(|uniform| CacheKey::of_value(&uniform.shader_value.value))
            .collect()
    }

    /// Replaces one uniform value, validated against the uniform's type.
    /// Returns `false` when the layer declares no uniform of that name.
    pub fn set_shader_value(&mut self, layer_id: &str, value: &ShaderValue) -> Result<bool> {
        let id = self
            .find(layer_id)
            .ok_or_else(|| CompositorError::UnknownLayer(layer_id.to_string()))?;
        let Some(uniform) = self.layers[id.0]
            .uniforms
            .iter_mut()
            .find(|uniform| uniform.name == value.name)
        else {
            return Ok(false);
        };
        uniform.shader_value = ShaderValue {
            name: uniform.name.clone(),
            value: uniform.kind.coerce(&value.value.to_json()),
            curve: value.curve.clone().filter(|_| uniform.kind.accepts_curve()),
        };
        Ok(true)
    }

    /// Releases every GPU object owned by the tree.
    pub fn destroy(mut self, gpu: &mut dyn GpuContext) {
        for layer in &mut self.layers {
            if let CompiledKind::Shader(shader) = &mut layer.kind {
                if let Some(program) = shader.program.take() {
                    gpu.delete_program(program);
                }
            }
        }
        if let Some(compiler) = self.compiler.take() {
            compiler.release(gpu);
        }
        self.destroyed = true;
    }

    fn live_programs(&self) -> usize {
        self.layers.iter().filter_map(CompiledLayer::program).count()
    }
}

impl Drop for CompiledRoot {
    fn drop(&mut self) {
        if !self.destroyed && (self.live_programs() > 0 || self.compiler.is_some()) {
            tracing::warn!(
                programs = self.live_programs(),
                "compiled layer tree dropped without being destroyed; GPU objects leaked"
            );
        }
    }
}

/// Writes every compiled layer's uniform values back into the document.
pub fn sync_values(document: &mut Layer, compiled: &CompiledRoot) {
    for (_, layer) in compiled.layers() {
        if matches!(layer.kind, CompiledKind::Group { .. }) {
            continue;
        }
        if let Some(values) = document.find_mut(&layer.id).and_then(Layer::values_mut) {
            *values = layer.shader_values();
        }
    }
}

fn source_hash(source: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    hasher.finish()
}

/// Programs of the previous tree, keyed by the hash of their fragment source.
struct ProgramCache {
    programs: HashMap<u64, ProgramHandle>,
}

impl ProgramCache {
    fn take(&mut self, source: &str) -> Option<ProgramHandle> {
        self.programs.remove(&source_hash(source))
    }

    fn release(self, gpu: &mut dyn GpuContext) -> usize {
        let count = self.programs.len();
        for program in self.programs.into_values() {
            gpu.delete_program(program);
        }
        count
    }
}

struct Previous {
    values: HashMap<String, Vec<ShaderValue>>,
    cache: ProgramCache,
    compiler: Option<ProgramCompiler>,
}

impl Previous {
    fn take(previous: Option<CompiledRoot>, options: &CompileOptions, gpu: &mut dyn GpuContext) -> Self {
        let Some(mut root) = previous else {
            return Self {
                values: HashMap::new(),
                cache: ProgramCache {
                    programs: HashMap::new(),
                },
                compiler: None,
            };
        };
        let mut values = HashMap::new();
        let mut programs = HashMap::new();
        for layer in &mut root.layers {
            values.insert(layer.id.clone(), layer.shader_values());
            if let CompiledKind::Shader(shader) = &mut layer.kind {
                if let Some(program) = shader.program.take() {
                    if let Some(duplicate) = programs.insert(source_hash(&shader.source), program) {
                        gpu.delete_program(duplicate);
                    }
                }
            }
        }
        let mut compiler = root.compiler.take();
        if compiler
            .as_ref()
            .is_some_and(|compiler| compiler.glsl_version() != options.glsl_version)
        {
            if let Some(stale) = compiler.take() {
                for program in programs.drain().map(|(_, program)| program) {
                    gpu.delete_program(program);
                }
                stale.release(gpu);
            }
        }
        root.destroyed = true;
        Self {
            values,
            cache: ProgramCache { programs },
            compiler,
        }
    }

    fn values_for<'a>(&'a self, layer: &'a Layer) -> &'a [ShaderValue] {
        self.values
            .get(layer.id())
            .map_or(layer.values(), Vec::as_slice)
    }
}

struct Builder<'d> {
    layers: Vec<CompiledLayer>,
    sources: Vec<&'d Layer>,
}

impl<'d> Builder<'d> {
    fn push(&mut self, layer: &'d Layer, parent: Option<CompiledId>) -> CompiledId {
        let id = CompiledId(self.layers.len());
        let (blend_mode, opacity, kind) = match layer {
            Layer::Group(group) => (
                group.blend_mode,
                group.opacity,
                CompiledKind::Group {
                    children: Vec::new(),
                },
            ),
            Layer::Shader(shader) => (
                shader.blend_mode,
                shader.opacity,
                CompiledKind::Shader(CompiledShader {
                    program: None,
                    source: String::new(),
                    builtins: BuiltinLocations::default(),
                    scene_uniforms: Vec::new(),
                    uses_scene: false,
                }),
            ),
            Layer::Sdf(_) => (
                BlendMode::Normal,
                1.0,
                CompiledKind::Sdf(CompiledSdf {
                    signature: None,
                    children: Vec::new(),
                }),
            ),
            Layer::JavaScript(script) => (
                script.blend_mode,
                script.opacity,
                CompiledKind::JavaScript {
                    code: script.code.clone(),
                },
            ),
        };
        self.layers.push(CompiledLayer {
            id: layer.id().to_string(),
            name: layer.name().to_string(),
            parent,
            visible: layer.visible(),
            blend_mode,
            opacity,
            uniforms: Vec::new(),
            errors: Vec::new(),
            uses_audio_input: false,
            kind,
        });
        self.sources.push(layer);

        let mut children = Vec::new();
        for child in layer.children() {
            if matches!(layer, Layer::Sdf(_)) && !matches!(child, Layer::Sdf(_)) {
                tracing::warn!(
                    parent = layer.id(),
                    child = child.id(),
                    "only SDF layers can be nested inside an SDF layer; ignoring child"
                );
                continue;
            }
            children.push(self.push(child, Some(id)));
        }
        match &mut self.layers[id.0].kind {
            CompiledKind::Group { children: slot } => *slot = children,
            CompiledKind::Sdf(sdf) => sdf.children = children,
            _ => {}
        }
        id
    }

    /// SDF layers not nested in another SDF layer, back to front.
    fn sdf_roots(&self, id: CompiledId, roots: &mut Vec<CompiledId>) {
        let layer = &self.layers[id.0];
        match &layer.kind {
            CompiledKind::Sdf(_) => roots.push(id),
            CompiledKind::Group { children } => {
                for &child in children.iter().rev() {
                    self.sdf_roots(child, roots);
                }
            }
            _ => {}
        }
    }
}

/// Compiles `document`. With a previous tree, edited values are carried over
/// and programs whose source did not change are reused; the previous tree is
/// consumed either way.
pub fn compile_document(
    gpu: &mut dyn GpuContext,
    document: &Layer,
    previous: Option<CompiledRoot>,
    options: &CompileOptions,
) -> Result<CompiledRoot> {
    let mut previous = Previous::take(previous, options, gpu);
    let compiler = match previous.compiler.take() {
        Some(compiler) => compiler,
        None => ProgramCompiler::new(gpu, options.glsl_version.clone())?,
    };

    let mut builder = Builder {
        layers: Vec::new(),
        sources: Vec::new(),
    };
    let root = builder.push(document, None);

    compile_sdf_layers(gpu, &compiler, &mut builder, &previous);
    let scene = build_scene(&builder, root);
    compile_code_layers(gpu, &compiler, &mut builder, &mut previous, scene.as_ref());
    derive_audio_usage(&mut builder.layers, root);

    let released = previous.cache.release(gpu);
    let Builder { layers, .. } = builder;
    tracing::debug!(
        layers = layers.len(),
        reused_programs_released = released,
        scene_nodes = scene.as_ref().map_or(0, |scene| scene.graph.nodes.len()),
        "compiled layer document"
    );
    Ok(CompiledRoot {
        layers,
        root,
        scene,
        compiler: Some(compiler),
        destroyed: false,
    })
}

fn compile_sdf_layers(
    gpu: &mut dyn GpuContext,
    compiler: &ProgramCompiler,
    builder: &mut Builder<'_>,
    previous: &Previous,
) {
    for index in 0..builder.layers.len() {
        let source = builder.sources[index];
        let Layer::Sdf(sdf_layer) = source else {
            continue;
        };
        let code = sdf_layer.code.as_str();
        let mut errors = Vec::new();
        let signature = match sdf::parse_signature(code) {
            Ok(signature) => {
                let wrapped = compile::wrap_standalone_sdf(compiler.glsl_version(), code, Some(signature.arity));
                match compiler.build(gpu, &wrapped.text) {
                    Ok(program) => gpu.delete_program(program),
                    Err(log) => errors.extend(failure_diagnostics(&wrapped, &log)),
                }
                Some(signature)
            }
            Err(error) => {
                errors.push(error);
                None
            }
        };
        let uniforms = extract_uniforms(code, previous.values_for(source), &mut |_| None);

        let layer = &mut builder.layers[index];
        if let CompiledKind::Sdf(sdf) = &mut layer.kind {
            sdf.signature = signature;
        }
        if !errors.is_empty() {
            tracing::debug!(layer = layer.id.as_str(), errors = errors.len(), "SDF layer failed to compile");
        }
        layer.uses_audio_input = own_audio_usage(code, &uniforms);
        layer.errors = errors;
        layer.uniforms = uniforms;
    }
}

fn build_scene(builder: &Builder<'_>, root: CompiledId) -> Option<SdfScene> {
    let sdf_layers: Vec<(CompiledId, &CompiledLayer, &CompiledSdf)> = builder
        .layers
        .iter()
        .enumerate()
        .filter_map(|(index, layer)| match &layer.kind {
            CompiledKind::Sdf(sdf) => Some((CompiledId(index), layer, sdf)),
            _ => None,
        })
        .collect();
    let wanted = !sdf_layers.is_empty()
        || builder
            .sources
            .iter()
            .any(|layer| matches!(layer, Layer::Shader(shader) if scan::references_prefix(&shader.code, "gSdf")));
    if !wanted {
        return None;
    }

    let slot: HashMap<CompiledId, usize> = sdf_layers
        .iter()
        .enumerate()
        .map(|(slot, (id, _, _))| (*id, slot))
        .collect();
    let scene_layers: Vec<SceneLayer<'_>> = sdf_layers
        .iter()
        .map(|&(id, layer, sdf)| SceneLayer {
            id: &layer.id,
            code: builder.sources[id.0].code().unwrap_or_default(),
            signature: sdf.signature.as_ref().filter(|_| !layer.has_errors()),
            uniforms: &layer.uniforms,
            children: sdf.children.iter().filter_map(|child| slot.get(child).copied()).collect(),
        })
        .collect();

    let mut roots = Vec::new();
    builder.sdf_roots(root, &mut roots);
    let root_slots: Vec<usize> = roots.iter().filter_map(|id| slot.get(id).copied()).collect();

    let mut scene = sdf::build_scene(&scene_layers, &root_slots);
    for binding in &mut scene.bindings {
        let (id, _, _) = sdf_layers[binding.layer];
        binding.layer = id.0;
    }
    Some(scene)
}

fn compile_code_layers(
    gpu: &mut dyn GpuContext,
    compiler: &ProgramCompiler,
    builder: &mut Builder<'_>,
    previous: &mut Previous,
    scene: Option<&SdfScene>,
) {
    for index in 0..builder.layers.len() {
        let source = builder.sources[index];
        match source {
            Layer::Shader(shader_layer) => {
                let code = shader_layer.code.as_str();
                let uses_scene = scene.is_some() && scan::references_prefix(code, "gSdf");
                let wrapped = compile::wrap_layer(
                    compiler.glsl_version(),
                    code,
                    scene.filter(|_| uses_scene).map(|scene| scene.code.as_str()),
                );

                let mut errors = Vec::new();
                let program = match previous.cache.take(&wrapped.text) {
                    Some(program) => Some(program),
                    None => match compiler.build(gpu, &wrapped.text) {
                        Ok(program) => Some(program),
                        Err(log) => {
                            errors = failure_diagnostics(&wrapped, &log);
                            None
                        }
                    },
                };

                let uniforms = extract_uniforms(code, previous.values_for(source), &mut |name| {
                    program.and_then(|program| gpu.uniform_location(program, name))
                });
                let (builtins, scene_uniforms) = match (program, scene.filter(|_| uses_scene)) {
                    (Some(program), scene) => (
                        BuiltinLocations::resolve(gpu, program),
                        scene
                            .map(|scene| {
                                scene
                                    .bindings
                                    .iter()
                                    .map(|binding| SceneUniform {
                                        layer: CompiledId(binding.layer),
                                        uniform: binding.uniform,
                                        location: gpu.uniform_location(program, &binding.name),
                                    })
                                    .collect()
                            })
                            .unwrap_or_default(),
                    ),
                    (None, _) => (BuiltinLocations::default(), Vec::new()),
                };

                let layer = &mut builder.layers[index];
                if program.is_none() {
                    tracing::warn!(layer = layer.id.as_str(), errors = errors.len(), "shader layer failed to compile");
                }
                layer.uses_audio_input = own_audio_usage(code, &uniforms);
                layer.errors = errors;
                layer.uniforms = uniforms;
                layer.kind = CompiledKind::Shader(CompiledShader {
                    program,
                    source: wrapped.text,
                    builtins,
                    scene_uniforms,
                    uses_scene,
                });
            }
            Layer::JavaScript(script) => {
                let uniforms = extract_uniforms(&script.code, previous.values_for(source), &mut |_| None);
                let layer = &mut builder.layers[index];
                layer.uses_audio_input = own_audio_usage(&script.code, &uniforms);
                layer.uniforms = uniforms;
            }
            Layer::Group(_) | Layer::Sdf(_) => {}
        }
    }
}

fn failure_diagnostics(wrapped: &compile::WrappedSource, log: &str) -> Vec<CompileError> {
    let mut errors = wrapped.diagnostics(log);
    if !errors.iter().any(CompileError::is_error) {
        errors.push(CompileError::error(0, "shader failed to compile"));
    }
    errors
}

fn own_audio_usage(code: &str, uniforms: &[Uniform]) -> bool {
    scan::references_prefix(code, "gAudio")
        || uniforms
            .iter()
            .any(|uniform| uniform.shader_value.uses_audio_input())
}

/// Groups use audio when a child does; shaders also when they include a
/// scene containing an SDF layer that does.
fn derive_audio_usage(layers: &mut [CompiledLayer], root: CompiledId) {
    fn visit(layers: &mut [CompiledLayer], id: CompiledId, scene_audio: bool) -> bool {
        let children = layers[id.0].children().to_vec();
        let mut uses = false;
        for child in children {
            uses |= visit(layers, child, scene_audio);
        }
        let layer = &mut layers[id.0];
        if let CompiledKind::Shader(shader) = &layer.kind {
            uses |= shader.uses_scene && scene_audio;
        }
        layer.uses_audio_input |= uses;
        layer.uses_audio_input
    }

    let scene_audio = layers
        .iter()
        .any(|layer| matches!(layer.kind, CompiledKind::Sdf(_)) && layer.uses_audio_input);
    visit(layers, root, scene_audio);
}
