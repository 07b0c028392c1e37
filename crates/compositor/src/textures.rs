//! Textures referenced by sampler and gradient uniforms.
//!
//! Sampler textures are created with a 1×1 transparent placeholder and handed
//! to a [`TextureLoader`], which is polled every frame until it reports the
//! texture as complete. Gradients are rasterised here.
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use image::imageops::flip_vertical_in_place;

use crate::error::Result;
use crate::gpu::{GpuContext, TextureHandle, TextureOptions};
use crate::layer::{Gradient, TextureDescriptor, TextureFilter, TextureWrap, Value};

pub const GRADIENT_WIDTH: usize = 256;

/// Fills textures for sampler uniforms, possibly over several frames.
pub trait TextureLoader {
    /// Starts loading `descriptor` into `texture`.
    fn load(&mut self, descriptor: &TextureDescriptor, texture: TextureHandle);
    /// Uploads whatever is ready. Returns `true` once `texture` is final.
    fn update_texture(&mut self, gpu: &mut dyn GpuContext, texture: TextureHandle) -> bool;
}

/// Leaves every sampler on its placeholder.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTextureLoader;

impl TextureLoader for NoTextureLoader {
    fn load(&mut self, _descriptor: &TextureDescriptor, _texture: TextureHandle) {}

    fn update_texture(&mut self, _gpu: &mut dyn GpuContext, _texture: TextureHandle) -> bool {
        true
    }
}

/// Treats texture URLs as file paths, relative to `root` when given.
#[derive(Debug, Default)]
pub struct ImageFileLoader {
    root: Option<PathBuf>,
    pending: HashMap<TextureHandle, PathBuf>,
}

impl ImageFileLoader {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            root,
            pending: HashMap::new(),
        }
    }
}

impl TextureLoader for ImageFileLoader {
    fn load(&mut self, descriptor: &TextureDescriptor, texture: TextureHandle) {
        let url = descriptor.url.strip_prefix("file://").unwrap_or(&descriptor.url);
        let path = PathBuf::from(url);
        let resolved = match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path,
        };
        self.pending.insert(texture, resolved);
    }

    fn update_texture(&mut self, gpu: &mut dyn GpuContext, texture: TextureHandle) -> bool {
        let Some(path) = self.pending.remove(&texture) else {
            return true;
        };
        match image::open(&path) {
            Ok(decoded) => {
                let mut rgba = decoded.to_rgba8();
                flip_vertical_in_place(&mut rgba);
                gpu.upload_texture(texture, rgba.width(), rgba.height(), rgba.as_raw());
                tracing::debug!(path = %path.display(), "loaded texture");
            }
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "failed to load texture; using placeholder"
                );
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Texture(TextureDescriptor),
    Gradient(Vec<u32>),
}

impl CacheKey {
    /// Key of the texture a uniform value samples, if any.
    pub fn of_value(value: &Value) -> Option<Self> {
        match value {
            Value::Sampler(descriptor) => Some(CacheKey::Texture(descriptor.clone())),
            Value::Gradient(gradient) => Some(CacheKey::Gradient(gradient.cache_key())),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Entry {
    texture: TextureHandle,
    ready: bool,
}

#[derive(Debug, Default)]
pub struct TextureCache {
    entries: HashMap<CacheKey, Entry>,
}

impl TextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.entries.values().filter(|entry| !entry.ready).count()
    }

    pub fn sampler(
        &mut self,
        gpu: &mut dyn GpuContext,
        loader: &mut dyn TextureLoader,
        descriptor: &TextureDescriptor,
    ) -> Result<TextureHandle> {
        let key = CacheKey::Texture(descriptor.clone());
        if let Some(entry) = self.entries.get(&key) {
            return Ok(entry.texture);
        }
        let texture = gpu.create_texture(TextureOptions {
            filter: descriptor.filter,
            wrap: descriptor.wrap,
        })?;
        gpu.upload_texture(texture, 1, 1, &[0, 0, 0, 0]);
        loader.load(descriptor, texture);
        tracing::debug!(url = descriptor.url.as_str(), "requested texture");
        self.entries.insert(key, Entry { texture, ready: false });
        Ok(texture)
    }

    pub fn gradient(&mut self, gpu: &mut dyn GpuContext, gradient: &Gradient) -> Result<TextureHandle> {
        let key = CacheKey::Gradient(gradient.cache_key());
        if let Some(entry) = self.entries.get(&key) {
            return Ok(entry.texture);
        }
        let texture = gpu.create_texture(TextureOptions {
            filter: TextureFilter::Linear,
            wrap: TextureWrap::Clamp,
        })?;
        let texels = gradient.rasterize(GRADIENT_WIDTH);
        gpu.upload_texture(texture, GRADIENT_WIDTH as u32, 1, bytemuck::cast_slice(&texels));
        self.entries.insert(key, Entry { texture, ready: true });
        Ok(texture)
    }

    /// Lets the loader finish pending textures.
    pub fn poll(&mut self, gpu: &mut dyn GpuContext, loader: &mut dyn TextureLoader) {
        for entry in self.entries.values_mut().filter(|entry| !entry.ready) {
            entry.ready = loader.update_texture(gpu, entry.texture);
        }
    }

    /// Deletes every texture whose key is not in `live`.
    pub fn retain(&mut self, gpu: &mut dyn GpuContext, live: &HashSet<CacheKey>) {
        self.entries.retain(|key, entry| {
            let keep = live.contains(key);
            if !keep {
                gpu.delete_texture(entry.texture);
            }
            keep
        });
    }

    pub fn clear(&mut self, gpu: &mut dyn GpuContext) {
        for (_, entry) in self.entries.drain() {
            gpu.delete_texture(entry.texture);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessGpu;

    #[derive(Default)]
    struct SlowLoader {
        loads: usize,
        polls: usize,
    }

    impl TextureLoader for SlowLoader {
        fn load(&mut self, _descriptor: &TextureDescriptor, _texture: TextureHandle) {
            self.loads += 1;
        }

        fn update_texture(&mut self, _gpu: &mut dyn GpuContext, _texture: TextureHandle) -> bool {
            self.polls += 1;
            self.polls >= 2
        }
    }

    #[test]
    fn samplers_are_loaded_once_and_polled_until_ready() {
        let mut gpu = HeadlessGpu::new();
        let mut loader = SlowLoader::default();
        let mut cache = TextureCache::new();
        let descriptor = TextureDescriptor::new("noise.png");

        let first = cache.sampler(&mut gpu, &mut loader, &descriptor).unwrap();
        let second = cache.sampler(&mut gpu, &mut loader, &descriptor).unwrap();
        assert_eq!(first, second);
        assert_eq!(loader.loads, 1);

        cache.poll(&mut gpu, &mut loader);
        assert_eq!(cache.pending(), 1);
        cache.poll(&mut gpu, &mut loader);
        assert_eq!(cache.pending(), 0);
        cache.poll(&mut gpu, &mut loader);
        assert_eq!(loader.polls, 2);
    }

    #[test]
    fn gradients_are_cached_by_value_and_pruned() {
        let mut gpu = HeadlessGpu::new();
        let mut cache = TextureCache::new();
        let a = cache.gradient(&mut gpu, &Gradient::default()).unwrap();
        let b = cache.gradient(&mut gpu, &Gradient::default()).unwrap();
        assert_eq!(a, b);
        let other = Gradient::parse_shorthand("#ff0000, #0000ff").unwrap();
        cache.gradient(&mut gpu, &other).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(gpu.live_textures(), 2);

        let live = HashSet::from([CacheKey::Gradient(other.cache_key())]);
        cache.retain(&mut gpu, &live);
        assert_eq!(cache.len(), 1);
        assert_eq!(gpu.live_textures(), 1);
    }

    #[test]
    fn missing_files_keep_the_placeholder() {
        let mut gpu = HeadlessGpu::new();
        let mut loader = ImageFileLoader::new(Some(PathBuf::from("/nonexistent")));
        let mut cache = TextureCache::new();
        cache
            .sampler(&mut gpu, &mut loader, &TextureDescriptor::new("missing.png"))
            .unwrap();
        cache.poll(&mut gpu, &mut loader);
        assert_eq!(cache.pending(), 0);
        assert_eq!(gpu.stats().texture_uploads, 1);
    }
}
