//! Layers rendered outside the compositor, such as JavaScript layers.
//!
//! Requests are fire-and-forget; results come back on a channel tagged with
//! the request id and are applied only if newer than what the layer shows.
use std::collections::{HashMap, HashSet};

use crossbeam_channel::{Receiver, Sender};
use image::imageops::flip_vertical_in_place;
use image::RgbaImage;
use serde::Serialize;
use serde_json::{Map, Value as Json};

use crate::error::Result;
use crate::gpu::{GpuContext, TextureHandle, TextureOptions};

/// Frame globals handed to external layers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalGlobals {
    pub time: f64,
    pub delta_time: f64,
    pub frame: u64,
    pub resolution: [u32; 2],
    /// `x, y, down`.
    pub pointer: [f32; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalRenderRequest {
    pub layer_id: String,
    pub request_id: u64,
    pub code: String,
    pub globals: ExternalGlobals,
    /// Current uniform values by name, curves already applied.
    pub uniforms: Map<String, Json>,
    pub width: u32,
    pub height: u32,
}

/// A finished frame, top row first.
#[derive(Debug, Clone)]
pub struct ExternalRenderResult {
    pub layer_id: String,
    pub request_id: u64,
    pub image: RgbaImage,
}

/// Runs external layers. Results are sent on the channel registered with
/// the renderer alongside the executor.
pub trait ExternalLayerExecutor {
    fn submit(&mut self, request: ExternalRenderRequest);
}

pub fn result_channel() -> (Sender<ExternalRenderResult>, Receiver<ExternalRenderResult>) {
    crossbeam_channel::unbounded()
}

#[derive(Debug, Default)]
struct LayerState {
    in_flight: usize,
    last_applied: u64,
    texture: Option<TextureHandle>,
}

pub(crate) struct ExternalLayers {
    executor: Option<(Box<dyn ExternalLayerExecutor>, Receiver<ExternalRenderResult>)>,
    states: HashMap<String, LayerState>,
    next_request: u64,
    frames_ahead: usize,
}

impl ExternalLayers {
    pub fn new(frames_ahead: usize) -> Self {
        Self {
            executor: None,
            states: HashMap::new(),
            next_request: 0,
            frames_ahead: frames_ahead.max(1),
        }
    }

    pub fn set_executor(&mut self, executor: Box<dyn ExternalLayerExecutor>, results: Receiver<ExternalRenderResult>) {
        self.executor = Some((executor, results));
    }

    /// Uploads every newer result waiting on the channel. Returns the number
    /// of uploads.
    pub fn drain(&mut self, gpu: &mut dyn GpuContext) -> Result<usize> {
        let Some((_, results)) = &self.executor else {
            return Ok(0);
        };
        let mut uploads = 0;
        for mut result in results.try_iter() {
            let Some(state) = self.states.get_mut(&result.layer_id) else {
                tracing::debug!(
                    layer = result.layer_id.as_str(),
                    request_id = result.request_id,
                    "discarding external frame for a removed layer"
                );
                continue;
            };
            state.in_flight = state.in_flight.saturating_sub(1);
            if result.request_id <= state.last_applied {
                tracing::debug!(
                    layer = result.layer_id.as_str(),
                    request_id = result.request_id,
                    last_applied = state.last_applied,
                    "discarding stale external frame"
                );
                continue;
            }
            let texture = match state.texture {
                Some(texture) => texture,
                None => {
                    let texture = gpu.create_texture(TextureOptions::default())?;
                    state.texture = Some(texture);
                    texture
                }
            };
            flip_vertical_in_place(&mut result.image);
            gpu.upload_texture(texture, result.image.width(), result.image.height(), result.image.as_raw());
            state.last_applied = result.request_id;
            uploads += 1;
        }
        Ok(uploads)
    }

    /// Whether another request may be issued for `layer_id` this frame.
    pub fn wants_request(&self, layer_id: &str) -> bool {
        self.executor.is_some()
            && self
                .states
                .get(layer_id)
                .map_or(true, |state| state.in_flight < self.frames_ahead)
    }

    /// Issues a request for `layer_id` if fewer than `frames_ahead` are in
    /// flight. `build` receives the new request id.
    pub fn request(&mut self, layer_id: &str, build: impl FnOnce(u64) -> ExternalRenderRequest) -> bool {
        if !self.wants_request(layer_id) {
            return false;
        }
        let Some((executor, _)) = self.executor.as_mut() else {
            return false;
        };
        self.next_request += 1;
        executor.submit(build(self.next_request));
        self.states.entry(layer_id.to_string()).or_default().in_flight += 1;
        true
    }

    pub fn texture(&self, layer_id: &str) -> Option<TextureHandle> {
        self.states.get(layer_id).and_then(|state| state.texture)
    }

    pub fn in_flight(&self, layer_id: &str) -> usize {
        self.states.get(layer_id).map_or(0, |state| state.in_flight)
    }

    pub fn retain_layers(&mut self, gpu: &mut dyn GpuContext, live: &HashSet<&str>) {
        self.states.retain(|id, state| {
            let keep = live.contains(id.as_str());
            if !keep {
                if let Some(texture) = state.texture {
                    gpu.delete_texture(texture);
                }
            }
            keep
        });
    }

    pub fn clear(&mut self, gpu: &mut dyn GpuContext) {
        for (_, state) in self.states.drain() {
            if let Some(texture) = state.texture {
                gpu.delete_texture(texture);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::gpu::HeadlessGpu;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<ExternalRenderRequest>>>);

    impl ExternalLayerExecutor for Recorder {
        fn submit(&mut self, request: ExternalRenderRequest) {
            self.0.lock().unwrap().push(request);
        }
    }

    fn request(layer: &str, id: u64) -> ExternalRenderRequest {
        ExternalRenderRequest {
            layer_id: layer.into(),
            request_id: id,
            code: String::new(),
            globals: ExternalGlobals::default(),
            uniforms: Map::new(),
            width: 2,
            height: 2,
        }
    }

    fn result(layer: &str, id: u64) -> ExternalRenderResult {
        ExternalRenderResult {
            layer_id: layer.into(),
            request_id: id,
            image: RgbaImage::new(2, 2),
        }
    }

    #[test]
    fn requests_are_limited_by_frames_ahead() {
        let recorder = Recorder::default();
        let (_tx, rx) = result_channel();
        let mut layers = ExternalLayers::new(2);
        layers.set_executor(Box::new(recorder.clone()), rx);

        assert!(layers.request("js", |id| request("js", id)));
        assert!(layers.request("js", |id| request("js", id)));
        assert!(!layers.request("js", |id| request("js", id)));
        assert!(layers.request("other", |id| request("other", id)));

        let ids: Vec<u64> = recorder.0.lock().unwrap().iter().map(|r| r.request_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn stale_results_free_a_slot_but_are_not_shown() {
        let mut gpu = HeadlessGpu::new();
        let (tx, rx) = result_channel();
        let mut layers = ExternalLayers::new(2);
        layers.set_executor(Box::new(Recorder::default()), rx);
        layers.request("js", |id| request("js", id));
        layers.request("js", |id| request("js", id));

        tx.send(result("js", 2)).unwrap();
        tx.send(result("js", 1)).unwrap();
        assert_eq!(layers.drain(&mut gpu).unwrap(), 1);
        assert_eq!(layers.in_flight("js"), 0);
        assert!(layers.texture("js").is_some());
        assert_eq!(gpu.stats().texture_uploads, 1);

        layers.retain_layers(&mut gpu, &HashSet::new());
        assert!(layers.texture("js").is_none());
        assert_eq!(gpu.live_textures(), 0);
    }

    #[test]
    fn late_results_for_removed_layers_are_dropped() {
        let mut gpu = HeadlessGpu::new();
        let (tx, rx) = result_channel();
        let mut layers = ExternalLayers::new(2);
        layers.set_executor(Box::new(Recorder::default()), rx);
        layers.request("js", |id| request("js", id));
        layers.retain_layers(&mut gpu, &HashSet::new());

        tx.send(result("js", 1)).unwrap();
        tx.send(result("never-requested", 7)).unwrap();
        assert_eq!(layers.drain(&mut gpu).unwrap(), 0);
        assert!(layers.texture("js").is_none());
        assert_eq!(layers.in_flight("js"), 0);
        assert_eq!(gpu.live_textures(), 0);
        assert_eq!(gpu.stats().texture_uploads, 0);
    }

    #[test]
    fn nothing_is_requested_without_an_executor() {
        let mut layers = ExternalLayers::new(2);
        assert!(!layers.request("js", |id| request("js", id)));
    }
}
