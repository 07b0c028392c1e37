use std::time::Duration;

use crate::compile::DEFAULT_GLSL_VERSION;

/// Async layers may run this many frames ahead of the compositor.
pub const DEFAULT_FRAMES_AHEAD: usize = 2;

/// Time constants for the audio envelope followers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioSettings {
    /// How quickly the volume follows the raw RMS level.
    pub volume_smoothing: Duration,
    /// How quickly the peak falls back towards the volume.
    pub peak_decay: Duration,
    /// How quickly the trough climbs back towards the volume.
    pub trough_recovery: Duration,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            volume_smoothing: Duration::from_millis(100),
            peak_decay: Duration::from_secs(2),
            trough_recovery: Duration::from_secs(2),
        }
    }
}

/// Immutable configuration passed to the renderer at start-up.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererOptions {
    /// Output size in physical pixels.
    pub width: u32,
    pub height: u32,
    /// Requested supersampling factor. Rounded down to a power of two and
    /// limited by the maximum texture size.
    pub anti_alias: u32,
    pub frames_ahead: usize,
    /// Flip the final copy vertically, for hosts with a top-left origin.
    pub flip_output: bool,
    /// Text after `#version` in every generated program.
    pub glsl_version: String,
    pub audio: AudioSettings,
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            anti_alias: 1,
            frames_ahead: DEFAULT_FRAMES_AHEAD,
            flip_output: false,
            glsl_version: DEFAULT_GLSL_VERSION.to_string(),
            audio: AudioSettings::default(),
        }
    }
}

/// Pointer position in output pixels, origin bottom-left.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pointer {
    pub x: f32,
    pub y: f32,
    pub down: bool,
}

/// What one call to `render` did.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    pub frame: u64,
    pub time: f64,
    pub delta_time: f64,
    /// Layers drawn with their own program.
    pub layers_drawn: usize,
    /// Layers drawn solid red because their program failed.
    pub failed_layers: usize,
    /// Results from async layers uploaded this frame.
    pub external_uploads: usize,
    pub external_requests: usize,
}
