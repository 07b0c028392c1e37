use compositor::gpu::HeadlessGpu;
use compositor::{AudioSettings, RendererOptions};
use stackconfig::Settings;

/// Renderer options from settings, with defaults for unset fields.
pub fn renderer_options(settings: &Settings) -> RendererOptions {
    let defaults = RendererOptions::default();
    let render = &settings.render;
    let audio = &settings.audio;
    let audio_defaults = AudioSettings::default();
    RendererOptions {
        width: render.width.unwrap_or(defaults.width),
        height: render.height.unwrap_or(defaults.height),
        anti_alias: render
            .anti_alias
            .map(|setting| setting.samples())
            .unwrap_or(defaults.anti_alias),
        frames_ahead: render.frames_ahead.unwrap_or(defaults.frames_ahead),
        flip_output: render.flip_output,
        glsl_version: render.glsl_version.clone().unwrap_or(defaults.glsl_version),
        audio: AudioSettings {
            volume_smoothing: audio.volume_smoothing.unwrap_or(audio_defaults.volume_smoothing),
            peak_decay: audio.peak_decay.unwrap_or(audio_defaults.peak_decay),
            trough_recovery: audio.trough_recovery.unwrap_or(audio_defaults.trough_recovery),
        },
    }
}

pub fn headless_gpu(settings: &Settings) -> HeadlessGpu {
    match settings.render.max_texture_dimension {
        Some(limit) => HeadlessGpu::with_max_texture_dimension(limit),
        None => HeadlessGpu::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn unset_fields_keep_renderer_defaults() {
        let options = renderer_options(&Settings::default());
        assert_eq!(options, RendererOptions::default());
    }

    #[test]
    fn settings_override_options() {
        let settings = Settings::from_toml_str(
            "version = 1\n[render]\nwidth = 640\nanti_alias = \"auto\"\nglsl_version = \"330 core\"\n[audio]\npeak_decay = \"500ms\"\n",
        )
        .unwrap();
        let options = renderer_options(&settings);
        assert_eq!(options.width, 640);
        assert_eq!(options.height, RendererOptions::default().height);
        assert_eq!(options.anti_alias, 2);
        assert_eq!(options.glsl_version, "330 core");
        assert_eq!(options.audio.peak_decay, Duration::from_millis(500));
        assert_eq!(options.audio.volume_smoothing, AudioSettings::default().volume_smoothing);
    }

    #[test]
    fn texture_limit_reaches_the_gpu() {
        use compositor::gpu::GpuContext;
        let settings = Settings::from_toml_str("version = 1\n[render]\nmax_texture_dimension = 1024\n").unwrap();
        assert_eq!(headless_gpu(&settings).max_texture_dimension(), 1024);
    }
}
