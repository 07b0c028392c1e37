//! Audio envelope followers and the spectrum texture.
//!
//! The host delivers one [`AudioFrame`] per rendered frame; everything after
//! the FFT happens here.
use std::time::Duration;

use bytemuck::{Pod, Zeroable};

use crate::types::AudioSettings;

pub const SPECTRUM_SIZE: usize = 512;

/// One analysed audio block. `frequency` bins are normalised to `[0, 1]`,
/// `time_domain` samples to `[-1, 1]`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct AudioFrame {
    pub frequency: [f32; SPECTRUM_SIZE],
    pub time_domain: [f32; SPECTRUM_SIZE],
}

impl Default for AudioFrame {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl AudioFrame {
    pub fn rms(&self) -> f32 {
        let sum: f32 = self.time_domain.iter().map(|sample| sample * sample).sum();
        (sum / SPECTRUM_SIZE as f32).sqrt()
    }

    /// RGBA8 texels for a `SPECTRUM_SIZE`×2 texture: row 0 holds the
    /// frequency bins, row 1 the waveform remapped to `[0, 1]`.
    pub fn spectrum_texels(&self) -> Vec<[u8; 4]> {
        let texel = |value: f32| {
            let byte = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
            [byte, byte, byte, 255]
        };
        self.frequency
            .iter()
            .map(|&bin| texel(bin))
            .chain(self.time_domain.iter().map(|&sample| texel(sample * 0.5 + 0.5)))
            .collect()
    }
}

/// Scalars exposed as `gAudioVolume`, `gAudioPeak`, `gAudioTrough` and
/// `gAudioReactive`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioLevels {
    pub volume: f32,
    pub peak: f32,
    pub trough: f32,
    pub reactive: f32,
}

fn approach(current: f32, target: f32, dt: f64, time_constant: Duration) -> f32 {
    let tau = time_constant.as_secs_f64();
    let factor = if tau <= 0.0 {
        1.0
    } else {
        1.0 - (-dt.max(0.0) / tau).exp()
    };
    current + (target - current) * factor as f32
}

#[derive(Debug, Clone)]
pub struct AudioEnvelope {
    settings: AudioSettings,
    levels: AudioLevels,
}

impl AudioEnvelope {
    pub fn new(settings: AudioSettings) -> Self {
        Self {
            settings,
            levels: AudioLevels::default(),
        }
    }

    pub fn levels(&self) -> AudioLevels {
        self.levels
    }

    /// Advances the followers by `dt` seconds using `frame`.
    pub fn update(&mut self, frame: &AudioFrame, dt: f64) -> AudioLevels {
        let levels = &mut self.levels;
        levels.volume = approach(levels.volume, frame.rms(), dt, self.settings.volume_smoothing);
        levels.peak = if levels.volume > levels.peak {
            levels.volume
        } else {
            approach(levels.peak, levels.volume, dt, self.settings.peak_decay)
        };
        levels.trough = if levels.volume < levels.trough {
            levels.volume
        } else {
            approach(levels.trough, levels.volume, dt, self.settings.trough_recovery)
        };
        levels.reactive = if levels.peak > levels.trough {
            ((levels.volume - levels.trough) / (levels.peak - levels.trough)).clamp(0.0, 1.0)
        } else {
            0.0
        };
        *levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(amplitude: f32) -> AudioFrame {
        let mut frame = AudioFrame::default();
        for (index, sample) in frame.time_domain.iter_mut().enumerate() {
            *sample = if index % 2 == 0 { amplitude } else { -amplitude };
        }
        frame
    }

    #[test]
    fn rms_of_square_wave_is_its_amplitude() {
        assert!((tone(0.5).rms() - 0.5).abs() < 1e-6);
        assert_eq!(AudioFrame::default().rms(), 0.0);
    }

    #[test]
    fn volume_follows_smoothly_and_peak_holds() {
        let mut envelope = AudioEnvelope::new(AudioSettings::default());
        let first = envelope.update(&tone(1.0), 0.1);
        assert!(first.volume > 0.5 && first.volume < 1.0);
        assert_eq!(first.peak, first.volume);

        let mut last = first;
        for _ in 0..5 {
            last = envelope.update(&tone(0.0), 0.1);
        }
        assert!(last.volume < 0.01);
        assert!(last.peak > last.volume, "peak decays slower than the volume");
        assert_eq!(last.trough, last.volume);
        assert_eq!(last.reactive, 0.0);
    }

    #[test]
    fn zero_time_constants_jump_immediately() {
        let settings = AudioSettings {
            volume_smoothing: Duration::ZERO,
            peak_decay: Duration::ZERO,
            trough_recovery: Duration::ZERO,
        };
        let mut envelope = AudioEnvelope::new(settings);
        let levels = envelope.update(&tone(0.25), 0.016);
        assert_eq!(levels.volume, 0.25);
        assert_eq!(levels.peak, 0.25);
        assert_eq!(levels.trough, 0.25);
    }

    #[test]
    fn spectrum_rows_are_frequency_then_waveform() {
        let mut frame = AudioFrame::default();
        frame.frequency[3] = 1.0;
        frame.time_domain[0] = -1.0;
        let texels = frame.spectrum_texels();
        assert_eq!(texels.len(), SPECTRUM_SIZE * 2);
        assert_eq!(texels[3], [255, 255, 255, 255]);
        assert_eq!(texels[SPECTRUM_SIZE], [0, 0, 0, 255]);
        assert_eq!(texels[SPECTRUM_SIZE + 1][0], 128);
        assert_eq!(bytemuck::cast_slice::<[u8; 4], u8>(&texels).len(), SPECTRUM_SIZE * 8);
    }
}
