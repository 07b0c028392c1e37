//! Renderer settings loaded from `settings.toml`.
//!
//! ```toml
//! version = 1
//!
//! [render]
//! width = 1920
//! height = 1080
//! anti_alias = "4"
//! frames_ahead = 2
//!
//! [audio]
//! volume_smoothing = "100ms"
//! peak_decay = "2s"
//! ```
//!
//! Every field is optional; unset fields keep the renderer defaults.
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid settings: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    pub version: u32,
    #[serde(default)]
    pub render: RenderSettings,
    #[serde(default)]
    pub audio: AudioSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: 1,
            render: RenderSettings::default(),
            audio: AudioSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RenderSettings {
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_antialias_opt")]
    pub anti_alias: Option<AntialiasSetting>,
    /// Overrides the limit reported by the GPU, mostly for testing.
    #[serde(default)]
    pub max_texture_dimension: Option<u32>,
    #[serde(default)]
    pub frames_ahead: Option<usize>,
    #[serde(default)]
    pub flip_output: bool,
    #[serde(default)]
    pub glsl_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AudioSettings {
    #[serde(default, deserialize_with = "deserialize_duration_opt")]
    pub volume_smoothing: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_duration_opt")]
    pub peak_decay: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_duration_opt")]
    pub trough_recovery: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AntialiasSetting {
    Auto,
    Off,
    Samples2,
    Samples4,
    Samples8,
    Samples16,
}

impl AntialiasSetting {
    pub fn from_samples(samples: u32) -> Option<Self> {
        match samples {
            0 | 1 => Some(Self::Off),
            2 => Some(Self::Samples2),
            4 => Some(Self::Samples4),
            8 => Some(Self::Samples8),
            16 => Some(Self::Samples16),
            _ => None,
        }
    }

    /// Supersampling factor requested from the renderer. `Auto` asks for 2×.
    pub fn samples(self) -> u32 {
        match self {
            Self::Off => 1,
            Self::Auto | Self::Samples2 => 2,
            Self::Samples4 => 4,
            Self::Samples8 => 8,
            Self::Samples16 => 16,
        }
    }
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_secs(v)))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs(v as u64)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs_f64(v)))
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(Visitor)
}

fn deserialize_antialias_opt<'de, D>(deserializer: D) -> Result<Option<AntialiasSetting>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Helper {
        Str(String),
        Num(i64),
    }

    let helper: Option<Helper> = Option::deserialize(deserializer)?;
    let result = match helper {
        None => None,
        Some(Helper::Str(raw)) => Some(parse_antialias(&raw).map_err(de::Error::custom)?),
        Some(Helper::Num(value)) => {
            if value < 0 {
                return Err(de::Error::custom("anti_alias value must be non-negative"));
            }
            Some(parse_antialias(&value.to_string()).map_err(de::Error::custom)?)
        }
    };
    Ok(result)
}

fn parse_antialias(raw: &str) -> Result<AntialiasSetting, String> {
    let normalized = raw.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "auto" | "default" => Ok(AntialiasSetting::Auto),
        "off" | "none" | "disable" | "disabled" | "0" | "1" => Ok(AntialiasSetting::Off),
        "2" => Ok(AntialiasSetting::Samples2),
        "4" => Ok(AntialiasSetting::Samples4),
        "8" => Ok(AntialiasSetting::Samples8),
        "16" => Ok(AntialiasSetting::Samples16),
        other => Err(format!("invalid anti_alias setting '{other}'")),
    }
}

impl Settings {
    pub fn from_toml_str(input: &str) -> Result<Self, SettingsError> {
        let raw: Settings = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Loads `path` if it exists, otherwise returns the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.version != 1 {
            return Err(SettingsError::Invalid(format!(
                "unsupported settings version {}; expected 1",
                self.version
            )));
        }

        let render = &self.render;
        for (name, value) in [
            ("width", render.width),
            ("height", render.height),
            ("max_texture_dimension", render.max_texture_dimension),
        ] {
            if value == Some(0) {
                return Err(SettingsError::Invalid(format!("render.{name} must be greater than zero")));
            }
        }

        if render.frames_ahead == Some(0) {
            return Err(SettingsError::Invalid(
                "render.frames_ahead must be at least 1".into(),
            ));
        }

        if let Some(version) = &render.glsl_version {
            if version.trim().is_empty() || version.contains('\n') {
                return Err(SettingsError::Invalid(
                    "render.glsl_version must be a single non-empty line".into(),
                ));
            }
        }

        if let (Some(max), Some(width), Some(height)) = (render.max_texture_dimension, render.width, render.height) {
            if width > max || height > max {
                return Err(SettingsError::Invalid(format!(
                    "render size {width}x{height} exceeds max_texture_dimension {max}"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1

[render]
width = 1280
height = 720
anti_alias = "4"
frames_ahead = 3
flip_output = true
glsl_version = "330 core"

[audio]
volume_smoothing = "250ms"
peak_decay = 3
trough_recovery = 1.5
"#;

    #[test]
    fn parses_sample_settings() {
        let settings = Settings::from_toml_str(SAMPLE).expect("parse settings");
        assert_eq!(settings.render.width, Some(1280));
        assert_eq!(settings.render.anti_alias, Some(AntialiasSetting::Samples4));
        assert_eq!(settings.render.frames_ahead, Some(3));
        assert!(settings.render.flip_output);
        assert_eq!(settings.render.glsl_version.as_deref(), Some("330 core"));
        assert_eq!(settings.audio.volume_smoothing, Some(Duration::from_millis(250)));
        assert_eq!(settings.audio.peak_decay, Some(Duration::from_secs(3)));
        assert_eq!(settings.audio.trough_recovery, Some(Duration::from_secs_f64(1.5)));
    }

    #[test]
    fn sections_are_optional() {
        let settings = Settings::from_toml_str("version = 1").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn numeric_anti_alias_is_accepted() {
        let settings = Settings::from_toml_str("version = 1\n[render]\nanti_alias = 8\n").unwrap();
        assert_eq!(settings.render.anti_alias.map(AntialiasSetting::samples), Some(8));
        assert!(Settings::from_toml_str("version = 1\n[render]\nanti_alias = 3\n").is_err());
    }

    #[test]
    fn rejects_wrong_version() {
        let err = Settings::from_toml_str("version = 2").unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(_)));
    }

    #[test]
    fn rejects_zero_frames_ahead() {
        let err = Settings::from_toml_str("version = 1\n[render]\nframes_ahead = 0\n").unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(_)));
    }

    #[test]
    fn rejects_size_beyond_texture_limit() {
        let config = "version = 1\n[render]\nwidth = 4096\nheight = 100\nmax_texture_dimension = 2048\n";
        assert!(matches!(
            Settings::from_toml_str(config).unwrap_err(),
            SettingsError::Invalid(_)
        ));
    }

    #[test]
    fn rejects_negative_durations() {
        let err = Settings::from_toml_str("version = 1\n[audio]\npeak_decay = -1\n").unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = Settings::load_or_default(Path::new("/nonexistent/shaderstack/settings.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }
}
