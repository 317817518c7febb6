use std::{collections::HashSet, path::Path};

use serde::{Deserialize, Serialize};

use crate::{decoder::bin_index_for, Key, Result, SonicFrameError};

/// Selects which audio capabilities a backend carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendProfile {
    /// Sonified output and tone-decoded key input.
    #[default]
    Full,
    /// Sonified output only; key polling never reports events.
    OutputOnly,
    /// No audio I/O at all. Only the clock and sleep remain functional.
    Null,
}

impl BackendProfile {
    pub fn plays_audio(self) -> bool {
        matches!(self, Self::Full | Self::OutputOnly)
    }

    pub fn captures_input(self) -> bool {
        matches!(self, Self::Full)
    }
}

/// Top-level configuration structure for the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub profile: BackendProfile,
    pub frame: FrameConfig,
    pub output: OutputConfig,
    pub input: InputConfig,
}

impl AppConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn with_profile(mut self, profile: BackendProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Checks every field that would otherwise fail deep inside the pipeline.
    pub fn validate(&self) -> Result<()> {
        self.frame.validate()?;
        self.output.validate()?;
        self.input.validate()
    }
}

/// Dimensions of the host frame and the partial-frequency layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    pub width: usize,
    pub height: usize,
    /// Frequency step scale: row `y` sounds at `(height + 1 - y) * top / height`.
    pub top_frequency_hz: f64,
    /// Divisor applied per row; the full divisor is `normalization_per_row * height`.
    pub normalization_per_row: f32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 200,
            top_frequency_hz: 20_000.0,
            normalization_per_row: 600.0,
        }
    }
}

impl FrameConfig {
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(SonicFrameError::config(format!(
                "frame dimensions must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if !self.top_frequency_hz.is_finite() || self.top_frequency_hz <= 0.0 {
            return Err(SonicFrameError::config(
                "top_frequency_hz must be a positive number",
            ));
        }
        if !self.normalization_per_row.is_finite() || self.normalization_per_row <= 0.0 {
            return Err(SonicFrameError::config(
                "normalization_per_row must be a positive number",
            ));
        }
        Ok(())
    }
}

/// Configuration of the sonified output stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Samples per second; one rendered frame is exactly this many samples.
    pub sample_rate: u32,
    /// Minimum interval between the starts of two played frames. Same width
    /// as the tick counter so it can be handed to `sleep_ms` as is.
    pub frame_time_ms: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            frame_time_ms: 1001,
        }
    }
}

impl OutputConfig {
    fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(SonicFrameError::config("output sample_rate must be non-zero"));
        }
        Ok(())
    }
}

/// Configuration of the capture stream and the key table it is decoded with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub sample_rate: u32,
    /// Samples per capture; must be a power of two.
    pub capture_len: usize,
    /// Coefficient magnitude above which a key counts as pressed.
    pub threshold: f32,
    pub keys: Vec<KeyBinding>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            capture_len: 128,
            threshold: 1.0,
            keys: KeyBinding::default_table(),
        }
    }
}

impl InputConfig {
    fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(SonicFrameError::config("input sample_rate must be non-zero"));
        }
        if self.capture_len < 2 || !self.capture_len.is_power_of_two() {
            return Err(SonicFrameError::config(format!(
                "capture_len must be a power of two of at least 2, got {}",
                self.capture_len
            )));
        }
        if !self.threshold.is_finite() {
            return Err(SonicFrameError::config("threshold must be finite"));
        }
        if self.keys.is_empty() {
            return Err(SonicFrameError::config("key table must not be empty"));
        }

        let mut seen = HashSet::new();
        for binding in &self.keys {
            if !seen.insert(binding.key) {
                return Err(SonicFrameError::config(format!(
                    "key {:?} is bound more than once",
                    binding.key
                )));
            }
            if !binding.frequency_hz.is_finite() || binding.frequency_hz < 0.0 {
                return Err(SonicFrameError::config(format!(
                    "key {:?} has an invalid frequency",
                    binding.key
                )));
            }
            let index = bin_index_for(binding.frequency_hz, self.capture_len, self.sample_rate);
            if index >= self.capture_len {
                return Err(SonicFrameError::config(format!(
                    "{} Hz maps to bin {index}, outside a {}-sample capture",
                    binding.frequency_hz, self.capture_len
                )));
            }
        }
        Ok(())
    }
}

/// Associates a target frequency with the key it signals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyBinding {
    pub frequency_hz: f64,
    pub key: Key,
}

impl KeyBinding {
    pub fn new(frequency_hz: f64, key: Key) -> Self {
        Self { frequency_hz, key }
    }

    /// Fifteen keys spaced 1 kHz apart starting at 2 kHz.
    pub fn default_table() -> Vec<Self> {
        [
            Key::RightArrow,
            Key::LeftArrow,
            Key::UpArrow,
            Key::DownArrow,
            Key::Use,
            Key::Fire,
            Key::Escape,
            Key::Enter,
            Key::Tab,
            Key::Digit1,
            Key::Digit2,
            Key::Digit3,
            Key::Digit4,
            Key::Digit5,
            Key::Digit6,
        ]
        .into_iter()
        .enumerate()
        .map(|(i, key)| Self::new(2_000.0 + 1_000.0 * i as f64, key))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.profile, BackendProfile::Full);
        assert_eq!(config.input.keys.len(), 15);
        assert_eq!(config.input.keys[0], KeyBinding::new(2_000.0, Key::RightArrow));
        assert_eq!(config.input.keys[14], KeyBinding::new(16_000.0, Key::Digit6));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = AppConfig::from_json_str(
            r#"{ "profile": "output_only", "frame": { "width": 64, "height": 32 } }"#,
        )
        .unwrap();

        assert_eq!(config.profile, BackendProfile::OutputOnly);
        assert_eq!(config.frame.pixel_count(), 64 * 32);
        assert_eq!(config.output.sample_rate, 44_100);
        assert_eq!(config.input.capture_len, 128);
    }

    #[test]
    fn parses_custom_key_table() {
        let config = AppConfig::from_json_str(
            r#"{ "input": { "keys": [ { "frequency_hz": 5000.0, "key": "fire" } ] } }"#,
        )
        .unwrap();
        assert_eq!(config.input.keys, vec![KeyBinding::new(5_000.0, Key::Fire)]);
    }

    #[test]
    fn frame_time_must_fit_the_tick_counter() {
        let config =
            AppConfig::from_json_str(r#"{ "output": { "frame_time_ms": 4294967295 } }"#).unwrap();
        assert_eq!(config.output.frame_time_ms, u32::MAX);

        let err = AppConfig::from_json_str(r#"{ "output": { "frame_time_ms": 4294967296 } }"#)
            .unwrap_err();
        assert!(matches!(err, SonicFrameError::Json(_)));
    }

    #[test]
    fn rejects_non_power_of_two_capture() {
        let mut config = AppConfig::default();
        config.input.capture_len = 100;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("power of two"));
    }

    #[test]
    fn rejects_frequency_outside_capture() {
        let mut config = AppConfig::default();
        config.input.keys = vec![KeyBinding::new(30_000.0, Key::Fire)];
        assert!(matches!(
            config.validate(),
            Err(SonicFrameError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_duplicate_keys() {
        let mut config = AppConfig::default();
        config.input.keys.push(KeyBinding::new(17_000.0, Key::Fire));
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_frame() {
        let mut config = AppConfig::default();
        config.frame.height = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn profile_capabilities() {
        assert!(BackendProfile::Full.captures_input());
        assert!(BackendProfile::OutputOnly.plays_audio());
        assert!(!BackendProfile::OutputOnly.captures_input());
        assert!(!BackendProfile::Null.plays_audio());
    }
}
