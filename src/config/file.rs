//! Configuration file management for vmemo.
//!
//! This module handles loading and saving application configuration from TOML files.
//! Configuration is stored in the user's config directory. A missing file means
//! every setting takes its default.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::recording::visualizations::{AnalyserSettings, PulseRange};

/// Audio capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioConfig {
    /// Audio device to use. Options:
    /// - "default" for system default device
    /// - numeric index (0, 1, 2, etc.) from `vmemo list-devices`
    /// - device name from `vmemo list-devices`
    #[serde(default = "default_device")]
    pub device: String,
    /// How much audio the recorder buffers before flushing a chunk
    #[serde(default = "default_chunk_millis")]
    pub chunk_millis: u32,
}

fn default_device() -> String {
    "default".to_string()
}

fn default_chunk_millis() -> u32 {
    250
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            chunk_millis: default_chunk_millis(),
        }
    }
}

/// Frequency analyser configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyserConfig {
    /// FFT window length in samples (power of two, 32-32768)
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    /// Averaging with the previous snapshot (0.0-1.0)
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,
    /// Quietest level shown, in dB
    #[serde(default = "default_min_decibels")]
    pub min_decibels: f32,
    /// Loudest level shown, in dB
    #[serde(default = "default_max_decibels")]
    pub max_decibels: f32,
}

fn default_fft_size() -> usize {
    2048
}

fn default_smoothing() -> f32 {
    0.8
}

fn default_min_decibels() -> f32 {
    -100.0
}

fn default_max_decibels() -> f32 {
    -30.0
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            fft_size: default_fft_size(),
            smoothing: default_smoothing(),
            min_decibels: default_min_decibels(),
            max_decibels: default_max_decibels(),
        }
    }
}

/// Pulse mapping and refresh configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PulseConfig {
    /// Display refresh rate in frames per second
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    /// Mean bin loudness mapped to `min_size`
    #[serde(default)]
    pub volume_floor: f32,
    /// Mean bin loudness mapped to `max_size`; louder input overshoots
    #[serde(default = "default_volume_ceiling")]
    pub volume_ceiling: f32,
    #[serde(default = "default_min_size")]
    pub min_size: f32,
    #[serde(default = "default_max_size")]
    pub max_size: f32,
}

fn default_frame_rate() -> u32 {
    60
}

fn default_volume_ceiling() -> f32 {
    100.0
}

fn default_min_size() -> f32 {
    100.0
}

fn default_max_size() -> f32 {
    150.0
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            frame_rate: default_frame_rate(),
            volume_floor: 0.0,
            volume_ceiling: default_volume_ceiling(),
            min_size: default_min_size(),
            max_size: default_max_size(),
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VmemoConfig {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub analyser: AnalyserConfig,
    #[serde(default)]
    pub pulse: PulseConfig,
}

impl VmemoConfig {
    /// Loads configuration from the user's config directory.
    ///
    /// # Errors
    /// - If the config directory cannot be determined
    /// - If the config file cannot be read or the TOML is malformed
    /// - If a value is out of range
    pub fn load() -> Result<Self> {
        Self::load_from(&get_config_path()?)
    }

    /// Loads configuration from `path`, falling back to defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read {}: {e}", path.display()))?;
        let config: VmemoConfig =
            toml::from_str(&content).map_err(|e| anyhow!("Invalid config file: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Writes configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        tracing::info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<()> {
        let numbers = [
            ("analyser.min_decibels", self.analyser.min_decibels),
            ("analyser.max_decibels", self.analyser.max_decibels),
            ("pulse.volume_floor", self.pulse.volume_floor),
            ("pulse.volume_ceiling", self.pulse.volume_ceiling),
            ("pulse.min_size", self.pulse.min_size),
            ("pulse.max_size", self.pulse.max_size),
        ];
        if let Some((name, value)) = numbers.iter().find(|(_, v)| !v.is_finite()) {
            return Err(anyhow!("{name} must be a finite number, got {value}"));
        }
        let fft = self.analyser.fft_size;
        if !fft.is_power_of_two() || !(32..=32768).contains(&fft) {
            return Err(anyhow!(
                "analyser.fft_size must be a power of two between 32 and 32768, got {fft}"
            ));
        }
        if !(0.0..=1.0).contains(&self.analyser.smoothing) {
            return Err(anyhow!(
                "analyser.smoothing must be between 0.0 and 1.0, got {}",
                self.analyser.smoothing
            ));
        }
        if self.analyser.min_decibels >= self.analyser.max_decibels {
            return Err(anyhow!(
                "analyser.min_decibels ({}) must be below max_decibels ({})",
                self.analyser.min_decibels,
                self.analyser.max_decibels
            ));
        }
        if self.pulse.volume_floor == self.pulse.volume_ceiling {
            return Err(anyhow!("pulse.volume_floor and pulse.volume_ceiling must differ"));
        }
        if !(1..=240).contains(&self.pulse.frame_rate) {
            return Err(anyhow!(
                "pulse.frame_rate must be between 1 and 240, got {}",
                self.pulse.frame_rate
            ));
        }
        if self.audio.chunk_millis == 0 {
            return Err(anyhow!("audio.chunk_millis must be greater than 0"));
        }
        Ok(())
    }

    pub fn analyser_settings(&self) -> AnalyserSettings {
        AnalyserSettings {
            fft_size: self.analyser.fft_size,
            smoothing: self.analyser.smoothing,
            min_decibels: self.analyser.min_decibels,
            max_decibels: self.analyser.max_decibels,
        }
    }

    pub fn pulse_range(&self) -> PulseRange {
        PulseRange {
            volume_floor: self.pulse.volume_floor,
            volume_ceiling: self.pulse.volume_ceiling,
            min_size: self.pulse.min_size,
            max_size: self.pulse.max_size,
        }
    }
}

/// Retrieves the path to the config file.
///
/// # Errors
/// - If the home directory cannot be determined
pub fn get_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
    Ok(home.join(".config").join("vmemo").join("vmemo.toml"))
}
