use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::audio::{normalize_block_size, DEFAULT_TARGET_HZ};
use crate::dsp::spectrum::{DEFAULT_F_MAX, DEFAULT_F_MIN};
use crate::link::sender::DEFAULT_SPECTRUM_HZ;
use crate::link::transport::DEFAULT_MTU;
use crate::error::ConfigError;

#[derive(Debug, Default, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub file: FileConfig,
    #[serde(default)]
    pub link: LinkConfig,
}

/// Microphone capture and shared analysis settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_block_size")]
    pub block_size: i64,
    #[serde(default = "default_mic_floor_db")]
    pub floor_db: f32,
    #[serde(default = "default_mic_range_db")]
    pub range_db: f32,
    #[serde(default = "default_f_min")]
    pub f_min: f32,
    #[serde(default = "default_f_max")]
    pub f_max: f32,
    #[serde(default = "default_target_hz")]
    pub target_hz: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FileConfig {
    #[serde(default = "default_file_floor_db")]
    pub floor_db: f32,
    #[serde(default = "default_file_range_db")]
    pub range_db: f32,
    #[serde(default = "default_playback")]
    pub playback: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LinkConfig {
    #[serde(default = "default_address")]
    pub address: u8,
    #[serde(default = "default_mtu")]
    pub mtu: usize,
    #[serde(default = "default_spectrum_hz")]
    pub spectrum_hz: f64,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            block_size: default_block_size(),
            floor_db: default_mic_floor_db(),
            range_db: default_mic_range_db(),
            f_min: default_f_min(),
            f_max: default_f_max(),
            target_hz: default_target_hz(),
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            floor_db: default_file_floor_db(),
            range_db: default_file_range_db(),
            playback: default_playback(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            mtu: default_mtu(),
            spectrum_hz: default_spectrum_hz(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

fn default_sample_rate() -> u32 { 48_000 }
fn default_block_size() -> i64 { 512 }
fn default_mic_floor_db() -> f32 { 20.0 }
fn default_mic_range_db() -> f32 { 60.0 }
fn default_f_min() -> f32 { DEFAULT_F_MIN }
fn default_f_max() -> f32 { DEFAULT_F_MAX }
fn default_target_hz() -> u32 { DEFAULT_TARGET_HZ }
fn default_file_floor_db() -> f32 { 10.0 }
fn default_file_range_db() -> f32 { 90.0 }
fn default_playback() -> bool { true }
fn default_address() -> u8 { 1 }
fn default_mtu() -> usize { DEFAULT_MTU }
fn default_spectrum_hz() -> f64 { DEFAULT_SPECTRUM_HZ }
fn default_response_timeout_ms() -> u64 { 400 }

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            log::warn!("Invalid config {}: {}", path.display(), e);
            None
        }
    }
}

/// Explicit path, else `nichirin.toml`, else the per-user config file.
pub fn find_config(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| {
        let local = PathBuf::from("nichirin.toml");
        if local.exists() {
            return Some(local);
        }
        if let Some(home) = dirs::home_dir() {
            let xdg = home.join(".config").join("nichirin").join("config.toml");
            if xdg.exists() {
                return Some(xdg);
            }
        }
        if let Some(config_dir) = dirs::config_dir() {
            let platform = config_dir.join("nichirin").join("config.toml");
            if platform.exists() {
                return Some(platform);
            }
        }
        None
    })
}

fn out_of_range(name: &'static str, value: f64, range: &'static str) -> ConfigError {
    ConfigError::OutOfRange { name, value, range }
}

pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    let a = &cfg.audio;
    if a.sample_rate == 0 {
        return Err(out_of_range("audio.sample_rate", 0.0, "> 0"));
    }
    if a.target_hz == 0 {
        return Err(out_of_range("audio.target_hz", 0.0, "> 0"));
    }
    if a.range_db < 1.0 {
        return Err(out_of_range("audio.range_db", a.range_db as f64, ">= 1"));
    }
    if a.f_min <= 0.0 || a.f_min >= a.f_max {
        return Err(out_of_range("audio.f_min", a.f_min as f64, "0 < f_min < f_max"));
    }
    if cfg.file.floor_db < 0.0 {
        return Err(out_of_range("file.floor_db", cfg.file.floor_db as f64, ">= 0"));
    }
    if cfg.file.range_db < 1.0 {
        return Err(out_of_range("file.range_db", cfg.file.range_db as f64, ">= 1"));
    }
    if cfg.link.mtu == 0 {
        return Err(out_of_range("link.mtu", 0.0, "> 0"));
    }
    if !(cfg.link.spectrum_hz > 0.0) {
        return Err(out_of_range("link.spectrum_hz", cfg.link.spectrum_hz, "> 0"));
    }
    Ok(())
}

fn split_params(input: &str) -> Vec<&str> {
    input
        .split([',', ' ', '/', ';', '|'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn unparseable(input: &str) -> ConfigError {
    ConfigError::Unparseable(input.to_string())
}

impl AudioConfig {
    /// Apply `"rate,block,floor"` or a lone floor value.
    ///
    /// The block size is normalized to a power of two in `128..=8192`.
    pub fn apply_params(&self, input: &str) -> Result<Self, ConfigError> {
        let parts = split_params(input);
        let mut out = self.clone();
        match parts.as_slice() {
            [floor] => {
                out.floor_db = floor.parse().map_err(|_| unparseable(input))?;
            }
            [rate, block, floor] => {
                let rate: i64 = rate.parse().map_err(|_| unparseable(input))?;
                let block: i64 = block.parse().map_err(|_| unparseable(input))?;
                let floor: f32 = floor.parse().map_err(|_| unparseable(input))?;
                if rate <= 0 || rate > u32::MAX as i64 {
                    return Err(out_of_range("sample rate", rate as f64, "> 0"));
                }
                if block <= 0 {
                    return Err(out_of_range("block size", block as f64, "> 0"));
                }
                out.sample_rate = rate as u32;
                out.block_size = normalize_block_size(block) as i64;
                out.floor_db = floor;
            }
            _ => return Err(unparseable(input)),
        }
        Ok(out)
    }

    pub fn fft_size(&self) -> usize {
        normalize_block_size(self.block_size)
    }
}

impl FileConfig {
    /// Apply `"floor,range"`; floor must be non-negative and range positive.
    pub fn apply_params(&self, input: &str) -> Result<Self, ConfigError> {
        let parts = split_params(input);
        let [floor, range] = parts.as_slice() else {
            return Err(unparseable(input));
        };
        let floor: f32 = floor.parse().map_err(|_| unparseable(input))?;
        let range: f32 = range.parse().map_err(|_| unparseable(input))?;
        if floor < 0.0 {
            return Err(out_of_range("file floor", floor as f64, ">= 0"));
        }
        if range <= 0.0 {
            return Err(out_of_range("file range", range as f64, "> 0"));
        }
        Ok(Self {
            floor_db: floor,
            range_db: range,
            ..self.clone()
        })
    }
}
