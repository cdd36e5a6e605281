use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Source {
    /// Moving ramp, no audio needed
    Saw,
    /// Default input device
    Mic,
    /// Decoded media file
    File,
}

#[derive(Parser, Debug)]
#[command(name = "nichirin", about = "Stream live or recorded audio spectra to a register-controlled lamp")]
pub struct Cli {
    /// Media file to analyze (WAV, MP3, FLAC, OGG, AAC); implies --source file
    pub input: Option<PathBuf>,

    /// Where band levels come from
    #[arg(short, long, value_enum)]
    pub source: Option<Source>,

    /// Capture sample rate in Hz
    #[arg(long, default_value_t = 48_000)]
    pub sample_rate: u32,

    /// FFT block size, rounded up to a power of two in 128..=8192
    #[arg(long, default_value_t = 512)]
    pub block_size: i64,

    /// Sensitivity offset in dB (default depends on the source)
    #[arg(long)]
    pub floor_db: Option<f32>,

    /// Display span in dB (default depends on the source)
    #[arg(long)]
    pub range_db: Option<f32>,

    /// Compact parameters: "rate,block,floor" or "floor" for the mic, "floor,range" for files
    #[arg(long)]
    pub params: Option<String>,

    /// Negotiated transport MTU in bytes
    #[arg(long, default_value_t = 23)]
    pub mtu: usize,

    /// Lamp register address
    #[arg(long, default_value_t = 1)]
    pub address: u8,

    /// Analyze files without playing them
    #[arg(long)]
    pub no_playback: bool,

    /// Stop after this many seconds (files stop at their end by default)
    #[arg(short, long)]
    pub duration: Option<f64>,

    /// Start file playback at this position in seconds
    #[arg(long)]
    pub seek: Option<f64>,

    /// Lamp mode register
    #[arg(long)]
    pub mode: Option<u16>,

    /// Lamp hue, 0-359
    #[arg(long)]
    pub hue: Option<u16>,

    /// Lamp saturation, 0-255
    #[arg(long)]
    pub saturation: Option<u8>,

    /// Lamp brightness, 0-255
    #[arg(long)]
    pub value: Option<u8>,

    /// Mode-specific parameter, 0-255
    #[arg(long)]
    pub param: Option<u8>,

    /// Write lamp settings one register at a time
    #[arg(long)]
    pub per_register: bool,

    /// Read the lamp configuration back
    #[arg(long)]
    pub read_config: bool,

    /// Config file (default: ./nichirin.toml, then ~/.config/nichirin/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    pub fn source(&self) -> Source {
        match (self.source, &self.input) {
            (Some(s), _) => s,
            (None, Some(_)) => Source::File,
            (None, None) => Source::Saw,
        }
    }

    /// True when any lamp register flag was given.
    pub fn has_lamp_settings(&self) -> bool {
        self.mode.is_some()
            || self.hue.is_some()
            || self.saturation.is_some()
            || self.value.is_some()
            || self.param.is_some()
    }
}
