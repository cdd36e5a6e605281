use crate::error::DspError;
use crate::protocol::registers::BAND_COUNT;

use super::bands::{log_bands, BandBinRange};
use super::fft::fft;

pub const DEFAULT_FLOOR_DB: f32 = 27.0;
pub const DEFAULT_RANGE_DB: f32 = 60.0;
pub const DEFAULT_F_MIN: f32 = 60.0;
pub const DEFAULT_F_MAX: f32 = 8_000.0;

/// Weight of the newest value in the per-band exponential smoothing.
const SMOOTHING: f32 = 0.35;
const EPS: f32 = 1e-12;

/// Twelve band intensities, 0..=255 each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BandIntensity(pub [u8; BAND_COUNT]);

impl BandIntensity {
    pub const SILENT: Self = Self([0; BAND_COUNT]);

    pub fn values(&self) -> &[u8; BAND_COUNT] {
        &self.0
    }

    pub fn max(&self) -> u8 {
        self.0.iter().copied().max().unwrap_or(0)
    }
}

/// Windowed FFT to twelve smoothed, bounded band levels.
pub struct SpectrumProcessor {
    fft_size: usize,
    window: Vec<f32>,
    real: Vec<f32>,
    imag: Vec<f32>,
    mags: Vec<f32>,
    bands: Vec<BandBinRange>,
    smooth: [f32; BAND_COUNT],
    floor_db: f32,
    range_db: f32,
}

impl SpectrumProcessor {
    pub fn new(
        sample_rate: u32,
        fft_size: usize,
        f_min: f32,
        f_max: f32,
        floor_db: f32,
        range_db: f32,
    ) -> Result<Self, DspError> {
        let bands = log_bands(sample_rate, fft_size, BAND_COUNT, f_min, f_max)?;
        Ok(Self {
            fft_size,
            window: hann_window(fft_size),
            real: vec![0.0; fft_size],
            imag: vec![0.0; fft_size],
            mags: vec![0.0; fft_size / 2 + 1],
            bands,
            smooth: [0.0; BAND_COUNT],
            floor_db,
            range_db: range_db.max(1.0),
        })
    }

    /// Processor covering 60 Hz up to 8 kHz (or Nyquist, whichever is lower).
    pub fn for_sample_rate(
        sample_rate: u32,
        fft_size: usize,
        floor_db: f32,
        range_db: f32,
    ) -> Result<Self, DspError> {
        let f_max = (sample_rate as f32 / 2.0).min(DEFAULT_F_MAX);
        Self::new(sample_rate, fft_size, DEFAULT_F_MIN, f_max, floor_db, range_db)
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn bands(&self) -> &[BandBinRange] {
        &self.bands
    }

    pub fn floor_db(&self) -> f32 {
        self.floor_db
    }

    pub fn range_db(&self) -> f32 {
        self.range_db
    }

    /// Sensitivity offset added to each band level in dB.
    pub fn set_floor_db(&mut self, db: f32) {
        self.floor_db = db;
    }

    /// Display span in dB; values below 1 are raised to 1.
    pub fn set_range_db(&mut self, db: f32) {
        self.range_db = db.max(1.0);
    }

    /// Analyze one window of exactly `fft_size` samples.
    pub fn process(&mut self, frame: &[f32]) -> Result<BandIntensity, DspError> {
        if frame.len() != self.fft_size {
            return Err(DspError::InvalidArgument(format!(
                "frame length {} != fft size {}",
                frame.len(),
                self.fft_size
            )));
        }

        for ((re, im), (&s, &w)) in self
            .real
            .iter_mut()
            .zip(self.imag.iter_mut())
            .zip(frame.iter().zip(&self.window))
        {
            *re = s * w;
            *im = 0.0;
        }

        fft(&mut self.real, &mut self.imag)?;

        for k in 1..self.mags.len() {
            let (r, i) = (self.real[k], self.imag[k]);
            self.mags[k] = (r * r + i * i).sqrt();
        }

        let inv = 255.0 / self.range_db;
        let mut out = [0u8; BAND_COUNT];
        for (i, band) in self.bands.iter().enumerate() {
            let avg = if band.is_empty() {
                0.0
            } else {
                self.mags[band.start..band.end].iter().sum::<f32>() / band.len() as f32
            };
            let db = 20.0 * (avg + EPS).log10();
            let v = (db + self.floor_db).max(0.0);
            self.smooth[i] = self.smooth[i] * (1.0 - SMOOTHING) + v * SMOOTHING;
            out[i] = (self.smooth[i] * inv).clamp(0.0, 255.0) as u8;
        }
        Ok(BandIntensity(out))
    }
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos()
        })
        .collect()
}
