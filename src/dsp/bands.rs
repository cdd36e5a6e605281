//! Logarithmically spaced band ranges over the half spectrum.

use crate::error::DspError;

/// Bins `start..end` of one band; `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandBinRange {
    pub start: usize,
    pub end: usize,
}

impl BandBinRange {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Split `f_min..f_max` into `band_count` log-spaced ranges of FFT bins.
///
/// DC is never included and every band spans at least one bin, so narrow low
/// bands may share bins with their neighbours.
pub fn log_bands(
    sample_rate: u32,
    fft_size: usize,
    band_count: usize,
    f_min: f32,
    f_max: f32,
) -> Result<Vec<BandBinRange>, DspError> {
    if sample_rate == 0 {
        return Err(DspError::InvalidArgument("sample rate must be positive".into()));
    }
    if fft_size < 4 || !fft_size.is_power_of_two() {
        return Err(DspError::InvalidArgument(format!(
            "fft size {} must be a power of two >= 4",
            fft_size
        )));
    }
    if band_count == 0 {
        return Err(DspError::InvalidArgument("band count must be positive".into()));
    }

    let nyquist = sample_rate as f64 / 2.0;
    let lo = (f_min as f64).max(1.0);
    let hi = (f_max as f64).min(nyquist);
    if !(hi > lo) {
        return Err(DspError::InvalidArgument(format!(
            "empty frequency range {:.1}..{:.1} Hz",
            lo, hi
        )));
    }

    let log_min = lo.ln();
    let log_max = hi.ln();
    let half = fft_size / 2;
    let hz_to_bin = |hz: f64| -> usize {
        let bin = (hz / sample_rate as f64 * fft_size as f64).round() as usize;
        bin.clamp(1, half)
    };

    let ranges = (0..band_count)
        .map(|i| {
            let t0 = i as f64 / band_count as f64;
            let t1 = (i + 1) as f64 / band_count as f64;
            let f0 = (log_min + (log_max - log_min) * t0).exp();
            let f1 = (log_min + (log_max - log_min) * t1).exp();

            let start = hz_to_bin(f0).min(half - 1);
            let end = hz_to_bin(f1).max(start + 1);
            BandBinRange { start, end }
        })
        .collect();
    Ok(ranges)
}
