pub mod bands;
pub mod fft;
pub mod spectrum;

pub use bands::{log_bands, BandBinRange};
pub use spectrum::{BandIntensity, SpectrumProcessor};
