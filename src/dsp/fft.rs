//! In-place radix-2 FFT over split real/imaginary buffers.

use crate::error::DspError;

/// Forward transform of `(real, imag)` in place.
///
/// Both slices must have the same power-of-two length. For real input only
/// bins `0..=n/2` carry independent information.
pub fn fft(real: &mut [f32], imag: &mut [f32]) -> Result<(), DspError> {
    let n = real.len();
    if n != imag.len() {
        return Err(DspError::InvalidArgument(format!(
            "real/imag length mismatch: {} vs {}",
            n,
            imag.len()
        )));
    }
    if !n.is_power_of_two() {
        return Err(DspError::InvalidArgument(format!(
            "length {} is not a power of two",
            n
        )));
    }

    bit_reverse_permute(real, imag);

    let mut len = 2;
    while len <= n {
        let half = len / 2;
        let ang = -2.0 * std::f64::consts::PI / len as f64;
        let (wpr, wpi) = (ang.cos() as f32, ang.sin() as f32);

        for i in (0..n).step_by(len) {
            let (mut wr, mut wi) = (1.0f32, 0.0f32);
            for j in 0..half {
                let i0 = i + j;
                let i1 = i0 + half;

                let tr = wr * real[i1] - wi * imag[i1];
                let ti = wr * imag[i1] + wi * real[i1];

                real[i1] = real[i0] - tr;
                imag[i1] = imag[i0] - ti;
                real[i0] += tr;
                imag[i0] += ti;

                let nwr = wr * wpr - wi * wpi;
                wi = wr * wpi + wi * wpr;
                wr = nwr;
            }
        }
        len *= 2;
    }
    Ok(())
}

fn bit_reverse_permute(real: &mut [f32], imag: &mut [f32]) {
    let n = real.len();
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j ^= bit;
        if i < j {
            real.swap(i, j);
            imag.swap(i, j);
        }
    }
}
