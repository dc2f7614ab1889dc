//! Anti-aliased decimation of slow channels to a lower sample rate.
//!
//! The low-pass is a linear-phase windowed-sinc FIR (Hamming window,
//! `20 * factor + 1` taps, cutoff at the new Nyquist frequency) applied
//! centered on each output sample, so the result has no phase delay.

use log::debug;
use ndarray::Array1;
use std::f64::consts::PI;

use crate::types::{Channel, StimError};

/// Half-length of the FIR filter per unit of decimation factor.
const HALF_TAPS_PER_FACTOR: usize = 10;

/// Integer decimation factor that brings `old_fs` closest to `new_fs`.
///
/// # Errors
///
/// Returns `InvalidParameter` if `new_fs` is not positive, not finite or not
/// below `old_fs` (only downsampling is supported).
pub fn decimation_factor(old_fs: f64, new_fs: f64) -> Result<usize, StimError> {
    if !(new_fs.is_finite() && new_fs > 0.0 && new_fs < old_fs) {
        return Err(StimError::InvalidParameter {
            name: "resample_hz",
            value: new_fs,
        });
    }
    Ok(((old_fs / new_fs).round() as usize).max(1))
}

/// Hamming-windowed sinc low-pass with cutoff `1 / factor` of Nyquist,
/// normalized to unit gain at DC.
fn lowpass_taps(factor: usize) -> Vec<f64> {
    let num_taps = 2 * HALF_TAPS_PER_FACTOR * factor + 1;
    let center = (num_taps / 2) as f64;
    let cutoff = 1.0 / factor as f64;

    let mut taps: Vec<f64> = (0..num_taps)
        .map(|n| {
            let m = n as f64 - center;
            let sinc = if m == 0.0 {
                1.0
            } else {
                (PI * cutoff * m).sin() / (PI * cutoff * m)
            };
            let window = 0.54 - 0.46 * (2.0 * PI * n as f64 / (num_taps - 1) as f64).cos();
            cutoff * sinc * window
        })
        .collect();

    let gain: f64 = taps.iter().sum();
    taps.iter_mut().for_each(|t| *t /= gain);
    taps
}

/// Low-pass filters the samples and keeps every `factor`-th one.
///
/// Edges are handled by repeating the first and last sample. A factor of 1
/// returns the samples unchanged.
///
/// # Examples
///
/// ```
/// use ndarray::Array1;
/// use tdms_stim::resample::decimate;
///
/// let x = Array1::from_elem(1000, 2.0);
/// let y = decimate(&x, 10);
/// assert_eq!(y.len(), 100);
/// assert!((y[50] - 2.0).abs() < 1e-9);
/// ```
pub fn decimate(samples: &Array1<f64>, factor: usize) -> Array1<f64> {
    if factor <= 1 || samples.is_empty() {
        return samples.clone();
    }

    let taps = lowpass_taps(factor);
    let half = (taps.len() / 2) as isize;
    let last = samples.len() as isize - 1;

    (0..samples.len())
        .step_by(factor)
        .map(|i| {
            taps.iter()
                .enumerate()
                .map(|(k, tap)| {
                    let j = (i as isize + k as isize - half).clamp(0, last);
                    tap * samples[j as usize]
                })
                .sum::<f64>()
        })
        .collect()
}

/// Decimates a channel to roughly `new_fs` Hz.
///
/// The resulting rate is `sample_rate / factor`, where the factor is the
/// rounded ratio of the two rates.
pub fn downsample(channel: &Channel, new_fs: f64) -> Result<Channel, StimError> {
    let factor = decimation_factor(channel.sample_rate, new_fs)?;
    debug!(
        "Decimating {} from {} Hz by {}",
        channel.name, channel.sample_rate, factor
    );
    Ok(Channel::new(
        channel.name.clone(),
        decimate(&channel.samples, factor),
        channel.sample_rate / factor as f64,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn factor_rounds_rate_ratio() {
        assert_eq!(decimation_factor(1000.0, 100.0).unwrap(), 10);
        assert_eq!(decimation_factor(1000.0, 90.0).unwrap(), 11);
        assert!(decimation_factor(100.0, 1000.0).is_err());
        assert!(decimation_factor(100.0, 0.0).is_err());
    }

    #[test]
    fn taps_have_unit_dc_gain() {
        let taps = lowpass_taps(4);
        assert_eq!(taps.len(), 81);
        assert_abs_diff_eq!(taps.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(taps[0], taps[80], epsilon = 1e-12);
    }

    #[test]
    fn slow_sine_survives_fast_sine_is_removed() {
        let fs = 1000.0;
        let n = 4000;
        let slow = Array1::from_iter((0..n).map(|i| (2.0 * PI * 2.0 * i as f64 / fs).sin()));
        let fast = Array1::from_iter((0..n).map(|i| (2.0 * PI * 300.0 * i as f64 / fs).sin()));

        let slow_out = decimate(&slow, 10);
        let fast_out = decimate(&fast, 10);

        // Compare away from the edges
        for i in 50..350 {
            assert_abs_diff_eq!(slow_out[i], slow[i * 10], epsilon = 1e-2);
            assert!(fast_out[i].abs() < 0.05);
        }
    }

    #[test]
    fn downsample_updates_rate() {
        let ch = Channel::new("mean_bp", Array1::from_elem(1000, 1.0), 1000.0);
        let out = downsample(&ch, 100.0).unwrap();
        assert_eq!(out.len(), 100);
        assert_abs_diff_eq!(out.sample_rate, 100.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out.duration(), ch.duration(), epsilon = 1e-12);
    }
}
