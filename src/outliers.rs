//! Removal of dropouts and spikes from slow physiological signals.
//!
//! Physiological monitors sample much faster than the underlying variables
//! change, so large point-to-point jumps are treated as acquisition errors.
//! Cleaning runs two passes over the signal, in place:
//!
//! 1. **Rate of change**: every sample whose absolute change from its
//!    predecessor exceeds `median * max_perc_change` is replaced by that
//!    predecessor. Flags are computed once up front, and repairs are applied
//!    in ascending order so a replaced value propagates through a run of bad
//!    samples.
//! 2. **Distance from median**: using the population std of the pass-1 output,
//!    every sample further than `std * max_sigma` from the (original) median is
//!    replaced by the sample before it.

use ndarray::{Array1, ArrayD};

use crate::config::OutlierPolicy;
use crate::types::StimError;

/// Cleans a one-dimensional signal in place.
///
/// # Arguments
///
/// * `signal` - Samples to clean; must hold at least 2 samples
/// * `policy` - Rate-of-change and sigma thresholds
///
/// # Errors
///
/// * `DimensionError` if the signal has fewer than 2 samples
/// * `InvalidParameter` if a threshold is negative or not finite
///
/// Nothing is modified when an error is returned.
///
/// # Examples
///
/// ```
/// use ndarray::array;
/// use tdms_stim::{remove_outliers, OutlierPolicy};
///
/// let mut bp = array![80.0, 81.0, 0.0, 80.5, 79.5, 80.0];
/// remove_outliers(&mut bp, &OutlierPolicy::default()).unwrap();
/// assert_eq!(bp[2], 81.0);
/// ```
pub fn remove_outliers(signal: &mut Array1<f64>, policy: &OutlierPolicy) -> Result<(), StimError> {
    if signal.len() < 2 {
        return Err(StimError::DimensionError {
            shape: signal.shape().to_vec(),
        });
    }
    policy.validate()?;

    let median = median(signal);

    // Pass 1: point-to-point change relative to the median
    let max_dt = median * policy.max_perc_change;
    let flagged: Vec<usize> = (0..signal.len() - 1)
        .filter(|&i| (signal[i + 1] - signal[i]).abs() > max_dt)
        .collect();
    for i in flagged {
        signal[i + 1] = signal[i];
    }

    // Pass 2: distance from the median in units of std
    let max_delta = signal.std(0.0) * policy.max_sigma;
    let flagged: Vec<usize> = (0..signal.len())
        .filter(|&i| (signal[i] - median).abs() > max_delta)
        .collect();
    for i in flagged {
        // The first sample has no predecessor
        signal[i] = if i == 0 { median } else { signal[i - 1] };
    }

    Ok(())
}

/// Cleans an n-dimensional array holding one signal, in place.
///
/// Singleton axes are ignored, so `(1, n)` and `(n, 1)` arrays are accepted.
///
/// # Errors
///
/// Returns `DimensionError` if more than one axis is longer than 1, plus the
/// errors of [`remove_outliers`].
pub fn remove_outliers_nd(signal: &mut ArrayD<f64>, policy: &OutlierPolicy) -> Result<(), StimError> {
    let long_axes = signal.shape().iter().filter(|&&len| len > 1).count();
    if long_axes > 1 || signal.len() < 2 {
        return Err(StimError::DimensionError {
            shape: signal.shape().to_vec(),
        });
    }

    let mut flat: Array1<f64> = signal.iter().copied().collect();
    remove_outliers(&mut flat, policy)?;
    signal.iter_mut().zip(flat.iter()).for_each(|(dst, src)| *dst = *src);
    Ok(())
}

/// Median of the samples; the mean of the two middle values for even lengths.
fn median(signal: &Array1<f64>) -> f64 {
    let mut sorted = signal.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
