//! Detection of a stimulation train in one stim-monitor recording.

use log::debug;
use ndarray::{s, ArrayView1};

use crate::config::{StimConfig, ThresholdRule};

impl ThresholdRule {
    /// Indices of all samples the rule considers active, in ascending order.
    pub fn active_indices(&self, samples: ArrayView1<f64>) -> Vec<usize> {
        match *self {
            ThresholdRule::FixedBand { threshold } => above(samples, 0.0, threshold),
            ThresholdRule::Statistical { k, decimation } => {
                // mean/std of a decimated subsample removes the DC offset cheaply
                let sub = samples.slice(s![..;decimation.max(1) as isize]);
                if sub.is_empty() {
                    return Vec::new();
                }
                let mean = sub.mean().unwrap_or(0.0);
                let std = sub.std(0.0);
                above(samples, mean, k * std)
            }
        }
    }
}

fn above(samples: ArrayView1<f64>, center: f64, limit: f64) -> Vec<usize> {
    samples
        .iter()
        .enumerate()
        .filter(|&(_, &x)| (x - center).abs() > limit)
        .map(|(i, _)| i)
        .collect()
}

/// Looks for a stimulation train in the samples of one stim-monitor channel.
///
/// A gap event is a pair of consecutive active samples more than
/// `cfg.min_dist` samples apart, i.e. the start of a new pulse. A train is
/// present when the number of gap events exceeds `cfg.min_pulses`.
///
/// # Returns
///
/// `Some((first_active, last_active))` sample indices if a train is present,
/// `None` otherwise.
///
/// # Examples
///
/// ```
/// use ndarray::Array1;
/// use tdms_stim::{detect, StimConfig};
///
/// // 40 one-sample pulses every 100 samples
/// let mut stim = Array1::zeros(5000);
/// for i in 0..40 {
///     stim[500 + i * 100] = 1.0;
/// }
/// assert_eq!(detect(stim.view(), &StimConfig::default()), Some((500, 4400)));
/// ```
pub fn detect(samples: ArrayView1<f64>, cfg: &StimConfig) -> Option<(usize, usize)> {
    let active = cfg.rule.active_indices(samples);
    let gaps = active
        .windows(2)
        .filter(|pair| pair[1] - pair[0] > cfg.min_dist)
        .count();
    debug!(
        "{} active samples, {} pulse gaps (need more than {})",
        active.len(),
        gaps,
        cfg.min_pulses
    );

    if gaps > cfg.min_pulses {
        Some((active[0], active[active.len() - 1]))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    fn pulse_train(len: usize, first: usize, period: usize, count: usize) -> Array1<f64> {
        let mut x = Array1::from_elem(len, 0.01);
        for p in 0..count {
            x[first + p * period] = 2.0;
        }
        x
    }

    #[test]
    fn fixed_band_rule() {
        let x = pulse_train(10_000, 1000, 100, 40);
        let cfg = StimConfig {
            rule: ThresholdRule::FixedBand { threshold: 0.1 },
            ..StimConfig::default()
        };
        assert_eq!(detect(x.view(), &cfg), Some((1000, 4900)));
    }

    #[test]
    fn flat_signal_has_no_train() {
        let x = Array1::from_elem(10_000, 0.5);
        assert_eq!(detect(x.view(), &StimConfig::default()), None);
        assert_eq!(detect(Array1::zeros(0).view(), &StimConfig::default()), None);
    }

    #[test]
    fn monotone_in_min_pulses() {
        // 40 pulses give 39 gap events
        let x = pulse_train(10_000, 1000, 100, 40);
        let loose = StimConfig {
            min_pulses: 30,
            ..StimConfig::default()
        };
        let strict = StimConfig {
            min_pulses: 50,
            ..StimConfig::default()
        };
        assert!(detect(x.view(), &loose).is_some());
        assert!(detect(x.view(), &strict).is_none());
    }

    #[test]
    fn monotone_in_min_dist() {
        let x = pulse_train(10_000, 1000, 100, 40);
        let short = StimConfig {
            min_dist: 50,
            ..StimConfig::default()
        };
        let long = StimConfig {
            min_dist: 150,
            ..StimConfig::default()
        };
        assert!(detect(x.view(), &short).is_some());
        assert!(detect(x.view(), &long).is_none());
    }

    #[test]
    fn statistical_rule_ignores_dc_offset() {
        let x = pulse_train(10_000, 1000, 100, 40).mapv(|v| v + 3.0);
        let active = ThresholdRule::default().active_indices(x.view());
        assert_eq!(active.len(), 40);
        assert_eq!(active[0], 1000);
    }
}
