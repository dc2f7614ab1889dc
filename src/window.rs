//! Cutting synchronized windows around the stimulation block.

use log::debug;
use ndarray::s;
use std::collections::BTreeMap;

use crate::config::{non_negative, OutlierPolicy};
use crate::outliers::remove_outliers;
use crate::types::*;

/// Milliseconds per minute.
const MS_PER_MINUTE: f64 = 60_000.0;

/// Cuts every channel to the stimulation block plus padding.
///
/// Shorthand for [`assemble_between`] with the onset and offset of `block`.
pub fn assemble(
    channels: &mut ChannelSet,
    block: &StimBlock,
    pad_minutes: f64,
    outliers: Option<&OutlierPolicy>,
) -> Result<AlignedWindow, StimError> {
    assemble_between(channels, block.start_ms, block.stop_ms, pad_minutes, outliers)
}

/// Cuts every channel to `[start_ms - pad, stop_ms + pad]`.
///
/// Each channel gets its own time base, `linspace(0, duration_ms, n)`, so
/// channels at different rates cover the same absolute interval with their
/// own number of samples. A window reaching past either end of a channel is
/// clamped to the first or last sample.
///
/// # Arguments
///
/// * `channels` - Full-length channels; cleaned in place when `outliers` is set
/// * `start_ms`, `stop_ms` - Stim onset and offset relative to the recording start
/// * `pad_minutes` - Padding added before the onset and after the offset
/// * `outliers` - Outlier removal applied to each full channel before slicing
///
/// # Errors
///
/// * `InvalidParameter` for a negative pad or `stop_ms < start_ms`
/// * `DimensionError` from outlier removal on a channel shorter than 2 samples
pub fn assemble_between(
    channels: &mut ChannelSet,
    start_ms: f64,
    stop_ms: f64,
    pad_minutes: f64,
    outliers: Option<&OutlierPolicy>,
) -> Result<AlignedWindow, StimError> {
    non_negative("pad_minutes", pad_minutes)?;
    if !(stop_ms >= start_ms) {
        return Err(StimError::InvalidParameter {
            name: "stop_ms",
            value: stop_ms,
        });
    }
    let pad_ms = pad_minutes * MS_PER_MINUTE;
    let (lower, upper) = (start_ms - pad_ms, stop_ms + pad_ms);

    let mut sliced = BTreeMap::new();
    for channel in channels.iter_mut() {
        if let Some(policy) = outliers {
            remove_outliers(&mut channel.samples, policy)?;
        }

        let n = channel.len();
        let step = if n > 1 {
            channel.duration_ms() / (n - 1) as f64
        } else {
            0.0
        };
        let time = |i: usize| step * i as f64;

        let first = partition_point(n, |i| time(i) > lower);
        let end = partition_point(n, |i| time(i) >= upper).max(first);
        debug!(
            "{}: samples {}..{} of {} at {} Hz",
            channel.name, first, end, n, channel.sample_rate
        );
        sliced.insert(channel.name.clone(), channel.samples.slice(s![first..end]).to_owned());
    }

    Ok(AlignedWindow {
        channels: sliced,
        start_ms: 0.0,
        stop_ms: stop_ms - start_ms,
        pad_ms,
    })
}

/// Index of the first of `n` positions where a monotone predicate turns true,
/// or `n` if it never does.
fn partition_point(n: usize, pred: impl Fn(usize) -> bool) -> usize {
    let (mut low, mut high) = (0, n);
    while low < high {
        let mid = low + (high - low) / 2;
        if pred(mid) {
            high = mid;
        } else {
            low = mid + 1;
        }
    }
    low
}
