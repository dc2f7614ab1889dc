//! Loading of logical channels from TDMS files.
//!
//! Different rigs and acquisition-software versions store the same signals
//! under different group and channel names. The loader hides those
//! differences and returns [`ChannelSet`]s keyed by logical names
//! (`stim_mon`, `mean_bp`, `amp_0`, `core_temp`, ...).

use log::{debug, info};
use ndarray::{concatenate as join, Axis};
use rayon::prelude::*;
use std::path::Path;

use crate::config::{LoaderConfig, PipelineConfig};
use crate::reader::load_file;
use crate::resample::downsample;
use crate::types::*;

/// Blood-pressure channels and their names in the BP monitor output.
pub const BP_CHANNELS: [&str; 4] = ["mean_bp", "systolic_bp", "diastolic_bp", "pulse_wf"];

/// The BP monitor records in units of 100 mmHg.
const BP_TO_MMHG: f64 = 100.0;

/// Serial-port channel names and the physiological variables they carry.
pub const SERIAL_CHANNELS: [(&str, &str); 6] = [
    ("Untitled", "percent_isoflurane"),
    ("Untitled 1", "pad_temp"),
    ("Untitled 2", "core_temp"),
    ("Untitled 3", "sp02"),
    ("Untitled 4", "heart_rate2"),
    ("Untitled 5", "perfusion"),
];

/// Group holding the serial-port channels in every software version.
const SERIAL_GROUP: &str = "Untitled";

/// LabVIEW stores the serial-port wf-increment 10 times too large.
const SERIAL_INCREMENT_CORRECTION: f64 = 10.0;

/// Largest relative rate difference still treated as one nominal rate when
/// joining segments.
const RATE_TOLERANCE: f64 = 0.01;

/// Prefix shared by all ephys amplifier channels.
const EPHYS_MARKER: &str = "amp";

/// The kind of signals to pull out of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Amplifier channels, renamed `amp_0 .. amp_N` in file order
    Ephys,
    /// Mean, systolic and diastolic BP plus the pulse waveform, in mmHg
    BloodPressure,
    /// Serial-port physiological monitor variables
    Physio,
    /// The stimulation monitor channel
    Stim,
}

/// Finds the first group of `candidates` that exists in the file.
pub fn find_group<'a>(tdms: &'a TdmsFile, candidates: &[String]) -> Result<&'a TdmsGroup, StimError> {
    candidates
        .iter()
        .find_map(|name| tdms.group(name))
        .ok_or_else(|| StimError::GroupNotFound(candidates.to_vec()))
}

/// Returns the sample rate shared by the selected channels of a group.
///
/// # Errors
///
/// * `RateMismatch` if two channels carry different wf-increments
/// * `MissingProperty` if a channel has no wf-increment
/// * `ChannelNotFound` if no channel is selected
pub fn group_sample_rate(group: &TdmsGroup, channels: &[&TdmsChannel]) -> Result<f64, StimError> {
    let mut increments = channels.iter().map(|c| c.wf_increment());
    let first = increments
        .next()
        .ok_or_else(|| StimError::ChannelNotFound(format!("any channel in group {}", group.name)))??;

    for increment in increments {
        let increment = increment?;
        if increment != first {
            return Err(StimError::RateMismatch {
                context: format!("group {}", group.name),
                expected: 1.0 / first,
                found: 1.0 / increment,
            });
        }
    }
    Ok(1.0 / first)
}

/// Converts one channel object to a logical channel.
fn to_channel(tdms_channel: &TdmsChannel, name: &str) -> Result<Channel, StimError> {
    Ok(Channel::from_increment(
        name,
        tdms_channel.data.clone(),
        tdms_channel.wf_increment()?,
    ))
}

/// Looks up a channel object by name within a group.
fn require<'a>(group: &'a TdmsGroup, name: &str) -> Result<&'a TdmsChannel, StimError> {
    group
        .channel(name)
        .ok_or_else(|| StimError::ChannelNotFound(format!("{}/{}", group.name, name)))
}

/// Pulls the logical channels of one kind out of a loaded file.
///
/// Amplifier and blood-pressure channels must share one rate within their
/// group. Channels are decimated when `loader.resample` sets a rate for
/// `kind` below their native rate. The stim monitor is never decimated.
pub fn extract(tdms: &TdmsFile, kind: SignalKind, cfg: &PipelineConfig) -> Result<ChannelSet, StimError> {
    let loader = &cfg.loader;
    let mut set = ChannelSet::new();

    match kind {
        SignalKind::Ephys => {
            let group = find_group(tdms, &loader.group_candidates)?;
            let amps: Vec<&TdmsChannel> = group
                .channels
                .iter()
                .filter(|c| c.ni_channel_name().contains(EPHYS_MARKER))
                .collect();
            if !amps.is_empty() {
                let rate = group_sample_rate(group, &amps)?;
                for (i, amp) in amps.iter().enumerate() {
                    set.insert(Channel::new(format!("amp_{}", i), amp.data.clone(), rate));
                }
            }
        }
        SignalKind::BloodPressure => {
            let group = find_group(tdms, &loader.group_candidates)?;
            let channels = BP_CHANNELS
                .iter()
                .map(|name| require(group, name))
                .collect::<Result<Vec<_>, _>>()?;
            let rate = group_sample_rate(group, &channels)?;
            for (name, bp) in BP_CHANNELS.iter().zip(channels) {
                set.insert(Channel::new(*name, bp.data.mapv(|v| v * BP_TO_MMHG), rate));
            }
        }
        SignalKind::Physio => {
            let group = tdms
                .group(SERIAL_GROUP)
                .ok_or_else(|| StimError::GroupNotFound(vec![SERIAL_GROUP.to_string()]))?;
            for (serial, name) in SERIAL_CHANNELS {
                let tdms_channel = require(group, serial)?;
                let increment = tdms_channel.wf_increment()? / SERIAL_INCREMENT_CORRECTION;
                set.insert(Channel::from_increment(name, tdms_channel.data.clone(), increment));
            }
        }
        SignalKind::Stim => {
            let group = find_group(tdms, &loader.group_candidates)?;
            set.insert(to_channel(require(group, &cfg.stim.channel)?, &cfg.stim.channel)?);
            return Ok(set);
        }
    }

    if let Some(hz) = loader.resample.for_kind(kind) {
        for channel in set.iter_mut() {
            if channel.sample_rate > hz {
                *channel = downsample(channel, hz)?;
            }
        }
    }

    Ok(set)
}

/// Loads the logical channels of one kind from a single file.
pub fn load_signals<P: AsRef<Path>>(path: P, kind: SignalKind, cfg: &PipelineConfig) -> Result<ChannelSet, StimError> {
    let tdms = load_file(path)?;
    extract(&tdms, kind, cfg)
}

/// Loads the logical channels of one kind from every file, in parallel.
///
/// The returned sets are in the same order as `paths`.
pub fn load_segments<P: AsRef<Path> + Sync>(
    paths: &[P],
    kind: SignalKind,
    cfg: &PipelineConfig,
) -> Result<Vec<ChannelSet>, StimError> {
    info!("Loading {:?} signals from {} file(s)", kind, paths.len());
    paths
        .par_iter()
        .map(|path| load_signals(path, kind, cfg))
        .collect()
}

/// Loads several kinds of signals from every file, reading each file once.
///
/// Returns one entry per element of `kinds`, in the same order, holding the
/// per-file sets in the order of `paths`. A file that cannot be read fails
/// the whole call; a kind missing from a file only fails its own entry.
pub fn load_segments_by_kind<P: AsRef<Path> + Sync>(
    paths: &[P],
    kinds: &[SignalKind],
    cfg: &PipelineConfig,
) -> Result<Vec<Result<Vec<ChannelSet>, StimError>>, StimError> {
    info!("Loading {:?} signals from {} file(s)", kinds, paths.len());
    let per_file = paths
        .par_iter()
        .map(|path| {
            let tdms = load_file(path)?;
            Ok(kinds.iter().map(|&kind| extract(&tdms, kind, cfg)).collect::<Vec<_>>())
        })
        .collect::<Result<Vec<_>, StimError>>()?;

    let mut by_kind: Vec<Vec<Result<ChannelSet, StimError>>> = kinds.iter().map(|_| Vec::new()).collect();
    for sets in per_file {
        for (segments, set) in by_kind.iter_mut().zip(sets) {
            segments.push(set);
        }
    }
    Ok(by_kind
        .into_iter()
        .map(|segments| segments.into_iter().collect())
        .collect())
}

/// Joins the per-file segments of a recording, in order, into one set.
///
/// Every segment must hold the channels of the first one at (nominally) the
/// same rate. Rates within 1% of each other are treated as identical.
///
/// # Errors
///
/// * `ChannelNotFound` if a later segment lacks a channel of the first
/// * `RateMismatch` if a channel's rate drifts by more than 1%
pub fn concatenate(segments: &[ChannelSet]) -> Result<ChannelSet, StimError> {
    let Some((first, rest)) = segments.split_first() else {
        return Ok(ChannelSet::new());
    };

    let mut combined = ChannelSet::new();
    for reference in first.iter() {
        let mut parts = vec![reference.samples.view()];
        for (i, segment) in rest.iter().enumerate() {
            let next = segment
                .get(&reference.name)
                .ok_or_else(|| StimError::ChannelNotFound(format!("{} in segment {}", reference.name, i + 1)))?;
            verify_rate_compatibility(reference, next, i + 1)?;
            parts.push(next.samples.view());
        }
        let samples = join(Axis(0), &parts).map_err(|_| StimError::DimensionError {
            shape: parts.iter().map(|p| p.len()).collect(),
        })?;
        combined.insert(Channel::new(reference.name.clone(), samples, reference.sample_rate));
    }

    debug!(
        "Joined {} segment(s), {:.2} s total",
        segments.len(),
        combined.duration()
    );
    Ok(combined)
}

/// Verifies that two segments of one channel share a nominal rate.
fn verify_rate_compatibility(reference: &Channel, next: &Channel, segment: usize) -> Result<(), StimError> {
    if (reference.sample_rate - next.sample_rate).abs() > RATE_TOLERANCE * reference.sample_rate {
        return Err(StimError::RateMismatch {
            context: format!("{} segment {}", reference.name, segment),
            expected: reference.sample_rate,
            found: next.sample_rate,
        });
    }
    Ok(())
}

/// A source of per-file channel data.
///
/// The stim locator only needs one channel per file; this trait keeps it
/// independent of the file format.
pub trait SegmentSource {
    /// Loads one logical channel from one file.
    fn load_channel(&self, path: &Path, name: &str) -> Result<Channel, StimError>;
}

/// [`SegmentSource`] reading TDMS files from disk.
#[derive(Debug, Clone)]
pub struct TdmsSource {
    group_candidates: Vec<String>,
}

impl TdmsSource {
    /// Creates a source that looks up channels in the configured groups.
    pub fn new(loader: &LoaderConfig) -> Self {
        TdmsSource {
            group_candidates: loader.group_candidates.clone(),
        }
    }
}

impl Default for TdmsSource {
    fn default() -> Self {
        TdmsSource::new(&LoaderConfig::default())
    }
}

impl SegmentSource for TdmsSource {
    fn load_channel(&self, path: &Path, name: &str) -> Result<Channel, StimError> {
        info!("Loading {}", path.display());
        let tdms = load_file(path)?;
        let group = find_group(&tdms, &self.group_candidates)?;
        to_channel(require(group, name)?, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResampleRates;
    use ndarray::{array, Array1};
    use std::collections::BTreeMap;

    fn tdms_channel(name: &str, data: Array1<f64>, increment: f64) -> TdmsChannel {
        let mut properties = BTreeMap::new();
        properties.insert("wf_increment".to_string(), PropertyValue::Float(increment));
        TdmsChannel {
            name: name.to_string(),
            properties,
            data,
        }
    }

    fn tdms_file(groups: Vec<(&str, Vec<TdmsChannel>)>) -> TdmsFile {
        TdmsFile {
            version: 4713,
            num_segments: 1,
            properties: BTreeMap::new(),
            groups: groups
                .into_iter()
                .map(|(name, channels)| TdmsGroup {
                    name: name.to_string(),
                    properties: BTreeMap::new(),
                    channels,
                })
                .collect(),
        }
    }

    #[test]
    fn group_candidates_first_present_wins() {
        let tdms = tdms_file(vec![
            ("Untitled", vec![tdms_channel("stim_mon", array![0.0], 1e-3)]),
            ("ephys", vec![tdms_channel("stim_mon", array![1.0], 4e-5)]),
        ]);
        let cfg = PipelineConfig::default();
        let set = extract(&tdms, SignalKind::Stim, &cfg).unwrap();
        assert_eq!(set.get("stim_mon").unwrap().samples, array![1.0]);

        let none = tdms_file(vec![("other", vec![])]);
        assert!(matches!(
            extract(&none, SignalKind::Stim, &cfg),
            Err(StimError::GroupNotFound(_))
        ));
    }

    #[test]
    fn ephys_channels_renamed_in_file_order() {
        let tdms = tdms_file(vec![(
            "Group Name",
            vec![
                tdms_channel("amp_3", array![3.0], 4e-5),
                tdms_channel("stim_mon", array![0.0], 4e-5),
                tdms_channel("amplifier", array![7.0], 4e-5),
            ],
        )]);
        let set = extract(&tdms, SignalKind::Ephys, &PipelineConfig::default()).unwrap();
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["amp_0", "amp_1"]);
        assert_eq!(set.get("amp_1").unwrap().samples, array![7.0]);
    }

    #[test]
    fn blood_pressure_scaled_to_mmhg() {
        let channels = BP_CHANNELS
            .iter()
            .map(|name| tdms_channel(name, array![0.8, 0.9], 1e-3))
            .collect();
        let tdms = tdms_file(vec![("Group Name", channels)]);
        let set = extract(&tdms, SignalKind::BloodPressure, &PipelineConfig::default()).unwrap();
        assert_eq!(set.len(), 4);
        approx::assert_abs_diff_eq!(set.get("mean_bp").unwrap().samples[1], 90.0, epsilon = 1e-9);
    }

    #[test]
    fn physio_increment_corrected() {
        let channels = SERIAL_CHANNELS
            .iter()
            .map(|(serial, _)| tdms_channel(serial, Array1::zeros(10), 1.0))
            .collect();
        let tdms = tdms_file(vec![("Untitled", channels)]);
        let set = extract(&tdms, SignalKind::Physio, &PipelineConfig::default()).unwrap();
        let core = set.get("core_temp").unwrap();
        approx::assert_abs_diff_eq!(core.sample_rate, 10.0, epsilon = 1e-9);
        approx::assert_abs_diff_eq!(core.duration(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn group_rate_must_be_shared() {
        let group = TdmsGroup {
            name: "Group Name".to_string(),
            properties: BTreeMap::new(),
            channels: vec![
                tdms_channel("a", array![0.0], 1e-3),
                tdms_channel("b", array![0.0], 2e-3),
            ],
        };
        let all: Vec<&TdmsChannel> = group.channels.iter().collect();
        assert!(matches!(
            group_sample_rate(&group, &all),
            Err(StimError::RateMismatch { .. })
        ));
        approx::assert_abs_diff_eq!(group_sample_rate(&group, &all[..1]).unwrap(), 1000.0, epsilon = 1e-9);
        assert!(matches!(
            group_sample_rate(&group, &[]),
            Err(StimError::ChannelNotFound(_))
        ));
    }

    #[test]
    fn blood_pressure_rates_must_agree() {
        let channels = BP_CHANNELS
            .iter()
            .map(|name| {
                let increment = if *name == "pulse_wf" { 2e-3 } else { 1e-3 };
                tdms_channel(name, array![0.8, 0.9], increment)
            })
            .collect();
        let tdms = tdms_file(vec![("Group Name", channels)]);
        assert!(matches!(
            extract(&tdms, SignalKind::BloodPressure, &PipelineConfig::default()),
            Err(StimError::RateMismatch { .. })
        ));

        // Channels outside the selection may run at other rates
        let tdms = tdms_file(vec![(
            "Group Name",
            vec![
                tdms_channel("amp_1", array![1.0], 4e-5),
                tdms_channel("temperature", array![37.0], 1.0),
            ],
        )]);
        let set = extract(&tdms, SignalKind::Ephys, &PipelineConfig::default()).unwrap();
        approx::assert_abs_diff_eq!(set.get("amp_0").unwrap().sample_rate, 25_000.0, epsilon = 1e-6);
    }

    #[test]
    fn decimation_follows_the_signal_kind() {
        let mut channels: Vec<TdmsChannel> = BP_CHANNELS
            .iter()
            .map(|name| tdms_channel(name, Array1::from_elem(1000, 0.8), 1e-3))
            .collect();
        channels.push(tdms_channel("amp_1", Array1::zeros(1000), 1e-3));
        channels.push(tdms_channel("stim_mon", Array1::zeros(1000), 1e-3));
        let tdms = tdms_file(vec![("Group Name", channels)]);

        let mut cfg = PipelineConfig::default();
        cfg.loader.resample = ResampleRates {
            blood_pressure: Some(100.0),
            ..ResampleRates::default()
        };

        let bp = extract(&tdms, SignalKind::BloodPressure, &cfg).unwrap();
        let mean = bp.get("mean_bp").unwrap();
        approx::assert_abs_diff_eq!(mean.sample_rate, 100.0, epsilon = 1e-9);
        assert_eq!(mean.len(), 100);
        approx::assert_abs_diff_eq!(mean.samples[50], 80.0, epsilon = 1e-9);

        // Kinds without a rate keep the native one
        let ephys = extract(&tdms, SignalKind::Ephys, &cfg).unwrap();
        assert_eq!(ephys.get("amp_0").unwrap().len(), 1000);

        cfg.loader.resample.ephys = Some(100.0);
        let stim = extract(&tdms, SignalKind::Stim, &cfg).unwrap();
        assert_eq!(stim.get("stim_mon").unwrap().len(), 1000);
        let ephys = extract(&tdms, SignalKind::Ephys, &cfg).unwrap();
        assert_eq!(ephys.get("amp_0").unwrap().len(), 100);
    }

    #[test]
    fn concatenate_joins_in_order() {
        let a: ChannelSet = vec![Channel::new("x", array![1.0, 2.0], 100.0)].into_iter().collect();
        let b: ChannelSet = vec![Channel::new("x", array![3.0], 100.5)].into_iter().collect();
        let joined = concatenate(&[a, b]).unwrap();
        assert_eq!(joined.get("x").unwrap().samples, array![1.0, 2.0, 3.0]);
        assert_eq!(joined.get("x").unwrap().sample_rate, 100.0);
    }

    #[test]
    fn concatenate_rejects_rate_drift_and_missing_channels() {
        let a: ChannelSet = vec![Channel::new("x", array![1.0], 100.0)].into_iter().collect();
        let fast: ChannelSet = vec![Channel::new("x", array![1.0], 110.0)].into_iter().collect();
        let other: ChannelSet = vec![Channel::new("y", array![1.0], 100.0)].into_iter().collect();
        assert!(matches!(
            concatenate(&[a.clone(), fast]),
            Err(StimError::RateMismatch { .. })
        ));
        assert!(matches!(
            concatenate(&[a, other]),
            Err(StimError::ChannelNotFound(_))
        ));
        assert!(concatenate(&[]).unwrap().is_empty());
    }
}
