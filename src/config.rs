//! Pipeline configuration.
//!
//! [`PipelineConfig`] holds every tunable parameter of the stim-window
//! pipeline. All fields have defaults matching the acquisition rigs the
//! detector was tuned on (25 kHz stim monitor, ~80 samples between pulses).
//! Configurations can be stored as YAML:
//!
//! ```yaml
//! stim:
//!   channel: stim_mon
//!   rule: !Statistical
//!     k: 2.0
//!     decimation: 10
//!   min_dist: 50
//!   min_pulses: 30
//! outliers:
//!   max_perc_change: 0.25
//!   max_sigma: 5.0
//! window:
//!   pad_minutes: 5.0
//! loader:
//!   group_candidates: [Group Name, ephys, Untitled]
//!   resample:
//!     ephys: 5000.0
//!     blood_pressure: 100.0
//!     physio: null
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::loader::SignalKind;
use crate::types::StimError;

/// How a stim-monitor sample is judged "active".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ThresholdRule {
    /// Active if `|x| > threshold`.
    FixedBand {
        /// Absolute threshold in the channel's units
        threshold: f64,
    },
    /// Active if `|x - mean| > k * std`, with mean and std estimated from
    /// every `decimation`-th sample to remove the DC offset cheaply.
    Statistical {
        /// Number of standard deviations
        k: f64,
        /// Stride of the subsample used for mean/std
        decimation: usize,
    },
}

impl Default for ThresholdRule {
    fn default() -> Self {
        ThresholdRule::Statistical {
            k: 2.0,
            decimation: 10,
        }
    }
}

/// Stimulation detection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StimConfig {
    /// Logical name of the stim-monitor channel.
    ///
    /// Default: `"stim_mon"`.
    pub channel: String,

    /// Rule deciding which samples are active.
    ///
    /// Default: statistical, `k = 2`, every 10th sample.
    pub rule: ThresholdRule,

    /// Minimum gap (samples) between active samples that counts as a new pulse.
    ///
    /// Must exceed the spacing of samples within one pulse and stay below the
    /// pulse period. At 25 kHz the pulses are a little more than 80 samples
    /// apart.
    ///
    /// Default: `50`.
    pub min_dist: usize,

    /// Number of pulse gaps that must be exceeded to call it a stim train.
    ///
    /// Default: `30`.
    pub min_pulses: usize,
}

impl Default for StimConfig {
    fn default() -> Self {
        Self {
            channel: "stim_mon".to_string(),
            rule: ThresholdRule::default(),
            min_dist: 50,
            min_pulses: 30,
        }
    }
}

/// Outlier removal thresholds for physiological channels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierPolicy {
    /// Largest allowed point-to-point change as a fraction of the median.
    ///
    /// Default: `0.25`.
    pub max_perc_change: f64,

    /// Largest allowed distance from the median in standard deviations.
    ///
    /// Default: `5.0`.
    pub max_sigma: f64,
}

impl Default for OutlierPolicy {
    fn default() -> Self {
        Self {
            max_perc_change: 0.25,
            max_sigma: 5.0,
        }
    }
}

/// Window extraction settings.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Padding before the stim onset and after the stim offset, in minutes.
    ///
    /// Default: `0.0`.
    pub pad_minutes: f64,
}

/// File loading settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Group names tried in order when looking up DAQ channels; the first
    /// group present in a file wins.
    ///
    /// Default: `["Group Name", "ephys", "Untitled"]`.
    pub group_candidates: Vec<String>,

    /// Rates (Hz) each kind of signal is decimated to after loading.
    ///
    /// Default: keep every native rate.
    pub resample: ResampleRates,
}

/// Target rates for decimating each kind of signal; `None` keeps the native
/// rate. The stim monitor is never decimated.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResampleRates {
    /// Amplifier channels
    pub ephys: Option<f64>,
    /// Blood-pressure channels
    pub blood_pressure: Option<f64>,
    /// Serial-port physiological channels
    pub physio: Option<f64>,
}

impl ResampleRates {
    /// Returns the target rate for one kind of signal, if any.
    pub fn for_kind(&self, kind: SignalKind) -> Option<f64> {
        match kind {
            SignalKind::Ephys => self.ephys,
            SignalKind::BloodPressure => self.blood_pressure,
            SignalKind::Physio => self.physio,
            SignalKind::Stim => None,
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            group_candidates: vec![
                "Group Name".to_string(),
                "ephys".to_string(),
                "Untitled".to_string(),
            ],
            resample: ResampleRates::default(),
        }
    }
}

/// Configuration for the full pipeline.
///
/// All fields are `pub` so you can construct one with struct-update syntax:
///
/// ```
/// use tdms_stim::{PipelineConfig, WindowConfig};
///
/// let cfg = PipelineConfig {
///     window: WindowConfig { pad_minutes: 10.0 },
///     outliers: None,
///     ..PipelineConfig::default()
/// };
/// assert_eq!(cfg.stim.channel, "stim_mon");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Stim detection settings
    pub stim: StimConfig,
    /// Outlier removal applied to every windowed channel; `None` disables it
    pub outliers: Option<OutlierPolicy>,
    /// Window extraction settings
    pub window: WindowConfig,
    /// File loading settings
    pub loader: LoaderConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stim: StimConfig::default(),
            outliers: Some(OutlierPolicy::default()),
            window: WindowConfig::default(),
            loader: LoaderConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Checks that every numeric parameter is usable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` naming the first offending field.
    pub fn validate(&self) -> Result<(), StimError> {
        match self.stim.rule {
            ThresholdRule::FixedBand { threshold } => non_negative("threshold", threshold)?,
            ThresholdRule::Statistical { k, decimation } => {
                non_negative("k", k)?;
                if decimation == 0 {
                    return Err(StimError::InvalidParameter {
                        name: "decimation",
                        value: 0.0,
                    });
                }
            }
        }
        if let Some(policy) = &self.outliers {
            policy.validate()?;
        }
        non_negative("pad_minutes", self.window.pad_minutes)?;
        let rates = &self.loader.resample;
        for (name, rate) in [
            ("resample.ephys", rates.ephys),
            ("resample.blood_pressure", rates.blood_pressure),
            ("resample.physio", rates.physio),
        ] {
            if let Some(hz) = rate {
                if !(hz.is_finite() && hz > 0.0) {
                    return Err(StimError::InvalidParameter { name, value: hz });
                }
            }
        }
        Ok(())
    }
}

impl OutlierPolicy {
    /// Checks that both thresholds are finite and non-negative.
    pub fn validate(&self) -> Result<(), StimError> {
        non_negative("max_perc_change", self.max_perc_change)?;
        non_negative("max_sigma", self.max_sigma)
    }
}

pub(crate) fn non_negative(name: &'static str, value: f64) -> Result<(), StimError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(StimError::InvalidParameter { name, value })
    }
}

/// Loads a pipeline configuration from a YAML file.
///
/// Missing fields take their default values.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig, StimError> {
    let config_str = fs::read_to_string(path)?;
    let config: PipelineConfig = serde_yaml::from_str(&config_str)?;
    config.validate()?;
    Ok(config)
}

/// Saves a pipeline configuration as YAML.
pub fn save_config<P: AsRef<Path>>(config: &PipelineConfig, path: P) -> Result<(), StimError> {
    let yaml = serde_yaml::to_string(config)?;
    fs::write(path, yaml)?;
    Ok(())
}
