pub mod config;
pub mod detect;
pub mod files;
pub mod loader;
pub mod locate;
pub mod outliers;
mod reader;
pub mod resample;
pub mod types;
pub mod window;

use log::info;
use std::path::Path;

// Re-export the main entry points
pub use config::{
    load_config, save_config, LoaderConfig, OutlierPolicy, PipelineConfig, ResampleRates, StimConfig,
    ThresholdRule, WindowConfig,
};
pub use detect::detect;
pub use files::{order_files, sort_files, FileGroups, OrderedFiles};
pub use loader::{concatenate, load_segments, load_segments_by_kind, SegmentSource, SignalKind, TdmsSource};
pub use locate::{locate, locate_channels};
pub use outliers::{remove_outliers, remove_outliers_nd};
pub use types::*;
pub use window::{assemble, assemble_between};

/// Loads a TDMS file and returns a struct representation
///
/// # Examples
///
/// ```no_run
/// use tdms_stim::load;
///
/// let result = load("path/to/experiment_DAQ_0001.tdms");
/// match result {
///     Ok(tdms) => println!("{} groups, {} channels", tdms.groups.len(), tdms.num_channels()),
///     Err(e) => println!("Error loading file: {}", e),
/// }
/// ```
pub fn load<P: AsRef<Path>>(file_path: P) -> Result<TdmsFile, StimError> {
    reader::load_file(file_path)
}

/// Everything extracted from one experiment directory.
#[derive(Debug)]
pub struct Experiment {
    /// Discovered files, grouped and in acquisition order
    pub files: FileGroups,
    /// The stimulation block
    pub block: StimBlock,
    /// Blood pressure, physiological, ephys and stim channels cut around the block
    pub window: AlignedWindow,
    /// Non-fatal problems found along the way (e.g. `AmbiguousSegment`)
    pub advisories: Vec<StimError>,
}

/// Runs the full pipeline on one experiment directory.
///
/// 1. Discovers and orders the TDMS files
/// 2. Reads every high-speed file once, pulling out the stim, ephys and (when
///    there are no low-speed files) blood pressure channels
/// 3. Locates the stimulation block in the stim channels
/// 4. Loads the remaining blood pressure and physiological channels and joins
///    the segments of every kind
/// 5. Cuts all of them around the block; outlier removal (if configured) is
///    applied to the blood pressure and physiological channels only
///
/// # Examples
///
/// ```no_run
/// use tdms_stim::{process_experiment, PipelineConfig};
///
/// let experiment = process_experiment("data/exp12", &PipelineConfig::default()).unwrap();
/// println!("stim lasted {} ms", experiment.block.duration_ms());
/// for name in experiment.window.names() {
///     println!("{}: {} samples", name, experiment.window.channels[name].len());
/// }
/// ```
pub fn process_experiment<P: AsRef<Path>>(dir: P, cfg: &PipelineConfig) -> Result<Experiment, StimError> {
    cfg.validate()?;

    let files = sort_files(dir)?;
    files.summary();

    let advisories: Vec<StimError> = [&files.highspeed, &files.lowspeed, &files.physio]
        .into_iter()
        .filter_map(|group| order_files(group).advisory)
        .collect();

    if files.highspeed.is_empty() {
        return Err(StimError::NotFound { files: 0 });
    }

    let bp_in_highspeed = files.lowspeed.is_empty();
    let mut kinds = vec![SignalKind::Stim, SignalKind::Ephys];
    if bp_in_highspeed {
        kinds.push(SignalKind::BloodPressure);
    }
    let mut loaded = load_segments_by_kind(files.highspeed.as_slice(), &kinds, cfg)?.into_iter();

    let stim = loaded.next().unwrap_or_else(|| Ok(Vec::new()))?;
    let stim_channels = stim.iter().map(|set| {
        set.get(&cfg.stim.channel)
            .ok_or_else(|| StimError::ChannelNotFound(cfg.stim.channel.clone()))
    });
    let block = locate_channels(stim_channels, &cfg.stim)?;

    let mut segments = vec![(SignalKind::Stim, stim)];
    for (&kind, parts) in kinds[1..].iter().zip(loaded) {
        segments.push((kind, parts?));
    }
    if !bp_in_highspeed {
        let paths = files.blood_pressure();
        segments.push((SignalKind::BloodPressure, load_segments(paths, SignalKind::BloodPressure, cfg)?));
    }
    if files.physio.is_empty() {
        info!("No files for {:?} signals", SignalKind::Physio);
    } else {
        segments.push((SignalKind::Physio, load_segments(files.physio.as_slice(), SignalKind::Physio, cfg)?));
    }

    let pad = cfg.window.pad_minutes;
    let mut window = AlignedWindow {
        channels: Default::default(),
        start_ms: 0.0,
        stop_ms: block.duration_ms(),
        pad_ms: 0.0,
    };

    for (kind, parts) in segments {
        let outliers = match kind {
            SignalKind::BloodPressure | SignalKind::Physio => cfg.outliers.as_ref(),
            SignalKind::Ephys | SignalKind::Stim => None,
        };
        let mut channels = concatenate(&parts)?;
        let part = assemble(&mut channels, &block, pad, outliers)?;
        window.pad_ms = part.pad_ms;
        window.channels.extend(part.channels);
    }

    Ok(Experiment {
        files,
        block,
        window,
        advisories,
    })
}
