use ndarray::Array1;
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A single named time series sampled at one constant rate.
///
/// Every channel implicitly starts at time 0. Channels that were split across
/// several files are concatenated into one `Channel` before windowing.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    /// Logical channel name (e.g. `stim_mon`, `mean_bp`, `amp_0`)
    pub name: String,
    /// Sample values in acquisition order
    pub samples: Array1<f64>,
    /// Sample rate (Hz)
    pub sample_rate: f64,
}

impl Channel {
    /// Creates a channel from its samples and sample rate.
    pub fn new(name: impl Into<String>, samples: Array1<f64>, sample_rate: f64) -> Self {
        Channel {
            name: name.into(),
            samples,
            sample_rate,
        }
    }

    /// Creates a channel from its samples and the per-sample time step
    /// (`wf_increment`, in seconds) recorded by the acquisition software.
    pub fn from_increment(name: impl Into<String>, samples: Array1<f64>, wf_increment: f64) -> Self {
        Channel::new(name, samples, 1.0 / wf_increment)
    }

    /// Number of samples in the channel.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if the channel holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Time between consecutive samples, in seconds.
    pub fn wf_increment(&self) -> f64 {
        1.0 / self.sample_rate
    }

    /// Returns the duration of the channel in seconds.
    ///
    /// This is an estimate reconstructed from the sample count and the
    /// wf-increment, since individual samples carry no timestamp.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate
    }

    /// Returns the duration of the channel in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        self.duration() * 1000.0
    }

    /// Converts a sample index of this channel to milliseconds from its start.
    pub fn index_to_ms(&self, index: usize) -> f64 {
        index as f64 / self.sample_rate * 1000.0
    }
}

/// A set of logical channels keyed by name.
///
/// Produced by the loader for one file, or by concatenating the per-file sets
/// of one recording.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelSet {
    /// Channels keyed by logical name
    pub channels: BTreeMap<String, Channel>,
}

impl ChannelSet {
    /// Creates an empty channel set.
    pub fn new() -> Self {
        ChannelSet::default()
    }

    /// Adds a channel, replacing any channel with the same name.
    pub fn insert(&mut self, channel: Channel) {
        self.channels.insert(channel.name.clone(), channel);
    }

    /// Looks up a channel by logical name.
    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    /// Looks up a channel by logical name for in-place modification.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Channel> {
        self.channels.get_mut(name)
    }

    /// Channel names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    /// Number of channels in the set.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Returns true if the set holds no channels.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Iterates over the channels.
    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    /// Iterates mutably over the channels.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Channel> {
        self.channels.values_mut()
    }

    /// Duration of the longest channel in seconds, or 0.0 for an empty set.
    pub fn duration(&self) -> f64 {
        self.iter().map(Channel::duration).fold(0.0, f64::max)
    }
}

impl FromIterator<Channel> for ChannelSet {
    fn from_iter<I: IntoIterator<Item = Channel>>(iter: I) -> Self {
        let mut set = ChannelSet::new();
        for channel in iter {
            set.insert(channel);
        }
        set
    }
}

/// The single stimulation block of an experiment.
///
/// Times are in milliseconds relative to the start of the first file of the
/// recording. The block is computed once and never modified afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StimBlock {
    /// Stimulation onset (ms)
    pub start_ms: f64,
    /// Stimulation offset (ms)
    pub stop_ms: f64,
    /// Index (in acquisition order) of the file holding the onset
    pub first_file: usize,
    /// Index (in acquisition order) of the file holding the offset
    pub last_file: usize,
}

impl StimBlock {
    /// Length of the stimulation block in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        self.stop_ms - self.start_ms
    }
}

/// Signals cut around the stimulation block and re-based on stim onset.
///
/// Every channel covers the same absolute interval
/// `[onset - pad, offset + pad]`, but keeps its own native sample count.
///
/// # Examples
///
/// ```
/// use ndarray::Array1;
/// use tdms_stim::{assemble, Channel, ChannelSet, StimBlock};
///
/// let mut set = ChannelSet::new();
/// set.insert(Channel::new("mean_bp", Array1::from_elem(1000, 80.0), 100.0));
///
/// let block = StimBlock { start_ms: 2000.0, stop_ms: 5000.0, first_file: 0, last_file: 0 };
/// let window = assemble(&mut set, &block, 0.0, None).unwrap();
///
/// assert_eq!(window.start_ms, 0.0);
/// assert_eq!(window.stop_ms, 3000.0);
/// let tbase = window.time_base("mean_bp").unwrap();
/// assert_eq!(tbase.len(), window.channels["mean_bp"].len());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedWindow {
    /// Sliced samples keyed by channel name
    pub channels: BTreeMap<String, Array1<f64>>,
    /// Window start relative to stim onset (ms), always 0
    pub start_ms: f64,
    /// Stim offset relative to stim onset (ms)
    pub stop_ms: f64,
    /// Padding before the onset and after the offset (ms)
    pub pad_ms: f64,
}

impl AlignedWindow {
    /// Returns the time base of one channel in milliseconds relative to the
    /// stim onset, spanning `[-pad, stop + pad]` over the channel's samples.
    ///
    /// Returns `None` if no channel with that name is present.
    pub fn time_base(&self, name: &str) -> Option<Array1<f64>> {
        self.channels.get(name).map(|samples| {
            Array1::linspace(-self.pad_ms, self.stop_ms + self.pad_ms, samples.len())
        })
    }

    /// Names of the channels in the window.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }
}

/// A property value attached to a TDMS file, group or channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Any signed integer type
    Int(i64),
    /// Any unsigned integer type
    UInt(u64),
    /// Single or double precision float
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Boolean
    Bool(bool),
    /// LabVIEW timestamp: seconds since 1904-01-01 UTC plus 2^-64 fractions
    Timestamp {
        /// Whole seconds since the LabVIEW epoch
        seconds: i64,
        /// Positive fractions of a second (units of 2^-64 s)
        fractions: u64,
    },
}

impl PropertyValue {
    /// Returns the value as a float if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(v) => Some(*v as f64),
            PropertyValue::UInt(v) => Some(*v as f64),
            PropertyValue::Float(v) => Some(*v),
            PropertyValue::Timestamp { seconds, fractions } => {
                Some(*seconds as f64 + *fractions as f64 / 2f64.powi(64))
            }
            PropertyValue::String(_) | PropertyValue::Bool(_) => None,
        }
    }

    /// Returns the value as a string slice if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// A channel object of a TDMS file.
#[derive(Debug, Clone)]
pub struct TdmsChannel {
    /// Channel name as stored in the object path
    pub name: String,
    /// Channel properties (e.g. `wf_increment`, `NI_ChannelName`)
    pub properties: BTreeMap<String, PropertyValue>,
    /// Raw data from every segment, converted to `f64`
    pub data: Array1<f64>,
}

impl TdmsChannel {
    /// Returns the per-sample time step (`wf_increment` property) in seconds.
    pub fn wf_increment(&self) -> Result<f64, StimError> {
        self.properties
            .get("wf_increment")
            .and_then(PropertyValue::as_f64)
            .filter(|inc| *inc > 0.0)
            .ok_or_else(|| StimError::MissingProperty {
                object: self.name.clone(),
                property: "wf_increment",
            })
    }

    /// Returns the sample rate (Hz) derived from the wf-increment.
    pub fn sample_rate(&self) -> Result<f64, StimError> {
        Ok(1.0 / self.wf_increment()?)
    }

    /// Returns the duration of the channel data in seconds.
    pub fn duration(&self) -> Result<f64, StimError> {
        Ok(self.data.len() as f64 * self.wf_increment()?)
    }

    /// Returns the hardware channel name (`NI_ChannelName`), falling back to
    /// the object name when the property is absent.
    pub fn ni_channel_name(&self) -> &str {
        self.properties
            .get("NI_ChannelName")
            .and_then(PropertyValue::as_str)
            .unwrap_or(&self.name)
    }
}

/// A group object of a TDMS file and the channels it contains.
#[derive(Debug, Clone)]
pub struct TdmsGroup {
    /// Group name as stored in the object path
    pub name: String,
    /// Group properties
    pub properties: BTreeMap<String, PropertyValue>,
    /// Channels in the order they first appeared in the file
    pub channels: Vec<TdmsChannel>,
}

impl TdmsGroup {
    /// Looks up a channel of this group by name.
    pub fn channel(&self, name: &str) -> Option<&TdmsChannel> {
        self.channels.iter().find(|c| c.name == name)
    }
}

/// Complete representation of a TDMS file, including metadata and data.
///
/// This is the struct returned by [`crate::reader::load_file`].
///
/// # Examples
///
/// ```no_run
/// use tdms_stim::load;
///
/// let tdms = load("path/to/experiment_DAQ_0001.tdms").unwrap();
/// if let Some(stim) = tdms.channel("Group Name", "stim_mon") {
///     println!("{} samples at {} Hz", stim.data.len(), stim.sample_rate().unwrap());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct TdmsFile {
    /// TDMS format version of the first segment (4712 or 4713)
    pub version: u32,
    /// Number of segments read from the file
    pub num_segments: usize,
    /// File (root object) properties
    pub properties: BTreeMap<String, PropertyValue>,
    /// Groups in the order they first appeared in the file
    pub groups: Vec<TdmsGroup>,
}

impl TdmsFile {
    /// Looks up a group by name.
    pub fn group(&self, name: &str) -> Option<&TdmsGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Looks up a channel by group and channel name.
    pub fn channel(&self, group: &str, name: &str) -> Option<&TdmsChannel> {
        self.group(group).and_then(|g| g.channel(name))
    }

    /// Names of all groups in the file.
    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|g| g.name.as_str())
    }

    /// Total number of channels across all groups.
    pub fn num_channels(&self) -> usize {
        self.groups.iter().map(|g| g.channels.len()).sum()
    }
}

/// Error types for stimulation detection, windowing and TDMS loading.
#[derive(Debug, Error)]
pub enum StimError {
    /// No stimulation train was detected in any file of the sequence
    #[error("no stimulation train detected in {files} file(s)")]
    NotFound {
        /// Number of files that were scanned
        files: usize,
    },
    /// More than one file without a numeric suffix was found in one group
    #[error("{} un-numbered files found where at most one is expected: {files:?}", files.len())]
    AmbiguousSegment {
        /// The un-numbered files, in the order they were received
        files: Vec<PathBuf>,
    },
    /// The signal is not one-dimensional or is too short to process
    #[error("expected a one-dimensional signal with at least 2 samples, got shape {shape:?}")]
    DimensionError {
        /// Shape of the rejected input
        shape: Vec<usize>,
    },
    /// Channels that must share one sample rate do not
    #[error("sample rate mismatch in {context}: {expected} Hz vs {found} Hz")]
    RateMismatch {
        /// Where the mismatch was detected (group, channel or file)
        context: String,
        /// Rate of the reference channel or segment (Hz)
        expected: f64,
        /// Conflicting rate (Hz)
        found: f64,
    },
    /// A numeric parameter is out of range
    #[error("invalid parameter `{name}`: {value}")]
    InvalidParameter {
        /// Parameter name
        name: &'static str,
        /// Rejected value
        value: f64,
    },
    /// A requested channel was not found
    #[error("channel not found: {0}")]
    ChannelNotFound(String),
    /// A required property is missing or invalid
    #[error("missing or invalid property `{property}` on `{object}`")]
    MissingProperty {
        /// Object (channel or group) name
        object: String,
        /// Property name
        property: &'static str,
    },
    /// None of the candidate group names exist in the file
    #[error("none of the groups {0:?} found in file")]
    GroupNotFound(Vec<String>),
    /// The file is not a TDMS file
    #[error("unrecognized file format: {0}")]
    UnrecognizedFileFormat(String),
    /// A TDMS data type this reader does not decode
    #[error("unsupported TDMS data type 0x{0:x}")]
    UnsupportedDataType(u32),
    /// A TDMS raw data layout this reader does not decode
    #[error("unsupported TDMS layout: {0}")]
    UnsupportedLayout(String),
    /// An I/O error occurred during file reading
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// The configuration file could not be parsed or written
    #[error("configuration error: {0}")]
    Config(#[from] serde_yaml::Error),
}
