//! Discovery and acquisition ordering of the TDMS files of one experiment.
//!
//! LabVIEW splits a long recording into fixed-size files. The first file of a
//! sequence carries no number; the following ones end in a zero-padded
//! four-digit counter, e.g.
//!
//! ```text
//! exp12_DAQ.tdms, exp12_DAQ_0001.tdms, exp12_DAQ_0002.tdms, ...
//! ```
//!
//! Files are also classified by the naming conventions of the different rigs
//! and acquisition-software versions (`DAQ`/`ephys`, `bpMon`, `serial`/`physioMon`).

use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::StimError;

/// Number of trailing stem characters holding the sequence number.
const SEQUENCE_DIGITS: usize = 4;

/// File extension of TDMS data files (index files end in `.tdms_index`).
const TDMS_EXTENSION: &str = "tdms";

/// TDMS files of one experiment directory, grouped by what they contain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileGroups {
    /// Serial-port physiological monitor files (`serial`, `physioMon`)
    pub physio: Vec<PathBuf>,
    /// High-speed DAQ files: ephys, stim monitor and sometimes BP (`DAQ`, `ephys`)
    pub highspeed: Vec<PathBuf>,
    /// Low-speed blood-pressure monitor files (`bpMon`)
    pub lowspeed: Vec<PathBuf>,
    /// Recruitment-curve files (`uA`, `mA`)
    pub recruitment: Vec<PathBuf>,
}

impl FileGroups {
    /// Files holding blood-pressure channels.
    ///
    /// Rigs with a separate BP monitor write `bpMon` files; older rigs record
    /// BP alongside the ephys data in the high-speed files.
    pub fn blood_pressure(&self) -> &[PathBuf] {
        if self.lowspeed.is_empty() {
            &self.highspeed
        } else {
            &self.lowspeed
        }
    }

    /// Returns true if no TDMS file was discovered.
    pub fn is_empty(&self) -> bool {
        self.physio.is_empty()
            && self.highspeed.is_empty()
            && self.lowspeed.is_empty()
            && self.recruitment.is_empty()
    }

    /// Logs a summary of the discovered files.
    pub fn summary(&self) {
        log_group("high-speed file", &self.highspeed);
        log_group("low-speed file", &self.lowspeed);
        log_group("physiological monitor record", &self.physio);
        log_group("recruitment curve file", &self.recruitment);
    }
}

fn log_group(label: &str, files: &[PathBuf]) {
    info!(
        "Discovered {} {}{}",
        files.len(),
        label,
        if files.len() != 1 { "s" } else { "" }
    );
    for file in files {
        info!(" - {}", file.file_name().unwrap_or_default().to_string_lossy());
    }
}

/// Finds all TDMS files in a directory and groups them by filename convention.
///
/// A file can land in more than one group (e.g. a recruitment-curve file
/// recorded by the DAQ). Files within each group are returned in
/// acquisition order (see [`order_files`]).
///
/// # Arguments
///
/// * `dir` - Experiment directory to search (not recursive)
///
/// # Errors
///
/// Returns `Io` if the directory cannot be read.
pub fn sort_files<P: AsRef<Path>>(dir: P) -> Result<FileGroups, StimError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir.as_ref())? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == TDMS_EXTENSION) {
            files.push(path);
        }
    }
    Ok(classify(&files))
}

/// Groups file paths by filename convention without touching the filesystem.
pub fn classify(files: &[PathBuf]) -> FileGroups {
    let matching = |patterns: &[&str]| -> Vec<PathBuf> {
        let selected: Vec<PathBuf> = files
            .iter()
            .filter(|path| {
                let name = path.file_name().unwrap_or_default().to_string_lossy();
                patterns.iter().any(|p| name.contains(p))
            })
            .cloned()
            .collect();
        order_files(&selected).paths
    };

    FileGroups {
        physio: matching(&["serial", "physioMon"]),
        highspeed: matching(&["DAQ", "ephys"]),
        lowspeed: matching(&["bpMon"]),
        recruitment: matching(&["uA", "mA"]),
    }
}

/// File paths in acquisition order, with an advisory for suspicious input.
#[derive(Debug)]
pub struct OrderedFiles {
    /// Paths in acquisition order (un-numbered first, then by sequence number)
    pub paths: Vec<PathBuf>,
    /// `AmbiguousSegment` when more than one un-numbered file was found
    pub advisory: Option<StimError>,
}

/// Returns the sequence number embedded at the end of a file stem, if any.
///
/// # Examples
///
/// ```
/// use tdms_stim::files::sequence_number;
///
/// assert_eq!(sequence_number("exp_DAQ_0012.tdms".as_ref()), Some(12));
/// assert_eq!(sequence_number("exp_DAQ.tdms".as_ref()), None);
/// ```
pub fn sequence_number(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    let tail = stem.get(stem.len().checked_sub(SEQUENCE_DIGITS)?..)?;
    if tail.bytes().all(|b| b.is_ascii_digit()) {
        tail.parse().ok()
    } else {
        None
    }
}

/// Orders the files of one recording by the acquisition sequence number.
///
/// Files without a sequence number are the first file of a LabVIEW sequence
/// and are placed before the numbered ones. More than one un-numbered file is
/// not fatal: all of them are kept (in the order received) ahead of the
/// numbered files and an `AmbiguousSegment` advisory is attached and logged.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use tdms_stim::order_files;
///
/// let files = vec![
///     PathBuf::from("exp_DAQ_0002.tdms"),
///     PathBuf::from("exp_DAQ.tdms"),
///     PathBuf::from("exp_DAQ_0001.tdms"),
/// ];
/// let ordered = order_files(&files);
/// assert_eq!(ordered.paths[0], PathBuf::from("exp_DAQ.tdms"));
/// assert_eq!(ordered.paths[2], PathBuf::from("exp_DAQ_0002.tdms"));
/// assert!(ordered.advisory.is_none());
/// ```
pub fn order_files<P: AsRef<Path>>(files: &[P]) -> OrderedFiles {
    let mut unnumbered = Vec::new();
    let mut numbered = Vec::new();

    for file in files {
        let path = file.as_ref().to_path_buf();
        match sequence_number(&path) {
            Some(n) => numbered.push((n, path)),
            None => unnumbered.push(path),
        }
    }

    // Stable sort keeps the received order for duplicate numbers
    numbered.sort_by_key(|(n, _)| *n);

    let advisory = if unnumbered.len() > 1 {
        warn!(
            "More than one un-numbered file detected; using {} as the first segment",
            unnumbered[0].display()
        );
        Some(StimError::AmbiguousSegment {
            files: unnumbered.clone(),
        })
    } else {
        None
    };

    let mut paths = unnumbered;
    paths.extend(numbered.into_iter().map(|(_, path)| path));

    OrderedFiles { paths, advisory }
}
