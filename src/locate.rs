//! Locating the stimulation block across the files of one recording.
//!
//! The scan runs in two phases over the files in acquisition order:
//!
//! * **Seeking**: files are loaded one at a time until the detector finds a
//!   train. Its first active sample becomes the global onset and is never
//!   changed afterwards.
//! * **Extending**: starting with that file, each file where the detector
//!   still finds a train moves the global offset to its last active sample.
//!   The first file without a train ends the scan; files after it are never
//!   loaded.
//!
//! Only one stimulation block per recording is supported. A second block
//! separated from the first by a file without stimulation is ignored.

use log::{debug, info};
use std::borrow::Borrow;
use std::path::Path;

use crate::config::StimConfig;
use crate::detect::detect;
use crate::loader::SegmentSource;
use crate::types::{Channel, StimBlock, StimError};

/// Finds the stimulation block in a sequence of files.
///
/// # Arguments
///
/// * `source` - Loads the stim-monitor channel of one file
/// * `files` - Files in acquisition order (see [`crate::order_files`])
/// * `cfg` - Stim channel name and detector settings
///
/// # Errors
///
/// * `NotFound` if no file holds a stimulation train
/// * Any error of `source` for the files that had to be loaded
pub fn locate<S, P>(source: &S, files: &[P], cfg: &StimConfig) -> Result<StimBlock, StimError>
where
    S: SegmentSource + ?Sized,
    P: AsRef<Path>,
{
    let channels = files
        .iter()
        .map(|path| source.load_channel(path.as_ref(), &cfg.channel));
    locate_channels(channels, cfg)
}

/// Finds the stimulation block in a lazy sequence of per-file stim channels.
///
/// Items are pulled only as far as the scan needs them, so channels after
/// the end of the block are never produced. Items may be owned channels or
/// references to channels that are already loaded.
pub fn locate_channels<I, C>(channels: I, cfg: &StimConfig) -> Result<StimBlock, StimError>
where
    I: IntoIterator<Item = Result<C, StimError>>,
    C: Borrow<Channel>,
{
    let mut channels = channels.into_iter().enumerate();
    let mut offset_ms = 0.0;
    let mut scanned = 0;

    // Seeking
    let mut block = loop {
        let Some((index, channel)) = channels.next() else {
            info!("No stimulation found in {} file(s)", scanned);
            return Err(StimError::NotFound { files: scanned });
        };
        let channel = channel?;
        let channel: &Channel = channel.borrow();
        scanned += 1;

        if let Some((start, stop)) = detect(channel.samples.view(), cfg) {
            debug!("Stim onset in file {} at sample {}", index, start);
            let block = StimBlock {
                start_ms: offset_ms + channel.index_to_ms(start),
                stop_ms: offset_ms + channel.index_to_ms(stop),
                first_file: index,
                last_file: index,
            };
            offset_ms += channel.duration_ms();
            break block;
        }
        offset_ms += channel.duration_ms();
    };

    // Extending
    for (index, channel) in channels {
        let channel = channel?;
        let channel: &Channel = channel.borrow();
        match detect(channel.samples.view(), cfg) {
            Some((_, stop)) => {
                debug!("Stim continues in file {} until sample {}", index, stop);
                block.stop_ms = offset_ms + channel.index_to_ms(stop);
                block.last_file = index;
                offset_ms += channel.duration_ms();
            }
            None => break,
        }
    }

    info!(
        "Stimulation block {:.1} ms to {:.1} ms (files {} to {})",
        block.start_ms, block.stop_ms, block.first_file, block.last_file
    );
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    fn quiet(len: usize) -> Channel {
        Channel::new("stim_mon", Array1::zeros(len), 1000.0)
    }

    fn pulses(len: usize, first: usize, last: usize) -> Channel {
        let mut x = Array1::zeros(len);
        for i in (first..=last).step_by(100) {
            x[i] = 1.0;
        }
        Channel::new("stim_mon", x, 1000.0)
    }

    #[test]
    fn block_inside_one_file() {
        let channels = vec![Ok(quiet(10_000)), Ok(pulses(10_000, 1000, 5000)), Ok(quiet(10_000))];
        let block = locate_channels(channels, &StimConfig::default()).unwrap();
        assert_eq!(block.start_ms, 11_000.0);
        assert_eq!(block.stop_ms, 15_000.0);
        assert_eq!((block.first_file, block.last_file), (1, 1));
    }

    #[test]
    fn nothing_found_counts_files() {
        let channels = vec![Ok(quiet(5000)), Ok(quiet(5000))];
        match locate_channels(channels, &StimConfig::default()) {
            Err(StimError::NotFound { files }) => assert_eq!(files, 2),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn files_after_the_block_are_not_loaded() {
        let channels = vec![
            Ok(pulses(10_000, 1000, 9900)),
            Ok(quiet(10_000)),
            Err(StimError::ChannelNotFound("never loaded".to_string())),
        ];
        let block = locate_channels(channels, &StimConfig::default()).unwrap();
        assert_eq!(block.last_file, 0);
    }

    #[test]
    fn scans_channels_already_in_memory() {
        let loaded = vec![quiet(10_000), pulses(10_000, 2000, 6000)];
        let block = locate_channels(loaded.iter().map(Ok), &StimConfig::default()).unwrap();
        assert_eq!(block.start_ms, 12_000.0);
        assert_eq!(block.stop_ms, 16_000.0);
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn load_errors_propagate() {
        let channels = vec![Ok(quiet(100)), Err(StimError::ChannelNotFound("stim_mon".to_string()))];
        assert!(matches!(
            locate_channels(channels, &StimConfig::default()),
            Err(StimError::ChannelNotFound(_))
        ));
    }
}
