use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use log::{debug, info, warn};
use ndarray::Array1;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Instant;

use crate::types::*;

// Lead-in constants (from the NI TDMS file format description)
const TDMS_TAG: &[u8; 4] = b"TDSm";
const LEAD_IN_SIZE: u64 = 28;
const INCOMPLETE_SEGMENT: u64 = 0xFFFF_FFFF_FFFF_FFFF;

// Table of contents flags
const TOC_META_DATA: u32 = 1 << 1;
const TOC_NEW_OBJ_LIST: u32 = 1 << 2;
const TOC_RAW_DATA: u32 = 1 << 3;
const TOC_INTERLEAVED_DATA: u32 = 1 << 5;
const TOC_BIG_ENDIAN: u32 = 1 << 6;
const TOC_DAQMX_RAW_DATA: u32 = 1 << 7;

// Special raw data index values
const NO_RAW_DATA: u32 = 0xFFFF_FFFF;
const RAW_INDEX_MATCHES_PREVIOUS: u32 = 0x0000_0000;
const DAQMX_FORMAT_CHANGING_SCALER: u32 = 0x6912_0000;
const DAQMX_DIGITAL_LINE_SCALER: u32 = 0x6913_0000;

/// Data types that can appear in TDMS metadata and raw data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataType {
    Void,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    String,
    Bool,
    Timestamp,
}

impl DataType {
    fn from_code(code: u32) -> Result<Self, StimError> {
        Ok(match code {
            0x00 => DataType::Void,
            0x01 => DataType::I8,
            0x02 => DataType::I16,
            0x03 => DataType::I32,
            0x04 => DataType::I64,
            0x05 => DataType::U8,
            0x06 => DataType::U16,
            0x07 => DataType::U32,
            0x08 => DataType::U64,
            // Floats "with unit" share the plain float encoding
            0x09 | 0x19 => DataType::F32,
            0x0A | 0x1A => DataType::F64,
            0x20 => DataType::String,
            0x21 => DataType::Bool,
            0x44 => DataType::Timestamp,
            other => return Err(StimError::UnsupportedDataType(other)),
        })
    }

    /// Size of one value in bytes, or `None` for variable-length strings
    fn size(self) -> Option<u64> {
        match self {
            DataType::Void => Some(0),
            DataType::I8 | DataType::U8 | DataType::Bool => Some(1),
            DataType::I16 | DataType::U16 => Some(2),
            DataType::I32 | DataType::U32 | DataType::F32 => Some(4),
            DataType::I64 | DataType::U64 | DataType::F64 => Some(8),
            DataType::Timestamp => Some(16),
            DataType::String => None,
        }
    }
}

/// Raw data index of one object within one segment
#[derive(Debug, Clone, Copy)]
struct RawIndex {
    data_type: DataType,
    num_values: u64,
    total_size: u64,
}

// Helper struct to accumulate one object's metadata and data across segments
struct ObjectState {
    path: String,
    properties: BTreeMap<String, PropertyValue>,
    data: Vec<f64>,
    last_index: Option<RawIndex>,
}

// An object taking part in the current segment's object list
#[derive(Debug, Clone, Copy)]
struct ActiveObject {
    object: usize,
    index: Option<RawIndex>,
}

// Helper struct to store all object state while segments are being read
#[derive(Default)]
struct ReaderState {
    objects: Vec<ObjectState>,
    lookup: HashMap<String, usize>,
    active: Vec<ActiveObject>,
}

impl ReaderState {
    fn object_id(&mut self, path: &str) -> usize {
        if let Some(&id) = self.lookup.get(path) {
            return id;
        }
        let id = self.objects.len();
        self.objects.push(ObjectState {
            path: path.to_string(),
            properties: BTreeMap::new(),
            data: Vec::new(),
            last_index: None,
        });
        self.lookup.insert(path.to_string(), id);
        id
    }

    fn activate(&mut self, object: usize, index: Option<RawIndex>) {
        match self.active.iter_mut().find(|a| a.object == object) {
            Some(entry) => entry.index = index,
            None => self.active.push(ActiveObject { object, index }),
        }
    }
}

/// Loads a TDMS file and returns its groups, channels, properties and data.
///
/// Every segment of the file is read; channel data from successive segments is
/// appended in file order and converted to `f64`.
///
/// # Arguments
///
/// * `file_path` - Path to the `.tdms` file to load
///
/// # Returns
///
/// A `Result` containing either the loaded `TdmsFile` or an error.
///
/// # Errors
///
/// * `UnrecognizedFileFormat` if the file does not start with a TDMS lead-in.
/// * `UnsupportedLayout` for DAQmx raw data.
/// * `UnsupportedDataType` for data types without a numeric decoding.
/// * `Io` for read failures.
///
/// # Performance
///
/// This function uses buffered I/O. Whole channels are held in memory, so a
/// typical 600 MB acquisition file needs about as much RAM again once widened
/// to `f64`.
pub fn load_file<P: AsRef<Path>>(file_path: P) -> Result<TdmsFile, StimError> {
    let tic = Instant::now();
    let path = file_path.as_ref();

    // Open file with buffered reader for better I/O performance
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let mut reader = BufReader::with_capacity(65536, file); // 64KB buffer

    info!("Reading TDMS file {}", path.display());

    let mut state = ReaderState::default();
    let mut version = 0;
    let mut num_segments = 0;

    while reader.stream_position()? + LEAD_IN_SIZE <= file_size {
        let segment_version = read_segment(&mut reader, file_size, &mut state, num_segments)?;
        if num_segments == 0 {
            version = segment_version;
        }
        num_segments += 1;
    }

    let remaining = file_size - reader.stream_position()?;
    if num_segments == 0 {
        return Err(StimError::UnrecognizedFileFormat(format!(
            "{} is too small to be a TDMS file",
            path.display()
        )));
    }
    if remaining > 0 {
        warn!("Ignoring {} trailing bytes after the last TDMS segment", remaining);
    }

    let tdms = build_file(state, version, num_segments)?;
    print_file_summary(&tdms);

    debug!("Done! Elapsed time: {:.1} seconds", tic.elapsed().as_secs_f64());

    Ok(tdms)
}

/// Reads one segment (lead-in, metadata and raw data) and leaves the reader
/// positioned at the start of the next segment.
///
/// Returns the version number from the segment's lead-in.
fn read_segment<R: Read + Seek>(
    reader: &mut R,
    file_size: u64,
    state: &mut ReaderState,
    segment_number: usize,
) -> Result<u32, StimError> {
    let segment_start = reader.stream_position()?;

    let mut tag = [0u8; 4];
    reader.read_exact(&mut tag)?;
    if &tag != TDMS_TAG {
        return Err(StimError::UnrecognizedFileFormat(format!(
            "missing TDSm tag at byte {}",
            segment_start
        )));
    }
    // The table of contents is always little-endian; the rest of the lead-in
    // follows the segment's byte order
    let toc = reader.read_u32::<LittleEndian>()?;
    let (version, next_segment_offset, raw_data_offset) = if toc & TOC_BIG_ENDIAN != 0 {
        read_lead_in::<R, BigEndian>(reader)?
    } else {
        read_lead_in::<R, LittleEndian>(reader)?
    };

    if toc & TOC_DAQMX_RAW_DATA != 0 {
        return Err(StimError::UnsupportedLayout("DAQmx raw data".to_string()));
    }

    let overflow = || StimError::UnrecognizedFileFormat(format!("segment {} offsets overflow", segment_number));
    let body_start = segment_start.checked_add(LEAD_IN_SIZE).ok_or_else(overflow)?;
    let data_start = body_start.checked_add(raw_data_offset).ok_or_else(overflow)?;
    let declared_end = if next_segment_offset == INCOMPLETE_SEGMENT {
        None
    } else {
        Some(body_start.checked_add(next_segment_offset).ok_or_else(overflow)?)
    };
    let (segment_end, complete) = match declared_end {
        Some(end) if end <= file_size => (end, true),
        _ => {
            warn!("Segment {} is incomplete; reading data to end of file", segment_number);
            (file_size, false)
        }
    };

    debug!(
        "Segment {}: toc 0x{:x}, version {}, {} bytes of raw data",
        segment_number,
        toc,
        version,
        segment_end.saturating_sub(data_start)
    );

    let layout = SegmentLayout {
        toc,
        data_start,
        segment_end,
        complete,
    };
    if toc & TOC_BIG_ENDIAN != 0 {
        read_segment_body::<R, BigEndian>(reader, state, &layout)?;
    } else {
        read_segment_body::<R, LittleEndian>(reader, state, &layout)?;
    }

    reader.seek(SeekFrom::Start(segment_end))?;
    Ok(version)
}

/// Where a segment's raw data lies and whether the file holds all of it
struct SegmentLayout {
    toc: u32,
    data_start: u64,
    segment_end: u64,
    complete: bool,
}

/// Helper function to read the version and offsets that follow the table of
/// contents
fn read_lead_in<R: Read, E: ByteOrder>(reader: &mut R) -> Result<(u32, u64, u64), StimError> {
    let version = reader.read_u32::<E>()?;
    let next_segment_offset = reader.read_u64::<E>()?;
    let raw_data_offset = reader.read_u64::<E>()?;
    Ok((version, next_segment_offset, raw_data_offset))
}

/// Helper function to read the metadata and raw data of a segment in the
/// byte order given by its table of contents.
fn read_segment_body<R: Read + Seek, E: ByteOrder>(
    reader: &mut R,
    state: &mut ReaderState,
    layout: &SegmentLayout,
) -> Result<(), StimError> {
    let toc = layout.toc;
    if toc & TOC_META_DATA != 0 {
        if toc & TOC_NEW_OBJ_LIST != 0 {
            state.active.clear();
        }
        read_metadata::<R, E>(reader, state)?;
    }

    if toc & TOC_RAW_DATA != 0 {
        reader.seek(SeekFrom::Start(layout.data_start))?;
        let available = layout.segment_end.saturating_sub(layout.data_start);
        // A truncated final segment keeps whatever whole chunks it still holds
        if layout.complete {
            check_index_sizes(state, available)?;
        }
        if toc & TOC_INTERLEAVED_DATA != 0 {
            read_interleaved_data::<R, E>(reader, state, available)?;
        } else {
            read_contiguous_data::<R, E>(reader, state, available)?;
        }
    }

    Ok(())
}

/// Helper function to reject raw data indexes larger than their segment
fn check_index_sizes(state: &ReaderState, available: u64) -> Result<(), StimError> {
    let oversized = state
        .active
        .iter()
        .filter_map(|a| a.index)
        .find(|index| index.total_size > available);
    match oversized {
        Some(index) => Err(StimError::UnrecognizedFileFormat(format!(
            "raw data index of {} bytes exceeds the {} bytes of its segment",
            index.total_size, available
        ))),
        None => Ok(()),
    }
}

/// Helper function to read the object list of a segment
fn read_metadata<R: Read, E: ByteOrder>(reader: &mut R, state: &mut ReaderState) -> Result<(), StimError> {
    let num_objects = reader.read_u32::<E>()?;

    for _ in 0..num_objects {
        let path = read_string::<R, E>(reader)?;
        let object = state.object_id(&path);

        let index_length = reader.read_u32::<E>()?;
        let index = match index_length {
            NO_RAW_DATA => None,
            RAW_INDEX_MATCHES_PREVIOUS => {
                let previous = state.objects[object].last_index;
                if previous.is_none() {
                    return Err(StimError::UnsupportedLayout(format!(
                        "{} reuses a raw data index that was never defined",
                        path
                    )));
                }
                previous
            }
            DAQMX_FORMAT_CHANGING_SCALER | DAQMX_DIGITAL_LINE_SCALER => {
                return Err(StimError::UnsupportedLayout("DAQmx raw data index".to_string()));
            }
            _ => Some(read_raw_index::<R, E>(reader)?),
        };
        if index.is_some() {
            state.objects[object].last_index = index;
        }
        state.activate(object, index);

        let num_properties = reader.read_u32::<E>()?;
        for _ in 0..num_properties {
            let name = read_string::<R, E>(reader)?;
            let data_type = DataType::from_code(reader.read_u32::<E>()?)?;
            let value = read_property_value::<R, E>(reader, data_type)?;
            state.objects[object].properties.insert(name, value);
        }
    }

    Ok(())
}

/// Helper function to read a raw data index (data type, dimension, count)
fn read_raw_index<R: Read, E: ByteOrder>(reader: &mut R) -> Result<RawIndex, StimError> {
    let data_type = DataType::from_code(reader.read_u32::<E>()?)?;
    let dimension = reader.read_u32::<E>()?;
    if dimension != 1 {
        return Err(StimError::UnsupportedLayout(format!("array dimension {}", dimension)));
    }
    let num_values = reader.read_u64::<E>()?;
    if data_type == DataType::Void && num_values > 0 {
        return Err(StimError::UnsupportedDataType(0));
    }
    let total_size = match data_type.size() {
        Some(size) => size.checked_mul(num_values).ok_or_else(|| {
            StimError::UnrecognizedFileFormat(format!("raw data index of {} values overflows", num_values))
        })?,
        None => reader.read_u64::<E>()?,
    };

    Ok(RawIndex {
        data_type,
        num_values,
        total_size,
    })
}

/// Helper function to read a length-prefixed UTF-8 string
fn read_string<R: Read, E: ByteOrder>(reader: &mut R) -> Result<String, StimError> {
    let length = reader.read_u32::<E>()? as u64;
    // Read through `take` so a corrupt length cannot force a huge allocation
    let mut bytes = Vec::new();
    reader.by_ref().take(length).read_to_end(&mut bytes)?;
    if bytes.len() as u64 != length {
        return Err(StimError::Io(std::io::ErrorKind::UnexpectedEof.into()));
    }
    String::from_utf8(bytes)
        .map_err(|_| StimError::UnrecognizedFileFormat("string is not valid UTF-8".to_string()))
}

/// Helper function to read a property value of the given type
fn read_property_value<R: Read, E: ByteOrder>(
    reader: &mut R,
    data_type: DataType,
) -> Result<PropertyValue, StimError> {
    Ok(match data_type {
        DataType::I8 => PropertyValue::Int(reader.read_i8()? as i64),
        DataType::I16 => PropertyValue::Int(reader.read_i16::<E>()? as i64),
        DataType::I32 => PropertyValue::Int(reader.read_i32::<E>()? as i64),
        DataType::I64 => PropertyValue::Int(reader.read_i64::<E>()?),
        DataType::U8 => PropertyValue::UInt(reader.read_u8()? as u64),
        DataType::U16 => PropertyValue::UInt(reader.read_u16::<E>()? as u64),
        DataType::U32 => PropertyValue::UInt(reader.read_u32::<E>()? as u64),
        DataType::U64 => PropertyValue::UInt(reader.read_u64::<E>()?),
        DataType::F32 => PropertyValue::Float(reader.read_f32::<E>()? as f64),
        DataType::F64 => PropertyValue::Float(reader.read_f64::<E>()?),
        DataType::String => PropertyValue::String(read_string::<R, E>(reader)?),
        DataType::Bool => PropertyValue::Bool(reader.read_u8()? != 0),
        DataType::Timestamp => {
            let (seconds, fractions) = read_timestamp::<R, E>(reader)?;
            PropertyValue::Timestamp { seconds, fractions }
        }
        DataType::Void => return Err(StimError::UnsupportedDataType(0)),
    })
}

/// Helper function to read a timestamp as (seconds, fractions).
///
/// Little-endian files store the fractions first; big-endian files store the
/// seconds first.
fn read_timestamp<R: Read, E: ByteOrder>(reader: &mut R) -> Result<(i64, u64), StimError> {
    if is_big_endian::<E>() {
        let seconds = reader.read_i64::<E>()?;
        let fractions = reader.read_u64::<E>()?;
        Ok((seconds, fractions))
    } else {
        let fractions = reader.read_u64::<E>()?;
        let seconds = reader.read_i64::<E>()?;
        Ok((seconds, fractions))
    }
}

fn is_big_endian<E: ByteOrder>() -> bool {
    E::read_u16(&[0, 1]) == 1
}

/// Size in bytes of one chunk of the current object list
fn chunk_size(state: &ReaderState) -> Result<u64, StimError> {
    state
        .active
        .iter()
        .filter_map(|a| a.index)
        .try_fold(0u64, |sum, index| sum.checked_add(index.total_size))
        .ok_or_else(|| StimError::UnrecognizedFileFormat("raw data chunk size overflows".to_string()))
}

/// Helper function to read all chunks of non-interleaved raw data.
///
/// Within a chunk each object's values are stored contiguously, in object-list
/// order.
fn read_contiguous_data<R: Read + Seek, E: ByteOrder>(
    reader: &mut R,
    state: &mut ReaderState,
    available: u64,
) -> Result<(), StimError> {
    let chunk = chunk_size(state)?;
    if chunk == 0 {
        return Ok(());
    }
    let num_chunks = available / chunk;
    if available % chunk != 0 {
        warn!(
            "Raw data is not a whole number of chunks; ignoring {} bytes",
            available % chunk
        );
    }

    let active = state.active.clone();
    for _ in 0..num_chunks {
        for entry in &active {
            let Some(index) = entry.index else {
                continue;
            };
            if index.data_type == DataType::String {
                // Strings are not sample data; skip them
                reader.seek(SeekFrom::Current(index.total_size as i64))?;
                continue;
            }
            let data = &mut state.objects[entry.object].data;
            read_values::<R, E>(reader, index.data_type, index.num_values as usize, data)?;
        }
    }

    Ok(())
}

/// Helper function to read all chunks of interleaved raw data.
///
/// Interleaved chunks store one value of every object per sample, so every
/// object must hold the same number of fixed-size values.
fn read_interleaved_data<R: Read + Seek, E: ByteOrder>(
    reader: &mut R,
    state: &mut ReaderState,
    available: u64,
) -> Result<(), StimError> {
    let active: Vec<(usize, RawIndex)> = state
        .active
        .iter()
        .filter_map(|a| a.index.map(|index| (a.object, index)))
        .collect();
    if active.is_empty() {
        return Ok(());
    }

    let num_values = active[0].1.num_values;
    if active.iter().any(|(_, index)| {
        index.num_values != num_values || index.data_type == DataType::String
    }) {
        return Err(StimError::UnsupportedLayout(
            "interleaved objects with differing lengths or string data".to_string(),
        ));
    }

    let chunk = chunk_size(state)?;
    if chunk == 0 {
        return Ok(());
    }
    let num_chunks = available / chunk;

    for _ in 0..num_chunks {
        for _ in 0..num_values {
            for &(object, index) in &active {
                let data = &mut state.objects[object].data;
                read_values::<R, E>(reader, index.data_type, 1, data)?;
            }
        }
    }

    Ok(())
}

/// Helper function to read `count` values of one type and append them as `f64`
fn read_values<R: Read, E: ByteOrder>(
    reader: &mut R,
    data_type: DataType,
    count: usize,
    out: &mut Vec<f64>,
) -> Result<(), StimError> {
    out.reserve(count);
    match data_type {
        DataType::F64 => {
            let mut buf = vec![0f64; count];
            reader.read_f64_into::<E>(&mut buf)?;
            out.extend_from_slice(&buf);
        }
        DataType::F32 => {
            let mut buf = vec![0f32; count];
            reader.read_f32_into::<E>(&mut buf)?;
            out.extend(buf.iter().map(|&v| v as f64));
        }
        DataType::I16 => {
            let mut buf = vec![0i16; count];
            reader.read_i16_into::<E>(&mut buf)?;
            out.extend(buf.iter().map(|&v| v as f64));
        }
        DataType::I32 => {
            let mut buf = vec![0i32; count];
            reader.read_i32_into::<E>(&mut buf)?;
            out.extend(buf.iter().map(|&v| v as f64));
        }
        _ => {
            for _ in 0..count {
                out.push(read_scalar::<R, E>(reader, data_type)?);
            }
        }
    }
    Ok(())
}

/// Helper function to read one value of any fixed-size type as `f64`
fn read_scalar<R: Read, E: ByteOrder>(reader: &mut R, data_type: DataType) -> Result<f64, StimError> {
    Ok(match data_type {
        DataType::I8 => reader.read_i8()? as f64,
        DataType::I16 => reader.read_i16::<E>()? as f64,
        DataType::I32 => reader.read_i32::<E>()? as f64,
        DataType::I64 => reader.read_i64::<E>()? as f64,
        DataType::U8 => reader.read_u8()? as f64,
        DataType::U16 => reader.read_u16::<E>()? as f64,
        DataType::U32 => reader.read_u32::<E>()? as f64,
        DataType::U64 => reader.read_u64::<E>()? as f64,
        DataType::F32 => reader.read_f32::<E>()? as f64,
        DataType::F64 => reader.read_f64::<E>()?,
        DataType::Bool => f64::from(reader.read_u8()? != 0),
        DataType::Timestamp => {
            let (seconds, fractions) = read_timestamp::<R, E>(reader)?;
            seconds as f64 + fractions as f64 / 2f64.powi(64)
        }
        DataType::Void | DataType::String => {
            return Err(StimError::UnsupportedDataType(0x20));
        }
    })
}

/// Splits an object path such as `/'Group Name'/'stim_mon'` into its names.
///
/// The root object `/` yields no names. Single quotes inside a name are stored
/// doubled (`''`).
pub(crate) fn parse_object_path(path: &str) -> Result<Vec<String>, StimError> {
    let malformed = || StimError::UnrecognizedFileFormat(format!("malformed object path {}", path));

    if path == "/" {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '/' || chars.next() != Some('\'') {
            return Err(malformed());
        }
        let mut name = String::new();
        loop {
            match chars.next() {
                Some('\'') if chars.peek() == Some(&'\'') => {
                    chars.next();
                    name.push('\'');
                }
                Some('\'') => break,
                Some(ch) => name.push(ch),
                None => return Err(malformed()),
            }
        }
        names.push(name);
    }

    Ok(names)
}

/// Helper function to turn accumulated object state into the file hierarchy
fn build_file(state: ReaderState, version: u32, num_segments: usize) -> Result<TdmsFile, StimError> {
    let mut tdms = TdmsFile {
        version,
        num_segments,
        properties: BTreeMap::new(),
        groups: Vec::new(),
    };

    for object in state.objects {
        let names = parse_object_path(&object.path)?;
        match names.as_slice() {
            [] => tdms.properties = object.properties,
            [group] => {
                let group = group_entry(&mut tdms.groups, group);
                group.properties = object.properties;
            }
            [group, channel] => {
                let group = group_entry(&mut tdms.groups, group);
                group.channels.push(TdmsChannel {
                    name: channel.clone(),
                    properties: object.properties,
                    data: Array1::from(object.data),
                });
            }
            _ => {
                return Err(StimError::UnrecognizedFileFormat(format!(
                    "object path nested too deeply: {}",
                    object.path
                )));
            }
        }
    }

    Ok(tdms)
}

fn group_entry<'a>(groups: &'a mut Vec<TdmsGroup>, name: &str) -> &'a mut TdmsGroup {
    let position = match groups.iter().position(|g| g.name == name) {
        Some(position) => position,
        None => {
            groups.push(TdmsGroup {
                name: name.to_string(),
                properties: BTreeMap::new(),
                channels: Vec::new(),
            });
            groups.len() - 1
        }
    };
    &mut groups[position]
}

// Helper function to log a summary of the file contents
fn print_file_summary(tdms: &TdmsFile) {
    info!(
        "TDMS version {}: {} segment{}, {} group{}, {} channel{}",
        tdms.version,
        tdms.num_segments,
        if tdms.num_segments != 1 { "s" } else { "" },
        tdms.groups.len(),
        if tdms.groups.len() != 1 { "s" } else { "" },
        tdms.num_channels(),
        if tdms.num_channels() != 1 { "s" } else { "" },
    );

    for group in &tdms.groups {
        for channel in &group.channels {
            match channel.duration() {
                Ok(duration) => debug!(
                    "  {}/{}: {} samples, {:.3} seconds",
                    group.name,
                    channel.name,
                    channel.data.len(),
                    duration
                ),
                Err(_) => debug!("  {}/{}: {} values", group.name, channel.name, channel.data.len()),
            }
        }
    }
}
