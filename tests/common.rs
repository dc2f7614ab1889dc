// Shared helpers: synthetic TDMS files and stim-monitor traces.
#![allow(dead_code)]

use byteorder::{LittleEndian, WriteBytesExt};
use ndarray::Array1;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const TOC_META_DATA: u32 = 1 << 1;
const TOC_NEW_OBJ_LIST: u32 = 1 << 2;
const TOC_RAW_DATA: u32 = 1 << 3;
const TDS_TYPE_F64: u32 = 0x0A;
const TDS_TYPE_STRING: u32 = 0x20;

/// One channel to write: object name, samples and wf-increment (s).
pub struct TestChannel<'a> {
    pub name: &'a str,
    pub data: Array1<f64>,
    pub wf_increment: f64,
}

impl<'a> TestChannel<'a> {
    pub fn new(name: &'a str, data: Array1<f64>, fs: f64) -> Self {
        TestChannel {
            name,
            data,
            wf_increment: 1.0 / fs,
        }
    }
}

/// A fresh, empty directory under the cargo target tmpdir.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = Path::new(env!("CARGO_TARGET_TMPDIR")).join(name);
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn put_string(buf: &mut Vec<u8>, s: &str) {
    buf.write_u32::<LittleEndian>(s.len() as u32).unwrap();
    buf.write_all(s.as_bytes()).unwrap();
}

fn object_path(group: &str, channel: Option<&str>) -> String {
    let quote = |s: &str| format!("'{}'", s.replace('\'', "''"));
    match channel {
        Some(ch) => format!("/{}/{}", quote(group), quote(ch)),
        None => format!("/{}", quote(group)),
    }
}

fn put_raw_index(meta: &mut Vec<u8>, count: usize) {
    meta.write_u32::<LittleEndian>(20).unwrap();
    meta.write_u32::<LittleEndian>(TDS_TYPE_F64).unwrap();
    meta.write_u32::<LittleEndian>(1).unwrap();
    meta.write_u64::<LittleEndian>(count as u64).unwrap();
}

fn put_segment(out: &mut Vec<u8>, toc: u32, meta: &[u8], raw: &[u8]) {
    out.write_all(b"TDSm").unwrap();
    out.write_u32::<LittleEndian>(toc).unwrap();
    out.write_u32::<LittleEndian>(4713).unwrap();
    out.write_u64::<LittleEndian>((meta.len() + raw.len()) as u64).unwrap();
    out.write_u64::<LittleEndian>(meta.len() as u64).unwrap();
    out.write_all(meta).unwrap();
    out.write_all(raw).unwrap();
}

/// Writes one group of `f64` channels as a little-endian TDMS file.
///
/// The data is split across two segments: the first carries the full object
/// list with properties, the second only repeats the raw data indexes, the
/// way LabVIEW appends to an open file.
pub fn write_tdms(path: &Path, group: &str, channels: &[TestChannel]) {
    // Segment 1: root, group and channels with properties, first half of the data
    let mut meta = Vec::new();
    let mut raw = Vec::new();
    meta.write_u32::<LittleEndian>(2 + channels.len() as u32).unwrap();
    put_string(&mut meta, "/");
    meta.write_u32::<LittleEndian>(0xFFFF_FFFF).unwrap();
    meta.write_u32::<LittleEndian>(0).unwrap();
    put_string(&mut meta, &object_path(group, None));
    meta.write_u32::<LittleEndian>(0xFFFF_FFFF).unwrap();
    meta.write_u32::<LittleEndian>(0).unwrap();

    for ch in channels {
        let half = ch.data.len() / 2;
        put_string(&mut meta, &object_path(group, Some(ch.name)));
        put_raw_index(&mut meta, half);
        meta.write_u32::<LittleEndian>(2).unwrap();
        put_string(&mut meta, "wf_increment");
        meta.write_u32::<LittleEndian>(TDS_TYPE_F64).unwrap();
        meta.write_f64::<LittleEndian>(ch.wf_increment).unwrap();
        put_string(&mut meta, "NI_ChannelName");
        meta.write_u32::<LittleEndian>(TDS_TYPE_STRING).unwrap();
        put_string(&mut meta, ch.name);
        for v in ch.data.iter().take(half) {
            raw.write_f64::<LittleEndian>(*v).unwrap();
        }
    }

    let mut out = Vec::new();
    put_segment(&mut out, TOC_META_DATA | TOC_NEW_OBJ_LIST | TOC_RAW_DATA, &meta, &raw);

    // Segment 2: same object list, new indexes for the remaining samples
    let mut meta = Vec::new();
    let mut raw = Vec::new();
    meta.write_u32::<LittleEndian>(channels.len() as u32).unwrap();
    for ch in channels {
        let half = ch.data.len() / 2;
        put_string(&mut meta, &object_path(group, Some(ch.name)));
        put_raw_index(&mut meta, ch.data.len() - half);
        meta.write_u32::<LittleEndian>(0).unwrap();
        for v in ch.data.iter().skip(half) {
            raw.write_f64::<LittleEndian>(*v).unwrap();
        }
    }
    put_segment(&mut out, TOC_META_DATA | TOC_RAW_DATA, &meta, &raw);

    fs::write(path, out).unwrap();
}

/// A stim-monitor trace: one-sample pulses every `period` samples from
/// `first` through `last` (inclusive) on a zero baseline.
pub fn pulse_train(len: usize, first: usize, last: usize, period: usize) -> Array1<f64> {
    let mut x = Array1::zeros(len);
    for i in (first..=last).step_by(period) {
        x[i] = 1.0;
    }
    x
}

/// A slowly varying physiological signal around `level`.
pub fn slow_wave(len: usize, level: f64, amplitude: f64) -> Array1<f64> {
    Array1::from_iter((0..len).map(|i| level + amplitude * (i as f64 * 0.01).sin()))
}
