//! Streaming TDMS sink.
//!
//! Writes a little-endian TDMS 2.0 file one self-contained segment at a time:
//!
//! ```text
//! segment 0   root + group properties, four empty typed channels
//! segment 1.. one value per channel (PointIndex, XPosition, YPosition, DAQValue)
//! trailer     root properties updated with the final metadata
//! ```
//!
//! Each segment is assembled in memory and written with a single `write_all`
//! followed by a flush, so the file is a valid TDMS stream after every append.

use crate::core::DataPoint;
use crate::data::storage::ScanSink;
use crate::metadata::ScanMetadata;
use anyhow::{Context, Result};
use bytes::{BufMut, BytesMut};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const TAG: &[u8; 4] = b"TDSm";
const VERSION: u32 = 4713;

const TOC_META_DATA: u32 = 1 << 1;
const TOC_NEW_OBJ_LIST: u32 = 1 << 2;
const TOC_RAW_DATA: u32 = 1 << 3;

const NO_RAW_DATA: u32 = 0xFFFF_FFFF;
/// Byte length of a raw data index for fixed-size types.
const RAW_INDEX_LEN: u32 = 20;

const TYPE_I32: u32 = 0x03;
const TYPE_I64: u32 = 0x04;
const TYPE_F64: u32 = 0x0A;
const TYPE_STRING: u32 = 0x20;
const TYPE_BOOL: u32 = 0x21;

const GROUP: &str = "ScanData";

#[derive(Clone, Copy)]
enum ChannelType {
    I32,
    F64,
}

impl ChannelType {
    fn code(self) -> u32 {
        match self {
            ChannelType::I32 => TYPE_I32,
            ChannelType::F64 => TYPE_F64,
        }
    }
}

const CHANNELS: [(&str, ChannelType); 4] = [
    ("PointIndex", ChannelType::I32),
    ("XPosition", ChannelType::F64),
    ("YPosition", ChannelType::F64),
    ("DAQValue", ChannelType::F64),
];

fn group_path() -> String {
    format!("/'{}'", GROUP)
}

fn channel_path(channel: &str) -> String {
    format!("/'{}'/'{}'", GROUP, channel)
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn put_property(buf: &mut BytesMut, name: &str, value: &Value) {
    put_string(buf, name);
    match value {
        Value::String(s) => {
            buf.put_u32_le(TYPE_STRING);
            put_string(buf, s);
        }
        Value::Bool(b) => {
            buf.put_u32_le(TYPE_BOOL);
            buf.put_u8(u8::from(*b));
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                buf.put_u32_le(TYPE_I64);
                buf.put_i64_le(i);
            } else {
                buf.put_u32_le(TYPE_F64);
                buf.put_f64_le(n.as_f64().unwrap_or(f64::NAN));
            }
        }
        // Null, arrays and objects have no TDMS scalar type
        other => {
            buf.put_u32_le(TYPE_STRING);
            put_string(buf, &other.to_string());
        }
    }
}

fn put_properties<'a>(
    buf: &mut BytesMut,
    props: impl ExactSizeIterator<Item = (&'a str, &'a Value)>,
) {
    buf.put_u32_le(props.len() as u32);
    for (name, value) in props {
        put_property(buf, name, value);
    }
}

fn put_raw_index(buf: &mut BytesMut, kind: ChannelType, values: u64) {
    buf.put_u32_le(RAW_INDEX_LEN);
    buf.put_u32_le(kind.code());
    buf.put_u32_le(1); // array dimension
    buf.put_u64_le(values);
}

/// Lead-in plus metadata plus raw data, ready to write.
fn segment(toc: u32, meta: &[u8], raw: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(28 + meta.len() + raw.len());
    buf.put_slice(TAG);
    buf.put_u32_le(toc);
    buf.put_u32_le(VERSION);
    buf.put_u64_le((meta.len() + raw.len()) as u64);
    buf.put_u64_le(meta.len() as u64);
    buf.put_slice(meta);
    buf.put_slice(raw);
    buf
}

fn root_segment_meta(buf: &mut BytesMut, metadata: &ScanMetadata) {
    put_string(buf, "/");
    buf.put_u32_le(NO_RAW_DATA);
    put_properties(buf, metadata.iter().map(|(k, v)| (k.as_str(), v)));
}

fn header_segment(metadata: &ScanMetadata) -> BytesMut {
    let mut meta = BytesMut::new();
    meta.put_u32_le(2 + CHANNELS.len() as u32);

    root_segment_meta(&mut meta, metadata);

    let description = Value::from("Beam map scan data");
    let channels = Value::from(CHANNELS.len() as i64);
    put_string(&mut meta, &group_path());
    meta.put_u32_le(NO_RAW_DATA);
    put_properties(
        &mut meta,
        [("description", &description), ("channels", &channels)].into_iter(),
    );

    for (name, kind) in CHANNELS {
        put_string(&mut meta, &channel_path(name));
        put_raw_index(&mut meta, kind, 0);
        meta.put_u32_le(0);
    }

    segment(TOC_META_DATA | TOC_NEW_OBJ_LIST | TOC_RAW_DATA, &meta, &[])
}

fn point_segment(point: &DataPoint) -> Result<BytesMut> {
    let index = i32::try_from(point.index)
        .with_context(|| format!("point index {} does not fit in int32", point.index))?;

    let mut meta = BytesMut::new();
    meta.put_u32_le(CHANNELS.len() as u32);
    for (name, kind) in CHANNELS {
        put_string(&mut meta, &channel_path(name));
        put_raw_index(&mut meta, kind, 1);
        meta.put_u32_le(0);
    }

    let mut raw = BytesMut::with_capacity(4 + 3 * 8);
    raw.put_i32_le(index);
    raw.put_f64_le(point.position.x);
    raw.put_f64_le(point.position.y);
    raw.put_f64_le(point.value);

    Ok(segment(
        TOC_META_DATA | TOC_NEW_OBJ_LIST | TOC_RAW_DATA,
        &meta,
        &raw,
    ))
}

fn trailer_segment(metadata: &ScanMetadata) -> BytesMut {
    let mut meta = BytesMut::new();
    meta.put_u32_le(1);
    root_segment_meta(&mut meta, metadata);
    segment(TOC_META_DATA | TOC_NEW_OBJ_LIST, &meta, &[])
}

/// Segment-per-point TDMS sink.
pub struct TdmsSink {
    path: PathBuf,
    file: Option<File>,
}

impl TdmsSink {
    /// Sink writing to `path`. Opening fails if the file already exists.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    fn write_segment(&mut self, bytes: &[u8]) -> Result<()> {
        let file = self.file.as_mut().context("TDMS sink is not open")?;
        file.write_all(bytes)
            .with_context(|| format!("Failed to write TDMS segment to {:?}", self.path))?;
        file.flush().context("Failed to flush TDMS file")?;
        Ok(())
    }
}

impl ScanSink for TdmsSink {
    fn name(&self) -> &str {
        "tdms"
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn open(&mut self, metadata: &ScanMetadata) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .with_context(|| format!("Failed to create TDMS file at {:?}", self.path))?;
        self.file = Some(file);
        if let Err(err) = self.write_segment(&header_segment(metadata)) {
            self.file = None;
            return Err(err);
        }
        tracing::info!(path = %self.path.display(), "TDMS streaming writer initialized");
        Ok(())
    }

    fn append(&mut self, point: &DataPoint) -> Result<()> {
        let bytes = point_segment(point)?;
        self.write_segment(&bytes)
    }

    fn finish(&mut self, metadata: &ScanMetadata) -> Result<()> {
        let result = self.write_segment(&trailer_segment(metadata));
        self.close();
        tracing::info!(path = %self.path.display(), "TDMS streaming file closed");
        result
    }

    fn close(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.sync_all();
        }
    }
}
