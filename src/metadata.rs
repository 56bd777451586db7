// Flacore -- a lossless audio codec core in Rust
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! The `metadata` module deals with the metadata blocks that precede the
//! audio frames in a stream: STREAMINFO (mandatory, first), SEEKTABLE,
//! PADDING, APPLICATION, and any other block type, preserved verbatim.

use crate::bitstream::{BitReader, BitWriter};
use crate::error::{Error, Result};
use crate::io_traits::{BytesSink, BytesSource};

/// Sentinel sample number marking an unfilled seek point.
pub const SEEKPOINT_PLACEHOLDER: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// The kind of a metadata block, as stored in the low 7 bits of its
/// header byte.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BlockType {
    StreamInfo,
    Padding,
    Application,
    SeekTable,
    Other(u8),
}

impl BlockType {
    fn from_code(code: u8) -> Result<BlockType> {
        match code {
            0 => Ok(BlockType::StreamInfo),
            1 => Ok(BlockType::Padding),
            2 => Ok(BlockType::Application),
            3 => Ok(BlockType::SeekTable),
            127 => Err(Error::BadHeader("reserved metadata block type 127")),
            other => Ok(BlockType::Other(other)),
        }
    }

    fn to_code(self) -> u8 {
        match self {
            BlockType::StreamInfo => 0,
            BlockType::Padding => 1,
            BlockType::Application => 2,
            BlockType::SeekTable => 3,
            BlockType::Other(code) => code,
        }
    }
}

/// The header that precedes every metadata block's body.
#[derive(Clone, Copy, Debug)]
pub struct BlockHeader {
    pub is_last: bool,
    pub block_type: BlockType,
    pub length: u32,
}

/// Technical details about the whole stream. Always the first metadata
/// block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamInfo {
    pub min_block_size: u16,
    pub max_block_size: u16,
    pub min_frame_size: Option<u32>,
    pub max_frame_size: Option<u32>,
    pub sample_rate: u32,
    pub channels: u8,
    pub bits_per_sample: u8,
    pub total_samples: Option<u64>,
    pub md5sum: [u8; 16],
}

impl StreamInfo {
    fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.sample_rate > 655_350 {
            return Err(Error::BadHeader("sample rate out of range"));
        }
        if self.channels == 0 || self.channels > 8 {
            return Err(Error::BadHeader("channel count out of range"));
        }
        if self.bits_per_sample < 4 || self.bits_per_sample > 32 {
            return Err(Error::BadHeader("bits per sample out of range"));
        }
        if self.min_block_size > self.max_block_size {
            return Err(Error::BadHeader("min_block_size exceeds max_block_size"));
        }
        if let (Some(min), Some(max)) = (self.min_frame_size, self.max_frame_size) {
            if min > max {
                return Err(Error::BadHeader("min_frame_size exceeds max_frame_size"));
            }
        }
        Ok(())
    }
}

/// One entry in a SEEKTABLE block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeekPoint {
    /// Sample number of the target frame's first sample, or
    /// [`SEEKPOINT_PLACEHOLDER`] for an unfilled slot.
    pub sample_number: u64,
    /// Byte offset from the first frame header to the target frame's header.
    pub stream_offset: u64,
    /// Number of inter-channel samples in the target frame.
    pub frame_samples: u16,
}

impl SeekPoint {
    pub fn is_placeholder(&self) -> bool {
        self.sample_number == SEEKPOINT_PLACEHOLDER
    }

    fn placeholder() -> SeekPoint {
        SeekPoint {
            sample_number: SEEKPOINT_PLACEHOLDER,
            stream_offset: 0,
            frame_samples: 0,
        }
    }
}

/// An ordered sequence of seek points, sorted by ascending sample number
/// with placeholders sorted last.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeekTable {
    pub points: Vec<SeekPoint>,
}

impl SeekTable {
    pub fn new() -> SeekTable {
        SeekTable { points: Vec::new() }
    }

    /// Builds a seek table with one placeholder point roughly every
    /// `samples_per_point` inter-channel samples, covering a stream of
    /// `total_samples` samples. Used by the encoder to reserve seek
    /// points up front; they are filled in as matching frames are
    /// emitted.
    pub fn with_placeholders(total_samples: u64, samples_per_point: u64) -> SeekTable {
        let mut points = Vec::new();
        if samples_per_point > 0 {
            let mut sample = 0u64;
            while sample < total_samples {
                points.push(SeekPoint {
                    sample_number: sample,
                    stream_offset: 0,
                    frame_samples: 0,
                });
                sample += samples_per_point;
            }
        }
        SeekTable { points }
    }

    /// Fills in the stream offset and frame size of the earliest unfilled
    /// point whose sample number falls in `[frame_first_sample,
    /// frame_first_sample + frame_samples)`.
    pub fn fill_point(
        &mut self,
        frame_first_sample: u64,
        frame_samples: u16,
        stream_offset: u64,
    ) {
        let frame_end = frame_first_sample + frame_samples as u64;
        // Placeholders as constructed by `with_placeholders` already carry
        // their target sample number; what remains unfilled is
        // stream_offset/frame_samples staying at 0. Find the earliest point
        // in range that still has a zero frame_samples (i.e. has not been
        // filled yet).
        for point in self.points.iter_mut() {
            if point.sample_number >= frame_first_sample
                && point.sample_number < frame_end
                && point.frame_samples == 0
            {
                point.stream_offset = stream_offset;
                point.frame_samples = frame_samples;
                break;
            }
        }
    }

    pub(crate) fn sort(&mut self) {
        self.points.sort_by(|a, b| {
            let a_key = if a.is_placeholder() { u64::MAX } else { a.sample_number };
            let b_key = if b.is_placeholder() { u64::MAX } else { b.sample_number };
            a_key.cmp(&b_key)
        });
    }
}

/// A metadata block, with its header's last-block flag stripped off (the
/// caller tracks block order and sets `is_last` on write).
#[derive(Clone, Debug, PartialEq)]
pub enum MetadataBlock {
    StreamInfo(StreamInfo),
    Padding { length: u32 },
    Application { id: u32, data: Vec<u8> },
    SeekTable(SeekTable),
    /// Any other block type, including VORBIS_COMMENT, CUESHEET and
    /// PICTURE: the core does not interpret these, it only preserves
    /// them verbatim across a decode/re-encode round trip.
    Unknown { block_type: u8, data: Vec<u8> },
}

impl MetadataBlock {
    fn block_type(&self) -> BlockType {
        match self {
            MetadataBlock::StreamInfo(_) => BlockType::StreamInfo,
            MetadataBlock::Padding { .. } => BlockType::Padding,
            MetadataBlock::Application { .. } => BlockType::Application,
            MetadataBlock::SeekTable(_) => BlockType::SeekTable,
            MetadataBlock::Unknown { block_type, .. } => BlockType::Other(*block_type),
        }
    }
}

/// The 4-byte string that must open every stream.
pub const STREAM_SYNC: [u8; 4] = *b"fLaC";

pub fn read_stream_sync(source: &mut dyn BytesSource) -> Result<()> {
    let mut buf = [0u8; 4];
    crate::io_traits::read_exact(source, &mut buf)?;
    if buf != STREAM_SYNC {
        return Err(Error::UnparseableStream("missing stream sync"));
    }
    Ok(())
}

pub fn write_stream_sync(sink: &mut dyn BytesSink) -> Result<()> {
    sink.write(&STREAM_SYNC, 0, 0)
}

fn read_block_header(reader: &mut BitReader) -> Result<BlockHeader> {
    let byte = reader.read_uint(8)? as u8;
    let is_last = byte & 0b1000_0000 != 0;
    let block_type = BlockType::from_code(byte & 0b0111_1111)?;
    let length = reader.read_uint(24)? as u32;
    if block_type == BlockType::StreamInfo && length != 34 {
        return Err(Error::BadHeader("streaminfo block must be 34 bytes"));
    }
    Ok(BlockHeader {
        is_last,
        block_type,
        length,
    })
}

fn write_block_header(writer: &mut BitWriter, is_last: bool, block_type: BlockType, length: u32) {
    let byte = ((is_last as u8) << 7) | (block_type.to_code() & 0b0111_1111);
    writer.write_uint(byte as u64, 8);
    writer.write_uint(length as u64, 24);
}

fn read_streaminfo_body(reader: &mut BitReader) -> Result<StreamInfo> {
    let min_block_size = reader.read_uint(16)? as u16;
    let max_block_size = reader.read_uint(16)? as u16;
    let min_frame_size = reader.read_uint(24)? as u32;
    let max_frame_size = reader.read_uint(24)? as u32;
    let sample_rate = reader.read_uint(20)? as u32;
    let channels = reader.read_uint(3)? as u8 + 1;
    let bits_per_sample = reader.read_uint(5)? as u8 + 1;
    let total_samples = reader.read_uint(36)?;
    let mut md5sum = [0u8; 16];
    for byte in md5sum.iter_mut() {
        *byte = reader.read_uint(8)? as u8;
    }

    let info = StreamInfo {
        min_block_size,
        max_block_size,
        min_frame_size: if min_frame_size == 0 { None } else { Some(min_frame_size) },
        max_frame_size: if max_frame_size == 0 { None } else { Some(max_frame_size) },
        sample_rate,
        channels,
        bits_per_sample,
        total_samples: if total_samples == 0 { None } else { Some(total_samples) },
        md5sum,
    };
    info.validate()?;
    Ok(info)
}

fn write_streaminfo_body(writer: &mut BitWriter, info: &StreamInfo) {
    writer.write_uint(info.min_block_size as u64, 16);
    writer.write_uint(info.max_block_size as u64, 16);
    writer.write_uint(info.min_frame_size.unwrap_or(0) as u64, 24);
    writer.write_uint(info.max_frame_size.unwrap_or(0) as u64, 24);
    writer.write_uint(info.sample_rate as u64, 20);
    writer.write_uint((info.channels - 1) as u64, 3);
    writer.write_uint((info.bits_per_sample - 1) as u64, 5);
    writer.write_uint(info.total_samples.unwrap_or(0), 36);
    for byte in info.md5sum.iter() {
        writer.write_uint(*byte as u64, 8);
    }
}

fn read_seektable_body(reader: &mut BitReader, length: u32) -> Result<SeekTable> {
    if length % 18 != 0 {
        return Err(Error::BadHeader("seektable length not a multiple of 18"));
    }
    let count = length / 18;
    let mut points = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let sample_number = reader.read_uint(64)?;
        let stream_offset = reader.read_uint(64)?;
        let frame_samples = reader.read_uint(16)? as u16;
        points.push(if sample_number == SEEKPOINT_PLACEHOLDER {
            SeekPoint::placeholder()
        } else {
            SeekPoint {
                sample_number,
                stream_offset,
                frame_samples,
            }
        });
    }
    Ok(SeekTable { points })
}

fn write_seektable_body(writer: &mut BitWriter, table: &SeekTable) {
    for point in &table.points {
        writer.write_uint(point.sample_number, 64);
        writer.write_uint(point.stream_offset, 64);
        writer.write_uint(point.frame_samples as u64, 16);
    }
}

fn read_bytes(reader: &mut BitReader, length: u32) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(length as usize);
    for _ in 0..length {
        data.push(reader.read_uint(8)? as u8);
    }
    Ok(data)
}

fn read_block_body(
    reader: &mut BitReader,
    block_type: BlockType,
    length: u32,
) -> Result<MetadataBlock> {
    match block_type {
        BlockType::StreamInfo => Ok(MetadataBlock::StreamInfo(read_streaminfo_body(reader)?)),
        BlockType::Padding => {
            for _ in 0..length {
                reader.read_uint(8)?;
            }
            Ok(MetadataBlock::Padding { length })
        }
        BlockType::Application => {
            if length < 4 {
                return Err(Error::BadHeader("application block shorter than its id"));
            }
            let id = reader.read_uint(32)? as u32;
            let data = read_bytes(reader, length - 4)?;
            Ok(MetadataBlock::Application { id, data })
        }
        BlockType::SeekTable => Ok(MetadataBlock::SeekTable(read_seektable_body(reader, length)?)),
        BlockType::Other(code) => Ok(MetadataBlock::Unknown {
            block_type: code,
            data: read_bytes(reader, length)?,
        }),
    }
}

fn block_body_len(block: &MetadataBlock) -> u32 {
    match block {
        MetadataBlock::StreamInfo(_) => 34,
        MetadataBlock::Padding { length } => *length,
        MetadataBlock::Application { data, .. } => 4 + data.len() as u32,
        MetadataBlock::SeekTable(table) => (table.points.len() as u32) * 18,
        MetadataBlock::Unknown { data, .. } => data.len() as u32,
    }
}

fn write_block_body(writer: &mut BitWriter, block: &MetadataBlock) {
    match block {
        MetadataBlock::StreamInfo(info) => write_streaminfo_body(writer, info),
        MetadataBlock::Padding { length } => writer.write_zeroes(*length * 8),
        MetadataBlock::Application { id, data } => {
            writer.write_uint(*id as u64, 32);
            for byte in data {
                writer.write_uint(*byte as u64, 8);
            }
        }
        MetadataBlock::SeekTable(table) => write_seektable_body(writer, table),
        MetadataBlock::Unknown { data, .. } => {
            for byte in data {
                writer.write_uint(*byte as u64, 8);
            }
        }
    }
}

/// Reads the STREAMINFO block plus all following metadata blocks up to
/// and including the one marked last. The stream sync must already have
/// been consumed.
pub fn read_all_metadata(source: &mut dyn BytesSource) -> Result<(StreamInfo, Vec<MetadataBlock>)> {
    let mut reader = BitReader::new(source);
    let header = read_block_header(&mut reader)?;
    if header.block_type != BlockType::StreamInfo {
        return Err(Error::UnparseableStream("first metadata block is not STREAMINFO"));
    }
    let info = match read_block_body(&mut reader, header.block_type, header.length)? {
        MetadataBlock::StreamInfo(info) => info,
        _ => unreachable!(),
    };

    let mut blocks = Vec::new();
    let mut done = header.is_last;
    while !done {
        let header = read_block_header(&mut reader)?;
        let block = read_block_body(&mut reader, header.block_type, header.length)?;
        done = header.is_last;
        blocks.push(block);
    }
    Ok((info, blocks))
}

/// Writes STREAMINFO followed by `extra` blocks, marking the last one as
/// the final metadata block. Each block is its own `sink.write` call
/// (`samples == 0`), rather than one call for the whole metadata section,
/// so a sink can react to each block as it is produced.
pub fn write_all_metadata(
    sink: &mut dyn BytesSink,
    info: &StreamInfo,
    extra: &[MetadataBlock],
) -> Result<()> {
    let streaminfo_block = MetadataBlock::StreamInfo(*info);
    write_one_block(sink, &streaminfo_block, extra.is_empty())?;

    for (i, block) in extra.iter().enumerate() {
        let is_last = i == extra.len() - 1;
        write_one_block(sink, block, is_last)?;
    }
    Ok(())
}

fn write_one_block(sink: &mut dyn BytesSink, block: &MetadataBlock, is_last: bool) -> Result<()> {
    let mut writer = BitWriter::new();
    write_block_header(&mut writer, is_last, block.block_type(), block_body_len(block));
    write_block_body(&mut writer, block);
    writer.zero_pad_to_byte();
    sink.write(writer.as_bytes(), 0, 0)
}
