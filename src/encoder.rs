// Flacore -- a lossless audio codec core in Rust
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! The `encoder` module drives the whole encode: buffers blocks of audio
//! as they arrive, picks a model and channel assignment per block, and
//! defers writing the stream sync, metadata and seek table until
//! [`StreamEncoder::finish`], since STREAMINFO's totals and the seek
//! table's offsets are only known once every frame has been written.

use crate::bitstream::BitWriter;
use crate::decoder::{FrameOutcome, StreamDecoder};
use crate::error::{Error, Result, VerifyLocation};
use crate::frame::{self, BlockTime, ChannelAssignment, FrameHeader};
use crate::io_traits::BytesSink;
use crate::md5::Md5Accumulator;
use crate::metadata::{self, MetadataBlock, SeekTable, StreamInfo};
use crate::predictor;
use crate::subframe;

/// Configuration for a [`StreamEncoder`], validated eagerly in
/// [`StreamEncoder::new`] rather than lazily during encoding.
#[derive(Clone, Debug)]
pub struct EncoderConfig {
    sample_rate: u32,
    channels: u8,
    bits_per_sample: u8,
    block_size: u16,
    max_lpc_order: u32,
    lpc_precision: u32,
    max_partition_order: u32,
    mid_side: bool,
    exhaustive_search: bool,
    verify: bool,
    streamable_subset: bool,
    seek_points_every: Option<u64>,
    extra_metadata: Vec<MetadataBlock>,
}

impl EncoderConfig {
    /// Starts from reasonable defaults: a 4096-sample block, LPC up to
    /// order 8 with 14-bit coefficient precision, mid/side decorrelation
    /// on for stereo, a seek point roughly every 10 seconds, and the
    /// streamable subset enforced.
    pub fn new(sample_rate: u32, channels: u8, bits_per_sample: u8) -> EncoderConfig {
        EncoderConfig {
            sample_rate,
            channels,
            bits_per_sample,
            block_size: 4096,
            max_lpc_order: 8,
            lpc_precision: 14,
            max_partition_order: 6,
            mid_side: true,
            exhaustive_search: false,
            verify: false,
            streamable_subset: true,
            seek_points_every: Some(sample_rate as u64 * 10),
            extra_metadata: Vec::new(),
        }
    }

    pub fn block_size(mut self, block_size: u16) -> EncoderConfig {
        self.block_size = block_size;
        self
    }

    pub fn max_lpc_order(mut self, order: u32) -> EncoderConfig {
        self.max_lpc_order = order;
        self
    }

    pub fn lpc_precision(mut self, precision: u32) -> EncoderConfig {
        self.lpc_precision = precision;
        self
    }

    pub fn max_partition_order(mut self, order: u32) -> EncoderConfig {
        self.max_partition_order = order;
        self
    }

    pub fn mid_side(mut self, enabled: bool) -> EncoderConfig {
        self.mid_side = enabled;
        self
    }

    /// Enables a fuller (slower) model search: every candidate LPC order
    /// is quantized and residual-coded so the true bit cost picks the
    /// winner, rather than an estimate from the prediction error alone.
    pub fn exhaustive_search(mut self, enabled: bool) -> EncoderConfig {
        self.exhaustive_search = enabled;
        self
    }

    /// When enabled, [`StreamEncoder::finish`] re-decodes the stream it
    /// just produced and checks every sample against the input, failing
    /// with [`Error::VerifyMismatch`] rather than returning a stream that
    /// does not decode back losslessly.
    pub fn verify(mut self, enabled: bool) -> EncoderConfig {
        self.verify = enabled;
        self
    }

    pub fn streamable_subset(mut self, enabled: bool) -> EncoderConfig {
        self.streamable_subset = enabled;
        self
    }

    /// Sets the approximate sample interval between seek points, or
    /// `None` to omit the seek table entirely.
    pub fn seek_points_every(mut self, samples: Option<u64>) -> EncoderConfig {
        self.seek_points_every = samples;
        self
    }

    /// Adds a metadata block (PADDING, APPLICATION, or any other type) to
    /// be written verbatim after STREAMINFO and the seek table.
    pub fn with_metadata_block(mut self, block: MetadataBlock) -> EncoderConfig {
        self.extra_metadata.push(block);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.sample_rate > 655_350 {
            return Err(Error::InvalidConfig("sample rate out of range"));
        }
        if self.channels == 0 || self.channels > 8 {
            return Err(Error::InvalidConfig("channel count out of range"));
        }
        if self.bits_per_sample < 4 || self.bits_per_sample > 32 {
            return Err(Error::InvalidConfig("bits per sample out of range"));
        }
        if self.block_size < 16 {
            return Err(Error::InvalidConfig("block size smaller than 16"));
        }
        if self.max_lpc_order > predictor::MAX_LPC_ORDER {
            return Err(Error::InvalidConfig("max LPC order exceeds format limit of 32"));
        }
        if self.lpc_precision == 0 || self.lpc_precision > 15 {
            return Err(Error::InvalidConfig("LPC coefficient precision must be 1..=15 bits"));
        }
        if self.max_partition_order > 15 {
            return Err(Error::InvalidConfig("max partition order exceeds format limit of 15"));
        }
        if self.streamable_subset {
            let block_size_limit = if self.sample_rate <= 48_000 { 16384 } else { 4608 };
            if self.block_size > block_size_limit {
                return Err(Error::InvalidConfig("block size too large for the streamable subset"));
            }
            let lpc_order_limit = if self.sample_rate <= 48_000 { 12 } else { 8 };
            if self.max_lpc_order > lpc_order_limit {
                return Err(Error::InvalidConfig("LPC order too large for the streamable subset"));
            }
        }
        Ok(())
    }
}

/// Rough bit-cost estimate used only to choose between channel
/// decorrelation modes: the sum of absolute second-order differences,
/// which tracks Rice-coded size closely enough for this comparison
/// without running the full model search on every candidate.
fn estimate_channel_cost(samples: &[i32]) -> u64 {
    predictor::fixed_residual_costs(samples)[2] as u64
}

/// Picks the cheapest way to store a stereo pair, returning the chosen
/// assignment and the two channel buffers in the order the bitstream
/// expects them (already decorrelated, if applicable).
fn pick_channel_assignment(config: &EncoderConfig, left: &[i32], right: &[i32]) -> (ChannelAssignment, Vec<i32>, Vec<i32>) {
    if config.channels != 2 || !config.mid_side {
        return (ChannelAssignment::Independent(config.channels), left.to_vec(), right.to_vec());
    }

    let block_size = left.len();
    let mut independent = vec![0i32; block_size * 2];
    independent[..block_size].copy_from_slice(left);
    independent[block_size..].copy_from_slice(right);

    let mut candidates = vec![(
        estimate_channel_cost(left) + estimate_channel_cost(right),
        ChannelAssignment::Independent(2),
        independent.clone(),
    )];

    for assignment in [ChannelAssignment::LeftSide, ChannelAssignment::RightSide, ChannelAssignment::MidSide] {
        let mut buf = independent.clone();
        frame::decorrelate(assignment, &mut buf);
        let cost = estimate_channel_cost(&buf[..block_size]) + estimate_channel_cost(&buf[block_size..]);
        candidates.push((cost, assignment, buf));
    }

    let (_, assignment, chosen) = candidates.into_iter().min_by_key(|(cost, _, _)| *cost).unwrap();
    (assignment, chosen[..block_size].to_vec(), chosen[block_size..].to_vec())
}

/// Where one already-written frame landed in `StreamEncoder::frames`,
/// recorded so `finish` can both resolve seek-table placeholders and
/// hand the frame to the sink as its own `BytesSink::write` call.
struct FrameRecord {
    first_sample: u64,
    byte_offset: u64,
    byte_len: u32,
    block_size: u16,
}

/// A streaming encoder: accepts one block of interleaved-by-channel
/// samples at a time through [`StreamEncoder::write_block`], and emits
/// the whole stream -- sync, metadata, seek table and frames -- to its
/// sink when [`StreamEncoder::finish`] is called.
pub struct StreamEncoder {
    config: EncoderConfig,
    frames: BitWriter,
    frames_written: u32,
    samples_written: u64,
    min_frame_size: Option<u32>,
    max_frame_size: u32,
    frame_records: Vec<FrameRecord>,
    md5: Md5Accumulator,
    saw_short_block: bool,
    verify_blocks: Option<Vec<Vec<Vec<i32>>>>,
}

impl StreamEncoder {
    pub fn new(config: EncoderConfig) -> Result<StreamEncoder> {
        config.validate()?;
        let md5 = Md5Accumulator::new(config.bits_per_sample as u32);
        let verify_blocks = if config.verify { Some(Vec::new()) } else { None };
        Ok(StreamEncoder {
            config,
            frames: BitWriter::new(),
            frames_written: 0,
            samples_written: 0,
            min_frame_size: None,
            max_frame_size: 0,
            frame_records: Vec::new(),
            md5,
            saw_short_block: false,
            verify_blocks,
        })
    }

    /// Encodes one block of samples, one slice per channel, all of equal
    /// length. Every block but the last must be exactly the configured
    /// block size; a shorter final block is allowed but ends the stream
    /// for further writes.
    pub fn write_block(&mut self, channels: &[Vec<i32>]) -> Result<()> {
        if self.saw_short_block {
            return Err(Error::InvalidConfig("a block was written after a short final block"));
        }
        if channels.len() != self.config.channels as usize {
            return Err(Error::InvalidConfig("channel count does not match configuration"));
        }
        let block_size = channels[0].len();
        if block_size == 0 || channels.iter().any(|c| c.len() != block_size) {
            return Err(Error::InvalidConfig("channel buffers must be non-empty and equal length"));
        }
        if block_size > self.config.block_size as usize {
            return Err(Error::InvalidConfig("block is larger than the configured block size"));
        }
        if block_size < self.config.block_size as usize {
            self.saw_short_block = true;
        }

        if let Some(blocks) = self.verify_blocks.as_mut() {
            blocks.push(channels.to_vec());
        }
        self.md5.write_block(channels);

        let frame_first_sample = self.samples_written;
        let frame_offset = self.frames.len_bytes() as u64;

        let (assignment, coded): (ChannelAssignment, Vec<Vec<i32>>) = if self.config.channels == 2 {
            let (assignment, chan0, chan1) = pick_channel_assignment(&self.config, &channels[0], &channels[1]);
            (assignment, vec![chan0, chan1])
        } else {
            (ChannelAssignment::Independent(self.config.channels), channels.to_vec())
        };

        let header = FrameHeader {
            block_time: BlockTime::FrameNumber(self.frames_written),
            block_size: block_size as u16,
            sample_rate: None,
            channel_assignment: assignment,
            bits_per_sample: None,
        };
        frame::write_frame_header(&mut self.frames, &header)?;

        for (ch, samples) in coded.iter().enumerate() {
            let frame_bps = assignment.bits_per_sample_for_channel(ch as u8, self.config.bits_per_sample);
            let wasted_bits = subframe::count_wasted_bits(samples);
            let mut shifted = samples.clone();
            subframe::apply_wasted_bits(&mut shifted, wasted_bits);
            let effective_bps = frame_bps - wasted_bits.min(frame_bps as u32) as u8;

            let model = subframe::choose_model(
                &shifted,
                effective_bps,
                self.config.max_lpc_order,
                self.config.lpc_precision,
                self.config.exhaustive_search,
            );
            subframe::write(
                &mut self.frames,
                &shifted,
                effective_bps,
                wasted_bits,
                &model,
                self.config.max_partition_order,
            );
        }

        self.frames.zero_pad_to_byte();
        let crc16 = self.frames.get_write_crc16();
        self.frames.write_uint(crc16 as u64, 16);

        let frame_size = self.frames.len_bytes() as u64 - frame_offset;
        self.max_frame_size = self.max_frame_size.max(frame_size as u32);
        self.min_frame_size = Some(self.min_frame_size.map_or(frame_size as u32, |m| m.min(frame_size as u32)));

        self.frame_records.push(FrameRecord {
            first_sample: frame_first_sample,
            byte_offset: frame_offset,
            byte_len: frame_size as u32,
            block_size: block_size as u16,
        });

        self.frames_written += 1;
        self.samples_written += block_size as u64;
        Ok(())
    }

    /// Builds the seek table by seeding placeholder points across the
    /// now-known total sample count and filling each one in from the
    /// recorded frames, rather than committing to seek points while the
    /// total is still unknown.
    fn build_seek_table(&self) -> Option<SeekTable> {
        let interval = self.config.seek_points_every?;
        let mut table = SeekTable::with_placeholders(self.samples_written, interval);
        for record in &self.frame_records {
            table.fill_point(record.first_sample, record.block_size, record.byte_offset);
        }
        table.sort();
        if table.points.is_empty() {
            None
        } else {
            Some(table)
        }
    }

    /// Writes the finished stream -- sync, STREAMINFO, seek table, any
    /// extra metadata blocks, then every frame -- to `sink`. Each
    /// metadata block and each frame is its own `sink.write` call, in
    /// stream order, so the sink can observe them as they are produced
    /// rather than as one opaque buffer.
    pub fn finish(self, sink: &mut dyn BytesSink) -> Result<()> {
        if let Some(blocks) = &self.verify_blocks {
            self.verify(blocks)?;
        }

        let mut extra = Vec::new();
        if let Some(table) = self.build_seek_table() {
            extra.push(MetadataBlock::SeekTable(table));
        }
        extra.extend(self.config.extra_metadata.iter().cloned());

        let stream_info = StreamInfo {
            min_block_size: self.config.block_size,
            max_block_size: self.config.block_size,
            min_frame_size: self.min_frame_size,
            max_frame_size: Some(self.max_frame_size),
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            bits_per_sample: self.config.bits_per_sample,
            total_samples: Some(self.samples_written),
            md5sum: self.md5.finish(),
        };

        metadata::write_stream_sync(sink)?;
        metadata::write_all_metadata(sink, &stream_info, &extra)?;

        let frame_bytes = self.frames.as_bytes();
        for (i, record) in self.frame_records.iter().enumerate() {
            let start = record.byte_offset as usize;
            let end = start + record.byte_len as usize;
            sink.write(&frame_bytes[start..end], record.block_size as u32, i as u32)?;
        }

        Ok(())
    }

    /// Re-decodes the stream built so far (sans STREAMINFO/seek table,
    /// which `finish` has not written yet) and compares every sample
    /// against `blocks`.
    fn verify(&self, blocks: &[Vec<Vec<i32>>]) -> Result<()> {
        let placeholder_info = StreamInfo {
            min_block_size: self.config.block_size,
            max_block_size: self.config.block_size,
            min_frame_size: None,
            max_frame_size: None,
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            bits_per_sample: self.config.bits_per_sample,
            total_samples: None,
            md5sum: [0u8; 16],
        };
        let mut check_bytes = Vec::new();
        metadata::write_stream_sync(&mut check_bytes)?;
        metadata::write_all_metadata(&mut check_bytes, &placeholder_info, &[])?;
        check_bytes.extend_from_slice(self.frames.as_bytes());

        let mut cursor = std::io::Cursor::new(check_bytes);
        let mut decoder = StreamDecoder::with_md5_checking(&mut cursor, false)?;

        let mut frame_index = 0u32;
        let mut absolute_sample = 0u64;
        for expected_block in blocks {
            let decoded = match decoder.read_next_frame()? {
                FrameOutcome::Frame(frame) => frame,
                FrameOutcome::Recovered(e) => return Err(e),
                FrameOutcome::EndOfStream => {
                    return Err(Error::VerifyMismatch {
                        location: VerifyLocation { absolute_sample, frame: frame_index, channel: 0, subsample: 0 },
                        expected: 0,
                        got: 0,
                    });
                }
            };
            for (ch, expected_channel) in expected_block.iter().enumerate() {
                for (i, &expected) in expected_channel.iter().enumerate() {
                    let got = decoded.channels[ch][i];
                    if got != expected {
                        return Err(Error::VerifyMismatch {
                            location: VerifyLocation {
                                absolute_sample: absolute_sample + i as u64,
                                frame: frame_index,
                                channel: ch as u8,
                                subsample: i as u32,
                            },
                            expected: expected as i64,
                            got: got as i64,
                        });
                    }
                }
            }
            absolute_sample += decoded.block_size as u64;
            frame_index += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(channels: &[Vec<i32>], config: EncoderConfig) -> Vec<u8> {
        let mut out = Vec::new();
        let mut encoder = StreamEncoder::new(config).unwrap();
        for chunk_start in (0..channels[0].len()).step_by(4096) {
            let chunk_end = (chunk_start + 4096).min(channels[0].len());
            let block: Vec<Vec<i32>> = channels.iter().map(|c| c[chunk_start..chunk_end].to_vec()).collect();
            encoder.write_block(&block).unwrap();
        }
        encoder.finish(&mut out).unwrap();
        out
    }

    fn decode_all(bytes: Vec<u8>) -> (StreamInfo, Vec<Vec<i32>>) {
        let mut cursor = std::io::Cursor::new(bytes);
        let mut decoder = StreamDecoder::new(&mut cursor).unwrap();
        let channels = decoder.stream_info().channels as usize;
        let mut out = vec![Vec::new(); channels];
        loop {
            match decoder.read_next_frame().unwrap() {
                FrameOutcome::Frame(frame) => {
                    for (ch, samples) in frame.channels.into_iter().enumerate() {
                        out[ch].extend(samples);
                    }
                }
                FrameOutcome::Recovered(e) => panic!("unexpected recoverable error: {e}"),
                FrameOutcome::EndOfStream => break,
            }
        }
        let info = *decoder.stream_info();
        decoder.finish().unwrap();
        (info, out)
    }

    #[test]
    fn config_rejects_out_of_range_sample_rate() {
        let config = EncoderConfig::new(0, 2, 16);
        assert!(StreamEncoder::new(config).is_err());
    }

    #[test]
    fn config_rejects_subset_violating_block_size() {
        let config = EncoderConfig::new(44_100, 2, 16).block_size(32_000);
        assert!(StreamEncoder::new(config).is_err());
    }

    #[test]
    fn encodes_and_decodes_a_sine_wave_losslessly() {
        let left: Vec<i32> = (0..10_000).map(|i| ((i as f64 * 0.05).sin() * 10_000.0) as i32).collect();
        let right: Vec<i32> = left.iter().map(|&s| -s / 2).collect();

        let config = EncoderConfig::new(44_100, 2, 16);
        let bytes = encode(&[left.clone(), right.clone()], config);
        let (info, decoded) = decode_all(bytes);

        assert_eq!(info.total_samples, Some(10_000));
        assert_eq!(decoded[0], left);
        assert_eq!(decoded[1], right);
    }

    #[test]
    fn encodes_a_short_final_block() {
        let samples: Vec<i32> = (0..5000).map(|i| (i % 37) - 18).collect();
        let config = EncoderConfig::new(48_000, 1, 16);
        let bytes = encode(&[samples.clone()], config);
        let (_, decoded) = decode_all(bytes);
        assert_eq!(decoded[0], samples);
    }

    #[test]
    fn writing_after_a_short_block_is_rejected() {
        let config = EncoderConfig::new(44_100, 1, 16).block_size(256);
        let mut encoder = StreamEncoder::new(config).unwrap();
        encoder.write_block(&[vec![0i32; 100]]).unwrap();
        assert!(encoder.write_block(&[vec![0i32; 256]]).is_err());
    }

    #[test]
    fn verify_enabled_round_trips_successfully() {
        let samples: Vec<i32> = (0..2000).map(|i| ((i as f64 * 0.1).cos() * 3000.0) as i32).collect();
        let config = EncoderConfig::new(44_100, 1, 16).verify(true);
        let bytes = encode(&[samples.clone()], config);
        let (_, decoded) = decode_all(bytes);
        assert_eq!(decoded[0], samples);
    }

    #[test]
    fn seek_table_is_populated_when_requested() {
        let samples: Vec<i32> = (0..20_000).map(|i| (i % 50) - 25).collect();
        let config = EncoderConfig::new(44_100, 1, 16).block_size(1000).seek_points_every(Some(4000));
        let mut out = Vec::new();
        let mut encoder = StreamEncoder::new(config).unwrap();
        for chunk in samples.chunks(1000) {
            encoder.write_block(&[chunk.to_vec()]).unwrap();
        }
        encoder.finish(&mut out).unwrap();

        let mut cursor = std::io::Cursor::new(out);
        let (_, blocks) = metadata::read_all_metadata(&mut cursor).unwrap();
        let seek_table = blocks.iter().find_map(|b| match b {
            MetadataBlock::SeekTable(t) => Some(t),
            _ => None,
        });
        assert!(seek_table.is_some());
        assert!(!seek_table.unwrap().points.is_empty());
    }
}
