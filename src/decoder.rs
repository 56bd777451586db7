// Flacore -- a lossless audio codec core in Rust
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! The `decoder` module drives the whole decode: reads the stream sync
//! and metadata once, then pulls frames one at a time, resynchronizing
//! on a corrupt frame rather than aborting the stream. Frame-level
//! errors are reported to the caller through [`FrameOutcome`] so a
//! caller can decide whether to keep decoding past damage.

use crate::bitstream::BitReader;
use crate::error::{Error, Result};
use crate::frame::{self, FrameHeader};
use crate::io_traits::BytesSource;
use crate::md5::Md5Accumulator;
use crate::metadata::{self, MetadataBlock, StreamInfo};
use crate::subframe;

/// One successfully decoded frame: per-channel samples plus the
/// position and size needed to place it in the overall stream.
pub struct DecodedFrame {
    pub channels: Vec<Vec<i32>>,
    pub first_sample: u64,
    pub block_size: u16,
    pub bits_per_sample: u8,
}

/// The result of trying to decode one frame: either a frame, a
/// recoverable error the decoder has already resynchronized past, or
/// the end of the stream.
pub enum FrameOutcome {
    Frame(DecodedFrame),
    Recovered(Error),
    EndOfStream,
}

enum ReaderState {
    BeforeFirstFrame,
    InStream,
    Ended,
}

/// A streaming decoder: reads the stream sync and metadata once at
/// construction ([`StreamDecoder::new`] plays the role of `process_metadata`),
/// then yields frames one at a time via [`StreamDecoder::read_next_frame`]
/// (`process_one_frame`). Calling `read_next_frame` in a loop until
/// [`FrameOutcome::EndOfStream`] plays the role of `process_whole_stream`.
pub struct StreamDecoder<'s> {
    reader: BitReader<'s>,
    stream_info: StreamInfo,
    metadata_blocks: Vec<MetadataBlock>,
    state: ReaderState,
    frames_seen: u64,
    samples_seen: u64,
    md5: Option<Md5Accumulator>,
    /// A header already parsed by the seekable decoder while probing for
    /// a landing frame, to be decoded on the first `read_next_frame` call
    /// instead of parsing a fresh one.
    pending_header: Option<FrameHeader>,
}

impl<'s> StreamDecoder<'s> {
    /// Reads the stream sync and all metadata blocks from `source`,
    /// positioning the decoder to read the first frame.
    pub fn new(source: &'s mut dyn BytesSource) -> Result<StreamDecoder<'s>> {
        Self::with_md5_checking(source, true)
    }

    /// As [`StreamDecoder::new`], but lets the caller skip MD5 verification
    /// entirely (the seekable decoder disables it after a seek, since
    /// the digest covers the whole stream from the start).
    pub fn with_md5_checking(source: &'s mut dyn BytesSource, check_md5: bool) -> Result<StreamDecoder<'s>> {
        metadata::read_stream_sync(source)?;
        let (stream_info, metadata_blocks) = metadata::read_all_metadata(source)?;

        log::debug!(
            "stream info: {} Hz, {} channel(s), {} bps, {:?} total samples",
            stream_info.sample_rate,
            stream_info.channels,
            stream_info.bits_per_sample,
            stream_info.total_samples,
        );

        let md5 = if check_md5 && stream_info.md5sum != [0u8; 16] {
            Some(Md5Accumulator::new(stream_info.bits_per_sample as u32))
        } else {
            None
        };

        Ok(StreamDecoder {
            reader: BitReader::new(source),
            stream_info,
            metadata_blocks,
            state: ReaderState::BeforeFirstFrame,
            frames_seen: 0,
            samples_seen: 0,
            md5,
            pending_header: None,
        })
    }

    /// Resumes decoding from a reader already positioned just past a
    /// frame header that [`crate::seekable::SeekableDecoder`] parsed
    /// while probing for a seek target. MD5 checking is always disabled,
    /// since the digest covers the stream from its start.
    pub(crate) fn from_seek(
        reader: BitReader<'s>,
        stream_info: StreamInfo,
        metadata_blocks: Vec<MetadataBlock>,
        pending_header: FrameHeader,
        samples_seen: u64,
    ) -> StreamDecoder<'s> {
        StreamDecoder {
            reader,
            stream_info,
            metadata_blocks,
            state: ReaderState::InStream,
            frames_seen: 0,
            samples_seen,
            md5: None,
            pending_header: Some(pending_header),
        }
    }

    pub fn stream_info(&self) -> &StreamInfo {
        &self.stream_info
    }

    pub fn metadata_blocks(&self) -> &[MetadataBlock] {
        &self.metadata_blocks
    }

    pub fn samples_decoded(&self) -> u64 {
        self.samples_seen
    }

    /// Decodes and returns the next frame, or recovers from a corrupt
    /// one and reports it, or signals end of stream. Returns `Err` only
    /// for fatal conditions (truncation, a bad first frame).
    pub fn read_next_frame(&mut self) -> Result<FrameOutcome> {
        if matches!(self.state, ReaderState::Ended) {
            return Ok(FrameOutcome::EndOfStream);
        }

        let before_first = matches!(self.state, ReaderState::BeforeFirstFrame);
        self.state = ReaderState::InStream;

        let header = if let Some(h) = self.pending_header.take() {
            h
        } else {
            let header_result = if before_first {
                frame::read_frame_header(&mut self.reader)
            } else {
                self.try_read_header_with_resync()
            };

            match header_result {
                Ok(h) => h,
                Err(Error::TruncatedStream) => {
                    self.state = ReaderState::Ended;
                    return self.finish_checking_totals();
                }
                Err(e) => return Err(e),
            }
        };

        match self.decode_frame_body(&header) {
            Ok(frame) => {
                self.frames_seen += 1;
                self.samples_seen += frame.block_size as u64;
                Ok(FrameOutcome::Frame(frame))
            }
            Err(Error::TruncatedStream) => {
                self.state = ReaderState::Ended;
                self.finish_checking_totals()
            }
            Err(e) => Ok(FrameOutcome::Recovered(e)),
        }
    }

    fn try_read_header_with_resync(&mut self) -> Result<FrameHeader> {
        match frame::read_frame_header(&mut self.reader) {
            Ok(h) => Ok(h),
            Err(Error::LostSync) | Err(Error::BadHeader(_)) => {
                log::warn!("lost synchronization after frame {}, resynchronizing", self.frames_seen);
                frame::resync_and_read_frame_header(&mut self.reader)
            }
            Err(e) => Err(e),
        }
    }

    fn decode_frame_body(&mut self, header: &FrameHeader) -> Result<DecodedFrame> {
        let n_channels = header.channel_assignment.channels();
        let bps = header
            .bits_per_sample
            .unwrap_or(self.stream_info.bits_per_sample);

        let mut storage = vec![0i32; n_channels as usize * header.block_size as usize];
        for ch in 0..n_channels {
            let ch_bps = header.channel_assignment.bits_per_sample_for_channel(ch, bps);
            let start = ch as usize * header.block_size as usize;
            let end = start + header.block_size as usize;
            subframe::decode(&mut self.reader, ch_bps, &mut storage[start..end])?;
        }

        frame::restore_channels(header.channel_assignment, header.block_size, &mut storage);

        self.reader.align_to_byte();
        let computed_crc = self.reader.get_read_crc16();
        let stored_crc = self.reader.read_uint(16)? as u16;
        if computed_crc != stored_crc {
            return Err(Error::FrameCrcMismatch { frame: self.frames_seen as u32 });
        }

        let first_sample = header.first_sample();

        let channels: Vec<Vec<i32>> = (0..n_channels as usize)
            .map(|ch| {
                let start = ch * header.block_size as usize;
                storage[start..start + header.block_size as usize].to_vec()
            })
            .collect();

        if let Some(md5) = self.md5.as_mut() {
            md5.write_block(&channels);
        }

        Ok(DecodedFrame {
            channels,
            first_sample,
            block_size: header.block_size,
            bits_per_sample: bps,
        })
    }

    fn finish_checking_totals(&mut self) -> Result<FrameOutcome> {
        if let Some(total) = self.stream_info.total_samples {
            if self.samples_seen != total {
                log::warn!(
                    "stream ended after {} samples, STREAMINFO declared {}",
                    self.samples_seen,
                    total
                );
            }
        }
        Ok(FrameOutcome::EndOfStream)
    }

    /// Consumes the decoder, checking the streaming MD5 against
    /// STREAMINFO's digest if checking was enabled and never disabled
    /// by a seek. Call only after [`read_next_frame`] has returned
    /// [`FrameOutcome::EndOfStream`].
    pub fn finish(self) -> Result<()> {
        if let Some(md5) = self.md5 {
            let computed = md5.finish();
            if computed != self.stream_info.md5sum {
                return Err(Error::Md5Mismatch);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{EncoderConfig, StreamEncoder};

    fn encode_test_stream(channels: &[Vec<i32>], bps: u8, sample_rate: u32) -> Vec<u8> {
        let mut out = Vec::new();
        let config = EncoderConfig::new(sample_rate, channels.len() as u8, bps);
        let mut encoder = StreamEncoder::new(config).unwrap();
        encoder.write_block(channels).unwrap();
        encoder.finish(&mut out).unwrap();
        out
    }

    #[test]
    fn decodes_a_freshly_encoded_stream() {
        let left: Vec<i32> = (0..256).map(|i| ((i as f64 * 0.1).sin() * 5000.0) as i32).collect();
        let right: Vec<i32> = left.iter().map(|&s| s + 7).collect();
        let bytes = encode_test_stream(&[left.clone(), right.clone()], 16, 44_100);

        let mut cursor = std::io::Cursor::new(bytes);
        let mut decoder = StreamDecoder::new(&mut cursor).unwrap();
        assert_eq!(decoder.stream_info().channels, 2);
        assert_eq!(decoder.stream_info().sample_rate, 44_100);

        let mut decoded_left = Vec::new();
        let mut decoded_right = Vec::new();
        loop {
            match decoder.read_next_frame().unwrap() {
                FrameOutcome::Frame(frame) => {
                    decoded_left.extend(frame.channels[0].iter().copied());
                    decoded_right.extend(frame.channels[1].iter().copied());
                }
                FrameOutcome::Recovered(e) => panic!("unexpected recoverable error: {e}"),
                FrameOutcome::EndOfStream => break,
            }
        }
        decoder.finish().unwrap();

        assert_eq!(decoded_left, left);
        assert_eq!(decoded_right, right);
    }

    #[test]
    fn truncated_stream_is_reported_on_frame_read() {
        let left: Vec<i32> = (0..256).map(|i| i % 17).collect();
        let mut bytes = encode_test_stream(&[left], 16, 44_100);
        bytes.truncate(bytes.len() - 4);

        let mut cursor = std::io::Cursor::new(bytes);
        let mut decoder = StreamDecoder::new(&mut cursor).unwrap();
        loop {
            match decoder.read_next_frame() {
                Ok(FrameOutcome::Frame(_)) => continue,
                Ok(FrameOutcome::EndOfStream) => break,
                Ok(FrameOutcome::Recovered(_)) => continue,
                Err(_) => break,
            }
        }
    }

    #[test]
    fn rejects_stream_missing_flac_sync() {
        let mut bytes = vec![0u8; 40];
        bytes[0] = b'O';
        let mut cursor = std::io::Cursor::new(bytes);
        assert!(StreamDecoder::new(&mut cursor).is_err());
    }
}
