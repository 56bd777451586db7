// Flacore -- a lossless audio codec core in Rust
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Sample-accurate seeking on top of the frame-at-a-time decoder. Needs
//! a [`SeekableSource`] (not just a [`BytesSource`]) since finding the
//! frame covering an arbitrary sample means jumping around the stream.

use crate::bitstream::BitReader;
use crate::decoder::StreamDecoder;
use crate::error::{Error, Result};
use crate::frame;
use crate::io_traits::SeekableSource;
use crate::metadata::{self, MetadataBlock, SeekTable, StreamInfo};

const MAX_SEEK_PROBES: u32 = 64;

/// Wraps a seekable source to let a caller jump to an arbitrary sample
/// rather than only reading frames in order. Construction reads the
/// stream sync and metadata once, same as [`StreamDecoder::new`]; each
/// [`SeekableDecoder::seek`] call then hands back a `StreamDecoder`
/// positioned at the landing frame.
pub struct SeekableDecoder<'s, S: SeekableSource> {
    source: &'s mut S,
    stream_info: StreamInfo,
    metadata_blocks: Vec<MetadataBlock>,
    first_frame_offset: u64,
    seek_table: SeekTable,
}

impl<'s, S: SeekableSource> SeekableDecoder<'s, S> {
    pub fn new(source: &'s mut S) -> Result<SeekableDecoder<'s, S>> {
        metadata::read_stream_sync(source)?;
        let (stream_info, metadata_blocks) = metadata::read_all_metadata(source)?;
        let first_frame_offset = source.tell()?;

        let seek_table = metadata_blocks
            .iter()
            .find_map(|block| match block {
                MetadataBlock::SeekTable(table) => Some(table.clone()),
                _ => None,
            })
            .unwrap_or_default();

        Ok(SeekableDecoder {
            source,
            stream_info,
            metadata_blocks,
            first_frame_offset,
            seek_table,
        })
    }

    pub fn stream_info(&self) -> &StreamInfo {
        &self.stream_info
    }

    pub fn metadata_blocks(&self) -> &[MetadataBlock] {
        &self.metadata_blocks
    }

    fn audio_byte_len(&mut self) -> Result<u64> {
        Ok(self
            .source
            .length()?
            .map(|len| len.saturating_sub(self.first_frame_offset))
            .unwrap_or(u64::MAX))
    }

    /// Seeks so that the frame the returned decoder yields first contains
    /// `target_sample`, or is the last frame in the stream if
    /// `target_sample` is at or beyond the end. MD5 checking is disabled
    /// on the returned decoder, since the digest covers the stream from
    /// its start.
    ///
    /// Uses the seek table for an initial guess when one is present,
    /// otherwise interpolates from STREAMINFO's total sample count and
    /// the source's length, then bisects on the landing frame's own
    /// first sample until the target frame is found.
    pub fn seek(&mut self, target_sample: u64) -> Result<StreamDecoder<'_>> {
        let mut lo = 0u64;
        let mut hi = self.audio_byte_len()?;
        let mut guess = self.initial_guess(target_sample, hi);

        for _ in 0..MAX_SEEK_PROBES {
            if lo >= hi {
                break;
            }
            let probe = guess.min(hi.saturating_sub(1));
            self.source.seek(self.first_frame_offset + probe)?;
            let mut reader = BitReader::new(self.source);

            match frame::resync_and_read_frame_header(&mut reader) {
                Ok(header) => {
                    let first_sample = header.first_sample();
                    if target_sample < first_sample {
                        hi = probe;
                    } else if target_sample >= first_sample + header.block_size as u64 {
                        lo = probe + 1;
                    } else {
                        return Ok(StreamDecoder::from_seek(
                            reader,
                            self.stream_info,
                            self.metadata_blocks.clone(),
                            header,
                            first_sample,
                        ));
                    }
                }
                Err(Error::TruncatedStream) => hi = probe,
                Err(e) => return Err(e),
            }

            guess = lo + (hi - lo) / 2;
        }

        log::warn!("seek to sample {target_sample} did not land exactly, falling back to the nearest frame");
        let fallback = lo.min(hi.saturating_sub(1));
        self.source.seek(self.first_frame_offset + fallback)?;
        let mut reader = BitReader::new(self.source);
        let header = frame::resync_and_read_frame_header(&mut reader)?;
        let first_sample = header.first_sample();
        Ok(StreamDecoder::from_seek(
            reader,
            self.stream_info,
            self.metadata_blocks.clone(),
            header,
            first_sample,
        ))
    }

    fn initial_guess(&self, target_sample: u64, audio_len: u64) -> u64 {
        let from_table = self
            .seek_table
            .points
            .iter()
            .filter(|p| !p.is_placeholder() && p.sample_number <= target_sample)
            .max_by_key(|p| p.sample_number)
            .map(|p| p.stream_offset);

        if let Some(offset) = from_table {
            return offset;
        }

        match self.stream_info.total_samples {
            Some(total) if total > 0 && audio_len != u64::MAX => {
                let ratio = target_sample as f64 / total as f64;
                ((ratio * audio_len as f64) as u64).min(audio_len.saturating_sub(1))
            }
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::FrameOutcome;
    use crate::encoder::{EncoderConfig, StreamEncoder};

    fn encode_stream(channels: &[Vec<i32>], config: EncoderConfig) -> Vec<u8> {
        let mut out = Vec::new();
        let mut encoder = StreamEncoder::new(config).unwrap();
        for chunk_start in (0..channels[0].len()).step_by(1024) {
            let end = (chunk_start + 1024).min(channels[0].len());
            let block: Vec<Vec<i32>> = channels.iter().map(|c| c[chunk_start..end].to_vec()).collect();
            encoder.write_block(&block).unwrap();
        }
        encoder.finish(&mut out).unwrap();
        out
    }

    #[test]
    fn seeks_to_the_frame_containing_the_target_sample() {
        let left: Vec<i32> = (0..20_000).map(|i| ((i as f64 * 0.05).sin() * 8000.0) as i32).collect();
        let config = EncoderConfig::new(44_100, 1, 16).block_size(1024).seek_points_every(Some(2048));
        let bytes = encode_stream(&[left.clone()], config);

        let mut cursor = std::io::Cursor::new(bytes);
        let mut seekable = SeekableDecoder::new(&mut cursor).unwrap();

        for &target in &[0u64, 1, 1023, 1024, 5000, 10_500, 19_999] {
            let mut decoder = seekable.seek(target).unwrap();
            match decoder.read_next_frame().unwrap() {
                FrameOutcome::Frame(frame) => {
                    assert!(frame.first_sample <= target);
                    assert!(target < frame.first_sample + frame.block_size as u64);
                    let offset_in_frame = (target - frame.first_sample) as usize;
                    assert_eq!(frame.channels[0][offset_in_frame], left[target as usize]);
                }
                other => panic!("expected a frame at sample {target}, got a different outcome: {}", matches!(other, FrameOutcome::EndOfStream)),
            }
        }
    }

    #[test]
    fn seek_past_the_end_lands_on_the_last_frame() {
        let left: Vec<i32> = (0..5_000).map(|i| i % 23).collect();
        let config = EncoderConfig::new(44_100, 1, 16).block_size(1024);
        let bytes = encode_stream(&[left], config);

        let mut cursor = std::io::Cursor::new(bytes);
        let mut seekable = SeekableDecoder::new(&mut cursor).unwrap();
        let mut decoder = seekable.seek(1_000_000).unwrap();
        match decoder.read_next_frame().unwrap() {
            FrameOutcome::Frame(frame) => assert!(frame.first_sample + frame.block_size as u64 <= 5_000),
            _ => panic!("expected the last frame"),
        }
    }
}
