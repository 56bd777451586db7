// Flacore -- a lossless audio codec core in Rust
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Streaming MD5 over raw PCM, fed one decoded or pre-encode block at a
//! time. The digest is taken over the samples exactly as they would sit
//! in an interleaved PCM buffer: signed, little-endian, using the
//! smallest whole number of bytes that holds `bits_per_sample`.
//!
//! The encoder uses this to fill STREAMINFO's `md5sum` field; the decoder
//! uses it to check a decoded stream against that same field.

/// Accumulates an MD5 digest over interleaved PCM samples.
pub struct Md5Accumulator {
    ctx: md5::Context,
    bytes_per_sample: usize,
    scratch: Vec<u8>,
}

impl Md5Accumulator {
    pub fn new(bits_per_sample: u32) -> Md5Accumulator {
        let bytes_per_sample = ((bits_per_sample + 7) / 8) as usize;
        Md5Accumulator {
            ctx: md5::Context::new(),
            bytes_per_sample,
            scratch: Vec::new(),
        }
    }

    /// Feeds one block's worth of samples, given as one slice per channel,
    /// all of the same length. Samples are interleaved channel-by-channel
    /// within each frame, matching the order raw PCM would be stored in.
    pub fn write_block(&mut self, channels: &[Vec<i32>]) {
        if channels.is_empty() {
            return;
        }
        let block_size = channels[0].len();
        self.scratch.clear();
        self.scratch
            .reserve(block_size * channels.len() * self.bytes_per_sample);
        for i in 0..block_size {
            for channel in channels {
                let sample = channel[i];
                let bytes = sample.to_le_bytes();
                self.scratch.extend_from_slice(&bytes[..self.bytes_per_sample]);
            }
        }
        self.ctx.consume(&self.scratch);
    }

    pub fn finish(self) -> [u8; 16] {
        self.ctx.compute().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stream_matches_known_empty_md5() {
        let acc = Md5Accumulator::new(16);
        let digest = acc.finish();
        // MD5 of the empty byte string.
        assert_eq!(
            digest,
            [
                0xd4, 0x1d, 0x8c, 0xd9, 0x8f, 0x00, 0xb2, 0x04, 0xe9, 0x80, 0x09, 0x98, 0xec, 0xf8,
                0x42, 0x7e
            ]
        );
    }

    #[test]
    fn sixteen_bit_two_channel_matches_manual_bytes() {
        let mut acc = Md5Accumulator::new(16);
        acc.write_block(&[vec![1, -1], vec![2, -2]]);
        let digest = acc.finish();

        let mut expected_bytes = Vec::new();
        for (l, r) in [(1i32, 2i32), (-1, -2)] {
            expected_bytes.extend_from_slice(&l.to_le_bytes()[..2]);
            expected_bytes.extend_from_slice(&r.to_le_bytes()[..2]);
        }
        let expected = md5::compute(&expected_bytes).0;
        assert_eq!(digest, expected);
    }

    #[test]
    fn twenty_bit_uses_three_bytes_per_sample() {
        let acc = Md5Accumulator::new(20);
        assert_eq!(acc.bytes_per_sample, 3);
    }
}
