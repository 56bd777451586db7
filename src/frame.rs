// Flacore -- a lossless audio codec core in Rust
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! The `frame` module deals with the audio frames that follow the
//! metadata blocks: frame headers, channel decorrelation, and the
//! sample-rate/block-size code tables used to keep common
//! configurations out of the header's variable-length tail.

use crate::bitstream::{BitReader, BitWriter};
use crate::error::{Error, Result};

/// The 14-bit frame sync code, left-aligned in a 16-bit read alongside
/// the reserved bit and blocking-strategy bit.
const FRAME_SYNC: u16 = 0b1111_1111_1111_10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockingStrategy {
    Fixed,
    Variable,
}

/// Either a frame number (fixed-blocksize streams) or a sample number
/// (variable-blocksize streams), as coded in the frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockTime {
    FrameNumber(u32),
    SampleNumber(u64),
}

/// How the channels in a frame are coded: independently, or with one of
/// the three stereo decorrelation modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelAssignment {
    Independent(u8),
    LeftSide,
    RightSide,
    MidSide,
}

impl ChannelAssignment {
    pub fn channels(self) -> u8 {
        match self {
            ChannelAssignment::Independent(n) => n,
            ChannelAssignment::LeftSide | ChannelAssignment::RightSide | ChannelAssignment::MidSide => 2,
        }
    }

    /// Bits per sample to use when decoding channel `ch` (0-based): the
    /// side channel in a stereo decorrelation mode carries one extra bit.
    pub fn bits_per_sample_for_channel(self, ch: u8, frame_bps: u8) -> u8 {
        match self {
            ChannelAssignment::Independent(_) => frame_bps,
            ChannelAssignment::LeftSide => {
                if ch == 1 {
                    frame_bps + 1
                } else {
                    frame_bps
                }
            }
            ChannelAssignment::RightSide => {
                if ch == 0 {
                    frame_bps + 1
                } else {
                    frame_bps
                }
            }
            ChannelAssignment::MidSide => {
                if ch == 1 {
                    frame_bps + 1
                } else {
                    frame_bps
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FrameHeader {
    pub block_time: BlockTime,
    pub block_size: u16,
    pub sample_rate: Option<u32>,
    pub channel_assignment: ChannelAssignment,
    pub bits_per_sample: Option<u8>,
}

impl FrameHeader {
    /// The inter-channel sample number of this frame's first sample.
    pub fn first_sample(&self) -> u64 {
        match self.block_time {
            BlockTime::FrameNumber(n) => n as u64 * self.block_size as u64,
            BlockTime::SampleNumber(s) => s,
        }
    }
}

fn block_size_code(block_size: u16) -> (u8, Option<Tail>) {
    match block_size {
        192 => (0b0001, None),
        576 | 1152 | 2304 | 4608 => {
            let n = (block_size / 576).trailing_zeros() as u8;
            (0b0010 + n, None)
        }
        256 | 512 | 1024 | 2048 | 4096 | 8192 | 16384 | 32768 => {
            let n = (block_size / 256).trailing_zeros() as u8;
            (0b1000 + n, None)
        }
        bs if bs <= 256 => (0b0110, Some(Tail::Block8(bs - 1))),
        bs => (0b0111, Some(Tail::Block16(bs - 1))),
    }
}

enum Tail {
    Block8(u16),
    Block16(u16),
}

fn sample_rate_code(sample_rate: Option<u32>) -> (u8, Option<RateTail>) {
    match sample_rate {
        None => (0b0000, None),
        Some(88_200) => (0b0001, None),
        Some(176_400) => (0b0010, None),
        Some(192_000) => (0b0011, None),
        Some(8_000) => (0b0100, None),
        Some(16_000) => (0b0101, None),
        Some(22_050) => (0b0110, None),
        Some(24_000) => (0b0111, None),
        Some(32_000) => (0b1000, None),
        Some(44_100) => (0b1001, None),
        Some(48_000) => (0b1010, None),
        Some(96_000) => (0b1011, None),
        Some(hz) if hz <= 255 => (0b1100, Some(RateTail::Hz8(hz as u16))),
        Some(hz) if hz <= 65_535 => (0b1101, Some(RateTail::Hz16(hz as u16))),
        Some(hz) if hz % 10 == 0 && hz / 10 <= 65_535 => (0b1110, Some(RateTail::Hz16Tens((hz / 10) as u16))),
        Some(_) => (0b1111, None), // Will be rejected: not representable.
    }
}

enum RateTail {
    Hz8(u16),
    Hz16(u16),
    Hz16Tens(u16),
}

fn bits_per_sample_code(bps: Option<u8>) -> Result<u8> {
    match bps {
        None => Ok(0b000),
        Some(8) => Ok(0b001),
        Some(12) => Ok(0b010),
        Some(16) => Ok(0b100),
        Some(20) => Ok(0b101),
        Some(24) => Ok(0b110),
        Some(_) => Ok(0b000), // Non-standard widths fall back to STREAMINFO.
    }
}

/// Reads a frame header, folding its bytes into the reader's CRC-8
/// accumulator, and checks the trailing CRC-8 byte.
pub fn read_frame_header(reader: &mut BitReader) -> Result<FrameHeader> {
    reader.reset_read_crc();

    let sync_and_strategy = reader.read_uint(16)? as u16;
    let sync_code = sync_and_strategy >> 2;
    if sync_code != FRAME_SYNC {
        return Err(Error::LostSync);
    }
    if sync_and_strategy & 0b10 != 0 {
        return Err(Error::BadHeader("reserved bit set in frame header"));
    }
    let blocking_strategy = if sync_and_strategy & 0b01 == 0 {
        BlockingStrategy::Fixed
    } else {
        BlockingStrategy::Variable
    };

    read_frame_header_body(reader, blocking_strategy)
}

/// Scans the byte-aligned stream for the next plausible frame sync,
/// then parses the header that follows it. Used to resynchronize after
/// a corrupt frame rather than giving up on the rest of the stream.
pub fn resync_and_read_frame_header(reader: &mut BitReader) -> Result<FrameHeader> {
    loop {
        if reader.peek_u8()? != 0xff {
            reader.read_uint(8)?;
            continue;
        }

        reader.reset_read_crc();
        let sync_and_strategy = reader.read_uint(16)? as u16;
        let sync_code = sync_and_strategy >> 2;
        if sync_code == FRAME_SYNC && sync_and_strategy & 0b10 == 0 {
            let blocking_strategy = if sync_and_strategy & 0b01 == 0 {
                BlockingStrategy::Fixed
            } else {
                BlockingStrategy::Variable
            };
            if let Ok(header) = read_frame_header_body(reader, blocking_strategy) {
                return Ok(header);
            }
        }
        // False alarm: the two bytes just consumed did not open a valid
        // frame. Keep scanning from here.
    }
}

fn read_frame_header_body(reader: &mut BitReader, blocking_strategy: BlockingStrategy) -> Result<FrameHeader> {
    let bs_sr = reader.read_uint(8)? as u8;
    let block_size_bits = bs_sr >> 4;
    let mut block_size = 0u16;
    let mut read_8bit_bs = false;
    let mut read_16bit_bs = false;
    match block_size_bits {
        0b0000 => return Err(Error::BadHeader("reserved block size code")),
        0b0001 => block_size = 192,
        n if (0b0010..=0b0101).contains(&n) => block_size = 576 * (1u16 << (n - 2)),
        0b0110 => read_8bit_bs = true,
        0b0111 => read_16bit_bs = true,
        n => block_size = 256 * (1u16 << (n - 8)),
    }

    let sample_rate_bits = bs_sr & 0b1111;
    let mut sample_rate = None;
    let mut read_8bit_sr = false;
    let mut read_16bit_sr = false;
    let mut read_16bit_sr_tens = false;
    match sample_rate_bits {
        0b0000 => {}
        0b0001 => sample_rate = Some(88_200),
        0b0010 => sample_rate = Some(176_400),
        0b0011 => sample_rate = Some(192_000),
        0b0100 => sample_rate = Some(8_000),
        0b0101 => sample_rate = Some(16_000),
        0b0110 => sample_rate = Some(22_050),
        0b0111 => sample_rate = Some(24_000),
        0b1000 => sample_rate = Some(32_000),
        0b1001 => sample_rate = Some(44_100),
        0b1010 => sample_rate = Some(48_000),
        0b1011 => sample_rate = Some(96_000),
        0b1100 => read_8bit_sr = true,
        0b1101 => read_16bit_sr = true,
        0b1110 => read_16bit_sr_tens = true,
        _ => return Err(Error::BadHeader("reserved sample rate code")),
    }

    let chan_bps_res = reader.read_uint(8)? as u8;
    let channel_assignment = match chan_bps_res >> 4 {
        n if n < 8 => ChannelAssignment::Independent(n + 1),
        0b1000 => ChannelAssignment::LeftSide,
        0b1001 => ChannelAssignment::RightSide,
        0b1010 => ChannelAssignment::MidSide,
        _ => return Err(Error::BadHeader("reserved channel assignment code")),
    };

    let bits_per_sample = match (chan_bps_res & 0b0000_1110) >> 1 {
        0b000 => None,
        0b001 => Some(8),
        0b010 => Some(12),
        0b100 => Some(16),
        0b101 => Some(20),
        0b110 => Some(24),
        _ => return Err(Error::BadHeader("reserved bits-per-sample code")),
    };

    if chan_bps_res & 1 != 0 {
        return Err(Error::BadHeader("reserved bit set after bits-per-sample code"));
    }

    let block_time = match blocking_strategy {
        BlockingStrategy::Variable => {
            let sample = reader.read_utf8_uint()?;
            if sample == crate::bitstream::UTF8_INVALID {
                return Err(Error::BadHeader("invalid UTF-8-coded sample number"));
            }
            BlockTime::SampleNumber(sample)
        }
        BlockingStrategy::Fixed => {
            let frame = reader.read_utf8_uint()?;
            if frame == crate::bitstream::UTF8_INVALID || frame > 0x7fff_ffff {
                return Err(Error::BadHeader("invalid UTF-8-coded frame number"));
            }
            BlockTime::FrameNumber(frame as u32)
        }
    };

    if read_8bit_bs {
        block_size = reader.read_uint(8)? as u16 + 1;
    }
    if read_16bit_bs {
        let bs = reader.read_uint(16)? as u16;
        if bs == 0xffff {
            return Err(Error::BadHeader("block size field exceeds 65535"));
        }
        block_size = bs + 1;
    }
    if block_size < 16 {
        return Err(Error::BadHeader("block size smaller than 16"));
    }

    if read_8bit_sr {
        sample_rate = Some(reader.read_uint(8)? as u32);
    }
    if read_16bit_sr {
        sample_rate = Some(reader.read_uint(16)? as u32);
    }
    if read_16bit_sr_tens {
        sample_rate = Some(reader.read_uint(16)? as u32 * 10);
    }

    let computed_crc = reader.get_read_crc8();
    let stored_crc = reader.read_uint(8)? as u8;
    if computed_crc != stored_crc {
        return Err(Error::BadHeader("frame header CRC-8 mismatch"));
    }

    Ok(FrameHeader {
        block_time,
        block_size,
        sample_rate,
        channel_assignment,
        bits_per_sample,
    })
}

/// Writes a frame header, folding its bytes into the writer's CRC-8
/// accumulator and appending the resulting CRC-8 byte.
pub fn write_frame_header(writer: &mut BitWriter, header: &FrameHeader) -> Result<()> {
    writer.reset_write_crc();

    let blocking_strategy = match header.block_time {
        BlockTime::FrameNumber(_) => 0u64,
        BlockTime::SampleNumber(_) => 1u64,
    };
    writer.write_uint(FRAME_SYNC as u64, 14);
    writer.write_uint(0, 1); // Reserved.
    writer.write_uint(blocking_strategy, 1);

    let (bs_code, bs_tail) = block_size_code(header.block_size);
    let (sr_code, sr_tail) = sample_rate_code(header.sample_rate);
    writer.write_uint(bs_code as u64, 4);
    writer.write_uint(sr_code as u64, 4);

    let channel_code = match header.channel_assignment {
        ChannelAssignment::Independent(n) => (n - 1) as u64,
        ChannelAssignment::LeftSide => 0b1000,
        ChannelAssignment::RightSide => 0b1001,
        ChannelAssignment::MidSide => 0b1010,
    };
    writer.write_uint(channel_code, 4);
    writer.write_uint(bits_per_sample_code(header.bits_per_sample)? as u64, 3);
    writer.write_uint(0, 1); // Reserved.

    match header.block_time {
        BlockTime::FrameNumber(n) => writer.write_utf8_uint(n as u64),
        BlockTime::SampleNumber(s) => writer.write_utf8_uint(s),
    }

    if let Some(Tail::Block8(v)) = bs_tail {
        writer.write_uint(v as u64, 8);
    }
    if let Some(Tail::Block16(v)) = bs_tail {
        writer.write_uint(v as u64, 16);
    }
    match sr_tail {
        Some(RateTail::Hz8(v)) => writer.write_uint(v as u64, 8),
        Some(RateTail::Hz16(v)) => writer.write_uint(v as u64, 16),
        Some(RateTail::Hz16Tens(v)) => writer.write_uint(v as u64, 16),
        None => {}
    }

    let crc = writer.get_write_crc8();
    writer.write_uint(crc as u64, 8);
    Ok(())
}

/// Converts an independent left/side pair into left/right in place.
/// `buffer` holds `left` followed by `side`, each `block_size` long.
pub fn restore_left_side(buffer: &mut [i32]) {
    let block_size = buffer.len() / 2;
    for i in 0..block_size {
        let left = buffer[i];
        let side = buffer[block_size + i];
        buffer[block_size + i] = left - side;
    }
}

/// Converts a side/right pair into left/right in place.
pub fn restore_right_side(buffer: &mut [i32]) {
    let block_size = buffer.len() / 2;
    for i in 0..block_size {
        let side = buffer[i];
        let right = buffer[block_size + i];
        buffer[i] = side + right;
    }
}

/// Converts a mid/side pair into left/right in place, correcting for
/// the truncated rounding that halving introduces when the side sample
/// is odd.
pub fn restore_mid_side(buffer: &mut [i32]) {
    let block_size = buffer.len() / 2;
    for i in 0..block_size {
        let mid = buffer[i];
        let side = buffer[block_size + i];
        let doubled_mid = (mid << 1) | (side & 1);
        buffer[i] = (doubled_mid + side) >> 1;
        buffer[block_size + i] = (doubled_mid - side) >> 1;
    }
}

/// Restores the channels in `buffer` (one `block_size`-long run per
/// coded channel) from whatever decorrelation `assignment` specifies,
/// leaving independently-coded channels untouched.
pub fn restore_channels(assignment: ChannelAssignment, block_size: u16, buffer: &mut [i32]) {
    let pair_len = block_size as usize * 2;
    match assignment {
        ChannelAssignment::Independent(_) => {}
        ChannelAssignment::LeftSide => restore_left_side(&mut buffer[..pair_len]),
        ChannelAssignment::RightSide => restore_right_side(&mut buffer[..pair_len]),
        ChannelAssignment::MidSide => restore_mid_side(&mut buffer[..pair_len]),
    }
}

/// Converts a decoded left/right pair into the storage form required
/// by `assignment`, in place (`buffer` holds left then right).
pub fn decorrelate(assignment: ChannelAssignment, buffer: &mut [i32]) {
    let block_size = buffer.len() / 2;
    match assignment {
        ChannelAssignment::Independent(_) => {}
        ChannelAssignment::LeftSide => {
            for i in 0..block_size {
                let left = buffer[i];
                let right = buffer[block_size + i];
                buffer[block_size + i] = left - right;
            }
        }
        ChannelAssignment::RightSide => {
            for i in 0..block_size {
                let left = buffer[i];
                let right = buffer[block_size + i];
                buffer[i] = left - right;
            }
        }
        ChannelAssignment::MidSide => {
            for i in 0..block_size {
                let left = buffer[i] as i64;
                let right = buffer[block_size + i] as i64;
                let mid = (left + right) >> 1;
                let side = left - right;
                buffer[i] = mid as i32;
                buffer[block_size + i] = side as i32;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_traits::BytesSink;

    #[test]
    fn decode_left_side_matches_known_vector() {
        let mut buffer = vec![2i32, 5, 83, 113, 127, -63, -45, -15, 7, 38, 142, 238, 0, -152, -52, -18];
        let expected = vec![2i32, 5, 83, 113, 127, -63, -45, -15, -5, -33, -59, -125, 127, 89, 7, 3];
        restore_left_side(&mut buffer);
        assert_eq!(buffer, expected);
    }

    #[test]
    fn decode_right_side_matches_known_vector() {
        let mut buffer = vec![7i32, 38, 142, 238, 0, -152, -52, -18, -5, -33, -59, -125, 127, 89, 7, 3];
        let expected = vec![2i32, 5, 83, 113, 127, -63, -45, -15, -5, -33, -59, -125, 127, 89, 7, 3];
        restore_right_side(&mut buffer);
        assert_eq!(buffer, expected);
    }

    #[test]
    fn decode_mid_side_matches_known_vector() {
        let mut buffer = vec![-2i32, -14, 12, -6, 127, 13, -19, -6, 7, 38, 142, 238, 0, -152, -52, -18];
        let expected = vec![2i32, 5, 83, 113, 127, -63, -45, -15, -5, -33, -59, -125, 127, 89, 7, 3];
        restore_mid_side(&mut buffer);
        assert_eq!(buffer, expected);
    }

    #[test]
    fn decorrelate_then_restore_mid_side_is_identity() {
        let left_right = vec![2i32, 5, 83, 113, -5, -33, -59, -125];
        let mut buffer = left_right.clone();
        decorrelate(ChannelAssignment::MidSide, &mut buffer);
        restore_mid_side(&mut buffer);
        assert_eq!(buffer, left_right);
    }

    fn roundtrip_header(header: FrameHeader) -> FrameHeader {
        let mut writer = BitWriter::new();
        write_frame_header(&mut writer, &header).unwrap();
        writer.zero_pad_to_byte();

        let mut bytes = Vec::new();
        bytes.write(writer.as_bytes(), 0, 0).unwrap();
        let mut cursor = std::io::Cursor::new(bytes);
        let mut reader = BitReader::new(&mut cursor);
        read_frame_header(&mut reader).unwrap()
    }

    #[test]
    fn frame_header_roundtrip_fixed_blocksize() {
        let header = FrameHeader {
            block_time: BlockTime::FrameNumber(12),
            block_size: 4096,
            sample_rate: Some(44_100),
            channel_assignment: ChannelAssignment::MidSide,
            bits_per_sample: Some(16),
        };
        let read_back = roundtrip_header(header);
        assert_eq!(read_back.block_size, 4096);
        assert_eq!(read_back.sample_rate, Some(44_100));
        assert_eq!(read_back.channel_assignment, ChannelAssignment::MidSide);
        assert!(matches!(read_back.block_time, BlockTime::FrameNumber(12)));
    }

    #[test]
    fn frame_header_roundtrip_unusual_block_size_and_rate() {
        let header = FrameHeader {
            block_time: BlockTime::SampleNumber(123_456),
            block_size: 5000,
            sample_rate: Some(37_123),
            channel_assignment: ChannelAssignment::Independent(1),
            bits_per_sample: None,
        };
        let read_back = roundtrip_header(header);
        assert_eq!(read_back.block_size, 5000);
        assert_eq!(read_back.sample_rate, Some(37_123));
        assert!(matches!(read_back.block_time, BlockTime::SampleNumber(123_456)));
    }

    #[test]
    fn corrupted_header_crc_is_detected() {
        let header = FrameHeader {
            block_time: BlockTime::FrameNumber(1),
            block_size: 1024,
            sample_rate: Some(48_000),
            channel_assignment: ChannelAssignment::Independent(2),
            bits_per_sample: Some(24),
        };
        let mut writer = BitWriter::new();
        write_frame_header(&mut writer, &header).unwrap();
        writer.zero_pad_to_byte();
        let mut bytes = writer.into_bytes();
        *bytes.last_mut().unwrap() ^= 0xff;

        let mut cursor = std::io::Cursor::new(bytes);
        let mut reader = BitReader::new(&mut cursor);
        assert!(read_frame_header(&mut reader).is_err());
    }
}
