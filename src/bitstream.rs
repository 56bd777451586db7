// Flacore -- a lossless audio codec core in Rust
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! An MSB-first bit buffer used by both the encoder and the decoder, with
//! rolling CRC-8/CRC-16 over byte-aligned spans. [`BitReader`] wraps a
//! [`BytesSource`] and refills by compacting unconsumed bytes toward the
//! front before pulling more; [`BitWriter`] accumulates bytes in a `Vec`.

use crate::crc::{update_crc16, update_crc8};
use crate::error::{Error, Result};
use crate::io_traits::BytesSource;

/// Sentinel returned by `read_utf8_uint` for any bit pattern that is not a
/// valid encoding.
pub const UTF8_INVALID: u64 = 0xFFFF_FFFF_FFFF_FFFF;

fn sign_extend(value: u64, bits: u32) -> i64 {
    if bits == 0 {
        return 0;
    }
    if bits >= 64 {
        return value as i64;
    }
    let sign_bit = 1u64 << (bits - 1);
    if value & sign_bit != 0 {
        (value as i64) - (1i64 << bits)
    } else {
        value as i64
    }
}

/// Reads bits MSB-first from a [`BytesSource`], refilling on demand.
pub struct BitReader<'s> {
    source: &'s mut dyn BytesSource,
    buf: Vec<u8>,
    /// Number of fully-consumed bytes at the front of `buf`.
    byte_pos: usize,
    /// Bits already consumed from `buf[byte_pos]` (0..8).
    bit_pos: u8,
    /// Index up to which `buf` has been folded into the CRC accumulators.
    crc_pos: usize,
    crc8: u8,
    crc16: u16,
}

impl<'s> BitReader<'s> {
    pub fn new(source: &'s mut dyn BytesSource) -> BitReader<'s> {
        BitReader {
            source,
            buf: Vec::new(),
            byte_pos: 0,
            bit_pos: 0,
            crc_pos: 0,
            crc8: 0,
            crc16: 0,
        }
    }

    fn bits_available(&self) -> usize {
        (self.buf.len() - self.byte_pos) * 8 - self.bit_pos as usize
    }

    fn compact(&mut self) {
        if self.byte_pos > 0 {
            self.buf.drain(0..self.byte_pos);
            self.crc_pos = self.crc_pos.saturating_sub(self.byte_pos);
            self.byte_pos = 0;
        }
    }

    fn refill(&mut self) -> Result<usize> {
        self.compact();
        let old_len = self.buf.len();
        const CHUNK: usize = 4096;
        self.buf.resize(old_len + CHUNK, 0);
        let n = self.source.read(&mut self.buf[old_len..])?;
        self.buf.truncate(old_len + n);
        Ok(n)
    }

    fn ensure_bits(&mut self, bits: u32) -> Result<()> {
        while self.bits_available() < bits as usize {
            if self.refill()? == 0 {
                return Err(Error::TruncatedStream);
            }
        }
        Ok(())
    }

    fn fold_crc(&mut self) {
        for &byte in &self.buf[self.crc_pos..self.byte_pos] {
            self.crc8 = update_crc8(self.crc8, byte);
            self.crc16 = update_crc16(self.crc16, byte);
        }
        self.crc_pos = self.byte_pos;
    }

    /// Resets both rolling CRC accumulators to zero. Call at the start of
    /// a frame, before the sync code is consumed.
    pub fn reset_read_crc(&mut self) {
        self.fold_crc();
        self.crc8 = 0;
        self.crc16 = 0;
    }

    pub fn get_read_crc8(&mut self) -> u8 {
        self.fold_crc();
        self.crc8
    }

    pub fn get_read_crc16(&mut self) -> u16 {
        self.fold_crc();
        self.crc16
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.bit_pos == 0
    }

    /// Skips any remaining bits of the current byte without validating them.
    pub fn align_to_byte(&mut self) {
        if self.bit_pos > 0 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }
    }

    /// Returns the next byte without consuming it. Only meaningful when
    /// [`is_byte_aligned`] holds; used by frame resynchronization to scan
    /// for a sync byte one byte at a time.
    pub fn peek_u8(&mut self) -> Result<u8> {
        debug_assert!(self.is_byte_aligned());
        self.ensure_bits(8)?;
        Ok(self.buf[self.byte_pos])
    }

    /// Reads at most 8 bits.
    fn read_leq8(&mut self, bits: u8) -> Result<u8> {
        debug_assert!(bits <= 8);
        if bits == 0 {
            return Ok(0);
        }
        self.ensure_bits(bits as u32)?;

        let available = 8 - self.bit_pos;
        let byte = self.buf[self.byte_pos];

        if bits <= available {
            let shift = available - bits;
            let mask = if bits == 8 { 0xff } else { (1u16 << bits) as u8 - 1 };
            let value = (byte >> shift) & mask;
            self.bit_pos += bits;
            if self.bit_pos == 8 {
                self.bit_pos = 0;
                self.byte_pos += 1;
            }
            Ok(value)
        } else {
            let high = self.read_leq8(available)?;
            let low_bits = bits - available;
            let low = self.read_leq8(low_bits)?;
            Ok((high << low_bits) | low)
        }
    }

    /// Reads `bits` (up to 64) as an unsigned integer.
    pub fn read_uint(&mut self, bits: u32) -> Result<u64> {
        debug_assert!(bits <= 64);
        let mut result = 0u64;
        let mut remaining = bits;
        while remaining > 0 {
            let take = remaining.min(8);
            let byte = self.read_leq8(take as u8)?;
            result = (result << take) | byte as u64;
            remaining -= take;
        }
        Ok(result)
    }

    /// Reads `bits` (up to 64) as a two's-complement signed integer.
    pub fn read_int(&mut self, bits: u32) -> Result<i64> {
        let value = self.read_uint(bits)?;
        Ok(sign_extend(value, bits))
    }

    /// Reads a unary code: `v` zero bits followed by a one bit, returning `v`.
    pub fn read_unary(&mut self) -> Result<u32> {
        let mut count = 0u32;
        loop {
            if self.read_leq8(1)? == 1 {
                return Ok(count);
            }
            count += 1;
        }
    }

    /// Reads a Rice code with parameter `k`, returning the decoded signed value.
    pub fn read_rice(&mut self, k: u32) -> Result<i64> {
        let q = self.read_unary()? as u64;
        let r = self.read_uint(k)?;
        let u = (q << k) | r;
        Ok(if u & 1 == 1 {
            -((u >> 1) as i64) - 1
        } else {
            (u >> 1) as i64
        })
    }

    /// Reads an extended-UTF-8-coded integer of up to 36 bits. Returns
    /// [`UTF8_INVALID`] on any malformed continuation byte rather than an
    /// error.
    pub fn read_utf8_uint(&mut self) -> Result<u64> {
        let first = self.read_uint(8)? as u8;

        // Count the leading one-bits of the lead byte: 0 for a plain ASCII
        // byte, 1 for a lone (invalid) continuation byte, or N for a lead
        // byte introducing N - 1 continuation bytes.
        let mut leading_ones = 0u8;
        let mut mask_mark = 0b1000_0000u8;
        while first & mask_mark != 0 {
            leading_ones += 1;
            mask_mark >>= 1;
        }

        if leading_ones == 1 || leading_ones > 7 {
            return Ok(UTF8_INVALID);
        }

        let extra_bytes = if leading_ones == 0 { 0 } else { leading_ones - 1 };
        let lead_data_bits = 7 - leading_ones;
        let mut result = (first & (0xffu16 >> (8 - lead_data_bits)) as u8) as u64;

        for _ in 0..extra_bytes {
            let byte = self.read_uint(8)? as u8;
            if byte & 0b1100_0000 != 0b1000_0000 {
                return Ok(UTF8_INVALID);
            }
            result = (result << 6) | (byte & 0b0011_1111) as u64;
        }

        Ok(result)
    }
}

/// Accumulates bits MSB-first into a growable byte buffer, with rolling
/// CRC-8/CRC-16 over the bytes that have been completed so far.
#[derive(Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    /// Bits of the in-progress trailing byte, left-justified in the top
    /// `bit_pos` bits.
    cur: u8,
    bit_pos: u8,
    crc_pos: usize,
    crc8: u8,
    crc16: u16,
}

impl BitWriter {
    pub fn new() -> BitWriter {
        BitWriter::default()
    }

    fn push_byte(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    fn write_leq8(&mut self, value: u8, bits: u8) {
        debug_assert!(bits <= 8);
        if bits == 0 {
            return;
        }
        let available = 8 - self.bit_pos;
        let masked = if bits == 8 {
            value
        } else {
            value & ((1u16 << bits) as u8 - 1)
        };

        if bits <= available {
            let shift = available - bits;
            self.cur |= masked << shift;
            self.bit_pos += bits;
            if self.bit_pos == 8 {
                self.push_byte(self.cur);
                self.cur = 0;
                self.bit_pos = 0;
            }
        } else {
            let high_bits = available;
            let low_bits = bits - available;
            self.write_leq8(masked >> low_bits, high_bits);
            self.write_leq8(masked, low_bits);
        }
    }

    /// Writes the `bits` (up to 64) least-significant bits of `value`.
    pub fn write_uint(&mut self, value: u64, bits: u32) {
        debug_assert!(bits <= 64);
        let mut remaining = bits;
        while remaining > 0 {
            let take = remaining.min(8);
            let shift = remaining - take;
            let mask = if take == 8 { 0xffu8 } else { (1u8 << take) - 1 };
            let chunk = ((value >> shift) as u8) & mask;
            self.write_leq8(chunk, take as u8);
            remaining -= take;
        }
    }

    pub fn write_zeroes(&mut self, bits: u32) {
        self.write_uint(0, bits);
    }

    /// Writes the two's-complement representation of `value` in `bits` bits.
    pub fn write_int(&mut self, value: i64, bits: u32) {
        let mask = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
        self.write_uint((value as u64) & mask, bits);
    }

    /// Writes a unary code: `v` zero bits followed by a one bit.
    pub fn write_unary(&mut self, v: u32) {
        let mut remaining = v;
        while remaining >= 8 {
            self.write_leq8(0, 8);
            remaining -= 8;
        }
        if remaining > 0 {
            self.write_leq8(0, remaining as u8);
        }
        self.write_leq8(1, 1);
    }

    /// Writes a Rice code for signed `v` with parameter `k`.
    pub fn write_rice(&mut self, v: i64, k: u32) {
        let u = if v < 0 {
            ((-(v + 1)) as u64) << 1 | 1
        } else {
            (v as u64) << 1
        };
        self.write_unary((u >> k) as u32);
        self.write_uint(u & ((1u64 << k) - 1), k);
    }

    /// Writes `v` (up to 36 bits) using the extended-UTF-8 pattern.
    pub fn write_utf8_uint(&mut self, v: u64) {
        debug_assert!(v < (1u64 << 36));
        if v < 0x80 {
            self.write_uint(v, 8);
            return;
        }

        // Determine how many continuation bytes are needed. A lead byte
        // introducing `extra_bytes` continuations has `extra_bytes + 1`
        // leading one-bits, so it contributes `6 - extra_bytes` data bits;
        // combined with 6 bits per continuation byte that is a total of
        // `6 + 5 * extra_bytes` data bits. Try the smallest encoding that
        // fits, up to the 6-continuation-byte (36-bit) form.
        let mut extra_bytes = 1u32;
        loop {
            let total_data_bits = 6 + 5 * extra_bytes as u64;
            if v < (1u64 << total_data_bits) || extra_bytes >= 6 {
                break;
            }
            extra_bytes += 1;
        }

        let marker_bits = extra_bytes + 1;
        let lead_data_bits = 6 - extra_bytes;
        let lead_prefix = (0xffu16 << (8 - marker_bits)) as u8;
        let lead_data_mask = if lead_data_bits == 0 {
            0
        } else {
            (0xffu16 >> (8 - lead_data_bits)) as u8
        };
        let lead_value = lead_prefix | ((v >> (6 * extra_bytes)) as u8 & lead_data_mask);
        self.write_uint(lead_value as u64, 8);

        for i in (0..extra_bytes).rev() {
            let chunk = (v >> (6 * i)) & 0x3f;
            self.write_uint(0b1000_0000 | chunk, 8);
        }
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.bit_pos == 0
    }

    pub fn zero_pad_to_byte(&mut self) {
        if self.bit_pos > 0 {
            self.write_zeroes((8 - self.bit_pos) as u32);
        }
    }

    fn fold_crc(&mut self) {
        for &byte in &self.bytes[self.crc_pos..] {
            self.crc8 = update_crc8(self.crc8, byte);
            self.crc16 = update_crc16(self.crc16, byte);
        }
        self.crc_pos = self.bytes.len();
    }

    pub fn reset_write_crc(&mut self) {
        self.fold_crc();
        self.crc8 = 0;
        self.crc16 = 0;
    }

    pub fn get_write_crc8(&mut self) -> u8 {
        self.fold_crc();
        self.crc8
    }

    pub fn get_write_crc16(&mut self) -> u16 {
        self.fold_crc();
        self.crc16
    }

    /// The fully-written bytes so far (excludes an in-progress partial byte).
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        debug_assert!(self.bit_pos == 0, "writer finalized mid-byte");
        self.bytes
    }

    pub fn len_bytes(&self) -> usize {
        self.bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip_uint(bits_seq: &[(u64, u32)]) {
        let mut w = BitWriter::new();
        for &(v, n) in bits_seq {
            w.write_uint(v, n);
        }
        w.zero_pad_to_byte();
        let bytes = w.into_bytes();

        let mut cursor = Cursor::new(bytes);
        let mut r = BitReader::new(&mut cursor);
        for &(v, n) in bits_seq {
            assert_eq!(r.read_uint(n).unwrap(), v);
        }
    }

    #[test]
    fn write_read_uint_various_widths() {
        roundtrip_uint(&[(0, 1), (1, 1), (0b101, 3), (0xABCD, 16), (0x1_2345_6789, 36)]);
    }

    #[test]
    fn write_read_uint_64_bits() {
        roundtrip_uint(&[(u64::MAX, 64), (0, 64), (1, 64)]);
    }

    #[test]
    fn rice_roundtrip_small_values() {
        for k in 0..8u32 {
            for v in -64i64..64 {
                let mut w = BitWriter::new();
                w.write_rice(v, k);
                w.zero_pad_to_byte();
                let bytes = w.into_bytes();
                let mut cursor = Cursor::new(bytes);
                let mut r = BitReader::new(&mut cursor);
                assert_eq!(r.read_rice(k).unwrap(), v, "k={} v={}", k, v);
            }
        }
    }

    #[test]
    fn unary_roundtrip() {
        for v in [0u32, 1, 2, 7, 8, 9, 100, 1000] {
            let mut w = BitWriter::new();
            w.write_unary(v);
            w.zero_pad_to_byte();
            let bytes = w.into_bytes();
            let mut cursor = Cursor::new(bytes);
            let mut r = BitReader::new(&mut cursor);
            assert_eq!(r.read_unary().unwrap(), v);
        }
    }

    #[test]
    fn utf8_varint_roundtrip() {
        let values: Vec<u64> = vec![
            0, 1, 0x7f, 0x80, 0xa2, 0x20ac, 0x0103_48, 0xf_ffff_ffff,
        ];
        for &v in &values {
            let mut w = BitWriter::new();
            w.write_utf8_uint(v);
            let bytes = w.into_bytes();
            let mut cursor = Cursor::new(bytes);
            let mut r = BitReader::new(&mut cursor);
            assert_eq!(r.read_utf8_uint().unwrap(), v, "v={:#x}", v);
        }
    }

    #[test]
    fn utf8_invalid_continuation_yields_sentinel() {
        // A lone continuation byte (10xxxxxx) can never start a sequence.
        let mut cursor = Cursor::new(vec![0b1000_0000u8]);
        let mut r = BitReader::new(&mut cursor);
        assert_eq!(r.read_utf8_uint().unwrap(), UTF8_INVALID);
    }

    #[test]
    fn read_past_eof_is_truncated_stream() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let mut r = BitReader::new(&mut cursor);
        assert!(matches!(r.read_uint(8), Err(Error::TruncatedStream)));
    }

    #[test]
    fn crc_matches_manual_fold() {
        let mut w = BitWriter::new();
        w.reset_write_crc();
        w.write_uint(0x12, 8);
        w.write_uint(0x34, 8);
        let crc8 = w.get_write_crc8();
        let crc16 = w.get_write_crc16();
        assert_eq!(crc8, crate::crc::crc8(&[0x12, 0x34]));
        assert_eq!(crc16, crate::crc::crc16(&[0x12, 0x34]));
    }

    quickcheck::quickcheck! {
        fn rice_code_roundtrips(k: u8, v: i32) -> bool {
            let k = (k % 20) as u32;
            let v = (v % 5000) as i64;
            let mut w = BitWriter::new();
            w.write_rice(v, k);
            w.zero_pad_to_byte();
            let mut cursor = Cursor::new(w.into_bytes());
            let mut r = BitReader::new(&mut cursor);
            r.read_rice(k).unwrap() == v
        }

        fn utf8_varint_roundtrips(v: u64) -> bool {
            let v = v % (1u64 << 36);
            let mut w = BitWriter::new();
            w.write_utf8_uint(v);
            let mut cursor = Cursor::new(w.into_bytes());
            let mut r = BitReader::new(&mut cursor);
            r.read_utf8_uint().unwrap() == v
        }
    }
}
