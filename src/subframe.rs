// Flacore -- a lossless audio codec core in Rust
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! The `subframe` module deals with the per-channel subframes that make
//! up a frame: a small header (type plus wasted-bits-per-sample), and a
//! body holding either a constant value, verbatim samples, or a
//! predictor's warm-up samples followed by its residual.

use crate::error::{Error, Result};
use crate::bitstream::{BitReader, BitWriter};
use crate::predictor;
use crate::rice;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubframeType {
    Constant,
    Verbatim,
    Fixed(u8),
    Lpc(u8),
}

/// Counts the number of trailing zero bits shared by every sample (the
/// "wasted bits"), which can be shifted out before encoding and shifted
/// back in after decoding. Returns 0 for an empty or all-zero block,
/// since an all-zero block is better represented as CONSTANT anyway.
pub fn count_wasted_bits(samples: &[i32]) -> u32 {
    let mut combined = 0u32;
    for &s in samples {
        combined |= s as u32;
        if combined & 1 != 0 {
            return 0;
        }
    }
    if combined == 0 {
        return 0;
    }
    combined.trailing_zeros()
}

/// Shifts every sample right by `wasted_bits`, in place. The inverse of
/// the left-shift applied after decoding.
pub fn apply_wasted_bits(samples: &mut [i32], wasted_bits: u32) {
    if wasted_bits == 0 {
        return;
    }
    for s in samples.iter_mut() {
        *s >>= wasted_bits;
    }
}

/// Shifts every sample left by `wasted_bits`, restoring the bits
/// [`apply_wasted_bits`] shifted out.
pub fn restore_wasted_bits(samples: &mut [i32], wasted_bits: u32) {
    if wasted_bits == 0 {
        return;
    }
    for s in samples.iter_mut() {
        *s <<= wasted_bits;
    }
}

struct SubframeHeader {
    sf_type: SubframeType,
    wasted_bits: u32,
}

fn read_subframe_header(reader: &mut BitReader) -> Result<SubframeHeader> {
    if reader.read_uint(1)? != 0 {
        return Err(Error::BadHeader("subframe header padding bit set"));
    }

    let type_bits = reader.read_uint(6)? as u8;
    let sf_type = match type_bits {
        0 => SubframeType::Constant,
        1 => SubframeType::Verbatim,
        n if (n & 0b111_110 == 0b000_010) || (n & 0b111_100 == 0b000_100) || (n & 0b110_000 == 0b010_000) => {
            return Err(Error::BadHeader("reserved subframe type"));
        }
        n if n & 0b111_000 == 0b001_000 => {
            let order = n & 0b000_111;
            if order > 4 {
                return Err(Error::BadHeader("fixed predictor order greater than 4"));
            }
            SubframeType::Fixed(order)
        }
        n => SubframeType::Lpc((n & 0b011_111) + 1),
    };

    let wasted_flag = reader.read_uint(1)? != 0;
    let wasted_bits = if wasted_flag { reader.read_unary()? + 1 } else { 0 };

    Ok(SubframeHeader { sf_type, wasted_bits })
}

fn write_subframe_header(writer: &mut BitWriter, sf_type: SubframeType, wasted_bits: u32) {
    writer.write_uint(0, 1);
    let type_bits: u8 = match sf_type {
        SubframeType::Constant => 0,
        SubframeType::Verbatim => 1,
        SubframeType::Fixed(order) => 0b001_000 | order,
        SubframeType::Lpc(order) => 0b100_000 | (order - 1),
    };
    writer.write_uint(type_bits as u64, 6);

    if wasted_bits == 0 {
        writer.write_uint(0, 1);
    } else {
        writer.write_uint(1, 1);
        writer.write_unary(wasted_bits - 1);
    }
}

/// Decodes one subframe of `bps` bits per sample into `buffer`, whose
/// length is the block size.
pub fn decode(reader: &mut BitReader, bps: u8, buffer: &mut [i32]) -> Result<()> {
    let header = read_subframe_header(reader)?;
    let effective_bps = bps - header.wasted_bits.min(bps as u32) as u8;

    match header.sf_type {
        SubframeType::Constant => decode_constant(reader, effective_bps, buffer)?,
        SubframeType::Verbatim => decode_verbatim(reader, effective_bps, buffer)?,
        SubframeType::Fixed(order) => decode_fixed(reader, effective_bps, order, buffer)?,
        SubframeType::Lpc(order) => decode_lpc(reader, effective_bps, order, buffer)?,
    }

    restore_wasted_bits(buffer, header.wasted_bits);
    Ok(())
}

fn decode_constant(reader: &mut BitReader, bps: u8, buffer: &mut [i32]) -> Result<()> {
    let value = reader.read_int(bps as u32)? as i32;
    for s in buffer.iter_mut() {
        *s = value;
    }
    Ok(())
}

fn decode_verbatim(reader: &mut BitReader, bps: u8, buffer: &mut [i32]) -> Result<()> {
    for s in buffer.iter_mut() {
        *s = reader.read_int(bps as u32)? as i32;
    }
    Ok(())
}

fn decode_fixed(reader: &mut BitReader, bps: u8, order: u8, buffer: &mut [i32]) -> Result<()> {
    if order as usize > buffer.len() {
        return Err(Error::BadHeader("fixed predictor order exceeds block size"));
    }
    decode_verbatim(reader, bps, &mut buffer[..order as usize])?;
    rice::read_residual(reader, order as u32, buffer.len() as u16, &mut buffer[order as usize..])?;
    predictor::fixed_restore(order as u32, buffer)
}

fn decode_lpc(reader: &mut BitReader, bps: u8, order: u8, buffer: &mut [i32]) -> Result<()> {
    if order as usize > buffer.len() {
        return Err(Error::BadHeader("lpc order exceeds block size"));
    }
    decode_verbatim(reader, bps, &mut buffer[..order as usize])?;

    let precision = reader.read_uint(4)? as u32 + 1;
    if precision == 16 {
        return Err(Error::BadHeader("reserved LPC coefficient precision"));
    }
    let shift = reader.read_int(5)? as i32;

    let mut coefficients = Vec::with_capacity(order as usize);
    for _ in 0..order {
        coefficients.push(reader.read_int(precision)? as i32);
    }

    rice::read_residual(reader, order as u32, buffer.len() as u16, &mut buffer[order as usize..])?;
    predictor::lpc_restore(&coefficients, shift, buffer)
}

/// The encoder's choice of how to code one subframe, produced by trying
/// every candidate model and keeping the cheapest.
pub enum EncodedSubframe {
    Constant { value: i32 },
    Verbatim,
    Fixed { order: u8, residual: Vec<i32> },
    Lpc { order: u8, precision: u32, shift: i32, coefficients: Vec<i32>, residual: Vec<i32> },
}

/// Picks the cheapest of CONSTANT, FIXED (orders 0-4), LPC (up to
/// `max_lpc_order`) and VERBATIM for `samples`, returning the chosen
/// model plus its residual (for FIXED/LPC) ready to Rice-code.
pub fn choose_model(
    samples: &[i32],
    bps: u8,
    max_lpc_order: u32,
    lpc_precision: u32,
    exhaustive: bool,
) -> EncodedSubframe {
    if samples.iter().all(|&s| s == samples[0]) {
        return EncodedSubframe::Constant { value: samples[0] };
    }

    let fixed_costs = predictor::fixed_residual_costs(samples);
    let mut best_fixed_order = 0u32;
    let mut best_fixed_cost = u64::MAX;
    for (order, &cost) in fixed_costs.iter().enumerate() {
        if order as u32 > order_cap(samples.len()) {
            break;
        }
        let cost_u = cost as u64;
        if cost_u < best_fixed_cost {
            best_fixed_cost = cost_u;
            best_fixed_order = order as u32;
        }
    }
    let mut best_fixed_residual = samples.to_vec();
    predictor::fixed_residual(best_fixed_order, &mut best_fixed_residual);

    let mut best: EncodedSubframe = EncodedSubframe::Fixed {
        order: best_fixed_order as u8,
        residual: best_fixed_residual,
    };
    let mut best_cost_bits = best_fixed_cost * 2 + best_fixed_order as u64 * bps as u64;

    if max_lpc_order > 0 && samples.len() > max_lpc_order as usize {
        if let Some(lpc) = try_lpc(samples, bps, max_lpc_order, lpc_precision, exhaustive) {
            let lpc_cost = estimate_residual_cost(&lpc.residual) + lpc.order as u64 * (lpc_precision as u64 + bps as u64);
            if lpc_cost < best_cost_bits {
                best_cost_bits = lpc_cost;
                best = EncodedSubframe::Lpc {
                    order: lpc.order,
                    precision: lpc.precision,
                    shift: lpc.shift,
                    coefficients: lpc.coefficients,
                    residual: lpc.residual,
                };
            }
        }
    }

    let verbatim_cost = samples.len() as u64 * bps as u64;
    if verbatim_cost < best_cost_bits {
        return EncodedSubframe::Verbatim;
    }

    best
}

fn order_cap(block_size: usize) -> u32 {
    if block_size > 4 { 4 } else { block_size.saturating_sub(1) as u32 }
}

fn estimate_residual_cost(residual: &[i32]) -> u64 {
    residual.iter().map(|&v| {
        let mag = (v as i64).unsigned_abs();
        64 - mag.leading_zeros() as u64 + 2
    }).sum()
}

struct LpcChoice {
    order: u8,
    precision: u32,
    shift: i32,
    coefficients: Vec<i32>,
    residual: Vec<i32>,
}

/// Finds the best LPC model for `samples`. With `exhaustive` set, every
/// candidate order is fully quantized and residual-coded so the true bit
/// cost decides the winner; otherwise the order is picked from Levinson-
/// Durbin's prediction error alone and only that one order is quantized,
/// which is far cheaper but occasionally picks a slightly worse order.
fn try_lpc(samples: &[i32], _bps: u8, max_order: u32, precision: u32, exhaustive: bool) -> Option<LpcChoice> {
    let floats: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
    let max_order = max_order.min(samples.len() as u32 - 1).min(predictor::MAX_LPC_ORDER);
    if max_order == 0 {
        return None;
    }
    let autoc = predictor::autocorrelate(&floats, max_order as usize);
    if autoc[0] == 0.0 {
        return None;
    }
    let (coeffs_by_order, errors) = predictor::levinson_durbin(&autoc, max_order as usize);

    if exhaustive {
        let mut best: Option<LpcChoice> = None;
        let mut best_cost = u64::MAX;
        for (i, coeffs) in coeffs_by_order.iter().enumerate() {
            let order = i + 1;
            let Some((quantized, shift)) = predictor::quantize_coefficients(coeffs, precision) else {
                continue;
            };
            let mut residual = samples.to_vec();
            predictor::lpc_residual(&quantized, shift, &mut residual);
            let cost = estimate_residual_cost(&residual[order..]) + order as u64 * (precision as u64 + _bps as u64);
            if cost < best_cost {
                best_cost = cost;
                best = Some(LpcChoice {
                    order: order as u8,
                    precision,
                    shift,
                    coefficients: quantized,
                    residual,
                });
            }
        }
        return best;
    }

    let mut best_order = 1usize;
    let mut best_error = f64::INFINITY;
    for (i, &err) in errors.iter().enumerate() {
        let order = i + 1;
        let predicted_bits = 0.5 * (err.max(1e-9)).log2() * (samples.len() - order) as f64;
        let header_bits = order as f64 * precision as f64;
        let total = predicted_bits + header_bits;
        if total < best_error {
            best_error = total;
            best_order = order;
        }
    }

    let chosen_coeffs = &coeffs_by_order[best_order - 1];
    let (quantized, shift) = predictor::quantize_coefficients(chosen_coeffs, precision)?;

    let mut residual = samples.to_vec();
    predictor::lpc_residual(&quantized, shift, &mut residual);

    Some(LpcChoice {
        order: best_order as u8,
        precision,
        shift,
        coefficients: quantized,
        residual,
    })
}

/// Writes a subframe chosen by [`choose_model`], given the original
/// samples (for CONSTANT/VERBATIM/warm-up) and the wasted-bits count
/// already factored out of `samples`.
pub fn write(
    writer: &mut BitWriter,
    samples: &[i32],
    bps: u8,
    wasted_bits: u32,
    model: &EncodedSubframe,
    max_partition_order: u32,
) {
    match model {
        EncodedSubframe::Constant { value } => {
            write_subframe_header(writer, SubframeType::Constant, wasted_bits);
            writer.write_int(*value as i64, bps as u32);
        }
        EncodedSubframe::Verbatim => {
            write_subframe_header(writer, SubframeType::Verbatim, wasted_bits);
            for &s in samples {
                writer.write_int(s as i64, bps as u32);
            }
        }
        EncodedSubframe::Fixed { order, residual } => {
            write_subframe_header(writer, SubframeType::Fixed(*order), wasted_bits);
            for &s in &samples[..*order as usize] {
                writer.write_int(s as i64, bps as u32);
            }
            let (partition_order, codings, _) = rice::choose_partitioning(
                *order as u32,
                samples.len() as u16,
                &residual[*order as usize..],
                max_partition_order,
            );
            rice::write_residual(
                writer,
                *order as u32,
                samples.len() as u16,
                &residual[*order as usize..],
                partition_order,
                &codings,
            );
        }
        EncodedSubframe::Lpc { order, precision, shift, coefficients, residual } => {
            write_subframe_header(writer, SubframeType::Lpc(*order), wasted_bits);
            for &s in &samples[..*order as usize] {
                writer.write_int(s as i64, bps as u32);
            }
            writer.write_uint((*precision - 1) as u64, 4);
            writer.write_int(*shift as i64, 5);
            for &c in coefficients {
                writer.write_int(c as i64, *precision);
            }
            let (partition_order, codings, _) = rice::choose_partitioning(
                *order as u32,
                samples.len() as u16,
                &residual[*order as usize..],
                max_partition_order,
            );
            rice::write_residual(
                writer,
                *order as u32,
                samples.len() as u16,
                &residual[*order as usize..],
                partition_order,
                &codings,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_traits::BytesSink;

    fn roundtrip(samples: &[i32], bps: u8) -> Vec<i32> {
        let model = choose_model(samples, bps, 8, 12, false);
        let wasted = 0;

        let mut writer = BitWriter::new();
        write(&mut writer, samples, bps, wasted, &model, 4);
        writer.zero_pad_to_byte();

        let mut bytes = Vec::new();
        bytes.write(writer.as_bytes(), 0, 0).unwrap();
        let mut cursor = std::io::Cursor::new(bytes);
        let mut reader = BitReader::new(&mut cursor);
        let mut buffer = vec![0i32; samples.len()];
        decode(&mut reader, bps, &mut buffer).unwrap();
        buffer
    }

    #[test]
    fn constant_subframe_roundtrip() {
        let samples = vec![42i32; 64];
        assert_eq!(roundtrip(&samples, 16), samples);
    }

    #[test]
    fn fixed_subframe_roundtrip_linear_ramp() {
        let samples: Vec<i32> = (0..64).map(|i| i * 3 - 10).collect();
        assert_eq!(roundtrip(&samples, 16), samples);
    }

    #[test]
    fn lpc_subframe_roundtrip_sinusoid() {
        let samples: Vec<i32> = (0..256)
            .map(|i| ((i as f64 * 0.3).sin() * 10000.0) as i32)
            .collect();
        assert_eq!(roundtrip(&samples, 16), samples);
    }

    #[test]
    fn verbatim_subframe_roundtrip_noise() {
        let samples: Vec<i32> = (0..16).map(|i| if i % 2 == 0 { 12345 } else { -23456 }).collect();
        assert_eq!(roundtrip(&samples, 16), samples);
    }

    #[test]
    fn wasted_bits_detected_and_restored() {
        let samples: Vec<i32> = (0..32).map(|i| (i * 4) - 64).collect();
        assert_eq!(count_wasted_bits(&samples), 2);

        let mut shifted = samples.clone();
        apply_wasted_bits(&mut shifted, 2);
        restore_wasted_bits(&mut shifted, 2);
        assert_eq!(shifted, samples);
    }

    #[test]
    fn all_zero_block_has_no_wasted_bits() {
        let samples = vec![0i32; 8];
        assert_eq!(count_wasted_bits(&samples), 0);
    }
}
