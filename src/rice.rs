// Flacore -- a lossless audio codec core in Rust
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Partitioned Rice coding of predictor residuals. A residual block is
//! split into `2^partition_order` equally-sized partitions (the first
//! shrunk by the predictor's warm-up sample count), each carrying its
//! own 4-bit Rice parameter, or an escape code introducing a run of
//! fixed-width raw samples when no Rice parameter fits well.

use crate::bitstream::{BitReader, BitWriter};
use crate::error::{Error, Result};

const RICE_PARAM_BITS: u32 = 4;
const RICE_ESCAPE: u32 = (1 << RICE_PARAM_BITS) - 1;
const RAW_WIDTH_BITS: u32 = 5;

fn rice_signed_to_unsigned(v: i64) -> u64 {
    if v >= 0 {
        (v as u64) << 1
    } else {
        (((-v) as u64) << 1) - 1
    }
}

/// One partition's worth of residual parameters, as chosen by the
/// encoder's partition search.
#[derive(Clone, Copy, Debug)]
pub enum PartitionCoding {
    Rice { parameter: u32 },
    Raw { width: u32 },
}

/// Reads a partitioned-Rice residual of `block_size - predictor_order`
/// values into `buf[predictor_order..]`; `buf[..predictor_order]` must
/// already hold the warm-up samples.
pub fn read_residual(
    reader: &mut BitReader,
    predictor_order: u32,
    block_size: u16,
    buf: &mut [i32],
) -> Result<()> {
    let method = reader.read_uint(2)? as u32;
    let param_bits = match method {
        0 => 4,
        1 => 5,
        _ => return Err(Error::BadHeader("reserved residual coding method")),
    };

    let order = reader.read_uint(4)? as u32;
    let n_partitions = 1usize << order;
    if n_partitions == 0 || block_size as usize % n_partitions != 0 {
        return Err(Error::BadHeader("partition order does not divide block size"));
    }
    let n_partition_samples = block_size as usize / n_partitions;
    if predictor_order as usize > n_partition_samples {
        return Err(Error::BadHeader("predictor order exceeds first partition size"));
    }
    if n_partitions * n_partition_samples != buf.len() + predictor_order as usize {
        return Err(Error::BadHeader("residual partitioning does not match block size"));
    }

    let first_len = n_partition_samples - predictor_order as usize;
    read_partition(reader, param_bits, &mut buf[..first_len])?;

    let mut start = first_len;
    for _ in 1..n_partitions {
        read_partition(reader, param_bits, &mut buf[start..start + n_partition_samples])?;
        start += n_partition_samples;
    }

    Ok(())
}

fn read_partition(reader: &mut BitReader, param_bits: u32, buf: &mut [i32]) -> Result<()> {
    let rice_param = reader.read_uint(param_bits)? as u32;
    let escape = (1u32 << param_bits) - 1;

    if rice_param < escape {
        for sample in buf.iter_mut() {
            let residual = reader.read_rice(rice_param)?;
            *sample = residual as i32;
        }
    } else {
        let width = reader.read_uint(RAW_WIDTH_BITS)? as u32;
        for sample in buf.iter_mut() {
            *sample = if width == 0 { 0 } else { reader.read_int(width)? as i32 };
        }
    }
    Ok(())
}

/// Writes the residuals in `buf[predictor_order..]` using the partition
/// plan chosen by [`choose_partitioning`].
pub fn write_residual(
    writer: &mut BitWriter,
    predictor_order: u32,
    block_size: u16,
    buf: &[i32],
    partition_order: u32,
    partitions: &[PartitionCoding],
) {
    writer.write_uint(0, 2); // method 0: 4-bit Rice parameter.
    writer.write_uint(partition_order as u64, 4);

    let n_partitions = 1usize << partition_order;
    let n_partition_samples = block_size as usize / n_partitions;
    let first_len = n_partition_samples - predictor_order as usize;

    let mut start = 0usize;
    for (i, coding) in partitions.iter().enumerate() {
        let len = if i == 0 { first_len } else { n_partition_samples };
        write_partition(writer, *coding, &buf[start..start + len]);
        start += len;
    }
}

fn write_partition(writer: &mut BitWriter, coding: PartitionCoding, values: &[i32]) {
    match coding {
        PartitionCoding::Rice { parameter } => {
            writer.write_uint(parameter as u64, RICE_PARAM_BITS);
            for &v in values {
                writer.write_rice(v as i64, parameter);
            }
        }
        PartitionCoding::Raw { width } => {
            writer.write_uint(RICE_ESCAPE as u64, RICE_PARAM_BITS);
            writer.write_uint(width as u64, RAW_WIDTH_BITS);
            for &v in values {
                writer.write_int(v as i64, width);
            }
        }
    }
}

/// Cost in bits of Rice-coding `values` with parameter `k`.
fn rice_cost_bits(values: &[i32], k: u32) -> u64 {
    let mut bits = 0u64;
    for &v in values {
        let u = rice_signed_to_unsigned(v as i64);
        bits += (u >> k) + 1 + k as u64;
    }
    bits
}

/// Smallest Rice parameter whose cost is at or near the minimum for
/// `values`, searched by starting from a mean-based estimate and
/// walking outward until cost stops improving.
fn best_rice_parameter(values: &[i32]) -> (u32, u64) {
    if values.is_empty() {
        return (0, 0);
    }
    let mean_abs: f64 = values.iter().map(|&v| (v as i64).unsigned_abs() as f64).sum::<f64>()
        / values.len() as f64;
    let guess = if mean_abs > 0.0 {
        (mean_abs.log2().floor().max(0.0) as u32).min(30)
    } else {
        0
    };

    let mut best_k = guess;
    let mut best_cost = rice_cost_bits(values, guess);

    let mut k = guess;
    while k > 0 {
        k -= 1;
        let cost = rice_cost_bits(values, k);
        if cost < best_cost {
            best_cost = cost;
            best_k = k;
        } else {
            break;
        }
    }

    let mut k = guess;
    loop {
        k += 1;
        if k > 30 {
            break;
        }
        let cost = rice_cost_bits(values, k);
        if cost < best_cost {
            best_cost = cost;
            best_k = k;
        } else {
            break;
        }
    }

    (best_k, best_cost)
}

/// Searches partition orders `0..=max_partition_order` (capped so every
/// partition stays at least as large as `predictor_order`), picking
/// the coding (and, for each partition, the Rice parameter or raw
/// escape) with the lowest total bit cost. Returns the chosen order,
/// per-partition codings, and total residual bit cost.
pub fn choose_partitioning(
    predictor_order: u32,
    block_size: u16,
    residual: &[i32],
    max_partition_order: u32,
) -> (u32, Vec<PartitionCoding>, u64) {
    let mut max_order = max_partition_order;
    while max_order > 0 {
        let n_partitions = 1usize << max_order;
        if block_size as usize % n_partitions == 0
            && block_size as usize / n_partitions > predictor_order as usize
        {
            break;
        }
        max_order -= 1;
    }

    let mut best: Option<(u32, Vec<PartitionCoding>, u64)> = None;

    for order in 0..=max_order {
        let n_partitions = 1usize << order;
        if block_size as usize % n_partitions != 0 {
            continue;
        }
        let n_partition_samples = block_size as usize / n_partitions;
        if n_partition_samples <= predictor_order as usize && order > 0 {
            continue;
        }
        let first_len = n_partition_samples - predictor_order as usize;

        let mut codings = Vec::with_capacity(n_partitions);
        let mut total = 4u64; // 4 bits for the partition order field.
        let mut start = 0usize;
        let mut ok = true;
        for i in 0..n_partitions {
            let len = if i == 0 { first_len } else { n_partition_samples };
            if start + len > residual.len() {
                ok = false;
                break;
            }
            let values = &residual[start..start + len];
            let (k, rice_cost) = best_rice_parameter(values);
            let rice_total = RICE_PARAM_BITS as u64 + rice_cost;

            let raw_width = values.iter().map(|&v| bits_for_signed(v)).max().unwrap_or(1);
            let raw_total = RICE_PARAM_BITS as u64 + RAW_WIDTH_BITS as u64 + raw_width as u64 * len as u64;

            if raw_total < rice_total {
                codings.push(PartitionCoding::Raw { width: raw_width });
                total += raw_total;
            } else {
                codings.push(PartitionCoding::Rice { parameter: k });
                total += rice_total;
            }
            start += len;
        }

        if ok && start == residual.len() {
            if best.as_ref().map(|(_, _, cost)| total < *cost).unwrap_or(true) {
                best = Some((order, codings, total));
            }
        }
    }

    best.unwrap_or((0, vec![PartitionCoding::Rice { parameter: 0 }], u64::MAX))
}

/// Smallest number of bits a two's complement representation of `v` needs.
fn bits_for_signed(v: i32) -> u32 {
    let v = v as i64;
    let mut bits = 1u32;
    loop {
        let min = -(1i64 << (bits - 1));
        let max = (1i64 << (bits - 1)) - 1;
        if v >= min && v <= max {
            return bits;
        }
        bits += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_traits::BytesSink;

    #[test]
    fn rice_partition_roundtrip() {
        let predictor_order = 2u32;
        let block_size = 16u16;
        let warm_up = [7i32, -3];
        let residual: Vec<i32> = (0..14).map(|i| (i % 5) as i32 - 2).collect();

        let (order, codings, _) =
            choose_partitioning(predictor_order, block_size, &residual, 2);

        let mut writer = BitWriter::new();
        write_residual(&mut writer, predictor_order, block_size, &residual, order, &codings);
        writer.zero_pad_to_byte();

        let mut sink_bytes = Vec::new();
        sink_bytes.write(writer.as_bytes(), 0, 0).unwrap();

        let mut cursor = std::io::Cursor::new(sink_bytes);
        let mut reader = BitReader::new(&mut cursor);
        let mut buf = vec![0i32; block_size as usize];
        buf[..predictor_order as usize].copy_from_slice(&warm_up);
        read_residual(&mut reader, predictor_order, block_size, &mut buf[predictor_order as usize..])
            .unwrap();

        assert_eq!(&buf[predictor_order as usize..], &residual[..]);
    }

    #[test]
    fn escape_partition_roundtrip_for_large_outlier() {
        let predictor_order = 0u32;
        let block_size = 8u16;
        let residual = vec![1i32, -1, 2, -2, 1, 0, -1, 70_000];

        let (order, codings, _) = choose_partitioning(predictor_order, block_size, &residual, 0);
        assert_eq!(order, 0);
        assert!(matches!(codings[0], PartitionCoding::Raw { .. }));

        let mut writer = BitWriter::new();
        write_residual(&mut writer, predictor_order, block_size, &residual, order, &codings);
        writer.zero_pad_to_byte();

        let mut sink_bytes = Vec::new();
        sink_bytes.write(writer.as_bytes(), 0, 0).unwrap();
        let mut cursor = std::io::Cursor::new(sink_bytes);
        let mut reader = BitReader::new(&mut cursor);
        let mut buf = vec![0i32; block_size as usize];
        read_residual(&mut reader, predictor_order, block_size, &mut buf).unwrap();

        assert_eq!(buf, residual);
    }

    #[test]
    fn rice_cost_is_minimized_near_the_chosen_parameter() {
        let values: Vec<i32> = (0..200).map(|i| ((i * 37) % 23) - 11).collect();
        let (k, cost) = best_rice_parameter(&values);
        let neighbor_cost_up = rice_cost_bits(&values, k + 1);
        let neighbor_cost_down = if k > 0 { rice_cost_bits(&values, k - 1) } else { u64::MAX };
        assert!(cost <= neighbor_cost_up);
        assert!(cost <= neighbor_cost_down);
    }

    quickcheck::quickcheck! {
        fn residual_partitioning_roundtrips(seed: Vec<i16>) -> bool {
            if seed.len() < 4 {
                return true;
            }
            let predictor_order = 0u32;
            let residual: Vec<i32> = seed.iter().map(|&s| s as i32).collect();
            let block_size = residual.len() as u16;

            let (order, codings, _) = choose_partitioning(predictor_order, block_size, &residual, 4);

            let mut writer = BitWriter::new();
            write_residual(&mut writer, predictor_order, block_size, &residual, order, &codings);
            writer.zero_pad_to_byte();

            let mut sink_bytes = Vec::new();
            sink_bytes.write(writer.as_bytes(), 0, 0).unwrap();
            let mut cursor = std::io::Cursor::new(sink_bytes);
            let mut reader = BitReader::new(&mut cursor);
            let mut buf = vec![0i32; block_size as usize];
            read_residual(&mut reader, predictor_order, block_size, &mut buf).unwrap();

            buf == residual
        }
    }
}
