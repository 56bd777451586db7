// Flacore -- a lossless audio codec core in Rust
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Fixed and LPC prediction. Decoding restores a buffer of residuals
//! in place into samples; encoding does the reverse, producing
//! residuals and (for LPC) the quantized coefficients that predict
//! them.
//!
//! All loops here are the plain reference form spec'd for this system:
//! no SIMD kernel dispatch, just a straight loop, so encoder and
//! decoder produce bit-identical results regardless of the machine
//! they run on.

use crate::error::{Error, Result};

/// Maximum LPC order supported by the bitstream (5-bit order minus one field).
pub const MAX_LPC_ORDER: u32 = 32;

/// Restores a fixed-predictor residual buffer into samples in place.
/// `buf[..order]` must already hold the warm-up samples; `buf[order..]`
/// holds the residuals on entry and the restored samples on exit.
pub fn fixed_restore(order: u32, buf: &mut [i32]) -> Result<()> {
    if order > 4 {
        return Err(Error::BadHeader("fixed predictor order greater than 4"));
    }
    match order {
        0 => {}
        1 => {
            for i in 1..buf.len() {
                buf[i] = buf[i].wrapping_add(buf[i - 1]);
            }
        }
        2 => {
            for i in 2..buf.len() {
                let p = 2i64 * buf[i - 1] as i64 - buf[i - 2] as i64;
                buf[i] = buf[i].wrapping_add(p as i32);
            }
        }
        3 => {
            for i in 3..buf.len() {
                let p = 3i64 * buf[i - 1] as i64 - 3i64 * buf[i - 2] as i64 + buf[i - 3] as i64;
                buf[i] = buf[i].wrapping_add(p as i32);
            }
        }
        4 => {
            for i in 4..buf.len() {
                let p = 4i64 * buf[i - 1] as i64 - 6i64 * buf[i - 2] as i64
                    + 4i64 * buf[i - 3] as i64
                    - buf[i - 4] as i64;
                buf[i] = buf[i].wrapping_add(p as i32);
            }
        }
        _ => unreachable!(),
    }
    Ok(())
}

/// Produces a fixed-predictor residual in place from a buffer of
/// samples. The inverse of [`fixed_restore`]; `buf[..order]` (the
/// warm-up samples) is left untouched.
pub fn fixed_residual(order: u32, buf: &mut [i32]) {
    match order {
        0 => {}
        1 => {
            for i in (1..buf.len()).rev() {
                buf[i] = buf[i].wrapping_sub(buf[i - 1]);
            }
        }
        2 => {
            for i in (2..buf.len()).rev() {
                let p = 2i64 * buf[i - 1] as i64 - buf[i - 2] as i64;
                buf[i] = buf[i].wrapping_sub(p as i32);
            }
        }
        3 => {
            for i in (3..buf.len()).rev() {
                let p = 3i64 * buf[i - 1] as i64 - 3i64 * buf[i - 2] as i64 + buf[i - 3] as i64;
                buf[i] = buf[i].wrapping_sub(p as i32);
            }
        }
        4 => {
            for i in (4..buf.len()).rev() {
                let p = 4i64 * buf[i - 1] as i64 - 6i64 * buf[i - 2] as i64
                    + 4i64 * buf[i - 3] as i64
                    - buf[i - 4] as i64;
                buf[i] = buf[i].wrapping_sub(p as i32);
            }
        }
        _ => unreachable!(),
    }
}

/// Sum of squared fixed-predictor residuals for each candidate order
/// 0..=4, used by the encoder to pick the cheapest fixed predictor
/// without fully encoding every candidate. `samples` includes one
/// sample of history before the block when available (the caller
/// passes a zero-order difference buffer built from the raw samples).
pub fn fixed_residual_costs(samples: &[i32]) -> [i64; 5] {
    let mut costs = [0i64; 5];
    let n = samples.len();
    for i in 0..n {
        costs[0] += (samples[i] as i64).abs();
        if i >= 1 {
            let d1 = samples[i] - samples[i - 1];
            costs[1] += (d1 as i64).abs();
        }
        if i >= 2 {
            let d2 = samples[i] - 2 * samples[i - 1] + samples[i - 2];
            costs[2] += (d2 as i64).abs();
        }
        if i >= 3 {
            let d3 = samples[i] - 3 * samples[i - 1] + 3 * samples[i - 2] - samples[i - 3];
            costs[3] += (d3 as i64).abs();
        }
        if i >= 4 {
            let d4 = samples[i] - 4 * samples[i - 1] + 6 * samples[i - 2] - 4 * samples[i - 3]
                + samples[i - 4];
            costs[4] += (d4 as i64).abs();
        }
    }
    costs
}

/// Restores an LPC-predictor residual buffer into samples in place.
/// `buf[..order]` must already hold the warm-up samples, `coefficients`
/// holds the `order` quantized coefficients in the order they multiply
/// `buf[i - 1], buf[i - 2], ..., buf[i - order]`.
pub fn lpc_restore(coefficients: &[i32], shift: i32, buf: &mut [i32]) -> Result<()> {
    let order = coefficients.len();
    if order > buf.len() {
        return Err(Error::BadHeader("lpc order exceeds block size"));
    }
    for i in order..buf.len() {
        let mut prediction = 0i64;
        for (j, &c) in coefficients.iter().enumerate() {
            prediction += c as i64 * buf[i - 1 - j] as i64;
        }
        let predicted = apply_quantization_shift(prediction, shift) as i32;
        buf[i] = buf[i].wrapping_add(predicted);
    }
    Ok(())
}

/// Produces an LPC residual in place from a buffer of samples, the
/// inverse of [`lpc_restore`]. `buf[..order]` (warm-up) is untouched.
pub fn lpc_residual(coefficients: &[i32], shift: i32, buf: &mut [i32]) {
    let order = coefficients.len();
    for i in (order..buf.len()).rev() {
        let mut prediction = 0i64;
        for (j, &c) in coefficients.iter().enumerate() {
            prediction += c as i64 * buf[i - 1 - j] as i64;
        }
        let predicted = apply_quantization_shift(prediction, shift) as i32;
        buf[i] = buf[i].wrapping_sub(predicted);
    }
}

/// Applies a FLAC quantization-level shift to a raw dot-product
/// prediction: a right-shift for the common positive case, a left-shift
/// when `shift` is negative (coefficients too large to fit `precision`
/// bits without scaling back down).
fn apply_quantization_shift(prediction: i64, shift: i32) -> i64 {
    if shift >= 0 {
        prediction >> shift
    } else {
        prediction << -shift
    }
}

/// Windowed autocorrelation of `samples` up to lag `max_lag` (inclusive),
/// `result[k]` holding the autocorrelation at lag `k`. Uses a plain
/// rectangular window; good enough for lossless prediction, where the
/// residual is exact regardless of how well-chosen the coefficients are.
pub fn autocorrelate(samples: &[f64], max_lag: usize) -> Vec<f64> {
    let mut result = vec![0.0; max_lag + 1];
    for lag in 0..=max_lag {
        let mut sum = 0.0;
        for i in lag..samples.len() {
            sum += samples[i] * samples[i - lag];
        }
        result[lag] = sum;
    }
    result
}

/// Levinson-Durbin recursion. Given autocorrelation coefficients
/// `autoc[0..=max_order]`, returns the LPC coefficients and prediction
/// error for every order from 1 to `max_order`, so the caller can pick
/// the order that best trades bits-of-residual against bits-of-header.
pub fn levinson_durbin(autoc: &[f64], max_order: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
    let mut error = autoc[0];
    let mut lpc = vec![0.0; max_order];
    let mut coeffs_by_order = Vec::with_capacity(max_order);
    let mut errors = Vec::with_capacity(max_order);

    for i in 0..max_order {
        let mut acc = autoc[i + 1];
        for j in 0..i {
            acc -= lpc[j] * autoc[i - j];
        }
        let reflection = if error.abs() > 1e-9 { acc / error } else { 0.0 };

        let mut new_lpc = lpc.clone();
        new_lpc[i] = reflection;
        for j in 0..i {
            new_lpc[j] = lpc[j] - reflection * lpc[i - 1 - j];
        }
        lpc = new_lpc;

        error *= 1.0 - reflection * reflection;

        coeffs_by_order.push(lpc[..=i].to_vec());
        errors.push(error.max(0.0));
    }

    (coeffs_by_order, errors)
}

/// Quantizes floating-point LPC coefficients to `precision`-bit signed
/// integers plus a shift, following the scheme FLAC's bitstream stores:
/// coefficients are scaled by `2^shift` and rounded, with error fed
/// forward into the next coefficient to reduce quantization bias.
/// Returns `None` if no shift in `-16..=15` (the bitstream's 5-bit signed
/// quantization level) keeps every coefficient inside `precision` bits
/// (the subframe cannot use this order/precision pair).
pub fn quantize_coefficients(coeffs: &[f64], precision: u32) -> Option<(Vec<i32>, i32)> {
    let mut max_abs = 0.0f64;
    for &c in coeffs {
        max_abs = max_abs.max(c.abs());
    }
    if max_abs <= 0.0 {
        return Some((vec![0; coeffs.len()], 0));
    }

    let max_shift = 15i32;
    let min_shift = -16i32;
    let headroom = (max_abs.log2().floor() as i32) + 1;
    let mut shift = (precision as i32 - 1) - headroom;
    if shift > max_shift {
        shift = max_shift;
    }
    if shift < min_shift {
        return None;
    }

    let limit = 1i64 << (precision - 1);
    let scale = 2.0f64.powi(shift);
    let mut quantized = Vec::with_capacity(coeffs.len());
    let mut error = 0.0f64;
    for &c in coeffs {
        let scaled = c * scale + error;
        let mut q = scaled.round() as i64;
        if q >= limit {
            q = limit - 1;
        }
        if q < -limit {
            q = -limit;
        }
        error = scaled - q as f64;
        quantized.push(q as i32);
    }
    Some((quantized, shift))
}
