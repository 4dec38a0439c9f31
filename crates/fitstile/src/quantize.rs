//! Linear quantization of floating-point tiles.
//!
//! Floating-point images go through the integer codecs by storing
//! `round((value - zero) / scale)`; reconstruction is `stored * scale +
//! zero`. The scale step is derived from an estimate of the tile's noise
//! so that `quantize_level` quantization levels span one sigma of noise
//! (cfitsio's convention); a negative level requests that absolute step
//! directly. NaN pixels map to a reserved sentinel that can never be
//! produced by quantization itself.

use alloc::vec::Vec;

/// Stored-integer sentinel for a blank (NaN) pixel.
pub const NULL_VALUE: i32 = -2147483647;

/// A quantized tile: stored integers plus the reconstruction pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantized {
    pub ints: Vec<i32>,
    pub scale: f64,
    pub zero: f64,
    pub has_blank: bool,
}

/// Estimate the noise sigma as the RMS of successive differences over
/// sqrt(2). Smooth gradients contribute little; white noise dominates.
fn noise_estimate(vals: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut n = 0usize;
    let mut prev = f64::NAN;
    for &v in vals {
        if v.is_nan() {
            continue;
        }
        if !prev.is_nan() {
            let d = v - prev;
            sum += d * d;
            n += 1;
        }
        prev = v;
    }
    if n == 0 {
        0.0
    } else {
        libm::sqrt(sum / n as f64 / 2.0)
    }
}

/// Quantize a tile of f64 samples.
///
/// Returns `None` when the tile's dynamic range cannot be represented at
/// the derived step size; the caller then stores the tile losslessly.
pub fn quantize(vals: &[f64], level: f64) -> Option<Quantized> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut has_blank = false;
    for &v in vals {
        if v.is_nan() {
            has_blank = true;
        } else {
            min = min.min(v);
            max = max.max(v);
        }
    }

    if min > max {
        // Every pixel is blank.
        return Some(Quantized {
            ints: vals.iter().map(|_| NULL_VALUE).collect(),
            scale: 1.0,
            zero: 0.0,
            has_blank: true,
        });
    }

    let delta = if level < 0.0 {
        -level
    } else if level > 0.0 {
        let noise = noise_estimate(vals);
        if noise > 0.0 {
            noise / level
        } else {
            // Flat tile: any step reproduces it exactly.
            1.0
        }
    } else {
        return None;
    };
    if !(delta > 0.0) || !delta.is_finite() {
        return None;
    }

    // The span must stay clear of the sentinel region at the bottom of
    // the i32 range.
    if (max - min) / delta > (i32::MAX as f64) - 2.0 {
        return None;
    }

    let zero = min;
    let ints = vals
        .iter()
        .map(|&v| {
            if v.is_nan() {
                NULL_VALUE
            } else {
                libm::floor((v - zero) / delta + 0.5) as i32
            }
        })
        .collect();

    Some(Quantized {
        ints,
        scale: delta,
        zero,
        has_blank,
    })
}
