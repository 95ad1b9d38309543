//! Sample conversion between the server's normalized `f32` format and the
//! integer formats a client can request.
//!
//! All conversions run one tight loop per block, are allocation free, and
//! take an explicit per-sample byte stride on the integer side so that
//! interleaved-to-planar copies stay expressible. The core itself always
//! passes the format's own sample size as the stride.

/// Positive full-scale value of the 32-bit integer format. The negative peak
/// is the symmetric `-0x7FFF_FFFF`, not `i32::MIN`.
pub const INT32_SCALING: i32 = 0x7FFF_FFFF;
/// Positive full-scale value of the 16-bit integer format.
pub const INT16_SCALING: i16 = 0x7FFF;
/// Lower bound of the normalized float range.
pub const NORMALIZED_FLOAT_MIN: f32 = -1.0;
/// Upper bound of the normalized float range.
pub const NORMALIZED_FLOAT_MAX: f32 = 1.0;

/// Client-visible sample format of a shadow buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    /// Server-native normalized `f32`; copies are format free.
    Float,
    /// 16-bit signed integer, full scale `±0x7FFF`.
    Int16,
    /// 32-bit signed integer, full scale `±0x7FFF_FFFF`.
    Int32,
}

impl SampleFormat {
    /// Bytes per sample in this format.
    pub fn sample_size(self) -> usize {
        match self {
            SampleFormat::Float => 4,
            SampleFormat::Int16 => 2,
            SampleFormat::Int32 => 4,
        }
    }
}

/// Expand native-endian `i32` samples read from `src` into normalized floats.
pub fn float_from_i32(dst: &mut [f32], src: &[u8], nsamples: usize, src_stride: usize) {
    let scaling = 1.0 / INT32_SCALING as f32;
    for (i, out) in dst.iter_mut().take(nsamples).enumerate() {
        let o = i * src_stride;
        let v = i32::from_ne_bytes([src[o], src[o + 1], src[o + 2], src[o + 3]]);
        *out = v as f32 * scaling;
    }
}

/// Expand native-endian `i16` samples read from `src` into normalized floats.
pub fn float_from_i16(dst: &mut [f32], src: &[u8], nsamples: usize, src_stride: usize) {
    let scaling = 1.0 / INT16_SCALING as f32;
    for (i, out) in dst.iter_mut().take(nsamples).enumerate() {
        let o = i * src_stride;
        let v = i16::from_ne_bytes([src[o], src[o + 1]]);
        *out = v as f32 * scaling;
    }
}

/// Quantize normalized floats into native-endian `i32` samples written to
/// `dst`. Inputs outside `[-1.0, +1.0]` clamp to the symmetric peaks.
pub fn i32_from_float(dst: &mut [u8], src: &[f32], nsamples: usize, dst_stride: usize) {
    for (i, &s) in src.iter().take(nsamples).enumerate() {
        let v = if s <= NORMALIZED_FLOAT_MIN {
            -INT32_SCALING
        } else if s >= NORMALIZED_FLOAT_MAX {
            INT32_SCALING
        } else {
            (s * INT32_SCALING as f32).round() as i32
        };
        let o = i * dst_stride;
        dst[o..o + 4].copy_from_slice(&v.to_ne_bytes());
    }
}

/// Quantize normalized floats into native-endian `i16` samples written to
/// `dst`. Inputs outside `[-1.0, +1.0]` clamp to the symmetric peaks.
pub fn i16_from_float(dst: &mut [u8], src: &[f32], nsamples: usize, dst_stride: usize) {
    for (i, &s) in src.iter().take(nsamples).enumerate() {
        let v = if s <= NORMALIZED_FLOAT_MIN {
            -INT16_SCALING
        } else if s >= NORMALIZED_FLOAT_MAX {
            INT16_SCALING
        } else {
            (s * INT16_SCALING as f32).round() as i16
        };
        let o = i * dst_stride;
        dst[o..o + 2].copy_from_slice(&v.to_ne_bytes());
    }
}
