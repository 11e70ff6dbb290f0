// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integer requantization of Huffman decoded spectral samples.
//!
//! A decoded sample, `s`, is requantized as follows:
//!
//! ```text
//!     xr = sign(s) * |s|^(4/3) * 2^(e/4)
//! ```
//!
//! where the exponent `e` combines the global gain, the scale factor of the band, pre-emphasis,
//! and for short blocks, the subblock gain of the window. The product is formed with `|s|^(4/3)`
//! in Q20 and `2^(e/4)` split into a Q24 fractional part and a power-of-two shift. Requantized
//! samples are Q25 and saturate at `MAX_SAMPLE`.

use std::cmp::min;

use picodec_core::util::fixed::guard_bits;

use lazy_static::lazy_static;

use super::GranuleChannel;
use crate::common::*;

/// The largest magnitude of a requantized sample. At least one guard bit always remains.
pub(super) const MAX_SAMPLE: i32 = (1 << 30) - 1;

/// The number of fractional bits in `|s|^(4/3)`.
const POW43_FRAC_BITS: u32 = 20;

/// `2^(r/4)` in Q24 for r = 0..4.
const FRAC_Q24: [u64; 4] = [16_777_216, 19_951_585, 23_726_566, 28_215_802];

/// The number of fractional bits of a requantized sample.
const SAMPLE_FRAC_BITS: i32 = 25;

/// Pre-emphasis added to long block scale factors when `preflag` is set.
const PRE_EMPHASIS: [i32; 22] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 3, 3, 3, 2, 0];

lazy_static! {
    /// `x^(4/3)` in Q20 for small `x`, rounded to nearest.
    static ref POW43_SMALL: [u64; 64] = {
        let mut pow43 = [0; 64];
        for (x, pow) in pow43.iter_mut().enumerate() {
            *pow = ((x as f64).powf(4.0 / 3.0) * f64::from(1u32 << POW43_FRAC_BITS)).round() as u64;
        }
        pow43
    };
}

/// Integer cube root, rounded down.
fn icbrt(n: u64) -> u64 {
    if n == 0 {
        return 0;
    }

    // Start above the root so that Newton's method decreases monotonically towards it.
    let bits = 64 - n.leading_zeros();
    let mut y = 1u64 << ((bits + 2) / 3);

    loop {
        let next = (2 * y + n / (y * y)) / 3;

        if next >= y {
            return y;
        }

        y = next;
    }
}

/// Computes `x^(4/3)` in Q20. Exact (rounded) for `x < 64`, otherwise `x * cbrt(x)` with a Q16
/// cube root. `x` must not exceed 8206 (15 plus the largest 13-bit linbits escape).
#[inline]
fn pow43(x: u32) -> u64 {
    debug_assert!(x <= 8206);

    match POW43_SMALL.get(x as usize) {
        Some(&pow) => pow,
        None => {
            let x = u64::from(x);
            (x * icbrt(x << 48)) << (POW43_FRAC_BITS - 16)
        }
    }
}

/// The scaling applied to every sample of a band.
#[derive(Copy, Clone)]
struct BandScale {
    frac: u64,
    /// The right shift applied to the Q44 product. Negative values shift left.
    shift: i32,
}

impl BandScale {
    fn new(exp: i32) -> Self {
        // Floor division of the exponent into an integer power-of-two and a quarter step.
        let q = exp >> 2;
        let r = (exp & 3) as usize;

        // Q20 x Q24 = Q44.
        BandScale { frac: FRAC_Q24[r], shift: 44 - SAMPLE_FRAC_BITS - q }
    }

    #[inline]
    fn apply(&self, s: i32) -> i32 {
        if s == 0 {
            return 0;
        }

        let prod = pow43(s.unsigned_abs()) * self.frac;

        let mag = if self.shift >= 64 {
            0
        }
        else if self.shift > 0 {
            (prod + (1 << (self.shift - 1))) >> self.shift
        }
        else {
            let shift = self.shift.unsigned_abs();

            if shift >= 64 || prod > (MAX_SAMPLE as u64) >> shift {
                MAX_SAMPLE as u64
            }
            else {
                prod << shift
            }
        };

        let mag = min(mag, MAX_SAMPLE as u64) as i32;

        if s < 0 {
            -mag
        }
        else {
            mag
        }
    }
}

fn requantize_long(channel: &GranuleChannel, bands: &[usize], gain: i32, buf: &mut [i32; 576]) {
    debug_assert!(bands.len() <= 23);

    let scalefac_shift = if channel.scalefac_scale { 2 } else { 1 };

    for (i, (&start, &end)) in bands.iter().zip(&bands[1..]).enumerate() {
        // Samples from rzero onwards are 0.
        if start >= channel.rzero {
            break;
        }

        let pre_emphasis = if channel.preflag { PRE_EMPHASIS[i] } else { 0 };

        let scalefac = i32::from(channel.scalefacs[i]) + pre_emphasis;

        let scale = BandScale::new(gain - (scalefac << scalefac_shift));

        for sample in &mut buf[start..min(end, channel.rzero)] {
            *sample = scale.apply(*sample);
        }
    }
}

/// Requantizes short bands. The bands interleave the three windows, and the first band's scale
/// factor is `scalefacs[switch]`.
fn requantize_short(
    channel: &GranuleChannel,
    bands: &[usize],
    switch: usize,
    gain: i32,
    buf: &mut [i32; 576],
) {
    debug_assert!(bands.len() <= 40);

    let window_gain = channel.subblock_gain.map(|g| gain - 8 * i32::from(g));

    let scalefac_shift = if channel.scalefac_scale { 2 } else { 1 };

    for (i, (&start, &end)) in bands.iter().zip(&bands[1..]).enumerate() {
        if start >= channel.rzero {
            break;
        }

        let scalefac = i32::from(channel.scalefacs[switch + i]);

        let scale = BandScale::new(window_gain[i % 3] - (scalefac << scalefac_shift));

        for sample in &mut buf[start..min(end, channel.rzero)] {
            *sample = scale.apply(*sample);
        }
    }
}

/// Requantizes the samples of a granule channel in-place. Returns the guard bits of the
/// requantized samples.
///
/// With mid-side stereo, the 1/sqrt(2) normalization of the mid and side channels is folded into
/// the gain.
pub(super) fn requantize(
    header: &FrameHeader,
    channel: &GranuleChannel,
    buf: &mut [i32; 576],
) -> u32 {
    let mut gain = i32::from(channel.global_gain) - 210;

    if header.is_mid_side_stereo() {
        gain -= 2;
    }

    match channel.block_type {
        BlockType::Short { is_mixed: false } => {
            requantize_short(channel, &SFB_SHORT_BANDS[header.sample_rate_idx], 0, gain, buf);
        }
        BlockType::Short { is_mixed: true } => {
            // The long bands of a mixed block end at the switch point, where the short bands begin.
            let bands = SFB_MIXED_BANDS[header.sample_rate_idx];
            let switch = SFB_MIXED_SWITCH_POINT[header.sample_rate_idx];

            requantize_long(channel, &bands[..=switch], gain, buf);
            requantize_short(channel, &bands[switch..], switch, gain, buf);
        }
        _ => {
            requantize_long(channel, &SFB_LONG_BANDS[header.sample_rate_idx], gain, buf);
        }
    }

    guard_bits(&buf[..channel.rzero])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::parse_frame_header_word;

    fn long_channel(global_gain: u8, rzero: usize) -> GranuleChannel {
        GranuleChannel { global_gain, rzero, ..Default::default() }
    }

    #[test]
    fn verify_pow43() {
        for x in 0..=8206u32 {
            let expected = f64::from(x).powf(4.0 / 3.0) * f64::from(1u32 << POW43_FRAC_BITS);
            let actual = pow43(x) as f64;

            assert!((actual - expected).abs() <= expected * 4e-6 + 0.5, "x={}", x);
        }
    }

    #[test]
    fn verify_icbrt() {
        for n in [0u64, 1, 7, 8, 26, 27, 1 << 48, (1 << 48) + 1, 8206 << 48] {
            let y = icbrt(n);
            assert!(y * y * y <= n);
            assert!((y + 1) * (y + 1) * (y + 1) > n);
        }
    }

    #[test]
    fn verify_requantize_unity() {
        // 0x44 = 128 kbps, 44.1 kHz, stereo.
        let header = parse_frame_header_word(0xfffb_9004).unwrap();

        let mut buf = [0i32; 576];
        buf[..4].copy_from_slice(&[1, -1, 8, 0]);

        let guard = requantize(&header, &long_channel(210, 4), &mut buf);

        assert_eq!(buf[..4], [1 << 25, -(1 << 25), 1 << 29, 0]);
        assert_eq!(guard, 1);
    }

    #[test]
    fn verify_requantize_mid_side_gain() {
        // Joint stereo with mid-side.
        let header = parse_frame_header_word(0xfffb_9064).unwrap();
        assert!(header.is_mid_side_stereo());

        let mut buf = [0i32; 576];
        buf[0] = 1;

        requantize(&header, &long_channel(210, 2), &mut buf);

        // 2^25 / sqrt(2).
        assert_eq!(buf[0], 23_726_566);
    }

    #[test]
    fn verify_requantize_monotonic() {
        let header = parse_frame_header_word(0xfffb_9004).unwrap();

        for global_gain in [0u8, 90, 150, 200, 210, 230, 255] {
            let mut prev = 0;

            for x in 0..=8206 {
                let mut buf = [0i32; 576];
                buf[0] = x;

                requantize(&header, &long_channel(global_gain, 2), &mut buf);

                assert!(buf[0] >= prev, "gain={} x={}", global_gain, x);
                prev = buf[0];
            }
        }

        for x in [1, 17, 500, 8206] {
            let mut prev = 0;

            for global_gain in 0..=255u8 {
                let mut buf = [0i32; 576];
                buf[0] = x;

                requantize(&header, &long_channel(global_gain, 2), &mut buf);

                assert!(buf[0] >= prev, "gain={} x={}", global_gain, x);
                prev = buf[0];
            }
        }
    }

    #[test]
    fn verify_max_gain_clips() {
        let header = parse_frame_header_word(0xfffb_9004).unwrap();

        let mut buf = [0i32; 576];
        buf[..2].copy_from_slice(&[8206, -8206]);

        let guard = requantize(&header, &long_channel(255, 2), &mut buf);

        assert_eq!(buf[..2], [MAX_SAMPLE, -MAX_SAMPLE]);
        assert_eq!(guard, 1);
    }

    #[test]
    fn verify_requantize_short_subblock_gain() {
        let header = parse_frame_header_word(0xfffb_9004).unwrap();

        let channel = GranuleChannel {
            global_gain: 210,
            block_type: BlockType::Short { is_mixed: false },
            subblock_gain: [0, 1, 2],
            rzero: 12,
            ..Default::default()
        };

        // The first short band is 4 samples wide for each window.
        let mut buf = [0i32; 576];
        buf[..12].fill(1);

        requantize(&header, &channel, &mut buf);

        // Each subblock gain step scales by 2^-2.
        assert!(buf[0..4].iter().all(|&s| s == 1 << 25));
        assert!(buf[4..8].iter().all(|&s| s == 1 << 23));
        assert!(buf[8..12].iter().all(|&s| s == 1 << 21));
    }
}
