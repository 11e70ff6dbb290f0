// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Justification: Some loops are better expressed without a range loop.
#![allow(clippy::needless_range_loop)]

use std::f64;

use picodec_core::util::bits::ilog;
use picodec_core::util::clamp::clamp_i32;
use picodec_core::util::fixed::{max_abs, to_fixed};

use lazy_static::lazy_static;

use super::GranuleChannel;
use crate::common::*;

/// The largest sub-band sample magnitude the IMDCTs accept without overflowing their 64-bit
/// intermediates. Larger sub-bands are scaled down before, and back up after, the transform.
const MAX_IMDCT_INPUT_BITS: u32 = 25;

lazy_static! {
    /// Hybrid synthesis IMDCT window coefficients in Q31 for: Long, Start, Short, and End blocks,
    /// in that order.
    ///
    /// For long blocks:
    ///
    /// ```text
    /// W[ 0..36] = sin(PI/36.0 * (i + 0.5))
    /// ```
    ///
    /// For start blocks:
    ///
    /// ```text
    /// W[ 0..18] = sin(PI/36.0 * (i + 0.5))
    /// W[18..24] = 1.0
    /// W[24..30] = sin(PI/12.0 * ((i - 18) - 0.5))
    /// W[30..36] = 0.0
    /// ```
    ///
    /// For short blocks (to be applied to each 12 sample window):
    ///
    /// ```text
    /// W[ 0..12] = sin(PI/12.0 * (i + 0.5))
    /// W[12..36] = 0.0
    /// ```
    ///
    /// For end blocks:
    ///
    /// ```text
    /// W[ 0..6 ] = 0.0
    /// W[ 6..12] = sin(PI/12.0 * ((i - 6) + 0.5))
    /// W[12..18] = 1.0
    /// W[18..36] = sin(PI/36.0 * (i + 0.5))
    /// ```
    static ref IMDCT_WINDOWS: [[i32; 36]; 4] = {
        const PI_36: f64 = f64::consts::PI / 36.0;
        const PI_12: f64 = f64::consts::PI / 12.0;

        let long = |i: usize| to_fixed((PI_36 * (i as f64 + 0.5)).sin(), 31);
        let short = |i: usize| to_fixed((PI_12 * (i as f64 + 0.5)).sin(), 31);

        let mut windows = [[0; 36]; 4];

        for i in 0..36 {
            windows[0][i] = long(i);
        }

        // Start block, 30..36 are 0.
        for i in 0..18 {
            windows[1][i] = long(i);
        }
        windows[1][18..24].fill(i32::MAX);
        for i in 24..30 {
            windows[1][i] = short(i - 18);
        }

        for i in 0..12 {
            windows[2][i] = short(i);
        }

        // End block, 0..6 are 0.
        for i in 6..12 {
            windows[3][i] = short(i - 6);
        }
        windows[3][12..18].fill(i32::MAX);
        for i in 18..36 {
            windows[3][i] = long(i);
        }

        windows
    };
}

lazy_static! {
    /// Cosine coefficients in Q30 for half of a 12-point IMDCT.
    ///
    /// ```text
    /// cos12[i][k] = cos(PI/24.0 * (2*i + 1 + N/2) * (2*k + 1))
    /// ```
    /// where `N=12`, `i=N/4..3N/4`, and `k=0..N/2`.
    static ref IMDCT_HALF_COS_12: [[i64; 6]; 6] = {
        const PI_24: f64 = f64::consts::PI / 24.0;

        let mut cos = [[0; 6]; 6];

        for (i, cos_i) in cos.iter_mut().enumerate() {
            for (k, cos_ik) in cos_i.iter_mut().enumerate() {
                let n = (2 * (i + 3) + (12 / 2) + 1) * (2 * k + 1);
                *cos_ik = i64::from(to_fixed((PI_24 * n as f64).cos(), 30));
            }
        }

        cos
    };
}

lazy_static! {
    /// Alias reduction butterfly coefficients, CS and CA, in Q31.
    ///
    /// ```text
    /// cs[i] =  1.0 / sqrt(1.0 + c[i]^2)
    /// ca[i] = c[i] / sqrt(1.0 + c[i]^2)
    /// ```
    ///
    /// where `c[i]` is given by table B.9 of ISO/IEC 11172-3.
    static ref ANTIALIAS_CS_CA: ([i64; 8], [i64; 8]) = {
        const C: [f64; 8] = [-0.6, -0.535, -0.33, -0.185, -0.095, -0.041, -0.0142, -0.0037];

        let mut cs = [0; 8];
        let mut ca = [0; 8];

        for i in 0..8 {
            let sqrt = f64::sqrt(1.0 + (C[i] * C[i]));
            cs[i] = i64::from(to_fixed(1.0 / sqrt, 31));
            ca[i] = i64::from(to_fixed(C[i] / sqrt, 31));
        }

        (cs, ca)
    };
}

/// Reorder samples that are part of short blocks into sub-band order.
///
/// Each short band holds 3 consecutive windows. Reordering interleaves them:
///
/// ```text
///   [ 0 | 1 | 2 | 3 ][ 4 | 5 | 6 | 7 ][ 8 | 9 | a | b ]
///   [ 0 | 4 | 8 | 1 | 5 | 9 | 2 | 6 | a | 3 | 7 | b ]
/// ```
pub(super) fn reorder(header: &FrameHeader, channel: &GranuleChannel, buf: &mut [i32; 576]) {
    let BlockType::Short { is_mixed } = channel.block_type
    else {
        return;
    };

    // Only the short bands of a mixed block are reordered.
    let bands = if is_mixed {
        let switch = SFB_MIXED_SWITCH_POINT[header.sample_rate_idx];
        &SFB_MIXED_BANDS[header.sample_rate_idx][switch..]
    }
    else {
        &SFB_SHORT_BANDS[header.sample_rate_idx][..]
    };

    let start = bands[0];

    let mut reorder_buf = [0i32; 576];
    let mut i = start;

    for w in bands.windows(4).step_by(3) {
        let win0 = &buf[w[0]..w[1]];
        let win1 = &buf[w[1]..w[2]];
        let win2 = &buf[w[2]..w[3]];

        for ((&s0, &s1), &s2) in win0.iter().zip(win1).zip(win2) {
            reorder_buf[i..i + 3].copy_from_slice(&[s0, s1, s2]);
            i += 3;
        }
    }

    buf[start..i].copy_from_slice(&reorder_buf[start..i]);
}

/// Applies the anti-aliasing butterflies at the boundaries of sub-bands that are not part of short
/// blocks.
pub(super) fn antialias(channel: &GranuleChannel, samples: &mut [i32; 576]) {
    let sb_end = match channel.block_type {
        BlockType::Short { is_mixed: false } => return,
        // The long block of a mixed block spans the first 2 sub-bands.
        BlockType::Short { is_mixed: true } => 2 * 18,
        _ => 32 * 18,
    };

    let (cs, ca) = &*ANTIALIAS_CS_CA;

    const ROUND: i64 = 1 << 30;

    // 8 butterflies at each boundary, the lower sample moving backwards and the upper sample
    // moving forwards from the boundary.
    //
    //   l1 = l0 * cs[i] - u0 * ca[i]
    //   u1 = u0 * cs[i] + l0 * ca[i]
    for sb in (18..sb_end).step_by(18) {
        for i in 0..8 {
            let li = sb - 1 - i;
            let ui = sb + i;
            let lower = i64::from(samples[li]);
            let upper = i64::from(samples[ui]);
            samples[li] = clamp_i32((lower * cs[i] - upper * ca[i] + ROUND) >> 31);
            samples[ui] = clamp_i32((upper * cs[i] + lower * ca[i] + ROUND) >> 31);
        }
    }
}

/// Returns the right shift that brings the peak of a sub-band within the IMDCT input range.
fn sub_band_prescale(sub_band: &[i32]) -> u32 {
    ilog(max_abs(sub_band)).saturating_sub(MAX_IMDCT_INPUT_BITS)
}

/// Performs hybrid synthesis (IMDCT and windowing) and overlap-add.
pub(super) fn hybrid_synthesis(
    channel: &GranuleChannel,
    overlap: &mut [[i32; 18]; 32],
    samples: &mut [i32; 576],
) {
    // Short blocks process no sub-bands as long blocks, mixed blocks the first 2.
    let n_long_bands = match channel.block_type {
        BlockType::Short { is_mixed: false } => 0,
        BlockType::Short { is_mixed: true } => 2,
        _ => 32,
    };

    let long_window: &[i32; 36] = match channel.block_type {
        BlockType::Start => &IMDCT_WINDOWS[1],
        BlockType::End => &IMDCT_WINDOWS[3],
        _ => &IMDCT_WINDOWS[0],
    };

    // Anti-aliasing grows a magnitude by at most 1.2x. With enough guard bits no sub-band needs
    // scaling.
    let needs_prescale = channel.guard_bits <= 31 - MAX_IMDCT_INPUT_BITS;

    for (sb, (sub_band, overlap)) in
        samples.chunks_exact_mut(18).zip(overlap.iter_mut()).enumerate()
    {
        let shift = if needs_prescale { sub_band_prescale(sub_band) } else { 0 };

        let mut x = [0i64; 18];

        for (x, &s) in x.iter_mut().zip(sub_band.iter()) {
            *x = i64::from(s >> shift);
        }

        let mut out = [0i32; 18];

        if sb < n_long_bands {
            imdct36::imdct36(&x, long_window, shift, overlap, &mut out);
        }
        else {
            imdct12_win(&x, &IMDCT_WINDOWS[2], shift, overlap, &mut out);
        }

        sub_band.copy_from_slice(&out);
    }
}

/// Applies a Q31 window coefficient to a transform output, and restores the sub-band prescale.
#[inline(always)]
fn window_sample(y: i64, w: i32, shift: u32) -> i64 {
    ((y * i64::from(w)) >> 31) << shift
}

/// Performs the 12-point IMDCT and windowing of each of the 3 short windows of a short block, and
/// then overlap-adds the result.
fn imdct12_win(
    x: &[i64; 18],
    window: &[i32; 36],
    shift: u32,
    overlap: &mut [i32; 18],
    out: &mut [i32; 18],
) {
    let cos12: &[[i64; 6]; 6] = &IMDCT_HALF_COS_12;

    let mut tmp = [0i64; 36];

    for w in 0..3 {
        for i in 0..3 {
            // The half-size IMDCT. Since y[3..0] = -y[3..6] and y[12..9] = y[6..9], yl and yr
            // produce the left and right halves of the 12 outputs.
            let (mut yl, mut yr) = (0, 0);

            for k in 0..6 {
                yl += x[3 * k + w] * cos12[i][k];
                yr += x[3 * k + w] * cos12[i + 3][k];
            }

            let yl = (yl + (1 << 29)) >> 30;
            let yr = (yr + (1 << 29)) >> 30;

            // The windows overlap each other by half, and the first and last 6 samples are 0.
            //
            // 0             6           12           18           24           30            36
            // +-------------+------------+------------+------------+------------+-------------+
            // |      0      |  y0[..6]   |  y0[6..]   |  y1[6..]   |  y2[6..]   |      0      |
            // |             |            |  + y1[..6] |  + y2[..6] |            |             |
            // +-------------+------------+------------+------------+------------+-------------+
            let base = 6 + 6 * w;

            tmp[base + 3 - i - 1] -= window_sample(yl, window[3 - i - 1], shift);
            tmp[base + i + 3] += window_sample(yl, window[i + 3], shift);
            tmp[base + i + 6] += window_sample(yr, window[i + 6], shift);
            tmp[base + 12 - i - 1] += window_sample(yr, window[12 - i - 1], shift);
        }
    }

    for i in 0..18 {
        out[i] = clamp_i32(tmp[i] + i64::from(overlap[i]));
        overlap[i] = clamp_i32(tmp[i + 18]);
    }
}

/// Inverts odd samples in odd sub-bands.
pub(super) fn frequency_inversion(samples: &mut [i32; 576]) {
    for sub_band in samples.chunks_exact_mut(18).skip(1).step_by(2) {
        for s in sub_band.iter_mut().skip(1).step_by(2) {
            *s = s.saturating_neg();
        }
    }
}

mod imdct36 {
    use super::window_sample;
    use picodec_core::util::clamp::clamp_i32;

    /// Multiplies by a Q30 constant, rounding to nearest.
    #[inline(always)]
    fn mul(c: i64, a: i64) -> i64 {
        (c * a + (1 << 29)) >> 30
    }

    /// Performs an Inverse Modified Discrete Cosine Transform (IMDCT) transforming 18
    /// frequency-domain input samples, into 36 time-domain output samples, then windows and
    /// overlap-adds them.
    ///
    /// This is an integer implementation of the IMDCT using Szu-Wei Lee's algorithm published in
    /// article [1]. Inputs must not exceed 2^25 in magnitude.
    ///
    /// [1] Szu-Wei Lee, "Improved algorithm for efficient computation of the forward and backward
    /// MDCT in MPEG audio coder", IEEE Transactions on Circuits and Systems II: Analog and Digital
    /// Signal Processing, vol. 48, no. 10, pp. 990-994, 2001.
    pub fn imdct36(
        x: &[i64; 18],
        window: &[i32; 36],
        shift: u32,
        overlap: &mut [i32; 18],
        out: &mut [i32; 18],
    ) {
        let mut dct = [0i64; 18];

        dct_iv(x, &mut dct);

        // Mapping of DCT-IV to IMDCT
        //
        //  0            9                       27           36
        //  +------------+------------------------+------------+
        //  | dct[9..18] | -dct[0..18].rev()      | -dct[0..9] |
        //  +------------+------------------------+------------+
        for i in 0..9 {
            let y = window_sample(dct[9 + i], window[i], shift);
            out[i] = clamp_i32(i64::from(overlap[i]) + y);
        }

        for i in 9..18 {
            let y = window_sample(dct[27 - i - 1], window[i], shift);
            out[i] = clamp_i32(i64::from(overlap[i]) - y);
        }

        for i in 18..27 {
            overlap[i - 18] = clamp_i32(-window_sample(dct[27 - i - 1], window[i], shift));
        }

        for i in 27..36 {
            overlap[i - 18] = clamp_i32(-window_sample(dct[i - 27], window[i], shift));
        }
    }

    /// Step 2: Mapping N/2-point DCT-IV to N/2-point SDCT-II.
    fn dct_iv(x: &[i64; 18], y: &mut [i64; 18]) {
        // 2 * cos(PI * (2*m + 1) / (2*36)), Q30.
        const SCALE: [i64; 18] = [
            2_145_439_719, // m=0
            2_129_111_628, // m=1
            2_096_579_711, // m=2
            2_048_091_557, // m=3
            1_984_016_189, // m=4
            1_904_841_260, // m=5
            1_811_169_339, // m=6
            1_703_713_325, // m=7
            1_583_291_025, // m=8
            1_450_818_924, // m=9
            1_307_305_214, // m=10
            1_153_842_123, // m=11
            991_597_596,   // m=12
            821_806_413,   // m=13
            645_760_787,   // m=14
            464_800_532,   // m=15
            280_302_863,   // m=16
            93_671_921,    // m=17
        ];

        let mut samples = [0i64; 18];

        for ((s, &x), &c) in samples.iter_mut().zip(x).zip(&SCALE) {
            *s = mul(c, x);
        }

        sdct_ii_18(&samples, y);

        y[0] >>= 1;
        for i in 1..18 {
            y[i] = (y[i] >> 1) - y[i - 1];
        }
    }

    /// Step 3: Decompose N/2-point SDCT-II into two N/4-point SDCT-IIs.
    fn sdct_ii_18(x: &[i64; 18], y: &mut [i64; 18]) {
        // 2 * cos(PI * (2*m + 1) / 36), Q30.
        const SCALE: [i64; 9] = [
            2_139_311_824, // m=0
            2_074_309_917, // m=1
            1_946_281_153, // m=2
            1_759_115_620, // m=3
            1_518_500_250, // m=4
            1_231_746_018, // m=5
            907_565_806,   // m=6
            555_809_667,   // m=7
            187_165_532,   // m=8
        ];

        let mut even = [0i64; 9];
        let mut odd = [0i64; 9];

        for i in 0..9 {
            even[i] = x[i] + x[17 - i];
            odd[i] = mul(SCALE[i], x[i] - x[17 - i]);
        }

        sdct_ii_9(&even, y);
        sdct_ii_9(&odd, &mut y[1..]);

        for i in (3..18).step_by(2) {
            y[i] -= y[i - 2];
        }
    }

    /// Step 4: Computation of 9-point (N/4) SDCT-II.
    fn sdct_ii_9(x: &[i64; 9], y: &mut [i64]) {
        // Q30.
        const D: [i64; 7] = [
            -1_859_775_393, // -sqrt(3.0)
            2_017_974_537,  // -2.0 * cos(8.0 * PI / 9.0)
            -372_906_622,   // -2.0 * cos(4.0 * PI / 9.0)
            -1_645_067_915, // -2.0 * cos(2.0 * PI / 9.0)
            -734_482_665,   // -2.0 * sin(8.0 * PI / 9.0)
            -2_114_858_546, // -2.0 * sin(4.0 * PI / 9.0)
            -1_380_375_881, // -2.0 * sin(2.0 * PI / 9.0)
        ];

        let a01 = x[3] + x[5];
        let a02 = x[3] - x[5];
        let a03 = x[6] + x[2];
        let a04 = x[6] - x[2];
        let a05 = x[1] + x[7];
        let a06 = x[1] - x[7];
        let a07 = x[8] + x[0];
        let a08 = x[8] - x[0];

        let a09 = x[4] + a05;
        let a10 = a01 + a03;
        let a11 = a10 + a07;
        let a12 = a03 - a07;
        let a13 = a01 - a07;
        let a14 = a01 - a03;
        let a15 = a02 - a04;
        let a16 = a15 + a08;
        let a17 = a04 + a08;
        let a18 = a02 - a08;
        let a19 = a02 + a04;
        let a20 = 2 * x[4] - a05;

        let m1 = mul(D[0], a06);
        let m2 = mul(D[1], a12);
        let m3 = mul(D[2], a13);
        let m4 = mul(D[3], a14);
        let m5 = mul(D[0], a16);
        let m6 = mul(D[4], a17);
        let m7 = mul(D[5], a18);
        let m8 = mul(D[6], a19);

        let a21 = a20 + m2;
        let a22 = a20 - m2;
        let a23 = a20 + m3;
        let a24 = m1 + m6;
        let a25 = m1 - m6;
        let a26 = m1 + m7;

        y[0] = a09 + a11;
        y[2] = m8 - a26;
        y[4] = m4 - a21;
        y[6] = m5;
        y[8] = a22 - m3;
        y[10] = a25 - m7;
        y[12] = a11 - 2 * a09;
        y[14] = a24 + m8;
        y[16] = a23 + m4;
    }

    #[cfg(test)]
    mod tests {
        use super::imdct36;
        use rand::rngs::SmallRng;
        use rand::{Rng, SeedableRng};
        use std::f64;

        fn imdct36_analytical(x: &[i64; 18]) -> [f64; 36] {
            const PI_72: f64 = f64::consts::PI / 72.0;

            let mut result = [0f64; 36];

            for (i, r) in result.iter_mut().enumerate() {
                *r = x
                    .iter()
                    .enumerate()
                    .map(|(j, &x)| {
                        x as f64 * (PI_72 * ((2 * i + 1 + 18) * (2 * j + 1)) as f64).cos()
                    })
                    .sum();
            }

            result
        }

        #[test]
        fn verify_imdct36() {
            let mut rng = SmallRng::seed_from_u64(0x1d_c736);

            const WINDOW: [i32; 36] = [i32::MAX; 36];

            for _ in 0..64 {
                let mut x = [0i64; 18];
                for s in x.iter_mut() {
                    *s = rng.random_range(-(1 << 25)..=(1 << 25));
                }

                let mut actual = [0i32; 18];
                let mut overlap = [0i32; 18];
                imdct36(&x, &WINDOW, 0, &mut overlap, &mut actual);

                let expected = imdct36_analytical(&x);

                for i in 0..18 {
                    assert!((expected[i] - f64::from(actual[i])).abs() < 64.0);
                    assert!((expected[i + 18] - f64::from(overlap[i])).abs() < 64.0);
                }
            }
        }
    }
}
