// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `synthesis` module implements the polyphase synthesis filterbank of the MPEG audio standard.
//!
//! Sub-band samples enter in Q25 (1.0 is full scale). The matrixing DCT produces Q21 values that
//! are kept in the V vector FIFO, and the windowed sums are accumulated in 64-bit Q37 before being
//! rounded to 16-bit PCM.

use std::f64;

use picodec_core::util::clamp::{clamp_i16, clamp_i32};

use lazy_static::lazy_static;

/// The magnitude limit of a sub-band sample entering synthesis, Q25. Four times full scale.
const MAX_SUBBAND_SAMPLE: i32 = 1 << 27;

/// Synthesis window D[i], defined in Table B.3 of ISO/IEC 11172-3, multiplied by 65536. Every
/// entry of the table is an exact multiple of 1/65536.
#[rustfmt::skip]
const SYNTHESIS_D: [i32; 512] = [
          0,      -1,      -1,      -1,      -1,      -1,      -1,      -2,
         -2,      -2,      -2,      -3,      -3,      -4,      -4,      -5,
         -5,      -6,      -7,      -7,      -8,      -9,     -10,     -11,
        -13,     -14,     -16,     -17,     -19,     -21,     -24,     -26,
        -29,     -31,     -35,     -38,     -41,     -45,     -49,     -53,
        -58,     -63,     -68,     -73,     -79,     -85,     -91,     -97,
       -104,    -111,    -117,    -125,    -132,    -139,    -147,    -154,
       -161,    -169,    -176,    -183,    -190,    -196,    -202,    -208,
        213,     218,     222,     225,     227,     228,     228,     227,
        224,     221,     215,     208,     200,     189,     177,     163,
        146,     127,     106,      83,      57,      29,      -2,     -36,
        -72,    -111,    -153,    -197,    -244,    -294,    -347,    -401,
       -459,    -519,    -581,    -645,    -711,    -779,    -848,    -919,
       -991,   -1064,   -1137,   -1210,   -1283,   -1356,   -1428,   -1498,
      -1567,   -1634,   -1698,   -1759,   -1817,   -1870,   -1919,   -1962,
      -2001,   -2032,   -2057,   -2075,   -2085,   -2087,   -2080,   -2063,
       2037,    2000,    1952,    1893,    1822,    1739,    1644,    1535,
       1414,    1280,    1131,     970,     794,     605,     402,     185,
        -45,    -288,    -545,    -814,   -1095,   -1388,   -1692,   -2006,
      -2330,   -2663,   -3004,   -3351,   -3705,   -4063,   -4425,   -4788,
      -5153,   -5517,   -5879,   -6237,   -6589,   -6935,   -7271,   -7597,
      -7910,   -8209,   -8491,   -8755,   -8998,   -9219,   -9416,   -9585,
      -9727,   -9838,   -9916,   -9959,   -9966,   -9935,   -9863,   -9750,
      -9592,   -9389,   -9139,   -8840,   -8492,   -8092,   -7640,   -7134,
       6574,    5959,    5288,    4561,    3776,    2935,    2037,    1082,
         70,    -998,   -2122,   -3300,   -4533,   -5818,   -7154,   -8540,
      -9975,  -11455,  -12980,  -14548,  -16155,  -17799,  -19478,  -21189,
     -22929,  -24694,  -26482,  -28289,  -30112,  -31947,  -33791,  -35640,
     -37489,  -39336,  -41176,  -43006,  -44821,  -46617,  -48390,  -50137,
     -51853,  -53534,  -55178,  -56778,  -58333,  -59838,  -61289,  -62684,
     -64019,  -65290,  -66494,  -67629,  -68692,  -69679,  -70590,  -71420,
     -72169,  -72835,  -73415,  -73908,  -74313,  -74630,  -74856,  -74992,
      75038,   74992,   74856,   74630,   74313,   73908,   73415,   72835,
      72169,   71420,   70590,   69679,   68692,   67629,   66494,   65290,
      64019,   62684,   61289,   59838,   58333,   56778,   55178,   53534,
      51853,   50137,   48390,   46617,   44821,   43006,   41176,   39336,
      37489,   35640,   33791,   31947,   30112,   28289,   26482,   24694,
      22929,   21189,   19478,   17799,   16155,   14548,   12980,   11455,
       9975,    8540,    7154,    5818,    4533,    3300,    2122,     998,
        -70,   -1082,   -2037,   -2935,   -3776,   -4561,   -5288,   -5959,
       6574,    7134,    7640,    8092,    8492,    8840,    9139,    9389,
       9592,    9750,    9863,    9935,    9966,    9959,    9916,    9838,
       9727,    9585,    9416,    9219,    8998,    8755,    8491,    8209,
       7910,    7597,    7271,    6935,    6589,    6237,    5879,    5517,
       5153,    4788,    4425,    4063,    3705,    3351,    3004,    2663,
       2330,    2006,    1692,    1388,    1095,     814,     545,     288,
         45,    -185,    -402,    -605,    -794,    -970,   -1131,   -1280,
      -1414,   -1535,   -1644,   -1739,   -1822,   -1893,   -1952,   -2000,
       2037,    2063,    2080,    2087,    2085,    2075,    2057,    2032,
       2001,    1962,    1919,    1870,    1817,    1759,    1698,    1634,
       1567,    1498,    1428,    1356,    1283,    1210,    1137,    1064,
        991,     919,     848,     779,     711,     645,     581,     519,
        459,     401,     347,     294,     244,     197,     153,     111,
         72,      36,       2,     -29,     -57,     -83,    -106,    -127,
       -146,    -163,    -177,    -189,    -200,    -208,    -215,    -221,
       -224,    -227,    -228,    -228,    -227,    -225,    -222,    -218,
        213,     208,     202,     196,     190,     183,     176,     169,
        161,     154,     147,     139,     132,     125,     117,     111,
        104,      97,      91,      85,      79,      73,      68,      63,
         58,      53,      49,      45,      41,      38,      35,      31,
         29,      26,      24,      21,      19,      17,      16,      14,
         13,      11,      10,       9,       8,       7,       7,       6,
          5,       5,       4,       4,       3,       3,       2,       2,
          2,       2,       1,       1,       1,       1,       1,       1,
];

/// The number of fractional bits of the DCT coefficients.
const DCT_FRAC_BITS: u32 = 28;

lazy_static! {
    /// Coefficients for the recursive 32-point DCT.
    ///
    /// For each stage of length N (N = 2, 4, 8, 16, 32), the N/2 coefficients
    ///
    /// ```text
    /// c[i] = 1.0 / [2.0 * cos((PI / 2N) * (2*i + 1))]    for i = 0..N/2
    /// ```
    ///
    /// are stored, in Q28, starting at index N/2 - 1.
    static ref DCT_COEFFS: [i64; 31] = {
        let mut coeffs = [0; 31];

        for n in [2usize, 4, 8, 16, 32] {
            let half = n / 2;

            for i in 0..half {
                let angle = f64::consts::PI * (2 * i + 1) as f64 / (2 * n) as f64;
                let c = 1.0 / (2.0 * angle.cos());
                coeffs[half - 1 + i] = (c * f64::from(1u32 << DCT_FRAC_BITS)).round() as i64;
            }
        }

        coeffs
    };
}

/// `SynthesisState` maintains the persistant state of sub-band synthesis.
pub struct SynthesisState {
    /// The V vector FIFO, Q21.
    v_vec: [[i32; 64]; 16],
    v_front: usize,
}

impl Default for SynthesisState {
    fn default() -> Self {
        SynthesisState { v_vec: [[0; 64]; 16], v_front: 0 }
    }
}

/// Sub-band synthesis transforms 32 sub-band blocks containing `n_frames` time-domain samples each
/// into `n_frames` blocks of 32 PCM audio samples.
///
/// The input is sub-band major: sample `b` of sub-band `sb` is `in_samples[n_frames * sb + b]`.
pub fn synthesis(state: &mut SynthesisState, n_frames: usize, in_samples: &[i32], out: &mut [i16]) {
    assert!(in_samples.len() == 32 * n_frames);
    assert!(out.len() >= 32 * n_frames);

    let coeffs: &[i64; 31] = &DCT_COEFFS;

    let mut s_vec = [0i64; 32];
    let mut d_vec = [0i64; 32];

    for b in 0..n_frames {
        // Select the b-th sample from each of the 32 sub-bands. Clamping bounds every
        // intermediate of the DCT.
        for (i, s) in s_vec.iter_mut().enumerate() {
            let x = in_samples[n_frames * i + b];
            *s = i64::from(x.clamp(-MAX_SUBBAND_SAMPLE, MAX_SUBBAND_SAMPLE));
        }

        // Matrixing is a 32-point MDCT. Only points [16..48) of it are unique and they map onto a
        // 32-point DCT of the input vector [1]. Compute the DCT, then mirror and negate its
        // halves into the 64 point V vector:
        //
        // d_vec        0              16             32
        //              .               .              .
        //              .     +---------+   +----------+
        //              +-----+    A    | /     B      |
        //              +---------------+--------------+
        //
        // v_vec        0              16             32             48              64
        //              .               .              .              .               .
        //              .   +-----------+              .              .               .
        //              . /      B      |              .              .               .
        //              +---------------+--------------+--------------+---------------+
        //              .               |     -B     / |   -A   +-----+-----+   -A    |
        //              .               +----------+   +--------+     .     +---------+
        //
        // The boundary samples v[0], v[16], v[32], and v[48] are special cases.
        //
        // [1] K. Konstantinides, "Fast subband filtering in MPEG audio coding", Signal Processing
        // Letters IEEE, vol. 1, no. 2, pp. 26-28, 1994.
        dct_ii(&s_vec, &mut d_vec, coeffs);

        // Q25 to Q21.
        let mut d = [0i32; 32];
        for (d, &x) in d.iter_mut().zip(&d_vec) {
            *d = clamp_i32((x + (1 << 3)) >> 4);
        }

        let v_vec = &mut state.v_vec[state.v_front];

        for (v, &s) in v_vec[48 - 15..48].iter_mut().rev().zip(&d[1..16]) {
            *v = s.saturating_neg();
        }
        for (v, &s) in v_vec[48 + 1..48 + 16].iter_mut().zip(&d[1..16]) {
            *v = s.saturating_neg();
        }
        for (v, &s) in v_vec[16 + 1..16 + 16].iter_mut().rev().zip(&d[17..32]) {
            *v = s.saturating_neg();
        }
        v_vec[1..16].copy_from_slice(&d[17..32]);

        v_vec[0] = d[16];
        v_vec[32] = d[16].saturating_neg();
        v_vec[48] = d[0].saturating_neg();
        v_vec[16] = 0;

        // Window and sum. Rather than building the U vector, walk the even slots' first halves
        // and odd slots' second halves of the FIFO directly, accumulating into o_vec.
        let mut o_vec = [0i64; 32];

        for j in 0..8 {
            let v_start = state.v_front + (j << 1);

            let v0 = &state.v_vec[v_start & 0xf][0..32];
            let v1 = &state.v_vec[(v_start + 1) & 0xf][32..64];

            let k = j << 6;

            for i in 0..32 {
                o_vec[i] += i64::from(v0[i]) * i64::from(SYNTHESIS_D[k + i]);
                o_vec[i] += i64::from(v1[i]) * i64::from(SYNTHESIS_D[k + i + 32]);
            }
        }

        // Q37 to 16-bit PCM.
        let offset = b << 5;

        for (o, &s) in out[offset..offset + 32].iter_mut().zip(&o_vec) {
            *o = clamp_i16(clamp_i32((s + (1 << 21)) >> 22));
        }

        // Move the front of the FIFO backwards by one slot so the oldest slot is overwritten next.
        state.v_front = (state.v_front + 15) & 0xf;
    }
}

/// Multiply by a DCT coefficient, rounding.
#[inline(always)]
fn mul_coeff(x: i64, c: i64) -> i64 {
    (x * c + (1 << (DCT_FRAC_BITS - 1))) >> DCT_FRAC_BITS
}

/// Computes an N-point DCT-II, without scaling, using Byeong Gi Lee's recursive algorithm [1].
/// N is the length of `x` and must be a power of two between 2 and 32.
///
/// [1] B.G. Lee, "A new algorithm to compute the discrete cosine transform", IEEE Transactions
/// on Acoustics, Speech, and Signal Processing, vol. 32, no. 6, pp. 1243-1245, 1984.
fn dct_ii(x: &[i64], y: &mut [i64], coeffs: &[i64; 31]) {
    let n = x.len();
    let half = n >> 1;

    if n == 2 {
        y[0] = x[0] + x[1];
        y[1] = mul_coeff(x[0] - x[1], coeffs[0]);
        return;
    }

    let c = &coeffs[half - 1..n - 1];

    let mut even = [0i64; 16];
    let mut odd = [0i64; 16];

    for i in 0..half {
        even[i] = x[i] + x[n - 1 - i];
        odd[i] = mul_coeff(x[i] - x[n - 1 - i], c[i]);
    }

    let mut even_out = [0i64; 16];
    let mut odd_out = [0i64; 16];

    dct_ii(&even[..half], &mut even_out[..half], coeffs);
    dct_ii(&odd[..half], &mut odd_out[..half], coeffs);

    for i in 0..half - 1 {
        y[2 * i] = even_out[i];
        y[2 * i + 1] = odd_out[i] + odd_out[i + 1];
    }

    y[n - 2] = even_out[half - 1];
    y[n - 1] = odd_out[half - 1];
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn dct_ii_analytical(x: &[i64; 32]) -> [f64; 32] {
        const PI_64: f64 = f64::consts::PI / 64.0;

        let mut result = [0f64; 32];

        for (k, y) in result.iter_mut().enumerate() {
            *y = x
                .iter()
                .enumerate()
                .map(|(n, &x)| x as f64 * (PI_64 * (k * (2 * n + 1)) as f64).cos())
                .sum();
        }

        result
    }

    #[test]
    fn verify_dct32() {
        let mut rng = SmallRng::seed_from_u64(0x6d70_3373);

        for _ in 0..16 {
            let mut x = [0i64; 32];
            for s in x.iter_mut() {
                *s = i64::from(rng.random_range(-(1 << 25)..(1 << 25)));
            }

            let mut actual = [0i64; 32];
            dct_ii(&x, &mut actual, &DCT_COEFFS);

            let expected = dct_ii_analytical(&x);

            for (&a, &e) in actual.iter().zip(expected.iter()) {
                assert!((a as f64 - e).abs() < 64.0, "actual={} expected={}", a, e);
            }
        }
    }

    #[test]
    fn verify_dct32_full_scale() {
        // Alternating full-scale signs maximize the odd branch intermediates.
        let mut x = [0i64; 32];
        let max = i64::from(MAX_SUBBAND_SAMPLE);

        for (i, s) in x.iter_mut().enumerate() {
            *s = if i % 3 == 0 { -max } else { max };
        }

        let mut actual = [0i64; 32];
        dct_ii(&x, &mut actual, &DCT_COEFFS);

        let expected = dct_ii_analytical(&x);

        for (&a, &e) in actual.iter().zip(expected.iter()) {
            assert!((a as f64 - e).abs() < 256.0, "actual={} expected={}", a, e);
        }
    }

    #[test]
    fn verify_synthesis_silence() {
        let mut state = SynthesisState::default();
        let mut out = [1i16; 576];

        synthesis(&mut state, 18, &[0; 576], &mut out);

        assert!(out.iter().all(|&s| s == 0));
    }

    #[test]
    fn verify_synthesis_saturates() {
        let mut state = SynthesisState::default();
        let mut out = [0i16; 576];

        // Inputs far beyond full scale must neither panic nor wrap.
        for _ in 0..4 {
            synthesis(&mut state, 18, &[i32::MAX; 576], &mut out);
        }

        assert!(out.iter().any(|&s| s == i16::MAX || s == i16::MIN));
    }

    #[test]
    fn verify_synthesis_deterministic() {
        let mut rng = SmallRng::seed_from_u64(7);

        let input: Vec<i32> = (0..576).map(|_| rng.random_range(-(1 << 24)..(1 << 24))).collect();

        let mut a = SynthesisState::default();
        let mut b = SynthesisState::default();

        let mut out_a = [0i16; 576];
        let mut out_b = [0i16; 576];

        for _ in 0..3 {
            synthesis(&mut a, 18, &input, &mut out_a);
            synthesis(&mut b, 18, &input, &mut out_b);
            assert_eq!(out_a, out_b);
        }
    }
}
