// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `mdct` module implements a fixed-point Inverse Modified Discrete Cosine Transform (IMDCT).
//!
//! The IMDCT in this module is implemented in-terms of a forward FFT. The input spectrum is
//! normalized to a block exponent before the transform so that no intermediate value can overflow,
//! and the output is returned in the same fixed-point format as the input.

use super::complex::Complex;
use super::fft::Fft;
use crate::util::clamp::clamp_i32;
use crate::util::fixed::max_abs;

/// The Inverse Modified Discrete Transform (IMDCT).
pub struct Imdct {
    fft: Fft,
    scratch: Box<[Complex]>,
    twiddle: Box<[Complex]>,
    /// The largest permitted input magnitude after normalization, as a power-of-two exponent.
    headroom_exp: u32,
}

impl Imdct {
    /// Instantiate a N-point IMDCT with no scaling.
    ///
    /// The value of `n` is the number of spectral samples and must be a power-of-2 and less-than or
    /// equal to `2 * Fft::MAX_SIZE`.
    pub fn new(n: usize) -> Self {
        Imdct::new_scaled(n, 1.0)
    }

    /// Instantiate a N-point IMDCT with scaling. The magnitude of `scale` must not exceed 1.
    ///
    /// The value of `n` is the number of spectral samples and must be a power-of-2 and less-than or
    /// equal to `2 * Fft::MAX_SIZE`.
    pub fn new_scaled(n: usize, scale: f64) -> Self {
        // The algorithm requires a power-of-two N.
        assert!(n.is_power_of_two(), "n must be a power of two");
        assert!(n >= 4, "n must be atleast 4");
        assert!(scale.abs() <= 1.0, "scale must not exceed unity");

        let n2 = n / 2;

        // Pre-compute the twiddle factors.
        let alpha = 1.0 / 8.0 + if scale.is_sign_positive() { 0.0 } else { n2 as f64 };
        let pi_n = std::f64::consts::PI / n as f64;
        let sqrt_scale = scale.abs().sqrt();

        let twiddle = (0..n2)
            .map(|k| {
                let theta = pi_n * (alpha + k as f64);
                Complex::from_f64(sqrt_scale * theta.cos(), sqrt_scale * theta.sin())
            })
            .collect();

        // Instantiate a half-length forward FFT.
        let fft = Fft::new(n2);

        // Allocate scratch for the IMDCT.
        let scratch = vec![Default::default(); n2].into_boxed_slice();

        // The pre-twiddle may grow the modulus by sqrt(2), and the FFT by n2. Keep the sum below
        // 2^31.
        let headroom_exp = 29 - n2.trailing_zeros();

        Imdct { fft, scratch, twiddle, headroom_exp }
    }

    /// Performs the the N-point Inverse Modified Discrete Cosine Transform.
    ///
    /// The number of input spectral samples provided by the slice `spec` must equal the value of N
    /// that the IMDCT was instantiated with. The length of the output slice, `out`, must be of
    /// length 2N. Failing to meet these requirements will throw an assertion.
    pub fn imdct(&mut self, spec: &[i32], out: &mut [i32]) {
        // Spectral length: 2x FFT size, 0.5x output length.
        let n = self.fft.size() << 1;
        // 1x FFT size, 0.25x output length.
        let n2 = n >> 1;
        // 0.5x FFT size.
        let n4 = n >> 2;

        // The spectrum length must be the same as N.
        assert_eq!(spec.len(), n);
        // The output length must be 2x the spectrum length.
        assert_eq!(out.len(), 2 * n);

        let peak = max_abs(spec);

        if peak == 0 {
            out.fill(0);
            return;
        }

        // Block exponent: the largest left shift that keeps the peak below the headroom limit.
        // Negative values shift right.
        let peak_bits = 32 - peak.leading_zeros();
        let shift = self.headroom_exp as i32 - peak_bits as i32;

        let normalize = |x: i32| -> i64 {
            if shift >= 0 {
                i64::from(x) << shift
            }
            else {
                i64::from(x) >> -shift
            }
        };

        const ROUND: i64 = 1 << 29;

        // Pre-FFT twiddling and packing of the real input signal values into complex signal values.
        for (i, (&w, t)) in self.twiddle.iter().zip(self.scratch.iter_mut()).enumerate() {
            let even = normalize(spec[i * 2]);
            let odd = -normalize(spec[n - 1 - i * 2]);

            let re = odd * i64::from(w.im) - even * i64::from(w.re);
            let im = odd * i64::from(w.re) + even * i64::from(w.im);

            *t = Complex::new(((re + ROUND) >> 30) as i32, ((im + ROUND) >> 30) as i32);
        }

        // Do the FFT.
        self.fft.fft_inplace(&mut self.scratch);

        // Undo the block exponent.
        let denormalize = |x: i32| -> i32 {
            if shift > 0 {
                ((i64::from(x) + (1 << (shift - 1))) >> shift) as i32
            }
            else {
                clamp_i32(i64::from(x) << -shift)
            }
        };

        // Split the output vector (2N samples) into 4 vectors (N/2 samples each).
        let (vec0, vec1) = out.split_at_mut(n2);
        let (vec1, vec2) = vec1.split_at_mut(n2);
        let (vec2, vec3) = vec2.split_at_mut(n2);

        // Post-FFT twiddling and processing to expand the N/2 complex output values into 2N real
        // output samples.
        for (i, (x, &w)) in self.scratch[..n4].iter().zip(self.twiddle[..n4].iter()).enumerate() {
            // The real and imaginary components of the post-twiddled FFT samples are used to
            // generate 4 real output samples. Using the first half of the complex FFT output,
            // populate each of the 4 output vectors.
            let val = x.conj().mul_q30(w);

            let re = denormalize(val.re);
            let im = denormalize(val.im);

            // Forward and reverse order indicies that will be populated.
            let fi = 2 * i;
            let ri = n2 - 1 - 2 * i;

            vec0[ri] = im.saturating_neg();
            vec1[fi] = im;
            vec2[ri] = re;
            vec3[fi] = re;
        }

        for (i, (x, &w)) in self.scratch[n4..].iter().zip(self.twiddle[n4..].iter()).enumerate() {
            // Using the second half of the FFT output samples, finish populating each of the 4
            // output vectors.
            let val = x.conj().mul_q30(w);

            let re = denormalize(val.re);
            let im = denormalize(val.im);

            let fi = 2 * i;
            let ri = n2 - 1 - 2 * i;

            vec0[fi] = re.saturating_neg();
            vec1[ri] = re;
            vec2[fi] = im;
            vec3[ri] = im;
        }
    }
}
