// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `fft` module implements a fixed-point Fast Fourier Transform (FFT).
//!
//! The complex FFT in this module supports a size up-to 32768. It is an iterative radix-2
//! decimation-in-time transform with Q30 twiddle factors.
//!
//! Each radix-2 stage at most doubles the modulus of its outputs, so an N-point transform
//! grows the largest modulus by at most N. Callers must scale their inputs accordingly.

use std::f64;

use super::complex::Complex;

/// The complex Fast Fourier Transform (FFT).
pub struct Fft {
    /// Bit reversed index of each input.
    perm: Box<[u16]>,
    /// `exp(-2*pi*j*k/N)` for `k < N/2`, in Q30.
    twiddle: Box<[Complex]>,
}

impl Fft {
    /// The maximum FFT size.
    pub const MAX_SIZE: usize = 1 << 15;

    pub fn new(n: usize) -> Self {
        assert!(n.is_power_of_two());
        assert!(n <= Fft::MAX_SIZE);

        let n_bits = n.trailing_zeros();

        let perm = (0..n)
            .map(|i| match n_bits {
                0 => 0,
                _ => (i.reverse_bits() >> (usize::BITS - n_bits)) as u16,
            })
            .collect();

        let twiddle = (0..n / 2)
            .map(|k| {
                let angle = -2.0 * f64::consts::PI * k as f64 / n as f64;
                Complex::from_f64(angle.cos(), angle.sin())
            })
            .collect();

        Fft { perm, twiddle }
    }

    pub fn size(&self) -> usize {
        self.perm.len()
    }

    /// Calculate the FFT of `x` in-place. The length of `x` must equal the FFT size.
    pub fn fft_inplace(&self, x: &mut [Complex]) {
        let n = x.len();
        assert_eq!(n, self.perm.len());

        for (i, &j) in self.perm.iter().enumerate() {
            let j = usize::from(j);

            if i < j {
                x.swap(i, j);
            }
        }

        // The first two stages have trivial twiddles.
        let mut half = match n {
            1 | 2 => 1,
            _ => {
                x.chunks_exact_mut(4).for_each(fft4);
                4
            }
        };

        // Butterflies of each remaining stage combine two transforms of length `half`. A stage
        // uses every `stride`-th twiddle factor.
        while half < n {
            let stride = n / (2 * half);

            for block in x.chunks_exact_mut(2 * half) {
                let (even, odd) = block.split_at_mut(half);

                for (k, (e, o)) in even.iter_mut().zip(odd.iter_mut()).enumerate() {
                    let p = *e;
                    let q = if k == 0 { *o } else { o.mul_q30(self.twiddle[k * stride]) };

                    *e = p + q;
                    *o = p - q;
                }
            }

            half <<= 1;
        }
    }
}

/// A 4-point FFT of bit reversed input.
#[inline(always)]
fn fft4(x: &mut [Complex]) {
    let (a, b) = (x[0] + x[1], x[0] - x[1]);
    let (c, d) = (x[2] + x[3], x[2] - x[3]);

    // Multiply by -j.
    let d = Complex::new(d.im, d.re.saturating_neg());

    x[0] = a + c;
    x[1] = b + d;
    x[2] = a - c;
    x[3] = b - d;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use std::f64;

    /// Compute a naive DFT.
    fn dft_naive(x: &[Complex]) -> Vec<(f64, f64)> {
        let n = x.len() as u64;

        let theta = 2.0 * f64::consts::PI / (x.len() as f64);

        (0..x.len())
            .map(|i| {
                let mut re = 0f64;
                let mut im = 0f64;

                for (j, &x) in x.iter().enumerate() {
                    let xre = f64::from(x.re);
                    let xim = f64::from(x.im);

                    let ij = ((i as u64) * (j as u64)) & (n - 1);

                    let wre = (theta * ij as f64).cos();
                    let wim = -(theta * ij as f64).sin();

                    re += (xre * wre) - (xim * wim);
                    im += (xre * wim) + (xim * wre);
                }

                (re, im)
            })
            .collect()
    }

    /// Generate a random Q20 test vector with components in [-1, 1).
    fn test_vector(n: usize, seed: u64) -> Vec<Complex> {
        let mut rng = SmallRng::seed_from_u64(seed);

        let range = -(1 << 20)..(1 << 20);

        (0..n)
            .map(|_| Complex::new(rng.random_range(range.clone()), rng.random_range(range.clone())))
            .collect()
    }

    fn check_fft(n: usize) {
        let input = test_vector(n, n as u64);
        let expected = dft_naive(&input);

        let mut actual = input.clone();
        Fft::new(n).fft_inplace(&mut actual);

        for (a, &(re, im)) in actual.iter().zip(expected.iter()) {
            assert!((f64::from(a.re) - re).abs() < 64.0, "n={} re={} expected={}", n, a.re, re);
            assert!((f64::from(a.im) - im).abs() < 64.0, "n={} im={} expected={}", n, a.im, im);
        }
    }

    #[test]
    fn verify_fft_small() {
        check_fft(1);
        check_fft(2);
        check_fft(4);
        check_fft(8);
    }

    #[test]
    fn verify_fft() {
        check_fft(16);
        check_fft(64);
        check_fft(256);
    }
}
