// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `complex` module implements a 32-bit fixed-point complex number.

use crate::util::clamp::clamp_i32;

/// The number of fractional bits in a twiddle factor.
pub const TWIDDLE_FRAC_BITS: u32 = 30;

/// A complex number with integer components.
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub struct Complex {
    /// The real component.
    pub re: i32,
    /// The imaginary component.
    pub im: i32,
}

impl Complex {
    /// Create a new complex number.
    #[inline(always)]
    pub fn new(re: i32, im: i32) -> Self {
        Self { re, im }
    }

    /// Create a Q30 complex number from floating-point components.
    pub fn from_f64(re: f64, im: f64) -> Self {
        let scale = f64::from(1u32 << TWIDDLE_FRAC_BITS);
        Self { re: (re * scale).round() as i32, im: (im * scale).round() as i32 }
    }

    /// Take the complex conjugate of `self`.
    #[inline(always)]
    pub fn conj(&self) -> Self {
        Self { re: self.re, im: -self.im }
    }

    /// Multiply by a Q30 complex number, typically a twiddle factor.
    #[inline(always)]
    pub fn mul_q30(&self, w: Complex) -> Self {
        const ROUND: i64 = 1 << (TWIDDLE_FRAC_BITS - 1);

        let re = i64::from(self.re) * i64::from(w.re) - i64::from(self.im) * i64::from(w.im);
        let im = i64::from(self.re) * i64::from(w.im) + i64::from(self.im) * i64::from(w.re);

        Self {
            re: clamp_i32((re + ROUND) >> TWIDDLE_FRAC_BITS),
            im: clamp_i32((im + ROUND) >> TWIDDLE_FRAC_BITS),
        }
    }
}

impl core::ops::Add for Complex {
    type Output = Complex;

    #[inline(always)]
    fn add(self, rhs: Self) -> Self::Output {
        Self::Output { re: self.re.saturating_add(rhs.re), im: self.im.saturating_add(rhs.im) }
    }
}

impl core::ops::Sub for Complex {
    type Output = Complex;

    #[inline(always)]
    fn sub(self, rhs: Self) -> Self::Output {
        Self::Output { re: self.re.saturating_sub(rhs.re), im: self.im.saturating_sub(rhs.im) }
    }
}
