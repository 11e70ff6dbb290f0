// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `util` module provides a repository of commonly used utility functions sorted into distinct
//! categories.

pub mod bits {
    //! Utilities for bit manipulation.

    /// Sign extends an arbitrary, 32-bit or less, signed two's complement integer stored within an
    /// u32 to a full width i32.
    #[inline(always)]
    pub fn sign_extend_leq32_to_i32(value: u32, width: u32) -> i32 {
        (value.wrapping_shl(32 - width) as i32).wrapping_shr(32 - width)
    }

    /// Returns the number of bits required to represent `x`, i.e., the position (1 through 32) of
    /// the highest set bit. Zero returns zero.
    #[inline(always)]
    pub fn ilog(x: u32) -> u32 {
        32 - x.leading_zeros()
    }

    #[test]
    fn verify_sign_extend() {
        assert_eq!(sign_extend_leq32_to_i32(0b111, 3), -1);
        assert_eq!(sign_extend_leq32_to_i32(0b011, 3), 3);
        assert_eq!(sign_extend_leq32_to_i32(0x8000_0000, 32), i32::MIN);
    }
}

pub mod clamp {
    //! Utilities for clamping numeric values to a defined range.

    /// Clamps the given value to the [-32_768, 32_767] range.
    #[inline]
    pub fn clamp_i16(val: i32) -> i16 {
        if val.wrapping_add(0x8000) & !0xffff == 0 {
            val as i16
        }
        else {
            0x7fff ^ val.wrapping_shr(31) as i16
        }
    }

    /// Clamps the given value to the [-2_147_483_648, 2_147_483_647] range.
    #[inline]
    pub fn clamp_i32(val: i64) -> i32 {
        if val.wrapping_add(0x8000_0000) & !0xffff_ffff == 0 {
            val as i32
        }
        else {
            0x7fff_ffff ^ val.wrapping_shr(63) as i32
        }
    }

    #[test]
    fn verify_clamp() {
        assert_eq!(clamp_i16(32_767), i16::MAX);
        assert_eq!(clamp_i16(32_768), i16::MAX);
        assert_eq!(clamp_i16(-32_768), i16::MIN);
        assert_eq!(clamp_i16(-32_769), i16::MIN);
        assert_eq!(clamp_i16(i32::MAX), i16::MAX);
        assert_eq!(clamp_i16(i32::MIN), i16::MIN);

        assert_eq!(clamp_i32(i64::from(i32::MAX) + 1), i32::MAX);
        assert_eq!(clamp_i32(i64::from(i32::MIN) - 1), i32::MIN);
        assert_eq!(clamp_i32(-5), -5);
        assert_eq!(clamp_i32(i64::MAX), i32::MAX);
        assert_eq!(clamp_i32(i64::MIN), i32::MIN);
    }
}

pub mod alloc {
    //! Utilities for fallible allocation.

    use crate::errors::{Error, Result};

    /// Allocates a boxed slice of `len` copies of `value`, returning `Error::OutOfMemory` instead
    /// of aborting if the allocation fails.
    pub fn try_boxed_slice<T: Clone>(len: usize, value: T) -> Result<Box<[T]>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len).map_err(|_| Error::OutOfMemory)?;
        buf.resize(len, value);
        Ok(buf.into_boxed_slice())
    }

    #[test]
    fn verify_try_boxed_slice() {
        let buf = try_boxed_slice(16, 3u8).unwrap();
        assert_eq!(buf.len(), 16);
        assert!(buf.iter().all(|&b| b == 3));
    }
}

pub mod fixed {
    //! Utilities for fixed-point arithmetic.
    //!
    //! A value in `Qn` format is an integer with `n` fractional bits. Products are always formed
    //! in 64-bit intermediates and saturated when narrowed.

    use super::clamp::clamp_i32;

    /// Multiply two Q31 values, returning a Q31 value.
    #[inline(always)]
    pub fn mul_q31(a: i32, b: i32) -> i32 {
        clamp_i32((i64::from(a) * i64::from(b)) >> 31)
    }

    /// Multiply two values and shift the product right by `shift` bits.
    #[inline(always)]
    pub fn mul_shift(a: i32, b: i32, shift: u32) -> i32 {
        clamp_i32((i64::from(a) * i64::from(b)) >> shift)
    }

    /// Multiply two values and shift the product right by `shift` bits, rounding to nearest.
    #[inline(always)]
    pub fn mul_shift_round(a: i32, b: i32, shift: u32) -> i32 {
        debug_assert!(shift > 0);
        clamp_i32((i64::from(a) * i64::from(b) + (1 << (shift - 1))) >> shift)
    }

    /// Multiply a value by a Q31 value and shift the result so that it gains 16 fractional bits.
    #[inline(always)]
    pub fn mult31_shift15(a: i32, b: i32) -> i32 {
        clamp_i32((i64::from(a) * i64::from(b)) >> 15)
    }

    /// Shift left with saturation.
    #[inline(always)]
    pub fn shl_sat(x: i32, shift: u32) -> i32 {
        clamp_i32(i64::from(x) << shift.min(32))
    }

    /// Arithmetic shift right with rounding to nearest.
    #[inline(always)]
    pub fn shr_round(x: i64, shift: u32) -> i64 {
        if shift == 0 {
            x
        }
        else {
            (x + (1 << (shift - 1))) >> shift
        }
    }

    /// Returns the number of redundant sign bits, i.e., the number of bits each value could be
    /// shifted left without overflowing. An all-zero slice returns 31.
    pub fn guard_bits(buf: &[i32]) -> u32 {
        let mask = buf.iter().fold(0u32, |acc, &x| acc | x.unsigned_abs());

        if mask == 0 {
            31
        }
        else {
            mask.leading_zeros().saturating_sub(1)
        }
    }

    /// Returns the maximum magnitude in the slice.
    pub fn max_abs(buf: &[i32]) -> u32 {
        buf.iter().fold(0u32, |acc, &x| acc.max(x.unsigned_abs()))
    }

    /// Convert a floating-point coefficient to a fixed-point value with `frac_bits` fractional
    /// bits. Intended for table generation only.
    #[inline]
    pub fn to_fixed(x: f64, frac_bits: u32) -> i32 {
        debug_assert!(frac_bits <= 32);

        let scaled = (x * (1u64 << frac_bits) as f64).round();

        if scaled >= f64::from(i32::MAX) {
            i32::MAX
        }
        else if scaled <= f64::from(i32::MIN) {
            i32::MIN
        }
        else {
            scaled as i32
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn verify_mul_q31() {
            let half = 1 << 30;
            assert_eq!(mul_q31(half, half), 1 << 29);
            assert_eq!(mul_q31(i32::MIN, i32::MIN), i32::MAX);
            assert_eq!(mul_q31(-half, half), -(1 << 29));
        }

        #[test]
        fn verify_mult31_shift15() {
            // Q8 * Q31 >> 15 = Q24.
            let one_q8 = 1 << 8;
            let one_q31 = i32::MAX;
            assert_eq!(mult31_shift15(one_q8, one_q31), (1 << 24) - 1);
            assert_eq!(mult31_shift15(i32::MAX, i32::MAX), i32::MAX);
        }

        #[test]
        fn verify_guard_bits() {
            assert_eq!(guard_bits(&[0, 0, 0]), 31);
            assert_eq!(guard_bits(&[1]), 30);
            assert_eq!(guard_bits(&[-1 << 24, 3]), 6);
            assert_eq!(guard_bits(&[i32::MAX]), 0);
        }

        #[test]
        fn verify_to_fixed() {
            assert_eq!(to_fixed(0.5, 31), 1 << 30);
            assert_eq!(to_fixed(1.0, 31), i32::MAX);
            assert_eq!(to_fixed(-1.0, 31), i32::MIN);
            assert_eq!(to_fixed(0.25, 30), 1 << 28);
        }
    }
}
