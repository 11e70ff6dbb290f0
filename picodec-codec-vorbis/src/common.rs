// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub use picodec_core::util::bits::ilog;
use picodec_core::util::fixed::{shl_sat, shr_round};

/// The maximum number of channels a stream may have.
pub const MAX_CHANNELS: usize = 2;

/// A set of channel indicies.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelSet(u32);

impl ChannelSet {
    #[inline(always)]
    pub fn insert(&mut self, ch: usize) {
        debug_assert!(ch < 32);
        self.0 |= 1 << ch;
    }

    #[inline(always)]
    pub fn contains(&self, ch: usize) -> bool {
        ch < 32 && self.0 & (1 << ch) != 0
    }

    #[inline(always)]
    pub fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> ChannelSetIter {
        ChannelSetIter { bits: self.0 }
    }
}

pub struct ChannelSetIter {
    bits: u32,
}

impl Iterator for ChannelSetIter {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        if self.bits == 0 {
            return None;
        }

        let ch = self.bits.trailing_zeros() as usize;

        // Clear the lowest set bit.
        self.bits &= self.bits - 1;

        Some(ch)
    }
}

/// Rescales the value `t * 2^exp` to a fixed-point value with `frac_bits` fractional bits,
/// saturating.
#[inline(always)]
pub fn rescale(t: i32, exp: i32, frac_bits: i32) -> i32 {
    let shift = exp + frac_bits;

    if shift >= 0 {
        shl_sat(t, shift as u32)
    }
    else {
        shr_round(i64::from(t), (-shift).min(62) as u32) as i32
    }
}

/// The number of significant bits kept in the mantissa of a [`Scaled`] value.
const MANTISSA_BITS: u32 = 31;

/// A block floating-point value, `m * 2^e`.
///
/// Used wherever the dynamic range of an intermediate result cannot be bounded in advance: codebook
/// value unpacking and the floor 0 curve. The mantissa is kept below 2^31 in magnitude so that the
/// product of two mantissas never overflows.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Scaled {
    pub m: i64,
    pub e: i32,
}

impl Scaled {
    pub const ZERO: Scaled = Scaled { m: 0, e: 0 };

    pub fn new(m: i64, e: i32) -> Self {
        Scaled::from_wide(i128::from(m), e)
    }

    fn from_wide(m: i128, e: i32) -> Self {
        if m == 0 {
            return Scaled::ZERO;
        }

        let bits = 128 - m.unsigned_abs().leading_zeros();

        if bits > MANTISSA_BITS {
            let shift = bits - MANTISSA_BITS;
            Scaled { m: (m >> shift) as i64, e: e + shift as i32 }
        }
        else {
            Scaled { m: m as i64, e }
        }
    }

    /// Unpacks the 32-bit packed floating-point representation used by codebooks and floor
    /// setups.
    pub fn float32_unpack(x: u32) -> Self {
        let mantissa = i64::from(x & 0x1fffff);
        let exponent = ((x & 0x7fe00000) >> 21) as i32;

        let m = if x & 0x80000000 == 0 { mantissa } else { -mantissa };

        Scaled::new(m, exponent - 788)
    }

    #[inline(always)]
    pub fn is_zero(&self) -> bool {
        self.m == 0
    }

    /// The exponent of the most significant bit of the value, plus one. Zero returns `i32::MIN`.
    pub fn magnitude(&self) -> i32 {
        if self.m == 0 {
            i32::MIN
        }
        else {
            self.e + (64 - self.m.unsigned_abs().leading_zeros()) as i32
        }
    }

    pub fn mul(self, rhs: Scaled) -> Scaled {
        if self.is_zero() || rhs.is_zero() {
            return Scaled::ZERO;
        }

        Scaled::new(self.m * rhs.m, self.e + rhs.e)
    }

    pub fn add(self, rhs: Scaled) -> Scaled {
        if self.is_zero() {
            return rhs;
        }
        if rhs.is_zero() {
            return self;
        }

        let (hi, lo) = if self.e >= rhs.e { (self, rhs) } else { (rhs, self) };

        let shift = (hi.e - lo.e) as u32;

        // The smaller operand is below the precision of the larger one.
        if shift > 64 {
            return hi;
        }

        Scaled::from_wide((i128::from(hi.m) << shift) + i128::from(lo.m), lo.e)
    }

    pub fn neg(self) -> Scaled {
        Scaled { m: -self.m, e: self.e }
    }

    /// Returns the quotient, or `None` if `rhs` is zero.
    pub fn div(self, rhs: Scaled) -> Option<Scaled> {
        if rhs.is_zero() {
            return None;
        }

        let q = (i128::from(self.m) << 62) / i128::from(rhs.m);

        Some(Scaled::from_wide(q, self.e - rhs.e - 62))
    }

    /// Returns the square root. Negative values return zero.
    pub fn sqrt(self) -> Scaled {
        if self.m <= 0 {
            return Scaled::ZERO;
        }

        let bits = 64 - self.m.leading_zeros();

        // Widen the mantissa to 61 or 62 bits such that the exponent is even.
        let mut shift = 62 - bits as i32;

        if (self.e - shift) & 1 != 0 {
            shift -= 1;
        }

        let m = (self.m as u64) << shift;

        Scaled::new(isqrt(m) as i64, (self.e - shift) / 2)
    }

    /// Converts to a fixed-point integer with `frac_bits` fractional bits, saturating.
    pub fn to_fixed(self, frac_bits: i32) -> i32 {
        if self.m == 0 {
            return 0;
        }

        let shift = self.e + frac_bits;

        let value = if shift >= 0 {
            // Anything shifted by more than 32 bits saturates anyway.
            i128::from(self.m) << shift.min(40)
        }
        else {
            i128::from(self.m) >> (-shift).min(63)
        };

        value.clamp(i128::from(i32::MIN), i128::from(i32::MAX)) as i32
    }
}

/// Integer square root, rounded down.
fn isqrt(n: u64) -> u64 {
    let mut rem = n;
    let mut root = 0u64;
    let mut bit = 1u64 << 62;

    while bit > n {
        bit >>= 2;
    }

    while bit != 0 {
        if rem >= root + bit {
            rem -= root + bit;
            root = (root >> 1) + bit;
        }
        else {
            root >>= 1;
        }
        bit >>= 2;
    }

    root
}
