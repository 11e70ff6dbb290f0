// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::errors::{end_of_bitstream_error, Result};

/// Refill the cache whenever it holds no more than this many bits, so that it can always accept
/// another whole byte.
const REFILL_LEVEL: u32 = u64::BITS - 8;

mod private {
    use crate::errors::Result;

    /// The primitive every bit reader provides.
    pub trait TakeBitsLtr {
        /// Consumes `width` bits, where `0 < width <= 32`, first bit read in the most-significant
        /// position.
        fn take_bits(&mut self, width: u32) -> Result<u32>;
    }

    pub trait TakeBitsRtl {
        /// Consumes `width` bits, where `0 < width <= 32`, first bit read in the least-significant
        /// position.
        fn take_bits(&mut self, width: u32) -> Result<u32>;
    }
}

/// A bit stream with a known length.
pub trait FiniteBitStream {
    /// Gets the number of bits left unread.
    fn bits_left(&self) -> u64;
}

/// `ReadBitsLtr` reads bits from most-significant to least-significant.
pub trait ReadBitsLtr: private::TakeBitsLtr {
    /// Skips `num_bits` bits.
    fn ignore_bits(&mut self, mut num_bits: u32) -> Result<()> {
        while num_bits > 0 {
            let width = num_bits.min(u32::BITS);
            self.take_bits(width)?;
            num_bits -= width;
        }
        Ok(())
    }

    #[inline(always)]
    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.take_bits(1)? == 1)
    }

    #[inline(always)]
    fn read_bit(&mut self) -> Result<u32> {
        self.take_bits(1)
    }

    /// Reads an unsigned integer up-to 32 bits wide.
    #[inline(always)]
    fn read_bits_leq32(&mut self, bit_width: u32) -> Result<u32> {
        debug_assert!(bit_width <= u32::BITS);

        match bit_width {
            0 => Ok(0),
            _ => self.take_bits(bit_width),
        }
    }
}

/// `ReadBitsRtl` reads bits from least-significant to most-significant.
pub trait ReadBitsRtl: private::TakeBitsRtl {
    /// Skips `num_bits` bits.
    fn ignore_bits(&mut self, mut num_bits: u32) -> Result<()> {
        while num_bits > 0 {
            let width = num_bits.min(u32::BITS);
            self.take_bits(width)?;
            num_bits -= width;
        }
        Ok(())
    }

    #[inline(always)]
    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.take_bits(1)? == 1)
    }

    #[inline(always)]
    fn read_bit(&mut self) -> Result<u32> {
        self.take_bits(1)
    }

    /// Reads an unsigned integer up-to 32 bits wide.
    #[inline(always)]
    fn read_bits_leq32(&mut self, bit_width: u32) -> Result<u32> {
        debug_assert!(bit_width <= u32::BITS);

        match bit_width {
            0 => Ok(0),
            _ => self.take_bits(bit_width),
        }
    }

    /// Reads an unsigned integer up-to 64 bits wide.
    fn read_bits_leq64(&mut self, bit_width: u32) -> Result<u64> {
        debug_assert!(bit_width <= u64::BITS);

        let lo_width = bit_width.min(u32::BITS);

        let lo = u64::from(self.read_bits_leq32(lo_width)?);
        let hi = u64::from(self.read_bits_leq32(bit_width - lo_width)?);

        Ok(lo | (hi << lo_width))
    }
}

/// `BitReaderLtr` reads a `&[u8]` most-significant bit first.
///
/// Reading N bits yields the first bit read as bit N-1 of the result.
#[derive(Clone)]
pub struct BitReaderLtr<'a> {
    buf: &'a [u8],
    /// Unread bits, left-aligned.
    cache: u64,
    n_cached: u32,
}

impl<'a> BitReaderLtr<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        BitReaderLtr { buf, cache: 0, n_cached: 0 }
    }

    fn refill(&mut self) {
        while self.n_cached <= REFILL_LEVEL {
            match self.buf.split_first() {
                Some((&byte, rest)) => {
                    self.cache |= u64::from(byte) << (REFILL_LEVEL - self.n_cached);
                    self.n_cached += 8;
                    self.buf = rest;
                }
                None => break,
            }
        }
    }
}

impl private::TakeBitsLtr for BitReaderLtr<'_> {
    #[inline(always)]
    fn take_bits(&mut self, width: u32) -> Result<u32> {
        if width > self.n_cached {
            self.refill();

            if width > self.n_cached {
                return end_of_bitstream_error();
            }
        }

        let bits = self.cache >> (u64::BITS - width);

        self.cache <<= width;
        self.n_cached -= width;

        Ok(bits as u32)
    }
}

impl ReadBitsLtr for BitReaderLtr<'_> {}

impl FiniteBitStream for BitReaderLtr<'_> {
    fn bits_left(&self) -> u64 {
        8 * self.buf.len() as u64 + u64::from(self.n_cached)
    }
}

/// `BitReaderRtl` reads a `&[u8]` least-significant bit first.
///
/// Reading N bits yields the first bit read as bit 0 of the result.
#[derive(Clone)]
pub struct BitReaderRtl<'a> {
    buf: &'a [u8],
    /// Unread bits, right-aligned.
    cache: u64,
    n_cached: u32,
}

impl<'a> BitReaderRtl<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        BitReaderRtl { buf, cache: 0, n_cached: 0 }
    }

    fn refill(&mut self) {
        while self.n_cached <= REFILL_LEVEL {
            match self.buf.split_first() {
                Some((&byte, rest)) => {
                    self.cache |= u64::from(byte) << self.n_cached;
                    self.n_cached += 8;
                    self.buf = rest;
                }
                None => break,
            }
        }
    }

    /// Returns the next `bit_width` bits, up-to 32, without consuming them. Bits past the end of
    /// the buffer read as zeros.
    pub fn peek_bits_leq32(&self, bit_width: u32) -> u32 {
        debug_assert!(bit_width <= u32::BITS);

        let mut bits = self.cache;
        let mut n_bits = self.n_cached;

        for &byte in self.buf.iter() {
            if n_bits >= bit_width {
                break;
            }
            bits |= u64::from(byte) << n_bits;
            n_bits += 8;
        }

        (bits & low_mask(bit_width)) as u32
    }
}

/// A mask of the `width` least-significant bits, for `width < 64`.
#[inline(always)]
fn low_mask(width: u32) -> u64 {
    (1u64 << width) - 1
}

impl private::TakeBitsRtl for BitReaderRtl<'_> {
    #[inline(always)]
    fn take_bits(&mut self, width: u32) -> Result<u32> {
        if width > self.n_cached {
            self.refill();

            if width > self.n_cached {
                return end_of_bitstream_error();
            }
        }

        let bits = self.cache & low_mask(width);

        self.cache >>= width;
        self.n_cached -= width;

        Ok(bits as u32)
    }
}

impl ReadBitsRtl for BitReaderRtl<'_> {}

impl FiniteBitStream for BitReaderRtl<'_> {
    fn bits_left(&self) -> u64 {
        8 * self.buf.len() as u64 + u64::from(self.n_cached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;

    #[test]
    fn verify_bitreaderltr_read_bits_leq32() {
        let mut bs = BitReaderLtr::new(&[0b1010_0101, 0b0111_1110, 0b1101_0011]);

        assert_eq!(bs.read_bits_leq32(4).unwrap(), 0b1010);
        assert_eq!(bs.read_bits_leq32(4).unwrap(), 0b0101);
        assert_eq!(bs.read_bits_leq32(13).unwrap(), 0b0_1111_1101_1010);
        assert_eq!(bs.read_bits_leq32(3).unwrap(), 0b011);

        let mut bs = BitReaderLtr::new(&[0xff, 0xff, 0xff, 0xff, 0x01]);

        assert_eq!(bs.read_bits_leq32(0).unwrap(), 0);
        assert_eq!(bs.read_bits_leq32(32).unwrap(), u32::MAX);
        assert_eq!(bs.read_bits_leq32(8).unwrap(), 0x01);

        let mut bs = BitReaderLtr::new(&[0xff, 0xff, 0xff, 0xff, 0x01]);

        assert_eq!(bs.read_bits_leq32(8).unwrap(), 0xff);
        assert_eq!(bs.read_bits_leq32(32).unwrap(), 0xffffff01);
    }

    #[test]
    fn verify_bitreaderltr_bounds() {
        let mut bs = BitReaderLtr::new(&[0xa5, 0x7e]);

        assert_eq!(bs.bits_left(), 16);
        assert_eq!(bs.read_bits_leq32(12).unwrap(), 0xa57);
        assert_eq!(bs.bits_left(), 4);

        // A failed read consumes nothing.
        assert_eq!(bs.read_bits_leq32(8), Err(Error::EndOfBitstream));
        assert_eq!(bs.read_bits_leq32(4).unwrap(), 0xe);
        assert_eq!(bs.bits_left(), 0);
    }

    #[test]
    fn verify_bitreaderltr_ignore_bits() {
        let buf: Vec<u8> = (0..12).collect();
        let mut bs = BitReaderLtr::new(&buf);

        bs.ignore_bits(72).unwrap();
        assert_eq!(bs.read_bits_leq32(8).unwrap(), 9);
        assert!(bs.ignore_bits(17).is_err());
    }

    #[test]
    fn verify_bitreaderrtl_read_bits_leq32() {
        let mut bs = BitReaderRtl::new(&[0b1010_0101, 0b0111_1110, 0b1101_0011]);

        assert_eq!(bs.read_bits_leq32(4).unwrap(), 0b0101);
        assert_eq!(bs.read_bits_leq32(4).unwrap(), 0b1010);
        assert_eq!(bs.read_bits_leq32(13).unwrap(), 0b1_0011_0111_1110);
        assert_eq!(bs.read_bits_leq32(3).unwrap(), 0b110);

        let mut bs = BitReaderRtl::new(&[0xff, 0xff, 0xff, 0xff, 0x01]);

        assert_eq!(bs.read_bits_leq32(32).unwrap(), u32::MAX);
        assert_eq!(bs.read_bits_leq32(8).unwrap(), 0x01);
    }

    #[test]
    fn verify_bitreaderrtl_peek_bits() {
        let bs = BitReaderRtl::new(&[0b1010_0101, 0b0000_0011]);

        assert_eq!(bs.peek_bits_leq32(3), 0b101);
        assert_eq!(bs.peek_bits_leq32(10), 0b11_1010_0101);

        // Bits beyond the end of the buffer are zeros.
        assert_eq!(bs.peek_bits_leq32(20), 0b11_1010_0101);

        let mut bs = bs;
        bs.ignore_bits(6).unwrap();
        assert_eq!(bs.peek_bits_leq32(4), 0b1110);
        assert_eq!(bs.bits_left(), 10);
    }

    #[test]
    fn verify_bitreaderrtl_read_bits_leq64() {
        let mut bs = BitReaderRtl::new(&[
            0x99, 0xaa, 0x55, 0xff, 0xff, 0x55, 0xaa, 0x99, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66,
            0x77, 0x88,
        ]);

        assert_eq!(bs.read_bits_leq64(40).unwrap(), 0xff_ff55_aa99);
        assert_eq!(bs.read_bits_leq64(4).unwrap(), 0x05);
        assert_eq!(bs.read_bits_leq64(4).unwrap(), 0x05);
        assert_eq!(bs.read_bits_leq64(16).unwrap(), 0x99aa);
        assert_eq!(bs.read_bits_leq64(64).unwrap(), 0x8877665544332211);
        assert!(bs.read_bits_leq64(1).is_err());
    }
}
