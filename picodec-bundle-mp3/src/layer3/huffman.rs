// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::min;

use picodec_core::errors::{decode_error, end_of_bitstream_error, Result};

use log::info;

use super::huffman_tables::*;
use super::GranuleChannel;
use crate::common::SAMPLES_PER_GRANULE;

/// A bit reader specialised for Huffman decoding.
///
/// The reader keeps up-to 32 left-aligned bits cached and refills 16 bits at a time. Bits beyond
/// the end of the buffer read as 0 when peeked, but can never be consumed.
pub(super) struct HuffmanReader<'a> {
    buf: &'a [u8],
    /// The index of the next byte to load into the cache.
    pos: usize,
    /// Cached bits, left-aligned.
    cache: u32,
    /// The number of valid bits in the cache.
    n_cached: u32,
    /// The number of bits consumed since the start of `buf`.
    n_consumed: u64,
}

impl<'a> HuffmanReader<'a> {
    /// Instantiate a new reader positioned `bit_offset` bits into `buf`.
    pub fn new(buf: &'a [u8], bit_offset: usize) -> Result<Self> {
        if bit_offset > 8 * buf.len() {
            return end_of_bitstream_error();
        }

        let mut reader =
            HuffmanReader { buf, pos: bit_offset >> 3, cache: 0, n_cached: 0, n_consumed: 0 };

        reader.refill();

        let skip = (bit_offset & 0x7) as u32;

        reader.cache <<= skip;
        reader.n_cached -= skip;
        reader.n_consumed = bit_offset as u64;

        Ok(reader)
    }

    #[inline(always)]
    fn refill(&mut self) {
        while self.n_cached <= 16 {
            let hi = self.buf.get(self.pos).copied().unwrap_or(0);
            let lo = self.buf.get(self.pos + 1).copied().unwrap_or(0);

            let word = (u32::from(hi) << 8) | u32::from(lo);

            self.cache |= word << (16 - self.n_cached);
            self.n_cached += 16;
            self.pos += 2;
        }
    }

    /// Peek at the next `n` bits, `n` must be less-than or equal to 16.
    #[inline(always)]
    fn peek(&mut self, n: u32) -> u32 {
        debug_assert!(n <= 16);

        if n == 0 {
            return 0;
        }

        self.refill();
        self.cache >> (32 - n)
    }

    /// Consume `n` bits, `n` must be less-than or equal to 16.
    #[inline(always)]
    fn consume(&mut self, n: u32) -> Result<()> {
        debug_assert!(n <= 16);

        if self.n_consumed + u64::from(n) > self.len_bits() {
            return end_of_bitstream_error();
        }

        self.refill();

        self.cache = self.cache.checked_shl(n).unwrap_or(0);
        self.n_cached -= n;
        self.n_consumed += u64::from(n);

        Ok(())
    }

    /// Read `n` bits as an unsigned integer, `n` must be less-than or equal to 16.
    #[inline(always)]
    fn read_bits(&mut self, n: u32) -> Result<u32> {
        let bits = self.peek(n);
        self.consume(n)?;
        Ok(bits)
    }

    /// Apply the sign bit that follows a non-zero value.
    #[inline(always)]
    fn read_signed(&mut self, value: u32) -> Result<i32> {
        let value = value as i32;
        Ok(if self.read_bits(1)? != 0 { -value } else { value })
    }

    /// Gets the number of bits consumed since the start of the buffer.
    pub fn bits_consumed(&self) -> u64 {
        self.n_consumed
    }

    fn len_bits(&self) -> u64 {
        8 * self.buf.len() as u64
    }

    fn bits_left(&self) -> u64 {
        self.len_bits() - self.n_consumed
    }
}

/// Decode pairs of big_values samples into `out` using the big_values Huffman table `table`.
/// Returns the number of bits consumed.
pub(super) fn decode_pairs(
    reader: &mut HuffmanReader<'_>,
    table: usize,
    out: &mut [i32],
) -> Result<u32> {
    debug_assert!(out.len() % 2 == 0);

    let start = reader.bits_consumed();

    let codebook = match table {
        // Table 0 codes no bits: every sample is 0.
        0 => {
            out.fill(0);
            return Ok(0);
        }
        4 | 14 => return decode_error("mp3: invalid huffman table"),
        _ => &CODEBOOKS[usize::from(CODEBOOK_OFFSETS[table])..],
    };

    let linbits = LINBITS[table];

    for pair in out.chunks_exact_mut(2) {
        // Walk the multi-level lookup table. Each link consumes the bits used to reach it.
        let mut width = 5;
        let mut leaf = codebook[reader.peek(width) as usize];

        while leaf < 0 {
            reader.consume(width)?;
            width = (leaf & 7) as u32;

            let index = reader.peek(width) as usize + (-(leaf >> 3)) as usize;

            leaf = match codebook.get(index) {
                Some(&leaf) => leaf,
                None => return decode_error("mp3: invalid huffman code"),
            };
        }

        reader.consume((leaf >> 8) as u32)?;

        for (sample, value) in pair.iter_mut().zip([leaf & 0xf, (leaf >> 4) & 0xf]) {
            let mut value = value as u32;

            // A saturated value is extended by linbits escape bits.
            if value == 15 && linbits > 0 {
                value += reader.read_bits(linbits)?;
            }

            *sample = if value > 0 { reader.read_signed(value)? } else { 0 };
        }
    }

    Ok((reader.bits_consumed() - start) as u32)
}

/// Decode count1 quadruples into `out` using quads table A or B, stopping at the end of `out` or
/// once `limit` bits have been consumed by the channel. Returns the number of samples written,
/// which is always a multiple of 4.
///
/// The final quadruple may cross `limit`. The caller decides what to do with it.
pub(super) fn decode_quads(
    reader: &mut HuffmanReader<'_>,
    table_b: bool,
    limit: u64,
    out: &mut [i32],
) -> Result<usize> {
    let codebook: &[u8] = if table_b { &QUADS_B } else { &QUADS_A };

    let mut i = 0;

    for quad in out.chunks_exact_mut(4) {
        if reader.bits_consumed() >= limit {
            break;
        }

        let mut leaf = codebook[reader.peek(4) as usize];

        if leaf & 8 == 0 {
            let width = u32::from(leaf & 3);
            let offset = reader.peek(4 + width) & ((1 << width) - 1);
            let index = usize::from(leaf >> 3) + offset as usize;

            leaf = match codebook.get(index) {
                Some(&leaf) => leaf,
                None => return decode_error("mp3: invalid count1 code"),
            };
        }

        let code_len = u32::from(leaf & 7);

        // An encoder may overshoot the part3 length by a quadruple that ends beyond the main data
        // available. Such a quadruple is dropped.
        if u64::from(code_len) > reader.bits_left() {
            break;
        }

        reader.consume(code_len)?;

        for (j, sample) in quad.iter_mut().enumerate() {
            *sample = if (leaf >> (7 - j)) & 1 != 0 { reader.read_signed(1)? } else { 0 };
        }

        i += 4;
    }

    Ok(i)
}

/// Reads the Huffman coded spectral samples for a given channel in a granule into `buf`. The part3
/// data starts at the reader's current position and is `part3_bits` long. Returns the number of
/// decoded samples (the starting index of the rzero partition).
pub(super) fn read_huffman_samples(
    reader: &mut HuffmanReader<'_>,
    channel: &GranuleChannel,
    part3_bits: u32,
    buf: &mut [i32; SAMPLES_PER_GRANULE],
) -> Result<usize> {
    // If there are no Huffman code bits, zero all samples and return immediately.
    if part3_bits == 0 {
        buf.fill(0);
        return Ok(0);
    }

    let start = reader.bits_consumed();
    let end = start + u64::from(part3_bits);

    // There are two samples per big_value, therefore multiply big_values by 2 to get number of
    // samples in the big_value partition.
    let big_values_len = 2 * usize::from(channel.big_values);

    // There are up-to 3 regions in the big_value partition. Clamp each region end to the end of
    // the big_values partition.
    let regions: [usize; 3] = [
        min(channel.region1_start, big_values_len),
        min(channel.region2_start, big_values_len),
        min(SAMPLES_PER_GRANULE, big_values_len),
    ];

    let mut i = 0;

    for (&region_end, &table) in regions.iter().zip(&channel.table_select) {
        if region_end > i {
            decode_pairs(reader, usize::from(table), &mut buf[i..region_end])?;
            i = region_end;
        }
    }

    if reader.bits_consumed() > end {
        return decode_error("mp3: big_values overrun");
    }

    // Read the count1 partition. At most 576 samples fit, so the last quadruple starts at 572.
    i += decode_quads(reader, channel.count1table_select != 0, end, &mut buf[i..])?;

    // Some encoders are poor at "stuffing" bits. This results in the final quadruple of count1
    // decoding a few bits past part3_len. Those bits are not a real sample, so erase it.
    if reader.bits_consumed() > end {
        info!("mp3: count1 overrun, malformed bitstream");
        i -= 4;
    }

    buf[i..].fill(0);

    Ok(i)
}
