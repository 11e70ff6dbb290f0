// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Floor curves. Both floor types synthesize a Q31 curve with one value per spectral coefficient.

use std::f64::consts::PI;

use hashbrown::HashSet;
use once_cell::sync::Lazy;

use picodec_core::errors::{decode_error, Error, Result};
use picodec_core::io::{BitReaderRtl, ReadBitsRtl};
use picodec_core::util::fixed::to_fixed;

use super::codebook::VorbisCodebook;
use super::common::*;

/// As defined in section 10.1 of the Vorbis I specification, in Q31.
#[rustfmt::skip]
const FLOOR1_INVERSE_DB_TABLE: [i32; 256] = [
    0x000000e5, 0x000000f4, 0x00000103, 0x00000114, 0x00000126, 0x00000139,
    0x0000014e, 0x00000163, 0x0000017a, 0x00000193, 0x000001ad, 0x000001c9,
    0x000001e7, 0x00000206, 0x00000228, 0x0000024c, 0x00000272, 0x0000029b,
    0x000002c6, 0x000002f4, 0x00000326, 0x0000035a, 0x00000392, 0x000003cd,
    0x0000040c, 0x00000450, 0x00000497, 0x000004e4, 0x00000535, 0x0000058c,
    0x000005e8, 0x0000064a, 0x000006b3, 0x00000722, 0x00000799, 0x00000818,
    0x0000089e, 0x0000092e, 0x000009c6, 0x00000a69, 0x00000b16, 0x00000bcf,
    0x00000c93, 0x00000d64, 0x00000e43, 0x00000f30, 0x0000102d, 0x0000113a,
    0x00001258, 0x0000138a, 0x000014cf, 0x00001629, 0x0000179a, 0x00001922,
    0x00001ac4, 0x00001c82, 0x00001e5c, 0x00002055, 0x0000226f, 0x000024ac,
    0x0000270e, 0x00002997, 0x00002c4b, 0x00002f2c, 0x0000323d, 0x00003581,
    0x000038fb, 0x00003caf, 0x000040a0, 0x000044d3, 0x0000494c, 0x00004e10,
    0x00005323, 0x0000588a, 0x00005e4b, 0x0000646b, 0x00006af2, 0x000071e5,
    0x0000794c, 0x0000812e, 0x00008993, 0x00009283, 0x00009c09, 0x0000a62d,
    0x0000b0f9, 0x0000bc79, 0x0000c8b9, 0x0000d5c4, 0x0000e3a9, 0x0000f274,
    0x00010235, 0x000112fd, 0x000124dc, 0x000137e4, 0x00014c29, 0x000161bf,
    0x000178bc, 0x00019137, 0x0001ab4a, 0x0001c70e, 0x0001e4a1, 0x0002041f,
    0x000225aa, 0x00024962, 0x00026f6d, 0x000297f0, 0x0002c316, 0x0002f109,
    0x000321f9, 0x00035616, 0x00038d97, 0x0003c8b4, 0x000407a7, 0x00044ab2,
    0x00049218, 0x0004de23, 0x00052f1e, 0x0005855c, 0x0005e135, 0x00064306,
    0x0006ab33, 0x00071a24, 0x0007904b, 0x00080e20, 0x00089422, 0x000922da,
    0x0009bad8, 0x000a5cb6, 0x000b091a, 0x000bc0b1, 0x000c8436, 0x000d5471,
    0x000e3233, 0x000f1e5f, 0x001019e4, 0x001125c1, 0x00124306, 0x001372d5,
    0x0014b663, 0x00160ef7, 0x00177df0, 0x001904c1, 0x001aa4f9, 0x001c603d,
    0x001e384f, 0x00202f0f, 0x0022467a, 0x002480b1, 0x0026dff7, 0x002966b3,
    0x002c1776, 0x002ef4fc, 0x0032022d, 0x00354222, 0x0038b828, 0x003c67c2,
    0x004054ae, 0x004482e8, 0x0048f6af, 0x004db488, 0x0052c142, 0x005821ff,
    0x005ddc33, 0x0063f5b0, 0x006a74a7, 0x00715faf, 0x0078bdce, 0x0080967f,
    0x0088f1ba, 0x0091d7f9, 0x009b5247, 0x00a56a41, 0x00b02a27, 0x00bb9ce2,
    0x00c7ce12, 0x00d4ca17, 0x00e29e20, 0x00f15835, 0x0101074b, 0x0111bb4e,
    0x01238531, 0x01367704, 0x014aa402, 0x016020a7, 0x017702c3, 0x018f6190,
    0x01a955cb, 0x01c4f9cf, 0x01e269a8, 0x0201c33b, 0x0223265a, 0x0246b4ea,
    0x026c9302, 0x0294e716, 0x02bfda13, 0x02ed9793, 0x031e4e09, 0x03522ee4,
    0x03896ed0, 0x03c445e2, 0x0402efd6, 0x0445ac4b, 0x048cbefc, 0x04d87013,
    0x05290c67, 0x057ee5ca, 0x05da5364, 0x063bb204, 0x06a36485, 0x0711d42b,
    0x0787710e, 0x0804b299, 0x088a17ef, 0x0918287e, 0x09af747c, 0x0a50957e,
    0x0afc2f19, 0x0bb2ef7f, 0x0c759034, 0x0d44d6ca, 0x0e2195bc, 0x0f0cad0d,
    0x10070b62, 0x1111aeea, 0x122da66c, 0x135c120f, 0x149e24d9, 0x15f525b1,
    0x176270e3, 0x18e7794b, 0x1a85c9ae, 0x1c3f06d1, 0x1e14f07d, 0x200963d7,
    0x221e5ccd, 0x2455f870, 0x26b2770b, 0x29363e2b, 0x2be3db5c, 0x2ebe06b6,
    0x31c7a55b, 0x3503ccd4, 0x3875c5aa, 0x3c210f44, 0x4009632b, 0x4432b8cf,
    0x48a149bc, 0x4d59959e, 0x52606733, 0x57bad899, 0x5d6e593a, 0x6380b298,
    0x69f80e9a, 0x70dafda8, 0x78307d76, 0x7fffffff,
];

macro_rules! try_or_unused {
    ($expr:expr) => {
        match $expr {
            Ok(val) => val,
            // Running out of bits while reading a floor is not an error. The floor is left
            // unused.
            Err(Error::EndOfBitstream) => return Ok(()),
            Err(e) => return Err(e),
        }
    };
}

pub trait Floor: Send {
    /// Reads the floor of one channel from an audio packet.
    fn read_channel(
        &mut self,
        bs: &mut BitReaderRtl<'_>,
        codebooks: &[VorbisCodebook],
    ) -> Result<()>;

    fn is_unused(&self) -> bool;

    /// Synthesizes the curve of the last channel read into `floor`, one value per spectral
    /// coefficient of a block of size `2^bs_exp`.
    fn synthesis(&mut self, bs_exp: u8, floor: &mut [i32]) -> Result<()>;
}

/// cos(x) for x in [0, pi], in Q30.
static COS_TABLE: Lazy<[i32; 1025]> = Lazy::new(|| {
    let mut table = [0; 1025];
    for (i, c) in table.iter_mut().enumerate() {
        *c = to_fixed((PI * i as f64 / 1024.0).cos(), 30);
    }
    table
});

/// 2^(i/256) for i in [0, 256], in Q30.
static EXP2_TABLE: Lazy<[u32; 257]> = Lazy::new(|| {
    let mut table = [0; 257];
    for (i, e) in table.iter_mut().enumerate() {
        *e = (2f64.powf(i as f64 / 256.0) * f64::from(1u32 << 30)).round() as u32;
    }
    table
});

/// Pi in Q24.
const PI_Q24: i64 = 52707179;
const TWO_PI_Q24: i64 = 105414357;

/// log2(10) / 20 in Q16. Converts decibels to a power of 2.
const LOG2_10_BY_20_Q16: i64 = 10885;

/// Returns the cosine, in Q30, of an angle in Q24 radians.
fn cos_q24(x: i32) -> i32 {
    let mut x = i64::from(x).rem_euclid(TWO_PI_Q24);

    if x > PI_Q24 {
        x = TWO_PI_Q24 - x;
    }

    // The position in the table, with 16 fractional bits.
    let pos = (x << 26) / PI_Q24;

    let idx = (pos >> 16) as usize;

    if idx >= 1024 {
        return COS_TABLE[1024];
    }

    let a = i64::from(COS_TABLE[idx]);
    let b = i64::from(COS_TABLE[idx + 1]);

    (a + (((b - a) * (pos & 0xffff)) >> 16)) as i32
}

/// Returns 2^y, in Q31, for a negative `y` in Q16.
fn exp2_q31(y: i64) -> i32 {
    debug_assert!(y < 0);

    let ip = y >> 16;
    let frac = (y & 0xffff) as usize;

    let a = i64::from(EXP2_TABLE[frac >> 8]);
    let b = i64::from(EXP2_TABLE[(frac >> 8) + 1]);

    // 2^frac in Q30, within [1, 2).
    let m = a + (((b - a) * (frac & 0xff) as i64) >> 8);

    let shift = -ip - 1;

    if shift >= 63 {
        0
    }
    else {
        (m >> shift) as i32
    }
}

/// A Bark-scale map for one block size, and the cosine of the angle of each map value.
struct BarkMap {
    bs_exp: u8,
    map: Box<[i32]>,
    cos: Box<[i32]>,
}

impl BarkMap {
    fn new(bs_exp: u8, rate: u16, bark_map_size: u16) -> BarkMap {
        let map = bark_map(1 << (bs_exp - 1), rate, bark_map_size);

        let omega_step = PI / f64::from(bark_map_size);

        let cos = map.iter().map(|&m| to_fixed((omega_step * f64::from(m)).cos(), 30)).collect();

        BarkMap { bs_exp, map: map.into_boxed_slice(), cos }
    }
}

struct Floor0Setup {
    order: u8,
    amplitude_bits: u8,
    amplitude_offset: u8,
    number_of_books: u8,
    book_list: [u8; 16],
    map_short: BarkMap,
    map_long: BarkMap,
}

pub struct Floor0 {
    setup: Floor0Setup,
    is_unused: bool,
    amplitude: u64,
    /// The LSP coefficients in Q24 radians while reading, then 2cos of each in Q29.
    coeffs: [i32; 256],
}

impl Floor0 {
    pub fn try_read(
        bs: &mut BitReaderRtl<'_>,
        bs0_exp: u8,
        bs1_exp: u8,
        codebooks: &[VorbisCodebook],
    ) -> Result<Box<dyn Floor>> {
        let setup = Self::read_setup(bs, bs0_exp, bs1_exp, codebooks)?;

        Ok(Box::new(Floor0 { setup, is_unused: true, amplitude: 0, coeffs: [0; 256] }))
    }

    fn read_setup(
        bs: &mut BitReaderRtl<'_>,
        bs0_exp: u8,
        bs1_exp: u8,
        codebooks: &[VorbisCodebook],
    ) -> Result<Floor0Setup> {
        let order = bs.read_bits_leq32(8)? as u8;
        let rate = bs.read_bits_leq32(16)? as u16;
        let bark_map_size = bs.read_bits_leq32(16)? as u16;
        let amplitude_bits = bs.read_bits_leq32(6)? as u8;
        let amplitude_offset = bs.read_bits_leq32(8)? as u8;
        let number_of_books = bs.read_bits_leq32(4)? as u8 + 1;

        if order == 0 || rate == 0 || bark_map_size == 0 {
            return decode_error("vorbis: floor0, invalid setup");
        }

        let mut book_list = [0; 16];

        for book in &mut book_list[..usize::from(number_of_books)] {
            *book = bs.read_bits_leq32(8)? as u8;

            // The coefficients are read as VQ vectors.
            match codebooks.get(usize::from(*book)) {
                Some(codebook) if codebook.has_vq() => (),
                _ => return decode_error("vorbis: floor0, invalid codebook number"),
            }
        }

        Ok(Floor0Setup {
            order,
            amplitude_bits,
            amplitude_offset,
            number_of_books,
            book_list,
            map_short: BarkMap::new(bs0_exp, rate, bark_map_size),
            map_long: BarkMap::new(bs1_exp, rate, bark_map_size),
        })
    }

    /// Computes the linear floor value, in Q31, at an angle with the given cosine in Q30.
    fn curve_value(&self, cos_omega: i32) -> Result<i32> {
        let order = usize::from(self.setup.order);

        // 2cos(omega) in Q29 has the same representation as cos(omega) in Q30.
        let factor = |c: i32| Scaled::new(i64::from(c) - i64::from(cos_omega), -29);

        let one = Scaled::new(1, 0);
        let half = Scaled::new(1, -1);

        let mut p = one;
        let mut q = one;

        // Coefficients with odd indicies contribute to p, and those with even indicies to q.
        let mut iter = self.coeffs[..order].chunks_exact(2);

        for c in &mut iter {
            p = p.mul(factor(c[1]));
            q = q.mul(factor(c[0]));
        }

        let cos = Scaled::new(i64::from(cos_omega), -30);

        let (p, q) = if let [last] = iter.remainder() {
            q = q.mul(factor(*last));

            (p.mul(p).mul(one.add(cos.mul(cos).neg())), q.mul(q).mul(Scaled::new(1, -2)))
        }
        else {
            (p.mul(p).mul(one.add(cos.neg())).mul(half), q.mul(q).mul(one.add(cos)).mul(half))
        };

        let sum = p.add(q);

        if sum.is_zero() {
            return decode_error("vorbis: invalid floor0 coefficients");
        }

        Ok(linear_floor0_value(
            sum,
            self.amplitude,
            self.setup.amplitude_bits,
            self.setup.amplitude_offset,
        ))
    }
}

impl Floor for Floor0 {
    fn read_channel(
        &mut self,
        bs: &mut BitReaderRtl<'_>,
        codebooks: &[VorbisCodebook],
    ) -> Result<()> {
        // Assume the floor is unused until it is decoded successfully.
        self.is_unused = true;

        let amplitude = try_or_unused!(bs.read_bits_leq64(u32::from(self.setup.amplitude_bits)));

        if amplitude == 0 {
            return Ok(());
        }

        let book_bits = ilog(u32::from(self.setup.number_of_books));
        let book_idx = try_or_unused!(bs.read_bits_leq32(book_bits)) as usize;

        if book_idx >= usize::from(self.setup.number_of_books) {
            return decode_error("vorbis: floor0, invalid book number");
        }

        let codebook = &codebooks[usize::from(self.setup.book_list[book_idx])];
        let exp = codebook.vq_exp();

        let order = usize::from(self.setup.order);

        let mut i = 0;
        let mut last = 0i32;

        while i < order {
            let vq = try_or_unused!(codebook.read_vq(bs));

            // A VQ vector may hold more values than there are remaining coefficients.
            let i0 = i;
            i += vq.len().min(order - i0);

            for (c, &t) in self.coeffs[i0..i].iter_mut().zip(vq) {
                *c = last.saturating_add(rescale(t, exp, 24));
            }

            last = self.coeffs[i - 1];
        }

        for c in self.coeffs[..order].iter_mut() {
            *c = cos_q24(*c);
        }

        self.amplitude = amplitude;
        self.is_unused = false;

        Ok(())
    }

    fn is_unused(&self) -> bool {
        self.is_unused
    }

    fn synthesis(&mut self, bs_exp: u8, floor: &mut [i32]) -> Result<()> {
        debug_assert!(!self.is_unused);

        let map = if bs_exp == self.setup.map_short.bs_exp {
            &self.setup.map_short
        }
        else {
            &self.setup.map_long
        };

        let n = floor.len().min(map.map.len());

        let mut i = 0;

        while i < n {
            let iter_cond = map.map[i];

            let value = self.curve_value(map.cos[i])?;

            // Fill in the floor values where the map value is the same.
            while i < n && map.map[i] == iter_cond {
                floor[i] = value;
                i += 1;
            }
        }

        Ok(())
    }
}

/// Vorbis I specification, section 6.2.3.
#[inline(always)]
fn bark(x: f64) -> f64 {
    (13.1 * (0.00074 * x).atan()) + (2.24 * (0.0000000185 * x * x).atan()) + (0.0001 * x)
}

fn bark_map(n: u32, rate: u16, bark_map_size: u16) -> Vec<i32> {
    let max = i32::from(bark_map_size) - 1;
    let rate = f64::from(rate);
    let rate_by_2n = rate / (2.0 * f64::from(n));

    let c = f64::from(bark_map_size) / bark(0.5 * rate);

    (0..n).map(|i| ((bark(rate_by_2n * f64::from(i)) * c).floor() as i32).min(max)).collect()
}

/// Computes `exp(0.11512925 * (amplitude * offset / (sqrt(p + q) * (2^bits - 1)) - offset))`, the
/// linear floor value as per Vorbis I specification, section 6.2.3, in Q31. Values of 1.0 and
/// above saturate.
fn linear_floor0_value(
    p_plus_q: Scaled,
    amplitude: u64,
    amplitude_bits: u8,
    amplitude_offset: u8,
) -> i32 {
    // The amplitude is up-to 63 bits.
    let amplitude = Scaled::new((amplitude >> 32) as i64, 32)
        .add(Scaled::new((amplitude & 0xffff_ffff) as i64, 0));

    let a = amplitude.mul(Scaled::new(i64::from(amplitude_offset), 0));
    let b = p_plus_q.sqrt().mul(Scaled::new(((1u64 << amplitude_bits) - 1) as i64, 0));

    let ratio = match a.div(b) {
        Some(ratio) => ratio,
        None => return i32::MAX,
    };

    // The value in decibels, in Q16.
    let db = i64::from(ratio.to_fixed(16)) - (i64::from(amplitude_offset) << 16);

    if db >= 0 {
        return i32::MAX;
    }

    exp2_q31((db * LOG2_10_BY_20_Q16) >> 16)
}

#[derive(Default)]
struct Floor1Class {
    /// Main codebook index.
    mainbook: u8,
    dimensions: u8,
    /// Number of sub-classes expressed as a power-of-2 exponent.
    subclass_bits: u8,
    /// Codebook index for each sub-class.
    subbooks: [u8; 8],
    /// Bitset marking if a sub-class codebook is used or not.
    is_subbook_used: u8,
}

struct Floor1Setup {
    /// Number of partitions, range limited to 0..32.
    partitions: usize,
    /// Class index, range limited to 0..16, of each partition.
    partition_class_list: [u8; 32],
    classes: [Floor1Class; 16],
    /// Floor multiplier, range limited to 1..5.
    multiplier: u8,
    x_list: Vec<u32>,
    /// Indicies of the x-list in ascending order of x.
    x_list_sort_order: Vec<u8>,
    /// Indicies of the low and high neighbours of each x-list entry.
    x_list_neighbors: Vec<(usize, usize)>,
}

pub struct Floor1 {
    setup: Floor1Setup,
    is_unused: bool,
    floor_y: Vec<i32>,
    floor_final_y: Vec<i32>,
    floor_step2_flag: Vec<bool>,
}

impl Floor1 {
    pub fn try_read(bs: &mut BitReaderRtl<'_>, num_codebooks: usize) -> Result<Box<dyn Floor>> {
        let setup = Self::read_setup(bs, num_codebooks)?;

        let x_list_len = setup.x_list.len();

        Ok(Box::new(Floor1 {
            setup,
            is_unused: true,
            floor_y: vec![0; x_list_len],
            floor_final_y: vec![0; x_list_len],
            floor_step2_flag: vec![false; x_list_len],
        }))
    }

    fn read_setup(bs: &mut BitReaderRtl<'_>, num_codebooks: usize) -> Result<Floor1Setup> {
        let partitions = bs.read_bits_leq32(5)? as usize;

        let mut partition_class_list = [0; 32];
        let mut classes: [Floor1Class; 16] = Default::default();

        if partitions > 0 {
            let mut max_class = 0;

            for class_idx in &mut partition_class_list[..partitions] {
                *class_idx = bs.read_bits_leq32(4)? as u8;
                max_class = max_class.max(*class_idx);
            }

            for class in classes[..usize::from(max_class) + 1].iter_mut() {
                class.dimensions = bs.read_bits_leq32(3)? as u8 + 1;
                class.subclass_bits = bs.read_bits_leq32(2)? as u8;

                if class.subclass_bits != 0 {
                    class.mainbook = bs.read_bits_leq32(8)? as u8;

                    if usize::from(class.mainbook) >= num_codebooks {
                        return decode_error("vorbis: floor1, invalid codebook for class");
                    }
                }

                let num_subclasses = 1 << class.subclass_bits;

                for (i, book) in class.subbooks[..num_subclasses].iter_mut().enumerate() {
                    // The codebook number plus one, or 0 if the sub-class has no codebook.
                    let number = bs.read_bits_leq32(8)? as u8;

                    if number > 0 {
                        *book = number - 1;

                        if usize::from(*book) >= num_codebooks {
                            return decode_error("vorbis: floor1, invalid codebook for subclass");
                        }

                        class.is_subbook_used |= 1 << i;
                    }
                }
            }
        }

        let multiplier = bs.read_bits_leq32(2)? as u8 + 1;

        let rangebits = bs.read_bits_leq32(4)?;

        let mut x_list = vec![0, 1 << rangebits];
        let mut x_list_unique = HashSet::new();

        x_list_unique.insert(0);
        x_list_unique.insert(1 << rangebits);

        for &class_idx in &partition_class_list[..partitions] {
            let class = &classes[usize::from(class_idx)];

            // No more than 65 elements are allowed.
            if x_list.len() + usize::from(class.dimensions) > 65 {
                return decode_error("vorbis: floor1, x_list too long");
            }

            for _ in 0..class.dimensions {
                let x = bs.read_bits_leq32(rangebits)?;

                if !x_list_unique.insert(x) {
                    return decode_error("vorbis: floor1, x_list is not unique");
                }

                x_list.push(x);
            }
        }

        let x_list_neighbors = (0..x_list.len()).map(|i| find_neighbors(&x_list, i)).collect();

        let mut x_list_sort_order: Vec<u8> = (0..x_list.len() as u8).collect();
        x_list_sort_order.sort_by_key(|&i| x_list[usize::from(i)]);

        Ok(Floor1Setup {
            partitions,
            partition_class_list,
            classes,
            multiplier,
            x_list,
            x_list_sort_order,
            x_list_neighbors,
        })
    }

    /// Section 7.2.4, step 1: amplitude value synthesis.
    fn synthesis_step1(&mut self) {
        let range = get_range(self.setup.multiplier);

        self.floor_step2_flag[0] = true;
        self.floor_step2_flag[1] = true;

        self.floor_final_y[0] = self.floor_y[0];
        self.floor_final_y[1] = self.floor_y[1];

        for i in 2..self.setup.x_list.len() {
            let (low, high) = self.setup.x_list_neighbors[i];

            let predicted = render_point(
                self.setup.x_list[low],
                self.floor_final_y[low],
                self.setup.x_list[high],
                self.floor_final_y[high],
                self.setup.x_list[i],
            );

            let val = self.floor_y[i];

            if val == 0 {
                self.floor_step2_flag[i] = false;
                self.floor_final_y[i] = predicted;
                continue;
            }

            let highroom = range - predicted;
            let lowroom = predicted;
            let room = 2 * highroom.min(lowroom);

            self.floor_step2_flag[low] = true;
            self.floor_step2_flag[high] = true;
            self.floor_step2_flag[i] = true;

            self.floor_final_y[i] = if val >= room {
                if highroom > lowroom {
                    val - lowroom + predicted
                }
                else {
                    predicted - val + highroom - 1
                }
            }
            else if val & 1 == 1 {
                predicted - ((val + 1) / 2)
            }
            else {
                predicted + (val / 2)
            };
        }
    }

    /// Section 7.2.4, step 2: curve synthesis.
    fn synthesis_step2(&mut self, floor: &mut [i32]) {
        let n = floor.len() as u32;
        let multiplier = i32::from(self.setup.multiplier);

        let mut lx = 0;
        let mut ly = self.floor_final_y[usize::from(self.setup.x_list_sort_order[0])] * multiplier;
        let mut hx = 0;
        let mut hy = 0;

        for i in self.setup.x_list_sort_order[1..].iter().map(|&i| usize::from(i)) {
            if self.floor_step2_flag[i] {
                hy = self.floor_final_y[i] * multiplier;
                hx = self.setup.x_list[i];

                render_line(lx, ly, hx, hy, floor);

                lx = hx;
                ly = hy;
            }
        }

        if hx < n {
            render_line(hx, hy, n, hy, floor);
        }
    }
}

impl Floor for Floor1 {
    fn read_channel(
        &mut self,
        bs: &mut BitReaderRtl<'_>,
        codebooks: &[VorbisCodebook],
    ) -> Result<()> {
        // Assume the floor is unused until it is decoded successfully.
        self.is_unused = true;

        if !try_or_unused!(bs.read_bool()) {
            return Ok(());
        }

        let range_bits = ilog(get_range(self.setup.multiplier) as u32 - 1);

        self.floor_y[0] = try_or_unused!(bs.read_bits_leq32(range_bits)) as i32;
        self.floor_y[1] = try_or_unused!(bs.read_bits_leq32(range_bits)) as i32;

        let mut offset = 2;

        for &class_idx in &self.setup.partition_class_list[..self.setup.partitions] {
            let class = &self.setup.classes[usize::from(class_idx)];

            let cdim = usize::from(class.dimensions);
            let cbits = class.subclass_bits;
            let csub = (1 << cbits) - 1;

            let mut cval = 0;

            if cbits > 0 {
                cval = try_or_unused!(codebooks[usize::from(class.mainbook)].read_scalar(bs));
            }

            for floor_y in self.floor_y[offset..offset + cdim].iter_mut() {
                let subclass_idx = cval & csub;

                cval >>= cbits;

                *floor_y = if class.is_subbook_used & (1 << subclass_idx) != 0 {
                    let book = usize::from(class.subbooks[subclass_idx as usize]);
                    try_or_unused!(codebooks[book].read_scalar(bs)) as i32
                }
                else {
                    0
                };
            }

            offset += cdim;
        }

        self.is_unused = false;

        Ok(())
    }

    fn is_unused(&self) -> bool {
        self.is_unused
    }

    fn synthesis(&mut self, _bs_exp: u8, floor: &mut [i32]) -> Result<()> {
        debug_assert!(!self.is_unused);
        self.synthesis_step1();
        self.synthesis_step2(floor);
        Ok(())
    }
}

#[inline(always)]
fn get_range(multiplier: u8) -> i32 {
    match multiplier {
        1 => 256,
        2 => 128,
        3 => 86,
        _ => 64,
    }
}

/// Sections 9.2.4 and 9.2.5. Finds the positions of the nearest lower and higher x values
/// preceeding position `i`. The first two x values are 0 and the maximum, so both neighbours
/// always exist for `i >= 2`.
fn find_neighbors(x_list: &[u32], i: usize) -> (usize, usize) {
    if i < 2 {
        return (0, 0);
    }

    let x = x_list[i];

    let mut low = 0;
    let mut high = 1;

    for (j, &xv) in x_list[..i].iter().enumerate() {
        if xv < x && xv > x_list[low] {
            low = j;
        }
        if xv > x && xv < x_list[high] {
            high = j;
        }
    }

    (low, high)
}

#[inline(always)]
fn render_point(x0: u32, y0: i32, x1: u32, y1: i32, x: u32) -> i32 {
    let dy = i64::from(y1) - i64::from(y0);
    let adx = i64::from(x1) - i64::from(x0);
    let err = dy.abs() * (i64::from(x) - i64::from(x0));
    let off = (err / adx) as i32;

    if dy < 0 {
        y0 - off
    }
    else {
        y0 + off
    }
}

#[inline(always)]
fn inverse_db(y: i32) -> i32 {
    FLOOR1_INVERSE_DB_TABLE[y.clamp(0, 255) as usize]
}

/// Renders a line from (x0, y0) up to, but excluding, x1. Points at or beyond the end of the
/// floor are not rendered.
fn render_line(x0: u32, y0: i32, x1: u32, y1: i32, floor: &mut [i32]) {
    let x0 = x0 as usize;

    if x0 >= floor.len() {
        return;
    }

    let dy = y1 - y0;
    let adx = x1 as i32 - x0 as i32;

    let base = dy / adx;
    let sy = if dy < 0 { base - 1 } else { base + 1 };
    let ady = dy.abs() - base.abs() * adx;

    let mut y = y0;
    let mut err = 0;

    floor[x0] = inverse_db(y);

    let x_end = floor.len().min(x1 as usize);

    for v in floor[x0 + 1..x_end].iter_mut() {
        err += ady;

        y += if err >= adx {
            err -= adx;
            sy
        }
        else {
            base
        };

        *v = inverse_db(y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{BitWriter, CodebookSpec, LookupSpec};

    fn read_codebooks(specs: &[CodebookSpec]) -> Vec<VorbisCodebook> {
        let mut bw = BitWriter::new();
        for spec in specs {
            spec.write(&mut bw);
        }
        let buf = bw.into_bytes();

        let mut bs = BitReaderRtl::new(&buf);
        specs.iter().map(|_| VorbisCodebook::read(&mut bs).unwrap()).collect()
    }

    #[test]
    fn verify_inverse_db_table() {
        assert!(FLOOR1_INVERSE_DB_TABLE.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(FLOOR1_INVERSE_DB_TABLE[255], i32::MAX);

        // 1.0649863e-07 in Q31.
        assert_eq!(FLOOR1_INVERSE_DB_TABLE[0], 229);

        assert_eq!(inverse_db(-5), FLOOR1_INVERSE_DB_TABLE[0]);
        assert_eq!(inverse_db(300), i32::MAX);
    }

    #[test]
    fn verify_find_neighbors() {
        let x_list = [0, 128, 64, 32, 96];

        assert_eq!(find_neighbors(&x_list, 2), (0, 1));
        assert_eq!(find_neighbors(&x_list, 3), (0, 2));
        assert_eq!(find_neighbors(&x_list, 4), (2, 1));
    }

    #[test]
    fn verify_render_point() {
        assert_eq!(render_point(0, 10, 16, 20, 8), 15);
        assert_eq!(render_point(0, 20, 16, 10, 8), 15);
        assert_eq!(render_point(0, 20, 16, 10, 3), 19);
        assert_eq!(render_point(0, 0, 32768, 1 << 20, 32767), (1 << 20) - 32);
    }

    #[test]
    fn verify_render_line() {
        for (y0, y1) in [(10, 20), (20, 10), (100, 100), (0, 255), (200, 3)] {
            let mut floor = [0; 16];

            render_line(0, y0, 16, y1, &mut floor);

            let dy: i32 = y1 - y0;

            for (k, &v) in floor.iter().enumerate() {
                let off = (dy.abs() * k as i32) / 16;
                let y = if dy < 0 { y0 - off } else { y0 + off };
                assert_eq!(v, FLOOR1_INVERSE_DB_TABLE[y as usize], "k={}", k);
            }
        }
    }

    #[test]
    fn verify_render_line_clipped() {
        let mut floor = [0; 8];

        // Starts beyond the end.
        render_line(8, 10, 16, 20, &mut floor);
        assert!(floor.iter().all(|&v| v == 0));

        // Ends beyond the end.
        render_line(4, 10, 16, 10, &mut floor);
        assert!(floor[..4].iter().all(|&v| v == 0));
        assert!(floor[4..].iter().all(|&v| v == FLOOR1_INVERSE_DB_TABLE[10]));
    }

    #[test]
    fn verify_floor1_decode() {
        let codebooks = read_codebooks(&[CodebookSpec::scalar(&[3; 8])]);

        let mut bw = BitWriter::new();
        // One partition of class 0.
        bw.write(1, 5);
        bw.write(0, 4);
        // Class 0 has 2 dimensions, no sub-classes, and uses codebook 0.
        bw.write(1, 3);
        bw.write(0, 2);
        bw.write(1, 8);
        // Multiplier 4, and the x-list [0, 128, 64, 32].
        bw.write(3, 2);
        bw.write(7, 4);
        bw.write(64, 7);
        bw.write(32, 7);
        let setup = bw.into_bytes();

        let mut floor1 = Floor1::try_read(&mut BitReaderRtl::new(&setup), 1).unwrap();

        let mut bw = BitWriter::new();
        bw.write_bool(true);
        bw.write(30, 6);
        bw.write(10, 6);
        bw.write_codeword(3, 3);
        bw.write_codeword(0, 3);
        let packet = bw.into_bytes();

        floor1.read_channel(&mut BitReaderRtl::new(&packet), &codebooks).unwrap();
        assert!(!floor1.is_unused());

        let mut floor = [0; 128];
        floor1.synthesis(8, &mut floor).unwrap();

        // Point 2 is predicted at 20 and moved to 18. Point 3 is predicted, so the curve is two
        // lines through (0, 120), (64, 72), and (128, 40).
        for (k, &v) in floor.iter().enumerate() {
            let y = if k < 64 { 120 - (48 * k) / 64 } else { 72 - (32 * (k - 64)) / 64 };
            assert_eq!(v, FLOOR1_INVERSE_DB_TABLE[y], "k={}", k);
        }
    }

    #[test]
    fn verify_floor1_unused() {
        let mut bw = BitWriter::new();
        bw.write(0, 5);
        bw.write(0, 2);
        bw.write(8, 4);
        let setup = bw.into_bytes();

        let mut floor1 = Floor1::try_read(&mut BitReaderRtl::new(&setup), 0).unwrap();

        // The unused flag.
        floor1.read_channel(&mut BitReaderRtl::new(&[0]), &[]).unwrap();
        assert!(floor1.is_unused());

        // A truncated packet leaves the floor unused without an error.
        floor1.read_channel(&mut BitReaderRtl::new(&[0x01]), &[]).unwrap();
        assert!(floor1.is_unused());
    }

    #[test]
    fn verify_floor1_invalid_setup() {
        // A duplicate x value.
        let mut bw = BitWriter::new();
        bw.write(2, 5);
        bw.write(0, 4);
        bw.write(0, 4);
        bw.write(0, 3);
        bw.write(0, 2);
        bw.write(0, 8);
        bw.write(0, 2);
        bw.write(4, 4);
        bw.write(5, 4);
        bw.write(5, 4);
        let setup = bw.into_bytes();

        assert!(Floor1::try_read(&mut BitReaderRtl::new(&setup), 0).is_err());

        // A class codebook that does not exist.
        let mut bw = BitWriter::new();
        bw.write(1, 5);
        bw.write(0, 4);
        bw.write(0, 3);
        bw.write(1, 2);
        bw.write(3, 8);
        let setup = bw.into_bytes();

        assert!(Floor1::try_read(&mut BitReaderRtl::new(&setup), 2).is_err());
    }

    #[test]
    fn verify_cos_q24() {
        for i in -200..200 {
            let x = f64::from(i) * 0.05;
            let fixed = cos_q24((x * f64::from(1 << 24)).round() as i32);
            assert!((f64::from(fixed) / f64::from(1 << 30) - x.cos()).abs() < 1e-5, "x={}", x);
        }
    }

    #[test]
    fn verify_exp2_q31() {
        for y in [-0.001, -0.5, -1.0, -1.25, -7.9, -20.0] {
            let fixed = exp2_q31((y * 65536.0) as i64);
            let expected = 2f64.powf(y);
            assert!((f64::from(fixed) / 2f64.powi(31) / expected - 1.0).abs() < 1e-4, "y={}", y);
        }

        assert_eq!(exp2_q31(-70 << 16), 0);
    }

    #[test]
    fn verify_linear_floor0_value() {
        for (p_plus_q, amplitude, bits, offset) in
            [(1.0, 20u64, 6u8, 60u8), (0.37, 100, 8, 120), (9.5, 3, 4, 40), (2.0, 1, 1, 10)]
        {
            let fixed = linear_floor0_value(
                Scaled::new((p_plus_q * f64::from(1 << 20)) as i64, -20),
                amplitude,
                bits,
                offset,
            );

            let a = amplitude as f64 * f64::from(offset);
            let b = f64::sqrt(p_plus_q) * ((1u64 << bits) - 1) as f64;
            let expected = (0.11512925 * (a / b - f64::from(offset))).exp().min(1.0);

            let actual = f64::from(fixed) / 2f64.powi(31);

            assert!((actual - expected).abs() <= expected * 1e-3 + 1e-9, "{} {}", actual, expected);
        }

        // Values at or above 0 dB saturate.
        assert_eq!(linear_floor0_value(Scaled::new(1, -20), 63, 6, 60), i32::MAX);
    }

    #[test]
    fn verify_floor0_decode() {
        // A single entry VQ codebook of the coefficients [0.5, 1.5].
        let codebooks = read_codebooks(&[CodebookSpec {
            dimensions: 2,
            lengths: vec![1],
            ordered: false,
            lookup: Some(LookupSpec {
                lookup_type: 2,
                min: 0.5,
                delta: 0.5,
                value_bits: 2,
                sequence_p: false,
                multiplicands: vec![0, 2],
            }),
        }]);

        let mut bw = BitWriter::new();
        bw.write(2, 8);
        bw.write(44100, 16);
        bw.write(64, 16);
        bw.write(6, 6);
        bw.write(60, 8);
        bw.write(0, 4);
        bw.write(0, 8);
        let setup = bw.into_bytes();

        let mut bs = BitReaderRtl::new(&setup);
        let mut floor0 = Floor0::try_read(&mut bs, 8, 9, &codebooks).unwrap();

        let mut bw = BitWriter::new();
        bw.write(20, 6);
        bw.write(0, 1);
        bw.write(0, 1);
        let packet = bw.into_bytes();

        floor0.read_channel(&mut BitReaderRtl::new(&packet), &codebooks).unwrap();
        assert!(!floor0.is_unused());

        let mut floor = [0; 128];
        floor0.synthesis(8, &mut floor).unwrap();

        let map = bark_map(128, 44100, 64);

        for (k, &v) in floor.iter().enumerate() {
            let c = (PI * f64::from(map[k]) / 64.0).cos();

            let p = (2.0 * f64::cos(1.5) - 2.0 * c).powi(2) * (1.0 - c) / 2.0;
            let q = (2.0 * f64::cos(0.5) - 2.0 * c).powi(2) * (1.0 + c) / 2.0;

            let db = 20.0 * 60.0 / ((p + q).sqrt() * 63.0) - 60.0;
            let expected = (0.11512925 * db).exp().min(1.0);

            let actual = f64::from(v) / 2f64.powi(31);

            assert!((actual - expected).abs() <= expected * 2e-3 + 1e-7, "k={}", k);
        }
    }

    #[test]
    fn verify_floor0_invalid_setup() {
        let codebooks = read_codebooks(&[CodebookSpec::scalar(&[1, 1])]);

        // The codebook has no VQ table.
        let mut bw = BitWriter::new();
        bw.write(2, 8);
        bw.write(44100, 16);
        bw.write(64, 16);
        bw.write(6, 6);
        bw.write(60, 8);
        bw.write(0, 4);
        bw.write(0, 8);
        let setup = bw.into_bytes();

        assert!(Floor0::try_read(&mut BitReaderRtl::new(&setup), 8, 9, &codebooks).is_err());
    }
}
