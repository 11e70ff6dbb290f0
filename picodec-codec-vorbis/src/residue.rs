// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::min;

use picodec_core::errors::{decode_error, Error, Result};
use picodec_core::io::{BitReaderRtl, ReadBitsRtl};
use picodec_core::util::alloc::try_boxed_slice;

use super::codebook::VorbisCodebook;
use super::common::*;
use super::dsp::DspChannel;

/// The number of fractional bits of decoded residue values.
pub const RESIDUE_FRAC_BITS: i32 = 8;

#[derive(Default)]
struct ResidueVqClass {
    books: [u8; 8],
    is_used: u8,
}

impl ResidueVqClass {
    #[inline(always)]
    fn is_used(&self, pass: usize) -> bool {
        debug_assert!(pass < 8);
        self.is_used & (1 << pass) != 0
    }
}

struct ResidueSetup {
    /// The residue format.
    residue_type: u16,
    residue_begin: u32,
    residue_end: u32,
    /// Residue partition size (max. value 2^24).
    partition_size: u32,
    /// Residue classifications (max. value 64).
    classifications: u8,
    /// Codebook for reading partition classifications.
    classbook: u8,
    /// Codebooks for each partition classification.
    vq_class: Vec<ResidueVqClass>,
}

/// A working area shared by all residues of a stream. It is sized once, at setup, for the
/// largest residue.
pub struct ResidueScratch {
    part_classes: Box<[u8]>,
    /// Interleaved format 2 residue vector.
    buf: Box<[i32]>,
}

impl ResidueScratch {
    pub fn try_new(residues: &[Residue], bs1_exp: u8, n_channels: usize) -> Result<Self> {
        let n = (1usize << bs1_exp) >> 1;

        let mut max_classes = 0;
        let mut max_buf = 0;

        for residue in residues {
            max_classes = max_classes.max(n * n_channels / residue.setup.partition_size as usize);

            if residue.setup.residue_type == 2 {
                max_buf = n * n_channels;
            }
        }

        Ok(ResidueScratch {
            part_classes: try_boxed_slice(max_classes, 0)?,
            buf: try_boxed_slice(max_buf, 0)?,
        })
    }
}

pub struct Residue {
    setup: ResidueSetup,
}

impl Residue {
    pub fn try_read(
        bs: &mut BitReaderRtl<'_>,
        residue_type: u16,
        codebooks: &[VorbisCodebook],
    ) -> Result<Self> {
        let setup = Self::read_setup(bs, residue_type, codebooks)?;

        Ok(Residue { setup })
    }

    fn read_setup(
        bs: &mut BitReaderRtl<'_>,
        residue_type: u16,
        codebooks: &[VorbisCodebook],
    ) -> Result<ResidueSetup> {
        let residue_begin = bs.read_bits_leq32(24)?;
        let residue_end = bs.read_bits_leq32(24)?;
        let partition_size = bs.read_bits_leq32(24)? + 1;
        let classifications = bs.read_bits_leq32(6)? as u8 + 1;
        let classbook = bs.read_bits_leq32(8)? as u8;

        if residue_end < residue_begin {
            return decode_error("vorbis: invalid residue begin and end");
        }

        // Partition classifications are read as scalars, one or more per codeword.
        match codebooks.get(usize::from(classbook)) {
            Some(book) if book.dimensions() > 0 => (),
            _ => return decode_error("vorbis: invalid classbook for residue"),
        }

        let mut vq_class = Vec::with_capacity(usize::from(classifications));

        for _ in 0..classifications {
            let low_bits = bs.read_bits_leq32(3)? as u8;

            let high_bits = if bs.read_bool()? { bs.read_bits_leq32(5)? as u8 } else { 0 };

            vq_class.push(ResidueVqClass { is_used: (high_bits << 3) | low_bits, books: [0; 8] });
        }

        for class in &mut vq_class {
            for (pass, book) in class.books.iter_mut().enumerate() {
                if class.is_used & (1 << pass) == 0 {
                    continue;
                }

                *book = bs.read_bits_leq32(8)? as u8;

                // Residue values are read as VQ vectors.
                match codebooks.get(usize::from(*book)) {
                    Some(codebook) if codebook.has_vq() => (),
                    _ => return decode_error("vorbis: invalid codebook for residue"),
                }
            }
        }

        Ok(ResidueSetup {
            residue_type,
            residue_begin,
            residue_end,
            partition_size,
            classifications,
            classbook,
            vq_class,
        })
    }

    /// Reads the residue vectors of `residue_channels` into the residue buffers of `channels`, in
    /// Q8.
    pub fn read_residue(
        &self,
        bs: &mut BitReaderRtl<'_>,
        bs_exp: u8,
        codebooks: &[VorbisCodebook],
        residue_channels: ChannelSet,
        scratch: &mut ResidueScratch,
        channels: &mut [DspChannel],
    ) -> Result<()> {
        let n = (1 << bs_exp) >> 1;

        // An encoder may end the packet before all passes are coded.
        match self.read_residue_inner(bs, n, codebooks, residue_channels, scratch, channels) {
            Ok(_) | Err(Error::EndOfBitstream) => (),
            Err(e) => return Err(e),
        }

        if self.setup.residue_type == 2 {
            // The format 2 vector interleaves all channels. De-interleave it into the channel
            // buffers.
            let stride = residue_channels.count();

            for (i, ch) in residue_channels.iter().enumerate() {
                let samples = scratch.buf[..n * stride].iter().skip(i).step_by(stride);

                for (o, &s) in channels[ch].residue[..n].iter_mut().zip(samples) {
                    *o = s;
                }
            }
        }

        Ok(())
    }

    fn read_residue_inner(
        &self,
        bs: &mut BitReaderRtl<'_>,
        n: usize,
        codebooks: &[VorbisCodebook],
        residue_channels: ChannelSet,
        scratch: &mut ResidueScratch,
        channels: &mut [DspChannel],
    ) -> Result<()> {
        let class_book = &codebooks[usize::from(self.setup.classbook)];

        let is_fmt2 = self.setup.residue_type == 2;
        let n_channels = residue_channels.count();

        // The length of the entire residue vector for a channel (formats 0 and 1), or all
        // interleaved channels (format 2).
        let actual_size = if is_fmt2 { n * n_channels } else { n };

        let begin = min(self.setup.residue_begin as usize, actual_size);
        let end = min(self.setup.residue_end as usize, actual_size);

        let part_size = self.setup.partition_size as usize;
        let parts_to_read = (end - begin) / part_size;
        let parts_per_classword = usize::from(class_book.dimensions());

        let classifications = u32::from(self.setup.classifications);

        let mut has_channel_to_decode = false;

        for ch in residue_channels.iter() {
            if !is_fmt2 {
                channels[ch].residue[..n].fill(0);
            }

            has_channel_to_decode |= !channels[ch].do_not_decode;
        }

        if is_fmt2 {
            scratch.buf[..actual_size].fill(0);
        }

        if !has_channel_to_decode {
            return Ok(());
        }

        for pass in 0..8 {
            for p_start in (0..parts_to_read).step_by(parts_per_classword) {
                // Partition classifications are only coded in the first pass.
                if pass == 0 {
                    if is_fmt2 {
                        let code = class_book.read_scalar(bs)?;

                        decode_classes(
                            code,
                            parts_per_classword,
                            classifications,
                            &mut scratch.part_classes[p_start..parts_to_read],
                        );
                    }
                    else {
                        for (i, ch) in residue_channels.iter().enumerate() {
                            if channels[ch].do_not_decode {
                                continue;
                            }

                            let code = class_book.read_scalar(bs)?;

                            let classes = &mut scratch.part_classes[i * parts_to_read..];

                            decode_classes(
                                code,
                                parts_per_classword,
                                classifications,
                                &mut classes[p_start..parts_to_read],
                            );
                        }
                    }
                }

                let p_end = min(parts_to_read, p_start + parts_per_classword);

                for p in p_start..p_end {
                    let offset = begin + part_size * p;

                    if is_fmt2 {
                        let class = &self.setup.vq_class[usize::from(scratch.part_classes[p])];

                        if class.is_used(pass) {
                            let book = &codebooks[usize::from(class.books[pass])];

                            let out = &mut scratch.buf[offset..offset + part_size];

                            read_partition_format1(bs, book, out)?;
                        }

                        continue;
                    }

                    for (i, ch) in residue_channels.iter().enumerate() {
                        let channel = &mut channels[ch];

                        if channel.do_not_decode {
                            continue;
                        }

                        let class_idx = scratch.part_classes[i * parts_to_read + p];
                        let class = &self.setup.vq_class[usize::from(class_idx)];

                        if !class.is_used(pass) {
                            continue;
                        }

                        let book = &codebooks[usize::from(class.books[pass])];

                        let out = &mut channel.residue[offset..offset + part_size];

                        if self.setup.residue_type == 0 {
                            read_partition_format0(bs, book, out)?;
                        }
                        else {
                            read_partition_format1(bs, book, out)?;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Splits a classword into its classifications, most significant first. Classifications for
/// partitions beyond the end of `out` are discarded.
fn decode_classes(mut val: u32, class_words: usize, classifications: u32, out: &mut [u8]) {
    for j in (0..class_words).rev() {
        if j < out.len() {
            out[j] = (val % classifications) as u8;
        }
        val /= classifications;
    }
}

#[inline(always)]
fn accumulate(out: &mut i32, t: i32, exp: i32) {
    *out = out.saturating_add(rescale(t, exp, RESIDUE_FRAC_BITS));
}

/// Format 0 interleaves the elements of each VQ vector across the partition.
fn read_partition_format0(
    bs: &mut BitReaderRtl<'_>,
    codebook: &VorbisCodebook,
    out: &mut [i32],
) -> Result<()> {
    let exp = codebook.vq_exp();
    let step = out.len() / usize::from(codebook.dimensions());

    for i in 0..step {
        let vq = codebook.read_vq(bs)?;

        for (o, &t) in out[i..].iter_mut().step_by(step).zip(vq) {
            accumulate(o, t, exp);
        }
    }

    Ok(())
}

/// Format 1 places the elements of each VQ vector consecutively.
fn read_partition_format1(
    bs: &mut BitReaderRtl<'_>,
    codebook: &VorbisCodebook,
    out: &mut [i32],
) -> Result<()> {
    let exp = codebook.vq_exp();

    for out in out.chunks_mut(usize::from(codebook.dimensions())) {
        let vq = codebook.read_vq(bs)?;

        for (o, &t) in out.iter_mut().zip(vq) {
            accumulate(o, t, exp);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{residue_book, BitWriter, CodebookSpec};

    #[test]
    fn verify_decode_classes() {
        // 3 classifications, 3 partitions per classword: 2 * 9 + 0 * 3 + 1 = 19.
        let mut out = [0xff; 3];
        decode_classes(19, 3, 3, &mut out);
        assert_eq!(out, [2, 0, 1]);

        // The last classword may cover partitions past the end.
        let mut out = [0xff; 2];
        decode_classes(19, 3, 3, &mut out);
        assert_eq!(out, [2, 0]);
    }

    fn codebooks() -> Vec<VorbisCodebook> {
        let mut bw = BitWriter::new();
        CodebookSpec::scalar(&[1]).write(&mut bw);
        residue_book().write(&mut bw);

        // A 2-dimensional VQ book of the values -1, 0, 1 in each dimension.
        CodebookSpec {
            dimensions: 2,
            lengths: vec![4, 4, 4, 4, 4, 4, 4, 4, 1],
            ordered: false,
            lookup: Some(crate::testutil::LookupSpec {
                lookup_type: 1,
                min: -1.0,
                delta: 1.0,
                value_bits: 2,
                sequence_p: false,
                multiplicands: vec![0, 1, 2],
            }),
        }
        .write(&mut bw);

        let buf = bw.into_bytes();
        let mut bs = BitReaderRtl::new(&buf);
        (0..3).map(|_| VorbisCodebook::read(&mut bs).unwrap()).collect()
    }

    /// Writes a residue setup with one classification that uses `book` in the first pass.
    fn residue_setup(end: u32, partition_size: u32, book: u8) -> Vec<u8> {
        let mut bw = BitWriter::new();
        bw.write(0, 24);
        bw.write(u64::from(end), 24);
        bw.write(u64::from(partition_size - 1), 24);
        bw.write(0, 6);
        bw.write(0, 8);
        bw.write(1, 3);
        bw.write_bool(false);
        bw.write(u64::from(book), 8);
        bw.into_bytes()
    }

    #[test]
    fn verify_invalid_residue_setup() {
        let codebooks = codebooks();

        // Codebook 0 has no VQ table.
        let setup = residue_setup(16, 4, 0);
        assert!(Residue::try_read(&mut BitReaderRtl::new(&setup), 1, &codebooks).is_err());

        // Codebook 3 does not exist.
        let setup = residue_setup(16, 4, 3);
        assert!(Residue::try_read(&mut BitReaderRtl::new(&setup), 1, &codebooks).is_err());

        let setup = residue_setup(16, 4, 1);
        assert!(Residue::try_read(&mut BitReaderRtl::new(&setup), 1, &codebooks).is_ok());
    }

    fn decode(
        residue_type: u16,
        book: u8,
        n_channels: usize,
        packet: &[u8],
        do_not_decode: &[bool],
    ) -> Vec<DspChannel> {
        let codebooks = codebooks();

        let setup = residue_setup(16, 4, book);
        let residue =
            Residue::try_read(&mut BitReaderRtl::new(&setup), residue_type, &codebooks).unwrap();

        let residues = [residue];
        let mut scratch = ResidueScratch::try_new(&residues, 6, n_channels).unwrap();

        let mut channels: Vec<DspChannel> =
            (0..n_channels).map(|_| DspChannel::try_new(6).unwrap()).collect();

        let mut set = ChannelSet::default();

        for (i, ch) in channels.iter_mut().enumerate() {
            ch.do_not_decode = do_not_decode[i];
            ch.residue.fill(0x55);
            set.insert(i);
        }

        residues[0]
            .read_residue(
                &mut BitReaderRtl::new(packet),
                6,
                &codebooks,
                set,
                &mut scratch,
                &mut channels,
            )
            .unwrap();

        channels
    }

    #[test]
    fn verify_residue_format1() {
        let book = residue_book();

        // 4 partitions of 4 values. Each partition is preceeded by its classification.
        let entries: Vec<usize> = (0..16).map(|i| i % 4).collect();

        let mut bw = BitWriter::new();
        for part in entries.chunks(4) {
            bw.write(0, 1);
            for &e in part {
                book.write_entry(&mut bw, e);
            }
        }
        let packet = bw.into_bytes();

        let channels = decode(1, 1, 1, &packet, &[false]);

        // Entries map to -2, -1, 0, 1 in Q8.
        for (i, &r) in channels[0].residue[..32].iter().enumerate() {
            let expected = if i < 16 { ((i % 4) as i32 - 2) << 8 } else { 0 };
            assert_eq!(r, expected, "i={}", i);
        }
    }

    #[test]
    fn verify_residue_format0() {
        let codebooks = codebooks();
        let words = CodebookSpec {
            dimensions: 2,
            lengths: vec![4, 4, 4, 4, 4, 4, 4, 4, 1],
            ordered: false,
            lookup: None,
        };

        // Entry 5 is (1, 0) and entry 8 is (1, 1) in the 2-dimensional book.
        let mut bw = BitWriter::new();
        for _ in 0..4 {
            bw.write(0, 1);
            words.write_entry(&mut bw, 5);
            words.write_entry(&mut bw, 8);
        }
        let packet = bw.into_bytes();

        assert_eq!(codebooks[2].dimensions(), 2);

        let channels = decode(0, 2, 1, &packet, &[false]);

        // Vector elements are interleaved with a step of 2 within each partition of 4.
        let one = 1 << 8;
        for part in channels[0].residue[..16].chunks(4) {
            assert_eq!(part, &[one, one, 0, one]);
        }
    }

    #[test]
    fn verify_residue_format2() {
        let book = residue_book();

        // The interleaved vector of 2 channels is 64 values long, but only the first 16 are
        // coded.
        let mut bw = BitWriter::new();
        for part in 0..4 {
            bw.write(0, 1);
            for k in 0..4 {
                book.write_entry(&mut bw, (part * 4 + k) % 2 * 3);
            }
        }
        let packet = bw.into_bytes();

        let channels = decode(2, 1, 2, &packet, &[false, true]);

        // Even interleaved positions are -2 and odd ones 1, so channel 0 gets all -2s and
        // channel 1 all 1s.
        for i in 0..32 {
            let expected = if i < 8 { (-2 << 8, 1 << 8) } else { (0, 0) };
            assert_eq!((channels[0].residue[i], channels[1].residue[i]), expected, "i={}", i);
        }
    }

    #[test]
    fn verify_residue_do_not_decode() {
        let channels = decode(1, 1, 2, &[], &[true, true]);

        // The residue is zeroed and nothing is read.
        assert!(channels.iter().all(|ch| ch.residue[..32].iter().all(|&r| r == 0)));
    }

    #[test]
    fn verify_residue_truncated() {
        let book = residue_book();

        // The packet ends 3 values into the second partition.
        let mut bw = BitWriter::new();
        bw.write(0, 1);
        for _ in 0..4 {
            book.write_entry(&mut bw, 3);
        }
        bw.write(0, 1);
        for _ in 0..3 {
            book.write_entry(&mut bw, 3);
        }
        let packet = bw.into_bytes();
        assert_eq!(packet.len(), 2);

        let channels = decode(1, 1, 1, &packet, &[false]);

        assert_eq!(&channels[0].residue[..7], &[1 << 8; 7]);
        assert!(channels[0].residue[7..32].iter().all(|&r| r == 0));
    }
}
