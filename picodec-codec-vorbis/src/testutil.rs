// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Writers for synthesizing Vorbis headers, audio packets, and Ogg pages in tests.

use picodec_core::checksum::{Crc32, Monitor};

use crate::codebook::make_words;

/// Writes bits least-significant bit first.
#[derive(Default)]
pub struct BitWriter {
    buf: Vec<u8>,
    n_bits: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn write(&mut self, value: u64, bits: u32) {
        for i in 0..bits {
            if self.n_bits % 8 == 0 {
                self.buf.push(0);
            }

            if (value >> i) & 1 == 1 {
                let last = self.buf.len() - 1;
                self.buf[last] |= 1 << (self.n_bits % 8);
            }

            self.n_bits += 1;
        }
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write(u64::from(value), 1);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.write(u64::from(byte), 8);
        }
    }

    /// Writes a Huffman codeword. The most-significant bit of the codeword is written first.
    pub fn write_codeword(&mut self, word: u32, len: u8) {
        for k in (0..u32::from(len)).rev() {
            self.write(u64::from((word >> k) & 1), 1);
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Packs a value into the 32-bit floating-point format of codebook headers. The value must be
/// exactly representable.
pub fn pack_float(value: f64) -> u32 {
    if value == 0.0 {
        return 0;
    }

    let sign = if value < 0.0 { 0x8000_0000 } else { 0 };
    let exp = value.abs().log2().floor() as i32;
    let mantissa = value.abs() * 2f64.powi(20 - exp);

    assert_eq!(mantissa.fract(), 0.0);

    sign | (((exp - 20 + 788) as u32) << 21) | mantissa as u32
}

/// The value lookup of a codebook.
pub struct LookupSpec {
    pub lookup_type: u8,
    pub min: f64,
    pub delta: f64,
    pub value_bits: u32,
    pub sequence_p: bool,
    pub multiplicands: Vec<u32>,
}

/// A codebook header.
pub struct CodebookSpec {
    pub dimensions: u16,
    pub lengths: Vec<u8>,
    pub ordered: bool,
    pub lookup: Option<LookupSpec>,
}

impl CodebookSpec {
    /// A scalar codebook.
    pub fn scalar(lengths: &[u8]) -> Self {
        CodebookSpec { dimensions: 1, lengths: lengths.to_vec(), ordered: false, lookup: None }
    }

    /// Gets the canonical codewords of the codebook.
    pub fn words(&self) -> Vec<u32> {
        make_words(&self.lengths).unwrap()
    }

    /// Writes the codeword for `entry`.
    pub fn write_entry(&self, bw: &mut BitWriter, entry: usize) {
        let words = self.words();
        bw.write_codeword(words[entry], self.lengths[entry]);
    }

    pub fn write(&self, bw: &mut BitWriter) {
        let entries = self.lengths.len() as u32;

        bw.write(0x564342, 24);
        bw.write(u64::from(self.dimensions), 16);
        bw.write(u64::from(entries), 24);
        bw.write_bool(self.ordered);

        if self.ordered {
            let mut cur_len = self.lengths[0];
            let mut cur_entry = 0;

            assert!(self.lengths.windows(2).all(|w| w[0] <= w[1]));

            bw.write(u64::from(cur_len - 1), 5);

            while cur_entry < entries {
                let num = self.lengths.iter().filter(|&&len| len == cur_len).count() as u32;
                let bits = 32 - (entries - cur_entry).leading_zeros();

                bw.write(u64::from(num), bits);

                cur_entry += num;
                cur_len += 1;
            }
        }
        else {
            let sparse = self.lengths.contains(&0);

            bw.write_bool(sparse);

            for &len in &self.lengths {
                if sparse {
                    bw.write_bool(len > 0);

                    if len == 0 {
                        continue;
                    }
                }

                bw.write(u64::from(len - 1), 5);
            }
        }

        match &self.lookup {
            None => bw.write(0, 4),
            Some(lookup) => {
                bw.write(u64::from(lookup.lookup_type), 4);
                bw.write(u64::from(pack_float(lookup.min)), 32);
                bw.write(u64::from(pack_float(lookup.delta)), 32);
                bw.write(u64::from(lookup.value_bits - 1), 4);
                bw.write_bool(lookup.sequence_p);

                for &m in &lookup.multiplicands {
                    bw.write(u64::from(m), lookup.value_bits);
                }
            }
        }
    }
}

/// The scalar classification book of [`setup_header`]: one entry with a 1-bit codeword.
pub fn class_book() -> CodebookSpec {
    CodebookSpec::scalar(&[1])
}

/// The residue book of [`setup_header`]: values -2, -1, 0, and 1 with 2-bit codewords.
pub fn residue_book() -> CodebookSpec {
    CodebookSpec {
        dimensions: 1,
        lengths: vec![2, 2, 2, 2],
        ordered: true,
        lookup: Some(LookupSpec {
            lookup_type: 1,
            min: -2.0,
            delta: 1.0,
            value_bits: 2,
            sequence_p: false,
            multiplicands: vec![0, 1, 2, 3],
        }),
    }
}

/// Short and long block sizes of the test stream.
pub const TEST_BS0_EXP: u8 = 8;
pub const TEST_BS1_EXP: u8 = 9;

/// The residue partition size of [`setup_header`].
pub const TEST_PARTITION_SIZE: usize = 16;

/// The residue end of [`setup_header`].
pub const TEST_RESIDUE_END: usize = 128;

/// Builds an identification header.
pub fn ident_header(channels: u8, sample_rate: u32) -> Vec<u8> {
    let mut buf = vec![1];
    buf.extend_from_slice(b"vorbis");
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.push(channels);
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&0i32.to_le_bytes());
    buf.extend_from_slice(&128_000i32.to_le_bytes());
    buf.extend_from_slice(&0i32.to_le_bytes());
    buf.push((TEST_BS1_EXP << 4) | TEST_BS0_EXP);
    buf.push(1);
    buf
}

/// Builds a comment header.
pub fn comment_header(vendor: &str, comments: &[&str]) -> Vec<u8> {
    let mut buf = vec![3];
    buf.extend_from_slice(b"vorbis");
    buf.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    buf.extend_from_slice(vendor.as_bytes());
    buf.extend_from_slice(&(comments.len() as u32).to_le_bytes());

    for comment in comments {
        buf.extend_from_slice(&(comment.len() as u32).to_le_bytes());
        buf.extend_from_slice(comment.as_bytes());
    }

    buf.push(1);
    buf
}

/// Builds a setup header with one floor 1 of two points, one residue of the given type, and one
/// mapping that couples channel 1 to channel 0 for stereo streams. Mode 0 uses short blocks, and
/// mode 1 long blocks.
pub fn setup_header(channels: u8, residue_type: u16) -> Vec<u8> {
    let mut bw = BitWriter::new();

    bw.write(5, 8);
    bw.write_bytes(b"vorbis");

    // Codebooks.
    bw.write(2 - 1, 8);
    class_book().write(&mut bw);
    residue_book().write(&mut bw);

    // Time domain transforms.
    bw.write(0, 6);
    bw.write(0, 16);

    // Floors: type 1, no partitions, multiplier 4, and an x-list of [0, 128].
    bw.write(0, 6);
    bw.write(1, 16);
    bw.write(0, 5);
    bw.write(3, 2);
    bw.write(7, 4);

    // Residues.
    bw.write(0, 6);
    bw.write(u64::from(residue_type), 16);
    bw.write(0, 24);
    bw.write(TEST_RESIDUE_END as u64, 24);
    bw.write(TEST_PARTITION_SIZE as u64 - 1, 24);
    bw.write(0, 6);
    bw.write(0, 8);
    // Classification 0 uses book 1 in the first pass only.
    bw.write(1, 3);
    bw.write_bool(false);
    bw.write(1, 8);

    // Mappings.
    bw.write(0, 6);
    bw.write(0, 16);
    bw.write_bool(false);
    bw.write_bool(channels == 2);
    if channels == 2 {
        bw.write(0, 8);
        bw.write(0, 1);
        bw.write(1, 1);
    }
    bw.write(0, 2);
    bw.write(0, 8);
    bw.write(0, 8);
    bw.write(0, 8);

    // Modes.
    bw.write(1, 6);
    for block_flag in [false, true] {
        bw.write_bool(block_flag);
        bw.write(0, 16);
        bw.write(0, 16);
        bw.write(0, 8);
    }

    // Framing.
    bw.write_bool(true);

    bw.into_bytes()
}

/// A channel of an audio packet for the stream described by [`setup_header`].
#[derive(Clone)]
pub enum TestChannel {
    /// The floor is unused.
    Silent,
    /// The floor is a line from `y0` to `y1`, and the residue values are given as residue book
    /// entries, one per coefficient, up to the residue end.
    Tone { y0: u8, y1: u8, entries: Vec<usize> },
}

/// Builds an audio packet. Only format 1 residues are supported, and the same residue is coded
/// for every channel that has a used floor.
pub fn audio_packet(long: bool, channels: &[TestChannel]) -> Vec<u8> {
    let mut bw = BitWriter::new();

    // Audio packet type and the mode number.
    bw.write(0, 1);
    bw.write(u64::from(long), 1);

    if long {
        // Previous and next window flags.
        bw.write_bool(true);
        bw.write_bool(true);
    }

    for channel in channels {
        match channel {
            TestChannel::Silent => bw.write_bool(false),
            TestChannel::Tone { y0, y1, .. } => {
                bw.write_bool(true);
                bw.write(u64::from(*y0), 6);
                bw.write(u64::from(*y1), 6);
            }
        }
    }

    // Stereo streams are coupled, so if any channel is coded, all are.
    let any_used = channels.iter().any(|ch| matches!(ch, TestChannel::Tone { .. }));

    if !any_used {
        return bw.into_bytes();
    }

    let class_book = class_book();
    let residue_book = residue_book();

    let n_parts = TEST_RESIDUE_END / TEST_PARTITION_SIZE;

    // The classification book has one dimension, so each partition is preceeded by one
    // classification codeword per channel.
    for part in 0..n_parts {
        for _ in channels {
            class_book.write_entry(&mut bw, 0);
        }

        for channel in channels {
            let entries = match channel {
                TestChannel::Tone { entries, .. } => entries.clone(),
                TestChannel::Silent => vec![2; TEST_RESIDUE_END],
            };

            for &entry in &entries[part * TEST_PARTITION_SIZE..(part + 1) * TEST_PARTITION_SIZE] {
                residue_book.write_entry(&mut bw, entry);
            }
        }
    }

    bw.into_bytes()
}

/// The Ogg header type flags.
pub const PAGE_CONTINUATION: u8 = 0x01;
pub const PAGE_FIRST: u8 = 0x02;
pub const PAGE_LAST: u8 = 0x04;

/// Builds an Ogg page holding complete packets.
pub fn ogg_page(flags: u8, granule: u64, serial: u32, sequence: u32, packets: &[&[u8]]) -> Vec<u8> {
    let mut segments = Vec::new();
    let mut body = Vec::new();

    for packet in packets {
        let mut len = packet.len();

        loop {
            let lacing = len.min(255);
            segments.push(lacing as u8);
            len -= lacing;

            if lacing < 255 {
                break;
            }
        }

        body.extend_from_slice(packet);
    }

    assert!(segments.len() <= 255);

    let mut page = Vec::new();

    page.extend_from_slice(b"OggS");
    page.push(0);
    page.push(flags);
    page.extend_from_slice(&granule.to_le_bytes());
    page.extend_from_slice(&serial.to_le_bytes());
    page.extend_from_slice(&sequence.to_le_bytes());
    page.extend_from_slice(&[0; 4]);
    page.push(segments.len() as u8);
    page.extend_from_slice(&segments);
    page.extend_from_slice(&body);

    let mut crc32 = Crc32::new(0);
    crc32.process_buf_bytes(&page);

    page[22..26].copy_from_slice(&crc32.crc().to_le_bytes());

    page
}
