// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use picodec_core::errors::{decode_error, Result};
use picodec_core::io::ReadBitsLtr;

use crate::common::*;

use super::{FrameData, GranuleChannel};

/// Bit lengths (slen1, slen2) of MPEG1 scale factors, indexed by `scalefac_compress`. Bands
/// before the partition switch use slen1, the remaining bands use slen2.
const SCALE_FACTOR_SLEN: [(u32, u32); 16] = [
    (0, 0),
    (0, 1),
    (0, 2),
    (0, 3),
    (3, 0),
    (1, 1),
    (1, 2),
    (1, 3),
    (2, 1),
    (2, 2),
    (2, 3),
    (3, 1),
    (3, 2),
    (3, 3),
    (4, 2),
    (4, 3),
];

/// The long block scale factor partitions of a MPEG1 granule channel. Each partition may be shared
/// with the previous granule as signalled by `scfsi`.
const SCFSI_PARTITIONS: [(usize, usize); 4] = [(0, 6), (6, 11), (11, 16), (16, 21)];

/// The number of scale factors in each of the four LSF partitions, indexed by the partition
/// table row, and then the block index (long, short, mixed).
///
/// Rows 0 to 2 apply to the right channel of an intensity stereo frame, rows 3 to 5 to all other
/// channels.
const LSF_NR_OF_SFB: [[[usize; 4]; 3]; 6] = [
    [[7, 7, 7, 0], [12, 12, 12, 0], [6, 15, 12, 0]],
    [[6, 6, 6, 3], [12, 9, 9, 6], [6, 12, 9, 6]],
    [[8, 8, 5, 0], [15, 12, 9, 0], [6, 18, 9, 0]],
    [[6, 5, 5, 5], [9, 9, 9, 9], [6, 9, 9, 9]],
    [[6, 5, 7, 3], [9, 9, 12, 6], [6, 9, 12, 6]],
    [[11, 10, 0, 0], [18, 18, 0, 0], [15, 18, 0, 0]],
];

/// Reads the side_info for a single channel in a granule.
fn read_granule_channel_side_info<B: ReadBitsLtr>(
    bs: &mut B,
    header: &FrameHeader,
    channel: &mut GranuleChannel,
) -> Result<()> {
    channel.part2_3_length = bs.read_bits_leq32(12)? as u16;
    channel.big_values = bs.read_bits_leq32(9)? as u16;

    // One big_value decodes to 2 samples and a granule holds 576 samples.
    if channel.big_values > 288 {
        return decode_error("mp3: granule big_values > 288");
    }

    channel.global_gain = bs.read_bits_leq32(8)? as u8;

    channel.scalefac_compress =
        if header.is_mpeg1() { bs.read_bits_leq32(4) } else { bs.read_bits_leq32(9) }? as u16;

    let window_switching = bs.read_bool()?;

    if window_switching {
        let block_type_enc = bs.read_bits_leq32(2)?;
        let is_mixed = bs.read_bool()?;

        channel.block_type = match block_type_enc {
            // Window switching only permits transitional or short blocks.
            0b00 => return decode_error("mp3: invalid block_type"),
            0b01 => BlockType::Start,
            0b10 => BlockType::Short { is_mixed },
            _ => BlockType::End,
        };

        // There are only two regions with window switching.
        for table in &mut channel.table_select[..2] {
            *table = bs.read_bits_leq32(5)? as u8;
        }

        for gain in &mut channel.subblock_gain {
            *gain = bs.read_bits_leq32(3)? as u8;
        }

        // The region boundaries are implicit with window switching.
        channel.region1_start = if header.is_mpeg2p5() {
            // The region0 count is coded as one less than the actual band count.
            let region0_count = match channel.block_type {
                BlockType::Short { is_mixed: false } => 5 + 1,
                _ => 7 + 1,
            };

            SFB_LONG_BANDS[header.sample_rate_idx][region0_count]
        }
        else if header.is_mpeg1() || block_type_enc == 0b10 {
            // 8 long bands, or 9 short bands (3 bands x 3 windows), both of which span 36 samples.
            36
        }
        else {
            // MPEG2 transitional blocks: the first 8 long bands span 54 samples.
            54
        };

        channel.region2_start = SAMPLES_PER_GRANULE;
    }
    else {
        channel.block_type = BlockType::Long;

        for table in &mut channel.table_select {
            *table = bs.read_bits_leq32(5)? as u8;
        }

        // Both region counts are coded as one less than the actual band count.
        let region0_count = bs.read_bits_leq32(4)? as usize + 1;
        let region0_1_count = bs.read_bits_leq32(3)? as usize + region0_count + 1;

        let bands = &SFB_LONG_BANDS[header.sample_rate_idx];

        channel.region1_start = bands[region0_count];

        // The sum may run past the last long band.
        channel.region2_start = bands.get(region0_1_count).copied().unwrap_or(SAMPLES_PER_GRANULE);
    }

    // Preflag is implicit in MPEG2 and set while reading the scale factors.
    channel.preflag = if header.is_mpeg1() { bs.read_bool()? } else { false };

    channel.scalefac_scale = bs.read_bool()?;
    channel.count1table_select = bs.read_bit()? as u8;

    Ok(())
}

/// Reads the side_info of a frame into `frame_data`. Returns the side_info length in bytes.
pub(super) fn read_side_info<B: ReadBitsLtr>(
    bs: &mut B,
    header: &FrameHeader,
    frame_data: &mut FrameData,
) -> Result<usize> {
    let n_channels = header.n_channels();

    if header.is_mpeg1() {
        frame_data.main_data_begin = bs.read_bits_leq32(9)? as u16;

        // Private bits.
        bs.ignore_bits(if n_channels == 1 { 5 } else { 3 })?;

        for scfsi in &mut frame_data.scfsi[..n_channels] {
            for band in scfsi.iter_mut() {
                *band = bs.read_bool()?;
            }
        }
    }
    else {
        frame_data.main_data_begin = bs.read_bits_leq32(8)? as u16;

        // Private bits.
        bs.ignore_bits(if n_channels == 1 { 1 } else { 2 })?;
    }

    for granule in &mut frame_data.granules[..header.n_granules()] {
        for channel in &mut granule.channels[..n_channels] {
            read_granule_channel_side_info(bs, header, channel)?;
        }
    }

    Ok(header.side_info_len())
}

/// Reads the scale factors of channel `ch` in granule `gr` of a MPEG1 frame. Returns the number
/// of bits read (the part2 length).
pub(super) fn read_scale_factors_mpeg1<B: ReadBitsLtr>(
    bs: &mut B,
    gr: usize,
    ch: usize,
    frame_data: &mut FrameData,
) -> Result<u32> {
    // Scale factors shared with the first granule are copied before the second is modified.
    let prev_scalefacs = frame_data.granules[0].channels[ch].scalefacs;
    let scfsi = frame_data.scfsi[ch];

    let channel = &mut frame_data.granules[gr].channels[ch];

    let (slen1, slen2) = SCALE_FACTOR_SLEN[usize::from(channel.scalefac_compress)];

    let mut bits_read = 0;

    if let BlockType::Short { is_mixed } = channel.block_type {
        // A mixed block has 8 long bands and 3 short bands (x 3 windows) coded with slen1. A plain
        // short block has 6 short bands (x 3 windows) coded with slen1. Both end with 6 short
        // bands (x 3 windows) coded with slen2.
        let n_sfb1 = if is_mixed { 8 + 3 * 3 } else { 6 * 3 };

        for (range, slen) in [(0..n_sfb1, slen1), (n_sfb1..n_sfb1 + 6 * 3, slen2)] {
            if slen > 0 {
                bits_read += slen * range.len() as u32;

                for sf in &mut channel.scalefacs[range] {
                    *sf = bs.read_bits_leq32(slen)? as u8;
                }
            }
        }
    }
    else {
        for (i, &(start, end)) in SCFSI_PARTITIONS.iter().enumerate() {
            let slen = if i < 2 { slen1 } else { slen2 };

            if gr > 0 && scfsi[i] {
                channel.scalefacs[start..end].copy_from_slice(&prev_scalefacs[start..end]);
            }
            else if slen > 0 {
                bits_read += slen * (end - start) as u32;

                for sf in &mut channel.scalefacs[start..end] {
                    *sf = bs.read_bits_leq32(slen)? as u8;
                }
            }
        }
    }

    Ok(bits_read)
}

/// Decodes the 9-bit LSF `scalefac_compress` into the bit lengths of the four scale factor
/// partitions, and the row of `LSF_NR_OF_SFB` that gives the partition sizes.
fn lsf_slen(scalefac_compress: u16, is_intensity_channel: bool) -> ([u32; 4], usize) {
    let sfc = u32::from(scalefac_compress);

    if is_intensity_channel {
        let sfc = sfc >> 1;

        match sfc {
            0..=179 => ([sfc / 36, (sfc % 36) / 6, (sfc % 36) % 6, 0], 0),
            180..=243 => {
                let sfc = sfc - 180;
                ([(sfc % 64) >> 4, (sfc % 16) >> 2, sfc % 4, 0], 1)
            }
            _ => {
                let sfc = sfc - 244;
                ([sfc / 3, sfc % 3, 0, 0], 2)
            }
        }
    }
    else {
        match sfc {
            0..=399 => ([(sfc >> 4) / 5, (sfc >> 4) % 5, (sfc % 16) >> 2, sfc % 4], 3),
            400..=499 => {
                let sfc = sfc - 400;
                ([(sfc >> 2) / 5, (sfc >> 2) % 5, sfc % 4, 0], 4)
            }
            _ => {
                let sfc = sfc - 500;
                ([sfc / 3, sfc % 3, 0, 0], 5)
            }
        }
    }
}

/// Reads the scale factors of a channel in a MPEG2 or MPEG2.5 frame. Returns the number of bits
/// read (the part2 length).
///
/// For the right channel of an intensity stereo frame the scale factors are intensity positions.
/// The largest value representable by a band's bit length marks an illegal position, and that
/// value is recorded per band in `is_pos_limit`.
pub(super) fn read_scale_factors_mpeg2<B: ReadBitsLtr>(
    bs: &mut B,
    is_intensity_channel: bool,
    channel: &mut GranuleChannel,
) -> Result<u32> {
    let block_index = match channel.block_type {
        BlockType::Short { is_mixed: true } => 2,
        BlockType::Short { is_mixed: false } => 1,
        _ => 0,
    };

    let (slens, row) = lsf_slen(channel.scalefac_compress, is_intensity_channel);

    // Pre-emphasis is signalled by the highest range of scalefac_compress, except for the
    // intensity channel.
    channel.preflag = !is_intensity_channel && channel.scalefac_compress >= 500;

    let mut bits_read = 0;
    let mut start = 0;

    for (&slen, &n_sfb) in slens.iter().zip(&LSF_NR_OF_SFB[row][block_index]) {
        let end = start + n_sfb;

        // A zero length codes n_sfb scale factors of 0.
        if slen > 0 {
            bits_read += slen * n_sfb as u32;

            for sf in &mut channel.scalefacs[start..end] {
                *sf = bs.read_bits_leq32(slen)? as u8;
            }
        }

        channel.is_pos_limit[start..end].fill(((1u32 << slen) - 1) as u8);

        start = end;
    }

    // Bands not coded by any partition take the limit of the last coded band.
    let last = channel.is_pos_limit[start.saturating_sub(1)];
    channel.is_pos_limit[start..].fill(last);

    Ok(bits_read)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::parse_frame_header_word;
    use crate::testutil::BitWriter;
    use picodec_core::io::BitReaderLtr;

    #[test]
    fn verify_read_side_info_mpeg1_stereo() {
        // MPEG1 Layer 3, 128 kbps, 44.1 kHz, joint stereo.
        let header = parse_frame_header_word(0xfffb_9064).unwrap();

        let mut w = BitWriter::new();
        w.write(300, 9); // main_data_begin
        w.write(0, 3); // private bits
        w.write(0b1010, 4); // scfsi, channel 0
        w.write(0b0000, 4); // scfsi, channel 1

        for gr in 0..2 {
            for ch in 0..2 {
                w.write(1000 + 10 * gr + ch, 12); // part2_3_length
                w.write(200, 9); // big_values
                w.write(210, 8); // global_gain
                w.write(15, 4); // scalefac_compress

                if gr == 1 && ch == 1 {
                    w.write(1, 1); // window switching
                    w.write(0b10, 2); // short
                    w.write(1, 1); // mixed
                    w.write(7, 5);
                    w.write(9, 5);
                    w.write(1, 3);
                    w.write(2, 3);
                    w.write(3, 3);
                }
                else {
                    w.write(0, 1); // window switching
                    w.write(1, 5);
                    w.write(2, 5);
                    w.write(3, 5);
                    w.write(4, 4); // region0_count
                    w.write(2, 3); // region1_count
                }

                w.write(1, 1); // preflag
                w.write(0, 1); // scalefac_scale
                w.write(1, 1); // count1table_select
            }
        }

        let buf = w.into_bytes();
        assert_eq!(buf.len(), 32);

        let mut frame_data = FrameData::default();
        let len = read_side_info(&mut BitReaderLtr::new(&buf), &header, &mut frame_data).unwrap();

        assert_eq!(len, 32);
        assert_eq!(frame_data.main_data_begin, 300);
        assert_eq!(frame_data.scfsi[0], [true, false, true, false]);

        let ch = &frame_data.granules[0].channels[0];
        assert_eq!(ch.part2_3_length, 1000);
        assert_eq!(ch.big_values, 200);
        assert_eq!(ch.table_select, [1, 2, 3]);
        // Bands 5 and 8 of the 44.1 kHz long band table.
        assert_eq!(ch.region1_start, 20);
        assert_eq!(ch.region2_start, 36);
        assert!(ch.preflag);
        assert_eq!(ch.count1table_select, 1);

        let ch = &frame_data.granules[1].channels[1];
        assert_eq!(ch.part2_3_length, 1011);
        assert_eq!(ch.block_type, BlockType::Short { is_mixed: true });
        assert_eq!(ch.table_select[..2], [7, 9]);
        assert_eq!(ch.subblock_gain, [1, 2, 3]);
        assert_eq!(ch.region1_start, 36);
        assert_eq!(ch.region2_start, 576);
    }

    #[test]
    fn verify_reject_reserved_block_type() {
        let header = parse_frame_header_word(0xfffb_9064).unwrap();

        let mut w = BitWriter::new();
        w.write(0, 9 + 3 + 8);
        w.write(0, 12 + 9); // part2_3_length, big_values
        w.write(0, 8 + 4); // global_gain, scalefac_compress
        w.write(1, 1); // window switching
        w.write(0, 2); // reserved block type
        w.write(0, 32);
        w.write(0, 32);

        let buf = w.into_bytes();
        let mut frame_data = FrameData::default();

        assert!(read_side_info(&mut BitReaderLtr::new(&buf), &header, &mut frame_data).is_err());
    }

    #[test]
    fn verify_scfsi_reuse() {
        let mut frame_data = FrameData::default();

        // slen1 = 1, slen2 = 1.
        frame_data.granules[0].channels[0].scalefac_compress = 5;
        frame_data.granules[1].channels[0].scalefac_compress = 5;
        frame_data.scfsi[0] = [false, true, false, true];

        let mut w = BitWriter::new();
        for _ in 0..21 {
            w.write(1, 1);
        }
        let buf = w.into_bytes();

        let mut bs = BitReaderLtr::new(&buf);
        assert_eq!(read_scale_factors_mpeg1(&mut bs, 0, 0, &mut frame_data).unwrap(), 21);

        // The second granule codes only partitions 0 and 2 (6 + 5 scale factors), all zero.
        let buf = [0u8; 2];
        let mut bs = BitReaderLtr::new(&buf);
        assert_eq!(read_scale_factors_mpeg1(&mut bs, 1, 0, &mut frame_data).unwrap(), 11);

        let scalefacs = &frame_data.granules[1].channels[0].scalefacs;
        assert!(scalefacs[0..6].iter().all(|&sf| sf == 0));
        assert!(scalefacs[6..11].iter().all(|&sf| sf == 1));
        assert!(scalefacs[11..16].iter().all(|&sf| sf == 0));
        assert!(scalefacs[16..21].iter().all(|&sf| sf == 1));
    }

    #[test]
    fn verify_lsf_slen() {
        // 0..400: slen = [sfc / 80, (sfc / 16) % 5, (sfc % 16) / 4, sfc % 4].
        assert_eq!(lsf_slen(399, false), ([4, 4, 3, 3], 3));
        assert_eq!(lsf_slen(499, false), ([4, 4, 3, 0], 4));
        assert_eq!(lsf_slen(511, false), ([3, 2, 0, 0], 5));
        assert_eq!(lsf_slen(2 * 179, true), ([4, 5, 5, 0], 0));
        assert_eq!(lsf_slen(2 * 255, true), ([3, 2, 0, 0], 2));
    }

    #[test]
    fn verify_lsf_intensity_limits() {
        let mut channel = GranuleChannel {
            // Row 0, slen = [1, 0, 2, 0].
            scalefac_compress: 2 * (36 + 2),
            ..Default::default()
        };

        let buf = [0xff; 8];
        let mut bs = BitReaderLtr::new(&buf);

        assert_eq!(read_scale_factors_mpeg2(&mut bs, true, &mut channel).unwrap(), 7 + 14);
        assert!(!channel.preflag);

        assert_eq!(channel.scalefacs[..7], [1; 7]);
        assert_eq!(channel.scalefacs[7..14], [0; 7]);
        assert_eq!(channel.scalefacs[14..21], [3; 7]);

        assert_eq!(channel.is_pos_limit[..7], [1; 7]);
        assert_eq!(channel.is_pos_limit[7..14], [0; 7]);
        assert_eq!(channel.is_pos_limit[14..21], [3; 7]);
        assert_eq!(channel.is_pos_limit[21..], [3; 18]);
    }
}
