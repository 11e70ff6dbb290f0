// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::max;
use std::f64;

use picodec_core::errors::{decode_error, Result};
use picodec_core::util::fixed::{guard_bits, mul_shift_round, to_fixed};

use lazy_static::lazy_static;

use super::Granule;
use crate::common::*;

/// The illegal intensity position for MPEG1 bitstreams. Ratios are only specified for
/// `is_pos < 7`.
const INTENSITY_INV_POS_MPEG1: u8 = 7;

/// The number of fractional bits of the intensity stereo ratios.
const RATIO_FRAC_BITS: u32 = 30;

/// A pair of (left, right) intensity stereo ratios in Q30.
type Ratios = (i32, i32);

lazy_static! {
    /// (Left, right) channel ratios for MPEG1 intensity stereo, indexed by whether mid-side
    /// stereo is also enabled, and then by is_pos.
    ///
    /// As per ISO/IEC 11172-3:
    ///
    /// ```text
    /// is_ratio = tan(is_pos * PI/12)
    /// k_l      = is_ratio / (1 + is_ratio)
    /// k_r      =        1 / (1 + is_ratio)
    /// ```
    ///
    /// When mid-side stereo is enabled, channel 0 was requantized with an extra 1/sqrt(2) gain
    /// which the ratios undo.
    static ref INTENSITY_STEREO_RATIOS_MPEG1: [[Ratios; 7]; 2] = {
        const PI_12: f64 = f64::consts::PI / 12.0;

        let to_q30 = |x: f64| to_fixed(x, RATIO_FRAC_BITS);

        let mut ratios = [[(0, 0); 7]; 2];

        for (table, scale) in ratios.iter_mut().zip([1.0, f64::consts::SQRT_2]) {
            for (is_pos, ratio) in table.iter_mut().enumerate() {
                let (k_l, k_r) = if is_pos == 6 {
                    (1.0, 0.0)
                }
                else {
                    let is_ratio = (PI_12 * is_pos as f64).tan();
                    (is_ratio / (1.0 + is_ratio), 1.0 / (1.0 + is_ratio))
                };

                *ratio = (to_q30(scale * k_l), to_q30(scale * k_r));
            }
        }

        ratios
    };
}

lazy_static! {
    /// (Left, right) channel ratios for MPEG2 intensity stereo, indexed by whether mid-side
    /// stereo is also enabled, then by `scalefac_compress & 1`, and then by is_pos.
    ///
    /// As per ISO/IEC 13818-3:
    ///
    /// ```text
    /// If...            | k_l                     | k_r
    /// -----------------+-------------------------+-------------------
    /// is_pos     == 0  | 1.0                     | 1.0
    /// is_pos & 1 == 1  | i0 ^ [(is_pos + 1) / 2] | 1.0
    /// is_pos & 1 == 0  | 1.0                     | i0 ^ (is_pos / 2)
    /// ```
    ///
    /// Where i0 is 1/sqrt(sqrt(2)) if `scalefac_compress & 1 == 0`, or 1/sqrt(2) otherwise.
    static ref INTENSITY_STEREO_RATIOS_MPEG2: [[[Ratios; 32]; 2]; 2] = {
        let is_scale = [1.0 / f64::sqrt(f64::consts::SQRT_2), f64::consts::FRAC_1_SQRT_2];

        let to_q30 = |x: f64| to_fixed(x, RATIO_FRAC_BITS);

        let mut ratios = [[[(0, 0); 32]; 2]; 2];

        for (tables, scale) in ratios.iter_mut().zip([1.0, f64::consts::SQRT_2]) {
            for (table, i0) in tables.iter_mut().zip(is_scale) {
                for (is_pos, ratio) in table.iter_mut().enumerate() {
                    let (k_l, k_r) = if is_pos & 1 != 0 {
                        (f64::powf(i0, (is_pos + 1) as f64 / 2.0), 1.0)
                    }
                    else {
                        (1.0, f64::powf(i0, is_pos as f64 / 2.0))
                    };

                    *ratio = (to_q30(scale * k_l), to_q30(scale * k_r));
                }
            }
        }

        ratios
    };
}

/// The intensity positions of the bands of a granule and their illegal values.
struct IntensityPositions<'a> {
    ratios: &'a [Ratios],
    is_pos: [u8; 39],
    limit: [u8; 39],
    mid_side: bool,
}

impl IntensityPositions<'_> {
    /// The position of the highest band is not coded. Copy it, and its limit, from the band
    /// below. `n` is the number of bands and `width` the number of windows per band.
    fn copy_last_band(&mut self, n: usize, width: usize) {
        self.is_pos.copy_within(n - 2 * width..n - width, n - width);
        self.limit.copy_within(n - 2 * width..n - width, n - width);
    }

    /// Processes band `sfi` of the intensity coded signal in channel 0 into left and right
    /// channels. An illegal position falls back to mid-side stereo if enabled, otherwise the band
    /// passes through.
    fn process(&self, sfi: usize, ch0: &mut [i32], ch1: &mut [i32]) {
        let is_pos = self.is_pos[sfi];

        match self.ratios.get(usize::from(is_pos)) {
            Some(&(ratio_l, ratio_r)) if is_pos != self.limit[sfi] => {
                for (l, r) in ch0.iter_mut().zip(ch1) {
                    let is = *l;
                    *l = mul_shift_round(is, ratio_l, RATIO_FRAC_BITS);
                    *r = mul_shift_round(is, ratio_r, RATIO_FRAC_BITS);
                }
            }
            _ if self.mid_side => process_mid_side(ch0, ch1),
            _ => (),
        }
    }
}

/// Decorrelates mid and side channels into left and right channels.
///
/// The 1/sqrt(2) normalization was applied during requantization, leaving:
///
/// ```text
///      l[i] = m[i] + s[i]
///      r[i] = m[i] - s[i]
/// ```
fn process_mid_side(mid: &mut [i32], side: &mut [i32]) {
    debug_assert!(mid.len() == side.len());

    for (m, s) in mid.iter_mut().zip(side) {
        let left = m.saturating_add(*s);
        let right = m.saturating_sub(*s);
        *m = left;
        *s = right;
    }
}

#[inline(always)]
fn is_zero_band(band: &[i32]) -> bool {
    band.iter().all(|&x| x == 0)
}

/// Decodes all intensity stereo coded bands of a long block working down from the highest band,
/// and returns the intensity bound.
fn process_intensity_long_block(
    bands: &[usize],
    positions: &IntensityPositions<'_>,
    rzero: usize,
    max_bound: usize,
    ch0: &mut [i32; 576],
    ch1: &mut [i32; 576],
) -> usize {
    let mut bound = max_bound;

    for (sfi, (&start, &end)) in bands.iter().zip(&bands[1..]).enumerate().rev() {
        // Bands starting at or above rzero are always 0, bands below it must be checked.
        if start < rzero && !is_zero_band(&ch1[start..end]) {
            break;
        }

        positions.process(sfi, &mut ch0[start..end], &mut ch1[start..end]);

        bound = start;
    }

    bound
}

/// Decodes all intensity stereo coded bands of a short, or mixed, block and returns the intensity
/// bound.
///
/// The bands of a short block interleave three windows. Each window has its own intensity bound,
/// found by working down from the highest band until the right channel window is non-zero.
/// Windows below their bound are processed with mid-side stereo, if enabled. The long bands of a
/// mixed block are only considered once every window has reached the lowest short band.
fn process_intensity_short_block(
    short_bands: &[usize],
    long_bands: &[usize],
    positions: &IntensityPositions<'_>,
    max_bound: usize,
    ch0: &mut [i32; 576],
    ch1: &mut [i32; 576],
) -> usize {
    let n_long = long_bands.len().saturating_sub(1);

    let mut window_is_zero = [true; 3];
    let mut bound = max_bound;

    let windows = short_bands.windows(4).step_by(3).enumerate().rev();

    for (band, w) in windows {
        let sfi = n_long + 3 * band;

        for win in (0..3).rev() {
            let (start, end) = (w[win], w[win + 1]);

            window_is_zero[win] = window_is_zero[win] && is_zero_band(&ch1[start..end]);

            if window_is_zero[win] {
                positions.process(sfi + win, &mut ch0[start..end], &mut ch1[start..end]);
            }
            else if positions.mid_side {
                process_mid_side(&mut ch0[start..end], &mut ch1[start..end]);
            }
        }

        bound = w[0];

        // Once every window is non-zero, the remaining bands are mid-side or plain stereo.
        if window_is_zero.iter().all(|&zero| !zero) {
            return bound;
        }
    }

    // The long bands of a mixed block follow the rules of a long block.
    for (sfi, w) in long_bands.windows(2).enumerate().rev() {
        let (start, end) = (w[0], w[1]);

        if !is_zero_band(&ch1[start..end]) {
            break;
        }

        positions.process(sfi, &mut ch0[start..end], &mut ch1[start..end]);

        bound = start;
    }

    bound
}

/// Perform joint stereo decoding on the channel pair.
pub(super) fn stereo(
    header: &FrameHeader,
    granule: &mut Granule,
    ch: &mut [[i32; 576]; 2],
) -> Result<()> {
    let (mid_side, intensity) = match header.channel_mode {
        ChannelMode::JointStereo(Mode::Layer3 { mid_side, intensity }) => (mid_side, intensity),
        ChannelMode::JointStereo(Mode::Intensity { .. }) => {
            return decode_error("mp3: invalid mode extension for layer 3");
        }
        _ => return Ok(()),
    };

    if granule.channels[0].block_type != granule.channels[1].block_type {
        return decode_error("mp3: stereo channel pair block_type mismatch");
    }

    let [ch0, ch1] = ch;

    let end = max(granule.channels[0].rzero, granule.channels[1].rzero);

    let is_bound = if intensity {
        let right = &granule.channels[1];

        let (ratios, limit) = if header.is_mpeg1() {
            let ratios = &INTENSITY_STEREO_RATIOS_MPEG1[usize::from(mid_side)][..];
            (ratios, [INTENSITY_INV_POS_MPEG1; 39])
        }
        else {
            let is_scale = usize::from(right.scalefac_compress & 1);
            let ratios = &INTENSITY_STEREO_RATIOS_MPEG2[usize::from(mid_side)][is_scale][..];
            (ratios, right.is_pos_limit)
        };

        let mut positions =
            IntensityPositions { ratios, is_pos: right.scalefacs, limit, mid_side };

        let sample_rate_idx = header.sample_rate_idx;

        match right.block_type {
            BlockType::Short { is_mixed } => {
                let (long_bands, short_bands) = if is_mixed {
                    let bands = SFB_MIXED_BANDS[sample_rate_idx];
                    let switch = SFB_MIXED_SWITCH_POINT[sample_rate_idx];
                    (&bands[..=switch], &bands[switch..])
                }
                else {
                    (&[][..], &SFB_SHORT_BANDS[sample_rate_idx][..])
                };

                let n = long_bands.len().saturating_sub(1) + short_bands.len() - 1;
                positions.copy_last_band(n, 3);

                process_intensity_short_block(short_bands, long_bands, &positions, end, ch0, ch1)
            }
            _ => {
                positions.copy_last_band(22, 1);

                let bands = &SFB_LONG_BANDS[sample_rate_idx];
                process_intensity_long_block(bands, &positions, right.rzero, end, ch0, ch1)
            }
        }
    }
    else {
        // Without intensity stereo every sample up-to the end of the non-zero region is mid-side.
        end
    };

    if mid_side && is_bound > 0 {
        process_mid_side(&mut ch0[..is_bound], &mut ch1[..is_bound]);
    }

    // After joint stereo decoding both channels share the same non-zero region.
    for (channel, samples) in granule.channels.iter_mut().zip([&*ch0, &*ch1]) {
        channel.rzero = end;
        channel.guard_bits = guard_bits(&samples[..end]);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::parse_frame_header_word;
    use crate::layer3::GranuleChannel;

    fn granule(rzero: [usize; 2], block_type: BlockType) -> Granule {
        let channel = |rzero| GranuleChannel { rzero, block_type, ..Default::default() };
        Granule { channels: [channel(rzero[0]), channel(rzero[1])] }
    }

    #[test]
    fn verify_mid_side() {
        // Joint stereo, mid-side only.
        let header = parse_frame_header_word(0xfffb_9064).unwrap();

        let mut samples = [[0i32; 576]; 2];
        samples[0][..3].copy_from_slice(&[100, -50, i32::MAX]);
        samples[1][..3].copy_from_slice(&[20, 10, 1]);

        let mut granule = granule([3, 3], BlockType::Long);
        stereo(&header, &mut granule, &mut samples).unwrap();

        assert_eq!(samples[0][..3], [120, -40, i32::MAX]);
        assert_eq!(samples[1][..3], [80, -60, i32::MAX - 1]);
    }

    #[test]
    fn verify_intensity_long_block() {
        // Joint stereo, intensity only.
        let header = parse_frame_header_word(0xfffb_9054).unwrap();

        let mut samples = [[0i32; 576]; 2];
        samples[0][..8].fill(1 << 20);
        samples[1][..4].fill(1 << 10);

        let mut granule = granule([8, 4], BlockType::Long);

        // Band 1 (samples 4..8) has is_pos 6, or all signal to the left channel. Band 2 and up
        // have is_pos 0, or all signal to the right channel.
        granule.channels[1].scalefacs[1] = 6;

        stereo(&header, &mut granule, &mut samples).unwrap();

        // Band 0 is not intensity coded.
        assert!(samples[0][..4].iter().all(|&s| s == 1 << 20));
        assert!(samples[1][..4].iter().all(|&s| s == 1 << 10));
        // Band 1.
        assert!(samples[0][4..8].iter().all(|&s| s == 1 << 20));
        assert!(samples[1][4..8].iter().all(|&s| s == 0));

        assert_eq!(granule.channels[0].rzero, 8);
        assert_eq!(granule.channels[1].rzero, 8);
        assert_eq!(granule.channels[1].guard_bits, 20);
    }

    #[test]
    fn verify_intensity_illegal_position_passes_through() {
        let header = parse_frame_header_word(0xfffb_9054).unwrap();

        let mut samples = [[0i32; 576]; 2];
        samples[0][..4].fill(1 << 20);

        let mut granule = granule([4, 0], BlockType::Long);
        granule.channels[1].scalefacs[0] = INTENSITY_INV_POS_MPEG1;

        stereo(&header, &mut granule, &mut samples).unwrap();

        assert!(samples[0][..4].iter().all(|&s| s == 1 << 20));
        assert!(samples[1][..4].iter().all(|&s| s == 0));
    }

    #[test]
    fn verify_intensity_mpeg2_limit() {
        // MPEG2, 22.05 kHz, joint stereo with intensity and mid-side.
        let header = parse_frame_header_word(0xfff3_9074).unwrap();
        assert!(!header.is_mpeg1());
        assert!(header.is_intensity_stereo() && header.is_mid_side_stereo());

        let mut samples = [[0i32; 576]; 2];
        samples[0][..12].fill(1 << 20);

        let mut granule = granule([12, 0], BlockType::Long);

        // Band 0 (6 samples wide) is at the illegal position for a 2-bit scale factor, band 1 is
        // at position 0 which splits the signal equally.
        granule.channels[1].scalefacs[0] = 3;
        granule.channels[1].is_pos_limit = [3; 39];

        stereo(&header, &mut granule, &mut samples).unwrap();

        // The illegal band is processed as mid-side.
        assert!(samples[0][..6].iter().all(|&s| s == 1 << 20));
        assert!(samples[1][..6].iter().all(|&s| s == 1 << 20));

        // Position 0 has unit ratios, scaled by sqrt(2) to undo the mid-side gain.
        let sqrt_2 = i64::from(to_fixed(f64::consts::SQRT_2, 30));
        let expected = ((1i64 << 20) * sqrt_2 + (1 << 29)) >> 30;

        assert!(samples[0][6..12].iter().all(|&s| i64::from(s) == expected));
        assert!(samples[1][6..12].iter().all(|&s| i64::from(s) == expected));
    }

    #[test]
    fn verify_intensity_short_block_windows() {
        let header = parse_frame_header_word(0xfffb_9054).unwrap();

        let bands = &SFB_SHORT_BANDS[header.sample_rate_idx];

        let mut samples = [[0i32; 576]; 2];
        samples[0][..bands[39]].fill(1 << 20);

        // Window 1 of the last band is non-zero in the right channel. All other windows are
        // intensity coded at is_pos 6.
        let (start, end) = (bands[37], bands[38]);
        samples[1][start..end].fill(1);

        let mut granule = granule([576, end], BlockType::Short { is_mixed: false });
        granule.channels[1].scalefacs = [6; 39];

        stereo(&header, &mut granule, &mut samples).unwrap();

        // The non-zero window passes through untouched.
        assert!(samples[0][start..end].iter().all(|&s| s == 1 << 20));
        assert!(samples[1][start..end].iter().all(|&s| s == 1));

        // Every other window was intensity coded.
        assert!(samples[1][..start].iter().all(|&s| s == 0));
        assert!(samples[1][end..].iter().all(|&s| s == 0));
    }

    #[test]
    fn verify_block_type_mismatch() {
        let header = parse_frame_header_word(0xfffb_9064).unwrap();

        let mut samples = [[0i32; 576]; 2];
        let mut granule = granule([0, 0], BlockType::Long);
        granule.channels[1].block_type = BlockType::Start;

        assert!(stereo(&header, &mut granule, &mut samples).is_err());
    }
}
