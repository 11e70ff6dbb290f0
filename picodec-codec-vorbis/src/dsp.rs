// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::min;

use picodec_core::dsp::mdct::Imdct;
use picodec_core::errors::Result;
use picodec_core::util::alloc::try_boxed_slice;
use picodec_core::util::clamp::clamp_i16;
use picodec_core::util::fixed::{mul_q31, mult31_shift15};

use super::residue::ResidueScratch;
use super::window::Windows;

pub struct Dsp {
    /// DSP channels.
    pub channels: Vec<DspChannel>,
    /// Residue scratch-pad.
    pub residue_scratch: ResidueScratch,
    /// IMDCT for short-blocks.
    pub imdct_short: Imdct,
    /// IMDCT for long-blocks.
    pub imdct_long: Imdct,
    /// Windows for overlap-add.
    pub windows: Windows,
    /// The block size of the previous packet, if there was one.
    pub prev_block_size: Option<usize>,
}

impl Dsp {
    pub fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.reset();
        }

        self.prev_block_size = None;
    }
}

pub struct DspChannel {
    /// The channel floor buffer. Holds the spectrum after `apply_floor`.
    pub floor: Box<[i32]>,
    /// The channel residue buffer, in Q8.
    pub residue: Box<[i32]>,
    /// Do not decode!
    pub do_not_decode: bool,
    /// The floor of this channel is unused in the current packet.
    pub floor_unused: bool,
    /// The output of the IMDCT.
    imdct_out: Box<[i32]>,
    /// The un-windowed right-half of the previous block.
    overlap: Box<[i32]>,
    /// Synthesized PCM.
    pub pcm: Box<[i16]>,
}

impl DspChannel {
    pub fn try_new(bs1_exp: u8) -> Result<Self> {
        let n = (1 << bs1_exp) >> 1;

        Ok(DspChannel {
            floor: try_boxed_slice(n, 0)?,
            residue: try_boxed_slice(n, 0)?,
            do_not_decode: false,
            floor_unused: false,
            imdct_out: try_boxed_slice(2 * n, 0)?,
            overlap: try_boxed_slice(n, 0)?,
            pcm: try_boxed_slice(n, 0)?,
        })
    }

    /// Multiplies the floor curve (Q31) by the residue (Q8) to produce the spectrum in Q24. The
    /// spectrum is silent if the floor is unused.
    pub fn apply_floor(&mut self, n: usize) {
        let floor = &mut self.floor[..n];

        if self.floor_unused {
            floor.fill(0);
        }
        else {
            for (f, &r) in floor.iter_mut().zip(&self.residue[..n]) {
                *f = mult31_shift15(r, *f);
            }
        }
    }

    /// Synthesizes PCM for a block of `blk_len` samples. The spectrum must already be in the
    /// floor buffer.
    ///
    /// Returns the number of samples written to `pcm`. These span the centre of the previous
    /// block to the centre of this block, so the first block after a reset yields none.
    pub fn synth(
        &mut self,
        blk_len: usize,
        prev_blk_len: Option<usize>,
        windows: &Windows,
        imdct: &mut Imdct,
    ) -> usize {
        let n2 = blk_len >> 1;

        imdct.imdct(&self.floor[..n2], &mut self.imdct_out[..blk_len]);

        let count = match prev_blk_len {
            Some(prev_blk_len) => {
                let slope = windows.slope(min(prev_blk_len, blk_len));

                overlap_add(
                    &self.overlap[..prev_blk_len >> 1],
                    &self.imdct_out[..n2],
                    slope,
                    &mut self.pcm,
                )
            }
            None => 0,
        };

        // The right-half is windowed once the size of the next block is known.
        self.overlap[..n2].copy_from_slice(&self.imdct_out[n2..blk_len]);

        count
    }

    pub fn reset(&mut self) {
        // Clear the overlap buffer. Nothing else is used across packets.
        self.overlap.fill(0);
    }
}

/// Windows and overlap-adds the right-half of the previous block, `prev`, with the left-half of
/// the current block, `cur`. The overlap region has the length of `slope` and is centred on the
/// 3/4 point of the previous block and the 1/4 point of the current block.
///
/// Outside the overlap region the window is either unity or zero, so samples are copied or
/// ignored. Returns the number of samples written.
fn overlap_add(prev: &[i32], cur: &[i32], slope: &[i32], out: &mut [i16]) -> usize {
    let pn4 = prev.len() >> 1;
    let n4 = cur.len() >> 1;
    let sl = slope.len();

    let count = pn4 + n4;

    let lap_start = pn4 - sl / 2;
    let lap_end = pn4 + sl / 2;

    // The current block is offset from the previous block such that their quarter points align.
    let cur_offset = n4 as isize - pn4 as isize;

    let out = &mut out[..count];

    for (o, &s) in out[..lap_start].iter_mut().zip(prev) {
        *o = to_pcm16(s);
    }

    for (k, o) in out[lap_start..lap_end].iter_mut().enumerate() {
        let t = lap_start + k;

        let p = mul_q31(prev[t], slope[sl - 1 - k]);
        let c = mul_q31(cur[(t as isize + cur_offset) as usize], slope[k]);

        *o = to_pcm16(p.saturating_add(c));
    }

    let cur_start = (lap_end as isize + cur_offset) as usize;

    for (o, &s) in out[lap_end..].iter_mut().zip(&cur[cur_start..]) {
        *o = to_pcm16(s);
    }

    count
}

/// Converts a Q24 sample to 16-bit PCM with rounding and saturation.
#[inline(always)]
fn to_pcm16(s: i32) -> i16 {
    clamp_i16(s.saturating_add(1 << 8) >> 9)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts;

    #[test]
    fn verify_to_pcm16() {
        assert_eq!(to_pcm16(0), 0);
        assert_eq!(to_pcm16(1 << 23), 16384);
        assert_eq!(to_pcm16(-(1 << 23)), -16384);
        assert_eq!(to_pcm16(1 << 24), i16::MAX);
        assert_eq!(to_pcm16(i32::MIN), i16::MIN);
    }

    #[test]
    fn verify_overlap_add_regions() {
        let windows = Windows::new(16, 64);

        // A long block followed by a short block.
        let prev = [1 << 22; 32];
        let cur = [-(1 << 22); 8];
        let mut out = [0i16; 32];

        let count = overlap_add(&prev, &cur, windows.slope(16), &mut out);
        assert_eq!(count, 20);

        // The previous block alone until 4 samples before its 3/4 point.
        assert!(out[..12].iter().all(|&s| s == 8192));
        assert!(out[12..16].iter().all(|&s| s > 0));
        assert!(out[16..20].iter().all(|&s| s < 0));

        // A short block followed by a long block is all overlap then the current block.
        let count = overlap_add(&cur, &prev, windows.slope(16), &mut out);
        assert_eq!(count, 20);
        assert!(out[..4].iter().all(|&s| s < 0));
        assert!(out[4..8].iter().all(|&s| s > 0));
        assert!(out[8..20].iter().all(|&s| s == 8192));
    }

    /// The window of a block of size `n` between blocks of size `pn` and `nn`.
    fn window(n: usize, pn: usize, nn: usize) -> Vec<f64> {
        let slope = |sl: usize, k: usize| {
            let frac = consts::FRAC_PI_2 * (k as f64 + 0.5) / sl as f64;
            (consts::FRAC_PI_2 * frac.sin().powi(2)).sin()
        };

        let mut w = vec![0.0; n];

        let sl = min(pn, n) / 2;
        for (i, w) in w[..n / 2].iter_mut().enumerate() {
            let start = n / 4 - sl / 2;
            *w = if i < start { 0.0 } else if i < start + sl { slope(sl, i - start) } else { 1.0 };
        }

        let sl = min(nn, n) / 2;
        for (i, w) in w[n / 2..].iter_mut().enumerate() {
            let start = n / 4 - sl / 2;
            *w = if i < start {
                1.0
            }
            else if i < start + sl {
                slope(sl, sl - 1 - (i - start))
            }
            else {
                0.0
            };
        }

        w
    }

    fn signal(t: isize) -> f64 {
        let t = t as f64;
        0.5 * (t * 0.071).sin() + 0.25 * (t * 0.0193 + 1.0).cos()
    }

    #[test]
    fn verify_reconstruction() {
        let sizes = [64usize, 256, 64, 64, 256, 256, 64];

        let windows = Windows::new(64, 256);
        let mut imdct_short = Imdct::new(32);
        let mut imdct_long = Imdct::new(128);

        let mut channel = DspChannel::try_new(8).unwrap();

        let mut centre = 32isize;
        let mut prev: Option<usize> = None;

        for (b, &n) in sizes.iter().enumerate() {
            if let Some(pn) = prev {
                centre += (pn / 4 + n / 4) as isize;
            }

            let start = centre - (n / 2) as isize;
            let pn = prev.unwrap_or(n);
            let nn = sizes.get(b + 1).copied().unwrap_or(n);
            let w = window(n, pn, nn);

            // Forward MDCT of the windowed signal, scaled for unity reconstruction.
            let n2 = n / 2;
            for k in 0..n2 {
                let x: f64 = (0..n)
                    .map(|i| {
                        let phase = 2.0 * consts::PI / n as f64
                            * (i as f64 + 0.5 + n as f64 / 4.0)
                            * (k as f64 + 0.5);
                        w[i] * signal(start + i as isize) * phase.cos()
                    })
                    .sum();

                channel.floor[k] = (x * 4.0 / n as f64 * f64::from(1 << 24)).round() as i32;
            }

            let imdct = if n == 64 { &mut imdct_short } else { &mut imdct_long };

            let count = channel.synth(n, prev, &windows, imdct);

            match prev {
                Some(pn) => {
                    assert_eq!(count, pn / 4 + n / 4);

                    let first = centre - count as isize;

                    for (i, &s) in channel.pcm[..count].iter().enumerate() {
                        let expected = signal(first + i as isize) * 32768.0;
                        assert!(
                            (f64::from(s) - expected).abs() < 4.0,
                            "block={} i={} actual={} expected={}",
                            b,
                            i,
                            s,
                            expected
                        );
                    }
                }
                None => assert_eq!(count, 0),
            }

            prev = Some(n);
        }
    }

    #[test]
    fn verify_apply_floor() {
        let mut channel = DspChannel::try_new(6).unwrap();

        channel.floor[..4].copy_from_slice(&[1 << 30, 1 << 30, i32::MAX, 0]);
        channel.residue[..4].copy_from_slice(&[1 << 8, -(3 << 8), 1 << 8, 5 << 8]);
        channel.apply_floor(4);

        // 0.5 * 1.0, 0.5 * -3.0, ~1.0 * 1.0, and 0 * 5.0 in Q24.
        assert_eq!(&channel.floor[..2], &[1 << 23, -(3 << 23)]);
        assert!(((1 << 24) - channel.floor[2]).abs() <= 1);
        assert_eq!(channel.floor[3], 0);

        channel.floor[..4].fill(1 << 30);
        channel.floor_unused = true;
        channel.apply_floor(4);
        assert!(channel.floor[..4].iter().all(|&s| s == 0));
    }
}
