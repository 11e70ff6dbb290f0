// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `audio` module defines the channel layout and PCM output contract shared by all decoders.
//!
//! Every decoder writes interleaved 32-bit samples. Each sample holds a 16-bit PCM value in its
//! upper half (`pcm16 << 16`). Stereo output is ordered `[L, R, L, R, ...]`. Mono output is
//! duplicated into both slots, `[M, M, M, M, ...]`, so the output is always two channels wide.

use bitflags::bitflags;

use crate::errors::{limit_error, Result};

bitflags! {
    /// A bitmask representing the positional audio channels of a stream.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct Channels: u32 {
        /// Front-left (left) channel.
        const FRONT_LEFT   = 1 << 0;
        /// Front-right (right) channel.
        const FRONT_RIGHT  = 1 << 1;
        /// Front-centre (centre) or the mono channel.
        const FRONT_CENTRE = 1 << 2;
    }
}

impl Channels {
    /// Gets the number of channels.
    pub fn count(self) -> usize {
        self.bits().count_ones() as usize
    }

    /// Gets the channel layout for a given channel count, if supported.
    pub fn from_count(count: usize) -> Option<Channels> {
        match count {
            1 => Some(Channels::FRONT_CENTRE),
            2 => Some(Channels::FRONT_LEFT | Channels::FRONT_RIGHT),
            _ => None,
        }
    }
}

/// The number of interleaved output slots per sample frame.
pub const OUTPUT_CHANNELS: usize = 2;

/// The bit depth of decoded PCM.
pub const BITS_PER_SAMPLE: u32 = 16;

/// Convert a 16-bit PCM sample to the 32-bit output representation.
#[inline(always)]
pub fn pcm16_to_output(s: i16) -> i32 {
    i32::from(s) << 16
}

/// Interleave one or two planes of 16-bit PCM into `out`, returning the number of output samples
/// written.
///
/// A mono stream passes `None` for `right` and its samples are duplicated. `out` must hold at least
/// `2 * left.len()` samples.
pub fn interleave_pcm16(left: &[i16], right: Option<&[i16]>, out: &mut [i32]) -> Result<usize> {
    let n_out = OUTPUT_CHANNELS * left.len();

    if out.len() < n_out {
        return limit_error("output buffer too small");
    }

    match right {
        Some(right) => {
            debug_assert_eq!(left.len(), right.len());

            for ((o, &l), &r) in out.chunks_exact_mut(2).zip(left).zip(right) {
                o[0] = pcm16_to_output(l);
                o[1] = pcm16_to_output(r);
            }
        }
        None => {
            for (o, &m) in out.chunks_exact_mut(2).zip(left) {
                o[0] = pcm16_to_output(m);
                o[1] = pcm16_to_output(m);
            }
        }
    }

    Ok(n_out)
}
