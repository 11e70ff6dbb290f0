// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use picodec_core::errors::{decode_error, Result};
use picodec_core::io::{BitReaderLtr, ReadBitsLtr};
use picodec_core::util::bits::sign_extend_leq32_to_i32;
use picodec_core::util::clamp::clamp_i32;
use picodec_core::util::fixed::to_fixed;

use crate::common::*;
use crate::header::verify_frame_crc;
use crate::synthesis;

use lazy_static::lazy_static;

/// The number of samples per sub-band in a layer 1 frame.
const SAMPLES_PER_SUB_BAND: usize = 12;

lazy_static! {
    /// Dequantization factors in Q30, indexed by the sample bit length.
    static ref FACTOR: [i64; 16] = {
        let mut factor = [0; 16];

        for (i, factor) in factor.iter_mut().enumerate().skip(2) {
            // As per ISO/IEC 11172-3, given the nb-bit signed raw sample, val, dequantization is
            // defined as follows.
            //
            // fractional = val / 2^(nb - 1)
            // dequantized = (2^nb) / (2^nb - 1) * (fractional * 2^(-nb + 1))
            //
            // After combining, expanding, and simplifying the above equations, the complete
            // calculation can be expressed as below.
            //
            // [(2^nb) / ((2^nb) - 1)] * 2^(-nb + 1) * (val + 1)
            // -------------------------------------
            //                 factor
            //
            // Therefore, dequantization can be reduced to a single multiplication and addition.
            // This lookup table generator computes factor for nb-bits between 2..15, inclusive.
            let a = f64::from(1u32 << i);
            let b = f64::from(1u32 << (i - 1));

            *factor = i64::from(to_fixed((a / (a - 1.0)) * b.recip(), 30));
        }

        factor
    };
}

lazy_static! {
    /// Scale factors, `2.0 * 2^(-i/3)`, in Q29. Index 63 is invalid.
    static ref SCALEFACTORS: [i64; 63] = {
        let mut scalefactors = [0; 63];

        for (i, sf) in scalefactors.iter_mut().enumerate() {
            *sf = i64::from(to_fixed(2.0 * f64::powf(2.0, -(i as f64) / 3.0), 29));
        }

        scalefactors
    };
}

/// Dequantize and scale a sample, `raw`, of length `bits` bits. Returns a Q25 sample.
#[inline(always)]
fn dequantize(bits: u32, raw: u32, scalefactor: i64) -> i32 {
    // Invert the most significant bit.
    let inv = raw ^ 1 << (bits - 1);

    // Sign extend the sample.
    let a = sign_extend_leq32_to_i32(inv, bits);

    // Q30 x Q29 = Q59.
    let product = FACTOR[bits as usize] * i64::from(a + 1) * scalefactor;

    clamp_i32((product + (1 << 33)) >> 34)
}

/// Reads a 4-bit allocation code. Returns the sample bit length, or 0 if no bits are allocated.
fn read_allocation<B: ReadBitsLtr>(bs: &mut B) -> Result<u8> {
    let bits = bs.read_bits_leq32(4)? as u8;

    if bits > 0xe {
        return decode_error("mp1: invalid bit allocation");
    }

    Ok(if bits != 0 { bits + 1 } else { 0 })
}

/// Layer 1 decoder state.
pub struct Layer1 {
    synthesis: [synthesis::SynthesisState; 2],
}

impl Layer1 {
    pub fn new() -> Self {
        Self { synthesis: Default::default() }
    }

    pub fn reset(&mut self) {
        self.synthesis = Default::default();
    }

    /// Decode a layer 1 frame into planar 16-bit PCM.
    ///
    /// `frame` holds the complete frame starting at its header. Channel `ch` is written to
    /// `out[ch * MAX_SAMPLES_PER_FRAME..]`.
    pub fn decode_frame(
        &mut self,
        frame: &[u8],
        header: &FrameHeader,
        verify_crc: bool,
        out: &mut [i16],
    ) -> Result<()> {
        let num_channels = header.n_channels();

        let bound = match header.channel_mode {
            ChannelMode::JointStereo(Mode::Intensity { bound }) => bound as usize,
            ChannelMode::JointStereo(Mode::Layer3 { .. }) => {
                return decode_error("mp1: invalid mode extension for layer 1");
            }
            _ => 32,
        };

        if header.has_crc && verify_crc {
            // The CRC protects the bit allocations.
            let alloc_bits = 4 * (num_channels * bound + (32 - bound));
            verify_frame_crc(frame, alloc_bits >> 3)?;
        }

        let mut bs = BitReaderLtr::new(frame.get(header.header_len()..).unwrap_or_default());

        let mut alloc = [[0u8; 32]; 2];
        let mut scalefacs = [[0i64; 32]; 2];

        // Read bit allocations for each non-intensity coded sub-bands.
        for sb in 0..bound {
            for chan in &mut alloc[..num_channels] {
                chan[sb] = read_allocation(&mut bs)?;
            }
        }

        // Read bit allocations for the intensity coded sub-bands.
        for sb in bound..32 {
            let bits = read_allocation(&mut bs)?;

            alloc[0][sb] = bits;
            alloc[1][sb] = bits;
        }

        // Read scalefactors for each sub-band.
        for sb in 0..32 {
            for ch in 0..num_channels {
                if alloc[ch][sb] != 0 {
                    let index = bs.read_bits_leq32(6)? as usize;

                    scalefacs[ch][sb] = match SCALEFACTORS.get(index) {
                        Some(&sf) => sf,
                        None => return decode_error("mp1: invalid scalefactor"),
                    };
                }
            }
        }

        // Decode samples.
        let mut samples = [[0i32; 32 * SAMPLES_PER_SUB_BAND]; 2];

        for s in 0..SAMPLES_PER_SUB_BAND {
            // Non-intensity coded sub-bands.
            for sb in 0..bound {
                for ch in 0..num_channels {
                    let bits = u32::from(alloc[ch][sb]);

                    if bits != 0 {
                        let raw = bs.read_bits_leq32(bits)?;

                        samples[ch][SAMPLES_PER_SUB_BAND * sb + s] =
                            dequantize(bits, raw, scalefacs[ch][sb]);
                    }
                }
            }

            // Intensity coded sub-bands.
            for sb in bound..32 {
                let bits = u32::from(alloc[0][sb]);

                if bits != 0 {
                    let raw = bs.read_bits_leq32(bits)?;

                    // The sample is shared, but each channel has its own scale factor.
                    for ch in 0..num_channels {
                        samples[ch][SAMPLES_PER_SUB_BAND * sb + s] =
                            dequantize(bits, raw, scalefacs[ch][sb]);
                    }
                }
            }
        }

        let n_frames = 32 * SAMPLES_PER_SUB_BAND;

        for (ch, samples) in samples.iter().enumerate().take(num_channels) {
            // Perform polyphase synthesis and generate PCM samples.
            let start = ch * MAX_SAMPLES_PER_FRAME;

            synthesis::synthesis(
                &mut self.synthesis[ch],
                SAMPLES_PER_SUB_BAND,
                samples,
                &mut out[start..start + n_frames],
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::parse_frame_header_word;
    use crate::testutil::BitWriter;
    use picodec_core::errors::Error;

    /// MPEG1 layer 1, 32 kbps, 44.1 kHz, mono. 32 bytes per frame.
    const MONO_HEADER: u32 = 0xffff_10c0;

    /// Builds a mono frame with one allocated sub-band.
    fn mono_frame(alloc: u32, scalefactor: u32, raw: u32) -> Vec<u8> {
        let mut w = BitWriter::new();

        w.write(MONO_HEADER, 32);

        w.write(alloc, 4);
        for _ in 1..32 {
            w.write(0, 4);
        }

        w.write(scalefactor, 6);

        for _ in 0..SAMPLES_PER_SUB_BAND {
            w.write(raw, alloc + 1);
        }

        let mut frame = w.into_bytes();
        frame.resize(32, 0);
        frame
    }

    fn decode(layer: &mut Layer1, frame: &[u8], out: &mut [i16]) -> Result<()> {
        let header = parse_frame_header_word(MONO_HEADER).unwrap();
        assert_eq!(header.frame_size, 32);

        layer.decode_frame(frame, &header, true, out)
    }

    #[test]
    fn verify_dequantize() {
        // 2 bit samples with a scale factor of 2.0: -2/3, 0, and +2/3 of full scale x 2.0.
        let sf = SCALEFACTORS[0];

        assert_eq!(dequantize(2, 0, sf), -44_739_243);
        assert_eq!(dequantize(2, 1, sf), 0);
        assert_eq!(dequantize(2, 2, sf), 44_739_243);

        // 4 bit sample 14 (7/8 x 16/15) with a scale factor of 0.125.
        assert_eq!(dequantize(4, 14, SCALEFACTORS[12]), 3_914_684);

        // The extremes of 15 bit samples are symmetric.
        assert_eq!(dequantize(15, 0, sf), -67_106_816);
        assert_eq!(dequantize(15, (1 << 15) - 2, sf), 67_106_816);
    }

    #[test]
    fn verify_decode_silent_frame() {
        let mut layer = Layer1::new();
        let mut out = vec![1i16; 2 * MAX_SAMPLES_PER_FRAME];

        decode(&mut layer, &mono_frame(0, 0, 0), &mut out).unwrap();

        assert!(out[..384].iter().all(|&s| s == 0));
        assert!(out[384..].iter().all(|&s| s == 1));
    }

    #[test]
    fn verify_decode_is_deterministic() {
        let frame = mono_frame(3, 12, 14);

        let mut outputs = Vec::new();

        for _ in 0..2 {
            let mut layer = Layer1::new();
            let mut out = vec![0i16; 2 * MAX_SAMPLES_PER_FRAME];

            for _ in 0..2 {
                decode(&mut layer, &frame, &mut out).unwrap();
                outputs.push(out[..384].to_vec());
            }
        }

        assert!(outputs[1].iter().any(|&s| s != 0));
        assert_eq!(outputs[..2], outputs[2..]);
    }

    #[test]
    fn verify_invalid_allocation_and_scalefactor() {
        let mut layer = Layer1::new();
        let mut out = vec![0i16; 2 * MAX_SAMPLES_PER_FRAME];

        let mut frame = mono_frame(0, 0, 0);
        frame[4] = 0xf0;

        assert!(matches!(decode(&mut layer, &frame, &mut out), Err(Error::DecodeError(_))));

        let frame = mono_frame(3, 63, 0);

        assert!(matches!(decode(&mut layer, &frame, &mut out), Err(Error::DecodeError(_))));
    }
}
