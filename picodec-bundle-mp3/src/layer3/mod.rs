// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

use picodec_core::errors::{decode_error, Error, Result};
use picodec_core::io::{BitReaderLtr, ReadBitsLtr};

use log::debug;

use super::synthesis;
use crate::common::*;
use crate::header::verify_frame_crc;

mod bitstream;
mod huffman;
mod huffman_tables;
mod hybrid_synthesis;
mod requantize;
mod stereo;

use huffman::HuffmanReader;

/// `FrameData` contains the side_info and main_data portions of a MPEG audio frame.
#[derive(Default, Debug)]
struct FrameData {
    /// The byte offset into the bit reservoir indicating the location of the first bit of
    /// main_data. If 0, main_data begins after the side_info of this frame.
    main_data_begin: u16,
    /// Scale factor selector information, per channel. Each channel has 4 groups of bands that may
    /// be scaled in each granule. Scale factors may optionally be used by both granules to save
    /// bits. Bands that share scale factors for both granules are indicated by a true. Otherwise,
    /// each granule must store its own set of scale factors.
    ///
    /// Mapping of array indicies to bands [0..6, 6..11, 11..16, 16..21].
    scfsi: [[bool; 4]; 2],
    /// The granules.
    granules: [Granule; 2],
}

#[derive(Default, Debug)]
struct Granule {
    /// Channels in the granule.
    channels: [GranuleChannel; 2],
}

struct GranuleChannel {
    /// Total number of bits used for scale factors (part2) and Huffman encoded data (part3).
    part2_3_length: u16,
    /// HALF the number of samples in the big_values partition (sum of all samples in
    /// `region[0..3]`).
    big_values: u16,
    /// Logarithmic quantization step size.
    global_gain: u8,
    /// Depending on the MPEG version, `scalefac_compress` determines how many bits are allocated
    /// per scale factor.
    ///
    /// - For MPEG1 bitstreams, `scalefac_compress` is a 4-bit index into a table of scale factor
    ///   bit length pairs.
    ///
    /// - For MPEG2/2.5 bitstreams, `scalefac_compress` is a 9-bit value that decodes into
    ///   `slen[0..4]` for the number of bits per scale factor, and depending on which range the
    ///   value falls into, for which bands.
    scalefac_compress: u16,
    /// Indicates the block type (type of window) for the channel in the granule.
    block_type: BlockType,
    /// Gain factors for each of the three windows of a short block. Each gain factor has a maximum
    /// value of 7 (3 bits).
    subblock_gain: [u8; 3],
    /// The Huffman table to use for decoding `region[0..3]` of big_values.
    table_select: [u8; 3],
    /// The index of the first sample in region1 of big_values.
    region1_start: usize,
    /// The index of the first sample in region2 of big_values.
    region2_start: usize,
    /// Indicates if the pre-emphasis amount for each scale factor band should be added on to each
    /// scale factor before requantization.
    preflag: bool,
    /// A 0.5x (false) or 1x (true) multiplier for scale factors.
    scalefac_scale: bool,
    /// Use Huffman Quads table A (0) or B (1), for decoding the count1 partition.
    count1table_select: u8,
    /// Long and short window scale factors. Must be interpreted based on the block type of the
    /// granule.
    ///
    /// For `block_type == BlockType::Short { is_mixed: false }`:
    ///   - `scalefac_s[0..36]` -> `scalefacs[0..36]`
    ///
    /// For `block_type == BlockType::Short { is_mixed: true }`:
    ///   - `scalefac_l[0..8]`  -> `scalefacs[0..8]`
    ///   - `scalefac_s[0..27]` -> `scalefacs[8..35]`
    ///
    /// For `block_type != BlockType::Short { .. }`:
    ///   - `scalefac_l[0..21]` -> `scalefacs[0..21]`
    ///
    /// For the right channel of an intensity stereo frame, these are intensity positions.
    scalefacs: [u8; 39],
    /// For MPEG2/2.5 intensity stereo, the illegal intensity position of each band. This is the
    /// largest value the bit length of the band's scale factor can represent.
    is_pos_limit: [u8; 39],
    /// The starting sample index of the rzero partition, or the count of big_values and count1
    /// samples.
    rzero: usize,
    /// The number of redundant sign bits of the requantized samples.
    guard_bits: u32,
}

impl Default for GranuleChannel {
    fn default() -> Self {
        GranuleChannel {
            part2_3_length: 0,
            big_values: 0,
            global_gain: 0,
            scalefac_compress: 0,
            block_type: BlockType::Long,
            subblock_gain: [0; 3],
            table_select: [0; 3],
            region1_start: 0,
            region2_start: 0,
            preflag: false,
            scalefac_scale: false,
            count1table_select: 0,
            scalefacs: [0; 39],
            is_pos_limit: [0; 39],
            rzero: 0,
            guard_bits: 31,
        }
    }
}

impl fmt::Debug for GranuleChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GranuleChannel")
            .field("part2_3_length", &self.part2_3_length)
            .field("big_values", &self.big_values)
            .field("global_gain", &self.global_gain)
            .field("scalefac_compress", &self.scalefac_compress)
            .field("block_type", &self.block_type)
            .field("subblock_gain", &self.subblock_gain)
            .field("table_select", &self.table_select)
            .field("region1_start", &self.region1_start)
            .field("region2_start", &self.region2_start)
            .field("preflag", &self.preflag)
            .field("scalefac_scale", &self.scalefac_scale)
            .field("count1table_select", &self.count1table_select)
            .field("scalefacs", &&self.scalefacs[..])
            .field("rzero", &self.rzero)
            .field("guard_bits", &self.guard_bits)
            .finish()
    }
}

/// Bit readers report reading past the end of main_data as the end of the bitstream. Within a
/// frame that is a malformed frame, not a truncated stream.
fn map_overrun(err: Error) -> Error {
    match err {
        Error::EndOfBitstream => Error::DecodeError("mp3: main_data overrun"),
        err => err,
    }
}

/// Reads the main_data portion of a MPEG audio frame from the bit reservoir into `FrameData`
/// and the spectral sample buffers. Returns the number of bytes of main_data read.
fn read_main_data(
    header: &FrameHeader,
    frame_data: &mut FrameData,
    state: &mut State,
) -> Result<usize> {
    let main_data = state.reservoir.bytes_ref();

    let mut part2_3_begin = 0;

    for gr in 0..header.n_granules() {
        for ch in 0..header.n_channels() {
            let byte_index = part2_3_begin >> 3;

            if byte_index > main_data.len() {
                return decode_error("mp3: invalid main_data offset");
            }

            // Create a bit reader at the expected starting bit position.
            let mut bs = BitReaderLtr::new(&main_data[byte_index..]);

            bs.ignore_bits((part2_3_begin & 0x7) as u32)?;

            // Read the scale factors (part2) and get the number of bits read.
            let part2_len = if header.is_mpeg1() {
                bitstream::read_scale_factors_mpeg1(&mut bs, gr, ch, frame_data)
            }
            else {
                bitstream::read_scale_factors_mpeg2(
                    &mut bs,
                    ch > 0 && header.is_intensity_stereo(),
                    &mut frame_data.granules[gr].channels[ch],
                )
            }?;

            let channel = &mut frame_data.granules[gr].channels[ch];

            let part2_3_length = u32::from(channel.part2_3_length);

            // The part2 length must be less than or equal to the part2_3_length.
            if part2_len > part2_3_length {
                return decode_error("mp3: part2_3_length is not valid");
            }

            // The Huffman code length (part3).
            let part3_len = part2_3_length - part2_len;

            let mut reader = HuffmanReader::new(main_data, part2_3_begin + part2_len as usize)?;

            // Decode the Huffman coded spectral samples and get the starting index of the rzero
            // partition.
            channel.rzero = huffman::read_huffman_samples(
                &mut reader,
                channel,
                part3_len,
                &mut state.samples[gr][ch],
            )?;

            part2_3_begin += part2_3_length as usize;
        }
    }

    Ok((part2_3_begin + 7) >> 3)
}

/// Decode a layer 3 frame into planar 16-bit PCM.
///
/// `frame` holds the complete frame starting at its header. Channel `ch` is written to
/// `out[ch * MAX_SAMPLES_PER_FRAME..]`. When the bit reservoir does not hold all the main_data the
/// frame references, the frame's main_data is still buffered for the frames that follow, and
/// `Error::MainDataUnderflow` is returned without decoding.
pub fn decode_frame(
    frame: &[u8],
    header: &FrameHeader,
    verify_crc: bool,
    state: &mut State,
    out: &mut [i16],
) -> Result<()> {
    debug_assert!(out.len() >= header.n_channels() * MAX_SAMPLES_PER_FRAME);

    let header_len = header.header_len();
    let side_info_len = header.side_info_len();

    if frame.len() < header_len + side_info_len {
        return decode_error("mp3: frame too short for side_info");
    }

    if header.has_crc && verify_crc {
        if let Err(err) = verify_frame_crc(frame, side_info_len) {
            // The side_info cannot be trusted, so neither can main_data_begin.
            state.reservoir.clear();
            return Err(err);
        }
    }

    // Initialize an empty FrameData to store the side_info and main_data portions of the
    // frame.
    let mut frame_data: FrameData = Default::default();

    let mut bs = BitReaderLtr::new(&frame[header_len..]);

    // Read side_info into the frame data.
    if let Err(err) = bitstream::read_side_info(&mut bs, header, &mut frame_data) {
        // A failure in reading this frame will cause a discontinuity in the codec bitstream.
        // Therefore, clear the bit reservoir since it will not be valid for the next frame.
        state.reservoir.clear();
        return Err(map_overrun(err));
    }

    // Buffer main data into the bit reservoir.
    let main_data = &frame[header_len + side_info_len..];

    let underflow = state.reservoir.fill(main_data, usize::from(frame_data.main_data_begin))?;

    if underflow > 0 {
        debug!("mp3: skipping frame, main_data underflow by {} bytes", underflow);
        return Err(Error::MainDataUnderflow);
    }

    // Read the main data (scale factors and spectral samples).
    match read_main_data(header, &mut frame_data, state) {
        Ok(len) => {
            // Consume the bytes of main data read from the reservoir.
            state.reservoir.consume(len);
        }
        Err(err) => {
            // The bit reservoir was likely filled with invalid data. Clear it for the next frame.
            state.reservoir.clear();
            return Err(map_overrun(err));
        }
    }

    let n_channels = header.n_channels();

    for gr in 0..header.n_granules() {
        let granule = &mut frame_data.granules[gr];
        let samples = &mut state.samples[gr];

        // Requantize all non-zero (big_values and count1 partition) spectral samples.
        for ch in 0..n_channels {
            let channel = &mut granule.channels[ch];
            channel.guard_bits = requantize::requantize(header, channel, &mut samples[ch]);
        }

        // Apply joint stereo processing if it is used.
        if n_channels == 2 {
            stereo::stereo(header, granule, samples)?;
        }

        // The next steps are independant of channel count.
        for ch in 0..n_channels {
            let channel = &granule.channels[ch];

            // Reorder the spectral samples in short blocks into sub-band order.
            hybrid_synthesis::reorder(header, channel, &mut samples[ch]);

            // Apply the anti-aliasing filter to all block types other than short.
            hybrid_synthesis::antialias(channel, &mut samples[ch]);

            // Perform hybrid-synthesis (IMDCT and windowing).
            hybrid_synthesis::hybrid_synthesis(channel, &mut state.overlap[ch], &mut samples[ch]);

            // Invert every second sample in every second sub-band to negate the frequency inversion
            // of the polyphase filterbank.
            hybrid_synthesis::frequency_inversion(&mut samples[ch]);

            // Perform polyphase synthesis and generate PCM samples.
            let start = ch * MAX_SAMPLES_PER_FRAME + gr * SAMPLES_PER_GRANULE;

            synthesis::synthesis(
                &mut state.synthesis[ch],
                18,
                &samples[ch][..],
                &mut out[start..start + SAMPLES_PER_GRANULE],
            );
        }
    }

    Ok(())
}
