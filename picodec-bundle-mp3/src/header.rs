// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use picodec_core::checksum::{Crc16Ansi, Monitor};
use picodec_core::errors::{decode_error, need_more_data, Result};

use crate::common::*;

/// The length in bytes of a MPEG frame header word.
pub const MPEG_HEADER_LEN: usize = 4;

/// The maximum length in bytes of a MPEG audio frame including the header. Free format frames
/// at up-to 640 kbps are the largest.
pub const MAX_MPEG_FRAME_SIZE: usize = 2881;

/// The length of an ID3v2 tag header (and footer).
const ID3V2_HEADER_LEN: usize = 10;

/// Header bits that must not change between consecutive frames of a free format stream: sync,
/// version, layer, bitrate index, and sample rate.
const FREE_FORMAT_FIXED_MASK: u32 = 0xfffe_fc00;

/// Bit rates in kbps for bitrate indices 1 to 14. The rows are MPEG 1 layers 1, 2 and 3,
/// followed by MPEG 2 and 2.5 layer 1, and then MPEG 2 and 2.5 layers 2 and 3.
const BIT_RATES_KBPS: [[u16; 14]; 5] = [
    [32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
    [32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
    [32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
    [32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
    [8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
];

/// MPEG 1 sample rates by index. MPEG 2 halves them and MPEG 2.5 quarters them.
const MPEG1_SAMPLE_RATES: [u32; 3] = [44_100, 48_000, 32_000];

/// Extracts the `width` bit field starting at bit `shift` of a header word.
#[inline(always)]
fn field(header: u32, shift: u32, width: u32) -> u32 {
    (header >> shift) & ((1 << width) - 1)
}

#[inline(always)]
fn flag(header: u32, bit: u32) -> bool {
    field(header, bit, 1) == 1
}

/// Quickly check if a header sync word may be valid by rejecting reserved version, layer,
/// bitrate and sample rate values.
#[inline]
pub fn check_header(header: u32) -> bool {
    field(header, 19, 2) != 0b01
        && field(header, 17, 2) != 0b00
        && field(header, 12, 4) != 0xf
        && field(header, 10, 2) != 0b11
}

/// Returns true if the provided frame header word is synced.
#[inline(always)]
pub fn is_frame_header_word_synced(sync: u32) -> bool {
    (sync & 0xffe0_0000) == 0xffe0_0000
}

/// Reads the big-endian header word at the start of `buf`, if there are enough bytes.
#[inline]
pub fn read_header_word(buf: &[u8]) -> Option<u32> {
    match buf {
        [b0, b1, b2, b3, ..] => Some(u32::from_be_bytes([*b0, *b1, *b2, *b3])),
        _ => None,
    }
}

/// Find the offset of the first plausible frame header in `buf`.
///
/// A sync word that straddles the end of `buf` is not reported. The caller may discard
/// everything but the last 3 bytes if `None` is returned.
pub fn find_sync_word(buf: &[u8]) -> Option<usize> {
    // The MPEG audio frame header always starts at a byte boundary with 0xffe (11 consecutive 1
    // bits) if supporting up-to MPEG version 2.5. Random data can look like a sync word, so also
    // check the rest of the header for reserved values.
    buf.windows(MPEG_HEADER_LEN).position(|word| {
        let header = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
        is_frame_header_word_synced(header) && check_header(header)
    })
}

/// Measure the length of the free format frame at the start of `buf` by locating the next frame
/// header with the same fixed header bits.
///
/// Returns the length of the frame at the start of `buf`, including its padding, or `None` if no
/// following header was found within the maximum frame size.
pub fn find_free_sync(buf: &[u8], header: &FrameHeader) -> Option<usize> {
    let word = read_header_word(buf)?;

    let fixed = word & FREE_FORMAT_FIXED_MASK;

    // The shortest possible frame holds the header and the side information.
    let min_len = header.header_len() + header.side_info_len();
    let max_len = MAX_MPEG_FRAME_SIZE.min(buf.len().saturating_sub(MPEG_HEADER_LEN - 1));

    (min_len..max_len).find(|&i| match read_header_word(&buf[i..]) {
        Some(next) => next & FREE_FORMAT_FIXED_MASK == fixed,
        None => false,
    })
}

/// Get the length of the ID3v2 tag at the start of `buf`, including its header and optional
/// footer.
///
/// Returns `None` if `buf` does not start with an ID3v2 tag. If `buf` is too short to hold the tag
/// header, a need-more-data error is returned.
pub fn id3v2_tag_len(buf: &[u8]) -> Result<Option<usize>> {
    if buf.len() < 3 || &buf[..3] != b"ID3" {
        // A partial identifier at the end of the buffer cannot be judged yet.
        if b"ID3".starts_with(buf) && !buf.is_empty() {
            return need_more_data();
        }
        return Ok(None);
    }

    if buf.len() < ID3V2_HEADER_LEN {
        return need_more_data();
    }

    // The tag size is a 28-bit "syncsafe" integer. Each byte only uses the lower 7 bits.
    let size_bytes = &buf[6..10];

    if size_bytes.iter().any(|&b| b & 0x80 != 0) {
        return Ok(None);
    }

    let size = size_bytes.iter().fold(0usize, |acc, &b| (acc << 7) | usize::from(b));

    // Bit 4 of the flags byte indicates the presence of a footer.
    let footer = if buf[5] & 0x10 != 0 { ID3V2_HEADER_LEN } else { 0 };

    Ok(Some(ID3V2_HEADER_LEN + size + footer))
}

/// Parse the frame header at the start of `buf`.
pub fn parse_frame_header(buf: &[u8]) -> Result<FrameHeader> {
    match read_header_word(buf) {
        Some(header) => parse_frame_header_word(header),
        None => need_more_data(),
    }
}

/// Parse a frame header word.
///
/// A free format frame (bitrate index 0) parses successfully with a `frame_size` of 0. The length
/// must then be measured with [`find_free_sync`].
pub fn parse_frame_header_word(header: u32) -> Result<FrameHeader> {
    // Field widths from the most-significant bit: sync (11), version (2), layer (2),
    // protection (1), bitrate (4), sample rate (2), padding (1), private (1), mode (2),
    // mode extension (2), copyright (1), original (1), emphasis (2).
    if !is_frame_header_word_synced(header) {
        return decode_error("mp3: missing frame sync");
    }

    let version = match field(header, 19, 2) {
        0b00 => MpegVersion::Mpeg2p5,
        0b10 => MpegVersion::Mpeg2,
        0b11 => MpegVersion::Mpeg1,
        _ => return decode_error("mp3: invalid MPEG version"),
    };

    let layer = match field(header, 17, 2) {
        0b01 => MpegLayer::Layer3,
        0b10 => MpegLayer::Layer2,
        0b11 => MpegLayer::Layer1,
        _ => return decode_error("mp3: invalid MPEG layer"),
    };

    let bit_rates = match (version, layer) {
        (MpegVersion::Mpeg1, MpegLayer::Layer1) => &BIT_RATES_KBPS[0],
        (MpegVersion::Mpeg1, MpegLayer::Layer2) => &BIT_RATES_KBPS[1],
        (MpegVersion::Mpeg1, MpegLayer::Layer3) => &BIT_RATES_KBPS[2],
        (_, MpegLayer::Layer1) => &BIT_RATES_KBPS[3],
        (_, _) => &BIT_RATES_KBPS[4],
    };

    let bitrate_idx = field(header, 12, 4);

    let bitrate = match bitrate_idx {
        // Free format. The frame length is constant but must be measured.
        0 => 0,
        0xf => return decode_error("mp3: invalid bit-rate"),
        i => 1000 * u32::from(bit_rates[i as usize - 1]),
    };

    // The sample rate index counts through MPEG 1, 2 and 2.5 in that order.
    let (rate_shift, first_rate_idx) = match version {
        MpegVersion::Mpeg1 => (0, 0),
        MpegVersion::Mpeg2 => (1, 3),
        MpegVersion::Mpeg2p5 => (2, 6),
    };

    let sample_rate_idx = match field(header, 10, 2) {
        0b11 => return decode_error("mp3: invalid sample rate"),
        i => first_rate_idx + i as usize,
    };

    let sample_rate = MPEG1_SAMPLE_RATES[sample_rate_idx % 3] >> rate_shift;

    let mode_ext = field(header, 4, 2);

    let channel_mode = match field(header, 6, 2) {
        0b00 => ChannelMode::Stereo,
        0b10 => ChannelMode::DualMono,
        0b11 => ChannelMode::Mono,
        // Layer 3 joint stereo enables mid-side and intensity stereo independently.
        _ if layer == MpegLayer::Layer3 => ChannelMode::JointStereo(Mode::Layer3 {
            mid_side: mode_ext & 0b10 != 0,
            intensity: mode_ext & 0b01 != 0,
        }),
        // Layers 1 and 2 only have intensity stereo, from sub-band 4, 8, 12 or 16 upward.
        _ => ChannelMode::JointStereo(Mode::Intensity { bound: 4 * (mode_ext + 1) }),
    };

    let emphasis = match field(header, 0, 2) {
        0b01 => Emphasis::Fifty15,
        0b11 => Emphasis::CcitJ17,
        _ => Emphasis::None,
    };

    let has_padding = flag(header, 9);

    // ISO-11172 section 2.4.3.1. A layer 1 slot is 4 bytes, otherwise a slot is a byte.
    let (slot_factor, slot_size) = match (layer, version) {
        (MpegLayer::Layer1, _) => (12, 4),
        (MpegLayer::Layer3, MpegVersion::Mpeg2 | MpegVersion::Mpeg2p5) => (72, 1),
        _ => (144, 1),
    };

    let n_slots = match bitrate {
        0 => 0,
        _ => (slot_factor * bitrate / sample_rate) as usize + usize::from(has_padding),
    };

    Ok(FrameHeader {
        version,
        layer,
        bitrate,
        bitrate_idx,
        sample_rate,
        sample_rate_idx,
        channel_mode,
        emphasis,
        is_copyrighted: flag(header, 3),
        is_original: flag(header, 2),
        has_padding,
        has_crc: !flag(header, 16),
        n_slots,
        frame_size: n_slots * slot_size,
    })
}

/// Compute the CRC-16 protecting a frame. `frame` starts at the frame header and `protected_len`
/// is the number of bytes following the header and CRC word that are covered.
///
/// Returns `None` if `frame` is too short.
pub fn compute_frame_crc(frame: &[u8], protected_len: usize) -> Option<u16> {
    // The CRC covers the last two header bytes and the protected bytes after the CRC word.
    let protected = frame.get(6..6 + protected_len)?;

    let mut crc = Crc16Ansi::new(0xffff);
    crc.process_buf_bytes(&frame[2..4]);
    crc.process_buf_bytes(protected);

    Some(crc.crc())
}

/// Verify the CRC-16 stored after the header of `frame`.
pub fn verify_frame_crc(frame: &[u8], protected_len: usize) -> Result<()> {
    let stored = match frame.get(4..6) {
        Some(word) => u16::from_be_bytes([word[0], word[1]]),
        None => return need_more_data(),
    };

    match compute_frame_crc(frame, protected_len) {
        Some(crc) if crc == stored => Ok(()),
        Some(_) => decode_error("mp3: crc mismatch"),
        None => need_more_data(),
    }
}
