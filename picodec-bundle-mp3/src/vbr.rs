// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Parsers for the informational headers an encoder may place in the first frame of a stream.
//!
//! A Xing (VBR) or Info (CBR) tag lives right after the side information of an otherwise silent
//! frame. It may be followed by a LAME extension carrying the encoder delay and padding. A VBRI
//! tag, written by the Fraunhofer encoder, always lives 32 bytes after the frame header.

use picodec_core::errors::Result;
use picodec_core::io::{BufReader, ReadBytes};

use log::debug;

use crate::common::FrameHeader;

const XING_FLAG_FRAMES: u32 = 0x1;
const XING_FLAG_BYTES: u32 = 0x2;
const XING_FLAG_TOC: u32 = 0x4;
const XING_FLAG_QUALITY: u32 = 0x8;

/// The maximum plausible encoder delay or padding in samples.
const MAX_GAPLESS_SAMPLES: u32 = 2880;

/// The encoder that produced the information header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VbrHeaderKind {
    /// A Xing tag, written for variable bitrate streams.
    Xing,
    /// An Info tag, the constant bitrate variant of a Xing tag.
    Info,
    /// A Fraunhofer VBRI tag.
    Vbri,
}

/// The contents of a Xing, Info, or VBRI header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VbrHeader {
    pub kind: VbrHeaderKind,
    /// The number of audio frames in the stream, excluding the frame holding the header.
    pub n_frames: Option<u32>,
    /// The number of bytes in the stream.
    pub n_bytes: Option<u32>,
    /// The seek table. Entry `i` maps `i` percent of the duration to a fraction (out of 256) of
    /// the stream length.
    pub toc: Option<[u8; 100]>,
    pub quality: Option<u32>,
    /// The number of samples of encoder delay.
    pub encoder_delay: u32,
    /// The number of samples of padding at the end of the stream.
    pub encoder_padding: u32,
}

/// Try to read an informational header from `frame`, which must hold a complete frame starting at
/// its header. Returns `None` if the frame is an ordinary audio frame.
pub fn read_vbr_header(frame: &[u8], header: &FrameHeader) -> Option<VbrHeader> {
    // Truncated tags are treated as absent.
    let xing_offset = 4 + header.side_info_len();

    if let Some(tag) = frame.get(xing_offset..) {
        if tag.starts_with(b"Xing") || tag.starts_with(b"Info") {
            return read_xing_header(tag).ok();
        }
    }

    match frame.get(4 + 32..) {
        Some(tag) if tag.starts_with(b"VBRI") => read_vbri_header(tag).ok(),
        _ => None,
    }
}

fn read_xing_header(buf: &[u8]) -> Result<VbrHeader> {
    let mut reader = BufReader::new(buf);

    let kind = match &reader.read_quad_bytes()? {
        b"Info" => VbrHeaderKind::Info,
        _ => VbrHeaderKind::Xing,
    };

    let flags = reader.read_be_u32()?;

    let n_frames =
        if flags & XING_FLAG_FRAMES != 0 { Some(reader.read_be_u32()?) } else { None };

    let n_bytes = if flags & XING_FLAG_BYTES != 0 { Some(reader.read_be_u32()?) } else { None };

    let toc = if flags & XING_FLAG_TOC != 0 {
        let mut toc = [0; 100];
        reader.read_buf_exact(&mut toc)?;
        Some(toc)
    }
    else {
        None
    };

    let quality = if flags & XING_FLAG_QUALITY != 0 { Some(reader.read_be_u32()?) } else { None };

    let mut vbr = VbrHeader {
        kind,
        n_frames,
        n_bytes,
        toc,
        quality,
        encoder_delay: 0,
        encoder_padding: 0,
    };

    // The LAME extension: a 9 byte encoder version string, followed by tag revision, lowpass,
    // replay gain, and encoding flags. The delay and padding are packed 12 bits each at 21..24.
    let mut lame = [0u8; 24];

    if reader.read_buf_exact(&mut lame).is_ok() {
        let d = &lame[21..24];

        let delay = (u32::from(d[0]) << 4) | (u32::from(d[1]) >> 4);
        let padding = (u32::from(d[1] & 0xf) << 8) | u32::from(d[2]);

        if delay <= MAX_GAPLESS_SAMPLES && padding <= MAX_GAPLESS_SAMPLES {
            vbr.encoder_delay = delay;
            vbr.encoder_padding = padding;
        }
    }

    debug!(
        "mp3: {:?} header, frames={:?}, delay={}, padding={}",
        vbr.kind, vbr.n_frames, vbr.encoder_delay, vbr.encoder_padding
    );

    Ok(vbr)
}

fn read_vbri_header(buf: &[u8]) -> Result<VbrHeader> {
    let mut reader = BufReader::new(buf);

    // Skip the tag identifier and version.
    reader.ignore_bytes(6)?;

    let delay = reader.read_be_u16()?;
    let quality = reader.read_be_u16()?;
    let n_bytes = reader.read_be_u32()?;
    let n_frames = reader.read_be_u32()?;

    debug!("mp3: VBRI header, frames={}", n_frames);

    Ok(VbrHeader {
        kind: VbrHeaderKind::Vbri,
        n_frames: Some(n_frames),
        n_bytes: Some(n_bytes),
        toc: None,
        quality: Some(u32::from(quality)),
        encoder_delay: u32::from(delay),
        encoder_padding: 0,
    })
}
