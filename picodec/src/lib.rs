// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # Picodec
//!
//! Picodec decodes MP3 and Ogg Vorbis streams to 16-bit PCM using only integer arithmetic.
//!
//! # Usage
//!
//! 1. Sniff the first bytes of a stream with [`CodecKind::sniff`], or let
//!    [`AnyDecoder::try_probe`] do it.
//! 2. Repeatedly call [`Decoder::decode`](crate::core::codecs::Decoder::decode) with the unread
//!    part of the input, and advance the input by the number of bytes consumed. An
//!    [`Error::NeedMoreData`](crate::core::errors::Error::NeedMoreData) failure requests more
//!    input.
//! 3. Interleaved stereo samples are written to the output buffer, which must hold at least
//!    [`Decoder::max_output_samples`](crate::core::codecs::Decoder::max_output_samples)
//!    samples.
//!
//! # Adding new codecs
//!
//! Decoders implement the [`Decoder`](crate::core::codecs::Decoder) trait from `picodec-core`.
//! A new decoder only needs a variant in [`AnyDecoder`] and a capture pattern in [`CodecKind`].

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]
// The following lints are allowed in all picodec crates. Please see the workspace Cargo.toml for
// the full list.
#![allow(clippy::comparison_chain)]
#![allow(clippy::excessive_precision)]
#![allow(clippy::identity_op)]
#![allow(clippy::manual_range_contains)]

#[cfg(not(any(feature = "mp1", feature = "mp3", feature = "vorbis")))]
compile_error!("picodec: at least one of the mp1, mp3, or vorbis features must be enabled");

use log::debug;

use picodec_core::codecs::{DecodeResult, Decoder, StreamInfo};
use picodec_core::errors::{need_more_data, unsupported_error, Result};

pub mod codecs {
    //! The `codecs` module re-exports all enabled picodec decoders and their options.

    #[cfg(any(feature = "mp1", feature = "mp3"))]
    pub use picodec_bundle_mp3::{FakeFramePolicy, LayerSet, Mp3Decoder, Mp3DecoderOptions};
    #[cfg(any(feature = "mp1", feature = "mp3"))]
    pub use picodec_bundle_mp3::{Emphasis, FrameHeader, VbrHeader, VbrHeaderKind};
    #[cfg(feature = "vorbis")]
    pub use picodec_codec_vorbis::{VorbisDecoder, VorbisDecoderOptions};
}

pub mod formats {
    //! The `formats` module re-exports all enabled picodec format readers.

    #[cfg(feature = "vorbis")]
    pub use picodec_format_ogg::{OggReader, OggReaderOptions};
}

pub use picodec_core as core;
pub use picodec_metadata as metadata;

#[cfg(any(feature = "mp1", feature = "mp3"))]
use codecs::{Mp3Decoder, Mp3DecoderOptions};
#[cfg(feature = "vorbis")]
use codecs::{VorbisDecoder, VorbisDecoderOptions};

/// The capture pattern that starts every Ogg page.
const OGG_CAPTURE_PATTERN: &[u8; 4] = b"OggS";

/// The identifier that starts an ID3v2 tag.
const ID3V2_IDENTIFIER: &[u8; 3] = b"ID3";

/// The kind of compressed stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CodecKind {
    /// An MPEG audio elementary stream, optionally preceded by an ID3v2 tag.
    Mp3,
    /// Vorbis in an Ogg container.
    Vorbis,
}

impl CodecKind {
    /// Guess the kind of stream from its first bytes.
    ///
    /// An Ogg capture pattern or an ID3v2 identifier at the start of the buffer is decisive.
    /// Otherwise, the earliest of an Ogg capture pattern and a plausible MPEG audio frame header
    /// wins. Returns `Ok(None)` if neither is found, and `Error::NeedMoreData` if the buffer is
    /// too short to tell.
    pub fn sniff(buf: &[u8]) -> Result<Option<CodecKind>> {
        if buf.len() < OGG_CAPTURE_PATTERN.len() {
            return need_more_data();
        }

        if buf.starts_with(OGG_CAPTURE_PATTERN) {
            return Ok(Some(CodecKind::Vorbis));
        }

        if buf.starts_with(ID3V2_IDENTIFIER) {
            return Ok(Some(CodecKind::Mp3));
        }

        let ogg_pos = buf.windows(OGG_CAPTURE_PATTERN.len()).position(|w| w == OGG_CAPTURE_PATTERN);
        let mpeg_pos = find_mpeg_sync(buf);

        let kind = match (ogg_pos, mpeg_pos) {
            (Some(ogg), Some(mpeg)) if mpeg < ogg => Some(CodecKind::Mp3),
            (Some(_), _) => Some(CodecKind::Vorbis),
            (None, Some(_)) => Some(CodecKind::Mp3),
            (None, None) => None,
        };

        Ok(kind)
    }
}

#[cfg(any(feature = "mp1", feature = "mp3"))]
fn find_mpeg_sync(buf: &[u8]) -> Option<usize> {
    picodec_bundle_mp3::find_sync_word(buf)
}

#[cfg(not(any(feature = "mp1", feature = "mp3")))]
fn find_mpeg_sync(_: &[u8]) -> Option<usize> {
    None
}

/// Options for every decoder an [`AnyDecoder`] may instantiate.
#[derive(Copy, Clone, Debug, Default)]
pub struct DecoderOptions {
    #[cfg(any(feature = "mp1", feature = "mp3"))]
    pub mp3: Mp3DecoderOptions,
    #[cfg(feature = "vorbis")]
    pub vorbis: VorbisDecoderOptions,
}

/// A decoder for any of the enabled stream kinds.
pub enum AnyDecoder {
    #[cfg(any(feature = "mp1", feature = "mp3"))]
    Mp3(Box<Mp3Decoder>),
    #[cfg(feature = "vorbis")]
    Vorbis(Box<VorbisDecoder>),
}

impl AnyDecoder {
    /// Instantiate a decoder for a kind of stream.
    pub fn try_new(kind: CodecKind, options: &DecoderOptions) -> Result<AnyDecoder> {
        match kind {
            #[cfg(any(feature = "mp1", feature = "mp3"))]
            CodecKind::Mp3 => Ok(AnyDecoder::Mp3(Box::new(Mp3Decoder::try_new(&options.mp3)?))),
            #[cfg(feature = "vorbis")]
            CodecKind::Vorbis => {
                Ok(AnyDecoder::Vorbis(Box::new(VorbisDecoder::try_new(&options.vorbis)?)))
            }
            #[allow(unreachable_patterns)]
            _ => unsupported_error("picodec: decoder not enabled"),
        }
    }

    /// Instantiate a decoder for the stream starting at `buf`.
    pub fn try_probe(buf: &[u8], options: &DecoderOptions) -> Result<AnyDecoder> {
        match CodecKind::sniff(buf)? {
            Some(kind) => {
                debug!("picodec: detected {:?} stream", kind);
                AnyDecoder::try_new(kind, options)
            }
            None => unsupported_error("picodec: unrecognized stream"),
        }
    }

    /// Gets the kind of stream this decoder decodes.
    pub fn kind(&self) -> CodecKind {
        match self {
            #[cfg(any(feature = "mp1", feature = "mp3"))]
            AnyDecoder::Mp3(_) => CodecKind::Mp3,
            #[cfg(feature = "vorbis")]
            AnyDecoder::Vorbis(_) => CodecKind::Vorbis,
        }
    }

    /// Gets the Xing, Info, or VBRI header of an MP3 stream, if one was found.
    #[cfg(any(feature = "mp1", feature = "mp3"))]
    pub fn vbr_header(&self) -> Option<&codecs::VbrHeader> {
        match self {
            AnyDecoder::Mp3(decoder) => decoder.vbr_header(),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Gets the header of the last MP3 frame decoded.
    #[cfg(any(feature = "mp1", feature = "mp3"))]
    pub fn frame_header(&self) -> Option<&codecs::FrameHeader> {
        match self {
            AnyDecoder::Mp3(decoder) => decoder.frame_header(),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Gets the comments of a Vorbis stream, once its comment header has been read.
    #[cfg(feature = "vorbis")]
    pub fn comments(&self) -> Option<&metadata::vorbis::VorbisComments> {
        match self {
            AnyDecoder::Vorbis(decoder) => decoder.comments(),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    fn inner(&self) -> &dyn Decoder {
        match self {
            #[cfg(any(feature = "mp1", feature = "mp3"))]
            AnyDecoder::Mp3(decoder) => &**decoder,
            #[cfg(feature = "vorbis")]
            AnyDecoder::Vorbis(decoder) => &**decoder,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Decoder {
        match self {
            #[cfg(any(feature = "mp1", feature = "mp3"))]
            AnyDecoder::Mp3(decoder) => &mut **decoder,
            #[cfg(feature = "vorbis")]
            AnyDecoder::Vorbis(decoder) => &mut **decoder,
        }
    }
}

impl Decoder for AnyDecoder {
    fn decode(&mut self, input: &[u8], out: &mut [i32]) -> DecodeResult {
        self.inner_mut().decode(input, out)
    }

    fn reset(&mut self) {
        self.inner_mut().reset()
    }

    fn stream_info(&self) -> Option<StreamInfo> {
        self.inner().stream_info()
    }

    fn output_samples(&self) -> usize {
        self.inner().output_samples()
    }

    fn max_output_samples(&self) -> usize {
        self.inner().max_output_samples()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use picodec_core::errors::Error;

    const MPEG_HEADER: [u8; 4] = [0xff, 0xfb, 0x90, 0x64];

    #[test]
    fn verify_sniff() {
        assert_eq!(CodecKind::sniff(b"OggS\x00\x02"), Ok(Some(CodecKind::Vorbis)));
        assert_eq!(CodecKind::sniff(b"ID3\x04\x00\x00"), Ok(Some(CodecKind::Mp3)));
        assert_eq!(CodecKind::sniff(&MPEG_HEADER), Ok(Some(CodecKind::Mp3)));

        // Junk before the stream.
        let mut buf = vec![0u8; 16];
        buf.extend_from_slice(b"OggS\x00\x02");
        assert_eq!(CodecKind::sniff(&buf), Ok(Some(CodecKind::Vorbis)));

        let mut buf = vec![0u8; 16];
        buf.extend_from_slice(&MPEG_HEADER);
        buf.extend_from_slice(b"OggS");
        assert_eq!(CodecKind::sniff(&buf), Ok(Some(CodecKind::Mp3)));

        assert_eq!(CodecKind::sniff(&[0u8; 64]), Ok(None));
        assert_eq!(CodecKind::sniff(b"Ogg"), Err(Error::NeedMoreData));
        assert_eq!(CodecKind::sniff(&[]), Err(Error::NeedMoreData));
    }

    #[test]
    fn verify_probe() {
        let options = DecoderOptions::default();

        let decoder = AnyDecoder::try_probe(b"OggS\x00\x02", &options).unwrap();
        assert_eq!(decoder.kind(), CodecKind::Vorbis);
        assert!(decoder.comments().is_none());
        assert!(decoder.stream_info().is_none());

        let decoder = AnyDecoder::try_probe(&MPEG_HEADER, &options).unwrap();
        assert_eq!(decoder.kind(), CodecKind::Mp3);
        assert!(decoder.vbr_header().is_none());

        assert!(matches!(
            AnyDecoder::try_probe(&[0u8; 64], &options),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn verify_dispatch() {
        // MPEG1 layer 3, 128 kbps, 44.1 kHz, joint stereo. A zeroed body decodes to silence.
        let mut frame = vec![0u8; 417];
        frame[..4].copy_from_slice(&MPEG_HEADER);

        let mut decoder = AnyDecoder::try_probe(&frame, &Default::default()).unwrap();
        let mut out = vec![1i32; decoder.max_output_samples()];

        // The next header confirms the frame length.
        let mut input = frame.clone();
        input.extend_from_slice(&MPEG_HEADER);

        let decoded = decoder.decode(&input, &mut out).unwrap();
        assert_eq!(decoded.consumed, 417);
        assert_eq!(decoded.samples, 2 * 1152);
        assert!(out[..decoded.samples].iter().all(|&s| s == 0));

        assert_eq!(decoder.channels(), 2);
        assert_eq!(decoder.sample_rate(), 44_100);
        assert_eq!(decoder.output_samples(), 2 * 1152);
        assert_eq!(decoder.frame_header().map(|header| header.frame_size), Some(417));
    }
}
