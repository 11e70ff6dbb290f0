// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `codecs` module defines the push-style decoder interface implemented by every codec.

use std::fmt;

use crate::audio::{Channels, BITS_PER_SAMPLE};
use crate::errors::{Error, ReturnCode};

/// Basic information about a decoded stream.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamInfo {
    /// The source channel layout. Output is always two channels wide.
    pub channels: Channels,
    /// The sample rate in Hz.
    pub sample_rate: u32,
    /// The bitrate in bits per second, or 0 if unknown.
    pub bitrate: u32,
}

impl StreamInfo {
    /// Gets the bit depth of the decoded PCM.
    pub fn bits_per_sample(&self) -> u32 {
        BITS_PER_SAMPLE
    }
}

/// The outcome of a successful call to [`Decoder::decode`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Decoded {
    /// The number of input bytes consumed.
    pub consumed: usize,
    /// The number of interleaved samples written to the output buffer.
    pub samples: usize,
}

/// The outcome of a failed call to [`Decoder::decode`].
///
/// Input may still have been consumed, for example when an invalid frame is skipped.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DecodeFailure {
    /// The number of input bytes consumed.
    pub consumed: usize,
    /// The reason for the failure.
    pub error: Error,
}

impl DecodeFailure {
    pub fn new(consumed: usize, error: Error) -> Self {
        DecodeFailure { consumed, error }
    }

    /// Gets the integer return code for the failure.
    pub fn code(&self) -> ReturnCode {
        self.error.code()
    }
}

impl From<Error> for DecodeFailure {
    fn from(error: Error) -> Self {
        DecodeFailure { consumed: 0, error }
    }
}

impl fmt::Display for DecodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (consumed {} bytes)", self.error, self.consumed)
    }
}

impl std::error::Error for DecodeFailure {}

pub type DecodeResult = std::result::Result<Decoded, DecodeFailure>;

impl From<&DecodeResult> for ReturnCode {
    fn from(res: &DecodeResult) -> Self {
        match res {
            Ok(_) => ReturnCode::None,
            Err(failure) => failure.code(),
        }
    }
}

/// A `Decoder` consumes a compressed byte stream supplied by the caller in arbitrary chunks and
/// produces interleaved PCM.
///
/// The caller owns the input. On every call the decoder reports exactly how many bytes it consumed
/// and the caller must advance its input by that amount. A call that consumes nothing and returns
/// [`Error::NeedMoreData`] requests a larger input buffer.
pub trait Decoder: Send {
    /// Decode at most one frame or packet from `input`, writing interleaved samples to `out`.
    fn decode(&mut self, input: &[u8], out: &mut [i32]) -> DecodeResult;

    /// Reset the decoder.
    ///
    /// A decoder must be reset when the next input is discontinuous with respect to the last
    /// decoded input.
    fn reset(&mut self);

    /// Gets information about the current stream, if known.
    fn stream_info(&self) -> Option<StreamInfo>;

    /// Gets the number of interleaved samples produced by the last call to `decode`.
    fn output_samples(&self) -> usize;

    /// Gets the maximum number of interleaved samples a single call to `decode` can produce.
    fn max_output_samples(&self) -> usize;

    /// Gets the number of source channels, or 0 if unknown.
    fn channels(&self) -> usize {
        self.stream_info().map(|info| info.channels.count()).unwrap_or(0)
    }

    /// Gets the sample rate, or 0 if unknown.
    fn sample_rate(&self) -> u32 {
        self.stream_info().map(|info| info.sample_rate).unwrap_or(0)
    }

    /// Gets the bit depth of the decoded PCM.
    fn bits_per_sample(&self) -> u32 {
        BITS_PER_SAMPLE
    }

    /// Gets the bitrate, or 0 if unknown.
    fn bitrate(&self) -> u32 {
        self.stream_info().map(|info| info.bitrate).unwrap_or(0)
    }
}
