// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type and the integer return codes exposed at the
//! decoder boundary.

use std::error;
use std::fmt;
use std::result;

/// `Error` provides an enumeration of all possible errors reported by Picodec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The input buffer ended before a complete frame or page was available. The caller should
    /// supply more bytes and call again.
    NeedMoreData,
    /// A bitstream reader was asked to read beyond the end of its buffer.
    EndOfBitstream,
    /// The bit reservoir does not yet hold the main data referenced by the current frame.
    MainDataUnderflow,
    /// The stream contained malformed data and could not be decoded.
    DecodeError(&'static str),
    /// An unsupported codec feature was encountered.
    Unsupported(&'static str),
    /// A default or user-defined limit was reached while decoding the stream. Limits are used to
    /// prevent denial-of-service attacks from malicious streams.
    LimitError(&'static str),
    /// The decoder needs to be reset before continuing.
    ResetRequired,
    /// A buffer could not be allocated while instantiating a decoder.
    OutOfMemory,
}

impl Error {
    /// Get the integer return code associated with the error.
    pub fn code(&self) -> ReturnCode {
        match *self {
            Error::NeedMoreData => ReturnCode::Continue,
            Error::MainDataUnderflow => ReturnCode::MainDataUnderflow,
            Error::ResetRequired => ReturnCode::NeedRestart,
            Error::OutOfMemory => ReturnCode::NoMem,
            Error::EndOfBitstream
            | Error::DecodeError(_)
            | Error::Unsupported(_)
            | Error::LimitError(_) => ReturnCode::Err,
        }
    }

    /// Returns `true` if the error only signals that more input is required.
    pub fn is_starvation(&self) -> bool {
        matches!(*self, Error::NeedMoreData)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::NeedMoreData => write!(f, "more input data is required"),
            Error::EndOfBitstream => write!(f, "unexpected end of bitstream"),
            Error::MainDataUnderflow => write!(f, "main data underflow"),
            Error::DecodeError(msg) => {
                write!(f, "malformed stream: {}", msg)
            }
            Error::Unsupported(feature) => {
                write!(f, "unsupported feature: {}", feature)
            }
            Error::LimitError(constraint) => {
                write!(f, "limit reached: {}", constraint)
            }
            Error::ResetRequired => {
                write!(f, "decoder needs to be reset")
            }
            Error::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

impl error::Error for Error {}

pub type Result<T> = result::Result<T, Error>;

/// Convenience function to create a decode error.
pub fn decode_error<T>(desc: &'static str) -> Result<T> {
    Err(Error::DecodeError(desc))
}

/// Convenience function to create an unsupport feature error.
pub fn unsupported_error<T>(feature: &'static str) -> Result<T> {
    Err(Error::Unsupported(feature))
}

/// Convenience function to create a limit error.
pub fn limit_error<T>(constraint: &'static str) -> Result<T> {
    Err(Error::LimitError(constraint))
}

/// Convenience function to create a reset required error.
pub fn reset_error<T>() -> Result<T> {
    Err(Error::ResetRequired)
}

/// Convenience function to create an end-of-bitstream error.
pub fn end_of_bitstream_error<T>() -> Result<T> {
    Err(Error::EndOfBitstream)
}

/// Convenience function to create a need-more-data error.
pub fn need_more_data<T>() -> Result<T> {
    Err(Error::NeedMoreData)
}

/// The integer return codes reported at the decoder boundary.
///
/// Success is zero and every failure is negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ReturnCode {
    /// The call succeeded.
    None = 0,
    /// The frame, packet, or stream was invalid.
    Err = -1,
    /// More input is required before anything can be decoded.
    Continue = -2,
    /// The bit reservoir did not hold enough main data for the frame.
    MainDataUnderflow = -3,
    /// Too many false synchronisations were detected. The caller should restart the stream.
    NeedRestart = -4,
    /// A buffer could not be allocated.
    NoMem = -5,
}

impl ReturnCode {
    /// Get the raw integer value of the return code.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl<T> From<&Result<T>> for ReturnCode {
    fn from(res: &Result<T>) -> Self {
        match res {
            Ok(_) => ReturnCode::None,
            Err(err) => err.code(),
        }
    }
}

impl From<Error> for ReturnCode {
    fn from(err: Error) -> Self {
        err.code()
    }
}
