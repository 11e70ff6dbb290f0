// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `io` module implements bit- and byte-level readers over borrowed buffers.
//!
//! Decoders never own a stream. Every reader in this module consumes a `&[u8]` supplied by the
//! caller, so reads are bounds-checked against that slice and never block.
//!
//! All byte readers implement the [`ReadBytes`] trait. Likewise, all bit readers implement either
//! the [`ReadBitsLtr`] or [`ReadBitsRtl`] traits depending on the order in which they consume
//! bits.

use crate::errors::Result;

mod bit;
mod buf_reader;

pub use bit::*;
pub use buf_reader::BufReader;

/// `ReadBytes` reads bytes and fixed-width integers of either byte order.
///
/// A failed read leaves the position of the reader unchanged.
pub trait ReadBytes {
    /// Fills `buf` completely, or fails with `EndOfBitstream`.
    fn read_buf_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Skips `count` bytes.
    fn ignore_bytes(&mut self, count: u64) -> Result<()>;

    /// Gets the number of bytes consumed so far.
    fn pos(&self) -> u64;

    /// Reads the next `N` bytes in stream order.
    #[inline(always)]
    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut bytes = [0; N];
        self.read_buf_exact(&mut bytes)?;
        Ok(bytes)
    }

    #[inline(always)]
    fn read_byte(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    #[inline(always)]
    fn read_quad_bytes(&mut self) -> Result<[u8; 4]> {
        self.read_array()
    }

    #[inline(always)]
    fn read_u8(&mut self) -> Result<u8> {
        self.read_byte()
    }

    #[inline(always)]
    fn read_u16(&mut self) -> Result<u16> {
        self.read_array().map(u16::from_le_bytes)
    }

    #[inline(always)]
    fn read_be_u16(&mut self) -> Result<u16> {
        self.read_array().map(u16::from_be_bytes)
    }

    #[inline(always)]
    fn read_u32(&mut self) -> Result<u32> {
        self.read_array().map(u32::from_le_bytes)
    }

    #[inline(always)]
    fn read_be_u32(&mut self) -> Result<u32> {
        self.read_array().map(u32::from_be_bytes)
    }

    #[inline(always)]
    fn read_u64(&mut self) -> Result<u64> {
        self.read_array().map(u64::from_le_bytes)
    }
}

/// A byte stream with a known length.
pub trait FiniteStream {
    /// Gets the total length of the stream in bytes.
    fn byte_len(&self) -> u64;

    fn bytes_read(&self) -> u64;

    /// Gets the number of bytes left unread.
    fn bytes_available(&self) -> u64 {
        self.byte_len() - self.bytes_read()
    }
}
