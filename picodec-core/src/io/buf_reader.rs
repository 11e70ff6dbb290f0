// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::{FiniteStream, ReadBytes};
use crate::errors::{end_of_bitstream_error, Result};

/// A `BufReader` reads bytes from a borrowed buffer.
pub struct BufReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BufReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        BufReader { buf, pos: 0 }
    }

    /// The unread part of the buffer.
    #[inline(always)]
    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// Borrows the next `len` bytes and advances past them.
    pub fn read_buf_bytes_ref(&mut self, len: usize) -> Result<&'a [u8]> {
        match self.rest().get(..len) {
            Some(bytes) => {
                self.pos += len;
                Ok(bytes)
            }
            None => end_of_bitstream_error(),
        }
    }

    /// Borrows every unread byte and advances to the end.
    pub fn read_buf_bytes_available_ref(&mut self) -> &'a [u8] {
        let rest = self.rest();
        self.pos = self.buf.len();
        rest
    }
}

impl ReadBytes for BufReader<'_> {
    fn read_buf_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        buf.copy_from_slice(self.read_buf_bytes_ref(buf.len())?);
        Ok(())
    }

    fn ignore_bytes(&mut self, count: u64) -> Result<()> {
        match usize::try_from(count) {
            Ok(len) if len <= self.rest().len() => {
                self.pos += len;
                Ok(())
            }
            _ => end_of_bitstream_error(),
        }
    }

    #[inline(always)]
    fn pos(&self) -> u64 {
        self.pos as u64
    }
}

impl FiniteStream for BufReader<'_> {
    #[inline(always)]
    fn byte_len(&self) -> u64 {
        self.buf.len() as u64
    }

    #[inline(always)]
    fn bytes_read(&self) -> u64 {
        self.pos as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_read_integers() {
        let buf = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
        let mut reader = BufReader::new(&buf);

        assert_eq!(reader.read_u8().unwrap(), 0x01);
        assert_eq!(reader.read_u16().unwrap(), 0x0302);
        assert_eq!(reader.read_be_u32().unwrap(), 0x04050607);
        assert_eq!(reader.bytes_available(), 0);
        assert!(reader.read_u8().is_err());
    }

    #[test]
    fn verify_read_refs() {
        let buf = b"OggS\x00rest";
        let mut reader = BufReader::new(buf);

        assert_eq!(reader.read_buf_bytes_ref(4).unwrap(), b"OggS");
        reader.ignore_bytes(1).unwrap();
        assert_eq!(reader.pos(), 5);
        assert!(reader.read_buf_bytes_ref(5).is_err());
        assert!(reader.ignore_bytes(5).is_err());
        assert_eq!(reader.read_buf_bytes_available_ref(), b"rest");
    }
}
