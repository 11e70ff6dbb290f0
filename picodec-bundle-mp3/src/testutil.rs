// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Helpers for synthesising bitstreams in tests.

/// A most-significant bit first bit writer.
#[derive(Default)]
pub struct BitWriter {
    buf: Vec<u8>,
    n_bits: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Default::default()
    }

    /// Write the `n` least-significant bits of `value`, `n` must be less-than or equal to 32.
    pub fn write(&mut self, value: u32, n: u32) {
        debug_assert!(n <= 32);

        for i in (0..n).rev() {
            if self.n_bits % 8 == 0 {
                self.buf.push(0);
            }

            if (value >> i) & 1 != 0 {
                let last = self.buf.len() - 1;
                self.buf[last] |= 0x80 >> (self.n_bits % 8);
            }

            self.n_bits += 1;
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.write(u32::from(byte), 8);
        }
    }

    pub fn bits_written(&self) -> usize {
        self.n_bits
    }

    /// Returns the written bytes. A partial final byte is padded with 0 bits.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
