// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::Monitor;

const fn generate_crc32_table(poly: u32) -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut j = 0;

        while j < 8 {
            crc = if crc & 0x8000_0000 != 0 { (crc << 1) ^ poly } else { crc << 1 };
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

const CRC32_TABLE: [u32; 256] = generate_crc32_table(0x04c1_1db7);

/// `Crc32` implements the CRC-32 checksum used by Ogg pages.
///
/// Polynomial `0x04c11db7`, MSB-first, with no reflection and no final XOR.
pub struct Crc32 {
    state: u32,
}

impl Crc32 {
    /// Instantiate a new `Crc32` with the given initial state.
    pub fn new(state: u32) -> Crc32 {
        Crc32 { state }
    }

    /// Returns the computed CRC.
    pub fn crc(&self) -> u32 {
        self.state
    }
}

impl Monitor for Crc32 {
    #[inline(always)]
    fn process_byte(&mut self, byte: u8) {
        self.state = (self.state << 8) ^ CRC32_TABLE[usize::from((self.state >> 24) as u8 ^ byte)];
    }

    fn process_buf_bytes(&mut self, buf: &[u8]) {
        for &byte in buf {
            self.state =
                (self.state << 8) ^ CRC32_TABLE[usize::from((self.state >> 24) as u8 ^ byte)];
        }
    }
}
