// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Decoding of base64 encoded FLAC picture blocks found in `METADATA_BLOCK_PICTURE` comments.

use picodec_core::errors::{decode_error, Result};
use picodec_core::io::{BufReader, FiniteStream, ReadBytes};

/// A picture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Picture {
    /// The picture type, as defined for the ID3v2 APIC frame. For example, 3 is the front cover.
    pub usage: u32,
    pub media_type: String,
    pub description: String,
    /// The width and height in pixels, if known.
    pub dimensions: Option<(u32, u32)>,
    pub bits_per_pixel: u32,
    /// The number of colours of an indexed-colour picture, or 0.
    pub indexed_colours: u32,
    /// The position of the image data within the decoded picture block.
    pub data_offset: usize,
    pub data_len: usize,
}

/// Converts a string of bytes to an ASCII string if all characters are within the printable ASCII
/// range. If a null byte is encountered, the string terminates at that point.
fn printable_ascii_to_string(bytes: &[u8]) -> Option<String> {
    let mut result = String::with_capacity(bytes.len());

    for c in bytes {
        match c {
            0x00 => break,
            0x20..=0x7e => result.push(char::from(*c)),
            _ => return None,
        }
    }

    Some(result)
}

/// Reads a decoded FLAC picture block.
pub fn read_picture_block(block: &[u8]) -> Result<Picture> {
    let mut reader = BufReader::new(block);

    let usage = reader.read_be_u32()?;

    let media_type_len = reader.read_be_u32()? as usize;

    // Non-printable ASCII characters are invalid in the media type.
    let media_type = match printable_ascii_to_string(reader.read_buf_bytes_ref(media_type_len)?) {
        Some(media_type) => media_type,
        None => return decode_error("meta: picture mime-type contains invalid characters"),
    };

    let desc_len = reader.read_be_u32()? as usize;
    let description = String::from_utf8_lossy(reader.read_buf_bytes_ref(desc_len)?).into_owned();

    let width = reader.read_be_u32()?;
    let height = reader.read_be_u32()?;

    // If either the width or height is 0, then the size is invalid.
    let dimensions = if width > 0 && height > 0 { Some((width, height)) } else { None };

    let bits_per_pixel = reader.read_be_u32()?;
    let indexed_colours = reader.read_be_u32()?;

    let data_len = reader.read_be_u32()? as usize;
    let data_offset = reader.bytes_read() as usize;

    if reader.bytes_available() < data_len as u64 {
        return decode_error("meta: picture data is truncated");
    }

    Ok(Picture {
        usage,
        media_type,
        description,
        dimensions,
        bits_per_pixel,
        indexed_colours,
        data_offset,
        data_len,
    })
}

/// Decodes a base64 encoded picture block, returning the decoded block and the picture read from
/// it.
pub fn decode_picture(encoded: &[u8]) -> Result<(Box<[u8]>, Picture)> {
    let block = match base64_decode(encoded) {
        Some(block) => block,
        None => return decode_error("meta: the base64 encoding of a picture block is invalid"),
    };

    let picture = read_picture_block(&block)?;

    Ok((block, picture))
}

/// Decode RFC4648 Base64 encoded data.
pub fn base64_decode(encoded: &[u8]) -> Option<Box<[u8]>> {
    // A sentinel value indicating that an invalid symbol was encountered.
    const BAD_SYM: u8 = 0xff;

    /// Generates a lookup table mapping RFC4648 base64 symbols to their 6-bit decoded values at
    /// compile time.
    const fn rfc4648_base64_symbols() -> [u8; 256] {
        const SYMBOLS: &[u8; 64] =
            b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

        let mut table = [BAD_SYM; 256];
        let mut i = 0;

        while i < SYMBOLS.len() {
            table[SYMBOLS[i] as usize] = i as u8;
            i += 1
        }

        table
    }

    const SYM_VALUE: [u8; 256] = rfc4648_base64_symbols();

    // Padding is not required for decoding.
    let end = encoded.iter().rposition(|&b| b != b'=').map_or(0, |i| i + 1);
    let encoded = &encoded[..end];

    if encoded.len() % 4 == 1 {
        // At least 2 symbols are required to decode a single byte.
        return None;
    }

    let mut decoded = Vec::with_capacity((encoded.len() * 3) / 4);

    // Accumulate 6 bits per symbol and emit a byte whenever 8 or more bits are available.
    let mut acc = 0u32;
    let mut n_bits = 0;

    for &symbol in encoded {
        let value = SYM_VALUE[usize::from(symbol)];

        if value == BAD_SYM {
            return None;
        }

        acc = (acc << 6) | u32::from(value);
        n_bits += 6;

        if n_bits >= 8 {
            n_bits -= 8;
            decoded.push((acc >> n_bits) as u8);
        }
    }

    Some(decoded.into_boxed_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_base64_decode() {
        // Valid, with padding.
        assert_eq!(Some(b"".as_slice()), base64_decode(b"").as_deref());
        assert_eq!(Some(b"f".as_slice()), base64_decode(b"Zg==").as_deref());
        assert_eq!(Some(b"fo".as_slice()), base64_decode(b"Zm8=").as_deref());
        assert_eq!(Some(b"foob".as_slice()), base64_decode(b"Zm9vYg==").as_deref());
        // Valid, without padding.
        assert_eq!(Some(b"f".as_slice()), base64_decode(b"Zg").as_deref());
        assert_eq!(Some(b"fooba".as_slice()), base64_decode(b"Zm9vYmE").as_deref());
        assert_eq!(Some(b"foobar".as_slice()), base64_decode(b"Zm9vYmFy").as_deref());
        // Invalid.
        assert_eq!(None, base64_decode(b"a").as_deref());
        assert_eq!(None, base64_decode(b"ab!c").as_deref());
        assert_eq!(None, base64_decode(b"ab=c").as_deref());
    }

    fn picture_block() -> Vec<u8> {
        let mut block = Vec::new();

        for field in [3u32, 9] {
            block.extend_from_slice(&field.to_be_bytes());
        }
        block.extend_from_slice(b"image/png");
        block.extend_from_slice(&5u32.to_be_bytes());
        block.extend_from_slice(b"cover");
        for field in [640u32, 480, 24, 0, 4] {
            block.extend_from_slice(&field.to_be_bytes());
        }
        block.extend_from_slice(&[0x89, b'P', b'N', b'G']);

        block
    }

    #[test]
    fn verify_read_picture_block() {
        let block = picture_block();
        let picture = read_picture_block(&block).unwrap();

        assert_eq!(picture.usage, 3);
        assert_eq!(picture.media_type, "image/png");
        assert_eq!(picture.description, "cover");
        assert_eq!(picture.dimensions, Some((640, 480)));
        assert_eq!(picture.bits_per_pixel, 24);
        assert_eq!(picture.indexed_colours, 0);
        assert_eq!(&block[picture.data_offset..][..picture.data_len], b"\x89PNG");

        assert!(read_picture_block(&block[..block.len() - 1]).is_err());
    }

    #[test]
    fn verify_decode_picture() {
        // Base64 encode the block.
        const SYMBOLS: &[u8; 64] =
            b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

        let block = picture_block();
        let mut encoded = Vec::new();

        for chunk in block.chunks(3) {
            let mut v = [0u8; 3];
            v[..chunk.len()].copy_from_slice(chunk);

            let bits = (u32::from(v[0]) << 16) | (u32::from(v[1]) << 8) | u32::from(v[2]);

            for i in 0..=chunk.len() {
                encoded.push(SYMBOLS[((bits >> (18 - 6 * i)) & 0x3f) as usize]);
            }
        }

        let (decoded, picture) = decode_picture(&encoded).unwrap();

        assert_eq!(&decoded[..], &block[..]);
        assert_eq!(picture.media_type, "image/png");

        assert!(decode_picture(b"!!!!").is_err());
    }
}
