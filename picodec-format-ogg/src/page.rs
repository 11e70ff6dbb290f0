// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use picodec_core::checksum::{Crc32, Monitor};
use picodec_core::errors::{decode_error, need_more_data, Result};
use picodec_core::io::{BufReader, ReadBytes};

pub const OGG_PAGE_MARKER: [u8; 4] = *b"OggS";
pub const OGG_PAGE_HEADER_SIZE: usize = 27;

/// The maximum size of a page body.
pub const OGG_PAGE_MAX_BODY_SIZE: usize = 255 * 255;

/// The maximum size of a complete page.
pub const OGG_PAGE_MAX_SIZE: usize = OGG_PAGE_HEADER_SIZE + 255 + OGG_PAGE_MAX_BODY_SIZE;

/// Offset of the CRC field within the page header.
const OGG_PAGE_CRC_OFFSET: usize = 22;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PageHeader {
    pub version: u8,
    pub absgp: u64,
    pub serial: u32,
    pub sequence: u32,
    pub crc: u32,
    pub n_segments: u8,
    pub is_continuation: bool,
    pub is_first_page: bool,
    pub is_last_page: bool,
}

impl PageHeader {
    /// Returns the absolute granule position, or `None` if no packet completes on the page.
    pub fn granule_pos(&self) -> Option<u64> {
        if self.absgp == u64::MAX {
            None
        }
        else {
            Some(self.absgp)
        }
    }
}

/// Reads a `PageHeader` from the the provided reader.
fn read_page_header<B: ReadBytes>(reader: &mut B) -> Result<PageHeader> {
    // The OggS marker should be present.
    let marker = reader.read_quad_bytes()?;

    if marker != OGG_PAGE_MARKER {
        return decode_error("ogg: missing ogg stream marker");
    }

    let version = reader.read_byte()?;

    // There is only one Ogg version, and that is version 0.
    if version != 0 {
        return decode_error("ogg: invalid ogg version");
    }

    let flags = reader.read_byte()?;

    // Only the first 3 least-significant bits are used for flags.
    if flags & 0xf8 != 0 {
        return decode_error("ogg: invalid flag bits set");
    }

    let absgp = reader.read_u64()?;
    let serial = reader.read_u32()?;
    let sequence = reader.read_u32()?;
    let crc = reader.read_u32()?;
    let n_segments = reader.read_byte()?;

    Ok(PageHeader {
        version,
        absgp,
        serial,
        sequence,
        crc,
        n_segments,
        is_continuation: (flags & 0x01) != 0,
        is_first_page: (flags & 0x02) != 0,
        is_last_page: (flags & 0x04) != 0,
    })
}

/// Finds the offset of the next page capture pattern in `buf`.
pub fn find_page_marker(buf: &[u8]) -> Option<usize> {
    buf.windows(OGG_PAGE_MARKER.len()).position(|w| w == OGG_PAGE_MARKER)
}

/// An Ogg page borrowed from the caller's buffer.
pub struct Page<'a> {
    /// The page header.
    pub header: PageHeader,
    segments: &'a [u8],
    body: &'a [u8],
}

impl<'a> Page<'a> {
    /// Gets the lacing values of the segment table.
    pub fn segments(&self) -> &'a [u8] {
        self.segments
    }

    /// Gets the page body.
    pub fn body(&self) -> &'a [u8] {
        self.body
    }

    /// Gets the total size of the page in bytes, including the header.
    pub fn len(&self) -> usize {
        OGG_PAGE_HEADER_SIZE + self.segments.len() + self.body.len()
    }

    /// Returns `true` if the page body is empty.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Parses the page starting at the first byte of `buf`.
///
/// Returns `NeedMoreData` if `buf` ends before the page does, and a decode error if the header is
/// malformed or, when `verify_crc` is set, the checksum does not match.
pub fn parse_page(buf: &[u8], verify_crc: bool) -> Result<Page<'_>> {
    if buf.len() < OGG_PAGE_HEADER_SIZE {
        return need_more_data();
    }

    let header = read_page_header(&mut BufReader::new(&buf[..OGG_PAGE_HEADER_SIZE]))?;

    let body_start = OGG_PAGE_HEADER_SIZE + usize::from(header.n_segments);

    let segments = match buf.get(OGG_PAGE_HEADER_SIZE..body_start) {
        Some(segments) => segments,
        None => return need_more_data(),
    };

    let body_len = segments.iter().map(|&len| usize::from(len)).sum::<usize>();

    let page_buf = match buf.get(..body_start + body_len) {
        Some(page_buf) => page_buf,
        None => return need_more_data(),
    };

    if verify_crc {
        let mut crc32 = Crc32::new(0);

        // The CRC is calculated over the whole page with the CRC field set to 0.
        crc32.process_buf_bytes(&page_buf[..OGG_PAGE_CRC_OFFSET]);
        crc32.process_buf_bytes(&[0; 4]);
        crc32.process_buf_bytes(&page_buf[OGG_PAGE_CRC_OFFSET + 4..]);

        if crc32.crc() != header.crc {
            return decode_error("ogg: crc mismatch");
        }
    }

    Ok(Page { header, segments, body: &page_buf[body_start..] })
}
