// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use picodec_core::codecs::DecodeFailure;
use picodec_core::errors::{limit_error, Error, Result};
use picodec_core::util::alloc::try_boxed_slice;

use log::{debug, warn};

use crate::page::*;

/// Options for an [`OggReader`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OggReaderOptions {
    /// Verify the CRC of every page. Pages that fail verification are skipped.
    pub verify_crc: bool,
    /// The maximum length of a packet that spans more than one page. Longer packets are dropped.
    pub max_packet_len: usize,
}

impl Default for OggReaderOptions {
    fn default() -> Self {
        OggReaderOptions { verify_crc: true, max_packet_len: 128 * 1024 }
    }
}

/// The result of pushing a page into an [`OggReader`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PageRead {
    /// The number of input bytes consumed, including any junk before the page.
    pub consumed: usize,
    /// The header of the page that was read.
    pub header: PageHeader,
    /// The page started a new logical stream.
    pub new_stream: bool,
    /// The page belongs to the logical stream being read. Pages of other streams are skipped.
    pub accepted: bool,
}

/// A run of segments within the current page that belongs to one packet.
#[derive(Copy, Clone, Debug)]
struct FragmentDesc {
    start: usize,
    len: usize,
    starts_packet: bool,
    ends_packet: bool,
    /// The last packet to complete on the page.
    is_final: bool,
}

/// A piece of a packet as it appears within one page.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Fragment<'a> {
    pub data: &'a [u8],
    /// The fragment is the first piece of its packet.
    pub starts_packet: bool,
    /// The fragment completes its packet.
    pub ends_packet: bool,
    /// The granule position of the page, if this fragment completes the page's final packet.
    pub granule_pos: Option<u64>,
    /// The fragment completes the final packet of the logical stream.
    pub is_last: bool,
}

/// A complete packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OggPacket<'a> {
    pub data: &'a [u8],
    /// The serial number of the logical stream the packet belongs to.
    pub serial: u32,
    /// The granule position of the page, if this packet is the page's final packet.
    pub granule_pos: Option<u64>,
    /// The packet is the final packet of the logical stream.
    pub is_last: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Carry {
    /// No packet is being assembled.
    Empty,
    /// A packet is being assembled and expects a continuation page.
    Partial,
    /// The carry buffer holds a complete packet that was returned to the caller.
    Complete,
    /// A packet is longer than the carry buffer and is being discarded.
    Oversized,
}

/// A push-based reader for a single logical Ogg stream.
///
/// Pages are pushed one at a time with [`OggReader::read_page`], after which the packets that
/// complete on that page are available from [`OggReader::next_packet`]. A packet that is not
/// terminated on its page is carried over and joined with the segments of the next continuation
/// page.
///
/// All buffers are allocated when the reader is instantiated.
pub struct OggReader {
    options: OggReaderOptions,
    /// The body of the current page.
    page_buf: Box<[u8]>,
    /// The header of the current page.
    page: PageHeader,
    frags: Vec<FragmentDesc>,
    next_frag: usize,
    carry_buf: Box<[u8]>,
    carry_len: usize,
    carry: Carry,
    /// The final packet of the current page continues on the next page.
    open_tail: bool,
    serial: Option<u32>,
    expected_sequence: Option<u32>,
    n_pages: u64,
    ended: bool,
}

impl OggReader {
    /// Instantiate a new reader, allocating its page and carry buffers.
    pub fn try_new(options: &OggReaderOptions) -> Result<Self> {
        let mut frags = Vec::new();
        frags.try_reserve_exact(255).map_err(|_| Error::OutOfMemory)?;

        Ok(OggReader {
            options: *options,
            page_buf: try_boxed_slice(OGG_PAGE_MAX_BODY_SIZE, 0)?,
            page: Default::default(),
            frags,
            next_frag: 0,
            carry_buf: try_boxed_slice(options.max_packet_len, 0)?,
            carry_len: 0,
            carry: Carry::Empty,
            open_tail: false,
            serial: None,
            expected_sequence: None,
            n_pages: 0,
            ended: false,
        })
    }

    /// Gets the serial number of the logical stream being read.
    pub fn serial(&self) -> Option<u32> {
        self.serial
    }

    /// Returns `true` if the current page has unread fragments.
    pub fn has_pending(&self) -> bool {
        self.next_frag < self.frags.len()
    }

    /// Forget the logical stream being read and all buffered data.
    pub fn reset(&mut self) {
        self.frags.clear();
        self.next_frag = 0;
        self.clear_carry();
        self.open_tail = false;
        self.serial = None;
        self.expected_sequence = None;
        self.n_pages = 0;
        self.ended = false;
    }

    /// Finds and reads the next page from `input`.
    ///
    /// Junk before the page and pages failing verification are skipped. If no complete page is
    /// available, `NeedMoreData` is returned along with the number of bytes that may be dropped.
    /// When a page of the stream being read is accepted, unread fragments of the previous page are
    /// discarded.
    pub fn read_page(&mut self, input: &[u8]) -> std::result::Result<PageRead, DecodeFailure> {
        let mut pos = 0;

        loop {
            let start = match find_page_marker(&input[pos..]) {
                Some(offset) => pos + offset,
                None => {
                    // Keep a tail that could be the start of a capture pattern.
                    let consumed = input.len().saturating_sub(OGG_PAGE_MARKER.len() - 1).max(pos);
                    return Err(DecodeFailure::new(consumed, Error::NeedMoreData));
                }
            };

            match parse_page(&input[start..], self.options.verify_crc) {
                Ok(page) => {
                    if start > 0 {
                        warn!("ogg: skipped {} bytes of junk", start);
                    }

                    let consumed = start + page.len();
                    let (new_stream, accepted) = self.accept_page(&page);

                    return Ok(PageRead { consumed, header: page.header, new_stream, accepted });
                }
                Err(Error::NeedMoreData) => {
                    return Err(DecodeFailure::new(start, Error::NeedMoreData));
                }
                Err(err) => {
                    warn!("ogg: {}, resynchronizing", err);
                    pos = start + 1;
                }
            }
        }
    }

    /// Gets the next fragment of the current page without joining it to other fragments.
    ///
    /// This allows a large packet to be consumed incrementally as pages arrive. It must only be
    /// used at a packet boundary: a packet partially assembled by `next_packet` is dropped.
    pub fn next_fragment(&mut self) -> Option<Fragment<'_>> {
        match self.carry {
            Carry::Empty => (),
            Carry::Complete => self.clear_carry(),
            Carry::Partial | Carry::Oversized => {
                warn!("ogg: dropping partially assembled packet");
                self.clear_carry();
            }
        }

        let desc = *self.frags.get(self.next_frag)?;
        self.next_frag += 1;

        let is_final = desc.is_final;

        Some(Fragment {
            data: &self.page_buf[desc.start..desc.start + desc.len],
            starts_packet: desc.starts_packet,
            ends_packet: desc.ends_packet,
            granule_pos: if is_final { self.page.granule_pos() } else { None },
            is_last: is_final && self.page.is_last_page,
        })
    }

    /// Gets the next complete packet, or `None` if the current page has no more packets.
    ///
    /// Returns a limit error when a packet longer than the carry buffer completes. The oversized
    /// packet is dropped.
    pub fn next_packet(&mut self) -> Result<Option<OggPacket<'_>>> {
        if self.carry == Carry::Complete {
            self.clear_carry();
        }

        loop {
            let desc = match self.frags.get(self.next_frag) {
                Some(desc) => *desc,
                None => return Ok(None),
            };

            self.next_frag += 1;

            match self.carry {
                Carry::Empty if !desc.starts_packet => {
                    debug!("ogg: skipping the tail of a packet that was not assembled");
                }
                Carry::Empty if desc.ends_packet => {
                    // The whole packet is on this page and can be returned without a copy.
                    return Ok(Some(self.packet(desc, desc.start, desc.start + desc.len, false)));
                }
                Carry::Oversized => {
                    if desc.ends_packet {
                        self.clear_carry();
                        return limit_error("ogg: packet exceeds the maximum length");
                    }
                }
                _ => {
                    let end = self.carry_len + desc.len;

                    if end > self.carry_buf.len() {
                        warn!("ogg: dropping packet longer than {} bytes", self.carry_buf.len());

                        self.carry = Carry::Oversized;
                        self.carry_len = 0;

                        if desc.ends_packet {
                            self.clear_carry();
                            return limit_error("ogg: packet exceeds the maximum length");
                        }

                        continue;
                    }

                    self.carry_buf[self.carry_len..end]
                        .copy_from_slice(&self.page_buf[desc.start..desc.start + desc.len]);

                    self.carry_len = end;

                    if desc.ends_packet {
                        self.carry = Carry::Complete;
                        return Ok(Some(self.packet(desc, 0, end, true)));
                    }

                    self.carry = Carry::Partial;
                }
            }
        }
    }

    fn packet(&self, desc: FragmentDesc, start: usize, end: usize, carried: bool) -> OggPacket<'_> {
        let data = if carried { &self.carry_buf[start..end] } else { &self.page_buf[start..end] };

        OggPacket {
            data,
            serial: self.page.serial,
            granule_pos: if desc.is_final { self.page.granule_pos() } else { None },
            is_last: desc.is_final && self.page.is_last_page,
        }
    }

    fn clear_carry(&mut self) {
        self.carry = Carry::Empty;
        self.carry_len = 0;
    }

    /// Decides if the page belongs to the stream being read and, if so, splits it into fragments.
    fn accept_page(&mut self, page: &Page<'_>) -> (bool, bool) {
        let header = page.header;

        let new_stream = match self.serial {
            Some(serial) if serial == header.serial => header.is_first_page,
            Some(serial) => {
                // The first pages of all multiplexed streams precede any other page, so a first
                // page after the current stream has started chains a new stream.
                if !(header.is_first_page && (self.ended || self.n_pages > 1)) {
                    debug!(
                        "ogg: skipping page of stream {:#x}, reading {:#x}",
                        header.serial, serial
                    );
                    return (false, false);
                }
                true
            }
            None => true,
        };

        self.frags.clear();
        self.next_frag = 0;

        if new_stream {
            debug!("ogg: start of logical stream {:#x}", header.serial);

            if self.carry == Carry::Partial {
                warn!("ogg: dropping partial packet at the start of a new stream");
            }

            self.clear_carry();
            self.open_tail = false;
            self.serial = Some(header.serial);
            self.expected_sequence = None;
            self.n_pages = 0;
            self.ended = false;
        }

        let mut lost = false;

        if let Some(expected) = self.expected_sequence {
            if header.sequence != expected {
                warn!("ogg: expected page {}, got page {}", expected, header.sequence);
                lost = true;
            }
        }

        self.expected_sequence = Some(header.sequence.wrapping_add(1));
        self.n_pages += 1;
        self.ended |= header.is_last_page;
        self.page = header;

        let continues = self.open_tail;

        // The first packet on a continuation page continues the final packet of the previous page.
        // If that packet was never seen, or a page was lost, the first packet is only a tail.
        let skip_first = if header.is_continuation {
            if continues && lost {
                warn!("ogg: dropping partial packet after a missing page");
                self.clear_carry();
            }
            !continues || lost
        }
        else {
            if continues {
                warn!("ogg: expected a continuation page, dropping partial packet");
                self.clear_carry();
            }
            false
        };

        let body = page.body();
        self.page_buf[..body.len()].copy_from_slice(body);

        let mut start = 0;
        let mut len = 0;

        for &lacing in page.segments() {
            len += usize::from(lacing);

            // A lacing value less than 255 terminates the packet.
            if lacing < 255 {
                let starts_packet = !(self.frags.is_empty() && header.is_continuation);

                self.frags.push(FragmentDesc {
                    start,
                    len,
                    starts_packet,
                    ends_packet: true,
                    is_final: false,
                });

                start += len;
                len = 0;
            }
        }

        // The final packet is unterminated and continues on the next page.
        if page.segments().last() == Some(&255) {
            let starts_packet = !(self.frags.is_empty() && header.is_continuation);

            self.frags.push(FragmentDesc {
                start,
                len,
                starts_packet,
                ends_packet: false,
                is_final: false,
            });
        }

        if let Some(last) = self.frags.iter_mut().rev().find(|frag| frag.ends_packet) {
            last.is_final = true;
        }

        self.open_tail = self.frags.last().map_or(false, |frag| !frag.ends_packet);

        if skip_first && self.frags.first().map_or(false, |frag| !frag.starts_packet) {
            debug!("ogg: skipping the tail of an unseen packet");
            self.next_frag = 1;
        }

        (new_stream, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::tests::*;

    use rand::{rngs::SmallRng, Rng, SeedableRng};

    const SERIAL: u32 = 0x5eed;

    fn reader(max_packet_len: usize) -> OggReader {
        OggReader::try_new(&OggReaderOptions { verify_crc: true, max_packet_len }).unwrap()
    }

    /// Lays the packets out into pages holding at most `max_segments` segments each.
    fn paginate(packets: &[Vec<u8>], max_segments: usize) -> Vec<u8> {
        // (lacing value, packet index, offset into packet)
        let mut laces = Vec::new();

        for (i, packet) in packets.iter().enumerate() {
            let mut offset = 0;

            loop {
                let lacing = (packet.len() - offset).min(255);
                laces.push((lacing as u8, i, offset));
                offset += lacing;

                if lacing < 255 {
                    break;
                }
            }
        }

        let mut out = Vec::new();

        for (seq, chunk) in laces.chunks(max_segments).enumerate() {
            let (_, _, first_offset) = chunk[0];

            let mut flags = if first_offset > 0 { FLAG_CONTINUATION } else { 0 };

            if seq == 0 {
                flags |= FLAG_FIRST;
            }

            let mut segments = Vec::new();
            let mut body = Vec::new();

            for &(lacing, i, offset) in chunk {
                segments.push(lacing);
                body.extend_from_slice(&packets[i][offset..offset + usize::from(lacing)]);
            }

            out.extend(build_page(flags, seq as u64, SERIAL, seq as u32, &segments, &body));
        }

        out
    }

    /// Pushes all pages of `input` through the reader and collects the packets.
    fn read_all(reader: &mut OggReader, input: &[u8]) -> Vec<Vec<u8>> {
        let mut packets = Vec::new();
        let mut pos = 0;

        while pos < input.len() {
            match reader.read_page(&input[pos..]) {
                Ok(read) => pos += read.consumed,
                Err(failure) => {
                    assert_eq!(failure.error, Error::NeedMoreData);
                    break;
                }
            }

            while let Some(packet) = reader.next_packet().unwrap() {
                packets.push(packet.data.to_vec());
            }
        }

        packets
    }

    fn random_packets(rng: &mut SmallRng, count: usize) -> Vec<Vec<u8>> {
        (0..count)
            .map(|_| {
                // Favour lengths around multiples of the maximum lacing value.
                let len = match rng.random_range(0..4) {
                    0 => 255 * rng.random_range(0..4),
                    1 => rng.random_range(0..16),
                    _ => rng.random_range(0..2000),
                };
                (0..len).map(|_| rng.random::<u8>()).collect()
            })
            .collect()
    }

    #[test]
    fn verify_split_packet_equivalence() {
        let mut rng = SmallRng::seed_from_u64(0x0995);

        for _ in 0..50 {
            let packets = random_packets(&mut rng, 12);

            // Whole pages and pages that split packets at every possible boundary.
            for max_segments in [255, 1, 2, 3, 7] {
                let input = paginate(&packets, max_segments);
                let mut reader = reader(64 * 1024);

                assert_eq!(read_all(&mut reader, &input), packets);
            }
        }
    }

    #[test]
    fn verify_read_page_in_chunks() {
        let packets = vec![vec![1u8; 300], vec![2u8; 10], vec![3u8; 700]];
        let input = paginate(&packets, 2);

        let mut reader = reader(4096);
        let mut buf = Vec::new();
        let mut read = Vec::new();

        // Feed the reader 100 bytes at a time.
        for chunk in input.chunks(100) {
            buf.extend_from_slice(chunk);

            loop {
                match reader.read_page(&buf) {
                    Ok(page) => {
                        buf.drain(..page.consumed);
                        while let Some(packet) = reader.next_packet().unwrap() {
                            read.push(packet.data.to_vec());
                        }
                    }
                    Err(failure) => {
                        assert_eq!(failure.error, Error::NeedMoreData);
                        assert_eq!(failure.consumed, 0);
                        break;
                    }
                }
            }
        }

        assert_eq!(read, packets);
    }

    #[test]
    fn verify_junk_and_corrupt_pages_are_skipped() {
        let mut input = b"junkOgg".to_vec();

        let mut corrupt = build_page(FLAG_FIRST, 0, SERIAL, 0, &[2], &[9, 9]);
        corrupt[28] ^= 1;

        input.extend(corrupt);
        input.extend(build_page(FLAG_FIRST, 0, SERIAL, 0, &[3], &[1, 2, 3]));

        let mut reader = reader(4096);

        let read = reader.read_page(&input).unwrap();
        assert_eq!(read.consumed, input.len());
        assert!(read.new_stream);

        assert_eq!(reader.next_packet().unwrap().unwrap().data, &[1, 2, 3]);
        assert!(reader.next_packet().unwrap().is_none());
    }

    #[test]
    fn verify_no_marker_keeps_tail() {
        let mut reader = reader(4096);

        let failure = reader.read_page(b"0123456789Ogg").unwrap_err();

        assert_eq!(failure.error, Error::NeedMoreData);
        assert_eq!(failure.consumed, 10);
    }

    #[test]
    fn verify_carry_dropped_without_continuation() {
        let mut input = build_page(FLAG_FIRST, 0, SERIAL, 0, &[1, 255], &[7; 256]);
        input.extend(build_page(0, 1, SERIAL, 1, &[2], &[8, 8]));

        let mut reader = reader(4096);

        assert_eq!(read_all(&mut reader, &input), vec![vec![7u8], vec![8u8, 8]]);
    }

    #[test]
    fn verify_orphan_continuation_is_skipped() {
        // Reading starts on a continuation page, so the first packet is incomplete.
        let mut input = build_page(FLAG_CONTINUATION, 0, SERIAL, 5, &[10, 3], &[4; 13]);
        input.extend(build_page(0, 1, SERIAL, 6, &[1], &[5]));

        let mut reader = reader(4096);

        assert_eq!(read_all(&mut reader, &input), vec![vec![4u8; 3], vec![5u8]]);
    }

    #[test]
    fn verify_missing_page_drops_carry() {
        let mut input = build_page(FLAG_FIRST, 0, SERIAL, 0, &[255], &[1; 255]);
        // Page 1 is lost.
        input.extend(build_page(FLAG_CONTINUATION, 0, SERIAL, 2, &[4, 2], &[3; 6]));

        let mut reader = reader(4096);

        assert_eq!(read_all(&mut reader, &input), vec![vec![3u8; 2]]);
    }

    #[test]
    fn verify_oversized_packet_is_dropped() {
        let packets = vec![vec![1u8; 600], vec![2u8; 20]];
        let input = paginate(&packets, 1);

        let mut reader = reader(512);
        let mut pos = 0;
        let mut errors = 0;
        let mut read = Vec::new();

        while pos < input.len() {
            pos += reader.read_page(&input[pos..]).unwrap().consumed;

            loop {
                match reader.next_packet() {
                    Ok(Some(packet)) => read.push(packet.data.to_vec()),
                    Ok(None) => break,
                    Err(err) => {
                        assert!(matches!(err, Error::LimitError(_)));
                        errors += 1;
                    }
                }
            }
        }

        assert_eq!(errors, 1);
        assert_eq!(read, vec![vec![2u8; 20]]);
    }

    #[test]
    fn verify_granule_and_end_of_stream() {
        let input = build_page(FLAG_FIRST | FLAG_LAST, 4410, SERIAL, 0, &[1, 2], &[1, 2, 2]);

        let mut reader = reader(4096);
        reader.read_page(&input).unwrap();

        let first = reader.next_packet().unwrap().unwrap();
        assert_eq!((first.granule_pos, first.is_last), (None, false));

        let last = reader.next_packet().unwrap().unwrap();
        assert_eq!((last.granule_pos, last.is_last), (Some(4410), true));
        assert_eq!(last.serial, SERIAL);
    }

    #[test]
    fn verify_fragments() {
        let mut input = build_page(FLAG_FIRST, 0, SERIAL, 0, &[255, 255], &[1; 510]);
        input.extend(build_page(FLAG_CONTINUATION, 9, SERIAL, 1, &[20, 5], &[2; 25]));

        let mut reader = reader(16);

        let read = reader.read_page(&input).unwrap();

        let frag = reader.next_fragment().unwrap();
        assert_eq!(frag.data.len(), 510);
        assert!(frag.starts_packet && !frag.ends_packet);
        assert!(reader.next_fragment().is_none());

        reader.read_page(&input[read.consumed..]).unwrap();

        let frag = reader.next_fragment().unwrap();
        assert_eq!(frag.data.len(), 20);
        assert!(!frag.starts_packet && frag.ends_packet);
        assert_eq!(frag.granule_pos, None);

        // Switch back to whole packets at the packet boundary.
        let packet = reader.next_packet().unwrap().unwrap();
        assert_eq!(packet.data, &[2; 5]);
        assert_eq!(packet.granule_pos, Some(9));
    }

    #[test]
    fn verify_chained_and_multiplexed_streams() {
        let mut input = build_page(FLAG_FIRST, 0, 1, 0, &[1], &[1]);
        // A multiplexed stream's first page is skipped.
        input.extend(build_page(FLAG_FIRST, 0, 2, 0, &[1], &[2]));
        input.extend(build_page(FLAG_LAST, 0, 1, 1, &[1], &[3]));
        // A chained stream follows the end of the first.
        input.extend(build_page(FLAG_FIRST, 0, 3, 0, &[1], &[4]));

        let mut reader = reader(4096);
        let mut pos = 0;
        let mut events = Vec::new();

        while pos < input.len() {
            let read = reader.read_page(&input[pos..]).unwrap();
            pos += read.consumed;

            let packet = reader.next_packet().unwrap().map(|packet| packet.data[0]);
            events.push((read.new_stream, read.accepted, packet));
        }

        assert_eq!(
            events,
            vec![
                (true, true, Some(1)),
                (false, false, None),
                (false, true, Some(3)),
                (true, true, Some(4)),
            ]
        );
        assert_eq!(reader.serial(), Some(3));
    }
}
