// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use picodec_core::errors::{decode_error, limit_error, Result};
use picodec_core::io::{BitReaderRtl, ReadBitsRtl};
use picodec_core::util::alloc::try_boxed_slice;

use super::common::*;

/// The maximum number of entries a codebook may have.
const MAX_CODEBOOK_ENTRIES: u32 = 1 << 20;

/// The maximum number of values in an unpacked VQ table.
const MAX_VQ_VALUES: u64 = 1 << 20;

/// The maximum number of bits resolved by a single lookup into the fast table.
const FAST_BITS: u32 = 8;

/// Fast table entries are `(payload << 8) | flags | len`. A zero entry is an invalid codeword.
const FAST_LEN_MASK: u32 = 0x3f;
const FAST_SUBTREE: u32 = 0x80;

/// Marks a tree child as a leaf. The remaining bits are the entry number.
const LEAF: u32 = 1 << 31;

/// As defined in section 9.2.3 of the Vorbis I specification.
///
/// Returns the greatest integer value for which the value to the power of `dimensions` is less
/// than or equal to `entries`.
fn lookup1_values(entries: u32, dimensions: u16) -> u32 {
    let fits = |r: u32| {
        let mut acc = 1u64;
        for _ in 0..dimensions {
            acc *= u64::from(r);
            if acc > u64::from(entries) {
                return false;
            }
        }
        true
    };

    let mut lo = 0;
    let mut hi = entries;

    while lo < hi {
        let mid = lo + (hi - lo + 1) / 2;

        if fits(mid) {
            lo = mid;
        }
        else {
            hi = mid - 1;
        }
    }

    lo
}

/// Assigns canonical codewords, most-significant bit first, to a list of codeword lengths. Unused
/// entries have a length of 0 and are assigned a codeword of 0.
///
/// `marker[n]` holds the next free codeword of length `n`. Taking a codeword advances the markers
/// of shorter lengths along the path to the root, and moves the markers of longer lengths that
/// would have used it as a prefix onto the next branch.
pub(crate) fn make_words(lens: &[u8]) -> Result<Vec<u32>> {
    let mut marker = [0u32; 33];
    let mut words = Vec::with_capacity(lens.len());

    let mut n_used = 0;

    for &len in lens {
        if len == 0 {
            words.push(0);
            continue;
        }

        debug_assert!(len <= 32);

        let len = usize::from(len);
        let mut entry = marker[len];

        if len < 32 && entry >> len != 0 {
            return decode_error("vorbis: codebook overspecified");
        }

        words.push(entry);
        n_used += 1;

        for j in (1..=len).rev() {
            if marker[j] & 1 == 1 {
                if j == 1 {
                    marker[1] += 1;
                }
                else {
                    marker[j] = marker[j - 1] << 1;
                }
                break;
            }

            marker[j] = marker[j].wrapping_add(1);
        }

        for j in len + 1..33 {
            if marker[j] >> 1 != entry {
                break;
            }

            entry = marker[j];
            marker[j] = marker[j - 1] << 1;
        }
    }

    // Single entry codebooks are technically invalid, but must be supported as a special-case per
    // Vorbis I specification, errata 20150226.
    if n_used != 1 {
        let underspecified = (1..33).any(|i| marker[i] & (u32::MAX >> (32 - i)) != 0);

        if underspecified {
            return decode_error("vorbis: codebook underspecified");
        }
    }

    Ok(words)
}

/// Resolves codewords longer than the fast table. Nodes are pairs of children indexed by the next
/// bit. A child is either the index of the next node, a leaf, or zero if no codeword takes that
/// branch. Node 0 is never referenced.
///
/// The narrowest node width that can represent every node index and entry number is used.
enum DecodeTree {
    U8(Box<[[u8; 2]]>),
    U16(Box<[[u16; 2]]>),
    U32(Box<[[u32; 2]]>),
}

impl DecodeTree {
    fn new(nodes: &[[u32; 2]], entries: u32) -> DecodeTree {
        let bound = (nodes.len() as u32).max(entries);

        fn narrow<T>(nodes: &[[u32; 2]], flag: u32, conv: impl Fn(u32) -> T) -> Box<[[T; 2]]> {
            let map = |c: u32| if c & LEAF != 0 { (c & !LEAF) | flag } else { c };
            nodes.iter().map(|n| [conv(map(n[0])), conv(map(n[1]))]).collect()
        }

        if bound < 0x80 {
            DecodeTree::U8(narrow(nodes, 0x80, |c| c as u8))
        }
        else if bound < 0x8000 {
            DecodeTree::U16(narrow(nodes, 0x8000, |c| c as u16))
        }
        else {
            DecodeTree::U32(nodes.into())
        }
    }

    /// Gets the child of `node` taken by `bit`, using [`LEAF`] to flag leaves.
    #[inline(always)]
    fn child(&self, node: u32, bit: u32) -> u32 {
        let (node, bit) = (node as usize, bit as usize);

        match self {
            DecodeTree::U8(nodes) => {
                let c = u32::from(nodes[node][bit]);
                if c & 0x80 != 0 { LEAF | (c & 0x7f) } else { c }
            }
            DecodeTree::U16(nodes) => {
                let c = u32::from(nodes[node][bit]);
                if c & 0x8000 != 0 { LEAF | (c & 0x7fff) } else { c }
            }
            DecodeTree::U32(nodes) => nodes[node][bit],
        }
    }
}

/// An unpacked VQ table. The real value of an element `t` is `t * 2^exp`.
struct VqTable {
    values: Box<[i32]>,
    exp: i32,
}

impl VqTable {
    fn new(values: &[Scaled]) -> Result<VqTable> {
        let max_mag = values.iter().map(|v| v.magnitude()).max().unwrap_or(i32::MIN);

        // Leave one bit of headroom.
        let exp = if max_mag == i32::MIN { 0 } else { max_mag - 30 };

        let mut table = try_boxed_slice(values.len(), 0)?;

        for (t, v) in table.iter_mut().zip(values) {
            *t = v.to_fixed(-exp);
        }

        Ok(VqTable { values: table, exp })
    }
}

struct CodebookHeader {
    dimensions: u16,
    lens: Vec<u8>,
    lookup: Option<Vec<Scaled>>,
}

fn read_header(bs: &mut BitReaderRtl<'_>) -> Result<CodebookHeader> {
    // Verify codebook synchronization word.
    let sync = bs.read_bits_leq32(24)?;

    if sync != 0x564342 {
        return decode_error("vorbis: invalid codebook sync");
    }

    let dimensions = bs.read_bits_leq32(16)? as u16;
    let entries = bs.read_bits_leq32(24)?;

    if entries == 0 {
        return decode_error("vorbis: codebook has no entries");
    }

    if entries > MAX_CODEBOOK_ENTRIES {
        return limit_error("vorbis: codebook has too many entries");
    }

    let mut lens = Vec::with_capacity(entries as usize);

    if bs.read_bool()? {
        // Length ordered. Runs of entries share each length, starting from the shortest.
        let mut cur_entry = 0;
        let mut cur_len = bs.read_bits_leq32(5)? + 1;

        while cur_entry < entries {
            if cur_len > 32 {
                return decode_error("vorbis: invalid codebook lengths");
            }

            let num = bs.read_bits_leq32(ilog(entries - cur_entry))?;

            if num > entries - cur_entry {
                return decode_error("vorbis: invalid codebook lengths");
            }

            lens.extend(std::iter::repeat(cur_len as u8).take(num as usize));

            cur_entry += num;
            cur_len += 1;
        }
    }
    else {
        let is_sparse = bs.read_bool()?;

        for _ in 0..entries {
            // Unused entries of sparse codebooks have a length of 0.
            let is_used = !is_sparse || bs.read_bool()?;

            let len = if is_used { bs.read_bits_leq32(5)? as u8 + 1 } else { 0 };

            lens.push(len);
        }
    }

    let lookup_type = bs.read_bits_leq32(4)?;

    let lookup = match lookup_type {
        0 => None,
        1 | 2 => {
            if dimensions == 0 {
                return decode_error("vorbis: vq codebook has no dimensions");
            }

            let min_value = Scaled::float32_unpack(bs.read_bits_leq32(32)?);
            let delta_value = Scaled::float32_unpack(bs.read_bits_leq32(32)?);
            let value_bits = bs.read_bits_leq32(4)? + 1;
            let sequence_p = bs.read_bool()?;

            let n_values = u64::from(entries) * u64::from(dimensions);

            if n_values > MAX_VQ_VALUES {
                return limit_error("vorbis: vq table is too large");
            }

            let lookup_values = match lookup_type {
                1 => lookup1_values(entries, dimensions),
                _ => n_values as u32,
            };

            let mut multiplicands = Vec::with_capacity(lookup_values as usize);

            for _ in 0..lookup_values {
                let m = bs.read_bits_leq32(value_bits)?;
                multiplicands.push(Scaled::new(i64::from(m), 0).mul(delta_value).add(min_value));
            }

            let dims = usize::from(dimensions);

            let mut values = Vec::with_capacity(n_values as usize);

            for entry in 0..entries as usize {
                let mut last = Scaled::ZERO;
                let mut divisor = 1usize;

                for d in 0..dims {
                    let offset = if lookup_type == 1 {
                        // Each dimension is a digit of the entry number in base `lookup_values`.
                        let offset = (entry / divisor) % lookup_values as usize;
                        divisor = divisor.saturating_mul(lookup_values as usize);
                        offset
                    }
                    else {
                        entry * dims + d
                    };

                    let value = multiplicands[offset].add(last);

                    if sequence_p {
                        last = value;
                    }

                    values.push(value);
                }
            }

            Some(values)
        }
        _ => return decode_error("vorbis: invalid codebook lookup type"),
    };

    Ok(CodebookHeader { dimensions, lens, lookup })
}

/// A Vorbis codebook. Entries are decoded with a table indexed by the next `fast_bits` bits of
/// the stream, and a tree for any remaining bits of longer codewords.
pub struct VorbisCodebook {
    fast: Box<[u32]>,
    fast_bits: u32,
    tree: DecodeTree,
    dimensions: u16,
    entries: u32,
    vq: Option<VqTable>,
}

impl VorbisCodebook {
    pub fn read(bs: &mut BitReaderRtl<'_>) -> Result<Self> {
        let header = read_header(bs)?;

        let words = make_words(&header.lens)?;

        let entries = header.lens.len() as u32;

        let n_used = header.lens.iter().filter(|&&len| len > 0).count();
        let max_len = header.lens.iter().copied().max().map_or(0, u32::from);

        let fast_bits = max_len.min(FAST_BITS);

        let mut fast = try_boxed_slice(1 << fast_bits, 0u32)?;
        let mut nodes = vec![[0u32; 2]];

        for (entry, (&len, &word)) in header.lens.iter().zip(&words).enumerate() {
            if len == 0 {
                continue;
            }

            let len = u32::from(len);

            // Codewords are read least-significant bit first, so reverse them.
            let rev = word.reverse_bits() >> (32 - len);

            let leaf = ((entry as u32) << 8) | len;

            if n_used == 1 {
                // Any bit pattern decodes the only entry.
                fast.iter_mut().for_each(|e| *e = leaf);
            }
            else if len <= fast_bits {
                for k in 0..1u32 << (fast_bits - len) {
                    let slot = &mut fast[(rev | (k << len)) as usize];

                    if *slot != 0 {
                        return decode_error("vorbis: codebook has conflicting codewords");
                    }

                    *slot = leaf;
                }
            }
            else {
                let prefix = (rev & ((1 << fast_bits) - 1)) as usize;

                let mut node = match fast[prefix] {
                    0 => {
                        let root = nodes.len() as u32;
                        nodes.push([0; 2]);
                        fast[prefix] = (root << 8) | FAST_SUBTREE;
                        root
                    }
                    e if e & FAST_SUBTREE != 0 => e >> 8,
                    _ => return decode_error("vorbis: codebook has conflicting codewords"),
                };

                for k in fast_bits..len {
                    let bit = ((rev >> k) & 1) as usize;
                    let child = nodes[node as usize][bit];

                    if k == len - 1 {
                        if child != 0 {
                            return decode_error("vorbis: codebook has conflicting codewords");
                        }

                        nodes[node as usize][bit] = LEAF | entry as u32;
                    }
                    else if child == 0 {
                        let next = nodes.len() as u32;
                        nodes.push([0; 2]);
                        nodes[node as usize][bit] = next;
                        node = next;
                    }
                    else if child & LEAF != 0 {
                        return decode_error("vorbis: codebook has conflicting codewords");
                    }
                    else {
                        node = child;
                    }
                }
            }
        }

        let vq = match &header.lookup {
            Some(values) => Some(VqTable::new(values)?),
            None => None,
        };

        Ok(VorbisCodebook {
            fast,
            fast_bits,
            tree: DecodeTree::new(&nodes, entries),
            dimensions: header.dimensions,
            entries,
            vq,
        })
    }

    /// Reads a codeword and returns the entry number.
    pub fn read_scalar(&self, bs: &mut BitReaderRtl<'_>) -> Result<u32> {
        let e = self.fast[bs.peek_bits_leq32(self.fast_bits) as usize];

        if e & FAST_SUBTREE == 0 {
            let len = e & FAST_LEN_MASK;

            if len == 0 {
                return decode_error("vorbis: invalid codeword");
            }

            bs.ignore_bits(len)?;

            return Ok(e >> 8);
        }

        bs.ignore_bits(self.fast_bits)?;

        let mut node = e >> 8;

        loop {
            let child = self.tree.child(node, bs.read_bit()?);

            if child & LEAF != 0 {
                return Ok(child & !LEAF);
            }

            if child == 0 {
                return decode_error("vorbis: invalid codeword");
            }

            node = child;
        }
    }

    /// Reads a codeword and returns the VQ vector of the entry. The real value of each element
    /// `t` is `t * 2^vq_exp()`.
    pub fn read_vq(&self, bs: &mut BitReaderRtl<'_>) -> Result<&[i32]> {
        let entry = self.read_scalar(bs)?;

        match &self.vq {
            Some(vq) => {
                let dims = usize::from(self.dimensions);
                let start = dims * entry as usize;

                Ok(&vq.values[start..start + dims])
            }
            None => decode_error("vorbis: not a vq codebook"),
        }
    }

    pub fn vq_exp(&self) -> i32 {
        self.vq.as_ref().map_or(0, |vq| vq.exp)
    }

    pub fn has_vq(&self) -> bool {
        self.vq.is_some()
    }

    pub fn dimensions(&self) -> u16 {
        self.dimensions
    }

    pub fn entries(&self) -> u32 {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{BitWriter, CodebookSpec, LookupSpec};

    use picodec_core::errors::Error;
    use picodec_core::io::FiniteBitStream;

    use rand::{rngs::SmallRng, Rng, SeedableRng};

    fn read_codebook(spec: &CodebookSpec) -> Result<VorbisCodebook> {
        let mut bw = BitWriter::new();
        spec.write(&mut bw);
        let buf = bw.into_bytes();
        VorbisCodebook::read(&mut BitReaderRtl::new(&buf))
    }

    #[test]
    fn verify_lookup1_values() {
        fn naive(entries: u32, dimensions: u16) -> u32 {
            let mut r = 0u32;
            while u64::from(r + 1).pow(u32::from(dimensions)) <= u64::from(entries) {
                r += 1;
            }
            r
        }

        for (entries, dims) in [(1, 1), (16, 2), (15, 2), (17, 2), (81, 4), (80, 4), (1000, 3)] {
            assert_eq!(lookup1_values(entries, dims), naive(entries, dims));
        }

        assert_eq!(lookup1_values(5, 16), 1);
        assert_eq!(lookup1_values(1 << 20, 1), 1 << 20);
    }

    #[test]
    fn verify_make_words() {
        // Example from section 3.2.1 of the Vorbis I specification.
        assert_eq!(make_words(&[2, 4, 4, 4, 4, 2, 3, 3]).unwrap(), &[0, 4, 5, 6, 7, 2, 6, 7]);
        assert_eq!(make_words(&[1, 2, 3, 3]).unwrap(), &[0, 2, 6, 7]);
        assert_eq!(make_words(&[2, 2, 2, 2]).unwrap(), &[0, 1, 2, 3]);
        assert_eq!(make_words(&[1, 1]).unwrap(), &[0, 1]);

        // Single entry codebooks are allowed.
        assert_eq!(make_words(&[0, 5, 0]).unwrap(), &[0, 0, 0]);

        assert!(make_words(&[1, 1, 1]).is_err());
        assert!(make_words(&[1, 2]).is_err());
    }

    #[test]
    fn verify_read_scalar() {
        let spec = CodebookSpec::scalar(&[2, 4, 4, 4, 4, 2, 3, 3]);
        let codebook = read_codebook(&spec).unwrap();

        assert_eq!(codebook.entries(), 8);
        assert!(!codebook.has_vq());

        let symbols = [0usize, 5, 7, 1, 4, 6, 2, 3, 0, 0];

        let mut bw = BitWriter::new();
        for &s in &symbols {
            spec.write_entry(&mut bw, s);
        }
        let buf = bw.into_bytes();

        let mut bs = BitReaderRtl::new(&buf);
        for &s in &symbols {
            assert_eq!(codebook.read_scalar(&mut bs).unwrap(), s as u32);
        }

        assert!(codebook.read_vq(&mut BitReaderRtl::new(&buf)).is_err());
    }

    #[test]
    fn verify_single_entry_codebook() {
        let spec = CodebookSpec::scalar(&[0, 1, 0]);
        let codebook = read_codebook(&spec).unwrap();

        let buf = [0b1010_1010];
        let mut bs = BitReaderRtl::new(&buf);

        for _ in 0..8 {
            assert_eq!(codebook.read_scalar(&mut bs).unwrap(), 1);
        }

        // Each read consumes the declared codeword length, whatever the bits are.
        let codebook = read_codebook(&CodebookSpec::scalar(&[3])).unwrap();

        let mut bs = BitReaderRtl::new(&buf);

        assert_eq!(codebook.read_scalar(&mut bs).unwrap(), 0);
        assert_eq!(codebook.read_scalar(&mut bs).unwrap(), 0);
        assert_eq!(bs.bits_left(), 2);
        assert_eq!(codebook.read_scalar(&mut bs), Err(Error::EndOfBitstream));
    }

    /// Generates the codeword lengths of a random complete prefix code by repeatedly splitting a
    /// random leaf.
    fn random_lengths(rng: &mut SmallRng, n_entries: usize, max_len: u8) -> Vec<u8> {
        let mut lens = vec![1u8, 1];

        while lens.len() < n_entries {
            let i = rng.random_range(0..lens.len());

            if lens[i] < max_len {
                lens[i] += 1;
                lens.push(lens[i]);
            }
        }

        // Shuffle.
        for i in (1..lens.len()).rev() {
            let j = rng.random_range(0..=i);
            lens.swap(i, j);
        }

        lens
    }

    #[test]
    fn verify_ordered_and_unordered_codebooks() {
        let mut rng = SmallRng::seed_from_u64(0x5eed);

        for round in 0..16 {
            let mut lens = random_lengths(&mut rng, 40 + 25 * round, 20);

            let ordered = round % 2 == 0;

            if ordered {
                lens.sort_unstable();
            }

            let spec = CodebookSpec { dimensions: 1, lengths: lens.clone(), ordered, lookup: None };
            let codebook = read_codebook(&spec).unwrap();

            let symbols: Vec<usize> = (0..500).map(|_| rng.random_range(0..lens.len())).collect();

            let mut bw = BitWriter::new();
            for &s in &symbols {
                spec.write_entry(&mut bw, s);
            }
            let buf = bw.into_bytes();

            let mut bs = BitReaderRtl::new(&buf);
            for &s in &symbols {
                assert_eq!(codebook.read_scalar(&mut bs).unwrap(), s as u32);
            }
        }
    }

    #[test]
    fn verify_invalid_codebooks() {
        // Bad sync.
        let buf = [0u8; 16];
        assert!(VorbisCodebook::read(&mut BitReaderRtl::new(&buf)).is_err());

        // Overspecified.
        assert!(read_codebook(&CodebookSpec::scalar(&[1, 1, 1])).is_err());

        // Truncated.
        let mut bw = BitWriter::new();
        CodebookSpec::scalar(&[2, 2, 2, 2]).write(&mut bw);
        let buf = bw.into_bytes();
        assert!(VorbisCodebook::read(&mut BitReaderRtl::new(&buf[..buf.len() - 1])).is_err());
    }

    #[test]
    fn verify_vq_lookup_type1() {
        let spec = CodebookSpec {
            dimensions: 2,
            lengths: vec![2, 2, 2, 2],
            ordered: false,
            lookup: Some(LookupSpec {
                lookup_type: 1,
                min: -1.0,
                delta: 1.0,
                value_bits: 1,
                sequence_p: false,
                multiplicands: vec![0, 1],
            }),
        };

        let codebook = read_codebook(&spec).unwrap();

        assert!(codebook.has_vq());
        assert_eq!(codebook.vq_exp(), -29);

        let one = 1 << 29;

        let mut bw = BitWriter::new();
        for entry in 0..4 {
            spec.write_entry(&mut bw, entry);
        }
        let buf = bw.into_bytes();

        let mut bs = BitReaderRtl::new(&buf);
        assert_eq!(codebook.read_vq(&mut bs).unwrap(), &[-one, -one]);
        assert_eq!(codebook.read_vq(&mut bs).unwrap(), &[0, -one]);
        assert_eq!(codebook.read_vq(&mut bs).unwrap(), &[-one, 0]);
        assert_eq!(codebook.read_vq(&mut bs).unwrap(), &[0, 0]);
    }

    #[test]
    fn verify_vq_lookup_type2_sequence() {
        // Values accumulate along each vector when sequence_p is set.
        let spec = CodebookSpec {
            dimensions: 2,
            lengths: vec![1, 1],
            ordered: false,
            lookup: Some(LookupSpec {
                lookup_type: 2,
                min: 0.5,
                delta: 0.25,
                value_bits: 3,
                sequence_p: true,
                multiplicands: vec![0, 2, 4, 6],
            }),
        };

        let codebook = read_codebook(&spec).unwrap();

        // The largest value is 0.5 + 1.5 + 0.5 + 1.0 = 3.5.
        assert_eq!(codebook.vq_exp(), -28);

        let q = |x: f64| (x * f64::from(1 << 28)) as i32;

        let buf = [0b10];
        let mut bs = BitReaderRtl::new(&buf);
        assert_eq!(codebook.read_vq(&mut bs).unwrap(), &[q(0.5), q(1.5)]);
        assert_eq!(codebook.read_vq(&mut bs).unwrap(), &[q(1.5), q(3.5)]);
    }

    #[test]
    fn verify_decode_tree_widths() {
        let nodes = vec![[0, 0], [2, LEAF | 5], [LEAF | 6, 0]];

        let tree = DecodeTree::new(&nodes, 10);
        assert!(matches!(tree, DecodeTree::U8(_)));
        assert_eq!(tree.child(1, 0), 2);
        assert_eq!(tree.child(1, 1), LEAF | 5);
        assert_eq!(tree.child(2, 0), LEAF | 6);
        assert_eq!(tree.child(2, 1), 0);

        let tree = DecodeTree::new(&nodes, 1000);
        assert!(matches!(tree, DecodeTree::U16(_)));
        assert_eq!(tree.child(1, 1), LEAF | 5);

        let tree = DecodeTree::new(&nodes, 1 << 20);
        assert!(matches!(tree, DecodeTree::U32(_)));
        assert_eq!(tree.child(2, 0), LEAF | 6);
    }
}
