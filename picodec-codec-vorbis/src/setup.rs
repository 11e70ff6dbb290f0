// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Identification and setup header parsing.

use picodec_core::errors::{decode_error, unsupported_error, Result};
use picodec_core::io::{BitReaderRtl, BufReader, FiniteBitStream, ReadBitsRtl, ReadBytes};

use log::debug;
use smallvec::SmallVec;

use super::codebook::VorbisCodebook;
use super::common::*;
use super::floor::{Floor, Floor0, Floor1};
use super::residue::Residue;

pub const VORBIS_PACKET_TYPE_IDENTIFICATION: u8 = 1;
pub const VORBIS_PACKET_TYPE_SETUP: u8 = 5;

/// Follows the packet type byte of every header packet.
pub const VORBIS_HEADER_PACKET_SIGNATURE: &[u8] = b"vorbis";

/// Block size exponents allowed by Vorbis I (64 to 8192 samples).
const BLOCK_SIZE_EXP_RANGE: std::ops::RangeInclusive<u8> = 6..=13;

/// Stream parameters from the identification header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IdentHeader {
    pub n_channels: u8,
    pub sample_rate: u32,
    pub bitrate_max: u32,
    pub bitrate_nom: u32,
    pub bitrate_min: u32,
    /// Short block size exponent.
    pub bs0_exp: u8,
    /// Long block size exponent.
    pub bs1_exp: u8,
}

/// Consumes the packet type and signature common to all header packets.
fn read_packet_preamble<B: ReadBytes>(reader: &mut B, expected: u8, what: &str) -> Result<()> {
    let packet_type = reader.read_u8()?;

    let mut sig = [0; 6];
    reader.read_buf_exact(&mut sig)?;

    if packet_type != expected || sig != VORBIS_HEADER_PACKET_SIGNATURE {
        debug!("vorbis: expected {} header, found packet type {}", what, packet_type);
        return decode_error("vorbis: unexpected header packet");
    }

    Ok(())
}

pub fn read_ident_header<B: ReadBytes>(reader: &mut B) -> Result<IdentHeader> {
    read_packet_preamble(reader, VORBIS_PACKET_TYPE_IDENTIFICATION, "identification")?;

    if reader.read_u32()? != 0 {
        return unsupported_error("vorbis: unknown vorbis version");
    }

    let n_channels = match reader.read_u8()? {
        0 => return decode_error("vorbis: zero channels"),
        n if usize::from(n) > MAX_CHANNELS => {
            return unsupported_error("vorbis: more than two channels")
        }
        n => n,
    };

    let sample_rate = match reader.read_u32()? {
        0 => return decode_error("vorbis: zero sample rate"),
        rate => rate,
    };

    let bitrate_max = reader.read_u32()?;
    let bitrate_nom = reader.read_u32()?;
    let bitrate_min = reader.read_u32()?;

    // Short exponent in the low nibble, long exponent in the high nibble.
    let packed = reader.read_u8()?;
    let bs0_exp = packed & 0xf;
    let bs1_exp = packed >> 4;

    if !BLOCK_SIZE_EXP_RANGE.contains(&bs0_exp) || !BLOCK_SIZE_EXP_RANGE.contains(&bs1_exp) {
        return decode_error("vorbis: block size out of range");
    }

    if bs0_exp > bs1_exp {
        return decode_error("vorbis: short block larger than long block");
    }

    if reader.read_u8()? & 1 == 0 {
        return decode_error("vorbis: identification header not framed");
    }

    Ok(IdentHeader {
        n_channels,
        sample_rate,
        bitrate_max,
        bitrate_nom,
        bitrate_min,
        bs0_exp,
        bs1_exp,
    })
}

/// Everything the setup header configures, indexed by the numbers used in audio packets.
pub struct Setup {
    pub codebooks: Vec<VorbisCodebook>,
    pub floors: Vec<Box<dyn Floor>>,
    pub residues: Vec<Residue>,
    pub mappings: Vec<Mapping>,
    pub modes: Vec<Mode>,
}

/// Reads a `count_bits` wide count, minus one, followed by that many items.
fn read_list<T, F>(bs: &mut BitReaderRtl<'_>, count_bits: u32, mut read_item: F) -> Result<Vec<T>>
where
    F: FnMut(&mut BitReaderRtl<'_>) -> Result<T>,
{
    let count = bs.read_bits_leq32(count_bits)? as usize + 1;

    let mut items = Vec::with_capacity(count);

    for _ in 0..count {
        items.push(read_item(bs)?);
    }

    Ok(items)
}

pub fn read_setup(reader: &mut BufReader<'_>, ident: &IdentHeader) -> Result<Setup> {
    read_packet_preamble(reader, VORBIS_PACKET_TYPE_SETUP, "setup")?;

    let mut bs = BitReaderRtl::new(reader.read_buf_bytes_available_ref());

    let codebooks = read_list(&mut bs, 8, VorbisCodebook::read)?;

    // Vorbis I reserves the time domain transforms. Each must be zero.
    read_list(&mut bs, 6, |bs| match bs.read_bits_leq32(16)? {
        0 => Ok(()),
        _ => decode_error("vorbis: non-zero time domain transform"),
    })?;

    let floors = read_list(&mut bs, 6, |bs| match bs.read_bits_leq32(16)? {
        0 => Floor0::try_read(bs, ident.bs0_exp, ident.bs1_exp, &codebooks),
        1 => Floor1::try_read(bs, codebooks.len()),
        _ => decode_error("vorbis: unknown floor type"),
    })?;

    let residues = read_list(&mut bs, 6, |bs| match bs.read_bits_leq32(16)? as u16 {
        kind @ 0..=2 => Residue::try_read(bs, kind, &codebooks),
        _ => decode_error("vorbis: unknown residue type"),
    })?;

    let limits = MappingLimits {
        n_channels: ident.n_channels,
        n_floors: floors.len(),
        n_residues: residues.len(),
    };

    let mappings = read_list(&mut bs, 6, |bs| match bs.read_bits_leq32(16)? {
        0 => read_mapping0(bs, &limits),
        _ => decode_error("vorbis: unknown mapping type"),
    })?;

    let modes = read_list(&mut bs, 6, |bs| read_mode(bs, mappings.len()))?;

    if !bs.read_bool()? {
        return decode_error("vorbis: setup header not framed");
    }

    if bs.bits_left() >= 8 {
        debug!("vorbis: {} unread bits after setup header", bs.bits_left());
    }

    Ok(Setup { codebooks, floors, residues, mappings, modes })
}

#[derive(Debug)]
pub struct ChannelCouple {
    pub magnitude_ch: u8,
    pub angle_ch: u8,
}

#[derive(Debug)]
pub struct SubMap {
    pub floor: u8,
    pub residue: u8,
}

#[derive(Debug)]
pub struct Mapping {
    /// Applied in reverse order when decoupling.
    pub couplings: SmallVec<[ChannelCouple; 1]>,
    /// The submap of each channel.
    pub multiplex: SmallVec<[u8; MAX_CHANNELS]>,
    pub submaps: SmallVec<[SubMap; 1]>,
}

/// Bounds for the channel, floor and residue numbers a mapping refers to.
struct MappingLimits {
    n_channels: u8,
    n_floors: usize,
    n_residues: usize,
}

fn read_mapping0(bs: &mut BitReaderRtl<'_>, limits: &MappingLimits) -> Result<Mapping> {
    let n_submaps = match bs.read_bool()? {
        true => bs.read_bits_leq32(4)? as u8 + 1,
        false => 1,
    };

    let couplings = match bs.read_bool()? {
        true => read_couplings(bs, limits.n_channels)?,
        false => SmallVec::new(),
    };

    if bs.read_bits_leq32(2)? != 0 {
        return decode_error("vorbis: reserved mapping field set");
    }

    let mut multiplex = SmallVec::new();

    if n_submaps == 1 {
        multiplex.resize(usize::from(limits.n_channels), 0);
    }
    else {
        for _ in 0..limits.n_channels {
            match bs.read_bits_leq32(4)? as u8 {
                mux if mux < n_submaps => multiplex.push(mux),
                _ => return decode_error("vorbis: channel mapped to missing submap"),
            }
        }
    }

    let mut submaps = SmallVec::new();

    for _ in 0..n_submaps {
        // Time configuration placeholder.
        bs.ignore_bits(8)?;

        let floor = bs.read_bits_leq32(8)? as u8;
        let residue = bs.read_bits_leq32(8)? as u8;

        if usize::from(floor) >= limits.n_floors || usize::from(residue) >= limits.n_residues {
            return decode_error("vorbis: submap refers to missing floor or residue");
        }

        submaps.push(SubMap { floor, residue });
    }

    Ok(Mapping { couplings, multiplex, submaps })
}

fn read_couplings(
    bs: &mut BitReaderRtl<'_>,
    n_channels: u8,
) -> Result<SmallVec<[ChannelCouple; 1]>> {
    let n_steps = bs.read_bits_leq32(8)? + 1;

    let last_ch = n_channels - 1;
    let width = ilog(u32::from(last_ch));

    let mut couplings = SmallVec::new();

    for _ in 0..n_steps {
        let magnitude_ch = bs.read_bits_leq32(width)? as u8;
        let angle_ch = bs.read_bits_leq32(width)? as u8;

        if magnitude_ch == angle_ch || magnitude_ch.max(angle_ch) > last_ch {
            return decode_error("vorbis: invalid coupling step");
        }

        couplings.push(ChannelCouple { magnitude_ch, angle_ch });
    }

    Ok(couplings)
}

#[derive(Debug)]
pub struct Mode {
    /// Set for long blocks.
    pub block_flag: bool,
    pub mapping: u8,
}

fn read_mode(bs: &mut BitReaderRtl<'_>, n_mappings: usize) -> Result<Mode> {
    let block_flag = bs.read_bool()?;
    let window_type = bs.read_bits_leq32(16)?;
    let transform_type = bs.read_bits_leq32(16)?;
    let mapping = bs.read_bits_leq32(8)? as u8;

    // Vorbis I, section 4.2.4.
    if window_type != 0 || transform_type != 0 {
        return decode_error("vorbis: unknown window or transform type");
    }

    if usize::from(mapping) >= n_mappings {
        return decode_error("vorbis: mode refers to missing mapping");
    }

    Ok(Mode { block_flag, mapping })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use picodec_core::errors::Error;

    fn ident(buf: &[u8]) -> Result<IdentHeader> {
        read_ident_header(&mut BufReader::new(buf))
    }

    #[test]
    fn verify_read_ident_header() {
        let header = ident(&ident_header(2, 44100)).unwrap();

        assert_eq!(header.n_channels, 2);
        assert_eq!(header.sample_rate, 44100);
        assert_eq!(header.bitrate_nom, 128000);
        assert_eq!(header.bs0_exp, TEST_BS0_EXP);
        assert_eq!(header.bs1_exp, TEST_BS1_EXP);
    }

    #[test]
    fn verify_invalid_ident_header() {
        let valid = ident_header(1, 8000);

        // Channel count.
        let mut buf = valid.clone();
        buf[11] = 0;
        assert!(matches!(ident(&buf), Err(Error::DecodeError(_))));

        buf[11] = 6;
        assert!(matches!(ident(&buf), Err(Error::Unsupported(_))));

        // Sample rate.
        let mut buf = valid.clone();
        buf[12..16].copy_from_slice(&[0; 4]);
        assert!(ident(&buf).is_err());

        // Block size 0 larger than block size 1.
        let mut buf = valid.clone();
        buf[28] = (8 << 4) | 9;
        assert!(ident(&buf).is_err());

        // Block size out of bounds.
        let mut buf = valid.clone();
        buf[28] = (14 << 4) | 8;
        assert!(ident(&buf).is_err());

        // Framing.
        let mut buf = valid.clone();
        buf[29] = 0;
        assert!(ident(&buf).is_err());

        // Signature.
        let mut buf = valid.clone();
        buf[1] = b'V';
        assert!(ident(&buf).is_err());

        // Truncated.
        assert!(ident(&valid[..20]).is_err());
    }

    fn setup(buf: &[u8], channels: u8) -> Result<Setup> {
        let ident = ident(&ident_header(channels, 44100)).unwrap();
        read_setup(&mut BufReader::new(buf), &ident)
    }

    #[test]
    fn verify_read_setup() {
        let stereo = setup(&setup_header(2, 1), 2).unwrap();

        assert_eq!(stereo.codebooks.len(), 2);
        assert_eq!(stereo.floors.len(), 1);
        assert_eq!(stereo.residues.len(), 1);
        assert_eq!(stereo.mappings.len(), 1);
        assert_eq!(stereo.modes.len(), 2);

        assert!(!stereo.modes[0].block_flag);
        assert!(stereo.modes[1].block_flag);

        let mapping = &stereo.mappings[0];
        assert_eq!(mapping.couplings.len(), 1);
        assert_eq!(mapping.couplings[0].magnitude_ch, 0);
        assert_eq!(mapping.couplings[0].angle_ch, 1);
        assert_eq!(mapping.multiplex.as_slice(), &[0, 0]);
        assert_eq!(mapping.submaps.len(), 1);

        let mono = setup(&setup_header(1, 2), 1).unwrap();
        assert!(mono.mappings[0].couplings.is_empty());
    }

    #[test]
    fn verify_invalid_setup() {
        // Not a setup header.
        let mut buf = setup_header(1, 1);
        buf[0] = 3;
        assert!(setup(&buf, 1).is_err());

        // Residue type 3 does not exist. The residue type field starts after the codebooks, time
        // domain transforms, and floors.
        assert!(setup(&setup_header(1, 3), 1).is_err());

        // Truncated anywhere.
        let buf = setup_header(2, 1);
        for len in [7, 12, buf.len() / 2, buf.len() - 1] {
            assert!(setup(&buf[..len], 2).is_err(), "len={}", len);
        }
    }
}
