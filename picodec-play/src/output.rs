// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! PCM file outputs.

use std::io::{self, Seek, SeekFrom, Write};

use log::debug;

/// The number of interleaved channels in every output.
const CHANNELS: u16 = 2;
/// The bit depth of every output.
const BITS_PER_SAMPLE: u16 = 16;

/// The file offset of the RIFF chunk size.
const RIFF_SIZE_OFFSET: u64 = 4;
/// The file offset of the data chunk size.
const DATA_SIZE_OFFSET: u64 = 40;
/// The size of the RIFF chunk excluding the data chunk payload.
const WAV_HEADER_LEN: u32 = 36;

pub trait PcmOutput {
    /// Write interleaved decoder output, 16-bit PCM in the upper half of each sample.
    fn write(&mut self, samples: &[i32]) -> io::Result<()>;
    fn finish(&mut self) -> io::Result<()>;
}

/// Converts decoder output to little-endian 16-bit PCM.
fn to_pcm16_le(samples: &[i32], bytes: &mut Vec<u8>) {
    bytes.clear();
    bytes.extend(samples.iter().flat_map(|&s| ((s >> 16) as i16).to_le_bytes()));
}

/// Headerless interleaved 16-bit little-endian PCM.
pub struct RawOutput<W: Write> {
    writer: W,
    bytes: Vec<u8>,
}

impl<W: Write> RawOutput<W> {
    pub fn new(writer: W) -> Self {
        RawOutput { writer, bytes: Vec::new() }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> PcmOutput for RawOutput<W> {
    fn write(&mut self, samples: &[i32]) -> io::Result<()> {
        to_pcm16_le(samples, &mut self.bytes);
        self.writer.write_all(&self.bytes)
    }

    fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// A canonical 44 byte header WAVE file. The chunk sizes are written once all samples are known.
pub struct WavOutput<W: Write + Seek> {
    writer: W,
    bytes: Vec<u8>,
    data_len: u64,
}

impl<W: Write + Seek> WavOutput<W> {
    pub fn try_new(mut writer: W, sample_rate: u32) -> io::Result<Self> {
        let block_align = CHANNELS * (BITS_PER_SAMPLE / 8);
        let byte_rate = sample_rate * u32::from(block_align);

        // RIFF header, with the size filled in by finish.
        writer.write_all(b"RIFF")?;
        writer.write_all(&0u32.to_le_bytes())?;
        writer.write_all(b"WAVE")?;

        // PCM format chunk.
        writer.write_all(b"fmt ")?;
        writer.write_all(&16u32.to_le_bytes())?;
        writer.write_all(&1u16.to_le_bytes())?;
        writer.write_all(&CHANNELS.to_le_bytes())?;
        writer.write_all(&sample_rate.to_le_bytes())?;
        writer.write_all(&byte_rate.to_le_bytes())?;
        writer.write_all(&block_align.to_le_bytes())?;
        writer.write_all(&BITS_PER_SAMPLE.to_le_bytes())?;

        // Data chunk header, with the size filled in by finish.
        writer.write_all(b"data")?;
        writer.write_all(&0u32.to_le_bytes())?;

        Ok(WavOutput { writer, bytes: Vec::new(), data_len: 0 })
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Seek> PcmOutput for WavOutput<W> {
    fn write(&mut self, samples: &[i32]) -> io::Result<()> {
        to_pcm16_le(samples, &mut self.bytes);
        self.writer.write_all(&self.bytes)?;
        self.data_len += self.bytes.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        // Sizes saturate for files beyond 4 GiB.
        let data_len = u32::try_from(self.data_len).unwrap_or(u32::MAX - WAV_HEADER_LEN);

        debug!("writing wave header for {} data bytes", data_len);

        self.writer.seek(SeekFrom::Start(RIFF_SIZE_OFFSET))?;
        self.writer.write_all(&(WAV_HEADER_LEN + data_len).to_le_bytes())?;
        self.writer.seek(SeekFrom::Start(DATA_SIZE_OFFSET))?;
        self.writer.write_all(&data_len.to_le_bytes())?;
        self.writer.seek(SeekFrom::End(0))?;
        self.writer.flush()
    }
}
