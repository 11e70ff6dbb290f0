// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use picodec_core::audio::{interleave_pcm16, Channels, OUTPUT_CHANNELS};
use picodec_core::codecs::{DecodeFailure, DecodeResult, Decoded, Decoder, StreamInfo};
use picodec_core::dsp::mdct::Imdct;
use picodec_core::errors::{decode_error, Error, Result};
use picodec_core::io::{BitReaderRtl, BufReader, ReadBitsRtl};

use picodec_format_ogg::{OggReader, OggReaderOptions};
use picodec_metadata::vorbis::{
    CommentStatus, VorbisCommentParser, VorbisComments, DEFAULT_MAX_COMMENT_BYTES,
};

use log::{debug, info, warn};

use crate::codebook::VorbisCodebook;
use crate::common::*;
use crate::dsp::{Dsp, DspChannel};
use crate::floor::Floor;
use crate::residue::{Residue, ResidueScratch};
use crate::setup::*;
use crate::window::Windows;

/// The largest block size a stream may use.
const MAX_BLOCK_SIZE: usize = 8192;

/// `VorbisDecoderOptions` is the set of options for the Ogg Vorbis decoder.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VorbisDecoderOptions {
    /// Verify the CRC of every Ogg page. Pages failing verification are skipped.
    pub verify_crc: bool,
    /// Comments longer than this are skipped.
    pub max_comment_bytes: usize,
    /// Trim the final packet of a stream to the granule position of the last page.
    pub trim_end: bool,
}

impl Default for VorbisDecoderOptions {
    fn default() -> Self {
        VorbisDecoderOptions {
            verify_crc: true,
            max_comment_bytes: DEFAULT_MAX_COMMENT_BYTES,
            trim_end: true,
        }
    }
}

/// The header expected next, or audio.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Ident,
    Comment,
    Setup,
    Audio,
    /// The logical stream cannot be decoded. Its pages are skipped until the next stream starts.
    Failed,
}

/// The configuration and DSP state of a logical stream, built from its setup header.
struct Stream {
    ident: IdentHeader,
    codebooks: Vec<VorbisCodebook>,
    floors: Vec<Box<dyn Floor>>,
    residues: Vec<Residue>,
    modes: Vec<Mode>,
    mappings: Vec<Mapping>,
    dsp: Dsp,
}

impl Stream {
    fn try_new(ident: IdentHeader, buf: &[u8]) -> Result<Self> {
        let setup = read_setup(&mut BufReader::new(buf), &ident)?;

        let n_channels = usize::from(ident.n_channels);

        let windows = Windows::new(1 << ident.bs0_exp, 1 << ident.bs1_exp);

        let channels = (0..n_channels)
            .map(|_| DspChannel::try_new(ident.bs1_exp))
            .collect::<Result<Vec<_>>>()?;

        let residue_scratch = ResidueScratch::try_new(&setup.residues, ident.bs1_exp, n_channels)?;

        let imdct_short = Imdct::new((1 << ident.bs0_exp) >> 1);
        let imdct_long = Imdct::new((1 << ident.bs1_exp) >> 1);

        let dsp = Dsp {
            channels,
            residue_scratch,
            imdct_short,
            imdct_long,
            windows,
            prev_block_size: None,
        };

        Ok(Stream {
            ident,
            codebooks: setup.codebooks,
            floors: setup.floors,
            residues: setup.residues,
            modes: setup.modes,
            mappings: setup.mappings,
            dsp,
        })
    }

    /// Decodes an audio packet. Returns the number of samples per channel synthesized into the
    /// PCM buffer of each DSP channel.
    fn decode_packet(&mut self, buf: &[u8]) -> Result<usize> {
        let mut bs = BitReaderRtl::new(buf);

        // Section 4.3.1 - Packet Type, Mode, and Window Decode

        // First bit must be 0 to indicate audio packet.
        if bs.read_bool()? {
            return decode_error("vorbis: not an audio packet");
        }

        let num_modes = self.modes.len() - 1;

        let mode_number = bs.read_bits_leq32(ilog(num_modes as u32))? as usize;

        if mode_number >= self.modes.len() {
            return decode_error("vorbis: invalid packet mode number");
        }

        let block_flag = self.modes[mode_number].block_flag;
        let mapping = usize::from(self.modes[mode_number].mapping);

        let bs_exp = if block_flag { self.ident.bs1_exp } else { self.ident.bs0_exp };

        // Block, and half-block size
        let n = 1 << bs_exp;
        let n2 = n >> 1;

        // Once the block size is known the packet always yields audio. A packet that cannot be
        // decoded is muted so that the stream keeps its timing.
        if let Err(err) = self.read_spectrum(&mut bs, block_flag, mapping, bs_exp) {
            warn!("vorbis: muting invalid packet: {}", err);

            for channel in self.dsp.channels.iter_mut() {
                channel.floor_unused = true;
            }
        }

        // Combined Section 4.3.6, 4.3.7 and 4.3.8 - Dot Product, Inverse MDCT, and Overlap-add
        let imdct = if block_flag { &mut self.dsp.imdct_long } else { &mut self.dsp.imdct_short };

        let mut count = 0;

        for channel in self.dsp.channels.iter_mut() {
            channel.apply_floor(n2);
            count = channel.synth(n, self.dsp.prev_block_size, &self.dsp.windows, imdct);
        }

        self.dsp.prev_block_size = Some(n);

        Ok(count)
    }

    /// Reads the floors and residues of an audio packet and undoes channel coupling. Leaves the
    /// floor curve and the residue of each channel in its DSP buffers.
    fn read_spectrum(
        &mut self,
        bs: &mut BitReaderRtl<'_>,
        block_flag: bool,
        mapping: usize,
        bs_exp: u8,
    ) -> Result<()> {
        if block_flag {
            // The window shape follows from the block sizes of the adjacent packets. Do not use
            // the window flags since they may be wrong.
            let _prev_window_flag = bs.read_bool()?;
            let _next_window_flag = bs.read_bool()?;
        }

        let n2 = (1 << bs_exp) >> 1;

        let mapping = &self.mappings[mapping];

        // Section 4.3.2 - Floor Curve Decode

        for (&submap_num, ch) in mapping.multiplex.iter().zip(self.dsp.channels.iter_mut()) {
            let submap = &mapping.submaps[usize::from(submap_num)];
            let floor = &mut self.floors[usize::from(submap.floor)];

            floor.read_channel(bs, &self.codebooks)?;

            ch.floor_unused = floor.is_unused();
            ch.do_not_decode = ch.floor_unused;

            // The same floor may be used by more than one channel, so synthesize the curve now.
            if !ch.floor_unused {
                floor.synthesis(bs_exp, &mut ch.floor[..n2])?;
            }
        }

        // Section 4.3.3 - Non-zero Vector Propagate

        for couple in &mapping.couplings {
            let magnitude_ch_idx = usize::from(couple.magnitude_ch);
            let angle_ch_idx = usize::from(couple.angle_ch);

            if self.dsp.channels[magnitude_ch_idx].do_not_decode
                != self.dsp.channels[angle_ch_idx].do_not_decode
            {
                self.dsp.channels[magnitude_ch_idx].do_not_decode = false;
                self.dsp.channels[angle_ch_idx].do_not_decode = false;
            }
        }

        // Section 4.3.4 - Residue Decode

        for (submap_idx, submap) in mapping.submaps.iter().enumerate() {
            let mut residue_channels = ChannelSet::default();

            // Find the channels using this submap.
            for (c, &ch_submap_idx) in mapping.multiplex.iter().enumerate() {
                if submap_idx == usize::from(ch_submap_idx) {
                    residue_channels.insert(c);
                }
            }

            let residue = &self.residues[usize::from(submap.residue)];

            residue.read_residue(
                bs,
                bs_exp,
                &self.codebooks,
                residue_channels,
                &mut self.dsp.residue_scratch,
                &mut self.dsp.channels,
            )?;
        }

        // Section 4.3.5 - Inverse Coupling

        for coupling in mapping.couplings.iter().rev() {
            let magnitude_ch_idx = usize::from(coupling.magnitude_ch);
            let angle_ch_idx = usize::from(coupling.angle_ch);

            // Get mutable reference to each channel in the pair.
            let (magnitude_ch, angle_ch) = if magnitude_ch_idx < angle_ch_idx {
                let (a, b) = self.dsp.channels.split_at_mut(angle_ch_idx);
                (&mut a[magnitude_ch_idx], &mut b[0])
            }
            else {
                let (a, b) = self.dsp.channels.split_at_mut(magnitude_ch_idx);
                (&mut b[0], &mut a[angle_ch_idx])
            };

            for (m, a) in magnitude_ch.residue[..n2].iter_mut().zip(&mut angle_ch.residue[..n2]) {
                let (new_m, new_a) = if *m > 0 {
                    if *a > 0 {
                        (*m, m.saturating_sub(*a))
                    }
                    else {
                        (m.saturating_add(*a), *m)
                    }
                }
                else {
                    if *a > 0 {
                        (*m, m.saturating_add(*a))
                    }
                    else {
                        (m.saturating_sub(*a), *m)
                    }
                };

                *m = new_m;
                *a = new_a;
            }
        }

        Ok(())
    }

    fn reset(&mut self) {
        self.dsp.reset();
    }
}

/// Ogg Vorbis decoder.
///
/// The decoder is fed the bytes of an Ogg Vorbis file. It reads the identification, comment, and
/// setup headers of each logical stream in turn, and then decodes one audio packet per call.
pub struct VorbisDecoder {
    options: VorbisDecoderOptions,
    reader: OggReader,
    state: State,
    ident: Option<IdentHeader>,
    comment_parser: Option<VorbisCommentParser>,
    comments: Option<VorbisComments>,
    stream: Option<Box<Stream>>,
    info: Option<StreamInfo>,
    /// The number of samples per channel output since the start of the stream, if known.
    position: Option<u64>,
    n_output: usize,
}

impl VorbisDecoder {
    pub fn try_new(options: &VorbisDecoderOptions) -> Result<Self> {
        let reader_options =
            OggReaderOptions { verify_crc: options.verify_crc, ..Default::default() };

        Ok(VorbisDecoder {
            options: *options,
            reader: OggReader::try_new(&reader_options)?,
            state: State::Ident,
            ident: None,
            comment_parser: None,
            comments: None,
            stream: None,
            info: None,
            position: None,
            n_output: 0,
        })
    }

    /// Gets the comments of the current logical stream, once its comment header has been read.
    pub fn comments(&self) -> Option<&VorbisComments> {
        self.comments.as_ref()
    }

    /// Gets the serial number of the logical stream being decoded.
    pub fn serial(&self) -> Option<u32> {
        self.reader.serial()
    }

    fn start_stream(&mut self) {
        self.state = State::Ident;
        self.ident = None;
        self.comment_parser = None;
        self.comments = None;
        self.stream = None;
        self.info = None;
        self.position = Some(0);
    }

    /// Handles the next packet, or part thereof, of the current page.
    fn process(&mut self, out: &mut [i32]) -> Result<usize> {
        match self.state {
            State::Ident => {
                let packet = match self.reader.next_packet()? {
                    Some(packet) => packet,
                    None => return Ok(0),
                };

                let ident = match read_ident_header(&mut BufReader::new(packet.data)) {
                    Ok(ident) => ident,
                    Err(err) => {
                        warn!("vorbis: stream {:#x} cannot be decoded: {}", packet.serial, err);
                        self.state = State::Failed;
                        return Err(err);
                    }
                };

                info!(
                    "vorbis: {} channel(s), {} Hz, block sizes {} and {}",
                    ident.n_channels,
                    ident.sample_rate,
                    1 << ident.bs0_exp,
                    1 << ident.bs1_exp
                );

                self.info = Some(StreamInfo {
                    channels: Channels::from_count(usize::from(ident.n_channels))
                        .unwrap_or_default(),
                    sample_rate: ident.sample_rate,
                    bitrate: ident.bitrate_nom,
                });

                self.ident = Some(ident);
                self.comment_parser =
                    Some(VorbisCommentParser::try_new_packet(self.options.max_comment_bytes)?);
                self.state = State::Comment;

                Ok(0)
            }
            State::Comment => {
                // The comment header is parsed as it arrives so that large pictures are never
                // buffered.
                while let Some(frag) = self.reader.next_fragment() {
                    if let Some(parser) = &mut self.comment_parser {
                        if let Err(err) = parser.push(frag.data) {
                            warn!("vorbis: ignoring invalid comment header: {}", err);
                            self.comment_parser = None;
                        }
                    }

                    if frag.ends_packet {
                        if let Some(parser) = self.comment_parser.take() {
                            if parser.status() != CommentStatus::Done {
                                warn!("vorbis: comment header is truncated");
                            }

                            let comments = parser.into_comments();

                            debug!(
                                "vorbis: vendor {:?}, {} tag(s), {} picture(s)",
                                comments.vendor,
                                comments.tags.len(),
                                comments.pictures.len()
                            );

                            self.comments = Some(comments);
                        }

                        self.state = State::Setup;
                        break;
                    }
                }

                Ok(0)
            }
            State::Setup => {
                let packet = match self.reader.next_packet()? {
                    Some(packet) => packet,
                    None => return Ok(0),
                };

                let ident = match self.ident {
                    Some(ident) => ident,
                    None => return decode_error("vorbis: missing identification header"),
                };

                match Stream::try_new(ident, packet.data) {
                    Ok(stream) => {
                        debug!(
                            "vorbis: {} codebook(s), {} floor(s), {} residue(s), {} mode(s)",
                            stream.codebooks.len(),
                            stream.floors.len(),
                            stream.residues.len(),
                            stream.modes.len()
                        );

                        self.stream = Some(Box::new(stream));
                        self.state = State::Audio;
                        Ok(0)
                    }
                    Err(err) => {
                        warn!("vorbis: invalid setup header: {}", err);
                        self.state = State::Failed;
                        Err(err)
                    }
                }
            }
            State::Audio => {
                let packet = match self.reader.next_packet()? {
                    Some(packet) => packet,
                    None => return Ok(0),
                };

                let stream = match self.stream.as_mut() {
                    Some(stream) => stream,
                    None => return decode_error("vorbis: missing setup header"),
                };

                // An empty packet carries no audio.
                if packet.data.is_empty() {
                    return Ok(0);
                }

                if packet.data[0] & 1 == 1 {
                    debug!("vorbis: ignoring header packet in audio");
                    return Ok(0);
                }

                let mut count = stream.decode_packet(packet.data)?;

                if let Some(position) = self.position {
                    if self.options.trim_end && packet.is_last {
                        if let Some(granule_pos) = packet.granule_pos {
                            let end = granule_pos.saturating_sub(position);

                            if (count as u64) > end {
                                let trimmed = count as u64 - end;
                                debug!("vorbis: trimming {} samples at the end", trimmed);
                                count = end as usize;
                            }
                        }
                    }

                    self.position = Some(position + count as u64);
                }

                let (left, right) = match stream.dsp.channels.split_first() {
                    Some((left, rest)) => (left, rest.first()),
                    None => return decode_error("vorbis: no channels"),
                };

                interleave_pcm16(&left.pcm[..count], right.map(|ch| &ch.pcm[..count]), out)
            }
            State::Failed => {
                while self.reader.next_fragment().is_some() {}
                Ok(0)
            }
        }
    }
}

impl Decoder for VorbisDecoder {
    fn decode(&mut self, input: &[u8], out: &mut [i32]) -> DecodeResult {
        self.n_output = 0;

        if self.state == State::Audio && out.len() < self.max_output_samples() {
            let error = Error::LimitError("vorbis: output buffer too small");
            return Err(DecodeFailure::new(0, error));
        }

        let mut consumed = 0;

        if !self.reader.has_pending() {
            let page = self.reader.read_page(input)?;

            consumed = page.consumed;

            if page.new_stream {
                // After a reset the stream being read is forgotten, so the page that follows is
                // also reported as new. Only a first page actually starts a stream.
                if page.header.is_first_page || self.state != State::Audio {
                    self.start_stream();
                }
                else {
                    debug!("vorbis: resuming stream {:#x}", page.header.serial);
                }
            }

            if !page.accepted {
                return Ok(Decoded { consumed, samples: 0 });
            }
        }

        match self.process(out) {
            Ok(samples) => {
                self.n_output = samples;
                Ok(Decoded { consumed, samples })
            }
            Err(error) => Err(DecodeFailure::new(consumed, error)),
        }
    }

    fn reset(&mut self) {
        self.reader.reset();

        if let Some(stream) = self.stream.as_mut() {
            stream.reset();
        }

        // The position in the stream is unknown until the next stream starts.
        self.position = None;
        self.n_output = 0;
    }

    fn stream_info(&self) -> Option<StreamInfo> {
        self.info
    }

    fn output_samples(&self) -> usize {
        self.n_output
    }

    fn max_output_samples(&self) -> usize {
        let block_size = self.ident.map_or(MAX_BLOCK_SIZE, |ident| 1 << ident.bs1_exp);
        OUTPUT_CHANNELS * (block_size >> 1)
    }
}
