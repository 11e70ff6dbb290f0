// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::min;

use picodec_core::audio::{interleave_pcm16, OUTPUT_CHANNELS};
use picodec_core::codecs::{DecodeFailure, DecodeResult, Decoded, Decoder, StreamInfo};
use picodec_core::errors::{Error, Result};
use picodec_core::util::alloc::try_boxed_slice;

use bitflags::bitflags;
use log::{debug, info, warn};

use crate::common::*;
use crate::header::{self, MAX_MPEG_FRAME_SIZE, MPEG_HEADER_LEN};
#[cfg(feature = "mp1")]
use crate::layer1;
#[cfg(feature = "mp3")]
use crate::layer3;
use crate::vbr::{read_vbr_header, VbrHeader};

/// Header bits that must match between consecutive frames: sync, version, layer, and sample rate.
const NEXT_FRAME_MASK: u32 = 0xfffe_0c00;

bitflags! {
    /// A set of MPEG audio layers.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct LayerSet: u32 {
        const LAYER1 = 1 << 0;
        const LAYER2 = 1 << 1;
        const LAYER3 = 1 << 2;
    }
}

impl LayerSet {
    fn from_layer(layer: MpegLayer) -> LayerSet {
        match layer {
            MpegLayer::Layer1 => LayerSet::LAYER1,
            MpegLayer::Layer2 => LayerSet::LAYER2,
            MpegLayer::Layer3 => LayerSet::LAYER3,
        }
    }
}

impl Default for LayerSet {
    /// All layers this crate was built to decode.
    fn default() -> Self {
        let mut layers = LayerSet::empty();

        #[cfg(feature = "mp1")]
        layers.insert(LayerSet::LAYER1);
        #[cfg(feature = "mp3")]
        layers.insert(LayerSet::LAYER3);

        layers
    }
}

/// Thresholds for the fake frame detector.
///
/// Random data, such as album art embedded without a tag header, regularly contains bytes that
/// look like a frame header. Each one costs a resynchronisation. If more than `max_bogus_syncs`
/// of them are found within `window_ms` of decoded audio, the stream is most likely not MPEG
/// audio at all, and decoding fails with `Error::ResetRequired`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FakeFramePolicy {
    pub enabled: bool,
    pub max_bogus_syncs: u32,
    pub window_ms: u32,
}

impl Default for FakeFramePolicy {
    fn default() -> Self {
        FakeFramePolicy { enabled: true, max_bogus_syncs: 32, window_ms: 1000 }
    }
}

/// `Mp3DecoderOptions` is a common set of options that all MPEG audio decoders use.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Mp3DecoderOptions {
    pub fake_frame: FakeFramePolicy,
    /// Verify the CRC of frames that carry one. A frame failing the check is muted.
    pub verify_crc: bool,
    /// The layers to decode. Frames of other layers are skipped.
    pub layers: LayerSet,
}

impl Default for Mp3DecoderOptions {
    fn default() -> Self {
        Mp3DecoderOptions {
            fake_frame: Default::default(),
            verify_crc: true,
            layers: Default::default(),
        }
    }
}

/// Counts bogus frame syncs within a window of decoded audio time.
#[derive(Default)]
struct FakeFrameDetector {
    n_bogus: u32,
    window_start_ms: u64,
}

impl FakeFrameDetector {
    /// Record a bogus sync found at `now_ms` of decoded audio. Returns true if the policy's
    /// threshold was exceeded.
    fn on_bogus_sync(&mut self, policy: &FakeFramePolicy, now_ms: u64) -> bool {
        if !policy.enabled {
            return false;
        }

        if self.n_bogus == 0 || now_ms - self.window_start_ms > u64::from(policy.window_ms) {
            self.n_bogus = 0;
            self.window_start_ms = now_ms;
        }

        self.n_bogus += 1;

        self.n_bogus > policy.max_bogus_syncs
    }

    fn clear(&mut self) {
        *self = Default::default();
    }
}

/// A decoder for one MPEG audio layer.
enum LayerDecoder {
    #[cfg(feature = "mp1")]
    Layer1(layer1::Layer1),
    #[cfg(feature = "mp3")]
    Layer3(Box<State>),
}

impl LayerDecoder {
    fn layer(&self) -> MpegLayer {
        match self {
            #[cfg(feature = "mp1")]
            LayerDecoder::Layer1(_) => MpegLayer::Layer1,
            #[cfg(feature = "mp3")]
            LayerDecoder::Layer3(_) => MpegLayer::Layer3,
        }
    }

    fn decode(
        &mut self,
        frame: &[u8],
        header: &FrameHeader,
        verify_crc: bool,
        out: &mut [i16],
    ) -> Result<()> {
        match self {
            #[cfg(feature = "mp1")]
            LayerDecoder::Layer1(layer) => layer.decode_frame(frame, header, verify_crc, out),
            #[cfg(feature = "mp3")]
            LayerDecoder::Layer3(state) => {
                layer3::decode_frame(frame, header, verify_crc, state, out)
            }
        }
    }

    fn reset(&mut self) {
        match self {
            #[cfg(feature = "mp1")]
            LayerDecoder::Layer1(layer) => layer.reset(),
            #[cfg(feature = "mp3")]
            LayerDecoder::Layer3(state) => state.reset(),
        }
    }
}

/// The outcome of searching the input for the next frame.
enum Search {
    /// A complete frame at `input[start..start + header.frame_size]`.
    Frame { start: usize, header: FrameHeader },
    /// The search stopped after `consumed` bytes.
    Stop { consumed: usize, error: Error },
}

/// MPEG1, 2, and 2.5 Layer 1 and 3 decoder.
pub struct Mp3Decoder {
    options: Mp3DecoderOptions,
    layers: Vec<LayerDecoder>,
    /// Planar PCM of the last frame, `MAX_SAMPLES_PER_FRAME` samples per channel.
    pcm: Box<[i16]>,
    info: Option<StreamInfo>,
    /// The header of the last decoded frame.
    last_header: Option<FrameHeader>,
    /// The length of an unpadded free format frame, once measured.
    free_format_len: Option<usize>,
    vbr: Option<VbrHeader>,
    is_first_frame: bool,
    /// The number of bytes of a tag still to be skipped.
    skip: usize,
    detector: FakeFrameDetector,
    /// The number of samples per channel decoded since the last reset.
    n_decoded: u64,
    n_output: usize,
}

impl Mp3Decoder {
    /// Instantiate a decoder. All buffers are allocated here.
    pub fn try_new(options: &Mp3DecoderOptions) -> Result<Self> {
        let mut layers = Vec::new();

        #[cfg(feature = "mp1")]
        if options.layers.contains(LayerSet::LAYER1) {
            layers.push(LayerDecoder::Layer1(layer1::Layer1::new()));
        }

        #[cfg(feature = "mp3")]
        if options.layers.contains(LayerSet::LAYER3) {
            layers.push(LayerDecoder::Layer3(Box::new(State::try_new()?)));
        }

        Ok(Mp3Decoder {
            options: *options,
            layers,
            pcm: try_boxed_slice(OUTPUT_CHANNELS * MAX_SAMPLES_PER_FRAME, 0i16)?,
            info: None,
            last_header: None,
            free_format_len: None,
            vbr: None,
            is_first_frame: true,
            skip: 0,
            detector: Default::default(),
            n_decoded: 0,
            n_output: 0,
        })
    }

    /// Gets the Xing, Info, or VBRI header of the stream, if one was found.
    pub fn vbr_header(&self) -> Option<&VbrHeader> {
        self.vbr.as_ref()
    }

    /// Gets the header of the last frame decoded.
    pub fn frame_header(&self) -> Option<&FrameHeader> {
        self.last_header.as_ref()
    }

    /// The amount of audio decoded since the last reset, in milliseconds.
    fn decoded_ms(&self) -> u64 {
        match self.info {
            Some(info) if info.sample_rate > 0 => {
                1000 * self.n_decoded / u64::from(info.sample_rate)
            }
            _ => 0,
        }
    }

    /// Returns true if the header word following a frame confirms the frame's length.
    ///
    /// A frame that ends at the end of the input cannot be confirmed. It is accepted only once a
    /// stream is locked, otherwise more input is required.
    fn is_next_frame_plausible(header_word: u32, next: &[u8], is_locked: bool) -> Result<bool> {
        // Tags may follow the last frame.
        if next.starts_with(b"TAG") || next.starts_with(b"ID3") {
            return Ok(true);
        }

        match header::read_header_word(next) {
            Some(word) => Ok(header::check_header(word)
                && (word & NEXT_FRAME_MASK) == (header_word & NEXT_FRAME_MASK)),
            None if is_locked => Ok(true),
            None => Err(Error::NeedMoreData),
        }
    }

    /// Scan `input` from `pos` for the next complete and plausible frame.
    fn search(&mut self, input: &[u8], mut pos: usize) -> Search {
        loop {
            let buf = &input[pos..];

            let sync = header::find_sync_word(buf);
            let tag = buf.windows(3).position(|w| w == b"ID3");

            // Skip an ID3v2 tag preceeding the next sync word.
            if let Some(offset) = tag.filter(|&tag| sync.map_or(true, |sync| tag < sync)) {
                pos += offset;

                match header::id3v2_tag_len(&input[pos..]) {
                    Ok(Some(len)) => {
                        debug!("mp3: skipping {} byte ID3v2 tag", len);

                        if pos + len > input.len() {
                            self.skip = pos + len - input.len();
                            let consumed = input.len();
                            return Search::Stop { consumed, error: Error::NeedMoreData };
                        }

                        pos += len;
                    }
                    // Not a tag, just look further.
                    Ok(None) => pos += 1,
                    Err(error) => return Search::Stop { consumed: pos, error },
                }

                continue;
            }

            let offset = match sync {
                Some(offset) => offset,
                None => {
                    // A sync word may straddle the end of the input. Keep the last 3 bytes.
                    let consumed = input.len().saturating_sub(MPEG_HEADER_LEN - 1).max(pos);
                    return Search::Stop { consumed, error: Error::NeedMoreData };
                }
            };

            pos += offset;

            match self.frame_at(input, pos) {
                Ok(Some(header)) => {
                    self.detector.clear();
                    return Search::Frame { start: pos, header };
                }
                Ok(None) => {
                    let now_ms = self.decoded_ms();

                    if self.detector.on_bogus_sync(&self.options.fake_frame, now_ms) {
                        warn!("mp3: too many false frame syncs, the stream must be restarted");
                        self.reset();
                        return Search::Stop { consumed: pos + 1, error: Error::ResetRequired };
                    }

                    pos += 1;
                }
                Err(error) => return Search::Stop { consumed: pos, error },
            }
        }
    }

    /// Try to read the frame at `input[pos..]`. Returns `None` if the sync word there is bogus, or
    /// an error if more input is required to decide.
    fn frame_at(&mut self, input: &[u8], pos: usize) -> Result<Option<FrameHeader>> {
        let buf = &input[pos..];

        let header_word = match header::read_header_word(buf) {
            Some(word) => word,
            None => return Err(Error::NeedMoreData),
        };

        let mut header = match header::parse_frame_header_word(header_word) {
            Ok(header) => header,
            Err(_) => return Ok(None),
        };

        // A stream does not change its sample rate or layer.
        if let Some(last) = &self.last_header {
            if last.sample_rate != header.sample_rate || last.layer != header.layer {
                return Ok(None);
            }
        }

        if header.is_free_format() {
            let unpadded_len = match self.free_format_len {
                Some(len) => len,
                None => match header::find_free_sync(buf, &header) {
                    Some(len) => {
                        let pad = if header.has_padding { header.slot_size() } else { 0 };
                        len - pad
                    }
                    None if buf.len() >= MAX_MPEG_FRAME_SIZE + MPEG_HEADER_LEN => return Ok(None),
                    None => return Err(Error::NeedMoreData),
                },
            };

            header.set_free_format_len(unpadded_len);

            if self.free_format_len.is_none() {
                debug!("mp3: free format frame length is {} bytes", unpadded_len);
                self.free_format_len = Some(unpadded_len);
            }
        }

        if header.frame_size < header.header_len() + header.side_info_len() {
            return Ok(None);
        }

        let end = header.frame_size;

        if end > buf.len() {
            return Err(Error::NeedMoreData);
        }

        let is_locked = self.last_header.is_some();

        if !Self::is_next_frame_plausible(header_word, &buf[end..], is_locked)? {
            return Ok(None);
        }

        Ok(Some(header))
    }

    fn update_info(&mut self, header: &FrameHeader) {
        self.info = Some(StreamInfo {
            channels: header.channel_mode.channels(),
            sample_rate: header.sample_rate,
            bitrate: header.bitrate,
        });
        self.last_header = Some(*header);
    }

    fn decode_frame(
        &mut self,
        frame: &[u8],
        header: &FrameHeader,
        out: &mut [i32],
    ) -> Result<usize> {
        let n_frames = header.samples_per_frame();

        let idx = match self.layers.iter().position(|layer| layer.layer() == header.layer) {
            Some(idx) => idx,
            None => {
                if self.options.layers.contains(LayerSet::from_layer(header.layer)) {
                    return Err(Error::Unsupported("mp3: mpeg audio layer"));
                }
                debug!("mp3: skipping {:?} frame", header.layer);
                return Err(Error::Unsupported("mp3: mpeg audio layer is disabled"));
            }
        };

        // Only the first frame of a stream may be an informational frame.
        if self.is_first_frame && header.layer == MpegLayer::Layer3 {
            self.is_first_frame = false;

            if let Some(vbr) = read_vbr_header(frame, header) {
                info!("mp3: {:?} header, {:?} frames", vbr.kind, vbr.n_frames);
                self.vbr = Some(vbr);
                self.update_info(header);
                return Ok(0);
            }
        }

        self.is_first_frame = false;

        let layer = &mut self.layers[idx];

        match layer.decode(frame, header, self.options.verify_crc, &mut self.pcm) {
            Ok(()) => (),
            Err(Error::MainDataUnderflow) => {
                self.update_info(header);
                return Err(Error::MainDataUnderflow);
            }
            Err(err @ Error::DecodeError(_)) | Err(err @ Error::EndOfBitstream) => {
                // The frame is lost, but the stream is not. Output silence in its place.
                warn!("mp3: muting invalid frame: {}", err);
                self.pcm.fill(0);
            }
            Err(err) => return Err(err),
        }

        self.update_info(header);

        let (left, right) = self.pcm.split_at(MAX_SAMPLES_PER_FRAME);
        let right = if header.n_channels() == 2 { Some(&right[..n_frames]) } else { None };

        let n_samples = interleave_pcm16(&left[..n_frames], right, out)?;

        self.n_decoded += n_frames as u64;

        Ok(n_samples)
    }
}

impl Decoder for Mp3Decoder {
    fn decode(&mut self, input: &[u8], out: &mut [i32]) -> DecodeResult {
        self.n_output = 0;

        // Skip the remainder of a tag.
        if self.skip > 0 {
            let n = min(self.skip, input.len());
            self.skip -= n;
            return Err(DecodeFailure::new(n, Error::NeedMoreData));
        }

        let (start, header) = match self.search(input, 0) {
            Search::Frame { start, header } => (start, header),
            Search::Stop { consumed, error } => return Err(DecodeFailure::new(consumed, error)),
        };

        if out.len() < OUTPUT_CHANNELS * header.samples_per_frame() {
            let error = Error::LimitError("mp3: output buffer too small");
            return Err(DecodeFailure::new(start, error));
        }

        let end = start + header.frame_size;

        match self.decode_frame(&input[start..end], &header, out) {
            Ok(samples) => {
                self.n_output = samples;
                Ok(Decoded { consumed: end, samples })
            }
            Err(error) => Err(DecodeFailure::new(end, error)),
        }
    }

    fn reset(&mut self) {
        for layer in self.layers.iter_mut() {
            layer.reset();
        }

        self.last_header = None;
        self.free_format_len = None;
        self.skip = 0;
        self.detector.clear();
        self.n_decoded = 0;
        self.n_output = 0;
    }

    fn stream_info(&self) -> Option<StreamInfo> {
        self.info
    }

    fn output_samples(&self) -> usize {
        self.n_output
    }

    fn max_output_samples(&self) -> usize {
        OUTPUT_CHANNELS * MAX_SAMPLES_PER_FRAME
    }
}
