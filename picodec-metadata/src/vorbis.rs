// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An incremental Vorbis comment reader.
//!
//! A comment block is a length-prefixed vendor string followed by a count of length-prefixed
//! `KEY=value` comments. All integers are 32-bit little-endian. The comment header packet of an
//! Ogg Vorbis stream prefixes the block with the `\x03vorbis` signature.

use std::collections::HashMap;

use lazy_static::lazy_static;
use log::{debug, warn};
use smallvec::SmallVec;

use picodec_core::errors::{decode_error, Error, Result};

use crate::tags::{StandardTagKey, Tag};

#[rustfmt::skip]
const VORBIS_COMMENT_KEYS: &[(&str, StandardTagKey)] = &[
    ("album artist"               , StandardTagKey::AlbumArtist),
    ("album"                      , StandardTagKey::Album),
    ("albumartist"                , StandardTagKey::AlbumArtist),
    ("albumartistsort"            , StandardTagKey::SortAlbumArtist),
    ("albumsort"                  , StandardTagKey::SortAlbum),
    ("arranger"                   , StandardTagKey::Arranger),
    ("artist"                     , StandardTagKey::Artist),
    ("artistsort"                 , StandardTagKey::SortArtist),
    ("author"                     , StandardTagKey::Writer),
    ("barcode"                    , StandardTagKey::IdentBarcode),
    ("bpm"                        , StandardTagKey::Bpm),
    ("catalognumber"              , StandardTagKey::IdentCatalogNumber),
    ("comment"                    , StandardTagKey::Comment),
    ("compilation"                , StandardTagKey::Compilation),
    ("composer"                   , StandardTagKey::Composer),
    ("conductor"                  , StandardTagKey::Conductor),
    ("copyright"                  , StandardTagKey::Copyright),
    ("date"                       , StandardTagKey::Date),
    ("description"                , StandardTagKey::Description),
    ("discnumber"                 , StandardTagKey::DiscNumber),
    ("discsubtitle"               , StandardTagKey::DiscSubtitle),
    ("disctotal"                  , StandardTagKey::DiscTotal),
    ("encoded-by"                 , StandardTagKey::EncodedBy),
    ("encoder"                    , StandardTagKey::Encoder),
    ("encoding"                   , StandardTagKey::EncoderSettings),
    ("engineer"                   , StandardTagKey::Engineer),
    ("ensemble"                   , StandardTagKey::Ensemble),
    ("genre"                      , StandardTagKey::Genre),
    ("isrc"                       , StandardTagKey::IdentIsrc),
    ("label"                      , StandardTagKey::Label),
    ("language"                   , StandardTagKey::Language),
    ("license"                    , StandardTagKey::License),
    ("lyricist"                   , StandardTagKey::Lyricist),
    ("lyrics"                     , StandardTagKey::Lyrics),
    ("media"                      , StandardTagKey::MediaFormat),
    ("mixer"                      , StandardTagKey::MixEngineer),
    ("mood"                       , StandardTagKey::Mood),
    ("musicbrainz_albumid"        , StandardTagKey::MusicBrainzAlbumId),
    ("musicbrainz_artistid"       , StandardTagKey::MusicBrainzArtistId),
    ("musicbrainz_recordingid"    , StandardTagKey::MusicBrainzRecordingId),
    ("musicbrainz_trackid"        , StandardTagKey::MusicBrainzTrackId),
    ("organization"               , StandardTagKey::Label),
    ("originaldate"               , StandardTagKey::OriginalDate),
    ("performer"                  , StandardTagKey::Performer),
    ("producer"                   , StandardTagKey::Producer),
    ("publisher"                  , StandardTagKey::Label),
    ("rating"                     , StandardTagKey::Rating),
    ("remixer"                    , StandardTagKey::Remixer),
    ("replaygain_album_gain"      , StandardTagKey::ReplayGainAlbumGain),
    ("replaygain_album_peak"      , StandardTagKey::ReplayGainAlbumPeak),
    ("replaygain_track_gain"      , StandardTagKey::ReplayGainTrackGain),
    ("replaygain_track_peak"      , StandardTagKey::ReplayGainTrackPeak),
    ("subtitle"                   , StandardTagKey::TrackSubtitle),
    ("title"                      , StandardTagKey::TrackTitle),
    ("titlesort"                  , StandardTagKey::SortTrackTitle),
    ("totaldiscs"                 , StandardTagKey::DiscTotal),
    ("totaltracks"                , StandardTagKey::TrackTotal),
    ("tracknumber"                , StandardTagKey::TrackNumber),
    ("tracktotal"                 , StandardTagKey::TrackTotal),
    ("version"                    , StandardTagKey::Version),
    ("writer"                     , StandardTagKey::Writer),
    ("year"                       , StandardTagKey::Date),
];

lazy_static! {
    static ref VORBIS_COMMENT_MAP: HashMap<&'static str, StandardTagKey> =
        VORBIS_COMMENT_KEYS.iter().copied().collect();
}

/// The signature of an Ogg Vorbis comment header packet.
const COMMENT_PACKET_SIGNATURE: [u8; 7] = *b"\x03vorbis";

/// A comment with this key holds a base64 encoded FLAC picture block.
const PICTURE_KEY: &[u8] = b"metadata_block_picture";

/// The default limit on the length of a single comment.
pub const DEFAULT_MAX_COMMENT_BYTES: usize = 1024;

/// The progress of a [`VorbisCommentParser`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CommentStatus {
    /// All comments have been read. Further input is ignored.
    Done,
    /// More input is required.
    NeedMore,
}

/// The location of a base64 encoded picture block, relative to the first byte pushed into the
/// parser.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PictureRange {
    pub offset: usize,
    pub len: usize,
}

impl PictureRange {
    /// Gets the encoded picture from a buffer holding the whole comment block.
    pub fn slice<'a>(&self, block: &'a [u8]) -> Option<&'a [u8]> {
        block.get(self.offset..self.offset + self.len)
    }
}

/// The contents of a comment block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VorbisComments {
    pub vendor: String,
    pub tags: Vec<Tag>,
    pub pictures: SmallVec<[PictureRange; 2]>,
}

impl VorbisComments {
    /// Gets the value of the first tag with the given standard key.
    pub fn get(&self, key: StandardTagKey) -> Option<&str> {
        self.tags.iter().find(|tag| tag.std_key == Some(key)).map(|tag| tag.value.as_str())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Field {
    Signature,
    VendorLen,
    CommentCount,
    CommentLen,
}

impl Field {
    fn width(self) -> usize {
        match self {
            Field::Signature => COMMENT_PACKET_SIGNATURE.len(),
            _ => 4,
        }
    }
}

/// How the bytes of the comment being read are handled.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Payload {
    /// The key is being read.
    Key,
    /// The key is known and the value is being buffered.
    Text,
    /// The comment is a picture, starting at the given offset, and is not buffered.
    Picture(usize),
    /// The comment is discarded.
    Skip,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Field(Field),
    /// The vendor string is being read. It is dropped if it exceeds the limit.
    Vendor { remaining: usize, skip: bool },
    Comment { remaining: usize, payload: Payload },
    Done,
}

/// Parses a comment block from data pushed in arbitrary pieces.
pub struct VorbisCommentParser {
    state: State,
    field: [u8; 7],
    field_len: usize,
    /// The number of bytes consumed so far.
    pos: usize,
    n_remaining: u32,
    max_comment_bytes: usize,
    text: Vec<u8>,
    comments: VorbisComments,
}

impl VorbisCommentParser {
    /// Instantiate a parser for a bare comment block, as embedded in FLAC.
    ///
    /// Comments longer than `max_comment_bytes` are skipped. Pictures are never buffered and are
    /// not subject to the limit.
    pub fn try_new(max_comment_bytes: usize) -> Result<Self> {
        let mut text = Vec::new();
        text.try_reserve_exact(max_comment_bytes.max(PICTURE_KEY.len()))
            .map_err(|_| Error::OutOfMemory)?;

        Ok(VorbisCommentParser {
            state: State::Field(Field::VendorLen),
            field: [0; 7],
            field_len: 0,
            pos: 0,
            n_remaining: 0,
            max_comment_bytes,
            text,
            comments: Default::default(),
        })
    }

    /// Instantiate a parser for an Ogg Vorbis comment header packet, including its signature.
    pub fn try_new_packet(max_comment_bytes: usize) -> Result<Self> {
        let mut parser = VorbisCommentParser::try_new(max_comment_bytes)?;
        parser.state = State::Field(Field::Signature);
        Ok(parser)
    }

    /// Gets the comments read so far.
    pub fn comments(&self) -> &VorbisComments {
        &self.comments
    }

    /// Consumes the parser and returns the comments read.
    pub fn into_comments(self) -> VorbisComments {
        self.comments
    }

    /// Gets the number of bytes pushed into the parser that belonged to the comment block.
    pub fn bytes_read(&self) -> usize {
        self.pos
    }

    pub fn status(&self) -> CommentStatus {
        match self.state {
            State::Done => CommentStatus::Done,
            _ => CommentStatus::NeedMore,
        }
    }

    /// Push the next piece of the comment block.
    pub fn push(&mut self, mut buf: &[u8]) -> Result<CommentStatus> {
        while !buf.is_empty() {
            let n = match self.state {
                State::Done => break,
                State::Field(field) => {
                    let n = (field.width() - self.field_len).min(buf.len());

                    self.field[self.field_len..self.field_len + n].copy_from_slice(&buf[..n]);
                    self.field_len += n;
                    self.pos += n;

                    if self.field_len == field.width() {
                        self.field_len = 0;
                        self.end_field(field)?;
                    }

                    n
                }
                State::Vendor { remaining, skip } => {
                    let n = remaining.min(buf.len());

                    let skip = skip || !self.buffer_text(&buf[..n]);
                    self.pos += n;

                    if skip {
                        self.text.clear();
                    }

                    if n == remaining {
                        if skip {
                            warn!(
                                "vorbis: skipping vendor longer than {} bytes",
                                self.max_comment_bytes
                            );
                        }
                        else {
                            self.comments.vendor = String::from_utf8_lossy(&self.text).into_owned();
                        }
                        self.text.clear();
                        self.state = State::Field(Field::CommentCount);
                    }
                    else {
                        self.state = State::Vendor { remaining: remaining - n, skip };
                    }

                    n
                }
                State::Comment { remaining, payload } => {
                    let n = remaining.min(buf.len());

                    let payload = self.comment_bytes(payload, &buf[..n]);
                    self.pos += n;

                    if n == remaining {
                        self.end_comment(payload);
                    }
                    else {
                        self.state = State::Comment { remaining: remaining - n, payload };
                    }

                    n
                }
            };

            buf = &buf[n..];
        }

        Ok(self.status())
    }

    fn end_field(&mut self, field: Field) -> Result<()> {
        let [b0, b1, b2, b3, ..] = self.field;
        let value = u32::from_le_bytes([b0, b1, b2, b3]);

        self.state = match field {
            Field::Signature => {
                if self.field != COMMENT_PACKET_SIGNATURE {
                    return decode_error("vorbis: invalid comment header signature");
                }
                State::Field(Field::VendorLen)
            }
            Field::VendorLen if value == 0 => State::Field(Field::CommentCount),
            Field::VendorLen => State::Vendor { remaining: value as usize, skip: false },
            Field::CommentCount => {
                debug!("vorbis: reading {} comments", value);

                self.n_remaining = value;

                if value == 0 {
                    State::Done
                }
                else {
                    State::Field(Field::CommentLen)
                }
            }
            Field::CommentLen if value == 0 => {
                self.end_comment(Payload::Key);
                return Ok(());
            }
            Field::CommentLen => {
                State::Comment { remaining: value as usize, payload: Payload::Key }
            }
        };

        Ok(())
    }

    /// Appends to the text buffer. Returns `false` if the text would exceed the limit.
    fn buffer_text(&mut self, bytes: &[u8]) -> bool {
        self.buffer_text_limit(bytes, self.max_comment_bytes)
    }

    fn buffer_text_limit(&mut self, bytes: &[u8], limit: usize) -> bool {
        if self.text.len() + bytes.len() > limit {
            return false;
        }
        self.text.extend_from_slice(bytes);
        true
    }

    fn comment_bytes(&mut self, payload: Payload, bytes: &[u8]) -> Payload {
        let payload = match payload {
            Payload::Key => match bytes.iter().position(|&b| b == b'=') {
                Some(i) => {
                    let is_picture = self.text.len() + i == PICTURE_KEY.len()
                        && self.text.iter().chain(&bytes[..i]).zip(PICTURE_KEY).all(
                            |(&a, &b)| a.to_ascii_lowercase() == b,
                        );

                    if is_picture {
                        // The picture is located, not copied.
                        self.text.clear();
                        return Payload::Picture(self.pos + i + 1);
                    }

                    if self.buffer_text(bytes) {
                        Payload::Text
                    }
                    else {
                        Payload::Skip
                    }
                }
                // Keys are always buffered far enough to recognize a picture.
                None if self.buffer_text_limit(
                    bytes,
                    self.max_comment_bytes.max(PICTURE_KEY.len()),
                ) =>
                {
                    Payload::Key
                }
                None => Payload::Skip,
            },
            Payload::Text if self.buffer_text(bytes) => Payload::Text,
            Payload::Text => Payload::Skip,
            other => other,
        };

        if payload == Payload::Skip {
            warn!("vorbis: skipping comment longer than {} bytes", self.max_comment_bytes);
            self.text.clear();
        }

        payload
    }

    fn end_comment(&mut self, payload: Payload) {
        match payload {
            Payload::Text => self.comments.tags.push(parse_comment(&self.text)),
            Payload::Picture(offset) => {
                self.comments.pictures.push(PictureRange { offset, len: self.pos - offset })
            }
            Payload::Key => debug!("vorbis: ignoring comment without a value"),
            Payload::Skip => (),
        }

        self.text.clear();
        self.n_remaining -= 1;

        self.state =
            if self.n_remaining == 0 { State::Done } else { State::Field(Field::CommentLen) };
    }
}

/// Parse a `KEY=value` comment into a `Tag`.
fn parse_comment(comment: &[u8]) -> Tag {
    // Keys are ASCII, case-insensitive, and may not contain '='. Values are UTF-8.
    let comment = String::from_utf8_lossy(comment);

    let (key, value) = comment.split_once('=').unwrap_or((comment.as_ref(), ""));

    let std_key = VORBIS_COMMENT_MAP.get(key.to_ascii_lowercase().as_str()).copied();

    Tag::new(std_key, key, value)
}

/// Reads a complete comment block without a signature or framing bit.
pub fn read_comment_no_framing(buf: &[u8], max_comment_bytes: usize) -> Result<VorbisComments> {
    let mut parser = VorbisCommentParser::try_new(max_comment_bytes)?;

    match parser.push(buf)? {
        CommentStatus::Done => Ok(parser.into_comments()),
        CommentStatus::NeedMore => decode_error("vorbis: comment block is truncated"),
    }
}
