// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tags and standard tag keys.

use std::fmt;

/// A `StandardTagKey` is a key that has a well-defined meaning across metadata formats.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StandardTagKey {
    Album,
    AlbumArtist,
    Arranger,
    Artist,
    Bpm,
    Comment,
    Compilation,
    Composer,
    Conductor,
    Copyright,
    Date,
    Description,
    DiscNumber,
    DiscSubtitle,
    DiscTotal,
    EncodedBy,
    Encoder,
    EncoderSettings,
    Engineer,
    Ensemble,
    Genre,
    IdentBarcode,
    IdentCatalogNumber,
    IdentIsrc,
    IdentUpc,
    Label,
    Language,
    License,
    Lyricist,
    Lyrics,
    MediaFormat,
    MixEngineer,
    Mood,
    MusicBrainzAlbumId,
    MusicBrainzArtistId,
    MusicBrainzRecordingId,
    MusicBrainzTrackId,
    OriginalDate,
    Performer,
    Producer,
    Rating,
    Remixer,
    ReplayGainAlbumGain,
    ReplayGainAlbumPeak,
    ReplayGainTrackGain,
    ReplayGainTrackPeak,
    SortAlbum,
    SortAlbumArtist,
    SortArtist,
    SortTrackTitle,
    TrackNumber,
    TrackSubtitle,
    TrackTitle,
    TrackTotal,
    Version,
    Writer,
}

/// A key-value pair read from a metadata block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    /// The standard key, if the key is a well-known one.
    pub std_key: Option<StandardTagKey>,
    /// The key as written in the metadata block.
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(std_key: Option<StandardTagKey>, key: &str, value: &str) -> Tag {
        Tag { std_key, key: key.to_string(), value: value.to_string() }
    }

    /// Returns `true` if the tag has a standard key.
    pub fn is_known(&self) -> bool {
        self.std_key.is_some()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.std_key {
            Some(std_key) => write!(f, "{:?}: {} = {}", std_key, self.key, self.value),
            None => write!(f, "{} = {}", self.key, self.value),
        }
    }
}
