// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]
// The following lints are allowed in all picodec crates. Please see the workspace Cargo.toml for
// the full list.
#![allow(clippy::comparison_chain)]
#![allow(clippy::excessive_precision)]
#![allow(clippy::identity_op)]
#![allow(clippy::manual_range_contains)]

// Shared modules.
mod common;
mod header;
mod synthesis;
mod vbr;

// Decoder module.
#[cfg(any(feature = "mp1", feature = "mp3"))]
mod decoder;

// Layer-specific decoder support modules.
#[cfg(feature = "mp1")]
mod layer1;
#[cfg(feature = "mp3")]
mod layer3;

#[cfg(test)]
mod testutil;

#[cfg(any(feature = "mp1", feature = "mp3"))]
pub use decoder::{FakeFramePolicy, LayerSet, Mp3Decoder, Mp3DecoderOptions};
pub use common::{ChannelMode, Emphasis, FrameHeader, Mode, MpegLayer, MpegVersion};
pub use header::{find_sync_word, id3v2_tag_len, parse_frame_header};
pub use vbr::{VbrHeader, VbrHeaderKind};
