// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A fixed-point Vorbis I decoder.
//!
//! Ogg pages are pushed into a [`VorbisDecoder`] from caller-owned buffers. The decoder parses the
//! three header packets, then synthesizes each audio packet into interleaved 16-bit PCM.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]
// The following lints are allowed in all picodec crates. Please see the workspace Cargo.toml for
// the full list.
#![allow(clippy::comparison_chain)]
#![allow(clippy::excessive_precision)]
#![allow(clippy::identity_op)]
#![allow(clippy::manual_range_contains)]
// Disabled so that branches mirror the packet syntax in the Vorbis I specification.
#![allow(clippy::collapsible_else_if)]

mod codebook;
mod common;
mod decoder;
mod dsp;
mod floor;
mod residue;
mod setup;
#[cfg(test)]
mod testutil;
mod window;

pub use decoder::{VorbisDecoder, VorbisDecoderOptions};
