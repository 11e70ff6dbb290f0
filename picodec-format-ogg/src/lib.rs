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

mod page;
mod reader;

pub use page::{find_page_marker, parse_page, Page, PageHeader, OGG_PAGE_MAX_SIZE};
pub use reader::{Fragment, OggPacket, OggReader, OggReaderOptions, PageRead};
