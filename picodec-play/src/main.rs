// Picodec
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]
// Justification: Fields on the decoder options may change at any time, but picodec-play doesn't
// want to be updated every time those fields change, therefore always fill in the remaining fields
// with default values.
#![allow(clippy::needless_update)]

use std::error::Error as StdError;
use std::fs::File;
use std::io::{BufWriter, Read};
use std::path::Path;

use picodec::codecs::{Emphasis, Mp3DecoderOptions, VorbisDecoderOptions};
use picodec::core::codecs::{Decoder, StreamInfo};
use picodec::core::errors::Error;
use picodec::metadata::vorbis::VorbisComments;
use picodec::{AnyDecoder, CodecKind, DecoderOptions};

use clap::{Arg, ArgMatches};
use log::{debug, error, info, warn};

mod output;

use output::{PcmOutput, RawOutput, WavOutput};

type Result<T> = std::result::Result<T, Box<dyn StdError>>;

/// The default number of bytes read from the input at a time.
const DEFAULT_CHUNK_LEN: usize = 4096;

/// The minimum padding for tag keys.
const MIN_PAD: usize = 20;

fn main() {
    pretty_env_logger::init();

    let args = clap::Command::new("Picodec Play")
        .version("1.0")
        .author("The Project Picodec Developers")
        .about("Decode MP3 and Ogg Vorbis files with picodec")
        .arg(
            Arg::new("format")
                .long("format")
                .short('f')
                .value_name("FORMAT")
                .possible_values(["raw", "wav"])
                .default_value("raw")
                .help("The output file format"),
        )
        .arg(
            Arg::new("chunk")
                .long("chunk")
                .short('c')
                .value_name("BYTES")
                .help("The number of bytes to read from the input at a time"),
        )
        .arg(Arg::new("no-crc").long("no-crc").help("Do not verify frame and page checksums"))
        .arg(
            Arg::new("max-bogus")
                .long("max-bogus")
                .value_name("COUNT")
                .help("The number of bogus MP3 frame syncs tolerated per second of audio"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .value_name("OUTPUT")
                .help("The output file path. If not provided, the input is only decoded"),
        )
        .arg(Arg::new("INPUT").help("The input file path").required(true).index(1))
        .get_matches();

    // For any error, return an exit code -1. Otherwise return the exit code provided.
    let code = match run(&args) {
        Ok(code) => code,
        Err(err) => {
            error!("{}", err.to_string().to_lowercase());
            -1
        }
    };

    std::process::exit(code)
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum OutputFormat {
    Raw,
    Wav,
}

struct PlayOptions<'a> {
    output: Option<&'a Path>,
    format: OutputFormat,
    chunk_len: usize,
    decoder: DecoderOptions,
}

fn run(args: &ArgMatches) -> Result<i32> {
    let input = match args.value_of("INPUT") {
        Some(input) => Path::new(input),
        None => return Ok(0),
    };

    let chunk_len = match args.value_of("chunk") {
        Some(chunk) => chunk.parse::<usize>()?.max(1),
        None => DEFAULT_CHUNK_LEN,
    };

    let format = match args.value_of("format") {
        Some("wav") => OutputFormat::Wav,
        _ => OutputFormat::Raw,
    };

    let verify_crc = !args.is_present("no-crc");

    let mut mp3 = Mp3DecoderOptions { verify_crc, ..Default::default() };

    if let Some(max_bogus) = args.value_of("max-bogus") {
        mp3.fake_frame.max_bogus_syncs = max_bogus.parse::<u32>()?;
    }

    let vorbis = VorbisDecoderOptions { verify_crc, ..Default::default() };

    let opts = PlayOptions {
        output: args.value_of("output").map(Path::new),
        format,
        chunk_len,
        decoder: DecoderOptions { mp3, vorbis, ..Default::default() },
    };

    println!("+ {}", input.display());

    decode_file(File::open(input)?, &opts)
}

/// Opens the output once the sample rate of the stream is known.
fn open_output(opts: &PlayOptions<'_>, info: &StreamInfo) -> Result<Option<Box<dyn PcmOutput>>> {
    let path = match opts.output {
        Some(path) => path,
        None => return Ok(None),
    };

    let writer = BufWriter::new(File::create(path)?);

    let output: Box<dyn PcmOutput> = match opts.format {
        OutputFormat::Raw => Box::new(RawOutput::new(writer)),
        OutputFormat::Wav => Box::new(WavOutput::try_new(writer, info.sample_rate)?),
    };

    info!("writing to {}", path.display());

    Ok(Some(output))
}

/// Tracks what has been printed about the stream.
#[derive(Default)]
struct Printed {
    info: Option<StreamInfo>,
    frame: bool,
    vbr: bool,
    comments: bool,
}

fn decode_file(mut file: File, opts: &PlayOptions<'_>) -> Result<i32> {
    let mut buf: Vec<u8> = Vec::with_capacity(2 * opts.chunk_len);
    let mut start = 0;
    let mut is_eof = false;
    let mut is_starved = false;

    let mut decoder: Option<AnyDecoder> = None;
    let mut output: Option<Box<dyn PcmOutput>> = None;
    let mut out: Vec<i32> = Vec::new();

    let mut printed = Printed::default();
    let mut n_frames = 0u64;
    let mut n_errors = 0u64;

    loop {
        // Top-up the buffer when it runs low, or when the decoder requires more than is buffered.
        if !is_eof && (is_starved || buf.len() - start < opts.chunk_len) {
            buf.drain(..start);
            start = 0;

            let len = buf.len();
            buf.resize(len + opts.chunk_len, 0);

            let n_read = file.read(&mut buf[len..])?;
            buf.truncate(len + n_read);

            is_eof = n_read == 0;
            is_starved = false;
            continue;
        }

        let input = &buf[start..];

        // Select a decoder on the first bytes of the stream.
        if decoder.is_none() {
            match AnyDecoder::try_probe(input, &opts.decoder) {
                Ok(new) => {
                    print_kind(new.kind());
                    decoder = Some(new);
                }
                Err(Error::NeedMoreData) if !is_eof => {
                    is_starved = true;
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }

        let decoder = match decoder.as_mut() {
            Some(decoder) => decoder,
            None => break,
        };

        out.resize(decoder.max_output_samples(), 0);

        let result = decoder.decode(input, &mut out);

        print_metadata(decoder, &mut printed);

        match result {
            Ok(decoded) => {
                start += decoded.consumed;

                if decoded.samples == 0 {
                    continue;
                }

                if output.is_none() {
                    if let Some(info) = decoder.stream_info() {
                        output = open_output(opts, &info)?;
                    }
                }

                if let Some(output) = output.as_mut() {
                    output.write(&out[..decoded.samples])?;
                }

                n_frames += (decoded.samples / 2) as u64;
            }
            Err(failure) => {
                start += failure.consumed;

                match failure.error {
                    Error::NeedMoreData => {
                        if is_eof {
                            break;
                        }
                        is_starved = true;
                    }
                    Error::MainDataUnderflow => {
                        // Expected for the first frames of a stream that starts mid-reservoir.
                        debug!("main data underflow, frame skipped");
                    }
                    Error::ResetRequired if failure.consumed > 0 => {
                        // The stream changed, or was never the kind of stream it appeared to be.
                        warn!("decoder requires a reset");
                        decoder.reset();
                    }
                    err if failure.consumed > 0 => {
                        // Skipped input is not fatal. Try to decode the next frame as usual.
                        warn!("decode error: {}", err);
                        n_errors += 1;
                    }
                    err => return Err(err.into()),
                }
            }
        }
    }

    if let Some(output) = output.as_mut() {
        output.finish()?;
    }

    info!("end of stream");

    print_summary(printed.info, n_frames, n_errors);

    Ok(0)
}

fn print_kind(kind: CodecKind) {
    let name = match kind {
        CodecKind::Mp3 => "MPEG Audio",
        CodecKind::Vorbis => "Ogg Vorbis",
    };

    println!("|");
    println!("| // Stream //");
    print_pair("Codec:", name);
}

fn print_metadata(decoder: &AnyDecoder, printed: &mut Printed) {
    if let Some(info) = decoder.stream_info() {
        if printed.info != Some(info) {
            print_pair("Channels:", &info.channels.count().to_string());
            print_pair("Sample Rate:", &format!("{} Hz", info.sample_rate));
            if info.bitrate > 0 {
                print_pair("Bitrate:", &format!("{} kbps", info.bitrate / 1000));
            }
            printed.info = Some(info);
        }
    }

    if !printed.frame {
        if let Some(header) = decoder.frame_header() {
            if header.emphasis != Emphasis::None {
                print_pair("Emphasis:", &format!("{:?}", header.emphasis));
            }
            print_pair("Copyright:", if header.is_copyrighted { "yes" } else { "no" });
            print_pair("Original:", if header.is_original { "yes" } else { "no" });
            printed.frame = true;
        }
    }

    if !printed.vbr {
        if let Some(vbr) = decoder.vbr_header() {
            print_pair("Info Header:", &format!("{:?}", vbr.kind));
            if let Some(n_frames) = vbr.n_frames {
                print_pair("Frames:", &n_frames.to_string());
            }
            print_pair("Encoder Delay:", &vbr.encoder_delay.to_string());
            print_pair("Encoder Padding:", &vbr.encoder_padding.to_string());
            printed.vbr = true;
        }
    }

    if !printed.comments {
        if let Some(comments) = decoder.comments() {
            print_comments(comments);
            printed.comments = true;
        }
    }
}

fn print_comments(comments: &VorbisComments) {
    println!("|");
    println!("| // Tags //");
    print_pair("Vendor:", &comments.vendor);

    for tag in comments.tags.iter() {
        match tag.std_key {
            Some(std_key) => print_pair(&format!("{:?}:", std_key), &tag.value),
            None => print_pair(&format!("{}:", tag.key), &tag.value),
        }
    }

    for (i, picture) in comments.pictures.iter().enumerate() {
        print_pair(&format!("Picture {}:", i + 1), &format!("{} bytes", picture.len));
    }
}

fn print_summary(info: Option<StreamInfo>, n_frames: u64, n_errors: u64) {
    println!("|");
    println!("| // Decoded //");
    print_pair("Frames:", &n_frames.to_string());

    if let Some(info) = info.filter(|info| info.sample_rate > 0) {
        let ms = n_frames * 1000 / u64::from(info.sample_rate);
        print_pair("Duration:", &format!("{}:{:02}.{:03}", ms / 60_000, ms / 1000 % 60, ms % 1000));
    }

    print_pair("Errors:", &n_errors.to_string());
    println!("-");
}

fn print_pair(key: &str, value: &str) {
    println!("|     {:<pad$} {}", key, value, pad = MIN_PAD);
}
