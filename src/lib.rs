// Flacore -- a lossless audio codec core in Rust
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Flacore is a lossless audio codec core: a streaming encoder and
//! decoder for a self-synchronizing compressed bitstream built from
//! STREAMINFO/SEEKTABLE metadata blocks and CRC-guarded audio frames,
//! Rice-coded fixed and LPC predictor residuals, and stereo
//! decorrelation.
//!
//! [`StreamDecoder`] pulls frames one at a time from anything
//! implementing [`BytesSource`], recovering from corrupt frames rather
//! than aborting the stream. [`SeekableDecoder`] wraps a
//! [`SeekableSource`] to add sample-accurate seeking. [`StreamEncoder`]
//! accepts blocks of samples and produces a complete stream on
//! [`StreamEncoder::finish`].
//!
//! This crate is the codec core only: container formats (Ogg FLAC, the
//! ubiquitous `.flac` file layout with ID3/APEv2 tags), tag parsing, and
//! resampling are out of scope. See the crate's `DESIGN.md` for the
//! grounding behind each module.

mod bitstream;
mod crc;
mod decoder;
mod encoder;
mod error;
mod frame;
mod io_traits;
mod md5;
mod metadata;
mod predictor;
mod rice;
mod seekable;
mod subframe;

pub use decoder::{DecodedFrame, FrameOutcome, StreamDecoder};
pub use encoder::{EncoderConfig, StreamEncoder};
pub use error::{Error, Result, VerifyLocation};
pub use io_traits::{BytesSink, BytesSource, SeekableSource};
pub use metadata::{BlockType, MetadataBlock, SeekPoint, SeekTable, StreamInfo, SEEKPOINT_PLACEHOLDER, STREAM_SYNC};
pub use seekable::SeekableDecoder;
pub use subframe::{EncodedSubframe, SubframeType};
