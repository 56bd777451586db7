// Flacore -- a lossless audio codec core in Rust
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! The `error` module defines the error and result types shared by the
//! encoder and the decoder.

use std::fmt;

/// Where in a stream a mismatch between pre-encode and decoded samples was found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerifyLocation {
    pub absolute_sample: u64,
    pub frame: u32,
    pub channel: u8,
    pub subsample: u32,
}

impl fmt::Display for VerifyLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame {}, channel {}, subsample {} (absolute sample {})",
            self.frame, self.channel, self.subsample, self.absolute_sample
        )
    }
}

/// An error that can occur while decoding or encoding a stream.
///
/// This is a flat taxonomy grouping the configuration, resource,
/// bitstream, integrity and I/O error kinds. Bitstream errors other than
/// `UnparseableStream` are recoverable: the decoder reports them and
/// resynchronizes instead of aborting.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A configuration value was out of range, or the requested streamable
    /// subset would be violated. Fatal, always raised before the first frame.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// A buffer failed to grow. Fatal.
    #[error("memory allocation failed")]
    MemoryAllocationError,

    /// Resynchronization was required after a byte pattern that did not
    /// match the expected sync code. Recoverable.
    #[error("lost synchronization with the stream")]
    LostSync,

    /// A frame or metadata block header was malformed, or failed its CRC-8.
    /// Recoverable: the decoder returns to sync search.
    #[error("bad frame or block header: {0}")]
    BadHeader(&'static str),

    /// A frame's CRC-16 footer did not match. Recoverable.
    #[error("frame CRC-16 mismatch in frame {frame}")]
    FrameCrcMismatch { frame: u32 },

    /// The stream could not be parsed at all (e.g. missing stream sync, or
    /// an I/O error reported before any valid frame was read). Fatal.
    #[error("stream is not parseable: {0}")]
    UnparseableStream(&'static str),

    /// A read was attempted past the end of the available input before the
    /// requested number of bits could be produced. Fatal: a bitstream
    /// cannot usefully resynchronize inside a truncated frame.
    #[error("truncated stream: expected more data")]
    TruncatedStream,

    /// The encoder's internal verification decoder produced samples that
    /// differ from the pre-encode input. Fatal.
    #[error("verification mismatch at {location}: expected {expected}, got {got}")]
    VerifyMismatch {
        location: VerifyLocation,
        expected: i64,
        got: i64,
    },

    /// The MD5 computed while decoding does not match the MD5 stored in
    /// STREAMINFO. Only raised when checking was enabled and never disabled
    /// by an intervening seek.
    #[error("MD5 checksum mismatch")]
    Md5Mismatch,

    /// A callback reported an abort request.
    #[error("operation aborted by caller")]
    Aborted,

    /// An error surfaced from a caller-supplied read/write/seek callback.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Either `T` on success, or an [`Error`] on failure.
pub type Result<T> = std::result::Result<T, Error>;
