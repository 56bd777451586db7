// Flacore -- a lossless audio codec core in Rust
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0

//! Capability traits at the boundary between the codec core and its
//! callers: `BytesSource` for the decoder's pull-based read side,
//! `SeekableSource` adds the seek/tell/length/eof callbacks the
//! seekable decoder needs, and `BytesSink` for the encoder's
//! push-based write side.
//!
//! Blanket implementations let any `std::io::Read`/`Write`/`Seek` be used
//! directly; a caller only needs a custom impl when driving the codec
//! from something that is not an `io` type (an async socket behind a
//! small sync shim, for instance).

use crate::error::{Error, Result};

/// A source of bytes the decoder pulls from on demand.
pub trait BytesSource {
    /// Reads up to `buf.len()` bytes, returning the number of bytes
    /// actually placed. Returns `0` only at end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// A `BytesSource` that can additionally seek, report its position, its
/// total length, and whether it is at the end.
pub trait SeekableSource: BytesSource {
    fn seek(&mut self, offset: u64) -> Result<()>;
    fn tell(&mut self) -> Result<u64>;
    fn length(&mut self) -> Result<Option<u64>>;
    fn eof(&mut self) -> Result<bool>;
}

/// A destination the encoder pushes serialized bytes into, in stream
/// order: metadata blocks first, then audio frames in ascending frame
/// number.
pub trait BytesSink {
    /// Writes one chunk of the encoded stream: either a metadata write
    /// (`samples == 0`, `frame_number` meaningless) or one whole frame
    /// (`samples` is that frame's block size, `frame_number` its
    /// ascending index). A sink that only cares about the raw bytes can
    /// ignore the other two parameters.
    fn write(&mut self, buf: &[u8], samples: u32, frame_number: u32) -> Result<()>;
}

impl<R: std::io::Read> BytesSource for R {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(std::io::Read::read(self, buf)?)
    }
}

impl<R: std::io::Read + std::io::Seek> SeekableSource for R {
    fn seek(&mut self, offset: u64) -> Result<()> {
        std::io::Seek::seek(self, std::io::SeekFrom::Start(offset))?;
        Ok(())
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(std::io::Seek::seek(self, std::io::SeekFrom::Current(0))?)
    }

    fn length(&mut self) -> Result<Option<u64>> {
        let current = self.tell()?;
        let end = std::io::Seek::seek(self, std::io::SeekFrom::End(0))?;
        std::io::Seek::seek(self, std::io::SeekFrom::Start(current))?;
        Ok(Some(end))
    }

    fn eof(&mut self) -> Result<bool> {
        let len = self.length()?.unwrap_or(u64::MAX);
        Ok(self.tell()? >= len)
    }
}

impl<W: std::io::Write> BytesSink for W {
    fn write(&mut self, buf: &[u8], _samples: u32, _frame_number: u32) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        Ok(())
    }
}

/// Reads exactly `buf.len()` bytes from `source`, or returns
/// `TruncatedStream` if the source hits EOF first.
pub fn read_exact(source: &mut dyn BytesSource, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..])?;
        if n == 0 {
            return Err(Error::TruncatedStream);
        }
        filled += n;
    }
    Ok(())
}
