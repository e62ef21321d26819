//! Byte sources
//!
//! The player addresses the song by absolute position. An in-memory source is
//! randomly indexable; a streamed source reads sequentially and seeks only
//! when the requested position differs from its current one (the rewind-by-one
//! after an operand scan, or a loop back to the start).

use crate::Result;
use std::io::{ErrorKind, Read, Seek, SeekFrom};

/// Sequential, seekable reader over a song
pub trait ByteSource {
    /// Total length in bytes, known before playback starts
    fn len(&self) -> usize;

    /// Whether the source holds no bytes
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the byte at `index`, or `None` when `index` is past the end
    fn byte_at(&mut self, index: usize) -> Result<Option<u8>>;
}

/// Finite in-memory song
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    /// Wrap a byte buffer
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        MemorySource { data: data.into() }
    }

    /// Borrow the underlying bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl ByteSource for MemorySource {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn byte_at(&mut self, index: usize) -> Result<Option<u8>> {
        Ok(self.data.get(index).copied())
    }
}

impl From<Vec<u8>> for MemorySource {
    fn from(data: Vec<u8>) -> Self {
        MemorySource::new(data)
    }
}

impl From<&[u8]> for MemorySource {
    fn from(data: &[u8]) -> Self {
        MemorySource::new(data)
    }
}

/// Streamed song over any seekable reader (typically a file)
///
/// The length is measured once at construction by seeking to the end, so
/// end-of-song detection does not depend on the reader reporting EOF.
#[derive(Debug)]
pub struct StreamSource<R> {
    inner: R,
    len: usize,
    pos: usize,
}

impl<R: Read + Seek> StreamSource<R> {
    /// Wrap a reader, measuring its length from the current position
    pub fn new(mut inner: R) -> Result<Self> {
        let start = inner.stream_position()?;
        let end = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(start))?;
        let len = end.saturating_sub(start) as usize;

        Ok(StreamSource {
            inner,
            len,
            pos: 0,
        })
    }

    /// Unwrap the reader
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn seek_to(&mut self, index: usize) -> Result<()> {
        let delta = index as i64 - self.pos as i64;
        self.inner.seek(SeekFrom::Current(delta))?;
        self.pos = index;
        Ok(())
    }
}

impl<R: Read + Seek> ByteSource for StreamSource<R> {
    fn len(&self) -> usize {
        self.len
    }

    fn byte_at(&mut self, index: usize) -> Result<Option<u8>> {
        if index >= self.len {
            return Ok(None);
        }
        if index != self.pos {
            self.seek_to(index)?;
        }

        let mut buf = [0u8; 1];
        loop {
            match self.inner.read(&mut buf) {
                Ok(0) => return Ok(None), // truncated underneath us
                Ok(_) => {
                    self.pos += 1;
                    return Ok(Some(buf[0]));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
