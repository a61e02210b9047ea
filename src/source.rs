//! Raw byte sources feeding the decoder

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::{Result, WebarcError};

/// Combined read + seek capability for boxing
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// Underlying byte source of a reader, with or without random access
pub enum RawSource {
    /// Forward-only stream
    Stream(Box<dyn Read>),
    /// Source supporting random access
    Seekable(Box<dyn ReadSeek>),
}

impl RawSource {
    /// Wrap a forward-only reader
    pub fn from_reader(reader: impl Read + 'static) -> Self {
        RawSource::Stream(Box::new(reader))
    }

    /// Wrap a reader with random access
    pub fn from_seekable(reader: impl Read + Seek + 'static) -> Self {
        RawSource::Seekable(Box::new(reader))
    }

    /// Open a file as a seekable source
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(RawSource::Seekable(Box::new(File::open(path)?)))
    }

    /// Whether the source supports random access
    #[must_use]
    pub fn is_seekable(&self) -> bool {
        matches!(self, RawSource::Seekable(_))
    }

    /// Current byte offset, if the source can report one
    pub(crate) fn position(&mut self) -> Option<u64> {
        match self {
            RawSource::Stream(_) => None,
            RawSource::Seekable(s) => s.stream_position().ok(),
        }
    }

    /// Reposition to an absolute offset
    ///
    /// # Errors
    ///
    /// Returns [`WebarcError::Unseekable`] for forward-only streams
    pub(crate) fn seek_to(&mut self, offset: u64) -> Result<()> {
        match self {
            RawSource::Stream(_) => Err(WebarcError::Unseekable),
            RawSource::Seekable(s) => {
                s.seek(SeekFrom::Start(offset))?;
                Ok(())
            }
        }
    }

    /// Skip forward without reading
    ///
    /// # Errors
    ///
    /// Returns [`WebarcError::Unseekable`] for forward-only streams
    pub(crate) fn skip(&mut self, count: u64) -> Result<()> {
        match self {
            RawSource::Stream(_) => Err(WebarcError::Unseekable),
            RawSource::Seekable(s) => {
                s.seek(SeekFrom::Current(i64::try_from(count).map_err(|_| {
                    WebarcError::Unsupported(format!("skip of {count} bytes is too large"))
                })?))?;
                Ok(())
            }
        }
    }
}

impl Read for RawSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            RawSource::Stream(r) => r.read(buf),
            RawSource::Seekable(r) => r.read(buf),
        }
    }
}

impl std::fmt::Debug for RawSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawSource::Stream(_) => f.write_str("RawSource::Stream"),
            RawSource::Seekable(_) => f.write_str("RawSource::Seekable"),
        }
    }
}

/// Compacting input buffer shared by the reader and the compression channels.
///
/// Holds a window `data[pos..limit]` of bytes fetched but not yet consumed.
#[derive(Debug)]
pub(crate) struct InputBuf {
    data: Vec<u8>,
    pos: usize,
    limit: usize,
}

impl InputBuf {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            pos: 0,
            limit: 0,
        }
    }

    /// Pre-load bytes obtained before the buffer existed (format probes)
    pub(crate) fn seed(&mut self, bytes: &[u8]) {
        if self.data.len() < bytes.len() {
            self.data.resize(bytes.len(), 0);
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.pos = 0;
        self.limit = bytes.len();
    }

    pub(crate) fn available(&self) -> usize {
        self.limit - self.pos
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.data[self.pos..self.limit]
    }

    pub(crate) fn advance(&mut self, count: usize) {
        debug_assert!(count <= self.available());
        self.pos += count;
    }

    pub(crate) fn clear(&mut self) {
        self.pos = 0;
        self.limit = 0;
    }

    /// Writable tail of the buffer, compacting first so the full capacity
    /// minus unconsumed bytes is available
    pub(crate) fn space(&mut self) -> &mut [u8] {
        self.compact();
        &mut self.data[self.limit..]
    }

    /// Mark `count` bytes of [`Self::space`] as filled
    pub(crate) fn commit(&mut self, count: usize) {
        debug_assert!(self.limit + count <= self.data.len());
        self.limit += count;
    }

    /// Refill from a reader; returns the number of bytes added (0 at EOF)
    pub(crate) fn fill_from(&mut self, reader: &mut impl Read) -> io::Result<usize> {
        let space = self.space();
        if space.is_empty() {
            return Ok(0);
        }
        let n = reader.read(space)?;
        self.commit(n);
        Ok(n)
    }

    /// Ensure at least `count` unconsumed bytes, refilling from `reader`.
    ///
    /// Returns `false` if the reader ends first. Grows the buffer if `count`
    /// exceeds its capacity.
    pub(crate) fn require(&mut self, reader: &mut impl Read, count: usize) -> io::Result<bool> {
        if self.data.len() < count {
            self.compact();
            self.data.resize(count, 0);
        }
        while self.available() < count {
            if self.fill_from(reader)? == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.data.copy_within(self.pos..self.limit, 0);
            self.limit -= self.pos;
            self.pos = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_seed_and_consume() {
        let mut buf = InputBuf::with_capacity(8);
        buf.seed(b"abcd");
        assert_eq!(buf.available(), 4);
        assert_eq!(buf.as_slice(), b"abcd");
        buf.advance(2);
        assert_eq!(buf.as_slice(), b"cd");
    }

    #[test]
    fn test_require_refills_and_grows() {
        let mut src = Cursor::new(vec![7u8; 100]);
        let mut buf = InputBuf::with_capacity(4);
        assert!(buf.require(&mut src, 16).unwrap());
        assert_eq!(buf.available(), 16);
        assert!(buf.as_slice().iter().all(|&b| b == 7));
    }

    #[test]
    fn test_require_reports_eof() {
        let mut src = Cursor::new(vec![1u8; 3]);
        let mut buf = InputBuf::with_capacity(8);
        assert!(!buf.require(&mut src, 4).unwrap());
        assert_eq!(buf.available(), 3);
    }

    #[test]
    fn test_stream_source_rejects_seek() {
        let mut src = RawSource::from_reader(Cursor::new(vec![0u8; 4]));
        assert!(matches!(src.seek_to(0), Err(WebarcError::Unseekable)));
    }
}
