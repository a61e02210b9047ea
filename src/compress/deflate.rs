//! Raw deflate decoding for HTTP `Content-Encoding: deflate`
//!
//! This is the bare inflate stage without gzip framing. It is used on HTTP
//! payloads carried inside record blocks, never for the container itself.

use std::io::{self, Read};

use flate2::{Decompress, FlushDecompress};

/// Reader adapter inflating raw deflate data
pub struct DeflateDecoder<R: Read> {
    inner: R,
    inflate: Decompress,
    buf: Vec<u8>,
    pos: usize,
    limit: usize,
}

impl<R: Read> DeflateDecoder<R> {
    /// Wrap a reader producing raw deflate data
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            inflate: Decompress::new(false),
            buf: vec![0; 8 * 1024],
            pos: 0,
            limit: 0,
        }
    }

    /// Return the wrapped reader
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for DeflateDecoder<R> {
    fn read(&mut self, dest: &mut [u8]) -> io::Result<usize> {
        if dest.is_empty() {
            return Ok(0);
        }
        loop {
            if self.pos >= self.limit {
                self.pos = 0;
                self.limit = self.inner.read(&mut self.buf)?;
            }

            let before_in = self.inflate.total_in();
            let before_out = self.inflate.total_out();
            let flush = if self.limit == 0 {
                FlushDecompress::Finish
            } else {
                FlushDecompress::None
            };
            let status = self
                .inflate
                .decompress(&self.buf[self.pos..self.limit], dest, flush)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            self.pos += usize::try_from(self.inflate.total_in() - before_in).unwrap_or(0);
            let produced = usize::try_from(self.inflate.total_out() - before_out).unwrap_or(0);

            if produced > 0 {
                return Ok(produced);
            }
            if status == flate2::Status::StreamEnd {
                return Ok(0);
            }
            if self.limit == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "deflate stream truncated",
                ));
            }
        }
    }
}
