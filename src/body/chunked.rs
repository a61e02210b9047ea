//! HTTP chunked transfer decoding (RFC 7230)

use std::io::{self, Read};

use tracing::warn;

use crate::error::context_window;
use crate::source::InputBuf;
use crate::{Result, WebarcError};

use super::Payload;

/// Scanner position within the chunk grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Reading chunk-size hex digits
    Size,
    /// Whitespace after the size digits (seen in the wild)
    SizeWs,
    /// Inside a `;`-delimited chunk extension
    Ext,
    /// Size line CR seen, LF expected
    SizeLf,
    /// Inside chunk data
    Data,
    /// Chunk data finished, CR expected
    ChunkEndCr,
    /// Chunk data finished, LF expected
    ChunkEndLf,
    /// At the start of a trailer line
    Trailer,
    /// Inside a trailer header line
    TrailerLine,
    /// Trailer line CR seen, LF expected
    TrailerLf,
    /// Final CR seen, LF expected
    TrailerEndLf,
    /// Zero chunk and trailers fully consumed
    Finished,
    /// Lenient fallback: remaining input served verbatim
    Passthrough,
}

/// Decoder for HTTP chunked transfer encoding.
///
/// Chunk extensions are ignored and trailer headers are discarded. In the
/// default lenient mode, malformed chunk syntax downgrades the decoder to an
/// opaque passthrough of the remaining bytes; many archived responses carry
/// non-conformant chunking that browsers accepted. Strict mode fails instead.
pub struct Chunked<R: Read> {
    inner: R,
    buf: InputBuf,
    capacity: usize,
    state: State,
    size: u64,
    digits: u32,
    remaining: u64,
    position: u64,
    input_offset: u64,
    strict: bool,
}

impl<R: Read> Chunked<R> {
    /// Wrap a reader producing chunked-encoded data
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, 8 * 1024)
    }

    /// Wrap a reader using a specific internal buffer capacity.
    ///
    /// Reads at least as large as the capacity bypass the internal buffer
    /// once a chunk's size is known.
    pub fn with_capacity(inner: R, capacity: usize) -> Self {
        Self {
            inner,
            buf: InputBuf::with_capacity(capacity),
            capacity,
            state: State::Size,
            size: 0,
            digits: 0,
            remaining: 0,
            position: 0,
            input_offset: 0,
            strict: false,
        }
    }

    /// Fail on malformed chunk syntax instead of falling back to passthrough
    #[must_use]
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Whether the decoder abandoned chunk parsing on malformed input
    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        self.state == State::Passthrough
    }

    /// Step the grammar over one byte. The byte is consumed by the caller
    /// unless the decoder fell back to passthrough, which must re-serve it.
    fn step(&mut self, byte: u8) -> io::Result<()> {
        let next = match self.state {
            State::Size => match byte {
                b'0'..=b'9' | b'a'..=b'f' | b'A'..=b'F' => {
                    let digit = u64::from(char::from(byte).to_digit(16).unwrap_or(0));
                    match self.size.checked_mul(16).map(|v| v + digit) {
                        Some(value) => {
                            self.size = value;
                            self.digits += 1;
                            Some(State::Size)
                        }
                        None => None,
                    }
                }
                b' ' | b'\t' if self.digits > 0 => Some(State::SizeWs),
                b';' if self.digits > 0 => Some(State::Ext),
                b'\r' if self.digits > 0 => Some(State::SizeLf),
                _ => None,
            },
            State::SizeWs => match byte {
                b' ' | b'\t' => Some(State::SizeWs),
                b';' => Some(State::Ext),
                b'\r' => Some(State::SizeLf),
                _ => None,
            },
            State::Ext => match byte {
                b'\r' => Some(State::SizeLf),
                b'\n' => None,
                _ => Some(State::Ext),
            },
            State::SizeLf => match byte {
                b'\n' => {
                    let size = self.size;
                    self.size = 0;
                    self.digits = 0;
                    if size == 0 {
                        Some(State::Trailer)
                    } else {
                        self.remaining = size;
                        Some(State::Data)
                    }
                }
                _ => None,
            },
            State::ChunkEndCr => match byte {
                b'\r' => Some(State::ChunkEndLf),
                _ => None,
            },
            State::ChunkEndLf => match byte {
                b'\n' => Some(State::Size),
                _ => None,
            },
            State::Trailer => match byte {
                b'\r' => Some(State::TrailerEndLf),
                b'\n' => None,
                _ => Some(State::TrailerLine),
            },
            State::TrailerLine => match byte {
                b'\r' => Some(State::TrailerLf),
                _ => Some(State::TrailerLine),
            },
            State::TrailerLf => match byte {
                b'\n' => Some(State::Trailer),
                _ => None,
            },
            State::TrailerEndLf => match byte {
                b'\n' => Some(State::Finished),
                _ => None,
            },
            State::Data | State::Finished | State::Passthrough => {
                unreachable!("step() is only called in header states")
            }
        };

        match next {
            Some(state) => {
                self.state = state;
                self.input_offset += 1;
                Ok(())
            }
            None if self.strict => Err(io::Error::from(WebarcError::Parse {
                offset: self.input_offset,
                message: format!(
                    "invalid chunked encoding: {}",
                    context_window(self.buf.as_slice(), 0, 40)
                ),
            })),
            None => {
                warn!(
                    offset = self.input_offset,
                    "malformed chunked encoding, treating remaining bytes as opaque"
                );
                self.state = State::Passthrough;
                Ok(())
            }
        }
    }

    fn fill(&mut self) -> io::Result<usize> {
        self.buf.fill_from(&mut self.inner)
    }
}

impl<R: Read> Read for Chunked<R> {
    fn read(&mut self, dest: &mut [u8]) -> io::Result<usize> {
        if dest.is_empty() {
            return Ok(0);
        }
        loop {
            match self.state {
                State::Finished => return Ok(0),
                State::Passthrough => {
                    let n = if self.buf.available() > 0 {
                        let n = self.buf.available().min(dest.len());
                        dest[..n].copy_from_slice(&self.buf.as_slice()[..n]);
                        self.buf.advance(n);
                        n
                    } else {
                        self.inner.read(dest)?
                    };
                    self.position += n as u64;
                    self.input_offset += n as u64;
                    return Ok(n);
                }
                State::Data => {
                    if self.buf.available() > 0 {
                        let n = [
                            self.buf.available() as u64,
                            self.remaining,
                            dest.len() as u64,
                        ]
                        .into_iter()
                        .min()
                        .unwrap_or(0) as usize;
                        dest[..n].copy_from_slice(&self.buf.as_slice()[..n]);
                        self.buf.advance(n);
                        self.advance_data(n);
                        return Ok(n);
                    }
                    // large reads bypass the internal buffer entirely
                    if self.remaining >= self.capacity as u64 && dest.len() >= self.capacity {
                        let limit = self.remaining.min(dest.len() as u64) as usize;
                        let n = self.inner.read(&mut dest[..limit])?;
                        if n == 0 {
                            return Err(eof_error());
                        }
                        self.advance_data(n);
                        return Ok(n);
                    }
                    if self.fill()? == 0 {
                        return Err(eof_error());
                    }
                }
                _ => {
                    if self.buf.available() == 0 && self.fill()? == 0 {
                        return Err(eof_error());
                    }
                    while self.buf.available() > 0 {
                        let byte = self.buf.as_slice()[0];
                        self.step(byte)?;
                        if self.state != State::Passthrough {
                            self.buf.advance(1);
                        }
                        if matches!(
                            self.state,
                            State::Data | State::Finished | State::Passthrough
                        ) {
                            break;
                        }
                    }
                }
            }
        }
    }
}

impl<R: Read> Chunked<R> {
    fn advance_data(&mut self, n: usize) {
        self.remaining -= n as u64;
        self.position += n as u64;
        self.input_offset += n as u64;
        if self.remaining == 0 {
            self.state = State::ChunkEndCr;
        }
    }
}

impl<R: Read> Payload for Chunked<R> {
    fn position(&self) -> u64 {
        self.position
    }

    fn consume(&mut self) -> Result<()> {
        super::consume_by_reading(self)
    }
}

fn eof_error() -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "EOF reached before end of chunked encoding",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(input: &[u8]) -> Vec<u8> {
        let mut decoder = Chunked::new(input);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_wikipedia_example() {
        assert_eq!(decode(b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n"), b"Wikipedia");
    }

    #[test]
    fn test_multiple_chunks_with_leading_zeros() {
        let out = decode(b"3\r\nhel\r\n0007\r\nlo worl\r\n1\r\nd\r\n00000\r\n\r\n");
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn test_chunk_extensions_ignored() {
        assert_eq!(decode(b"4;name=value\r\nWiki\r\n0\r\n\r\n"), b"Wiki");
    }

    #[test]
    fn test_trailing_whitespace_after_size() {
        assert_eq!(decode(b"4  \r\nWiki\r\n0\r\n\r\n"), b"Wiki");
    }

    #[test]
    fn test_trailer_headers_discarded() {
        let out = decode(b"4\r\nWiki\r\n0\r\nExpires: never\r\nX-Extra: 1\r\n\r\n");
        assert_eq!(out, b"Wiki");
    }

    #[test]
    fn test_small_reads_cross_chunk_boundaries() {
        let mut decoder = Chunked::new(&b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n"[..]);
        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match decoder.read(&mut byte).unwrap() {
                0 => break,
                n => out.extend_from_slice(&byte[..n]),
            }
        }
        assert_eq!(out, b"Wikipedia");
        assert_eq!(decoder.position(), 9);
    }

    #[test]
    fn test_bypass_internal_buffer_for_large_chunks() {
        let body = vec![b'x'; 100];
        let mut input = format!("{:x}\r\n", body.len()).into_bytes();
        input.extend_from_slice(&body);
        input.extend_from_slice(b"\r\n0\r\n\r\n");

        // capacity smaller than the chunk forces the bypass path
        let mut decoder = Chunked::with_capacity(input.as_slice(), 64);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, body);
    }

    #[test]
    fn test_strict_mode_rejects_garbage() {
        let mut decoder = Chunked::new(&b"zz\r\nWiki\r\n0\r\n\r\n"[..]).strict();
        let err = decoder.read_to_end(&mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_lenient_mode_falls_back_to_passthrough() {
        let mut decoder = Chunked::new(&b"not chunked at all"[..]);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert!(decoder.is_passthrough());
        assert_eq!(out, b"not chunked at all");
    }

    #[test]
    fn test_eof_mid_chunk() {
        let mut decoder = Chunked::new(&b"ff\r\ntoo short"[..]);
        let err = decoder.read_to_end(&mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_consume_is_noop_when_done() {
        let mut decoder = Chunked::new(&b"4\r\nWiki\r\n0\r\n\r\n"[..]);
        decoder.consume().unwrap();
        assert_eq!(decoder.position(), 4);
        decoder.consume().unwrap();
        assert_eq!(decoder.position(), 4);
    }
}
