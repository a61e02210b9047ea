//! Per-member gzip decoding (RFC 1952)
//!
//! WARC files are commonly compressed record-at-time: every record sits in
//! its own gzip member and the members are concatenated. The decoder verifies
//! each member's CRC32 and size trailer, then resets itself so the next read
//! continues transparently into the following member, while
//! [`GzipDecoder::input_position`] keeps reporting exact compressed offsets.

use flate2::{Decompress, FlushDecompress, Status};

use crate::config::DecoderConfig;
use crate::source::{InputBuf, RawSource};
use crate::{Result, WebarcError};

use super::GZIP_MAGIC;

const FHCRC: u8 = 1 << 1;
const FEXTRA: u8 = 1 << 2;
const FNAME: u8 = 1 << 3;
const FCOMMENT: u8 = 1 << 4;
const CM_DEFLATE: u8 = 8;

pub(crate) struct GzipDecoder {
    src: RawSource,
    buf: InputBuf,
    inflate: Decompress,
    crc: crc32fast::Hasher,
    member_output: u64,
    input_position: u64,
    in_member: bool,
}

impl GzipDecoder {
    pub(crate) fn new(src: RawSource, probe: &[u8], config: &DecoderConfig) -> Self {
        let mut buf = InputBuf::with_capacity(config.buffer_capacity);
        buf.seed(probe);
        Self {
            src,
            buf,
            inflate: Decompress::new(false),
            crc: crc32fast::Hasher::new(),
            member_output: 0,
            input_position: 0,
            in_member: false,
        }
    }

    /// Read decompressed bytes, crossing member boundaries transparently.
    ///
    /// Returns 0 only at a clean end of stream (member boundary).
    pub(crate) fn read(&mut self, dest: &mut [u8]) -> Result<usize> {
        if dest.is_empty() {
            return Ok(0);
        }
        loop {
            if !self.in_member {
                if !self.read_header()? {
                    return Ok(0);
                }
                self.in_member = true;
            }

            if self.buf.available() == 0 && self.buf.fill_from(&mut self.src)? == 0 {
                return Err(WebarcError::UnexpectedEof(
                    "gzip member truncated".to_string(),
                ));
            }

            let before_in = self.inflate.total_in();
            let before_out = self.inflate.total_out();
            let status = self
                .inflate
                .decompress(self.buf.as_slice(), dest, FlushDecompress::None)
                .map_err(|e| WebarcError::Parse {
                    offset: self.input_position,
                    message: format!("corrupt deflate data in gzip member: {e}"),
                })?;
            let consumed = usize::try_from(self.inflate.total_in() - before_in).unwrap_or(0);
            let produced = usize::try_from(self.inflate.total_out() - before_out).unwrap_or(0);
            self.buf.advance(consumed);
            self.input_position += consumed as u64;
            self.crc.update(&dest[..produced]);
            self.member_output += produced as u64;

            if status == Status::StreamEnd {
                self.read_trailer()?;
                self.inflate.reset(false);
                self.crc = crc32fast::Hasher::new();
                self.member_output = 0;
                self.in_member = false;
            } else if status == Status::BufError && consumed == 0 && produced == 0 {
                return Err(WebarcError::Parse {
                    offset: self.input_position,
                    message: "deflate stream stalled inside gzip member".to_string(),
                });
            }

            if produced > 0 {
                return Ok(produced);
            }
        }
    }

    /// Parse one member header.
    ///
    /// Returns `false` at a clean end of stream; a partial header is an
    /// unexpected-EOF error.
    fn read_header(&mut self) -> Result<bool> {
        if !self.buf.require(&mut self.src, 10)? {
            if self.buf.available() > 0 {
                return Err(WebarcError::UnexpectedEof(
                    "partial gzip header".to_string(),
                ));
            }
            return Ok(false);
        }

        let header = self.buf.as_slice();
        if header[..2] != GZIP_MAGIC {
            return Err(WebarcError::Parse {
                offset: self.input_position,
                message: format!(
                    "not in gzip format (magic {:#06x})",
                    u16::from_le_bytes([header[0], header[1]])
                ),
            });
        }
        if header[2] != CM_DEFLATE {
            return Err(WebarcError::Unsupported(format!(
                "gzip compression method {}",
                header[2]
            )));
        }
        let flags = header[3];
        // remaining fixed fields: mtime (4), extra flags, OS
        self.skip(10);

        if flags & FEXTRA != 0 {
            if !self.buf.require(&mut self.src, 2)? {
                return Err(WebarcError::UnexpectedEof("reading gzip extra".to_string()));
            }
            let slice = self.buf.as_slice();
            let xlen = usize::from(u16::from_le_bytes([slice[0], slice[1]]));
            self.skip(2);
            self.skip_exact(xlen, "reading gzip extra")?;
        }
        if flags & FNAME != 0 {
            self.skip_until_nul("reading gzip file name")?;
        }
        if flags & FCOMMENT != 0 {
            self.skip_until_nul("reading gzip comment")?;
        }
        if flags & FHCRC != 0 {
            self.skip_exact(2, "reading gzip header crc")?;
        }
        Ok(true)
    }

    fn read_trailer(&mut self) -> Result<()> {
        if !self.buf.require(&mut self.src, 8)? {
            return Err(WebarcError::UnexpectedEof(
                "reading gzip trailer".to_string(),
            ));
        }
        let slice = self.buf.as_slice();
        let expected_crc = u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]);
        let expected_size = u32::from_le_bytes([slice[4], slice[5], slice[6], slice[7]]);
        self.skip(8);

        if expected_size != (self.member_output & 0xffff_ffff) as u32 {
            return Err(WebarcError::Parse {
                offset: self.input_position,
                message: format!(
                    "gzip uncompressed size mismatch: trailer says {expected_size}, got {}",
                    self.member_output
                ),
            });
        }
        let actual_crc = self.crc.clone().finalize();
        if expected_crc != actual_crc {
            return Err(WebarcError::CrcMismatch {
                expected: expected_crc,
                actual: actual_crc,
            });
        }
        Ok(())
    }

    /// Compressed bytes consumed from the underlying source
    pub(crate) fn input_position(&self) -> u64 {
        self.input_position
    }

    pub(crate) fn reset(&mut self) {
        self.buf.clear();
        self.inflate.reset(false);
        self.crc = crc32fast::Hasher::new();
        self.member_output = 0;
        self.input_position = 0;
        self.in_member = false;
    }

    pub(crate) fn raw_mut(&mut self) -> &mut RawSource {
        &mut self.src
    }

    fn skip(&mut self, count: usize) {
        self.buf.advance(count);
        self.input_position += count as u64;
    }

    fn skip_exact(&mut self, count: usize, what: &str) -> Result<()> {
        let mut remaining = count;
        while remaining > 0 {
            if self.buf.available() == 0 && self.buf.fill_from(&mut self.src)? == 0 {
                return Err(WebarcError::UnexpectedEof(what.to_string()));
            }
            let n = remaining.min(self.buf.available());
            self.skip(n);
            remaining -= n;
        }
        Ok(())
    }

    fn skip_until_nul(&mut self, what: &str) -> Result<()> {
        loop {
            if self.buf.available() == 0 && self.buf.fill_from(&mut self.src)? == 0 {
                return Err(WebarcError::UnexpectedEof(what.to_string()));
            }
            let done = self.buf.as_slice()[0] == 0;
            self.skip(1);
            if done {
                return Ok(());
            }
        }
    }
}

impl std::fmt::Debug for GzipDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GzipDecoder")
            .field("input_position", &self.input_position)
            .field("in_member", &self.in_member)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn gzip_member(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn read_all(decoder: &mut GzipDecoder) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 64];
        loop {
            let n = decoder.read(&mut chunk)?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }

    fn decoder_for(bytes: Vec<u8>) -> GzipDecoder {
        GzipDecoder::new(
            RawSource::from_reader(std::io::Cursor::new(bytes)),
            &[],
            &DecoderConfig::default(),
        )
    }

    #[test]
    fn test_single_member() {
        let mut decoder = decoder_for(gzip_member(b"hello gzip"));
        assert_eq!(read_all(&mut decoder).unwrap(), b"hello gzip");
    }

    #[test]
    fn test_concatenated_members_decode_transparently() {
        let mut bytes = gzip_member(b"first ");
        let first_len = bytes.len() as u64;
        bytes.extend_from_slice(&gzip_member(b"second"));
        let total_len = bytes.len() as u64;

        let mut decoder = decoder_for(bytes);
        let mut out = Vec::new();
        let mut chunk = [0u8; 6];
        loop {
            let n = decoder.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
            // a finished member leaves the input position exactly at the
            // next member's first byte
            assert!(decoder.input_position() <= total_len);
        }
        assert_eq!(out, b"first second");
        assert_eq!(decoder.input_position(), total_len);
        assert!(first_len < total_len);
    }

    #[test]
    fn test_bad_trailer_crc_is_fatal() {
        let mut bytes = gzip_member(b"payload under test");
        // trailer layout: CRC32 then ISIZE, both little-endian
        let crc_offset = bytes.len() - 8;
        bytes[crc_offset] ^= 0xff;

        let mut decoder = decoder_for(bytes);
        let err = read_all(&mut decoder).unwrap_err();
        assert!(matches!(err, WebarcError::CrcMismatch { .. }));
    }

    #[test]
    fn test_bad_magic_is_fatal() {
        let mut decoder = decoder_for(b"not gzip at all!".to_vec());
        let err = read_all(&mut decoder).unwrap_err();
        assert!(matches!(err, WebarcError::Parse { .. }));
    }

    #[test]
    fn test_truncated_member_is_unexpected_eof() {
        let mut bytes = gzip_member(b"some data that will be cut short");
        bytes.truncate(bytes.len() - 12);

        let mut decoder = decoder_for(bytes);
        let err = read_all(&mut decoder).unwrap_err();
        assert!(matches!(err, WebarcError::UnexpectedEof(_)));
    }

    #[test]
    fn test_fname_field_is_skipped() {
        let data = b"named member";
        let deflated = {
            let mut enc =
                flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(data).unwrap();
            enc.finish().unwrap()
        };
        let mut bytes = vec![0x1f, 0x8b, CM_DEFLATE, FNAME, 0, 0, 0, 0, 0, 0xff];
        bytes.extend_from_slice(b"file.warc\0");
        bytes.extend_from_slice(&deflated);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(data);
        bytes.extend_from_slice(&hasher.finalize().to_le_bytes());
        bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());

        let mut decoder = decoder_for(bytes);
        assert_eq!(read_all(&mut decoder).unwrap(), data);
    }
}
