//! Transparent per-record decompression channels

mod deflate;
mod gzip;
mod zstd;

pub use deflate::DeflateDecoder;
pub(crate) use gzip::GzipDecoder;
pub(crate) use zstd::ZstdDecoder;

use std::io::Read;

use crate::config::DecoderConfig;
use crate::source::RawSource;
use crate::Result;

/// gzip member magic bytes (RFC 1952)
pub(crate) const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
/// zstd content frame magic number
pub(crate) const ZSTD_MAGIC: u32 = 0xFD2F_B528;
/// zstd skippable frame magic number carrying a shared dictionary
pub(crate) const DICT_MAGIC: u32 = 0x184D_2A5D;

/// Container compression detected for a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Records stored uncompressed
    None,
    /// Records stored in gzip members
    Gzip,
    /// Records stored in zstd frames
    Zstd,
}

impl Compression {
    /// Inspect the leading bytes of a stream for a compression magic number
    #[must_use]
    pub fn detect(probe: &[u8]) -> Compression {
        if probe.len() >= 2 && probe[..2] == GZIP_MAGIC {
            return Compression::Gzip;
        }
        if probe.len() >= 4 {
            let magic = u32::from_le_bytes([probe[0], probe[1], probe[2], probe[3]]);
            if magic == ZSTD_MAGIC || magic == DICT_MAGIC {
                return Compression::Zstd;
            }
        }
        Compression::None
    }
}

/// Byte channel the reader pulls decompressed record data from.
///
/// The plain variant hands the raw source through untouched; the others
/// decode one compression format while tracking how many compressed bytes
/// they consumed so record offsets stay meaningful for external index tools.
#[derive(Debug)]
pub(crate) enum Channel {
    Plain(RawSource),
    Gzip(GzipDecoder),
    Zstd(ZstdDecoder),
}

impl Channel {
    /// Wrap a source based on the probed prefix bytes
    pub(crate) fn new(source: RawSource, probe: &[u8], config: &DecoderConfig) -> Result<Self> {
        match Compression::detect(probe) {
            Compression::Gzip => Ok(Channel::Gzip(GzipDecoder::new(source, probe, config))),
            Compression::Zstd => Ok(Channel::Zstd(ZstdDecoder::new(source, probe, config)?)),
            Compression::None => Ok(Channel::Plain(source)),
        }
    }

    /// Read decompressed bytes; 0 means clean end of stream
    pub(crate) fn read(&mut self, dest: &mut [u8]) -> Result<usize> {
        match self {
            Channel::Plain(src) => Ok(src.read(dest)?),
            Channel::Gzip(dec) => dec.read(dest),
            Channel::Zstd(dec) => dec.read(dest),
        }
    }

    /// Compressed bytes consumed from the underlying source so far.
    ///
    /// Zero for plain channels; the reader counts logical bytes itself there.
    pub(crate) fn input_position(&self) -> u64 {
        match self {
            Channel::Plain(_) => 0,
            Channel::Gzip(dec) => dec.input_position(),
            Channel::Zstd(dec) => dec.input_position(),
        }
    }

    /// Discard in-flight decoder state after a seek, keeping any dictionary
    pub(crate) fn reset(&mut self) {
        match self {
            Channel::Plain(_) => {}
            Channel::Gzip(dec) => dec.reset(),
            Channel::Zstd(dec) => dec.reset(),
        }
    }

    pub(crate) fn raw_mut(&mut self) -> &mut RawSource {
        match self {
            Channel::Plain(src) => src,
            Channel::Gzip(dec) => dec.raw_mut(),
            Channel::Zstd(dec) => dec.raw_mut(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_gzip() {
        assert_eq!(
            Compression::detect(&[0x1f, 0x8b, 0x08, 0x00]),
            Compression::Gzip
        );
    }

    #[test]
    fn test_detect_zstd_frames() {
        assert_eq!(
            Compression::detect(&0xFD2F_B528u32.to_le_bytes()),
            Compression::Zstd
        );
        assert_eq!(
            Compression::detect(&0x184D_2A5Du32.to_le_bytes()),
            Compression::Zstd
        );
    }

    #[test]
    fn test_detect_plain() {
        assert_eq!(Compression::detect(b"WARC"), Compression::None);
        assert_eq!(Compression::detect(b""), Compression::None);
    }
}
