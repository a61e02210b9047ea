//! zstd frame decoding with shared-dictionary support
//!
//! Per the warc-zstd convention, a `.warc.zst` file may begin with a
//! skippable frame (magic `0x184D2A5D`) carrying a decompression dictionary
//! shared by every following content frame. The dictionary may itself be
//! zstd-compressed as a single content frame, in which case it is
//! decompressed once and cached for the life of the stream.

use zstd::stream::raw::{Decoder as RawDecoder, InBuffer, Operation, OutBuffer};

use crate::config::DecoderConfig;
use crate::source::{InputBuf, RawSource};
use crate::{Result, WebarcError};

use super::{DICT_MAGIC, ZSTD_MAGIC};

/// Low two bits of the frame header descriptor signal a dictionary ID
const DICT_ID_FLAG_MASK: u8 = 0x03;

pub(crate) struct ZstdDecoder {
    src: RawSource,
    buf: InputBuf,
    decoder: Option<RawDecoder<'static>>,
    dictionary: Option<Vec<u8>>,
    /// Total bytes fetched from the source into `buf` or consumed directly
    raw_bytes_read: u64,
    frame_in_progress: bool,
}

impl ZstdDecoder {
    pub(crate) fn new(src: RawSource, probe: &[u8], config: &DecoderConfig) -> Result<Self> {
        let mut buf = InputBuf::with_capacity(config.buffer_capacity);
        buf.seed(probe);
        let mut decoder = Self {
            src,
            buf,
            decoder: None,
            dictionary: None,
            raw_bytes_read: probe.len() as u64,
            frame_in_progress: false,
        };
        decoder.read_dictionary_if_present(config)?;
        Ok(decoder)
    }

    /// Read decompressed bytes; 0 means clean end of stream
    pub(crate) fn read(&mut self, dest: &mut [u8]) -> Result<usize> {
        if dest.is_empty() {
            return Ok(0);
        }
        loop {
            if self.buf.available() == 0 {
                let n = self.buf.fill_from(&mut self.src)?;
                self.raw_bytes_read += n as u64;
                if n == 0 {
                    if self.frame_in_progress {
                        return Err(WebarcError::UnexpectedEof(
                            "zstd frame truncated".to_string(),
                        ));
                    }
                    return Ok(0);
                }
            }

            if self.decoder.is_none() {
                self.decoder = Some(new_decoder(self.dictionary.as_deref())?);
            }
            let offset = self.input_position();
            let Some(decoder) = self.decoder.as_mut() else {
                unreachable!("decoder initialized above")
            };

            let mut input = InBuffer::around(self.buf.as_slice());
            let mut output = OutBuffer::around(dest);
            let hint = decoder
                .run(&mut input, &mut output)
                .map_err(|e| WebarcError::Parse {
                    offset,
                    message: format!("corrupt zstd frame: {e}"),
                })?;
            let consumed = input.pos;
            let produced = output.pos();
            self.buf.advance(consumed);
            self.frame_in_progress = hint != 0;

            if produced > 0 {
                return Ok(produced);
            }
            if consumed == 0 && self.buf.available() > 0 {
                return Err(WebarcError::Parse {
                    offset: self.input_position(),
                    message: "zstd decoder made no progress".to_string(),
                });
            }
        }
    }

    /// Bytes consumed from the real underlying source, excluding any
    /// dictionary probe that was rewound
    pub(crate) fn input_position(&self) -> u64 {
        self.raw_bytes_read - self.buf.available() as u64
    }

    /// Discard in-flight frame state, keeping the dictionary
    pub(crate) fn reset(&mut self) {
        self.decoder = None;
        self.buf.clear();
        self.raw_bytes_read = 0;
        self.frame_in_progress = false;
    }

    pub(crate) fn raw_mut(&mut self) -> &mut RawSource {
        &mut self.src
    }

    /// Inspect the stream head for a dictionary.
    ///
    /// A leading skippable frame is read and cached. A content frame whose
    /// header declares a dictionary ID triggers a probe at the start of a
    /// seekable source; on an unseekable source that requirement is fatal.
    fn read_dictionary_if_present(&mut self, config: &DecoderConfig) -> Result<()> {
        if !self.require(8)? {
            return Err(WebarcError::UnexpectedEof(
                "zstd stream shorter than a frame header".to_string(),
            ));
        }
        let head = self.buf.as_slice();
        let magic = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
        if magic == DICT_MAGIC {
            let frame_size = u32::from_le_bytes([head[4], head[5], head[6], head[7]]) as usize;
            self.buf.advance(8);
            let dict = self.read_dictionary_frame(frame_size, config)?;
            self.dictionary = Some(dict);
        } else if magic == ZSTD_MAGIC {
            if head[4] & DICT_ID_FLAG_MASK != 0 && self.dictionary.is_none() {
                self.dictionary = self.probe_leading_dictionary(config)?;
            }
        } else {
            return Err(WebarcError::Parse {
                offset: 0,
                message: format!(
                    "unexpected zstd magic number {magic:#010x} (expected {ZSTD_MAGIC:#010x} or {DICT_MAGIC:#010x})"
                ),
            });
        }
        Ok(())
    }

    /// Read a dictionary frame body from the current position, counting the
    /// bytes toward the input position
    fn read_dictionary_frame(&mut self, size: usize, config: &DecoderConfig) -> Result<Vec<u8>> {
        if size > config.max_dictionary_size {
            return Err(WebarcError::Unsupported(format!(
                "zstd dictionary frame of {size} bytes exceeds limit of {}",
                config.max_dictionary_size
            )));
        }
        let mut dict = vec![0u8; size];
        let mut filled = 0;
        while filled < size {
            if self.buf.available() == 0 {
                let n = self.buf.fill_from(&mut self.src)?;
                self.raw_bytes_read += n as u64;
                if n == 0 {
                    return Err(WebarcError::UnexpectedEof(
                        "end of stream before end of zstd dictionary".to_string(),
                    ));
                }
            }
            let n = (size - filled).min(self.buf.available());
            dict[filled..filled + n].copy_from_slice(&self.buf.as_slice()[..n]);
            self.buf.advance(n);
            filled += n;
        }
        decode_dictionary(dict, config)
    }

    /// Seek to the start of the source and look for a dictionary frame,
    /// restoring the original position afterwards. Probe bytes do not count
    /// toward the input position.
    fn probe_leading_dictionary(&mut self, config: &DecoderConfig) -> Result<Option<Vec<u8>>> {
        if !self.src.is_seekable() {
            return Err(WebarcError::Unsupported(
                "zstd dictionary required but source is not seekable".to_string(),
            ));
        }
        let saved = self.src.position().ok_or(WebarcError::Unseekable)?;

        self.src.seek_to(0)?;
        let result = self.read_probe_dictionary(config);
        self.src.seek_to(saved)?;
        result
    }

    fn read_probe_dictionary(&mut self, config: &DecoderConfig) -> Result<Option<Vec<u8>>> {
        let mut head = [0u8; 8];
        if read_full(&mut self.src, &mut head)? < 8 {
            return Ok(None);
        }
        let magic = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
        if magic != DICT_MAGIC {
            return Ok(None);
        }
        let size = u32::from_le_bytes([head[4], head[5], head[6], head[7]]) as usize;
        if size > config.max_dictionary_size {
            return Err(WebarcError::Unsupported(format!(
                "zstd dictionary frame of {size} bytes exceeds limit of {}",
                config.max_dictionary_size
            )));
        }
        let mut dict = vec![0u8; size];
        if read_full(&mut self.src, &mut dict)? < size {
            return Err(WebarcError::UnexpectedEof(
                "end of stream before end of zstd dictionary".to_string(),
            ));
        }
        Ok(Some(decode_dictionary(dict, config)?))
    }

    fn require(&mut self, count: usize) -> Result<bool> {
        while self.buf.available() < count {
            let n = self.buf.fill_from(&mut self.src)?;
            self.raw_bytes_read += n as u64;
            if n == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl std::fmt::Debug for ZstdDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZstdDecoder")
            .field("input_position", &self.input_position())
            .field("has_dictionary", &self.dictionary.is_some())
            .finish_non_exhaustive()
    }
}

fn new_decoder(dictionary: Option<&[u8]>) -> Result<RawDecoder<'static>> {
    match dictionary {
        Some(dict) => RawDecoder::with_dictionary(dict),
        None => RawDecoder::new(),
    }
    .map_err(|e| WebarcError::Unsupported(format!("zstd decoder init failed: {e}")))
}

/// Decompress a dictionary that is itself stored as a single content frame
fn decode_dictionary(dict: Vec<u8>, config: &DecoderConfig) -> Result<Vec<u8>> {
    if dict.len() >= 4 && dict[..4] == ZSTD_MAGIC.to_le_bytes() {
        let decoded = zstd::stream::decode_all(dict.as_slice()).map_err(|e| {
            WebarcError::Parse {
                offset: 0,
                message: format!("corrupt compressed zstd dictionary: {e}"),
            }
        })?;
        if decoded.len() > config.max_dictionary_size {
            return Err(WebarcError::Unsupported(format!(
                "decompressed zstd dictionary of {} bytes exceeds limit of {}",
                decoded.len(),
                config.max_dictionary_size
            )));
        }
        return Ok(decoded);
    }
    Ok(dict)
}

fn read_full(src: &mut RawSource, dest: &mut [u8]) -> Result<usize> {
    use std::io::Read;
    let mut filled = 0;
    while filled < dest.len() {
        let n = src.read(&mut dest[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
