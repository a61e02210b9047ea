//! Error types for webarc

use std::io;
use thiserror::Error;

/// Result type for webarc operations
pub type Result<T> = std::result::Result<T, WebarcError>;

/// Errors that can occur while decoding an archive
#[derive(Debug, Error)]
pub enum WebarcError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed record grammar or framing, fatal for the current record
    #[error("parse error at offset {offset}: {message}")]
    Parse {
        /// Byte offset where the error was detected
        offset: u64,
        /// Description including a context window around the failing byte
        message: String,
    },

    /// Source ended in the middle of a header or body
    #[error("unexpected end of stream: {0}")]
    UnexpectedEof(String),

    /// Decompressed gzip member does not match its declared CRC32
    #[error("gzip member corrupted: expected CRC {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        /// CRC32 declared in the member trailer
        expected: u32,
        /// CRC32 computed over the decompressed output
        actual: u32,
    },

    /// Computed digest does not match the declared digest header
    #[error("digest mismatch: declared {declared}, computed {computed}")]
    DigestMismatch {
        /// Digest declared in the record header
        declared: String,
        /// Digest computed over the record block
        computed: String,
    },

    /// Feature the stream requires but this build or source cannot provide
    #[error("unsupported feature: {0}")]
    Unsupported(String),

    /// Seek requested on a source without random access
    #[error("source does not support seeking")]
    Unseekable,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<WebarcError> for io::Error {
    fn from(err: WebarcError) -> Self {
        match err {
            WebarcError::Io(e) => e,
            WebarcError::UnexpectedEof(msg) => io::Error::new(io::ErrorKind::UnexpectedEof, msg),
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}

/// Render a printable window around a failing byte for parse error messages.
///
/// Control bytes are escaped so the window stays single-line.
pub(crate) fn context_window(data: &[u8], position: usize, radius: usize) -> String {
    let mut out = String::new();
    let start = position.saturating_sub(radius);
    if start > 0 {
        out.push_str("...");
    }
    let end = data.len().min(position + radius);
    for (i, &b) in data[start..end].iter().enumerate() {
        if start + i == position {
            out.push_str("<-- HERE -->");
        }
        match b {
            0x20..=0x7e => out.push(b as char),
            b'\t' => out.push_str("\\t"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    if position >= end {
        out.push_str("<-- HERE -->");
    }
    if end < data.len() {
        out.push_str("...");
    }
    out
}
