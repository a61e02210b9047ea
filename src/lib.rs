//! webarc - Streaming reader for WARC and legacy ARC web archive containers
//!
//! Decodes real-world archive corpora: mixed WARC/ARC inputs, record-at-time
//! gzip, zstd with shared dictionaries, malformed trailers and unknown record
//! types, while tracking the byte offsets external index tools seek by.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::missing_errors_doc,
    clippy::multiple_crate_versions
)]

pub mod body;
pub mod compress;
pub mod config;
pub mod digest;
pub mod error;
pub mod headers;
pub mod parser;
pub mod record;
pub mod reader;
pub mod source;

pub use compress::Compression;
pub use config::DecoderConfig;
pub use error::{Result, WebarcError};
pub use headers::{Headers, Protocol, Version};
pub use reader::{Body, Reader};
pub use record::{Record, RecordKind};
