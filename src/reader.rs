//! Streaming reader over WARC and legacy ARC containers

use std::io::{self, Read};
use std::path::Path;

use tracing::{debug, warn};

use crate::body::Payload;
use crate::compress::{Channel, Compression};
use crate::config::DecoderConfig;
use crate::digest::{Digest, Digester};
use crate::headers::Protocol;
use crate::parser::HeaderParser;
use crate::record::{KindRegistry, Record, RecordKind, RecordSource};
use crate::source::{InputBuf, RawSource};
use crate::{Result, WebarcError};

const WARC_TRAILER: &[u8; 4] = b"\r\n\r\n";

type WarningHandler = Box<dyn FnMut(&str)>;

/// Sequencing state of the record whose body is currently open
struct OpenBody {
    size: u64,
    position: u64,
    closed: bool,
    protocol: Protocol,
    digest: Option<BodyDigest>,
}

struct BodyDigest {
    /// Consumed once the body has been fully observed
    digester: Option<Digester>,
    declared: Digest,
    computed: Option<Digest>,
}

/// Streaming record reader.
///
/// Detects container compression once at construction, then sequences
/// records: parse a header block, hand out a length-bounded [`Body`], and on
/// the next call drain whatever the caller left unread, validate the
/// inter-record trailer (repairing stray CR/LF runs) and track the byte
/// position external index tools need for direct seeking.
///
/// ```no_run
/// # fn main() -> webarc::Result<()> {
/// let mut reader = webarc::Reader::from_path("crawl.warc.gz")?;
/// while let Some(mut record) = reader.next()? {
///     println!("{} {:?}", record.kind().as_str(), record.target_uri());
///     std::io::copy(record.body(), &mut std::io::sink())?;
/// }
/// # Ok(())
/// # }
/// ```
pub struct Reader {
    chan: Channel,
    buf: InputBuf,
    parser: HeaderParser,
    registry: KindRegistry,
    config: DecoderConfig,
    compression: Compression,
    open: Option<OpenBody>,
    start_position: u64,
    position: u64,
    header_length: u64,
    filename: Option<String>,
    warning: Option<WarningHandler>,
    digest_blocks: bool,
}

impl Reader {
    /// Read records from a forward-only stream
    ///
    /// # Errors
    ///
    /// Returns error if the stream head cannot be probed for compression
    pub fn new(reader: impl Read + 'static) -> Result<Self> {
        Self::with_config(RawSource::from_reader(reader), DecoderConfig::default())
    }

    /// Read records from a seekable source, enabling [`Reader::seek`] and
    /// fast-forward skipping of unread bodies
    ///
    /// # Errors
    ///
    /// Returns error if the stream head cannot be probed for compression
    pub fn from_seekable(reader: impl Read + io::Seek + 'static) -> Result<Self> {
        Self::with_config(RawSource::from_seekable(reader), DecoderConfig::default())
    }

    /// Open an archive file, remembering its name for diagnostics
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or probed
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let filename = path
            .as_ref()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        let mut reader = Self::with_config(RawSource::open(path)?, DecoderConfig::default())?;
        reader.filename = filename;
        Ok(reader)
    }

    /// Read records from a source with explicit configuration.
    ///
    /// The first bytes of the source are probed against the gzip and zstd
    /// magic numbers; the matching decompression channel wraps the source for
    /// the lifetime of the stream (re-detection only happens on
    /// [`Reader::seek`] via channel reset, never per record).
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid, the probe ends inside
    /// a magic number, or a zstd dictionary cannot be loaded
    pub fn with_config(mut source: RawSource, config: DecoderConfig) -> Result<Self> {
        config.validate()?;
        let start_position = source.position().unwrap_or(0);

        let mut probe = [0u8; 4];
        let probed = read_probe(&mut source, &mut probe)?;
        if probed > 0 && probed < 4 {
            return Err(WebarcError::UnexpectedEof(
                "stream ended inside the format probe".to_string(),
            ));
        }
        let probe = &probe[..probed];

        let compression = Compression::detect(probe);
        debug!(?compression, "container compression detected");
        let chan = Channel::new(source, probe, &config)?;
        let mut buf = InputBuf::with_capacity(config.buffer_capacity);
        if matches!(chan, Channel::Plain(_)) {
            buf.seed(probe);
        }

        let mut parser = HeaderParser::new();
        parser.set_lenient(config.lenient);
        // a leading zstd dictionary frame has already been consumed
        let position = start_position + chan.input_position();

        Ok(Self {
            chan,
            buf,
            parser,
            registry: KindRegistry::default(),
            config,
            compression,
            open: None,
            start_position,
            position,
            header_length: 0,
            filename: None,
            warning: None,
            digest_blocks: false,
        })
    }

    /// Read the next record.
    ///
    /// Any previously returned record's body is drained and closed first,
    /// then the inter-record trailer is validated. `Ok(None)` signals a
    /// clean end of stream at a record boundary.
    ///
    /// # Errors
    ///
    /// Returns error on malformed headers, mid-record EOF, or compression
    /// integrity failures. A repaired trailer only emits a warning.
    pub fn next(&mut self) -> Result<Option<Record<'_>>> {
        if self.open.is_some() {
            self.finish_record()?;
        }

        self.parser.reset();
        if !self.parse_header()? {
            return Ok(None);
        }
        for warning in self.parser.take_warnings() {
            self.emit_warning(&warning);
        }

        let version = self.parser.version();
        let headers = self.parser.headers();
        self.header_length = self.parser.position();

        let content_length = match headers.sole("Content-Length")? {
            Some(value) => value.trim().parse::<u64>().map_err(|_| WebarcError::Parse {
                offset: self.position,
                message: format!("invalid Content-Length value {value:?}"),
            })?,
            None => 0,
        };

        let digest = if self.digest_blocks {
            headers
                .first("WARC-Block-Digest")
                .and_then(|raw| Digest::parse(raw).ok())
                .and_then(|declared| {
                    // unknown algorithms are skipped so the record stays readable
                    Digester::for_algorithm(declared.algorithm()).map(|digester| BodyDigest {
                        digester: Some(digester),
                        declared,
                        computed: None,
                    })
                })
        } else {
            None
        };

        let kind = self.registry.resolve(headers.first("WARC-Type"));
        debug!(
            kind = kind.as_str(),
            length = content_length,
            offset = self.position,
            "record header parsed"
        );

        let source = RecordSource {
            filename: self.filename.clone(),
            offset: self.position,
        };
        self.open = Some(OpenBody {
            size: content_length,
            position: 0,
            closed: false,
            protocol: version.protocol,
            digest,
        });

        Ok(Some(Record {
            kind,
            version,
            headers,
            source,
            body: Body { reader: self },
        }))
    }

    /// Byte position of the most recently read record, or the construction
    /// or seek offset when no record has been read since.
    ///
    /// For compressed streams this is the offset within the *compressed*
    /// file, taken from the decompression channel's input accounting; it is
    /// only meaningful when records align with compression member boundaries
    /// (record-at-time compression).
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Seek to a record boundary at `position` in the underlying source.
    ///
    /// Buffered bytes and in-flight decompressor state are discarded (a zstd
    /// dictionary is kept) and the currently open record is forgotten.
    /// Seeking into the middle of a record or compression member yields a
    /// parse error on the following [`Reader::next`], not silently wrong
    /// data.
    ///
    /// # Errors
    ///
    /// Returns [`WebarcError::Unseekable`] if the source has no random access
    pub fn seek(&mut self, position: u64) -> Result<()> {
        self.chan.raw_mut().seek_to(position)?;
        self.chan.reset();
        self.buf.clear();
        self.parser.reset();
        self.open = None;
        self.start_position = position;
        self.position = position;
        self.header_length = 0;
        Ok(())
    }

    /// Container compression detected for this stream
    #[must_use]
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Enable or disable block digest calculation.
    ///
    /// When enabled, a record declaring a `WARC-Block-Digest` with a
    /// recognized algorithm gets its body transparently hashed as it is
    /// consumed; a mismatch is reported through the warning handler and the
    /// computed value is available from [`Body::computed_digest`].
    pub fn calculate_block_digest(&mut self, enabled: bool) {
        self.digest_blocks = enabled;
    }

    /// Register a handler for recoverable anomalies (repaired trailers,
    /// ARC date repairs, digest mismatches)
    pub fn on_warning(&mut self, handler: impl FnMut(&str) + 'static) {
        self.warning = Some(Box::new(handler));
    }

    /// Map a `WARC-Type` value to a record kind, overriding or extending the
    /// built-in registry. The special name `default` sets the fallback used
    /// for unrecognized types.
    pub fn register_kind(&mut self, warc_type: &str, kind: RecordKind) {
        self.registry.register(warc_type, kind);
    }

    /// Switch between strict and lenient header grammar
    pub fn set_lenient(&mut self, lenient: bool) {
        self.config.lenient = lenient;
        self.parser.set_lenient(lenient);
    }

    /// Drain the previous record and consume its trailer
    fn finish_record(&mut self) -> Result<()> {
        self.drain_open()?;
        let trailer_length = self.consume_trailer()?;
        if let Some(open) = self.open.take() {
            match self.compression {
                Compression::None => {
                    self.position += self.header_length + open.size + trailer_length;
                }
                _ => {
                    self.position = self.start_position + self.chan.input_position();
                }
            }
        }
        Ok(())
    }

    /// Fast-forward the open body to its declared size.
    ///
    /// Buffered bytes are skipped by advancing the cursor; a seekable
    /// uncompressed source skips by repositioning; everything else is
    /// discarded through the buffer. When digesting, every byte is read so
    /// the hash observes the full block.
    fn drain_open(&mut self) -> Result<()> {
        loop {
            let Self {
                chan, buf, open, ..
            } = self;
            let Some(body) = open.as_mut() else {
                return Ok(());
            };
            let remaining = body.size - body.position;
            if remaining == 0 {
                break;
            }

            if body.digest.is_some() {
                let mut scratch = [0u8; 8192];
                read_body_bytes(chan, buf, body, &mut scratch)?;
                continue;
            }

            if remaining <= buf.available() as u64 {
                buf.advance(remaining as usize);
                body.position = body.size;
                break;
            }

            if let Channel::Plain(src) = chan {
                if src.is_seekable() {
                    let skip = remaining - buf.available() as u64;
                    src.skip(skip)?;
                    body.position = body.size;
                    buf.clear();
                    break;
                }
            }

            body.position += buf.available() as u64;
            buf.clear();
            let n = {
                let space = buf.space();
                chan.read(space)?
            };
            buf.commit(n);
            if n == 0 {
                let missing = body.size - body.position;
                return Err(WebarcError::UnexpectedEof(format!(
                    "expected {missing} more bytes of record block"
                )));
            }
        }
        if let Some(message) = self.finish_digest() {
            self.emit_warning(&message);
        }
        Ok(())
    }

    /// Validate the inter-record trailer: CRLFCRLF for WARC, LF for ARC.
    ///
    /// A mismatch emits a warning and resynchronizes by discarding a bounded
    /// run of stray CR/LF bytes, returning the discarded length.
    fn consume_trailer(&mut self) -> Result<u64> {
        let protocol = self
            .open
            .as_ref()
            .map_or(Protocol::Warc, |body| body.protocol);

        if protocol == Protocol::Arc {
            if !self.require_buffered(1)? {
                self.emit_warning("invalid record trailer");
                return Ok(0);
            }
            if self.buf.as_slice()[0] == b'\n' {
                self.buf.advance(1);
                return Ok(1);
            }
            self.emit_warning("invalid record trailer");
            return Ok(0);
        }

        if !self.require_buffered(4)? {
            self.emit_warning("invalid record trailer");
            return Ok(0);
        }
        if &self.buf.as_slice()[..4] == WARC_TRAILER {
            self.buf.advance(4);
            return Ok(4);
        }

        self.emit_warning("invalid record trailer");
        let mut discarded = 0u64;
        loop {
            if self.buf.available() == 0 && self.fill()? == 0 {
                break;
            }
            let byte = self.buf.as_slice()[0];
            if byte != b'\r' && byte != b'\n' {
                break;
            }
            self.buf.advance(1);
            discarded += 1;
            if discarded > self.config.max_trailer_scan {
                return Err(WebarcError::Parse {
                    offset: self.position,
                    message: format!(
                        "trailer resynchronization exceeded {} bytes",
                        self.config.max_trailer_scan
                    ),
                });
            }
        }
        Ok(discarded)
    }

    /// Drive the header tokenizer; `Ok(false)` is a clean end of stream
    fn parse_header(&mut self) -> Result<bool> {
        loop {
            let used = match self.parser.feed(self.buf.as_slice()) {
                Ok(used) => used,
                Err(WebarcError::Parse { offset, message }) => {
                    return Err(WebarcError::Parse {
                        offset: self.position + offset,
                        message: match &self.filename {
                            Some(name) => format!("{message} (in {name})"),
                            None => message,
                        },
                    });
                }
                Err(other) => return Err(other),
            };
            self.buf.advance(used);
            if self.parser.is_finished() {
                return Ok(true);
            }
            if self.fill()? == 0 {
                if self.parser.position() > 0 {
                    return Err(WebarcError::UnexpectedEof(
                        "end of stream inside record header".to_string(),
                    ));
                }
                return Ok(false);
            }
        }
    }

    fn fill(&mut self) -> Result<usize> {
        let Self { chan, buf, .. } = self;
        let space = buf.space();
        let n = chan.read(space)?;
        buf.commit(n);
        Ok(n)
    }

    fn require_buffered(&mut self, count: usize) -> Result<bool> {
        while self.buf.available() < count {
            if self.fill()? == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Finalize the block digest once the body is fully observed; returns a
    /// warning message on mismatch
    fn finish_digest(&mut self) -> Option<String> {
        let body = self.open.as_mut()?;
        if body.position < body.size {
            return None;
        }
        let digest = body.digest.as_mut()?;
        let digester = digest.digester.take()?;
        let computed = digester.finish();
        let message = if computed.matches(&digest.declared) {
            None
        } else {
            Some(format!(
                "block digest mismatch: declared {}, computed {computed}",
                digest.declared
            ))
        };
        digest.computed = Some(computed);
        message
    }

    fn emit_warning(&mut self, message: &str) {
        warn!(
            offset = self.position,
            file = self.filename.as_deref(),
            "{message}"
        );
        if let Some(handler) = &mut self.warning {
            handler(message);
        }
    }
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("compression", &self.compression)
            .field("position", &self.position)
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}

/// Length-bounded body of the record most recently returned by
/// [`Reader::next`].
///
/// Reads stop at the declared `Content-Length` even when the shared buffer
/// already holds bytes of the trailer or the next record. Dropping the record
/// without reading is fine; the reader drains the remainder before advancing.
pub struct Body<'a> {
    pub(crate) reader: &'a mut Reader,
}

impl Body<'_> {
    /// Declared block size from the `Content-Length` header
    #[must_use]
    pub fn declared_size(&self) -> u64 {
        self.reader.open.as_ref().map_or(0, |body| body.size)
    }

    /// Close the body; further reads fail. The reader can still skip the
    /// unread remainder when advancing.
    pub fn close(&mut self) {
        if let Some(body) = self.reader.open.as_mut() {
            body.closed = true;
        }
    }

    /// Whether the body is still readable
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.reader.open.as_ref().is_some_and(|body| !body.closed)
    }

    /// Block digest computed while the body was consumed.
    ///
    /// Present once the body has been fully read with digest calculation
    /// enabled on the reader.
    #[must_use]
    pub fn computed_digest(&self) -> Option<&Digest> {
        self.reader.open.as_ref()?.digest.as_ref()?.computed.as_ref()
    }
}

impl Read for Body<'_> {
    fn read(&mut self, dest: &mut [u8]) -> io::Result<usize> {
        let n = {
            let Reader {
                chan, buf, open, ..
            } = &mut *self.reader;
            let Some(body) = open.as_mut() else {
                return Ok(0);
            };
            if body.closed {
                return Err(io::Error::other("record body is closed"));
            }
            read_body_bytes(chan, buf, body, dest).map_err(io::Error::from)?
        };
        if let Some(message) = self.reader.finish_digest() {
            self.reader.emit_warning(&message);
        }
        Ok(n)
    }
}

impl Payload for Body<'_> {
    fn position(&self) -> u64 {
        self.reader.open.as_ref().map_or(0, |body| body.position)
    }

    fn consume(&mut self) -> Result<()> {
        self.reader.drain_open()
    }
}

impl std::fmt::Debug for Body<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Body")
            .field("declared_size", &self.declared_size())
            .field("position", &self.position())
            .finish_non_exhaustive()
    }
}

/// Serve up to `min(dest.len(), remaining)` body bytes from the shared
/// buffer, then straight from the channel; feeds any active digest
fn read_body_bytes(
    chan: &mut Channel,
    buf: &mut InputBuf,
    body: &mut OpenBody,
    dest: &mut [u8],
) -> Result<usize> {
    if body.position >= body.size || dest.is_empty() {
        return Ok(0);
    }
    let limit = (body.size - body.position).min(dest.len() as u64) as usize;

    let n = if buf.available() > 0 {
        let n = limit.min(buf.available());
        dest[..n].copy_from_slice(&buf.as_slice()[..n]);
        buf.advance(n);
        n
    } else {
        let n = chan.read(&mut dest[..limit])?;
        if n == 0 {
            let missing = body.size - body.position;
            return Err(WebarcError::UnexpectedEof(format!(
                "expected {missing} more bytes of record block"
            )));
        }
        n
    };

    body.position += n as u64;
    if let Some(digest) = body.digest.as_mut() {
        if let Some(digester) = digest.digester.as_mut() {
            digester.update(&dest[..n]);
        }
    }
    Ok(n)
}

fn read_probe(source: &mut RawSource, probe: &mut [u8; 4]) -> Result<usize> {
    let mut filled = 0;
    while filled < probe.len() {
        let n = source.read(&mut probe[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn warc_record(warc_type: &str, body: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "WARC/1.0\r\nWARC-Type: {warc_type}\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        out.extend_from_slice(body);
        out.extend_from_slice(b"\r\n\r\n");
        out
    }

    #[test]
    fn test_empty_stream_is_clean_eof() {
        let mut reader = Reader::new(Cursor::new(Vec::new())).unwrap();
        assert!(reader.next().unwrap().is_none());
        assert_eq!(reader.compression(), Compression::None);
    }

    #[test]
    fn test_single_record() {
        let mut reader = Reader::new(Cursor::new(warc_record("response", b"hello"))).unwrap();
        {
            let mut record = reader.next().unwrap().unwrap();
            assert_eq!(record.kind(), RecordKind::Response);
            assert_eq!(record.content_length(), 5);
            let mut body = Vec::new();
            record.body().read_to_end(&mut body).unwrap();
            assert_eq!(body, b"hello");
        }
        assert!(reader.next().unwrap().is_none());
    }

    #[test]
    fn test_body_stops_at_declared_size() {
        let mut bytes = warc_record("response", b"12345");
        bytes.extend_from_slice(&warc_record("metadata", b""));

        let mut reader = Reader::new(Cursor::new(bytes)).unwrap();
        let mut record = reader.next().unwrap().unwrap();
        // a large read request must not cross into the trailer
        let mut buf = [0u8; 64];
        let n = record.body().read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"12345");
        assert_eq!(record.body().read(&mut buf).unwrap(), 0);
        drop(record);

        let record = reader.next().unwrap().unwrap();
        assert_eq!(record.kind(), RecordKind::Metadata);
    }

    #[test]
    fn test_unread_body_is_drained_automatically() {
        let mut bytes = warc_record("response", &vec![b'x'; 10_000]);
        bytes.extend_from_slice(&warc_record("request", b"GET"));

        let mut reader = Reader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.next().unwrap().unwrap().kind(), RecordKind::Response);
        assert_eq!(reader.next().unwrap().unwrap().kind(), RecordKind::Request);
        assert!(reader.next().unwrap().is_none());
    }

    #[test]
    fn test_closed_body_rejects_reads() {
        let mut reader = Reader::new(Cursor::new(warc_record("response", b"data"))).unwrap();
        let mut record = reader.next().unwrap().unwrap();
        record.body().close();
        assert!(!record.body().is_open());
        assert!(record.body().read(&mut [0u8; 4]).is_err());
        drop(record);
        // the reader still advances past the unread body
        assert!(reader.next().unwrap().is_none());
    }

    #[test]
    fn test_consume_is_idempotent() {
        let mut reader = Reader::new(Cursor::new(warc_record("response", b"body"))).unwrap();
        let mut record = reader.next().unwrap().unwrap();
        record.body().consume().unwrap();
        assert_eq!(record.body().position(), 4);
        record.body().consume().unwrap();
        assert_eq!(record.body().position(), 4);
    }

    #[test]
    fn test_mid_body_eof_is_error() {
        let mut bytes = warc_record("response", b"complete body");
        bytes.truncate(bytes.len() - 10);

        let mut reader = Reader::new(Cursor::new(bytes)).unwrap();
        let record = reader.next().unwrap();
        assert!(record.is_some());
        drop(record);
        assert!(matches!(
            reader.next().unwrap_err(),
            WebarcError::UnexpectedEof(_)
        ));
    }

    #[test]
    fn test_mid_header_eof_is_error() {
        let mut reader = Reader::new(Cursor::new(b"WARC/1.0\r\nWARC-Type: res".to_vec())).unwrap();
        assert!(matches!(
            reader.next().unwrap_err(),
            WebarcError::UnexpectedEof(_)
        ));
    }

    #[test]
    fn test_probe_shorter_than_magic_is_error() {
        assert!(matches!(
            Reader::new(Cursor::new(b"WA".to_vec())).unwrap_err(),
            WebarcError::UnexpectedEof(_)
        ));
    }
}
