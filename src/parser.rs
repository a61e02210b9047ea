//! Dual-grammar header tokenizer
//!
//! One entry point covers both container grammars: a buffer beginning with
//! the literal `WARC/` is scanned as WARC named fields, anything else as a
//! legacy ARC positional header line. The ARC branch synthesizes equivalent
//! WARC headers so the reader never has to care which grammar produced a
//! record.
//!
//! The parser is push-based: [`HeaderParser::feed`] consumes as many bytes
//! as it can and the caller keeps refilling until [`HeaderParser::is_finished`]
//! reports completion. A grammar violation is fatal for the current record
//! and cannot be retried by feeding more bytes.

use chrono::NaiveDateTime;

use crate::error::context_window;
use crate::headers::{Headers, Protocol, Version};
use crate::{Result, WebarcError};

const WARC_LITERAL: &[u8] = b"WARC/";
const SCRATCH_CAP: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Nothing consumed yet; the first byte picks the grammar branch
    Start,
    /// Matching the `WARC/` literal, index of the next expected byte
    WarcLiteral(usize),
    VersionMajor,
    VersionMinor,
    VersionCr,
    /// At the start of a header line
    FieldStart,
    FieldName,
    /// Skipping optional whitespace after the `:`
    ValueStart,
    Value,
    ValueCr,
    /// Skipping obsolete line-folding whitespace
    FoldWs,
    /// Blank-line CR seen, LF ends the header block
    EndCr,
    ArcUrl,
    ArcIp,
    ArcDate,
    ArcMime,
    ArcLength,
    ArcCr,
    Finished,
    Failed,
}

/// Incremental header block scanner for WARC and legacy ARC records
#[derive(Debug)]
pub struct HeaderParser {
    state: State,
    lenient: bool,
    buf: Vec<u8>,
    /// Length of `buf` up to the last non-whitespace byte, recorded before
    /// trailing whitespace is scanned so it can be trimmed on commit
    end_of_text: usize,
    name: String,
    protocol: Protocol,
    major: u32,
    minor: u32,
    version_digits: u32,
    headers: Headers,
    position: u64,
    warnings: Vec<String>,
}

impl Default for HeaderParser {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderParser {
    /// Create a parser in strict mode
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Start,
            lenient: false,
            buf: Vec::with_capacity(256),
            end_of_text: 0,
            name: String::new(),
            protocol: Protocol::Warc,
            major: 0,
            minor: 0,
            version_digits: 0,
            headers: Headers::new(),
            position: 0,
            warnings: Vec::new(),
        }
    }

    /// Prepare for the next record, keeping the mode setting
    pub fn reset(&mut self) {
        self.state = State::Start;
        self.buf.clear();
        self.buf.shrink_to(SCRATCH_CAP);
        self.end_of_text = 0;
        self.name.clear();
        self.protocol = Protocol::Warc;
        self.major = 0;
        self.minor = 0;
        self.version_digits = 0;
        self.headers = Headers::new();
        self.position = 0;
        self.warnings.clear();
    }

    /// Relax grammar checks: control characters in names and values, bare LF
    /// line endings and multi-digit version components all pass
    pub fn set_lenient(&mut self, lenient: bool) {
        self.lenient = lenient;
    }

    /// Consume bytes from `data`, returning how many were used.
    ///
    /// Stops early once the header block is complete.
    ///
    /// # Errors
    ///
    /// Returns a parse error on a grammar violation; the parser then stays
    /// in its error state and must be [`reset`](Self::reset)
    pub fn feed(&mut self, data: &[u8]) -> Result<usize> {
        if self.state == State::Failed {
            return Err(WebarcError::Parse {
                offset: self.position,
                message: "header parser already failed for this record".to_string(),
            });
        }
        let mut used = 0;
        while used < data.len() && self.state != State::Finished {
            if let Err(message) = self.step(data[used]) {
                self.state = State::Failed;
                let offset = self.position + used as u64;
                self.position += used as u64;
                return Err(WebarcError::Parse {
                    offset,
                    message: format!("{message}: {}", context_window(data, used, 40)),
                });
            }
            used += 1;
        }
        self.position += used as u64;
        Ok(used)
    }

    /// Whether a complete header block has been scanned
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    /// Bytes consumed for the current record so far
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Protocol version of the scanned header block
    #[must_use]
    pub fn version(&self) -> Version {
        Version::new(self.protocol, self.major, self.minor)
    }

    /// Take the scanned header collection
    pub fn headers(&mut self) -> Headers {
        std::mem::take(&mut self.headers)
    }

    /// Drain warnings produced while scanning (ARC date repairs)
    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    fn step(&mut self, byte: u8) -> std::result::Result<(), String> {
        match self.state {
            State::Start => match byte {
                b'W' => self.state = State::WarcLiteral(1),
                b'a'..=b'z' => {
                    self.protocol = Protocol::Arc;
                    self.major = 1;
                    self.minor = 1;
                    self.buf.push(byte);
                    self.state = State::ArcUrl;
                }
                _ => return Err("expected WARC version line or ARC header line".to_string()),
            },
            State::WarcLiteral(index) => {
                if byte == WARC_LITERAL[index] {
                    if index + 1 == WARC_LITERAL.len() {
                        self.state = State::VersionMajor;
                    } else {
                        self.state = State::WarcLiteral(index + 1);
                    }
                } else {
                    return Err("malformed WARC version line".to_string());
                }
            }
            State::VersionMajor => match byte {
                b'0'..=b'9' => {
                    self.version_digits += 1;
                    if !self.lenient && self.version_digits > 1 {
                        return Err("multi-digit WARC major version".to_string());
                    }
                    self.major = self.major * 10 + u32::from(byte - b'0');
                }
                b'.' if self.version_digits > 0 => {
                    self.version_digits = 0;
                    self.state = State::VersionMinor;
                }
                _ => return Err("malformed WARC version".to_string()),
            },
            State::VersionMinor => match byte {
                b'0'..=b'9' => {
                    self.version_digits += 1;
                    if !self.lenient && self.version_digits > 1 {
                        return Err("multi-digit WARC minor version".to_string());
                    }
                    self.minor = self.minor * 10 + u32::from(byte - b'0');
                }
                b'\r' if self.version_digits > 0 => self.state = State::VersionCr,
                b'\n' if self.version_digits > 0 && self.lenient => {
                    self.state = State::FieldStart;
                }
                _ => return Err("malformed WARC version".to_string()),
            },
            State::VersionCr => match byte {
                b'\n' => self.state = State::FieldStart,
                _ => return Err("expected LF after CR in version line".to_string()),
            },
            State::FieldStart => match byte {
                b'\r' => {
                    self.commit_field();
                    self.state = State::EndCr;
                }
                b'\n' if self.lenient => {
                    self.commit_field();
                    self.state = State::Finished;
                }
                b' ' | b'\t' => {
                    // obsolete line folding continues the previous value
                    if !self.buf.is_empty() {
                        self.buf.truncate(self.end_of_text);
                        self.buf.push(b' ');
                    }
                    self.state = State::FoldWs;
                }
                _ if self.is_name_byte(byte) => {
                    self.commit_field();
                    self.buf.push(byte);
                    self.state = State::FieldName;
                }
                _ => return Err("invalid character at start of header line".to_string()),
            },
            State::FieldName => match byte {
                b':' => {
                    self.name = String::from_utf8_lossy(&self.buf).into_owned();
                    self.buf.clear();
                    self.end_of_text = 0;
                    self.state = State::ValueStart;
                }
                _ if self.is_name_byte(byte) => self.buf.push(byte),
                _ => return Err("invalid character in header field name".to_string()),
            },
            State::ValueStart => match byte {
                b' ' | b'\t' => {}
                b'\r' => self.state = State::ValueCr,
                b'\n' if self.lenient => self.state = State::FieldStart,
                _ => {
                    self.push_value_byte(byte)?;
                    self.state = State::Value;
                }
            },
            State::Value => match byte {
                b'\r' => self.state = State::ValueCr,
                b'\n' if self.lenient => self.state = State::FieldStart,
                b'\n' => return Err("bare LF in header value".to_string()),
                _ => self.push_value_byte(byte)?,
            },
            State::ValueCr => match byte {
                b'\n' => self.state = State::FieldStart,
                _ => return Err("expected LF after CR in header line".to_string()),
            },
            State::FoldWs => match byte {
                b' ' | b'\t' => {}
                b'\r' => self.state = State::ValueCr,
                b'\n' if self.lenient => self.state = State::FieldStart,
                _ => {
                    self.push_value_byte(byte)?;
                    self.state = State::Value;
                }
            },
            State::EndCr => match byte {
                b'\n' => self.state = State::Finished,
                _ => return Err("expected LF after CR ending header block".to_string()),
            },
            State::ArcUrl => match byte {
                b' ' => {
                    self.commit_arc_url();
                    self.state = State::ArcIp;
                }
                b'\r' | b'\n' => return Err("truncated ARC header line".to_string()),
                _ => self.buf.push(byte),
            },
            State::ArcIp => match byte {
                b' ' => {
                    let ip = String::from_utf8_lossy(&self.buf).into_owned();
                    self.headers.set("WARC-IP-Address", ip);
                    self.buf.clear();
                    self.state = State::ArcDate;
                }
                b'\r' | b'\n' => return Err("truncated ARC header line".to_string()),
                _ => self.buf.push(byte),
            },
            State::ArcDate => match byte {
                b' ' => {
                    self.commit_arc_date();
                    self.state = State::ArcMime;
                }
                b'\r' | b'\n' => return Err("truncated ARC header line".to_string()),
                _ => self.buf.push(byte),
            },
            State::ArcMime => match byte {
                b' ' => {
                    // the ARC content-type column is superseded by the type
                    // synthesized from the URL scheme
                    self.buf.clear();
                    self.state = State::ArcLength;
                }
                b'\r' | b'\n' => return Err("truncated ARC header line".to_string()),
                _ => self.buf.push(byte),
            },
            State::ArcLength => match byte {
                b'0'..=b'9' => self.buf.push(byte),
                b'\n' => {
                    self.commit_arc_length();
                    self.state = State::Finished;
                }
                b'\r' if self.lenient => self.state = State::ArcCr,
                _ => return Err("invalid ARC record length".to_string()),
            },
            State::ArcCr => match byte {
                b'\n' => {
                    self.commit_arc_length();
                    self.state = State::Finished;
                }
                _ => return Err("expected LF ending ARC header line".to_string()),
            },
            State::Finished | State::Failed => {
                unreachable!("feed() stops before terminal states")
            }
        }
        Ok(())
    }

    fn is_name_byte(&self, byte: u8) -> bool {
        if self.lenient {
            return !matches!(byte, b':' | b'\r' | b'\n');
        }
        byte.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&byte)
    }

    fn push_value_byte(&mut self, byte: u8) -> std::result::Result<(), String> {
        if !self.lenient && (byte < 0x20 || byte == 0x7f) && byte != b'\t' {
            return Err(format!("control character {byte:#04x} in header value"));
        }
        self.buf.push(byte);
        if byte != b' ' && byte != b'\t' {
            self.end_of_text = self.buf.len();
        }
        Ok(())
    }

    /// Commit the field accumulated across its line and any continuations
    fn commit_field(&mut self) {
        if self.name.is_empty() {
            return;
        }
        let value = String::from_utf8_lossy(&self.buf[..self.end_of_text]).into_owned();
        let name = std::mem::take(&mut self.name);
        self.headers.append(name, value);
        self.buf.clear();
        self.end_of_text = 0;
    }

    /// Synthesize WARC headers from the ARC URL column
    fn commit_arc_url(&mut self) {
        // ARC predates UTF-8 URLs; decode as ISO-8859-1
        let url: String = self.buf.iter().map(|&b| b as char).collect();
        if let Some(filename) = url.strip_prefix("filedesc://") {
            self.headers.set("WARC-Type", "warcinfo");
            self.headers.set("WARC-Filename", filename.to_string());
            self.headers.set("Content-Type", "text/plain");
        } else if url.starts_with("dns:") {
            self.headers.set("WARC-Type", "response");
            self.headers.set("Content-Type", "text/dns");
            self.headers.set("WARC-Target-URI", url);
        } else {
            self.headers.set("WARC-Type", "response");
            self.headers
                .set("Content-Type", "application/http;msgtype=response");
            self.headers.set("WARC-Target-URI", url);
        }
        self.buf.clear();
    }

    /// Convert the 14-digit ARC timestamp to an ISO-8601 instant, repairing
    /// truncated and overlong dates seen in real-world files
    fn commit_arc_date(&mut self) {
        let mut date = String::from_utf8_lossy(&self.buf).into_owned();
        if date.len() < 14 {
            self.warnings
                .push(format!("ARC date too short ({} digits)", date.len()));
            while date.len() < 14 {
                date.push('0');
            }
        } else if date.len() > 14 {
            self.warnings
                .push(format!("ARC date too long ({} digits)", date.len()));
            date.truncate(14);
        }
        match NaiveDateTime::parse_from_str(&date, "%Y%m%d%H%M%S") {
            Ok(instant) => {
                self.headers
                    .set("WARC-Date", instant.format("%Y-%m-%dT%H:%M:%SZ").to_string());
            }
            Err(_) => self.warnings.push("ARC date not parsable".to_string()),
        }
        self.buf.clear();
    }

    fn commit_arc_length(&mut self) {
        let length = String::from_utf8_lossy(&self.buf).into_owned();
        self.headers.set("Content-Length", length);
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &[u8]) -> HeaderParser {
        let mut parser = HeaderParser::new();
        let used = parser.feed(input).unwrap();
        assert!(parser.is_finished());
        assert_eq!(parser.position(), used as u64);
        parser
    }

    fn parse_lenient(input: &[u8]) -> HeaderParser {
        let mut parser = HeaderParser::new();
        parser.set_lenient(true);
        parser.feed(input).unwrap();
        assert!(parser.is_finished());
        parser
    }

    #[test]
    fn test_warc_header_block() {
        let mut parser = parse(
            b"WARC/1.0\r\n\
              WARC-Type: response\r\n\
              WARC-Target-URI: http://example.com/\r\n\
              Content-Length: 42\r\n\
              \r\n",
        );
        assert_eq!(parser.version(), Version::WARC_1_0);
        let headers = parser.headers();
        assert_eq!(headers.first("warc-type"), Some("response"));
        assert_eq!(headers.first("Content-Length"), Some("42"));
    }

    #[test]
    fn test_stops_at_end_of_block() {
        let mut parser = HeaderParser::new();
        let input = b"WARC/1.1\r\nContent-Length: 0\r\n\r\nBODY";
        let used = parser.feed(input).unwrap();
        assert!(parser.is_finished());
        assert_eq!(used, input.len() - 4);
    }

    #[test]
    fn test_incremental_feeding() {
        let input = b"WARC/1.1\r\nWARC-Type: metadata\r\n\r\n";
        let mut parser = HeaderParser::new();
        for chunk in input.chunks(3) {
            let used = parser.feed(chunk).unwrap();
            if parser.is_finished() {
                break;
            }
            assert_eq!(used, chunk.len());
        }
        assert!(parser.is_finished());
        assert_eq!(parser.headers().first("WARC-Type"), Some("metadata"));
    }

    #[test]
    fn test_obsolete_line_folding() {
        let mut parser = parse(
            b"WARC/1.0\r\n\
              WARC-Target-URI: http://example.com/a\r\n\
              \t\tvery/long/path  \r\n\
              \r\n",
        );
        assert_eq!(
            parser.headers().first("WARC-Target-URI"),
            Some("http://example.com/a very/long/path")
        );
    }

    #[test]
    fn test_repeated_fields_kept_in_order() {
        let mut parser = parse(
            b"WARC/1.0\r\n\
              WARC-Concurrent-To: <urn:uuid:a>\r\n\
              WARC-Concurrent-To: <urn:uuid:b>\r\n\
              \r\n",
        );
        let headers = parser.headers();
        assert_eq!(
            headers.all("WARC-Concurrent-To"),
            &["<urn:uuid:a>".to_string(), "<urn:uuid:b>".to_string()]
        );
    }

    #[test]
    fn test_strict_rejects_bare_lf() {
        let mut parser = HeaderParser::new();
        let err = parser
            .feed(b"WARC/1.0\nWARC-Type: response\n\n")
            .unwrap_err();
        assert!(matches!(err, WebarcError::Parse { .. }));
        // the failure is sticky
        assert!(parser.feed(b"\r\n").is_err());
    }

    #[test]
    fn test_lenient_accepts_bare_lf() {
        let mut parser = parse_lenient(b"WARC/1.0\nWARC-Type: response\n\n");
        assert_eq!(parser.headers().first("WARC-Type"), Some("response"));
    }

    #[test]
    fn test_strict_rejects_control_character() {
        let mut parser = HeaderParser::new();
        let err = parser
            .feed(b"WARC/1.0\r\nWARC-Type: re\x01sponse\r\n\r\n")
            .unwrap_err();
        match err {
            WebarcError::Parse { message, .. } => assert!(message.contains("control character")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_strict_rejects_multi_digit_minor() {
        let mut parser = HeaderParser::new();
        assert!(parser.feed(b"WARC/0.18\r\n\r\n").is_err());

        let mut parser = parse_lenient(b"WARC/0.18\r\n\r\n");
        assert_eq!(parser.version(), Version::new(Protocol::Warc, 0, 18));
        assert!(parser.headers().is_empty());
    }

    #[test]
    fn test_arc_filedesc_synthesis() {
        let mut parser =
            parse(b"filedesc://foo.arc 0.0.0.0 20200101000000 text/plain 42\n");
        assert_eq!(parser.version(), Version::ARC_1_1);
        let headers = parser.headers();
        assert_eq!(headers.first("WARC-Type"), Some("warcinfo"));
        assert_eq!(headers.first("WARC-Filename"), Some("foo.arc"));
        assert_eq!(headers.first("Content-Type"), Some("text/plain"));
        assert_eq!(headers.first("WARC-Date"), Some("2020-01-01T00:00:00Z"));
        assert_eq!(headers.first("Content-Length"), Some("42"));
        assert_eq!(headers.first("WARC-IP-Address"), Some("0.0.0.0"));
    }

    #[test]
    fn test_arc_dns_synthesis() {
        let mut parser = parse(b"dns:www.law.gov.au 207.241.224.11 20050614070144 text/dns 55\n");
        let headers = parser.headers();
        assert_eq!(headers.first("WARC-Type"), Some("response"));
        assert_eq!(headers.first("Content-Type"), Some("text/dns"));
        assert_eq!(headers.first("WARC-Target-URI"), Some("dns:www.law.gov.au"));
        assert_eq!(headers.first("WARC-Date"), Some("2005-06-14T07:01:44Z"));
    }

    #[test]
    fn test_arc_http_synthesis() {
        let mut parser =
            parse(b"http://www.uq.edu.au/robots.txt 130.102.5.51 20050614070151 text/html 524\n");
        let headers = parser.headers();
        assert_eq!(headers.first("WARC-Type"), Some("response"));
        assert_eq!(
            headers.first("Content-Type"),
            Some("application/http;msgtype=response")
        );
        assert_eq!(
            headers.first("WARC-Target-URI"),
            Some("http://www.uq.edu.au/robots.txt")
        );
    }

    #[test]
    fn test_arc_short_date_repaired_with_warning() {
        let mut parser = parse(b"http://example.com/ 1.2.3.4 20200101 text/html 10\n");
        let warnings = parser.take_warnings();
        assert_eq!(warnings, vec!["ARC date too short (8 digits)".to_string()]);
        assert_eq!(
            parser.headers().first("WARC-Date"),
            Some("2020-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_arc_overlong_date_truncated_with_warning() {
        let mut parser = parse(b"http://example.com/ 1.2.3.4 200506140701440000 text/html 10\n");
        let warnings = parser.take_warnings();
        assert_eq!(warnings, vec!["ARC date too long (16 digits)".to_string()]);
        assert_eq!(
            parser.headers().first("WARC-Date"),
            Some("2005-06-14T07:01:44Z")
        );
    }

    #[test]
    fn test_reset_allows_reuse() {
        let mut parser = HeaderParser::new();
        parser.feed(b"WARC/1.0\r\nA: 1\r\n\r\n").unwrap();
        assert!(parser.is_finished());
        parser.reset();
        assert_eq!(parser.position(), 0);
        parser.feed(b"WARC/1.1\r\nB: 2\r\n\r\n").unwrap();
        assert_eq!(parser.version(), Version::WARC_1_1);
        assert_eq!(parser.headers().first("B"), Some("2"));
    }

    #[test]
    fn test_garbage_start_is_fatal() {
        let mut parser = HeaderParser::new();
        let err = parser.feed(b"\x00\x01\x02").unwrap_err();
        match err {
            WebarcError::Parse { offset, .. } => assert_eq!(offset, 0),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_error_context_window() {
        let mut parser = HeaderParser::new();
        let err = parser.feed(b"WARC/1.0\r\nBad Header Line\r\n\r\n").unwrap_err();
        match err {
            WebarcError::Parse { message, .. } => assert!(message.contains("<-- HERE -->")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
