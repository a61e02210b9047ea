//! Record representation and type dispatch

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};

use crate::digest::Digest;
use crate::headers::{Headers, Version};
use crate::reader::Body;

/// Concrete kind of a record, selected by the `WARC-Type` header.
///
/// Unrecognized type values map to [`RecordKind::Other`] so decoding never
/// fails solely because a file uses an extension type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Metadata about the archive file itself
    Warcinfo,
    /// A captured protocol response
    Response,
    /// A resource captured without a protocol wrapper
    Resource,
    /// A captured protocol request
    Request,
    /// Metadata about another record
    Metadata,
    /// A revisit of previously archived content
    Revisit,
    /// A transformed version of another record's content
    Conversion,
    /// A continuation of a segmented record
    Continuation,
    /// Any unregistered record type
    Other,
}

impl RecordKind {
    /// Standard `WARC-Type` value for this kind
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Warcinfo => "warcinfo",
            RecordKind::Response => "response",
            RecordKind::Resource => "resource",
            RecordKind::Request => "request",
            RecordKind::Metadata => "metadata",
            RecordKind::Revisit => "revisit",
            RecordKind::Conversion => "conversion",
            RecordKind::Continuation => "continuation",
            RecordKind::Other => "unknown",
        }
    }
}

/// Mutable mapping from `WARC-Type` values to record kinds.
///
/// Pre-populated with the eight standard types plus a `default` fallback;
/// callers can register extension types without touching the engine.
#[derive(Debug, Clone)]
pub(crate) struct KindRegistry {
    kinds: HashMap<String, RecordKind>,
}

impl Default for KindRegistry {
    fn default() -> Self {
        let mut kinds = HashMap::new();
        kinds.insert("default".to_string(), RecordKind::Other);
        kinds.insert("warcinfo".to_string(), RecordKind::Warcinfo);
        kinds.insert("response".to_string(), RecordKind::Response);
        kinds.insert("resource".to_string(), RecordKind::Resource);
        kinds.insert("request".to_string(), RecordKind::Request);
        kinds.insert("metadata".to_string(), RecordKind::Metadata);
        kinds.insert("revisit".to_string(), RecordKind::Revisit);
        kinds.insert("conversion".to_string(), RecordKind::Conversion);
        kinds.insert("continuation".to_string(), RecordKind::Continuation);
        Self { kinds }
    }
}

impl KindRegistry {
    pub(crate) fn register(&mut self, warc_type: &str, kind: RecordKind) {
        self.kinds.insert(warc_type.to_ascii_lowercase(), kind);
    }

    pub(crate) fn resolve(&self, warc_type: Option<&str>) -> RecordKind {
        warc_type
            .and_then(|t| self.kinds.get(&t.to_ascii_lowercase()))
            .or_else(|| self.kinds.get("default"))
            .copied()
            .unwrap_or(RecordKind::Other)
    }
}

/// Where a record came from, for diagnostics and external indexing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSource {
    /// File name, when the reader was opened from a path
    pub filename: Option<String>,
    /// Byte offset of the record start; for compressed streams this is the
    /// offset of the compression member within the compressed file
    pub offset: u64,
}

/// One decoded record: version, headers and an exclusive handle on the body.
///
/// The record mutably borrows the reader it came from, so at most one record
/// body is ever open; the reader drains whatever is left unread when the next
/// record is requested.
pub struct Record<'a> {
    pub(crate) kind: RecordKind,
    pub(crate) version: Version,
    pub(crate) headers: Headers,
    pub(crate) source: RecordSource,
    pub(crate) body: Body<'a>,
}

impl<'a> Record<'a> {
    /// Record kind resolved from the `WARC-Type` header
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Protocol version of the record header block
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Record headers
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Record body, bounded to the declared `Content-Length`
    pub fn body(&mut self) -> &mut Body<'a> {
        &mut self.body
    }

    /// Origin of this record within its source file
    #[must_use]
    pub fn source(&self) -> &RecordSource {
        &self.source
    }

    /// Raw `WARC-Type` header value
    #[must_use]
    pub fn warc_type(&self) -> Option<&str> {
        self.headers.first("WARC-Type")
    }

    /// `WARC-Record-ID` header value
    #[must_use]
    pub fn record_id(&self) -> Option<&str> {
        self.headers.first("WARC-Record-ID")
    }

    /// Capture target URI
    #[must_use]
    pub fn target_uri(&self) -> Option<&str> {
        self.headers.first("WARC-Target-URI")
    }

    /// Record date parsed from the `WARC-Date` header
    #[must_use]
    pub fn date(&self) -> Option<DateTime<Utc>> {
        let raw = self.headers.first("WARC-Date")?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Address the capture was made from, when recorded
    #[must_use]
    pub fn ip_address(&self) -> Option<IpAddr> {
        self.headers.first("WARC-IP-Address")?.parse().ok()
    }

    /// Media type of the record block
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.first("Content-Type")
    }

    /// Declared block length in bytes
    #[must_use]
    pub fn content_length(&self) -> u64 {
        self.body.declared_size()
    }

    /// Declared digest of the record block
    #[must_use]
    pub fn block_digest(&self) -> Option<Digest> {
        Digest::parse(self.headers.first("WARC-Block-Digest")?).ok()
    }

    /// Declared digest of the record payload
    #[must_use]
    pub fn payload_digest(&self) -> Option<Digest> {
        Digest::parse(self.headers.first("WARC-Payload-Digest")?).ok()
    }

    /// Archive file name of a warcinfo record
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.headers.first("WARC-Filename")
    }

    /// Record a revisit refers back to
    #[must_use]
    pub fn refers_to(&self) -> Option<&str> {
        self.headers.first("WARC-Refers-To")
    }

    /// Position of a continuation record within its segmented series
    #[must_use]
    pub fn segment_number(&self) -> Option<u64> {
        self.headers.first("WARC-Segment-Number")?.parse().ok()
    }
}

impl std::fmt::Debug for Record<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("kind", &self.kind)
            .field("version", &self.version)
            .field("headers", &self.headers.len())
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_defaults() {
        let registry = KindRegistry::default();
        assert_eq!(registry.resolve(Some("response")), RecordKind::Response);
        assert_eq!(registry.resolve(Some("WARCINFO")), RecordKind::Warcinfo);
        assert_eq!(registry.resolve(Some("screenshot")), RecordKind::Other);
        assert_eq!(registry.resolve(None), RecordKind::Other);
    }

    #[test]
    fn test_registry_extension() {
        let mut registry = KindRegistry::default();
        registry.register("screenshot", RecordKind::Resource);
        assert_eq!(registry.resolve(Some("screenshot")), RecordKind::Resource);
        // overriding the fallback changes what unknown types resolve to
        registry.register("default", RecordKind::Metadata);
        assert_eq!(registry.resolve(Some("whatever")), RecordKind::Metadata);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(RecordKind::Revisit.as_str(), "revisit");
        assert_eq!(RecordKind::Other.as_str(), "unknown");
    }
}
