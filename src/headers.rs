//! Protocol versions and header collections

use std::fmt;
use std::io::{self, Write};

use crate::{Result, WebarcError};

/// Protocol family a message version belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// WARC container records
    Warc,
    /// Legacy ARC container records
    Arc,
    /// HTTP messages carried inside record blocks
    Http,
}

impl Protocol {
    /// Protocol name as it appears on the wire
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Warc => "WARC",
            Protocol::Arc => "ARC",
            Protocol::Http => "HTTP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol version of a parsed message, e.g. `WARC/1.1`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    /// Protocol family
    pub protocol: Protocol,
    /// Major version component
    pub major: u32,
    /// Minor version component
    pub minor: u32,
}

impl Version {
    /// WARC 1.0
    pub const WARC_1_0: Version = Version::new(Protocol::Warc, 1, 0);
    /// WARC 1.1
    pub const WARC_1_1: Version = Version::new(Protocol::Warc, 1, 1);
    /// The version reported for all legacy ARC records
    pub const ARC_1_1: Version = Version::new(Protocol::Arc, 1, 1);
    /// HTTP 1.1
    pub const HTTP_1_1: Version = Version::new(Protocol::Http, 1, 1);

    /// Create a version value
    #[must_use]
    pub const fn new(protocol: Protocol, major: u32, minor: u32) -> Self {
        Self {
            protocol,
            major,
            minor,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}.{}", self.protocol, self.major, self.minor)
    }
}

const NO_VALUES: &[String] = &[];

/// Ordered, case-insensitive multimap of header fields.
///
/// Lookup ignores ASCII case; insertion order is preserved per key and across
/// keys so a record can be re-serialized faithfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, Vec<String>)>,
}

impl Headers {
    /// Create an empty header collection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value under a field name, preserving existing values
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.index_of(&name) {
            Some(index) => self.fields[index].1.push(value),
            None => self.fields.push((name, vec![value])),
        }
    }

    /// Replace all values of a field with a single value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.index_of(&name) {
            Some(index) => {
                let values = &mut self.fields[index].1;
                values.clear();
                values.push(value);
            }
            None => self.fields.push((name, vec![value])),
        }
    }

    /// First value of a field, if present
    #[must_use]
    pub fn first(&self, name: &str) -> Option<&str> {
        self.all(name).first().map(String::as_str)
    }

    /// Value of a single-valued field.
    ///
    /// # Errors
    ///
    /// Returns a parse error if the field occurs more than once.
    pub fn sole(&self, name: &str) -> Result<Option<&str>> {
        let values = self.all(name);
        if values.len() > 1 {
            return Err(WebarcError::Parse {
                offset: 0,
                message: format!("record has {} {} headers", values.len(), name),
            });
        }
        Ok(values.first().map(String::as_str))
    }

    /// All values of a field, in insertion order
    #[must_use]
    pub fn all(&self, name: &str) -> &[String] {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map_or(NO_VALUES, |(_, v)| v.as_slice())
    }

    /// Check whether a field is present
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Number of distinct field names
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check whether the collection is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over `(name, value)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| (k.as_str(), v.as_str())))
    }

    /// Write the header block as `Name: value\r\n` lines.
    ///
    /// The terminating blank line is not written; that is the caller's
    /// framing concern.
    ///
    /// # Errors
    ///
    /// Returns error if the writer fails
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<usize> {
        let mut written = 0;
        for (name, value) in self.iter() {
            writer.write_all(name.as_bytes())?;
            writer.write_all(b": ")?;
            writer.write_all(value.as_bytes())?;
            writer.write_all(b"\r\n")?;
            written += name.len() + value.len() + 4;
        }
        Ok(written)
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}
