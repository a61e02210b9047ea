//! Observing hash decorator for payloads

use std::io::{self, Read};

use crate::digest::{Digest, Digester};
use crate::Result;

use super::Payload;

/// Wrapper feeding every byte read through an incremental hash.
///
/// Purely an observer: bytes are never added, removed or reordered, so the
/// wrapped payload behaves exactly as it would unwrapped.
pub struct Digesting<R: Read> {
    inner: R,
    digester: Digester,
    observed: u64,
}

impl<R: Read> Digesting<R> {
    /// Wrap a payload, hashing everything read through it
    pub fn new(inner: R, digester: Digester) -> Self {
        Self {
            inner,
            digester,
            observed: 0,
        }
    }

    /// Number of bytes fed through the hash so far
    #[must_use]
    pub fn bytes_observed(&self) -> u64 {
        self.observed
    }

    /// Finish the hash over everything read so far
    #[must_use]
    pub fn finish(self) -> Digest {
        self.digester.finish()
    }

    /// Return the wrapped payload, discarding the hash state
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for Digesting<R> {
    fn read(&mut self, dest: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(dest)?;
        if n > 0 {
            self.digester.update(&dest[..n]);
            self.observed += n as u64;
        }
        Ok(n)
    }
}

impl<R: Payload> Payload for Digesting<R> {
    fn position(&self) -> u64 {
        self.inner.position()
    }

    // consume by reading so skipped bytes still pass through the hash
    fn consume(&mut self) -> Result<()> {
        super::consume_by_reading(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Chunked;

    #[test]
    fn test_observes_without_altering() {
        let digester = Digester::for_algorithm("sha1").unwrap();
        let mut body = Digesting::new(&b"hello world"[..], digester);

        let mut out = Vec::new();
        body.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello world");
        assert_eq!(body.bytes_observed(), 11);

        let computed = body.finish();
        assert_eq!(
            computed.hex().unwrap(),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
    }

    #[test]
    fn test_stacks_on_chunked_body() {
        let chunked = Chunked::new(&b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n"[..]);
        let digester = Digester::for_algorithm("sha256").unwrap();
        let mut body = Digesting::new(chunked, digester);

        let mut out = Vec::new();
        body.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"Wikipedia");
        assert_eq!(body.position(), 9);

        let mut reference = Digester::for_algorithm("sha256").unwrap();
        reference.update(b"Wikipedia");
        assert!(body.finish().matches(&reference.finish()));
    }

    #[test]
    fn test_consume_hashes_skipped_bytes() {
        let digester = Digester::for_algorithm("md5").unwrap();
        let chunked = Chunked::new(&b"3\r\nabc\r\n0\r\n\r\n"[..]);
        let mut body = Digesting::new(chunked, digester);
        body.consume().unwrap();
        assert_eq!(body.bytes_observed(), 3);
    }
}
