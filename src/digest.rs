//! Digest headers and incremental digesters
//!
//! WARC digest headers carry `algorithm:value` pairs where the value is
//! conventionally Base32, but Base16 and Base64 occur in the wild. Parsed
//! values are normalized to Base32 so digests compare reliably.

use std::fmt;

use base64::Engine;
use digest::DynDigest;

use crate::{Result, WebarcError};

const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// A declared or computed digest value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    algorithm: String,
    value: String,
}

impl Digest {
    /// Parse an `algorithm:value` digest header value
    ///
    /// # Errors
    ///
    /// Returns error if the separator is missing
    pub fn parse(digest: &str) -> Result<Self> {
        let (algorithm, value) = digest.split_once(':').ok_or_else(|| WebarcError::Parse {
            offset: 0,
            message: format!("invalid digest header (missing ':'): {digest}"),
        })?;
        Ok(Self {
            algorithm: algorithm.to_string(),
            value: normalize(value, algorithm),
        })
    }

    /// Build a digest from an algorithm name and raw hash bytes
    #[must_use]
    pub fn from_bytes(algorithm: &str, bytes: &[u8]) -> Self {
        Self {
            algorithm: algorithm.to_string(),
            value: base32_encode(bytes),
        }
    }

    /// Algorithm name as written in the header
    #[must_use]
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Canonical Base32 value
    #[must_use]
    pub fn base32(&self) -> &str {
        &self.value
    }

    /// Raw hash bytes
    ///
    /// # Errors
    ///
    /// Returns error if the value is not valid Base32 (possible when the
    /// algorithm was unknown and the value could not be normalized)
    pub fn bytes(&self) -> Result<Vec<u8>> {
        base32_decode(&self.value)
    }

    /// Hash value in lowercase hex
    ///
    /// # Errors
    ///
    /// Returns error if the value is not valid Base32
    pub fn hex(&self) -> Result<String> {
        Ok(hex::encode(self.bytes()?))
    }

    /// Hash value in Base64
    ///
    /// # Errors
    ///
    /// Returns error if the value is not valid Base32
    pub fn base64(&self) -> Result<String> {
        Ok(base64::engine::general_purpose::STANDARD.encode(self.bytes()?))
    }

    /// Compare two digests, ignoring algorithm-name and value case
    #[must_use]
    pub fn matches(&self, other: &Digest) -> bool {
        canonical_algorithm(&self.algorithm) == canonical_algorithm(&other.algorithm)
            && self.value.eq_ignore_ascii_case(&other.value)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

/// Incremental hash over a named algorithm
pub struct Digester {
    algorithm: String,
    hasher: Box<dyn DynDigest>,
}

impl Digester {
    /// Look up a digester for an algorithm name.
    ///
    /// Accepts the spellings seen in archives (`sha1`, `SHA-1`, `sha256`,
    /// ...). Returns `None` for unrecognized algorithms so callers can keep
    /// reading records whose digests they cannot verify.
    #[must_use]
    pub fn for_algorithm(name: &str) -> Option<Self> {
        let canonical = canonical_algorithm(name);
        let hasher: Box<dyn DynDigest> = match canonical.as_str() {
            "md5" => Box::new(md5::Md5::default()),
            "sha1" => Box::new(sha1::Sha1::default()),
            "sha256" => Box::new(sha2::Sha256::default()),
            "sha512" => Box::new(sha2::Sha512::default()),
            _ => return None,
        };
        Some(Self {
            algorithm: canonical,
            hasher,
        })
    }

    /// Algorithm name in canonical form
    #[must_use]
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Hash output length in bytes
    #[must_use]
    pub fn output_len(&self) -> usize {
        self.hasher.output_size()
    }

    /// Feed bytes into the hash
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Finish the hash and produce a digest value
    #[must_use]
    pub fn finish(self) -> Digest {
        let Digester { algorithm, hasher } = self;
        Digest::from_bytes(&algorithm, &hasher.finalize())
    }
}

impl fmt::Debug for Digester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Digester")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

fn canonical_algorithm(name: &str) -> String {
    name.to_ascii_lowercase().replace('-', "")
}

/// Re-encode a digest value as Base32 if it was written as Base16 or Base64.
///
/// The encoding is inferred from the value length for the declared algorithm;
/// unknown algorithms leave the value untouched.
fn normalize(value: &str, algorithm: &str) -> String {
    if let Some(digester) = Digester::for_algorithm(algorithm) {
        let len = digester.output_len();
        if value.len() == len * 2 {
            if let Ok(bytes) = hex::decode(value) {
                return base32_encode(&bytes);
            }
        } else if value.len() >= len * 8 / 5 {
            return value.to_ascii_uppercase();
        } else if value.len() >= len * 8 / 6 {
            if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(value) {
                return base32_encode(&bytes);
            }
        }
    }
    value.to_string()
}

fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(5) * 8);
    for chunk in data.chunks(5) {
        let mut bits = 0u64;
        for (i, &b) in chunk.iter().enumerate() {
            bits |= u64::from(b) << ((4 - i) * 8);
        }
        let chars = (chunk.len() * 8).div_ceil(5);
        for j in 0..8 {
            if j < chars {
                let index = ((bits >> (35 - 5 * j)) & 0x1f) as usize;
                out.push(BASE32_ALPHABET[index] as char);
            } else {
                out.push('=');
            }
        }
    }
    out
}

fn base32_decode(value: &str) -> Result<Vec<u8>> {
    let trimmed = value.trim_end_matches('=');
    let mut out = Vec::with_capacity(trimmed.len() * 5 / 8);
    let mut bits = 0u64;
    let mut pending = 0u32;
    for c in trimmed.bytes() {
        let v = match c {
            b'A'..=b'Z' => c - b'A',
            b'a'..=b'z' => c - b'a',
            b'2'..=b'7' => c - b'2' + 26,
            _ => {
                return Err(WebarcError::Parse {
                    offset: 0,
                    message: format!("invalid base32 character: {:?}", c as char),
                })
            }
        };
        bits = (bits << 5) | u64::from(v);
        pending += 5;
        if pending >= 8 {
            pending -= 8;
            out.push((bits >> pending) as u8);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base32_round_trip() {
        let data = b"hello world";
        let encoded = base32_encode(data);
        assert_eq!(encoded, "NBSWY3DPEB3W64TMMQ======");
        assert_eq!(base32_decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_parse_prefixed() {
        let digest = Digest::parse("sha1:FYQCKDVKUKBNVMWFCWNZBD6FG6XM3SBI").unwrap();
        assert_eq!(digest.algorithm(), "sha1");
        assert_eq!(digest.base32(), "FYQCKDVKUKBNVMWFCWNZBD6FG6XM3SBI");
        assert!(Digest::parse("no-separator").is_err());
    }

    #[test]
    fn test_normalize_hex_value() {
        // sha1 of "hello world"
        let hex_form = Digest::parse("sha1:2aae6c35c94fcfb415dbe95f408b9ce91ee846ed").unwrap();
        let mut digester = Digester::for_algorithm("sha1").unwrap();
        digester.update(b"hello world");
        let computed = digester.finish();
        assert!(hex_form.matches(&computed));
        assert_eq!(
            computed.hex().unwrap(),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
    }

    #[test]
    fn test_normalize_base64_value() {
        let b64_form = Digest::parse("sha1:Kq5sNclPz7QV2+lfQIuc6R7oRu0=").unwrap();
        let mut digester = Digester::for_algorithm("SHA-1").unwrap();
        digester.update(b"hello world");
        assert!(b64_form.matches(&digester.finish()));
    }

    #[test]
    fn test_unknown_algorithm() {
        assert!(Digester::for_algorithm("whirlpool").is_none());
        // value survives verbatim when the algorithm is unknown
        let digest = Digest::parse("whirlpool:abc123").unwrap();
        assert_eq!(digest.base32(), "abc123");
    }

    #[test]
    fn test_sha256_digester() {
        let mut digester = Digester::for_algorithm("sha256").unwrap();
        assert_eq!(digester.output_len(), 32);
        digester.update(b"");
        assert_eq!(
            digester.finish().hex().unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
