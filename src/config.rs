//! Decoder configuration

use serde::{Deserialize, Serialize};

use crate::{Result, WebarcError};

/// Tuning knobs for the record decoder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Relax grammar checks for malformed real-world archives.
    ///
    /// Lenient mode permits ASCII control characters in header names and
    /// values, bare LF line endings and multi-digit version components.
    #[serde(default)]
    pub lenient: bool,

    /// Compute block digests for records that declare one
    #[serde(default)]
    pub verify_block_digests: bool,

    /// Decode buffer capacity in bytes
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Upper bound on stray CR/LF bytes discarded while repairing a trailer
    #[serde(default = "default_max_trailer_scan")]
    pub max_trailer_scan: u64,

    /// Upper bound on the size of a zstd dictionary frame
    #[serde(default = "default_max_dictionary_size")]
    pub max_dictionary_size: usize,
}

fn default_buffer_capacity() -> usize {
    8 * 1024
}

fn default_max_trailer_scan() -> u64 {
    64 * 1024
}

fn default_max_dictionary_size() -> usize {
    16 * 1024 * 1024
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            lenient: false,
            verify_block_digests: false,
            buffer_capacity: default_buffer_capacity(),
            max_trailer_scan: default_max_trailer_scan(),
            max_dictionary_size: default_max_dictionary_size(),
        }
    }
}

impl DecoderConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| WebarcError::Config(format!("failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| WebarcError::Config(format!("failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if a limit is out of range
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity < 64 {
            return Err(WebarcError::Config(format!(
                "buffer_capacity must be at least 64 bytes, got {}",
                self.buffer_capacity
            )));
        }

        if self.max_dictionary_size == 0 {
            return Err(WebarcError::Config(
                "max_dictionary_size must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = DecoderConfig::default();
        assert!(!config.lenient);
        assert!(!config.verify_block_digests);
        assert_eq!(config.buffer_capacity, 8192);
        config.validate().unwrap();
    }

    #[test]
    fn test_config_parse() {
        let config_toml = r#"
            lenient = true
            verify_block_digests = true
            max_trailer_scan = 4096
        "#;

        let config: DecoderConfig = toml::from_str(config_toml).unwrap();
        assert!(config.lenient);
        assert!(config.verify_block_digests);
        assert_eq!(config.max_trailer_scan, 4096);
        assert_eq!(config.buffer_capacity, 8192);
    }

    #[test]
    fn test_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"lenient = true\n").unwrap();

        let config = DecoderConfig::from_file(file.path()).unwrap();
        assert!(config.lenient);
    }

    #[test]
    fn test_invalid_buffer_capacity() {
        let config: DecoderConfig = toml::from_str("buffer_capacity = 1").unwrap();
        assert!(config.validate().is_err());
    }
}
