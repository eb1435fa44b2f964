//! Assembly configuration.

use crate::boundary::DEFAULT_BOUNDARY_LENGTH;
use crate::header::{HeaderCodec, WordEncoder};
use std::sync::Arc;

/// Default number of raw bytes pulled from a file source per step.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 8 * 1024;

/// Default size of the buffer used by [`crate::Message::write_to`].
pub const DEFAULT_WRITE_CHUNK_SIZE: usize = 16 * 1024;

/// Message assembly configuration.
///
/// Built with [`Config::builder`], which keeps every size within range.
#[derive(Debug, Clone)]
pub struct Config {
    /// Codec used for every header value.
    pub(crate) header_codec: Arc<dyn HeaderCodec>,
    /// Length of generated boundary tokens.
    pub(crate) boundary_length: usize,
    /// Maximum raw bytes read from a file source per step.
    pub(crate) read_chunk_size: usize,
    /// Buffer size used when pumping a message into a writer.
    pub(crate) write_chunk_size: usize,
}

impl Config {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            header_codec: Arc::new(WordEncoder::default()),
            boundary_length: DEFAULT_BOUNDARY_LENGTH,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            write_chunk_size: DEFAULT_WRITE_CHUNK_SIZE,
        }
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Returns the header codec.
    #[must_use]
    pub fn header_codec(&self) -> &dyn HeaderCodec {
        self.header_codec.as_ref()
    }

    /// Returns the length of generated boundary tokens.
    #[must_use]
    pub const fn boundary_length(&self) -> usize {
        self.boundary_length
    }

    /// Returns the maximum raw bytes read from a file source per step.
    #[must_use]
    pub const fn read_chunk_size(&self) -> usize {
        self.read_chunk_size
    }

    /// Returns the buffer size used by `write_to`.
    #[must_use]
    pub const fn write_chunk_size(&self) -> usize {
        self.write_chunk_size
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`Config`].
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Creates a builder starting from the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: Config::new(),
        }
    }

    /// Sets the header codec.
    #[must_use]
    pub fn header_codec(mut self, codec: impl HeaderCodec + 'static) -> Self {
        self.config.header_codec = Arc::new(codec);
        self
    }

    /// Sets the boundary token length (clamped to 1..=70, the RFC 2046 limit).
    #[must_use]
    pub fn boundary_length(mut self, len: usize) -> Self {
        self.config.boundary_length = len.clamp(1, 70);
        self
    }

    /// Sets the maximum raw bytes read from a file source per step.
    #[must_use]
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.config.read_chunk_size = size.max(3);
        self
    }

    /// Sets the buffer size used by `write_to`.
    #[must_use]
    pub fn write_chunk_size(mut self, size: usize) -> Self {
        self.config.write_chunk_size = size.max(1);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.boundary_length, 40);
        assert_eq!(config.read_chunk_size, DEFAULT_READ_CHUNK_SIZE);
        assert_eq!(config.write_chunk_size, DEFAULT_WRITE_CHUNK_SIZE);
    }

    #[test]
    fn test_builder() {
        let config = Config::builder()
            .boundary_length(200)
            .read_chunk_size(1)
            .write_chunk_size(0)
            .header_codec(WordEncoder::new(998))
            .build();
        assert_eq!(config.boundary_length(), 70);
        assert_eq!(config.read_chunk_size(), 3);
        assert_eq!(config.write_chunk_size(), 1);
        assert_eq!(config.header_codec().encode("a b", "utf-8", 0, true), "a b");
    }
}
