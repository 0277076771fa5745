//! Blob body encoding
//!
//! Blobs are addressed by the digest of their uncompressed content, so the
//! encoding only affects the stored bytes, never the key.

use crate::config::Compression;
use crate::error::{BackupError, Result};
use std::borrow::Cow;

/// Encoder/decoder for blob bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobCodec {
    compression: Compression,
    level: i32,
}

impl BlobCodec {
    /// Create a codec
    pub fn new(compression: Compression, level: i32) -> Self {
        Self { compression, level }
    }

    /// Codec used to read blobs written under `compression`
    pub fn for_reading(compression: Compression) -> Self {
        Self::new(compression, 0)
    }

    /// Compression applied by this codec
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Encode file content into a blob body
    pub fn encode<'a>(&self, content: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        match self.compression {
            Compression::None => Ok(Cow::Borrowed(content)),
            Compression::Zstd => zstd::encode_all(content, self.level)
                .map(Cow::Owned)
                .map_err(|e| BackupError::Manifest(format!("zstd compression failed: {}", e))),
        }
    }

    /// Decode a blob body back into file content
    pub fn decode(&self, body: Vec<u8>) -> Result<Vec<u8>> {
        match self.compression {
            Compression::None => Ok(body),
            Compression::Zstd => zstd::decode_all(body.as_slice())
                .map_err(|e| BackupError::Manifest(format!("zstd decompression failed: {}", e))),
        }
    }
}

impl Default for BlobCodec {
    fn default() -> Self {
        Self::new(Compression::None, 0)
    }
}
