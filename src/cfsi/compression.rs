//! Gzip payload detection and coding.
//!
//! A compressed payload is a little-endian `u32` holding the inflated length,
//! followed by a complete gzip member.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};
use tracing::{debug, warn};

use super::error::{CfsiError, Result};
use super::structures::extension_of;

/// Gzip member magic.
pub const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// Length of the uncompressed-size prefix in front of the gzip stream.
pub const SIZE_PREFIX_LEN: usize = 4;

/// Bytes that must be peeked to classify a payload.
pub const DETECT_LEN: usize = SIZE_PREFIX_LEN + GZIP_MAGIC.len();

/// Extensions stored compressed in shipped archives.
pub const DEFAULT_COMPRESSED_EXTENSIONS: [&str; 5] = ["orb", "uaz", "rtz", "bft", "pfx"];

/// Default gzip level.
pub const DEFAULT_LEVEL: u32 = 6;

/// True when the payload head carries the gzip magic after the size prefix.
pub fn is_compressed(head: &[u8]) -> bool {
    head.len() >= DETECT_LEN && head[SIZE_PREFIX_LEN..DETECT_LEN] == GZIP_MAGIC
}

/// Inflate a stored payload. `path` is only used for error context.
///
/// The declared size is compared against the result but never used to size
/// buffers.
pub fn decompress(payload: &[u8], path: &str) -> Result<Vec<u8>> {
    if !is_compressed(payload) {
        return Err(CfsiError::BadCompressedData {
            path: path.to_string(),
        });
    }
    let declared = (&payload[..SIZE_PREFIX_LEN]).read_u32::<LittleEndian>()?;

    let mut out = Vec::new();
    GzDecoder::new(&payload[SIZE_PREFIX_LEN..])
        .read_to_end(&mut out)
        .map_err(|source| CfsiError::InflateError {
            path: path.to_string(),
            source,
        })?;

    if out.len() as u64 != u64::from(declared) {
        warn!(
            "{path}: declared {declared} bytes but inflated {} bytes",
            out.len()
        );
    }
    debug!("{path}: inflated {} -> {} bytes", payload.len(), out.len());
    Ok(out)
}

/// Gzip `raw` and put the 4-byte inflated length in front.
pub fn compress(raw: &[u8], level: u32) -> Result<Vec<u8>> {
    let raw_len = u32::try_from(raw.len()).map_err(|_| CfsiError::ValueTooLarge {
        what: "uncompressed size",
        value: raw.len() as u64,
    })?;

    let mut out = Vec::with_capacity(raw.len() / 2 + 32);
    out.write_u32::<LittleEndian>(raw_len)?;
    let mut encoder = GzEncoder::new(out, Compression::new(level));
    encoder.write_all(raw)?;
    Ok(encoder.finish()?)
}

/// Which files the packer stores compressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionPolicy {
    extensions: Vec<String>,
    level: u32,
}

impl CompressionPolicy {
    /// Policy over an explicit extension list (without dots).
    pub fn new<I, S>(extensions: I, level: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            level: level.min(9),
        }
    }

    /// Never compress anything.
    pub fn none() -> Self {
        Self::new(std::iter::empty::<&str>(), DEFAULT_LEVEL)
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn should_compress(&self, name: &str) -> bool {
        extension_of(name).is_some_and(|ext| self.extensions.contains(&ext))
    }
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSED_EXTENSIONS, DEFAULT_LEVEL)
    }
}
