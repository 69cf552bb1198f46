//! Error types for CFSI parsing, extraction and packing

use thiserror::Error;

/// Result type for CFSI operations
pub type Result<T> = std::result::Result<T, CfsiError>;

/// CFSI error types
#[derive(Error, Debug)]
pub enum CfsiError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed folder/file table
    #[error("Corrupt header at {context}: {source}")]
    CorruptHeader {
        context: String,
        #[source]
        source: Box<CfsiError>,
    },

    /// Input ended before a field could be read
    #[error("Truncated input: needed {needed} bytes at offset {offset}")]
    TruncatedInput { offset: u64, needed: u64 },

    /// Payload flagged as compressed does not carry the gzip magic
    #[error("Bad compressed data in {path}: gzip magic not found")]
    BadCompressedData { path: String },

    /// Gzip stream failed to inflate
    #[error("Inflate failed for {path}: {source}")]
    InflateError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// One or more files referenced by a repack are missing on disk
    #[error("Missing source file(s): {}", paths.join(", "))]
    MissingSourceFile { paths: Vec<String> },

    /// Name does not fit the single-byte length prefix
    #[error("Path too long ({len} bytes, max 255): {path}")]
    PathTooLong { path: String, len: usize },

    /// Value does not fit its on-disk field
    #[error("{what} out of range: {value}")]
    ValueTooLarge { what: &'static str, value: u64 },

    /// Entry path would escape the extraction root
    #[error("Unsafe entry path: {0}")]
    UnsafePath(String),

    /// Re-encoded payload disagrees with a reused header
    #[error("Size mismatch for {path}: header records {expected} bytes, payload has {actual}")]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },

    /// Name holds a character outside the single-byte range
    #[error("Name cannot be stored in an archive: {path}")]
    UnencodableName { path: String },

    /// Manifest entries disagree with the header captured alongside them
    #[error("Manifest does not match its captured header: {0}")]
    ManifestMismatch(String),

    /// Entry-list side channel could not be read or written
    #[error("Manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    /// Operation stopped by a cancellation token
    #[error("Operation cancelled")]
    Cancelled,
}

impl CfsiError {
    /// Wrap a header-level failure with the position it occurred at.
    pub(crate) fn corrupt_header(context: impl Into<String>, source: CfsiError) -> Self {
        Self::CorruptHeader {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// True when the error only means "not enough bytes were available".
    pub(crate) fn is_truncation(&self) -> bool {
        match self {
            Self::TruncatedInput { .. } => true,
            Self::CorruptHeader { source, .. } => source.is_truncation(),
            _ => false,
        }
    }
}
