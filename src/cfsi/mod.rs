//! CFSI archive parsing, extraction and repacking.
//!
//! ## Architecture
//!
//! - [`codec`]: VINTs, length-prefixed names and alignment arithmetic
//! - [`compression`]: gzip payload detection and coding
//! - [`parser`]: the folder/file table at the start of the archive
//! - [`CfsiArchive`]: an opened archive; reads and extracts entries
//! - [`Packer`]: writes a new archive from a directory or a [`Manifest`]
//!
//! ## Format Overview
//!
//! An archive is a folder/file table followed by a data section that starts
//! at the next 16-byte boundary. Every payload sits at a 16-byte aligned
//! offset inside the data section. Payloads of some file types are stored as
//! a 4-byte inflated length followed by a gzip member; everything else is
//! stored raw.
//!
//! ## Format Assumptions
//!
//! Revisions of the format differ in details that could not be pinned down
//! from shipped archives. [`FormatOptions`] collects them: the VINT marker
//! written (`0xFC`; `0xF8` is also accepted on read), the offset unit (16)
//! and optional extra padding between folders (off).

pub mod codec;
pub mod compression;
pub mod parser;

mod archive;
mod cancel;
mod error;
mod extractor;
mod manifest;
mod packer;
mod structures;

pub use archive::CfsiArchive;
pub use cancel::CancellationToken;
pub use compression::CompressionPolicy;
pub use error::{CfsiError, Result};
pub use extractor::{ExistingFile, ExtractOptions, ExtractReport};
pub use manifest::{Manifest, ManifestEntry};
pub use packer::{PackOptions, PackSource, PackSummary, Packer};
pub use parser::{ParsedHeader, parse_header};
pub use structures::*;
