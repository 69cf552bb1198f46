//! # cfsi
//!
//! Extract and repack CFSI game archives.
//!
//! A CFSI archive starts with a table of folders and files, followed by a
//! 16-byte aligned data section holding each file's payload. Some payloads
//! are gzip-compressed behind a 4-byte size prefix; this crate detects and
//! inflates them transparently, and can write a folder tree back into an
//! archive the game can load.
//!
//! ## Features
//!
//! - Parse the folder/file table without loading payloads into memory
//! - Extract single entries or whole archives, optionally in parallel
//! - Repack a directory tree, compressing the file types the game expects
//!   compressed
//! - Record the entry table as JSON and repack against the captured header
//!   for byte-identical round trips
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use cfsi::{CfsiArchive, ExtractOptions, LocalFileReader};
//!
//! fn main() -> anyhow::Result<()> {
//!     let reader = Arc::new(LocalFileReader::new(Path::new("data.cfsi"))?);
//!     let archive = CfsiArchive::open(reader)?;
//!
//!     for entry in archive.entries() {
//!         println!("{} ({} bytes)", entry.path, entry.size);
//!     }
//!
//!     archive.extract_all(Path::new("data_extracted"), &ExtractOptions::default())?;
//!     Ok(())
//! }
//! ```

pub mod cfsi;
pub mod cli;
pub mod io;

pub use cfsi::{
    CancellationToken, CfsiArchive, CfsiEntry, CfsiError, CompressionPolicy, ExtractOptions,
    ExtractReport, FormatOptions, Manifest, PackOptions, PackSource, Packer,
};
pub use cli::Cli;
pub use io::{LocalFileReader, MemoryReader, ReadAt};
