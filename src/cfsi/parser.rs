//! Folder/file table parser.
//!
//! ## Layout
//!
//! ```text
//! folderCount : VINT
//! per folder  : name (length-prefixed, "\0" = root), fileCount (VINT)
//! per file    : name (length-prefixed), offset / 16 (u32), size (u32)
//! ```
//!
//! The table is followed by zero padding up to the data section, which
//! starts at the next 16-byte boundary. Parsing is a single forward pass over
//! a byte slice; nothing here reads from a live source.

use std::io::Cursor;
use tracing::debug;

use super::codec::{align, read_string, read_u32, read_vint};
use super::error::{CfsiError, Result};
use super::structures::{CfsiEntry, FormatOptions, normalize_folder};

/// Outcome of parsing the folder/file table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHeader {
    /// Entries in header order (folder-major, then file order)
    pub entries: Vec<CfsiEntry>,
    /// Bytes consumed by the table, excluding padding
    pub header_len: u64,
    /// Aligned start of the data section
    pub data_section_start: u64,
}

/// Parse the header at the start of `bytes`.
///
/// `compressed` is left unset on every entry; it depends on payload bytes the
/// header does not cover.
///
/// # Errors
///
/// Any short read becomes `CorruptHeader`, carrying the folder or entry it
/// happened in and the underlying `TruncatedInput`.
pub fn parse_header(bytes: &[u8], options: &FormatOptions) -> Result<ParsedHeader> {
    let mut cursor = Cursor::new(bytes);

    let folder_count = read_vint(&mut cursor)
        .map_err(|e| CfsiError::corrupt_header("folder count", e))?;
    debug!("Folder count: {folder_count}");

    let mut entries = Vec::new();
    for folder_index in 0..folder_count {
        let raw_folder = read_string(&mut cursor)
            .map_err(|e| CfsiError::corrupt_header(format!("folder #{folder_index} name"), e))?;
        let folder = normalize_folder(&raw_folder);

        let file_count = read_vint(&mut cursor).map_err(|e| {
            CfsiError::corrupt_header(format!("folder #{folder_index} '{folder}' file count"), e)
        })?;
        debug!("Folder '{folder}': {file_count} files");

        for file_index in 0..file_count {
            let context = || format!("folder '{folder}' file #{file_index}");
            let name =
                read_string(&mut cursor).map_err(|e| CfsiError::corrupt_header(context(), e))?;
            let scaled_offset =
                read_u32(&mut cursor).map_err(|e| CfsiError::corrupt_header(context(), e))?;
            let size =
                read_u32(&mut cursor).map_err(|e| CfsiError::corrupt_header(context(), e))?;

            let offset = u64::from(scaled_offset) * options.offset_scale;
            entries.push(CfsiEntry::new(&folder, &name, offset, size));
        }
    }

    let header_len = cursor.position();
    let data_section_start = align(header_len, options.alignment);
    debug!("Header: {header_len} bytes, data section at {data_section_start}");

    Ok(ParsedHeader {
        entries,
        header_len,
        data_section_start,
    })
}
