use std::path::{Component, Path, PathBuf};

use super::error::{CfsiError, Result};

/// Sentinel bytes that announce a two-byte VINT. Both are accepted on read.
pub const VINT_MARKERS: [u8; 2] = [0xF8, 0xFC];

/// Marker written by default when a VINT needs the two-byte form.
pub const DEFAULT_VINT_MARKER: u8 = 0xFC;

/// Values below this are written as a single byte.
pub const VINT_SINGLE_BYTE_LIMIT: u32 = 0xF8;

/// On-disk offsets are stored divided by this factor.
pub const OFFSET_SCALE: u64 = 16;

/// Data section and payload alignment.
pub const ALIGNMENT: u64 = 16;

/// Folder name used for entries stored directly under the archive root.
pub const ROOT_FOLDER: &str = "\0";

/// Longest name the single-byte length prefix can describe.
pub const MAX_NAME_LEN: usize = 255;

/// How the running data offset behaves when the packer crosses a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FolderPadding {
    /// Payloads follow each other with only the per-payload alignment.
    #[default]
    None,
    /// Align the first payload of every folder after the first to `n` bytes.
    AlignTo(u64),
}

/// Format-revision knobs.
///
/// Revisions of the format disagree on the VINT marker, the offset unit and
/// whether folders are padded apart. Everything that varies lives here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    /// Marker written in front of two-byte VINTs.
    pub vint_marker: u8,
    /// Multiplier applied to the stored offset field.
    pub offset_scale: u64,
    /// Alignment of the data section and of every payload.
    pub alignment: u64,
    /// Extra alignment between folders when packing.
    pub folder_padding: FolderPadding,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            vint_marker: DEFAULT_VINT_MARKER,
            offset_scale: OFFSET_SCALE,
            alignment: ALIGNMENT,
            folder_padding: FolderPadding::None,
        }
    }
}

/// One stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfsiEntry {
    /// Base file name
    pub name: String,
    /// Folder as stored in the header, forward slashes, empty for the root
    pub folder: String,
    /// Full forward-slash path inside the archive
    pub path: String,
    /// Byte offset relative to the data section start
    pub offset: u64,
    /// Stored payload length, including the size prefix when compressed
    pub size: u32,
    /// Payload carries a size prefix followed by a gzip stream
    pub compressed: bool,
}

impl CfsiEntry {
    pub fn new(folder: &str, name: &str, offset: u64, size: u32) -> Self {
        let folder = normalize_folder(folder);
        let path = join_path(&folder, name);
        Self {
            name: name.to_string(),
            folder,
            path,
            offset,
            size,
            compressed: false,
        }
    }

    /// Lowercased final extension of the entry name.
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.name)
    }

    /// Where this entry lands below `root` on the host filesystem.
    pub fn host_path(&self, root: &Path) -> Result<PathBuf> {
        host_path(root, &self.path)
    }
}

/// True for the folder spellings that mean "archive root".
pub fn is_root_folder(folder: &str) -> bool {
    matches!(folder, "" | "/" | "\\" | ROOT_FOLDER)
}

/// Forward slashes, root spellings collapsed to the empty string.
pub fn normalize_folder(folder: &str) -> String {
    if is_root_folder(folder) {
        return String::new();
    }
    folder.replace('\\', "/")
}

/// Join a stored folder and a file name into an archive path.
pub fn join_path(folder: &str, name: &str) -> String {
    if folder.is_empty() {
        name.to_string()
    } else if folder.ends_with('/') {
        format!("{folder}{name}")
    } else {
        format!("{folder}/{name}")
    }
}

/// Split an archive path into `(folder, name)` at the last separator.
pub fn split_path(path: &str) -> (String, String) {
    let path = path.replace('\\', "/");
    match path.rsplit_once('/') {
        Some((folder, name)) => (normalize_folder(folder), name.to_string()),
        None => (String::new(), path),
    }
}

pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

/// Translate a forward-slash archive path into a host path below `root`,
/// refusing anything that would escape it.
pub fn host_path(root: &Path, archive_path: &str) -> Result<PathBuf> {
    let mut out = root.to_path_buf();
    let mut pushed = false;
    for part in archive_path.split(['/', '\\']).filter(|p| !p.is_empty()) {
        let mut components = Path::new(part).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) if !part.contains(':') => out.push(part),
            _ => return Err(CfsiError::UnsafePath(archive_path.to_string())),
        }
        pushed = true;
    }
    if !pushed {
        return Err(CfsiError::UnsafePath(archive_path.to_string()));
    }
    Ok(out)
}
