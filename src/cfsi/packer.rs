//! Archive writer.
//!
//! Packing happens in two phases. Planning scans the input, checks every
//! source file exists, encodes compressed payloads and fixes the layout;
//! nothing is written until it succeeds. Writing then streams the header and
//! payloads into a temporary file next to the output, which is renamed into
//! place only when complete.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::cancel::CancellationToken;
use super::codec::{align, padding, write_folder_name, write_string, write_vint, write_zeros};
use super::compression::{CompressionPolicy, compress};
use super::error::{CfsiError, Result};
use super::manifest::Manifest;
use super::parser::parse_header;
use super::structures::{FolderPadding, FormatOptions, host_path, join_path, split_path};

/// Options for a repack.
#[derive(Debug, Clone, Default)]
pub struct PackOptions {
    pub format: FormatOptions,
    /// Extensions stored gzip-compressed when packing a directory
    pub compression: CompressionPolicy,
    /// Write a manifest's captured header verbatim and keep its offsets
    pub reuse_header: bool,
    pub cancel: CancellationToken,
}

/// What to pack.
#[derive(Debug, Clone, Copy)]
pub enum PackSource<'a> {
    /// Every file below a directory; folders follow the directory tree.
    Directory(&'a Path),
    /// The entries of a manifest, in recorded order, with contents taken
    /// from `content_root`.
    EntryList {
        manifest: &'a Manifest,
        content_root: &'a Path,
    },
}

/// Shape of a written archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackSummary {
    pub folders: usize,
    pub entries: usize,
    pub data_section_start: u64,
    pub total_size: u64,
}

/// A file to be packed, before encoding.
struct Input {
    folder: String,
    name: String,
    source: PathBuf,
    compress: bool,
    /// Offset and size from a reused header
    recorded: Option<(u64, u32)>,
}

enum Payload {
    /// Streamed from the source file at write time
    Raw { len: u64 },
    /// Already encoded in memory
    Encoded(Vec<u8>),
}

struct PlannedFile {
    folder: String,
    name: String,
    source: PathBuf,
    payload: Payload,
    offset: u64,
    size: u32,
}

impl PlannedFile {
    fn path(&self) -> String {
        join_path(&self.folder, &self.name)
    }
}

struct Plan {
    header: Vec<u8>,
    data_section_start: u64,
    folders: usize,
    files: Vec<PlannedFile>,
}

/// Builds archives from a directory tree or a manifest.
#[derive(Debug, Clone, Default)]
pub struct Packer {
    options: PackOptions,
}

impl Packer {
    pub fn new(options: PackOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PackOptions {
        &self.options
    }

    /// Pack `source` into `output`.
    pub fn pack(&self, source: PackSource<'_>, output: &Path) -> Result<PackSummary> {
        self.pack_with_progress(source, output, |_| {})
    }

    /// Pack `source` into `output`, calling `on_entry` with each archive path
    /// as its payload is written.
    ///
    /// The output path only ever holds a complete archive: on any failure the
    /// temporary file is removed and `output` is left untouched.
    pub fn pack_with_progress<F>(
        &self,
        source: PackSource<'_>,
        output: &Path,
        on_entry: F,
    ) -> Result<PackSummary>
    where
        F: FnMut(&str),
    {
        let plan = self.plan(source)?;

        let parent = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        let summary = {
            let mut out = BufWriter::new(tmp.as_file_mut());
            let summary = self.write_plan(&plan, &mut out, on_entry)?;
            out.flush()?;
            summary
        };
        tmp.as_file().sync_all()?;
        tmp.persist(output).map_err(|e| CfsiError::Io(e.error))?;

        info!(
            "Packed {} entries in {} folders into {} ({} bytes)",
            summary.entries,
            summary.folders,
            output.display(),
            summary.total_size
        );
        Ok(summary)
    }

    /// Pack `source` into any writer.
    pub fn pack_to_writer<W: Write>(&self, source: PackSource<'_>, out: &mut W) -> Result<PackSummary> {
        let plan = self.plan(source)?;
        self.write_plan(&plan, out, |_| {})
    }

    fn plan(&self, source: PackSource<'_>) -> Result<Plan> {
        let (inputs, reused_header) = match source {
            PackSource::Directory(root) => (self.scan_directory(root)?, None),
            PackSource::EntryList {
                manifest,
                content_root,
            } => {
                let reuse = self.options.reuse_header && manifest.has_header();
                if reuse {
                    check_reused_header(manifest, &self.options.format)?;
                }
                let inputs = manifest_inputs(manifest, content_root, reuse)?;
                (inputs, reuse.then(|| manifest.header.clone()))
            }
        };

        let missing: Vec<String> = inputs
            .iter()
            .filter(|input| !input.source.is_file())
            .map(|input| input.source.display().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(CfsiError::MissingSourceFile { paths: missing });
        }

        let mut files = Vec::with_capacity(inputs.len());
        for input in inputs {
            self.options.cancel.check()?;
            files.push(self.encode(input)?);
        }

        let format = &self.options.format;
        match reused_header {
            Some(header) => {
                let folders = count_folders(&files);
                Ok(Plan {
                    data_section_start: align(header.len() as u64, format.alignment),
                    header,
                    folders,
                    files,
                })
            }
            None => {
                let mut groups = group_by_folder(files);
                layout(&mut groups, format);
                let header = build_header(&groups, format)?;
                Ok(Plan {
                    data_section_start: align(header.len() as u64, format.alignment),
                    header,
                    folders: groups.len(),
                    files: groups.into_iter().flat_map(|(_, files)| files).collect(),
                })
            }
        }
    }

    fn scan_directory(&self, root: &Path) -> Result<Vec<Input>> {
        let mut inputs = Vec::new();
        for ent in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let ent = ent.map_err(|e| {
                let msg = e.to_string();
                CfsiError::Io(e.into_io_error().unwrap_or_else(|| io::Error::other(msg)))
            })?;
            if !ent.file_type().is_file() {
                continue;
            }

            let rel = relative_archive_path(root, ent.path())?;
            let (folder, name) = split_path(&rel);
            let compress = self.options.compression.should_compress(&name);
            inputs.push(Input {
                folder,
                name,
                source: ent.path().to_path_buf(),
                compress,
                recorded: None,
            });
        }
        debug!("Scanned {} files below {}", inputs.len(), root.display());
        Ok(inputs)
    }

    fn encode(&self, input: Input) -> Result<PlannedFile> {
        let path = join_path(&input.folder, &input.name);
        let (payload, stored_len) = if input.compress {
            let raw = fs::read(&input.source)?;
            let stored = compress(&raw, self.options.compression.level())?;
            debug!("{path}: compressed {} -> {} bytes", raw.len(), stored.len());
            let len = stored.len() as u64;
            (Payload::Encoded(stored), len)
        } else {
            let len = fs::metadata(&input.source)?.len();
            (Payload::Raw { len }, len)
        };

        let size = u32::try_from(stored_len).map_err(|_| CfsiError::ValueTooLarge {
            what: "entry size",
            value: stored_len,
        })?;

        let offset = match input.recorded {
            Some((offset, recorded_size)) => {
                if recorded_size != size {
                    return Err(CfsiError::SizeMismatch {
                        path,
                        expected: u64::from(recorded_size),
                        actual: u64::from(size),
                    });
                }
                offset
            }
            None => 0,
        };

        Ok(PlannedFile {
            folder: input.folder,
            name: input.name,
            source: input.source,
            payload,
            offset,
            size,
        })
    }

    fn write_plan<W, F>(&self, plan: &Plan, out: &mut W, mut on_entry: F) -> Result<PackSummary>
    where
        W: Write,
        F: FnMut(&str),
    {
        let alignment = self.options.format.alignment;

        out.write_all(&plan.header)?;
        let mut pos = plan.header.len() as u64;
        write_zeros(out, plan.data_section_start - pos)?;
        pos = plan.data_section_start;

        let mut order: Vec<&PlannedFile> = plan.files.iter().collect();
        order.sort_by_key(|file| file.offset);

        for file in order {
            self.options.cancel.check()?;

            let target = plan.data_section_start + file.offset;
            if target < pos {
                return Err(CfsiError::corrupt_header(
                    format!("entry '{}'", file.path()),
                    CfsiError::ValueTooLarge {
                        what: "overlapping offset",
                        value: file.offset,
                    },
                ));
            }
            write_zeros(out, target - pos)?;

            on_entry(&file.path());
            match &file.payload {
                Payload::Encoded(bytes) => out.write_all(bytes)?,
                Payload::Raw { len } => {
                    let src = File::open(&file.source)?;
                    let copied = io::copy(&mut src.take(*len), out)?;
                    if copied != *len {
                        return Err(CfsiError::SizeMismatch {
                            path: file.path(),
                            expected: *len,
                            actual: copied,
                        });
                    }
                }
            }

            pos = target + u64::from(file.size);
            let pad = padding(pos, alignment);
            write_zeros(out, pad)?;
            pos += pad;
        }

        let pad = padding(pos, alignment);
        write_zeros(out, pad)?;
        pos += pad;

        Ok(PackSummary {
            folders: plan.folders,
            entries: plan.files.len(),
            data_section_start: plan.data_section_start,
            total_size: pos,
        })
    }
}

fn manifest_inputs(manifest: &Manifest, content_root: &Path, reuse: bool) -> Result<Vec<Input>> {
    manifest
        .entries
        .iter()
        .map(|entry| {
            let (folder, name) = split_path(&entry.path);
            Ok(Input {
                source: host_path(content_root, &entry.path)?,
                folder,
                name,
                compress: entry.compressed,
                recorded: reuse.then_some((entry.offset, entry.size)),
            })
        })
        .collect()
}

/// Check that a captured header lists exactly the manifest's entries, in
/// order, at the recorded offsets and sizes.
fn check_reused_header(manifest: &Manifest, format: &FormatOptions) -> Result<()> {
    let parsed = parse_header(&manifest.header, format)?;
    if parsed.header_len != manifest.header.len() as u64 {
        return Err(CfsiError::corrupt_header(
            "captured header",
            CfsiError::ManifestMismatch(format!(
                "{} trailing bytes after the table",
                manifest.header.len() as u64 - parsed.header_len
            )),
        ));
    }
    if parsed.entries.len() != manifest.entries.len() {
        return Err(CfsiError::corrupt_header(
            "manifest entries",
            CfsiError::ManifestMismatch(format!(
                "header lists {} entries, manifest has {}",
                parsed.entries.len(),
                manifest.entries.len()
            )),
        ));
    }

    for (index, (stored, listed)) in parsed.entries.iter().zip(&manifest.entries).enumerate() {
        let detail = if stored.path != listed.path {
            format!("path '{}' recorded as '{}'", listed.path, stored.path)
        } else if stored.offset != listed.offset {
            format!("'{}' offset {} recorded as {}", listed.path, listed.offset, stored.offset)
        } else if stored.size != listed.size {
            format!("'{}' size {} recorded as {}", listed.path, listed.size, stored.size)
        } else {
            continue;
        };
        return Err(CfsiError::corrupt_header(
            format!("manifest entry #{index}"),
            CfsiError::ManifestMismatch(detail),
        ));
    }
    Ok(())
}

/// Forward-slash path of `file` relative to `root`.
fn relative_archive_path(root: &Path, file: &Path) -> Result<String> {
    let rel = file
        .strip_prefix(root)
        .map_err(|_| CfsiError::UnsafePath(file.display().to_string()))?;
    let parts = rel
        .components()
        .map(|c| {
            c.as_os_str()
                .to_str()
                .map(str::to_string)
                .ok_or_else(|| CfsiError::UnencodableName {
                    path: rel.display().to_string(),
                })
        })
        .collect::<Result<Vec<String>>>()?;
    Ok(parts.join("/"))
}

/// Group files by folder, folders in first-seen order, files in input order.
fn group_by_folder(files: Vec<PlannedFile>) -> Vec<(String, Vec<PlannedFile>)> {
    let mut groups: Vec<(String, Vec<PlannedFile>)> = Vec::new();
    for file in files {
        match groups.iter_mut().find(|(folder, _)| *folder == file.folder) {
            Some((_, members)) => members.push(file),
            None => groups.push((file.folder.clone(), vec![file])),
        }
    }
    groups
}

fn count_folders(files: &[PlannedFile]) -> usize {
    let mut seen: Vec<&str> = Vec::new();
    for file in files {
        if !seen.contains(&file.folder.as_str()) {
            seen.push(&file.folder);
        }
    }
    seen.len()
}

/// Assign data-section offsets: each payload starts where the previous one
/// ended, rounded up to the alignment.
fn layout(groups: &mut [(String, Vec<PlannedFile>)], format: &FormatOptions) {
    let mut offset = 0u64;
    for (index, (_, files)) in groups.iter_mut().enumerate() {
        if let FolderPadding::AlignTo(boundary) = format.folder_padding
            && index > 0
        {
            offset = align(offset, boundary);
        }
        for file in files {
            file.offset = offset;
            offset = align(offset + u64::from(file.size), format.alignment);
        }
    }
}

fn build_header(groups: &[(String, Vec<PlannedFile>)], format: &FormatOptions) -> Result<Vec<u8>> {
    let count = |what: &'static str, n: usize| {
        u32::try_from(n).map_err(|_| CfsiError::ValueTooLarge {
            what,
            value: n as u64,
        })
    };

    let mut header = Vec::new();
    write_vint(&mut header, count("folder count", groups.len())?, format.vint_marker)?;
    for (folder, files) in groups {
        write_folder_name(&mut header, folder)?;
        write_vint(&mut header, count("file count", files.len())?, format.vint_marker)?;
        for file in files {
            write_string(&mut header, &file.name)?;
            header.extend_from_slice(&scaled_offset(file.offset, format)?.to_le_bytes());
            header.extend_from_slice(&file.size.to_le_bytes());
        }
    }
    Ok(header)
}

fn scaled_offset(offset: u64, format: &FormatOptions) -> Result<u32> {
    let scale = format.offset_scale.max(1);
    if offset % scale != 0 {
        return Err(CfsiError::ValueTooLarge {
            what: "unscalable offset",
            value: offset,
        });
    }
    u32::try_from(offset / scale).map_err(|_| CfsiError::ValueTooLarge {
        what: "offset",
        value: offset,
    })
}
