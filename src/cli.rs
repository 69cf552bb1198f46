use clap::Parser;
use std::path::{Path, PathBuf};

use crate::cfsi::compression::{DEFAULT_COMPRESSED_EXTENSIONS, DEFAULT_LEVEL};
use crate::cfsi::{CompressionPolicy, FolderPadding, FormatOptions, VINT_MARKERS};

#[derive(Parser, Debug)]
#[command(name = "cfsi")]
#[command(version)]
#[command(about = "Extract and repack CFSI game archives", long_about = None)]
#[command(after_help = "Examples:\n  \
  cfsi data.cfsi                       extract everything to data.cfsi_extracted\n  \
  cfsi -l data.cfsi                    list entries\n  \
  cfsi data.cfsi --manifest data.json  extract and record the entry table\n  \
  cfsi data.cfsi_extracted --manifest data.json --reuse-header\n                                       \
  repack against the original header")]
pub struct Cli {
    /// Archive to extract, or directory to pack
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Entries to extract (default: all)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// List entries (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely (offsets, sizes, compression)
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Extract entries to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract entries into exdir; when packing, the directory the archive is written to
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<PathBuf>,

    /// Exclude entries that follow
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Junk paths (do not make directories)
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Archive written when packing a directory
    #[arg(long = "out", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Entry table JSON: written on extraction, read when packing
    #[arg(long, value_name = "FILE")]
    pub manifest: Option<PathBuf>,

    /// Reuse the header captured in --manifest verbatim when packing
    #[arg(long, requires = "manifest")]
    pub reuse_header: bool,

    /// Extraction worker threads
    #[arg(long, default_value_t = 1, value_name = "N")]
    pub threads: usize,

    /// Marker byte written before two-byte VINTs (0xF8 or 0xFC)
    #[arg(long, value_parser = parse_vint_marker, default_value = "0xFC")]
    pub vint_marker: u8,

    /// Align the first payload of each folder to N bytes when packing
    #[arg(long, value_name = "N")]
    pub folder_align: Option<u64>,

    /// Extension stored compressed when packing (repeatable, replaces the default list)
    #[arg(long = "compress-ext", value_name = "EXT")]
    pub compress_ext: Vec<String>,

    /// Gzip level for compressed entries
    #[arg(long, default_value_t = DEFAULT_LEVEL, value_parser = clap::value_parser!(u32).range(0..=9))]
    pub level: u32,
}

fn parse_vint_marker(s: &str) -> Result<u8, String> {
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse::<u8>(),
    }
    .map_err(|e| e.to_string())?;

    if !VINT_MARKERS.contains(&value) {
        return Err("must be 0xF8 or 0xFC".to_string());
    }
    Ok(value)
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }

    pub fn format_options(&self) -> FormatOptions {
        FormatOptions {
            vint_marker: self.vint_marker,
            folder_padding: self
                .folder_align
                .map_or(FolderPadding::None, FolderPadding::AlignTo),
            ..FormatOptions::default()
        }
    }

    pub fn compression_policy(&self) -> CompressionPolicy {
        if self.compress_ext.is_empty() {
            return CompressionPolicy::new(DEFAULT_COMPRESSED_EXTENSIONS, self.level);
        }
        CompressionPolicy::new(&self.compress_ext, self.level)
    }

    /// Where extracted files go: `-d`, or `<archive>_extracted`.
    pub fn extract_root(&self) -> PathBuf {
        self.extract_dir
            .clone()
            .unwrap_or_else(|| suffixed(&self.input, "_extracted"))
    }

    /// Where a packed archive goes: `--out`, otherwise `X.repacked` for a
    /// directory named `X_extracted` and `<dir>.cfsi` for anything else,
    /// placed in `-d` when given and next to the input otherwise.
    pub fn pack_output(&self) -> PathBuf {
        if let Some(output) = &self.output {
            return output.clone();
        }
        let name = self
            .input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let default = match name.strip_suffix("_extracted") {
            Some(stem) if !stem.is_empty() => self.input.with_file_name(format!("{stem}.repacked")),
            _ => suffixed(&self.input, ".cfsi"),
        };
        match (&self.extract_dir, default.file_name()) {
            (Some(dir), Some(file)) => dir.join(file),
            _ => default,
        }
    }
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let trimmed = path
        .to_string_lossy()
        .trim_end_matches(['/', '\\'])
        .to_string();
    PathBuf::from(format!("{trimmed}{suffix}"))
}
