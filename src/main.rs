//! Main entry point for the cfsi CLI application.
//!
//! Given an archive, lists or extracts it; given a directory, packs it back
//! into an archive.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use cfsi::cfsi::{ExistingFile, PackSummary};
use cfsi::{
    CfsiArchive, CfsiEntry, Cli, ExtractOptions, LocalFileReader, Manifest, PackOptions,
    PackSource, Packer, ReadAt,
};

/// Application entry point.
///
/// Dispatches on the input: a directory is packed, anything else is opened
/// as an archive.
fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if cli.input.is_dir() {
        return pack_directory(&cli);
    }

    if !cli.input.exists() {
        bail!("File {} doesn't exist", cli.input.display());
    }

    let reader = Arc::new(
        LocalFileReader::new(&cli.input)
            .with_context(|| format!("Cannot open {}", cli.input.display()))?,
    );
    let archive = CfsiArchive::open_with(reader, cli.format_options())
        .with_context(|| format!("Cannot read archive {}", cli.input.display()))?;

    process_archive(&archive, &cli)
}

/// Pack the input directory, from its tree or from a recorded manifest.
fn pack_directory(cli: &Cli) -> Result<()> {
    let output = cli.pack_output();
    let packer = Packer::new(PackOptions {
        format: cli.format_options(),
        compression: cli.compression_policy(),
        reuse_header: cli.reuse_header,
        ..PackOptions::default()
    });

    let manifest = match &cli.manifest {
        Some(path) => Some(
            Manifest::load(path)
                .with_context(|| format!("Cannot read manifest {}", path.display()))?,
        ),
        None => None,
    };
    let source = match &manifest {
        Some(manifest) => PackSource::EntryList {
            manifest,
            content_root: &cli.input,
        },
        None => PackSource::Directory(&cli.input),
    };

    if !cli.is_quiet() {
        println!("Packing {} -> {}", cli.input.display(), output.display());
    }
    let summary = packer
        .pack_with_progress(source, &output, |path| {
            if !cli.is_quiet() {
                println!("  packing: {path}");
            }
        })
        .with_context(|| format!("Packing {} failed", cli.input.display()))?;

    if !cli.is_very_quiet() {
        print_pack_summary(&summary);
    }
    Ok(())
}

fn print_pack_summary(summary: &PackSummary) {
    eprintln!(
        "{} entries in {} folders, data at {:#x}, {}",
        summary.entries,
        summary.folders,
        summary.data_section_start,
        format_size(summary.total_size)
    );
}

/// Process an opened archive based on CLI options.
///
/// - List mode (`-l` or `-v`): display archive contents
/// - Pipe mode (`-p`): write matching entries to stdout
/// - Extract mode: extract matching entries below the extraction root
fn process_archive<R: ReadAt>(archive: &CfsiArchive<R>, cli: &Cli) -> Result<()> {
    if cli.list || cli.verbose {
        list_entries(archive, cli.verbose);
        return Ok(());
    }

    let selected: Vec<CfsiEntry> = archive
        .entries()
        .iter()
        .filter(|e| is_selected(e, cli))
        .cloned()
        .collect();

    if cli.pipe {
        return pipe_entries(archive, &selected);
    }

    let root = cli.extract_root();
    let options = ExtractOptions {
        threads: cli.threads,
        junk_paths: cli.junk_paths,
        existing: if cli.overwrite && !cli.never_overwrite {
            ExistingFile::Overwrite
        } else {
            ExistingFile::Skip
        },
        ..ExtractOptions::default()
    };

    let report = archive.extract_entries(&selected, &root, &options, |entry| {
        if !cli.is_quiet() {
            println!("  extracting: {}", entry.path);
        }
    })?;

    if !cli.is_quiet() {
        for path in &report.skipped_existing {
            if cli.never_overwrite {
                eprintln!("Skipping: {path} (file exists)");
            } else {
                eprintln!("Skipping: {path} (use -o to overwrite)");
            }
        }
    }

    if let Some(path) = &cli.manifest {
        Manifest::from_archive(archive)
            .save(path)
            .with_context(|| format!("Cannot write manifest {}", path.display()))?;
        if !cli.is_quiet() {
            println!("Entry table written to {}", path.display());
        }
    }

    if !report.is_clean() {
        for (path, err) in &report.failed {
            eprintln!("Failed: {path}: {err}");
        }
        bail!("{} of {} entries failed", report.failed.len(), selected.len());
    }
    Ok(())
}

/// Apply positional selections and `-x` exclusions.
fn is_selected(entry: &CfsiEntry, cli: &Cli) -> bool {
    if !cli.files.is_empty() && !cli.files.iter().any(|f| selects(f, entry)) {
        return false;
    }
    !cli.exclude.iter().any(|x| selects(x, entry))
}

/// One selector: an exact path or file name, a folder ending in `/`, or a
/// wildcard pattern.
fn selects(selector: &str, entry: &CfsiEntry) -> bool {
    if selector.contains(['*', '?']) {
        return path_matches(selector, &entry.path);
    }
    if selector.ends_with('/') {
        return entry.path.starts_with(selector);
    }
    entry.path == selector || entry.name == selector
}

/// Match an archive path against a wildcard pattern.
///
/// `*` and `?` stay inside one path component; `**` also crosses `/`. A
/// pattern without `/` is matched against the file name alone.
fn path_matches(pattern: &str, path: &str) -> bool {
    let target = if pattern.contains('/') {
        path
    } else {
        path.rsplit_once('/').map_or(path, |(_, name)| name)
    };
    let pattern: Vec<char> = pattern.chars().collect();
    let target: Vec<char> = target.chars().collect();
    wildcard(&pattern, &target)
}

fn wildcard(pattern: &[char], text: &[char]) -> bool {
    match pattern {
        [] => text.is_empty(),
        ['*', '*', rest @ ..] => (0..=text.len()).any(|i| wildcard(rest, &text[i..])),
        ['*', rest @ ..] => {
            let component = text.iter().position(|&c| c == '/').unwrap_or(text.len());
            (0..=component).any(|i| wildcard(rest, &text[i..]))
        }
        ['?', rest @ ..] => matches!(text.first(), Some(&c) if c != '/') && wildcard(rest, &text[1..]),
        [p, rest @ ..] => text.first() == Some(p) && wildcard(rest, &text[1..]),
    }
}

/// List entries in the archive.
///
/// `-l` prints paths only; `-v` prints a table of offset, stored size and
/// compression, followed by totals.
fn list_entries<R: ReadAt>(archive: &CfsiArchive<R>, verbose: bool) {
    if !verbose {
        for entry in archive.entries() {
            println!("{}", entry.path);
        }
        return;
    }

    println!("{:>10}  {:>10}  {:>4}  Name", "Offset", "Size", "Gzip");
    println!("{}", "-".repeat(60));

    let mut total_stored = 0u64;
    let mut compressed = 0usize;
    for entry in archive.entries() {
        println!(
            "{:>#10x}  {:>10}  {:>4}  {}",
            archive.payload_offset(entry),
            entry.size,
            if entry.compressed { "yes" } else { "no" },
            entry.path
        );
        total_stored += u64::from(entry.size);
        compressed += usize::from(entry.compressed);
    }

    println!("{}", "-".repeat(60));
    println!(
        "{:>10}  {:>10}  {:>4}  {} files ({} compressed), data at {:#x}",
        "",
        total_stored,
        "",
        archive.entries().len(),
        compressed,
        archive.data_section_start()
    );
}

/// Write entry contents to stdout, with a name marker when there are several.
fn pipe_entries<R: ReadAt>(archive: &CfsiArchive<R>, entries: &[CfsiEntry]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    let show_names = entries.len() > 1;
    for entry in entries {
        if show_names {
            writeln!(stdout, "--- {} ---", entry.path)?;
        }
        let data = archive.read_entry(entry)?;
        stdout.write_all(&data)?;
    }
    stdout.flush()?;
    Ok(())
}

/// Human-readable byte count for the pack summary.
fn format_size(size: u64) -> String {
    const UNITS: [&str; 3] = ["KiB", "MiB", "GiB"];
    if size < 1024 {
        return format!("{size} bytes");
    }
    let mut value = size as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}
