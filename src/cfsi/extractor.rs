use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::io::ReadAt;

use super::archive::CfsiArchive;
use super::cancel::CancellationToken;
use super::error::{CfsiError, Result};
use super::structures::{CfsiEntry, host_path};

/// What to do when the destination file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExistingFile {
    #[default]
    Overwrite,
    Skip,
}

/// Options for bulk extraction.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Worker threads; 0 or 1 extracts sequentially
    pub threads: usize,
    /// Drop the folder part of every entry path
    pub junk_paths: bool,
    pub existing: ExistingFile,
    pub cancel: CancellationToken,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            junk_paths: false,
            existing: ExistingFile::Overwrite,
            cancel: CancellationToken::new(),
        }
    }
}

/// Per-entry outcome of a bulk extraction.
#[derive(Debug, Default)]
pub struct ExtractReport {
    /// Paths written
    pub extracted: Vec<String>,
    /// Paths left alone because the destination existed
    pub skipped_existing: Vec<String>,
    /// Paths that failed, with the reason
    pub failed: Vec<(String, CfsiError)>,
}

impl ExtractReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

enum Outcome {
    Extracted,
    SkippedExisting,
    Failed(CfsiError),
}

impl<R: ReadAt> CfsiArchive<R> {
    /// Extract a single entry to an explicit host path.
    pub fn extract_to_file(&self, entry: &CfsiEntry, output_path: &Path) -> Result<()> {
        if let Some(parent) = output_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let data = self.read_entry(entry)?;
        fs::write(output_path, &data)?;
        debug!("Wrote {} ({} bytes)", output_path.display(), data.len());
        Ok(())
    }

    /// Host path an entry is written to below `root`.
    pub fn output_path(&self, entry: &CfsiEntry, root: &Path, junk_paths: bool) -> Result<PathBuf> {
        if junk_paths {
            return host_path(root, &entry.name);
        }
        entry.host_path(root)
    }

    /// Extract every entry below `root`, preserving archive paths.
    pub fn extract_all(&self, root: &Path, options: &ExtractOptions) -> Result<ExtractReport> {
        self.extract_entries(self.entries(), root, options, |_| {})
    }

    /// Extract `entries` below `root`.
    ///
    /// A failing entry is recorded in the report and does not stop the
    /// others. Cancellation is checked between entries and aborts the whole
    /// run with `Cancelled`. `on_entry` is called before each entry is
    /// written, possibly from worker threads.
    pub fn extract_entries<F>(
        &self,
        entries: &[CfsiEntry],
        root: &Path,
        options: &ExtractOptions,
        on_entry: F,
    ) -> Result<ExtractReport>
    where
        F: Fn(&CfsiEntry) + Sync,
    {
        fs::create_dir_all(root)?;

        let run = |entry: &CfsiEntry| -> Option<Outcome> {
            if options.cancel.is_cancelled() {
                return None;
            }
            Some(self.extract_one(entry, root, options, &on_entry))
        };

        let outcomes: Vec<Option<Outcome>> = if options.threads > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(options.threads)
                .build()
                .map_err(std::io::Error::other)?;
            pool.install(|| entries.par_iter().map(run).collect())
        } else {
            let mut outcomes = Vec::with_capacity(entries.len());
            for entry in entries {
                let outcome = run(entry);
                let stop = outcome.is_none();
                outcomes.push(outcome);
                if stop {
                    break;
                }
            }
            outcomes
        };

        options.cancel.check()?;

        let mut report = ExtractReport::default();
        for (entry, outcome) in entries.iter().zip(outcomes) {
            match outcome {
                Some(Outcome::Extracted) => report.extracted.push(entry.path.clone()),
                Some(Outcome::SkippedExisting) => {
                    report.skipped_existing.push(entry.path.clone());
                }
                Some(Outcome::Failed(e)) => {
                    warn!("Failed to extract {}: {e}", entry.path);
                    report.failed.push((entry.path.clone(), e));
                }
                None => return Err(CfsiError::Cancelled),
            }
        }

        info!(
            "Extracted {} entries ({} skipped, {} failed) to {}",
            report.extracted.len(),
            report.skipped_existing.len(),
            report.failed.len(),
            root.display()
        );
        Ok(report)
    }

    fn extract_one<F>(
        &self,
        entry: &CfsiEntry,
        root: &Path,
        options: &ExtractOptions,
        on_entry: &F,
    ) -> Outcome
    where
        F: Fn(&CfsiEntry) + Sync,
    {
        let output_path = match self.output_path(entry, root, options.junk_paths) {
            Ok(path) => path,
            Err(e) => return Outcome::Failed(e),
        };

        if options.existing == ExistingFile::Skip && output_path.exists() {
            return Outcome::SkippedExisting;
        }

        on_entry(entry);
        match self.extract_to_file(entry, &output_path) {
            Ok(()) => Outcome::Extracted,
            Err(e) => Outcome::Failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Folder "dir" with "a.txt" and "../evil", root folder with "b.txt".
    fn archive() -> CfsiArchive<MemoryReader> {
        let mut data = vec![2u8];
        data.extend_from_slice(b"\x03dir\x02");
        data.extend_from_slice(b"\x05a.txt");
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&3u32.to_le_bytes());
        data.extend_from_slice(b"\x07../evil");
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(b"\x01\x00\x01\x05b.txt");
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&2u32.to_le_bytes());
        let start = data.len().next_multiple_of(16);
        data.resize(start, 0);
        data.extend_from_slice(b"aaa");
        data.resize(start + 16, 0);
        data.push(b'e');
        data.resize(start + 32, 0);
        data.extend_from_slice(b"bb");
        data.resize(start + 48, 0);
        CfsiArchive::open(Arc::new(MemoryReader::new(data))).unwrap()
    }

    #[test]
    fn extract_all_isolates_failures() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = archive();
        let report = archive
            .extract_all(tmp.path(), &ExtractOptions::default())
            .unwrap();

        assert_eq!(report.extracted, ["dir/a.txt", "b.txt"]);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].1, CfsiError::UnsafePath(_)));
        assert_eq!(fs::read(tmp.path().join("dir").join("a.txt")).unwrap(), b"aaa");
        assert_eq!(fs::read(tmp.path().join("b.txt")).unwrap(), b"bb");
        assert!(!tmp.path().parent().unwrap().join("evil").exists());
    }

    #[test]
    fn corrupt_gzip_does_not_stop_others() {
        let mut data = vec![1u8, 1, 0, 2];
        data.extend_from_slice(b"\x07bad.orb");
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&10u32.to_le_bytes());
        data.extend_from_slice(b"\x08good.txt");
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&2u32.to_le_bytes());
        data.resize(48, 0);
        data.extend_from_slice(&[4, 0, 0, 0, 0x1F, 0x8B, 0xFF, 0xFF, 0xFF, 0xFF]);
        data.resize(64, 0);
        data.extend_from_slice(b"ok");
        data.resize(80, 0);
        let archive = CfsiArchive::open(Arc::new(MemoryReader::new(data))).unwrap();
        assert!(archive.entries()[0].compressed);

        let tmp = tempfile::tempdir().unwrap();
        let report = archive
            .extract_all(tmp.path(), &ExtractOptions::default())
            .unwrap();
        assert_eq!(report.extracted, ["good.txt"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "bad.orb");
        assert!(matches!(report.failed[0].1, CfsiError::InflateError { .. }));
        assert_eq!(fs::read(tmp.path().join("good.txt")).unwrap(), b"ok");
    }

    #[test]
    fn parallel_matches_sequential() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = archive();
        let options = ExtractOptions {
            threads: 4,
            ..ExtractOptions::default()
        };
        let calls = AtomicUsize::new(0);
        let report = archive
            .extract_entries(archive.entries(), tmp.path(), &options, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(report.extracted, ["dir/a.txt", "b.txt"]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn skip_existing_and_junk_paths() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.txt"), b"keep").unwrap();
        let archive = archive();
        let options = ExtractOptions {
            junk_paths: true,
            existing: ExistingFile::Skip,
            ..ExtractOptions::default()
        };
        let report = archive.extract_all(tmp.path(), &options).unwrap();
        assert_eq!(report.skipped_existing, ["dir/a.txt"]);
        assert_eq!(fs::read(tmp.path().join("a.txt")).unwrap(), b"keep");
        assert!(tmp.path().join("b.txt").exists());
        assert!(!tmp.path().join("dir").exists());
    }

    #[test]
    fn cancelled_before_start() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = archive();
        let options = ExtractOptions::default();
        options.cancel.cancel();
        assert!(matches!(
            archive.extract_all(tmp.path(), &options),
            Err(CfsiError::Cancelled)
        ));
        assert!(!tmp.path().join("b.txt").exists());
    }
}
