//! JSON mirror of an archive's entry table.
//!
//! Written next to an extraction so the table can be edited by hand, and read
//! back by the packer. When the raw header is kept, a repack can reuse it
//! verbatim instead of recomputing the layout.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::io::ReadAt;

use super::archive::CfsiArchive;
use super::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Forward-slash archive path
    pub path: String,
    /// Byte offset relative to the data section
    pub offset: u64,
    /// Stored size, including the size prefix when compressed
    pub size: u32,
    pub compressed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Raw folder/file table of the source archive, hex encoded
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "hex")]
    pub header: Vec<u8>,
    #[serde(default)]
    pub data_section_start: u64,
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn from_archive<R: ReadAt>(archive: &CfsiArchive<R>) -> Self {
        Self {
            header: archive.header_bytes().to_vec(),
            data_section_start: archive.data_section_start(),
            entries: archive
                .entries()
                .iter()
                .map(|e| ManifestEntry {
                    path: e.path.clone(),
                    offset: e.offset,
                    size: e.size,
                    compressed: e.compressed,
                })
                .collect(),
        }
    }

    pub fn has_header(&self) -> bool {
        !self.header.is_empty()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut out, self)?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }
}
