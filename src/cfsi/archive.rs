use std::sync::Arc;
use tracing::debug;

use crate::io::ReadAt;

use super::compression::{DETECT_LEN, decompress, is_compressed};
use super::error::{CfsiError, Result};
use super::parser::{ParsedHeader, parse_header};
use super::structures::{CfsiEntry, FormatOptions};

/// First read size when looking for the end of the header.
const INITIAL_HEADER_WINDOW: u64 = 64 * 1024;

/// Largest header window read before the table is declared corrupt.
const MAX_HEADER_WINDOW: u64 = 64 * 1024 * 1024;

/// An opened CFSI archive.
///
/// Holds the parsed entry table and the reader payloads are fetched from.
/// The archive is never loaded into memory as a whole.
pub struct CfsiArchive<R: ReadAt> {
    /// The underlying data source
    reader: Arc<R>,
    entries: Vec<CfsiEntry>,
    data_section_start: u64,
    /// Raw folder/file table, without the padding after it
    header: Vec<u8>,
    options: FormatOptions,
}

impl<R: ReadAt> CfsiArchive<R> {
    /// Open an archive with the default format options.
    pub fn open(reader: Arc<R>) -> Result<Self> {
        Self::open_with(reader, FormatOptions::default())
    }

    /// Parse the header, check every entry fits the source and classify
    /// each payload as compressed or raw.
    pub fn open_with(reader: Arc<R>, options: FormatOptions) -> Result<Self> {
        let (parsed, header) = read_header(reader.as_ref(), &options, MAX_HEADER_WINDOW)?;
        let ParsedHeader {
            mut entries,
            data_section_start,
            ..
        } = parsed;

        let size = reader.size();
        for (index, entry) in entries.iter_mut().enumerate() {
            let start = data_section_start + entry.offset;
            let end = start + u64::from(entry.size);
            if end > size {
                return Err(CfsiError::corrupt_header(
                    format!("entry #{index} '{}'", entry.path),
                    CfsiError::TruncatedInput {
                        offset: start,
                        needed: u64::from(entry.size),
                    },
                ));
            }

            if entry.size as usize >= DETECT_LEN {
                let mut head = [0u8; DETECT_LEN];
                reader.read_exact_at(start, &mut head)?;
                entry.compressed = is_compressed(&head);
            }
        }

        debug!(
            "Opened archive: {} entries, data section at {data_section_start}",
            entries.len()
        );

        Ok(Self {
            reader,
            entries,
            data_section_start,
            header,
            options,
        })
    }

    /// Entries in header order.
    pub fn entries(&self) -> &[CfsiEntry] {
        &self.entries
    }

    pub fn data_section_start(&self) -> u64 {
        self.data_section_start
    }

    /// The folder/file table exactly as stored.
    pub fn header_bytes(&self) -> &[u8] {
        &self.header
    }

    pub fn options(&self) -> &FormatOptions {
        &self.options
    }

    /// Look an entry up by its archive path.
    pub fn find(&self, path: &str) -> Option<&CfsiEntry> {
        let path = path.replace('\\', "/");
        self.entries.iter().find(|e| e.path == path)
    }

    /// Absolute position of an entry's payload in the source.
    pub fn payload_offset(&self, entry: &CfsiEntry) -> u64 {
        self.data_section_start + entry.offset
    }

    /// Stored payload bytes, compressed or not.
    pub fn read_raw(&self, entry: &CfsiEntry) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; entry.size as usize];
        self.reader
            .read_exact_at(self.payload_offset(entry), &mut buf)?;
        Ok(buf)
    }

    /// Entry contents, inflated when the payload is compressed.
    pub fn read_entry(&self, entry: &CfsiEntry) -> Result<Vec<u8>> {
        let raw = self.read_raw(entry)?;
        if entry.compressed {
            return decompress(&raw, &entry.path);
        }
        Ok(raw)
    }

    /// Get a reference to the underlying reader.
    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }
}

/// Read a growing prefix of the source until the header parses.
///
/// The header length is only known once it has been walked, so the window
/// doubles while the parse fails for lack of bytes, up to `max_window`.
fn read_header<R: ReadAt + ?Sized>(
    reader: &R,
    options: &FormatOptions,
    max_window: u64,
) -> Result<(ParsedHeader, Vec<u8>)> {
    let size = reader.size();
    let limit = size.min(max_window);
    let mut window = INITIAL_HEADER_WINDOW.min(limit);

    loop {
        let mut buf = vec![0u8; window as usize];
        reader.read_exact_at(0, &mut buf)?;

        match parse_header(&buf, options) {
            Ok(parsed) => {
                buf.truncate(parsed.header_len as usize);
                return Ok((parsed, buf));
            }
            Err(e) if e.is_truncation() && window < limit => {
                window = (window * 2).min(limit);
                debug!("Header exceeds window, retrying with {window} bytes");
            }
            Err(e) if e.is_truncation() && limit < size => {
                return Err(CfsiError::corrupt_header(
                    format!("table larger than {max_window} bytes"),
                    e,
                ));
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfsi::compression::{DEFAULT_LEVEL, compress};
    use crate::io::MemoryReader;

    /// Root folder, "a.bin" (10 bytes raw) and "b.orb" (compressed).
    fn sample() -> (Vec<u8>, Vec<u8>) {
        let inner = b"compressed body ".repeat(8);
        let stored = compress(&inner, DEFAULT_LEVEL).unwrap();

        let mut data = vec![1u8, 1, 0, 2];
        data.extend_from_slice(b"\x05a.bin");
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&10u32.to_le_bytes());
        data.extend_from_slice(b"\x05b.orb");
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&(stored.len() as u32).to_le_bytes());
        assert_eq!(data.len(), 32);

        data.extend_from_slice(b"0123456789");
        data.resize(48, 0);
        data.extend_from_slice(&stored);
        let padded = data.len().next_multiple_of(16);
        data.resize(padded, 0);
        (data, inner)
    }

    #[test]
    fn open_and_read() {
        let (data, inner) = sample();
        let archive = CfsiArchive::open(Arc::new(MemoryReader::new(data))).unwrap();

        assert_eq!(archive.data_section_start(), 32);
        assert_eq!(archive.header_bytes().len(), 32);
        let entries = archive.entries();
        assert!(!entries[0].compressed);
        assert!(entries[1].compressed);

        assert_eq!(archive.read_entry(&entries[0]).unwrap(), b"0123456789");
        assert_eq!(archive.read_entry(&entries[1]).unwrap(), inner);
        assert_eq!(
            archive.read_raw(&entries[1]).unwrap().len(),
            entries[1].size as usize
        );
        assert!(archive.find("b.orb").is_some());
        assert!(archive.find("missing").is_none());
    }

    #[test]
    fn entry_past_end_is_corrupt() {
        let (mut data, _) = sample();
        data.truncate(50);
        let err = CfsiArchive::open(Arc::new(MemoryReader::new(data)))
            .err()
            .unwrap();
        assert!(matches!(err, CfsiError::CorruptHeader { .. }));
    }

    /// One root folder with 3000 empty files; the table is about 78 KiB.
    fn wide_archive() -> (Vec<u8>, usize) {
        let names: Vec<String> = (0..3000).map(|i| format!("file_{i:05}.dat")).collect();
        let mut data = vec![1u8, 1, 0, 0xFC];
        data.extend_from_slice(&(names.len() as u16).to_le_bytes());
        for name in &names {
            data.push(name.len() as u8);
            data.extend_from_slice(name.as_bytes());
            data.extend_from_slice(&0u32.to_le_bytes());
            data.extend_from_slice(&0u32.to_le_bytes());
        }
        let header_len = data.len();
        data.resize(header_len.next_multiple_of(16), 0);
        (data, header_len)
    }

    #[test]
    fn header_larger_than_first_window() {
        let (data, header_len) = wide_archive();
        assert!(header_len as u64 > INITIAL_HEADER_WINDOW);

        let archive = CfsiArchive::open(Arc::new(MemoryReader::new(data))).unwrap();
        assert_eq!(archive.entries().len(), 3000);
        assert_eq!(archive.header_bytes().len(), header_len);
        assert_eq!(archive.entries()[2999].path, "file_02999.dat");
    }

    #[test]
    fn header_window_is_capped() {
        let (data, _) = wide_archive();
        let reader = MemoryReader::new(data);
        let err = read_header(&reader, &FormatOptions::default(), INITIAL_HEADER_WINDOW)
            .err()
            .unwrap();
        match err {
            CfsiError::CorruptHeader { context, source } => {
                assert!(context.contains("larger than"), "{context}");
                assert!(source.is_truncation());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn garbage_is_rejected() {
        let err = CfsiArchive::open(Arc::new(MemoryReader::new(vec![5, 3])))
            .err()
            .unwrap();
        assert!(matches!(err, CfsiError::CorruptHeader { .. }));
    }
}
