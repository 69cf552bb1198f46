use std::fs;
use std::path::Path;
use std::sync::Arc;

use cfsi::cfsi::{CfsiError, ExistingFile};
use cfsi::{
    CfsiArchive, ExtractOptions, LocalFileReader, Manifest, MemoryReader, PackOptions, PackSource,
    Packer,
};

fn write(root: &Path, rel: &str, data: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

fn source_tree(root: &Path) {
    write(root, "readme.txt", b"top level file");
    write(root, "sound/bgm.ogg", &[0x4F; 333]);
    write(root, "sound/se/click.ogg", &[0x11; 17]);
    let scene: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    write(root, "script/scene01.orb", &scene);
    write(root, "script/empty.bin", b"");
}

fn open(path: &Path) -> CfsiArchive<LocalFileReader> {
    CfsiArchive::open(Arc::new(LocalFileReader::new(path).unwrap())).unwrap()
}

#[test]
fn extract_then_repack_is_byte_identical() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    source_tree(&src);

    let original = tmp.path().join("data.cfsi");
    Packer::default()
        .pack(PackSource::Directory(&src), &original)
        .unwrap();

    let archive = open(&original);
    let extracted = tmp.path().join("data.cfsi_extracted");
    let report = archive
        .extract_all(&extracted, &ExtractOptions::default())
        .unwrap();
    assert!(report.is_clean());
    assert_eq!(report.extracted.len(), 5);
    let manifest = Manifest::from_archive(&archive);
    let manifest_path = tmp.path().join("data.json");
    manifest.save(&manifest_path).unwrap();
    let manifest = Manifest::load(&manifest_path).unwrap();

    let original_bytes = fs::read(&original).unwrap();

    let reused = tmp.path().join("reused.cfsi");
    Packer::new(PackOptions {
        reuse_header: true,
        ..PackOptions::default()
    })
    .pack(
        PackSource::EntryList {
            manifest: &manifest,
            content_root: &extracted,
        },
        &reused,
    )
    .unwrap();
    assert_eq!(fs::read(&reused).unwrap(), original_bytes);

    let relaid = tmp.path().join("relaid.cfsi");
    Packer::default()
        .pack(
            PackSource::EntryList {
                manifest: &manifest,
                content_root: &extracted,
            },
            &relaid,
        )
        .unwrap();
    assert_eq!(fs::read(&relaid).unwrap(), original_bytes);

    let rescanned = tmp.path().join("rescanned.cfsi");
    Packer::default()
        .pack(PackSource::Directory(&extracted), &rescanned)
        .unwrap();
    assert_eq!(fs::read(&rescanned).unwrap(), original_bytes);
}

#[test]
fn extracted_contents_match_sources() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    source_tree(&src);
    let packed = tmp.path().join("data.cfsi");
    Packer::default()
        .pack(PackSource::Directory(&src), &packed)
        .unwrap();

    let archive = open(&packed);
    let orb = archive.find("script/scene01.orb").unwrap();
    assert!(orb.compressed);
    assert!(!archive.find("sound/bgm.ogg").unwrap().compressed);
    assert_eq!(archive.find("script/empty.bin").unwrap().size, 0);

    let out = tmp.path().join("out");
    let options = ExtractOptions {
        threads: 3,
        existing: ExistingFile::Overwrite,
        ..ExtractOptions::default()
    };
    archive.extract_all(&out, &options).unwrap();
    for rel in [
        "readme.txt",
        "sound/bgm.ogg",
        "sound/se/click.ogg",
        "script/scene01.orb",
        "script/empty.bin",
    ] {
        assert_eq!(
            fs::read(out.join(rel)).unwrap(),
            fs::read(src.join(rel)).unwrap(),
            "{rel}"
        );
    }

    let len = fs::metadata(&packed).unwrap().len();
    assert_eq!(len % 16, 0);
    assert_eq!(archive.data_section_start() % 16, 0);
    for entry in archive.entries() {
        assert!(archive.data_section_start() + entry.offset + u64::from(entry.size) <= len);
    }
}

/// Hand-built archive with a trailing-slash folder and a gap between
/// payloads; only the captured header reproduces it.
fn foreign_archive() -> Vec<u8> {
    let mut data = vec![1u8];
    data.extend_from_slice(b"\x05data/\x02");
    data.extend_from_slice(b"\x05a.bin");
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&5u32.to_le_bytes());
    data.extend_from_slice(b"\x05b.bin");
    data.extend_from_slice(&4u32.to_le_bytes());
    data.extend_from_slice(&3u32.to_le_bytes());
    assert_eq!(data.len(), 36);
    data.resize(48, 0);
    data.extend_from_slice(b"alpha");
    data.resize(112, 0);
    data.extend_from_slice(b"bet");
    data.resize(128, 0);
    data
}

#[test]
fn captured_header_reproduces_foreign_layout() {
    let tmp = tempfile::tempdir().unwrap();
    let original = foreign_archive();
    let archive = CfsiArchive::open(Arc::new(MemoryReader::new(original.clone()))).unwrap();
    assert_eq!(archive.entries()[0].path, "data/a.bin");
    assert_eq!(archive.entries()[1].offset, 64);

    let extracted = tmp.path().join("x");
    archive
        .extract_all(&extracted, &ExtractOptions::default())
        .unwrap();
    let manifest = Manifest::from_archive(&archive);

    let mut reused = Vec::new();
    Packer::new(PackOptions {
        reuse_header: true,
        ..PackOptions::default()
    })
    .pack_to_writer(
        PackSource::EntryList {
            manifest: &manifest,
            content_root: &extracted,
        },
        &mut reused,
    )
    .unwrap();
    assert_eq!(reused, original);

    let mut relaid = Vec::new();
    Packer::default()
        .pack_to_writer(
            PackSource::EntryList {
                manifest: &manifest,
                content_root: &extracted,
            },
            &mut relaid,
        )
        .unwrap();
    assert_ne!(relaid, original);
    let relaid = CfsiArchive::open(Arc::new(MemoryReader::new(relaid))).unwrap();
    assert_eq!(relaid.entries()[1].offset, 16);
    assert_eq!(relaid.read_entry(&relaid.entries()[1]).unwrap(), b"bet");
}

#[test]
fn edited_file_breaks_reused_header() {
    let tmp = tempfile::tempdir().unwrap();
    let archive = CfsiArchive::open(Arc::new(MemoryReader::new(foreign_archive()))).unwrap();
    let extracted = tmp.path().join("x");
    archive
        .extract_all(&extracted, &ExtractOptions::default())
        .unwrap();
    fs::write(extracted.join("data").join("b.bin"), b"longer now").unwrap();

    let output = tmp.path().join("out.cfsi");
    let err = Packer::new(PackOptions {
        reuse_header: true,
        ..PackOptions::default()
    })
    .pack(
        PackSource::EntryList {
            manifest: &Manifest::from_archive(&archive),
            content_root: &extracted,
        },
        &output,
    )
    .unwrap_err();
    assert!(matches!(err, CfsiError::SizeMismatch { expected: 3, actual: 10, .. }));
    assert!(!output.exists());
}

#[test]
fn edited_manifest_breaks_reused_header() {
    let tmp = tempfile::tempdir().unwrap();
    let archive = CfsiArchive::open(Arc::new(MemoryReader::new(foreign_archive()))).unwrap();
    let extracted = tmp.path().join("x");
    archive
        .extract_all(&extracted, &ExtractOptions::default())
        .unwrap();
    fs::write(extracted.join("data").join("c.bin"), b"bet").unwrap();

    let packer = Packer::new(PackOptions {
        reuse_header: true,
        ..PackOptions::default()
    });
    let output = tmp.path().join("out.cfsi");

    let mut dropped = Manifest::from_archive(&archive);
    dropped.entries.pop();
    let mut renamed = Manifest::from_archive(&archive);
    renamed.entries[1].path = "data/c.bin".to_string();
    let mut moved = Manifest::from_archive(&archive);
    moved.entries[1].offset = 16;

    for (manifest, context) in [
        (&dropped, "manifest entries"),
        (&renamed, "manifest entry #1"),
        (&moved, "manifest entry #1"),
    ] {
        let err = packer
            .pack(
                PackSource::EntryList {
                    manifest,
                    content_root: &extracted,
                },
                &output,
            )
            .unwrap_err();
        match err {
            CfsiError::CorruptHeader { context: found, source } => {
                assert_eq!(found, context);
                assert!(matches!(*source, CfsiError::ManifestMismatch(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!output.exists());
    }
}
