mod common;

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use binrw::BinWrite;
use cpak_content::{
    error::{Error, LoaderResolutionError, Result},
    manifest::container_path,
    types::{
        BinHeader, BinRecord, BinTable, BuildFlags, EntryRecord, LoaderRecord, LoaderTable,
        ManifestHeader, PackString,
    },
    ByteArrayLoader, LoaderDescriptor, LoaderRegistry, PackManifest,
};
use pretty_assertions::assert_eq;
use tracing_test::traced_test;

use common::{debug_options, release_options, write_scenario, write_text_pack, TIMESTAMP};

#[traced_test]
#[test]
fn opens_release_scenario() -> Result<()> {
    let directory = tempfile::tempdir()?;
    let path = write_scenario(directory.path(), release_options())?;

    let manifest = PackManifest::open(&path, &LoaderRegistry::with_builtins())?;
    assert!(manifest.is_release());
    assert_eq!(manifest.timestamp(), TIMESTAMP);
    assert_eq!(manifest.containers().len(), 1);
    assert_eq!(manifest.len(), 2);
    assert_eq!(manifest.directory(), directory.path());

    let names: Vec<_> = manifest.entries().map(|e| &*e.name).collect();
    assert_eq!(names, vec!["a.bin", "b.bin"]);

    let a = manifest.get_item("a.bin")?;
    assert_eq!(a.entry().offset, 0);
    assert_eq!(a.entry().compressed_size, 10);
    assert_eq!(a.entry().uncompressed_size, 10);
    assert!(!a.entry().is_compressed());
    assert_eq!(a.data_start(), 13);

    let b = manifest.get_item("b.bin")?;
    assert_eq!(b.entry().offset, 10);
    assert_eq!(b.entry().uncompressed_size, 20);
    assert!(b.entry().compressed_size < 20);
    assert!(b.entry().is_compressed());
    assert_eq!(b.path(), container_path(directory.path(), "content", 0));

    Ok(())
}

#[test]
fn missing_item_is_not_found() -> Result<()> {
    let directory = tempfile::tempdir()?;
    let path = write_scenario(directory.path(), release_options())?;
    let manifest = PackManifest::open(&path, &LoaderRegistry::with_builtins())?;

    assert!(manifest.try_get_item("c.bin")?.is_none());
    assert!(matches!(
        manifest.get_item("c.bin"),
        Err(Error::ItemNotFound(name)) if name == "c.bin"
    ));

    Ok(())
}

#[traced_test]
#[test]
fn changed_container_timestamp_is_stale() -> Result<()> {
    let directory = tempfile::tempdir()?;
    let path = write_scenario(directory.path(), release_options())?;

    let mut bin = OpenOptions::new()
        .write(true)
        .open(container_path(directory.path(), "content", 0))?;
    bin.seek(SeekFrom::Start(9))?;
    bin.write_all(&1001u32.to_le_bytes())?;
    drop(bin);

    match PackManifest::open(&path, &LoaderRegistry::with_builtins()) {
        Err(Error::StaleArchive(stale)) => {
            assert_eq!(stale.expected_timestamp, TIMESTAMP);
            assert_eq!(stale.found_timestamp, 1001);
            assert_eq!(stale.expected_items, 2);
            assert_eq!(stale.found_items, 2);
        }
        other => panic!("expected a stale archive, got {other:?}"),
    }

    Ok(())
}

#[test]
fn changed_container_item_count_is_stale() -> Result<()> {
    let directory = tempfile::tempdir()?;
    let path = write_scenario(directory.path(), release_options())?;

    let mut bin = OpenOptions::new()
        .write(true)
        .open(container_path(directory.path(), "content", 0))?;
    bin.seek(SeekFrom::Start(5))?;
    bin.write_all(&3u32.to_le_bytes())?;
    drop(bin);

    match PackManifest::open(&path, &LoaderRegistry::with_builtins()) {
        Err(Error::StaleArchive(stale)) => {
            assert_eq!(stale.expected_items, 2);
            assert_eq!(stale.found_items, 3);
            assert_eq!(stale.found_timestamp, TIMESTAMP);
        }
        other => panic!("expected a stale archive, got {other:?}"),
    }

    Ok(())
}

#[test]
fn missing_container_fails_the_open() -> Result<()> {
    let directory = tempfile::tempdir()?;
    let path = write_scenario(directory.path(), release_options())?;
    fs::remove_file(container_path(directory.path(), "content", 0))?;

    assert!(matches!(
        PackManifest::open(&path, &LoaderRegistry::with_builtins()),
        Err(Error::IOError(_))
    ));

    Ok(())
}

#[test]
fn unregistered_loader_name_fails_the_open() -> Result<()> {
    let directory = tempfile::tempdir()?;
    let path = write_scenario(directory.path(), release_options())?;

    assert!(matches!(
        PackManifest::open(&path, &LoaderRegistry::new()),
        Err(Error::LoaderResolution(LoaderResolutionError::Name(name))) if name == "ByteArray"
    ));

    Ok(())
}

#[test]
fn loader_is_probed_at_open() -> Result<()> {
    let directory = tempfile::tempdir()?;
    let path = write_scenario(directory.path(), release_options())?;

    let mut registry = LoaderRegistry::new();
    registry.register(LoaderDescriptor::with_constructor(
        1,
        "ByteArray",
        || Err::<ByteArrayLoader, _>("device lost"),
    ))?;

    assert!(matches!(
        PackManifest::open(&path, &registry),
        Err(Error::LoaderResolution(LoaderResolutionError::Construction { .. }))
    ));

    let probes = Arc::new(AtomicUsize::new(0));
    let counter = probes.clone();
    let mut registry = LoaderRegistry::new();
    registry.register(LoaderDescriptor::with_constructor(1, "ByteArray", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<_, std::convert::Infallible>(ByteArrayLoader)
    }))?;
    PackManifest::open(&path, &registry)?;
    assert_eq!(probes.load(Ordering::SeqCst), 1);

    Ok(())
}

fn entry(name: &str, offset: u32) -> EntryRecord {
    EntryRecord {
        name: PackString::from(name),
        compressed_size: 4,
        uncompressed_size: 4,
        offset,
        loader_id: 1,
    }
}

#[traced_test]
#[test]
fn duplicate_names_across_containers_fail_the_open() -> Result<()> {
    let directory = tempfile::tempdir()?;
    let header = BinHeader {
        item_count: 1,
        timestamp: TIMESTAMP,
        ..Default::default()
    };

    for index in 0..2 {
        let mut bin = BufWriter::new(File::create(container_path(
            directory.path(),
            "content",
            index,
        ))?);
        header.write(&mut bin)?;
        bin.write_all(b"data")?;
        bin.flush()?;
    }

    let path = directory.path().join("content.cpak");
    let mut file = BufWriter::new(File::create(&path)?);
    ManifestHeader {
        flags: BuildFlags::RELEASE,
        timestamp: TIMESTAMP,
        ..Default::default()
    }
    .write(&mut file)?;
    LoaderTable::new(vec![LoaderRecord {
        name: PackString::from("ByteArray"),
        identifier: 1,
    }])
    .write(&mut file)?;
    BinTable::new(vec![
        BinRecord {
            header,
            entries: vec![entry("shared", 0)],
        },
        BinRecord {
            header,
            entries: vec![entry("shared", 0)],
        },
    ])
    .write(&mut file)?;
    file.flush()?;
    drop(file);

    assert!(matches!(
        PackManifest::open(&path, &LoaderRegistry::with_builtins()),
        Err(Error::DuplicateItem(name)) if name == "shared"
    ));

    Ok(())
}

#[test]
fn bad_magic_is_a_format_error() -> Result<()> {
    let directory = tempfile::tempdir()?;
    let path = directory.path().join("content.cpak");
    fs::write(&path, b"NOPE\x01\x01\xE8\x03\x00\x00")?;

    assert!(matches!(
        PackManifest::open(&path, &LoaderRegistry::with_builtins()),
        Err(Error::Format(_))
    ));

    Ok(())
}

#[test]
fn unknown_version_is_a_format_error() -> Result<()> {
    let directory = tempfile::tempdir()?;
    let path = write_scenario(directory.path(), release_options())?;

    let mut manifest = OpenOptions::new().write(true).open(&path)?;
    manifest.seek(SeekFrom::Start(4))?;
    manifest.write_all(&[2])?;
    drop(manifest);

    match PackManifest::open(&path, &LoaderRegistry::with_builtins()) {
        Err(Error::Format(message)) => assert!(message.contains("version 2"), "{message}"),
        other => panic!("expected a format error, got {other:?}"),
    }

    Ok(())
}

#[traced_test]
#[test]
fn corrupt_debug_item_header_is_an_error() -> Result<()> {
    let directory = tempfile::tempdir()?;
    let path = write_text_pack(directory.path(), debug_options())?;
    let manifest = PackManifest::open(&path, &LoaderRegistry::with_builtins())?;
    assert!(manifest.try_get_item("greeting")?.is_some());

    let mut item = OpenOptions::new()
        .write(true)
        .open(directory.path().join("greeting.dci"))?;
    item.write_all(b"XXXX")?;
    drop(item);

    assert!(matches!(
        manifest.try_get_item("greeting"),
        Err(Error::Format(_))
    ));
    assert!(manifest.try_get_item("farewell")?.is_none());

    Ok(())
}
