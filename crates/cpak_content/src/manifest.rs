//! Types for opening pack manifests and their bin containers
//!

use binrw::BinRead;
use indexmap::IndexMap;
use std::{
    fmt::{self, Debug},
    fs::File,
    io::{self, BufReader, Read, Seek},
    path::{Component, Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info, instrument};

use crate::{
    compression::CompressionMethod,
    error::{Error, LoaderResolutionError, Result, StaleArchiveError},
    loader::{LoaderDescriptor, LoaderRegistry},
    types::{
        check_version, BinHeader, BinRecord, BinTable, BuildFlags, DebugItemHeader, EntryRecord,
        LoaderTable, ManifestHeader, BIN_HEADER_LEN, DEBUG_HEADER_LEN,
    },
};

/// Extension of manifest files
pub const MANIFEST_EXTENSION: &str = "cpak";

/// Extension of bin container files
pub const BIN_EXTENSION: &str = "bin";

/// Extension of loose item files written by debug builds
pub const DEBUG_EXTENSION: &str = "dci";

/// Location of the `index`th bin container of the manifest named `stem`
pub fn container_path(directory: &Path, stem: &str, index: usize) -> PathBuf {
    directory.join(format!("{stem}.{index}.{BIN_EXTENSION}"))
}

/// Location of the loose file holding `name` in a debug build
pub fn debug_item_path(directory: &Path, name: &str) -> PathBuf {
    directory.join(format!("{name}.{DEBUG_EXTENSION}"))
}

/// One stored item as described by the entry table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Name of the item
    pub name: Box<str>,
    /// Size of the item in its container
    pub compressed_size: u32,
    /// Size of the item when decompressed
    pub uncompressed_size: u32,
    /// Offset of the item data from the end of the container header
    pub offset: u32,
    /// Identifier of the loader that decodes this item
    pub loader_id: u32,
}

impl Entry {
    pub fn is_compressed(&self) -> bool {
        self.compressed_size != self.uncompressed_size
    }

    pub fn compression_method(&self) -> CompressionMethod {
        CompressionMethod::for_sizes(self.compressed_size as u64, self.uncompressed_size as u64)
    }

    fn from_record(record: &EntryRecord) -> Result<Self> {
        let entry = Entry {
            name: record.name.to_str()?.into(),
            compressed_size: record.compressed_size,
            uncompressed_size: record.uncompressed_size,
            offset: record.offset,
            loader_id: record.loader_id,
        };
        entry.validate()?;
        Ok(entry)
    }

    fn validate(&self) -> Result<()> {
        if self.compressed_size > self.uncompressed_size {
            return Err(Error::Format(format!(
                "item {} stores {} bytes for {} uncompressed bytes",
                self.name, self.compressed_size, self.uncompressed_size
            )));
        }
        Ok(())
    }
}

/// A resolved item: its entry plus where its bytes live on disk
#[derive(Debug, Clone)]
pub struct Item {
    entry: Entry,
    path: Arc<Path>,
    data_start: u64,
}

impl Item {
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// File holding the item's bytes
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Absolute offset of the item's first byte within [`Item::path`]
    pub fn data_start(&self) -> u64 {
        self.data_start
    }
}

/// A single bin container of a release build
#[derive(Debug, Clone)]
pub struct BinContainer {
    file_index: u32,
    path: Arc<Path>,
    entries: Vec<Entry>,
}

impl BinContainer {
    pub fn file_index(&self) -> u32 {
        self.file_index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    #[instrument(skip(record), err)]
    fn open(path: PathBuf, file_index: u32, record: BinRecord, timestamp: u32) -> Result<Self> {
        check_version("bin container record", record.header.version)?;

        let stale = |found: &BinHeader| {
            Error::from(StaleArchiveError {
                path: path.clone(),
                expected_items: record.header.item_count,
                found_items: found.item_count,
                expected_timestamp: timestamp,
                found_timestamp: found.timestamp,
            })
        };

        if record.header.timestamp != timestamp {
            return Err(stale(&record.header));
        }

        let mut reader = BufReader::new(File::open(&path)?);
        let header = BinHeader::read(&mut reader).map_err(format_error("bin container header"))?;
        check_version("bin container", header.version)?;

        if header.item_count != record.header.item_count || header.timestamp != timestamp {
            return Err(stale(&header));
        }

        let entries = record
            .entries
            .iter()
            .map(Entry::from_record)
            .collect::<Result<Vec<_>>>()?;

        debug!(items = entries.len(), "opened bin container");

        Ok(BinContainer {
            file_index,
            path: path.into(),
            entries,
        })
    }
}

/// An opened pack manifest
///
/// Manifests are immutable once opened. Share them behind an [`Arc`], typically through
/// [`crate::ContentServices::open_manifest`].
///
/// ```no_run
/// fn list_items(path: &std::path::Path) -> cpak_content::error::Result<()> {
///     let registry = cpak_content::LoaderRegistry::with_builtins();
///     let manifest = cpak_content::PackManifest::open(path, &registry)?;
///
///     for entry in manifest.entries() {
///         println!("{}: {} bytes", entry.name, entry.uncompressed_size);
///     }
///
///     Ok(())
/// }
/// ```
pub struct PackManifest {
    path: PathBuf,
    directory: PathBuf,
    flags: BuildFlags,
    timestamp: u32,
    loaders: IndexMap<u32, LoaderDescriptor>,
    containers: Vec<BinContainer>,
    index: IndexMap<Box<str>, (usize, usize)>,
}

impl Debug for PackManifest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PackManifest")
            .field("path", &self.path)
            .field("flags", &self.flags)
            .field("timestamp", &self.timestamp)
            .field("loaders", &self.loaders.len())
            .field("containers", &self.containers.len())
            .field("items", &self.index.len())
            .finish()
    }
}

fn format_error(what: &'static str) -> impl Fn(binrw::Error) -> Error {
    move |e| Error::Format(format!("{what}: {e}"))
}

impl PackManifest {
    /// Open a manifest, resolving its loaders through `registry`
    ///
    /// Release builds open and validate every bin container up front. Any failure fails the
    /// whole open.
    #[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
    pub fn open(path: impl AsRef<Path>, registry: &LoaderRegistry) -> Result<PackManifest> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path)?);
        let manifest = Self::read_from(&mut reader, path, registry)?;

        info!(
            release = manifest.is_release(),
            containers = manifest.containers.len(),
            items = manifest.len(),
            "opened manifest"
        );

        Ok(manifest)
    }

    fn read_from<R: Read + Seek>(
        reader: &mut R,
        path: &Path,
        registry: &LoaderRegistry,
    ) -> Result<PackManifest> {
        let header = ManifestHeader::read(reader).map_err(format_error("manifest header"))?;
        check_version("manifest", header.version)?;

        let table = LoaderTable::read(reader).map_err(format_error("loader table"))?;
        let loaders = Self::resolve_loaders(&table, registry)?;

        let directory = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::Format(format!("{} has no file stem", path.display())))?;

        let mut containers = Vec::new();
        if header.flags.contains(BuildFlags::RELEASE) {
            let bins = BinTable::read(reader).map_err(format_error("bin table"))?;
            for (index, record) in bins.bins.into_iter().enumerate() {
                containers.push(BinContainer::open(
                    container_path(&directory, stem, index),
                    index as u32,
                    record,
                    header.timestamp,
                )?);
            }
        }

        let mut index = IndexMap::new();
        for (container_index, container) in containers.iter().enumerate() {
            for (entry_index, entry) in container.entries.iter().enumerate() {
                if index
                    .insert(entry.name.clone(), (container_index, entry_index))
                    .is_some()
                {
                    return Err(Error::DuplicateItem(entry.name.to_string()));
                }
            }
        }

        Ok(PackManifest {
            path: path.to_path_buf(),
            directory,
            flags: header.flags,
            timestamp: header.timestamp,
            loaders,
            containers,
            index,
        })
    }

    fn resolve_loaders(
        table: &LoaderTable,
        registry: &LoaderRegistry,
    ) -> Result<IndexMap<u32, LoaderDescriptor>> {
        let mut loaders = IndexMap::with_capacity(table.loaders.len());
        for record in &table.loaders {
            let name = record.name.to_str()?;
            let descriptor = registry
                .resolve_name(name)
                .ok_or_else(|| LoaderResolutionError::Name(name.to_owned()))?;

            // constructing once here surfaces a broken loader at open time
            drop(descriptor.construct()?);

            if loaders
                .insert(record.identifier, descriptor.clone())
                .is_some()
            {
                return Err(Error::Format(format!(
                    "loader identifier {} is listed twice",
                    record.identifier
                )));
            }
        }
        Ok(loaders)
    }

    /// Path the manifest was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the manifest and its containers
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn flags(&self) -> BuildFlags {
        self.flags
    }

    /// Whether this is a packed build with bin containers
    pub fn is_release(&self) -> bool {
        self.flags.contains(BuildFlags::RELEASE)
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn containers(&self) -> &[BinContainer] {
        &self.containers
    }

    /// Loader table of this build, keyed by the identifiers entries refer to
    pub fn loaders(&self) -> &IndexMap<u32, LoaderDescriptor> {
        &self.loaders
    }

    pub fn loader(&self, identifier: u32) -> Option<&LoaderDescriptor> {
        self.loaders.get(&identifier)
    }

    /// Number of indexed items. Always zero for debug builds.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries of every container in archive order
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.containers.iter().flat_map(|c| c.entries.iter())
    }

    /// Look up an item by name
    ///
    /// Returns `Ok(None)` when no such item exists. In debug builds this reads the loose
    /// file's header, so a corrupt header is an error rather than a miss.
    pub fn try_get_item(&self, name: &str) -> Result<Option<Item>> {
        if self.is_release() {
            return Ok(self.index.get(name).map(|&(container_index, entry_index)| {
                let container = &self.containers[container_index];
                let entry = &container.entries[entry_index];
                Item {
                    entry: entry.clone(),
                    path: container.path.clone(),
                    data_start: BIN_HEADER_LEN + entry.offset as u64,
                }
            }));
        }

        self.try_get_debug_item(name)
    }

    /// Look up an item by name, failing if it does not exist
    pub fn get_item(&self, name: &str) -> Result<Item> {
        self.try_get_item(name)?
            .ok_or_else(|| Error::ItemNotFound(name.to_owned()))
    }

    fn try_get_debug_item(&self, name: &str) -> Result<Option<Item>> {
        let escapes = Path::new(name)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if name.is_empty() || escapes {
            return Ok(None);
        }

        let path = debug_item_path(&self.directory, name);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let header = DebugItemHeader::read(&mut BufReader::new(file))
            .map_err(format_error("debug item header"))?;
        check_version("debug item", header.version)?;

        let entry = Entry {
            name: name.into(),
            compressed_size: header.compressed_size,
            uncompressed_size: header.uncompressed_size,
            offset: 0,
            loader_id: header.loader_id,
        };
        entry.validate()?;

        Ok(Some(Item {
            entry,
            path: path.into(),
            data_start: DEBUG_HEADER_LEN,
        }))
    }
}
