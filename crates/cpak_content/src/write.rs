//! Types for writing pack manifests, bin containers and debug item files
//!

use binrw::BinWrite;
use bon::Builder;
use indexmap::{IndexMap, IndexSet};
use std::fmt::Debug;
use std::fs::{self, File};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, instrument, Level};

use crate::compression::compress_block;
use crate::error::{Error, LoaderResolutionError, Result};
use crate::manifest::{container_path, debug_item_path, MANIFEST_EXTENSION};
use crate::types::{
    BinHeader, BinRecord, BinTable, BuildFlags, DebugItemHeader, EntryRecord, LoaderRecord,
    LoaderTable, ManifestHeader, PackString, BIN_HEADER_LEN, FORMAT_VERSION,
};

/// Default upper bound for the size of one bin container
pub const DEFAULT_MAX_BIN_SIZE: u64 = 64 * 1024 * 1024;

/// How items are laid out on disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BuildMode {
    /// Items are packed into numbered bin containers
    #[default]
    Release,

    /// Every item is written to its own loose file next to the manifest
    Debug,
}

/// Options for how a pack should be written
#[derive(Debug, Clone, Copy, Builder)]
pub struct PackWriterOptions {
    /// Packed containers or loose files
    #[builder(default)]
    pub build_mode: BuildMode,

    /// Try zlib on every item, keeping the result only when it is smaller
    #[builder(default = true)]
    pub compress: bool,

    /// Start a new container once the current one would grow past this many bytes
    #[builder(default = DEFAULT_MAX_BIN_SIZE)]
    pub max_bin_size: u64,

    /// Build timestamp, defaults to the current UNIX time in seconds
    pub timestamp: Option<u32>,
}

impl Default for PackWriterOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

struct PendingItem {
    name: Box<str>,
    loader_id: u32,
    data: Vec<u8>,
}

struct OpenBin {
    path: PathBuf,
    file: BufWriter<File>,
    size: u64,
    entries: Vec<EntryRecord>,
}

/// Pack generator
///
/// ```
/// # fn doit() -> cpak_content::error::Result<()>
/// # {
/// use std::io::Write;
/// use cpak_content::{write::PackWriterOptions, LoaderRegistry, PackManifest, PackWriter};
///
/// let directory = tempfile::tempdir()?;
/// let mut pack = PackWriter::new(directory.path(), "content", PackWriterOptions::default())?;
/// pack.declare_loader("Text", cpak_content::TEXT_LOADER_ID)?;
///
/// pack.start_item("text/hello", cpak_content::TEXT_LOADER_ID)?;
/// pack.write_all(b"Hello, World!")?;
///
/// // Write the containers and the manifest.
/// let manifest_path = pack.finish()?;
///
/// let manifest = PackManifest::open(manifest_path, &LoaderRegistry::with_builtins())?;
/// assert_eq!(manifest.len(), 1);
/// # Ok(())
/// # }
/// # doit().unwrap();
/// ```
pub struct PackWriter {
    directory: PathBuf,
    stem: String,
    options: PackWriterOptions,
    timestamp: u32,
    loaders: IndexMap<u32, String>,
    names: IndexSet<Box<str>>,
    current: Option<PendingItem>,
    open_bin: Option<OpenBin>,
    bins: Vec<BinRecord>,
}

impl Debug for PackWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PackWriter")
            .field("directory", &self.directory)
            .field("stem", &self.stem)
            .field("options", &self.options)
            .field("items", &self.names.len())
            .finish()
    }
}

impl PackWriter {
    /// Prepare a pack named `stem` in `directory`, creating the directory if needed
    ///
    /// Before writing to this object, the [`PackWriter::start_item`] function should be called.
    pub fn new(
        directory: impl AsRef<Path>,
        stem: impl Into<String>,
        options: PackWriterOptions,
    ) -> Result<PackWriter> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;

        let timestamp = options.timestamp.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as u32)
                .unwrap_or_default()
        });

        Ok(PackWriter {
            directory,
            stem: stem.into(),
            options,
            timestamp,
            loaders: IndexMap::new(),
            names: IndexSet::new(),
            current: None,
            open_bin: None,
            bins: Vec::new(),
        })
    }

    /// Build timestamp written to the manifest and every container
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Returns true if an item is currently open for writing.
    pub fn is_writing_item(&self) -> bool {
        self.current.is_some()
    }

    /// Add a row to the loader table
    pub fn declare_loader(&mut self, name: impl Into<String>, identifier: u32) -> Result<()> {
        let name = name.into();
        if self.loaders.contains_key(&identifier) || self.loaders.values().any(|n| *n == name) {
            return Err(Error::DuplicateLoader { identifier, name });
        }
        self.loaders.insert(identifier, name);
        Ok(())
    }

    /// Start a new item decoded by `loader_id`, finishing the previous one
    #[instrument(skip(self), err)]
    pub fn start_item(&mut self, name: &str, loader_id: u32) -> Result<()> {
        if self.current.is_some() {
            self.finish_item()?;
        }

        let valid = !name.is_empty()
            && Path::new(name)
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(Error::CustomError(format!("invalid item name {name:?}")));
        }
        if !self.loaders.contains_key(&loader_id) {
            return Err(LoaderResolutionError::Identifier(loader_id).into());
        }
        if self.names.contains(name) {
            return Err(Error::DuplicateItem(name.to_owned()));
        }

        self.names.insert(name.into());
        self.current = Some(PendingItem {
            name: name.into(),
            loader_id,
            data: Vec::new(),
        });

        Ok(())
    }

    /// Write out the item being built
    #[instrument(skip(self), err)]
    pub fn finish_item(&mut self) -> Result<()> {
        let Some(item) = self.current.take() else {
            return Ok(());
        };

        let uncompressed_size = size_u32(&item.name, item.data.len() as u64)?;
        let stored = self.encode(item.data)?;
        let compressed_size = size_u32(&item.name, stored.len() as u64)?;

        debug!(
            item = %item.name,
            uncompressed_size,
            compressed_size,
            "finished item"
        );

        match self.options.build_mode {
            BuildMode::Release => {
                let record = EntryRecord {
                    name: PackString::from(&*item.name),
                    compressed_size,
                    uncompressed_size,
                    offset: 0,
                    loader_id: item.loader_id,
                };
                self.append_to_bin(record, &stored)
            }
            BuildMode::Debug => self.write_debug_item(
                &item.name,
                DebugItemHeader {
                    version: FORMAT_VERSION,
                    loader_id: item.loader_id,
                    compressed_size,
                    uncompressed_size,
                },
                &stored,
            ),
        }
    }

    fn encode(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        if !self.options.compress || data.is_empty() {
            return Ok(data);
        }
        let compressed = compress_block(&data)?;
        Ok(if compressed.len() < data.len() {
            compressed
        } else {
            data
        })
    }

    fn append_to_bin(&mut self, mut record: EntryRecord, stored: &[u8]) -> Result<()> {
        let full = self.open_bin.as_ref().is_some_and(|bin| {
            !bin.entries.is_empty()
                && BIN_HEADER_LEN + bin.size + stored.len() as u64 > self.options.max_bin_size
        });
        if full {
            self.close_bin()?;
        }

        let mut bin = match self.open_bin.take() {
            Some(bin) => bin,
            None => self.create_bin()?,
        };

        record.offset = u32::try_from(bin.size).map_err(|_| {
            Error::Format(format!("{} does not fit in its container", bin.path.display()))
        })?;
        bin.file.write_all(stored)?;
        bin.size += stored.len() as u64;
        bin.entries.push(record);

        self.open_bin = Some(bin);
        Ok(())
    }

    fn create_bin(&self) -> Result<OpenBin> {
        let path = container_path(&self.directory, &self.stem, self.bins.len());
        let mut file = BufWriter::new(File::create(&path)?);
        // rewritten with the real item count when the container is closed
        self.bin_header(0).write(&mut file)?;

        Ok(OpenBin {
            path,
            file,
            size: 0,
            entries: Vec::new(),
        })
    }

    fn bin_header(&self, item_count: u32) -> BinHeader {
        BinHeader {
            version: FORMAT_VERSION,
            item_count,
            timestamp: self.timestamp,
        }
    }

    #[instrument(skip(self), err)]
    fn close_bin(&mut self) -> Result<()> {
        let Some(mut bin) = self.open_bin.take() else {
            return Ok(());
        };

        let header = self.bin_header(bin.entries.len() as u32);
        bin.file.seek(SeekFrom::Start(0))?;
        header.write(&mut bin.file)?;
        bin.file.flush()?;

        debug!(
            path = %bin.path.display(),
            items = bin.entries.len(),
            size = bin.size,
            "closed bin container"
        );

        self.bins.push(BinRecord {
            header,
            entries: bin.entries,
        });
        Ok(())
    }

    fn write_debug_item(&self, name: &str, header: DebugItemHeader, stored: &[u8]) -> Result<()> {
        let path = debug_item_path(&self.directory, name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = BufWriter::new(File::create(&path)?);
        header.write(&mut file)?;
        file.write_all(stored)?;
        file.flush()?;
        Ok(())
    }

    /// Finish the last item and write the manifest
    ///
    /// Returns the path of the manifest.
    #[instrument(skip(self), err)]
    pub fn finish(mut self) -> Result<PathBuf> {
        self.finish_item()?;
        self.close_bin()?;

        let mut flags = BuildFlags::empty();
        flags.set(BuildFlags::RELEASE, self.options.build_mode == BuildMode::Release);
        flags.set(BuildFlags::COMPRESSED, self.options.compress);

        let path = self
            .directory
            .join(format!("{}.{MANIFEST_EXTENSION}", self.stem));
        let mut file = BufWriter::new(File::create(&path)?);

        ManifestHeader {
            version: FORMAT_VERSION,
            flags,
            timestamp: self.timestamp,
        }
        .write(&mut file)?;

        LoaderTable::new(
            self.loaders
                .iter()
                .map(|(&identifier, name)| LoaderRecord {
                    name: PackString::from(name.as_str()),
                    identifier,
                })
                .collect(),
        )
        .write(&mut file)?;

        let containers = self.bins.len();
        if flags.contains(BuildFlags::RELEASE) {
            BinTable::new(std::mem::take(&mut self.bins)).write(&mut file)?;
        }
        file.flush()?;

        info!(
            path = %path.display(),
            items = self.names.len(),
            containers,
            "wrote pack"
        );

        Ok(path)
    }
}

fn size_u32(name: &str, size: u64) -> Result<u32> {
    u32::try_from(size).map_err(|_| Error::Format(format!("item {name} is too large")))
}

impl Write for PackWriter {
    #[instrument(skip_all, err, ret(level = Level::TRACE), fields(size=buf.len()) )]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.current.as_mut() {
            Some(item) => {
                item.data.extend_from_slice(buf);
                Ok(buf.len())
            }
            None => Err(io::Error::new(
                io::ErrorKind::Other,
                "No item has been started",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
