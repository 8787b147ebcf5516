//! On-disk records shared by manifests, bin containers and debug item files.

use binrw::{binrw, BinRead, BinWrite};
use bitflags::bitflags;

use crate::error::{Error, Result};

/// Version byte written after every magic
pub const FORMAT_VERSION: u8 = 1;

/// Size of [`BinHeader`] on disk, item data starts right after it
pub const BIN_HEADER_LEN: u64 = 13;

/// Size of [`DebugItemHeader`] on disk, item data starts right after it
pub const DEBUG_HEADER_LEN: u64 = 21;

bitflags! {
    /// Build mode and size policy stored in the manifest header
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BuildFlags: u8 {
        /// Items are packed into bin containers
        const RELEASE = 0b0000_0001;
        /// The builder attempted compression on every item
        const COMPRESSED = 0b0000_0010;
    }
}

/// Manifest file header
///
/// Always starts with "CPAK" followed by the format version. All data is stored in little endian format.
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(magic = b"CPAK", little)]
pub struct ManifestHeader {
    /// The format version, must equal [`FORMAT_VERSION`]
    pub version: u8,

    /// The build mode flags
    #[br(map = |bits: u8| BuildFlags::from_bits_retain(bits))]
    #[bw(map = |flags: &BuildFlags| flags.bits())]
    pub flags: BuildFlags,

    /// The build timestamp every bin container must repeat
    pub timestamp: u32,
}

impl Default for ManifestHeader {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            flags: BuildFlags::RELEASE | BuildFlags::COMPRESSED,
            timestamp: 0,
        }
    }
}

/// A `u32` length prefixed UTF-8 string
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackString {
    #[br(temp)]
    #[bw(calc = bytes.len() as u32)]
    len: u32,

    #[br(count = len)]
    bytes: Vec<u8>,
}

impl PackString {
    /// The raw bytes of the string
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decode the string, failing on invalid UTF-8
    pub fn to_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.bytes)
            .map_err(|e| Error::Format(format!("string is not valid utf-8: {e}")))
    }
}

impl From<&str> for PackString {
    fn from(value: &str) -> Self {
        Self {
            bytes: value.as_bytes().to_vec(),
        }
    }
}

/// One row of the manifest loader table
#[derive(BinRead, BinWrite, Debug, Clone, Default, PartialEq)]
#[brw(little)]
pub struct LoaderRecord {
    /// Display name the runtime resolves through its registry
    pub name: PackString,

    /// Identifier the entries of this build refer to
    pub identifier: u32,
}

/// The manifest loader table
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoaderTable {
    #[br(temp)]
    #[bw(calc = loaders.len() as u32)]
    count: u32,

    #[br(count = count)]
    pub loaders: Vec<LoaderRecord>,
}

impl LoaderTable {
    pub fn new(loaders: Vec<LoaderRecord>) -> Self {
        Self { loaders }
    }
}

/// Bin container header
///
/// Written at the start of every bin file and repeated inside the manifest.
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(magic = b"CBIN", little)]
pub struct BinHeader {
    /// The format version, must equal [`FORMAT_VERSION`]
    pub version: u8,

    /// The number of items stored in the container
    pub item_count: u32,

    /// The build timestamp, must equal the manifest timestamp
    pub timestamp: u32,
}

impl Default for BinHeader {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            item_count: 0,
            timestamp: 0,
        }
    }
}

/// Entry table record
#[derive(BinRead, BinWrite, Debug, Clone, Default, PartialEq)]
#[brw(little)]
pub struct EntryRecord {
    /// Name of the item, unique across the manifest
    pub name: PackString,

    /// The size of this item's data in the container
    pub compressed_size: u32,

    /// The size of this item's data after decompression
    pub uncompressed_size: u32,

    /// Offset of the data from the end of the container header
    pub offset: u32,

    /// Loader table identifier of the decoder for this item
    pub loader_id: u32,
}

/// A bin container as described by the manifest
#[derive(BinRead, BinWrite, Debug, Clone, Default, PartialEq)]
#[brw(little)]
pub struct BinRecord {
    pub header: BinHeader,

    #[br(count = header.item_count)]
    pub entries: Vec<EntryRecord>,
}

/// The release-only list of bin containers that follows the loader table
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BinTable {
    #[br(temp)]
    #[bw(calc = bins.len() as u32)]
    count: u32,

    #[br(count = count)]
    pub bins: Vec<BinRecord>,
}

impl BinTable {
    pub fn new(bins: Vec<BinRecord>) -> Self {
        Self { bins }
    }
}

/// Header of a loose item file written by debug builds
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(magic = b"DCI ", little)]
pub struct DebugItemHeader {
    /// The format version, must equal [`FORMAT_VERSION`]
    pub version: u8,

    /// Loader table identifier of the decoder for this item
    pub loader_id: u32,

    /// The size of the data following this header
    pub compressed_size: u32,

    /// The size of the data after decompression
    pub uncompressed_size: u32,
}

impl Default for DebugItemHeader {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            loader_id: 0,
            compressed_size: 0,
            uncompressed_size: 0,
        }
    }
}

/// Fail with a format error unless the version byte is supported
pub(crate) fn check_version(what: &str, version: u8) -> Result<()> {
    if version != FORMAT_VERSION {
        return Err(Error::Format(format!(
            "{what} has version {version}, expected {FORMAT_VERSION}"
        )));
    }
    Ok(())
}
