//! This library handles building **CPAK** content packs and loading their items at runtime.
//!
//! # CPAK Pack Format Documentation
//!
//! A pack is a manifest file (`.cpak`) plus the data it describes. Release builds pack every item
//! into one or more numbered bin containers (`{stem}.{index}.bin`) next to the manifest. Debug
//! builds write every item to its own loose file (`{item}.dci`) so single items can be swapped
//! without rebuilding the pack.
//!
//! ## Manifest
//!
//! | Offset (bytes) | Field                  | Description                                                |
//! |----------------|------------------------|------------------------------------------------------------|
//! | 0x0000         | Magic number           | 4 bytes: "CPAK"                                            |
//! | 0x0004         | Version                | 1 byte: Fixed value 0x01                                   |
//! | 0x0005         | Build flags            | 1 byte: bit 0 release, bit 1 compressed                    |
//! | 0x0006         | Timestamp              | 4 bytes: Build timestamp every container repeats           |
//! | 0x000A         | Loader count           | 4 bytes: Number of loader table rows                       |
//!
//! The header is followed by the loader table, one `(name, identifier)` row per loader. The
//! runtime resolves each name through its [`LoaderRegistry`]; entries refer to loaders by the
//! identifier.
//!
//! Release builds then store a `u32` container count, followed by every container's header and
//! entry table:
//!
//! | Offset (bytes) | Field                  | Description                                             |
//! |----------------|------------------------|---------------------------------------------------------|
//! | 0x0000         | Name                   | String: Name of the item, unique across the pack        |
//! | var            | Compressed Size        | 4 bytes: Size of the item data in the container         |
//! | var + 0x04     | Uncompressed Size      | 4 bytes: Size of the data when uncompressed             |
//! | var + 0x08     | Offset                 | 4 bytes: Offset of the data from the container header   |
//! | var + 0x0C     | Loader                 | 4 bytes: Loader table identifier                        |
//!
//! An item is zlib compressed exactly when its two sizes differ.
//!
//! ## Bin Container
//!
//! | Offset (bytes) | Field                  | Description                                                |
//! |----------------|------------------------|------------------------------------------------------------|
//! | 0x0000         | Magic number           | 4 bytes: "CBIN"                                            |
//! | 0x0004         | Version                | 1 byte: Fixed value 0x01                                   |
//! | 0x0005         | Item count             | 4 bytes: Must match the manifest                           |
//! | 0x0009         | Timestamp              | 4 bytes: Must match the manifest                           |
//!
//! Item data follows the header. A container whose count or timestamp disagrees with the
//! manifest is stale and fails the whole open.
//!
//! ## Debug Item File
//!
//! | Offset (bytes) | Field                  | Description                                                |
//! |----------------|------------------------|------------------------------------------------------------|
//! | 0x0000         | Magic number           | 4 bytes: "DCI "                                            |
//! | 0x0004         | Version                | 1 byte: Fixed value 0x01                                   |
//! | 0x0005         | Loader                 | 4 bytes: Loader table identifier                           |
//! | 0x0009         | Compressed Size        | 4 bytes: Size of the data following the header             |
//! | 0x000D         | Uncompressed Size      | 4 bytes: Size of the data when uncompressed                |
//!
//! ## Additional Information
//!
//! - **Endianness**: Little-endian for all multi-byte integers
//! - **Strings**: `u32` byte length followed by UTF-8 bytes
//! - **Compression**: zlib, only kept when it is smaller than the input
//!

pub mod compression;
pub mod error;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod services;
pub mod stream;
pub mod types;
pub mod write;

pub use compression::CompressionMethod;
pub use loader::{
    ByteArray, ByteArrayLoader, Content, ContentLoader, Disposable, LoadContext, LoaderDescriptor, LoaderRegistry,
    StringTable, BYTE_ARRAY_LOADER_ID, STRING_TABLE_LOADER_ID, TEXT_LOADER_ID,
};
pub use manager::{ContentManager, LoadOptions};
pub use manifest::{Entry, Item, PackManifest};
pub use services::ContentServices;
pub use stream::ContentStream;
pub use write::{BuildMode, PackWriter};
