//! Loaders every registry starts with

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use derive_more::{AsRef, Deref, From, Into};
use indexmap::IndexMap;

use crate::{
    error::{Error, Result},
    loader::{Content, ContentLoader, LoadContext, LoaderDescriptor},
    stream::ContentStream,
};

pub const BYTE_ARRAY_LOADER_ID: u32 = 1;
pub const TEXT_LOADER_ID: u32 = 2;
pub const STRING_TABLE_LOADER_ID: u32 = 3;

pub(crate) fn descriptors() -> [LoaderDescriptor; 3] {
    [
        LoaderDescriptor::new::<ByteArrayLoader>(BYTE_ARRAY_LOADER_ID, "ByteArray"),
        LoaderDescriptor::new::<TextLoader>(TEXT_LOADER_ID, "Text"),
        LoaderDescriptor::new::<StringTableLoader>(STRING_TABLE_LOADER_ID, "StringTable"),
    ]
}

/// The uninterpreted bytes of an item
#[derive(Debug, Clone, Default, PartialEq, Eq, AsRef, Deref, From, Into)]
pub struct ByteArray(Vec<u8>);

impl Content for ByteArray {}

#[derive(Debug, Default)]
pub struct ByteArrayLoader;

impl ContentLoader for ByteArrayLoader {
    type Output = ByteArray;

    fn load(
        &mut self,
        stream: &mut ContentStream,
        _context: &LoadContext<'_>,
    ) -> Result<Option<ByteArray>> {
        Ok(Some(ByteArray(stream.read_remaining()?)))
    }
}

impl Content for String {}

/// Decodes a whole item as UTF-8 text
#[derive(Debug, Default)]
pub struct TextLoader;

impl ContentLoader for TextLoader {
    type Output = String;

    fn load(
        &mut self,
        stream: &mut ContentStream,
        context: &LoadContext<'_>,
    ) -> Result<Option<String>> {
        let bytes = stream.read_remaining()?;
        String::from_utf8(bytes).map(Some).map_err(|e| {
            Error::Format(format!("{} is not valid utf-8: {e}", context.item_name()))
        })
    }
}

/// Ordered key to value string mapping
///
/// Stored as a `u32` entry count followed by that many key and value strings, each a `u32`
/// byte length and UTF-8 bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deref, From, Into)]
pub struct StringTable(IndexMap<String, String>);

impl StringTable {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Encode the table in the layout [`StringTableLoader`] reads
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_u32::<LittleEndian>(self.0.len() as u32)?;
        for (key, value) in &self.0 {
            for s in [key, value] {
                writer.write_u32::<LittleEndian>(s.len() as u32)?;
                writer.write_all(s.as_bytes())?;
            }
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for StringTable {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        StringTable(iter.into_iter().collect())
    }
}

impl Content for StringTable {}

#[derive(Debug, Default)]
pub struct StringTableLoader;

impl ContentLoader for StringTableLoader {
    type Output = StringTable;

    fn load(
        &mut self,
        stream: &mut ContentStream,
        _context: &LoadContext<'_>,
    ) -> Result<Option<StringTable>> {
        let count = stream.read_u32()?;
        // every pair needs at least two length prefixes
        let capacity = (count as u64).min(stream.remaining() / 8) as usize;

        let mut entries = IndexMap::with_capacity(capacity);
        for _ in 0..count {
            let key = stream.read_string()?;
            let value = stream.read_string()?;
            entries.insert(key, value);
        }

        Ok(Some(StringTable(entries)))
    }
}
