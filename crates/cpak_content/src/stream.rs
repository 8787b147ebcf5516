//! Bounded reader over a single item

use std::{
    fmt::{self, Debug},
    fs::File,
    io::{self, BufReader, Read, Seek, SeekFrom},
    mem,
};

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::{debug, instrument};

use crate::{
    compression::BlockReader,
    error::{Error, Result},
    manifest::Item,
};

macro_rules! read_le {
    ($($(#[$meta:meta])* $name:ident => $ty:ty, $read:ident;)*) => {
        $(
            $(#[$meta])*
            pub fn $name(&mut self) -> Result<$ty> {
                const SIZE: u64 = mem::size_of::<$ty>() as u64;
                self.ensure(SIZE)?;
                let value = self.reader.$read::<LittleEndian>()?;
                self.position += SIZE;
                Ok(value)
            }
        )*
    };
}

/// A cursor over one item's bytes
///
/// Compressed items are inflated on the fly. Every read is checked against the item's
/// uncompressed size before any byte is consumed, so a decoder can never run into the
/// data of a neighbouring item. The file handle and decompressor state are owned by the
/// stream and released when it is dropped.
///
/// ```no_run
/// # fn doit(manifest: &cpak_content::PackManifest) -> cpak_content::error::Result<()> {
/// use cpak_content::ContentStream;
///
/// let item = manifest.get_item("textures/grass.tex")?;
/// let mut stream = ContentStream::open(&item)?;
/// let width = stream.read_u32()?;
/// let height = stream.read_u32()?;
/// let pixels = stream.read_bytes((width * height * 4) as usize)?;
/// # Ok(())
/// # }
/// ```
pub struct ContentStream {
    item: Item,
    reader: BlockReader<BufReader<File>>,
    position: u64,
}

impl Debug for ContentStream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "ContentStream({} @ {}/{})",
            self.item.name(),
            self.position,
            self.len()
        )
    }
}

impl ContentStream {
    /// Open a stream positioned at the start of the item
    #[instrument(skip(item), fields(item = item.name()), err)]
    pub fn open(item: &Item) -> Result<Self> {
        let file = File::open(item.path())?;
        let reader = BlockReader::new(
            BufReader::new(file),
            item.data_start(),
            item.entry().compressed_size as u64,
            item.entry().compression_method(),
        )?;

        Ok(ContentStream {
            item: item.clone(),
            reader,
            position: 0,
        })
    }

    /// Open a second, independent stream over the same item from its start
    pub fn duplicate(&self) -> Result<Self> {
        ContentStream::open(&self.item)
    }

    /// The item this stream reads
    pub fn item(&self) -> &Item {
        &self.item
    }

    /// Logical position within the uncompressed item
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Uncompressed size of the item
    pub fn len(&self) -> u64 {
        self.item.entry().uncompressed_size as u64
    }

    /// Whether the item has no data
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes left before the end of the item
    pub fn remaining(&self) -> u64 {
        self.len() - self.position
    }

    pub fn is_compressed(&self) -> bool {
        self.item.entry().is_compressed()
    }

    /// Release the file handle and decompressor now rather than on drop
    pub fn close(&mut self) {
        self.reader = BlockReader::Closed;
    }

    fn ensure(&self, size: u64) -> Result<()> {
        if self.position.saturating_add(size) > self.len() {
            return Err(Error::TruncatedRead {
                position: self.position,
                requested: size,
                size: self.len(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        let value = self.reader.read_u8()?;
        self.position += 1;
        Ok(value)
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        self.ensure(1)?;
        let value = self.reader.read_i8()?;
        self.position += 1;
        Ok(value)
    }

    read_le! {
        read_u16 => u16, read_u16;
        read_i16 => i16, read_i16;
        read_u32 => u32, read_u32;
        read_i32 => i32, read_i32;
        read_u64 => u64, read_u64;
        read_i64 => i64, read_i64;
        read_f32 => f32, read_f32;
        read_f64 => f64, read_f64;
    }

    /// Fill `buf` completely from the item
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<()> {
        self.ensure(buf.len() as u64)?;
        self.reader.read_exact(buf)?;
        self.position += buf.len() as u64;
        Ok(())
    }

    /// Read exactly `len` bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.ensure(len as u64)?;
        let mut buf = vec![0u8; len];
        self.read_into(&mut buf)?;
        Ok(buf)
    }

    /// Read everything between the current position and the end of the item
    pub fn read_remaining(&mut self) -> Result<Vec<u8>> {
        let len = usize::try_from(self.remaining())
            .map_err(|_| Error::CustomError("item does not fit in memory".into()))?;
        self.read_bytes(len)
    }

    /// Read a `u32` length prefixed UTF-8 string
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as u64;
        // check before allocating so a corrupt length cannot request a huge buffer
        self.ensure(len)?;
        let bytes = self.read_bytes(len as usize)?;
        String::from_utf8(bytes)
            .map_err(|e| Error::Format(format!("string is not valid utf-8: {e}")))
    }

    /// Move the logical position
    ///
    /// Uncompressed items seek natively. Compressed items only support reading forward, so
    /// a forward seek inflates and drops the skipped bytes, and a backward seek restarts the
    /// decompressor from the beginning of the item and replays up to the target. Avoid
    /// backward seeks on compressed items in hot paths.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let size = self.len();
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.position as i128 + delta as i128,
            SeekFrom::End(delta) => size as i128 + delta as i128,
        };
        if target < 0 || target > size as i128 {
            return Err(Error::Range { target, size });
        }
        let target = target as u64;

        let start = self.item.data_start();
        let limit = self.item.entry().compressed_size as u64;

        if !self.is_compressed() {
            self.reader.seek_raw(start, limit, target)?;
            self.position = target;
            return Ok(target);
        }

        if target < self.position {
            debug!(
                item = self.item.name(),
                from = self.position,
                to = target,
                "replaying compressed item for backward seek"
            );
            let reader = mem::replace(&mut self.reader, BlockReader::Closed);
            self.reader = reader.rewind(start, limit)?;
            self.position = 0;
        }

        let wanted = target - self.position;
        let skipped = self.reader.skip(wanted)?;
        self.position += skipped;
        if skipped != wanted {
            return Err(Error::IOError(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "compressed item ended early",
            )));
        }

        Ok(target)
    }
}

impl Read for ContentStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let max = usize::try_from(self.remaining())
            .unwrap_or(usize::MAX)
            .min(buf.len());
        if max == 0 {
            return Ok(0);
        }
        let read = self.reader.read(&mut buf[..max])?;
        self.position += read as u64;
        Ok(read)
    }
}

impl Seek for ContentStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        ContentStream::seek(self, pos)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))
    }
}
