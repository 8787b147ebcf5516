//! Block compression and decompression handling.

use std::io::{self, Read, Seek, SeekFrom, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use tracing::instrument;

/// Identifies how an item's bytes are stored inside a container
///
/// The format has no explicit method field: an item is compressed exactly when its stored
/// size differs from its uncompressed size.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Stores the data as it is
    None,

    /// Compress the data using Zlib
    #[default]
    Zlib,
}

impl CompressionMethod {
    /// Derive the storage method from an entry's sizes
    pub fn for_sizes(compressed_size: u64, uncompressed_size: u64) -> Self {
        if compressed_size == uncompressed_size {
            CompressionMethod::None
        } else {
            CompressionMethod::Zlib
        }
    }
}

/// Reader over one block of a container, limited to the block's stored size
pub(crate) enum BlockReader<R: Read + Seek> {
    Raw(io::Take<R>),
    Compressed(Box<ZlibDecoder<io::Take<R>>>),
    Closed,
}

impl<R: Read + Seek> BlockReader<R> {
    #[instrument(skip(reader))]
    pub fn new(
        mut reader: R,
        start: u64,
        limit: u64,
        compression: CompressionMethod,
    ) -> io::Result<Self> {
        reader.seek(SeekFrom::Start(start))?;

        let limit_reader = reader.take(limit);
        Ok(match compression {
            CompressionMethod::None => BlockReader::Raw(limit_reader),
            CompressionMethod::Zlib => {
                BlockReader::Compressed(Box::new(ZlibDecoder::new(limit_reader)))
            }
        })
    }

    /// Move the raw reader to `start` within the block, keeping the same limit
    ///
    /// Only valid for uncompressed blocks.
    #[instrument(skip(self), err)]
    pub fn seek_raw(&mut self, block_start: u64, limit: u64, offset: u64) -> io::Result<()> {
        match self {
            BlockReader::Raw(r) => {
                r.get_mut().seek(SeekFrom::Start(block_start + offset))?;
                r.set_limit(limit - offset);
                Ok(())
            }
            BlockReader::Compressed(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "compressed blocks cannot seek natively",
            )),
            BlockReader::Closed => Err(closed()),
        }
    }

    /// Rebuild the reader at the start of the block with fresh decompressor state
    #[instrument(skip(self), err)]
    pub fn rewind(self, start: u64, limit: u64) -> io::Result<Self> {
        let compression = match &self {
            BlockReader::Raw(_) => CompressionMethod::None,
            BlockReader::Compressed(_) => CompressionMethod::Zlib,
            BlockReader::Closed => return Err(closed()),
        };
        let inner = self.into_inner()?;
        BlockReader::new(inner, start, limit, compression)
    }

    /// Discard `count` bytes from the reader
    pub fn skip(&mut self, count: u64) -> io::Result<u64> {
        io::copy(&mut self.by_ref().take(count), &mut io::sink())
    }

    #[instrument(skip(self), err)]
    pub fn into_inner(self) -> io::Result<R> {
        match self {
            BlockReader::Raw(r) => Ok(r.into_inner()),
            BlockReader::Compressed(r) => Ok(r.into_inner().into_inner()),
            BlockReader::Closed => Err(closed()),
        }
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "stream is closed")
}

impl<R: Read + Seek> Read for BlockReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BlockReader::Raw(r) => r.read(buf),
            BlockReader::Compressed(r) => r.read(buf),
            BlockReader::Closed => Err(closed()),
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        match self {
            BlockReader::Raw(r) => r.read_exact(buf),
            BlockReader::Compressed(r) => r.read_exact(buf),
            BlockReader::Closed => Err(closed()),
        }
    }
}

/// Compress a whole block with zlib
#[instrument(skip_all, err, fields(size = data.len()))]
pub(crate) fn compress_block(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}
