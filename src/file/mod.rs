//! Container file layout.
//!
//! ```text
//! +-------------------+ 0
//! | file header (40)  |
//! +-------------------+ 40
//! | type library      |  packed batch, one record per user type
//! +-------------------+
//! | data batches ...  |
//! +-------------------+ index_offset
//! | offset index      |  packed batch: (offset, type) of every batch
//! +-------------------+
//! | tail (28)         |
//! +-------------------+
//! ```

pub mod header;
pub mod index;
pub mod library;
pub mod tail;

pub use header::FILE_HEADER_SIZE;
pub use index::IndexEntry;
pub use tail::{Tail, TAIL_SIZE};

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::codec::{self, Endian, PackOptions, PackedBatch};
use crate::error::Result;
use crate::hasher::mix3;
use crate::schema::{Schema, INDEX_TYPE};
use crate::Error;

const CHAIN_SEED: u32 = 1972;

/// Fold one batch checksum into the running file checksum.
pub fn chain(prev: u32, batch_checksum: u32) -> u32 {
    mix3(batch_checksum, prev, CHAIN_SEED)
}

/// Append-only writer for one container file. Owns the write offset, the
/// chained checksum and the offset index.
#[derive(Debug)]
pub struct FileWriter {
    file: File,
    path: PathBuf,
    endian: Endian,
    offset: u64,
    chain: u32,
    index: Vec<IndexEntry>,
}

impl FileWriter {
    pub fn create(path: impl AsRef<Path>, endian: Endian) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::options()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        let bytes = header::encode(endian)?;
        write_fully(&mut file, &bytes)?;

        Ok(Self {
            file,
            path,
            endian,
            offset: bytes.len() as u64,
            chain: 0,
            index: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn chained_checksum(&self) -> u32 {
        self.chain
    }

    pub fn index(&self) -> &[IndexEntry] {
        &self.index
    }

    /// Append a packed batch at the current offset and return that offset.
    pub fn append(&mut self, type_name: &str, packed: &PackedBatch) -> Result<u64> {
        let offset = self.offset;
        write_fully(&mut self.file, &packed.bytes)?;
        self.offset += packed.bytes.len() as u64;
        self.chain = chain(self.chain, packed.checksum);
        self.index.push(IndexEntry {
            offset,
            type_name: type_name.to_string(),
        });
        Ok(offset)
    }

    /// Write the index batch and the tail. The index lists itself as its last
    /// entry.
    pub fn finish(mut self, index_schema: &Arc<Schema>, options: &PackOptions, fsync: bool) -> Result<Tail> {
        let index_offset = self.offset;
        self.index.push(IndexEntry {
            offset: index_offset,
            type_name: INDEX_TYPE.to_string(),
        });
        let batch = index::build(index_schema, &self.index)?;
        let packed = codec::pack(&batch, options)?;
        write_fully(&mut self.file, &packed.bytes)?;
        self.offset += packed.bytes.len() as u64;
        self.chain = chain(self.chain, packed.checksum);

        let tail = Tail {
            index_size: u32::try_from(packed.bytes.len()).map_err(|_| {
                Error::ProtocolMisuse(format!("index of {} bytes", packed.bytes.len()))
            })?,
            chained_checksum: self.chain,
            index_offset,
        };
        write_fully(&mut self.file, &tail.encode(self.endian)?)?;
        self.file.flush()?;
        if fsync {
            self.file.sync_all()?;
        }

        tracing::info!(
            path = %self.path.display(),
            batches = self.index.len(),
            size = self.offset + TAIL_SIZE as u64,
            checksum = tail.chained_checksum,
            "closed extent file"
        );
        Ok(tail)
    }
}

/// Write the whole buffer; a write that makes no progress is a short write.
fn write_fully(file: &mut File, bytes: &[u8]) -> Result<()> {
    let mut written = 0;
    while written < bytes.len() {
        match file.write(&bytes[written..]) {
            Ok(0) => {
                return Err(Error::ShortWrite {
                    expected: bytes.len(),
                    written,
                })
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(unix)]
fn read_some_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_some_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

/// Positioned read that only stops early at end of file. Returns the number
/// of bytes read.
pub(crate) fn read_at(file: &File, buf: &mut [u8], offset: u64) -> Result<usize> {
    let mut read = 0;
    while read < buf.len() {
        match read_some_at(file, &mut buf[read..], offset + read as u64) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(read)
}

pub(crate) fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    let read = read_at(file, buf, offset)?;
    if read != buf.len() {
        return Err(Error::ShortRead {
            expected: buf.len(),
            read,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TypeRegistry;
    use tempfile::tempdir;

    #[test]
    fn test_chain_depends_on_order() {
        let ab = chain(chain(0, 1), 2);
        let ba = chain(chain(0, 2), 1);
        assert_ne!(ab, ba);
        assert_eq!(ab, chain(chain(0, 1), 2));
    }

    #[test]
    fn test_writer_layout() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("layout.ext");
        let registry = TypeRegistry::new();

        let mut writer = FileWriter::create(&path, Endian::Big)?;
        let packed = codec::pack(
            &library::build(&registry)?,
            &PackOptions { endian: Endian::Big, ..Default::default() },
        )?;
        let at = writer.append(crate::schema::LIBRARY_TYPE, &packed)?;
        assert_eq!(at, FILE_HEADER_SIZE as u64);
        assert_eq!(writer.chained_checksum(), chain(0, packed.checksum));

        let options = PackOptions { endian: Endian::Big, ..Default::default() };
        let tail = writer.finish(registry.index_schema(), &options, true)?;

        let bytes = std::fs::read(&path)?;
        assert_eq!(header::detect(&bytes)?, Endian::Big);
        let decoded = Tail::decode(&bytes[bytes.len() - TAIL_SIZE..], Endian::Big)?;
        assert_eq!(decoded, tail);
        assert_eq!(
            tail.index_offset + tail.index_size as u64,
            (bytes.len() - TAIL_SIZE) as u64
        );
        Ok(())
    }

    #[test]
    fn test_read_at_reports_short_read() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("short");
        std::fs::write(&path, b"0123456789")?;
        let file = File::open(&path)?;

        let mut buf = [0u8; 4];
        read_exact_at(&file, &mut buf, 2)?;
        assert_eq!(&buf, b"2345");

        assert_eq!(read_at(&file, &mut buf, 8)?, 2);
        assert!(matches!(
            read_exact_at(&file, &mut buf, 8),
            Err(Error::ShortRead { expected: 4, read: 2 })
        ));
        Ok(())
    }
}
