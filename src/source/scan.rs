use crate::batch::RecordBatch;
use crate::error::Result;
use crate::file::{IndexEntry, FILE_HEADER_SIZE};
use crate::schema::{INDEX_TYPE, LIBRARY_TYPE};
use crate::Error;

use super::Source;

/// A finite, one-pass producer of record batches. `Ok(None)` marks the end;
/// after an error the producer should not be polled again.
pub trait BatchSource {
    fn next_batch(&mut self) -> Result<Option<RecordBatch>>;
}

/// Every batch in file order, type library and index included, found by
/// following each batch's declared length.
pub struct SequentialScan<'a> {
    source: &'a Source,
    offset: u64,
    done: bool,
}

impl<'a> SequentialScan<'a> {
    pub(super) fn new(source: &'a Source) -> Self {
        Self {
            source,
            offset: FILE_HEADER_SIZE as u64,
            done: false,
        }
    }

    /// Offset of the next batch to be read.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl BatchSource for SequentialScan<'_> {
    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        if self.done {
            return Ok(None);
        }
        let batch = self.source.read_batch_at(&mut self.offset);
        if !matches!(batch, Ok(Some(_))) {
            self.done = true;
        }
        batch
    }
}

impl Iterator for SequentialScan<'_> {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch().transpose()
    }
}

/// Data batches located through the offset index, optionally restricted to
/// one type.
pub struct IndexScan<'a> {
    source: &'a Source,
    entries: std::slice::Iter<'a, IndexEntry>,
    type_name: Option<String>,
    done: bool,
}

impl<'a> IndexScan<'a> {
    pub(super) fn new(source: &'a Source, type_name: Option<String>) -> Self {
        Self {
            source,
            entries: source.index_entries().iter(),
            type_name,
            done: false,
        }
    }

    fn wants(&self, entry: &IndexEntry) -> bool {
        match &self.type_name {
            Some(name) => entry.type_name == *name,
            None => entry.type_name != LIBRARY_TYPE && entry.type_name != INDEX_TYPE,
        }
    }

    fn read(&self, entry: &IndexEntry) -> Result<RecordBatch> {
        let mut offset = entry.offset;
        let batch = self.source.read_batch_at(&mut offset)?.ok_or_else(|| {
            Error::InvalidFormat(format!("index entry at {} points past the data", entry.offset))
        })?;
        if batch.type_name() != entry.type_name {
            return Err(Error::InvalidFormat(format!(
                "index says {} at offset {}, found {}",
                entry.type_name,
                entry.offset,
                batch.type_name()
            )));
        }
        Ok(batch)
    }
}

impl BatchSource for IndexScan<'_> {
    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        if self.done {
            return Ok(None);
        }
        while let Some(entry) = self.entries.next() {
            if !self.wants(entry) {
                continue;
            }
            return match self.read(entry) {
                Ok(batch) => Ok(Some(batch)),
                Err(err) => {
                    self.done = true;
                    Err(err)
                }
            };
        }
        self.done = true;
        Ok(None)
    }
}

impl Iterator for IndexScan<'_> {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch().transpose()
    }
}
