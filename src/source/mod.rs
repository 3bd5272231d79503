//! Read side of an extent file.

mod scan;

pub use scan::{BatchSource, IndexScan, SequentialScan};

use itertools::{EitherOrBoth, Itertools};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::batch::RecordBatch;
use crate::codec::{self, header::PREFIX_SIZE, Endian};
use crate::config::{ReadChecks, SourceOptions};
use crate::error::Result;
use crate::file::{self, header, index, library, tail, IndexEntry, Tail, FILE_HEADER_SIZE, TAIL_SIZE};
use crate::schema::{Schema, TypeRegistry, INDEX_TYPE, LIBRARY_TYPE};
use crate::Error;

/// An open extent file: header, tail, offset index and type library are
/// loaded and checked up front; batches are read on demand with positioned
/// reads, so a `Source` can be shared between readers.
#[derive(Debug)]
pub struct Source {
    file: File,
    path: PathBuf,
    size: u64,
    endian: Endian,
    checks: ReadChecks,
    registry: TypeRegistry,
    index: Vec<IndexEntry>,
    tail: Tail,
}

impl Source {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, SourceOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: SourceOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let checks = match options.read_checks {
            Some(checks) => checks,
            None => ReadChecks::process_default()?,
        };
        let file = File::open(&path)?;
        let size = file.metadata()?.len();
        if size < (FILE_HEADER_SIZE + TAIL_SIZE) as u64 {
            return Err(Error::InvalidFormat(format!(
                "{} is {} bytes, too short for an extent file",
                path.display(),
                size
            )));
        }

        let mut head = [0u8; FILE_HEADER_SIZE];
        file::read_exact_at(&file, &mut head, 0)?;
        let endian = header::detect(&head)?;

        let tail_offset = size - TAIL_SIZE as u64;
        let mut tail_bytes = [0u8; TAIL_SIZE];
        file::read_exact_at(&file, &mut tail_bytes, tail_offset)?;
        let tail = Tail::decode(&tail_bytes, endian)?;
        if tail.index_offset + u64::from(tail.index_size) != tail_offset {
            return Err(Error::InvalidFormat(format!(
                "index at {} with {} bytes does not end at the tail ({})",
                tail.index_offset, tail.index_size, tail_offset
            )));
        }

        let mut source = Source {
            file,
            path,
            size,
            endian,
            checks,
            registry: TypeRegistry::new(),
            index: Vec::new(),
            tail,
        };

        let index_batch = source.read_internal(tail.index_offset, INDEX_TYPE)?;
        source.index = index::load(&index_batch)?;
        source.check_index()?;

        let library_batch = source.read_internal(FILE_HEADER_SIZE as u64, LIBRARY_TYPE)?;
        source.registry = library::load(&library_batch)?;

        tracing::info!(
            path = %source.path.display(),
            size,
            byte_order = ?endian,
            need_bitflip = source.need_bitflip(),
            types = source.registry.len(),
            batches = source.index.len(),
            "opened extent source"
        );
        Ok(source)
    }

    /// Read one of the two internal batches, failing with `InvalidFormat` if
    /// something else is stored there.
    fn read_internal(&self, offset: u64, type_name: &str) -> Result<RecordBatch> {
        let mut next = offset;
        let bytes = self.read_packed_at(&mut next)?.ok_or_else(|| {
            Error::InvalidFormat(format!("no {} batch at offset {}", type_name, offset))
        })?;
        let found = codec::packed_type_name(&bytes)?;
        if found != type_name {
            return Err(Error::InvalidFormat(format!(
                "expected {} at offset {}, found {}",
                type_name, offset, found
            )));
        }
        let schema = self.registry.lookup(type_name)?;
        codec::unpack(&bytes, &schema, self.need_bitflip(), self.checks)
    }

    fn check_index(&self) -> Result<()> {
        let first = self.index.first();
        if !first.is_some_and(|e| e.offset == FILE_HEADER_SIZE as u64 && e.type_name == LIBRARY_TYPE) {
            return Err(Error::InvalidFormat(format!(
                "index does not start with the type library: {:?}",
                first
            )));
        }
        let last = self.index.last();
        if !last.is_some_and(|e| e.offset == self.tail.index_offset && e.type_name == INDEX_TYPE) {
            return Err(Error::InvalidFormat(format!(
                "index does not end with itself: {:?}",
                last
            )));
        }
        if let Some((prev, next)) = self.index.iter().tuple_windows().find(|(a, b)| a.offset >= b.offset) {
            return Err(Error::InvalidFormat(format!(
                "index offsets out of order: {} then {}",
                prev.offset, next.offset
            )));
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Byte order the file was written in.
    pub fn byte_order(&self) -> Endian {
        self.endian
    }

    /// Whether the writer's byte order differs from this host's.
    pub fn need_bitflip(&self) -> bool {
        !self.endian.is_native()
    }

    pub fn read_checks(&self) -> ReadChecks {
        self.checks
    }

    /// Types from the file's type library.
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn schema(&self, type_name: &str) -> Result<Arc<Schema>> {
        self.registry.lookup(type_name)
    }

    /// Offset index, type library first and the index itself last.
    pub fn index_entries(&self) -> &[IndexEntry] {
        &self.index
    }

    pub fn tail(&self) -> &Tail {
        &self.tail
    }

    /// Read the packed bytes of the batch at `offset` and advance `offset`
    /// past it. `None` at end of file or at the tail.
    fn read_packed_at(&self, offset: &mut u64) -> Result<Option<Vec<u8>>> {
        let mut prefix = [0u8; PREFIX_SIZE];
        let read = file::read_at(&self.file, &mut prefix, *offset)?;
        if read == 0 || tail::is_tail(&prefix[..read]) {
            return Ok(None);
        }
        if read < PREFIX_SIZE {
            return Err(Error::ShortRead {
                expected: PREFIX_SIZE,
                read,
            });
        }

        let len = codec::header::packed_len(&prefix, self.endian)?;
        let remaining = self.size.saturating_sub(*offset);
        if len as u64 > remaining {
            return Err(Error::ShortRead {
                expected: len,
                read: remaining as usize,
            });
        }
        let mut bytes = vec![0u8; len];
        bytes[..PREFIX_SIZE].copy_from_slice(&prefix);
        file::read_exact_at(&self.file, &mut bytes[PREFIX_SIZE..], *offset + PREFIX_SIZE as u64)?;
        *offset += len as u64;
        Ok(Some(bytes))
    }

    /// Read and decode the batch at `offset`, advancing `offset` to the next
    /// batch. Returns `None` only at a clean batch boundary at the end of the
    /// data.
    pub fn read_batch_at(&self, offset: &mut u64) -> Result<Option<RecordBatch>> {
        let start = *offset;
        let Some(bytes) = self.read_packed_at(offset)? else {
            return Ok(None);
        };
        let type_name = codec::packed_type_name(&bytes)?;
        let schema = self.registry.lookup(&type_name)?;
        let batch = codec::unpack(&bytes, &schema, self.need_bitflip(), self.checks)?;
        tracing::debug!(offset = start, type_name = %type_name, records = batch.nrecords(), "read batch");
        Ok(Some(batch))
    }

    /// Every batch in file order.
    pub fn scan(&self) -> SequentialScan<'_> {
        SequentialScan::new(self)
    }

    /// Data batches in index order.
    pub fn data_batches(&self) -> IndexScan<'_> {
        IndexScan::new(self, None)
    }

    /// Batches of one type in index order.
    pub fn batches_of(&self, type_name: &str) -> IndexScan<'_> {
        IndexScan::new(self, Some(type_name.to_string()))
    }

    /// Re-read the whole file: every batch is decoded with the configured
    /// checks, the chained checksum is recomputed and compared with the tail,
    /// and batch offsets are matched against the index. Returns the number
    /// of batches checked.
    pub fn verify(&self) -> Result<usize> {
        let mut offset = FILE_HEADER_SIZE as u64;
        let mut chain = 0;
        let mut found = Vec::with_capacity(self.index.len());
        loop {
            let start = offset;
            let Some(bytes) = self.read_packed_at(&mut offset)? else {
                break;
            };
            chain = file::chain(chain, codec::packed_checksum(&bytes, self.need_bitflip())?);
            let type_name = codec::packed_type_name(&bytes)?;
            codec::unpack(&bytes, &self.registry.lookup(&type_name)?, self.need_bitflip(), self.checks)?;
            found.push(IndexEntry { offset: start, type_name });
        }

        let tail_offset = self.size - TAIL_SIZE as u64;
        if offset != tail_offset {
            return Err(Error::InvalidFormat(format!(
                "batches end at {}, tail starts at {}",
                offset, tail_offset
            )));
        }
        if let Some((position, pair)) = found
            .iter()
            .zip_longest(&self.index)
            .find_position(|pair| !matches!(pair, EitherOrBoth::Both(a, b) if a == b))
        {
            return Err(Error::InvalidFormat(format!(
                "batch {} disagrees with the index: {:?}",
                position, pair
            )));
        }
        if chain != self.tail.chained_checksum {
            return Err(Error::CorruptData(format!(
                "chained checksum {:#010x} != {:#010x} stored in the tail",
                chain, self.tail.chained_checksum
            )));
        }

        tracing::debug!(path = %self.path.display(), batches = found.len(), checksum = chain, "verified extent file");
        Ok(found.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Value;
    use crate::codec::header::pad4;
    use crate::codec::{MODE_LZ4, MODE_SNAPPY, MODE_ZLIB, MODE_ZSTD};
    use crate::config::SinkConfig;
    use crate::schema::{FieldKind, FieldSpec, SchemaDescriptor};
    use crate::sink::Sink;
    use std::fs::OpenOptions;
    use std::os::unix::fs::FileExt;
    use std::thread;
    use tempfile::tempdir;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn int_type() -> Result<(TypeRegistry, Arc<Schema>)> {
        let mut registry = TypeRegistry::new();
        let schema = registry.register(
            SchemaDescriptor::new("T")
                .namespace("test")
                .version("1.0")
                .field(FieldSpec::new("value", FieldKind::Int32)),
        )?;
        Ok((registry, schema))
    }

    fn int_batch(schema: &Arc<Schema>, values: &[i32]) -> Result<RecordBatch> {
        let mut batch = RecordBatch::new(schema.clone());
        for &value in values {
            let row = batch.append_record();
            batch.set(row, "value", value)?;
        }
        Ok(batch)
    }

    fn int_values(batch: &RecordBatch) -> Result<Vec<i32>> {
        (0..batch.nrecords())
            .map(|row| Ok(batch.get_i32(row, "value")?.unwrap_or_default()))
            .collect()
    }

    fn write_ab(path: &Path, config: SinkConfig) -> Result<Tail> {
        let (registry, schema) = int_type()?;
        let sink = Sink::open(path, config)?;
        sink.write_type_library(&registry)?;
        sink.submit(int_batch(&schema, &[1, 2, 3])?, None)?;
        sink.submit(int_batch(&schema, &[4, 5])?, None)?;
        sink.close(true)?;
        Ok(*Source::open_with(path, SourceOptions::new().read_checks(ReadChecks::all()))?.tail())
    }

    #[test]
    fn test_two_batch_scenario() -> Result<()> {
        init_tracing();
        let dir = tempdir()?;
        let path = dir.path().join("ab.ext");
        write_ab(&path, SinkConfig::new().compressors(2))?;

        let source = Source::open_with(&path, SourceOptions::new().read_checks(ReadChecks::all()))?;
        let data: Vec<&IndexEntry> = source
            .index_entries()
            .iter()
            .filter(|e| e.type_name == "T")
            .collect();
        assert_eq!(data.len(), 2);

        let batches = source.data_batches().collect::<Result<Vec<_>>>()?;
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].nrecords(), 3);
        assert_eq!(batches[1].nrecords(), 2);
        assert_eq!(int_values(&batches[0])?, vec![1, 2, 3]);
        assert_eq!(int_values(&batches[1])?, vec![4, 5]);
        assert_eq!(source.verify()?, 4);

        // flip one byte of B's stored fixed section
        let b_offset = data[1].offset;
        let payload = b_offset + (PREFIX_SIZE + pad4("T".len())) as u64;
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let mut byte = [0u8; 1];
        file.read_exact_at(&mut byte, payload)?;
        file.write_all_at(&[byte[0] ^ 0x5a], payload)?;
        drop(file);

        let source = Source::open_with(&path, SourceOptions::new().read_checks(ReadChecks::all()))?;
        let mut offset = data[0].offset;
        assert!(source.read_batch_at(&mut offset)?.is_some());
        assert_eq!(offset, b_offset);
        assert!(matches!(
            source.read_batch_at(&mut offset),
            Err(Error::CorruptData(_))
        ));
        assert!(matches!(source.verify(), Err(Error::CorruptData(_))));
        Ok(())
    }

    #[test]
    fn test_post_uncompress_check_alone_catches_damage() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("post.ext");
        write_ab(&path, SinkConfig::new().compressors(0).compression_modes(0))?;

        let post_only = ReadChecks {
            pre_uncompress: false,
            post_uncompress: true,
            variable: false,
        };
        let source = Source::open_with(&path, SourceOptions::new().read_checks(post_only))?;
        let b_offset = source.index_entries()[2].offset;
        drop(source);

        let payload = b_offset + (PREFIX_SIZE + pad4("T".len())) as u64;
        let file = OpenOptions::new().write(true).open(&path)?;
        file.write_all_at(&[0x7f], payload)?;
        drop(file);

        let source = Source::open_with(&path, SourceOptions::new().read_checks(post_only))?;
        let mut offset = b_offset;
        assert!(matches!(
            source.read_batch_at(&mut offset),
            Err(Error::CorruptData(_))
        ));

        let unchecked = Source::open_with(&path, SourceOptions::new().read_checks(ReadChecks::none()))?;
        let mut offset = b_offset;
        let damaged = unchecked.read_batch_at(&mut offset)?;
        assert_eq!(damaged.map(|b| int_values(&b)).transpose()?, Some(vec![0x7f, 5]));
        Ok(())
    }

    #[test]
    fn test_damaged_compressed_payload_is_corrupt() -> Result<()> {
        let post_only = ReadChecks {
            pre_uncompress: false,
            post_uncompress: true,
            variable: false,
        };
        let values: Vec<i32> = (0..2000).map(|i| i % 9).collect();
        let dir = tempdir()?;

        for modes in [MODE_LZ4, MODE_SNAPPY, MODE_ZSTD, MODE_ZLIB] {
            let path = dir.path().join(format!("compressed-{}.ext", modes));
            let (registry, schema) = int_type()?;
            let sink = Sink::open(&path, SinkConfig::new().compressors(0).compression_modes(modes))?;
            sink.write_type_library(&registry)?;
            sink.submit(int_batch(&schema, &values)?, None)?;
            sink.close(true)?;

            let source = Source::open_with(&path, SourceOptions::new().read_checks(post_only))?;
            let offset = source.index_entries()[1].offset;
            let mut head = vec![0u8; PREFIX_SIZE + pad4("T".len())];
            file::read_exact_at(&source.file, &mut head, offset)?;
            let header = codec::BatchHeader::decode(&head, source.byte_order())?;
            assert_eq!(header.fixed_mode.mask(), modes);

            let file = OpenOptions::new().read(true).write(true).open(&path)?;
            let start = offset + head.len() as u64;
            for pos in start..start + header.compressed_fixed as u64 {
                let mut byte = [0u8; 1];
                file.read_exact_at(&mut byte, pos)?;
                file.write_all_at(&[byte[0] ^ 0xa5], pos)?;

                let mut at = offset;
                match source.read_batch_at(&mut at) {
                    Ok(Some(batch)) => assert_eq!(int_values(&batch)?, values),
                    Err(Error::CorruptData(_)) => {}
                    other => panic!("mode {} byte {}: {:?}", modes, pos - start, other.map(|b| b.is_some())),
                }
                file.write_all_at(&byte, pos)?;
            }
            assert_eq!(source.verify()?, 3);
        }
        Ok(())
    }

    #[test]
    fn test_submission_order_is_write_order() -> Result<()> {
        init_tracing();
        let dir = tempdir()?;
        let path = dir.path().join("order.ext");
        let mut registry = TypeRegistry::new();
        let schema = registry.register(
            SchemaDescriptor::new("order::item")
                .field(FieldSpec::new("producer", FieldKind::Int32))
                .field(FieldSpec::new("seq", FieldKind::Int64).delta())
                .field(FieldSpec::new("payload", FieldKind::Variable)),
        )?;

        let sink = Sink::open(&path, SinkConfig::new().compressors(4).max_bytes_in_progress(4096))?;
        sink.write_type_library(&registry)?;

        let make = |producer: i32, seq: i64| -> Result<RecordBatch> {
            let mut batch = RecordBatch::new(schema.clone());
            // vary sizes so compression finishes out of order
            for i in 0..(1 + (seq % 7) * 40) {
                let row = batch.append_record();
                batch.set(row, "producer", producer)?;
                batch.set(row, "seq", seq)?;
                batch.set(row, "payload", format!("{}-{}-{}", producer, seq, i).repeat((i % 5) as usize + 1).as_str())?;
            }
            Ok(batch)
        };

        // one producer: file order must equal submission order exactly
        for seq in 0..40 {
            sink.submit(make(-1, seq)?, None)?;
        }
        thread::scope(|scope| -> Result<()> {
            let producers: Vec<_> = (0..4)
                .map(|producer| {
                    let sink = &sink;
                    let make = &make;
                    scope.spawn(move || -> Result<()> {
                        for seq in 0..25 {
                            sink.submit(make(producer, seq)?, None)?;
                        }
                        Ok(())
                    })
                })
                .collect();
            for producer in producers {
                producer
                    .join()
                    .map_err(|_| Error::ProtocolMisuse("producer panicked".to_string()))??;
            }
            Ok(())
        })?;
        sink.close(false)?;

        let source = Source::open(&path)?;
        let mut seen: Vec<(i32, i64)> = Vec::new();
        let mut scan = source.data_batches();
        while let Some(batch) = scan.next_batch()? {
            seen.push((
                batch.get_i32(0, "producer")?.unwrap_or_default(),
                batch.get_i64(0, "seq")?.unwrap_or_default(),
            ));
        }
        assert_eq!(seen.len(), 140);
        let single: Vec<i64> = seen[..40].iter().map(|&(_, s)| s).collect();
        assert_eq!(single, (0..40).collect::<Vec<_>>());
        for producer in 0..4 {
            let seqs: Vec<i64> = seen
                .iter()
                .filter(|&&(p, _)| p == producer)
                .map(|&(_, s)| s)
                .collect();
            assert_eq!(seqs, (0..25).collect::<Vec<_>>());
        }
        assert_eq!(source.verify()?, 142);
        Ok(())
    }

    #[test]
    fn test_opposite_byte_order() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("flipped.ext");
        let mut registry = TypeRegistry::new();
        let schema = registry.register(
            SchemaDescriptor::new("flip::row")
                .namespace("test")
                .version("1.0")
                .null_compaction(true)
                .field(FieldSpec::new("ok", FieldKind::Bool))
                .field(FieldSpec::new("tag", FieldKind::Byte).nullable())
                .field(FieldSpec::new("n", FieldKind::Int32).delta())
                .field(FieldSpec::new("big", FieldKind::Int64).nullable())
                .field(FieldSpec::new("x", FieldKind::Double))
                .field(FieldSpec::new("name", FieldKind::Variable).unique()),
        )?;

        let mut batch = RecordBatch::new(schema.clone());
        for i in 0..30i64 {
            let row = batch.append_record();
            batch.set(row, "ok", i % 3 == 0)?;
            if i % 4 == 0 {
                batch.set_null(row, "tag")?;
            } else {
                batch.set(row, "tag", (i as u8) ^ 0xa5)?;
            }
            batch.set(row, "n", (i * i) as i32 - 100)?;
            if i % 5 != 0 {
                batch.set(row, "big", i << 40)?;
            } else {
                batch.set_null(row, "big")?;
            }
            batch.set(row, "x", i as f64 / 7.0)?;
            batch.set(row, "name", ["alpha", "beta", "gamma"][(i % 3) as usize])?;
        }
        let expected: Vec<Vec<Value>> = (0..batch.nrecords())
            .map(|row| batch.row_values(row))
            .collect::<Result<_>>()?;

        let order = Endian::native().opposite();
        let sink = Sink::open(&path, SinkConfig::new().compressors(2).byte_order(order))?;
        sink.write_type_library(&registry)?;
        sink.submit(batch, None)?;
        sink.close(false)?;

        let source = Source::open(&path)?;
        assert_eq!(source.byte_order(), order);
        assert!(source.need_bitflip());
        assert_eq!(*source.schema("flip::row")?, *schema);

        let read = source.batches_of("flip::row").collect::<Result<Vec<_>>>()?;
        assert_eq!(read.len(), 1);
        let actual: Vec<Vec<Value>> = (0..read[0].nrecords())
            .map(|row| read[0].row_values(row))
            .collect::<Result<_>>()?;
        assert_eq!(actual, expected);
        assert_eq!(source.verify()?, 3);
        Ok(())
    }

    #[test]
    fn test_chained_checksum_is_deterministic() -> Result<()> {
        let dir = tempdir()?;
        let threaded = write_ab(&dir.path().join("a.ext"), SinkConfig::new().compressors(3))?;
        let inline = write_ab(&dir.path().join("b.ext"), SinkConfig::new().compressors(0))?;
        assert_eq!(threaded.chained_checksum, inline.chained_checksum);
        assert_eq!(threaded, inline);

        let (registry, schema) = int_type()?;
        let path = dir.path().join("c.ext");
        let sink = Sink::open(&path, SinkConfig::new())?;
        sink.write_type_library(&registry)?;
        sink.submit(int_batch(&schema, &[1, 2, 3])?, None)?;
        sink.submit(int_batch(&schema, &[4, 6])?, None)?;
        sink.close(false)?;
        let changed = Source::open(&path)?;
        assert_ne!(changed.tail().chained_checksum, threaded.chained_checksum);
        Ok(())
    }

    #[test]
    fn test_tail_and_structure_checks() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("tail.ext");
        write_ab(&path, SinkConfig::new())?;
        let good = std::fs::read(&path)?;

        let source = Source::open(&path)?;
        let tail_bytes = &good[good.len() - TAIL_SIZE..];
        let order = source.byte_order();
        assert_eq!(order.read_u32(&tail_bytes[8..]), !source.tail().index_size);
        assert_eq!(
            order.read_u32(&tail_bytes[24..]),
            crate::hasher::jenkins_hash(1776, &tail_bytes[..24])
        );
        assert_eq!(
            source.tail().index_offset + u64::from(source.tail().index_size),
            (good.len() - TAIL_SIZE) as u64
        );

        let damaged = dir.path().join("damaged.ext");
        for at in [0, 5, good.len() - 10, good.len() - 1] {
            let mut bytes = good.clone();
            bytes[at] ^= 0x01;
            std::fs::write(&damaged, &bytes)?;
            assert!(
                matches!(Source::open(&damaged), Err(Error::InvalidFormat(_))),
                "damage at {} not detected",
                at
            );
        }

        std::fs::write(&damaged, &good[..good.len() - 3])?;
        assert!(matches!(Source::open(&damaged), Err(Error::InvalidFormat(_))));
        std::fs::write(&damaged, &good[..30])?;
        assert!(matches!(Source::open(&damaged), Err(Error::InvalidFormat(_))));
        Ok(())
    }

    #[test]
    fn test_truncated_batch_is_fatal() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("cut.ext");
        write_ab(&path, SinkConfig::new())?;

        let source = Source::open(&path)?;
        let b_offset = source.index_entries()[2].offset;
        OpenOptions::new().write(true).open(&path)?.set_len(b_offset + 10)?;

        let mut offset = b_offset;
        assert!(matches!(
            source.read_batch_at(&mut offset),
            Err(Error::ShortRead { .. })
        ));
        assert_eq!(offset, b_offset);
        Ok(())
    }

    #[test]
    fn test_sequential_scan_stops_at_tail() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("scan.ext");
        write_ab(&path, SinkConfig::new())?;

        let source = Source::open(&path)?;
        let mut scan = source.scan();
        let mut types = Vec::new();
        while let Some(batch) = scan.next_batch()? {
            types.push(batch.type_name().to_string());
        }
        assert_eq!(types, vec![LIBRARY_TYPE, "T", "T", INDEX_TYPE]);
        assert_eq!(scan.offset(), source.size() - TAIL_SIZE as u64);
        assert!(scan.next_batch()?.is_none());
        Ok(())
    }

    #[test]
    fn test_file_without_data() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("empty.ext");
        let (registry, _) = int_type()?;
        let sink = Sink::open(&path, SinkConfig::new())?;
        sink.write_type_library(&registry)?;
        let stats = sink.close(false)?;
        assert_eq!(stats.batches, 0);

        let source = Source::open(&path)?;
        assert_eq!(source.index_entries().len(), 2);
        assert_eq!(source.registry().len(), 1);
        assert!(source.data_batches().next().is_none());
        assert_eq!(source.verify()?, 2);
        Ok(())
    }
}
