//! Packing of record batches.
//!
//! Wire layout of one batch, every integer in the file's byte order:
//!
//! ```text
//!  0  u32 compressed fixed size
//!  4  u32 compressed variable size
//!  8  u32 record count
//! 12  u32 variable pool size (uncompressed)
//! 16  u32 digest: CRC-32C of every packed byte except this word
//! 20  u32 content hash: lookup2 over the coded fixed area, then the pool
//! 24  u32 fixed size handed to the compressor
//! 28  u8  fixed mode, u8 variable mode, u8 type name length, u8 0
//! 32  type name, compressed fixed, compressed variable; each padded to 4
//! ```
//!
//! The pool is compressed without its leading empty value. The checksum
//! folded into the file chain is `content_hash ^ digest`.

pub mod compact;
pub mod compress;
pub mod delta;
pub mod endian;
pub mod header;

pub use compress::{Mode, MODE_ALL, MODE_LZ4, MODE_SNAPPY, MODE_ZLIB, MODE_ZSTD};
pub use endian::Endian;
pub use header::BatchHeader;

use std::collections::HashMap;
use std::sync::Arc;

use crate::batch::{pool, RecordBatch};
use crate::buffer::ByteBuffer;
use crate::config::ReadChecks;
use crate::error::Result;
use crate::hasher::{jenkins_hash, Hasher};
use crate::schema::Schema;
use crate::Error;

use header::{pad4, DIGEST_OFFSET, NAME_LEN_OFFSET, PREFIX_SIZE};

const CONTENT_HASH_INIT: u32 = 1776;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackOptions {
    /// Bitmask of `MODE_*` values to try.
    pub modes: u32,
    /// 1 to 9; used by zlib and zstd.
    pub level: u32,
    pub endian: Endian,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            modes: MODE_ALL,
            level: 9,
            endian: Endian::native(),
        }
    }
}

impl PackOptions {
    pub fn validate(&self) -> Result<()> {
        if !(1..=9).contains(&self.level) {
            return Err(Error::ProtocolMisuse(format!(
                "compression level {} outside 1..=9",
                self.level
            )));
        }
        if self.modes & !MODE_ALL != 0 {
            return Err(Error::ProtocolMisuse(format!(
                "unknown compression mode bits {:#x}",
                self.modes & !MODE_ALL
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PackedBatch {
    pub bytes: Vec<u8>,
    pub checksum: u32,
    pub header_size: usize,
    /// Fixed area size before compression (after compaction).
    pub fixed_size: usize,
    /// Pool size before compression.
    pub variable_size: usize,
    pub fixed_mode: Mode,
    pub variable_mode: Mode,
}

/// Rebuild the pool in record order, rewriting offsets in `fixed`. Values of
/// unique fields are stored once per field.
fn repack_variable(batch: &RecordBatch, fixed: &mut [u8]) -> Result<ByteBuffer> {
    let schema = batch.schema();
    let source = batch.variable();
    let mut packed = ByteBuffer::with_capacity(source.len());
    pool::init(&mut packed);

    let variable: Vec<_> = schema.variable_fields().collect();
    let mut seen: Vec<HashMap<&[u8], u32>> = vec![HashMap::new(); variable.len()];

    for record in fixed.chunks_exact_mut(schema.record_size()) {
        for (slot, field) in variable.iter().enumerate() {
            if field.is_null(record) {
                field.write_u32(record, 0);
                continue;
            }
            let old = field.read_u32(record);
            pool::self_check(source, old)?;
            let value = pool::value(source, old)?;

            let new = if value.is_empty() {
                0
            } else if field.unique {
                match seen[slot].get(value) {
                    Some(&offset) => offset,
                    None => {
                        let offset = pool::append(&mut packed, value)?;
                        seen[slot].insert(value, offset);
                        offset
                    }
                }
            } else {
                pool::append(&mut packed, value)?
            };
            field.write_u32(record, new);
        }
    }
    Ok(packed)
}

fn zero_nulls(fixed: &mut [u8], schema: &Schema) {
    for record in fixed.chunks_exact_mut(schema.record_size()) {
        for field in schema.fields() {
            if field.is_null(record) {
                field.clear(record);
            }
        }
    }
}

fn content_hash(fixed: &[u8], variable: &[u8]) -> u32 {
    jenkins_hash(jenkins_hash(CONTENT_HASH_INIT, fixed), variable)
}

fn packed_digest(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.write(&bytes[..DIGEST_OFFSET]);
    hasher.write(&bytes[DIGEST_OFFSET + 4..]);
    hasher.checksum()
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::ProtocolMisuse(format!("{} of {} bytes", what, value)))
}

/// Encode a batch into its packed representation.
pub fn pack(batch: &RecordBatch, options: &PackOptions) -> Result<PackedBatch> {
    options.validate()?;
    let schema = batch.schema();

    let mut fixed = batch.fixed().to_vec();
    let mut variable = repack_variable(batch, &mut fixed)?;
    if schema.null_compaction() {
        zero_nulls(&mut fixed, schema);
    }
    delta::encode(&mut fixed, schema);

    if !options.endian.is_native() {
        endian::swap_fields(&mut fixed, schema);
        endian::swap_pool(&mut variable, true)?;
    }
    let content_hash = content_hash(&fixed, &variable);

    let fixed_coded = if schema.null_compaction() {
        compact::compact(&fixed, schema)
    } else {
        fixed
    };

    let (fixed_mode, fixed_packed) = compress::compress(&fixed_coded, options.modes, options.level);
    let (variable_mode, variable_packed) =
        compress::compress(&variable[4..], options.modes, options.level);

    let header = BatchHeader {
        compressed_fixed: to_u32(fixed_packed.len(), "fixed area")?,
        compressed_variable: to_u32(variable_packed.len(), "variable pool")?,
        nrecords: to_u32(batch.nrecords(), "record count")?,
        variable_size: to_u32(variable.len(), "variable pool")?,
        digest: 0,
        content_hash,
        fixed_coded_size: to_u32(fixed_coded.len(), "fixed area")?,
        fixed_mode,
        variable_mode,
        type_name: schema.name().to_string(),
    };

    let mut bytes = header.encode(options.endian)?;
    let header_size = bytes.len();
    bytes.reserve(header.packed_len() - header_size);
    for section in [&fixed_packed, &variable_packed] {
        bytes.extend_from_slice(section);
        bytes.resize(pad4(bytes.len()), 0);
    }
    debug_assert_eq!(bytes.len(), header.packed_len());

    let digest = packed_digest(&bytes);
    options
        .endian
        .write_u32(&mut bytes[DIGEST_OFFSET..], digest);

    Ok(PackedBatch {
        bytes,
        checksum: content_hash ^ digest,
        header_size,
        fixed_size: fixed_coded.len(),
        variable_size: variable.len(),
        fixed_mode,
        variable_mode,
    })
}

/// Checksum of an already packed batch, as folded into the file chain.
pub fn packed_checksum(bytes: &[u8], need_bitflip: bool) -> Result<u32> {
    let header = BatchHeader::decode(bytes, Endian::for_bitflip(need_bitflip))?;
    Ok(header.content_hash ^ header.digest)
}

/// Decode a packed batch into fresh host-order buffers. The input is never
/// modified, so the same bytes can be unpacked any number of times.
pub fn unpack(
    bytes: &[u8],
    schema: &Arc<Schema>,
    need_bitflip: bool,
    checks: ReadChecks,
) -> Result<RecordBatch> {
    let endian = Endian::for_bitflip(need_bitflip);
    let header = BatchHeader::decode(bytes, endian)?;
    if header.packed_len() != bytes.len() {
        return Err(Error::CorruptData(format!(
            "packed batch is {} bytes, header describes {}",
            bytes.len(),
            header.packed_len()
        )));
    }
    if checks.pre_uncompress {
        let digest = packed_digest(bytes);
        if digest != header.digest {
            return Err(Error::CorruptData(format!(
                "digest mismatch in {} batch: computed {:#010x}, stored {:#010x}",
                header.type_name, digest, header.digest
            )));
        }
    }
    if header.type_name != schema.name() {
        return Err(Error::ProtocolMisuse(format!(
            "batch of type {} unpacked as {}",
            header.type_name,
            schema.name()
        )));
    }
    if header.variable_size < 4 {
        return Err(Error::CorruptData(format!(
            "variable pool size {} below minimum",
            header.variable_size
        )));
    }

    let fixed_start = header.encoded_len();
    let fixed_end = fixed_start + header.compressed_fixed as usize;
    let variable_start = fixed_start + pad4(header.compressed_fixed as usize);
    let variable_end = variable_start + header.compressed_variable as usize;

    let fixed_coded = compress::decompress(
        header.fixed_mode,
        &bytes[fixed_start..fixed_end],
        header.fixed_coded_size as usize,
    )?;
    let nrecords = header.nrecords as usize;
    let mut fixed = if schema.null_compaction() {
        compact::uncompact(&fixed_coded, schema, nrecords)?
    } else {
        if fixed_coded.len() != nrecords * schema.record_size() {
            return Err(Error::CorruptData(format!(
                "fixed area of {} bytes does not hold {} records of {}",
                fixed_coded.len(),
                nrecords,
                schema.record_size()
            )));
        }
        fixed_coded
    };

    let mut variable = vec![0u8; 4];
    variable.extend(compress::decompress(
        header.variable_mode,
        &bytes[variable_start..variable_end],
        header.variable_size as usize - 4,
    )?);

    if checks.post_uncompress {
        let hash = content_hash(&fixed, &variable);
        if hash != header.content_hash {
            return Err(Error::CorruptData(format!(
                "content hash mismatch in {} batch: computed {:#010x}, stored {:#010x}",
                header.type_name, hash, header.content_hash
            )));
        }
    }

    if need_bitflip {
        endian::swap_fields(&mut fixed, schema);
        endian::swap_pool(&mut variable, false)?;
    }

    if checks.variable {
        for record in fixed.chunks_exact(schema.record_size()) {
            for field in schema.variable_fields() {
                pool::self_check(&variable, field.read_u32(record))?;
            }
        }
    }

    delta::decode(&mut fixed, schema);

    Ok(RecordBatch::from_parts(
        schema.clone(),
        ByteBuffer::from(fixed),
        ByteBuffer::from(variable),
    ))
}

/// Type name of a packed batch, read from the header only.
pub fn packed_type_name(bytes: &[u8]) -> Result<String> {
    if bytes.len() < PREFIX_SIZE {
        return Err(Error::CorruptData("truncated batch header".to_string()));
    }
    let len = bytes[NAME_LEN_OFFSET] as usize;
    let name = bytes
        .get(PREFIX_SIZE..PREFIX_SIZE + len)
        .ok_or_else(|| Error::CorruptData("truncated type name".to_string()))?;
    String::from_utf8(name.to_vec())
        .map_err(|_| Error::CorruptData("type name is not UTF-8".to_string()))
}

/// In-memory size the batch will have once unpacked.
pub fn unpacked_size(bytes: &[u8], need_bitflip: bool, schema: &Schema) -> Result<usize> {
    let header = BatchHeader::decode(bytes, Endian::for_bitflip(need_bitflip))?;
    Ok(header.nrecords as usize * schema.record_size() + header.variable_size as usize)
}
