//! Null compaction of the fixed area.
//!
//! Each record becomes its bool bytes followed by the non-null 1-byte, 4-byte
//! and 8-byte values. 4- and 8-byte values are aligned relative to the start
//! of the compacted buffer, so padding is only emitted where it is needed.

use crate::error::Result;
use crate::schema::{CompactEntry, Schema};
use crate::Error;

const WIDTHS: [usize; 3] = [1, 4, 8];

fn pad(out: &mut Vec<u8>, align: usize) {
    while out.len() % align != 0 {
        out.push(0);
    }
}

pub fn compact(fixed: &[u8], schema: &Schema) -> Vec<u8> {
    let record_size = schema.record_size();
    let bool_bytes = schema.bool_bytes();
    let mut out = Vec::with_capacity(fixed.len());

    for record in fixed.chunks_exact(record_size) {
        out.extend_from_slice(&record[..bool_bytes]);
        for width in WIDTHS {
            for entry in schema.compact_entries(width) {
                if entry.is_null(record) {
                    continue;
                }
                pad(&mut out, width);
                out.extend_from_slice(&record[entry.offset..entry.offset + width]);
            }
        }
    }
    out
}

fn take<'a>(input: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = *pos + len;
    if end > input.len() {
        return Err(Error::CorruptData(format!(
            "compacted fixed area ends at {}, needed {}",
            input.len(),
            end
        )));
    }
    let bytes = &input[*pos..end];
    *pos = end;
    Ok(bytes)
}

fn skip_pad(input: &[u8], pos: &mut usize, align: usize) -> Result<()> {
    let pad = (align - *pos % align) % align;
    if take(input, pos, pad)?.iter().any(|&b| b != 0) {
        return Err(Error::CorruptData(
            "non-zero padding in compacted fixed area".to_string(),
        ));
    }
    Ok(())
}

fn restore(record: &mut [u8], entry: &CompactEntry, bytes: &[u8]) {
    record[entry.offset..entry.offset + entry.width].copy_from_slice(bytes);
}

/// Rebuild `nrecords` full records; every input byte must be consumed.
pub fn uncompact(input: &[u8], schema: &Schema, nrecords: usize) -> Result<Vec<u8>> {
    let record_size = schema.record_size();
    let bool_bytes = schema.bool_bytes();
    let mut out = vec![0u8; nrecords * record_size];
    let mut pos = 0;

    for record in out.chunks_exact_mut(record_size) {
        record[..bool_bytes].copy_from_slice(take(input, &mut pos, bool_bytes)?);
        for width in WIDTHS {
            for entry in schema.compact_entries(width) {
                if entry.is_null(record) {
                    continue;
                }
                skip_pad(input, &mut pos, width)?;
                restore(record, entry, take(input, &mut pos, width)?);
            }
        }
    }

    if pos != input.len() {
        return Err(Error::CorruptData(format!(
            "{} trailing bytes after compacted records",
            input.len() - pos
        )));
    }
    Ok(out)
}
