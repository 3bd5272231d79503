use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::batch::pool;
use crate::error::Result;
use crate::schema::{FieldKind, Schema};
use crate::Error;

/// Byte order of a file. Every multi-byte value on disk uses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endian::Big
        } else {
            Endian::Little
        }
    }

    pub fn is_native(self) -> bool {
        self == Self::native()
    }

    pub fn opposite(self) -> Self {
        match self {
            Endian::Little => Endian::Big,
            Endian::Big => Endian::Little,
        }
    }

    /// Order of a file read with the given bitflip flag.
    pub fn for_bitflip(need_bitflip: bool) -> Self {
        if need_bitflip {
            Self::native().opposite()
        } else {
            Self::native()
        }
    }

    pub fn read_u32(self, buf: &[u8]) -> u32 {
        match self {
            Endian::Little => LittleEndian::read_u32(buf),
            Endian::Big => BigEndian::read_u32(buf),
        }
    }

    pub fn write_u32(self, buf: &mut [u8], value: u32) {
        match self {
            Endian::Little => LittleEndian::write_u32(buf, value),
            Endian::Big => BigEndian::write_u32(buf, value),
        }
    }
}

fn swap_at(buf: &mut [u8], offset: usize, width: usize) {
    buf[offset..offset + width].reverse();
}

/// Reverse every int32, variable offset, int64 and double of every record.
pub fn swap_fields(fixed: &mut [u8], schema: &Schema) {
    let swapped: Vec<(usize, usize)> = schema
        .fields()
        .iter()
        .filter(|f| {
            matches!(
                f.kind,
                FieldKind::Int32 | FieldKind::Variable | FieldKind::Int64 | FieldKind::Double
            )
        })
        .map(|f| (f.offset, f.width()))
        .collect();

    for record in fixed.chunks_exact_mut(schema.record_size()) {
        for &(offset, width) in &swapped {
            swap_at(record, offset, width);
        }
    }
}

/// Reverse the size word of every pool entry. `sizes_native` tells whether
/// the sizes are readable as host order before the swap.
pub fn swap_pool(variable: &mut [u8], sizes_native: bool) -> Result<()> {
    let mut at = 4;
    while at < variable.len() {
        if at + 4 > variable.len() {
            return Err(Error::CorruptData(format!(
                "variable pool entry at {} truncated",
                at
            )));
        }
        if !sizes_native {
            swap_at(variable, at, 4);
        }
        let size = byteorder::NativeEndian::read_u32(&variable[at..]) as usize;
        if sizes_native {
            swap_at(variable, at, 4);
        }
        at += 4 + pool::roundup(size);
    }
    if at != variable.len() {
        return Err(Error::CorruptData(format!(
            "variable pool entries end at {} but pool is {} bytes",
            at,
            variable.len()
        )));
    }
    Ok(())
}
