use byteorder::{ByteOrder, NativeEndian};

use super::{FieldKind, FieldSpec};

/// Placement of one field inside a fixed record. In memory every multi-byte
/// value is host order.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldLayout {
    pub name: String,
    pub kind: FieldKind,
    /// Byte offset in the record; for bools, the byte holding the bit.
    pub offset: usize,
    /// Bit inside `offset` for bools, 0 otherwise.
    pub bit_mask: u8,
    /// Byte offset and mask of the null bit, for nullable fields.
    pub null: Option<(usize, u8)>,
    pub unique: bool,
    pub delta: bool,
    pub scale: Option<f64>,
    /// Index of the base field for relative packing.
    pub relative_to: Option<usize>,
}

impl FieldLayout {
    pub fn width(&self) -> usize {
        self.kind.fixed_width()
    }

    pub fn is_null(&self, record: &[u8]) -> bool {
        bit_set(record, self.null)
    }

    pub fn set_null(&self, record: &mut [u8], null: bool) {
        if let Some((offset, mask)) = self.null {
            if null {
                record[offset] |= mask;
            } else {
                record[offset] &= !mask;
            }
        }
    }

    pub fn read_bool(&self, record: &[u8]) -> bool {
        record[self.offset] & self.bit_mask != 0
    }

    pub fn write_bool(&self, record: &mut [u8], value: bool) {
        if value {
            record[self.offset] |= self.bit_mask;
        } else {
            record[self.offset] &= !self.bit_mask;
        }
    }

    pub fn read_byte(&self, record: &[u8]) -> u8 {
        record[self.offset]
    }

    pub fn read_i32(&self, record: &[u8]) -> i32 {
        NativeEndian::read_i32(&record[self.offset..])
    }

    pub fn read_u32(&self, record: &[u8]) -> u32 {
        NativeEndian::read_u32(&record[self.offset..])
    }

    pub fn read_i64(&self, record: &[u8]) -> i64 {
        NativeEndian::read_i64(&record[self.offset..])
    }

    pub fn read_f64(&self, record: &[u8]) -> f64 {
        NativeEndian::read_f64(&record[self.offset..])
    }

    pub fn write_byte(&self, record: &mut [u8], value: u8) {
        record[self.offset] = value;
    }

    pub fn write_i32(&self, record: &mut [u8], value: i32) {
        NativeEndian::write_i32(&mut record[self.offset..], value);
    }

    pub fn write_u32(&self, record: &mut [u8], value: u32) {
        NativeEndian::write_u32(&mut record[self.offset..], value);
    }

    pub fn write_i64(&self, record: &mut [u8], value: i64) {
        NativeEndian::write_i64(&mut record[self.offset..], value);
    }

    pub fn write_f64(&self, record: &mut [u8], value: f64) {
        NativeEndian::write_f64(&mut record[self.offset..], value);
    }

    /// Zero the value bytes (or the bit) of this field.
    pub fn clear(&self, record: &mut [u8]) {
        match self.kind {
            FieldKind::Bool => self.write_bool(record, false),
            _ => record[self.offset..self.offset + self.width()].fill(0),
        }
    }
}

/// One non-bool value as seen by null compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactEntry {
    pub offset: usize,
    pub width: usize,
    pub null: Option<(usize, u8)>,
}

impl CompactEntry {
    pub fn is_null(&self, record: &[u8]) -> bool {
        bit_set(record, self.null)
    }
}

fn bit_set(record: &[u8], bit: Option<(usize, u8)>) -> bool {
    match bit {
        Some((offset, mask)) => record[offset] & mask != 0,
        None => false,
    }
}

pub(super) struct Plan {
    pub record_size: usize,
    pub bool_bytes: usize,
    pub fields: Vec<FieldLayout>,
    pub compact: [Vec<CompactEntry>; 3],
}

fn align(pos: usize, to: usize) -> usize {
    pos.div_ceil(to) * to
}

/// Small-to-big layout: bool and null bits first, then bytes, then 4-byte
/// values (int32 before variable offsets), then 8-byte values.
pub(super) fn plan(specs: &[FieldSpec]) -> Plan {
    let mut fields: Vec<FieldLayout> = specs
        .iter()
        .map(|spec| FieldLayout {
            name: spec.name.clone(),
            kind: spec.kind,
            offset: 0,
            bit_mask: 0,
            null: None,
            unique: spec.unique,
            delta: spec.delta,
            scale: spec.scale,
            relative_to: spec
                .relative_to
                .as_ref()
                .and_then(|base| specs.iter().position(|s| s.name == *base)),
        })
        .collect();

    let mut bit = 0usize;
    let mut next_bit = || {
        let placed = (bit / 8, 1u8 << (bit % 8));
        bit += 1;
        placed
    };
    for field in fields.iter_mut().filter(|f| f.kind == FieldKind::Bool) {
        let (offset, mask) = next_bit();
        field.offset = offset;
        field.bit_mask = mask;
    }
    for (field, spec) in fields.iter_mut().zip(specs) {
        if spec.nullable {
            field.null = Some(next_bit());
        }
    }
    let bool_bytes = bit.div_ceil(8);

    let mut pos = bool_bytes;
    let groups: [(&[FieldKind], usize); 4] = [
        (&[FieldKind::Byte], 1),
        (&[FieldKind::Int32], 4),
        (&[FieldKind::Variable], 4),
        (&[FieldKind::Int64, FieldKind::Double], 8),
    ];
    for (kinds, width) in groups {
        pos = align(pos, width);
        for field in fields.iter_mut().filter(|f| kinds.contains(&f.kind)) {
            field.offset = pos;
            pos += width;
        }
    }
    let record_size = align(pos, 8).max(8);

    let mut compact: [Vec<CompactEntry>; 3] = Default::default();
    for (kinds, width) in groups {
        let slot = match width {
            1 => 0,
            4 => 1,
            _ => 2,
        };
        compact[slot].extend(
            fields
                .iter()
                .filter(|f| kinds.contains(&f.kind))
                .map(|f| CompactEntry {
                    offset: f.offset,
                    width,
                    null: f.null,
                }),
        );
    }

    Plan {
        record_size,
        bool_bytes,
        fields,
        compact,
    }
}
