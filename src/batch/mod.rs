pub mod pool;

use std::fmt;
use std::sync::Arc;

use crate::buffer::ByteBuffer;
use crate::error::Result;
use crate::schema::{FieldKind, FieldLayout, Schema};
use crate::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(u8),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Bytes(Vec<u8>),
}

impl Value {
    fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Byte(_) => "byte",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Double(_) => "double",
            Value::Bytes(_) => "bytes",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Bytes(s.as_bytes().to_vec())
    }
}

/// A field addressed by position or by name.
pub trait FieldRef {
    fn resolve(&self, schema: &Schema) -> Result<usize>;
}

impl FieldRef for usize {
    fn resolve(&self, schema: &Schema) -> Result<usize> {
        if *self < schema.fields().len() {
            Ok(*self)
        } else {
            Err(Error::ProtocolMisuse(format!(
                "field {} out of range for {}",
                self,
                schema.name()
            )))
        }
    }
}

impl FieldRef for &str {
    fn resolve(&self, schema: &Schema) -> Result<usize> {
        schema.field_index(self).ok_or_else(|| {
            Error::ProtocolMisuse(format!("no field {} in {}", self, schema.name()))
        })
    }
}

/// In-memory batch of fixed-size records plus their variable pool.
#[derive(Clone)]
pub struct RecordBatch {
    schema: Arc<Schema>,
    fixed: ByteBuffer,
    variable: ByteBuffer,
}

impl RecordBatch {
    pub fn new(schema: Arc<Schema>) -> Self {
        let mut variable = ByteBuffer::new();
        pool::init(&mut variable);
        Self {
            schema,
            fixed: ByteBuffer::new(),
            variable,
        }
    }

    /// Reassemble a batch from host-order buffers produced by the codec.
    pub(crate) fn from_parts(schema: Arc<Schema>, fixed: ByteBuffer, variable: ByteBuffer) -> Self {
        Self {
            schema,
            fixed,
            variable,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn type_name(&self) -> &str {
        self.schema.name()
    }

    pub fn nrecords(&self) -> usize {
        self.fixed.len() / self.schema.record_size()
    }

    pub fn is_empty(&self) -> bool {
        self.fixed.is_empty()
    }

    pub fn size(&self) -> usize {
        self.fixed.len() + self.variable.len()
    }

    pub fn fixed(&self) -> &[u8] {
        &self.fixed
    }

    pub fn variable(&self) -> &[u8] {
        &self.variable
    }

    /// Append a zeroed record and return its row number.
    pub fn append_record(&mut self) -> usize {
        let row = self.nrecords();
        self.fixed.extend_zeroed(self.schema.record_size());
        row
    }

    /// Drop every record, keeping the buffers' capacity.
    pub fn clear(&mut self) {
        self.fixed.clear();
        pool::init(&mut self.variable);
    }

    pub fn record(&self, row: usize) -> Result<&[u8]> {
        let size = self.schema.record_size();
        self.check_row(row)?;
        Ok(&self.fixed[row * size..(row + 1) * size])
    }

    fn check_row(&self, row: usize) -> Result<()> {
        if row >= self.nrecords() {
            return Err(Error::ProtocolMisuse(format!(
                "row {} out of range, batch has {} records",
                row,
                self.nrecords()
            )));
        }
        Ok(())
    }

    pub fn set<F: FieldRef>(&mut self, row: usize, field: F, value: impl Into<Value>) -> Result<()> {
        self.check_row(row)?;
        let schema = self.schema.clone();
        let layout = &schema.fields()[field.resolve(&schema)?];
        let value = value.into();

        if value == Value::Null {
            return self.set_null_at(row, layout);
        }

        let offset = match (&value, layout.kind) {
            (Value::Bytes(bytes), FieldKind::Variable) => Some(pool::append(&mut self.variable, bytes)?),
            _ => None,
        };

        let size = schema.record_size();
        let record = &mut self.fixed[row * size..(row + 1) * size];
        match (value, layout.kind) {
            (Value::Bool(v), FieldKind::Bool) => layout.write_bool(record, v),
            (Value::Byte(v), FieldKind::Byte) => layout.write_byte(record, v),
            (Value::Int32(v), FieldKind::Int32) => layout.write_i32(record, v),
            (Value::Int64(v), FieldKind::Int64) => layout.write_i64(record, v),
            (Value::Double(v), FieldKind::Double) => layout.write_f64(record, v),
            (Value::Bytes(_), FieldKind::Variable) => {
                layout.write_u32(record, offset.unwrap_or(0));
            }
            (value, kind) => {
                return Err(Error::ProtocolMisuse(format!(
                    "cannot store {} in {:?} field {}",
                    value.kind_name(),
                    kind,
                    layout.name
                )))
            }
        }
        layout.set_null(record, false);
        Ok(())
    }

    pub fn set_null<F: FieldRef>(&mut self, row: usize, field: F) -> Result<()> {
        self.check_row(row)?;
        let schema = self.schema.clone();
        let layout = &schema.fields()[field.resolve(&schema)?];
        self.set_null_at(row, layout)
    }

    fn set_null_at(&mut self, row: usize, layout: &FieldLayout) -> Result<()> {
        if layout.null.is_none() {
            return Err(Error::ProtocolMisuse(format!(
                "field {} is not nullable",
                layout.name
            )));
        }
        let size = self.schema.record_size();
        let record = &mut self.fixed[row * size..(row + 1) * size];
        layout.clear(record);
        layout.set_null(record, true);
        Ok(())
    }

    pub fn get<F: FieldRef>(&self, row: usize, field: F) -> Result<Value> {
        let record = self.record(row)?;
        let layout = &self.schema.fields()[field.resolve(&self.schema)?];
        if layout.is_null(record) {
            return Ok(Value::Null);
        }
        Ok(match layout.kind {
            FieldKind::Bool => Value::Bool(layout.read_bool(record)),
            FieldKind::Byte => Value::Byte(layout.read_byte(record)),
            FieldKind::Int32 => Value::Int32(layout.read_i32(record)),
            FieldKind::Int64 => Value::Int64(layout.read_i64(record)),
            FieldKind::Double => Value::Double(layout.read_f64(record)),
            FieldKind::Variable => {
                Value::Bytes(pool::value(&self.variable, layout.read_u32(record))?.to_vec())
            }
        })
    }

    pub fn is_null<F: FieldRef>(&self, row: usize, field: F) -> Result<bool> {
        let record = self.record(row)?;
        let layout = &self.schema.fields()[field.resolve(&self.schema)?];
        Ok(layout.is_null(record))
    }

    pub fn get_i32<F: FieldRef>(&self, row: usize, field: F) -> Result<Option<i32>> {
        match self.get(row, field)? {
            Value::Int32(v) => Ok(Some(v)),
            Value::Null => Ok(None),
            other => Err(type_mismatch("int32", &other)),
        }
    }

    pub fn get_i64<F: FieldRef>(&self, row: usize, field: F) -> Result<Option<i64>> {
        match self.get(row, field)? {
            Value::Int64(v) => Ok(Some(v)),
            Value::Null => Ok(None),
            other => Err(type_mismatch("int64", &other)),
        }
    }

    pub fn get_f64<F: FieldRef>(&self, row: usize, field: F) -> Result<Option<f64>> {
        match self.get(row, field)? {
            Value::Double(v) => Ok(Some(v)),
            Value::Null => Ok(None),
            other => Err(type_mismatch("double", &other)),
        }
    }

    pub fn get_bytes<F: FieldRef>(&self, row: usize, field: F) -> Result<Option<Vec<u8>>> {
        match self.get(row, field)? {
            Value::Bytes(v) => Ok(Some(v)),
            Value::Null => Ok(None),
            other => Err(type_mismatch("bytes", &other)),
        }
    }

    /// Every field of one row, in declaration order.
    pub fn row_values(&self, row: usize) -> Result<Vec<Value>> {
        (0..self.schema.fields().len())
            .map(|field| self.get(row, field))
            .collect()
    }

    /// Check every variable offset of every record against the pool.
    pub fn check_variable(&self) -> Result<()> {
        let size = self.schema.record_size();
        for record in self.fixed.chunks_exact(size) {
            for layout in self.schema.variable_fields() {
                pool::self_check(&self.variable, layout.read_u32(record))?;
            }
        }
        Ok(())
    }
}

fn type_mismatch(wanted: &str, got: &Value) -> Error {
    Error::ProtocolMisuse(format!("expected {}, field holds {}", wanted, got.kind_name()))
}

impl fmt::Debug for RecordBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordBatch")
            .field("type", &self.schema.name())
            .field("nrecords", &self.nrecords())
            .field("fixed", &self.fixed.len())
            .field("variable", &self.variable.len())
            .finish()
    }
}

macro_rules! value_from {
    ($($t:ty => $variant:ident),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::$variant(v)
            }
        })*
    };
}

value_from!(bool => Bool, u8 => Byte, i32 => Int32, i64 => Int64, f64 => Double, Vec<u8> => Bytes);
