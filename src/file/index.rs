use std::sync::Arc;

use crate::batch::RecordBatch;
use crate::error::Result;
use crate::schema::Schema;
use crate::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub offset: u64,
    pub type_name: String,
}

pub fn build(schema: &Arc<Schema>, entries: &[IndexEntry]) -> Result<RecordBatch> {
    let mut batch = RecordBatch::new(schema.clone());
    for entry in entries {
        let offset = i64::try_from(entry.offset).map_err(|_| {
            Error::ProtocolMisuse(format!("batch offset {} out of range", entry.offset))
        })?;
        let row = batch.append_record();
        batch.set(row, "offset", offset)?;
        batch.set(row, "type", entry.type_name.as_str())?;
    }
    Ok(batch)
}

pub fn load(batch: &RecordBatch) -> Result<Vec<IndexEntry>> {
    (0..batch.nrecords())
        .map(|row| {
            let offset = batch
                .get_i64(row, "offset")?
                .and_then(|v| u64::try_from(v).ok())
                .ok_or_else(|| Error::InvalidFormat(format!("index row {} has no offset", row)))?;
            let name = batch.get_bytes(row, "type")?.unwrap_or_default();
            let type_name = String::from_utf8(name).map_err(|_| {
                Error::InvalidFormat(format!("index row {} type is not UTF-8", row))
            })?;
            Ok(IndexEntry { offset, type_name })
        })
        .collect()
}
