use crate::batch::RecordBatch;
use crate::error::Result;
use crate::schema::TypeRegistry;
use crate::Error;

/// One record per user type, holding its description text.
pub fn build(registry: &TypeRegistry) -> Result<RecordBatch> {
    let mut batch = RecordBatch::new(registry.library_schema().clone());
    for schema in registry.user_types() {
        let row = batch.append_record();
        batch.set(row, 0usize, schema.description())?;
    }
    Ok(batch)
}

/// Rebuild a registry from a type library batch.
pub fn load(batch: &RecordBatch) -> Result<TypeRegistry> {
    let mut registry = TypeRegistry::new();
    for row in 0..batch.nrecords() {
        let text = batch.get_bytes(row, 0usize)?.unwrap_or_default();
        let text = String::from_utf8(text).map_err(|_| {
            Error::InvalidFormat(format!("type library entry {} is not UTF-8", row))
        })?;
        registry.register_description(&text)?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldKind, FieldSpec, SchemaDescriptor};

    #[test]
    fn test_library_roundtrip() -> Result<()> {
        let mut registry = TypeRegistry::new();
        for name in ["a", "b", "c"] {
            registry.register(
                SchemaDescriptor::new(name)
                    .namespace("ns")
                    .version("2.1")
                    .field(FieldSpec::new("v", FieldKind::Variable)),
            )?;
        }

        let batch = build(&registry)?;
        assert_eq!(batch.nrecords(), 3);

        let loaded = load(&batch)?;
        let names: Vec<&str> = loaded.user_types().map(|s| s.name()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        for schema in registry.user_types() {
            assert_eq!(**schema, *loaded.lookup(schema.name())?);
        }
        Ok(())
    }
}
