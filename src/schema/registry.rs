use std::collections::HashMap;
use std::sync::Arc;

use super::{FieldKind, FieldSpec, Schema, SchemaDescriptor};
use crate::error::Result;
use crate::Error;

/// Type of the first batch in every file: one description per user type.
pub const LIBRARY_TYPE: &str = "extentfile::TypeLibrary";
/// Type of the last batch in every file: offset and type of every batch.
pub const INDEX_TYPE: &str = "extentfile::Index";

/// Explicitly owned name -> schema map. A registry always knows the two
/// internal types; user types are kept in registration order, which is the
/// order they appear in a file's type library.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    library: Arc<Schema>,
    index: Arc<Schema>,
    types: Vec<Arc<Schema>>,
    by_name: HashMap<String, usize>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            library: Arc::new(internal(
                SchemaDescriptor::new(LIBRARY_TYPE)
                    .field(FieldSpec::new("description", FieldKind::Variable)),
            )),
            index: Arc::new(internal(
                SchemaDescriptor::new(INDEX_TYPE)
                    .field(FieldSpec::new("offset", FieldKind::Int64))
                    .field(FieldSpec::new("type", FieldKind::Variable).unique()),
            )),
            types: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Bind and register a user type. Registering the same description twice
    /// returns the existing schema; a different layout under a known name is
    /// an error.
    pub fn register(&mut self, descriptor: SchemaDescriptor) -> Result<Arc<Schema>> {
        if descriptor.name == LIBRARY_TYPE || descriptor.name == INDEX_TYPE {
            return Err(Error::Schema(format!(
                "type name {} is reserved",
                descriptor.name
            )));
        }
        let schema = Schema::bind(descriptor)?;

        if let Some(&slot) = self.by_name.get(schema.name()) {
            let existing = &self.types[slot];
            if **existing == schema {
                return Ok(existing.clone());
            }
            return Err(Error::Schema(format!(
                "type {} already registered with a different layout",
                schema.name()
            )));
        }

        if schema.descriptor().namespace.is_empty() || schema.descriptor().version.is_empty() {
            tracing::warn!(
                type_name = schema.name(),
                "type registered without namespace or version"
            );
        }

        let schema = Arc::new(schema);
        self.by_name
            .insert(schema.name().to_string(), self.types.len());
        self.types.push(schema.clone());
        Ok(schema)
    }

    pub fn register_description(&mut self, text: &str) -> Result<Arc<Schema>> {
        self.register(SchemaDescriptor::from_description(text)?)
    }

    /// Look up any type, internal ones included.
    pub fn get(&self, name: &str) -> Option<Arc<Schema>> {
        match name {
            LIBRARY_TYPE => Some(self.library.clone()),
            INDEX_TYPE => Some(self.index.clone()),
            _ => self.by_name.get(name).map(|&i| self.types[i].clone()),
        }
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<Schema>> {
        self.get(name)
            .ok_or_else(|| Error::Schema(format!("unknown type {}", name)))
    }

    pub fn library_schema(&self) -> &Arc<Schema> {
        &self.library
    }

    pub fn index_schema(&self) -> &Arc<Schema> {
        &self.index
    }

    /// User types in registration order.
    pub fn user_types(&self) -> impl Iterator<Item = &Arc<Schema>> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn internal(descriptor: SchemaDescriptor) -> Schema {
    match Schema::bind(descriptor) {
        Ok(schema) => schema,
        Err(e) => unreachable!("internal type layout rejected: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_type(name: &str) -> SchemaDescriptor {
        SchemaDescriptor::new(name)
            .namespace("test")
            .version("1.0")
            .field(FieldSpec::new("v", FieldKind::Int32))
    }

    #[test]
    fn test_register_and_lookup() -> Result<()> {
        let mut registry = TypeRegistry::new();
        let first = registry.register(int_type("a"))?;
        registry.register(int_type("b"))?;

        let again = registry.register(int_type("a"))?;
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(registry.len(), 2);

        let names: Vec<&str> = registry.user_types().map(|s| s.name()).collect();
        assert_eq!(names, vec!["a", "b"]);

        assert!(registry.get(LIBRARY_TYPE).is_some());
        assert!(registry.get(INDEX_TYPE).is_some());
        assert!(matches!(registry.lookup("missing"), Err(Error::Schema(_))));
        Ok(())
    }

    #[test]
    fn test_conflicting_and_reserved_names() {
        let mut registry = TypeRegistry::new();
        registry.register(int_type("a")).unwrap();

        let conflicting = SchemaDescriptor::new("a").field(FieldSpec::new("v", FieldKind::Int64));
        assert!(registry.register(conflicting).is_err());
        assert!(registry.register(int_type(INDEX_TYPE)).is_err());
    }

    #[test]
    fn test_register_description_text() -> Result<()> {
        let mut registry = TypeRegistry::new();
        let text = int_type("x").to_description()?;
        let schema = registry.register_description(&text)?;
        assert_eq!(schema.description(), text);
        Ok(())
    }
}
