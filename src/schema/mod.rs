//! Record layouts.
//!
//! A [`SchemaDescriptor`] is the user-facing description of a record type: a
//! name, optional namespace and version, and an ordered list of fields. Binding
//! it produces a [`Schema`], the immutable layout table every batch of that type
//! shares. The descriptor serialized as JSON is the text stored in a file's type
//! library, so a reader rebuilds exactly the layout the writer used.

mod layout;
mod registry;

pub use layout::{CompactEntry, FieldLayout};
pub use registry::{TypeRegistry, INDEX_TYPE, LIBRARY_TYPE};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::Error;

pub const MAX_TYPE_NAME_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Bool,
    Byte,
    Int32,
    Int64,
    Double,
    /// Variable-length bytes, stored in the batch's variable pool.
    Variable,
}

impl FieldKind {
    /// Width of the value inside the fixed record; bools live in the bit area.
    pub fn fixed_width(self) -> usize {
        match self {
            FieldKind::Bool => 0,
            FieldKind::Byte => 1,
            FieldKind::Int32 | FieldKind::Variable => 4,
            FieldKind::Int64 | FieldKind::Double => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub nullable: bool,
    /// Variable fields only: identical values share one pool entry when packed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unique: bool,
    /// Packed as the difference from the previous non-null row. Doubles need
    /// a scale.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub delta: bool,
    /// Double fields only: packed as a whole number of `scale` steps, so the
    /// value reads back rounded to the nearest multiple.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    /// Packed as the difference from another field of the same record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_to: Option<String>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            unique: false,
            delta: false,
            scale: None,
            relative_to: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn delta(mut self) -> Self {
        self.delta = true;
        self
    }

    pub fn scale(mut self, step: f64) -> Self {
        self.scale = Some(step);
        self
    }

    pub fn relative_to(mut self, base: impl Into<String>) -> Self {
        self.relative_to = Some(base.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// `major.minor`, or empty.
    #[serde(default)]
    pub version: String,
    /// Drop null values (and alignment padding) from the fixed area before
    /// compression.
    #[serde(default)]
    pub null_compaction: bool,
    pub fields: Vec<FieldSpec>,
}

impl SchemaDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: String::new(),
            version: String::new(),
            null_compaction: false,
            fields: Vec::new(),
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn null_compaction(mut self, enabled: bool) -> Self {
        self.null_compaction = enabled;
        self
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn from_description(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_description(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Schema("type name is empty".to_string()));
        }
        if self.name.len() > MAX_TYPE_NAME_LEN {
            return Err(Error::Schema(format!(
                "type name '{}' longer than {} bytes",
                self.name, MAX_TYPE_NAME_LEN
            )));
        }
        if !self.version.is_empty() {
            let valid = self
                .version
                .split_once('.')
                .map(|(major, minor)| major.parse::<u32>().is_ok() && minor.parse::<u32>().is_ok())
                .unwrap_or(false);
            if !valid {
                return Err(Error::Schema(format!(
                    "bad version '{}' for {}, expected major.minor",
                    self.version, self.name
                )));
            }
        }
        if self.fields.is_empty() {
            return Err(Error::Schema(format!("type {} has no fields", self.name)));
        }

        let mut seen = HashMap::new();
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(Error::Schema(format!("unnamed field in {}", self.name)));
            }
            if seen.insert(field.name.as_str(), ()).is_some() {
                return Err(Error::Schema(format!(
                    "duplicate field {} in {}",
                    field.name, self.name
                )));
            }
            if field.unique && field.kind != FieldKind::Variable {
                return Err(Error::Schema(format!(
                    "field {}: unique packing only applies to variable fields",
                    field.name
                )));
            }
            self.validate_packing(field)?;
        }
        Ok(())
    }

    fn validate_packing(&self, field: &FieldSpec) -> Result<()> {
        let fail = |what: String| -> Result<()> {
            Err(Error::Schema(format!("field {}: {}", field.name, what)))
        };
        if let Some(step) = field.scale {
            if field.kind != FieldKind::Double {
                return fail("scale only applies to double fields".to_string());
            }
            if !step.is_finite() || step <= 0.0 {
                return fail(format!("scale {} must be positive and finite", step));
            }
        }
        let numeric = matches!(field.kind, FieldKind::Int32 | FieldKind::Int64 | FieldKind::Double);
        if field.delta {
            if !numeric {
                return fail("delta packing only applies to int32, int64 and double fields".to_string());
            }
            if field.kind == FieldKind::Double && field.scale.is_none() {
                return fail("delta packing of a double needs a scale".to_string());
            }
        }

        let Some(base_name) = &field.relative_to else {
            return Ok(());
        };
        if !numeric {
            return fail("relative packing only applies to int32, int64 and double fields".to_string());
        }
        if *base_name == field.name {
            return fail("relative to itself, use delta".to_string());
        }
        let Some(base) = self.fields.iter().find(|f| f.name == *base_name) else {
            return fail(format!("relative to unknown field {}", base_name));
        };
        if base.kind != field.kind {
            return fail(format!(
                "relative to {} of type {:?}, expected {:?}",
                base.name, base.kind, field.kind
            ));
        }
        if base.relative_to.is_some() {
            return fail(format!("base {} is itself relative", base.name));
        }
        if field.kind == FieldKind::Double && (field.scale.is_none() || field.scale != base.scale) {
            return fail(format!("relative double needs the same scale as {}", base.name));
        }
        Ok(())
    }
}

/// Bound, immutable record layout.
#[derive(Debug)]
pub struct Schema {
    descriptor: SchemaDescriptor,
    description: String,
    record_size: usize,
    bool_bytes: usize,
    fields: Vec<FieldLayout>,
    by_name: HashMap<String, usize>,
    compact: [Vec<CompactEntry>; 3],
}

impl Schema {
    pub fn bind(descriptor: SchemaDescriptor) -> Result<Self> {
        descriptor.validate()?;
        let description = descriptor.to_description()?;
        let plan = layout::plan(&descriptor.fields);

        let by_name = descriptor
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();

        Ok(Self {
            descriptor,
            description,
            record_size: plan.record_size,
            bool_bytes: plan.bool_bytes,
            fields: plan.fields,
            by_name,
            compact: plan.compact,
        })
    }

    pub fn from_description(text: &str) -> Result<Self> {
        Self::bind(SchemaDescriptor::from_description(text)?)
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &SchemaDescriptor {
        &self.descriptor
    }

    /// Description text as stored in the type library.
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn bool_bytes(&self) -> usize {
        self.bool_bytes
    }

    pub fn null_compaction(&self) -> bool {
        self.descriptor.null_compaction
    }

    pub fn fields(&self) -> &[FieldLayout] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&FieldLayout> {
        self.fields.get(index)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Non-bool fields of the given fixed width (1, 4 or 8), in layout order.
    pub fn compact_entries(&self, width: usize) -> &[CompactEntry] {
        match width {
            1 => &self.compact[0],
            4 => &self.compact[1],
            8 => &self.compact[2],
            _ => &[],
        }
    }

    pub fn variable_fields(&self) -> impl Iterator<Item = &FieldLayout> {
        self.fields.iter().filter(|f| f.kind == FieldKind::Variable)
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.description == other.description
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> SchemaDescriptor {
        SchemaDescriptor::new("trace::io")
            .namespace("example.com")
            .version("1.0")
            .field(FieldSpec::new("flag", FieldKind::Bool))
            .field(FieldSpec::new("ts", FieldKind::Int64).delta())
            .field(FieldSpec::new("op", FieldKind::Byte).nullable())
            .field(FieldSpec::new("path", FieldKind::Variable).unique())
            .field(FieldSpec::new("bytes", FieldKind::Int32))
            .field(FieldSpec::new("lat", FieldKind::Double).nullable())
    }

    #[test]
    fn test_description_roundtrip() -> Result<()> {
        let schema = Schema::bind(descriptor())?;
        let reparsed = Schema::from_description(schema.description())?;
        assert_eq!(schema, reparsed);
        assert_eq!(reparsed.descriptor(), &descriptor());
        Ok(())
    }

    #[test]
    fn test_small_to_big_layout() -> Result<()> {
        let schema = Schema::bind(descriptor())?;
        // flag + two null bits fit in one byte
        assert_eq!(schema.bool_bytes(), 1);

        let offset = |name: &str| schema.fields()[schema.field_index(name).unwrap()].offset;
        assert_eq!(offset("op"), 1);
        assert_eq!(offset("bytes"), 4);
        assert_eq!(offset("path"), 8);
        assert_eq!(offset("ts"), 16);
        assert_eq!(offset("lat"), 24);
        assert_eq!(schema.record_size(), 32);

        assert_eq!(schema.compact_entries(1).len(), 1);
        assert_eq!(schema.compact_entries(4).len(), 2);
        assert_eq!(schema.compact_entries(8).len(), 2);
        Ok(())
    }

    #[test]
    fn test_packing_options_in_description() -> Result<()> {
        let descriptor = SchemaDescriptor::new("trace::span")
            .field(FieldSpec::new("start", FieldKind::Double).scale(1e-6).delta())
            .field(FieldSpec::new("end", FieldKind::Double).scale(1e-6).relative_to("start"))
            .field(FieldSpec::new("first", FieldKind::Int64))
            .field(FieldSpec::new("last", FieldKind::Int64).nullable().relative_to("first"));
        let schema = Schema::bind(descriptor.clone())?;
        assert!(schema.description().contains("\"relative_to\":\"start\""));

        let reparsed = Schema::from_description(schema.description())?;
        assert_eq!(reparsed.descriptor(), &descriptor);
        let end = &reparsed.fields()[1];
        assert_eq!(end.scale, Some(1e-6));
        assert_eq!(end.relative_to, Some(0));
        assert_eq!(reparsed.fields()[3].relative_to, Some(2));
        assert_eq!(reparsed.fields()[2].relative_to, None);
        Ok(())
    }

    #[test]
    fn test_invalid_descriptors() {
        let long = "x".repeat(MAX_TYPE_NAME_LEN + 1);
        let cases = vec![
            SchemaDescriptor::new("empty"),
            SchemaDescriptor::new(long).field(FieldSpec::new("a", FieldKind::Int32)),
            SchemaDescriptor::new("dup")
                .field(FieldSpec::new("a", FieldKind::Int32))
                .field(FieldSpec::new("a", FieldKind::Int64)),
            SchemaDescriptor::new("uniq").field(FieldSpec::new("a", FieldKind::Int32).unique()),
            SchemaDescriptor::new("delta").field(FieldSpec::new("a", FieldKind::Double).delta()),
            SchemaDescriptor::new("delta").field(FieldSpec::new("a", FieldKind::Variable).delta()),
            SchemaDescriptor::new("scale").field(FieldSpec::new("a", FieldKind::Int64).scale(0.5)),
            SchemaDescriptor::new("scale").field(FieldSpec::new("a", FieldKind::Double).scale(0.0)),
            SchemaDescriptor::new("scale")
                .field(FieldSpec::new("a", FieldKind::Double).scale(f64::NAN)),
            SchemaDescriptor::new("rel")
                .field(FieldSpec::new("a", FieldKind::Int32).relative_to("a")),
            SchemaDescriptor::new("rel")
                .field(FieldSpec::new("a", FieldKind::Int32).relative_to("missing")),
            SchemaDescriptor::new("rel")
                .field(FieldSpec::new("a", FieldKind::Int32))
                .field(FieldSpec::new("b", FieldKind::Int64).relative_to("a")),
            SchemaDescriptor::new("rel")
                .field(FieldSpec::new("a", FieldKind::Int32))
                .field(FieldSpec::new("b", FieldKind::Int32).relative_to("a"))
                .field(FieldSpec::new("c", FieldKind::Int32).relative_to("b")),
            SchemaDescriptor::new("rel")
                .field(FieldSpec::new("a", FieldKind::Double).scale(0.1))
                .field(FieldSpec::new("b", FieldKind::Double).scale(0.01).relative_to("a")),
            SchemaDescriptor::new("rel")
                .field(FieldSpec::new("a", FieldKind::Double))
                .field(FieldSpec::new("b", FieldKind::Double).relative_to("a")),
            SchemaDescriptor::new("ver")
                .version("one")
                .field(FieldSpec::new("a", FieldKind::Int32)),
        ];
        for case in cases {
            assert!(matches!(Schema::bind(case), Err(Error::Schema(_))));
        }
    }
}
