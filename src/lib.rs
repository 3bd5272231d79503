pub mod batch;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod file;
pub mod hasher;
pub mod schema;
pub mod sink;
pub mod source;

pub use batch::{RecordBatch, Value};
pub use codec::{Endian, MODE_ALL, MODE_LZ4, MODE_SNAPPY, MODE_ZLIB, MODE_ZSTD};
pub use config::{ReadChecks, SinkConfig, SourceOptions};
pub use error::{Error, Result};
pub use hasher::Hasher;
pub use schema::{FieldKind, FieldSpec, Schema, SchemaDescriptor, TypeRegistry};
pub use sink::{Sink, SinkStats, StatsHandle};
pub use source::{BatchSource, Source};
