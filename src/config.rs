use std::sync::OnceLock;

use crate::codec::{Endian, PackOptions, MODE_ALL};
use crate::error::Result;
use crate::Error;

/// Environment variable holding the default read checks: a comma separated
/// list of `preuncompress`, `postuncompress`, `variable`, `all`, `none`.
pub const READ_CHECKS_ENV: &str = "EXTENT_READ_CHECKS";

/// Configuration for a [`Sink`](crate::Sink)
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Compression algorithms to try, as a `MODE_*` bitmask (default: all)
    pub compression_modes: u32,

    /// Compression level 1-9 for zlib and zstd (default: 9)
    pub compression_level: u32,

    /// Compressor threads; 0 packs and writes inline in `submit` (default: CPU count)
    pub compressors: usize,

    /// Uncompressed bytes allowed in the queue before `submit` blocks (default: 256MB)
    pub max_bytes_in_progress: usize,

    /// Byte order of the written file (default: host order)
    pub byte_order: Endian,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            compression_modes: MODE_ALL,
            compression_level: 9,
            compressors: num_cpus::get(),
            max_bytes_in_progress: 256 * 1024 * 1024, // 256MB
            byte_order: Endian::native(),
        }
    }
}

impl SinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the compression bitmask
    pub fn compression_modes(mut self, modes: u32) -> Self {
        self.compression_modes = modes;
        self
    }

    /// Set the compression level
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    /// Set the number of compressor threads
    pub fn compressors(mut self, count: usize) -> Self {
        self.compressors = count;
        self
    }

    /// Set the in-flight byte cap
    pub fn max_bytes_in_progress(mut self, bytes: usize) -> Self {
        self.max_bytes_in_progress = bytes;
        self
    }

    /// Write the file in a specific byte order
    pub fn byte_order(mut self, order: Endian) -> Self {
        self.byte_order = order;
        self
    }

    pub(crate) fn pack_options(&self) -> PackOptions {
        PackOptions {
            modes: self.compression_modes,
            level: self.compression_level,
            endian: self.byte_order,
        }
    }
}

/// Integrity checks performed when a batch is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadChecks {
    /// Verify the digest over the packed bytes before decompressing.
    pub pre_uncompress: bool,
    /// Verify the content hash over the decompressed sections.
    pub post_uncompress: bool,
    /// Self-check every variable pool entry referenced by a record.
    pub variable: bool,
}

impl ReadChecks {
    pub fn all() -> Self {
        Self {
            pre_uncompress: true,
            post_uncompress: true,
            variable: true,
        }
    }

    pub fn none() -> Self {
        Self {
            pre_uncompress: false,
            post_uncompress: false,
            variable: false,
        }
    }

    pub fn parse(spec: &str) -> Result<Self> {
        let mut checks = Self::none();
        for token in spec.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            match token {
                "preuncompress" => checks.pre_uncompress = true,
                "postuncompress" => checks.post_uncompress = true,
                "variable" => checks.variable = true,
                "all" => checks = Self::all(),
                "none" => checks = Self::none(),
                other => {
                    return Err(Error::ProtocolMisuse(format!(
                        "unknown read check '{}', expected preuncompress, postuncompress, variable, all or none",
                        other
                    )))
                }
            }
        }
        Ok(checks)
    }

    /// Process-wide default, resolved from the environment on first use.
    /// All checks are on when the variable is unset.
    pub fn process_default() -> Result<Self> {
        static DEFAULT: OnceLock<std::result::Result<ReadChecks, String>> = OnceLock::new();
        let resolved = DEFAULT.get_or_init(|| match std::env::var(READ_CHECKS_ENV) {
            Ok(spec) => {
                let parsed = Self::parse(&spec).map_err(|e| e.to_string());
                tracing::debug!(env = READ_CHECKS_ENV, value = %spec, ?parsed, "resolved read checks");
                parsed
            }
            Err(_) => Ok(Self::all()),
        });
        resolved
            .clone()
            .map_err(Error::ProtocolMisuse)
    }
}

impl Default for ReadChecks {
    fn default() -> Self {
        Self::all()
    }
}

/// Options for opening a [`Source`](crate::Source)
#[derive(Debug, Clone, Default)]
pub struct SourceOptions {
    /// Checks to run on every batch; `None` uses [`ReadChecks::process_default`]
    pub read_checks: Option<ReadChecks>,
}

impl SourceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the process-wide read checks
    pub fn read_checks(mut self, checks: ReadChecks) -> Self {
        self.read_checks = Some(checks);
        self
    }
}
