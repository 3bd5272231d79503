use std::fmt;
use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::error::Result;
use crate::Error;

pub const MODE_LZ4: u32 = 1;
pub const MODE_ZLIB: u32 = 2;
pub const MODE_ZSTD: u32 = 4;
pub const MODE_SNAPPY: u32 = 8;
pub const MODE_ALL: u32 = MODE_LZ4 | MODE_ZLIB | MODE_ZSTD | MODE_SNAPPY;

/// Per-section compression mode, stored as one byte in the batch header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Mode {
    None = 0,
    Lz4 = 1,
    Zlib = 2,
    Zstd = 3,
    Snappy = 4,
}

/// Order in which candidates are tried; on equal output size the earlier wins.
pub const PREFERENCE: [Mode; 4] = [Mode::Lz4, Mode::Snappy, Mode::Zstd, Mode::Zlib];

impl Mode {
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Mode::None),
            1 => Ok(Mode::Lz4),
            2 => Ok(Mode::Zlib),
            3 => Ok(Mode::Zstd),
            4 => Ok(Mode::Snappy),
            other => Err(Error::InvalidFormat(format!(
                "unknown compression mode {}",
                other
            ))),
        }
    }

    /// Bit of this mode in a requested-modes mask.
    pub fn mask(self) -> u32 {
        match self {
            Mode::None => 0,
            Mode::Lz4 => MODE_LZ4,
            Mode::Zlib => MODE_ZLIB,
            Mode::Zstd => MODE_ZSTD,
            Mode::Snappy => MODE_SNAPPY,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Mode::None => "none",
            Mode::Lz4 => "lz4",
            Mode::Zlib => "zlib",
            Mode::Zstd => "zstd",
            Mode::Snappy => "snappy",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Try every requested algorithm and keep the smallest output that is
/// strictly smaller than the input. Falls back to the raw bytes.
pub fn compress(input: &[u8], modes: u32, level: u32) -> (Mode, Vec<u8>) {
    if input.is_empty() {
        return (Mode::None, Vec::new());
    }

    let mut best: Option<(Mode, Vec<u8>)> = None;
    for mode in PREFERENCE.into_iter().filter(|m| modes & m.mask() != 0) {
        let candidate = match try_compress(mode, input, level) {
            Ok(out) => out,
            Err(e) => {
                tracing::debug!(mode = %mode, error = %e, "compression attempt failed");
                continue;
            }
        };
        let limit = best.as_ref().map_or(input.len(), |(_, b)| b.len());
        if candidate.len() < limit {
            best = Some((mode, candidate));
        }
    }

    best.unwrap_or_else(|| (Mode::None, input.to_vec()))
}

fn try_compress(mode: Mode, input: &[u8], level: u32) -> std::io::Result<Vec<u8>> {
    match mode {
        Mode::None => Ok(input.to_vec()),
        Mode::Lz4 => Ok(lz4_flex::block::compress(input)),
        Mode::Snappy => snap::raw::Encoder::new()
            .compress_vec(input)
            .map_err(std::io::Error::other),
        Mode::Zstd => zstd::bulk::compress(input, level as i32),
        Mode::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::new(level));
            encoder.write_all(input)?;
            encoder.finish()
        }
    }
}

/// Inverse of [`compress`]; the output must be exactly `expected` bytes.
pub fn decompress(mode: Mode, input: &[u8], expected: usize) -> Result<Vec<u8>> {
    let corrupt = |e: &dyn fmt::Display| {
        Error::CorruptData(format!("{} decompression failed: {}", mode, e))
    };
    let output = match mode {
        Mode::None => input.to_vec(),
        Mode::Lz4 => lz4_flex::block::decompress(input, expected).map_err(|e| corrupt(&e))?,
        Mode::Snappy => {
            let declared = snap::raw::decompress_len(input).map_err(|e| corrupt(&e))?;
            if declared != expected {
                return Err(Error::CorruptData(format!(
                    "snappy section declares {} bytes, expected {}",
                    declared, expected
                )));
            }
            snap::raw::Decoder::new()
                .decompress_vec(input)
                .map_err(|e| corrupt(&e))?
        }
        Mode::Zstd => zstd::bulk::decompress(input, expected).map_err(|e| corrupt(&e))?,
        Mode::Zlib => {
            let mut output = Vec::with_capacity(expected);
            ZlibDecoder::new(input)
                .take(expected as u64 + 1)
                .read_to_end(&mut output)
                .map_err(|e| corrupt(&e))?;
            output
        }
    };
    if output.len() != expected {
        return Err(Error::CorruptData(format!(
            "{} section decompressed to {} bytes, expected {}",
            mode,
            output.len(),
            expected
        )));
    }
    Ok(output)
}
