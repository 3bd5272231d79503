use itertools::Itertools;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::batch::RecordBatch;
use crate::codec::{Mode, PackedBatch};

/// Shared handle a producer passes to `submit` to collect statistics for its
/// own batches.
pub type StatsHandle = Arc<Mutex<SinkStats>>;

const MODES: [Mode; 5] = [Mode::None, Mode::Lz4, Mode::Snappy, Mode::Zstd, Mode::Zlib];

/// Packing statistics, accumulated per sink and optionally per producer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub batches: u64,
    pub records: u64,
    /// In-memory fixed area bytes.
    pub fixed_bytes: u64,
    /// In-memory variable pool bytes.
    pub variable_bytes: u64,
    /// Bytes handed to the compressors, after repacking and null compaction.
    pub raw_bytes: u64,
    /// Bytes written to the file, headers included.
    pub packed_bytes: u64,
    /// Sections stored with each mode, indexed by mode byte.
    pub mode_counts: [u64; 5],
    pub pack_time: Duration,
}

impl SinkStats {
    pub fn new_handle() -> StatsHandle {
        Arc::new(Mutex::new(SinkStats::default()))
    }

    pub(crate) fn record(&mut self, batch: &RecordBatch, packed: &PackedBatch, elapsed: Duration) {
        self.batches += 1;
        self.records += batch.nrecords() as u64;
        self.fixed_bytes += batch.fixed().len() as u64;
        self.variable_bytes += batch.variable().len() as u64;
        self.raw_bytes += (packed.fixed_size + packed.variable_size) as u64;
        self.packed_bytes += packed.bytes.len() as u64;
        self.mode_counts[packed.fixed_mode as usize] += 1;
        self.mode_counts[packed.variable_mode as usize] += 1;
        self.pack_time += elapsed;
    }

    pub fn mode_count(&self, mode: Mode) -> u64 {
        self.mode_counts[mode as usize]
    }

    /// Packed size over in-memory size; 0 when nothing was written.
    pub fn compression_ratio(&self) -> f64 {
        let unpacked = self.fixed_bytes + self.variable_bytes;
        if unpacked == 0 {
            return 0.0;
        }
        self.packed_bytes as f64 / unpacked as f64
    }
}

impl fmt::Display for SinkStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let modes = MODES
            .iter()
            .filter(|&&m| self.mode_count(m) > 0)
            .map(|&m| format!("{}={}", m, self.mode_count(m)))
            .join(" ");
        write!(
            f,
            "{} batches, {} records; unpacked {} fixed + {} variable bytes, {} raw, {} packed ({:.1}%); modes [{}]; pack time {:.3}s",
            self.batches,
            self.records,
            self.fixed_bytes,
            self.variable_bytes,
            self.raw_bytes,
            self.packed_bytes,
            self.compression_ratio() * 100.0,
            modes,
            self.pack_time.as_secs_f64()
        )
    }
}
