//! Ordered, compressing batch writer.
//!
//! Producers hand batches to [`Sink::submit`]. A pool of compressor threads
//! packs them in any order; a single writer thread appends them to the file
//! strictly in submission order. One mutex guards the queue, and three
//! condition variables signal work, writable heads and free capacity.

mod stats;

pub use stats::{SinkStats, StatsHandle};

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::batch::RecordBatch;
use crate::codec::{self, PackOptions, PackedBatch};
use crate::config::SinkConfig;
use crate::error::Result;
use crate::file::{library, FileWriter};
use crate::schema::{Schema, TypeRegistry, INDEX_TYPE, LIBRARY_TYPE};
use crate::Error;

/// Called by the writer with the file offset of each data batch, just before
/// the batch is appended.
pub type WriteCallback = Box<dyn FnMut(u64, &RecordBatch) + Send>;

struct PendingWrite {
    seq: u64,
    /// Taken by the compressor while it packs.
    batch: Option<RecordBatch>,
    packed: Option<PackedBatch>,
    in_progress: bool,
    size: usize,
    stats: Option<StatsHandle>,
}

impl PendingWrite {
    fn is_ready(&self) -> bool {
        self.packed.is_some() && self.batch.is_some()
    }

    fn is_claimable(&self) -> bool {
        !self.in_progress && self.packed.is_none()
    }
}

struct QueueState {
    queue: VecDeque<PendingWrite>,
    next_seq: u64,
    bytes_in_progress: usize,
    max_bytes_in_progress: usize,
    max_pending: usize,
    /// Set once the type library has been written.
    library: Option<TypeRegistry>,
    shutdown: bool,
    closed: bool,
    error: Option<Error>,
    stats: SinkStats,
}

impl QueueState {
    fn check_error(&self) -> Result<()> {
        match &self.error {
            Some(err) => Err(err.duplicate()),
            None => Ok(()),
        }
    }

    /// An empty queue always accepts one more batch, whatever its size.
    fn has_capacity(&self) -> bool {
        self.queue.is_empty()
            || (self.bytes_in_progress < self.max_bytes_in_progress
                && self.queue.len() < self.max_pending)
    }

    fn fail(&mut self, err: Error) {
        if self.error.is_none() {
            tracing::error!(error = %err, "extent sink failed");
            self.error = Some(err);
        }
    }
}

struct Output {
    /// Taken when the file is finished.
    file: Option<FileWriter>,
    callback: Option<WriteCallback>,
}

impl Output {
    fn file(&mut self) -> Result<&mut FileWriter> {
        self.file
            .as_mut()
            .ok_or_else(|| Error::ProtocolMisuse("sink is closed".to_string()))
    }

    fn write_data(&mut self, batch: &RecordBatch, packed: &PackedBatch) -> Result<u64> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::ProtocolMisuse("sink is closed".to_string()))?;
        if let Some(callback) = self.callback.as_mut() {
            callback(file.offset(), batch);
        }
        file.append(batch.type_name(), packed)
    }
}

struct Shared {
    state: Mutex<QueueState>,
    work_available: Condvar,
    write_available: Condvar,
    capacity_available: Condvar,
    output: Mutex<Output>,
    options: PackOptions,
}

impl Shared {
    fn wake_all(&self) {
        self.work_available.notify_all();
        self.write_available.notify_all();
        self.capacity_available.notify_all();
    }
}

/// Writes one extent file. Safe to share between producer threads.
pub struct Sink {
    shared: Arc<Shared>,
    compressors: Mutex<Vec<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    threaded: bool,
    index_schema: Arc<Schema>,
    path: PathBuf,
}

impl Sink {
    /// Create (or truncate) the file at `path` and start the worker threads.
    pub fn open(path: impl AsRef<Path>, config: SinkConfig) -> Result<Self> {
        let options = config.pack_options();
        options.validate()?;
        let path = path.as_ref().to_path_buf();
        let file = FileWriter::create(&path, options.endian)?;

        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                next_seq: 0,
                bytes_in_progress: 0,
                max_bytes_in_progress: config.max_bytes_in_progress,
                max_pending: 2 * config.compressors,
                library: None,
                shutdown: false,
                closed: false,
                error: None,
                stats: SinkStats::default(),
            }),
            work_available: Condvar::new(),
            write_available: Condvar::new(),
            capacity_available: Condvar::new(),
            output: Mutex::new(Output {
                file: Some(file),
                callback: None,
            }),
            options,
        });

        let sink = Sink {
            shared: shared.clone(),
            compressors: Mutex::new(Vec::with_capacity(config.compressors)),
            writer: Mutex::new(None),
            threaded: config.compressors > 0,
            index_schema: TypeRegistry::new().index_schema().clone(),
            path,
        };

        // Dropping a half-started sink stops whatever was already spawned.
        for id in 0..config.compressors {
            let shared = shared.clone();
            let handle = thread::Builder::new()
                .name(format!("extent-compress-{}", id))
                .spawn(move || compress_loop(&shared))?;
            sink.compressors.lock().push(handle);
        }
        if sink.threaded {
            let shared = shared.clone();
            let handle = thread::Builder::new()
                .name("extent-writer".to_string())
                .spawn(move || write_loop(&shared))?;
            *sink.writer.lock() = Some(handle);
        }

        tracing::info!(
            path = %sink.path.display(),
            compressors = config.compressors,
            modes = config.compression_modes,
            level = config.compression_level,
            byte_order = ?config.byte_order,
            "opened extent sink"
        );
        Ok(sink)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the type library. Must happen exactly once, before any data
    /// batch; only types in `registry` can be submitted afterwards.
    pub fn write_type_library(&self, registry: &TypeRegistry) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.check_error()?;
        if state.closed {
            return Err(Error::ProtocolMisuse(
                "type library written after close".to_string(),
            ));
        }
        if state.library.is_some() {
            return Err(Error::ProtocolMisuse(
                "type library already written".to_string(),
            ));
        }

        let batch = library::build(registry)?;
        let packed = codec::pack(&batch, &self.shared.options)?;
        let offset = self
            .shared
            .output
            .lock()
            .file()?
            .append(LIBRARY_TYPE, &packed)?;
        tracing::debug!(offset, types = registry.len(), "wrote type library");

        state.library = Some(registry.clone());
        Ok(())
    }

    /// Queue a batch for writing. Blocks while the queue is over capacity.
    /// With zero compressors the batch is packed and written before return.
    pub fn submit(&self, batch: RecordBatch, stats: Option<StatsHandle>) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.check_error()?;
        if state.closed {
            return Err(Error::ProtocolMisuse("submit after close".to_string()));
        }
        let registry = state.library.as_ref().ok_or_else(|| {
            Error::ProtocolMisuse("submit before the type library was written".to_string())
        })?;
        if batch.type_name() == LIBRARY_TYPE || batch.type_name() == INDEX_TYPE {
            return Err(Error::ProtocolMisuse(format!(
                "{} batches are written by the sink itself",
                batch.type_name()
            )));
        }
        match registry.get(batch.type_name()) {
            Some(known) if *known == **batch.schema() => {}
            _ => {
                return Err(Error::ProtocolMisuse(format!(
                    "batch type {} is not in the type library",
                    batch.type_name()
                )))
            }
        }

        if !self.threaded {
            // taken before the queue lock is released so inline writes keep
            // submission order
            let output = self.shared.output.lock();
            drop(state);
            return self.write_inline(output, batch, stats);
        }

        while !state.has_capacity() {
            self.shared.capacity_available.wait(&mut state);
            state.check_error()?;
            if state.closed {
                return Err(Error::ProtocolMisuse("submit after close".to_string()));
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        let size = batch.size();
        state.bytes_in_progress += size;
        tracing::debug!(
            seq,
            type_name = batch.type_name(),
            records = batch.nrecords(),
            bytes_in_progress = state.bytes_in_progress,
            "queued batch"
        );
        state.queue.push_back(PendingWrite {
            seq,
            batch: Some(batch),
            packed: None,
            in_progress: false,
            size,
            stats,
        });
        self.shared.work_available.notify_one();
        Ok(())
    }

    fn write_inline(
        &self,
        mut output: MutexGuard<'_, Output>,
        batch: RecordBatch,
        stats: Option<StatsHandle>,
    ) -> Result<()> {
        let start = Instant::now();
        let result = codec::pack(&batch, &self.shared.options).and_then(|packed| {
            let elapsed = start.elapsed();
            output.write_data(&batch, &packed)?;
            Ok((packed, elapsed))
        });
        drop(output);

        let mut state = self.shared.state.lock();
        match result {
            Ok((packed, elapsed)) => {
                state.stats.record(&batch, &packed, elapsed);
                if let Some(handle) = stats {
                    handle.lock().record(&batch, &packed, elapsed);
                }
                Ok(())
            }
            Err(err) => {
                state.fail(err.duplicate());
                Err(err)
            }
        }
    }

    /// Block until every queued batch has been written.
    pub fn flush_pending(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        loop {
            state.check_error()?;
            if state.bytes_in_progress == 0 {
                return Ok(());
            }
            self.shared.capacity_available.wait(&mut state);
        }
    }

    /// Drain the queue, write the index and tail and return the statistics.
    pub fn close(&self, fsync: bool) -> Result<SinkStats> {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(Error::ProtocolMisuse("close called twice".to_string()));
            }
            if state.library.is_none() {
                return Err(Error::ProtocolMisuse(
                    "close before the type library was written".to_string(),
                ));
            }
            state.closed = true;
        }
        self.stop_workers()?;

        let state = self.shared.state.lock();
        state.check_error()?;
        let file = self.shared.output.lock().file.take().ok_or_else(|| {
            Error::ProtocolMisuse("sink file already finished".to_string())
        })?;
        file.finish(&self.index_schema, &self.shared.options, fsync)?;

        tracing::info!(path = %self.path.display(), stats = %state.stats, "closed extent sink");
        Ok(state.stats.clone())
    }

    fn stop_workers(&self) -> Result<()> {
        self.shared.state.lock().shutdown = true;
        self.shared.wake_all();

        let compressors = std::mem::take(&mut *self.compressors.lock());
        for handle in compressors {
            handle
                .join()
                .map_err(|_| Error::ProtocolMisuse("compressor thread panicked".to_string()))?;
        }
        if let Some(handle) = self.writer.lock().take() {
            handle
                .join()
                .map_err(|_| Error::ProtocolMisuse("writer thread panicked".to_string()))?;
        }
        Ok(())
    }

    /// Stop updating `handle` for batches still in the queue.
    pub fn remove_stats_update(&self, handle: &StatsHandle) {
        let mut state = self.shared.state.lock();
        let mut detached = 0;
        for item in state.queue.iter_mut() {
            if item.stats.as_ref().is_some_and(|h| Arc::ptr_eq(h, handle)) {
                item.stats = None;
                detached += 1;
            }
        }
        tracing::debug!(detached, "removed stats handle");
    }

    pub fn set_write_callback(&self, callback: impl FnMut(u64, &RecordBatch) + Send + 'static) {
        self.shared.output.lock().callback = Some(Box::new(callback));
    }

    pub fn set_max_bytes_in_progress(&self, bytes: usize) {
        self.shared.state.lock().max_bytes_in_progress = bytes;
        self.shared.capacity_available.notify_all();
    }

    pub fn bytes_in_progress(&self) -> usize {
        self.shared.state.lock().bytes_in_progress
    }

    /// Statistics for every batch packed so far.
    pub fn stats(&self) -> SinkStats {
        self.shared.state.lock().stats.clone()
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        let needs_close = {
            let state = self.shared.state.lock();
            !state.closed && state.library.is_some()
        };
        let result = if needs_close {
            self.close(false).map(|_| ())
        } else {
            self.stop_workers()
        };
        if let Err(err) = result {
            tracing::error!(path = %self.path.display(), error = %err, "failed to close extent sink on drop");
        }
    }
}

fn compress_loop(shared: &Shared) {
    let mut state = shared.state.lock();
    loop {
        if state.error.is_some() {
            break;
        }
        let Some(index) = state.queue.iter().position(PendingWrite::is_claimable) else {
            if state.shutdown {
                break;
            }
            shared.work_available.wait(&mut state);
            continue;
        };

        let item = &mut state.queue[index];
        item.in_progress = true;
        let seq = item.seq;
        let Some(batch) = item.batch.take() else {
            state.fail(Error::ProtocolMisuse(format!("queued batch {} has no data", seq)));
            shared.wake_all();
            break;
        };

        let result = MutexGuard::unlocked(&mut state, || {
            let start = Instant::now();
            codec::pack(&batch, &shared.options).map(|packed| (packed, start.elapsed()))
        });

        match result {
            Ok((packed, elapsed)) => {
                state.stats.record(&batch, &packed, elapsed);
                if let Some(item) = state.queue.iter_mut().find(|w| w.seq == seq) {
                    if let Some(handle) = &item.stats {
                        handle.lock().record(&batch, &packed, elapsed);
                    }
                    tracing::debug!(
                        seq,
                        fixed_mode = %packed.fixed_mode,
                        variable_mode = %packed.variable_mode,
                        packed_size = packed.bytes.len(),
                        "packed batch"
                    );
                    item.packed = Some(packed);
                    item.batch = Some(batch);
                    item.in_progress = false;
                }
                if state.queue.front().is_some_and(PendingWrite::is_ready) {
                    shared.write_available.notify_one();
                }
                shared.capacity_available.notify_all();
            }
            Err(err) => {
                state.fail(err);
                shared.wake_all();
                break;
            }
        }
    }
}

fn write_loop(shared: &Shared) {
    let mut state = shared.state.lock();
    loop {
        if state.error.is_some() {
            break;
        }
        let mut ready = Vec::new();
        while state.queue.front().is_some_and(PendingWrite::is_ready) {
            ready.extend(state.queue.pop_front());
        }
        if ready.is_empty() {
            if state.shutdown && state.queue.is_empty() {
                break;
            }
            shared.write_available.wait(&mut state);
            continue;
        }

        let drained: usize = ready.iter().map(|w| w.size).sum();
        let result = MutexGuard::unlocked(&mut state, || write_ready(shared, &ready));
        state.bytes_in_progress -= drained;
        if let Err(err) = result {
            state.fail(err);
            shared.wake_all();
            break;
        }
        shared.capacity_available.notify_all();
    }
}

fn write_ready(shared: &Shared, items: &[PendingWrite]) -> Result<()> {
    let mut output = shared.output.lock();
    for item in items {
        if let (Some(batch), Some(packed)) = (&item.batch, &item.packed) {
            let offset = output.write_data(batch, packed)?;
            tracing::debug!(seq = item.seq, offset, size = packed.bytes.len(), "wrote batch");
        }
    }
    Ok(())
}
