//! `PageCache`: the public entry point wiring the page table, eviction
//! policy, writeback engine, and readahead detector together behind a
//! single read/write/fsync API.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use crate::buffer::config::CacheConfig;
use crate::buffer::eviction::create_policy;
use crate::buffer::io_path;
use crate::buffer::readahead::ReadaheadDetector;
use crate::buffer::table::PageTable;
use crate::buffer::writeback::WritebackEngine;
use crate::common::FileId;
use crate::storage::BackingStore;

/// Point-in-time counters from the table and the writeback engine. Not
/// aggregated or exported by this crate; a caller that wants metrics reads
/// this and forwards the numbers to whatever it already uses for that.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub failed_evictions: u64,
    pub flushes: u64,
    pub failed_flushes: u64,
}

pub struct PageCache {
    table: Arc<PageTable>,
    backing_store: Arc<dyn BackingStore>,
    writeback: WritebackEngine,
    readahead: ReadaheadDetector,
}

impl PageCache {
    pub fn new(config: CacheConfig, backing_store: Arc<dyn BackingStore>) -> Self {
        let table = Arc::new(PageTable::new(config.max_pages));
        table.set_policy(create_policy(&config.eviction_policy, config.clock_window_ticks));

        let writeback = WritebackEngine::start(
            table.clone(),
            backing_store.clone(),
            config.writeback_interval,
            config.dirty_threshold,
        );
        let readahead = ReadaheadDetector::new(config.readahead_window);

        Self {
            table,
            backing_store,
            writeback,
            readahead,
        }
    }

    /// Read up to `buf.len()` bytes (bounded by `file_size`) starting at
    /// `offset`. Returns the number of bytes copied.
    pub fn read(&self, file_id: FileId, offset: u64, buf: &mut [u8], file_size: u64) -> usize {
        io_path::read(
            &self.table,
            self.backing_store.as_ref(),
            &self.readahead,
            file_id,
            offset,
            buf,
            file_size,
        )
    }

    /// Write `buf` at `offset`, extending `file_size` as needed. Returns
    /// the number of bytes written.
    pub fn write(&self, file_id: FileId, offset: u64, buf: &[u8], file_size: &AtomicU64) -> usize {
        io_path::write(&self.table, self.backing_store.as_ref(), file_id, offset, buf, file_size)
    }

    /// Flush dirty pages, blocking until done. `file_id == 0` flushes every
    /// file; a non-zero id scopes the flush to that file.
    pub fn fsync(&self, file_id: FileId) {
        self.writeback.fsync(&self.table, self.backing_store.as_ref(), file_id);
    }

    /// Wake the writeback engine immediately instead of waiting for its
    /// next timed interval.
    pub fn signal_writeback(&self) {
        self.writeback.signal();
    }

    pub fn set_eviction_policy(&self, name: &str, clock_window_ticks: u64) {
        self.table.set_policy(create_policy(name, clock_window_ticks));
    }

    pub fn total_pages(&self) -> usize {
        self.table.total()
    }

    pub fn dirty_pages(&self) -> usize {
        self.table.dirty()
    }

    pub fn clean_pages(&self) -> usize {
        self.table.clean()
    }

    pub fn stats(&self) -> CacheStats {
        let table = self.table.stats();
        CacheStats {
            hits: table.hits,
            misses: table.misses,
            evictions: table.evictions,
            failed_evictions: table.failed_evictions,
            flushes: self.writeback.flush_count.load(std::sync::atomic::Ordering::Relaxed),
            failed_flushes: self.writeback.failed_flush_count.load(std::sync::atomic::Ordering::Relaxed),
        }
    }
}
