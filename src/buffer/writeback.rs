//! Writeback Engine: a dedicated OS thread that periodically (or on
//! demand) flushes dirty pages, plus a blocking `fsync` entry point.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::buffer::table::PageTable;
use crate::common::FileId;
use crate::storage::BackingStore;

struct Signal {
    mutex: Mutex<bool>,
    condvar: Condvar,
}

pub struct WritebackEngine {
    running: Arc<AtomicBool>,
    signal: Arc<Signal>,
    handle: Mutex<Option<JoinHandle<()>>>,
    pub flush_count: AtomicU64,
    pub failed_flush_count: AtomicU64,
}

impl WritebackEngine {
    /// Start the background thread. It wakes every `interval`, or
    /// immediately when `signal()` is called, and, only if the number of
    /// dirty pages has reached `dirty_threshold`, flushes them until none
    /// remain (or a flush fails, in which case it leaves the remainder for
    /// the next wakeup).
    pub fn start(
        table: Arc<PageTable>,
        backing_store: Arc<dyn BackingStore>,
        interval: Duration,
        dirty_threshold: usize,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let signal = Arc::new(Signal {
            mutex: Mutex::new(false),
            condvar: Condvar::new(),
        });

        let thread_running = running.clone();
        let thread_signal = signal.clone();
        let handle = std::thread::spawn(move || {
            while thread_running.load(Ordering::Acquire) {
                {
                    let mut woke = thread_signal.mutex.lock();
                    if !*woke {
                        thread_signal.condvar.wait_for(&mut woke, interval);
                    }
                    *woke = false;
                }
                if !thread_running.load(Ordering::Acquire) {
                    break;
                }
                if table.dirty() >= dirty_threshold {
                    debug!(dirty = table.dirty(), dirty_threshold, "writeback: flushing dirty pages");
                    loop {
                        match table.flush_one_dirty(backing_store.as_ref(), None) {
                            Some(true) => continue,
                            Some(false) => {
                                warn!("writeback: flush failed, deferring to next wakeup");
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        Self {
            running,
            signal,
            handle: Mutex::new(Some(handle)),
            flush_count: AtomicU64::new(0),
            failed_flush_count: AtomicU64::new(0),
        }
    }

    /// Wake the background thread immediately instead of waiting for the
    /// next timed interval.
    pub fn signal(&self) {
        let mut woke = self.signal.mutex.lock();
        *woke = true;
        self.signal.condvar.notify_one();
    }

    /// Flush every dirty page in scope, blocking the calling thread until
    /// done. `file_id == 0` flushes all files; any other value scopes the
    /// flush to that file's dirty pages only.
    pub fn fsync(&self, table: &PageTable, backing_store: &dyn BackingStore, file_id: FileId) {
        let scope = if file_id == 0 { None } else { Some(file_id) };
        loop {
            match table.flush_one_dirty(backing_store, scope) {
                Some(true) => {
                    self.flush_count.fetch_add(1, Ordering::Relaxed);
                }
                Some(false) => {
                    self.failed_flush_count.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }
    }

    /// Signal the thread to stop and join it.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.signal();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WritebackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::table::PageTable;
    use crate::storage::disk::test_support::MemoryBackingStore;
    use std::time::Instant;

    #[test]
    fn background_thread_flushes_dirty_pages() {
        let table = Arc::new(PageTable::new(8));
        let bs = Arc::new(MemoryBackingStore::new());
        for i in 0..3u64 {
            let (guard, _) = table.get_or_load(1, i, |_| true, bs.as_ref()).unwrap();
            guard.write().data_mut()[0] = i as u8 + 1;
        }
        assert_eq!(table.dirty(), 3);

        let engine = WritebackEngine::start(table.clone(), bs.clone(), Duration::from_millis(20), 3);
        engine.signal();

        let deadline = Instant::now() + Duration::from_millis(500);
        while table.dirty() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(table.dirty(), 0);
        assert_eq!(bs.write_calls.lock().len(), 3);
        engine.stop();
    }

    #[test]
    fn fsync_is_scoped_by_file_id() {
        let table = Arc::new(PageTable::new(8));
        let bs = Arc::new(MemoryBackingStore::new());
        let (g1, _) = table.get_or_load(1, 0, |_| true, bs.as_ref()).unwrap();
        g1.write().data_mut()[0] = 1;
        let (g2, _) = table.get_or_load(2, 0, |_| true, bs.as_ref()).unwrap();
        g2.write().data_mut()[0] = 1;
        drop(g1);
        drop(g2);
        assert_eq!(table.dirty(), 2);

        let engine = WritebackEngine::start(table.clone(), bs.clone(), Duration::from_secs(3600), 8192);
        engine.fsync(&table, bs.as_ref(), 1);
        assert_eq!(table.dirty(), 1);
        engine.stop();
    }
}
