//! Page Table: the resident-set map plus the recency sequence eviction
//! policies scan, and the demand-load (single-flight) path.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::buffer::eviction::{EvictionPolicy, LruPolicy};
use crate::buffer::frame::{FrameGuard, FrameState, PageFrame};
use crate::common::{FileId, PageIndex, PAGE_SIZE};
use crate::storage::BackingStore;

type PageKey = (FileId, PageIndex);

/// Intrusive doubly-linked recency order over page keys, oldest at the
/// front. O(1) touch/remove/push_back, a better fit than a deque plus
/// linear search once the table holds more than a handful of frames.
#[derive(Default)]
pub struct RecencyList {
    nodes: HashMap<PageKey, Link>,
    head: Option<PageKey>,
    tail: Option<PageKey>,
}

struct Link {
    prev: Option<PageKey>,
    next: Option<PageKey>,
}

impl RecencyList {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn front(&self) -> Option<PageKey> {
        self.head
    }

    pub fn next_of(&self, key: &PageKey) -> Option<PageKey> {
        self.nodes.get(key).and_then(|l| l.next)
    }

    pub fn contains(&self, key: &PageKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn iter_front_to_back(&self) -> impl Iterator<Item = PageKey> + '_ {
        std::iter::successors(self.head, move |k| self.next_of(k))
    }

    pub fn push_back(&mut self, key: PageKey) {
        if self.nodes.contains_key(&key) {
            return;
        }
        let prev = self.tail;
        self.nodes.insert(key, Link { prev, next: None });
        if let Some(prev) = prev {
            self.nodes.get_mut(&prev).unwrap().next = Some(key);
        } else {
            self.head = Some(key);
        }
        self.tail = Some(key);
    }

    pub fn remove(&mut self, key: PageKey) {
        let Some(link) = self.nodes.remove(&key) else {
            return;
        };
        match link.prev {
            Some(prev) => self.nodes.get_mut(&prev).unwrap().next = link.next,
            None => self.head = link.next,
        }
        match link.next {
            Some(next) => self.nodes.get_mut(&next).unwrap().prev = link.prev,
            None => self.tail = link.prev,
        }
    }

    /// Remove then re-insert at the tail (most recently touched).
    pub fn touch(&mut self, key: PageKey) {
        self.remove(key);
        self.push_back(key);
    }
}

#[derive(Default)]
pub struct TableStats {
    pub hits: std::sync::atomic::AtomicU64,
    pub misses: std::sync::atomic::AtomicU64,
    pub evictions: std::sync::atomic::AtomicU64,
    pub failed_evictions: std::sync::atomic::AtomicU64,
}

/// Point-in-time snapshot of the table's counters. Not aggregated or
/// exported anywhere by this crate; a host application that wants metrics
/// reads this and forwards it to whatever it already uses for that.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub failed_evictions: u64,
}

impl TableStats {
    pub fn snapshot(&self) -> TableStatsSnapshot {
        use std::sync::atomic::Ordering::Relaxed;
        TableStatsSnapshot {
            hits: self.hits.load(Relaxed),
            misses: self.misses.load(Relaxed),
            evictions: self.evictions.load(Relaxed),
            failed_evictions: self.failed_evictions.load(Relaxed),
        }
    }
}

struct TableInner {
    map: HashMap<PageKey, Arc<PageFrame>>,
    recency: RecencyList,
}

/// The resident-set map. All mutations to `map`/`recency` are serialized by
/// a single mutex; per-frame content and most metadata live outside it
/// (see `PageFrame`).
pub struct PageTable {
    max_pages: usize,
    inner: Mutex<TableInner>,
    policy: RwLock<Arc<dyn EvictionPolicy>>,
    pub stats: TableStats,
}

impl PageTable {
    pub fn new(max_pages: usize) -> Self {
        Self {
            max_pages,
            inner: Mutex::new(TableInner {
                map: HashMap::new(),
                recency: RecencyList::default(),
            }),
            policy: RwLock::new(Arc::new(LruPolicy::default())),
            stats: TableStats::default(),
        }
    }

    pub fn set_policy(&self, policy: Arc<dyn EvictionPolicy>) {
        *self.policy.write() = policy;
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.read().name()
    }

    pub fn total(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn dirty(&self) -> usize {
        self.inner
            .lock()
            .map
            .values()
            .filter(|f| f.state() == FrameState::Dirty)
            .count()
    }

    pub fn clean(&self) -> usize {
        self.total() - self.dirty()
    }

    pub fn stats(&self) -> TableStatsSnapshot {
        self.stats.snapshot()
    }

    /// Fast path: return the frame if resident, touching its recency
    /// position and access timestamp.
    pub fn get(&self, file_id: FileId, page_index: PageIndex) -> Option<FrameGuard> {
        let key = (file_id, page_index);
        let mut inner = self.inner.lock();
        let frame = inner.map.get(&key)?.clone();
        frame.touch();
        inner.recency.touch(key);
        drop(inner);
        self.stats.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Some(FrameGuard::new(frame))
    }

    /// Publish a frame as resident directly, bypassing the loader. Does not
    /// check capacity; callers that need the bound enforced should evict
    /// first.
    pub fn insert(&self, file_id: FileId, page_index: PageIndex, frame: Arc<PageFrame>) {
        let key = (file_id, page_index);
        let mut inner = self.inner.lock();
        inner.map.insert(key, frame);
        inner.recency.push_back(key);
    }

    /// Single-flight demand load: returns `(guard, was_miss)` on success,
    /// `None` if the table was full and no frame could be evicted, or the
    /// loader reported failure.
    pub fn get_or_load<L>(
        &self,
        file_id: FileId,
        page_index: PageIndex,
        loader: L,
        backing_store: &dyn BackingStore,
    ) -> Option<(FrameGuard, bool)>
    where
        L: FnOnce(&mut [u8]) -> bool,
    {
        let key = (file_id, page_index);

        if let Some(guard) = self.get(file_id, page_index) {
            return Some((guard, false));
        }

        // Check capacity and reserve the slot for this key in the same lock
        // hold, so two concurrent faults on distinct keys can't both observe
        // room and both publish, pushing the table over `max_pages`.
        let placeholder = Arc::new(PageFrame::new_locked(file_id, page_index));
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(existing) = inner.map.get(&key).cloned() {
                    drop(inner);
                    return self.coalesce_onto(key, existing);
                }
                if inner.map.len() < self.max_pages {
                    inner.map.insert(key, placeholder.clone());
                    break;
                }
            }
            if !self.evict_one(backing_store) {
                warn!(file_id, page_index, "demand load failed: table full, nothing evictable");
                return None;
            }
        }

        trace!(file_id, page_index, "demand loader: fetching from backing store");
        self.stats.misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let success = loader(placeholder.write().data_mut());

        let mut inner = self.inner.lock();
        if success {
            placeholder.touch();
            placeholder.finish_load();
            inner.recency.push_back(key);
            drop(inner);
            Some((FrameGuard::new(placeholder), true))
        } else {
            inner.map.remove(&key);
            drop(inner);
            debug!(file_id, page_index, "demand loader: load failed");
            None
        }
    }

    /// Wait for another thread's in-flight load of `key` to finish, then
    /// adopt its result. Spins rather than parking, matching this crate's
    /// avoidance of async suspension primitives on the hot path.
    fn coalesce_onto(&self, key: PageKey, frame: Arc<PageFrame>) -> Option<(FrameGuard, bool)> {
        while frame.is_locked() {
            std::hint::spin_loop();
        }
        let mut inner = self.inner.lock();
        let still_present = inner
            .map
            .get(&key)
            .map(|f| Arc::ptr_eq(f, &frame))
            .unwrap_or(false);
        if still_present {
            frame.touch();
            inner.recency.touch(key);
            drop(inner);
            Some((FrameGuard::new(frame), false))
        } else {
            None
        }
    }

    /// Low-level flush choreography shared by eviction's flush-before-evict
    /// and the writeback engine's periodic pass: lock the frame, release
    /// the table mutex, invoke the backing-store write callback, reacquire
    /// the mutex and transition state. Caller must have already confirmed
    /// the frame is Dirty, unpinned, and unlocked.
    fn flush_dirty_frame(&self, frame: &Arc<PageFrame>, backing_store: &dyn BackingStore) -> bool {
        frame.begin_flush();
        frame.pin();

        let ok = {
            let guard = frame.read();
            backing_store.write_page(frame.file_id(), frame.page_index(), guard.data(), PAGE_SIZE)
                == PAGE_SIZE
        };

        frame.finish_flush(ok);
        frame.unpin();
        ok
    }

    /// Find a Dirty, unpinned, unlocked frame (optionally restricted to one
    /// file) and flush it synchronously. Returns `None` if there was no
    /// candidate, `Some(true/false)` for flush success/failure otherwise.
    pub fn flush_one_dirty(
        &self,
        backing_store: &dyn BackingStore,
        file_scope: Option<FileId>,
    ) -> Option<bool> {
        let frame = {
            let inner = self.inner.lock();
            inner
                .map
                .iter()
                .find(|(k, f)| {
                    file_scope.map(|fid| fid == k.0).unwrap_or(true)
                        && f.state() == FrameState::Dirty
                        && !f.is_pinned()
                        && !f.is_locked()
                })
                .map(|(_, f)| f.clone())?
        };
        Some(self.flush_dirty_frame(&frame, backing_store))
    }

    /// Evict a single victim chosen by the active policy. Dirty victims are
    /// flushed synchronously before removal; a victim whose flush fails is
    /// abandoned and the scan continues. Returns false if nothing could be
    /// evicted.
    pub fn evict_one(&self, backing_store: &dyn BackingStore) -> bool {
        let attempts_cap = self.total().saturating_add(4).max(4);
        for _ in 0..attempts_cap {
            let candidate = {
                let inner = self.inner.lock();
                let policy = self.policy.read();
                policy.select_victim(&inner.recency, &inner.map)
            };
            let Some(key) = candidate else {
                return false;
            };
            let frame = {
                let inner = self.inner.lock();
                match inner.map.get(&key) {
                    Some(f) => f.clone(),
                    None => continue,
                }
            };

            if frame.is_pinned() || frame.is_locked() {
                continue;
            }

            if frame.state() == FrameState::Dirty {
                if !self.flush_dirty_frame(&frame, backing_store) {
                    self.stats
                        .failed_evictions
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    continue;
                }
            }

            let mut inner = self.inner.lock();
            let still_valid = inner
                .map
                .get(&key)
                .map(|f| Arc::ptr_eq(f, &frame))
                .unwrap_or(false)
                && !frame.is_pinned()
                && !frame.is_locked();
            if !still_valid {
                continue;
            }
            inner.map.remove(&key);
            inner.recency.remove(key);
            drop(inner);
            self.stats.evictions.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            debug!(file_id = key.0, page_index = key.1, "evicted page");
            return true;
        }
        false
    }

    /// Evict until resident count is at most `target`. Returns the number
    /// of pages actually evicted.
    pub fn evict_to_target(&self, target: usize, backing_store: &dyn BackingStore) -> usize {
        let mut evicted = 0;
        while self.total() > target {
            if !self.evict_one(backing_store) {
                break;
            }
            evicted += 1;
        }
        evicted
    }
}
