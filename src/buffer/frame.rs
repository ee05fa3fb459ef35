//! Page Frame: the fixed-size buffer plus the metadata the table and
//! eviction policies need to reason about it without holding the table
//! mutex.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::common::{FileId, PageIndex, PAGE_SIZE};

/// Process-wide monotonic tick, used for recency comparisons by the CLOCK
/// policy. Not a wall-clock timestamp; only relative ordering matters.
static TICK: AtomicU64 = AtomicU64::new(0);

pub fn next_tick() -> u64 {
    TICK.fetch_add(1, Ordering::Relaxed) + 1
}

pub fn current_tick() -> u64 {
    TICK.load(Ordering::Relaxed)
}

/// A single 4 KiB page buffer, aligned to its own size so a future direct
/// I/O backing store can hand it straight to `pread`/`pwrite` without a
/// bounce buffer.
#[repr(C, align(4096))]
pub struct PageBuffer {
    data: [u8; PAGE_SIZE],
}

impl PageBuffer {
    pub fn zeroed() -> Self {
        Self {
            data: [0u8; PAGE_SIZE],
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Lifecycle state of a frame. `Locked` doubles for both "being populated by
/// the demand loader" and "being flushed by the writeback engine" — in both
/// cases the frame must not be evicted and its contents must not be read by
/// a second concurrent writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameState {
    Clean = 0,
    Dirty = 1,
    Locked = 2,
}

impl FrameState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => FrameState::Clean,
            1 => FrameState::Dirty,
            _ => FrameState::Locked,
        }
    }
}

/// A resident page: its data plus the bookkeeping the table and eviction
/// policies consult. Refcount and last-access are atomic so they can be
/// read without the table mutex once a caller already holds a guard; state
/// and the locked bit are only ever mutated while the table mutex is held
/// (the table is the sole synchronization point for transitions).
pub struct PageFrame {
    file_id: FileId,
    page_index: PageIndex,
    state: AtomicU8,
    locked: std::sync::atomic::AtomicBool,
    refcount: AtomicU32,
    last_accessed: AtomicU64,
    data: RwLock<PageBuffer>,
}

impl PageFrame {
    /// Construct a frame in the Locked state, refcount 0, ready to be
    /// populated by a loader and published by the table.
    pub fn new_locked(file_id: FileId, page_index: PageIndex) -> Self {
        Self {
            file_id,
            page_index,
            state: AtomicU8::new(FrameState::Locked as u8),
            locked: std::sync::atomic::AtomicBool::new(true),
            refcount: AtomicU32::new(0),
            last_accessed: AtomicU64::new(next_tick()),
            data: RwLock::new(PageBuffer::zeroed()),
        }
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn page_index(&self) -> PageIndex {
        self.page_index
    }

    pub fn state(&self) -> FrameState {
        FrameState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub fn is_pinned(&self) -> bool {
        self.refcount.load(Ordering::Acquire) > 0
    }

    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    pub fn last_accessed(&self) -> u64 {
        self.last_accessed.load(Ordering::Acquire)
    }

    pub fn pin(&self) {
        self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    pub fn unpin(&self) {
        let prev = self.refcount.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin called on a frame with refcount 0");
    }

    pub fn touch(&self) {
        self.last_accessed.store(next_tick(), Ordering::Release);
    }

    /// Read access to the page content. Marking dirty is the writer's
    /// responsibility via `write`.
    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, PageBuffer> {
        self.data.read()
    }

    /// Write access to the page content; marks the frame Dirty unless it is
    /// currently Locked (a loader populating it for the first time is not
    /// "dirtying" the page).
    pub fn write(&self) -> parking_lot::RwLockWriteGuard<'_, PageBuffer> {
        if self.state.load(Ordering::Acquire) == FrameState::Clean as u8 {
            self.state.store(FrameState::Dirty as u8, Ordering::Release);
        }
        self.data.write()
    }

    /// Loader finished populating the frame: publish Clean (success) or
    /// leave it for the caller to discard (failure — caller removes it from
    /// the table; this method is only called on the success path).
    pub fn finish_load(&self) {
        self.state.store(FrameState::Clean as u8, Ordering::Release);
        self.locked.store(false, Ordering::Release);
    }

    /// Begin a synchronous flush (eviction's flush-before-evict, or the
    /// writeback engine's periodic pass). Caller must have already verified
    /// the frame is Dirty, unpinned, and unlocked.
    pub fn begin_flush(&self) {
        self.state.store(FrameState::Locked as u8, Ordering::Release);
        self.locked.store(true, Ordering::Release);
    }

    pub fn finish_flush(&self, success: bool) {
        self.state.store(
            if success {
                FrameState::Clean as u8
            } else {
                FrameState::Dirty as u8
            },
            Ordering::Release,
        );
        self.locked.store(false, Ordering::Release);
    }
}

/// RAII handle returned to callers of `PageTable::get`/`get_or_load`.
/// Decrements the frame's refcount on drop so callers can never forget to
/// unpin.
pub struct FrameGuard {
    frame: Arc<PageFrame>,
}

impl FrameGuard {
    pub fn new(frame: Arc<PageFrame>) -> Self {
        frame.pin();
        Self { frame }
    }
}

impl std::ops::Deref for FrameGuard {
    type Target = Arc<PageFrame>;

    fn deref(&self) -> &Self::Target {
        &self.frame
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        self.frame.unpin();
    }
}
