//! Sequential readahead: detects a single forward-sequential access stream
//! per detector instance and schedules a fixed-size window of prefetches.

use parking_lot::Mutex;
use tracing::trace;

use crate::buffer::table::PageTable;
use crate::common::{FileId, PageIndex};
use crate::storage::BackingStore;

pub struct ReadaheadDetector {
    last: Mutex<Option<(FileId, PageIndex)>>,
    window: u64,
}

impl ReadaheadDetector {
    pub fn new(window: u64) -> Self {
        Self {
            last: Mutex::new(None),
            window,
        }
    }

    /// Record a completed read of `page_index` in `file_id`. If it
    /// continues the previously observed sequential stream, schedule
    /// `window` pages starting just past it. Prefetch failures are
    /// silently dropped — readahead is a hint, not a correctness
    /// requirement.
    pub fn on_read(
        &self,
        file_id: FileId,
        page_index: PageIndex,
        table: &PageTable,
        backing_store: &dyn BackingStore,
    ) {
        let sequential = {
            let mut last = self.last.lock();
            let was_sequential = matches!(*last, Some((f, p)) if f == file_id && p + 1 == page_index);
            *last = Some((file_id, page_index));
            was_sequential
        };

        if !sequential {
            return;
        }

        trace!(file_id, page_index, window = self.window, "readahead: sequential stream detected");
        for i in 1..=self.window {
            let prefetch_index = page_index + i;
            // `get_or_load`'s own fast path no-ops if the page is already
            // resident; the returned guard is dropped immediately since
            // readahead does not hand the page to a caller.
            let _ = table.get_or_load(
                file_id,
                prefetch_index,
                |buf| backing_store.read_page(file_id, prefetch_index, buf) > 0,
                backing_store,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::table::PageTable;
    use crate::storage::disk::test_support::MemoryBackingStore;

    #[test]
    fn sequential_reads_trigger_prefetch_window() {
        let table = PageTable::new(16);
        let bs = MemoryBackingStore::new();
        for i in 0..6u64 {
            bs.seed(1, i, &[i as u8; 4096]);
        }
        let detector = ReadaheadDetector::new(4);

        table.get_or_load(1, 0, |buf| bs.read_page(1, 0, buf) > 0, &bs).unwrap();
        detector.on_read(1, 0, &table, &bs);
        assert_eq!(table.total(), 1);

        table.get_or_load(1, 1, |buf| bs.read_page(1, 1, buf) > 0, &bs).unwrap();
        detector.on_read(1, 1, &table, &bs);

        for page in 2..=5u64 {
            assert!(table.get(1, page).is_some(), "page {page} should be prefetched");
        }
    }

    #[test]
    fn non_sequential_reads_do_not_prefetch() {
        let table = PageTable::new(16);
        let bs = MemoryBackingStore::new();
        let detector = ReadaheadDetector::new(4);

        table.get_or_load(1, 0, |_| true, &bs).unwrap();
        detector.on_read(1, 0, &table, &bs);
        table.get_or_load(1, 9, |_| true, &bs).unwrap();
        detector.on_read(1, 9, &table, &bs);

        assert!(table.get(1, 10).is_none());
    }
}
