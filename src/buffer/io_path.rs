//! Page-aligned I/O path: decomposes a byte-range read or write into
//! per-page operations against the table, copying into/out of the
//! caller's buffer.

use crate::buffer::readahead::ReadaheadDetector;
use crate::buffer::table::PageTable;
use crate::common::{FileId, PAGE_SIZE};
use crate::storage::BackingStore;

/// Read `buf.len()` bytes (or up to `file_size - offset`, whichever is
/// smaller) starting at `offset` into `buf`. Returns the number of bytes
/// actually copied.
pub fn read(
    table: &PageTable,
    backing_store: &dyn BackingStore,
    readahead: &ReadaheadDetector,
    file_id: FileId,
    offset: u64,
    buf: &mut [u8],
    file_size: u64,
) -> usize {
    let available = file_size.saturating_sub(offset);
    let want = buf.len().min(available as usize);

    let mut done = 0usize;
    while done < want {
        let cur = offset + done as u64;
        let page_index = cur / PAGE_SIZE as u64;
        let page_offset = (cur % PAGE_SIZE as u64) as usize;
        let chunk = (want - done).min(PAGE_SIZE - page_offset);

        let Some((guard, was_miss)) = table.get_or_load(
            file_id,
            page_index,
            |dst| backing_store.read_page(file_id, page_index, dst) > 0,
            backing_store,
        ) else {
            break;
        };
        let page = guard.read();
        buf[done..done + chunk].copy_from_slice(&page.data()[page_offset..page_offset + chunk]);
        drop(page);
        drop(guard);

        if was_miss {
            readahead.on_read(file_id, page_index, table, backing_store);
        }

        done += chunk;
    }
    done
}

/// Write `buf` at `offset`, updating `file_size` if the write extends the
/// file. Returns the number of bytes actually written.
///
/// Partial-page writes (an offset/length that doesn't cover a whole page)
/// read-modify-write: the underlying page is first populated from the
/// backing store (or zero-filled, for a brand new page past the previous
/// end of file) so the unwritten portion of the page is preserved rather
/// than clobbered with zeros.
pub fn write(
    table: &PageTable,
    backing_store: &dyn BackingStore,
    file_id: FileId,
    offset: u64,
    buf: &[u8],
    file_size: &std::sync::atomic::AtomicU64,
) -> usize {
    let mut done = 0usize;
    while done < buf.len() {
        let cur = offset + done as u64;
        let page_index = cur / PAGE_SIZE as u64;
        let page_offset = (cur % PAGE_SIZE as u64) as usize;
        let chunk = (buf.len() - done).min(PAGE_SIZE - page_offset);
        let full_page_write = page_offset == 0 && chunk == PAGE_SIZE;

        let loaded = if full_page_write {
            table.get_or_load(file_id, page_index, |_dst| true, backing_store)
        } else {
            table.get_or_load(
                file_id,
                page_index,
                |dst| {
                    backing_store.read_page(file_id, page_index, dst);
                    true
                },
                backing_store,
            )
        };
        let Some((guard, _)) = loaded else {
            break;
        };

        let mut page = guard.write();
        page.data_mut()[page_offset..page_offset + chunk].copy_from_slice(&buf[done..done + chunk]);
        drop(page);
        drop(guard);

        done += chunk;
        file_size.fetch_max(cur + chunk as u64, std::sync::atomic::Ordering::AcqRel);
    }
    done
}
