//! `std::fs::File`-backed implementation of `BackingStore`, one open file
//! per `FileId`, looked up by the caller at construction time.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;

use crate::common::{FileId, PageIndex, PAGE_SIZE};
use crate::error::{CacheError, Result};
use crate::storage::BackingStore;

/// Opens and owns a fixed set of files, dispatching reads/writes by
/// `FileId`. Each file gets its own mutex since `pread`/`pwrite`-style
/// concurrent access on a single `std::fs::File` requires serializing the
/// seek-then-read/write pair.
pub struct FileBackingStore {
    files: HashMap<FileId, Mutex<File>>,
}

impl FileBackingStore {
    pub fn new() -> Self {
        Self {
            files: HashMap::new(),
        }
    }

    /// Open (creating if absent) the file at `path` and register it under
    /// `file_id`.
    pub fn register_file(&mut self, file_id: FileId, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(CacheError::Io)?;
        self.files.insert(file_id, Mutex::new(file));
        Ok(())
    }

    fn read_from_disk(&self, file_id: FileId, page_index: PageIndex, buf: &mut [u8]) -> usize {
        let Some(lock) = self.files.get(&file_id) else {
            return 0;
        };
        let mut file = lock.lock();
        let offset = page_index * PAGE_SIZE as u64;
        if file.seek(SeekFrom::Start(offset)).is_err() {
            return 0;
        }
        let mut read = 0;
        while read < buf.len() {
            match file.read(&mut buf[read..]) {
                Ok(0) => break, // EOF: short read is valid for the final page.
                Ok(n) => read += n,
                Err(_) => break,
            }
        }
        read
    }

    fn write_to_disk(&self, file_id: FileId, page_index: PageIndex, buf: &[u8], len: usize) -> usize {
        let Some(lock) = self.files.get(&file_id) else {
            return 0;
        };
        let mut file = lock.lock();
        let offset = page_index * PAGE_SIZE as u64;
        if file.seek(SeekFrom::Start(offset)).is_err() {
            return 0;
        }
        match file.write_all(&buf[..len]) {
            Ok(()) => {
                let _ = file.sync_data();
                len
            }
            Err(_) => 0,
        }
    }
}

impl Default for FileBackingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BackingStore for FileBackingStore {
    fn read_page(&self, file_id: FileId, page_index: PageIndex, buf: &mut [u8]) -> usize {
        self.read_from_disk(file_id, page_index, buf)
    }

    fn write_page(&self, file_id: FileId, page_index: PageIndex, buf: &[u8], len: usize) -> usize {
        self.write_to_disk(file_id, page_index, buf, len)
    }
}
