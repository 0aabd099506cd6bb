//! Disk manager for page-level file I/O.
//!
//! One data file, one file descriptor, positioned reads and writes at
//! `page_id * PAGE_SIZE`. Page allocation is a monotonic atomic counter
//! seeded from the file size at open.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use vellum_buffer::PageStore;
use vellum_common::page::{PageId, PAGE_SIZE};
use vellum_common::Result;

/// Manages reading and writing pages of the single data file.
pub struct DiskManager {
    /// Path to the data file.
    path: PathBuf,
    /// The open file handle; exclusively owned.
    file: Mutex<File>,
    /// Next page id to hand out.
    next_page_id: AtomicI32,
    /// Whether `sync` reaches the physical disk.
    fsync_enabled: bool,
}

impl DiskManager {
    /// Opens (creating if necessary) the data file at `path` with fsync
    /// enabled.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, true)
    }

    /// Opens the data file, optionally disabling fsync (useful in tests).
    pub fn open_with(path: impl AsRef<Path>, fsync_enabled: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let next_page_id = (file_size / PAGE_SIZE as u64) as i32;

        Ok(Self {
            path,
            file: Mutex::new(file),
            next_page_id: AtomicI32::new(next_page_id),
            fsync_enabled,
        })
    }

    /// Returns the data file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current file size in bytes.
    pub fn file_size(&self) -> Result<u64> {
        let file = self.file.lock();
        Ok(file.metadata()?.len())
    }

    /// Returns the number of pages the allocator has handed out so far.
    pub fn num_pages(&self) -> i32 {
        self.next_page_id.load(Ordering::Acquire)
    }
}

impl PageStore for DiskManager {
    /// Reads a page. A short read beyond end-of-file zero-fills the
    /// remainder, so fetching a freshly allocated page is well defined.
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_id.file_offset()))?;

        let mut filled = 0;
        while filled < PAGE_SIZE {
            match file.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        buf[filled..].fill(0);
        Ok(())
    }

    fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_id.file_offset()))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId> {
        Ok(PageId::new(self.next_page_id.fetch_add(1, Ordering::AcqRel)))
    }

    /// Placeholder: deallocated pages are not reclaimed.
    fn deallocate_page(&self, _page_id: PageId) -> Result<()> {
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        if !self.fsync_enabled {
            return Ok(());
        }
        let file = self.file.lock();
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_disk() -> (DiskManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("test.db")).unwrap();
        (disk, dir)
    }

    #[test]
    fn test_disk_open_empty_file() {
        let (disk, _dir) = create_test_disk();
        assert_eq!(disk.num_pages(), 0);
        assert_eq!(disk.file_size().unwrap(), 0);
    }

    #[test]
    fn test_disk_allocate_monotonic() {
        let (disk, _dir) = create_test_disk();

        assert_eq!(disk.allocate_page().unwrap(), PageId::new(0));
        assert_eq!(disk.allocate_page().unwrap(), PageId::new(1));
        assert_eq!(disk.allocate_page().unwrap(), PageId::new(2));
        assert_eq!(disk.num_pages(), 3);
    }

    #[test]
    fn test_disk_write_read_roundtrip() {
        let (disk, _dir) = create_test_disk();

        let page_id = disk.allocate_page().unwrap();
        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAB;
        data[100] = 0xCD;
        data[PAGE_SIZE - 1] = 0xEF;
        disk.write_page(page_id, &data).unwrap();

        let mut read = [0u8; PAGE_SIZE];
        disk.read_page(page_id, &mut read).unwrap();
        assert_eq!(read[0], 0xAB);
        assert_eq!(read[100], 0xCD);
        assert_eq!(read[PAGE_SIZE - 1], 0xEF);
    }

    #[test]
    fn test_disk_read_past_eof_zero_fills() {
        let (disk, _dir) = create_test_disk();

        let mut buf = [0xFFu8; PAGE_SIZE];
        disk.read_page(PageId::new(10), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_disk_partial_page_zero_fills_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        std::fs::write(&path, [0x11u8; 100]).unwrap();

        let disk = DiskManager::open(&path).unwrap();
        let mut buf = [0xFFu8; PAGE_SIZE];
        disk.read_page(PageId::new(0), &mut buf).unwrap();

        assert!(buf[..100].iter().all(|&b| b == 0x11));
        assert!(buf[100..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_disk_allocator_seeded_from_file_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let disk = DiskManager::open(&path).unwrap();
            let p0 = disk.allocate_page().unwrap();
            let p1 = disk.allocate_page().unwrap();
            disk.write_page(p0, &[1u8; PAGE_SIZE]).unwrap();
            disk.write_page(p1, &[2u8; PAGE_SIZE]).unwrap();
            disk.sync().unwrap();
        }

        let disk = DiskManager::open(&path).unwrap();
        assert_eq!(disk.num_pages(), 2);
        assert_eq!(disk.allocate_page().unwrap(), PageId::new(2));
    }

    #[test]
    fn test_disk_overwrite_page() {
        let (disk, _dir) = create_test_disk();

        let page_id = disk.allocate_page().unwrap();
        disk.write_page(page_id, &[0xAAu8; PAGE_SIZE]).unwrap();
        disk.write_page(page_id, &[0xBBu8; PAGE_SIZE]).unwrap();

        let mut buf = [0u8; PAGE_SIZE];
        disk.read_page(page_id, &mut buf).unwrap();
        assert_eq!(buf[0], 0xBB);
    }

    #[test]
    fn test_disk_sync() {
        let (disk, _dir) = create_test_disk();
        let page_id = disk.allocate_page().unwrap();
        disk.write_page(page_id, &[0u8; PAGE_SIZE]).unwrap();
        disk.sync().unwrap();
    }

    #[test]
    fn test_disk_deallocate_is_noop() {
        let (disk, _dir) = create_test_disk();
        let page_id = disk.allocate_page().unwrap();
        disk.deallocate_page(page_id).unwrap();
        // Allocation keeps counting upward.
        assert_eq!(disk.allocate_page().unwrap(), PageId::new(1));
    }
}
