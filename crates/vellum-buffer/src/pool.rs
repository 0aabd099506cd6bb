//! Buffer pool manager.

use crate::frame::{BufferFrame, FrameId};
use crate::replacer::{LruReplacer, Replacer};
use crate::store::PageStore;
use parking_lot::Mutex;
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;
use sysinfo::System;
use tracing::warn;
use vellum_common::page::{PageId, PAGE_SIZE};
use vellum_common::Result;

/// Minimum frame count for an auto-sized pool.
const MIN_AUTO_FRAMES: usize = 64;

/// Buffer pool manager.
///
/// Caches pages in a fixed array of frames. A single pool-wide mutex
/// guards the page table, the free list, and the replacer; frame data is
/// latched per frame. Victims are selected from the free list first, then
/// from the LRU replacer, and dirty victims are written back through the
/// page store before reuse.
pub struct BufferPool {
    /// Backing storage for reads, write-back, and allocation.
    store: Arc<dyn PageStore>,
    /// Fixed array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Structural state guarded by the pool mutex.
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    /// Maps resident pages to their frame.
    page_table: HashMap<PageId, FrameId>,
    /// Frames holding no page.
    free_list: Vec<FrameId>,
    /// Eviction candidates among resident frames.
    replacer: LruReplacer,
}

impl BufferPool {
    /// Creates a buffer pool with `num_frames` frames over `store`.
    pub fn new(store: Arc<dyn PageStore>, num_frames: usize) -> Self {
        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();
        let free_list: Vec<_> = (0..num_frames).rev().map(|i| FrameId(i as u32)).collect();

        Self {
            store,
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::new(),
                free_list,
                replacer: LruReplacer::new(num_frames),
            }),
        }
    }

    /// Creates a pool sized to 25% of available system RAM, with a floor
    /// of 64 frames.
    pub fn auto_sized(store: Arc<dyn PageStore>) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        let target_bytes = sys.available_memory() as usize / 4;
        let num_frames = (target_bytes / PAGE_SIZE).max(MIN_AUTO_FRAMES);

        Self::new(store, num_frames)
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.inner.lock().free_list.len()
    }

    /// Returns the number of pages currently resident.
    pub fn page_count(&self) -> usize {
        self.inner.lock().page_table.len()
    }

    /// Returns true if the page is resident.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.inner.lock().page_table.contains_key(&page_id)
    }

    /// Returns the pin count of a resident page.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.inner.lock();
        let frame_id = inner.page_table.get(&page_id)?;
        Some(self.frames[frame_id.0 as usize].pin_count())
    }

    /// Takes a frame for a new occupant: free list first, else an LRU
    /// victim with dirty write-back. Returns None when every frame is
    /// pinned. The frame is left empty, clean, and unmapped.
    fn prepare_frame(&self, inner: &mut PoolInner) -> Result<Option<FrameId>> {
        let frame_id = match inner.free_list.pop() {
            Some(id) => id,
            None => match inner.replacer.victim() {
                Some(id) => id,
                None => return Ok(None),
            },
        };

        let frame = &self.frames[frame_id.0 as usize];

        if frame.is_dirty() {
            if let Some(old_id) = frame.page_id() {
                let data = frame.read_data();
                if let Err(e) = self.store.write_page(old_id, &data) {
                    drop(data);
                    // Put the victim back; it still holds valid data.
                    inner.replacer.unpin(frame_id);
                    return Err(e);
                }
            }
        }

        if let Some(old_id) = frame.page_id() {
            inner.page_table.remove(&old_id);
        }
        frame.reset();

        Ok(Some(frame_id))
    }

    /// Fetches a page, pinning it.
    ///
    /// If the page is resident it is pinned and returned; otherwise a frame
    /// is claimed and the page is read from the store. Returns `Ok(None)`
    /// when every frame is pinned.
    pub fn fetch(&self, page_id: PageId) -> Result<Option<PageGuard<'_>>> {
        if !page_id.is_valid() {
            return Ok(None);
        }

        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            inner.replacer.pin(frame_id);
            return Ok(Some(PageGuard::new(self, page_id, frame)));
        }

        let Some(frame_id) = self.prepare_frame(&mut inner)? else {
            return Ok(None);
        };
        let frame = &self.frames[frame_id.0 as usize];

        {
            let mut data = frame.write_data();
            if let Err(e) = self.store.read_page(page_id, &mut data) {
                drop(data);
                inner.free_list.push(frame_id);
                return Err(e);
            }
        }

        frame.set_page_id(Some(page_id));
        frame.pin();
        inner.page_table.insert(page_id, frame_id);

        Ok(Some(PageGuard::new(self, page_id, frame)))
    }

    /// Allocates a fresh page id from the store and pins a zeroed frame
    /// for it. Returns `Ok(None)` when every frame is pinned.
    pub fn new_page(&self) -> Result<Option<PageGuard<'_>>> {
        let mut inner = self.inner.lock();

        let Some(frame_id) = self.prepare_frame(&mut inner)? else {
            return Ok(None);
        };
        let frame = &self.frames[frame_id.0 as usize];

        let page_id = match self.store.allocate_page() {
            Ok(id) => id,
            Err(e) => {
                inner.free_list.push(frame_id);
                return Err(e);
            }
        };

        frame.set_page_id(Some(page_id));
        frame.pin();
        inner.page_table.insert(page_id, frame_id);

        Ok(Some(PageGuard::new(self, page_id, frame)))
    }

    /// Unpins a page, merging the dirty flag.
    ///
    /// When the pin count reaches zero the frame becomes evictable.
    /// Returns false (and logs) if the page is not resident or was not
    /// pinned.
    pub fn unpin(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut inner = self.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            warn!(%page_id, "unpin of non-resident page");
            return false;
        };
        let frame = &self.frames[frame_id.0 as usize];

        if is_dirty {
            frame.set_dirty(true);
        }

        if frame.pin_count() == 0 {
            warn!(%page_id, "unpin of page with zero pin count");
            return false;
        }

        if frame.unpin() == 0 {
            inner.replacer.unpin(frame_id);
        }
        true
    }

    /// Writes a resident page back to the store if dirty.
    ///
    /// Returns true if a write happened.
    pub fn flush(&self, page_id: PageId) -> Result<bool> {
        let inner = self.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return Ok(false);
        };
        let frame = &self.frames[frame_id.0 as usize];

        if !frame.is_dirty() {
            return Ok(false);
        }

        let data = frame.read_data();
        self.store.write_page(page_id, &data)?;
        drop(data);
        frame.set_dirty(false);
        Ok(true)
    }

    /// Writes every dirty resident page back and syncs the store.
    ///
    /// Returns the number of pages written.
    pub fn flush_all(&self) -> Result<usize> {
        let inner = self.inner.lock();

        let mut flushed = 0;
        for (&page_id, &frame_id) in &inner.page_table {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() {
                let data = frame.read_data();
                self.store.write_page(page_id, &data)?;
                drop(data);
                frame.set_dirty(false);
                flushed += 1;
            }
        }

        self.store.sync()?;
        Ok(flushed)
    }

    /// Drops a page from the pool and deallocates it in the store.
    ///
    /// Refuses (returns false) if the page is pinned. A page that is not
    /// resident is deallocated directly.
    pub fn delete(&self, page_id: PageId) -> Result<bool> {
        let mut inner = self.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            self.store.deallocate_page(page_id)?;
            return Ok(true);
        };
        let frame = &self.frames[frame_id.0 as usize];

        if frame.is_pinned() {
            return Ok(false);
        }

        inner.page_table.remove(&page_id);
        inner.replacer.pin(frame_id);
        frame.reset();
        inner.free_list.push(frame_id);

        self.store.deallocate_page(page_id)?;
        Ok(true)
    }
}

/// RAII pin on a fetched page.
///
/// Dropping the guard releases the pin, carrying the accumulated dirty
/// flag into the pool. Exactly one unpin per successful fetch, by
/// construction.
pub struct PageGuard<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    frame: &'a BufferFrame,
    dirty: Cell<bool>,
}

impl<'a> PageGuard<'a> {
    fn new(pool: &'a BufferPool, page_id: PageId, frame: &'a BufferFrame) -> Self {
        Self {
            pool,
            page_id,
            frame,
            dirty: Cell::new(false),
        }
    }

    /// Returns the pinned page's id.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Read access to the page bytes.
    pub fn data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.read_data()
    }

    /// Write access to the page bytes. Call [`mark_dirty`](Self::mark_dirty)
    /// after modifying.
    pub fn data_mut(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.write_data()
    }

    /// Records that the page was modified; consumed at release.
    pub fn mark_dirty(&self) {
        self.dirty.set(true);
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin(self.page_id, self.dirty.get());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::MemStore;

    fn create_test_pool(num_frames: usize) -> (Arc<BufferPool>, Arc<MemStore>) {
        let store = Arc::new(MemStore::new());
        let pool = Arc::new(BufferPool::new(store.clone(), num_frames));
        (pool, store)
    }

    #[test]
    fn test_pool_new() {
        let (pool, _) = create_test_pool(10);

        assert_eq!(pool.num_frames(), 10);
        assert_eq!(pool.free_count(), 10);
        assert_eq!(pool.page_count(), 0);
    }

    #[test]
    fn test_pool_new_page_ids_are_monotonic() {
        let (pool, _) = create_test_pool(10);

        let g0 = pool.new_page().unwrap().unwrap();
        let g1 = pool.new_page().unwrap().unwrap();
        assert_eq!(g0.page_id(), PageId::new(0));
        assert_eq!(g1.page_id(), PageId::new(1));
    }

    #[test]
    fn test_pool_fetch_resident() {
        let (pool, _) = create_test_pool(10);

        let page_id = {
            let guard = pool.new_page().unwrap().unwrap();
            guard.data_mut()[0] = 0xAB;
            guard.mark_dirty();
            guard.page_id()
        };

        let guard = pool.fetch(page_id).unwrap().unwrap();
        assert_eq!(guard.data()[0], 0xAB);
        assert_eq!(pool.pin_count(page_id), Some(1));
    }

    #[test]
    fn test_pool_fetch_invalid_page() {
        let (pool, _) = create_test_pool(10);
        assert!(pool.fetch(PageId::INVALID).unwrap().is_none());
    }

    #[test]
    fn test_pool_fetch_from_store() {
        let (pool, store) = create_test_pool(10);

        let mut buf = [0u8; PAGE_SIZE];
        buf[7] = 0x77;
        let page_id = store.allocate_page().unwrap();
        store.write_page(page_id, &buf).unwrap();

        let guard = pool.fetch(page_id).unwrap().unwrap();
        assert_eq!(guard.data()[7], 0x77);
    }

    #[test]
    fn test_pool_guard_unpins_on_drop() {
        let (pool, _) = create_test_pool(10);

        let page_id = {
            let guard = pool.new_page().unwrap().unwrap();
            assert_eq!(pool.pin_count(guard.page_id()), Some(1));
            guard.page_id()
        };

        assert_eq!(pool.pin_count(page_id), Some(0));
    }

    #[test]
    fn test_pool_unpin_contract_violations() {
        let (pool, _) = create_test_pool(10);

        // Not resident.
        assert!(!pool.unpin(PageId::new(99), false));

        // Already at zero pins.
        let page_id = {
            let guard = pool.new_page().unwrap().unwrap();
            guard.page_id()
        };
        assert!(!pool.unpin(page_id, false));
    }

    #[test]
    fn test_pool_dirty_merge_via_or() {
        let (pool, _) = create_test_pool(10);

        let page_id = {
            let g1 = pool.new_page().unwrap().unwrap();
            let page_id = g1.page_id();
            let g2 = pool.fetch(page_id).unwrap().unwrap();
            g2.mark_dirty();
            drop(g2); // dirty=true
            page_id
        }; // g1 drops with dirty=false, flag must survive

        assert!(pool.flush(page_id).unwrap());
    }

    #[test]
    fn test_pool_at_most_n_resident() {
        let (pool, _) = create_test_pool(3);

        for _ in 0..5 {
            let guard = pool.new_page().unwrap().unwrap();
            drop(guard);
        }
        assert!(pool.page_count() <= 3);
    }

    #[test]
    fn test_pool_all_pinned_returns_none() {
        let (pool, store) = create_test_pool(2);

        let _g0 = pool.new_page().unwrap().unwrap();
        let _g1 = pool.new_page().unwrap().unwrap();

        let extra = store.allocate_page().unwrap();
        assert!(pool.fetch(extra).unwrap().is_none());
        assert!(pool.new_page().unwrap().is_none());
    }

    #[test]
    fn test_pool_eviction_writes_back_dirty() {
        let (pool, store) = create_test_pool(1);

        let first = {
            let guard = pool.new_page().unwrap().unwrap();
            guard.data_mut()[0] = 0xEE;
            guard.mark_dirty();
            guard.page_id()
        };

        // Forces eviction of the dirty page.
        let _second = pool.new_page().unwrap().unwrap();

        assert!(!pool.contains(first));
        assert_eq!(store.page_byte(first, 0), Some(0xEE));
    }

    #[test]
    fn test_pool_lru_eviction_order() {
        let (pool, _) = create_test_pool(2);

        let p0 = pool.new_page().unwrap().unwrap().page_id();
        let p1 = pool.new_page().unwrap().unwrap().page_id();

        // Touch p0 so p1 is the least recently used.
        drop(pool.fetch(p0).unwrap().unwrap());

        let _p2 = pool.new_page().unwrap().unwrap();
        assert!(pool.contains(p0));
        assert!(!pool.contains(p1));
    }

    #[test]
    fn test_pool_flush_clears_dirty() {
        let (pool, store) = create_test_pool(10);

        let page_id = {
            let guard = pool.new_page().unwrap().unwrap();
            guard.data_mut()[3] = 0x33;
            guard.mark_dirty();
            guard.page_id()
        };

        assert!(pool.flush(page_id).unwrap());
        assert_eq!(store.page_byte(page_id, 3), Some(0x33));

        // Second flush is a no-op.
        assert!(!pool.flush(page_id).unwrap());
    }

    #[test]
    fn test_pool_flush_all() {
        let (pool, _) = create_test_pool(10);

        for _ in 0..5 {
            let guard = pool.new_page().unwrap().unwrap();
            guard.mark_dirty();
        }

        assert_eq!(pool.flush_all().unwrap(), 5);
        assert_eq!(pool.flush_all().unwrap(), 0);
    }

    #[test]
    fn test_pool_delete() {
        let (pool, _) = create_test_pool(10);

        let page_id = {
            let guard = pool.new_page().unwrap().unwrap();
            guard.page_id()
        };

        assert!(pool.delete(page_id).unwrap());
        assert!(!pool.contains(page_id));
        assert_eq!(pool.free_count(), 10);
    }

    #[test]
    fn test_pool_delete_pinned_refused() {
        let (pool, _) = create_test_pool(10);

        let guard = pool.new_page().unwrap().unwrap();
        let page_id = guard.page_id();

        assert!(!pool.delete(page_id).unwrap());
        assert!(pool.contains(page_id));
    }

    #[test]
    fn test_pool_multiple_pins_block_eviction() {
        let (pool, _) = create_test_pool(1);

        let guard1 = pool.new_page().unwrap().unwrap();
        let page_id = guard1.page_id();
        let guard2 = pool.fetch(page_id).unwrap().unwrap();
        assert_eq!(pool.pin_count(page_id), Some(2));

        drop(guard1);
        // Still pinned once; no frame available for a second page.
        assert!(pool.new_page().unwrap().is_none());

        drop(guard2);
        assert!(pool.new_page().unwrap().is_some());
    }
}
