//! Free space map for heap page allocation.
//!
//! One byte per heap page on a dedicated FSM page, quantized to
//! [`GRANULARITY`]-byte categories (saturating at 255). A heap page's
//! entry lives at offset `heap_page_id % PAGE_SIZE` on the FSM page, so
//! one FSM page tracks up to `PAGE_SIZE` heap pages.
//!
//! Categories are estimates: a returned candidate page may no longer fit
//! the record by the time the caller inserts, and callers must tolerate
//! the failed insert (the heap file retries on a fresh page).

use std::sync::Arc;
use vellum_buffer::BufferPool;
use vellum_common::page::{PageId, PAGE_SIZE};
use vellum_common::{Result, VellumError};

/// Bytes per free-space category.
pub const GRANULARITY: usize = 16;

/// Converts free bytes to a saturating category.
pub fn bytes_to_category(free_bytes: usize) -> u8 {
    (free_bytes / GRANULARITY).min(255) as u8
}

/// Minimum free bytes a category promises.
pub fn category_to_bytes(category: u8) -> usize {
    category as usize * GRANULARITY
}

/// Free-space map over one FSM page.
///
/// The map holds no state of its own; every read and write goes through
/// the buffer pool against the FSM page.
pub struct FreeSpaceMap {
    pool: Arc<BufferPool>,
    start_page: PageId,
}

impl FreeSpaceMap {
    /// Creates a map rooted at `start_page` (an already-allocated, zeroed
    /// page).
    pub fn new(pool: Arc<BufferPool>, start_page: PageId) -> Self {
        Self { pool, start_page }
    }

    /// Returns the first FSM page id.
    pub fn start_page(&self) -> PageId {
        self.start_page
    }

    /// Locates the FSM page and byte offset tracking `heap_page_id`.
    fn location(&self, heap_page_id: PageId) -> (PageId, usize) {
        let fsm_page = PageId::new(self.start_page.0 + heap_page_id.0 / PAGE_SIZE as i32);
        let offset = heap_page_id.0 as usize % PAGE_SIZE;
        (fsm_page, offset)
    }

    /// Finds a page with at least `needed_bytes` free.
    ///
    /// Scans the first FSM page in ascending heap-page order and returns
    /// the first entry whose category covers the request, or
    /// [`PageId::INVALID`] if none does.
    pub fn find_page_with_space(&self, needed_bytes: usize) -> Result<PageId> {
        let needed_cat = needed_bytes.div_ceil(GRANULARITY);
        if needed_cat > 255 {
            return Ok(PageId::INVALID);
        }
        let needed_cat = needed_cat as u8;

        let Some(guard) = self.pool.fetch(self.start_page)? else {
            return Err(VellumError::BufferPoolFull);
        };
        let data = guard.data();

        for (i, &category) in data.iter().enumerate() {
            if category >= needed_cat && category > 0 {
                return Ok(PageId::new(i as i32));
            }
        }

        Ok(PageId::INVALID)
    }

    /// Records the free-space estimate for a heap page.
    pub fn update_free_space(&self, heap_page_id: PageId, free_bytes: usize) -> Result<()> {
        let (fsm_page, offset) = self.location(heap_page_id);

        let Some(guard) = self.pool.fetch(fsm_page)? else {
            return Err(VellumError::BufferPoolFull);
        };
        guard.data_mut()[offset] = bytes_to_category(free_bytes);
        guard.mark_dirty();
        Ok(())
    }

    /// Registers a newly allocated heap page with its initial free space.
    pub fn register_new_page(&self, heap_page_id: PageId, free_bytes: usize) -> Result<()> {
        self.update_free_space(heap_page_id, free_bytes)
    }
}
