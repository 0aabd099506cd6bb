//! Heap file: an unordered collection of documents over slotted pages.
//!
//! Coordinates the free-space map (candidate pages), the buffer pool
//! (frame access), the slotted page layout (record placement), and the
//! document codec. Record ids are stable; an update that no longer fits
//! in place relocates the record and returns its new id.

use crate::document::Document;
use crate::freespace::FreeSpaceMap;
use crate::slotted::{SlotEntry, SlottedPage};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::warn;
use vellum_buffer::BufferPool;
use vellum_common::page::{PageId, RecordId};
use vellum_common::{Result, VellumError};

/// Document record store over one or more slotted pages.
pub struct HeapFile {
    pool: Arc<BufferPool>,
    fsm: Arc<FreeSpaceMap>,
    first_page: PageId,
    /// Highest page id this heap has ever used; bounds sequential scans.
    max_page: AtomicI32,
}

impl HeapFile {
    /// Creates a heap file rooted at `first_page` (an already-initialized
    /// slotted page registered with `fsm`).
    pub fn new(pool: Arc<BufferPool>, fsm: Arc<FreeSpaceMap>, first_page: PageId) -> Self {
        Self {
            pool,
            fsm,
            first_page,
            max_page: AtomicI32::new(first_page.0),
        }
    }

    /// Returns the first data page id.
    pub fn first_page(&self) -> PageId {
        self.first_page
    }

    /// Returns the highest page id this heap has used.
    pub fn max_page_id(&self) -> PageId {
        PageId::new(self.max_page.load(Ordering::Acquire))
    }

    /// Raises the scan bound. Callers reconstructing a heap file from
    /// catalog metadata must re-derive this from the data file size.
    pub fn set_max_page_id(&self, page_id: PageId) {
        self.max_page.fetch_max(page_id.0, Ordering::AcqRel);
    }

    /// Allocates and initializes a fresh data page, registering it with
    /// the free-space map at full capacity.
    fn allocate_new_page(&self) -> Result<PageId> {
        let Some(guard) = self.pool.new_page()? else {
            return Err(VellumError::BufferPoolFull);
        };
        let page_id = guard.page_id();

        SlottedPage::init(&mut guard.data_mut()[..]);
        let free_space = SlottedPage::free_space(&guard.data()[..]);
        guard.mark_dirty();
        drop(guard);

        self.fsm.register_new_page(page_id, free_space)?;
        self.max_page.fetch_max(page_id.0, Ordering::AcqRel);
        Ok(page_id)
    }

    /// Inserts a document, returning its record id.
    ///
    /// Asks the free-space map for a candidate page; a stale answer (the
    /// insert fails on the candidate) is retried once on a freshly
    /// allocated page before giving up with `RecordTooLarge`.
    pub fn insert(&self, doc: &Document) -> Result<RecordId> {
        let record = doc.to_bytes();
        let total_needed = record.len() + SlotEntry::SIZE;

        let mut target = self.fsm.find_page_with_space(total_needed)?;
        if !target.is_valid() {
            target = self.allocate_new_page()?;
        }

        let slot_id = match self.insert_into_page(target, &record)? {
            Some(slot_id) => slot_id,
            None => {
                // FSM estimate was stale; retry once on a fresh page.
                target = self.allocate_new_page()?;
                match self.insert_into_page(target, &record)? {
                    Some(slot_id) => slot_id,
                    None => {
                        return Err(VellumError::RecordTooLarge {
                            size: record.len(),
                        })
                    }
                }
            }
        };

        Ok(RecordId::new(target, slot_id))
    }

    /// Places a record on one page, refreshing the page's FSM entry on
    /// success.
    fn insert_into_page(&self, page_id: PageId, record: &[u8]) -> Result<Option<u16>> {
        let Some(guard) = self.pool.fetch(page_id)? else {
            return Err(VellumError::BufferPoolFull);
        };

        let slot_id = SlottedPage::insert(&mut guard.data_mut()[..], record);
        let Some(slot_id) = slot_id else {
            return Ok(None);
        };

        let remaining = SlottedPage::free_space(&guard.data()[..]);
        guard.mark_dirty();
        drop(guard);

        self.fsm.update_free_space(page_id, remaining)?;
        Ok(Some(slot_id))
    }

    /// Returns the document at `rid`, or None if missing or deleted.
    pub fn get(&self, rid: RecordId) -> Result<Option<Document>> {
        let Some(guard) = self.pool.fetch(rid.page_id)? else {
            return Ok(None);
        };
        let data = guard.data();

        match SlottedPage::get(&data[..], rid.slot_id) {
            Some(bytes) => Ok(Some(Document::from_bytes(bytes)?)),
            None => Ok(None),
        }
    }

    /// Returns the raw encoded record at `rid`. Used for WAL images.
    pub fn get_raw(&self, rid: RecordId) -> Result<Option<Vec<u8>>> {
        let Some(guard) = self.pool.fetch(rid.page_id)? else {
            return Ok(None);
        };
        let data = guard.data();
        Ok(SlottedPage::get(&data[..], rid.slot_id).map(|b| b.to_vec()))
    }

    /// Deletes the record at `rid`. Returns false if it does not exist.
    pub fn delete(&self, rid: RecordId) -> Result<bool> {
        let Some(guard) = self.pool.fetch(rid.page_id)? else {
            return Ok(false);
        };

        let deleted = SlottedPage::delete(&mut guard.data_mut()[..], rid.slot_id);
        if !deleted {
            return Ok(false);
        }

        let remaining = SlottedPage::free_space(&guard.data()[..]);
        guard.mark_dirty();
        drop(guard);

        self.fsm.update_free_space(rid.page_id, remaining)?;
        Ok(true)
    }

    /// Rewrites the record at `rid`. Stays in place when the new encoding
    /// fits the old slot; otherwise deletes and re-inserts, returning the
    /// record's new id.
    pub fn update(&self, rid: RecordId, doc: &Document) -> Result<RecordId> {
        let record = doc.to_bytes();

        let Some(guard) = self.pool.fetch(rid.page_id)? else {
            return Err(VellumError::BufferPoolFull);
        };

        if SlottedPage::update(&mut guard.data_mut()[..], rid.slot_id, &record) {
            guard.mark_dirty();
            return Ok(rid);
        }
        drop(guard);

        self.delete(rid)?;
        self.insert(doc)
    }

    /// Sequential iterator over every live record, in page/slot order.
    pub fn begin(self: Arc<Self>) -> HeapIterator {
        let max_page = self.max_page_id();
        HeapIterator {
            heap: self,
            current_page: 0,
            current_slot: 0,
            max_page,
        }
    }
}

/// Iterator over all live records of a heap file.
///
/// Walks page ids from the heap's first page to its highest page.
/// Unfetchable pages and pages that are not slotted pages (foreign pages
/// inside the id range) are skipped, as are records that fail to decode.
pub struct HeapIterator {
    heap: Arc<HeapFile>,
    current_page: i32,
    current_slot: u16,
    max_page: PageId,
}

impl HeapIterator {
    /// Rewinds to the first page.
    pub fn reset(&mut self) {
        self.current_page = 0;
        self.current_slot = 0;
    }
}

impl Iterator for HeapIterator {
    type Item = (RecordId, Document);

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_page < self.heap.first_page.0 {
            self.current_page = self.heap.first_page.0;
        }

        while self.current_page <= self.max_page.0 {
            let page_id = PageId::new(self.current_page);

            let guard = match self.heap.pool.fetch(page_id) {
                Ok(Some(guard)) => guard,
                Ok(None) | Err(_) => {
                    self.current_page += 1;
                    self.current_slot = 0;
                    continue;
                }
            };
            let data = guard.data();

            if SlottedPage::is_well_formed(&data[..]) {
                let num_slots = SlottedPage::num_slots(&data[..]);
                while self.current_slot < num_slots {
                    let slot_id = self.current_slot;
                    self.current_slot += 1;

                    if let Some(bytes) = SlottedPage::get(&data[..], slot_id) {
                        match Document::from_bytes(bytes) {
                            Ok(doc) => return Some((RecordId::new(page_id, slot_id), doc)),
                            Err(e) => {
                                warn!(%page_id, slot_id, error = %e, "skipping undecodable record")
                            }
                        }
                    }
                }
            }

            self.current_page += 1;
            self.current_slot = 0;
        }

        None
    }
}
