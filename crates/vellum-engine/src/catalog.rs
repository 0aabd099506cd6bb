//! Catalog of collections and their indexes.
//!
//! Metadata persists on page 0 of the data file:
//!
//! ```text
//! num_collections: u32
//! per collection:
//!   name_len: u32 | name | fsm_page: i32 | first_heap_page: i32 |
//!   num_indexes: u32
//!   per index: field_len: u32 | field | btree_root_page: i32
//! ```
//!
//! The catalog must fit the page; a save that approaches the limit stops
//! writing further collections with a warning. Load rejects length fields
//! out of range and treats them as the end of usable metadata.

use bytes::BufMut;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use vellum_buffer::BufferPool;
use vellum_common::page::PageId;
use vellum_common::{Result, VellumError};
use vellum_storage::{BPlusTree, FreeSpaceMap, HeapFile, SlottedPage, Value, DEFAULT_MAX_KEYS};

/// Encoded catalog size at which a save refuses to grow further.
const CATALOG_SOFT_LIMIT: usize = 4000;

/// Longest accepted collection or field name.
const MAX_NAME_LEN: usize = 255;

/// Most collections a stored catalog may claim.
const MAX_COLLECTIONS: u32 = 1000;

/// A secondary index over one field of a collection.
pub struct IndexInfo {
    pub field: String,
    pub btree: Arc<BPlusTree>,
}

/// A named collection: its heap file, free-space map, and indexes.
pub struct CollectionInfo {
    pub name: String,
    pub fsm_page: PageId,
    pub first_heap_page: PageId,
    pub fsm: Arc<FreeSpaceMap>,
    pub heap: Arc<HeapFile>,
    pub indexes: RwLock<Vec<IndexInfo>>,
}

impl CollectionInfo {
    /// Returns the index over `field`, if one exists.
    pub fn index_for(&self, field: &str) -> Option<Arc<BPlusTree>> {
        self.indexes
            .read()
            .iter()
            .find(|idx| idx.field == field)
            .map(|idx| idx.btree.clone())
    }
}

/// Directory of collections, persisted on page 0.
pub struct Catalog {
    pool: Arc<BufferPool>,
    collections: HashMap<String, Arc<CollectionInfo>>,
}

impl Catalog {
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self {
            pool,
            collections: HashMap::new(),
        }
    }

    /// Creates a collection: one zeroed FSM page and one initial heap
    /// page, registered in the FSM. Returns false if the name is taken.
    pub fn create_collection(&mut self, name: &str) -> Result<bool> {
        if self.collections.contains_key(name) {
            warn!(name, "collection already exists");
            return Ok(false);
        }

        let fsm_page = {
            let Some(guard) = self.pool.new_page()? else {
                return Err(VellumError::BufferPoolFull);
            };
            guard.mark_dirty();
            guard.page_id()
        };
        let fsm = Arc::new(FreeSpaceMap::new(self.pool.clone(), fsm_page));

        let (first_heap_page, initial_free) = {
            let Some(guard) = self.pool.new_page()? else {
                return Err(VellumError::BufferPoolFull);
            };
            SlottedPage::init(&mut guard.data_mut()[..]);
            guard.mark_dirty();
            let free_space = SlottedPage::free_space(&guard.data()[..]);
            (guard.page_id(), free_space)
        };
        fsm.register_new_page(first_heap_page, initial_free)?;

        let heap = Arc::new(HeapFile::new(self.pool.clone(), fsm.clone(), first_heap_page));

        info!(name, %fsm_page, %first_heap_page, "created collection");
        self.collections.insert(
            name.to_string(),
            Arc::new(CollectionInfo {
                name: name.to_string(),
                fsm_page,
                first_heap_page,
                fsm,
                heap,
                indexes: RwLock::new(Vec::new()),
            }),
        );
        Ok(true)
    }

    /// Removes a collection from the catalog. Its pages stay allocated.
    pub fn drop_collection(&mut self, name: &str) -> bool {
        let dropped = self.collections.remove(name).is_some();
        if dropped {
            info!(name, "dropped collection");
        }
        dropped
    }

    pub fn get_collection(&self, name: &str) -> Option<Arc<CollectionInfo>> {
        self.collections.get(name).cloned()
    }

    pub fn list_collections(&self) -> Vec<String> {
        let mut names: Vec<_> = self.collections.keys().cloned().collect();
        names.sort();
        names
    }

    /// Creates an index on `field`, backfilling it from every existing
    /// document whose field holds a string or 32-bit int. Returns false
    /// if the collection is missing or the field is already indexed.
    pub fn create_index(&self, collection: &str, field: &str) -> Result<bool> {
        let Some(coll) = self.get_collection(collection) else {
            warn!(collection, "create_index: collection not found");
            return Ok(false);
        };
        if coll.indexes.read().iter().any(|idx| idx.field == field) {
            warn!(collection, field, "index already exists");
            return Ok(false);
        }

        let btree = Arc::new(BPlusTree::create(self.pool.clone(), DEFAULT_MAX_KEYS)?);

        for (rid, doc) in coll.heap.clone().begin() {
            if let Some(key) = doc.get(field).and_then(Value::index_key) {
                btree.insert(&key, rid)?;
            }
        }

        info!(
            collection,
            field,
            root = %btree.root_page_id(),
            "created index"
        );
        coll.indexes.write().push(IndexInfo {
            field: field.to_string(),
            btree,
        });
        Ok(true)
    }

    /// Persists the catalog to page 0 and flushes the pool.
    pub fn save(&self) -> Result<()> {
        let mut buf: Vec<u8> = Vec::with_capacity(256);
        buf.put_u32_le(self.collections.len() as u32);

        for name in self.list_collections() {
            let coll = &self.collections[&name];

            buf.put_u32_le(name.len() as u32);
            buf.put_slice(name.as_bytes());
            buf.put_i32_le(coll.fsm_page.0);
            buf.put_i32_le(coll.first_heap_page.0);

            let indexes = coll.indexes.read();
            buf.put_u32_le(indexes.len() as u32);
            for idx in indexes.iter() {
                buf.put_u32_le(idx.field.len() as u32);
                buf.put_slice(idx.field.as_bytes());
                // Root pages move on splits; persist the current one.
                buf.put_i32_le(idx.btree.root_page_id().0);
            }

            if buf.len() >= CATALOG_SOFT_LIMIT {
                warn!(
                    bytes = buf.len(),
                    "catalog metadata approaching page limit, truncating save"
                );
                break;
            }
        }

        let Some(guard) = self.pool.fetch(PageId::CATALOG)? else {
            return Err(VellumError::BufferPoolFull);
        };
        {
            let mut data = guard.data_mut();
            data.fill(0);
            data[..buf.len()].copy_from_slice(&buf);
        }
        guard.mark_dirty();
        drop(guard);

        self.pool.flush_all()?;
        Ok(())
    }

    /// Restores the catalog from page 0. A page with no plausible
    /// metadata leaves the catalog empty.
    pub fn load(&mut self) -> Result<()> {
        let Some(guard) = self.pool.fetch(PageId::CATALOG)? else {
            return Err(VellumError::BufferPoolFull);
        };
        let data = guard.data();
        let mut offset = 0usize;

        let Some(num_collections) = read_u32(&data[..], &mut offset) else {
            return Ok(());
        };
        if num_collections == 0 || num_collections > MAX_COLLECTIONS {
            return Ok(());
        }

        'collections: for _ in 0..num_collections {
            let Some(name) = read_name(&data[..], &mut offset) else {
                break;
            };
            let Some(fsm_page) = read_i32(&data[..], &mut offset) else {
                break;
            };
            let Some(first_heap_page) = read_i32(&data[..], &mut offset) else {
                break;
            };
            let fsm_page = PageId::new(fsm_page);
            let first_heap_page = PageId::new(first_heap_page);

            let fsm = Arc::new(FreeSpaceMap::new(self.pool.clone(), fsm_page));
            let heap = Arc::new(HeapFile::new(self.pool.clone(), fsm.clone(), first_heap_page));

            let Some(num_indexes) = read_u32(&data[..], &mut offset) else {
                break;
            };
            let mut indexes = Vec::new();
            for _ in 0..num_indexes {
                let Some(field) = read_name(&data[..], &mut offset) else {
                    break 'collections;
                };
                let Some(root) = read_i32(&data[..], &mut offset) else {
                    break 'collections;
                };
                indexes.push(IndexInfo {
                    field,
                    btree: Arc::new(BPlusTree::new(
                        self.pool.clone(),
                        PageId::new(root),
                        DEFAULT_MAX_KEYS,
                    )),
                });
            }

            self.collections.insert(
                name.clone(),
                Arc::new(CollectionInfo {
                    name,
                    fsm_page,
                    first_heap_page,
                    fsm,
                    heap,
                    indexes: RwLock::new(indexes),
                }),
            );
        }

        if !self.collections.is_empty() {
            info!(count = self.collections.len(), "loaded catalog");
        }
        Ok(())
    }
}

fn read_u32(data: &[u8], offset: &mut usize) -> Option<u32> {
    let bytes = data.get(*offset..*offset + 4)?;
    *offset += 4;
    Some(u32::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_i32(data: &[u8], offset: &mut usize) -> Option<i32> {
    let bytes = data.get(*offset..*offset + 4)?;
    *offset += 4;
    Some(i32::from_le_bytes(bytes.try_into().unwrap()))
}

/// Reads a length-prefixed name, rejecting implausible lengths.
fn read_name(data: &[u8], offset: &mut usize) -> Option<String> {
    let len = read_u32(data, offset)? as usize;
    if len == 0 || len > MAX_NAME_LEN || *offset + len > data.len() {
        return None;
    }
    let name = std::str::from_utf8(data.get(*offset..*offset + len)?)
        .ok()?
        .to_string();
    *offset += len;
    Some(name)
}
