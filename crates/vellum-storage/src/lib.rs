//! Storage engine for VellumDB.
//!
//! This crate provides:
//! - Disk manager for page-level I/O on the single data file
//! - Document model and its self-describing byte codec
//! - Slotted page layout for variable-length records
//! - Free space map for page allocation
//! - Heap file manager for document record storage
//! - B+ tree index over variable-length string keys

mod btree;
mod disk;
mod document;
mod freespace;
mod heap;
mod slotted;

pub use btree::{BPlusTree, DEFAULT_MAX_KEYS, MAX_KEYS_CAP, MAX_KEY_SIZE};
pub use disk::DiskManager;
pub use document::{
    Document, Value, TAG_BOOLEAN, TAG_DOCUMENT, TAG_DOUBLE, TAG_INT32, TAG_INT64, TAG_NULL,
    TAG_STRING,
};
pub use freespace::{bytes_to_category, category_to_bytes, FreeSpaceMap, GRANULARITY};
pub use heap::{HeapFile, HeapIterator};
pub use slotted::{SlotEntry, SlottedHeader, SlottedPage};
