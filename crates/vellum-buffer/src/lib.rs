//! Buffer pool management for VellumDB.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with a single pool-wide mutex
//! - LRU eviction policy over unpinned frames
//! - Pin counting via RAII guards
//! - Dirty page tracking with write-back on eviction

mod frame;
mod pool;
mod replacer;
mod store;

pub use frame::{BufferFrame, FrameId};
pub use pool::{BufferPool, PageGuard};
pub use replacer::{LruReplacer, Replacer};
pub use store::PageStore;
