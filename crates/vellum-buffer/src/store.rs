//! Backing store abstraction for the buffer pool.

use vellum_common::page::{PageId, PAGE_SIZE};
use vellum_common::Result;

/// Page-granular backing storage.
///
/// The buffer pool reads missing pages from, and writes evicted dirty
/// pages back to, an implementation of this trait. The disk manager in
/// `vellum-storage` is the production implementation.
pub trait PageStore: Send + Sync {
    /// Reads a page into `buf`. Reads past end-of-file zero-fill.
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()>;

    /// Writes a full page at its file offset.
    fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()>;

    /// Allocates the next page id.
    fn allocate_page(&self) -> Result<PageId>;

    /// Releases a page id. Currently a no-op placeholder everywhere.
    fn deallocate_page(&self, page_id: PageId) -> Result<()>;

    /// Forces written data to stable storage.
    fn sync(&self) -> Result<()>;
}
