//! On-disk B+ tree over variable-length string keys.
//!
//! One node per page. Leaves hold (key, record id) entries in ascending
//! key order and chain forward through `next_leaf`; internal nodes hold a
//! leading child pointer followed by (key, child) pairs, where `keys[i]`
//! is the smallest key reachable through `children[i + 1]`.
//!
//! Node layout:
//! ```text
//! header:   is_leaf: u8 | num_keys: u16 | next_leaf: i32
//! leaf:     [key_len: u16 | key | page_id: i32 | slot_id: u16]*
//! internal: child0: i32 | [key_len: u16 | key | child: i32]*
//! ```
//!
//! Duplicates are allowed; a new entry is placed after existing equal
//! keys, so duplicates read back in insertion order. Deletion removes the
//! first matching leaf entry only — no merging or redistribution.

use bytes::BufMut;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use vellum_buffer::BufferPool;
use vellum_common::page::{PageId, RecordId, PAGE_SIZE};
use vellum_common::{Result, VellumError};

/// Node header size: is_leaf + num_keys + next_leaf.
const NODE_HEADER_SIZE: usize = 7;

/// Default fan-out.
pub const DEFAULT_MAX_KEYS: u16 = 50;

/// Largest accepted key, sized so a node one past `MAX_KEYS_CAP` keys
/// still fits a page during splits.
pub const MAX_KEY_SIZE: usize = 64;

/// Upper bound on max_keys such that an overfull leaf fits one page.
pub const MAX_KEYS_CAP: u16 = ((PAGE_SIZE - NODE_HEADER_SIZE) / (MAX_KEY_SIZE + 8) - 1) as u16;

#[derive(Debug, Clone, Copy)]
struct NodeHeader {
    is_leaf: bool,
    num_keys: u16,
    next_leaf: PageId,
}

fn read_header(data: &[u8]) -> NodeHeader {
    NodeHeader {
        is_leaf: data[0] != 0,
        num_keys: u16::from_le_bytes([data[1], data[2]]),
        next_leaf: PageId::new(i32::from_le_bytes([data[3], data[4], data[5], data[6]])),
    }
}

fn read_key(data: &[u8], offset: &mut usize) -> Result<String> {
    let corrupt = || VellumError::BTreeCorrupted("key extends past node end".to_string());

    let len_bytes = data.get(*offset..*offset + 2).ok_or_else(corrupt)?;
    let key_len = u16::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
    *offset += 2;

    let key_bytes = data.get(*offset..*offset + key_len).ok_or_else(corrupt)?;
    let key = std::str::from_utf8(key_bytes)
        .map_err(|_| VellumError::BTreeCorrupted("key is not UTF-8".to_string()))?
        .to_string();
    *offset += key_len;
    Ok(key)
}

fn read_i32_at(data: &[u8], offset: &mut usize) -> Result<i32> {
    let bytes = data
        .get(*offset..*offset + 4)
        .ok_or_else(|| VellumError::BTreeCorrupted("truncated node".to_string()))?;
    *offset += 4;
    Ok(i32::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_u16_at(data: &[u8], offset: &mut usize) -> Result<u16> {
    let bytes = data
        .get(*offset..*offset + 2)
        .ok_or_else(|| VellumError::BTreeCorrupted("truncated node".to_string()))?;
    *offset += 2;
    Ok(u16::from_le_bytes(bytes.try_into().unwrap()))
}

/// Decoded leaf node.
struct LeafNode {
    keys: Vec<String>,
    rids: Vec<RecordId>,
    next_leaf: PageId,
}

impl LeafNode {
    fn read(data: &[u8]) -> Result<LeafNode> {
        let header = read_header(data);
        let mut offset = NODE_HEADER_SIZE;

        let mut keys = Vec::with_capacity(header.num_keys as usize);
        let mut rids = Vec::with_capacity(header.num_keys as usize);
        for _ in 0..header.num_keys {
            keys.push(read_key(data, &mut offset)?);
            let page_id = read_i32_at(data, &mut offset)?;
            let slot_id = read_u16_at(data, &mut offset)?;
            rids.push(RecordId::new(PageId::new(page_id), slot_id));
        }

        Ok(LeafNode {
            keys,
            rids,
            next_leaf: header.next_leaf,
        })
    }

    fn write(&self, data: &mut [u8]) {
        data.fill(0);
        let mut buf = &mut data[..];
        buf.put_u8(1);
        buf.put_u16_le(self.keys.len() as u16);
        buf.put_i32_le(self.next_leaf.0);

        for (key, rid) in self.keys.iter().zip(&self.rids) {
            buf.put_u16_le(key.len() as u16);
            buf.put_slice(key.as_bytes());
            buf.put_i32_le(rid.page_id.0);
            buf.put_u16_le(rid.slot_id);
        }
    }
}

/// Decoded internal node.
struct InternalNode {
    keys: Vec<String>,
    children: Vec<PageId>,
}

impl InternalNode {
    fn read(data: &[u8]) -> Result<InternalNode> {
        let header = read_header(data);
        let mut offset = NODE_HEADER_SIZE;

        let mut keys = Vec::with_capacity(header.num_keys as usize);
        let mut children = Vec::with_capacity(header.num_keys as usize + 1);
        children.push(PageId::new(read_i32_at(data, &mut offset)?));

        for _ in 0..header.num_keys {
            keys.push(read_key(data, &mut offset)?);
            children.push(PageId::new(read_i32_at(data, &mut offset)?));
        }

        Ok(InternalNode { keys, children })
    }

    fn write(&self, data: &mut [u8]) {
        data.fill(0);
        let mut buf = &mut data[..];
        buf.put_u8(0);
        buf.put_u16_le(self.keys.len() as u16);
        buf.put_i32_le(PageId::INVALID.0);

        buf.put_i32_le(self.children[0].0);
        for (key, child) in self.keys.iter().zip(&self.children[1..]) {
            buf.put_u16_le(key.len() as u16);
            buf.put_slice(key.as_bytes());
            buf.put_i32_le(child.0);
        }
    }

    /// Index of the child to descend into for `key`: past every separator
    /// less than or equal to the key.
    fn child_index(&self, key: &str) -> usize {
        let mut idx = 0;
        while idx < self.keys.len() && key >= self.keys[idx].as_str() {
            idx += 1;
        }
        idx
    }
}

/// Outcome of a recursive insert: the separator and new right sibling
/// when the node split.
type SplitResult = Option<(String, PageId)>;

/// On-disk B+ tree index.
pub struct BPlusTree {
    pool: Arc<BufferPool>,
    /// Root page; replaced when the root splits.
    root: AtomicI32,
    max_keys: u16,
}

impl BPlusTree {
    /// Opens a tree rooted at an existing page.
    ///
    /// `max_keys` is clamped to [3, `MAX_KEYS_CAP`].
    pub fn new(pool: Arc<BufferPool>, root_page_id: PageId, max_keys: u16) -> Self {
        Self {
            pool,
            root: AtomicI32::new(root_page_id.0),
            max_keys: max_keys.clamp(3, MAX_KEYS_CAP),
        }
    }

    /// Allocates a fresh empty-leaf root and returns the tree over it.
    pub fn create(pool: Arc<BufferPool>, max_keys: u16) -> Result<Self> {
        let root_page_id = {
            let Some(guard) = pool.new_page()? else {
                return Err(VellumError::BufferPoolFull);
            };
            let empty = LeafNode {
                keys: Vec::new(),
                rids: Vec::new(),
                next_leaf: PageId::INVALID,
            };
            empty.write(&mut guard.data_mut()[..]);
            guard.mark_dirty();
            guard.page_id()
        };

        Ok(Self::new(pool, root_page_id, max_keys))
    }

    /// Returns the current root page id.
    pub fn root_page_id(&self) -> PageId {
        PageId::new(self.root.load(Ordering::Acquire))
    }

    /// Returns the configured fan-out.
    pub fn max_keys(&self) -> u16 {
        self.max_keys
    }

    /// Descends to the leaf that would contain `key`.
    fn find_leaf(&self, key: &str) -> Result<PageId> {
        let mut current = self.root_page_id();

        loop {
            let Some(guard) = self.pool.fetch(current)? else {
                return Ok(PageId::INVALID);
            };
            let data = guard.data();

            if read_header(&data[..]).is_leaf {
                return Ok(current);
            }

            let node = InternalNode::read(&data[..])?;
            drop(data);
            drop(guard);
            current = node.children[node.child_index(key)];
        }
    }

    /// Point lookup. Returns the record id of the first entry with an
    /// equal key, or [`RecordId::INVALID`] on a miss.
    pub fn search(&self, key: &str) -> Result<RecordId> {
        let leaf_page = self.find_leaf(key)?;
        if !leaf_page.is_valid() {
            return Ok(RecordId::INVALID);
        }

        let Some(guard) = self.pool.fetch(leaf_page)? else {
            return Ok(RecordId::INVALID);
        };
        let node = LeafNode::read(&guard.data()[..])?;

        for (i, k) in node.keys.iter().enumerate() {
            if k == key {
                return Ok(node.rids[i]);
            }
        }
        Ok(RecordId::INVALID)
    }

    /// Inserts a key/record-id pair, splitting nodes (and growing a new
    /// root) as needed.
    pub fn insert(&self, key: &str, rid: RecordId) -> Result<()> {
        if key.len() > MAX_KEY_SIZE {
            return Err(VellumError::KeyTooLarge {
                size: key.len(),
                max: MAX_KEY_SIZE,
            });
        }

        let root = self.root_page_id();
        let Some((split_key, right_page)) = self.insert_into(root, key, rid)? else {
            return Ok(());
        };

        // Root split: a new root with one separator and two children.
        let Some(guard) = self.pool.new_page()? else {
            return Err(VellumError::BufferPoolFull);
        };
        let new_root = InternalNode {
            keys: vec![split_key],
            children: vec![root, right_page],
        };
        new_root.write(&mut guard.data_mut()[..]);
        guard.mark_dirty();

        self.root.store(guard.page_id().0, Ordering::Release);
        Ok(())
    }

    fn insert_into(&self, node_page: PageId, key: &str, rid: RecordId) -> Result<SplitResult> {
        let Some(guard) = self.pool.fetch(node_page)? else {
            return Err(VellumError::BufferPoolFull);
        };

        let is_leaf = read_header(&guard.data()[..]).is_leaf;
        if is_leaf {
            let mut node = LeafNode::read(&guard.data()[..])?;

            // First position not less than the key, then past any equal
            // entries so duplicates keep insertion order.
            let mut pos = node.keys.partition_point(|k| k.as_str() < key);
            while pos < node.keys.len() && node.keys[pos] == key {
                pos += 1;
            }
            node.keys.insert(pos, key.to_string());
            node.rids.insert(pos, rid);

            if node.keys.len() <= self.max_keys as usize {
                node.write(&mut guard.data_mut()[..]);
                guard.mark_dirty();
                return Ok(None);
            }

            // Leaf split: upper half moves to a new page threaded into
            // the chain between this leaf and its old successor.
            let mid = node.keys.len() / 2;
            let right = LeafNode {
                keys: node.keys.split_off(mid),
                rids: node.rids.split_off(mid),
                next_leaf: node.next_leaf,
            };

            let Some(right_guard) = self.pool.new_page()? else {
                return Err(VellumError::BufferPoolFull);
            };
            right.write(&mut right_guard.data_mut()[..]);
            right_guard.mark_dirty();
            let right_page = right_guard.page_id();
            drop(right_guard);

            node.next_leaf = right_page;
            node.write(&mut guard.data_mut()[..]);
            guard.mark_dirty();

            return Ok(Some((right.keys[0].clone(), right_page)));
        }

        let mut node = InternalNode::read(&guard.data()[..])?;
        drop(guard);

        let idx = node.child_index(key);
        let Some((split_key, new_child)) = self.insert_into(node.children[idx], key, rid)? else {
            return Ok(None);
        };

        node.keys.insert(idx, split_key);
        node.children.insert(idx + 1, new_child);

        if node.keys.len() <= self.max_keys as usize {
            let Some(guard) = self.pool.fetch(node_page)? else {
                return Err(VellumError::BufferPoolFull);
            };
            node.write(&mut guard.data_mut()[..]);
            guard.mark_dirty();
            return Ok(None);
        }

        // Internal split: the median key is promoted, not retained.
        let mid = node.keys.len() / 2;
        let push_up = node.keys[mid].clone();
        let right = InternalNode {
            keys: node.keys.split_off(mid + 1),
            children: node.children.split_off(mid + 1),
        };
        node.keys.truncate(mid);

        let Some(right_guard) = self.pool.new_page()? else {
            return Err(VellumError::BufferPoolFull);
        };
        right.write(&mut right_guard.data_mut()[..]);
        right_guard.mark_dirty();
        let right_page = right_guard.page_id();
        drop(right_guard);

        let Some(guard) = self.pool.fetch(node_page)? else {
            return Err(VellumError::BufferPoolFull);
        };
        node.write(&mut guard.data_mut()[..]);
        guard.mark_dirty();

        Ok(Some((push_up, right_page)))
    }

    /// Removes the first leaf entry matching `key`. No rebalancing.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let leaf_page = self.find_leaf(key)?;
        if !leaf_page.is_valid() {
            return Ok(false);
        }

        let Some(guard) = self.pool.fetch(leaf_page)? else {
            return Ok(false);
        };
        let mut node = LeafNode::read(&guard.data()[..])?;

        let Some(pos) = node.keys.iter().position(|k| k == key) else {
            return Ok(false);
        };
        node.keys.remove(pos);
        node.rids.remove(pos);

        node.write(&mut guard.data_mut()[..]);
        guard.mark_dirty();
        Ok(true)
    }

    /// Returns every entry with `lo <= key <= hi`, in ascending key
    /// order, walking the leaf chain from the leaf containing `lo`.
    pub fn range_scan(&self, lo: &str, hi: &str) -> Result<Vec<(String, RecordId)>> {
        let mut results = Vec::new();

        let mut leaf_page = self.find_leaf(lo)?;
        while leaf_page.is_valid() {
            let Some(guard) = self.pool.fetch(leaf_page)? else {
                break;
            };
            let node = LeafNode::read(&guard.data()[..])?;
            drop(guard);

            for (key, rid) in node.keys.iter().zip(&node.rids) {
                if key.as_str() > hi {
                    return Ok(results);
                }
                if key.as_str() >= lo {
                    results.push((key.clone(), *rid));
                }
            }

            leaf_page = node.next_leaf;
        }

        Ok(results)
    }
}
