//! # Node Access
//!
//! Accessor types over a node's page bytes. A node is never materialized
//! as per-entry objects: [`NodeRef`]/[`NodeMut`] compute key, record and
//! child offsets from a [`NodeLayout`] and hand out bounds-checked
//! slices of the page buffer.
//!
//! The 24-byte header is a `zerocopy` struct transmuted in place, in the
//! same style as the storage layer's file header.

use eyre::{ensure, Result};
use std::cmp::Ordering;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::NODE_HEADER_SIZE;
use crate::error::EngineError;
use crate::types::{DataType, TypedValue};

/// Per-tree layout parameters every node accessor needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLayout {
    pub key_type: DataType,
    pub key_size: usize,
    pub record_size: usize,
    pub leaf_max_keys: usize,
    pub internal_max_keys: usize,
}

impl NodeLayout {
    fn keys_offset(&self) -> usize {
        NODE_HEADER_SIZE
    }

    fn records_offset(&self) -> usize {
        NODE_HEADER_SIZE + self.leaf_max_keys * self.key_size
    }

    fn children_offset(&self) -> usize {
        NODE_HEADER_SIZE + self.internal_max_keys * self.key_size
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NodeHeader {
    pub page_no: u32,
    pub parent: u32,
    pub next_leaf: u32,
    pub prev_leaf: u32,
    pub num_keys: u32,
    pub is_leaf: u32,
}

impl NodeHeader {
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        ensure!(
            data.len() >= size_of::<Self>(),
            "buffer too small for NodeHeader: {} < {}",
            data.len(),
            size_of::<Self>()
        );
        Self::ref_from_bytes(&data[..size_of::<Self>()])
            .map_err(|e| eyre::eyre!("failed to read NodeHeader: {:?}", e))
    }

    pub fn from_bytes_mut(data: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            data.len() >= size_of::<Self>(),
            "buffer too small for NodeHeader: {} < {}",
            data.len(),
            size_of::<Self>()
        );
        Self::mut_from_bytes(&mut data[..size_of::<Self>()])
            .map_err(|e| eyre::eyre!("failed to read NodeHeader: {:?}", e))
    }
}

/// Outcome of a key search within one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    /// Exact match at this entry index.
    Found(usize),
    /// No match; this is the insertion point.
    NotFound(usize),
}

/// Compares two stored keys under the tree's key type.
pub fn compare_keys(ty: DataType, a: &[u8], b: &[u8]) -> Result<Ordering> {
    let va = TypedValue::from_bytes(ty, a)?;
    let vb = TypedValue::from_bytes(ty, b)?;
    va.compare(&vb)
}

pub struct NodeRef<'a> {
    data: &'a [u8],
    layout: NodeLayout,
}

impl<'a> NodeRef<'a> {
    pub fn new(data: &'a [u8], layout: NodeLayout) -> Result<NodeRef<'a>> {
        NodeHeader::from_bytes(data)?;
        Ok(NodeRef { data, layout })
    }

    pub fn header(&self) -> &NodeHeader {
        NodeHeader::from_bytes(self.data).expect("validated in new")
    }

    pub fn is_leaf(&self) -> bool {
        self.header().is_leaf != 0
    }

    pub fn num_keys(&self) -> usize {
        self.header().num_keys as usize
    }

    pub fn max_keys(&self) -> usize {
        if self.is_leaf() {
            self.layout.leaf_max_keys
        } else {
            self.layout.internal_max_keys
        }
    }

    pub fn key_at(&self, i: usize) -> &'a [u8] {
        debug_assert!(i < self.num_keys());
        let off = self.layout.keys_offset() + i * self.layout.key_size;
        &self.data[off..off + self.layout.key_size]
    }

    pub fn record_at(&self, i: usize) -> &'a [u8] {
        debug_assert!(self.is_leaf());
        debug_assert!(i < self.num_keys());
        let off = self.layout.records_offset() + i * self.layout.record_size;
        &self.data[off..off + self.layout.record_size]
    }

    pub fn child_at(&self, i: usize) -> u32 {
        debug_assert!(!self.is_leaf());
        debug_assert!(i <= self.num_keys());
        let off = self.layout.children_offset() + i * 4;
        u32::from_le_bytes(self.data[off..off + 4].try_into().unwrap())
    }

    /// Binary search among this node's keys.
    pub fn search(&self, key: &[u8]) -> Result<SearchResult> {
        let mut lo = 0usize;
        let mut hi = self.num_keys();
        while lo < hi {
            let mid = (lo + hi) / 2;
            match compare_keys(self.layout.key_type, self.key_at(mid), key)? {
                Ordering::Less => lo = mid + 1,
                Ordering::Equal => return Ok(SearchResult::Found(mid)),
                Ordering::Greater => hi = mid,
            }
        }
        Ok(SearchResult::NotFound(lo))
    }

    /// Child subscript to descend for `key`: the subtree whose range
    /// `[key[i-1], key[i])` contains it (lower bound inclusive).
    pub fn descend_index(&self, key: &[u8]) -> Result<usize> {
        let mut lo = 0usize;
        let mut hi = self.num_keys();
        while lo < hi {
            let mid = (lo + hi) / 2;
            match compare_keys(self.layout.key_type, self.key_at(mid), key)? {
                Ordering::Greater => hi = mid,
                _ => lo = mid + 1,
            }
        }
        Ok(lo)
    }

    /// Index of `child` among this node's child pointers.
    pub fn child_position(&self, child: u32) -> Result<usize> {
        for i in 0..=self.num_keys() {
            if self.child_at(i) == child {
                return Ok(i);
            }
        }
        Err(EngineError::corruption(format!(
            "page {} is not a child of page {}",
            child,
            self.header().page_no
        ))
        .into())
    }
}

pub struct NodeMut<'a> {
    data: &'a mut [u8],
    layout: NodeLayout,
}

impl<'a> NodeMut<'a> {
    pub fn new(data: &'a mut [u8], layout: NodeLayout) -> Result<NodeMut<'a>> {
        NodeHeader::from_bytes(&*data)?;
        Ok(NodeMut { data, layout })
    }

    /// Initializes `data` as an empty node.
    pub fn init(
        data: &'a mut [u8],
        layout: NodeLayout,
        page_no: u32,
        is_leaf: bool,
    ) -> Result<NodeMut<'a>> {
        data.fill(0);
        {
            let header = NodeHeader::from_bytes_mut(data)?;
            header.page_no = page_no;
            header.is_leaf = is_leaf as u32;
        }
        Ok(NodeMut { data, layout })
    }

    pub fn as_ref(&self) -> NodeRef<'_> {
        NodeRef {
            data: self.data,
            layout: self.layout,
        }
    }

    pub fn header_mut(&mut self) -> &mut NodeHeader {
        NodeHeader::from_bytes_mut(self.data).expect("validated in new")
    }

    pub fn num_keys(&self) -> usize {
        self.as_ref().num_keys()
    }

    pub fn is_leaf(&self) -> bool {
        self.as_ref().is_leaf()
    }

    pub fn set_key(&mut self, i: usize, key: &[u8]) {
        debug_assert_eq!(key.len(), self.layout.key_size);
        let off = self.layout.keys_offset() + i * self.layout.key_size;
        self.data[off..off + key.len()].copy_from_slice(key);
    }

    pub fn set_record(&mut self, i: usize, record: &[u8]) {
        debug_assert!(self.is_leaf());
        debug_assert_eq!(record.len(), self.layout.record_size);
        let off = self.layout.records_offset() + i * self.layout.record_size;
        self.data[off..off + record.len()].copy_from_slice(record);
    }

    pub fn set_child(&mut self, i: usize, page_no: u32) {
        debug_assert!(!self.is_leaf());
        let off = self.layout.children_offset() + i * 4;
        self.data[off..off + 4].copy_from_slice(&page_no.to_le_bytes());
    }

    fn shift_keys_right(&mut self, from: usize, count: usize) {
        let ks = self.layout.key_size;
        let base = self.layout.keys_offset();
        self.data.copy_within(
            base + from * ks..base + (from + count) * ks,
            base + (from + 1) * ks,
        );
    }

    fn shift_keys_left(&mut self, from: usize, count: usize) {
        let ks = self.layout.key_size;
        let base = self.layout.keys_offset();
        self.data.copy_within(
            base + from * ks..base + (from + count) * ks,
            base + (from - 1) * ks,
        );
    }

    fn shift_records_right(&mut self, from: usize, count: usize) {
        let rs = self.layout.record_size;
        if rs == 0 {
            return;
        }
        let base = self.layout.records_offset();
        self.data.copy_within(
            base + from * rs..base + (from + count) * rs,
            base + (from + 1) * rs,
        );
    }

    fn shift_records_left(&mut self, from: usize, count: usize) {
        let rs = self.layout.record_size;
        if rs == 0 {
            return;
        }
        let base = self.layout.records_offset();
        self.data.copy_within(
            base + from * rs..base + (from + count) * rs,
            base + (from - 1) * rs,
        );
    }

    fn shift_children_right(&mut self, from: usize, count: usize) {
        let base = self.layout.children_offset();
        self.data.copy_within(
            base + from * 4..base + (from + count) * 4,
            base + (from + 1) * 4,
        );
    }

    fn shift_children_left(&mut self, from: usize, count: usize) {
        let base = self.layout.children_offset();
        self.data.copy_within(
            base + from * 4..base + (from + count) * 4,
            base + (from - 1) * 4,
        );
    }

    /// Inserts a key/record pair at entry index `i` of a leaf.
    pub fn insert_leaf_entry(&mut self, i: usize, key: &[u8], record: &[u8]) {
        let n = self.num_keys();
        debug_assert!(self.is_leaf());
        debug_assert!(i <= n && n < self.layout.leaf_max_keys);
        if i < n {
            self.shift_keys_right(i, n - i);
            self.shift_records_right(i, n - i);
        }
        self.set_key(i, key);
        self.set_record(i, record);
        self.header_mut().num_keys = (n + 1) as u32;
    }

    /// Removes the entry at index `i` of a leaf.
    pub fn remove_leaf_entry(&mut self, i: usize) {
        let n = self.num_keys();
        debug_assert!(self.is_leaf() && i < n);
        if i + 1 < n {
            self.shift_keys_left(i + 1, n - i - 1);
            self.shift_records_left(i + 1, n - i - 1);
        }
        self.header_mut().num_keys = (n - 1) as u32;
    }

    /// Inserts separator `key` at key index `i` with `right_child` as the
    /// subtree to its right.
    pub fn insert_interior_entry(&mut self, i: usize, key: &[u8], right_child: u32) {
        let n = self.num_keys();
        debug_assert!(!self.is_leaf());
        debug_assert!(i <= n && n < self.layout.internal_max_keys);
        if i < n {
            self.shift_keys_right(i, n - i);
            self.shift_children_right(i + 1, n - i);
        }
        self.set_key(i, key);
        self.set_child(i + 1, right_child);
        self.header_mut().num_keys = (n + 1) as u32;
    }

    /// Prepends a separator with its *left* child, used when rotating an
    /// entry in from the left sibling.
    pub fn push_front_interior(&mut self, key: &[u8], left_child: u32) {
        let n = self.num_keys();
        debug_assert!(!self.is_leaf() && n < self.layout.internal_max_keys);
        if n > 0 {
            self.shift_keys_right(0, n);
        }
        self.shift_children_right(0, n + 1);
        self.set_key(0, key);
        self.set_child(0, left_child);
        self.header_mut().num_keys = (n + 1) as u32;
    }

    /// Drops the last separator and the last child.
    pub fn pop_back_interior(&mut self) {
        let n = self.num_keys();
        debug_assert!(!self.is_leaf() && n > 0);
        self.header_mut().num_keys = (n - 1) as u32;
    }

    /// Drops the first separator and the first child.
    pub fn pop_front_interior(&mut self) {
        let n = self.num_keys();
        debug_assert!(!self.is_leaf() && n > 0);
        if n > 1 {
            self.shift_keys_left(1, n - 1);
        }
        self.shift_children_left(1, n);
        self.header_mut().num_keys = (n - 1) as u32;
    }

    /// Removes separator key `i` together with child `i + 1`.
    pub fn remove_interior_entry(&mut self, i: usize) {
        let n = self.num_keys();
        debug_assert!(!self.is_leaf() && i < n);
        if i + 1 < n {
            self.shift_keys_left(i + 1, n - i - 1);
        }
        if i + 2 <= n {
            self.shift_children_left(i + 2, n - i - 1);
        }
        self.header_mut().num_keys = (n - 1) as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PAGE_SIZE;

    fn layout() -> NodeLayout {
        NodeLayout {
            key_type: DataType::U32,
            key_size: 4,
            record_size: 8,
            leaf_max_keys: 16,
            internal_max_keys: 16,
        }
    }

    fn key(v: u32) -> [u8; 4] {
        v.to_le_bytes()
    }

    #[test]
    fn node_header_is_24_bytes() {
        assert_eq!(size_of::<NodeHeader>(), crate::config::NODE_HEADER_SIZE);
    }

    #[test]
    fn init_produces_empty_node() {
        let mut page = [0u8; PAGE_SIZE];
        let node = NodeMut::init(&mut page, layout(), 5, true).unwrap();
        let r = node.as_ref();
        assert!(r.is_leaf());
        assert_eq!(r.num_keys(), 0);
        assert_eq!(r.header().page_no, 5);
        assert_eq!(r.header().parent, 0);
    }

    #[test]
    fn leaf_insert_keeps_entries_aligned() {
        let mut page = [0u8; PAGE_SIZE];
        let mut node = NodeMut::init(&mut page, layout(), 1, true).unwrap();
        node.insert_leaf_entry(0, &key(20), b"rec-20..");
        node.insert_leaf_entry(0, &key(10), b"rec-10..");
        node.insert_leaf_entry(2, &key(30), b"rec-30..");
        node.insert_leaf_entry(1, &key(15), b"rec-15..");

        let r = node.as_ref();
        assert_eq!(r.num_keys(), 4);
        for (i, expect) in [(0, 10u32), (1, 15), (2, 20), (3, 30)] {
            assert_eq!(r.key_at(i), key(expect));
            assert_eq!(r.record_at(i), format!("rec-{expect}..").as_bytes());
        }
    }

    #[test]
    fn leaf_remove_shifts_down() {
        let mut page = [0u8; PAGE_SIZE];
        let mut node = NodeMut::init(&mut page, layout(), 1, true).unwrap();
        for (i, v) in [10u32, 15, 20, 30].iter().enumerate() {
            node.insert_leaf_entry(i, &key(*v), format!("rec-{v}..").as_bytes());
        }
        node.remove_leaf_entry(1);

        let r = node.as_ref();
        assert_eq!(r.num_keys(), 3);
        assert_eq!(r.key_at(0), key(10));
        assert_eq!(r.key_at(1), key(20));
        assert_eq!(r.key_at(2), key(30));
        assert_eq!(r.record_at(1), b"rec-20..");
    }

    #[test]
    fn search_finds_exact_and_insertion_point() {
        let mut page = [0u8; PAGE_SIZE];
        let mut node = NodeMut::init(&mut page, layout(), 1, true).unwrap();
        for (i, v) in [10u32, 20, 30].iter().enumerate() {
            node.insert_leaf_entry(i, &key(*v), b"record..");
        }
        let r = NodeRef::new(&page, layout()).unwrap();
        assert_eq!(r.search(&key(20)).unwrap(), SearchResult::Found(1));
        assert_eq!(r.search(&key(5)).unwrap(), SearchResult::NotFound(0));
        assert_eq!(r.search(&key(25)).unwrap(), SearchResult::NotFound(2));
        assert_eq!(r.search(&key(40)).unwrap(), SearchResult::NotFound(3));
    }

    #[test]
    fn interior_insert_and_descend() {
        let mut page = [0u8; PAGE_SIZE];
        let mut node = NodeMut::init(&mut page, layout(), 1, false).unwrap();
        node.set_child(0, 100);
        node.insert_interior_entry(0, &key(10), 200);
        node.insert_interior_entry(1, &key(20), 300);

        let r = node.as_ref();
        assert_eq!(r.num_keys(), 2);
        assert_eq!(r.child_at(0), 100);
        assert_eq!(r.child_at(1), 200);
        assert_eq!(r.child_at(2), 300);

        // keys below 10 go left, [10, 20) middle, >= 20 right
        assert_eq!(r.descend_index(&key(5)).unwrap(), 0);
        assert_eq!(r.descend_index(&key(10)).unwrap(), 1);
        assert_eq!(r.descend_index(&key(15)).unwrap(), 1);
        assert_eq!(r.descend_index(&key(20)).unwrap(), 2);
        assert_eq!(r.descend_index(&key(99)).unwrap(), 2);
    }

    #[test]
    fn interior_remove_drops_key_and_right_child() {
        let mut page = [0u8; PAGE_SIZE];
        let mut node = NodeMut::init(&mut page, layout(), 1, false).unwrap();
        node.set_child(0, 100);
        node.insert_interior_entry(0, &key(10), 200);
        node.insert_interior_entry(1, &key(20), 300);
        node.remove_interior_entry(0);

        let r = node.as_ref();
        assert_eq!(r.num_keys(), 1);
        assert_eq!(r.key_at(0), key(20));
        assert_eq!(r.child_at(0), 100);
        assert_eq!(r.child_at(1), 300);
    }

    #[test]
    fn child_position_locates_children() {
        let mut page = [0u8; PAGE_SIZE];
        let mut node = NodeMut::init(&mut page, layout(), 1, false).unwrap();
        node.set_child(0, 100);
        node.insert_interior_entry(0, &key(10), 200);

        let r = node.as_ref();
        assert_eq!(r.child_position(100).unwrap(), 0);
        assert_eq!(r.child_position(200).unwrap(), 1);
        assert!(r.child_position(999).is_err());
    }

    #[test]
    fn zero_record_size_is_supported() {
        let mut lay = layout();
        lay.record_size = 0;
        let mut page = [0u8; PAGE_SIZE];
        let mut node = NodeMut::init(&mut page, lay, 1, true).unwrap();
        node.insert_leaf_entry(0, &key(1), &[]);
        node.insert_leaf_entry(1, &key(2), &[]);
        node.remove_leaf_entry(0);
        let r = node.as_ref();
        assert_eq!(r.num_keys(), 1);
        assert_eq!(r.key_at(0), key(2));
        assert_eq!(r.record_at(0), &[] as &[u8]);
    }
}
