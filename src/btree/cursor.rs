//! # B+Tree Cursor
//!
//! A positioned iterator over one tree: the current leaf page, the entry
//! index within it, and a validity flag. Cursors are plain values — they
//! carry a copy of the tree descriptor (whose root never moves) and
//! borrow the pager call-by-call, so no reference ties a cursor to the
//! tree between operations.
//!
//! ## Post-Mutation Positioning
//!
//! - `insert` leaves the cursor on the inserted entry.
//! - `delete` reports `(occurred, still_valid)`: when `still_valid` the
//!   cursor has been repositioned onto what was the successor entry;
//!   otherwise the deleted entry was the last and the caller must
//!   reposition (typically by `first`).
//!
//! Any mutation through one cursor invalidates other cursors on the same
//! tree; the single-threaded VM never interleaves them.

use eyre::{ensure, Result};

use super::node::{NodeRef, SearchResult};
use super::{BTree, CompareOp};
use crate::storage::Pager;
use crate::types::TypedValue;

#[derive(Debug, Clone)]
pub struct BtCursor {
    tree: BTree,
    leaf_page: u32,
    index: usize,
    valid: bool,
}

impl BtCursor {
    pub fn new(tree: BTree) -> BtCursor {
        BtCursor {
            tree,
            leaf_page: 0,
            index: 0,
            valid: false,
        }
    }

    pub fn tree(&self) -> &BTree {
        &self.tree
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    fn invalidate(&mut self) -> bool {
        self.valid = false;
        false
    }

    fn settle(&mut self, leaf_page: u32, index: usize) -> bool {
        self.leaf_page = leaf_page;
        self.index = index;
        self.valid = true;
        true
    }

    /// Positions on the first (ascending) entry satisfying
    /// `entry.key <op> key`, or the last such entry for `Lt`/`Le`.
    /// Returns validity. `Ne` behaves as `Ge` (first non-equal scan
    /// start is the first entry at-or-after the key).
    pub fn seek(&mut self, pager: &mut Pager, key: &[u8], op: CompareOp) -> Result<bool> {
        ensure!(
            key.len() == self.tree.layout.key_size,
            "seek key width mismatch"
        );
        let leaf = self.tree.find_leaf(pager, key)?;
        let (search, num_keys) = {
            let node = NodeRef::new(pager.page(leaf)?, self.tree.layout)?;
            (node.search(key)?, node.num_keys())
        };

        match op {
            CompareOp::Eq => match search {
                SearchResult::Found(i) => Ok(self.settle(leaf, i)),
                SearchResult::NotFound(_) => Ok(self.invalidate()),
            },
            CompareOp::Ge | CompareOp::Ne => match search {
                SearchResult::Found(i) => Ok(self.settle(leaf, i)),
                SearchResult::NotFound(i) => self.settle_forward(pager, leaf, i, num_keys),
            },
            CompareOp::Gt => match search {
                SearchResult::Found(i) => self.settle_forward(pager, leaf, i + 1, num_keys),
                SearchResult::NotFound(i) => self.settle_forward(pager, leaf, i, num_keys),
            },
            CompareOp::Le => match search {
                SearchResult::Found(i) => Ok(self.settle(leaf, i)),
                SearchResult::NotFound(i) => self.settle_backward(pager, leaf, i),
            },
            CompareOp::Lt => match search {
                SearchResult::Found(i) => self.settle_backward(pager, leaf, i),
                SearchResult::NotFound(i) => self.settle_backward(pager, leaf, i),
            },
        }
    }

    /// Settles on entry `index` of `leaf`, walking the next-links if the
    /// index is one past the end.
    fn settle_forward(
        &mut self,
        pager: &mut Pager,
        leaf: u32,
        index: usize,
        num_keys: usize,
    ) -> Result<bool> {
        if index < num_keys {
            return Ok(self.settle(leaf, index));
        }
        let next = {
            let node = NodeRef::new(pager.page(leaf)?, self.tree.layout)?;
            node.header().next_leaf
        };
        if next == 0 {
            return Ok(self.invalidate());
        }
        // non-root leaves are never empty, so the next leaf has entries
        Ok(self.settle(next, 0))
    }

    /// Settles on the entry immediately before position `index` of
    /// `leaf`, following the prev-link at the leaf boundary.
    fn settle_backward(&mut self, pager: &mut Pager, leaf: u32, index: usize) -> Result<bool> {
        if index > 0 {
            return Ok(self.settle(leaf, index - 1));
        }
        let prev = {
            let node = NodeRef::new(pager.page(leaf)?, self.tree.layout)?;
            node.header().prev_leaf
        };
        if prev == 0 {
            return Ok(self.invalidate());
        }
        let prev_num = {
            let node = NodeRef::new(pager.page(prev)?, self.tree.layout)?;
            node.num_keys()
        };
        Ok(self.settle(prev, prev_num - 1))
    }

    /// Moves to the leftmost entry. Valid iff the tree is non-empty.
    pub fn first(&mut self, pager: &mut Pager) -> Result<bool> {
        let mut page = self.tree.root_page;
        loop {
            let (is_leaf, num_keys, child) = {
                let node = NodeRef::new(pager.page(page)?, self.tree.layout)?;
                let child = if node.is_leaf() { 0 } else { node.child_at(0) };
                (node.is_leaf(), node.num_keys(), child)
            };
            if is_leaf {
                if num_keys == 0 {
                    return Ok(self.invalidate());
                }
                return Ok(self.settle(page, 0));
            }
            page = child;
        }
    }

    /// Moves to the rightmost entry. Valid iff the tree is non-empty.
    pub fn last(&mut self, pager: &mut Pager) -> Result<bool> {
        let mut page = self.tree.root_page;
        loop {
            let (is_leaf, num_keys, child) = {
                let node = NodeRef::new(pager.page(page)?, self.tree.layout)?;
                let child = if node.is_leaf() {
                    0
                } else {
                    node.child_at(node.num_keys())
                };
                (node.is_leaf(), node.num_keys(), child)
            };
            if is_leaf {
                if num_keys == 0 {
                    return Ok(self.invalidate());
                }
                return Ok(self.settle(page, num_keys - 1));
            }
            page = child;
        }
    }

    /// Advances one entry in key order; invalid past the end.
    pub fn next(&mut self, pager: &mut Pager) -> Result<bool> {
        ensure!(self.valid, "next on invalid cursor");
        let num_keys = {
            let node = NodeRef::new(pager.page(self.leaf_page)?, self.tree.layout)?;
            node.num_keys()
        };
        self.settle_forward(pager, self.leaf_page, self.index + 1, num_keys)
    }

    /// Steps one entry backward in key order; invalid past the start.
    pub fn previous(&mut self, pager: &mut Pager) -> Result<bool> {
        ensure!(self.valid, "previous on invalid cursor");
        self.settle_backward(pager, self.leaf_page, self.index)
    }

    /// The current entry's key. Defined only while valid.
    pub fn key(&self, pager: &mut Pager) -> Result<TypedValue> {
        ensure!(self.valid, "key on invalid cursor");
        let node = NodeRef::new(pager.page(self.leaf_page)?, self.tree.layout)?;
        TypedValue::from_bytes(self.tree.layout.key_type, node.key_at(self.index))
    }

    /// The current entry's record bytes. Defined only while valid.
    pub fn record(&self, pager: &mut Pager) -> Result<Vec<u8>> {
        ensure!(self.valid, "record on invalid cursor");
        let node = NodeRef::new(pager.page(self.leaf_page)?, self.tree.layout)?;
        Ok(node.record_at(self.index).to_vec())
    }

    /// Upsert; the cursor ends on the inserted (or overwritten) entry.
    pub fn insert(&mut self, pager: &mut Pager, key: &[u8], record: &[u8]) -> Result<()> {
        let (leaf, index) = self.tree.insert(pager, key, record)?;
        self.settle(leaf, index);
        Ok(())
    }

    /// Overwrites the current entry's record in place; key unchanged.
    pub fn update(&mut self, pager: &mut Pager, record: &[u8]) -> Result<()> {
        ensure!(self.valid, "update on invalid cursor");
        ensure!(
            record.len() == self.tree.layout.record_size,
            "record width mismatch"
        );
        let mut node =
            super::node::NodeMut::new(pager.page_mut(self.leaf_page)?, self.tree.layout)?;
        node.set_record(self.index, record);
        Ok(())
    }

    /// Deletes the current entry. Returns `(occurred, still_valid)`;
    /// when `still_valid` the cursor points at what was the successor.
    pub fn delete(&mut self, pager: &mut Pager) -> Result<(bool, bool)> {
        if !self.valid {
            return Ok((false, false));
        }
        let deleted_key = self.key(pager)?;
        self.tree
            .delete_entry(pager, self.leaf_page, self.index)?;

        // rebalancing may have moved the successor anywhere; re-seek it
        let still_valid = self.seek(pager, deleted_key.bytes(), CompareOp::Gt)?;
        Ok((true, still_valid))
    }
}
