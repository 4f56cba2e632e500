//! # Tree Operations
//!
//! The [`BTree`] descriptor plus insert/delete/clear and the structural
//! maintenance they entail.
//!
//! ## Insert Algorithm
//!
//! ```text
//! 1. Descend from the root by separator comparison to the target leaf
//! 2. Exact key match: overwrite the record (upsert)
//! 3. Room in the leaf: shift and insert in place
//! 4. Leaf full: gather entries + the new one, split at the precomputed
//!    split index, promote a copy of the right half's first key
//! 5. Parent full: split the interior node, promote its middle key
//!    (stored in neither half), repeat upward
//! 6. Root overflow: the root's entries move into two new children and
//!    the root page becomes the interior parent in place
//! ```
//!
//! ## Delete Algorithm
//!
//! ```text
//! 1. Remove the entry from its leaf
//! 2. Node below minimum occupancy: borrow from the left sibling, else
//!    from the right (interior borrows rotate through the parent
//!    separator), else merge with a sibling and drop the separator —
//!    which may cascade the underflow upward
//! 3. Interior root left with a single child: copy that child into the
//!    root page and free it
//! ```
//!
//! Parent pointers are maintained eagerly on every move, so underflow
//! handling never needs a descent stack.

use eyre::{bail, ensure, Result};

use super::node::{compare_keys, NodeHeader, NodeLayout, NodeMut, NodeRef, SearchResult};
use crate::config::{NODE_USABLE_SIZE, PAGE_SIZE};
use crate::error::EngineError;
use crate::storage::Pager;
use crate::types::DataType;

/// B+tree descriptor: root location, key configuration, and the
/// capacities derived from them. Plain data, freely copyable; the root
/// page index is stable for the life of the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTree {
    pub root_page: u32,
    pub layout: NodeLayout,
    pub leaf_min_keys: usize,
    pub internal_min_keys: usize,
    pub leaf_split_index: usize,
    pub internal_split_index: usize,
}

impl BTree {
    /// Creates a new tree: allocates the root page and initializes it as
    /// an empty leaf. Must run inside a transaction.
    pub fn create(pager: &mut Pager, key_type: DataType, record_size: usize) -> Result<BTree> {
        let root_page = pager.allocate_page()?;
        let tree = BTree::attach(root_page, key_type, record_size)?;
        let data = pager.page_mut(root_page)?;
        NodeMut::init(data, tree.layout, root_page, true)?;
        Ok(tree)
    }

    /// Builds the descriptor for an existing tree rooted at `root_page`.
    pub fn attach(root_page: u32, key_type: DataType, record_size: usize) -> Result<BTree> {
        let key_size = key_type
            .size()
            .ok_or_else(|| eyre::eyre!("{} cannot key a B+tree", key_type.name()))?;

        let leaf_max_keys = NODE_USABLE_SIZE / (key_size + record_size);
        let internal_max_keys = (NODE_USABLE_SIZE - 4) / (key_size + 4);
        ensure!(
            leaf_max_keys >= 2 && internal_max_keys >= 3,
            "key/record of {}+{} bytes leaves too little fanout per page",
            key_size,
            record_size
        );

        Ok(BTree {
            root_page,
            layout: NodeLayout {
                key_type,
                key_size,
                record_size,
                leaf_max_keys,
                internal_max_keys,
            },
            // A leaf split leaves ceil(max/2) on the left, so that is the
            // leaf minimum. An interior split also promotes one key, so
            // for odd capacities only floor(max/2) can be guaranteed.
            leaf_min_keys: leaf_max_keys.div_ceil(2),
            internal_min_keys: internal_max_keys / 2,
            leaf_split_index: (leaf_max_keys + 1) / 2,
            internal_split_index: (internal_max_keys + 1) / 2,
        })
    }

    pub fn key_type(&self) -> DataType {
        self.layout.key_type
    }

    pub fn record_size(&self) -> usize {
        self.layout.record_size
    }

    /// Descends to the leaf whose range covers `key`.
    pub(super) fn find_leaf(&self, pager: &mut Pager, key: &[u8]) -> Result<u32> {
        let mut current = self.root_page;
        loop {
            let data = pager.page(current)?;
            let node = NodeRef::new(data, self.layout)?;
            if node.is_leaf() {
                return Ok(current);
            }
            let idx = node.descend_index(key)?;
            let child = node.child_at(idx);
            if child == 0 {
                bail!(EngineError::corruption(format!(
                    "interior page {current} has null child at subscript {idx}"
                )));
            }
            current = child;
        }
    }

    /// Inserts or overwrites (`upsert`). Returns the leaf page and entry
    /// index where the key now lives.
    pub fn insert(&self, pager: &mut Pager, key: &[u8], record: &[u8]) -> Result<(u32, usize)> {
        ensure!(key.len() == self.layout.key_size, "key width mismatch");
        ensure!(
            record.len() == self.layout.record_size,
            "record width mismatch"
        );

        let leaf_page = self.find_leaf(pager, key)?;
        let (search, num_keys) = {
            let node = NodeRef::new(pager.page(leaf_page)?, self.layout)?;
            (node.search(key)?, node.num_keys())
        };

        match search {
            SearchResult::Found(i) => {
                let mut node = NodeMut::new(pager.page_mut(leaf_page)?, self.layout)?;
                node.set_record(i, record);
                Ok((leaf_page, i))
            }
            SearchResult::NotFound(i) if num_keys < self.layout.leaf_max_keys => {
                let mut node = NodeMut::new(pager.page_mut(leaf_page)?, self.layout)?;
                node.insert_leaf_entry(i, key, record);
                Ok((leaf_page, i))
            }
            SearchResult::NotFound(i) => {
                self.split_leaf_insert(pager, leaf_page, i, key, record)?;
                // the entry's leaf may be either half; re-descend
                let leaf_page = self.find_leaf(pager, key)?;
                let node = NodeRef::new(pager.page(leaf_page)?, self.layout)?;
                match node.search(key)? {
                    SearchResult::Found(i) => Ok((leaf_page, i)),
                    SearchResult::NotFound(_) => Err(EngineError::corruption(
                        "inserted key missing after leaf split",
                    )
                    .into()),
                }
            }
        }
    }

    /// Splits a full leaf while inserting `(key, record)` at `pos` in its
    /// gathered entry list.
    fn split_leaf_insert(
        &self,
        pager: &mut Pager,
        leaf_page: u32,
        pos: usize,
        key: &[u8],
        record: &[u8],
    ) -> Result<()> {
        let (mut keys, mut records, header) = {
            let node = NodeRef::new(pager.page(leaf_page)?, self.layout)?;
            let n = node.num_keys();
            let mut keys: Vec<Vec<u8>> = Vec::with_capacity(n + 1);
            let mut records: Vec<Vec<u8>> = Vec::with_capacity(n + 1);
            for i in 0..n {
                keys.push(node.key_at(i).to_vec());
                records.push(node.record_at(i).to_vec());
            }
            (keys, records, *node.header())
        };
        keys.insert(pos, key.to_vec());
        records.insert(pos, record.to_vec());

        let split = self.leaf_split_index;

        if leaf_page == self.root_page {
            // root overflow: both halves move into new children and the
            // root page becomes the interior parent in place
            let left_page = pager.allocate_page()?;
            let right_page = pager.allocate_page()?;

            self.write_leaf(pager, left_page, &keys[..split], &records[..split])?;
            self.write_leaf(pager, right_page, &keys[split..], &records[split..])?;
            self.link_leaves(pager, left_page, 0, right_page, self.root_page)?;
            self.link_leaves(pager, right_page, left_page, 0, self.root_page)?;

            let sep = keys[split].clone();
            let data = pager.page_mut(self.root_page)?;
            let mut root = NodeMut::init(data, self.layout, self.root_page, false)?;
            root.set_child(0, left_page);
            root.insert_interior_entry(0, &sep, right_page);
            return Ok(());
        }

        let right_page = pager.allocate_page()?;

        self.write_leaf(pager, leaf_page, &keys[..split], &records[..split])?;
        self.write_leaf(pager, right_page, &keys[split..], &records[split..])?;
        self.link_leaves(pager, leaf_page, header.prev_leaf, right_page, header.parent)?;
        self.link_leaves(pager, right_page, leaf_page, header.next_leaf, header.parent)?;
        if header.next_leaf != 0 {
            let data = pager.page_mut(header.next_leaf)?;
            NodeHeader::from_bytes_mut(data)?.prev_leaf = right_page;
        }

        // promote a copy of the right half's first key
        let sep = keys[split].clone();
        self.insert_into_parent(pager, header.parent, leaf_page, &sep, right_page)
    }

    /// Reinitializes `page` as a leaf holding the given entries. Link and
    /// parent fields are filled by `link_leaves`.
    fn write_leaf(
        &self,
        pager: &mut Pager,
        page: u32,
        keys: &[Vec<u8>],
        records: &[Vec<u8>],
    ) -> Result<()> {
        let data = pager.page_mut(page)?;
        let mut node = NodeMut::init(data, self.layout, page, true)?;
        for (i, (k, r)) in keys.iter().zip(records.iter()).enumerate() {
            node.insert_leaf_entry(i, k, r);
        }
        Ok(())
    }

    fn link_leaves(
        &self,
        pager: &mut Pager,
        page: u32,
        prev: u32,
        next: u32,
        parent: u32,
    ) -> Result<()> {
        let data = pager.page_mut(page)?;
        let header = NodeHeader::from_bytes_mut(data)?;
        header.prev_leaf = prev;
        header.next_leaf = next;
        header.parent = parent;
        Ok(())
    }

    /// Inserts `sep` into `parent_page` immediately right of
    /// `left_child`, splitting upward as needed.
    fn insert_into_parent(
        &self,
        pager: &mut Pager,
        parent_page: u32,
        left_child: u32,
        sep: &[u8],
        right_child: u32,
    ) -> Result<()> {
        let (pos, num_keys) = {
            let node = NodeRef::new(pager.page(parent_page)?, self.layout)?;
            (node.child_position(left_child)?, node.num_keys())
        };

        if num_keys < self.layout.internal_max_keys {
            let mut node = NodeMut::new(pager.page_mut(parent_page)?, self.layout)?;
            node.insert_interior_entry(pos, sep, right_child);
            return Ok(());
        }
        self.split_interior_insert(pager, parent_page, pos, sep, right_child)
    }

    /// Splits a full interior node while inserting `(sep, right_child)`.
    /// The middle key is promoted and stored in neither half.
    fn split_interior_insert(
        &self,
        pager: &mut Pager,
        page: u32,
        pos: usize,
        sep: &[u8],
        right_child: u32,
    ) -> Result<()> {
        let (mut keys, mut children, header) = {
            let node = NodeRef::new(pager.page(page)?, self.layout)?;
            let n = node.num_keys();
            let mut keys: Vec<Vec<u8>> = Vec::with_capacity(n + 1);
            let mut children: Vec<u32> = Vec::with_capacity(n + 2);
            for i in 0..n {
                keys.push(node.key_at(i).to_vec());
            }
            for i in 0..=n {
                children.push(node.child_at(i));
            }
            (keys, children, *node.header())
        };
        keys.insert(pos, sep.to_vec());
        children.insert(pos + 1, right_child);

        let mid = self.internal_split_index;
        let promoted = keys[mid].clone();

        if page == self.root_page {
            let left_page = pager.allocate_page()?;
            let right_page = pager.allocate_page()?;

            self.write_interior(pager, left_page, self.root_page, &keys[..mid], &children[..=mid])?;
            self.write_interior(
                pager,
                right_page,
                self.root_page,
                &keys[mid + 1..],
                &children[mid + 1..],
            )?;

            let data = pager.page_mut(self.root_page)?;
            let mut root = NodeMut::init(data, self.layout, self.root_page, false)?;
            root.set_child(0, left_page);
            root.insert_interior_entry(0, &promoted, right_page);
            return Ok(());
        }

        let right_page = pager.allocate_page()?;
        self.write_interior(pager, page, header.parent, &keys[..mid], &children[..=mid])?;
        self.write_interior(
            pager,
            right_page,
            header.parent,
            &keys[mid + 1..],
            &children[mid + 1..],
        )?;

        self.insert_into_parent(pager, header.parent, page, &promoted, right_page)
    }

    /// Reinitializes `page` as an interior node with the given keys and
    /// children, repointing every child's parent field at it.
    fn write_interior(
        &self,
        pager: &mut Pager,
        page: u32,
        parent: u32,
        keys: &[Vec<u8>],
        children: &[u32],
    ) -> Result<()> {
        debug_assert_eq!(children.len(), keys.len() + 1);
        {
            let data = pager.page_mut(page)?;
            let mut node = NodeMut::init(data, self.layout, page, false)?;
            node.header_mut().parent = parent;
            node.set_child(0, children[0]);
            for (i, k) in keys.iter().enumerate() {
                node.insert_interior_entry(i, k, children[i + 1]);
            }
        }
        for child in children {
            self.set_parent(pager, *child, page)?;
        }
        Ok(())
    }

    fn set_parent(&self, pager: &mut Pager, child: u32, parent: u32) -> Result<()> {
        let data = pager.page_mut(child)?;
        NodeHeader::from_bytes_mut(data)?.parent = parent;
        Ok(())
    }

    /// Removes the entry at `(leaf_page, index)` and restores occupancy
    /// invariants.
    pub fn delete_entry(&self, pager: &mut Pager, leaf_page: u32, index: usize) -> Result<()> {
        let num_after = {
            let mut node = NodeMut::new(pager.page_mut(leaf_page)?, self.layout)?;
            ensure!(index < node.num_keys(), "delete index out of range");
            node.remove_leaf_entry(index);
            node.num_keys()
        };

        if leaf_page != self.root_page && num_after < self.leaf_min_keys {
            self.rebalance(pager, leaf_page)?;
        }
        Ok(())
    }

    /// Restores minimum occupancy of an underflowed node by borrowing
    /// from a sibling or merging with one, cascading upward as needed.
    fn rebalance(&self, pager: &mut Pager, page: u32) -> Result<()> {
        if page == self.root_page {
            return self.collapse_root_if_needed(pager);
        }

        let (parent_page, is_leaf) = {
            let node = NodeRef::new(pager.page(page)?, self.layout)?;
            (node.header().parent, node.is_leaf())
        };
        let min = if is_leaf {
            self.leaf_min_keys
        } else {
            self.internal_min_keys
        };

        let (ci, parent_num) = {
            let parent = NodeRef::new(pager.page(parent_page)?, self.layout)?;
            (parent.child_position(page)?, parent.num_keys())
        };

        // try the left sibling first, then the right
        if ci > 0 {
            let left = {
                let parent = NodeRef::new(pager.page(parent_page)?, self.layout)?;
                parent.child_at(ci - 1)
            };
            let left_num = NodeRef::new(pager.page(left)?, self.layout)?.num_keys();
            if left_num > min {
                return self.borrow_from_left(pager, parent_page, ci, left, page, is_leaf);
            }
        }
        if ci < parent_num {
            let right = {
                let parent = NodeRef::new(pager.page(parent_page)?, self.layout)?;
                parent.child_at(ci + 1)
            };
            let right_num = NodeRef::new(pager.page(right)?, self.layout)?.num_keys();
            if right_num > min {
                return self.borrow_from_right(pager, parent_page, ci, page, right, is_leaf);
            }
        }

        // no sibling can lend: merge
        if ci > 0 {
            let left = {
                let parent = NodeRef::new(pager.page(parent_page)?, self.layout)?;
                parent.child_at(ci - 1)
            };
            self.merge(pager, parent_page, ci - 1, left, page, is_leaf)?;
        } else {
            let right = {
                let parent = NodeRef::new(pager.page(parent_page)?, self.layout)?;
                parent.child_at(ci + 1)
            };
            self.merge(pager, parent_page, ci, page, right, is_leaf)?;
        }

        let parent_num = NodeRef::new(pager.page(parent_page)?, self.layout)?.num_keys();
        if parent_page == self.root_page {
            if parent_num == 0 {
                self.collapse_root_if_needed(pager)?;
            }
        } else if parent_num < self.internal_min_keys {
            self.rebalance(pager, parent_page)?;
        }
        Ok(())
    }

    /// Moves the left sibling's last entry into `page` and refreshes the
    /// separator. Interior borrows rotate the separator down through the
    /// parent and the sibling's adjacent key up into it.
    fn borrow_from_left(
        &self,
        pager: &mut Pager,
        parent_page: u32,
        ci: usize,
        left: u32,
        page: u32,
        is_leaf: bool,
    ) -> Result<()> {
        if is_leaf {
            let (key, record) = {
                let node = NodeRef::new(pager.page(left)?, self.layout)?;
                let last = node.num_keys() - 1;
                (node.key_at(last).to_vec(), node.record_at(last).to_vec())
            };
            {
                let mut node = NodeMut::new(pager.page_mut(left)?, self.layout)?;
                let last = node.num_keys() - 1;
                node.remove_leaf_entry(last);
            }
            {
                let mut node = NodeMut::new(pager.page_mut(page)?, self.layout)?;
                node.insert_leaf_entry(0, &key, &record);
            }
            let mut parent = NodeMut::new(pager.page_mut(parent_page)?, self.layout)?;
            parent.set_key(ci - 1, &key);
        } else {
            let sep = {
                let parent = NodeRef::new(pager.page(parent_page)?, self.layout)?;
                parent.key_at(ci - 1).to_vec()
            };
            let (left_last_key, moved_child) = {
                let node = NodeRef::new(pager.page(left)?, self.layout)?;
                let n = node.num_keys();
                (node.key_at(n - 1).to_vec(), node.child_at(n))
            };
            {
                let mut node = NodeMut::new(pager.page_mut(left)?, self.layout)?;
                node.pop_back_interior();
            }
            {
                let mut node = NodeMut::new(pager.page_mut(page)?, self.layout)?;
                node.push_front_interior(&sep, moved_child);
            }
            self.set_parent(pager, moved_child, page)?;
            let mut parent = NodeMut::new(pager.page_mut(parent_page)?, self.layout)?;
            parent.set_key(ci - 1, &left_last_key);
        }
        Ok(())
    }

    /// Mirror image of `borrow_from_left` for the right sibling.
    fn borrow_from_right(
        &self,
        pager: &mut Pager,
        parent_page: u32,
        ci: usize,
        page: u32,
        right: u32,
        is_leaf: bool,
    ) -> Result<()> {
        if is_leaf {
            let (key, record) = {
                let node = NodeRef::new(pager.page(right)?, self.layout)?;
                (node.key_at(0).to_vec(), node.record_at(0).to_vec())
            };
            {
                let mut node = NodeMut::new(pager.page_mut(right)?, self.layout)?;
                node.remove_leaf_entry(0);
            }
            let right_new_first = {
                let node = NodeRef::new(pager.page(right)?, self.layout)?;
                node.key_at(0).to_vec()
            };
            {
                let mut node = NodeMut::new(pager.page_mut(page)?, self.layout)?;
                let n = node.num_keys();
                node.insert_leaf_entry(n, &key, &record);
            }
            let mut parent = NodeMut::new(pager.page_mut(parent_page)?, self.layout)?;
            parent.set_key(ci, &right_new_first);
        } else {
            let sep = {
                let parent = NodeRef::new(pager.page(parent_page)?, self.layout)?;
                parent.key_at(ci).to_vec()
            };
            let (right_first_key, moved_child) = {
                let node = NodeRef::new(pager.page(right)?, self.layout)?;
                (node.key_at(0).to_vec(), node.child_at(0))
            };
            {
                let mut node = NodeMut::new(pager.page_mut(right)?, self.layout)?;
                node.pop_front_interior();
            }
            {
                let mut node = NodeMut::new(pager.page_mut(page)?, self.layout)?;
                let n = node.num_keys();
                node.insert_interior_entry(n, &sep, moved_child);
            }
            self.set_parent(pager, moved_child, page)?;
            let mut parent = NodeMut::new(pager.page_mut(parent_page)?, self.layout)?;
            parent.set_key(ci, &right_first_key);
        }
        Ok(())
    }

    /// Concatenates `right` into `left`, removes separator `sep_idx`
    /// from the parent and frees the vacated page.
    fn merge(
        &self,
        pager: &mut Pager,
        parent_page: u32,
        sep_idx: usize,
        left: u32,
        right: u32,
        is_leaf: bool,
    ) -> Result<()> {
        if is_leaf {
            let (keys, records, right_next) = {
                let node = NodeRef::new(pager.page(right)?, self.layout)?;
                let n = node.num_keys();
                let mut keys = Vec::with_capacity(n);
                let mut records = Vec::with_capacity(n);
                for i in 0..n {
                    keys.push(node.key_at(i).to_vec());
                    records.push(node.record_at(i).to_vec());
                }
                (keys, records, node.header().next_leaf)
            };
            {
                let mut node = NodeMut::new(pager.page_mut(left)?, self.layout)?;
                for (k, r) in keys.iter().zip(records.iter()) {
                    let n = node.num_keys();
                    node.insert_leaf_entry(n, k, r);
                }
                node.header_mut().next_leaf = right_next;
            }
            if right_next != 0 {
                let data = pager.page_mut(right_next)?;
                NodeHeader::from_bytes_mut(data)?.prev_leaf = left;
            }
        } else {
            let sep = {
                let parent = NodeRef::new(pager.page(parent_page)?, self.layout)?;
                parent.key_at(sep_idx).to_vec()
            };
            let (keys, children) = {
                let node = NodeRef::new(pager.page(right)?, self.layout)?;
                let n = node.num_keys();
                let mut keys = Vec::with_capacity(n);
                let mut children = Vec::with_capacity(n + 1);
                for i in 0..n {
                    keys.push(node.key_at(i).to_vec());
                }
                for i in 0..=n {
                    children.push(node.child_at(i));
                }
                (keys, children)
            };
            {
                let mut node = NodeMut::new(pager.page_mut(left)?, self.layout)?;
                let n = node.num_keys();
                node.insert_interior_entry(n, &sep, children[0]);
                for (i, k) in keys.iter().enumerate() {
                    let n = node.num_keys();
                    node.insert_interior_entry(n, k, children[i + 1]);
                }
            }
            for child in &children {
                self.set_parent(pager, *child, left)?;
            }
        }

        {
            let mut parent = NodeMut::new(pager.page_mut(parent_page)?, self.layout)?;
            parent.remove_interior_entry(sep_idx);
        }
        pager.free_page(right)?;
        Ok(())
    }

    /// If the root is an interior node with no separators left, its
    /// single child's contents are copied into the root page (the root
    /// index never changes) and the child is freed.
    fn collapse_root_if_needed(&self, pager: &mut Pager) -> Result<()> {
        let (is_leaf, num_keys, child) = {
            let node = NodeRef::new(pager.page(self.root_page)?, self.layout)?;
            let child = if node.is_leaf() { 0 } else { node.child_at(0) };
            (node.is_leaf(), node.num_keys(), child)
        };
        if is_leaf || num_keys > 0 {
            return Ok(());
        }

        let mut image = Box::new([0u8; PAGE_SIZE]);
        image.copy_from_slice(pager.page(child)?);
        {
            let header = NodeHeader::from_bytes_mut(image.as_mut_slice())?;
            header.page_no = self.root_page;
            header.parent = 0;
            // the surviving node is the whole tree; no siblings remain
            header.next_leaf = 0;
            header.prev_leaf = 0;
        }
        pager.page_mut(self.root_page)?.copy_from_slice(image.as_slice());

        let root = NodeRef::new(pager.page(self.root_page)?, self.layout)?;
        if !root.is_leaf() {
            let children: Vec<u32> = (0..=root.num_keys()).map(|i| root.child_at(i)).collect();
            for grandchild in children {
                self.set_parent(pager, grandchild, self.root_page)?;
            }
        }
        pager.free_page(child)?;
        Ok(())
    }

    /// Frees every page of the tree, root included. The descriptor must
    /// not be used afterwards.
    pub fn clear(&self, pager: &mut Pager) -> Result<()> {
        self.free_subtree(pager, self.root_page)
    }

    fn free_subtree(&self, pager: &mut Pager, page: u32) -> Result<()> {
        let children: Vec<u32> = {
            let node = NodeRef::new(pager.page(page)?, self.layout)?;
            if node.is_leaf() {
                Vec::new()
            } else {
                (0..=node.num_keys()).map(|i| node.child_at(i)).collect()
            }
        };
        for child in children {
            self.free_subtree(pager, child)?;
        }
        pager.free_page(page)
    }

    /// Depth of the tree (1 for a lone leaf root). Test and diagnostics
    /// helper.
    pub fn depth(&self, pager: &mut Pager) -> Result<usize> {
        let mut depth = 1;
        let mut current = self.root_page;
        loop {
            let data = pager.page(current)?;
            let node = NodeRef::new(data, self.layout)?;
            if node.is_leaf() {
                return Ok(depth);
            }
            current = node.child_at(0);
            depth += 1;
        }
    }

    /// Verifies every structural invariant: sorted keys, separator
    /// bounds, occupancy, parent pointers, uniform leaf depth and the
    /// leaf chain's global ordering.
    pub fn check_invariants(&self, pager: &mut Pager) -> Result<()> {
        let mut leaves = Vec::new();
        self.check_node(pager, self.root_page, 0, None, None, &mut leaves)?;

        // leaf chain must visit the same leaves in the same order
        let mut chained = Vec::new();
        let mut current = {
            let mut page = self.root_page;
            loop {
                let node = NodeRef::new(pager.page(page)?, self.layout)?;
                if node.is_leaf() {
                    break page;
                }
                page = node.child_at(0);
            }
        };
        let mut prev = 0u32;
        while current != 0 {
            let node = NodeRef::new(pager.page(current)?, self.layout)?;
            ensure!(
                node.header().prev_leaf == prev,
                EngineError::corruption(format!("leaf {current} has wrong prev link"))
            );
            chained.push(current);
            prev = current;
            current = node.header().next_leaf;
        }
        ensure!(
            chained == leaves,
            EngineError::corruption("leaf chain does not match tree order")
        );
        Ok(())
    }

    fn check_node(
        &self,
        pager: &mut Pager,
        page: u32,
        expected_parent: u32,
        lower: Option<Vec<u8>>,
        upper: Option<Vec<u8>>,
        leaves: &mut Vec<u32>,
    ) -> Result<usize> {
        let (is_leaf, num_keys, parent, keys, children) = {
            let node = NodeRef::new(pager.page(page)?, self.layout)?;
            let n = node.num_keys();
            let keys: Vec<Vec<u8>> = (0..n).map(|i| node.key_at(i).to_vec()).collect();
            let children: Vec<u32> = if node.is_leaf() {
                Vec::new()
            } else {
                (0..=n).map(|i| node.child_at(i)).collect()
            };
            (
                node.is_leaf(),
                n,
                node.header().parent,
                keys,
                children,
            )
        };

        ensure!(
            parent == expected_parent,
            EngineError::corruption(format!(
                "page {page} parent {parent} != expected {expected_parent}"
            ))
        );

        if page != self.root_page {
            let min = if is_leaf {
                self.leaf_min_keys
            } else {
                self.internal_min_keys
            };
            let max = if is_leaf {
                self.layout.leaf_max_keys
            } else {
                self.layout.internal_max_keys
            };
            ensure!(
                num_keys >= min && num_keys <= max,
                EngineError::corruption(format!(
                    "page {page} occupancy {num_keys} outside [{min}, {max}]"
                ))
            );
        }

        for w in keys.windows(2) {
            ensure!(
                compare_keys(self.layout.key_type, &w[0], &w[1])? == std::cmp::Ordering::Less,
                EngineError::corruption(format!("page {page} keys out of order"))
            );
        }
        if let Some(lo) = &lower {
            if let Some(first) = keys.first() {
                ensure!(
                    compare_keys(self.layout.key_type, first, lo)? != std::cmp::Ordering::Less,
                    EngineError::corruption(format!("page {page} violates lower bound"))
                );
            }
        }
        if let Some(hi) = &upper {
            if let Some(last) = keys.last() {
                ensure!(
                    compare_keys(self.layout.key_type, last, hi)? == std::cmp::Ordering::Less,
                    EngineError::corruption(format!("page {page} violates upper bound"))
                );
            }
        }

        if is_leaf {
            leaves.push(page);
            return Ok(1);
        }

        let mut child_depth = None;
        for (i, child) in children.iter().enumerate() {
            let lo = if i == 0 {
                lower.clone()
            } else {
                Some(keys[i - 1].clone())
            };
            let hi = if i == num_keys {
                upper.clone()
            } else {
                Some(keys[i].clone())
            };
            let d = self.check_node(pager, *child, page, lo, hi, leaves)?;
            if let Some(expected) = child_depth {
                ensure!(
                    d == expected,
                    EngineError::corruption("leaves at unequal depth")
                );
            }
            child_depth = Some(d);
        }
        Ok(child_depth.unwrap_or(0) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Pager;
    use tempfile::tempdir;

    fn open(dir: &tempfile::TempDir) -> Pager {
        Pager::open(&dir.path().join("t.db")).unwrap()
    }

    fn u32_key(v: u32) -> [u8; 4] {
        v.to_le_bytes()
    }

    fn record(v: u32, size: usize) -> Vec<u8> {
        let mut r = vec![0u8; size];
        r[..4].copy_from_slice(&v.to_le_bytes());
        r
    }

    fn create_tree(pager: &mut Pager, record_size: usize) -> BTree {
        pager.begin_transaction().unwrap();
        let tree = BTree::create(pager, DataType::U32, record_size).unwrap();
        pager.commit().unwrap();
        tree
    }

    fn scan_keys(tree: &BTree, pager: &mut Pager) -> Vec<u32> {
        let mut cursor = super::super::BtCursor::new(*tree);
        let mut out = Vec::new();
        let mut ok = cursor.first(pager).unwrap();
        while ok {
            out.push(cursor.key(pager).unwrap().as_u32().unwrap());
            ok = cursor.next(pager).unwrap();
        }
        out
    }

    #[test]
    fn create_allocates_master_compatible_root() {
        let dir = tempdir().unwrap();
        let mut pager = open(&dir);
        let tree = create_tree(&mut pager, 16);
        // the first tree ever created lands on page 1
        assert_eq!(tree.root_page, 1);
    }

    #[test]
    fn insert_then_lookup_in_single_leaf() {
        let dir = tempdir().unwrap();
        let mut pager = open(&dir);
        let tree = create_tree(&mut pager, 16);

        pager.begin_transaction().unwrap();
        tree.insert(&mut pager, &u32_key(30), &record(300, 16)).unwrap();
        tree.insert(&mut pager, &u32_key(10), &record(100, 16)).unwrap();
        tree.insert(&mut pager, &u32_key(20), &record(200, 16)).unwrap();
        pager.commit().unwrap();

        assert_eq!(scan_keys(&tree, &mut pager), vec![10, 20, 30]);
        tree.check_invariants(&mut pager).unwrap();
    }

    #[test]
    fn upsert_overwrites_record() {
        let dir = tempdir().unwrap();
        let mut pager = open(&dir);
        let tree = create_tree(&mut pager, 16);

        pager.begin_transaction().unwrap();
        tree.insert(&mut pager, &u32_key(5), &record(1, 16)).unwrap();
        let (leaf, idx) = tree.insert(&mut pager, &u32_key(5), &record(2, 16)).unwrap();
        pager.commit().unwrap();

        let node = NodeRef::new(pager.page(leaf).unwrap(), tree.layout).unwrap();
        assert_eq!(node.num_keys(), 1);
        assert_eq!(&node.record_at(idx)[..4], &2u32.to_le_bytes());
    }

    #[test]
    fn sequential_inserts_split_and_stay_sorted() {
        let dir = tempdir().unwrap();
        let mut pager = open(&dir);
        // large records force small fanout and early splits
        let tree = create_tree(&mut pager, 400);

        pager.begin_transaction().unwrap();
        for i in 1..=200u32 {
            tree.insert(&mut pager, &u32_key(i), &record(i, 400)).unwrap();
        }
        pager.commit().unwrap();

        assert_eq!(scan_keys(&tree, &mut pager), (1..=200).collect::<Vec<_>>());
        tree.check_invariants(&mut pager).unwrap();
        assert!(tree.depth(&mut pager).unwrap() >= 2);
    }

    #[test]
    fn reverse_and_shuffled_inserts_stay_sorted() {
        let dir = tempdir().unwrap();
        let mut pager = open(&dir);
        let tree = create_tree(&mut pager, 400);

        pager.begin_transaction().unwrap();
        for i in (1..=100u32).rev() {
            tree.insert(&mut pager, &u32_key(i), &record(i, 400)).unwrap();
        }
        // an interleaved second pass exercises mid-leaf insertion
        for i in (101..=200u32).step_by(2) {
            tree.insert(&mut pager, &u32_key(i), &record(i, 400)).unwrap();
        }
        for i in (102..=200u32).step_by(2) {
            tree.insert(&mut pager, &u32_key(i), &record(i, 400)).unwrap();
        }
        pager.commit().unwrap();

        assert_eq!(scan_keys(&tree, &mut pager), (1..=200).collect::<Vec<_>>());
        tree.check_invariants(&mut pager).unwrap();
    }

    #[test]
    fn root_page_is_stable_across_cascading_splits() {
        let dir = tempdir().unwrap();
        let mut pager = open(&dir);
        // wide keys shrink interior fanout so the tree grows tall fast
        pager.begin_transaction().unwrap();
        let tree = BTree::create(&mut pager, DataType::Char256, 400).unwrap();
        pager.commit().unwrap();
        let root_before = tree.root_page;

        pager.begin_transaction().unwrap();
        for i in 1..=300u32 {
            let key = crate::types::TypedValue::from_str(
                DataType::Char256,
                &format!("key-{i:06}"),
            )
            .unwrap();
            tree.insert(&mut pager, key.bytes(), &record(i, 400)).unwrap();
        }
        pager.commit().unwrap();

        assert_eq!(tree.root_page, root_before);
        assert!(tree.depth(&mut pager).unwrap() >= 3);
        tree.check_invariants(&mut pager).unwrap();
    }

    #[test]
    fn delete_without_underflow() {
        let dir = tempdir().unwrap();
        let mut pager = open(&dir);
        let tree = create_tree(&mut pager, 16);

        pager.begin_transaction().unwrap();
        for i in 1..=5u32 {
            tree.insert(&mut pager, &u32_key(i), &record(i, 16)).unwrap();
        }
        tree.delete_entry(&mut pager, tree.root_page, 2).unwrap();
        pager.commit().unwrap();

        assert_eq!(scan_keys(&tree, &mut pager), vec![1, 2, 4, 5]);
        tree.check_invariants(&mut pager).unwrap();
    }

    #[test]
    fn delete_everything_collapses_to_empty_root() {
        let dir = tempdir().unwrap();
        let mut pager = open(&dir);
        let tree = create_tree(&mut pager, 400);

        pager.begin_transaction().unwrap();
        for i in 1..=200u32 {
            tree.insert(&mut pager, &u32_key(i), &record(i, 400)).unwrap();
        }
        pager.commit().unwrap();
        assert!(tree.depth(&mut pager).unwrap() >= 2);

        let mut cursor = super::super::BtCursor::new(tree);
        pager.begin_transaction().unwrap();
        while cursor.first(&mut pager).unwrap() {
            cursor.delete(&mut pager).unwrap();
        }
        pager.commit().unwrap();

        assert_eq!(scan_keys(&tree, &mut pager), Vec::<u32>::new());
        assert_eq!(tree.depth(&mut pager).unwrap(), 1);
        tree.check_invariants(&mut pager).unwrap();
    }

    #[test]
    fn interleaved_deletes_keep_invariants() {
        let dir = tempdir().unwrap();
        let mut pager = open(&dir);
        let tree = create_tree(&mut pager, 400);

        pager.begin_transaction().unwrap();
        for i in 1..=300u32 {
            tree.insert(&mut pager, &u32_key(i), &record(i, 400)).unwrap();
        }
        pager.commit().unwrap();

        let mut cursor = super::super::BtCursor::new(tree);
        pager.begin_transaction().unwrap();
        for i in (1..=300u32).step_by(3) {
            assert!(cursor.seek(&mut pager, &u32_key(i), super::super::CompareOp::Eq).unwrap());
            cursor.delete(&mut pager).unwrap();
            tree.check_invariants(&mut pager).unwrap();
        }
        pager.commit().unwrap();

        let expected: Vec<u32> = (1..=300u32).filter(|i| i % 3 != 1).collect();
        assert_eq!(scan_keys(&tree, &mut pager), expected);
    }

    #[test]
    fn clear_returns_pages_to_freelist() {
        let dir = tempdir().unwrap();
        let mut pager = open(&dir);
        let tree = create_tree(&mut pager, 400);

        pager.begin_transaction().unwrap();
        for i in 1..=100u32 {
            tree.insert(&mut pager, &u32_key(i), &record(i, 400)).unwrap();
        }
        pager.commit().unwrap();
        let pages_before = pager.page_count().unwrap();

        pager.begin_transaction().unwrap();
        tree.clear(&mut pager).unwrap();
        // every page the tree occupied can now be reallocated without
        // growing the file
        let mut reused = 0;
        while pager.page_count().unwrap() == pages_before {
            pager.allocate_page().unwrap();
            reused += 1;
            if reused > pages_before {
                break;
            }
        }
        pager.rollback().unwrap();
        assert!(reused >= 2, "expected freed pages to be reused, got {reused}");
    }
}
