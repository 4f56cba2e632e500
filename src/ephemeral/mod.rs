//! # Ephemeral Ordered Map
//!
//! An in-memory ordered multiset with the same cursor surface as the
//! B+tree, used for ORDER BY staging and GROUP BY aggregation. Rows are
//! materialized into it during a scan, then read back in key order.
//!
//! ## Semantics
//!
//! - Keyed by column 0 of its tuple format; `Pair` composite keys (from
//!   the VM's `Pack2`) are supported since nothing here requires a fixed
//!   key width.
//! - Duplicate keys are allowed iff the open context says so; equal keys
//!   keep insertion order. Without duplicates, inserting an existing key
//!   overwrites its record (the same upsert rule as the B+tree).
//!
//! ## Lifetime
//!
//! The map lives for one program execution. Record bytes are allocated
//! from the per-query bump arena, so dropping the map frees nothing —
//! the arena reset at end of statement reclaims everything at once.
//!
//! ## Representation
//!
//! A sorted vector of entries. Insertion shifts, which is fine for the
//! staging workloads this backs (one pass of inserts, then one pass of
//! reads); lookups are binary searches with the typed key comparator.

use bumpalo::Bump;
use eyre::{ensure, Result};
use std::cmp::Ordering;

use crate::btree::CompareOp;
use crate::types::{DataType, TypedValue};

struct Entry<'p> {
    key: TypedValue,
    record: &'p [u8],
}

pub struct EphemeralTree<'p> {
    arena: &'p Bump,
    key_type: DataType,
    allow_duplicates: bool,
    entries: Vec<Entry<'p>>,
}

impl<'p> EphemeralTree<'p> {
    pub fn new(arena: &'p Bump, key_type: DataType, allow_duplicates: bool) -> EphemeralTree<'p> {
        EphemeralTree {
            arena,
            key_type,
            allow_duplicates,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn key_at(&self, index: usize) -> &TypedValue {
        &self.entries[index].key
    }

    pub fn record_at(&self, index: usize) -> &'p [u8] {
        self.entries[index].record
    }

    /// First index whose key is >= `key`.
    fn lower_bound(&self, key: &TypedValue) -> Result<usize> {
        let mut lo = 0usize;
        let mut hi = self.entries.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.entries[mid].key.compare(key)? == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// First index whose key is > `key`.
    fn upper_bound(&self, key: &TypedValue) -> Result<usize> {
        let mut lo = 0usize;
        let mut hi = self.entries.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.entries[mid].key.compare(key)? == Ordering::Greater {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        Ok(lo)
    }

    /// Inserts a row. With duplicates allowed the new entry lands after
    /// every equal key (insertion order); otherwise an equal key has its
    /// record overwritten. Returns the entry's index.
    pub fn insert(&mut self, key: TypedValue, record: &[u8]) -> Result<usize> {
        ensure!(
            key.ty() == self.key_type,
            "ephemeral key type {} does not match tree key type {}",
            key.ty().name(),
            self.key_type.name()
        );
        let record: &'p [u8] = self.arena.alloc_slice_copy(record);
        let pos = self.upper_bound(&key)?;

        if !self.allow_duplicates && pos > 0 {
            let prev = &self.entries[pos - 1];
            if prev.key.compare(&key)? == Ordering::Equal {
                self.entries[pos - 1].record = record;
                return Ok(pos - 1);
            }
        }

        self.entries.insert(pos, Entry { key, record });
        Ok(pos)
    }

    /// Overwrites the record at `index`.
    pub fn update(&mut self, index: usize, record: &[u8]) -> Result<()> {
        ensure!(index < self.entries.len(), "update index out of range");
        self.entries[index].record = self.arena.alloc_slice_copy(record);
        Ok(())
    }

    /// Removes the entry at `index`. Returns true if the index still
    /// addresses an entry (the old successor) afterwards.
    pub fn delete(&mut self, index: usize) -> Result<bool> {
        ensure!(index < self.entries.len(), "delete index out of range");
        self.entries.remove(index);
        Ok(index < self.entries.len())
    }

    /// Index of the entry a seek lands on, or `None` when no entry
    /// satisfies the predicate. Same contract as the B+tree cursor:
    /// leftmost match for `Eq`/`Ne`/`Ge`/`Gt`, rightmost for `Le`/`Lt`.
    pub fn seek(&self, key: &TypedValue, op: CompareOp) -> Result<Option<usize>> {
        let lb = self.lower_bound(key)?;
        let index = match op {
            CompareOp::Eq => {
                if lb < self.entries.len()
                    && self.entries[lb].key.compare(key)? == Ordering::Equal
                {
                    Some(lb)
                } else {
                    None
                }
            }
            CompareOp::Ge | CompareOp::Ne => (lb < self.entries.len()).then_some(lb),
            CompareOp::Gt => {
                let ub = self.upper_bound(key)?;
                (ub < self.entries.len()).then_some(ub)
            }
            CompareOp::Le => {
                let ub = self.upper_bound(key)?;
                (ub > 0).then(|| ub - 1)
            }
            CompareOp::Lt => (lb > 0).then(|| lb - 1),
        };
        Ok(index)
    }

    pub fn first(&self) -> Option<usize> {
        (!self.entries.is_empty()).then_some(0)
    }

    pub fn last(&self) -> Option<usize> {
        self.entries.len().checked_sub(1)
    }

    pub fn next(&self, index: usize) -> Option<usize> {
        (index + 1 < self.entries.len()).then_some(index + 1)
    }

    pub fn previous(&self, index: usize) -> Option<usize> {
        index.checked_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_val(v: u32) -> TypedValue {
        TypedValue::from_u32(v)
    }

    fn collect_records(tree: &EphemeralTree<'_>) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut idx = tree.first();
        while let Some(i) = idx {
            out.push(tree.record_at(i).to_vec());
            idx = tree.next(i);
        }
        out
    }

    #[test]
    fn entries_come_back_in_key_order() {
        let arena = Bump::new();
        let mut tree = EphemeralTree::new(&arena, DataType::U32, true);
        for v in [30u32, 10, 20] {
            tree.insert(u32_val(v), &v.to_le_bytes()).unwrap();
        }

        let mut keys = Vec::new();
        let mut idx = tree.first();
        while let Some(i) = idx {
            keys.push(tree.key_at(i).as_u32().unwrap());
            idx = tree.next(i);
        }
        assert_eq!(keys, vec![10, 20, 30]);
    }

    #[test]
    fn duplicates_preserve_insertion_order() {
        let arena = Bump::new();
        let mut tree = EphemeralTree::new(&arena, DataType::U32, true);
        tree.insert(u32_val(5), b"first").unwrap();
        tree.insert(u32_val(5), b"second").unwrap();
        tree.insert(u32_val(1), b"zeroth").unwrap();
        tree.insert(u32_val(5), b"third").unwrap();

        assert_eq!(
            collect_records(&tree),
            vec![
                b"zeroth".to_vec(),
                b"first".to_vec(),
                b"second".to_vec(),
                b"third".to_vec()
            ]
        );
    }

    #[test]
    fn without_duplicates_insert_is_upsert() {
        let arena = Bump::new();
        let mut tree = EphemeralTree::new(&arena, DataType::U32, false);
        tree.insert(u32_val(5), b"old").unwrap();
        tree.insert(u32_val(5), b"new").unwrap();

        assert_eq!(tree.len(), 1);
        assert_eq!(tree.record_at(0), b"new");
    }

    #[test]
    fn seek_operators_match_btree_contract() {
        let arena = Bump::new();
        let mut tree = EphemeralTree::new(&arena, DataType::U32, true);
        for v in [10u32, 20, 30] {
            tree.insert(u32_val(v), &v.to_le_bytes()).unwrap();
        }

        let at = |idx: Option<usize>| idx.map(|i| tree.key_at(i).as_u32().unwrap());

        assert_eq!(at(tree.seek(&u32_val(20), CompareOp::Eq).unwrap()), Some(20));
        assert_eq!(at(tree.seek(&u32_val(25), CompareOp::Eq).unwrap()), None);
        assert_eq!(at(tree.seek(&u32_val(15), CompareOp::Ge).unwrap()), Some(20));
        assert_eq!(at(tree.seek(&u32_val(20), CompareOp::Gt).unwrap()), Some(30));
        assert_eq!(at(tree.seek(&u32_val(30), CompareOp::Gt).unwrap()), None);
        assert_eq!(at(tree.seek(&u32_val(25), CompareOp::Le).unwrap()), Some(20));
        assert_eq!(at(tree.seek(&u32_val(10), CompareOp::Lt).unwrap()), None);
        assert_eq!(at(tree.seek(&u32_val(11), CompareOp::Lt).unwrap()), Some(10));
    }

    #[test]
    fn delete_reports_whether_successor_exists() {
        let arena = Bump::new();
        let mut tree = EphemeralTree::new(&arena, DataType::U32, true);
        for v in [1u32, 2, 3] {
            tree.insert(u32_val(v), &v.to_le_bytes()).unwrap();
        }

        assert!(tree.delete(1).unwrap()); // 3 slides into index 1
        assert_eq!(tree.key_at(1).as_u32().unwrap(), 3);
        assert!(!tree.delete(1).unwrap()); // removed the tail
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn pair_keys_sort_componentwise() {
        let arena = Bump::new();
        let mut tree = EphemeralTree::new(&arena, DataType::Pair, false);
        let k = |a: u32, b: u32| {
            TypedValue::pair(&TypedValue::from_u32(a), &TypedValue::from_u32(b)).unwrap()
        };
        tree.insert(k(2, 1), b"c").unwrap();
        tree.insert(k(1, 9), b"b").unwrap();
        tree.insert(k(1, 2), b"a").unwrap();

        assert_eq!(
            collect_records(&tree),
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );

        // upsert on an equal composite key
        tree.insert(k(1, 9), b"b2").unwrap();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.record_at(1), b"b2");
    }

    #[test]
    fn update_replaces_record_in_place() {
        let arena = Bump::new();
        let mut tree = EphemeralTree::new(&arena, DataType::U32, true);
        tree.insert(u32_val(1), b"aaa").unwrap();
        tree.update(0, b"bbb").unwrap();
        assert_eq!(tree.record_at(0), b"bbb");
    }
}
