//! # Relations and the Catalog Map
//!
//! See the module-level docs in `mod.rs` for the layout rules. The
//! catalog holds fully resolved [`Relation`] values; a relation's tree
//! descriptor is `None` between the semantic pass admitting a CREATE
//! TABLE and the VM's create-relation callback allocating its root.

use eyre::{ensure, Result};
use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::btree::BTree;
use crate::config::{MASTER_CATALOG, MASTER_ROOT_PAGE};
use crate::storage::Pager;
use crate::types::DataType;

/// Precomputed row layout for one relation (or one ephemeral staging
/// map): column types, record offsets, key type and record width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleFormat {
    pub columns: SmallVec<[DataType; 8]>,
    /// Byte offset of column `i` within the record region, for `i >= 1`.
    /// Column 0 is the key and lives outside the record; its slot here
    /// is zero.
    pub offsets: SmallVec<[usize; 8]>,
    pub key_type: DataType,
    pub record_size: usize,
}

impl TupleFormat {
    /// Derives the format from an ordered column type list. The first
    /// column is the key; the rest pack into the record in order.
    pub fn from_columns(columns: &[DataType]) -> Result<TupleFormat> {
        ensure!(!columns.is_empty(), "a relation needs at least one column");
        let key_type = columns[0];

        let mut offsets: SmallVec<[usize; 8]> = SmallVec::new();
        offsets.push(0);
        let mut offset = 0usize;
        for col in &columns[1..] {
            offsets.push(offset);
            offset += col
                .size()
                .ok_or_else(|| eyre::eyre!("{} cannot be a table column", col.name()))?;
        }

        Ok(TupleFormat {
            columns: SmallVec::from_slice(columns),
            offsets,
            key_type,
            record_size: offset,
        })
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Slice of `record` holding column `col` (which must be >= 1; the
    /// key is not part of the record).
    pub fn column_slice<'r>(&self, record: &'r [u8], col: usize) -> Result<&'r [u8]> {
        ensure!(
            col >= 1 && col < self.columns.len(),
            "column {col} out of range"
        );
        let off = self.offsets[col];
        let size = self.columns[col].fixed_size();
        ensure!(off + size <= record.len(), "record too short for column {col}");
        Ok(&record[off..off + size])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: DataType,
}

/// One table: its name, columns, key counter and storage tree. Column 0
/// is always the primary key.
#[derive(Debug, Clone)]
pub struct Relation {
    pub name: String,
    pub columns: Vec<Column>,
    /// `None` only between semantic admission of a CREATE TABLE and the
    /// VM callback that allocates the tree.
    pub tree: Option<BTree>,
    /// Next synthetic key, used by the master catalog's id column.
    pub next_key: u32,
}

impl Relation {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Relation {
        Relation {
            name: name.into(),
            columns,
            tree: None,
            next_key: 0,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_types(&self) -> Vec<DataType> {
        self.columns.iter().map(|c| c.ty).collect()
    }

    pub fn tuple_format(&self) -> Result<TupleFormat> {
        TupleFormat::from_columns(&self.column_types())
    }

    pub fn tree(&self) -> Result<&BTree> {
        self.tree
            .as_ref()
            .ok_or_else(|| eyre::eyre!("relation '{}' has no storage tree", self.name))
    }
}

/// Name → relation map. Owned by the `Database`, rebuilt from the
/// master catalog on open and after any aborted DDL.
#[derive(Debug, Default)]
pub struct Catalog {
    tables: HashMap<String, Relation>,
}

impl Catalog {
    pub fn new() -> Catalog {
        Catalog {
            tables: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Relation> {
        self.tables.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Relation> {
        self.tables.get_mut(name)
    }

    pub fn insert(&mut self, relation: Relation) {
        self.tables.insert(relation.name.clone(), relation);
    }

    pub fn remove(&mut self, name: &str) -> Option<Relation> {
        self.tables.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relation> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Column layout of the master catalog.
    pub fn master_columns() -> Vec<Column> {
        vec![
            Column {
                name: "id".into(),
                ty: DataType::U32,
            },
            Column {
                name: "name".into(),
                ty: DataType::Char32,
            },
            Column {
                name: "tbl_name".into(),
                ty: DataType::Char32,
            },
            Column {
                name: "root_page".into(),
                ty: DataType::U32,
            },
            Column {
                name: "sql".into(),
                ty: DataType::Char256,
            },
        ]
    }

    /// Installs the master catalog relation. On a fresh database this
    /// creates its tree (the caller must hold a transaction open) and
    /// verifies it landed on the reserved page; on an existing one it
    /// attaches to that page.
    pub fn bootstrap_master(&mut self, pager: &mut Pager, is_new: bool) -> Result<()> {
        let mut master = Relation::new(MASTER_CATALOG, Self::master_columns());
        let format = master.tuple_format()?;

        let tree = if is_new {
            let tree = BTree::create(pager, format.key_type, format.record_size)?;
            ensure!(
                tree.root_page == MASTER_ROOT_PAGE,
                "master catalog root landed on page {}, must be page {}",
                tree.root_page,
                MASTER_ROOT_PAGE
            );
            tree
        } else {
            BTree::attach(MASTER_ROOT_PAGE, format.key_type, format.record_size)?
        };

        master.tree = Some(tree);
        self.insert(master);
        Ok(())
    }
}
