//! # B+Tree Storage
//!
//! Ordered key→record storage layered on pages, with cursor-based
//! traversal and split/rebalance maintenance.
//!
//! ## Architecture Overview
//!
//! - All records live in leaf nodes; interior nodes hold separator keys
//!   and child page numbers only
//! - Leaves form a doubly-linked list in key order for range scans
//! - Keys and records are fixed-width, so a node is two flat arrays with
//!   computed offsets — no per-entry length bookkeeping
//!
//! ```text
//!                   [root: interior]
//!                   /       |       \
//!          [leaf 4] ⇄ [leaf 7] ⇄ [leaf 9]     (prev/next links)
//! ```
//!
//! ## Node Layout (one page)
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │ Header (24 bytes) │        Keys Area        │     Records Area     │
//! ├───────────────────┼─────────────────────────┼──────────────────────┤
//! │ page_no   (4)     │ key[0] │ key[1] │  ...  │ rec[0] │ rec[1] │ ...│
//! │ parent    (4)     │                         │                      │
//! │ next_leaf (4)     │  max_keys * key_size    │ max_keys * rec_size  │
//! │ prev_leaf (4)     │                         │                      │
//! │ num_keys  (4)     │   (interior nodes store │ num_keys+1 child     │
//! │ is_leaf   (4)     │    page numbers here────┼──────────────────┐   │
//! └───────────────────┴─────────────────────────┴──────────────────┼───┘
//!                                                                  ↓
//!                                               children: u32 * (max+1)
//! ```
//!
//! Capacities are derived at tree creation from the page size and the
//! key/record widths; shifts on insert and delete are plain `copy_within`
//! moves over the two regions.
//!
//! ## Root Stability
//!
//! The root page index never changes for the life of a tree. When the
//! root overflows, its entries move into two freshly allocated children
//! and the root page becomes (or stays) an interior node in place; when
//! an interior root is left with a single child, that child's contents
//! are copied back into the root page and the child is freed. Stored
//! root page numbers (the master catalog's `root_page` column) therefore
//! remain valid without any write-back bookkeeping.
//!
//! ## Failure Semantics
//!
//! Tree operations fail only on pager errors, which propagate unchanged.
//! Any mutation runs inside a pager transaction, so a failed multi-page
//! operation is undone wholesale by the journal rollback.

mod cursor;
mod node;
mod tree;

pub use cursor::BtCursor;
pub use node::{NodeHeader, NodeLayout, NodeRef};
pub use tree::BTree;

/// Comparison operator for cursor seeks and VM tests.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq = 0,
    Ne = 1,
    Lt = 2,
    Le = 3,
    Gt = 4,
    Ge = 5,
}

impl CompareOp {
    pub fn name(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    /// True if `ord` (left vs right) satisfies this operator.
    pub fn matches(self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Eq => ord == Equal,
            CompareOp::Ne => ord != Equal,
            CompareOp::Lt => ord == Less,
            CompareOp::Le => ord != Greater,
            CompareOp::Gt => ord == Greater,
            CompareOp::Ge => ord != Less,
        }
    }
}
