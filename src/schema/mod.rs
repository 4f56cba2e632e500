//! # Schema Catalog
//!
//! Relations, tuple formats and the in-memory catalog mapping table
//! names to their descriptors.
//!
//! ## Catalog as a Value
//!
//! The catalog is an explicit [`Catalog`] value owned by the `Database`
//! and threaded through the semantic pass, the compiler and the VM's
//! embedded functions — there is no process-global table registry.
//!
//! ## Tuple Format
//!
//! Column 0 of every relation is its primary key and is stored as the
//! B+tree key; the remaining columns are packed into the record at
//! offsets fixed by their declared widths:
//!
//! ```text
//! CREATE TABLE users (user_id INT, username TEXT, age INT)
//!
//!   key             record (36 bytes)
//!   ┌─────────┐     ┌────────────────────┬─────────┐
//!   │ user_id │     │ username (char32)  │ age (4) │
//!   └─────────┘     └────────────────────┴─────────┘
//!                   offset 0             offset 32
//! ```
//!
//! ## Master Catalog
//!
//! The distinguished relation `master_catalog` describes every user
//! table, one row each: `(id, name, tbl_name, root_page, sql)`. Its own
//! B+tree root is pinned at page 1 so it can be found on open without
//! consulting anything else.

mod catalog;

pub use catalog::{Catalog, Column, Relation, TupleFormat};
