//! # Storage Module
//!
//! The foundational storage layer: a single database file presented as an
//! array of fixed-size pages, with a page cache, a rollback journal and a
//! freelist of released pages.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │                Pager                  │
//! │  page() / page_mut() / allocate /     │
//! │  free / begin / commit / rollback     │
//! ├──────────┬──────────────┬────────────┤
//! │ PageCache│   Journal    │  Freelist  │
//! │ (LRU)    │ (pre-images) │  (trunks)  │
//! ├──────────┴──────────────┴────────────┤
//! │               DbFile                  │
//! │   read/write/sync/truncate shim       │
//! └──────────────────────────────────────┘
//! ```
//!
//! ## Page Addressing
//!
//! Page `i` occupies the byte range `[i * PAGE_SIZE, (i+1) * PAGE_SIZE)`.
//! Index 0 addresses the file-header block and is never handed out to
//! callers; it participates in journaling like any other page so header
//! mutations (page count, freelist head) roll back with the transaction.
//! Page 1 is reserved for the master catalog root.
//!
//! ## Safety Model
//!
//! Page references can become invalid when the cache evicts. Rather than
//! runtime pin counts, the pager leans on the borrow checker: `page()`
//! borrows `&self`-ward state mutably, so a page slice cannot outlive the
//! call that produced it, and no eviction can run while it is held. A
//! pinned page is simply a borrowed one.
//!
//! ## Transactional Semantics
//!
//! Writes are only visible in the cache until commit. The first write to
//! any page inside a transaction appends the page's pre-image to the
//! journal; commit syncs the journal, writes the dirty set, syncs data and
//! discards the journal. A non-empty journal found on open means the last
//! transaction never committed, and is rolled back before any request is
//! served.

mod cache;
mod file;
mod header;
mod journal;
mod pager;

pub use cache::PageCache;
pub use file::DbFile;
pub use header::{FileHeader, DB_MAGIC, DB_VERSION};
pub use journal::Journal;
pub use pager::Pager;

pub use crate::config::PAGE_SIZE;

/// Index of the reserved file-header block.
pub const HEADER_PAGE: u32 = 0;

/// Offset within a trunk page of the entry array (next_trunk + count).
pub const TRUNK_HEADER_SIZE: usize = 8;

/// Free page numbers one trunk page can carry.
pub const TRUNK_MAX_ENTRIES: usize = (PAGE_SIZE - TRUNK_HEADER_SIZE) / 4;
