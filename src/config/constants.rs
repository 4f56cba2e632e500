//! # Configuration Constants
//!
//! All engine-wide numeric configuration in one place.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (4096 bytes)
//!       │
//!       ├─> NODE_HEADER_SIZE (24 bytes, fixed B+tree node header)
//!       │
//!       ├─> NODE_USABLE_SIZE (derived: PAGE_SIZE - NODE_HEADER_SIZE)
//!       │     Leaf and interior key capacities are computed from this at
//!       │     tree-creation time, per key/record size.
//!       │
//!       └─> FILE_HEADER block (one full page at offset 0, page index 0)
//!             Page i lives at byte offset i * PAGE_SIZE. Index 0 is never
//!             handed out; page 1 is the master catalog root.
//!
//! PAGE_CACHE_CAPACITY (64)
//!       │
//!       └─> Eviction only considers clean pages, so the cache may hold
//!           more than this many entries while a transaction keeps pages
//!           dirty. The excess is bounded by the transaction's write set.
//!
//! REGISTERS (128)
//!       │
//!       └─> The compiler's register allocator and the VM's register file
//!           must agree on this or programs fail bounds checks at runtime.
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `NODE_USABLE_SIZE == PAGE_SIZE - NODE_HEADER_SIZE`
//! 2. A leaf must hold at least two entries of the largest supported
//!    key/record combination, or splits cannot make progress.

/// Size of one page in bytes. The unit of file I/O, caching and journaling.
///
/// Kept small so that B+tree splits show up after a handful of inserts.
pub const PAGE_SIZE: usize = 4096;

/// Size of the B+tree node header at the start of every node page.
pub const NODE_HEADER_SIZE: usize = 24;

/// Bytes available for keys/records (leaf) or keys/children (interior).
pub const NODE_USABLE_SIZE: usize = PAGE_SIZE - NODE_HEADER_SIZE;

/// Number of pages the pager caches before evicting clean, unreferenced
/// pages in LRU order. Dirty pages are never evicted.
pub const PAGE_CACHE_CAPACITY: usize = 64;

/// Suffix appended to the database path to form the rollback journal path.
pub const JOURNAL_SUFFIX: &str = ".journal";

/// Number of register slots in the VM's register file. Register indices
/// are allocated at compile time and bounds-checked at execution time.
pub const REGISTERS: usize = 128;

/// Maximum number of simultaneously open cursors in one program.
pub const MAX_CURSORS: usize = 8;

/// Page index of the master catalog's B+tree root. Fixed for the lifetime
/// of a database file so the catalog can always be found on open.
pub const MASTER_ROOT_PAGE: u32 = 1;

/// Name of the master catalog relation.
pub const MASTER_CATALOG: &str = "master_catalog";

const _: () = assert!(NODE_USABLE_SIZE == PAGE_SIZE - NODE_HEADER_SIZE);
const _: () = assert!(PAGE_SIZE % 512 == 0, "pages must be sector aligned");
// Largest key (Char256) plus the master catalog's record must leave room
// for at least two leaf entries, or a split cannot distribute entries.
const _: () = assert!(NODE_USABLE_SIZE / (256 + 328) >= 2);
const _: () = assert!(PAGE_CACHE_CAPACITY >= 8);
const _: () = assert!(REGISTERS >= 32);
