//! # Configuration Module
//!
//! Centralizes the engine's compile-time constants. Constants are grouped
//! by subsystem and interdependencies are documented and enforced through
//! compile-time assertions.
//!
//! ## Why Centralization?
//!
//! The pager, B+tree and VM all derive sizes from `PAGE_SIZE`; the register
//! allocator and compiler both depend on `REGISTERS`. Co-locating these
//! values prevents the class of bug where one subsystem is rebuilt with a
//! different page size than the file it opens.
//!
//! ## Module Organization
//!
//! - [`constants`]: All numeric configuration values with dependency notes

pub mod constants;
pub use constants::*;
