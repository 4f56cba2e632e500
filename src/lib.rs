//! # lumadb — an educational embedded SQL database
//!
//! A single-user, persistent, transactional SQL engine built from four
//! tightly coupled subsystems:
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │        Public API (Database)         │
//! ├─────────────────────────────────────┤
//! │   SQL Layer (Lexer/Parser/Semantic)  │
//! ├─────────────────────────────────────┤
//! │  Bytecode Compiler │ Schema Catalog  │
//! ├────────────────────┴────────────────┤
//! │     Register VM (cursors, sink)      │
//! ├─────────────────────────────────────┤
//! │  B+Tree Storage │ Ephemeral Ordering │
//! ├─────────────────────────────────────┤
//! │ Pager (cache + rollback journal)     │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use lumadb::database::Database;
//!
//! let mut db = Database::open(Path::new("./app.db"))?;
//! db.execute(
//!     "CREATE TABLE users (user_id INT, name TEXT);
//!      INSERT INTO users (user_id, name) VALUES (1, 'alice');",
//!     &mut |_| {},
//! )?;
//! db.execute("SELECT name FROM users WHERE user_id = 1;", &mut |row| {
//!     println!("{}", row[0]);
//! })?;
//! ```
//!
//! ## Design Highlights
//!
//! - **Atomicity by rollback journal**: the first write to any page in
//!   a transaction journals its pre-image; a hot journal found on open
//!   is rolled back before anything else runs.
//! - **Fixed-width rows**: every column type has a fixed byte size, so
//!   B+tree nodes address keys and records by plain offset arithmetic.
//! - **Compiled execution**: SQL lowers to a register-machine program;
//!   the only planning is a primary-key seek optimization on the WHERE
//!   clause.
//! - **Single-threaded by design**: one statement executes at a time,
//!   and page "pinning" is simply the borrow checker's guarantee that a
//!   page slice cannot outlive the pager call that produced it.
//!
//! ## Module Overview
//!
//! - [`storage`]: file shim, page cache, rollback journal, pager
//! - [`btree`]: ordered key→record storage with cursors
//! - [`ephemeral`]: in-memory ordered multiset for ORDER BY staging
//! - [`vm`]: the register machine and its instruction set
//! - [`sql`]: lexer, parser, AST, semantic resolution
//! - [`compiler`]: AST → bytecode lowering
//! - [`schema`]: relations, tuple formats, the catalog
//! - [`database`]: the driver tying it all together
//! - [`cli`]: the interactive shell

pub mod btree;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod database;
pub mod ephemeral;
pub mod error;
pub mod schema;
pub mod sql;
pub mod storage;
pub mod types;
pub mod vm;

pub use btree::{BTree, BtCursor, CompareOp};
pub use database::Database;
pub use error::EngineError;
pub use types::{DataType, TypedValue};
