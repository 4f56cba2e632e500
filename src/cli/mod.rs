//! # Interactive Shell
//!
//! The REPL over a [`Database`](crate::database::Database): line
//! editing with history, multi-line SQL accumulation until `;`, dot
//! commands for introspection, and aligned column output for SELECT.
//!
//! - [`repl`]: the read-eval-print loop
//! - [`commands`]: dot-command dispatch (`.tables`, `.schema`, ...)
//! - [`table`]: fixed-width value formatting

pub mod commands;
pub mod repl;
pub mod table;

pub use repl::Repl;
