//! # SQL Front End
//!
//! Lexer, AST, recursive-descent parser and the catalog-driven semantic
//! pass. The pipeline is:
//!
//! ```text
//! SQL text ──lexer──> tokens ──parser──> AST ──semantic──> annotated AST
//! ```
//!
//! The parser is syntax-only; every name and type question is deferred
//! to the semantic pass, which resolves columns against the catalog and
//! writes its findings into the `sem` fields of the AST nodes. The
//! compiler consumes only fully annotated statements.
//!
//! ## Supported Grammar
//!
//! ```text
//! statement := select | insert | update | delete
//!            | create_table | drop_table
//!            | BEGIN | COMMIT | ROLLBACK
//!
//! select    := SELECT (* | column (, column)*) FROM table
//!              [WHERE expr] [ORDER BY column [ASC | DESC]]
//! insert    := INSERT INTO table ( column (, column)* )
//!              VALUES ( literal (, literal)* )
//! update    := UPDATE table SET column = literal (, ...)* [WHERE expr]
//! delete    := DELETE FROM table [WHERE expr]
//! create    := CREATE TABLE table ( column type (, column type)* )
//! drop      := DROP TABLE table
//!
//! expr      := and_expr (OR and_expr)*
//! and_expr  := not_expr (AND not_expr)*
//! not_expr  := [NOT] comparison
//! compare   := primary [(= | != | < | <= | > | >=) primary]
//! primary   := ( expr ) | column | integer | 'string'
//! ```
//!
//! The first declared column of a table is its primary key.

mod ast;
mod lexer;
mod parser;
mod semantic;

pub use ast::{
    BinaryOp, CreateTableStmt, DeleteStmt, DropTableStmt, Expr, InsertStmt, OrderBy,
    ParsedStatement, Projection, SelectSem, SelectStmt, Statement, UpdateStmt,
};
pub use lexer::{Keyword, Lexer, Token};
pub use parser::parse_sql;
pub use semantic::analyze;
