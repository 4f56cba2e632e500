//! # Abstract Syntax Tree
//!
//! Statement and expression nodes, tagged-union shaped. Semantic
//! annotations (resolved column indices and types, staging formats) are
//! `sem` fields on the nodes themselves, filled in by the semantic pass
//! and consumed by the compiler; the parser leaves them empty.

use smallvec::SmallVec;

use crate::schema::TupleFormat;
use crate::types::DataType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        !matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column {
        name: String,
        /// Filled by the semantic pass: (column index, column type).
        sem: Option<(usize, DataType)>,
    },
    IntLiteral {
        value: i64,
        /// Resolved storage type, from the column the literal meets.
        sem_ty: Option<DataType>,
    },
    StrLiteral {
        value: String,
        sem_ty: Option<DataType>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not {
        operand: Box<Expr>,
    },
}

impl Expr {
    /// Literal `true`, used when a predicate has been consumed by the
    /// seek strategy.
    pub fn literal_true() -> Expr {
        Expr::IntLiteral {
            value: 1,
            sem_ty: Some(DataType::U32),
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Expr::IntLiteral { .. } | Expr::StrLiteral { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    Star,
    Columns(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub desc: bool,
}

/// Semantic results for a SELECT: projected column indices and types,
/// and when ORDER BY is present, the ordering column's index plus the
/// tuple format of the ephemeral staging map (ordering key prepended as
/// column 0).
#[derive(Debug, Clone, PartialEq)]
pub struct SelectSem {
    pub column_indices: SmallVec<[usize; 8]>,
    pub column_types: SmallVec<[DataType; 8]>,
    pub order_by_index: Option<usize>,
    pub staging_format: Option<TupleFormat>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStmt {
    pub table: String,
    pub projection: Projection,
    pub where_clause: Option<Expr>,
    pub order_by: Option<OrderBy>,
    pub sem: Option<SelectSem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStmt {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<Expr>,
    /// Target column index for each provided value.
    pub sem: Option<SmallVec<[usize; 8]>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStmt {
    pub table: String,
    pub assignments: Vec<(String, Expr)>,
    pub where_clause: Option<Expr>,
    /// Target column index for each assignment.
    pub sem: Option<SmallVec<[usize; 8]>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStmt {
    pub table: String,
    pub where_clause: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStmt {
    pub table: String,
    pub columns: Vec<(String, DataType)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DropTableStmt {
    pub table: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
    CreateTable(CreateTableStmt),
    DropTable(DropTableStmt),
    Begin,
    Commit,
    Rollback,
}

impl Statement {
    /// True for statements that modify durable state and therefore need
    /// a transaction (explicit or injected by the driver).
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Statement::Insert(_)
                | Statement::Update(_)
                | Statement::Delete(_)
                | Statement::CreateTable(_)
                | Statement::DropTable(_)
        )
    }
}

/// A parsed statement together with its original source text (the
/// master catalog stores CREATE TABLE statements verbatim).
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStatement {
    pub stmt: Statement,
    pub sql: String,
}
