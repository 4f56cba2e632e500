//! # Instruction Set
//!
//! The VM's instruction enum plus the cursor-context and embedded-
//! function types that instructions carry. Programs are linear arrays of
//! these; jump targets are instruction indices patched in by the
//! compiler's label resolver.

use eyre::Result;
use std::fmt;

use crate::btree::{BTree, CompareOp};
use crate::schema::{Catalog, TupleFormat};
use crate::storage::Pager;
use crate::types::TypedValue;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add = 0,
    Sub = 1,
    Mul = 2,
    Div = 3,
}

impl ArithOp {
    pub fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And = 0,
    Or = 1,
}

impl LogicOp {
    pub fn name(self) -> &'static str {
        match self {
            LogicOp::And => "AND",
            LogicOp::Or => "OR",
        }
    }
}

/// Everything `Open` needs to know about the cursor it creates: which
/// container kind, the row layout, and (for the ephemeral map) whether
/// duplicate keys are admitted. Built by the compiler, owned by the VM.
#[derive(Debug, Clone)]
pub enum CursorContext {
    BTree {
        tree: BTree,
        format: TupleFormat,
    },
    Ephemeral {
        format: TupleFormat,
        allow_duplicates: bool,
    },
}

impl CursorContext {
    pub fn format(&self) -> &TupleFormat {
        match self {
            CursorContext::BTree { format, .. } => format,
            CursorContext::Ephemeral { format, .. } => format,
        }
    }
}

/// State handed to embedded functions: the live catalog and pager, so a
/// callback can create or destroy relations before the program goes on
/// to touch the master catalog.
pub struct FunctionContext<'e> {
    pub pager: &'e mut Pager,
    pub catalog: &'e mut Catalog,
}

/// Embedded function ABI. `Ok(Some(v))` yields a result value,
/// `Ok(None)` reports a logical failure (the program aborts), `Err` is
/// an I/O or invariant failure.
pub type VmFunction =
    fn(&mut FunctionContext<'_>, &[TypedValue]) -> Result<Option<TypedValue>>;

#[derive(Debug, Clone)]
pub enum Instruction {
    // control
    Goto { target: i32 },
    JumpIf { reg: usize, target: i32, jump_if_true: bool },
    Halt { code: i32 },

    // data movement
    Load { dest: usize, value: TypedValue },
    Move { dest: usize, src: usize },

    // register math
    Arithmetic { dest: usize, left: usize, right: usize, op: ArithOp },
    Test { dest: usize, left: usize, right: usize, op: CompareOp },
    Logic { dest: usize, left: usize, right: usize, op: LogicOp },

    // cursors
    Open { cursor: usize, context: CursorContext },
    Close { cursor: usize },
    Rewind { cursor: usize, out_valid: usize, to_end: bool },
    Step { cursor: usize, out_valid: usize, forward: bool },
    Seek { cursor: usize, key_reg: usize, out_found: usize, op: CompareOp },
    Column { cursor: usize, column: usize, dest: usize },
    Insert { cursor: usize, first_reg: usize, count: usize },
    Update { cursor: usize, first_reg: usize },
    Delete { cursor: usize, out_occurred: usize, out_still_valid: usize },

    // results
    ResultRow { first_reg: usize, count: usize },

    // transactions
    Begin,
    Commit,
    Rollback,

    // extension
    Function { dest: usize, first_arg: usize, arg_count: usize, func: VmFunction },

    // composite keys for the ephemeral map
    Pack2 { dest: usize, left: usize, right: usize },
    Unpack2 { first_dest: usize, src: usize },
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Goto { target } => write!(f, "Goto        -> {target}"),
            Instruction::JumpIf {
                reg,
                target,
                jump_if_true,
            } => write!(
                f,
                "JumpIf      r{reg} -> {target} if {}",
                if *jump_if_true { "true" } else { "false" }
            ),
            Instruction::Halt { code } => write!(f, "Halt        {code}"),
            Instruction::Load { dest, value } => {
                write!(f, "Load        r{dest} <- {}:{}", value, value.ty().name())
            }
            Instruction::Move { dest, src } => write!(f, "Move        r{dest} <- r{src}"),
            Instruction::Arithmetic {
                dest,
                left,
                right,
                op,
            } => write!(f, "Arith       r{dest} <- r{left} {} r{right}", op.name()),
            Instruction::Test {
                dest,
                left,
                right,
                op,
            } => write!(f, "Test        r{dest} <- r{left} {} r{right}", op.name()),
            Instruction::Logic {
                dest,
                left,
                right,
                op,
            } => write!(f, "Logic       r{dest} <- r{left} {} r{right}", op.name()),
            Instruction::Open { cursor, context } => {
                let kind = match context {
                    CursorContext::BTree { tree, .. } => format!("btree root={}", tree.root_page),
                    CursorContext::Ephemeral {
                        allow_duplicates, ..
                    } => format!("ephemeral dups={allow_duplicates}"),
                };
                write!(f, "Open        c{cursor} ({kind})")
            }
            Instruction::Close { cursor } => write!(f, "Close       c{cursor}"),
            Instruction::Rewind {
                cursor,
                out_valid,
                to_end,
            } => write!(
                f,
                "Rewind      c{cursor} {} valid->r{out_valid}",
                if *to_end { "last" } else { "first" }
            ),
            Instruction::Step {
                cursor,
                out_valid,
                forward,
            } => write!(
                f,
                "Step        c{cursor} {} valid->r{out_valid}",
                if *forward { "next" } else { "prev" }
            ),
            Instruction::Seek {
                cursor,
                key_reg,
                out_found,
                op,
            } => write!(
                f,
                "Seek        c{cursor} key=r{key_reg} op={} found->r{out_found}",
                op.name()
            ),
            Instruction::Column {
                cursor,
                column,
                dest,
            } => write!(f, "Column      r{dest} <- c{cursor}[{column}]"),
            Instruction::Insert {
                cursor,
                first_reg,
                count,
            } => write!(f, "Insert      c{cursor} <- r{first_reg}..r{}", first_reg + count),
            Instruction::Update { cursor, first_reg } => {
                write!(f, "Update      c{cursor} <- r{first_reg}..")
            }
            Instruction::Delete {
                cursor,
                out_occurred,
                out_still_valid,
            } => write!(
                f,
                "Delete      c{cursor} occurred->r{out_occurred} valid->r{out_still_valid}"
            ),
            Instruction::ResultRow { first_reg, count } => {
                write!(f, "Result      r{first_reg}..r{}", first_reg + count)
            }
            Instruction::Begin => write!(f, "Begin"),
            Instruction::Commit => write!(f, "Commit"),
            Instruction::Rollback => write!(f, "Rollback"),
            Instruction::Function {
                dest,
                first_arg,
                arg_count,
                ..
            } => write!(
                f,
                "Function    r{dest} <- fn(r{first_arg}..r{})",
                first_arg + arg_count
            ),
            Instruction::Pack2 { dest, left, right } => {
                write!(f, "Pack2       r{dest} <- (r{left}, r{right})")
            }
            Instruction::Unpack2 { first_dest, src } => {
                write!(f, "Unpack2     r{first_dest},r{} <- r{src}", first_dest + 1)
            }
        }
    }
}

/// A compiled statement: a linear instruction array executed from index
/// zero to `Halt`.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub instructions: Vec<Instruction>,
}

impl Program {
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Human-readable listing, one instruction per line.
    pub fn disassemble(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        for (pc, inst) in self.instructions.iter().enumerate() {
            let _ = writeln!(out, "{pc:4}  {inst}");
        }
        out
    }
}
