//! # Register Machine
//!
//! Executes a [`Program`] against a fixed register file and an indexed
//! cursor table. The machine owns every cursor it opens for the duration
//! of one program; `Halt` (or any failure) closes them all.
//!
//! ## Outcome Mapping
//!
//! The VM surfaces exactly one of three things to its caller:
//!
//! - `Ok(ExecOutcome::Ok)` — the program ran to `Halt 0`
//! - `Ok(ExecOutcome::Abort)` — a logical failure: nonzero halt code,
//!   division by zero, or an embedded function reporting failure
//! - `Err(..)` — an I/O or invariant failure from the layers below
//!
//! The caller decides commit versus rollback; the VM itself only touches
//! the transaction state through the explicit `Begin`/`Commit`/`Rollback`
//! instructions.

use bumpalo::Bump;
use eyre::{bail, ensure, Result};

use super::instruction::{
    ArithOp, CursorContext, FunctionContext, Instruction, LogicOp, Program,
};
use crate::btree::BtCursor;
use crate::config::{MAX_CURSORS, REGISTERS};
use crate::ephemeral::EphemeralTree;
use crate::error::EngineError;
use crate::schema::{Catalog, TupleFormat};
use crate::storage::Pager;
use crate::types::{DataType, TypedValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    Ok,
    Abort,
}

enum Flow {
    Next,
    Jump(usize),
    Halt(i32),
}

enum VmCursor<'p> {
    BTree {
        cursor: BtCursor,
        format: TupleFormat,
    },
    Ephemeral {
        tree: EphemeralTree<'p>,
        index: usize,
        valid: bool,
        format: TupleFormat,
    },
}

impl VmCursor<'_> {
    fn format(&self) -> &TupleFormat {
        match self {
            VmCursor::BTree { format, .. } => format,
            VmCursor::Ephemeral { format, .. } => format,
        }
    }
}

pub struct Vm<'e, 'p> {
    pager: &'e mut Pager,
    catalog: &'e mut Catalog,
    arena: &'p Bump,
    sink: &'e mut dyn FnMut(&[TypedValue]),
    registers: Vec<TypedValue>,
    cursors: Vec<Option<VmCursor<'p>>>,
}

impl<'e, 'p> Vm<'e, 'p> {
    pub fn new(
        pager: &'e mut Pager,
        catalog: &'e mut Catalog,
        arena: &'p Bump,
        sink: &'e mut dyn FnMut(&[TypedValue]),
    ) -> Vm<'e, 'p> {
        Vm {
            pager,
            catalog,
            arena,
            sink,
            registers: vec![TypedValue::zero(DataType::U32); REGISTERS],
            cursors: (0..MAX_CURSORS).map(|_| None).collect(),
        }
    }

    /// Runs `program` to `Halt`. See the module docs for the outcome
    /// mapping.
    pub fn execute(&mut self, program: &Program) -> Result<ExecOutcome> {
        let mut pc = 0usize;
        loop {
            let Some(inst) = program.instructions.get(pc) else {
                self.close_all_cursors();
                bail!(EngineError::corruption(format!(
                    "program counter {pc} ran past the end (missing Halt)"
                )));
            };
            match self.step(inst) {
                Ok(Flow::Next) => pc += 1,
                Ok(Flow::Jump(target)) => pc = target,
                Ok(Flow::Halt(code)) => {
                    self.close_all_cursors();
                    return Ok(if code == 0 {
                        ExecOutcome::Ok
                    } else {
                        ExecOutcome::Abort
                    });
                }
                Err(err) => {
                    self.close_all_cursors();
                    let is_abort = err
                        .downcast_ref::<EngineError>()
                        .is_some_and(EngineError::is_abort);
                    return if is_abort {
                        Ok(ExecOutcome::Abort)
                    } else {
                        Err(err)
                    };
                }
            }
        }
    }

    fn close_all_cursors(&mut self) {
        for slot in &mut self.cursors {
            *slot = None;
        }
    }

    fn reg(&self, i: usize) -> Result<&TypedValue> {
        self.registers
            .get(i)
            .ok_or_else(|| EngineError::corruption(format!("register r{i} out of range")).into())
    }

    fn set_reg(&mut self, i: usize, value: TypedValue) -> Result<()> {
        ensure!(
            i < self.registers.len(),
            EngineError::corruption(format!("register r{i} out of range"))
        );
        self.registers[i] = value;
        Ok(())
    }

    fn set_flag(&mut self, i: usize, flag: bool) -> Result<()> {
        self.set_reg(i, TypedValue::from_u32(flag as u32))
    }

    fn jump_target(target: i32, program_hint: &'static str) -> Result<usize> {
        ensure!(
            target >= 0,
            EngineError::corruption(format!("unresolved {program_hint} target {target}"))
        );
        Ok(target as usize)
    }

    fn step(&mut self, inst: &Instruction) -> Result<Flow> {
        match inst {
            Instruction::Goto { target } => {
                Ok(Flow::Jump(Self::jump_target(*target, "Goto")?))
            }
            Instruction::JumpIf {
                reg,
                target,
                jump_if_true,
            } => {
                if self.reg(*reg)?.truthy() == *jump_if_true {
                    Ok(Flow::Jump(Self::jump_target(*target, "JumpIf")?))
                } else {
                    Ok(Flow::Next)
                }
            }
            Instruction::Halt { code } => Ok(Flow::Halt(*code)),

            Instruction::Load { dest, value } => {
                self.set_reg(*dest, value.clone())?;
                Ok(Flow::Next)
            }
            Instruction::Move { dest, src } => {
                let value = self.reg(*src)?.clone();
                self.set_reg(*dest, value)?;
                Ok(Flow::Next)
            }

            Instruction::Arithmetic {
                dest,
                left,
                right,
                op,
            } => {
                self.arithmetic(*dest, *left, *right, *op)?;
                Ok(Flow::Next)
            }
            Instruction::Test {
                dest,
                left,
                right,
                op,
            } => {
                let ord = self.reg(*left)?.compare(self.reg(*right)?)?;
                self.set_flag(*dest, op.matches(ord))?;
                Ok(Flow::Next)
            }
            Instruction::Logic {
                dest,
                left,
                right,
                op,
            } => {
                let a = self.reg(*left)?.truthy();
                let b = self.reg(*right)?.truthy();
                let out = match op {
                    LogicOp::And => a && b,
                    LogicOp::Or => a || b,
                };
                self.set_flag(*dest, out)?;
                Ok(Flow::Next)
            }

            Instruction::Open { cursor, context } => {
                ensure!(
                    *cursor < self.cursors.len(),
                    EngineError::corruption(format!("cursor c{cursor} out of range"))
                );
                ensure!(
                    self.cursors[*cursor].is_none(),
                    EngineError::corruption(format!("cursor c{cursor} already open"))
                );
                self.cursors[*cursor] = Some(match context.clone() {
                    CursorContext::BTree { tree, format } => VmCursor::BTree {
                        cursor: BtCursor::new(tree),
                        format,
                    },
                    CursorContext::Ephemeral {
                        format,
                        allow_duplicates,
                    } => VmCursor::Ephemeral {
                        tree: EphemeralTree::new(self.arena, format.key_type, allow_duplicates),
                        index: 0,
                        valid: false,
                        format,
                    },
                });
                Ok(Flow::Next)
            }
            Instruction::Close { cursor } => {
                ensure!(
                    *cursor < self.cursors.len(),
                    EngineError::corruption(format!("cursor c{cursor} out of range"))
                );
                self.cursors[*cursor] = None;
                Ok(Flow::Next)
            }

            Instruction::Rewind {
                cursor,
                out_valid,
                to_end,
            } => {
                let valid = {
                    let Vm { pager, cursors, .. } = self;
                    match cursor_mut(cursors, *cursor)? {
                        VmCursor::BTree { cursor, .. } => {
                            if *to_end {
                                cursor.last(pager)?
                            } else {
                                cursor.first(pager)?
                            }
                        }
                        VmCursor::Ephemeral {
                            tree, index, valid, ..
                        } => {
                            let at = if *to_end { tree.last() } else { tree.first() };
                            *valid = at.is_some();
                            *index = at.unwrap_or(0);
                            *valid
                        }
                    }
                };
                self.set_flag(*out_valid, valid)?;
                Ok(Flow::Next)
            }
            Instruction::Step {
                cursor,
                out_valid,
                forward,
            } => {
                let still = {
                    let Vm { pager, cursors, .. } = self;
                    match cursor_mut(cursors, *cursor)? {
                        VmCursor::BTree { cursor, .. } => {
                            if *forward {
                                cursor.next(pager)?
                            } else {
                                cursor.previous(pager)?
                            }
                        }
                        VmCursor::Ephemeral {
                            tree, index, valid, ..
                        } => {
                            ensure!(*valid, "step on invalid cursor");
                            let at = if *forward {
                                tree.next(*index)
                            } else {
                                tree.previous(*index)
                            };
                            *valid = at.is_some();
                            if let Some(i) = at {
                                *index = i;
                            }
                            *valid
                        }
                    }
                };
                self.set_flag(*out_valid, still)?;
                Ok(Flow::Next)
            }
            Instruction::Seek {
                cursor,
                key_reg,
                out_found,
                op,
            } => {
                let key = self.reg(*key_reg)?.clone();
                let found = {
                    let Vm { pager, cursors, .. } = self;
                    match cursor_mut(cursors, *cursor)? {
                        VmCursor::BTree { cursor, format } => {
                            ensure!(
                                key.ty() == format.key_type,
                                EngineError::corruption(format!(
                                    "seek key type {} does not match tree key {}",
                                    key.ty().name(),
                                    format.key_type.name()
                                ))
                            );
                            cursor.seek(pager, key.bytes(), *op)?
                        }
                        VmCursor::Ephemeral {
                            tree, index, valid, ..
                        } => {
                            let at = tree.seek(&key, *op)?;
                            *valid = at.is_some();
                            if let Some(i) = at {
                                *index = i;
                            }
                            *valid
                        }
                    }
                };
                self.set_flag(*out_found, found)?;
                Ok(Flow::Next)
            }
            Instruction::Column {
                cursor,
                column,
                dest,
            } => {
                let value = {
                    let Vm { pager, cursors, .. } = self;
                    match cursor_mut(cursors, *cursor)? {
                        VmCursor::BTree { cursor, format } => {
                            if *column == 0 {
                                cursor.key(pager)?
                            } else {
                                let record = cursor.record(pager)?;
                                let slice = format.column_slice(&record, *column)?;
                                TypedValue::from_bytes(format.columns[*column], slice)?
                            }
                        }
                        VmCursor::Ephemeral {
                            tree,
                            index,
                            valid,
                            format,
                        } => {
                            ensure!(*valid, "column read on invalid cursor");
                            if *column == 0 {
                                tree.key_at(*index).clone()
                            } else {
                                let record = tree.record_at(*index);
                                let slice = format.column_slice(record, *column)?;
                                TypedValue::from_bytes(format.columns[*column], slice)?
                            }
                        }
                    }
                };
                self.set_reg(*dest, value)?;
                Ok(Flow::Next)
            }
            Instruction::Insert {
                cursor,
                first_reg,
                count,
            } => {
                let Vm {
                    pager,
                    cursors,
                    registers,
                    ..
                } = self;
                let slot = cursor_mut(cursors, *cursor)?;
                let format = slot.format().clone();
                ensure!(
                    *count == format.column_count(),
                    EngineError::corruption(format!(
                        "insert of {count} registers into {}-column cursor",
                        format.column_count()
                    ))
                );
                let key = register_at(registers, *first_reg)?.clone();
                ensure!(
                    key.ty() == format.key_type,
                    EngineError::corruption(format!(
                        "insert key type {} does not match cursor key {}",
                        key.ty().name(),
                        format.key_type.name()
                    ))
                );
                let record = build_record(&format, registers, *first_reg)?;
                match slot {
                    VmCursor::BTree { cursor, .. } => {
                        cursor.insert(pager, key.bytes(), &record)?;
                    }
                    VmCursor::Ephemeral {
                        tree, index, valid, ..
                    } => {
                        *index = tree.insert(key, &record)?;
                        *valid = true;
                    }
                }
                Ok(Flow::Next)
            }
            Instruction::Update { cursor, first_reg } => {
                let Vm {
                    pager,
                    cursors,
                    registers,
                    ..
                } = self;
                let slot = cursor_mut(cursors, *cursor)?;
                let format = slot.format().clone();
                let record = build_record(&format, registers, *first_reg)?;
                match slot {
                    VmCursor::BTree { cursor, .. } => cursor.update(pager, &record)?,
                    VmCursor::Ephemeral {
                        tree, index, valid, ..
                    } => {
                        ensure!(*valid, "update on invalid cursor");
                        tree.update(*index, &record)?;
                    }
                }
                Ok(Flow::Next)
            }
            Instruction::Delete {
                cursor,
                out_occurred,
                out_still_valid,
            } => {
                let (occurred, still_valid) = {
                    let Vm { pager, cursors, .. } = self;
                    match cursor_mut(cursors, *cursor)? {
                        VmCursor::BTree { cursor, .. } => cursor.delete(pager)?,
                        VmCursor::Ephemeral {
                            tree, index, valid, ..
                        } => {
                            if !*valid {
                                (false, false)
                            } else {
                                let still = tree.delete(*index)?;
                                *valid = still;
                                (true, still)
                            }
                        }
                    }
                };
                self.set_flag(*out_occurred, occurred)?;
                self.set_flag(*out_still_valid, still_valid)?;
                Ok(Flow::Next)
            }

            Instruction::ResultRow { first_reg, count } => {
                let Vm {
                    sink, registers, ..
                } = self;
                ensure!(
                    first_reg + count <= registers.len(),
                    EngineError::corruption("result row register range out of bounds")
                );
                (**sink)(&registers[*first_reg..*first_reg + *count]);
                Ok(Flow::Next)
            }

            Instruction::Begin => {
                self.pager.begin_transaction()?;
                Ok(Flow::Next)
            }
            Instruction::Commit => {
                self.pager.commit()?;
                Ok(Flow::Next)
            }
            Instruction::Rollback => {
                self.pager.rollback()?;
                Ok(Flow::Next)
            }

            Instruction::Function {
                dest,
                first_arg,
                arg_count,
                func,
            } => {
                ensure!(
                    first_arg + arg_count <= self.registers.len(),
                    EngineError::corruption("function argument range out of bounds")
                );
                let args: Vec<TypedValue> =
                    self.registers[*first_arg..*first_arg + *arg_count].to_vec();
                let mut ctx = FunctionContext {
                    pager: &mut *self.pager,
                    catalog: &mut *self.catalog,
                };
                match func(&mut ctx, &args)? {
                    Some(value) => self.set_reg(*dest, value)?,
                    None => bail!(EngineError::abort("embedded function reported failure")),
                }
                Ok(Flow::Next)
            }

            Instruction::Pack2 { dest, left, right } => {
                let value = TypedValue::pair(self.reg(*left)?, self.reg(*right)?)?;
                self.set_reg(*dest, value)?;
                Ok(Flow::Next)
            }
            Instruction::Unpack2 { first_dest, src } => {
                let (a, b) = self.reg(*src)?.unpair()?;
                self.set_reg(*first_dest, a)?;
                self.set_reg(*first_dest + 1, b)?;
                Ok(Flow::Next)
            }
        }
    }

    fn arithmetic(&mut self, dest: usize, left: usize, right: usize, op: ArithOp) -> Result<()> {
        let a = self.reg(left)?.clone();
        let b = self.reg(right)?.clone();
        ensure!(
            a.ty().is_numeric() && b.ty().is_numeric(),
            EngineError::corruption(format!(
                "arithmetic on non-numeric types {} and {}",
                a.ty().name(),
                b.ty().name()
            ))
        );
        let ty = DataType::promote(a.ty(), b.ty());

        if op == ArithOp::Div && b.as_f64()? == 0.0 {
            // the destination observes zero, then the program aborts
            self.set_reg(dest, TypedValue::zero(ty))?;
            bail!(EngineError::abort("divide by zero"));
        }

        let value = if ty.is_float() {
            let (x, y) = (a.as_f64()?, b.as_f64()?);
            let r = match op {
                ArithOp::Add => x + y,
                ArithOp::Sub => x - y,
                ArithOp::Mul => x * y,
                ArithOp::Div => x / y,
            };
            TypedValue::from_f64(r)
        } else {
            let (x, y) = (a.as_int()?, b.as_int()?);
            let r = match op {
                ArithOp::Add => x + y,
                ArithOp::Sub => x - y,
                ArithOp::Mul => x * y,
                ArithOp::Div => x / y,
            };
            TypedValue::from_int(ty, r)?
        };
        self.set_reg(dest, value)
    }
}

fn cursor_mut<'a, 'p>(
    cursors: &'a mut [Option<VmCursor<'p>>],
    id: usize,
) -> Result<&'a mut VmCursor<'p>> {
    cursors
        .get_mut(id)
        .and_then(Option::as_mut)
        .ok_or_else(|| EngineError::corruption(format!("cursor c{id} is not open")).into())
}

fn register_at(registers: &[TypedValue], i: usize) -> Result<&TypedValue> {
    registers
        .get(i)
        .ok_or_else(|| EngineError::corruption(format!("register r{i} out of range")).into())
}

/// Assembles a record from the row-shaped register range starting at
/// `first` (column 0 is the key and is skipped).
fn build_record(format: &TupleFormat, registers: &[TypedValue], first: usize) -> Result<Vec<u8>> {
    let mut record = vec![0u8; format.record_size];
    for col in 1..format.column_count() {
        let value = register_at(registers, first + col)?;
        ensure!(
            value.ty() == format.columns[col],
            EngineError::corruption(format!(
                "column {col} register holds {}, expected {}",
                value.ty().name(),
                format.columns[col].name()
            ))
        );
        let off = format.offsets[col];
        record[off..off + value.bytes().len()].copy_from_slice(value.bytes());
    }
    Ok(record)
}
