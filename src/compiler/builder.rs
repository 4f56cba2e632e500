//! # Program Builder
//!
//! Emission layer under the statement lowering: an instruction buffer, a
//! label table with forward-reference patching, a scope-based register
//! allocator, and helpers that encapsulate the two control-flow shapes
//! compiled SQL needs (a conditional scan loop and an if/else gate).
//!
//! Jump instructions referencing a label are emitted with a placeholder
//! target and recorded as patches; `finish()` resolves every patch
//! against the label table. An unresolved label is a compiler bug and
//! surfaces as an error rather than a malformed program.

use eyre::{bail, ensure, Result};

use crate::btree::CompareOp;
use crate::config::{MAX_CURSORS, REGISTERS};
use crate::types::TypedValue;
use crate::vm::{
    ArithOp, CursorContext, Instruction, LogicOp, Program, VmFunction,
};

/// Compile-time register allocation: a bump index plus a stack of scope
/// marks. Pushing a scope on loop/branch entry and popping it on exit
/// lets every iteration reuse the same temporary registers.
#[derive(Debug, Default)]
pub struct RegisterAllocator {
    next_free: usize,
    scope_stack: Vec<usize>,
}

impl RegisterAllocator {
    pub fn allocate(&mut self) -> Result<usize> {
        ensure!(self.next_free < REGISTERS, "out of registers");
        let reg = self.next_free;
        self.next_free += 1;
        Ok(reg)
    }

    pub fn allocate_range(&mut self, count: usize) -> Result<usize> {
        ensure!(
            self.next_free + count <= REGISTERS,
            "not enough registers for a range of {count}"
        );
        let first = self.next_free;
        self.next_free += count;
        Ok(first)
    }

    pub fn push_scope(&mut self) {
        self.scope_stack.push(self.next_free);
    }

    pub fn pop_scope(&mut self) {
        let mark = self
            .scope_stack
            .pop()
            .expect("register scope underflow");
        self.next_free = mark;
    }

    pub fn mark(&self) -> usize {
        self.next_free
    }

    pub fn restore(&mut self, mark: usize) {
        debug_assert!(mark <= self.next_free, "restore to a future mark");
        self.next_free = mark;
    }
}

/// Open scan loop: jump targets plus the register mark to restore.
pub struct WhileContext {
    loop_label: String,
    end_label: String,
    saved_mark: usize,
}

/// Open conditional: labels, register mark, and whether an else branch
/// has been started.
pub struct IfContext {
    else_label: String,
    end_label: String,
    saved_mark: usize,
    has_else: bool,
}

#[derive(Default)]
pub struct ProgramBuilder {
    instructions: Vec<Instruction>,
    labels: Vec<(String, usize)>,
    patches: Vec<(usize, String)>,
    pub regs: RegisterAllocator,
    next_cursor: usize,
    label_counter: usize,
}

impl ProgramBuilder {
    pub fn new() -> ProgramBuilder {
        ProgramBuilder::default()
    }

    pub fn emit(&mut self, inst: Instruction) {
        self.instructions.push(inst);
    }

    pub fn next_pc(&self) -> usize {
        self.instructions.len()
    }

    pub fn unique_label(&mut self) -> String {
        let label = format!(".L{}", self.label_counter);
        self.label_counter += 1;
        label
    }

    pub fn define_label(&mut self, name: &str) {
        self.labels.push((name.to_string(), self.instructions.len()));
    }

    pub fn jump_to(&mut self, label: &str) {
        self.patches.push((self.instructions.len(), label.to_string()));
        self.emit(Instruction::Goto { target: -1 });
    }

    pub fn jump_if(&mut self, reg: usize, label: &str, jump_if_true: bool) {
        self.patches.push((self.instructions.len(), label.to_string()));
        self.emit(Instruction::JumpIf {
            reg,
            target: -1,
            jump_if_true,
        });
    }

    pub fn halt(&mut self, code: i32) {
        self.emit(Instruction::Halt { code });
    }

    /// Resolves every recorded patch and returns the finished program.
    pub fn finish(mut self) -> Result<Program> {
        for (inst_idx, label) in &self.patches {
            let target = self
                .labels
                .iter()
                .find(|(name, _)| name == label)
                .map(|(_, pc)| *pc as i32);
            let Some(target) = target else {
                bail!("undefined label '{label}' (compiler bug)");
            };
            match &mut self.instructions[*inst_idx] {
                Instruction::Goto { target: t } => *t = target,
                Instruction::JumpIf { target: t, .. } => *t = target,
                other => bail!("patch points at non-jump instruction {other} (compiler bug)"),
            }
        }
        Ok(Program {
            instructions: self.instructions,
        })
    }

    // ---- data movement ------------------------------------------------

    /// Materializes a literal into a fresh register.
    pub fn load(&mut self, value: TypedValue) -> Result<usize> {
        let dest = self.regs.allocate()?;
        self.load_into(dest, value);
        Ok(dest)
    }

    pub fn load_into(&mut self, dest: usize, value: TypedValue) {
        self.emit(Instruction::Load { dest, value });
    }

    pub fn move_reg(&mut self, src: usize, dest: usize) {
        self.emit(Instruction::Move { dest, src });
    }

    // ---- register math ------------------------------------------------

    pub fn arithmetic(&mut self, left: usize, right: usize, op: ArithOp) -> Result<usize> {
        let dest = self.regs.allocate()?;
        self.emit(Instruction::Arithmetic {
            dest,
            left,
            right,
            op,
        });
        Ok(dest)
    }

    pub fn sub(&mut self, left: usize, right: usize) -> Result<usize> {
        self.arithmetic(left, right, ArithOp::Sub)
    }

    pub fn test(&mut self, left: usize, right: usize, op: CompareOp) -> Result<usize> {
        let dest = self.regs.allocate()?;
        self.emit(Instruction::Test {
            dest,
            left,
            right,
            op,
        });
        Ok(dest)
    }

    pub fn eq(&mut self, left: usize, right: usize) -> Result<usize> {
        self.test(left, right, CompareOp::Eq)
    }

    pub fn logic(&mut self, left: usize, right: usize, op: LogicOp) -> Result<usize> {
        let dest = self.regs.allocate()?;
        self.emit(Instruction::Logic {
            dest,
            left,
            right,
            op,
        });
        Ok(dest)
    }

    // ---- cursors ------------------------------------------------------

    pub fn open_cursor(&mut self, context: CursorContext) -> Result<usize> {
        ensure!(self.next_cursor < MAX_CURSORS, "out of cursor slots");
        let cursor = self.next_cursor;
        self.next_cursor += 1;
        self.emit(Instruction::Open { cursor, context });
        Ok(cursor)
    }

    pub fn close_cursor(&mut self, cursor: usize) {
        self.emit(Instruction::Close { cursor });
    }

    pub fn rewind(&mut self, cursor: usize, to_end: bool, out_valid: usize) {
        self.emit(Instruction::Rewind {
            cursor,
            out_valid,
            to_end,
        });
    }

    pub fn first(&mut self, cursor: usize) -> Result<usize> {
        let out = self.regs.allocate()?;
        self.rewind(cursor, false, out);
        Ok(out)
    }

    pub fn last(&mut self, cursor: usize) -> Result<usize> {
        let out = self.regs.allocate()?;
        self.rewind(cursor, true, out);
        Ok(out)
    }

    pub fn step(&mut self, cursor: usize, forward: bool, out_valid: usize) {
        self.emit(Instruction::Step {
            cursor,
            out_valid,
            forward,
        });
    }

    pub fn seek(&mut self, cursor: usize, key_reg: usize, op: CompareOp) -> Result<usize> {
        let out_found = self.regs.allocate()?;
        self.emit(Instruction::Seek {
            cursor,
            key_reg,
            out_found,
            op,
        });
        Ok(out_found)
    }

    pub fn column(&mut self, cursor: usize, column: usize) -> Result<usize> {
        let dest = self.regs.allocate()?;
        self.column_into(cursor, column, dest);
        Ok(dest)
    }

    pub fn column_into(&mut self, cursor: usize, column: usize, dest: usize) {
        self.emit(Instruction::Column {
            cursor,
            column,
            dest,
        });
    }

    /// Reads `count` consecutive columns starting at `start_col` into a
    /// fresh register range.
    pub fn columns(&mut self, cursor: usize, start_col: usize, count: usize) -> Result<usize> {
        let first = self.regs.allocate_range(count)?;
        for i in 0..count {
            self.column_into(cursor, start_col + i, first + i);
        }
        Ok(first)
    }

    pub fn insert_record(&mut self, cursor: usize, first_reg: usize, count: usize) {
        self.emit(Instruction::Insert {
            cursor,
            first_reg,
            count,
        });
    }

    pub fn update_record(&mut self, cursor: usize, first_reg: usize) {
        self.emit(Instruction::Update { cursor, first_reg });
    }

    pub fn delete_record(&mut self, cursor: usize) -> Result<(usize, usize)> {
        let out_occurred = self.regs.allocate()?;
        let out_still_valid = self.regs.allocate()?;
        self.emit(Instruction::Delete {
            cursor,
            out_occurred,
            out_still_valid,
        });
        Ok((out_occurred, out_still_valid))
    }

    pub fn result(&mut self, first_reg: usize, count: usize) {
        self.emit(Instruction::ResultRow { first_reg, count });
    }

    // ---- transactions and extensions ----------------------------------

    pub fn begin_transaction(&mut self) {
        self.emit(Instruction::Begin);
    }

    pub fn commit_transaction(&mut self) {
        self.emit(Instruction::Commit);
    }

    pub fn rollback_transaction(&mut self) {
        self.emit(Instruction::Rollback);
    }

    pub fn call_function(
        &mut self,
        func: VmFunction,
        first_arg: usize,
        arg_count: usize,
    ) -> Result<usize> {
        let dest = self.regs.allocate()?;
        self.emit(Instruction::Function {
            dest,
            first_arg,
            arg_count,
            func,
        });
        Ok(dest)
    }

    pub fn pack2(&mut self, left: usize, right: usize) -> Result<usize> {
        let dest = self.regs.allocate()?;
        self.emit(Instruction::Pack2 { dest, left, right });
        Ok(dest)
    }

    pub fn unpack2(&mut self, src: usize) -> Result<usize> {
        let first_dest = self.regs.allocate_range(2)?;
        self.emit(Instruction::Unpack2 { first_dest, src });
        Ok(first_dest)
    }

    // ---- structured control flow --------------------------------------

    /// Loop head: tests `condition_reg` and exits when false. The body
    /// must refresh the register (a `Step`, another `Seek`, ...) before
    /// `end_while` jumps back.
    pub fn begin_while(&mut self, condition_reg: usize) -> WhileContext {
        let loop_label = self.unique_label();
        let end_label = self.unique_label();
        self.define_label(&loop_label);
        self.jump_if(condition_reg, &end_label, false);
        WhileContext {
            loop_label,
            end_label,
            saved_mark: self.regs.mark(),
        }
    }

    pub fn end_while(&mut self, ctx: WhileContext) {
        self.jump_to(&ctx.loop_label);
        self.define_label(&ctx.end_label);
        self.regs.restore(ctx.saved_mark);
    }

    pub fn begin_if(&mut self, test_reg: usize) -> IfContext {
        let else_label = self.unique_label();
        let end_label = self.unique_label();
        self.jump_if(test_reg, &else_label, false);
        IfContext {
            else_label,
            end_label,
            saved_mark: self.regs.mark(),
            has_else: false,
        }
    }

    pub fn begin_else(&mut self, ctx: &mut IfContext) {
        self.jump_to(&ctx.end_label);
        self.define_label(&ctx.else_label);
        ctx.has_else = true;
    }

    pub fn end_if(&mut self, ctx: IfContext) {
        if !ctx.has_else {
            self.define_label(&ctx.else_label);
        }
        self.define_label(&ctx.end_label);
        self.regs.restore(ctx.saved_mark);
    }

    pub fn goto_label(&mut self, name: &str) {
        self.jump_to(name);
    }

    pub fn label(&mut self, name: &str) {
        self.define_label(name);
    }
}
