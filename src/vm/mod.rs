//! # Virtual Machine
//!
//! A register-based bytecode interpreter whose primitives are cursor
//! operations, register arithmetic and comparison, jumps, and
//! transaction control. The compiler lowers one SQL statement into a
//! [`Program`]; the VM executes it instruction by instruction and
//! delivers result rows to a caller-supplied sink.
//!
//! ## Machine State
//!
//! - Program counter
//! - Register file of `REGISTERS` typed slots
//! - Cursor table indexed by small integers (`MAX_CURSORS` slots)
//! - The pending result-row sink
//! - The enclosing transaction state, owned by the pager
//!
//! ## Execution Model
//!
//! Sequential and single-threaded; each instruction observes and updates
//! machine state atomically with respect to other instructions. A
//! program runs to `Halt`, and the VM reports `Ok`, `Abort` (logical
//! failure: divide by zero, failed embedded function, nonzero halt
//! code), or an error from the storage layers. Open cursors are closed
//! on any exit path; the caller decides commit versus rollback.
//!
//! ## Example
//!
//! ```ignore
//! let arena = Bump::new();
//! let mut sink = |row: &[TypedValue]| println!("{row:?}");
//! let mut vm = Vm::new(&mut pager, &mut catalog, &arena, &mut sink);
//! match vm.execute(&program)? {
//!     ExecOutcome::Ok => pager.commit()?,
//!     ExecOutcome::Abort => pager.rollback()?,
//! }
//! ```

mod instruction;
mod machine;

pub use instruction::{
    ArithOp, CursorContext, FunctionContext, Instruction, LogicOp, Program, VmFunction,
};
pub use machine::{ExecOutcome, Vm};
