//! # Bytecode Compiler
//!
//! Lowers one validated, annotated SQL statement into a VM [`Program`].
//!
//! ## Structure
//!
//! - [`builder`]: the `ProgramBuilder` — instruction emission, a label
//!   table with forward references and a resolve pass, and a scoped
//!   register allocator layered under `begin_while`/`begin_if` helpers
//! - [`lower`]: per-statement lowering rules, the WHERE-clause primary
//!   key analysis (the engine's only planner), and the embedded
//!   functions DDL statements call into
//!
//! ## Register Discipline
//!
//! Registers are allocated at compile time by a bump index. Entering a
//! loop or branch pushes a scope mark; leaving it restores the bump
//! index, so per-iteration temporaries are reused instead of leaking
//! across iterations:
//!
//! ```text
//! SELECT username, age FROM users WHERE age > 30
//!
//!   r0 <- first(c0)              scan-valid flag
//! L0: JumpIf r0 false -> L1
//!   push scope                   (compile-time)
//!   r1 <- c0[age]   r2 <- 30   r3 <- r1 > r2
//!   JumpIf r3 false -> L2
//!   r4 <- c0[username]  r5 <- c0[age]
//!   Result r4..r6
//! L2:
//!   r0 <- step(c0)
//!   pop scope                    (r1..r5 reusable)
//!   Goto L0
//! L1:
//! ```

pub mod builder;
pub mod lower;

pub use builder::ProgramBuilder;
pub use lower::compile_program;
