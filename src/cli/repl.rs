//! # Read-Eval-Print Loop
//!
//! The interactive shell over one open database. Input handling:
//!
//! - Lines starting with `.` are dot commands, executed immediately
//! - SQL accumulates across lines until a `;` arrives, then the whole
//!   buffer executes
//! - The prompt switches from `luma>` to `   ->` in continuation mode
//!
//! SQL errors are printed and do not terminate the shell; exit with
//! `.quit` or Ctrl+D.

use eyre::{Result, WrapErr};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::time::Instant;

use super::commands::{CommandHandler, CommandResult};
use super::table::{format_header, format_row};
use crate::database::Database;
use crate::sql::{parse_sql, Projection, Statement};
use crate::types::TypedValue;

const PRIMARY_PROMPT: &str = "luma> ";
const CONTINUATION_PROMPT: &str = "   -> ";

fn history_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".lumadb_history"))
}

pub struct Repl {
    db: Database,
    editor: DefaultEditor,
    sql_buffer: String,
}

impl Repl {
    pub fn new(db: Database) -> Result<Repl> {
        let mut editor = DefaultEditor::new().wrap_err("failed to initialize line editor")?;
        if let Some(history) = history_path() {
            let _ = editor.load_history(&history);
        }
        Ok(Repl {
            db,
            editor,
            sql_buffer: String::new(),
        })
    }

    pub fn run(&mut self) -> Result<()> {
        println!("lumadb ({})", self.db.path().display());
        println!("Type .help for commands or start typing SQL");
        println!();

        loop {
            let prompt = if self.sql_buffer.is_empty() {
                PRIMARY_PROMPT
            } else {
                CONTINUATION_PROMPT
            };

            match self.editor.readline(prompt) {
                Ok(line) => {
                    if !self.handle_line(&line)? {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    self.sql_buffer.clear();
                    println!("^C");
                }
                Err(ReadlineError::Eof) => {
                    println!("Bye");
                    break;
                }
                Err(err) => {
                    eprintln!("error reading input: {err}");
                    break;
                }
            }
        }

        if let Some(history) = history_path() {
            let _ = self.editor.save_history(&history);
        }
        Ok(())
    }

    /// Returns false when the shell should exit.
    fn handle_line(&mut self, line: &str) -> Result<bool> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(true);
        }

        if self.sql_buffer.is_empty() && CommandHandler::is_command(trimmed) {
            let _ = self.editor.add_history_entry(trimmed);
            return match CommandHandler::execute(&mut self.db, trimmed)? {
                CommandResult::Continue => Ok(true),
                CommandResult::Quit => {
                    println!("Bye");
                    Ok(false)
                }
            };
        }

        if !self.sql_buffer.is_empty() {
            self.sql_buffer.push(' ');
        }
        self.sql_buffer.push_str(trimmed);

        if self.sql_buffer.contains(';') {
            let sql = std::mem::take(&mut self.sql_buffer);
            let _ = self.editor.add_history_entry(&sql);
            self.execute_sql(&sql);
        }
        Ok(true)
    }

    fn execute_sql(&mut self, sql: &str) {
        self.print_select_header(sql);

        let started = Instant::now();
        let mut row_count = 0usize;
        let mut sink = |row: &[TypedValue]| {
            println!("{}", format_row(row));
            row_count += 1;
        };

        match self.db.execute(sql, &mut sink) {
            Ok(()) => {
                let elapsed = started.elapsed();
                if row_count > 0 {
                    println!();
                    println!("{row_count} row(s) in {elapsed:.2?}");
                } else {
                    println!("ok ({elapsed:.2?})");
                }
            }
            Err(err) => println!("error: {err:#}"),
        }
    }

    /// Column headers for a single-SELECT input; anything else prints
    /// rows bare.
    fn print_select_header(&self, sql: &str) {
        let Ok(statements) = parse_sql(sql) else {
            return;
        };
        let [parsed] = statements.as_slice() else {
            return;
        };
        let Statement::Select(select) = &parsed.stmt else {
            return;
        };
        let Some(rel) = self.db.catalog().get(&select.table) else {
            return;
        };

        let (names, types): (Vec<&str>, Vec<_>) = match &select.projection {
            Projection::Star => rel
                .columns
                .iter()
                .map(|c| (c.name.as_str(), c.ty))
                .unzip(),
            Projection::Columns(cols) => cols
                .iter()
                .filter_map(|name| {
                    rel.column_index(name)
                        .map(|i| (rel.columns[i].name.as_str(), rel.columns[i].ty))
                })
                .unzip(),
        };
        println!();
        println!("{}", format_header(&names, &types));
    }
}
