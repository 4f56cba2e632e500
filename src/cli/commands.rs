//! # Dot Commands
//!
//! Shell-local commands that inspect the engine without going through
//! SQL execution. Anything starting with `.` is dispatched here; the
//! rest of the input is treated as SQL by the REPL.

use eyre::Result;

use crate::compiler::compile_program;
use crate::database::Database;
use crate::sql::{analyze, parse_sql, Statement};

pub enum CommandResult {
    Continue,
    Quit,
}

pub struct CommandHandler;

impl CommandHandler {
    pub fn is_command(line: &str) -> bool {
        line.starts_with('.')
    }

    pub fn execute(db: &mut Database, line: &str) -> Result<CommandResult> {
        let (cmd, rest) = match line.find(char::is_whitespace) {
            Some(i) => (&line[..i], line[i..].trim()),
            None => (line, ""),
        };

        match cmd {
            ".quit" | ".exit" => return Ok(CommandResult::Quit),
            ".help" => Self::help(),
            ".tables" => Self::tables(db),
            ".schema" => Self::schema(db, rest),
            ".bytecode" => Self::bytecode(db, rest)?,
            other => println!("Unknown command: {other} (type .help for commands)"),
        }
        Ok(CommandResult::Continue)
    }

    fn help() {
        println!("Available commands:");
        println!("  .quit/.exit       Exit the shell");
        println!("  .tables           List all tables");
        println!("  .schema <table>   Show table schema");
        println!("  .bytecode <sql>   Show the compiled program");
        println!();
        println!("Everything else is treated as SQL.");
    }

    fn tables(db: &Database) {
        println!();
        println!("Tables:");
        println!("-------");
        let mut names: Vec<_> = db
            .catalog()
            .iter()
            .map(|rel| (rel.name.clone(), rel.columns.len()))
            .collect();
        names.sort();
        for (name, columns) in names {
            println!("  {name} ({columns} columns)");
        }
        println!();
    }

    fn schema(db: &Database, table: &str) {
        match db.catalog().get(table) {
            Some(rel) => {
                println!();
                println!("Schema for {table}:");
                println!("--------------");
                for column in &rel.columns {
                    println!("  {:<20} {}", column.name, column.ty.name());
                }
                println!();
            }
            None => println!("Table '{table}' not found"),
        }
    }

    fn bytecode(db: &mut Database, sql: &str) -> Result<()> {
        let statements = parse_sql(sql)?;
        for mut parsed in statements {
            // compile against a throwaway catalog view: a CREATE TABLE
            // admitted by the semantic pass must not stick around
            let admitted = match &parsed.stmt {
                Statement::CreateTable(create) => Some(create.table.clone()),
                _ => None,
            };

            let result = analyze(&mut parsed, db.catalog_mut())
                .and_then(|_| compile_program(&parsed, db.catalog_mut()));

            if let Some(name) = admitted {
                db.catalog_mut().remove(&name);
            }

            match result {
                Ok(program) => {
                    println!();
                    print!("{}", program.disassemble());
                    println!();
                }
                Err(err) => println!("cannot compile: {err}"),
            }
        }
        Ok(())
    }
}
