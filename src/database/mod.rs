//! # Database Driver
//!
//! The [`Database`] value ties the subsystems together: it owns the
//! pager and the catalog, runs the parse → analyze → compile → execute
//! pipeline for each statement, and enforces the transaction discipline
//! around it.
//!
//! ## Open Protocol
//!
//! ```text
//! Pager::open            (rolls back a hot journal first)
//!   │
//!   ├─ fresh file ──> bootstrap: create the master catalog at page 1
//!   │
//!   └─ existing ───> reload: run `SELECT * FROM master_catalog`
//!                    through the real pipeline, re-parse each stored
//!                    CREATE TABLE, attach trees at the stored roots
//! ```
//!
//! ## Transaction Injection
//!
//! Every mutating statement runs inside a transaction: a row deletion
//! can cascade into a chain of B+tree page changes that must land
//! atomically. Statements between explicit `BEGIN`/`COMMIT` use that
//! transaction; a mutating statement outside one gets an implicit
//! transaction injected around just itself.
//!
//! ## Failure Handling
//!
//! On `Abort` or any error the driver rolls back whatever transaction
//! is open and reloads the catalog from the master table — DDL mutates
//! the in-memory catalog mid-program, so the disk copy is the only
//! trustworthy one after a failed statement.

use bumpalo::Bump;
use eyre::{bail, ensure, Result, WrapErr};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::btree::BTree;
use crate::compiler::compile_program;
use crate::config::MASTER_CATALOG;
use crate::schema::{Catalog, Column, Relation};
use crate::sql::{analyze, parse_sql, Statement};
use crate::storage::Pager;
use crate::types::TypedValue;
use crate::vm::{ExecOutcome, Vm};

pub struct Database {
    pager: Pager,
    catalog: Catalog,
    path: PathBuf,
}

impl Database {
    /// Opens or creates a database file. Recovery (if a hot journal
    /// exists) happens inside `Pager::open`, before anything else.
    pub fn open(path: &Path) -> Result<Database> {
        let mut pager = Pager::open(path)?;
        let mut catalog = Catalog::new();

        let fresh = pager.page_count()? == 1;
        if fresh {
            pager.begin_transaction()?;
            catalog.bootstrap_master(&mut pager, true)?;
            pager.commit()?;
            debug!(path = %path.display(), "bootstrapped new database");
        }

        let mut db = Database {
            pager,
            catalog,
            path: path.to_path_buf(),
        };
        if !fresh {
            db.reload_catalog()
                .wrap_err("loading catalog from master table")?;
            debug!(
                path = %path.display(),
                tables = db.catalog.len(),
                "opened existing database"
            );
        }
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Mutable catalog access for shell tooling (`.bytecode` compiles
    /// statements without executing them).
    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    pub fn in_transaction(&self) -> bool {
        self.pager.in_transaction()
    }

    /// Depth of a table's B+tree (1 for a lone leaf root). Diagnostic.
    pub fn tree_depth(&mut self, table: &str) -> Result<usize> {
        let tree = *self
            .catalog
            .get(table)
            .ok_or_else(|| eyre::eyre!("no such table: {table}"))?
            .tree()?;
        tree.depth(&mut self.pager)
    }

    /// Flushes and closes. An open explicit transaction is aborted.
    pub fn close(mut self) -> Result<()> {
        self.pager.close()
    }

    /// Executes every statement in `sql`, delivering result rows to
    /// `sink`. Statements run in order; the first failure stops the
    /// batch, rolls back any open transaction and reloads the catalog.
    pub fn execute(
        &mut self,
        sql: &str,
        sink: &mut dyn FnMut(&[TypedValue]),
    ) -> Result<()> {
        let statements = parse_sql(sql)?;
        for mut parsed in statements {
            if let Err(err) = self.run_statement_pipeline(&mut parsed, sink) {
                self.abandon_failed_statement()?;
                return Err(err.wrap_err(format!("executing '{}'", parsed.sql)));
            }
        }
        Ok(())
    }

    fn run_statement_pipeline(
        &mut self,
        parsed: &mut crate::sql::ParsedStatement,
        sink: &mut dyn FnMut(&[TypedValue]),
    ) -> Result<()> {
        analyze(parsed, &mut self.catalog)?;

        // a mutating statement outside BEGIN..COMMIT gets its own
        // transaction wrapped around just itself
        let injected = parsed.stmt.is_mutation() && !self.pager.in_transaction();
        if injected {
            self.pager.begin_transaction()?;
        }

        let program = compile_program(parsed, &mut self.catalog)?;

        let arena = Bump::new();
        let outcome = {
            let mut vm = Vm::new(&mut self.pager, &mut self.catalog, &arena, sink);
            vm.execute(&program)?
        };
        match outcome {
            ExecOutcome::Ok => {
                if injected {
                    self.pager.commit()?;
                }
                // DDL inside the rolled-back transaction may have
                // touched the in-memory catalog; resync it from disk
                if matches!(parsed.stmt, Statement::Rollback) {
                    self.reload_catalog()?;
                }
                Ok(())
            }
            ExecOutcome::Abort => bail!("statement aborted"),
        }
    }

    /// Cleanup after a failed statement: roll back whatever transaction
    /// is open and rebuild the catalog from disk (DDL may have mutated
    /// the in-memory copy before failing).
    fn abandon_failed_statement(&mut self) -> Result<()> {
        if self.pager.in_transaction() {
            warn!("rolling back after failed statement");
            self.pager.rollback()?;
        }
        self.reload_catalog()
    }

    /// Rebuilds the catalog by scanning the master table with the real
    /// pipeline and re-parsing each stored CREATE TABLE statement.
    pub fn reload_catalog(&mut self) -> Result<()> {
        self.catalog.clear();
        self.catalog.bootstrap_master(&mut self.pager, false)?;

        let mut rows: Vec<Vec<TypedValue>> = Vec::new();
        {
            let mut stmts = parse_sql("SELECT * FROM master_catalog")?;
            let parsed = &mut stmts[0];
            analyze(parsed, &mut self.catalog)?;
            let program = compile_program(parsed, &mut self.catalog)?;

            let arena = Bump::new();
            let mut collect = |row: &[TypedValue]| rows.push(row.to_vec());
            let outcome = {
                let mut vm = Vm::new(&mut self.pager, &mut self.catalog, &arena, &mut collect);
                vm.execute(&program)?
            };
            ensure!(
                outcome == ExecOutcome::Ok,
                "catalog scan aborted unexpectedly"
            );
        }

        for row in rows {
            ensure!(row.len() == 5, "malformed master catalog row");
            let id = row[0].as_u32()?;
            let name = row[1].as_str()?.to_string();
            let root_page = row[3].as_u32()?;
            let sql = row[4].as_str()?;

            if name == MASTER_CATALOG {
                continue;
            }

            let master = self
                .catalog
                .get_mut(MASTER_CATALOG)
                .expect("master bootstrapped above");
            if master.next_key <= id {
                master.next_key = id + 1;
            }

            // recover the column definitions from the stored SQL
            let mut stored = parse_sql(sql)
                .wrap_err_with(|| format!("re-parsing stored schema for '{name}'"))?;
            ensure!(stored.len() == 1, "stored schema for '{name}' is not one statement");
            let Statement::CreateTable(create) = stored.pop().unwrap().stmt else {
                bail!("stored schema for '{name}' is not a CREATE TABLE");
            };

            let columns: Vec<Column> = create
                .columns
                .iter()
                .map(|(n, ty)| Column {
                    name: n.clone(),
                    ty: *ty,
                })
                .collect();
            let mut rel = Relation::new(name, columns);
            let format = rel.tuple_format()?;
            rel.tree = Some(BTree::attach(
                root_page,
                format.key_type,
                format.record_size,
            )?);
            self.catalog.insert(rel);
        }
        Ok(())
    }
}
