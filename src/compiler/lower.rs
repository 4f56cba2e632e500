//! # Statement Lowering
//!
//! Translates one annotated statement into a program, using the
//! [`ProgramBuilder`]. The only planning performed is the WHERE-clause
//! primary-key analysis: a predicate of the shape `pk <op> literal`
//! (possibly under ANDs) turns a full scan into a direct lookup (`=`)
//! or a seek-scan (`<`, `<=`, `>`, `>=`), and the consumed predicate is
//! stripped from the tree since the seek already enforces it.
//!
//! DDL statements lower to a host-function call that performs the
//! catalog-side work (creating or clearing the relation's B+tree),
//! followed by ordinary cursor instructions maintaining the master
//! catalog's rows.

use eyre::{bail, ensure, Result};

use super::builder::ProgramBuilder;
use crate::btree::{BTree, CompareOp};
use crate::config::MASTER_CATALOG;
use crate::schema::{Catalog, Relation};
use crate::sql::{
    BinaryOp, CreateTableStmt, DeleteStmt, DropTableStmt, Expr, InsertStmt, ParsedStatement,
    SelectStmt, Statement, UpdateStmt,
};
use crate::types::{DataType, TypedValue};
use crate::vm::{CursorContext, FunctionContext, LogicOp, Program};

/// Compiles one statement. The statement must have passed the semantic
/// pass; missing annotations are compiler-contract violations.
pub fn compile_program(parsed: &ParsedStatement, catalog: &mut Catalog) -> Result<Program> {
    match &parsed.stmt {
        Statement::Select(select) => compile_select(select.clone(), catalog),
        Statement::Insert(insert) => compile_insert(insert, catalog),
        Statement::Update(update) => compile_update(update, catalog),
        Statement::Delete(delete) => compile_delete(delete, catalog),
        Statement::CreateTable(create) => compile_create_table(create, &parsed.sql, catalog),
        Statement::DropTable(drop) => compile_drop_table(drop, catalog),
        Statement::Begin => compile_transaction_op(TxnOp::Begin),
        Statement::Commit => compile_transaction_op(TxnOp::Commit),
        Statement::Rollback => compile_transaction_op(TxnOp::Rollback),
    }
}

enum TxnOp {
    Begin,
    Commit,
    Rollback,
}

fn compile_transaction_op(op: TxnOp) -> Result<Program> {
    let mut b = ProgramBuilder::new();
    match op {
        TxnOp::Begin => b.begin_transaction(),
        TxnOp::Commit => b.commit_transaction(),
        TxnOp::Rollback => b.rollback_transaction(),
    }
    b.halt(0);
    b.finish()
}

fn table_context(catalog: &Catalog, table: &str) -> Result<CursorContext> {
    let rel = catalog
        .get(table)
        .ok_or_else(|| eyre::eyre!("no such table: {table}"))?;
    Ok(CursorContext::BTree {
        tree: *rel.tree()?,
        format: rel.tuple_format()?,
    })
}

// ---- expressions ------------------------------------------------------

fn literal_value(expr: &Expr) -> Result<TypedValue> {
    match expr {
        Expr::IntLiteral { value, sem_ty } => {
            let ty = sem_ty.unwrap_or(DataType::U32);
            TypedValue::from_int(ty, *value as i128)
        }
        Expr::StrLiteral { value, sem_ty } => {
            let ty = sem_ty
                .ok_or_else(|| eyre::eyre!("untyped string literal (semantic pass skipped?)"))?;
            TypedValue::from_str(ty, value)
        }
        other => bail!("expected a literal, found {other:?}"),
    }
}

fn compile_literal(b: &mut ProgramBuilder, expr: &Expr) -> Result<usize> {
    b.load(literal_value(expr)?)
}

fn compile_expr(b: &mut ProgramBuilder, expr: &Expr, cursor: usize) -> Result<usize> {
    match expr {
        Expr::Column { name, sem } => {
            let (index, _) = sem
                .ok_or_else(|| eyre::eyre!("unresolved column '{name}' (semantic pass skipped?)"))?;
            b.column(cursor, index)
        }
        Expr::IntLiteral { .. } | Expr::StrLiteral { .. } => compile_literal(b, expr),
        Expr::Binary { op, left, right } => {
            let left_reg = compile_expr(b, left, cursor)?;
            let right_reg = compile_expr(b, right, cursor)?;
            match op {
                BinaryOp::Eq => b.test(left_reg, right_reg, CompareOp::Eq),
                BinaryOp::Ne => b.test(left_reg, right_reg, CompareOp::Ne),
                BinaryOp::Lt => b.test(left_reg, right_reg, CompareOp::Lt),
                BinaryOp::Le => b.test(left_reg, right_reg, CompareOp::Le),
                BinaryOp::Gt => b.test(left_reg, right_reg, CompareOp::Gt),
                BinaryOp::Ge => b.test(left_reg, right_reg, CompareOp::Ge),
                BinaryOp::And => b.logic(left_reg, right_reg, LogicOp::And),
                BinaryOp::Or => b.logic(left_reg, right_reg, LogicOp::Or),
            }
        }
        Expr::Not { operand } => {
            let operand_reg = compile_expr(b, operand, cursor)?;
            let one = b.load(TypedValue::from_u32(1))?;
            b.sub(one, operand_reg)
        }
    }
}

// ---- WHERE-clause primary-key analysis --------------------------------

#[derive(Debug, Clone, PartialEq)]
enum SeekStrategy {
    FullScan,
    /// Seek to the boundary, then scan in `forward` direction.
    SeekScan {
        op: CompareOp,
        key: Expr,
        forward: bool,
    },
    /// Primary key equality: at most one row can match.
    DirectLookup { key: Expr },
}

/// Walks the predicate tree looking for `pk <op> literal`. A match is
/// adopted as the seek strategy and its node replaced by literal true;
/// when it sits under an AND, the AND collapses to its other side. OR
/// is never descended into — the seek would wrongly constrain the scan.
fn analyze_where_clause(where_clause: &mut Option<Expr>) -> SeekStrategy {
    match where_clause {
        Some(expr) => analyze_expr(expr),
        None => SeekStrategy::FullScan,
    }
}

fn analyze_expr(expr: &mut Expr) -> SeekStrategy {
    if let Expr::Binary { op, left, right } = expr {
        let pk_comparison = matches!(
            (left.as_ref(), *op),
            (
                Expr::Column {
                    sem: Some((0, _)),
                    ..
                },
                BinaryOp::Eq | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
            )
        ) && right.is_literal();

        if pk_comparison {
            let key = right.as_ref().clone();
            let strategy = match op {
                BinaryOp::Eq => SeekStrategy::DirectLookup { key },
                BinaryOp::Lt => SeekStrategy::SeekScan {
                    op: CompareOp::Lt,
                    key,
                    forward: false,
                },
                BinaryOp::Le => SeekStrategy::SeekScan {
                    op: CompareOp::Le,
                    key,
                    forward: false,
                },
                BinaryOp::Gt => SeekStrategy::SeekScan {
                    op: CompareOp::Gt,
                    key,
                    forward: true,
                },
                BinaryOp::Ge => SeekStrategy::SeekScan {
                    op: CompareOp::Ge,
                    key,
                    forward: true,
                },
                _ => unreachable!(),
            };
            // the seek enforces this predicate; nothing left to test
            *expr = Expr::literal_true();
            return strategy;
        }

        if *op == BinaryOp::And {
            let left_strategy = analyze_expr(left);
            if left_strategy != SeekStrategy::FullScan {
                let rest = std::mem::replace(right.as_mut(), Expr::literal_true());
                *expr = rest;
                return left_strategy;
            }
            let right_strategy = analyze_expr(right);
            if right_strategy != SeekStrategy::FullScan {
                let rest = std::mem::replace(left.as_mut(), Expr::literal_true());
                *expr = rest;
                return right_strategy;
            }
        }
    }
    SeekStrategy::FullScan
}

// ---- SELECT -----------------------------------------------------------

fn compile_select(mut select: SelectStmt, catalog: &mut Catalog) -> Result<Program> {
    let sem = select
        .sem
        .clone()
        .ok_or_else(|| eyre::eyre!("SELECT missing semantic annotations"))?;
    let mut b = ProgramBuilder::new();

    let table_cursor = b.open_cursor(table_context(catalog, &select.table)?)?;
    let strategy = analyze_where_clause(&mut select.where_clause);

    // primary-key equality touches at most one row: no loop at all
    if let SeekStrategy::DirectLookup { key } = &strategy {
        let key_reg = compile_literal(&mut b, key)?;
        let found = b.seek(table_cursor, key_reg, CompareOp::Eq)?;

        let found_block = b.begin_if(found);
        {
            if let Some(where_clause) = &select.where_clause {
                let gate = compile_expr(&mut b, where_clause, table_cursor)?;
                let gate_block = b.begin_if(gate);
                let start = b.regs.allocate_range(sem.column_indices.len())?;
                for (i, col) in sem.column_indices.iter().enumerate() {
                    b.column_into(table_cursor, *col, start + i);
                }
                b.result(start, sem.column_indices.len());
                b.end_if(gate_block);
            } else {
                let start = b.regs.allocate_range(sem.column_indices.len())?;
                for (i, col) in sem.column_indices.iter().enumerate() {
                    b.column_into(table_cursor, *col, start + i);
                }
                b.result(start, sem.column_indices.len());
            }
        }
        b.end_if(found_block);

        b.close_cursor(table_cursor);
        b.halt(0);
        return b.finish();
    }

    let has_order_by = sem.staging_format.is_some();
    let mut result_count = sem.column_indices.len();
    if has_order_by {
        result_count += 1;
    }

    let staging_cursor = if let Some(format) = &sem.staging_format {
        Some(b.open_cursor(CursorContext::Ephemeral {
            format: format.clone(),
            allow_duplicates: true,
        })?)
    } else {
        None
    };

    let at_end = match &strategy {
        SeekStrategy::SeekScan { op, key, .. } => {
            let key_reg = compile_literal(&mut b, key)?;
            b.seek(table_cursor, key_reg, *op)?
        }
        _ => b.first(table_cursor)?,
    };
    let scan_forward = match &strategy {
        SeekStrategy::SeekScan { forward, .. } => *forward,
        _ => true,
    };

    let scan_loop = b.begin_while(at_end);
    {
        b.regs.push_scope();

        let where_gate = match &select.where_clause {
            Some(where_clause) => {
                let gate = compile_expr(&mut b, where_clause, table_cursor)?;
                Some(b.begin_if(gate))
            }
            None => None,
        };

        let row_start = b.regs.allocate_range(result_count)?;
        let offset = if has_order_by {
            let order_idx = sem
                .order_by_index
                .ok_or_else(|| eyre::eyre!("ORDER BY without a resolved column"))?;
            b.column_into(table_cursor, order_idx, row_start);
            1
        } else {
            0
        };
        for (i, col) in sem.column_indices.iter().enumerate() {
            b.column_into(table_cursor, *col, row_start + offset + i);
        }

        match staging_cursor {
            Some(staging) => b.insert_record(staging, row_start, result_count),
            None => b.result(row_start, result_count),
        }

        if let Some(gate) = where_gate {
            b.end_if(gate);
        }

        b.step(table_cursor, scan_forward, at_end);
        b.regs.pop_scope();
    }
    b.end_while(scan_loop);

    b.close_cursor(table_cursor);

    // drain the staging map in the requested direction
    if let Some(staging) = staging_cursor {
        let descending = select.order_by.as_ref().is_some_and(|o| o.desc);
        let at_end = if descending {
            b.last(staging)?
        } else {
            b.first(staging)?
        };

        let output_loop = b.begin_while(at_end);
        {
            b.regs.push_scope();
            let count = sem.column_indices.len();
            let start = b.columns(staging, 1, count)?;
            b.result(start, count);
            b.step(staging, !descending, at_end);
            b.regs.pop_scope();
        }
        b.end_while(output_loop);

        b.close_cursor(staging);
    }

    b.halt(0);
    b.finish()
}

// ---- INSERT -----------------------------------------------------------

fn compile_insert(insert: &InsertStmt, catalog: &mut Catalog) -> Result<Program> {
    let indices = insert
        .sem
        .as_ref()
        .ok_or_else(|| eyre::eyre!("INSERT missing semantic annotations"))?;
    let rel = catalog
        .get(&insert.table)
        .ok_or_else(|| eyre::eyre!("no such table: {}", insert.table))?;
    let column_types = rel.column_types();

    let mut b = ProgramBuilder::new();
    let cursor = b.open_cursor(table_context(catalog, &insert.table)?)?;

    // a full typed row: unspecified columns keep their type's zero
    let row_size = column_types.len();
    let row_start = b.regs.allocate_range(row_size)?;
    for (i, ty) in column_types.iter().enumerate() {
        b.load_into(row_start + i, TypedValue::zero(*ty));
    }
    for (value, col_idx) in insert.values.iter().zip(indices.iter()) {
        b.load_into(row_start + col_idx, literal_value(value)?);
    }

    b.insert_record(cursor, row_start, row_size);
    b.close_cursor(cursor);
    b.halt(0);
    b.finish()
}

// ---- UPDATE -----------------------------------------------------------

fn compile_update(update: &UpdateStmt, catalog: &mut Catalog) -> Result<Program> {
    let indices = update
        .sem
        .as_ref()
        .ok_or_else(|| eyre::eyre!("UPDATE missing semantic annotations"))?;
    let rel = catalog
        .get(&update.table)
        .ok_or_else(|| eyre::eyre!("no such table: {}", update.table))?;
    let row_size = rel.columns.len();

    let mut b = ProgramBuilder::new();
    let cursor = b.open_cursor(table_context(catalog, &update.table)?)?;
    let at_end = b.first(cursor)?;

    let scan_loop = b.begin_while(at_end);
    {
        b.regs.push_scope();

        let where_gate = match &update.where_clause {
            Some(where_clause) => {
                let gate = compile_expr(&mut b, where_clause, cursor)?;
                Some(b.begin_if(gate))
            }
            None => None,
        };

        // read the whole row, overwrite the assigned columns, write back
        let row_start = b.columns(cursor, 0, row_size)?;
        for ((_, value), col_idx) in update.assignments.iter().zip(indices.iter()) {
            b.load_into(row_start + col_idx, literal_value(value)?);
        }
        b.update_record(cursor, row_start);

        if let Some(gate) = where_gate {
            b.end_if(gate);
        }

        b.step(cursor, true, at_end);
        b.regs.pop_scope();
    }
    b.end_while(scan_loop);

    b.close_cursor(cursor);
    b.halt(0);
    b.finish()
}

// ---- DELETE -----------------------------------------------------------

fn compile_delete(delete: &DeleteStmt, catalog: &mut Catalog) -> Result<Program> {
    let mut b = ProgramBuilder::new();
    let cursor = b.open_cursor(table_context(catalog, &delete.table)?)?;
    let at_end = b.first(cursor)?;

    let scan_loop = b.begin_while(at_end);
    {
        b.regs.push_scope();

        let should_delete = match &delete.where_clause {
            Some(where_clause) => compile_expr(&mut b, where_clause, cursor)?,
            None => b.load(TypedValue::from_u32(1))?,
        };

        let mut delete_block = b.begin_if(should_delete);
        {
            let (_occurred, still_valid) = b.delete_record(cursor)?;

            // valid: the cursor already sits on the successor, so the
            // loop flag is exactly the validity signal. Invalid: the
            // deleted entry was the last one in order; restart from the
            // front to finish any earlier survivors.
            let mut valid_block = b.begin_if(still_valid);
            b.move_reg(still_valid, at_end);
            b.begin_else(&mut valid_block);
            b.rewind(cursor, false, at_end);
            b.end_if(valid_block);
        }
        b.begin_else(&mut delete_block);
        b.step(cursor, true, at_end);
        b.end_if(delete_block);

        b.regs.pop_scope();
    }
    b.end_while(scan_loop);

    b.close_cursor(cursor);
    b.halt(0);
    b.finish()
}

// ---- DDL --------------------------------------------------------------

/// Embedded function behind CREATE TABLE: the relation is already in
/// the catalog (the semantic pass put it there); give it a storage tree
/// and report the root page for the master catalog row.
fn vmfunc_create_relation(
    ctx: &mut FunctionContext<'_>,
    args: &[TypedValue],
) -> Result<Option<TypedValue>> {
    if args.len() != 1 {
        return Ok(None);
    }
    let name = args[0].as_str()?.to_string();
    let Some(rel) = ctx.catalog.get(&name) else {
        return Ok(None);
    };
    let format = rel.tuple_format()?;
    let tree = BTree::create(ctx.pager, format.key_type, format.record_size)?;
    let root_page = tree.root_page;
    ctx.catalog
        .get_mut(&name)
        .expect("relation just looked up")
        .tree = Some(tree);
    Ok(Some(TypedValue::from_u32(root_page)))
}

/// Embedded function behind DROP TABLE: frees every page of the
/// relation's tree and removes it from the catalog. The master catalog
/// row is deleted by the surrounding program.
fn vmfunc_drop_relation(
    ctx: &mut FunctionContext<'_>,
    args: &[TypedValue],
) -> Result<Option<TypedValue>> {
    if args.len() != 1 {
        return Ok(None);
    }
    let name = args[0].as_str()?.to_string();
    let Some(rel) = ctx.catalog.get(&name) else {
        return Ok(None);
    };
    if let Some(tree) = rel.tree {
        tree.clear(ctx.pager)?;
    }
    ctx.catalog.remove(&name);
    Ok(Some(TypedValue::from_u32(1)))
}

fn master_relation(catalog: &Catalog) -> Result<&Relation> {
    catalog
        .get(MASTER_CATALOG)
        .ok_or_else(|| eyre::eyre!("master catalog missing"))
}

fn compile_create_table(
    create: &CreateTableStmt,
    sql: &str,
    catalog: &mut Catalog,
) -> Result<Program> {
    ensure!(
        catalog.contains(&create.table),
        "CREATE TABLE not admitted by the semantic pass"
    );
    let mut b = ProgramBuilder::new();

    let name_reg = b.load(TypedValue::from_str(DataType::Char32, &create.table)?)?;
    let root_reg = b.call_function(vmfunc_create_relation, name_reg, 1)?;

    // the new table's row in the master catalog:
    // (id, name, tbl_name, root_page, sql)
    let master_ctx = table_context(catalog, MASTER_CATALOG)?;
    let master_cursor = b.open_cursor(master_ctx)?;

    let id = {
        let master = catalog
            .get_mut(MASTER_CATALOG)
            .ok_or_else(|| eyre::eyre!("master catalog missing"))?;
        let id = master.next_key;
        master.next_key += 1;
        id
    };

    let row_start = b.regs.allocate_range(5)?;
    b.load_into(row_start, TypedValue::from_u32(id));
    b.load_into(
        row_start + 1,
        TypedValue::from_str(DataType::Char32, &create.table)?,
    );
    b.load_into(
        row_start + 2,
        TypedValue::from_str(DataType::Char32, &create.table)?,
    );
    b.move_reg(root_reg, row_start + 3);
    b.load_into(row_start + 4, TypedValue::from_str(DataType::Char256, sql)?);

    b.insert_record(master_cursor, row_start, 5);
    b.close_cursor(master_cursor);
    b.halt(0);
    b.finish()
}

fn compile_drop_table(drop: &DropTableStmt, catalog: &mut Catalog) -> Result<Program> {
    master_relation(catalog)?;
    let mut b = ProgramBuilder::new();

    let name_reg = b.load(TypedValue::from_str(DataType::Char32, &drop.table)?)?;
    b.call_function(vmfunc_drop_relation, name_reg, 1)?;

    // remove the table's row from the master catalog (match on name)
    let master_cursor = b.open_cursor(table_context(catalog, MASTER_CATALOG)?)?;
    let at_end = b.first(master_cursor)?;

    let scan_loop = b.begin_while(at_end);
    {
        b.regs.push_scope();

        let entry_name = b.column(master_cursor, 1)?;
        let matches = b.eq(entry_name, name_reg)?;

        let matched = b.begin_if(matches);
        {
            b.delete_record(master_cursor)?;
            b.goto_label("done");
        }
        b.end_if(matched);

        b.step(master_cursor, true, at_end);
        b.regs.pop_scope();
    }
    b.end_while(scan_loop);

    b.label("done");
    b.close_cursor(master_cursor);
    b.halt(0);
    b.finish()
}
