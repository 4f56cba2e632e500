//! # Semantic Pass
//!
//! Resolves names and types against the catalog and annotates the AST
//! in place. After this pass every column node carries its index and
//! type, every literal carries the storage type of the column it meets,
//! and a SELECT carries its projection indices plus (for ORDER BY) the
//! staging map's tuple format. The compiler can then lower without ever
//! consulting the catalog for a name.
//!
//! CREATE TABLE is special: admitting it inserts the new relation into
//! the catalog (without a storage tree yet) so that the VM's
//! create-relation callback can find it. If the statement later fails,
//! the driver reloads the catalog from the master table, undoing the
//! insertion.

use eyre::{bail, ensure, Result};
use smallvec::SmallVec;

use super::ast::{
    Expr, ParsedStatement, Projection, SelectSem, SelectStmt, Statement,
};
use crate::config::MASTER_CATALOG;
use crate::schema::{Catalog, Column, Relation, TupleFormat};
use crate::types::DataType;

/// Analyzes one parsed statement, annotating it in place.
pub fn analyze(parsed: &mut ParsedStatement, catalog: &mut Catalog) -> Result<()> {
    match &mut parsed.stmt {
        Statement::Select(select) => analyze_select(select, catalog),
        Statement::Insert(insert) => {
            let rel = relation(catalog, &insert.table)?;
            ensure!(
                insert.columns.len() == insert.values.len(),
                "INSERT provides {} columns but {} values",
                insert.columns.len(),
                insert.values.len()
            );
            let mut indices: SmallVec<[usize; 8]> = SmallVec::new();
            for (name, value) in insert.columns.iter().zip(insert.values.iter_mut()) {
                let idx = column_index(rel, name)?;
                ensure!(
                    !indices.contains(&idx),
                    "column '{name}' appears twice in INSERT"
                );
                ensure!(
                    value.is_literal(),
                    "INSERT values must be literals"
                );
                type_literal(value, rel.columns[idx].ty)?;
                indices.push(idx);
            }
            insert.sem = Some(indices);
            Ok(())
        }
        Statement::Update(update) => {
            let rel = relation(catalog, &update.table)?.clone();
            let mut indices: SmallVec<[usize; 8]> = SmallVec::new();
            for (name, value) in update.assignments.iter_mut() {
                let idx = column_index(&rel, name)?;
                ensure!(
                    idx != 0,
                    "cannot update the primary key column '{name}'"
                );
                ensure!(value.is_literal(), "UPDATE values must be literals");
                type_literal(value, rel.columns[idx].ty)?;
                indices.push(idx);
            }
            if let Some(where_clause) = &mut update.where_clause {
                resolve_expr(where_clause, &rel)?;
            }
            update.sem = Some(indices);
            Ok(())
        }
        Statement::Delete(delete) => {
            let rel = relation(catalog, &delete.table)?.clone();
            if let Some(where_clause) = &mut delete.where_clause {
                resolve_expr(where_clause, &rel)?;
            }
            Ok(())
        }
        Statement::CreateTable(create) => {
            ensure!(
                !catalog.contains(&create.table),
                "table '{}' already exists",
                create.table
            );
            ensure!(!create.columns.is_empty(), "a table needs at least one column");
            ensure!(
                create.table.len() < 32,
                "table name '{}' is too long",
                create.table
            );
            ensure!(
                parsed.sql.len() < 256,
                "CREATE TABLE statement text exceeds the catalog's 255-byte limit"
            );
            for (i, (name, _)) in create.columns.iter().enumerate() {
                ensure!(
                    !create.columns[..i].iter().any(|(n, _)| n == name),
                    "duplicate column '{name}'"
                );
            }

            let columns: Vec<Column> = create
                .columns
                .iter()
                .map(|(name, ty)| Column {
                    name: name.clone(),
                    ty: *ty,
                })
                .collect();
            // admitted now so the VM's create callback can find it; an
            // aborted statement undoes this via catalog reload
            catalog.insert(Relation::new(create.table.clone(), columns));
            Ok(())
        }
        Statement::DropTable(drop) => {
            ensure!(
                drop.table != MASTER_CATALOG,
                "cannot drop the master catalog"
            );
            relation(catalog, &drop.table)?;
            Ok(())
        }
        Statement::Begin | Statement::Commit | Statement::Rollback => Ok(()),
    }
}

fn relation<'c>(catalog: &'c Catalog, table: &str) -> Result<&'c Relation> {
    catalog
        .get(table)
        .ok_or_else(|| eyre::eyre!("no such table: {table}"))
}

fn column_index(rel: &Relation, name: &str) -> Result<usize> {
    rel.column_index(name)
        .ok_or_else(|| eyre::eyre!("no such column: {}.{}", rel.name, name))
}

fn analyze_select(select: &mut SelectStmt, catalog: &mut Catalog) -> Result<()> {
    let rel = relation(catalog, &select.table)?.clone();

    let mut column_indices: SmallVec<[usize; 8]> = SmallVec::new();
    match &select.projection {
        Projection::Star => {
            column_indices.extend(0..rel.columns.len());
        }
        Projection::Columns(names) => {
            for name in names {
                column_indices.push(column_index(&rel, name)?);
            }
        }
    }
    let column_types: SmallVec<[DataType; 8]> = column_indices
        .iter()
        .map(|&i| rel.columns[i].ty)
        .collect();

    if let Some(where_clause) = &mut select.where_clause {
        resolve_expr(where_clause, &rel)?;
    }

    let (order_by_index, staging_format) = match &select.order_by {
        Some(order) => {
            let idx = column_index(&rel, &order.column)?;
            let mut staging_columns: Vec<DataType> = vec![rel.columns[idx].ty];
            staging_columns.extend(column_types.iter().copied());
            (
                Some(idx),
                Some(TupleFormat::from_columns(&staging_columns)?),
            )
        }
        None => (None, None),
    };

    select.sem = Some(SelectSem {
        column_indices,
        column_types,
        order_by_index,
        staging_format,
    });
    Ok(())
}

/// Resolves columns and types literals inside a predicate expression.
fn resolve_expr(expr: &mut Expr, rel: &Relation) -> Result<()> {
    match expr {
        Expr::Column { name, sem } => {
            let idx = column_index(rel, name)?;
            *sem = Some((idx, rel.columns[idx].ty));
            Ok(())
        }
        Expr::IntLiteral { sem_ty, .. } => {
            // a literal with no column context defaults to U32
            if sem_ty.is_none() {
                *sem_ty = Some(DataType::U32);
            }
            Ok(())
        }
        Expr::StrLiteral { value, sem_ty } => {
            if sem_ty.is_none() {
                *sem_ty = Some(
                    DataType::char_for_len(value.len())
                        .ok_or_else(|| eyre::eyre!("string literal too long"))?,
                );
            }
            Ok(())
        }
        Expr::Binary { op, left, right } => {
            if op.is_comparison() {
                // type each literal from the column on the other side
                // before the general resolution defaults it
                if let Expr::Column { name, .. } = left.as_ref() {
                    let ty = rel.columns[column_index(rel, name)?].ty;
                    if right.is_literal() {
                        type_literal(right, ty)?;
                    }
                }
                if let Expr::Column { name, .. } = right.as_ref() {
                    let ty = rel.columns[column_index(rel, name)?].ty;
                    if left.is_literal() {
                        type_literal(left, ty)?;
                    }
                }
            }
            resolve_expr(left, rel)?;
            resolve_expr(right, rel)?;
            if op.is_comparison() {
                check_comparable(left, right)?;
            }
            Ok(())
        }
        Expr::Not { operand } => resolve_expr(operand, rel),
    }
}

/// Assigns a literal the storage type of the column it meets, checking
/// that the literal can live in that type.
fn type_literal(expr: &mut Expr, ty: DataType) -> Result<()> {
    match expr {
        Expr::IntLiteral { value, sem_ty } => {
            ensure!(
                ty.is_numeric(),
                "integer literal {value} compared against {} column",
                ty.name()
            );
            *sem_ty = Some(ty);
            Ok(())
        }
        Expr::StrLiteral { value, sem_ty } => {
            ensure!(
                ty.is_char(),
                "string literal '{value}' compared against {} column",
                ty.name()
            );
            ensure!(
                value.len() < ty.fixed_size(),
                "string '{value}' does not fit {}",
                ty.name()
            );
            *sem_ty = Some(ty);
            Ok(())
        }
        _ => bail!("expected a literal"),
    }
}

fn expr_class(expr: &Expr) -> Option<bool> {
    // Some(true) = character, Some(false) = numeric
    match expr {
        Expr::Column { sem, .. } => sem.map(|(_, ty)| ty.is_char()),
        Expr::IntLiteral { .. } => Some(false),
        Expr::StrLiteral { .. } => Some(true),
        _ => None,
    }
}

fn check_comparable(left: &Expr, right: &Expr) -> Result<()> {
    if let (Some(a), Some(b)) = (expr_class(left), expr_class(right)) {
        ensure!(
            a == b,
            "cannot compare a {} with a {}",
            if a { "string" } else { "number" },
            if b { "string" } else { "number" }
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::parse_sql;

    fn catalog_with_users() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.insert(Relation::new(
            "users",
            vec![
                Column { name: "user_id".into(), ty: DataType::U32 },
                Column { name: "username".into(), ty: DataType::Char32 },
                Column { name: "age".into(), ty: DataType::U32 },
            ],
        ));
        catalog
    }

    fn analyzed(sql: &str, catalog: &mut Catalog) -> ParsedStatement {
        let mut stmts = parse_sql(sql).unwrap();
        let mut parsed = stmts.pop().unwrap();
        analyze(&mut parsed, catalog).unwrap();
        parsed
    }

    #[test]
    fn select_star_projects_every_column() {
        let mut catalog = catalog_with_users();
        let parsed = analyzed("SELECT * FROM users", &mut catalog);
        let Statement::Select(select) = parsed.stmt else { panic!() };
        let sem = select.sem.unwrap();
        assert_eq!(sem.column_indices.as_slice(), &[0, 1, 2]);
        assert_eq!(
            sem.column_types.as_slice(),
            &[DataType::U32, DataType::Char32, DataType::U32]
        );
    }

    #[test]
    fn where_literal_takes_column_type() {
        let mut catalog = catalog_with_users();
        let parsed = analyzed("SELECT * FROM users WHERE username = 'bob'", &mut catalog);
        let Statement::Select(select) = parsed.stmt else { panic!() };
        let Some(Expr::Binary { left, right, .. }) = select.where_clause else { panic!() };
        assert_eq!(
            *left,
            Expr::Column {
                name: "username".into(),
                sem: Some((1, DataType::Char32))
            }
        );
        assert!(matches!(
            *right,
            Expr::StrLiteral {
                sem_ty: Some(DataType::Char32),
                ..
            }
        ));
    }

    #[test]
    fn order_by_builds_staging_format() {
        let mut catalog = catalog_with_users();
        let parsed = analyzed(
            "SELECT username FROM users ORDER BY age DESC",
            &mut catalog,
        );
        let Statement::Select(select) = parsed.stmt else { panic!() };
        let sem = select.sem.unwrap();
        assert_eq!(sem.order_by_index, Some(2));
        let format = sem.staging_format.unwrap();
        assert_eq!(format.key_type, DataType::U32);
        assert_eq!(
            format.columns.as_slice(),
            &[DataType::U32, DataType::Char32]
        );
    }

    #[test]
    fn insert_maps_values_to_column_indices() {
        let mut catalog = catalog_with_users();
        let parsed = analyzed(
            "INSERT INTO users (age, user_id) VALUES (30, 1)",
            &mut catalog,
        );
        let Statement::Insert(insert) = parsed.stmt else { panic!() };
        assert_eq!(insert.sem.unwrap().as_slice(), &[2, 0]);
        assert!(matches!(
            insert.values[0],
            Expr::IntLiteral {
                sem_ty: Some(DataType::U32),
                ..
            }
        ));
    }

    #[test]
    fn unknown_names_are_rejected() {
        let mut catalog = catalog_with_users();
        let mut stmts = parse_sql("SELECT * FROM nope").unwrap();
        assert!(analyze(&mut stmts[0], &mut catalog).is_err());

        let mut stmts = parse_sql("SELECT missing FROM users").unwrap();
        assert!(analyze(&mut stmts[0], &mut catalog).is_err());
    }

    #[test]
    fn type_mismatches_are_rejected() {
        let mut catalog = catalog_with_users();
        let mut stmts = parse_sql("SELECT * FROM users WHERE age = 'old'").unwrap();
        assert!(analyze(&mut stmts[0], &mut catalog).is_err());

        let mut stmts = parse_sql("SELECT * FROM users WHERE username = 3").unwrap();
        assert!(analyze(&mut stmts[0], &mut catalog).is_err());
    }

    #[test]
    fn update_of_primary_key_is_rejected() {
        let mut catalog = catalog_with_users();
        let mut stmts = parse_sql("UPDATE users SET user_id = 9").unwrap();
        assert!(analyze(&mut stmts[0], &mut catalog).is_err());
    }

    #[test]
    fn create_table_admits_relation_into_catalog() {
        let mut catalog = catalog_with_users();
        analyzed("CREATE TABLE pets (pet_id INT, name TEXT)", &mut catalog);
        let rel = catalog.get("pets").unwrap();
        assert_eq!(rel.columns.len(), 2);
        assert!(rel.tree.is_none());

        // second create of the same table fails
        let mut stmts = parse_sql("CREATE TABLE pets (pet_id INT)").unwrap();
        assert!(analyze(&mut stmts[0], &mut catalog).is_err());
    }

    #[test]
    fn drop_of_master_catalog_is_rejected() {
        let mut catalog = catalog_with_users();
        catalog.insert(Relation::new(MASTER_CATALOG, Catalog::master_columns()));
        let mut stmts = parse_sql("DROP TABLE master_catalog").unwrap();
        assert!(analyze(&mut stmts[0], &mut catalog).is_err());
    }
}
