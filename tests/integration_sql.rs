//! End-to-end SQL scenarios through the full pipeline: parse, semantic
//! analysis, bytecode compilation and VM execution against a real
//! on-disk database.

use lumadb::compiler::compile_program;
use lumadb::database::Database;
use lumadb::sql::{analyze, parse_sql};
use lumadb::types::TypedValue;
use lumadb::vm::Instruction;
use lumadb::CompareOp;
use tempfile::tempdir;

fn run(db: &mut Database, sql: &str) {
    let mut sink = |_: &[TypedValue]| {};
    db.execute(sql, &mut sink).unwrap();
}

fn collect(db: &mut Database, sql: &str) -> Vec<Vec<TypedValue>> {
    let mut rows = Vec::new();
    let mut sink = |row: &[TypedValue]| rows.push(row.to_vec());
    db.execute(sql, &mut sink).unwrap();
    rows
}

fn setup_users(db: &mut Database) {
    run(
        db,
        "CREATE TABLE users (user_id INT, username TEXT, email TEXT, age INT, city TEXT);",
    );
    run(
        db,
        "INSERT INTO users (user_id, username, email, age, city) \
         VALUES (1, 'a', 'a@x', 25, 'NY');",
    );
    run(
        db,
        "INSERT INTO users (user_id, username, email, age, city) \
         VALUES (2, 'b', 'b@x', 35, 'SF');",
    );
}

#[test]
fn create_insert_select_with_predicate() {
    let dir = tempdir().unwrap();
    let mut db = Database::open(&dir.path().join("t.db")).unwrap();
    setup_users(&mut db);

    let rows = collect(&mut db, "SELECT username, age FROM users WHERE age > 30;");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0].as_str().unwrap(), "b");
    assert_eq!(rows[0][1].as_u32().unwrap(), 35);
}

#[test]
fn primary_key_direct_lookup_row_and_program_shape() {
    let dir = tempdir().unwrap();
    let mut db = Database::open(&dir.path().join("t.db")).unwrap();
    setup_users(&mut db);

    let rows = collect(&mut db, "SELECT * FROM users WHERE user_id = 2;");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0].as_u32().unwrap(), 2);
    assert_eq!(rows[0][1].as_str().unwrap(), "b");
    assert_eq!(rows[0][2].as_str().unwrap(), "b@x");
    assert_eq!(rows[0][3].as_u32().unwrap(), 35);
    assert_eq!(rows[0][4].as_str().unwrap(), "SF");

    // the compiled program must be a single Seek EQ with no scan loop
    let mut stmts = parse_sql("SELECT * FROM users WHERE user_id = 2;").unwrap();
    let parsed = &mut stmts[0];
    analyze(parsed, db.catalog_mut()).unwrap();
    let program = compile_program(parsed, db.catalog_mut()).unwrap();

    let seeks = program
        .instructions
        .iter()
        .filter(|i| matches!(i, Instruction::Seek { op: CompareOp::Eq, .. }))
        .count();
    let scans = program
        .instructions
        .iter()
        .filter(|i| matches!(i, Instruction::Rewind { .. } | Instruction::Step { .. }))
        .count();
    assert_eq!(seeks, 1);
    assert_eq!(scans, 0);
}

#[test]
fn primary_key_range_scans_forward_from_seek_point() {
    let dir = tempdir().unwrap();
    let mut db = Database::open(&dir.path().join("t.db")).unwrap();
    run(&mut db, "CREATE TABLE users (user_id INT, age INT);");
    for id in 1..=10u32 {
        run(
            &mut db,
            &format!("INSERT INTO users (user_id, age) VALUES ({id}, {});", 20 + id),
        );
    }

    let rows = collect(&mut db, "SELECT user_id FROM users WHERE user_id >= 7;");
    let ids: Vec<u32> = rows.iter().map(|r| r[0].as_u32().unwrap()).collect();
    assert_eq!(ids, vec![7, 8, 9, 10]);
}

#[test]
fn primary_key_upper_bound_scans_backward() {
    let dir = tempdir().unwrap();
    let mut db = Database::open(&dir.path().join("t.db")).unwrap();
    run(&mut db, "CREATE TABLE users (user_id INT, age INT);");
    for id in 1..=10u32 {
        run(
            &mut db,
            &format!("INSERT INTO users (user_id, age) VALUES ({id}, 0);"),
        );
    }

    // rightmost satisfying entry first, then walking backward
    let rows = collect(&mut db, "SELECT user_id FROM users WHERE user_id <= 4;");
    let ids: Vec<u32> = rows.iter().map(|r| r[0].as_u32().unwrap()).collect();
    assert_eq!(ids, vec![4, 3, 2, 1]);
}

#[test]
fn order_by_desc_returns_reverse_name_order() {
    let dir = tempdir().unwrap();
    let mut db = Database::open(&dir.path().join("t.db")).unwrap();
    run(&mut db, "CREATE TABLE users (user_id INT, name TEXT, age INT);");
    for (id, name, age) in [(1, "C", 42), (2, "A", 35), (3, "B", 45), (4, "D", 31)] {
        run(
            &mut db,
            &format!("INSERT INTO users (user_id, name, age) VALUES ({id}, '{name}', {age});"),
        );
    }

    let rows = collect(&mut db, "SELECT name FROM users ORDER BY name DESC;");
    let names: Vec<String> = rows
        .iter()
        .map(|r| r[0].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["D", "C", "B", "A"]);

    let rows = collect(&mut db, "SELECT name FROM users ORDER BY name ASC;");
    let names: Vec<String> = rows
        .iter()
        .map(|r| r[0].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["A", "B", "C", "D"]);
}

#[test]
fn rollback_leaves_database_byte_identical() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.db");
    let mut db = Database::open(&path).unwrap();
    setup_users(&mut db);

    let before = std::fs::read(&path).unwrap();

    run(&mut db, "BEGIN;");
    run(
        &mut db,
        "INSERT INTO users (user_id, username, email, age, city) \
         VALUES (100, 'x', 'x@x', 99, 'LA');",
    );
    // visible inside the transaction
    let rows = collect(&mut db, "SELECT * FROM users WHERE user_id = 100;");
    assert_eq!(rows.len(), 1);

    run(&mut db, "ROLLBACK;");
    let rows = collect(&mut db, "SELECT * FROM users WHERE user_id = 100;");
    assert_eq!(rows.len(), 0);

    let after = std::fs::read(&path).unwrap();
    assert_eq!(before, after, "file must match its pre-BEGIN bytes");
}

#[test]
fn committed_transaction_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.db");
    {
        let mut db = Database::open(&path).unwrap();
        setup_users(&mut db);
        run(&mut db, "BEGIN;");
        run(
            &mut db,
            "INSERT INTO users (user_id, username, email, age, city) \
             VALUES (3, 'c', 'c@x', 40, 'CH');",
        );
        run(&mut db, "COMMIT;");
        db.close().unwrap();
    }

    let mut db = Database::open(&path).unwrap();
    let rows = collect(&mut db, "SELECT username FROM users WHERE user_id = 3;");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0].as_str().unwrap(), "c");
}

#[test]
fn split_stress_builds_a_deep_tree_and_scans_in_order() {
    let dir = tempdir().unwrap();
    let mut db = Database::open(&dir.path().join("t.db")).unwrap();
    // wide rows (three CHAR(255) columns) shrink leaf fanout so the
    // tree goes past two levels within a few hundred rows
    run(
        &mut db,
        "CREATE TABLE blobs (name TEXT, a CHAR(255), b CHAR(255), c CHAR(255));",
    );

    let n = 700u32;
    run(&mut db, "BEGIN;");
    for i in 1..=n {
        run(
            &mut db,
            &format!("INSERT INTO blobs (name, a) VALUES ('key-{i:06}', 'payload');"),
        );
    }
    run(&mut db, "COMMIT;");

    assert!(db.tree_depth("blobs").unwrap() >= 3);

    let rows = collect(&mut db, "SELECT name FROM blobs;");
    let expected: Vec<String> = (1..=n).map(|i| format!("key-{i:06}")).collect();
    let got: Vec<String> = rows
        .iter()
        .map(|r| r[0].as_str().unwrap().to_string())
        .collect();
    assert_eq!(got, expected);

    let rows = collect(&mut db, "SELECT name FROM blobs ORDER BY name DESC;");
    let got: Vec<String> = rows
        .iter()
        .map(|r| r[0].as_str().unwrap().to_string())
        .collect();
    let reversed: Vec<String> = expected.into_iter().rev().collect();
    assert_eq!(got, reversed);
}

#[test]
fn update_rewrites_matching_rows() {
    let dir = tempdir().unwrap();
    let mut db = Database::open(&dir.path().join("t.db")).unwrap();
    setup_users(&mut db);

    run(&mut db, "UPDATE users SET city = 'TX' WHERE age > 30;");

    let rows = collect(&mut db, "SELECT city FROM users WHERE user_id = 2;");
    assert_eq!(rows[0][0].as_str().unwrap(), "TX");
    let rows = collect(&mut db, "SELECT city FROM users WHERE user_id = 1;");
    assert_eq!(rows[0][0].as_str().unwrap(), "NY");
}

#[test]
fn delete_with_predicate_removes_only_matches() {
    let dir = tempdir().unwrap();
    let mut db = Database::open(&dir.path().join("t.db")).unwrap();
    run(&mut db, "CREATE TABLE t (id INT, keep INT);");
    for id in 1..=20u32 {
        run(
            &mut db,
            &format!("INSERT INTO t (id, keep) VALUES ({id}, {});", id % 2),
        );
    }

    run(&mut db, "DELETE FROM t WHERE keep = 0;");

    let rows = collect(&mut db, "SELECT id FROM t;");
    let ids: Vec<u32> = rows.iter().map(|r| r[0].as_u32().unwrap()).collect();
    let expected: Vec<u32> = (1..=20).filter(|i| i % 2 == 1).collect();
    assert_eq!(ids, expected);
}

#[test]
fn delete_without_predicate_empties_table() {
    let dir = tempdir().unwrap();
    let mut db = Database::open(&dir.path().join("t.db")).unwrap();
    run(&mut db, "CREATE TABLE t (id INT);");
    for id in 1..=50u32 {
        run(&mut db, &format!("INSERT INTO t (id) VALUES ({id});"));
    }

    run(&mut db, "DELETE FROM t;");
    assert_eq!(collect(&mut db, "SELECT id FROM t;").len(), 0);

    // the table still works afterwards
    run(&mut db, "INSERT INTO t (id) VALUES (7);");
    assert_eq!(collect(&mut db, "SELECT id FROM t;").len(), 1);
}

#[test]
fn upsert_semantics_on_duplicate_primary_key() {
    let dir = tempdir().unwrap();
    let mut db = Database::open(&dir.path().join("t.db")).unwrap();
    run(&mut db, "CREATE TABLE t (id INT, v INT);");
    run(&mut db, "INSERT INTO t (id, v) VALUES (1, 10);");
    run(&mut db, "INSERT INTO t (id, v) VALUES (1, 20);");

    let rows = collect(&mut db, "SELECT v FROM t;");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0].as_u32().unwrap(), 20);
}

#[test]
fn where_and_strips_pk_but_keeps_residual_predicate() {
    let dir = tempdir().unwrap();
    let mut db = Database::open(&dir.path().join("t.db")).unwrap();
    run(&mut db, "CREATE TABLE t (id INT, v INT);");
    for id in 1..=10u32 {
        run(
            &mut db,
            &format!("INSERT INTO t (id, v) VALUES ({id}, {});", id * 10),
        );
    }

    // pk bound handled by seek, v-predicate evaluated per row
    let rows = collect(&mut db, "SELECT id FROM t WHERE id >= 4 AND v <= 70;");
    let ids: Vec<u32> = rows.iter().map(|r| r[0].as_u32().unwrap()).collect();
    assert_eq!(ids, vec![4, 5, 6, 7]);

    // equality under AND: seek plus residual check that fails
    let rows = collect(&mut db, "SELECT id FROM t WHERE id = 4 AND v = 0;");
    assert_eq!(rows.len(), 0);
}
