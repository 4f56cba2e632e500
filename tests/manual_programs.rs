//! The compiler only emits single-table programs, but the VM's
//! instruction set is general enough for joins and aggregation. These
//! tests hand-assemble such programs with the `ProgramBuilder` — a
//! nested-loop join and a composite-key GROUP BY — and run them against
//! real on-disk tables.

use bumpalo::Bump;
use eyre::Result;
use lumadb::btree::{BTree, BtCursor, CompareOp};
use lumadb::compiler::ProgramBuilder;
use lumadb::schema::{Catalog, TupleFormat};
use lumadb::storage::Pager;
use lumadb::types::{DataType, TypedValue};
use lumadb::vm::{ArithOp, CursorContext, ExecOutcome, Vm};
use tempfile::tempdir;

struct Fixture {
    _dir: tempfile::TempDir,
    pager: Pager,
    catalog: Catalog,
    users: CursorContext,
    orders: CursorContext,
}

/// users(id, name), orders(order_id, user_id, region, amount)
fn fixture() -> Result<Fixture> {
    let dir = tempdir().unwrap();
    let mut pager = Pager::open(&dir.path().join("t.db"))?;

    let users_format = TupleFormat::from_columns(&[DataType::U32, DataType::Char8])?;
    let orders_format = TupleFormat::from_columns(&[
        DataType::U32,
        DataType::U32,
        DataType::U32,
        DataType::U32,
    ])?;

    pager.begin_transaction()?;
    let users_tree = BTree::create(&mut pager, users_format.key_type, users_format.record_size)?;
    let orders_tree =
        BTree::create(&mut pager, orders_format.key_type, orders_format.record_size)?;

    let mut cursor = BtCursor::new(users_tree);
    for (id, name) in [(1u32, "ann"), (2, "bob")] {
        let mut record = vec![0u8; users_format.record_size];
        record[..name.len()].copy_from_slice(name.as_bytes());
        cursor.insert(&mut pager, &id.to_le_bytes(), &record)?;
    }

    let mut cursor = BtCursor::new(orders_tree);
    for (order_id, user_id, region, amount) in
        [(10u32, 1u32, 1u32, 5u32), (11, 1, 1, 7), (12, 1, 2, 3), (13, 2, 1, 4)]
    {
        let mut record = vec![0u8; orders_format.record_size];
        record[0..4].copy_from_slice(&user_id.to_le_bytes());
        record[4..8].copy_from_slice(&region.to_le_bytes());
        record[8..12].copy_from_slice(&amount.to_le_bytes());
        cursor.insert(&mut pager, &order_id.to_le_bytes(), &record)?;
    }
    pager.commit()?;

    Ok(Fixture {
        _dir: dir,
        pager,
        catalog: Catalog::new(),
        users: CursorContext::BTree {
            tree: users_tree,
            format: users_format,
        },
        orders: CursorContext::BTree {
            tree: orders_tree,
            format: orders_format,
        },
    })
}

fn execute(fx: &mut Fixture, program: &lumadb::vm::Program) -> Vec<Vec<TypedValue>> {
    let arena = Bump::new();
    let mut rows: Vec<Vec<TypedValue>> = Vec::new();
    let mut sink = |row: &[TypedValue]| rows.push(row.to_vec());
    let outcome = {
        let mut vm = Vm::new(&mut fx.pager, &mut fx.catalog, &arena, &mut sink);
        vm.execute(program).unwrap()
    };
    assert_eq!(outcome, ExecOutcome::Ok);
    rows
}

#[test]
fn nested_loop_join() {
    let mut fx = fixture().unwrap();

    let mut b = ProgramBuilder::new();
    let users = b.open_cursor(fx.users.clone()).unwrap();
    let orders = b.open_cursor(fx.orders.clone()).unwrap();

    // for each user, rescan orders and emit (name, amount) on key match
    let outer_valid = b.first(users).unwrap();
    let outer = b.begin_while(outer_valid);
    {
        b.regs.push_scope();
        let user_id = b.column(users, 0).unwrap();
        let name = b.column(users, 1).unwrap();

        let inner_valid = b.first(orders).unwrap();
        let inner = b.begin_while(inner_valid);
        {
            b.regs.push_scope();
            let order_user = b.column(orders, 1).unwrap();
            let matches = b.eq(user_id, order_user).unwrap();

            let matched = b.begin_if(matches);
            {
                let out = b.regs.allocate_range(2).unwrap();
                b.move_reg(name, out);
                b.column_into(orders, 3, out + 1);
                b.result(out, 2);
            }
            b.end_if(matched);

            b.step(orders, true, inner_valid);
            b.regs.pop_scope();
        }
        b.end_while(inner);

        b.step(users, true, outer_valid);
        b.regs.pop_scope();
    }
    b.end_while(outer);

    b.close_cursor(users);
    b.close_cursor(orders);
    b.halt(0);
    let program = b.finish().unwrap();

    let rows = execute(&mut fx, &program);
    let got: Vec<(String, u32)> = rows
        .iter()
        .map(|r| (r[0].as_str().unwrap().to_string(), r[1].as_u32().unwrap()))
        .collect();
    assert_eq!(
        got,
        vec![
            ("ann".into(), 5),
            ("ann".into(), 7),
            ("ann".into(), 3),
            ("bob".into(), 4)
        ]
    );
}

#[test]
fn group_by_composite_key_aggregation() {
    let mut fx = fixture().unwrap();

    // SUM(amount) grouped by (user_id, region), staged in the ephemeral
    // map under a Pack2 composite key
    let staging_format = TupleFormat::from_columns(&[DataType::Pair, DataType::U32]).unwrap();

    let mut b = ProgramBuilder::new();
    let orders = b.open_cursor(fx.orders.clone()).unwrap();
    let groups = b
        .open_cursor(CursorContext::Ephemeral {
            format: staging_format,
            allow_duplicates: false,
        })
        .unwrap();

    let valid = b.first(orders).unwrap();
    let scan = b.begin_while(valid);
    {
        b.regs.push_scope();
        let user_id = b.column(orders, 1).unwrap();
        let region = b.column(orders, 2).unwrap();
        let amount = b.column(orders, 3).unwrap();
        let key = b.pack2(user_id, region).unwrap();

        let found = b.seek(groups, key, CompareOp::Eq).unwrap();
        let mut existing = b.begin_if(found);
        {
            // accumulate into the group's running sum
            let current = b.column(groups, 1).unwrap();
            let sum = b.arithmetic(current, amount, ArithOp::Add).unwrap();
            let row = b.regs.allocate_range(2).unwrap();
            b.move_reg(key, row);
            b.move_reg(sum, row + 1);
            b.update_record(groups, row);
        }
        b.begin_else(&mut existing);
        {
            let row = b.regs.allocate_range(2).unwrap();
            b.move_reg(key, row);
            b.move_reg(amount, row + 1);
            b.insert_record(groups, row, 2);
        }
        b.end_if(existing);

        b.step(orders, true, valid);
        b.regs.pop_scope();
    }
    b.end_while(scan);
    b.close_cursor(orders);

    // drain the groups in composite-key order
    let gvalid = b.first(groups).unwrap();
    let drain = b.begin_while(gvalid);
    {
        b.regs.push_scope();
        let key = b.column(groups, 0).unwrap();
        let parts = b.unpack2(key).unwrap();
        let sum = b.column(groups, 1).unwrap();

        let out = b.regs.allocate_range(3).unwrap();
        b.move_reg(parts, out);
        b.move_reg(parts + 1, out + 1);
        b.move_reg(sum, out + 2);
        b.result(out, 3);

        b.step(groups, true, gvalid);
        b.regs.pop_scope();
    }
    b.end_while(drain);
    b.close_cursor(groups);
    b.halt(0);
    let program = b.finish().unwrap();

    let rows = execute(&mut fx, &program);
    let got: Vec<(u32, u32, u32)> = rows
        .iter()
        .map(|r| {
            (
                r[0].as_u32().unwrap(),
                r[1].as_u32().unwrap(),
                r[2].as_u32().unwrap(),
            )
        })
        .collect();
    assert_eq!(got, vec![(1, 1, 12), (1, 2, 3), (2, 1, 4)]);
}
