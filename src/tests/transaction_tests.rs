use crate::catalog::{Column, DataType, Schema, SchemaRef};
use crate::execution::physical_plan::{
    PhysicalDelete, PhysicalInsert, PhysicalPlan, PhysicalSeqScan, PhysicalUpdate, PhysicalValues,
};
use crate::execution::{ExecutionContext, VolcanoExecutor};
use crate::expression::Expr;
use crate::storage::tuple::Tuple;
use crate::tests::{test_db, TestDb};
use crate::transaction::{IsolationLevel, TransactionState};
use crate::utils::scalar::ScalarValue;
use std::sync::Arc;

fn execute(plan: &PhysicalPlan, context: &mut ExecutionContext) -> Vec<Tuple> {
    plan.init(context).unwrap();
    let mut out = vec![];
    while let Some((tuple, _)) = plan.next(context).unwrap() {
        out.push(tuple);
    }
    out
}

fn items_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Column::new("id", DataType::Int64, false),
        Column::new("v", DataType::Int64, false),
    ]))
}

fn seed(db: &TestDb, rows: &[(i64, i64)]) {
    let schema = items_schema();
    db.catalog.create_table("items", schema.clone()).unwrap();
    db.catalog.create_index("items_id_idx", "items", vec![0]).unwrap();

    let values: Vec<Vec<ScalarValue>> = rows
        .iter()
        .map(|(id, v)| vec![(*id).into(), (*v).into()])
        .collect();
    let insert = PhysicalPlan::Insert(PhysicalInsert::new(
        "items",
        Arc::new(PhysicalPlan::Values(PhysicalValues::new(schema, values))),
    ));
    let txn = db.txn_manager.begin(IsolationLevel::RepeatableRead);
    let mut context = ExecutionContext::new(&db.catalog, &db.txn_manager, txn.clone());
    execute(&insert, &mut context);
    db.txn_manager.commit(&txn).unwrap();
}

fn scan_rows(db: &TestDb) -> Vec<Vec<ScalarValue>> {
    let scan = PhysicalPlan::SeqScan(PhysicalSeqScan::new("items", items_schema()));
    let txn = db.txn_manager.begin(IsolationLevel::ReadCommitted);
    let mut context = ExecutionContext::new(&db.catalog, &db.txn_manager, txn.clone());
    let rows = execute(&scan, &mut context);
    db.txn_manager.commit(&txn).unwrap();
    rows.into_iter().map(|t| t.data).collect()
}

fn index_lookup(db: &TestDb, id: i64) -> Option<crate::storage::page::RecordId> {
    let index_info = db.catalog.index_by_name("items_id_idx").unwrap();
    let key = Tuple::new(index_info.key_schema.clone(), vec![id.into()]);
    index_info.index.get(&key).unwrap()
}

#[test]
fn abort_undoes_insert_in_heap_and_index() {
    let db = test_db();
    seed(&db, &[(1, 10)]);

    let insert = PhysicalPlan::Insert(PhysicalInsert::new(
        "items",
        Arc::new(PhysicalPlan::Values(PhysicalValues::new(
            items_schema(),
            vec![vec![2i64.into(), 20i64.into()], vec![3i64.into(), 30i64.into()]],
        ))),
    ));
    let txn = db.txn_manager.begin(IsolationLevel::RepeatableRead);
    let mut context = ExecutionContext::new(&db.catalog, &db.txn_manager, txn.clone());
    execute(&insert, &mut context);
    assert_eq!(txn.table_write_record_count(), 2);
    assert_eq!(txn.index_write_record_count(), 2);

    db.txn_manager.abort(&txn).unwrap();
    assert_eq!(txn.state(), TransactionState::Aborted);

    assert_eq!(scan_rows(&db), vec![vec![1i64.into(), 10i64.into()]]);
    assert!(index_lookup(&db, 2).is_none());
    assert!(index_lookup(&db, 3).is_none());
}

#[test]
fn abort_restores_updated_pre_image() {
    let db = test_db();
    seed(&db, &[(1, 10), (2, 20)]);

    let update = PhysicalPlan::Update(PhysicalUpdate::new(
        "items",
        vec![(1, Expr::literal(999i64))],
        Arc::new(PhysicalPlan::SeqScan(PhysicalSeqScan::new(
            "items",
            items_schema(),
        ))),
    ));
    let txn = db.txn_manager.begin(IsolationLevel::RepeatableRead);
    let mut context = ExecutionContext::new(&db.catalog, &db.txn_manager, txn.clone());
    let result = execute(&update, &mut context);
    assert_eq!(result[0].data[0], ScalarValue::Int32(Some(2)));

    db.txn_manager.abort(&txn).unwrap();

    assert_eq!(
        scan_rows(&db),
        vec![
            vec![1i64.into(), 10i64.into()],
            vec![2i64.into(), 20i64.into()]
        ]
    );
}

#[test]
fn abort_restores_deleted_rows_and_keys() {
    let db = test_db();
    seed(&db, &[(1, 10), (2, 20), (3, 30)]);
    let rid_before = index_lookup(&db, 2).unwrap();

    let delete = PhysicalPlan::Delete(PhysicalDelete::new(
        "items",
        Arc::new(PhysicalPlan::SeqScan(PhysicalSeqScan::new(
            "items",
            items_schema(),
        ))),
    ));
    let txn = db.txn_manager.begin(IsolationLevel::RepeatableRead);
    let mut context = ExecutionContext::new(&db.catalog, &db.txn_manager, txn.clone());
    execute(&delete, &mut context);
    // Gone from the index while the transaction is alive.
    assert!(index_lookup(&db, 2).is_none());

    db.txn_manager.abort(&txn).unwrap();

    assert_eq!(scan_rows(&db).len(), 3);
    assert_eq!(index_lookup(&db, 2), Some(rid_before));
}

#[test]
fn commit_clears_write_records_and_releases_locks() {
    let db = test_db();
    seed(&db, &[(1, 10)]);

    let insert = PhysicalPlan::Insert(PhysicalInsert::new(
        "items",
        Arc::new(PhysicalPlan::Values(PhysicalValues::new(
            items_schema(),
            vec![vec![2i64.into(), 20i64.into()]],
        ))),
    ));
    let txn = db.txn_manager.begin(IsolationLevel::RepeatableRead);
    let mut context = ExecutionContext::new(&db.catalog, &db.txn_manager, txn.clone());
    execute(&insert, &mut context);
    assert!(!txn.exclusive_rids().is_empty());

    db.txn_manager.commit(&txn).unwrap();
    assert_eq!(txn.state(), TransactionState::Committed);
    assert_eq!(txn.table_write_record_count(), 0);
    assert_eq!(txn.index_write_record_count(), 0);
    assert!(txn.exclusive_rids().is_empty());
    assert!(txn.shared_rids().is_empty());
}

#[test]
fn repeatable_read_holds_shared_locks_until_commit() {
    let db = test_db();
    seed(&db, &[(1, 10), (2, 20), (3, 30)]);

    let scan = PhysicalPlan::SeqScan(PhysicalSeqScan::new("items", items_schema()));
    let txn = db.txn_manager.begin(IsolationLevel::RepeatableRead);
    let mut context = ExecutionContext::new(&db.catalog, &db.txn_manager, txn.clone());
    let rows = execute(&scan, &mut context);
    assert_eq!(rows.len(), 3);

    // Strict 2PL: every scanned row is still share-locked.
    assert_eq!(txn.shared_rids().len(), 3);
    assert_eq!(txn.state(), TransactionState::Growing);

    db.txn_manager.commit(&txn).unwrap();
    assert!(txn.shared_rids().is_empty());
}

#[test]
fn read_committed_releases_shared_locks_between_reads() {
    let db = test_db();
    seed(&db, &[(1, 10), (2, 20)]);

    let scan = PhysicalPlan::SeqScan(PhysicalSeqScan::new("items", items_schema()));
    let txn = db.txn_manager.begin(IsolationLevel::ReadCommitted);
    let mut context = ExecutionContext::new(&db.catalog, &db.txn_manager, txn.clone());
    let rows = execute(&scan, &mut context);
    assert_eq!(rows.len(), 2);

    assert!(txn.shared_rids().is_empty());
    assert_eq!(txn.state(), TransactionState::Growing);
    db.txn_manager.commit(&txn).unwrap();
}

#[test]
fn read_uncommitted_scans_without_locks() {
    let db = test_db();
    seed(&db, &[(1, 10)]);

    let scan = PhysicalPlan::SeqScan(PhysicalSeqScan::new("items", items_schema()));
    let txn = db.txn_manager.begin(IsolationLevel::ReadUncommitted);
    let mut context = ExecutionContext::new(&db.catalog, &db.txn_manager, txn.clone());
    let rows = execute(&scan, &mut context);
    assert_eq!(rows.len(), 1);
    assert!(txn.shared_rids().is_empty());
    db.txn_manager.commit(&txn).unwrap();
}
