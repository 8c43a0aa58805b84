//! Common test utilities for integration tests.
#![allow(dead_code)]

use std::{path::Path, sync::Arc};

use paxstore::{
    Attribute, ColumnType, Datum, DmlOperation, ItemPointer, RelOptions, Row, Session,
    StorageEngine, StorageOptions, TupleDesc,
};

pub const REL: u32 = 16384;

/// `id int8, name text, score float8` with a null score on every tenth row.
pub fn desc() -> TupleDesc {
    TupleDesc::new(vec![
        Attribute::new("id", ColumnType::Int8),
        Attribute::new("name", ColumnType::Text),
        Attribute::new("score", ColumnType::Float8),
    ])
}

pub fn row(id: i64) -> Row {
    let score = (id % 10 != 0).then(|| Datum::Float8(id as f64 * 0.5));
    Row::new(vec![
        Some(Datum::Int8(id)),
        Some(Datum::Text(format!("row-{id}"))),
        score,
    ])
}

pub fn id_of(row: &Row) -> i64 {
    match row.get(0) {
        Some(Datum::Int8(id)) => *id,
        other => panic!("row without id: {other:?}"),
    }
}

/// Engine over `root` with partitions rolled over every `split` rows.
pub fn open_engine(root: &Path, split: usize) -> Arc<StorageEngine> {
    StorageEngine::open(StorageOptions::from(root).split_max_tuples(split))
        .expect("engine should open")
}

pub fn create_relation(engine: &StorageEngine, options: RelOptions) {
    engine
        .create_relation(REL, desc(), options)
        .expect("relation should register");
}

/// Insert `rows` in one statement.
pub fn insert_all(session: &mut Session, rows: &[Row]) -> Vec<ItemPointer> {
    session
        .init_dml_state(REL, DmlOperation::Insert)
        .expect("init insert");
    let tids = session.multi_insert(REL, rows).expect("insert rows");
    session
        .finish_dml_state(REL, DmlOperation::Insert)
        .expect("finish insert");
    tids
}

pub fn scan_all(session: &Session) -> Vec<(ItemPointer, Row)> {
    session
        .scan(REL)
        .expect("scan relation")
        .collect::<Result<Vec<_>, _>>()
        .expect("read rows")
}

pub fn scan_ids(session: &Session) -> Vec<i64> {
    scan_all(session).iter().map(|(_, row)| id_of(row)).collect()
}

/// Deterministic shuffled ids.
pub fn shuffled_ids(seed: u64, n: i64) -> Vec<i64> {
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut ids: Vec<i64> = (0..n).collect();
    rng.shuffle(&mut ids);
    ids
}
