mod common;

use common::{
    create_relation, desc, id_of, insert_all, open_engine, row, scan_all, scan_ids, shuffled_ids,
    REL,
};
use paxstore::{
    clustering::{zorder::ZOrderKeyBuilder, ClusteringOptions, IndexDescriptor, SortKey},
    options::ClusterType,
    Datum, RelOptions, Row,
};
use tempfile::TempDir;

fn shuffled_rows(seed: u64, n: i64) -> Vec<Row> {
    shuffled_ids(seed, n).into_iter().map(row).collect()
}

#[test]
fn lexical_clustering_orders_the_table() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(dir.path(), 64);
    create_relation(&engine, RelOptions::default());
    let mut session = engine.session();
    insert_all(&mut session, &shuffled_rows(7, 500));
    let before = session.estimate_rel_size(REL).unwrap();

    let options = ClusteringOptions::lexical(desc(), vec![SortKey::asc(0)], 1 << 20);
    let summary = session.cluster_table(REL, &options).unwrap();
    assert_eq!(summary.rows, 500);
    assert_eq!(summary.partitions_removed, before.num_partitions);
    assert_eq!(summary.partitions_written, 8);

    assert_eq!(scan_ids(&session), (0..500).collect::<Vec<_>>());
    assert_eq!(session.estimate_rel_size(REL).unwrap().num_tuples, 500);
}

#[test]
fn clustering_spills_under_a_small_budget() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(dir.path(), 1000);
    create_relation(&engine, RelOptions::default());
    let mut session = engine.session();
    insert_all(&mut session, &shuffled_rows(11, 2000));

    let options = ClusteringOptions::lexical(desc(), vec![SortKey::desc(0)], 4096);
    let summary = session.cluster_table(REL, &options).unwrap();
    assert!(summary.spilled_runs > 1);
    assert_eq!(scan_ids(&session), (0..2000).rev().collect::<Vec<_>>());
}

#[test]
fn index_clustering_follows_index_key_order() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(dir.path(), 100);
    create_relation(&engine, RelOptions::default());
    let mut session = engine.session();
    insert_all(&mut session, &shuffled_rows(3, 300));

    // score is null on every tenth row; nulls go first in this index
    let index = IndexDescriptor::new(
        "score_idx",
        vec![SortKey::asc(2).nulls_first(true), SortKey::asc(0)],
    );
    let options = ClusteringOptions::index(desc(), index, 1 << 20);
    session.cluster_table(REL, &options).unwrap();

    let rows: Vec<Row> = scan_all(&session).into_iter().map(|(_, r)| r).collect();
    assert_eq!(rows.len(), 300);
    let nulls = rows.iter().take_while(|r| r.get(2).is_none()).count();
    assert_eq!(nulls, 30);
    let ids: Vec<i64> = rows[nulls..].iter().map(id_of).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);
}

#[test]
fn zorder_clustering_from_relation_options() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(dir.path(), 128);
    let rel_options = RelOptions::default().cluster(ClusterType::ZOrder, &["id", "score"]);
    create_relation(&engine, rel_options.clone());
    let mut session = engine.session();
    insert_all(&mut session, &shuffled_rows(5, 400));

    let options = ClusteringOptions::from_rel_options(&desc(), &rel_options, 1 << 20)
        .unwrap()
        .expect("relation is clustered");
    let summary = session.cluster_table(REL, &options).unwrap();
    assert_eq!(summary.rows, 400);

    let rows = scan_all(&session);
    // stored rows keep the relation's columns only
    assert!(rows.iter().all(|(_, r)| r.len() == 3));
    let mut ids: Vec<i64> = rows.iter().map(|(_, r)| id_of(r)).collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..400).collect::<Vec<_>>());
    let mut builder = ZOrderKeyBuilder::new(vec![0, 2]);
    let keys: Vec<Vec<u8>> = rows
        .iter()
        .map(|(_, r)| builder.build(r.values()).unwrap())
        .collect();
    assert!(keys.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[test]
fn clustering_an_empty_table_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(dir.path(), 100);
    create_relation(&engine, RelOptions::default());
    let mut session = engine.session();
    let options = ClusteringOptions::lexical(desc(), vec![SortKey::asc(0)], 1 << 20);
    let summary = session.cluster_table(REL, &options).unwrap();
    assert_eq!(summary.rows, 0);
    assert!(summary.snapshot.is_none());
}

#[test]
fn failed_clustering_keeps_the_table() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(dir.path(), 100);
    create_relation(&engine, RelOptions::default());
    let mut session = engine.session();
    insert_all(&mut session, &[row(1), row(2)]);
    let options = ClusteringOptions::zorder(desc(), vec![7], 1 << 20);
    assert!(session.cluster_table(REL, &options).is_err());
    // a failed pass changes nothing
    assert_eq!(scan_ids(&session), vec![1, 2]);
    assert!(matches!(scan_all(&session)[0].1.get(1), Some(Datum::Text(_))));
}
