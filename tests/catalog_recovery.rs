mod common;

use std::{fs::OpenOptions, io::Write};

use common::{create_relation, id_of, insert_all, open_engine, row, scan_all, scan_ids, REL};
use paxstore::{
    catalog::Catalog, options::CompressType, Datum, DmlOperation, RelOptions, StorageEngine,
    StorageOptions,
};
use tempfile::TempDir;

#[test]
fn published_partitions_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let options = RelOptions::default()
        .compress(CompressType::Zstd, 3)
        .minmax_columns(&["id"]);
    {
        let engine = open_engine(dir.path(), 40);
        create_relation(&engine, options.clone());
        let mut session = engine.session();
        insert_all(&mut session, &(0..100).map(row).collect::<Vec<_>>());

        session.init_dml_state(REL, DmlOperation::Delete).unwrap();
        for (tid, row) in scan_all(&session) {
            if id_of(&row) < 10 {
                session.delete(REL, tid).unwrap();
            }
        }
        session.finish_dml_state(REL, DmlOperation::Delete).unwrap();
    }

    let engine = open_engine(dir.path(), 40);
    create_relation(&engine, options);
    let session = engine.session();
    let mut ids = scan_ids(&session);
    ids.sort_unstable();
    assert_eq!(ids, (10..100).collect::<Vec<_>>());

    let estimate = session.estimate_rel_size(REL).unwrap();
    assert_eq!(estimate.num_tuples, 90);
    assert_eq!(estimate.num_partitions, 3);

    let partitions = engine
        .catalog()
        .scan(REL, engine.catalog().snapshot())
        .unwrap();
    let stats = partitions
        .iter()
        .map(|p| p.stats.column(0).expect("id stats").clone())
        .collect::<Vec<_>>();
    assert!(stats.iter().all(|s| s.null_count == 0));
    assert!(stats
        .iter()
        .any(|s| s.min == Some(Datum::Int8(10)) && s.max == Some(Datum::Int8(39))));
}

#[test]
fn torn_journal_tail_is_ignored() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open_engine(dir.path(), 100);
        create_relation(&engine, RelOptions::default());
        let mut session = engine.session();
        insert_all(&mut session, &(0..5).map(row).collect::<Vec<_>>());
    }
    let journal = dir.path().join("pax_catalog.journal");
    let intact = std::fs::metadata(&journal).unwrap().len();
    // a frame header that promises more bytes than follow
    let mut file = OpenOptions::new().append(true).open(&journal).unwrap();
    file.write_all(&[64, 0, 0, 0, 1, 2, 3, 4, 1, 9]).unwrap();
    drop(file);

    let engine = open_engine(dir.path(), 100);
    create_relation(&engine, RelOptions::default());
    let mut session = engine.session();
    assert_eq!(scan_ids(&session), (0..5).collect::<Vec<_>>());
    assert_eq!(std::fs::metadata(&journal).unwrap().len(), intact);

    insert_all(&mut session, &[row(5)]);
    drop(session);
    drop(engine);
    let engine = open_engine(dir.path(), 100);
    create_relation(&engine, RelOptions::default());
    assert_eq!(scan_ids(&engine.session()), (0..6).collect::<Vec<_>>());
}

#[test]
fn in_memory_catalog_forgets_on_reopen() {
    let dir = TempDir::new().unwrap();
    let options = StorageOptions::from(dir.path()).use_journal(false);
    {
        let engine = StorageEngine::open(options.clone()).unwrap();
        create_relation(&engine, RelOptions::default());
        insert_all(&mut engine.session(), &[row(1)]);
    }
    let engine = StorageEngine::open(options).unwrap();
    create_relation(&engine, RelOptions::default());
    assert!(scan_ids(&engine.session()).is_empty());
    assert!(!dir.path().join("pax_catalog.journal").exists());
}
