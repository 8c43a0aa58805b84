use log::Level;

use super::{
    sorter::{SortKey, SorterOptions, TupleSorter},
    zorder::{is_zorder_type, ZOrderKeyBuilder, MAX_ZORDER_KEYS, ZORDER_COLUMN_NAME},
    ClusterKind, ClusteringDataReader, ClusteringDataWriter, ClusteringError, ClusteringOptions,
    ClusteringStats, IndexOptions, LexicalOptions, ZOrderOptions,
};
use crate::{
    logging::pax_log,
    options::OptionsError,
    types::{Attribute, ColumnType, Datum, Row, TupleDesc},
};

/// One clustering strategy. Engines hold no state between calls.
pub trait DataClustering {
    /// Options the engine accepts.
    type Options;

    /// Drain `reader` into `writer` in clustered order.
    fn clustering(
        &self,
        reader: &mut dyn ClusteringDataReader,
        writer: &mut dyn ClusteringDataWriter,
        options: &Self::Options,
    ) -> Result<ClusteringStats, ClusteringError>;
}

/// Run the engine selected by `options` with a fresh engine value.
pub fn cluster(
    reader: &mut dyn ClusteringDataReader,
    writer: &mut dyn ClusteringDataWriter,
    options: &ClusteringOptions,
) -> Result<ClusteringStats, ClusteringError> {
    pax_log!(
        Level::Info,
        "clustering_start",
        "kind={} work_mem={}",
        options.kind(),
        options.work_mem()
    );
    let stats = match options {
        ClusteringOptions::ZOrder(o) => ZOrderClustering.clustering(reader, writer, o),
        ClusteringOptions::Index(o) => IndexClustering.clustering(reader, writer, o),
        ClusteringOptions::Lexical(o) => LexicalClustering.clustering(reader, writer, o),
    }?;
    pax_log!(
        Level::Info,
        "clustering_finish",
        "kind={} rows={} spilled_runs={}",
        options.kind(),
        stats.rows,
        stats.spilled_runs
    );
    Ok(stats)
}

fn check_keys(kind: ClusterKind, desc: &TupleDesc, keys: &[SortKey]) -> Result<(), ClusteringError> {
    if keys.is_empty() {
        return Err(ClusteringError::InvalidOptions(format!(
            "{kind} clustering needs at least one key"
        )));
    }
    if let Some(key) = keys.iter().find(|k| k.attno >= desc.natts()) {
        return Err(ClusteringError::InvalidOptions(format!(
            "sort key column {} is out of range",
            key.attno
        )));
    }
    Ok(())
}

/// Feed every row through `sorter` after `prepare`, then replay sorted.
fn sort_and_replay(
    mut sorter: TupleSorter,
    reader: &mut dyn ClusteringDataReader,
    writer: &mut dyn ClusteringDataWriter,
    mut prepare: impl FnMut(Row) -> Result<Row, ClusteringError>,
) -> Result<ClusteringStats, ClusteringError> {
    while let Some(row) = reader.next_tuple()? {
        sorter.put(prepare(row)?)?;
    }
    reader.close()?;
    sorter.sort()?;
    while let Some(row) = sorter.next_sorted()? {
        writer.write_tuple(&row)?;
    }
    Ok(ClusteringStats {
        rows: sorter.len(),
        spilled_runs: sorter.spilled_runs(),
    })
}

/// Multi-key sort with per-key direction, null placement and collation.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalClustering;

impl DataClustering for LexicalClustering {
    type Options = LexicalOptions;

    fn clustering(
        &self,
        reader: &mut dyn ClusteringDataReader,
        writer: &mut dyn ClusteringDataWriter,
        options: &LexicalOptions,
    ) -> Result<ClusteringStats, ClusteringError> {
        check_keys(ClusterKind::Lexical, &options.desc, &options.keys)?;
        let sorter = TupleSorter::new(SorterOptions {
            desc: options.desc.clone(),
            keys: options.keys.clone(),
            work_mem: options.work_mem,
            spill_dir: options.spill_dir.clone(),
        })?;
        sort_and_replay(sorter, reader, writer, Ok)
    }
}

/// Sort in the key order of a secondary index.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexClustering;

impl DataClustering for IndexClustering {
    type Options = IndexOptions;

    fn clustering(
        &self,
        reader: &mut dyn ClusteringDataReader,
        writer: &mut dyn ClusteringDataWriter,
        options: &IndexOptions,
    ) -> Result<ClusteringStats, ClusteringError> {
        check_keys(ClusterKind::Index, &options.desc, &options.index.keys).map_err(|_| {
            ClusteringError::InvalidOptions(format!("index {} is invalid", options.index.name))
        })?;
        let sorter = TupleSorter::new(SorterOptions {
            desc: options.desc.clone(),
            keys: options.index.keys.clone(),
            work_mem: options.work_mem,
            spill_dir: options.spill_dir.clone(),
        })?;
        sort_and_replay(sorter, reader, writer, Ok)
    }
}

/// Sort by the bit-interleaved key of up to 32 columns. Output rows keep the
/// key as an extra trailing bytea value.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZOrderClustering;

impl ZOrderClustering {
    fn check_options(options: &ZOrderOptions) -> Result<(), ClusteringError> {
        if options.columns.len() > MAX_ZORDER_KEYS {
            return Err(OptionsError::TooManyZOrderColumns(options.columns.len()).into());
        }
        if options.columns.is_empty() {
            return Err(ClusteringError::InvalidOptions(
                "zorder clustering needs at least one key".into(),
            ));
        }
        for column in &options.columns {
            let attr = options.desc.attr(*column).ok_or_else(|| {
                ClusteringError::InvalidOptions(format!("zorder column {column} is out of range"))
            })?;
            if !is_zorder_type(attr.ty) {
                return Err(OptionsError::ZOrderUnsupportedType(attr.name.clone()).into());
            }
        }
        Ok(())
    }
}

impl DataClustering for ZOrderClustering {
    type Options = ZOrderOptions;

    fn clustering(
        &self,
        reader: &mut dyn ClusteringDataReader,
        writer: &mut dyn ClusteringDataWriter,
        options: &ZOrderOptions,
    ) -> Result<ClusteringStats, ClusteringError> {
        Self::check_options(options)?;
        let natts = options.desc.natts();
        let desc = options
            .desc
            .with_extra(Attribute::new(ZORDER_COLUMN_NAME, ColumnType::Bytea));
        let sorter = TupleSorter::new(SorterOptions {
            desc,
            keys: vec![SortKey::asc(natts)],
            work_mem: options.work_mem,
            spill_dir: options.spill_dir.clone(),
        })?;
        let mut builder = ZOrderKeyBuilder::new(options.columns.clone());
        sort_and_replay(sorter, reader, writer, |row| {
            let mut values = row.into_values();
            values.resize(natts, None);
            let key = builder.build(&values).ok_or_else(|| {
                ClusteringError::InvalidOptions("zorder key column holds an unsupported value".into())
            })?;
            values.push(Some(Datum::Bytea(key)));
            Ok(Row::new(values))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clustering::{zorder::N_BYTES, IndexDescriptor},
        types::Collation,
    };

    struct VecReader {
        rows: std::vec::IntoIter<Row>,
        closed: bool,
    }

    impl VecReader {
        fn new(rows: Vec<Row>) -> Self {
            Self {
                rows: rows.into_iter(),
                closed: false,
            }
        }
    }

    impl ClusteringDataReader for VecReader {
        fn next_tuple(&mut self) -> Result<Option<Row>, ClusteringError> {
            Ok(self.rows.next())
        }

        fn close(&mut self) -> Result<(), ClusteringError> {
            self.closed = true;
            Ok(())
        }
    }

    #[derive(Default)]
    struct VecWriter {
        rows: Vec<Row>,
    }

    impl ClusteringDataWriter for VecWriter {
        fn write_tuple(&mut self, row: &Row) -> Result<(), ClusteringError> {
            self.rows.push(row.clone());
            Ok(())
        }

        fn close(&mut self) -> Result<(), ClusteringError> {
            Ok(())
        }
    }

    fn desc() -> TupleDesc {
        TupleDesc::new(vec![
            Attribute::new("x", ColumnType::Int4),
            Attribute::new("y", ColumnType::Int4),
            Attribute::new("name", ColumnType::Text),
        ])
    }

    fn ints(rows: &[Row], attno: usize) -> Vec<i32> {
        rows.iter()
            .map(|r| match r.get(attno) {
                Some(Datum::Int4(v)) => *v,
                other => panic!("unexpected {other:?}"),
            })
            .collect()
    }

    #[test]
    fn lexical_sorts_by_keys() {
        let rows = [(2, "b"), (1, "B"), (2, "a"), (1, "a")]
            .into_iter()
            .map(|(x, name)| {
                Row::new(vec![
                    Some(Datum::Int4(x)),
                    Some(Datum::Int4(0)),
                    Some(Datum::Text(name.into())),
                ])
            })
            .collect();
        let mut reader = VecReader::new(rows);
        let mut writer = VecWriter::default();
        let options = ClusteringOptions::lexical(
            desc(),
            vec![
                SortKey::desc(0),
                SortKey::asc(2).collation(Collation::CaseInsensitive),
            ],
            usize::MAX,
        );
        let stats = cluster(&mut reader, &mut writer, &options).unwrap();
        assert_eq!(stats.rows, 4);
        assert!(reader.closed);
        assert_eq!(ints(&writer.rows, 0), vec![2, 2, 1, 1]);
        let names: Vec<_> = writer
            .rows
            .iter()
            .map(|r| r.get(2).cloned().unwrap())
            .collect();
        assert_eq!(
            names,
            ["a", "b", "a", "B"]
                .iter()
                .map(|s| Datum::Text(s.to_string()))
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn index_requires_keys() {
        let mut reader = VecReader::new(Vec::new());
        let mut writer = VecWriter::default();
        let options =
            ClusteringOptions::index(desc(), IndexDescriptor::new("idx_empty", vec![]), 1024);
        assert!(matches!(
            cluster(&mut reader, &mut writer, &options),
            Err(ClusteringError::InvalidOptions(_))
        ));
    }

    #[test]
    fn index_order_follows_index_keys() {
        let rows = (0..20)
            .map(|i| {
                Row::new(vec![
                    Some(Datum::Int4(i % 4)),
                    Some(Datum::Int4(-i)),
                    None,
                ])
            })
            .collect();
        let mut reader = VecReader::new(rows);
        let mut writer = VecWriter::default();
        let index = IndexDescriptor::new("idx_y", vec![SortKey::asc(1)]);
        cluster(&mut reader, &mut writer, &ClusteringOptions::index(desc(), index, 1024)).unwrap();
        assert_eq!(ints(&writer.rows, 1), (0..20).rev().map(|i| -i).collect::<Vec<_>>());
    }

    #[test]
    fn zorder_appends_key_and_clusters_quadrants() {
        let mut rng = fastrand::Rng::with_seed(5);
        let rows: Vec<Row> = (0..256)
            .map(|_| {
                Row::new(vec![
                    Some(Datum::Int4(rng.i32(0..16))),
                    Some(Datum::Int4(rng.i32(0..16))),
                    Some(Datum::Text("p".into())),
                ])
            })
            .collect();
        let mut reader = VecReader::new(rows);
        let mut writer = VecWriter::default();
        let options = ClusteringOptions::zorder(desc(), vec![0, 1], 2048);
        let stats = cluster(&mut reader, &mut writer, &options).unwrap();
        assert_eq!(stats.rows, 256);
        assert!(stats.spilled_runs > 0);

        let keys: Vec<Vec<u8>> = writer
            .rows
            .iter()
            .map(|r| {
                assert_eq!(r.len(), 4);
                match r.get(3) {
                    Some(Datum::Bytea(key)) => key.clone(),
                    other => panic!("unexpected {other:?}"),
                }
            })
            .collect();
        assert!(keys.iter().all(|k| k.len() == 2 * N_BYTES));
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));

        // the low quadrant (x < 8, y < 8) comes out as one contiguous range
        let low: Vec<bool> = writer
            .rows
            .iter()
            .map(|r| matches!((r.get(0), r.get(1)), (Some(Datum::Int4(x)), Some(Datum::Int4(y))) if *x < 8 && *y < 8))
            .collect();
        let first_high = low.iter().position(|l| !l).unwrap_or(low.len());
        assert!(low[first_high..].iter().all(|l| !l));
    }

    #[test]
    fn zorder_rejects_bad_options() {
        let mut writer = VecWriter::default();
        let too_many = ClusteringOptions::zorder(desc(), vec![0; MAX_ZORDER_KEYS + 1], 1024);
        assert!(matches!(
            cluster(&mut VecReader::new(Vec::new()), &mut writer, &too_many),
            Err(ClusteringError::Options(OptionsError::TooManyZOrderColumns(33)))
        ));
        let bad_column = ClusteringOptions::zorder(desc(), vec![7], 1024);
        assert!(matches!(
            cluster(&mut VecReader::new(Vec::new()), &mut writer, &bad_column),
            Err(ClusteringError::InvalidOptions(_))
        ));
    }
}
