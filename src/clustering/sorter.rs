//! Memory-bounded multi-key sort of rows.
//!
//! Rows are buffered until their estimated size exceeds the work memory
//! budget, at which point the buffer is sorted and spilled as a run through
//! the micro-partition codec. Runs are merged with a binary heap; ties keep
//! arrival order.

use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    path::PathBuf,
    sync::Arc,
};

use log::Level;
use tempfile::TempDir;

use super::ClusteringError;
use crate::{
    format::{ColumnLayout, PaxFileReader, PaxFileWriter, WriterOptions},
    fs::{FileSystem, FsError, LocalFs},
    logging::pax_log,
    types::{cmp_nullable, Collation, Row, TupleDesc},
};

const SPILL_BATCH_ROWS: usize = 1024;
/// Per-row bookkeeping charged against the budget on top of the values.
const ROW_OVERHEAD: usize = std::mem::size_of::<Row>();

/// One sort column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    /// Attribute index.
    pub attno: usize,
    /// Sort from high to low.
    pub descending: bool,
    /// Nulls sort before every value.
    pub nulls_first: bool,
    /// Comparison rule for text values.
    pub collation: Collation,
}

impl SortKey {
    /// Ascending, nulls last.
    pub fn asc(attno: usize) -> Self {
        Self {
            attno,
            descending: false,
            nulls_first: false,
            collation: Collation::C,
        }
    }

    /// Descending, nulls first.
    pub fn desc(attno: usize) -> Self {
        Self {
            attno,
            descending: true,
            nulls_first: true,
            collation: Collation::C,
        }
    }

    /// Set where nulls sort.
    pub fn nulls_first(self, nulls_first: bool) -> Self {
        Self {
            nulls_first,
            ..self
        }
    }

    /// Set the text comparison rule.
    pub fn collation(self, collation: Collation) -> Self {
        Self { collation, ..self }
    }

    fn compare(&self, a: &Row, b: &Row) -> Ordering {
        let (a, b) = (a.get(self.attno), b.get(self.attno));
        match (a, b) {
            (Some(x), Some(y)) if self.descending => y.total_cmp(x, self.collation),
            _ => cmp_nullable(a, b, self.nulls_first, self.collation),
        }
    }
}

pub(crate) fn compare_rows(keys: &[SortKey], a: &Row, b: &Row) -> Ordering {
    keys.iter()
        .map(|key| key.compare(a, b))
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Sort keys and memory budget of a [`TupleSorter`].
#[derive(Debug, Clone)]
pub struct SorterOptions {
    /// Shape of the sorted rows; spilled runs are written with it.
    pub desc: TupleDesc,
    /// Sort keys, most significant first.
    pub keys: Vec<SortKey>,
    /// Bytes buffered before a run is spilled.
    pub work_mem: usize,
    /// Parent directory of spill files; the system temp dir when unset.
    pub spill_dir: Option<PathBuf>,
}

struct MergeEntry {
    row: Row,
    run: usize,
    keys: Arc<[SortKey]>,
}

impl Ord for MergeEntry {
    // reversed so the max-heap pops the smallest row, earliest run first
    fn cmp(&self, other: &Self) -> Ordering {
        compare_rows(&self.keys, &other.row, &self.row).then_with(|| other.run.cmp(&self.run))
    }
}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for MergeEntry {}

struct Merger {
    runs: Vec<PaxFileReader>,
    heap: BinaryHeap<MergeEntry>,
}

enum SortState {
    Loading,
    InMemory(std::vec::IntoIter<Row>),
    Merging(Merger),
}

/// Sort bounded by a memory budget. Overflowing runs spill to disk and are
/// merged back when sorted output is requested.
pub struct TupleSorter {
    options: SorterOptions,
    keys: Arc<[SortKey]>,
    layout: Arc<ColumnLayout>,
    buffer: Vec<Row>,
    buffered_bytes: usize,
    spill: Option<TempDir>,
    runs: Vec<PathBuf>,
    rows: u64,
    state: SortState,
}

impl TupleSorter {
    /// Fails when `options.desc` cannot be spilled through the codec.
    pub fn new(options: SorterOptions) -> Result<Self, ClusteringError> {
        let layout = Arc::new(ColumnLayout::derive(&options.desc)?);
        let keys: Arc<[SortKey]> = options.keys.clone().into();
        Ok(Self {
            options,
            keys,
            layout,
            buffer: Vec::new(),
            buffered_bytes: 0,
            spill: None,
            runs: Vec::new(),
            rows: 0,
            state: SortState::Loading,
        })
    }

    /// Rows handed to the sorter.
    pub fn len(&self) -> u64 {
        self.rows
    }

    /// Whether no row has been put.
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Runs written to disk so far.
    pub fn spilled_runs(&self) -> usize {
        self.runs.len()
    }

    /// Buffer one row, spilling a sorted run once over budget.
    pub fn put(&mut self, row: Row) -> Result<(), ClusteringError> {
        if !matches!(self.state, SortState::Loading) {
            return Err(ClusteringError::InvalidOptions(
                "rows appended after sort".into(),
            ));
        }
        self.buffered_bytes += row.size_hint() + ROW_OVERHEAD;
        self.buffer.push(row);
        self.rows += 1;
        if self.buffered_bytes >= self.options.work_mem {
            self.spill_run()?;
        }
        Ok(())
    }

    /// Finish loading. Sorted rows are then returned by [`Self::next_sorted`].
    pub fn sort(&mut self) -> Result<(), ClusteringError> {
        if !matches!(self.state, SortState::Loading) {
            return Ok(());
        }
        if self.runs.is_empty() {
            let mut rows = std::mem::take(&mut self.buffer);
            let keys = self.keys.clone();
            rows.sort_by(|a, b| compare_rows(&keys, a, b));
            self.state = SortState::InMemory(rows.into_iter());
            return Ok(());
        }
        if !self.buffer.is_empty() {
            self.spill_run()?;
        }
        let mut merger = Merger {
            runs: Vec::with_capacity(self.runs.len()),
            heap: BinaryHeap::with_capacity(self.runs.len()),
        };
        for (run, path) in self.runs.iter().enumerate() {
            let mut reader =
                PaxFileReader::open(&LocalFs, path, &self.options.desc, SPILL_BATCH_ROWS)?;
            if let Some(row) = reader.read_next_row()? {
                merger.heap.push(MergeEntry {
                    row,
                    run,
                    keys: self.keys.clone(),
                });
            }
            merger.runs.push(reader);
        }
        self.state = SortState::Merging(merger);
        Ok(())
    }

    /// Next row in key order. The first call ends input.
    pub fn next_sorted(&mut self) -> Result<Option<Row>, ClusteringError> {
        match &mut self.state {
            SortState::Loading => Err(ClusteringError::InvalidOptions(
                "sorted rows requested before sort".into(),
            )),
            SortState::InMemory(rows) => Ok(rows.next()),
            SortState::Merging(merger) => {
                let Some(entry) = merger.heap.pop() else {
                    return Ok(None);
                };
                if let Some(row) = merger.runs[entry.run].read_next_row()? {
                    merger.heap.push(MergeEntry {
                        row,
                        run: entry.run,
                        keys: entry.keys.clone(),
                    });
                }
                Ok(Some(entry.row))
            }
        }
    }

    fn spill_dir(&mut self) -> Result<PathBuf, ClusteringError> {
        if let Some(dir) = &self.spill {
            return Ok(dir.path().to_path_buf());
        }
        let mut builder = tempfile::Builder::new();
        builder.prefix("pax_sort_");
        let dir = match &self.options.spill_dir {
            Some(parent) => {
                LocalFs.create_dir_all(parent)?;
                builder
                    .tempdir_in(parent)
                    .map_err(|err| FsError::from_io(parent, err))?
            }
            None => builder
                .tempdir()
                .map_err(|err| FsError::from_io(std::env::temp_dir(), err))?,
        };
        let path = dir.path().to_path_buf();
        self.spill = Some(dir);
        Ok(path)
    }

    fn spill_run(&mut self) -> Result<(), ClusteringError> {
        let mut rows = std::mem::take(&mut self.buffer);
        let bytes = std::mem::replace(&mut self.buffered_bytes, 0);
        let keys = self.keys.clone();
        rows.sort_by(|a, b| compare_rows(&keys, a, b));

        let path = self.spill_dir()?.join(format!("run_{}", self.runs.len()));
        let mut writer = PaxFileWriter::open(
            &LocalFs,
            &path,
            self.layout.clone(),
            WriterOptions::default().with_batch(SPILL_BATCH_ROWS, usize::MAX),
        )?;
        for row in &rows {
            writer.append_row(row)?;
        }
        writer.close()?;
        pax_log!(
            Level::Debug,
            "sort_spill",
            "run={} rows={} bytes={}",
            self.runs.len(),
            rows.len(),
            bytes
        );
        self.runs.push(path);
        Ok(())
    }
}
