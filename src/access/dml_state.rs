use std::{collections::HashMap, fmt, sync::Arc};

use log::Level;

use super::{DeleteStats, Deleter, Inserter, Relation};
use crate::{
    catalog::{BlockMapManager, Catalog, Snapshot},
    error::PaxError,
    logging::{pax_log, LogContext},
};

/// The statement kind a DML state was opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmlOperation {
    /// Rows are only added.
    Insert,
    /// Rows are only marked deleted.
    Delete,
    /// Rows are marked deleted and their new versions added.
    Update,
}

impl fmt::Display for DmlOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DmlOperation::Insert => write!(f, "insert"),
            DmlOperation::Delete => write!(f, "delete"),
            DmlOperation::Update => write!(f, "update"),
        }
    }
}

/// What finishing a DML state did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DmlSummary {
    /// Rows published by the inserter.
    pub inserted: u64,
    /// Outcome of the compaction pass.
    pub deleted: DeleteStats,
    /// Snapshot of the last catalog change, if anything was published.
    pub snapshot: Option<Snapshot>,
}

/// Session staging scope. Every DML state records the generation it was
/// opened under; a reset bumps the generation so states that survived it are
/// never used again.
#[derive(Debug, Default)]
pub(crate) struct StagingScope {
    generation: u64,
    open: bool,
}

impl StagingScope {
    /// Open the scope on first use and return its generation.
    pub(crate) fn open(&mut self) -> u64 {
        self.open = true;
        self.generation
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn reset(&mut self) {
        self.generation += 1;
        self.open = false;
    }
}

/// Per-relation writers of one statement. The inserter and the deleter are
/// created on first use.
pub(crate) struct DmlState {
    rel: Arc<Relation>,
    operation: DmlOperation,
    generation: u64,
    snapshot: Snapshot,
    inserter: Option<Inserter>,
    deleter: Option<Deleter>,
}

impl DmlState {
    pub(crate) fn new(
        rel: Arc<Relation>,
        operation: DmlOperation,
        generation: u64,
        snapshot: Snapshot,
    ) -> Self {
        Self {
            rel,
            operation,
            generation,
            snapshot,
            inserter: None,
            deleter: None,
        }
    }

    pub(crate) fn rel_oid(&self) -> u32 {
        self.rel.rel_oid()
    }

    pub(crate) fn operation(&self) -> DmlOperation {
        self.operation
    }

    pub(crate) fn inserter(&mut self, block_map: &Arc<BlockMapManager>) -> &mut Inserter {
        let rel = &self.rel;
        self.inserter
            .get_or_insert_with(|| Inserter::new(rel.clone(), block_map.clone()))
    }

    pub(crate) fn deleter(&mut self, block_map: &Arc<BlockMapManager>) -> &mut Deleter {
        let (rel, snapshot) = (&self.rel, self.snapshot);
        self.deleter
            .get_or_insert_with(|| Deleter::new(rel.clone(), snapshot, block_map.clone()))
    }

    /// Compact the deletions, then publish the inserts. Whatever is left
    /// unfinished after an error is aborted.
    pub(crate) fn finish(mut self, catalog: &dyn Catalog) -> Result<DmlSummary, PaxError> {
        let mut summary = DmlSummary::default();
        if let Some(mut deleter) = self.deleter.take() {
            match deleter.exec_delete(catalog) {
                Ok(stats) => {
                    summary.deleted = stats;
                    if stats.blocks > 0 {
                        summary.snapshot = Some(catalog.snapshot());
                    }
                }
                Err(err) => {
                    self.abort();
                    return Err(err);
                }
            }
        }
        if let Some(mut inserter) = self.inserter.take() {
            summary.inserted = inserter.inserted();
            if let Some(snapshot) = inserter.finish_insert(catalog)? {
                summary.snapshot = Some(snapshot);
            }
        }
        Ok(summary)
    }

    pub(crate) fn abort(&mut self) {
        if let Some(mut inserter) = self.inserter.take() {
            inserter.abort();
        }
        if let Some(mut deleter) = self.deleter.take() {
            deleter.clear();
        }
    }
}

/// Session-local map from relation to its DML state.
///
/// The most recently used state is kept outside the map, so statements that
/// hit one relation repeatedly skip the hash lookup.
#[derive(Default)]
pub(crate) struct DmlStateLocal {
    states: HashMap<u32, DmlState>,
    cache: Option<DmlState>,
    scope: StagingScope,
}

impl DmlStateLocal {
    /// Register a fresh state for the relation. A previous state for the
    /// same relation is aborted.
    pub(crate) fn init(&mut self, rel: Arc<Relation>, operation: DmlOperation, snapshot: Snapshot) {
        let rel_oid = rel.rel_oid();
        if let Some(mut previous) = self.take(rel_oid) {
            pax_log!(
                Level::Warn,
                ctx: LogContext::relation(rel_oid),
                "dml_state_replaced",
                "operation={}",
                previous.operation()
            );
            previous.abort();
        }
        let generation = self.scope.open();
        pax_log!(
            Level::Debug,
            ctx: LogContext::relation(rel_oid),
            "dml_state_init",
            "operation={} generation={} snapshot={}",
            operation,
            generation,
            snapshot
        );
        let state = DmlState::new(rel, operation, generation, snapshot);
        if let Some(previous) = self.cache.replace(state) {
            self.states.insert(previous.rel_oid(), previous);
        }
    }

    /// The live state of the relation, promoted to the cache slot.
    pub(crate) fn find(&mut self, rel_oid: u32) -> Option<&mut DmlState> {
        if self.cache.as_ref().map_or(true, |s| s.rel_oid() != rel_oid) {
            let state = self.states.remove(&rel_oid)?;
            if let Some(previous) = self.cache.replace(state) {
                self.states.insert(previous.rel_oid(), previous);
            }
        }
        let generation = self.scope.generation();
        if self.cache.as_ref().map_or(false, |s| s.generation != generation) {
            if let Some(mut stale) = self.cache.take() {
                stale.abort();
            }
            return None;
        }
        self.cache.as_mut()
    }

    /// Detach the relation's state from the map.
    pub(crate) fn take(&mut self, rel_oid: u32) -> Option<DmlState> {
        if self.cache.as_ref().map_or(false, |s| s.rel_oid() == rel_oid) {
            return self.cache.take();
        }
        self.states.remove(&rel_oid)
    }

    pub(crate) fn len(&self) -> usize {
        self.states.len() + usize::from(self.cache.is_some())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abort every state and invalidate the staging scope.
    pub(crate) fn reset(&mut self) {
        let states: Vec<DmlState> = self
            .cache
            .take()
            .into_iter()
            .chain(self.states.drain().map(|(_, state)| state))
            .collect();
        if !states.is_empty() {
            pax_log!(Level::Debug, "dml_state_reset", "states={}", states.len());
        }
        for mut state in states {
            state.abort();
        }
        if self.scope.is_open() {
            self.scope.reset();
        }
    }

    /// Close the staging scope once no state is left.
    pub(crate) fn release_scope_if_idle(&mut self) {
        if self.is_empty() && self.scope.is_open() {
            self.scope.reset();
        }
    }
}
