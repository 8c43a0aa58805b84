//! Statement-level access to PAX relations: the DML state coordinator, the
//! inserter and deleter it drives, and the session entry points.

mod deleter;
mod dml_state;
mod inserter;
mod relation;
mod session;

use std::fmt;

pub use self::{
    deleter::{DeleteStats, Deleter},
    dml_state::{DmlOperation, DmlSummary},
    inserter::Inserter,
    relation::Relation,
    session::{ClusterSummary, Session, SizeEstimate, StorageEngine, UpdateResult},
};

/// Outcome of marking a row deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TmResult {
    /// The row was marked.
    Ok,
    /// The row was already deleted or updated by the current statement.
    SelfModified,
}

impl fmt::Display for TmResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TmResult::Ok => write!(f, "ok"),
            TmResult::SelfModified => write!(f, "self-modified"),
        }
    }
}
