#![deny(missing_docs)]

//! PAX columnar micro-partition storage.
//!
//! A relation is stored as a set of immutable micro-partition files, each a
//! columnar file holding up to a configured number of rows. Rows are
//! addressed by [`ItemPointer`]s that encode the table, the partition's block
//! number and the row's position inside it. Inserts append to fresh
//! micro-partitions; deletes are collected per statement as bitmaps and
//! applied by rewriting the touched partitions. The [`catalog`] decides which
//! partitions a snapshot sees, and [`clustering`] rewrites a relation in
//! lexical, index or Z-order key order.
//!
//! Entry points live on [`StorageEngine`] and [`Session`].

mod logging;

pub mod access;
pub mod bitmap;
pub mod catalog;
pub mod clustering;
pub mod error;
pub mod format;
pub mod fs;
pub mod id;
pub mod itemptr;
pub mod options;
pub mod partition;
pub mod types;

pub use crate::{
    access::{DmlOperation, Session, StorageEngine, TmResult, UpdateResult},
    error::PaxError,
    id::BlockId,
    itemptr::ItemPointer,
    options::{RelOptions, StorageOptions},
    types::{Attribute, ColumnType, Datum, Row, TupleDesc},
};
