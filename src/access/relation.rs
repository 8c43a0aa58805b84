use std::{fmt, sync::Arc};

use crate::{
    error::PaxError,
    format::WriterOptions,
    fs::FileSystem,
    id::BlockIdGenerator,
    options::{RelOptions, StorageOptions},
    partition::{DefaultSplitStrategy, PartitionConfig, SplitStrategy},
    types::TupleDesc,
};

/// A registered relation: its columns, validated options and the partition
/// configuration derived from both.
pub struct Relation {
    rel_oid: u32,
    options: RelOptions,
    config: Arc<PartitionConfig>,
    split: Arc<dyn SplitStrategy>,
}

impl Relation {
    pub(crate) fn new(
        rel_oid: u32,
        desc: TupleDesc,
        options: RelOptions,
        storage: &StorageOptions,
        fs: Arc<dyn FileSystem>,
        ids: Arc<BlockIdGenerator>,
    ) -> Result<Self, PaxError> {
        options.validate(&desc)?;
        let codec = WriterOptions::default()
            .with_batch(storage.target_batch_row_count, storage.target_stripe_byte_size)
            .with_compression(options.compress_type, options.compress_level)
            .with_bloom_filter_columns(options.bloomfilter_column_indexes(&desc)?);
        let minmax_columns = options.minmax_column_indexes(&desc)?;
        let config = PartitionConfig::new(rel_oid, storage.root(), fs, desc)?
            .with_ids(ids)
            .with_codec(codec)
            .with_minmax_columns(minmax_columns);
        Ok(Self {
            rel_oid,
            options,
            config: Arc::new(config),
            split: Arc::new(DefaultSplitStrategy::new(
                storage.split_max_tuples,
                storage.split_max_bytes,
            )),
        })
    }

    /// Object id of the relation.
    pub fn rel_oid(&self) -> u32 {
        self.rel_oid
    }

    /// Column layout of the relation.
    pub fn desc(&self) -> &TupleDesc {
        self.config.desc()
    }

    /// Validated relation options.
    pub fn options(&self) -> &RelOptions {
        &self.options
    }

    /// Write and read settings shared by the relation's partitions.
    pub fn config(&self) -> &Arc<PartitionConfig> {
        &self.config
    }

    /// Rollover policy for new micro-partitions.
    pub fn split_strategy(&self) -> &Arc<dyn SplitStrategy> {
        &self.split
    }
}

impl fmt::Debug for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("rel_oid", &self.rel_oid)
            .field("options", &self.options)
            .finish()
    }
}
