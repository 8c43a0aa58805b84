use super::{Catalog, CatalogError, MicroPartitionMetadata, Snapshot};

/// The live micro-partitions of one relation under one snapshot.
///
/// The catalog is scanned once when the handle is created and the whole list
/// is buffered; iterators replay that list.
#[derive(Debug, Clone)]
pub struct TableMetadata {
    rel_oid: u32,
    snapshot: Snapshot,
    partitions: Vec<MicroPartitionMetadata>,
}

impl TableMetadata {
    /// Scan the live micro-partitions of `rel_oid` under `snapshot`.
    pub fn create(
        catalog: &dyn Catalog,
        rel_oid: u32,
        snapshot: Snapshot,
    ) -> Result<Self, CatalogError> {
        let partitions = catalog.scan(rel_oid, snapshot)?;
        Ok(Self {
            rel_oid,
            snapshot,
            partitions,
        })
    }

    /// Relation the partitions belong to.
    pub fn rel_oid(&self) -> u32 {
        self.rel_oid
    }

    /// Snapshot the partitions were read under.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot
    }

    /// Partitions in registration order.
    pub fn partitions(&self) -> &[MicroPartitionMetadata] {
        &self.partitions
    }

    /// Number of partitions.
    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Sum of the tuple counts of every partition.
    pub fn num_tuples(&self) -> u64 {
        self.partitions.iter().map(|p| p.tuple_count).sum()
    }

    /// On-disk bytes of every partition.
    pub fn total_file_size(&self) -> u64 {
        self.partitions.iter().map(|p| p.file_size).sum()
    }

    /// Finite, non-restartable pass over the partitions.
    pub fn new_iterator(&self) -> MetadataIterator {
        MetadataIterator::new(self.partitions.clone())
    }

    /// Same as [`Self::new_iterator`] restricted to the partitions accepted
    /// by `keep`.
    pub fn filtered_iterator<F>(&self, mut keep: F) -> MetadataIterator
    where
        F: FnMut(&MicroPartitionMetadata) -> bool,
    {
        MetadataIterator::new(self.partitions.iter().filter(|p| keep(p)).cloned().collect())
    }
}

/// Iterator over the partitions kept by a filter.
#[derive(Debug)]
pub struct MetadataIterator {
    inner: std::vec::IntoIter<MicroPartitionMetadata>,
}

impl MetadataIterator {
    pub(crate) fn new(partitions: Vec<MicroPartitionMetadata>) -> Self {
        Self {
            inner: partitions.into_iter(),
        }
    }
}

impl Iterator for MetadataIterator {
    type Item = MicroPartitionMetadata;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for MetadataIterator {}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::{
        catalog::AuxCatalog,
        id::BlockId,
        partition::{PartitionStats, WriteSummary},
    };

    fn summary(seed: u8, rows: u64) -> WriteSummary {
        WriteSummary {
            file_name: PathBuf::from(format!("/tmp/{seed}")),
            block_id: BlockId::from_bytes([seed; 16]),
            file_size: 100,
            num_tuples: rows,
            rel_oid: 3,
            stats: PartitionStats::default(),
        }
    }

    #[test]
    fn iterates_snapshot_in_registration_order() {
        let catalog = AuxCatalog::in_memory();
        for seed in 1..=3 {
            catalog.register(&summary(seed, u64::from(seed) * 10)).unwrap();
        }
        let metadata = TableMetadata::create(&catalog, 3, catalog.snapshot()).unwrap();
        assert_eq!(metadata.num_partitions(), 3);
        assert_eq!(metadata.num_tuples(), 60);
        assert_eq!(metadata.total_file_size(), 300);

        let mut iter = metadata.new_iterator();
        assert_eq!(iter.len(), 3);
        let first = iter.next().unwrap();
        assert_eq!(first.micro_partition_id, BlockId::from_bytes([1; 16]));
        assert_eq!(iter.by_ref().count(), 2);
        assert!(iter.next().is_none());

        // registered after the handle was created
        catalog.register(&summary(4, 1)).unwrap();
        assert_eq!(metadata.new_iterator().count(), 3);

        let filtered = metadata.filtered_iterator(|p| p.tuple_count > 10);
        assert_eq!(filtered.len(), 2);
    }
}
