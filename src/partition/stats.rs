use serde::{Deserialize, Serialize};

use crate::types::{Collation, Datum, Row};

/// Null count and value range of one column within a micro-partition.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct ColumnStats {
    /// Attribute index.
    pub attno: usize,
    /// Null values seen.
    pub null_count: u64,
    /// Smallest non-null value.
    pub min: Option<Datum>,
    /// Largest non-null value.
    pub max: Option<Datum>,
}

impl ColumnStats {
    fn new(attno: usize) -> Self {
        Self {
            attno,
            ..Default::default()
        }
    }

    fn update(&mut self, value: Option<&Datum>) {
        let Some(value) = value else {
            self.null_count += 1;
            return;
        };
        let below = self
            .min
            .as_ref()
            .map_or(true, |min| value.total_cmp(min, Collation::C).is_lt());
        if below {
            self.min = Some(value.clone());
        }
        let above = self
            .max
            .as_ref()
            .map_or(true, |max| value.total_cmp(max, Collation::C).is_gt());
        if above {
            self.max = Some(value.clone());
        }
    }

    /// Whether `value` could be stored in this column according to the range.
    pub fn may_contain(&self, value: &Datum) -> bool {
        match (&self.min, &self.max) {
            (Some(min), Some(max)) => {
                value.total_cmp(min, Collation::C).is_ge() && value.total_cmp(max, Collation::C).is_le()
            }
            _ => false,
        }
    }
}

/// Statistics of the `minmax_columns` of one micro-partition.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct PartitionStats {
    /// One entry per tracked column, in attribute order.
    pub columns: Vec<ColumnStats>,
}

impl PartitionStats {
    pub(crate) fn for_columns(attnos: &[usize]) -> Self {
        Self {
            columns: attnos.iter().copied().map(ColumnStats::new).collect(),
        }
    }

    pub(crate) fn update(&mut self, row: &Row) {
        for column in &mut self.columns {
            column.update(row.get(column.attno));
        }
    }

    /// Statistics of attribute `attno`, if tracked.
    pub fn column(&self, attno: usize) -> Option<&ColumnStats> {
        self.columns.iter().find(|c| c.attno == attno)
    }

    /// Whether no column is tracked.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}
