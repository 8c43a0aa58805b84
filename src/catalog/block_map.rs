use std::{collections::HashMap, sync::Mutex};

use super::CatalogError;
use crate::{
    id::BlockId,
    itemptr::{MAX_BLOCK_NUMBER, MAX_TABLE_NO},
};

#[derive(Debug)]
struct RelationBlocks {
    table_no: u8,
    ids: Vec<BlockId>,
    numbers: HashMap<BlockId, u32>,
}

#[derive(Debug, Default)]
struct BlockMapState {
    next_table_no: u8,
    relations: HashMap<u32, RelationBlocks>,
}

/// Shared mapping from block ids to the dense block numbers carried in row
/// pointers.
///
/// Numbers are handed out on first sight and never reused, so a row pointer
/// obtained from a scan keeps resolving to the same block for the lifetime of
/// the manager. Every relation also gets a table number, assigned round-robin
/// over the table number width.
#[derive(Debug, Default)]
pub struct BlockMapManager {
    inner: Mutex<BlockMapState>,
}

impl BlockMapManager {
    /// Empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// `(table_no, block_number)` of `block_id`, assigning a number when the
    /// block has not been seen yet.
    pub fn block_number(&self, rel_oid: u32, block_id: &BlockId) -> Result<(u8, u32), CatalogError> {
        let mut state = self.inner.lock().expect("block map poisoned");
        let relation = state.relation(rel_oid);
        if let Some(number) = relation.numbers.get(block_id) {
            return Ok((relation.table_no, *number));
        }
        let number = relation.ids.len() as u32;
        if number > MAX_BLOCK_NUMBER {
            return Err(CatalogError::BlockMapFull(rel_oid));
        }
        relation.ids.push(*block_id);
        relation.numbers.insert(*block_id, number);
        Ok((relation.table_no, number))
    }

    /// Reverse lookup used to resolve row pointers.
    pub fn block_id(&self, rel_oid: u32, table_no: u8, block_number: u32) -> Option<BlockId> {
        let state = self.inner.lock().expect("block map poisoned");
        let relation = state.relations.get(&rel_oid)?;
        if relation.table_no != table_no {
            return None;
        }
        relation.ids.get(block_number as usize).copied()
    }

    /// Table number assigned to `rel_oid`.
    pub fn table_no(&self, rel_oid: u32) -> u8 {
        let mut state = self.inner.lock().expect("block map poisoned");
        state.relation(rel_oid).table_no
    }

    /// Number of blocks ever numbered for `rel_oid`.
    pub fn len(&self, rel_oid: u32) -> usize {
        let state = self.inner.lock().expect("block map poisoned");
        state.relations.get(&rel_oid).map_or(0, |r| r.ids.len())
    }
}

impl BlockMapState {
    fn relation(&mut self, rel_oid: u32) -> &mut RelationBlocks {
        let next_table_no = &mut self.next_table_no;
        self.relations.entry(rel_oid).or_insert_with(|| {
            let table_no = *next_table_no;
            *next_table_no = (*next_table_no + 1) % (MAX_TABLE_NO + 1);
            RelationBlocks {
                table_no,
                ids: Vec::new(),
                numbers: HashMap::new(),
            }
        })
    }
}
