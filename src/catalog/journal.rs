//! On-disk encoding of catalog changes.
//!
//! The journal is a sequence of frames `[len: u32][crc32: u32][payload]`,
//! integers little-endian, the checksum covering the payload only. The
//! payload is a bincode-encoded [`PublishRecord`]. Replay stops at the first
//! frame that is truncated, fails its checksum or does not decode.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{CatalogError, Snapshot};
use crate::{id::BlockId, partition::PartitionStats};

pub(crate) const FRAME_HEADER_SIZE: usize = 8;

/// One added micro-partition as stored in a publish record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct EntryRecord {
    pub(crate) block_id: BlockId,
    pub(crate) file_name: PathBuf,
    pub(crate) tuple_count: u64,
    pub(crate) file_size: u64,
    pub(crate) stats: PartitionStats,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct PublishRecord {
    pub(crate) snapshot: Snapshot,
    pub(crate) rel_oid: u32,
    pub(crate) added: Vec<EntryRecord>,
    pub(crate) removed: Vec<BlockId>,
}

impl PublishRecord {
    pub(crate) fn encode_frame(&self) -> Result<Vec<u8>, CatalogError> {
        let payload = bincode::serialize(self)?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CatalogError::Corrupt(format!("record of {} bytes", payload.len())))?;
        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }
}

/// Result of scanning a journal image.
#[derive(Debug, Default)]
pub(crate) struct Replay {
    pub(crate) records: Vec<PublishRecord>,
    /// Length of the valid prefix; anything past it is a torn tail.
    pub(crate) valid_len: u64,
}

pub(crate) fn replay(bytes: &[u8]) -> Replay {
    let mut replay = Replay::default();
    let mut offset = 0usize;
    while bytes.len() - offset >= FRAME_HEADER_SIZE {
        let header = &bytes[offset..offset + FRAME_HEADER_SIZE];
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let start = offset + FRAME_HEADER_SIZE;
        let Some(end) = start.checked_add(len).filter(|end| *end <= bytes.len()) else {
            break;
        };
        let payload = &bytes[start..end];
        if crc32fast::hash(payload) != crc {
            break;
        }
        match bincode::deserialize::<PublishRecord>(payload) {
            Ok(record) => replay.records.push(record),
            Err(_) => break,
        }
        offset = end;
    }
    replay.valid_len = offset as u64;
    replay
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{partition::ColumnStats, types::Datum};

    fn record(snapshot: u64) -> PublishRecord {
        PublishRecord {
            snapshot: Snapshot::new(snapshot),
            rel_oid: 42,
            added: vec![EntryRecord {
                block_id: BlockId::from_bytes([snapshot as u8; 16]),
                file_name: PathBuf::from("/data/42_pax/x"),
                tuple_count: 100,
                file_size: 4096,
                stats: PartitionStats {
                    columns: vec![ColumnStats {
                        attno: 1,
                        null_count: 3,
                        min: Some(Datum::Text("a".into())),
                        max: Some(Datum::Float8(f64::NAN)),
                    }],
                },
            }],
            removed: vec![BlockId::from_bytes([0xab; 16])],
        }
    }

    #[test]
    fn replays_every_complete_frame() {
        let mut image = record(1).encode_frame().unwrap();
        image.extend(record(2).encode_frame().unwrap());
        let replay = replay(&image);
        assert_eq!(replay.records.len(), 2);
        assert_eq!(replay.valid_len, image.len() as u64);
        assert_eq!(replay.records[1].snapshot, Snapshot::new(2));
        assert_eq!(replay.records[0].added[0].stats.columns[0].null_count, 3);
        let max = replay.records[0].added[0].stats.columns[0].max.clone();
        assert!(matches!(max, Some(Datum::Float8(v)) if v.is_nan()));
    }

    #[test]
    fn stops_at_torn_tail() {
        let first = record(1).encode_frame().unwrap();
        let mut image = first.clone();
        let second = record(2).encode_frame().unwrap();
        image.extend_from_slice(&second[..second.len() - 3]);
        let replay = replay(&image);
        assert_eq!(replay.records.len(), 1);
        assert_eq!(replay.valid_len, first.len() as u64);
    }

    #[test]
    fn stops_at_checksum_mismatch() {
        let mut image = record(1).encode_frame().unwrap();
        let last = image.len() - 1;
        image[last] ^= 0xff;
        let replay = replay(&image);
        assert!(replay.records.is_empty());
        assert_eq!(replay.valid_len, 0);
    }

    #[test]
    fn stops_at_undecodable_payload() {
        let first = record(1).encode_frame().unwrap();
        let mut image = first.clone();
        let garbage = [0xffu8; 3];
        image.extend_from_slice(&(garbage.len() as u32).to_le_bytes());
        image.extend_from_slice(&crc32fast::hash(&garbage).to_le_bytes());
        image.extend_from_slice(&garbage);
        let replay = replay(&image);
        assert_eq!(replay.records.len(), 1);
        assert_eq!(replay.records[0].removed, record(1).removed);
        assert_eq!(replay.valid_len, first.len() as u64);
    }
}
