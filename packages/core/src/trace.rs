//! Trace chunks: fixed-capacity slices of a job's log.

use std::cmp::Ordering;
use std::ops::Range;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::JobId;

/// Default capacity of a single chunk in bytes.
pub const CHUNK_SIZE: usize = 128 * 1024;

/// Tier currently holding a chunk's bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataStore {
    /// Fast, volatile tier accepting appends.
    #[default]
    Cache,
    /// Object storage; chunks land here once full or archived.
    Durable,
}

impl DataStore {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataStore::Cache => "cache",
            DataStore::Durable => "durable",
        }
    }
}

/// Metadata of one chunk. The payload lives in the tier named by `data_store`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceChunk {
    pub job_id: JobId,
    pub chunk_index: u64,
    #[serde(default)]
    pub data_store: DataStore,
    /// blake3 of the payload, recorded on promotion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TraceChunk {
    pub fn new(job_id: JobId, chunk_index: u64) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            chunk_index,
            data_store: DataStore::Cache,
            checksum: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Payload is in the cache tier.
    pub fn is_live(&self) -> bool {
        self.data_store == DataStore::Cache
    }

    /// Payload has been promoted to durable storage.
    pub fn is_flushed(&self) -> bool {
        self.data_store == DataStore::Durable
    }

    /// Name of the lease guarding writes to this chunk.
    pub fn lease_key(&self) -> String {
        format!("trace_write:{}:chunks:{}", self.job_id, self.chunk_index)
    }

    /// Lease held while appending at the end of a job's whole log.
    pub fn log_lease_key(job_id: JobId) -> String {
        format!("trace_write:{job_id}:log")
    }

    pub fn cache_key(&self) -> String {
        format!("trace:{}:chunks:{}", self.job_id, self.chunk_index)
    }

    pub fn durable_key(&self) -> String {
        format!("traces/{}/chunks/{}.log", self.job_id, self.chunk_index)
    }

    /// First log offset covered by this chunk.
    pub fn start_offset(&self, chunk_size: usize) -> u64 {
        self.chunk_index * chunk_size as u64
    }

    /// Log byte range covered by this chunk given its current size.
    pub fn range(&self, chunk_size: usize, size: usize) -> Range<u64> {
        let start = self.start_offset(chunk_size);
        start..start + size as u64
    }
}

/// Chunks order by index within one job and are unordered across jobs.
impl PartialOrd for TraceChunk {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        (self.job_id == other.job_id).then(|| self.chunk_index.cmp(&other.chunk_index))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("offset {offset} is out of range (chunk size {size})")]
    OffsetOutOfRange { offset: i64, size: usize },
    #[error("chunk size overflow: {offset} + {len} exceeds {capacity}")]
    Overflow {
        offset: usize,
        len: usize,
        capacity: usize,
    },
}

/// Compute a chunk's content after writing `new_data` at `offset`.
///
/// Everything past `offset` is discarded, so an empty write truncates.
pub fn splice(
    current: &[u8],
    new_data: &[u8],
    offset: i64,
    capacity: usize,
) -> Result<Vec<u8>, ChunkError> {
    let at = usize::try_from(offset)
        .ok()
        .filter(|at| *at <= current.len())
        .ok_or(ChunkError::OffsetOutOfRange {
            offset,
            size: current.len(),
        })?;

    if at + new_data.len() > capacity {
        return Err(ChunkError::Overflow {
            offset: at,
            len: new_data.len(),
            capacity,
        });
    }

    let mut content = Vec::with_capacity(at + new_data.len());
    content.extend_from_slice(&current[..at]);
    content.extend_from_slice(new_data);
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splice_appends_and_overwrites() {
        assert_eq!(splice(b"hello", b"world", 5, 10), Ok(b"helloworld".to_vec()));
        assert_eq!(splice(b"helloworld", b"WORLD", 5, 10), Ok(b"helloWORLD".to_vec()));
        assert_eq!(splice(b"helloworld", b"", 5, 10), Ok(b"hello".to_vec()));
    }

    #[test]
    fn splice_rejects_bad_offsets() {
        assert_eq!(
            splice(b"hello", b"x", -1, 10),
            Err(ChunkError::OffsetOutOfRange { offset: -1, size: 5 })
        );
        assert_eq!(
            splice(b"hello", b"x", 6, 10),
            Err(ChunkError::OffsetOutOfRange { offset: 6, size: 5 })
        );
        assert_eq!(
            splice(b"helloworld", b"!", 10, 10),
            Err(ChunkError::Overflow {
                offset: 10,
                len: 1,
                capacity: 10
            })
        );
    }

    #[test]
    fn chunk_addressing() {
        let chunk = TraceChunk::new(JobId(42), 3);
        assert_eq!(chunk.lease_key(), "trace_write:42:chunks:3");
        assert_eq!(TraceChunk::log_lease_key(JobId(42)), "trace_write:42:log");
        assert_eq!(chunk.durable_key(), "traces/42/chunks/3.log");
        assert_eq!(chunk.range(10, 4), 30..34);
        assert!(chunk.is_live());
        assert!(!chunk.is_flushed());
    }

    #[test]
    fn chunks_of_different_jobs_are_unordered() {
        let a = TraceChunk::new(JobId(1), 0);
        let b = TraceChunk::new(JobId(1), 1);
        let other = TraceChunk::new(JobId(2), 0);
        assert!(a < b);
        assert_eq!(a.partial_cmp(&other), None);
    }
}
