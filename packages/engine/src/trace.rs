//! Job traces as chunked, append-only logs over a cache and a durable tier.

use std::ops::Range;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use ci_core::trace::splice;
use ci_core::{DataStore, EngineEvent, JobId, TraceChunk, TraceConfig};
use db::TraceChunkStore;
use storage::{CacheTier, LeaseBackend, LeasePolicy, Storage, in_lock};

use crate::{EngineResult, Outbox};

/// A chunk as seen by one caller, with its size memoized.
#[derive(Debug, Clone)]
pub struct ChunkHandle {
    chunk: TraceChunk,
    size: Option<usize>,
}

impl ChunkHandle {
    pub fn chunk(&self) -> &TraceChunk {
        &self.chunk
    }

    pub fn job_id(&self) -> JobId {
        self.chunk.job_id
    }

    pub fn index(&self) -> u64 {
        self.chunk.chunk_index
    }
}

pub struct TraceLogStore {
    chunks: Arc<dyn TraceChunkStore>,
    cache: Arc<dyn CacheTier>,
    durable: Storage,
    leases: Arc<dyn LeaseBackend>,
    outbox: Outbox,
    config: TraceConfig,
}

impl TraceLogStore {
    pub fn new(
        chunks: Arc<dyn TraceChunkStore>,
        cache: Arc<dyn CacheTier>,
        durable: Storage,
        leases: Arc<dyn LeaseBackend>,
        outbox: Outbox,
        config: TraceConfig,
    ) -> Self {
        Self {
            chunks,
            cache,
            durable,
            leases,
            outbox,
            config,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.config.chunk_size
    }

    fn lease_policy(&self) -> LeasePolicy {
        LeasePolicy {
            retries: self.config.write_lock_retries,
            sleep: self.config.write_lock_sleep(),
            ttl: self.config.write_lock_ttl(),
        }
    }

    /// Open chunk `index` of the job's trace, creating it when absent.
    pub async fn chunk(&self, job_id: JobId, index: u64) -> EngineResult<ChunkHandle> {
        let chunk = self.chunks.ensure_chunk(job_id, index).await?;
        Ok(ChunkHandle { chunk, size: None })
    }

    /// Write `data` at `offset`, discarding whatever followed it.
    pub async fn append(
        &self,
        handle: &mut ChunkHandle,
        data: &[u8],
        offset: i64,
    ) -> EngineResult<()> {
        let (job_id, index) = (handle.job_id(), handle.index());
        let lease_key = handle.chunk.lease_key();

        let (chunk, size) = in_lock(
            self.leases.as_ref(),
            &lease_key,
            self.lease_policy(),
            || async move { self.splice_locked(job_id, index, data, offset).await },
        )
        .await?;

        handle.chunk = chunk;
        handle.size = Some(size);

        if size == self.config.chunk_size {
            self.outbox.emit(EngineEvent::ChunkFull {
                job_id,
                chunk_index: index,
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }

    /// Cut the chunk at `offset`.
    pub async fn truncate(&self, handle: &mut ChunkHandle, offset: i64) -> EngineResult<()> {
        self.append(handle, &[], offset).await
    }

    /// Read-modify-write of one chunk. Callers hold its lease.
    async fn splice_locked(
        &self,
        job_id: JobId,
        index: u64,
        data: &[u8],
        offset: i64,
    ) -> EngineResult<(TraceChunk, usize)> {
        let mut chunk = self.chunks.ensure_chunk(job_id, index).await?;
        let current = self.read_chunk(&chunk).await?;
        let content = splice(&current, data, offset, self.config.chunk_size)?;
        if content == current.as_ref() {
            return Ok((chunk, content.len()));
        }

        let size = content.len();
        self.cache.set(&chunk.cache_key(), Bytes::from(content)).await?;

        if chunk.is_flushed() {
            tracing::debug!("Trace chunk {} of job {} moves back to cache", index, job_id);
            if let Err(e) = self.durable.delete(&chunk.durable_key()).await {
                tracing::warn!("Failed to delete durable copy {}: {}", chunk.durable_key(), e);
            }
            chunk.data_store = DataStore::Cache;
            chunk.checksum = None;
        }
        chunk.updated_at = Utc::now();
        let chunk = self.chunks.save_chunk(&chunk).await?;
        Ok((chunk, size))
    }

    /// Bytes in the chunk, read from the cache tier first.
    pub async fn size(&self, handle: &mut ChunkHandle) -> EngineResult<usize> {
        if let Some(size) = handle.size {
            return Ok(size);
        }
        let size = self.stored_size(&handle.chunk).await?;
        handle.size = Some(size);
        Ok(size)
    }

    /// The chunk's current payload.
    pub async fn data(&self, handle: &mut ChunkHandle) -> EngineResult<Bytes> {
        let data = self.read_chunk(&handle.chunk).await?;
        handle.size = Some(data.len());
        Ok(data)
    }

    /// Log byte range the chunk currently covers.
    pub async fn range(&self, handle: &mut ChunkHandle) -> EngineResult<Range<u64>> {
        let size = self.size(handle).await?;
        Ok(handle.chunk.range(self.config.chunk_size, size))
    }

    /// Move a chunk's payload to the durable tier. Idempotent.
    ///
    /// Returns `false` when there was nothing to promote.
    pub async fn promote_to_durable(&self, job_id: JobId, index: u64) -> EngineResult<bool> {
        let lease_key = TraceChunk::new(job_id, index).lease_key();
        in_lock(
            self.leases.as_ref(),
            &lease_key,
            self.lease_policy(),
            || async move { self.promote_locked(job_id, index).await },
        )
        .await
    }

    async fn promote_locked(&self, job_id: JobId, index: u64) -> EngineResult<bool> {
        let Some(mut chunk) = self.chunks.find_chunk(job_id, index).await? else {
            return Ok(false);
        };
        if chunk.is_flushed() {
            return Ok(false);
        }
        let data = self.cache.get(&chunk.cache_key()).await?.unwrap_or_default();
        if data.is_empty() {
            return Ok(false);
        }

        let checksum = blake3::hash(&data).to_hex().to_string();
        self.durable.put_bytes(&chunk.durable_key(), data).await?;

        chunk.data_store = DataStore::Durable;
        chunk.checksum = Some(checksum);
        chunk.updated_at = Utc::now();
        self.chunks.save_chunk(&chunk).await?;
        self.cache.delete(&chunk.cache_key()).await?;

        tracing::debug!("Promoted trace chunk {} of job {}", index, job_id);
        Ok(true)
    }

    /// Append at the end of the job's log, opening new chunks as they fill.
    ///
    /// Writers of one log are serialized on the job's log lease, so the end
    /// offset cannot move between reading it and writing there. Returns the
    /// log size afterwards.
    pub async fn append_log(&self, job_id: JobId, data: &[u8]) -> EngineResult<u64> {
        in_lock(
            self.leases.as_ref(),
            &TraceChunk::log_lease_key(job_id),
            self.lease_policy(),
            || async move { self.append_log_locked(job_id, data).await },
        )
        .await
    }

    async fn append_log_locked(&self, job_id: JobId, data: &[u8]) -> EngineResult<u64> {
        let chunk_size = self.config.chunk_size;
        let last = self
            .chunks
            .chunks_for_job(job_id)
            .await?
            .last()
            .map_or(0, |chunk| chunk.chunk_index);

        let mut handle = self.chunk(job_id, last).await?;
        let mut remaining = data;
        loop {
            let size = self.size(&mut handle).await?;
            let room = chunk_size.saturating_sub(size);
            if room == 0 && !remaining.is_empty() {
                handle = self.chunk(job_id, handle.index() + 1).await?;
                continue;
            }

            let (head, tail) = remaining.split_at(room.min(remaining.len()));
            if !head.is_empty() {
                self.append(&mut handle, head, size as i64).await?;
            }
            remaining = tail;
            if remaining.is_empty() {
                let end = self.range(&mut handle).await?.end;
                return Ok(end);
            }
        }
    }

    /// The whole log, chunks concatenated in index order.
    pub async fn read_log(&self, job_id: JobId) -> EngineResult<Bytes> {
        let mut log = BytesMut::new();
        for chunk in self.chunks.chunks_for_job(job_id).await? {
            log.extend_from_slice(&self.read_chunk(&chunk).await?);
        }
        Ok(log.freeze())
    }

    pub async fn log_size(&self, job_id: JobId) -> EngineResult<u64> {
        let Some(last) = self.chunks.chunks_for_job(job_id).await?.pop() else {
            return Ok(0);
        };
        let size = self.stored_size(&last).await?;
        Ok(last.range(self.config.chunk_size, size).end)
    }

    /// Promote every chunk still in the cache tier, the partial last one
    /// included. Returns how many chunks moved.
    pub async fn archive(&self, job_id: JobId) -> EngineResult<usize> {
        let mut promoted = 0;
        for chunk in self.chunks.chunks_for_job(job_id).await? {
            if chunk.is_live() && self.promote_to_durable(job_id, chunk.chunk_index).await? {
                promoted += 1;
            }
        }
        if promoted > 0 {
            tracing::info!("Archived {} trace chunk(s) of job {}", promoted, job_id);
        }
        Ok(promoted)
    }

    async fn read_chunk(&self, chunk: &TraceChunk) -> EngineResult<Bytes> {
        let data = match chunk.data_store {
            DataStore::Cache => self.cache.get(&chunk.cache_key()).await?,
            DataStore::Durable => self.durable.find_bytes(&chunk.durable_key()).await?,
        };
        Ok(data.unwrap_or_default())
    }

    async fn stored_size(&self, chunk: &TraceChunk) -> EngineResult<usize> {
        if let Some(size) = self.cache.size(&chunk.cache_key()).await? {
            return Ok(size);
        }
        let size = self.durable.size(&chunk.durable_key()).await?.unwrap_or(0);
        Ok(usize::try_from(size).unwrap_or(usize::MAX))
    }
}
