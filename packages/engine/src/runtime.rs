//! Wiring of the engine services over a set of backends.

use std::sync::Arc;

use ci_core::EngineConfig;
use db::repositories::{
    JobRepository, PipelineRepository, ResourceRepository, TraceChunkRepository,
};
use db::{DbConfig, JobStore, MemoryStore, PipelineStore, ResourceStore, TraceChunkStore};
use storage::{CacheTier, LeaseBackend, MemoryCache, MemoryLeases, Storage, StorageConfig};

use crate::{
    CloneRetryService, DependencyResolver, EngineResult, ExpiryArtifactStore, JobStateMachine,
    Outbox, PipelineStatusUpdater, ResourceGroupCoordinator, ShellStyleExpander, TraceLogStore,
};

/// Stores and tiers the services run against.
#[derive(Clone)]
pub struct Backends {
    pub jobs: Arc<dyn JobStore>,
    pub pipelines: Arc<dyn PipelineStore>,
    pub resources: Arc<dyn ResourceStore>,
    pub chunks: Arc<dyn TraceChunkStore>,
    pub cache: Arc<dyn CacheTier>,
    pub durable: Storage,
    pub leases: Arc<dyn LeaseBackend>,
}

impl Backends {
    /// Everything in process memory.
    pub async fn in_memory() -> EngineResult<Self> {
        let store = Arc::new(MemoryStore::new());
        Ok(Self {
            jobs: store.clone(),
            pipelines: store.clone(),
            resources: store.clone(),
            chunks: store,
            cache: Arc::new(MemoryCache::new()),
            durable: Storage::memory().await?,
            leases: Arc::new(MemoryLeases::new()),
        })
    }

    /// SurrealDB for records and the configured object storage for durable
    /// chunks. Cache tier and leases stay in process.
    pub async fn surrealdb(db_config: DbConfig, storage: StorageConfig) -> EngineResult<Self> {
        db::init(db_config).await?;
        let durable = Storage::new(storage).await?;
        tracing::info!("Durable trace storage: {}", durable.kind().as_str());
        Ok(Self {
            jobs: Arc::new(JobRepository),
            pipelines: Arc::new(PipelineRepository),
            resources: Arc::new(ResourceRepository),
            chunks: Arc::new(TraceChunkRepository),
            cache: Arc::new(MemoryCache::new()),
            durable,
            leases: Arc::new(MemoryLeases::new()),
        })
    }

    /// [`Backends::surrealdb`] configured from `CI_DB_*` and `STORAGE_*`
    /// environment variables.
    pub async fn from_env() -> EngineResult<Self> {
        Self::surrealdb(DbConfig::from_env(), StorageConfig::from_env()?).await
    }
}

/// The engine services, sharing one outbox.
#[derive(Clone)]
pub struct Engine {
    pub config: EngineConfig,
    pub backends: Backends,
    pub outbox: Outbox,
    pub coordinator: Arc<ResourceGroupCoordinator>,
    pub resolver: Arc<DependencyResolver>,
    pub state_machine: Arc<JobStateMachine>,
    pub traces: Arc<TraceLogStore>,
    pub pipeline_status: Arc<PipelineStatusUpdater>,
}

impl Engine {
    pub fn new(config: EngineConfig, backends: Backends) -> Self {
        let outbox = Outbox::new(config.outbox_capacity());

        let coordinator = Arc::new(ResourceGroupCoordinator::new(
            backends.resources.clone(),
            backends.jobs.clone(),
            outbox.clone(),
            config.resource_groups.clone(),
        ));
        let resolver = Arc::new(DependencyResolver::new(
            backends.jobs.clone(),
            backends.pipelines.clone(),
            Arc::new(ExpiryArtifactStore),
            Arc::new(ShellStyleExpander),
        ));
        let retries = Arc::new(CloneRetryService::new(
            backends.jobs.clone(),
            config.jobs.transition_retries,
        ));
        let state_machine = Arc::new(JobStateMachine::new(
            backends.jobs.clone(),
            coordinator.clone(),
            resolver.clone(),
            retries,
            outbox.clone(),
            config.jobs.clone(),
        ));
        let traces = Arc::new(TraceLogStore::new(
            backends.chunks.clone(),
            backends.cache.clone(),
            backends.durable.clone(),
            backends.leases.clone(),
            outbox.clone(),
            config.trace.clone(),
        ));
        let pipeline_status = Arc::new(PipelineStatusUpdater::new(
            backends.pipelines.clone(),
            backends.jobs.clone(),
            outbox.clone(),
            config.jobs.transition_retries,
        ));

        tracing::info!(
            "Engine ready (chunk size {} bytes, stale threshold {}s)",
            config.trace.chunk_size,
            config.resource_groups.stale_threshold_secs
        );

        Self {
            config,
            backends,
            outbox,
            coordinator,
            resolver,
            state_machine,
            traces,
            pipeline_status,
        }
    }

    pub async fn in_memory(config: EngineConfig) -> EngineResult<Self> {
        Ok(Self::new(config, Backends::in_memory().await?))
    }

    /// Engine settings from `CI_*` variables over [`Backends::from_env`].
    pub async fn from_env() -> EngineResult<Self> {
        let config = EngineConfig::from_env()?;
        Ok(Self::new(config, Backends::from_env().await?))
    }
}
