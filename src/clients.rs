//! Shared Clients
//!
//! Process-wide handle on the session store, the object sink and the expiry
//! reaper that watches the store. Initialization runs exactly once, even when
//! several callers race for it; `shutdown` stops the reaper and releases the
//! store connection.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

use crate::config::{Config, StoreBackend};
use crate::error::Result;
use crate::kv::{KeyValueStore, KvError, MemoryStore, RedisStore};
use crate::storage::{ObjectSink, S3Client};
use crate::upload::{ArtifactLayout, Publisher, Reaper, ReaperHandle, SessionRegistry, UploadService};

// ============================================================================
// Clients
// ============================================================================

/// One-shot holder for [`SharedClients`]
#[derive(Default)]
pub struct Clients {
    cell: OnceCell<SharedClients>,
}

impl Clients {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    /// Connect the configured store and sink on first call
    pub async fn get_or_connect(&self, config: &Config) -> Result<&SharedClients> {
        self.cell
            .get_or_try_init(|| SharedClients::connect(config))
            .await
    }

    /// Like [`Clients::get_or_connect`] with caller-provided backends
    ///
    /// The backends are ignored when the clients are already initialized.
    pub async fn get_or_start(
        &self,
        config: &Config,
        store: Arc<dyn KeyValueStore>,
        sink: Arc<dyn ObjectSink>,
    ) -> Result<&SharedClients> {
        self.cell
            .get_or_try_init(|| SharedClients::start(config, store, sink, None))
            .await
    }

    pub fn get(&self) -> Option<&SharedClients> {
        self.cell.get()
    }

    /// Stop the reaper, wait for its in-flight cleanups, drop connections
    pub async fn shutdown(self) {
        match self.cell.into_inner() {
            Some(shared) => shared.shutdown().await,
            None => tracing::debug!("Shared clients were never initialized"),
        }
    }
}

// ============================================================================
// Shared Clients
// ============================================================================

pub struct SharedClients {
    store: Arc<dyn KeyValueStore>,
    uploads: UploadService,
    reaper: ReaperHandle,
    sweeper: Option<JoinHandle<()>>,
}

impl SharedClients {
    async fn connect(config: &Config) -> Result<Self> {
        let (store, sweeper): (Arc<dyn KeyValueStore>, _) = match config.store.backend {
            StoreBackend::Memory => {
                let store = MemoryStore::new();
                let sweeper = store.start_sweeper(config.store.sweep_interval);
                tracing::info!("Using in-process session store");
                (Arc::new(store), Some(sweeper))
            }
            StoreBackend::Redis => {
                let store =
                    RedisStore::connect(&config.store.url, config.store.connect_timeout).await?;
                tracing::info!(url = %config.store.url, "Using Redis session store");
                (Arc::new(store), None)
            }
        };

        let sink = S3Client::new(&config.storage).await?;
        tracing::info!(
            endpoint = %config.storage.endpoint,
            bucket = %config.storage.bucket,
            "Connected to object storage"
        );

        Self::start(config, store, Arc::new(sink), sweeper).await
    }

    async fn start(
        config: &Config,
        store: Arc<dyn KeyValueStore>,
        sink: Arc<dyn ObjectSink>,
        sweeper: Option<JoinHandle<()>>,
    ) -> Result<Self> {
        let timeout = config.store.connect_timeout;
        let expired = tokio::time::timeout(timeout, store.subscribe_expired())
            .await
            .map_err(|_| KvError::Timeout(timeout))??;

        let registry = SessionRegistry::new(store.clone());
        let layout = ArtifactLayout::new(&config.uploads.staging_dir, &config.uploads.final_dir);
        let publisher = Publisher::new(
            sink,
            config.storage.bucket.clone(),
            config.storage.key_prefix.clone(),
        );
        let uploads = UploadService::new(registry, layout, publisher, config.uploads.session_ttl);

        let reaper = Reaper::spawn(uploads.cleanup().clone(), expired);

        Ok(Self {
            store,
            uploads,
            reaper,
            sweeper,
        })
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn uploads(&self) -> &UploadService {
        &self.uploads
    }

    async fn shutdown(self) {
        self.reaper.shutdown().await;
        if let Some(sweeper) = self.sweeper {
            sweeper.abort();
        }
        tracing::info!("Shared clients shut down");
    }
}
