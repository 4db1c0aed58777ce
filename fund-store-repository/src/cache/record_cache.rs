//! In-process read cache over a sharded repository.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::store::SnapshotStore;
use crate::errors::RepositoryError;
use crate::query::QueryOptions;
use crate::repository::ShardedRepository;
use fund_store_shared::Record;

/// Configuration for a [`RecordCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Time between background refreshes.
    pub refresh_interval: Duration,
    /// Query defining which records are cached.
    pub query: QueryOptions,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60 * 60),
            query: QueryOptions::default(),
        }
    }
}

impl CacheConfig {
    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self
    }

    pub fn with_query(mut self, query: QueryOptions) -> Self {
        self.query = query;
        self
    }
}

/// Where the current snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    /// Never loaded.
    Empty,
    Repository,
    /// Loaded from the snapshot store after a failed refresh.
    Store,
}

/// An immutable set of cached records.
#[derive(Debug)]
pub struct CacheSnapshot<R> {
    records: Vec<R>,
    by_key: HashMap<String, usize>,
    source: SnapshotSource,
    loaded_at: Option<DateTime<Utc>>,
}

impl<R: Record> CacheSnapshot<R> {
    fn empty() -> Self {
        Self {
            records: Vec::new(),
            by_key: HashMap::new(),
            source: SnapshotSource::Empty,
            loaded_at: None,
        }
    }

    fn new(records: Vec<R>, source: SnapshotSource) -> Self {
        let by_key = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.key().to_string(), i))
            .collect();
        Self {
            records,
            by_key,
            source,
            loaded_at: Some(Utc::now()),
        }
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn get(&self, key: &str) -> Option<&R> {
        self.by_key.get(key).map(|i| &self.records[*i])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn source(&self) -> SnapshotSource {
        self.source
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }
}

struct CacheState<R: Record> {
    repository: Arc<ShardedRepository<R>>,
    store: Option<Arc<dyn SnapshotStore>>,
    query: QueryOptions,
    snapshot: RwLock<Arc<CacheSnapshot<R>>>,
}

impl<R: Record> CacheState<R> {
    async fn refresh(&self) -> Result<SnapshotSource, RepositoryError> {
        match self.repository.list_complete(&self.query).await {
            Ok(records) => {
                self.persist(&records).await;
                let count = records.len();
                *self.snapshot.write().await =
                    Arc::new(CacheSnapshot::new(records, SnapshotSource::Repository));
                info!(records = count, "Cache refreshed");
                Ok(SnapshotSource::Repository)
            }
            Err(e) => {
                error!(error = %e, "Cache refresh failed");
                self.fall_back(e).await
            }
        }
    }

    async fn persist(&self, records: &[R]) {
        let Some(store) = &self.store else {
            return;
        };
        let documents = match records.iter().map(R::to_document).collect::<Result<Vec<_>, _>>() {
            Ok(documents) => documents,
            Err(e) => {
                warn!(error = %e, "Failed to serialize cache snapshot");
                return;
            }
        };
        if let Err(e) = store.save(&documents).await {
            warn!(error = %e, "Failed to persist cache snapshot");
        }
    }

    /// Serve the stored snapshot if one exists and nothing better is loaded.
    async fn fall_back(&self, cause: RepositoryError) -> Result<SnapshotSource, RepositoryError> {
        let current = self.snapshot.read().await.source();
        if current == SnapshotSource::Repository {
            warn!("Keeping previous snapshot");
            return Err(cause);
        }

        let Some(store) = &self.store else {
            return Err(cause);
        };
        let documents = match store.load().await {
            Ok(Some(documents)) => documents,
            Ok(None) => {
                warn!("No stored snapshot to fall back to");
                return Err(cause);
            }
            Err(e) => {
                error!(error = %e, "Failed to load stored snapshot");
                return Err(cause);
            }
        };

        let records = documents
            .into_iter()
            .map(R::from_document)
            .collect::<Result<Vec<_>, _>>()?;
        info!(records = records.len(), "Serving cache from stored snapshot");
        *self.snapshot.write().await = Arc::new(CacheSnapshot::new(records, SnapshotSource::Store));
        Ok(SnapshotSource::Store)
    }
}

/// Keeps a full snapshot of the repository in memory and refreshes it on a
/// timer.
///
/// Readers take the snapshot under a read lock and get an `Arc` to an
/// immutable value; a refresh swaps the whole snapshot at once.
pub struct RecordCache<R: Record> {
    state: Arc<CacheState<R>>,
    refresh_interval: Duration,
    shutdown_tx: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<R: Record> RecordCache<R> {
    pub fn new(repository: Arc<ShardedRepository<R>>, config: CacheConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            state: Arc::new(CacheState {
                repository,
                store: None,
                query: config.query,
                snapshot: RwLock::new(Arc::new(CacheSnapshot::empty())),
            }),
            refresh_interval: config.refresh_interval,
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    /// Create a cache that persists snapshots and falls back to them.
    pub fn with_store(
        repository: Arc<ShardedRepository<R>>,
        config: CacheConfig,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            state: Arc::new(CacheState {
                repository,
                store: Some(store),
                query: config.query,
                snapshot: RwLock::new(Arc::new(CacheSnapshot::empty())),
            }),
            refresh_interval: config.refresh_interval,
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    /// Load the first snapshot and start the background refresh task.
    ///
    /// Fails only if neither the repository nor the store could provide a
    /// snapshot.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<SnapshotSource, RepositoryError> {
        let source = self.state.refresh().await?;

        let state = Arc::clone(&self.state);
        let refresh_interval = self.refresh_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresh_interval);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = state.refresh().await {
                            warn!(error = %e, "Background cache refresh failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Cache refresh task stopping");
                        break;
                    }
                }
            }
        });

        if let Some(previous) = self.task.lock().await.replace(handle) {
            previous.abort();
        }
        Ok(source)
    }

    /// Refresh now.
    pub async fn refresh(&self) -> Result<SnapshotSource, RepositoryError> {
        self.state.refresh().await
    }

    /// The current snapshot.
    pub async fn snapshot(&self) -> Arc<CacheSnapshot<R>> {
        Arc::clone(&*self.state.snapshot.read().await)
    }

    /// Look up one record by key.
    pub async fn get(&self, key: &str) -> Option<R> {
        self.state.snapshot.read().await.get(key).cloned()
    }

    /// Stop the background task and wait for it to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.task.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Cache refresh task ended abnormally");
            }
        }
        info!("Cache shutdown complete");
    }
}
