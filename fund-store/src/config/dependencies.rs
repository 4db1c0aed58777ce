//! Dependency initialization and wiring for the fund store.

use std::sync::{Arc, Mutex};
use tracing::{error, info};

use super::settings::{Settings, ShardBackend};
use crate::lock::RunLock;
use crate::AppError;
use fund_store_pipeline::{
    FailureHook, FundPostprocessor, HttpClient, JsonFeedSource, LoaderConfig, Orchestrator,
    OrchestratorConfig, PipelineError, RetryExecutor,
};
use fund_store_repository::{IndexConfig, InMemoryShard, OpenSearchShard, Shard, ShardedRepository};
use fund_store_shared::Fund;

/// Failure hook that terminates the process.
///
/// A failed ingestion task needs operator attention, so nothing after it
/// runs. A run lock handed to the hook is released before exiting.
#[derive(Debug, Default)]
pub struct ExitFailureHook {
    lock: Mutex<Option<RunLock>>,
}

impl ExitFailureHook {
    pub fn holding(lock: RunLock) -> Self {
        Self {
            lock: Mutex::new(Some(lock)),
        }
    }
}

impl FailureHook for ExitFailureHook {
    fn on_failure(&self, task: &str, error: &PipelineError) {
        error!(task = task, error = %error, "Task failed, exiting");
        if let Ok(mut lock) = self.lock.lock() {
            lock.take();
        }
        std::process::exit(-1);
    }
}

/// Container for all initialized dependencies.
pub struct Dependencies {
    pub settings: Settings,
    /// The fund repository over every configured shard.
    pub repository: Arc<ShardedRepository<Fund>>,
    failure_hook: Arc<dyn FailureHook>,
}

impl Dependencies {
    /// Connect every shard and build the repository.
    ///
    /// # Returns
    ///
    /// * `Ok(Dependencies)` - Initialized dependencies
    /// * `Err(AppError)` - If a shard cannot be created
    pub async fn new(settings: Settings) -> Result<Self, AppError> {
        info!(
            backend = ?settings.backend,
            shard_urls = ?settings.shard_urls,
            index = %settings.fund_index,
            "Initializing dependencies"
        );

        let shards = build_shards(&settings).await?;
        let repository = Arc::new(ShardedRepository::new(shards)?);
        info!(shards = repository.shard_count(), "Repository ready");

        Ok(Self {
            settings,
            repository,
            failure_hook: Arc::new(ExitFailureHook::default()),
        })
    }

    /// Replace the hook given to every orchestrator.
    pub fn with_failure_hook(mut self, hook: Arc<dyn FailureHook>) -> Self {
        self.failure_hook = hook;
        self
    }

    /// Build the ingestion orchestrator; requires the fund feed settings.
    pub fn orchestrator(&self) -> Result<Orchestrator, AppError> {
        let settings = &self.settings;
        let catalog_url = settings
            .catalog_url
            .clone()
            .ok_or_else(|| AppError::config("CATALOG_URL is required for ingestion tasks"))?;
        let fund_url_template = settings
            .fund_url_template
            .clone()
            .ok_or_else(|| AppError::config("FUND_URL_TEMPLATE is required for ingestion tasks"))?;

        let executor = Arc::new(RetryExecutor::new(settings.executor.clone()));
        let http = HttpClient::new(executor, settings.http_timeout)
            .map_err(|e| AppError::config(format!("Failed to create HTTP client: {}", e)))?;
        let source = JsonFeedSource::new(Arc::new(http), catalog_url, fund_url_template)?;

        let config = OrchestratorConfig {
            parallelism: settings.parallelism,
            loader: LoaderConfig::with_batch_size(settings.batch_size),
        };

        Ok(Orchestrator::with_config(
            Arc::new(source),
            FundPostprocessor::new(settings.lookbacks.clone()),
            Arc::clone(&self.repository),
            config,
        )
        .with_failure_hook(Arc::clone(&self.failure_hook)))
    }
}

async fn build_shards(settings: &Settings) -> Result<Vec<Arc<dyn Shard>>, AppError> {
    match settings.backend {
        ShardBackend::Memory => Ok((0..settings.shard_count)
            .map(|i| Arc::new(InMemoryShard::new(settings.shard_index(i))) as Arc<dyn Shard>)
            .collect()),
        ShardBackend::OpenSearch => {
            let mut shards: Vec<Arc<dyn Shard>> = Vec::with_capacity(settings.shard_urls.len());
            for (i, url) in settings.shard_urls.iter().enumerate() {
                let config = IndexConfig::for_record::<Fund>(settings.shard_index(i));
                let shard = OpenSearchShard::new(url, config)
                    .await
                    .map_err(|e| AppError::config(format!("Failed to create shard {}: {}", i, e)))?;
                shards.push(Arc::new(shard));
            }
            Ok(shards)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_settings(vars: &[(&str, &str)]) -> Settings {
        let mut all = vec![("SHARD_BACKEND", "memory")];
        all.extend_from_slice(vars);
        Settings::from_lookup(|key| {
            all.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_memory_backend_builds_configured_shards() {
        let deps = Dependencies::new(memory_settings(&[("SHARD_COUNT", "3")])).await.unwrap();

        assert_eq!(deps.repository.shard_count(), 3);
        assert_eq!(deps.repository.shards()[2].name(), "funds-shard-2");
    }

    #[tokio::test]
    async fn test_zero_shards_is_an_error() {
        let result = Dependencies::new(memory_settings(&[("SHARD_COUNT", "0")])).await;
        assert!(matches!(result, Err(AppError::RepositoryError(_))));
    }

    #[tokio::test]
    async fn test_orchestrator_requires_feed_urls() {
        let deps = Dependencies::new(memory_settings(&[])).await.unwrap();
        assert!(matches!(deps.orchestrator(), Err(AppError::ConfigError(_))));

        let deps = Dependencies::new(memory_settings(&[
            ("CATALOG_URL", "http://feed/isins"),
            ("FUND_URL_TEMPLATE", "http://feed/funds/{isin}"),
        ]))
        .await
        .unwrap();
        assert!(deps.orchestrator().is_ok());
    }
}
