//! Orchestrator module for the fund pipeline.
//!
//! Coordinates the source, processor, and loader components.

mod freshness;

pub use freshness::{last_business_day, purge_cutoff, refetch_cutoff, ASOF_FIELD};

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use futures::TryStreamExt;
use tokio::sync::broadcast;
use tracing::{error, info, instrument, warn};

use crate::errors::PipelineError;
use crate::loader::{FundLoader, LoadStats, LoaderConfig};
use crate::processor::FundPostprocessor;
use crate::source::FundSource;
use crate::stage::Pipeline;
use fund_store_repository::{Filter, Projection, QueryOptions, ShardedRepository, Sort};
use fund_store_shared::{Fund, Record};

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Funds fetched and post-processed concurrently.
    pub parallelism: usize,
    pub loader: LoaderConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            parallelism: 5,
            loader: LoaderConfig::default(),
        }
    }
}

/// Outcome of [`Orchestrator::update_funds`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateReport {
    pub load: LoadStats,
    /// Funds deleted because their data is over a month old.
    pub purged: u64,
}

/// Called with every task failure before it is returned.
///
/// Pipeline failures are fatal; the binary installs a hook that exits the
/// process, tests install one that records.
pub trait FailureHook: Send + Sync {
    fn on_failure(&self, task: &str, error: &PipelineError);
}

/// Hook that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFailureHook;

impl FailureHook for LogFailureHook {
    fn on_failure(&self, task: &str, error: &PipelineError) {
        error!(task = task, error = %error, "Task failed");
    }
}

/// Orchestrator that runs the ingestion tasks.
pub struct Orchestrator {
    source: Arc<dyn FundSource>,
    postprocessor: Arc<FundPostprocessor>,
    repository: Arc<ShardedRepository<Fund>>,
    config: OrchestratorConfig,
    hook: Arc<dyn FailureHook>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Orchestrator {
    /// Create a new orchestrator with the given components.
    pub fn new(
        source: Arc<dyn FundSource>,
        postprocessor: FundPostprocessor,
        repository: Arc<ShardedRepository<Fund>>,
    ) -> Self {
        Self::with_config(source, postprocessor, repository, OrchestratorConfig::default())
    }

    /// Create a new orchestrator with custom configuration.
    pub fn with_config(
        source: Arc<dyn FundSource>,
        postprocessor: FundPostprocessor,
        repository: Arc<ShardedRepository<Fund>>,
        config: OrchestratorConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            source,
            postprocessor: Arc::new(postprocessor),
            repository,
            config,
            hook: Arc::new(LogFailureHook),
            shutdown_tx,
        }
    }

    /// Replace the failure hook.
    pub fn with_failure_hook(mut self, hook: Arc<dyn FailureHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn repository(&self) -> &Arc<ShardedRepository<Fund>> {
        &self.repository
    }

    /// Refresh the funds that are due, then purge outdated ones.
    pub async fn update_funds(&self) -> Result<UpdateReport, PipelineError> {
        self.update_funds_at(Utc::now()).await
    }

    /// [`Orchestrator::update_funds`] with an explicit current time.
    ///
    /// A listed fund is due unless it is stored with an `asof` on or after
    /// the last business day. Due funds already stored are fetched oldest
    /// first, then new ones. Fetched funds are stamped with `now` unless
    /// the source set `asof`. After the load, stored funds with an `asof`
    /// more than a month old are deleted.
    ///
    /// Stops at the first failure, or when a shutdown is requested.
    #[instrument(skip(self), fields(parallelism = self.config.parallelism))]
    pub async fn update_funds_at(&self, now: DateTime<Utc>) -> Result<UpdateReport, PipelineError> {
        info!("Updating funds");
        let result = self.until_shutdown(self.run_update(now)).await;
        self.report("update_funds", result)
    }

    /// Delete stored funds whose ISIN the source no longer lists.
    ///
    /// Returns the number of deleted funds. Nothing is deleted when the
    /// source lists no ISIN at all.
    #[instrument(skip(self))]
    pub async fn remove_stale_funds(&self) -> Result<u64, PipelineError> {
        info!("Removing stale funds");
        let result = self.until_shutdown(self.run_remove_stale()).await;
        self.report("remove_stale_funds", result)
    }

    /// Trigger a graceful shutdown of the running task.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    async fn run_update(&self, now: DateTime<Utc>) -> Result<UpdateReport, PipelineError> {
        let today = now.date_naive();
        let asof = freshness::stamp(now);
        let parallelism = self.config.parallelism;
        let source = Arc::clone(&self.source);
        let repository = Arc::clone(&self.repository);
        let fetcher = Arc::clone(&self.source);
        let postprocessor = Arc::clone(&self.postprocessor);

        let pipeline = Pipeline::from_source("list_isins", move || async move {
            let listed = source.list_isins().await?;
            due_isins(&repository, listed, today).await
        })
        .parallel_transform("fetch_fund", parallelism, move |isin: String| {
            let fetcher = Arc::clone(&fetcher);
            async move {
                let mut fund = fetcher.fetch_fund(&isin).await?;
                fund.asof.get_or_insert(asof);
                Ok::<_, PipelineError>(fund)
            }
        })
        .parallel_transform("postprocess", parallelism, move |fund: Fund| {
            let postprocessor = Arc::clone(&postprocessor);
            async move { Ok::<_, PipelineError>(postprocessor.apply(fund)) }
        })
        .filter(|fund: &Fund| {
            let valid = !fund.isin.trim().is_empty();
            if !valid {
                warn!(name = ?fund.name, "Fund is not valid, skipping upsert");
            }
            valid
        });

        let mut loader =
            FundLoader::with_config(Arc::clone(&self.repository), self.config.loader.clone());
        let mut batches = pipeline.chunks(self.config.loader.batch_size).into_stream();
        while let Some(batch) = batches.try_next().await? {
            loader.load(batch).await?;
        }
        let load = loader.finish().await?;
        info!("Finished updating funds");

        let purged = self.purge_outdated(today).await;
        Ok(UpdateReport { load, purged })
    }

    async fn purge_outdated(&self, today: NaiveDate) -> u64 {
        let cutoff = freshness::purge_cutoff(today);
        let summary = self
            .repository
            .delete_batch(&freshness::outdated_filter(cutoff))
            .await;
        if !summary.is_complete() {
            warn!(failed_shards = ?summary.failed_shards, "Outdated fund purge incomplete");
        }
        info!(deleted = summary.deleted, cutoff = %cutoff, "Deleted outdated funds");
        summary.deleted
    }

    async fn run_remove_stale(&self) -> Result<u64, PipelineError> {
        let listed: HashSet<String> = self.source.list_isins().await?.into_iter().collect();
        if listed.is_empty() {
            warn!("Source listed no funds, skipping stale removal");
            return Ok(0);
        }

        let options = QueryOptions::new().with_projection(Projection::include([Fund::KEY_FIELD]));
        let stale: Vec<String> = self
            .repository
            .list_complete(&options)
            .await?
            .into_iter()
            .map(|fund| fund.isin)
            .filter(|isin| !listed.contains(isin))
            .collect();

        if stale.is_empty() {
            info!("No stale funds");
            return Ok(0);
        }

        info!(count = stale.len(), "Deleting stale funds");
        let summary = self
            .repository
            .delete_batch(&Filter::is_in(Fund::KEY_FIELD, stale))
            .await;
        if !summary.is_complete() {
            warn!(failed_shards = ?summary.failed_shards, "Stale removal incomplete");
        }
        Ok(summary.deleted)
    }

    async fn until_shutdown<T>(
        &self,
        task: impl std::future::Future<Output = Result<T, PipelineError>>,
    ) -> Result<T, PipelineError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::select! {
            result = task => result,
            _ = shutdown_rx.recv() => {
                info!("Received shutdown request");
                Err(PipelineError::Cancelled)
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                Err(PipelineError::Cancelled)
            }
        }
    }

    fn report<T>(&self, task: &str, result: Result<T, PipelineError>) -> Result<T, PipelineError> {
        if let Err(e) = &result {
            self.hook.on_failure(task, e);
        }
        result
    }
}

/// Listed ISINs that need fetching: stored ones that are due, oldest
/// first, then ones not stored at all.
async fn due_isins(
    repository: &ShardedRepository<Fund>,
    listed: Vec<String>,
    today: NaiveDate,
) -> Result<Vec<String>, PipelineError> {
    let cutoff = freshness::refetch_cutoff(today);
    let isin_only = Projection::include([Fund::KEY_FIELD]);

    let stored_due = repository
        .list_complete(
            &QueryOptions::new()
                .with_filter(freshness::due_filter(cutoff))
                .with_projection(isin_only.clone())
                .with_sort(Sort::asc(ASOF_FIELD)),
        )
        .await?;
    let fresh: HashSet<String> = repository
        .list_complete(
            &QueryOptions::new()
                .with_filter(freshness::fresh_filter(cutoff))
                .with_projection(isin_only),
        )
        .await?
        .into_iter()
        .map(|fund| fund.isin)
        .collect();

    let listed_set: HashSet<String> = listed.iter().cloned().collect();
    let mut due: Vec<String> = stored_due
        .into_iter()
        .map(|fund| fund.isin)
        .filter(|isin| listed_set.contains(isin))
        .collect();
    let mut queued: HashSet<String> = due.iter().cloned().collect();
    for isin in listed {
        if !fresh.contains(&isin) && queued.insert(isin.clone()) {
            due.push(isin);
        }
    }

    info!(
        listed = listed_set.len(),
        due = due.len(),
        fresh = fresh.len(),
        "Selected funds to update"
    );
    Ok(due)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fund_store_repository::{InMemoryShard, Shard};
    use fund_store_shared::HistoricPrice;
    use std::collections::HashMap;
    use std::time::Duration;

    struct MockSource {
        funds: HashMap<String, Fund>,
        hang: bool,
        fetched: std::sync::Mutex<Vec<String>>,
    }

    impl MockSource {
        fn new(funds: Vec<Fund>) -> Self {
            Self {
                funds: funds.into_iter().map(|f| (f.isin.clone(), f)).collect(),
                hang: false,
                fetched: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn fetched(&self) -> Vec<String> {
            let mut fetched = self.fetched.lock().unwrap().clone();
            fetched.sort();
            fetched
        }
    }

    #[async_trait]
    impl FundSource for MockSource {
        async fn list_isins(&self) -> Result<Vec<String>, PipelineError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            let mut isins: Vec<String> = self.funds.keys().cloned().collect();
            isins.sort();
            Ok(isins)
        }

        async fn fetch_fund(&self, isin: &str) -> Result<Fund, PipelineError> {
            self.fetched.lock().unwrap().push(isin.to_string());
            self.funds
                .get(isin)
                .cloned()
                .ok_or_else(|| PipelineError::source_error(format!("unknown fund {isin}")))
        }
    }

    /// Source that lists an ISIN it cannot fetch.
    struct BrokenSource;

    #[async_trait]
    impl FundSource for BrokenSource {
        async fn list_isins(&self) -> Result<Vec<String>, PipelineError> {
            Ok(vec!["GB0000".to_string()])
        }

        async fn fetch_fund(&self, isin: &str) -> Result<Fund, PipelineError> {
            Err(PipelineError::source_error(format!("page for {isin} changed layout")))
        }
    }

    #[derive(Default)]
    struct RecordingHook {
        failures: std::sync::Mutex<Vec<String>>,
    }

    impl FailureHook for RecordingHook {
        fn on_failure(&self, task: &str, error: &PipelineError) {
            if let Ok(mut failures) = self.failures.lock() {
                failures.push(format!("{task}: {error}"));
            }
        }
    }

    fn repository() -> Arc<ShardedRepository<Fund>> {
        let shards: Vec<Arc<dyn Shard>> = vec![
            Arc::new(InMemoryShard::new("s0")),
            Arc::new(InMemoryShard::new("s1")),
        ];
        Arc::new(ShardedRepository::new(shards).unwrap())
    }

    fn priced_fund(isin: &str) -> Fund {
        let prices = (1..=3)
            .map(|d| {
                HistoricPrice::new(
                    chrono::NaiveDate::from_ymd_opt(2024, 1, d).unwrap(),
                    d as f64,
                )
            })
            .collect();
        Fund::new(isin)
            .with_name(format!("Fund {isin}"))
            .with_return("1Y", 0.2)
            .with_historic_prices(prices)
    }

    #[tokio::test]
    async fn test_update_funds_loads_postprocessed_funds() {
        let source = Arc::new(MockSource::new(vec![
            priced_fund("A"),
            priced_fund("B"),
            priced_fund("C"),
        ]));
        let repository = repository();
        let orchestrator =
            Orchestrator::new(source, FundPostprocessor::default(), repository.clone());

        let report = orchestrator.update_funds().await.unwrap();

        assert_eq!(report.load.received, 3);
        assert_eq!(report.load.written, 3);
        assert_eq!(report.purged, 0);
        let funds = repository.list(&QueryOptions::new()).await.unwrap();
        assert_eq!(funds.len(), 3);
        assert!(funds.iter().all(|f| (f.returns["1D"] - 0.5).abs() < 1e-12));
        assert!(funds.iter().all(|f| f.asof.is_some()));
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        chrono::NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
            .and_utc()
    }

    #[tokio::test]
    async fn test_update_funds_fetches_only_due_funds() {
        // Wednesday
        let now = at(2024, 3, 6, 10);
        let repository = repository();
        repository
            .upsert_batch(vec![
                priced_fund("FRESH").with_asof(at(2024, 3, 6, 8)),
                priced_fund("OLD").with_asof(at(2024, 2, 26, 8)),
                priced_fund("OLDER").with_asof(at(2024, 2, 20, 8)),
            ])
            .await
            .unwrap();
        let listed = ["FRESH", "OLD", "OLDER", "NEW"].map(priced_fund).to_vec();
        let source = Arc::new(MockSource::new(listed));
        let orchestrator = Orchestrator::new(
            source.clone(),
            FundPostprocessor::default(),
            repository.clone(),
        );

        let due = due_isins(&repository, source.list_isins().await.unwrap(), now.date_naive())
            .await
            .unwrap();
        assert_eq!(due, vec!["OLDER", "OLD", "NEW"]);

        let report = orchestrator.update_funds_at(now).await.unwrap();

        assert_eq!(report.load.written, 3);
        assert_eq!(source.fetched(), vec!["NEW", "OLD", "OLDER"]);
        let stored = repository.list(&QueryOptions::new()).await.unwrap();
        for fund in stored {
            let expected = if fund.isin == "FRESH" { at(2024, 3, 6, 8) } else { now };
            assert_eq!(fund.asof, Some(expected), "{}", fund.isin);
        }
    }

    #[tokio::test]
    async fn test_update_funds_purges_outdated_funds() {
        let now = at(2024, 3, 6, 10);
        let repository = repository();
        repository
            .upsert_batch(vec![
                priced_fund("ANCIENT").with_asof(at(2024, 1, 15, 8)),
                priced_fund("RECENT").with_asof(at(2024, 2, 20, 8)),
                priced_fund("UNDATED"),
            ])
            .await
            .unwrap();
        let orchestrator = Orchestrator::new(
            Arc::new(MockSource::new(vec![priced_fund("A")])),
            FundPostprocessor::default(),
            repository.clone(),
        );

        let report = orchestrator.update_funds_at(now).await.unwrap();

        assert_eq!(report.purged, 1);
        let mut remaining: Vec<String> = repository
            .list(&QueryOptions::new())
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.isin)
            .collect();
        remaining.sort();
        assert_eq!(remaining, vec!["A", "RECENT", "UNDATED"]);
    }

    #[tokio::test]
    async fn test_fetch_failure_reaches_the_hook() {
        let hook = Arc::new(RecordingHook::default());
        let orchestrator = Orchestrator::new(
            Arc::new(BrokenSource),
            FundPostprocessor::default(),
            repository(),
        )
            .with_failure_hook(hook.clone());

        let result = orchestrator.update_funds().await;

        assert!(matches!(
            result,
            Err(PipelineError::Stage { ref stage, .. }) if stage == "fetch_fund"
        ));
        let failures = hook.failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].starts_with("update_funds: Stage 'fetch_fund' failed"));
    }

    #[tokio::test]
    async fn test_remove_stale_funds() {
        let repository = repository();
        repository
            .upsert_batch(vec![priced_fund("A"), priced_fund("B"), priced_fund("C")])
            .await
            .unwrap();
        let source = Arc::new(MockSource::new(vec![priced_fund("B")]));
        let orchestrator =
            Orchestrator::new(source, FundPostprocessor::default(), repository.clone());

        let deleted = orchestrator.remove_stale_funds().await.unwrap();

        assert_eq!(deleted, 2);
        let remaining: Vec<String> = repository
            .list(&QueryOptions::new())
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.isin)
            .collect();
        assert_eq!(remaining, vec!["B".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_stale_funds_skips_empty_listing() {
        let repository = repository();
        repository.upsert_batch(vec![priced_fund("A")]).await.unwrap();
        let orchestrator = Orchestrator::new(
            Arc::new(MockSource::new(vec![])),
            FundPostprocessor::default(),
            repository.clone(),
        );

        assert_eq!(orchestrator.remove_stale_funds().await.unwrap(), 0);
        assert_eq!(repository.count().await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_running_update() {
        let mut source = MockSource::new(vec![priced_fund("A")]);
        source.hang = true;
        let hook = Arc::new(RecordingHook::default());
        let orchestrator = Arc::new(
            Orchestrator::new(Arc::new(source), FundPostprocessor::default(), repository())
                .with_failure_hook(hook.clone()),
        );

        let running = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.update_funds().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        orchestrator.shutdown();

        let result = running.await.unwrap();
        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert_eq!(hook.failures.lock().unwrap().len(), 1);
    }
}
