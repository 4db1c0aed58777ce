//! Settings read from the environment.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use fund_store_pipeline::{ExecutorConfig, Lookback};

use crate::AppError;

/// Default OpenSearch URL.
const DEFAULT_SHARD_URL: &str = "http://localhost:9200";

/// Default index name prefix.
const DEFAULT_FUND_INDEX: &str = "funds";

const DEFAULT_LOOKBACKS: &str = "2W,1W,3D,1D";

/// Storage behind each shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardBackend {
    OpenSearch,
    Memory,
}

impl FromStr for ShardBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "opensearch" => Ok(Self::OpenSearch),
            "memory" => Ok(Self::Memory),
            other => Err(AppError::config(format!(
                "unknown SHARD_BACKEND '{other}', expected opensearch or memory"
            ))),
        }
    }
}

/// Runtime settings.
///
/// # Environment Variables
///
/// - `SHARD_BACKEND`: `opensearch` or `memory` (default: opensearch)
/// - `SHARD_URLS`: comma separated OpenSearch URLs, one shard each (default: http://localhost:9200)
/// - `SHARD_COUNT`: number of in-memory shards (default: 2)
/// - `FUND_INDEX`: index name prefix, shard `i` uses `<prefix>-shard-<i>` (default: funds)
/// - `HTTP_MAX_ATTEMPTS`, `HTTP_RETRY_INTERVAL_MS`, `HTTP_MAX_PARALLEL_CONNECTIONS`,
///   `HTTP_SLOW_THRESHOLD_MS`, `HTTP_TIMEOUT_MS`: outbound HTTP limits
/// - `PIPELINE_PARALLELISM`: funds fetched concurrently (default: 5)
/// - `LOADER_BATCH_SIZE`: records per upsert batch (default: 100)
/// - `CATALOG_URL`, `FUND_URL_TEMPLATE`: fund feed endpoints
/// - `FUND_LOOKBACKS`: extra return periods (default: 2W,1W,3D,1D)
/// - `EXPORT_PATH`: CSV export path, dated on write (default: funds.csv)
/// - `LOCK_PATH`: run lock file (default: fund-store.lock in the temp dir)
#[derive(Debug, Clone)]
pub struct Settings {
    pub backend: ShardBackend,
    pub shard_urls: Vec<String>,
    pub shard_count: usize,
    pub fund_index: String,
    pub executor: ExecutorConfig,
    pub http_timeout: Duration,
    pub parallelism: usize,
    pub batch_size: usize,
    pub catalog_url: Option<String>,
    pub fund_url_template: Option<String>,
    pub lookbacks: Vec<Lookback>,
    pub export_path: PathBuf,
    pub lock_path: PathBuf,
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read settings through `lookup`; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = get("SHARD_BACKEND")
            .map(|v| v.parse::<ShardBackend>())
            .transpose()?
            .unwrap_or(ShardBackend::OpenSearch);

        let shard_urls: Vec<String> = get("SHARD_URLS")
            .unwrap_or_else(|| DEFAULT_SHARD_URL.to_string())
            .split(',')
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();

        let executor = ExecutorConfig::default()
            .with_max_attempts(parse(&get, "HTTP_MAX_ATTEMPTS", 5)?)
            .with_retry_interval(Duration::from_millis(parse(
                &get,
                "HTTP_RETRY_INTERVAL_MS",
                5000,
            )?))
            .with_max_concurrency(parse(&get, "HTTP_MAX_PARALLEL_CONNECTIONS", 10)?)
            .with_slow_threshold(Duration::from_millis(parse(
                &get,
                "HTTP_SLOW_THRESHOLD_MS",
                30_000,
            )?));

        let lookbacks = get("FUND_LOOKBACKS")
            .unwrap_or_else(|| DEFAULT_LOOKBACKS.to_string())
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.parse::<Lookback>().map_err(|e| AppError::config(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            backend,
            shard_urls,
            shard_count: parse(&get, "SHARD_COUNT", 2)?,
            fund_index: get("FUND_INDEX").unwrap_or_else(|| DEFAULT_FUND_INDEX.to_string()),
            executor,
            http_timeout: Duration::from_millis(parse(&get, "HTTP_TIMEOUT_MS", 30_000)?),
            parallelism: parse(&get, "PIPELINE_PARALLELISM", 5)?,
            batch_size: parse(&get, "LOADER_BATCH_SIZE", 100)?,
            catalog_url: get("CATALOG_URL"),
            fund_url_template: get("FUND_URL_TEMPLATE"),
            lookbacks,
            export_path: get("EXPORT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("funds.csv")),
            lock_path: get("LOCK_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| env::temp_dir().join("fund-store.lock")),
        })
    }

    /// Index name of shard `i`.
    pub fn shard_index(&self, i: usize) -> String {
        format!("{}-shard-{}", self.fund_index, i)
    }
}

fn parse<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, AppError> {
    match get(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| AppError::config(format!("{key} has an invalid value '{value}'"))),
    }
}
