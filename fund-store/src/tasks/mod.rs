//! Tasks the binary can run.

mod export;

pub use export::{dated_path, export_csv, export_options, LatestPriceColumn, CSV_COLUMNS};

use std::fmt;

use chrono::Local;
use clap::ValueEnum;
use tracing::info;

use crate::{AppError, Dependencies};

/// A unit of work selectable with `--run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Task {
    /// Fetch, enrich and upsert the listed funds that are due.
    UpdateFunds,
    /// Delete stored funds the source no longer lists.
    RemoveStaleFunds,
    /// Create indexes and mappings on every shard.
    CreateIndex,
    /// Write all funds to a dated CSV file.
    ExportCsv,
}

impl Task {
    pub fn name(self) -> &'static str {
        match self {
            Task::UpdateFunds => "update-funds",
            Task::RemoveStaleFunds => "remove-stale-funds",
            Task::CreateIndex => "create-index",
            Task::ExportCsv => "export-csv",
        }
    }

    /// Run the task against the wired dependencies.
    pub async fn run(self, deps: &Dependencies) -> Result<(), AppError> {
        match self {
            Task::UpdateFunds => {
                let report = deps.orchestrator()?.update_funds().await?;
                info!(
                    received = report.load.received,
                    written = report.load.written,
                    removed = report.load.removed,
                    purged = report.purged,
                    incomplete_batches = report.load.incomplete_batches,
                    "Funds updated"
                );
            }
            Task::RemoveStaleFunds => {
                let deleted = deps.orchestrator()?.remove_stale_funds().await?;
                info!(deleted = deleted, "Stale funds removed");
            }
            Task::CreateIndex => {
                deps.repository.ensure_indexes().await?;
            }
            Task::ExportCsv => {
                let today = Local::now().date_naive();
                export_csv(&deps.repository, &deps.settings.export_path, today).await?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Settings;

    #[test]
    fn test_names_match_cli_values() {
        for task in Task::value_variants() {
            let parsed = Task::from_str(task.name(), false).unwrap();
            assert_eq!(parsed, *task);
        }
    }

    #[tokio::test]
    async fn test_create_index_and_export_on_memory_shards() {
        let dir = tempfile::tempdir().unwrap();
        let export_path = dir.path().join("funds.csv");
        let export_path_str = export_path.to_string_lossy().into_owned();
        let settings = Settings::from_lookup(|key| match key {
            "SHARD_BACKEND" => Some("memory".to_string()),
            "EXPORT_PATH" => Some(export_path_str.clone()),
            _ => None,
        })
        .unwrap();
        let deps = Dependencies::new(settings).await.unwrap();

        Task::CreateIndex.run(&deps).await.unwrap();
        Task::ExportCsv.run(&deps).await.unwrap();

        let today = Local::now().date_naive();
        let written = std::fs::read_to_string(dated_path(&export_path, today)).unwrap();
        assert_eq!(written.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_ingestion_task_without_feed_is_a_config_error() {
        let settings =
            Settings::from_lookup(|key| (key == "SHARD_BACKEND").then(|| "memory".to_string()))
                .unwrap();
        let deps = Dependencies::new(settings).await.unwrap();

        let result = Task::UpdateFunds.run(&deps).await;
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }
}
