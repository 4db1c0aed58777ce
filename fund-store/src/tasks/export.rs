//! CSV export of the fund collection.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde_json::Value;
use tracing::info;

use crate::AppError;
use fund_store_repository::{
    CsvExporter, Projection, QueryOptions, RecordExporter, RepositoryError, ShardedRepository, Sort,
};
use fund_store_shared::{Document, Fund};

/// Columns of the exported file, in order.
pub const CSV_COLUMNS: [&str; 31] = [
    "isin",
    "name",
    "type",
    "shareClass",
    "frequency",
    "ocf",
    "amc",
    "entryCharge",
    "exitCharge",
    "returns.5Y",
    "returns.3Y",
    "returns.1Y",
    "returns.6M",
    "returns.3M",
    "returns.1M",
    "returns.2W",
    "returns.1W",
    "returns.3D",
    "returns.1D",
    "percentiles.5Y",
    "percentiles.3Y",
    "percentiles.1Y",
    "percentiles.6M",
    "percentiles.3M",
    "percentiles.1M",
    "percentiles.2W",
    "percentiles.1W",
    "percentiles.3D",
    "percentiles.1D",
    "holdings",
    LATEST,
];

const LATEST: &str = "latest";
const HISTORIC_PRICES: &str = "historicPrices";

/// `path` with `_YYYYMMDD` inserted before a `.csv` extension, or appended.
pub fn dated_path(path: &Path, date: NaiveDate) -> PathBuf {
    let stamp = date.format("%Y%m%d");
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dated = match file_name.strip_suffix(".csv") {
        Some(stem) => format!("{stem}_{stamp}.csv"),
        None => format!("{file_name}_{stamp}"),
    };
    path.with_file_name(dated)
}

/// Replaces a document's price history with the date of its latest price
/// before handing it on.
pub struct LatestPriceColumn<E> {
    inner: E,
}

impl<E: RecordExporter> LatestPriceColumn<E> {
    pub fn new(inner: E) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> E {
        self.inner
    }
}

fn latest_date(doc: &Document) -> Option<Value> {
    doc.get(HISTORIC_PRICES)?
        .as_array()?
        .iter()
        .filter_map(|price| price.get("date")?.as_str())
        .max()
        .map(|date| Value::String(date.to_string()))
}

impl<E: RecordExporter> RecordExporter for LatestPriceColumn<E> {
    fn export(&mut self, documents: &[Document]) -> Result<usize, RepositoryError> {
        let documents: Vec<Document> = documents
            .iter()
            .map(|doc| {
                let mut doc = doc.clone();
                let latest = latest_date(&doc).unwrap_or(Value::Null);
                doc.remove(HISTORIC_PRICES);
                doc.insert(LATEST.to_string(), latest);
                doc
            })
            .collect();
        self.inner.export(&documents)
    }
}

/// Query for the export: the exported columns plus the price history,
/// best one-day return first.
pub fn export_options() -> QueryOptions {
    let fields = CSV_COLUMNS
        .iter()
        .copied()
        .filter(|c| *c != LATEST)
        .chain(std::iter::once(HISTORIC_PRICES));
    QueryOptions::new()
        .with_projection(Projection::include(fields))
        .with_sort(Sort::desc("returns.1D"))
}

/// Write every fund to a dated CSV file derived from `path`.
pub async fn export_csv(
    repository: &ShardedRepository<Fund>,
    path: &Path,
    today: NaiveDate,
) -> Result<(PathBuf, usize), AppError> {
    let path = dated_path(path, today);
    let mut exporter = LatestPriceColumn::new(CsvExporter::create(&path, CSV_COLUMNS)?);
    let rows = repository.export(&export_options(), &mut exporter).await?;
    exporter.into_inner().into_inner()?;

    info!(path = %path.display(), rows = rows, "Saved CSV file");
    Ok((path, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fund_store_repository::{InMemoryShard, Shard};
    use fund_store_shared::HistoricPrice;
    use std::sync::Arc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_dated_path() {
        assert_eq!(
            dated_path(Path::new("/tmp/out/funds.csv"), date(2024, 3, 5)),
            PathBuf::from("/tmp/out/funds_20240305.csv")
        );
        assert_eq!(
            dated_path(Path::new("funds"), date(2024, 3, 5)),
            PathBuf::from("funds_20240305")
        );
    }

    #[tokio::test]
    async fn test_export_sorted_by_one_day_return() {
        let shards: Vec<Arc<dyn Shard>> = vec![
            Arc::new(InMemoryShard::new("s0")),
            Arc::new(InMemoryShard::new("s1")),
        ];
        let repository = ShardedRepository::<Fund>::new(shards).unwrap();
        repository
            .upsert_batch(vec![
                Fund::new("A").with_name("Alpha").with_return("1D", 0.01),
                Fund::new("B")
                    .with_name("Beta")
                    .with_return("1D", 0.03)
                    .with_historic_prices(vec![
                        HistoricPrice::new(date(2024, 1, 2), 1.0),
                        HistoricPrice::new(date(2024, 1, 3), 1.1),
                    ]),
                Fund::new("C").with_name("Gamma").with_return("1D", 0.02),
            ])
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let (path, rows) = export_csv(&repository, &dir.path().join("funds.csv"), date(2024, 3, 5))
            .await
            .unwrap();

        assert_eq!(rows, 3);
        assert_eq!(path, dir.path().join("funds_20240305.csv"));

        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], CSV_COLUMNS.join(","));
        assert!(lines[1].starts_with("B,Beta,"));
        assert!(lines[1].ends_with(",[],2024-01-03"));
        assert!(lines[2].starts_with("C,Gamma,"));
        assert!(lines[3].starts_with("A,Alpha,"));
        assert!(lines[3].ends_with(",[],"));
    }
}
