//! Export hook for listed documents.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::errors::RepositoryError;
use crate::query::get_path;
use fund_store_shared::Document;

/// Receives the plain documents produced by a listing.
pub trait RecordExporter: Send {
    /// Write `documents`, returning how many were written.
    fn export(&mut self, documents: &[Document]) -> Result<usize, RepositoryError>;
}

/// Writes documents as CSV rows, one column per dotted field path.
///
/// The header row is the list of columns. Missing and null values are
/// empty cells; arrays and objects are written as compact JSON.
pub struct CsvExporter<W: Write> {
    writer: csv::Writer<W>,
    columns: Vec<String>,
    header_written: bool,
}

impl CsvExporter<File> {
    /// Create (or truncate) the CSV file at `path`.
    pub fn create<S: Into<String>>(
        path: impl AsRef<Path>,
        columns: impl IntoIterator<Item = S>,
    ) -> Result<Self, RepositoryError> {
        let writer =
            csv::Writer::from_path(path).map_err(|e| RepositoryError::export(e.to_string()))?;
        Ok(Self::with_writer(writer, columns))
    }
}

impl<W: Write> CsvExporter<W> {
    pub fn from_writer<S: Into<String>>(writer: W, columns: impl IntoIterator<Item = S>) -> Self {
        Self::with_writer(csv::Writer::from_writer(writer), columns)
    }

    fn with_writer<S: Into<String>>(
        writer: csv::Writer<W>,
        columns: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            writer,
            columns: columns.into_iter().map(Into::into).collect(),
            header_written: false,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> Result<W, RepositoryError> {
        self.writer
            .into_inner()
            .map_err(|e| RepositoryError::export(e.to_string()))
    }

    fn write_header(&mut self) -> Result<(), RepositoryError> {
        if !self.header_written {
            self.writer
                .write_record(&self.columns)
                .map_err(|e| RepositoryError::export(e.to_string()))?;
            self.header_written = true;
        }
        Ok(())
    }
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
    }
}

impl<W: Write + Send> RecordExporter for CsvExporter<W> {
    fn export(&mut self, documents: &[Document]) -> Result<usize, RepositoryError> {
        self.write_header()?;
        for doc in documents {
            let row: Vec<String> = self.columns.iter().map(|c| cell(get_path(doc, c))).collect();
            self.writer
                .write_record(&row)
                .map_err(|e| RepositoryError::export(e.to_string()))?;
        }
        self.writer
            .flush()
            .map_err(|e| RepositoryError::export(e.to_string()))?;
        debug!(rows = documents.len(), "Exported documents as CSV");
        Ok(documents.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_writes_header_and_dotted_columns() {
        let mut exporter =
            CsvExporter::from_writer(vec![], ["isin", "name", "returns.1Y", "holdings"]);
        let docs = vec![
            doc(json!({
                "isin": "A",
                "name": "Alpha, Inc",
                "returns": {"1Y": 0.25},
                "holdings": [{"name": "X"}]
            })),
            doc(json!({"isin": "B", "name": null})),
        ];

        assert_eq!(exporter.export(&docs).unwrap(), 2);
        let output = String::from_utf8(exporter.into_inner().unwrap()).unwrap();

        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], "isin,name,returns.1Y,holdings");
        assert_eq!(lines[1], r#"A,"Alpha, Inc",0.25,"[{""name"":""X""}]""#);
        assert_eq!(lines[2], "B,,,");
    }

    #[test]
    fn test_header_written_once_across_calls() {
        let mut exporter = CsvExporter::from_writer(vec![], ["isin"]);
        exporter.export(&[doc(json!({"isin": "A"}))]).unwrap();
        exporter.export(&[doc(json!({"isin": "B"}))]).unwrap();

        let output = String::from_utf8(exporter.into_inner().unwrap()).unwrap();
        assert_eq!(output, "isin\nA\nB\n");
    }

    #[test]
    fn test_create_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("funds.csv");

        let mut exporter = CsvExporter::create(&path, ["isin"]).unwrap();
        exporter.export(&[doc(json!({"isin": "A"}))]).unwrap();
        drop(exporter);

        assert_eq!(std::fs::read_to_string(path).unwrap(), "isin\nA\n");
    }
}
