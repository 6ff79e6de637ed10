//! Roster source adapters. They only move text cells around: no business rules live here.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use polars::prelude::*;

use super::RosterError;
use crate::config::{PortalConfig, RosterLocation};

/// Header row plus data rows, every cell as text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Fetches the raw roster table. Blocking; callers on an async runtime use the blocking pool.
pub trait RosterSource: Send + Sync {
    fn describe(&self) -> String;
    fn fetch(&self) -> Result<RawTable, RosterError>;
}

/// Build the adapter for a configured location.
pub fn source_for(cfg: &PortalConfig) -> Arc<dyn RosterSource> {
    match &cfg.roster {
        RosterLocation::Sheet { id, worksheet } => Arc::new(SheetSource::for_sheet(id, worksheet.as_deref(), cfg.fetch_timeout)),
        RosterLocation::Url(url) => Arc::new(SheetSource::new(url.clone(), cfg.fetch_timeout)),
        RosterLocation::File(path) => Arc::new(CsvFileSource::new(path.clone())),
    }
}

/// Decode CSV bytes with schema inference disabled: codes such as `00123` stay text.
/// Empty cells come back as empty strings.
pub fn parse_csv(bytes: Vec<u8>) -> Result<RawTable, RosterError> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()
        .map_err(|e| RosterError::SourceUnavailable(format!("csv decode failed: {e}")))?;
    frame_to_table(&df)
}

fn frame_to_table(df: &DataFrame) -> Result<RawTable, RosterError> {
    let headers: Vec<String> = df.get_column_names().iter().map(|n| n.to_string()).collect();
    let mut columns: Vec<Vec<String>> = Vec::with_capacity(df.width());
    for col in df.get_columns() {
        let as_text = col
            .as_materialized_series()
            .cast(&DataType::String)
            .map_err(|e| RosterError::SourceUnavailable(format!("column '{}' not text: {e}", col.name())))?;
        let ca = as_text
            .str()
            .map_err(|e| RosterError::SourceUnavailable(format!("column '{}' not text: {e}", col.name())))?;
        columns.push(ca.into_iter().map(|v| v.unwrap_or("").to_string()).collect());
    }
    let rows = (0..df.height())
        .map(|i| columns.iter().map(|c| c.get(i).cloned().unwrap_or_default()).collect())
        .collect();
    Ok(RawTable { headers, rows })
}

/// CSV over HTTP, normally a Google Sheets export link.
pub struct SheetSource {
    url: String,
    timeout: Duration,
}

impl SheetSource {
    pub fn new(url: String, timeout: Duration) -> Self { Self { url, timeout } }

    /// Export URL for a spreadsheet id. A named worksheet goes through the gviz CSV endpoint.
    pub fn for_sheet(id: &str, worksheet: Option<&str>, timeout: Duration) -> Self {
        let url = match worksheet {
            Some(ws) => format!(
                "https://docs.google.com/spreadsheets/d/{}/gviz/tq?tqx=out:csv&sheet={}",
                id,
                urlencoding::encode(ws)
            ),
            None => format!("https://docs.google.com/spreadsheets/d/{}/export?format=csv", id),
        };
        Self::new(url, timeout)
    }

    pub fn url(&self) -> &str { &self.url }
}

impl RosterSource for SheetSource {
    fn describe(&self) -> String { format!("http {}", self.url) }

    fn fetch(&self) -> Result<RawTable, RosterError> {
        // Built per fetch: a blocking client must not be created or dropped on an async worker.
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| RosterError::SourceUnavailable(format!("http client: {e}")))?;
        let resp = client
            .get(&self.url)
            .send()
            .map_err(|e| RosterError::SourceUnavailable(format!("request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RosterError::SourceUnavailable(format!("HTTP {status}")));
        }
        // An unshared spreadsheet answers 200 with a sign-in page.
        let is_html = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(false);
        if is_html {
            return Err(RosterError::SourceUnavailable("got HTML instead of CSV (is the sheet shared?)".into()));
        }
        let body = resp
            .bytes()
            .map_err(|e| RosterError::SourceUnavailable(format!("read body: {e}")))?;
        parse_csv(body.to_vec())
    }
}

/// A CSV export on local disk.
pub struct CsvFileSource {
    path: PathBuf,
}

impl CsvFileSource {
    pub fn new(path: PathBuf) -> Self { Self { path } }
}

impl RosterSource for CsvFileSource {
    fn describe(&self) -> String { format!("file {}", self.path.display()) }

    fn fetch(&self) -> Result<RawTable, RosterError> {
        let bytes = std::fs::read(&self.path)
            .map_err(|e| RosterError::SourceUnavailable(format!("read {}: {e}", self.path.display())))?;
        parse_csv(bytes)
    }
}

/// In-memory source. The answer can be swapped at runtime; fetches are counted.
pub struct StaticSource {
    answer: Mutex<Result<RawTable, RosterError>>,
    fetches: AtomicUsize,
}

impl StaticSource {
    pub fn new(table: RawTable) -> Self {
        Self { answer: Mutex::new(Ok(table)), fetches: AtomicUsize::new(0) }
    }

    pub fn failing(error: RosterError) -> Self {
        Self { answer: Mutex::new(Err(error)), fetches: AtomicUsize::new(0) }
    }

    /// Convenience for `(codigo, nombres)` pairs under the usual headers.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self::new(RawTable {
            headers: vec!["codigo".into(), "nombres".into()],
            rows: pairs.iter().map(|(c, n)| vec![c.to_string(), n.to_string()]).collect(),
        })
    }

    pub fn replace(&self, answer: Result<RawTable, RosterError>) {
        *self.answer.lock() = answer;
    }

    pub fn fetch_count(&self) -> usize { self.fetches.load(Ordering::SeqCst) }
}

impl RosterSource for StaticSource {
    fn describe(&self) -> String { "static".into() }

    fn fetch(&self) -> Result<RawTable, RosterError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.answer.lock().clone()
    }
}
