//! Enrollment roster: typed records derived from a loosely-structured spreadsheet.
//!
//! Pipeline: a `RosterSource` yields a `RawTable` of text cells, `normalize::normalize_table`
//! turns it into `RosterRecord`s, and `RosterCache` keeps the result for a bounded time.
//! Any failure along the way produces a *degraded* roster that answers every lookup with a miss.

mod normalize;
mod source;
mod cache;

pub use normalize::{normalize_header, normalize_identifier, normalize_table, DISPLAY_NAME_COLUMNS, IDENTIFIER_COLUMN};
pub use source::{RawTable, RosterSource, SheetSource, CsvFileSource, StaticSource, source_for, parse_csv};
pub use cache::RosterCache;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Why a roster could not be built. Never surfaced to visitors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RosterError {
    #[error("roster source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("roster schema missing required column '{expected}' (found: {found:?})")]
    MalformedSchema { expected: String, found: Vec<String> },
}

/// One admitted visitor. `identifier` is always in canonical (trimmed, upper-cased) form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterRecord {
    pub identifier: String,
    pub display_name: String,
}

impl RosterRecord {
    pub fn new(identifier: &str, display_name: &str) -> Self {
        Self { identifier: normalize_identifier(identifier), display_name: display_name.trim().to_string() }
    }
}

/// An immutable snapshot of the roster. Refreshes build a new one; nothing mutates it in place.
#[derive(Debug, Clone)]
pub struct Roster {
    records: Vec<RosterRecord>,
    headers: Vec<String>,
    loaded_at: DateTime<Utc>,
    degradation: Option<RosterError>,
}

impl Roster {
    /// A well-formed roster. Emptiness is allowed.
    pub fn well_formed(records: Vec<RosterRecord>, headers: Vec<String>) -> Self {
        Self { records, headers, loaded_at: Utc::now(), degradation: None }
    }

    /// A roster that failed to load; it holds no records.
    pub fn degraded(error: RosterError) -> Self {
        let headers = match &error {
            RosterError::MalformedSchema { found, .. } => found.clone(),
            RosterError::SourceUnavailable(_) => Vec::new(),
        };
        Self { records: Vec::new(), headers, loaded_at: Utc::now(), degradation: Some(error) }
    }

    pub fn is_valid(&self) -> bool { self.degradation.is_none() }

    pub fn degradation(&self) -> Option<&RosterError> { self.degradation.as_ref() }

    /// Records in source order.
    pub fn records(&self) -> &[RosterRecord] { &self.records }

    pub fn len(&self) -> usize { self.records.len() }

    pub fn is_empty(&self) -> bool { self.records.is_empty() }

    /// Normalized column headers as seen at load time.
    pub fn headers(&self) -> &[String] { &self.headers }

    pub fn loaded_at(&self) -> DateTime<Utc> { self.loaded_at }

    /// Operator-facing summary.
    pub fn status(&self) -> RosterStatus {
        let (error, expected, found) = match &self.degradation {
            None => (None, None, None),
            Some(e @ RosterError::SourceUnavailable(_)) => (Some(e.to_string()), None, None),
            Some(e @ RosterError::MalformedSchema { expected, found }) => {
                (Some(e.to_string()), Some(expected.clone()), Some(found.clone()))
            }
        };
        RosterStatus {
            valid: self.is_valid(),
            records: self.records.len(),
            loaded_at: self.loaded_at,
            headers: self.headers.clone(),
            error,
            expected_header: expected,
            found_headers: found,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RosterStatus {
    pub valid: bool,
    pub records: usize,
    pub loaded_at: DateTime<Utc>,
    pub headers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_header: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub found_headers: Option<Vec<String>>,
}
