//! Core data types for page snapshots, structural signals, and comparison results.

use chrono::{DateTime, Utc};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// A logical SEO metric tracked per page.
///
/// Declaration order is the reporting order: non-empty heading counts,
/// total heading counts, title, description, then the derived total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    H1Nonempty,
    H2Nonempty,
    H3Nonempty,
    H4Nonempty,
    H5Nonempty,
    H6Nonempty,
    H1Total,
    H2Total,
    H3Total,
    H4Total,
    H5Total,
    H6Total,
    TitleCount,
    DescriptionCount,
    TotalHeadings,
}

impl Metric {
    /// Every metric, in reporting order.
    pub const ALL: [Metric; 15] = [
        Metric::H1Nonempty,
        Metric::H2Nonempty,
        Metric::H3Nonempty,
        Metric::H4Nonempty,
        Metric::H5Nonempty,
        Metric::H6Nonempty,
        Metric::H1Total,
        Metric::H2Total,
        Metric::H3Total,
        Metric::H4Total,
        Metric::H5Total,
        Metric::H6Total,
        Metric::TitleCount,
        Metric::DescriptionCount,
        Metric::TotalHeadings,
    ];

    /// Non-empty heading count metric for a level in `1..=6`.
    pub fn nonempty(level: u8) -> Option<Metric> {
        match level {
            1 => Some(Metric::H1Nonempty),
            2 => Some(Metric::H2Nonempty),
            3 => Some(Metric::H3Nonempty),
            4 => Some(Metric::H4Nonempty),
            5 => Some(Metric::H5Nonempty),
            6 => Some(Metric::H6Nonempty),
            _ => None,
        }
    }

    /// Total heading count metric for a level in `1..=6`.
    pub fn total(level: u8) -> Option<Metric> {
        match level {
            1 => Some(Metric::H1Total),
            2 => Some(Metric::H2Total),
            3 => Some(Metric::H3Total),
            4 => Some(Metric::H4Total),
            5 => Some(Metric::H5Total),
            6 => Some(Metric::H6Total),
            _ => None,
        }
    }

    /// Stable key used in reports and serialized output.
    pub fn key(self) -> &'static str {
        match self {
            Metric::H1Nonempty => "h1_nonempty",
            Metric::H2Nonempty => "h2_nonempty",
            Metric::H3Nonempty => "h3_nonempty",
            Metric::H4Nonempty => "h4_nonempty",
            Metric::H5Nonempty => "h5_nonempty",
            Metric::H6Nonempty => "h6_nonempty",
            Metric::H1Total => "h1_total",
            Metric::H2Total => "h2_total",
            Metric::H3Total => "h3_total",
            Metric::H4Total => "h4_total",
            Metric::H5Total => "h5_total",
            Metric::H6Total => "h6_total",
            Metric::TitleCount => "title_count",
            Metric::DescriptionCount => "description_count",
            Metric::TotalHeadings => "total_headings",
        }
    }

    /// Heading level (1-6) for heading metrics.
    pub fn heading_level(self) -> Option<u8> {
        match self {
            Metric::H1Nonempty | Metric::H1Total => Some(1),
            Metric::H2Nonempty | Metric::H2Total => Some(2),
            Metric::H3Nonempty | Metric::H3Total => Some(3),
            Metric::H4Nonempty | Metric::H4Total => Some(4),
            Metric::H5Nonempty | Metric::H5Total => Some(5),
            Metric::H6Nonempty | Metric::H6Total => Some(6),
            _ => None,
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Structural SEO signals extracted from one page.
///
/// `total_headings` is derived on read, so it always equals the sum of
/// the non-empty counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalRecord {
    /// Non-empty heading counts, index 0 = h1.
    pub nonempty: [u32; 6],
    /// All heading elements, index 0 = h1.
    pub total: [u32; 6],
    pub title_count: u32,
    pub description_count: u32,
}

impl SignalRecord {
    /// Sum of non-empty headings over all six levels.
    pub fn total_headings(&self) -> u32 {
        self.nonempty.iter().sum()
    }

    /// Value of a single metric.
    pub fn get(&self, metric: Metric) -> u32 {
        match metric {
            Metric::TitleCount => self.title_count,
            Metric::DescriptionCount => self.description_count,
            Metric::TotalHeadings => self.total_headings(),
            Metric::H1Nonempty
            | Metric::H2Nonempty
            | Metric::H3Nonempty
            | Metric::H4Nonempty
            | Metric::H5Nonempty
            | Metric::H6Nonempty => level_slot(&self.nonempty, metric),
            Metric::H1Total
            | Metric::H2Total
            | Metric::H3Total
            | Metric::H4Total
            | Metric::H5Total
            | Metric::H6Total => level_slot(&self.total, metric),
        }
    }

    /// Iterate `(metric, value)` pairs in reporting order.
    pub fn iter(&self) -> impl Iterator<Item = (Metric, u32)> + '_ {
        Metric::ALL.iter().map(move |m| (*m, self.get(*m)))
    }
}

fn level_slot(slots: &[u32; 6], metric: Metric) -> u32 {
    metric
        .heading_level()
        .map(|level| slots[usize::from(level - 1)])
        .unwrap_or(0)
}

impl Serialize for SignalRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter().map(|(m, v)| (m.key(), v)))
    }
}

/// A detected non-zero difference for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub metric: Metric,
    pub previous: i64,
    pub current: i64,
    pub difference: i64,
}

impl ChangeEvent {
    /// Build an event, or `None` when the values are equal.
    pub fn between(metric: Metric, previous: i64, current: i64) -> Option<Self> {
        let difference = current - previous;
        (difference != 0).then_some(Self {
            metric,
            previous,
            current,
            difference,
        })
    }
}

impl std::fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {:+}", self.metric, self.difference)
    }
}

/// Overall outcome of comparing a page against its history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStatus {
    /// The diff engine was built without history configuration.
    NoConfig,
    /// History configuration has no spreadsheet id.
    NoSpreadsheetId,
    /// No tabular store handle was provided.
    NoSheetsManager,
    /// Reading the history failed.
    SheetsError,
    /// First check for this URL.
    NoPreviousData,
    /// The history could not be interpreted.
    ParsingError,
    /// Any other failure during comparison.
    ComparisonError,
    ChangesDetected,
    NoChanges,
}

impl ComparisonStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonStatus::NoConfig => "no_config",
            ComparisonStatus::NoSpreadsheetId => "no_spreadsheet_id",
            ComparisonStatus::NoSheetsManager => "no_sheets_manager",
            ComparisonStatus::SheetsError => "sheets_error",
            ComparisonStatus::NoPreviousData => "no_previous_data",
            ComparisonStatus::ParsingError => "parsing_error",
            ComparisonStatus::ComparisonError => "comparison_error",
            ComparisonStatus::ChangesDetected => "changes_detected",
            ComparisonStatus::NoChanges => "no_changes",
        }
    }
}

impl std::fmt::Display for ComparisonStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one diff-engine invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComparisonResult {
    pub status: ComparisonStatus,
    /// Ordered by metric reporting order.
    pub changes: Vec<ChangeEvent>,
    pub errors: Vec<String>,
}

impl ComparisonResult {
    /// A result carrying only a status.
    pub fn with_status(status: ComparisonStatus) -> Self {
        Self {
            status,
            changes: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// A result for a status that short-circuited the comparison.
    pub fn failed(status: ComparisonStatus, error: impl Into<String>) -> Self {
        Self {
            status,
            changes: Vec::new(),
            errors: vec![error.into()],
        }
    }

    /// Classify a completed per-metric pass.
    pub fn from_changes(mut changes: Vec<ChangeEvent>) -> Self {
        changes.sort_by_key(|c| c.metric);
        let status = if changes.is_empty() {
            ComparisonStatus::NoChanges
        } else {
            ComparisonStatus::ChangesDetected
        };
        Self {
            status,
            changes,
            errors: Vec::new(),
        }
    }

    pub fn has_changes(&self) -> bool {
        self.status == ComparisonStatus::ChangesDetected
    }
}

/// How fetching a page ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PageOutcome {
    Success,
    Error { error: String },
}

/// One fetch+extract result for a URL at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct PageSnapshot {
    pub url: String,
    pub fetched_at: DateTime<Utc>,
    pub http_status: Option<u16>,
    pub signals: SignalRecord,
    pub outcome: PageOutcome,
    /// Absent when the page could not be fetched.
    pub comparison: Option<ComparisonResult>,
}

impl PageSnapshot {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, PageOutcome::Success)
    }

    /// Error message for failed snapshots.
    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            PageOutcome::Error { error } => Some(error),
            PageOutcome::Success => None,
        }
    }

    pub fn status_label(&self) -> &'static str {
        match self.outcome {
            PageOutcome::Success => "success",
            PageOutcome::Error { .. } => "error",
        }
    }

    /// Whether the comparison detected at least one change.
    pub fn has_changes(&self) -> bool {
        self.comparison
            .as_ref()
            .map(ComparisonResult::has_changes)
            .unwrap_or(false)
    }
}

/// Errors that can occur in the headwatch library.
#[derive(thiserror::Error, Debug)]
pub enum HeadwatchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("Malformed history: {0}")]
    MalformedHistory(String),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Convenience result type.
pub type HeadwatchResult<T> = Result<T, HeadwatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_headings_is_sum_of_nonempty() {
        let record = SignalRecord {
            nonempty: [1, 4, 2, 0, 0, 3],
            total: [2, 4, 5, 1, 0, 3],
            title_count: 1,
            description_count: 1,
        };
        assert_eq!(record.total_headings(), 10);
        assert_eq!(record.get(Metric::TotalHeadings), 10);
        assert_eq!(record.get(Metric::H3Total), 5);
        assert_eq!(record.get(Metric::H6Nonempty), 3);
    }

    #[test]
    fn test_metric_level_constructors() {
        assert_eq!(Metric::nonempty(1), Some(Metric::H1Nonempty));
        assert_eq!(Metric::total(6), Some(Metric::H6Total));
        assert_eq!(Metric::nonempty(0), None);
        assert_eq!(Metric::total(7), None);
        assert_eq!(Metric::H4Total.heading_level(), Some(4));
        assert_eq!(Metric::TitleCount.heading_level(), None);
    }

    #[test]
    fn test_signal_record_serializes_as_keyed_map() {
        let record = SignalRecord {
            nonempty: [2, 0, 0, 0, 0, 0],
            ..Default::default()
        };
        let value = serde_json::to_value(record).unwrap();
        assert_eq!(value["h1_nonempty"], 2);
        assert_eq!(value["total_headings"], 2);
        assert_eq!(value["description_count"], 0);
        assert_eq!(value.as_object().unwrap().len(), Metric::ALL.len());
    }

    #[test]
    fn test_change_event_only_for_nonzero_difference() {
        assert!(ChangeEvent::between(Metric::TitleCount, 1, 1).is_none());
        let ev = ChangeEvent::between(Metric::H2Total, 5, 3).unwrap();
        assert_eq!(ev.difference, -2);
        assert_eq!(ev.to_string(), "h2_total: -2");
    }

    #[test]
    fn test_from_changes_orders_and_classifies() {
        let result = ComparisonResult::from_changes(vec![
            ChangeEvent::between(Metric::TitleCount, 0, 1).unwrap(),
            ChangeEvent::between(Metric::H1Nonempty, 1, 2).unwrap(),
        ]);
        assert_eq!(result.status, ComparisonStatus::ChangesDetected);
        assert_eq!(result.changes[0].metric, Metric::H1Nonempty);

        let empty = ComparisonResult::from_changes(Vec::new());
        assert_eq!(empty.status, ComparisonStatus::NoChanges);
        assert!(empty.errors.is_empty());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&ComparisonStatus::NoPreviousData).unwrap();
        assert_eq!(json, "\"no_previous_data\"");
        assert_eq!(ComparisonStatus::SheetsError.to_string(), "sheets_error");
    }
}
