//! Row layout of the snapshot log and the writer that appends to it.
//!
//! Current layout, 20 columns `A:T`:
//! timestamp, URL, status, H1-H6 non-empty, H1-H6 total, title count,
//! description count, comparison status, errors, changes.

use std::sync::Arc;

use crate::columns::Field;
use crate::config::HistoryConfig;
use crate::store::{RangeSpec, TabularStore};
use crate::types::{HeadwatchResult, Metric, PageSnapshot};

/// Timestamp format of the first column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Metric columns in layout order. `total_headings` is not logged.
const LOGGED_METRICS: [Metric; 14] = [
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
];

/// Header row written to an empty sheet.
pub fn header_row() -> Vec<String> {
    let mut row = vec!["Timestamp".to_string(), Field::Url.canonical_label(), "Status".to_string()];
    row.extend(
        LOGGED_METRICS
            .iter()
            .map(|m| Field::Signal(*m).canonical_label()),
    );
    row.extend(
        ["Comparison status", "Errors", "Changes"]
            .iter()
            .map(|s| s.to_string()),
    );
    row
}

/// One log row for a snapshot.
pub fn snapshot_row(snapshot: &PageSnapshot) -> Vec<String> {
    let mut row = vec![
        snapshot.fetched_at.format(TIMESTAMP_FORMAT).to_string(),
        snapshot.url.clone(),
        snapshot.status_label().to_string(),
    ];
    row.extend(
        LOGGED_METRICS
            .iter()
            .map(|m| snapshot.signals.get(*m).to_string()),
    );

    let (status, errors, changes) = match &snapshot.comparison {
        Some(c) => (
            c.status.to_string(),
            c.errors.join("; "),
            c.changes
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        ),
        None => (
            String::new(),
            snapshot.error().unwrap_or_default().to_string(),
            String::new(),
        ),
    };
    row.push(status);
    row.push(errors);
    row.push(changes);
    row
}

/// Appends snapshots to the log.
pub struct SheetWriter {
    store: Arc<dyn TabularStore>,
    history: HistoryConfig,
}

impl SheetWriter {
    pub fn new(store: Arc<dyn TabularStore>, history: HistoryConfig) -> Self {
        Self { store, history }
    }

    /// Append one row per successful snapshot; returns the rows written.
    ///
    /// Failed fetches are skipped so an outage never becomes the baseline
    /// for the next comparison. The header row is written first when the
    /// sheet has no rows.
    pub async fn append_snapshots(&self, snapshots: &[PageSnapshot]) -> HeadwatchResult<usize> {
        let range = RangeSpec::schema(self.history.sheet_name.as_str());
        let id = self.history.spreadsheet_id.as_str();

        let mut rows: Vec<Vec<String>> = snapshots
            .iter()
            .filter(|s| s.is_success())
            .map(snapshot_row)
            .collect();
        if rows.is_empty() {
            return Ok(0);
        }

        let existing = self.store.read_range(id, &range).await?;
        if existing.is_empty() {
            tracing::info!("Sheet {} is empty, writing header", self.history.sheet_name);
            rows.insert(0, header_row());
        }
        self.store.append_rows(id, &range, rows).await
    }
}
