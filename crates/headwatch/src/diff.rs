//! Diff engine: compare current signals with the latest logged snapshot.
//!
//! Every path produces a [`ComparisonResult`]; store failures and missing
//! collaborators become statuses, never errors.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::columns::{resolve_columns, ColumnMap};
use crate::config::HistoryConfig;
use crate::store::{RangeSpec, TabularStore};
use crate::types::{
    ChangeEvent, ComparisonResult, ComparisonStatus, HeadwatchError, HeadwatchResult,
    SignalRecord,
};

/// Compares pages against the historical snapshot log.
#[derive(Clone)]
pub struct DiffEngine {
    history: Option<HistoryConfig>,
    store: Option<Arc<dyn TabularStore>>,
}

impl DiffEngine {
    pub fn new(history: Option<HistoryConfig>, store: Option<Arc<dyn TabularStore>>) -> Self {
        Self { history, store }
    }

    /// An engine with nothing configured; every comparison is `no_config`.
    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    pub fn history(&self) -> Option<&HistoryConfig> {
        self.history.as_ref()
    }

    /// Compare `current` with the most recent logged row for `url`.
    pub async fn compare(&self, url: &str, current: &SignalRecord) -> ComparisonResult {
        let Some(history) = &self.history else {
            return ComparisonResult::with_status(ComparisonStatus::NoConfig);
        };
        if history.spreadsheet_id.trim().is_empty() {
            return ComparisonResult::with_status(ComparisonStatus::NoSpreadsheetId);
        }
        let Some(store) = &self.store else {
            return ComparisonResult::with_status(ComparisonStatus::NoSheetsManager);
        };

        let range = RangeSpec::schema(history.sheet_name.as_str());
        let rows = match store.read_range(&history.spreadsheet_id, &range).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Failed to read history {range} for {url}: {e}");
                return ComparisonResult::failed(ComparisonStatus::SheetsError, e.to_string());
            }
        };

        // Header only, or nothing at all.
        if rows.len() <= 1 {
            debug!("No history rows in {range}");
            return ComparisonResult::with_status(ComparisonStatus::NoPreviousData);
        }

        match compare_with_history(current, &rows, url) {
            Ok(result) => result,
            Err(e) => {
                warn!("Comparison failed for {url}: {e}");
                ComparisonResult::failed(status_for_error(&e), e.to_string())
            }
        }
    }
}

/// Status reported for an error raised while interpreting history.
pub fn status_for_error(error: &HeadwatchError) -> ComparisonStatus {
    match error {
        HeadwatchError::MalformedHistory(_) => ComparisonStatus::ParsingError,
        _ => ComparisonStatus::ComparisonError,
    }
}

/// Split a header+data read, resolve columns, and compare.
fn compare_with_history(
    current: &SignalRecord,
    rows: &[Vec<String>],
    url: &str,
) -> HeadwatchResult<ComparisonResult> {
    let Some((header, data)) = rows.split_first() else {
        return Ok(ComparisonResult::with_status(ComparisonStatus::NoPreviousData));
    };
    if header.iter().all(|label| label.trim().is_empty()) {
        return Err(HeadwatchError::MalformedHistory(format!(
            "header row is blank but {} data row(s) follow",
            data.len()
        )));
    }
    let columns = resolve_columns(header);
    Ok(compare_snapshot(current, data, &columns, url))
}

/// Compare signals with the latest data row for `url`.
///
/// `rows` are data rows in append order, header excluded.
pub fn compare_snapshot(
    current: &SignalRecord,
    rows: &[Vec<String>],
    columns: &ColumnMap,
    url: &str,
) -> ComparisonResult {
    let Some(row) = select_row(rows, columns, url) else {
        return ComparisonResult::with_status(ComparisonStatus::NoPreviousData);
    };

    let changes = columns
        .metrics()
        .filter_map(|(metric, idx)| {
            let previous = row.get(idx).map(|cell| parse_cell(cell)).unwrap_or(0);
            ChangeEvent::between(metric, previous, i64::from(current.get(metric)))
        })
        .collect();
    ComparisonResult::from_changes(changes)
}

/// Most recently appended row whose URL cell equals `url` exactly.
pub fn select_row<'a>(
    rows: &'a [Vec<String>],
    columns: &ColumnMap,
    url: &str,
) -> Option<&'a Vec<String>> {
    let url_idx = columns.url()?;
    rows.iter()
        .rev()
        .find(|row| row.get(url_idx).map(String::as_str) == Some(url))
}

/// Integer value of a logged cell; blank or unparsable cells read as 0.
pub fn parse_cell(cell: &str) -> i64 {
    let cell = cell.trim();
    if let Ok(n) = cell.parse::<i64>() {
        return n;
    }
    // Numbers formatted by the store, e.g. "3.0".
    match cell.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 => f as i64,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::Metric;
    use async_trait::async_trait;

    const URL: &str = "https://site.example/page";

    fn header() -> Vec<String> {
        let mut labels = vec!["Timestamp".to_string(), "URL".to_string(), "Status".to_string()];
        labels.extend((1..=6).map(|i| format!("H{i} (non-empty)")));
        labels.extend((1..=6).map(|i| format!("H{i} (total)")));
        labels.push("Title count".to_string());
        labels.push("Description count".to_string());
        labels
    }

    /// A logged row in the current layout.
    fn logged(url: &str, signals: &SignalRecord) -> Vec<String> {
        let mut row = vec!["2026-01-01 00:00:00".to_string(), url.to_string(), "success".to_string()];
        row.extend(signals.nonempty.iter().map(u32::to_string));
        row.extend(signals.total.iter().map(u32::to_string));
        row.push(signals.title_count.to_string());
        row.push(signals.description_count.to_string());
        row
    }

    fn signals(h1: u32) -> SignalRecord {
        SignalRecord {
            nonempty: [h1, 2, 0, 0, 0, 0],
            total: [h1, 3, 0, 0, 0, 0],
            title_count: 1,
            description_count: 1,
        }
    }

    fn history() -> HistoryConfig {
        HistoryConfig {
            spreadsheet_id: "sheet-1".to_string(),
            sheet_name: "Log".to_string(),
        }
    }

    fn engine_with(rows: Vec<Vec<String>>) -> DiffEngine {
        let store = MemoryStore::new().with_rows("sheet-1", "Log", rows);
        DiffEngine::new(Some(history()), Some(Arc::new(store)))
    }

    #[test]
    fn test_identical_snapshot_has_no_changes() {
        let current = signals(1);
        let rows = vec![logged(URL, &current)];
        let result = compare_snapshot(&current, &rows, &resolve_columns(&header()), URL);
        assert_eq!(result.status, ComparisonStatus::NoChanges);
        assert!(result.changes.is_empty());
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_h1_increase_detected() {
        let rows = vec![logged(URL, &signals(1))];
        let result = compare_snapshot(&signals(2), &rows, &resolve_columns(&header()), URL);
        assert_eq!(result.status, ComparisonStatus::ChangesDetected);
        // h1 non-empty and h1 total both moved.
        assert_eq!(result.changes.len(), 2);
        let h1 = result.changes[0];
        assert_eq!(h1.metric, Metric::H1Nonempty);
        assert_eq!((h1.previous, h1.current, h1.difference), (1, 2, 1));
        assert_eq!(result.changes[1].metric, Metric::H1Total);
    }

    #[test]
    fn test_most_recent_row_wins() {
        let rows = vec![
            logged(URL, &signals(5)),
            logged("https://site.example/other", &signals(9)),
            logged(URL, &signals(2)),
        ];
        let result = compare_snapshot(&signals(2), &rows, &resolve_columns(&header()), URL);
        assert_eq!(result.status, ComparisonStatus::NoChanges);
    }

    #[test]
    fn test_url_match_is_exact() {
        let rows = vec![logged("https://site.example/page/", &signals(1))];
        let result = compare_snapshot(&signals(1), &rows, &resolve_columns(&header()), URL);
        assert_eq!(result.status, ComparisonStatus::NoPreviousData);
        assert!(result.changes.is_empty());
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_blank_cell_reads_as_zero() {
        let mut row = logged(URL, &signals(1));
        row[15] = String::new(); // title count
        let result = compare_snapshot(&signals(1), &[row], &resolve_columns(&header()), URL);
        assert_eq!(result.status, ComparisonStatus::ChangesDetected);
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].metric, Metric::TitleCount);
        assert_eq!(result.changes[0].previous, 0);
        assert_eq!(result.changes[0].difference, 1);
    }

    #[test]
    fn test_short_row_reads_missing_cells_as_zero() {
        let row: Vec<String> = logged(URL, &signals(1)).into_iter().take(9).collect();
        let result = compare_snapshot(&signals(1), &[row], &resolve_columns(&header()), URL);
        let metrics: Vec<Metric> = result.changes.iter().map(|c| c.metric).collect();
        assert!(metrics.contains(&Metric::H1Total));
        assert!(metrics.contains(&Metric::TitleCount));
        assert!(!metrics.contains(&Metric::H1Nonempty));
    }

    #[test]
    fn test_positional_fallback_for_unlabeled_history() {
        let unlabeled: Vec<String> = (0..17).map(|i| format!("col{i}")).collect();
        let columns = resolve_columns(&unlabeled);
        let rows = vec![logged(URL, &signals(3))];
        let result = compare_snapshot(&signals(3), &rows, &columns, URL);
        assert_eq!(result.status, ComparisonStatus::NoChanges);
    }

    #[test]
    fn test_total_headings_compared_when_labeled() {
        let mut labels = header();
        labels.push("Total headings".to_string());
        let mut row = logged(URL, &signals(1));
        row.push("1".to_string());
        let result = compare_snapshot(&signals(1), &[row], &resolve_columns(&labels), URL);
        let th = result
            .changes
            .iter()
            .find(|c| c.metric == Metric::TotalHeadings)
            .unwrap();
        assert_eq!((th.previous, th.current), (1, 3));
    }

    #[test]
    fn test_parse_cell() {
        assert_eq!(parse_cell("7"), 7);
        assert_eq!(parse_cell(" 12 "), 12);
        assert_eq!(parse_cell("3.0"), 3);
        assert_eq!(parse_cell(""), 0);
        assert_eq!(parse_cell("n/a"), 0);
        assert_eq!(parse_cell("2.5"), 0);
    }

    #[tokio::test]
    async fn test_missing_collaborators() {
        let current = signals(1);
        assert_eq!(
            DiffEngine::disabled().compare(URL, &current).await.status,
            ComparisonStatus::NoConfig
        );

        let blank = HistoryConfig {
            spreadsheet_id: "  ".to_string(),
            sheet_name: "Log".to_string(),
        };
        let store: Arc<dyn TabularStore> = Arc::new(MemoryStore::new());
        let engine = DiffEngine::new(Some(blank), Some(store));
        assert_eq!(
            engine.compare(URL, &current).await.status,
            ComparisonStatus::NoSpreadsheetId
        );

        let engine = DiffEngine::new(Some(history()), None);
        let result = engine.compare(URL, &current).await;
        assert_eq!(result.status, ComparisonStatus::NoSheetsManager);
        assert!(result.changes.is_empty());
    }

    struct FailingStore;

    #[async_trait]
    impl TabularStore for FailingStore {
        async fn read_range(
            &self,
            _spreadsheet_id: &str,
            _range: &RangeSpec,
        ) -> HeadwatchResult<Vec<Vec<String>>> {
            Err(HeadwatchError::Store("quota exceeded".to_string()))
        }

        async fn append_rows(
            &self,
            _spreadsheet_id: &str,
            _range: &RangeSpec,
            _rows: Vec<Vec<String>>,
        ) -> HeadwatchResult<usize> {
            Err(HeadwatchError::Store("quota exceeded".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_sheets_error() {
        let engine = DiffEngine::new(Some(history()), Some(Arc::new(FailingStore)));
        let result = engine.compare(URL, &signals(1)).await;
        assert_eq!(result.status, ComparisonStatus::SheetsError);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_empty_and_header_only_history() {
        let engine = engine_with(Vec::new());
        assert_eq!(
            engine.compare(URL, &signals(1)).await.status,
            ComparisonStatus::NoPreviousData
        );
        let engine = engine_with(vec![header()]);
        assert_eq!(
            engine.compare(URL, &signals(1)).await.status,
            ComparisonStatus::NoPreviousData
        );
    }

    #[tokio::test]
    async fn test_blank_header_is_parsing_error() {
        let engine = engine_with(vec![vec![String::new(); 3], logged(URL, &signals(1))]);
        let result = engine.compare(URL, &signals(1)).await;
        assert_eq!(result.status, ComparisonStatus::ParsingError);
        assert_eq!(result.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_engine_detects_change_through_store() {
        let engine = engine_with(vec![header(), logged(URL, &signals(1))]);
        let result = engine.compare(URL, &signals(2)).await;
        assert!(result.has_changes());
        assert_eq!(result.changes[0].to_string(), "h1_nonempty: +1");
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            status_for_error(&HeadwatchError::MalformedHistory("x".into())),
            ComparisonStatus::ParsingError
        );
        assert_eq!(
            status_for_error(&HeadwatchError::Config("x".into())),
            ComparisonStatus::ComparisonError
        );
    }
}
