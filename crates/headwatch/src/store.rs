//! Tabular store abstraction for the append-only snapshot log.
//!
//! Defines the `TabularStore` trait the diff engine reads from and the
//! sheet writer appends to. `MemoryStore` keeps everything in-process;
//! the Google Sheets client lives in [`crate::sheets`].

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::types::{HeadwatchError, HeadwatchResult};

/// First and last column of the current 20-column schema.
pub const FIRST_COLUMN: &str = "A";
pub const LAST_COLUMN: &str = "T";

/// A sheet name plus a fixed column span, rendered as `<sheet>!A:T`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSpec {
    pub sheet: String,
    pub first_column: String,
    pub last_column: String,
}

impl RangeSpec {
    /// Range covering the current schema on one sheet.
    pub fn schema(sheet: impl Into<String>) -> Self {
        Self {
            sheet: sheet.into(),
            first_column: FIRST_COLUMN.to_string(),
            last_column: LAST_COLUMN.to_string(),
        }
    }

    /// Number of columns spanned; zero for an inverted or invalid span.
    pub fn width(&self) -> usize {
        match (
            column_number(&self.first_column),
            column_number(&self.last_column),
        ) {
            (Some(first), Some(last)) if last >= first => last - first + 1,
            _ => 0,
        }
    }
}

impl std::fmt::Display for RangeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}!{}:{}", self.sheet, self.first_column, self.last_column)
    }
}

/// 1-based number of a column letter (`A` = 1, `AA` = 27).
fn column_number(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    letters.chars().try_fold(0usize, |acc, c| {
        let c = c.to_ascii_uppercase();
        c.is_ascii_uppercase()
            .then(|| acc * 26 + usize::from(c as u8 - b'A') + 1)
    })
}

/// Range read / append over an external tabular store.
#[async_trait]
pub trait TabularStore: Send + Sync {
    /// Read every row of a range, header included. Rows may be ragged.
    async fn read_range(
        &self,
        spreadsheet_id: &str,
        range: &RangeSpec,
    ) -> HeadwatchResult<Vec<Vec<String>>>;

    /// Append rows after the last non-empty row. Returns the rows written.
    async fn append_rows(
        &self,
        spreadsheet_id: &str,
        range: &RangeSpec,
        rows: Vec<Vec<String>>,
    ) -> HeadwatchResult<usize>;
}

/// In-process store keyed by spreadsheet id and sheet name.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sheets: Mutex<HashMap<(String, String), Vec<Vec<String>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a sheet.
    pub fn with_rows(
        self,
        spreadsheet_id: &str,
        sheet: &str,
        rows: Vec<Vec<String>>,
    ) -> Self {
        if let Ok(mut sheets) = self.sheets.lock() {
            sheets.insert((spreadsheet_id.to_string(), sheet.to_string()), rows);
        }
        self
    }

    /// Copy of a sheet's rows.
    pub fn rows(&self, spreadsheet_id: &str, sheet: &str) -> Vec<Vec<String>> {
        self.sheets
            .lock()
            .ok()
            .and_then(|sheets| {
                sheets
                    .get(&(spreadsheet_id.to_string(), sheet.to_string()))
                    .cloned()
            })
            .unwrap_or_default()
    }
}

fn poisoned() -> HeadwatchError {
    HeadwatchError::Store("memory store lock poisoned".to_string())
}

#[async_trait]
impl TabularStore for MemoryStore {
    async fn read_range(
        &self,
        spreadsheet_id: &str,
        range: &RangeSpec,
    ) -> HeadwatchResult<Vec<Vec<String>>> {
        let width = range.width();
        let sheets = self.sheets.lock().map_err(|_| poisoned())?;
        let rows = sheets
            .get(&(spreadsheet_id.to_string(), range.sheet.clone()))
            .map(|rows| {
                rows.iter()
                    .map(|row| row.iter().take(width).cloned().collect())
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    async fn append_rows(
        &self,
        spreadsheet_id: &str,
        range: &RangeSpec,
        rows: Vec<Vec<String>>,
    ) -> HeadwatchResult<usize> {
        let count = rows.len();
        let mut sheets = self.sheets.lock().map_err(|_| poisoned())?;
        sheets
            .entry((spreadsheet_id.to_string(), range.sheet.clone()))
            .or_default()
            .extend(rows);
        Ok(count)
    }
}
