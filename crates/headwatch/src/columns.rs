//! Column resolution for the historical snapshot log.
//!
//! The log's header row has changed across format versions: English
//! labels, snake_case keys, and Russian labels all occur. Each field is
//! looked up by an ordered synonym list (case-insensitive, trimmed); when
//! nothing matches, the field falls back to its column in the oldest
//! known layout:
//!
//! | index | field                 |
//! |-------|-----------------------|
//! | 1     | URL                   |
//! | 3..=8 | H1..H6 non-empty      |
//! | 9..=14| H1..H6 total          |
//! | 15    | title count           |
//! | 16    | description count     |
//!
//! `total_headings` was never written to the log, so it has no offset and
//! is only compared when a header names it.

use std::collections::{BTreeMap, HashMap};

use crate::types::Metric;

/// A logical column of the snapshot log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Url,
    Signal(Metric),
}

impl Field {
    /// Label the current writer uses for this field.
    pub fn canonical_label(self) -> String {
        self.synonyms().into_iter().next().unwrap_or_default()
    }

    /// Ordered synonyms: canonical label, legacy labels, localized labels.
    pub fn synonyms(self) -> Vec<String> {
        match self {
            Field::Url => vec!["URL".into(), "page_url".into(), "Адрес страницы".into()],
            Field::Signal(metric) => metric_synonyms(metric),
        }
    }

    /// Column in the oldest known layout.
    pub fn legacy_offset(self) -> Option<usize> {
        match self {
            Field::Url => Some(1),
            Field::Signal(Metric::TitleCount) => Some(15),
            Field::Signal(Metric::DescriptionCount) => Some(16),
            Field::Signal(Metric::TotalHeadings) => None,
            Field::Signal(metric) => {
                let level = usize::from(metric.heading_level()?);
                if is_nonempty(metric) {
                    Some(2 + level)
                } else {
                    Some(8 + level)
                }
            }
        }
    }
}

fn is_nonempty(metric: Metric) -> bool {
    Metric::nonempty(metric.heading_level().unwrap_or(0)) == Some(metric)
}

fn metric_synonyms(metric: Metric) -> Vec<String> {
    if let Some(level) = metric.heading_level() {
        return if is_nonempty(metric) {
            vec![
                format!("H{level} (non-empty)"),
                format!("h{level}_nonempty"),
                format!("h{level}_non_empty"),
                format!("H{level} (непустые)"),
                format!("h{level}_непустые"),
            ]
        } else {
            vec![
                format!("H{level} (total)"),
                format!("h{level}_total"),
                format!("H{level} (всего)"),
                format!("h{level}_всего"),
            ]
        };
    }
    match metric {
        Metric::TitleCount => vec!["Title count".into(), "title_count".into()],
        Metric::DescriptionCount => {
            vec!["Description count".into(), "description_count".into()]
        }
        _ => vec![
            "Total headings".into(),
            "total_headings".into(),
            "Всего заголовков".into(),
        ],
    }
}

/// How a column index was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Label,
    LegacyOffset,
}

/// Resolved mapping from logical field to column index.
///
/// Built once per historical read and discarded after the comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    columns: BTreeMap<Field, (usize, Resolution)>,
}

impl ColumnMap {
    pub fn get(&self, field: Field) -> Option<usize> {
        self.columns.get(&field).map(|(idx, _)| *idx)
    }

    pub fn resolution(&self, field: Field) -> Option<Resolution> {
        self.columns.get(&field).map(|(_, how)| *how)
    }

    pub fn url(&self) -> Option<usize> {
        self.get(Field::Url)
    }

    /// Resolved metrics and their columns, in reporting order.
    pub fn metrics(&self) -> impl Iterator<Item = (Metric, usize)> + '_ {
        self.columns.iter().filter_map(|(field, (idx, _))| match field {
            Field::Signal(metric) => Some((*metric, *idx)),
            Field::Url => None,
        })
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Every field the resolver knows about.
pub fn all_fields() -> impl Iterator<Item = Field> {
    std::iter::once(Field::Url).chain(Metric::ALL.into_iter().map(Field::Signal))
}

fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase()
}

/// Resolve every field against a header row.
pub fn resolve_columns(header: &[String]) -> ColumnMap {
    // Leftmost occurrence wins for duplicated labels.
    let mut by_label: HashMap<String, usize> = HashMap::new();
    for (idx, label) in header.iter().enumerate() {
        let key = normalize_label(label);
        if !key.is_empty() {
            by_label.entry(key).or_insert(idx);
        }
    }

    let mut map = ColumnMap::default();
    for field in all_fields() {
        let by_synonym = field
            .synonyms()
            .iter()
            .find_map(|s| by_label.get(&normalize_label(s)).copied());

        let resolved = match by_synonym {
            Some(idx) => Some((idx, Resolution::Label)),
            None => field
                .legacy_offset()
                .map(|idx| (idx, Resolution::LegacyOffset)),
        };

        if let Some(entry) = resolved {
            map.columns.insert(field, entry);
        }
    }
    tracing::debug!("Resolved {} column(s) from a {}-cell header", map.len(), header.len());
    map
}
