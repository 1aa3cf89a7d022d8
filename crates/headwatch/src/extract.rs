//! Structural SEO signal extraction from raw HTML.
//!
//! Uses the `scraper` crate for CSS selector-based parsing. Counts are
//! taken over every matching element; nothing is de-duplicated, so two
//! `<title>` tags on one page show up as `title_count == 2`.

use scraper::{ElementRef, Html, Selector};

use crate::classify::is_meaningful_text;
use crate::types::SignalRecord;

/// Extract signals from raw HTML.
pub fn extract_from_html(html: &str) -> SignalRecord {
    let document = Html::parse_document(html);
    extract_signals(&document)
}

/// Extract signals from an already parsed document.
pub fn extract_signals(document: &Html) -> SignalRecord {
    let mut record = SignalRecord::default();

    // 1. Headings
    extract_headings(document, &mut record);

    // 2. Title
    record.title_count = count_titles(document);

    // 3. Meta description
    record.description_count = count_descriptions(document);

    record
}

// ── Heading extraction ──────────────────────────────────────────────────────

fn extract_headings(document: &Html, record: &mut SignalRecord) {
    for level in 1..=6u8 {
        let sel = match Selector::parse(&format!("h{level}")) {
            Ok(s) => s,
            Err(_) => continue,
        };
        let slot = usize::from(level - 1);
        for element in document.select(&sel) {
            record.total[slot] += 1;
            if !element_text(&element).is_empty() {
                record.nonempty[slot] += 1;
            }
        }
    }
}

// ── Title and description ───────────────────────────────────────────────────

fn count_titles(document: &Html) -> u32 {
    let Ok(sel) = Selector::parse("title") else {
        return 0;
    };
    let count = document
        .select(&sel)
        .filter(|el| is_meaningful_text(&element_text(el)))
        .count();
    saturating_u32(count)
}

fn count_descriptions(document: &Html) -> u32 {
    let Ok(sel) = Selector::parse(r#"meta[name="description"]"#) else {
        return 0;
    };
    let count = document
        .select(&sel)
        .filter_map(|el| el.value().attr("content"))
        .filter(|content| is_meaningful_text(content))
        .count();
    saturating_u32(count)
}

/// Concatenated, trimmed text of an element and its descendants.
fn element_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
