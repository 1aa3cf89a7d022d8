//! Human-readable renderings of a [`RunReport`]: notification messages
//! (Telegram HTML) and the console summary.

use chrono::{DateTime, Utc};

use crate::notify::NotificationChannel;
use crate::runner::{percentage, RunReport};
use crate::types::PageSnapshot;

/// Upper bound for one message, below Telegram's 4096-character limit.
pub const MESSAGE_LIMIT: usize = 4000;

/// Sites listed individually in the statistics message.
const SITES_IN_SUMMARY: usize = 5;

const FOOTER: &str = "\n<i>🤖 Sent automatically</i>";

fn stamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        push_escaped(&mut out, c);
    }
    out
}

fn push_escaped(out: &mut String, c: char) {
    match c {
        '&' => out.push_str("&amp;"),
        '<' => out.push_str("&lt;"),
        '>' => out.push_str("&gt;"),
        '"' => out.push_str("&quot;"),
        _ => out.push(c),
    }
}

/// Escape `text`, cut so the result is at most `max` characters.
///
/// The cut happens on raw characters, so an entity is never split.
fn escape_within(text: &str, max: usize) -> String {
    let escaped = escape_html(text);
    if escaped.chars().count() <= max {
        return escaped;
    }
    let budget = max.saturating_sub(1);
    let mut out = String::new();
    let mut used = 0;
    let mut piece = String::new();
    for c in text.chars() {
        piece.clear();
        push_escaped(&mut piece, c);
        let len = piece.chars().count();
        if used + len > budget {
            break;
        }
        out.push_str(&piece);
        used += len;
    }
    out.push('…');
    out
}

// ── Notification messages ───────────────────────────────────────────────────

/// Run statistics: totals, coverage, the first few sites, change count.
pub fn render_statistics(report: &RunReport, report_url: Option<&str>) -> String {
    let ok = report.successful();
    let with_title = report.pages_with_title();
    let with_description = report.pages_with_description();

    let mut msg = String::from("<b>📊 SEO MONITORING REPORT</b>\n");
    msg.push_str(&format!("<i>{}</i>\n", stamp(report.finished_at)));
    if report.interrupted {
        msg.push_str("<i>⚠️ Run interrupted, results are partial</i>\n");
    }
    msg.push_str("\n<b>📈 TOTALS:</b>\n");
    msg.push_str(&format!("🌐 Sites: {}\n", report.sites.len()));
    msg.push_str(&format!("📄 Pages: {}\n", report.total_pages()));
    msg.push_str(&format!("✅ Succeeded: {ok}\n"));
    msg.push_str(&format!("❌ Failed: {}\n", report.failed()));
    msg.push_str(&format!(
        "📊 Success rate: {:.1}%\n",
        report.success_rate()
    ));
    msg.push_str("\n<b>🔍 SEO ELEMENTS:</b>\n");
    msg.push_str(&format!(
        "📝 Title: {with_title}/{ok} ({:.1}%)\n",
        percentage(with_title, ok)
    ));
    msg.push_str(&format!(
        "📄 Description: {with_description}/{ok} ({:.1}%)\n",
        percentage(with_description, ok)
    ));
    msg.push_str("\n<b>🌐 SITES:</b>");

    for site in report.sites.iter().take(SITES_IN_SUMMARY) {
        msg.push_str(&format!(
            "\n\n<b>{}</b> ({})\n📄 Pages: {}\n✅ Succeeded: {}\n❌ Failed: {}\n📊 Success: {:.1}%",
            escape_html(&site.site_info.name),
            escape_html(&site.site_info.key),
            site.results.len(),
            site.successful(),
            site.failed(),
            site.success_rate()
        ));
    }
    if report.sites.len() > SITES_IN_SUMMARY {
        msg.push_str(&format!(
            "\n\n... and {} more site(s)",
            report.sites.len() - SITES_IN_SUMMARY
        ));
    }

    let changed = report.pages_with_changes();
    if changed > 0 {
        msg.push_str(&format!(
            "\n\n<b>🔄 CHANGES:</b>\n📈 Pages with changes: {changed}"
        ));
    }
    if let Some(link) = report_url {
        msg.push_str(&format!("\n\n<i>💥 Report: {}</i>", escape_html(link)));
    }
    msg.push_str(FOOTER);
    msg
}

/// Per-page change block as plain text, `None` when the page has no changes.
fn change_block(snapshot: &PageSnapshot) -> Option<String> {
    let comparison = snapshot.comparison.as_ref().filter(|c| c.has_changes())?;
    let lines: Vec<String> = comparison
        .changes
        .iter()
        .map(|change| {
            let sign = if change.difference > 0 { "➕" } else { "➖" };
            format!("   {sign} {change}")
        })
        .collect();
    if lines.is_empty() {
        return None;
    }
    Some(format!("🔗 {}\n{}", snapshot.url, lines.join("\n")))
}

/// Detailed per-URL changes, split into messages below [`MESSAGE_LIMIT`].
///
/// Empty when no page changed.
pub fn render_change_messages(report: &RunReport) -> Vec<String> {
    let blocks: Vec<String> = report.snapshots().filter_map(change_block).collect();
    if blocks.is_empty() {
        return Vec::new();
    }

    let at = stamp(report.finished_at);
    let first_header = format!("<b>🔄 DETAILED CHANGES</b>\n<i>{at}</i>\n");
    let next_header = format!("<b>🔄 DETAILED CHANGES (continued)</b>\n<i>{at}</i>\n");
    let footer_len = FOOTER.chars().count();
    let room = MESSAGE_LIMIT - footer_len - next_header.chars().count() - 2;

    let mut messages = Vec::new();
    let mut current = first_header;
    let mut has_block = false;
    for block in blocks {
        let block = escape_within(&block, room);
        let needed = current.chars().count() + 1 + block.chars().count() + footer_len;
        if has_block && needed >= MESSAGE_LIMIT {
            current.push_str(FOOTER);
            messages.push(std::mem::replace(&mut current, next_header.clone()));
        }
        current.push('\n');
        current.push_str(&block);
        has_block = true;
    }
    current.push_str(FOOTER);
    messages.push(current);
    messages
}

/// Notice sent when a run fails outright.
pub fn render_error_notice(message: &str, at: DateTime<Utc>) -> String {
    format!(
        "<b>⚠️ ANALYSIS FAILED</b>\n<i>{}</i>\n\n{}\n{FOOTER}",
        stamp(at),
        escape_html(message)
    )
}

/// Send statistics, then detailed changes. True when every message went out.
pub async fn send_report(
    channel: &dyn NotificationChannel,
    report: &RunReport,
    report_url: Option<&str>,
) -> bool {
    let mut delivered = channel.send_text(&render_statistics(report, report_url)).await;
    for message in render_change_messages(report) {
        delivered &= channel.send_text(&message).await;
    }
    delivered
}

// ── Console ─────────────────────────────────────────────────────────────────

/// Plain-text summary for the terminal.
pub fn render_console(report: &RunReport) -> String {
    let rule = "=".repeat(100);
    let mut out = format!("\n{rule}\nSEO MONITORING RESULTS\n{rule}\n");

    for site in &report.sites {
        let info = &site.site_info;
        out.push_str(&format!("\n🌐 SITE: {} ({})\n", info.name, info.key));
        if !info.description.is_empty() {
            out.push_str(&format!("   Description: {}\n", info.description));
        }
        if !info.base_url.is_empty() {
            out.push_str(&format!("   Base URL: {}\n", info.base_url));
        }
        out.push_str(&format!("   Pages analyzed: {}\n", site.results.len()));
        out.push_str(&"-".repeat(80));
        out.push('\n');

        for (i, snap) in site.results.iter().enumerate() {
            out.push_str(&format!("\n   {}. {}\n", i + 1, snap.url));
            out.push_str(&format!("      Status: {}\n", snap.status_label()));
            if let Some(err) = snap.error() {
                out.push_str(&format!("      ❌ Error: {err}\n"));
                continue;
            }
            out.push_str("      📈 Headings:\n");
            for level in 0..6 {
                let total = snap.signals.total[level];
                if total > 0 {
                    out.push_str(&format!(
                        "        H{}: {} (total: {total})\n",
                        level + 1,
                        snap.signals.nonempty[level]
                    ));
                }
            }
            out.push_str(&format!(
                "      📝 Title: {}  Description: {}\n",
                snap.signals.title_count, snap.signals.description_count
            ));
            if let Some(c) = &snap.comparison {
                out.push_str(&format!("      🔍 Comparison: {}\n", c.status));
                for err in &c.errors {
                    out.push_str(&format!("        - {err}\n"));
                }
                for change in &c.changes {
                    out.push_str(&format!("        - {change}\n"));
                }
            }
        }
        out.push_str(&format!(
            "\n   📊 Site: {}/{} succeeded\n",
            site.successful(),
            site.results.len()
        ));
    }

    out.push_str(&format!("\n{rule}\n📈 TOTALS:\n"));
    out.push_str(&format!("   🌐 Sites: {}\n", report.sites.len()));
    out.push_str(&format!("   📄 Pages: {}\n", report.total_pages()));
    out.push_str(&format!("   ✅ Succeeded: {}\n", report.successful()));
    out.push_str(&format!("   ❌ Failed: {}\n", report.failed()));
    out.push_str(&format!(
        "   📊 Success rate: {:.1}%\n",
        report.success_rate()
    ));
    if report.interrupted {
        out.push_str("   ⚠️ Interrupted before all URLs were analyzed\n");
    }
    out.push_str(&rule);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteInfo;
    use crate::runner::SiteResults;
    use crate::types::{
        ChangeEvent, ComparisonResult, ComparisonStatus, Metric, PageOutcome, SignalRecord,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn page(url: &str, title: u32, changes: Vec<ChangeEvent>) -> PageSnapshot {
        PageSnapshot {
            url: url.to_string(),
            fetched_at: Utc::now(),
            http_status: Some(200),
            signals: SignalRecord {
                nonempty: [1, 0, 0, 0, 0, 0],
                total: [1, 0, 0, 0, 0, 0],
                title_count: title,
                description_count: 0,
            },
            outcome: PageOutcome::Success,
            comparison: Some(ComparisonResult::from_changes(changes)),
        }
    }

    fn failed(url: &str) -> PageSnapshot {
        PageSnapshot {
            url: url.to_string(),
            fetched_at: Utc::now(),
            http_status: None,
            signals: SignalRecord::default(),
            outcome: PageOutcome::Error {
                error: "request timed out".to_string(),
            },
            comparison: None,
        }
    }

    fn site(key: &str, results: Vec<PageSnapshot>) -> SiteResults {
        SiteResults {
            site_info: SiteInfo {
                key: key.to_string(),
                name: format!("Site {key}"),
                base_url: String::new(),
                description: String::new(),
            },
            results,
        }
    }

    fn report(sites: Vec<SiteResults>) -> RunReport {
        RunReport {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            sites,
            interrupted: false,
        }
    }

    fn plus_one(metric: Metric) -> ChangeEvent {
        ChangeEvent::between(metric, 1, 2).unwrap()
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a<b>&\"c\""), "a&lt;b&gt;&amp;&quot;c&quot;");
    }

    #[test]
    fn test_statistics_message() {
        let r = report(vec![site(
            "a",
            vec![
                page("https://a/1", 1, vec![plus_one(Metric::H1Nonempty)]),
                page("https://a/2", 0, Vec::new()),
                failed("https://a/3"),
            ],
        )]);
        let msg = render_statistics(&r, Some("https://docs.example/report"));
        assert!(msg.contains("📄 Pages: 3"));
        assert!(msg.contains("✅ Succeeded: 2"));
        assert!(msg.contains("📊 Success rate: 66.7%"));
        assert!(msg.contains("📝 Title: 1/2 (50.0%)"));
        assert!(msg.contains("📄 Description: 0/2 (0.0%)"));
        assert!(msg.contains("Pages with changes: 1"));
        assert!(msg.contains("https://docs.example/report"));
    }

    #[test]
    fn test_statistics_lists_first_five_sites() {
        let sites = (0..7)
            .map(|i| site(&format!("s{i}"), vec![page("u", 1, Vec::new())]))
            .collect();
        let msg = render_statistics(&report(sites), None);
        assert!(msg.contains("(s4)"));
        assert!(!msg.contains("(s5)"));
        assert!(msg.contains("... and 2 more site(s)"));
        assert!(!msg.contains("CHANGES"));
    }

    #[test]
    fn test_no_change_messages_without_changes() {
        let r = report(vec![site("a", vec![page("u", 1, Vec::new())])]);
        assert!(render_change_messages(&r).is_empty());
    }

    #[test]
    fn test_change_lines_are_signed() {
        let r = report(vec![site(
            "a",
            vec![page(
                "https://a/x",
                1,
                vec![
                    plus_one(Metric::H2Total),
                    ChangeEvent::between(Metric::TitleCount, 2, 1).unwrap(),
                ],
            )],
        )]);
        let messages = render_change_messages(&r);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("🔗 https://a/x"));
        assert!(messages[0].contains("➕ h2_total: +1"));
        assert!(messages[0].contains("➖ title_count: -1"));
    }

    #[test]
    fn test_change_messages_split_below_limit() {
        let pages = (0..200)
            .map(|i| {
                page(
                    &format!("https://site.example/a/rather/long/path/number/{i}"),
                    1,
                    vec![plus_one(Metric::H1Nonempty), plus_one(Metric::H3Total)],
                )
            })
            .collect();
        let messages = render_change_messages(&report(vec![site("a", pages)]));
        assert!(messages.len() > 1);
        for message in &messages {
            assert!(message.chars().count() < MESSAGE_LIMIT);
        }
        assert!(messages[1].contains("(continued)"));
        let total_blocks: usize = messages.iter().map(|m| m.matches("🔗").count()).sum();
        assert_eq!(total_blocks, 200);
    }

    #[test]
    fn test_oversized_block_is_cut_between_entities() {
        let url = format!("https://a.example/?q=1{}", "&x=<y>".repeat(2000));
        let r = report(vec![site(
            "a",
            vec![page(&url, 1, vec![plus_one(Metric::H1Nonempty)])],
        )]);
        let messages = render_change_messages(&r);
        assert_eq!(messages.len(), 1);
        let msg = &messages[0];
        assert!(msg.chars().count() < MESSAGE_LIMIT);
        assert!(msg.contains('…'));
        for (i, _) in msg.match_indices('&') {
            let rest = &msg[i..];
            assert!(
                rest.starts_with("&amp;") || rest.starts_with("&lt;") || rest.starts_with("&gt;"),
                "split entity at byte {i}"
            );
        }
    }

    #[test]
    fn test_escape_within_keeps_short_text() {
        assert_eq!(escape_within("a&b", 10), "a&amp;b");
        assert_eq!(escape_within("a&b", 4), "a…");
        assert_eq!(escape_within("a&bc", 7), "a&amp;…");
    }

    #[test]
    fn test_error_notice() {
        let msg = render_error_notice("config <missing>", Utc::now());
        assert!(msg.contains("ANALYSIS FAILED"));
        assert!(msg.contains("config &lt;missing&gt;"));
    }

    #[test]
    fn test_console_summary() {
        let r = report(vec![site(
            "a",
            vec![page("https://a/1", 1, Vec::new()), failed("https://a/2")],
        )]);
        let out = render_console(&r);
        assert!(out.contains("🌐 SITE: Site a (a)"));
        assert!(out.contains("H1: 1 (total: 1)"));
        assert!(out.contains("❌ Error: request timed out"));
        assert!(out.contains(&format!("🔍 Comparison: {}", ComparisonStatus::NoChanges)));
        assert!(out.contains("📊 Success rate: 50.0%"));
    }

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationChannel for Recorder {
        async fn send_text(&self, markup: &str) -> bool {
            self.sent.lock().unwrap().push(markup.to_string());
            true
        }
    }

    #[tokio::test]
    async fn test_send_report_sends_stats_then_changes() {
        let recorder = Recorder::default();
        let r = report(vec![site(
            "a",
            vec![page("https://a/1", 1, vec![plus_one(Metric::H1Total)])],
        )]);
        assert!(send_report(&recorder, &r, None).await);
        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].contains("SEO MONITORING REPORT"));
        assert!(sent[1].contains("DETAILED CHANGES"));
    }
}
