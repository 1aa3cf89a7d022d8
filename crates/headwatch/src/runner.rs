//! Orchestrator: fetch, extract, and compare each URL in turn.
//!
//! URLs are processed strictly sequentially. The politeness delay after a
//! successful page and every in-flight page can be cut short through a
//! [`CancellationToken`]; results gathered before the cancellation stay in
//! the report.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{SiteInfo, SitesConfig};
use crate::diff::DiffEngine;
use crate::extract::extract_from_html;
use crate::fetch::{FetchOutcome, HttpFetcher};
use crate::types::{PageOutcome, PageSnapshot, SignalRecord};

/// Snapshots of one site, in analysis order.
#[derive(Debug, Clone, Serialize)]
pub struct SiteResults {
    pub site_info: SiteInfo,
    pub results: Vec<PageSnapshot>,
}

impl SiteResults {
    pub fn successful(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.successful()
    }

    pub fn success_rate(&self) -> f64 {
        percentage(self.successful(), self.results.len())
    }
}

/// Everything one run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Grouped by site in the order sites were first seen.
    pub sites: Vec<SiteResults>,
    /// The run was cancelled before every URL was analyzed.
    pub interrupted: bool,
}

impl RunReport {
    /// Every snapshot across all sites.
    pub fn snapshots(&self) -> impl Iterator<Item = &PageSnapshot> {
        self.sites.iter().flat_map(|s| s.results.iter())
    }

    pub fn total_pages(&self) -> usize {
        self.sites.iter().map(|s| s.results.len()).sum()
    }

    pub fn successful(&self) -> usize {
        self.sites.iter().map(SiteResults::successful).sum()
    }

    pub fn failed(&self) -> usize {
        self.total_pages() - self.successful()
    }

    /// Share of successful pages, in percent.
    pub fn success_rate(&self) -> f64 {
        percentage(self.successful(), self.total_pages())
    }

    pub fn pages_with_changes(&self) -> usize {
        self.snapshots().filter(|s| s.has_changes()).count()
    }

    /// Successful pages with at least one counted title.
    pub fn pages_with_title(&self) -> usize {
        self.snapshots()
            .filter(|s| s.is_success() && s.signals.title_count > 0)
            .count()
    }

    /// Successful pages with at least one counted meta description.
    pub fn pages_with_description(&self) -> usize {
        self.snapshots()
            .filter(|s| s.is_success() && s.signals.description_count > 0)
            .count()
    }

    fn push(&mut self, info: SiteInfo, snapshot: PageSnapshot) {
        match self.sites.iter_mut().find(|s| s.site_info.key == info.key) {
            Some(site) => site.results.push(snapshot),
            None => self.sites.push(SiteResults {
                site_info: info,
                results: vec![snapshot],
            }),
        }
    }
}

pub(crate) fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// Single sequential worker over a list of URLs.
pub struct Analyzer {
    fetcher: HttpFetcher,
    diff: DiffEngine,
    delay: Duration,
}

impl Analyzer {
    pub fn new(fetcher: HttpFetcher, diff: DiffEngine, delay: Duration) -> Self {
        Self {
            fetcher,
            diff,
            delay,
        }
    }

    /// Fetch, extract, and compare one page.
    pub async fn analyze_page(&self, url: &str) -> PageSnapshot {
        let fetched_at = Utc::now();
        match self.fetcher.fetch(url).await {
            FetchOutcome::Success {
                status,
                body,
                attempts,
            } => {
                let signals = extract_from_html(&body);
                let comparison = self.diff.compare(url, &signals).await;
                info!(
                    "Analyzed {url}: HTTP {status}, {} heading(s), comparison {} ({attempts} attempt(s))",
                    signals.total_headings(),
                    comparison.status
                );
                PageSnapshot {
                    url: url.to_string(),
                    fetched_at,
                    http_status: Some(status),
                    signals,
                    outcome: PageOutcome::Success,
                    comparison: Some(comparison),
                }
            }
            FetchOutcome::Failure {
                last_error,
                attempts,
            } => {
                error!("Failed to analyze {url} after {attempts} attempt(s): {last_error}");
                PageSnapshot {
                    url: url.to_string(),
                    fetched_at,
                    http_status: None,
                    signals: SignalRecord::default(),
                    outcome: PageOutcome::Error { error: last_error },
                    comparison: None,
                }
            }
        }
    }

    /// Analyze every URL, grouping results by site.
    pub async fn run(
        &self,
        urls: &[String],
        sites: &SitesConfig,
        cancel: &CancellationToken,
    ) -> RunReport {
        let mut report = RunReport {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            sites: Vec::new(),
            interrupted: false,
        };
        info!("Analyzing {} URL(s)", urls.len());

        for url in urls {
            if cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }

            let snapshot = tokio::select! {
                _ = cancel.cancelled() => {
                    warn!("Run cancelled while analyzing {url}");
                    report.interrupted = true;
                    break;
                }
                snapshot = self.analyze_page(url) => snapshot,
            };
            let succeeded = snapshot.is_success();
            report.push(sites.site_info(url), snapshot);

            if succeeded && !self.delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        warn!("Run cancelled during the delay after {url}");
                        report.interrupted = true;
                        break;
                    }
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }
        }

        report.finished_at = Utc::now();
        info!(
            "Run finished: {}/{} page(s) succeeded{}",
            report.successful(),
            report.total_pages(),
            if report.interrupted { " (interrupted)" } else { "" }
        );
        report
    }
}
