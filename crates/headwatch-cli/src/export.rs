//! Local JSON export of a run.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Local};
use serde_json::{json, Map, Value};

use headwatch::RunReport;

/// `headwatch_results_<YYYYmmdd_HHMMSS>.json`
pub fn results_file_name(at: DateTime<Local>) -> String {
    format!("headwatch_results_{}.json", at.format("%Y%m%d_%H%M%S"))
}

/// Report keyed by site, with the run summary alongside.
pub fn report_json(report: &RunReport) -> anyhow::Result<Value> {
    let mut sites = Map::new();
    for site in &report.sites {
        sites.insert(site.site_info.key.clone(), serde_json::to_value(site)?);
    }
    Ok(json!({
        "started_at": report.started_at,
        "finished_at": report.finished_at,
        "interrupted": report.interrupted,
        "summary": {
            "sites": report.sites.len(),
            "pages": report.total_pages(),
            "successful": report.successful(),
            "failed": report.failed(),
            "success_rate": report.success_rate(),
            "pages_with_changes": report.pages_with_changes(),
        },
        "sites": sites,
    }))
}

/// Write the report into `dir`, returning the file path.
pub fn save_report(report: &RunReport, dir: &Path) -> anyhow::Result<PathBuf> {
    let path = dir.join(results_file_name(Local::now()));
    let body = serde_json::to_string_pretty(&report_json(report)?)?;
    std::fs::write(&path, body)
        .with_context(|| format!("failed to write results to {}", path.display()))?;
    Ok(path)
}
