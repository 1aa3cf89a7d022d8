//! Configuration loading: monitored sites, fetch policy, and history location.

use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::types::{HeadwatchError, HeadwatchResult};

/// Browser user agent sent with every page request.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/131.0.0.0 Safari/537.36";

/// Sheet name used when the configuration does not set one.
pub const DEFAULT_SHEET_NAME: &str = "Лист1";

/// Retry and request settings for the page fetcher.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Backoff before the first retry; doubles per attempt.
    pub initial_backoff: Duration,
    /// Accept protection pages as content instead of retrying.
    pub ignore_protection: bool,
    /// Per-attempt request timeout.
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(700),
            ignore_protection: false,
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Where the historical snapshot log lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryConfig {
    /// May be blank; the diff engine reports that as a status.
    pub spreadsheet_id: String,
    pub sheet_name: String,
}

/// One monitored site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteEntry {
    pub name: String,
    pub base_url: String,
    pub urls: Vec<String>,
    #[serde(default)]
    pub description: String,
}

/// Run-wide settings from the `default_settings` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultSettings {
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,
    #[serde(default = "default_delay")]
    pub delay_between_requests: f64,
    #[serde(default = "default_true")]
    pub upload_to_sheets: bool,
    #[serde(default = "default_true")]
    pub save_local: bool,
    /// Link appended to notification reports.
    #[serde(default)]
    pub report_url: Option<String>,
}

impl Default for DefaultSettings {
    fn default() -> Self {
        Self {
            spreadsheet_id: None,
            sheet_name: default_sheet_name(),
            delay_between_requests: default_delay(),
            upload_to_sheets: true,
            save_local: true,
            report_url: None,
        }
    }
}

fn default_sheet_name() -> String {
    DEFAULT_SHEET_NAME.to_string()
}

fn default_delay() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

/// Identity of the site a URL belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteInfo {
    pub key: String,
    pub name: String,
    pub base_url: String,
    pub description: String,
}

impl SiteInfo {
    /// Placeholder for URLs outside every configured site.
    pub fn unknown() -> Self {
        Self {
            key: "unknown".to_string(),
            name: "Unknown site".to_string(),
            base_url: String::new(),
            description: String::new(),
        }
    }
}

/// The sites configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SitesConfig {
    /// Sites in file order; URLs run in this order and the first matching
    /// site owns a URL.
    #[serde(default)]
    pub sites: IndexMap<String, SiteEntry>,
    #[serde(default)]
    pub default_settings: DefaultSettings,
    /// Free-form analysis flags, carried through untouched.
    #[serde(default)]
    pub analysis_settings: serde_json::Map<String, serde_json::Value>,
}

impl SitesConfig {
    /// URLs of one site (empty when the key is unknown) or of every site.
    pub fn site_urls(&self, site_key: Option<&str>) -> Vec<String> {
        match site_key {
            Some(key) => self
                .sites
                .get(key)
                .map(|site| site.urls.clone())
                .unwrap_or_default(),
            None => self
                .sites
                .values()
                .flat_map(|site| site.urls.iter().cloned())
                .collect(),
        }
    }

    /// The site whose URL list contains a prefix of `url`.
    pub fn site_info(&self, url: &str) -> SiteInfo {
        self.sites
            .iter()
            .find(|(_, site)| site.urls.iter().any(|u| url.starts_with(u.as_str())))
            .map(|(key, site)| SiteInfo {
                key: key.clone(),
                name: site.name.clone(),
                base_url: site.base_url.clone(),
                description: site.description.clone(),
            })
            .unwrap_or_else(SiteInfo::unknown)
    }

    /// Pick the URLs for a run: explicit URLs, else one site, else all sites.
    pub fn select_urls(&self, custom_urls: &[String], site_key: Option<&str>) -> Vec<String> {
        if !custom_urls.is_empty() {
            custom_urls.to_vec()
        } else {
            self.site_urls(site_key)
        }
    }

    /// History location derived from `default_settings`.
    pub fn history_config(&self) -> HistoryConfig {
        HistoryConfig {
            spreadsheet_id: self
                .default_settings
                .spreadsheet_id
                .clone()
                .unwrap_or_default(),
            sheet_name: self.default_settings.sheet_name.clone(),
        }
    }

    /// Politeness delay between successful fetches.
    pub fn request_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.default_settings.delay_between_requests)
            .unwrap_or(Duration::ZERO)
    }
}

/// Load the sites configuration from a JSON file.
pub fn load_config(path: impl AsRef<Path>) -> HeadwatchResult<SitesConfig> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(HeadwatchError::Config(format!(
            "configuration file {} not found",
            path.display()
        )));
    }
    let raw = std::fs::read_to_string(path)?;
    let config: SitesConfig = serde_json::from_str(&raw).map_err(|e| {
        HeadwatchError::Config(format!("failed to parse {}: {e}", path.display()))
    })?;
    tracing::info!(
        "Loaded {} site(s) from {}",
        config.sites.len(),
        path.display()
    );
    Ok(config)
}
