//! Headwatch: periodic SEO structure monitoring with schema-tolerant change detection.

pub mod auth;
pub mod classify;
pub mod columns;
pub mod config;
pub mod diff;
pub mod extract;
pub mod fetch;
pub mod notify;
pub mod report;
pub mod runner;
pub mod sheet_rows;
pub mod sheets;
pub mod store;
pub mod types;

pub use auth::{ServiceAccountAuth, ServiceAccountKey};
pub use classify::{is_boilerplate_error_text, is_meaningful_text, is_protection_page};
pub use columns::{resolve_columns, ColumnMap, Field};
pub use config::{load_config, FetchConfig, HistoryConfig, SiteInfo, SitesConfig};
pub use diff::{compare_snapshot, DiffEngine};
pub use extract::{extract_from_html, extract_signals};
pub use fetch::{FetchOutcome, HttpFetcher, RetryPolicy};
pub use notify::{NotificationChannel, TelegramChannel};
pub use runner::{Analyzer, RunReport, SiteResults};
pub use sheet_rows::SheetWriter;
pub use sheets::SheetsClient;
pub use store::{MemoryStore, RangeSpec, TabularStore};
pub use types::*;
