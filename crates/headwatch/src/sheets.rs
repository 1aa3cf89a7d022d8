//! Google Sheets v4 values API client implementing [`TabularStore`].
//!
//! Signs in with a service account (see [`crate::auth`]); a fixed bearer
//! token from `HEADWATCH_SHEETS_TOKEN` is accepted as a fallback. Only
//! `values.get` and `values.append` are used.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::auth::{ServiceAccountAuth, ServiceAccountKey};
use crate::store::{RangeSpec, TabularStore};
use crate::types::{HeadwatchError, HeadwatchResult};

/// Environment variable holding a fixed bearer token.
pub const TOKEN_ENV: &str = "HEADWATCH_SHEETS_TOKEN";

const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com";

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct AppendResponse {
    #[serde(default)]
    updates: Option<AppendUpdates>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    #[serde(default)]
    updated_rows: Option<usize>,
}

#[derive(Clone)]
enum Credentials {
    Bearer(String),
    ServiceAccount(Arc<ServiceAccountAuth>),
}

/// Sheets values API client.
#[derive(Clone)]
pub struct SheetsClient {
    client: reqwest::Client,
    base_url: Url,
    credentials: Credentials,
}

fn default_base_url() -> HeadwatchResult<Url> {
    Url::parse(DEFAULT_BASE_URL)
        .map_err(|e| HeadwatchError::Config(format!("invalid Sheets base URL: {e}")))
}

impl SheetsClient {
    /// Client with a fixed bearer token.
    pub fn new(token: impl Into<String>) -> HeadwatchResult<Self> {
        Self::with_base_url(token, default_base_url()?)
    }

    /// Bearer-token client against a different API root (used by tests).
    pub fn with_base_url(token: impl Into<String>, base_url: Url) -> HeadwatchResult<Self> {
        Self::build(Credentials::Bearer(token.into()), base_url)
    }

    /// Client that signs in with a service-account key.
    pub fn service_account(key: ServiceAccountKey) -> HeadwatchResult<Self> {
        Self::service_account_with_base_url(key, default_base_url()?)
    }

    pub fn service_account_with_base_url(
        key: ServiceAccountKey,
        base_url: Url,
    ) -> HeadwatchResult<Self> {
        let auth = ServiceAccountAuth::new(key)?;
        Self::build(Credentials::ServiceAccount(Arc::new(auth)), base_url)
    }

    fn build(credentials: Credentials, base_url: Url) -> HeadwatchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    /// Service account from the environment, else `HEADWATCH_SHEETS_TOKEN`.
    pub fn from_env() -> HeadwatchResult<Self> {
        if let Some(key) = ServiceAccountKey::from_env()? {
            let client = Self::service_account(key)?;
            if let Credentials::ServiceAccount(auth) = &client.credentials {
                tracing::info!("Sheets access as service account {}", auth.client_email());
            }
            return Ok(client);
        }
        match std::env::var(TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => Self::new(token.trim()),
            _ => Err(HeadwatchError::Config(format!(
                "no Sheets credentials: set {} or {}/{}, or {TOKEN_ENV}",
                crate::auth::CREDENTIALS_FILE_ENV,
                crate::auth::CLIENT_EMAIL_ENV,
                crate::auth::PRIVATE_KEY_ENV
            ))),
        }
    }

    async fn bearer(&self) -> HeadwatchResult<String> {
        match &self.credentials {
            Credentials::Bearer(token) => Ok(token.clone()),
            Credentials::ServiceAccount(auth) => auth.access_token().await,
        }
    }

    /// `…/v4/spreadsheets/{id}/values/{last_segment}`
    fn values_url(&self, spreadsheet_id: &str, last_segment: &str) -> HeadwatchResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| HeadwatchError::Config("Sheets base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", spreadsheet_id, "values", last_segment]);
        Ok(url)
    }

    async fn check(resp: reqwest::Response, action: &str) -> HeadwatchResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(HeadwatchError::Store(format!(
            "{action} failed with HTTP {}: {}",
            status.as_u16(),
            body.chars().take(200).collect::<String>()
        )))
    }
}

/// Render a JSON cell as the text the sheet shows.
fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl TabularStore for SheetsClient {
    async fn read_range(
        &self,
        spreadsheet_id: &str,
        range: &RangeSpec,
    ) -> HeadwatchResult<Vec<Vec<String>>> {
        let url = self.values_url(spreadsheet_id, &range.to_string())?;
        let token = self.bearer().await?;
        let resp = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await?;
        let resp = Self::check(resp, "values.get").await?;
        let body: ValueRange = resp.json().await?;
        let rows: Vec<Vec<String>> = body
            .values
            .iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect();
        tracing::debug!("Read {} row(s) from {range}", rows.len());
        Ok(rows)
    }

    async fn append_rows(
        &self,
        spreadsheet_id: &str,
        range: &RangeSpec,
        rows: Vec<Vec<String>>,
    ) -> HeadwatchResult<usize> {
        let count = rows.len();
        let mut url = self.values_url(spreadsheet_id, &format!("{range}:append"))?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");

        let token = self.bearer().await?;
        let resp = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "values": rows }))
            .send()
            .await?;
        let resp = Self::check(resp, "values.append").await?;
        let body: AppendResponse = resp.json().await?;
        let written = body
            .updates
            .and_then(|u| u.updated_rows)
            .unwrap_or(count);
        tracing::info!("Appended {written} row(s) to {range}");
        Ok(written)
    }
}
