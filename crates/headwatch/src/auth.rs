//! Google service-account sign-in for the Sheets API.
//!
//! A JWT signed with the account's RSA key is exchanged at its `token_uri`
//! for an access token. The token is cached and refreshed one minute before
//! it expires, so long unattended runs keep working.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::types::{HeadwatchError, HeadwatchResult};

/// Read/write access to spreadsheets.
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Path to a downloaded service-account key file.
pub const CREDENTIALS_FILE_ENV: &str = "HEADWATCH_SERVICE_ACCOUNT_FILE";
pub const CLIENT_EMAIL_ENV: &str = "CLIENT_EMAIL";
pub const PRIVATE_KEY_ENV: &str = "PRIVATE_KEY";
pub const PRIVATE_KEY_ID_ENV: &str = "PRIVATE_KEY_ID";
pub const TOKEN_URI_ENV: &str = "TOKEN_URI";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;
const MAX_EXPIRES_IN_SECS: i64 = 86_400;
const REFRESH_MARGIN_SECS: i64 = 60;

/// The fields of a service-account key that sign-in needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    /// PEM-encoded RSA private key.
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// Env values usually carry the PEM with literal `\n` sequences.
fn unescape_newlines(value: &str) -> String {
    value.trim().replace("\\n", "\n")
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ServiceAccountKey {
    /// Parse a JSON key file as downloaded from the cloud console.
    pub fn from_file(path: impl AsRef<Path>) -> HeadwatchResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HeadwatchError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            HeadwatchError::Config(format!(
                "{} is not a service-account key: {e}",
                path.display()
            ))
        })
    }

    /// Key from `HEADWATCH_SERVICE_ACCOUNT_FILE`, else from the
    /// `CLIENT_EMAIL` / `PRIVATE_KEY` variables. `None` when neither is set.
    pub fn from_env() -> HeadwatchResult<Option<Self>> {
        if let Some(path) = env_value(CREDENTIALS_FILE_ENV) {
            return Self::from_file(path).map(Some);
        }
        let (Some(client_email), Some(private_key)) =
            (env_value(CLIENT_EMAIL_ENV), env_value(PRIVATE_KEY_ENV))
        else {
            return Ok(None);
        };
        Ok(Some(Self {
            client_email,
            private_key: unescape_newlines(&private_key),
            private_key_id: env_value(PRIVATE_KEY_ID_ENV),
            token_uri: env_value(TOKEN_URI_ENV).unwrap_or_else(default_token_uri),
        }))
    }
}

/// JWT claim set for the bearer grant.
#[derive(Debug, Serialize, PartialEq, Eq)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

fn claims(key: &ServiceAccountKey, now: DateTime<Utc>) -> Claims<'_> {
    let iat = now.timestamp();
    Claims {
        iss: &key.client_email,
        scope: SHEETS_SCOPE,
        aud: &key.token_uri,
        iat,
        exp: iat + ASSERTION_LIFETIME_SECS,
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// Access-token source backed by a service-account key.
pub struct ServiceAccountAuth {
    client: reqwest::Client,
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountAuth {
    pub fn new(key: ServiceAccountKey) -> HeadwatchResult<Self> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| HeadwatchError::Config(format!("invalid service-account key: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            key,
            signing_key,
            cached: Mutex::new(None),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    /// A valid access token, exchanging a new assertion when needed.
    pub async fn access_token(&self) -> HeadwatchResult<String> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.value.clone());
        }
        let token = self.exchange(now).await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn exchange(&self, now: DateTime<Utc>) -> HeadwatchResult<CachedToken> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();
        let assertion = jsonwebtoken::encode(&header, &claims(&self.key, now), &self.signing_key)
            .map_err(|e| HeadwatchError::Config(format!("cannot sign token request: {e}")))?;

        let resp = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(HeadwatchError::Store(format!(
                "token exchange failed with HTTP {}: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            )));
        }
        let body: TokenResponse = resp.json().await?;
        let lifetime = body
            .expires_in
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS)
            .clamp(0, MAX_EXPIRES_IN_SECS);
        tracing::debug!(
            "Obtained access token for {} (expires in {lifetime}s)",
            self.key.client_email
        );
        Ok(CachedToken {
            value: body.access_token,
            expires_at: now + chrono::Duration::seconds(lifetime),
        })
    }
}
