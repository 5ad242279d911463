//! Client for the third-party field-service API.
//!
//! Requests carry a static bearer token. Failures are returned to the caller
//! as-is: no retries and no explicit timeout beyond the transport's default.

use reqwest::{header, Client, Response};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream API token not configured")]
    MissingToken,
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Masks a token for logging: first 7 chars + "***" + last 4 chars, or just
/// "***" when the token is 11 chars or shorter.
pub fn mask_token(token: &str) -> String {
    let len = token.chars().count();
    if len <= 11 {
        return "***".to_string();
    }
    let head: String = token.chars().take(7).collect();
    let tail: String = token.chars().skip(len - 4).collect();
    format!("{}***{}", head, tail)
}

/// OData-style equality filter understood by the upstream, e.g. `uuid eq 'x'`.
/// Single quotes in `value` are doubled.
pub fn eq_filter(field: &str, value: &str) -> String {
    format!("{} eq '{}'", field, value.replace('\'', "''"))
}

#[derive(Clone)]
pub struct UpstreamClient {
    http: Client,
    base: String,
    token: String,
}

impl UpstreamClient {
    pub fn new(base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.token.is_empty()
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn masked_token(&self) -> String {
        mask_token(&self.token)
    }

    fn bearer(&self) -> Result<String, UpstreamError> {
        if !self.is_configured() {
            return Err(UpstreamError::MissingToken);
        }
        Ok(format!("Bearer {}", self.token))
    }

    /// GET `{base}{path}` with the given query parameters and decode the JSON body.
    pub async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, UpstreamError> {
        let auth = self.bearer()?;
        let url = format!("{}{}", self.base, path);
        tracing::debug!(%url, "upstream GET");
        let value = self
            .http
            .get(url)
            .header(header::AUTHORIZATION, auth)
            .header(header::ACCEPT, "application/json")
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        Ok(value)
    }

    /// Start downloading the raw content of an attachment.
    pub async fn get_attachment(&self, uuid: &str) -> Result<Response, UpstreamError> {
        let auth = self.bearer()?;
        let url = format!("{}/attachment/{}.file", self.base, uuid);
        tracing::debug!(%url, "upstream attachment GET");
        let resp = self
            .http
            .get(url)
            .header(header::AUTHORIZATION, auth)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp)
    }
}
