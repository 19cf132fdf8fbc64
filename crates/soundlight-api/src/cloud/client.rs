// Account API HTTP client
//
// Wraps `reqwest::Client` with base-URL joining, status/body capture, and
// JSON decoding that keeps the raw body on failure. Endpoint methods
// (login, refresh, devices) interpret status codes themselves because the
// account service signals MFA and token problems through them.

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Seconds to wait when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

/// A response whose status the caller still has to interpret.
#[derive(Debug)]
pub(crate) struct RawResponse {
    pub status: reqwest::StatusCode,
    pub retry_after_secs: Option<u64>,
    pub body: String,
}

impl RawResponse {
    pub(crate) fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_str(&self.body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: self.body.clone(),
        })
    }

    /// Error for a status no endpoint-specific rule claimed.
    pub(crate) fn unexpected(&self) -> Error {
        if self.status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Error::RateLimited {
                retry_after_secs: self.retry_after_secs.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
            };
        }
        Error::Api {
            status: self.status.as_u16(),
            message: preview(&self.body),
        }
    }
}

fn preview(body: &str) -> String {
    const LIMIT: usize = 200;
    match body.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_owned(),
    }
}

/// HTTP client for the cloud account API.
#[derive(Debug, Clone)]
pub struct CloudClient {
    http: reqwest::Client,
    base_url: Url,
}

impl CloudClient {
    /// Create a client with its own `reqwest::Client` built from `transport`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url))
    }

    fn with_client(http: reqwest::Client, mut base_url: Url) -> Self {
        // Url::join replaces the last segment unless the base ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self { http, base_url }
    }

    /// The account API base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Request helpers ──────────────────────────────────────────────

    pub(crate) fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    /// POST a JSON body and capture the raw response.
    pub(crate) async fn post_json(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<RawResponse, Error> {
        let url = self.url(path)?;
        debug!("POST {}", url);

        let resp = self.http.post(url).json(body).send().await?;
        Self::capture(resp).await
    }

    /// GET with a bearer token and capture the raw response.
    pub(crate) async fn get_authorized(
        &self,
        path: &str,
        access_token: &SecretString,
    ) -> Result<RawResponse, Error> {
        let url = self.url(path)?;
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .bearer_auth(access_token.expose_secret())
            .send()
            .await?;
        Self::capture(resp).await
    }

    async fn capture(resp: reqwest::Response) -> Result<RawResponse, Error> {
        let status = resp.status();
        let retry_after_secs = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        let body = resp.text().await?;
        debug!(status = status.as_u16(), bytes = body.len(), "response received");
        Ok(RawResponse {
            status,
            retry_after_secs,
            body,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gains_trailing_slash() {
        let base = Url::parse("http://localhost:1234/api").unwrap();
        let client = CloudClient::with_client(reqwest::Client::new(), base);
        assert_eq!(client.base_url().as_str(), "http://localhost:1234/api/");
        assert_eq!(
            client.url("/tokens/refresh").unwrap().as_str(),
            "http://localhost:1234/api/tokens/refresh"
        );
    }

    #[test]
    fn preview_truncates_long_bodies() {
        let body = "x".repeat(500);
        let p = preview(&body);
        assert_eq!(p.len(), 203);
        assert!(p.ends_with("..."));
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn rate_limit_uses_retry_after() {
        let raw = RawResponse {
            status: reqwest::StatusCode::TOO_MANY_REQUESTS,
            retry_after_secs: Some(12),
            body: String::new(),
        };
        assert!(matches!(
            raw.unexpected(),
            Error::RateLimited {
                retry_after_secs: 12
            }
        ));
    }
}
