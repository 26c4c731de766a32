//! HTTP transport for `/v2/...` requests.
//!
//! Every non-2xx status and every connection failure is classified into a
//! [`RegistryError`] here, so callers only ever see a body or a typed failure.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{RegistryError, Result};

pub use reqwest::Method;

/// Response header carrying the registry-assigned manifest digest.
pub const CONTENT_DIGEST_HEADER: &str = "Docker-Content-Digest";

#[derive(Debug, Clone)]
pub struct RegistryRequest {
    pub method: Method,
    /// Path below the base URL, starting with `/v2/`.
    pub path: String,
    pub accept: Option<&'static str>,
    pub timeout: Duration,
}

impl RegistryRequest {
    pub fn new(method: Method, path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method,
            path: path.into(),
            accept: None,
            timeout,
        }
    }

    pub fn accept(mut self, accept: &'static str) -> Self {
        self.accept = Some(accept);
        self
    }
}

/// A successful (2xx) response.
#[derive(Debug, Clone, Default)]
pub struct RegistryResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_digest: Option<String>,
    pub body: Vec<u8>,
}

impl RegistryResponse {
    pub fn json<T: DeserializeOwned>(&self, target: &str) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|source| RegistryError::InvalidResponse {
            target: target.to_string(),
            source,
        })
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Base URL requests are resolved against, for diagnostics.
    fn base_url(&self) -> &str;

    /// Issue one request. Returns `Ok` only for 2xx responses.
    async fn send(&self, request: RegistryRequest) -> Result<RegistryResponse>;
}

/// reqwest-backed transport talking to a registry (or a relay in front of one).
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            client: Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(&self, request: RegistryRequest) -> Result<RegistryResponse> {
        let url = self.url(&request.path);
        debug!(method = %request.method, url = %url, "registry request");

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .timeout(request.timeout);
        if let Some(accept) = request.accept {
            builder = builder.header(ACCEPT, accept);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| unreachable_error(&url, &e))?;

        let status = resp.status();
        debug!(method = %request.method, url = %url, status = status.as_u16(), "registry response");

        let header = |name: &str| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };
        let content_type = header(CONTENT_TYPE.as_str());
        let content_digest = header(CONTENT_DIGEST_HEADER);

        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(RegistryError::from_status(
                &url,
                status.as_u16(),
                message.trim(),
            ));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| unreachable_error(&url, &e))?
            .to_vec();

        Ok(RegistryResponse {
            status: status.as_u16(),
            content_type,
            content_digest,
            body,
        })
    }
}

fn unreachable_error(url: &str, err: &reqwest::Error) -> RegistryError {
    RegistryError::Unreachable {
        target: url.to_string(),
        reason: if err.is_timeout() {
            "request timed out".to_string()
        } else {
            err.to_string()
        },
        timed_out: err.is_timeout(),
    }
}
