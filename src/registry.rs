//! Registry V2 client: liveness probe, catalog and tag listing.
//!
//! Manifest resolution lives in `resolver.rs`, deletes in `delete.rs`; both
//! extend [`RegistryClient`] with further `impl` blocks.

use std::time::Duration;

use tracing::{debug, instrument};

use crate::config::{ClientConfig, DEFAULT_CONTENT_TIMEOUT, DEFAULT_PROBE_TIMEOUT};
use crate::error::{RegistryError, Result};
use crate::manifest::{Catalog, Manifest, TagList};
use crate::models::{Repository, Tag};
use crate::transport::{HttpTransport, Method, RegistryRequest, RegistryResponse, Transport};

pub struct RegistryClient<T = HttpTransport> {
    transport: T,
    content_timeout: Duration,
    probe_timeout: Duration,
}

impl RegistryClient<HttpTransport> {
    pub fn from_config(config: &ClientConfig) -> Self {
        RegistryClient::new(HttpTransport::new(&config.base_url))
            .with_timeouts(config.content_timeout, config.probe_timeout)
    }
}

impl<T: Transport> RegistryClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            content_timeout: DEFAULT_CONTENT_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, content: Duration, probe: Duration) -> Self {
        self.content_timeout = content;
        self.probe_timeout = probe;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    /// GET /v2/: any answer short of a connection failure or 5xx means the
    /// registry is reachable, including 401 from a registry that wants auth.
    #[instrument(skip(self))]
    pub async fn ping(&self) -> Result<()> {
        let request = RegistryRequest::new(Method::GET, "/v2/", self.probe_timeout);
        match self.transport.send(request).await {
            Ok(_) => Ok(()),
            Err(e @ RegistryError::Unreachable { .. })
            | Err(e @ RegistryError::UpstreamError { .. }) => Err(e),
            Err(e) => {
                debug!(error = %e, "registry answered probe with non-success status");
                Ok(())
            }
        }
    }

    /// GET /v2/_catalog. An empty registry yields an empty list, not an error.
    #[instrument(skip(self))]
    pub async fn list_repositories(&self) -> Result<Vec<Repository>> {
        let path = "/v2/_catalog";
        let resp = self.get(path, None).await?;
        let catalog: Catalog = resp.json(path)?;
        debug!(count = catalog.repositories.len(), "listed repositories");
        Ok(catalog.repositories.into_iter().map(Repository::new).collect())
    }

    /// GET /v2/<repo>/tags/list. A repository without tags yields an empty list.
    #[instrument(skip(self))]
    pub async fn list_tags(&self, repo: &str) -> Result<Vec<Tag>> {
        let path = format!("/v2/{}/tags/list", repo);
        let resp = self.get(&path, None).await?;
        let tag_list: TagList = resp.json(&path)?;
        let tags = tag_list.tags.unwrap_or_default();
        debug!(count = tags.len(), "listed tags");
        Ok(tags.into_iter().map(Tag::new).collect())
    }

    /// Whether deleting one tag would leave the repository empty.
    pub async fn is_last_tag(&self, repo: &str) -> Result<bool> {
        Ok(self.list_tags(repo).await?.len() <= 1)
    }

    pub(crate) async fn get(
        &self,
        path: &str,
        accept: Option<&'static str>,
    ) -> Result<RegistryResponse> {
        self.send(Method::GET, path, accept).await
    }

    pub(crate) async fn send(
        &self,
        method: Method,
        path: &str,
        accept: Option<&'static str>,
    ) -> Result<RegistryResponse> {
        let mut request = RegistryRequest::new(method, path, self.content_timeout);
        if let Some(accept) = accept {
            request = request.accept(accept);
        }
        self.transport.send(request).await
    }

    /// GET /v2/<repo>/manifests/<reference>, returning the parsed body and
    /// its media type. The body's `mediaType` wins; OCI manifests may omit it,
    /// in which case the response Content-Type is used.
    pub(crate) async fn fetch_manifest(
        &self,
        repo: &str,
        reference: &str,
        accept: &'static str,
    ) -> Result<(Manifest, String)> {
        let path = format!("/v2/{}/manifests/{}", repo, reference);
        let resp = self.get(&path, Some(accept)).await?;
        let manifest: Manifest = resp.json(&path)?;
        let media_type = manifest
            .media_type
            .clone()
            .or_else(|| resp.content_type.clone())
            .unwrap_or_default();
        Ok((manifest, media_type))
    }
}
