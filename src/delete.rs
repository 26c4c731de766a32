//! Tag and repository deletion.
//!
//! The registry deletes manifests by digest only, so every tag delete first
//! asks the registry for the tag's current manifest digest and then deletes
//! that digest. Digests are never cached between calls. A tag sharing its
//! digest with other tags takes those tags with it.

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::error::{RegistryError, Result};
use crate::manifest::ACCEPT_ANY_MANIFEST;
use crate::models::DeleteResult;
use crate::registry::RegistryClient;
use crate::transport::{Method, Transport};

/// The request a tag delete failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStep {
    /// HEAD for the manifest digest; nothing has been deleted yet.
    ResolveDigest,
    /// DELETE of the manifest by digest.
    DeleteManifest,
}

#[derive(Error, Debug)]
#[error("{source}")]
pub struct TagDeleteError {
    pub step: DeleteStep,
    #[source]
    pub source: RegistryError,
}

impl TagDeleteError {
    fn at(step: DeleteStep) -> impl FnOnce(RegistryError) -> Self {
        move |source| Self { step, source }
    }

    pub fn reason(&self) -> String {
        failure_reason(self.step, &self.source)
    }
}

/// Per-tag accounting for a repository delete.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CascadeOutcome {
    pub succeeded: Vec<String>,
    /// `(tag, reason)` pairs, in the order the tags were attempted.
    pub failed: Vec<(String, String)>,
}

impl CascadeOutcome {
    pub fn record(&mut self, tag: &str, result: std::result::Result<String, TagDeleteError>) {
        match result {
            Ok(_) => self.succeeded.push(tag.to_string()),
            Err(e) => self.failed.push((tag.to_string(), e.reason())),
        }
    }

    pub fn into_result(self, repo: &str) -> DeleteResult {
        let total = self.succeeded.len() + self.failed.len();
        if total == 0 {
            return DeleteResult::failed(format!(
                "Repository {} appears empty or already deleted",
                repo
            ));
        }
        if self.failed.is_empty() {
            return DeleteResult::deleted(
                repo,
                format!(
                    "Deleted repository {} ({} {})",
                    repo,
                    total,
                    if total == 1 { "tag" } else { "tags" }
                ),
            );
        }
        let failures: Vec<String> = self
            .failed
            .iter()
            .map(|(tag, reason)| format!("{} ({})", tag, reason))
            .collect();
        DeleteResult::failed(format!(
            "Deleted {} of {} tags from {}; failed: {}",
            self.succeeded.len(),
            total,
            repo,
            failures.join(", ")
        ))
    }
}

/// Short reason for a tag delete that failed at `step`. Only a timed-out
/// DELETE leaves the outcome open.
pub fn failure_reason(step: DeleteStep, err: &RegistryError) -> String {
    match err {
        RegistryError::NotFound { .. } => "tag not found".to_string(),
        RegistryError::Unsupported { .. } => "delete not supported by this registry".to_string(),
        RegistryError::AuthFailed { .. } => "insufficient permissions".to_string(),
        RegistryError::DigestUnavailable { .. } => {
            "registry did not report a content digest".to_string()
        }
        RegistryError::Unreachable {
            timed_out: true, ..
        } => match step {
            DeleteStep::ResolveDigest => {
                "could not resolve digest (timed out); nothing deleted".to_string()
            }
            DeleteStep::DeleteManifest => "request timed out, outcome unknown".to_string(),
        },
        RegistryError::Unreachable { .. } => err.user_message(),
        other => match other.status() {
            Some(status) => format!("delete failed with HTTP {}", status),
            None => other.to_string(),
        },
    }
}

impl<T: Transport> RegistryClient<T> {
    /// HEAD /v2/<repo>/manifests/<tag>, returning the registry-assigned
    /// `Docker-Content-Digest`. This is the manifest digest, not the config
    /// digest reported in `ImageDetails`.
    #[instrument(skip(self))]
    pub async fn manifest_digest(&self, repo: &str, tag: &str) -> Result<String> {
        let path = format!("/v2/{}/manifests/{}", repo, tag);
        let resp = self
            .send(Method::HEAD, &path, Some(ACCEPT_ANY_MANIFEST))
            .await?;
        resp.content_digest
            .filter(|d| !d.is_empty())
            .ok_or_else(|| RegistryError::DigestUnavailable {
                reference: format!("{}:{}", repo, tag),
            })
    }

    /// DELETE /v2/<repo>/manifests/<digest>
    #[instrument(skip(self))]
    pub async fn delete_manifest(&self, repo: &str, digest: &str) -> Result<()> {
        let path = format!("/v2/{}/manifests/{}", repo, digest);
        self.send(Method::DELETE, &path, Some(ACCEPT_ANY_MANIFEST))
            .await?;
        Ok(())
    }

    /// Resolve `tag` to its manifest digest and delete that digest.
    /// Returns the deleted digest.
    pub async fn try_delete_tag(
        &self,
        repo: &str,
        tag: &str,
    ) -> std::result::Result<String, TagDeleteError> {
        let digest = self
            .manifest_digest(repo, tag)
            .await
            .map_err(TagDeleteError::at(DeleteStep::ResolveDigest))?;
        self.delete_manifest(repo, &digest)
            .await
            .map_err(TagDeleteError::at(DeleteStep::DeleteManifest))?;
        Ok(digest)
    }

    #[instrument(skip(self))]
    pub async fn delete_tag(&self, repo: &str, tag: &str) -> DeleteResult {
        let item = format!("{}:{}", repo, tag);
        match self.try_delete_tag(repo, tag).await {
            Ok(digest) => {
                info!(item = %item, digest = %digest, "deleted tag");
                DeleteResult::deleted(item.clone(), format!("Deleted {}", item))
            }
            Err(e) => {
                warn!(item = %item, error = %e, "tag delete failed");
                DeleteResult::failed(format!(
                    "Failed to delete {}: {}",
                    item,
                    e.reason()
                ))
            }
        }
    }

    /// Delete every tag of `repo`, one after another. A failed tag does not
    /// stop the remaining deletes, and tags already deleted stay deleted.
    #[instrument(skip(self))]
    pub async fn delete_repository(&self, repo: &str) -> DeleteResult {
        let tags = match self.list_tags(repo).await {
            Ok(tags) => tags,
            Err(RegistryError::NotFound { .. }) => Vec::new(),
            Err(e) => {
                warn!(repository = repo, error = %e, "could not list tags for delete");
                return DeleteResult::failed(format!(
                    "Failed to list tags for {}: {}",
                    repo,
                    e.user_message()
                ));
            }
        };

        let mut outcome = CascadeOutcome::default();
        for tag in &tags {
            let result = self.try_delete_tag(repo, &tag.name).await;
            if let Err(e) = &result {
                warn!(repository = repo, tag = %tag.name, error = %e, "tag delete failed");
            }
            outcome.record(&tag.name, result);
        }
        info!(
            repository = repo,
            deleted = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "repository delete finished"
        );
        outcome.into_result(repo)
    }
}
