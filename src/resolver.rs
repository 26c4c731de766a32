//! Manifest resolution: tag or digest -> single-platform [`ImageDetails`].
//!
//! A manifest list / image index is resolved by taking its first entry and
//! fetching that manifest by digest. There is no platform preference; the
//! first entry wins even if it is not the caller's platform.

use tracing::{debug, instrument, warn};

use crate::error::{RegistryError, Result};
use crate::manifest::{
    ConfigBlob, Manifest, ManifestKind, Platform, ACCEPT_ANY_MANIFEST, ACCEPT_IMAGE_MANIFEST,
    ACCEPT_MANIFEST_LIST, MEDIA_TYPE_DEFAULT_LAYER,
};
use crate::models::{ImageDetails, LayerInfo, PlatformDescriptor, Repository, Tag};
use crate::registry::RegistryClient;
use crate::transport::{Method, Transport};

const UNKNOWN: &str = "unknown";

type Extractor = for<'a> fn(&'a ConfigBlob, Option<&'a Platform>) -> Option<&'a str>;

fn config_architecture<'a>(config: &'a ConfigBlob, _: Option<&'a Platform>) -> Option<&'a str> {
    config.architecture.as_deref()
}

fn platform_architecture<'a>(_: &'a ConfigBlob, platform: Option<&'a Platform>) -> Option<&'a str> {
    platform.map(|p| p.architecture.as_str())
}

fn config_os<'a>(config: &'a ConfigBlob, _: Option<&'a Platform>) -> Option<&'a str> {
    config.os.as_deref()
}

fn platform_os<'a>(_: &'a ConfigBlob, platform: Option<&'a Platform>) -> Option<&'a str> {
    platform.map(|p| p.os.as_str())
}

/// Evaluated in order; the first non-empty value wins, else "unknown".
const ARCHITECTURE_SOURCES: &[(&str, Extractor)] = &[
    ("image config", config_architecture),
    ("manifest list platform", platform_architecture),
];

const OS_SOURCES: &[(&str, Extractor)] = &[
    ("image config", config_os),
    ("manifest list platform", platform_os),
];

fn first_non_empty(
    sources: &[(&str, Extractor)],
    config: &ConfigBlob,
    platform: Option<&Platform>,
) -> String {
    sources
        .iter()
        .find_map(|(_, extract)| extract(config, platform).filter(|v| !v.is_empty()))
        .unwrap_or(UNKNOWN)
        .to_string()
}

impl<T: Transport> RegistryClient<T> {
    /// Resolve `reference` (tag or digest) in `repo` to a concrete image.
    ///
    /// The first request accepts both manifests and lists, so a single-platform
    /// image costs one manifest fetch plus the config blob.
    #[instrument(skip(self))]
    pub async fn resolve(&self, repo: &str, reference: &str) -> Result<ImageDetails> {
        let (manifest, media_type) = self
            .fetch_manifest(repo, reference, ACCEPT_ANY_MANIFEST)
            .await?;

        match ManifestKind::classify(&media_type) {
            Some(ManifestKind::Index) => {
                let entry = manifest.manifests.into_iter().next().ok_or_else(|| {
                    RegistryError::EmptyManifestList {
                        reference: format!("{}:{}", repo, reference),
                    }
                })?;
                debug!(
                    digest = %entry.digest,
                    platform = ?entry.platform,
                    "using first manifest list entry"
                );

                let (concrete, concrete_type) = self
                    .fetch_manifest(repo, &entry.digest, ACCEPT_IMAGE_MANIFEST)
                    .await?;
                if ManifestKind::classify(&concrete_type) != Some(ManifestKind::Image) {
                    return Err(RegistryError::UnsupportedManifestType(concrete_type));
                }
                self.describe_image(
                    repo,
                    &entry.digest,
                    concrete,
                    concrete_type,
                    entry.platform.as_ref(),
                )
                .await
            }
            Some(ManifestKind::Image) => {
                self.describe_image(repo, reference, manifest, media_type, None)
                    .await
            }
            None => Err(RegistryError::UnsupportedManifestType(media_type)),
        }
    }

    /// Fetch the config blob of a single-platform manifest and flatten both
    /// into [`ImageDetails`].
    async fn describe_image(
        &self,
        repo: &str,
        reference: &str,
        manifest: Manifest,
        media_type: String,
        platform: Option<&Platform>,
    ) -> Result<ImageDetails> {
        let config_descriptor = manifest.config.as_ref();
        let config_digest = config_descriptor
            .and_then(|c| c.digest.clone())
            .filter(|d| !d.is_empty())
            .ok_or_else(|| RegistryError::MissingConfigDigest {
                reference: format!("{}:{}", repo, reference),
            })?;
        let config_size = config_descriptor.and_then(|c| c.size).unwrap_or(0);

        let path = format!("/v2/{}/blobs/{}", repo, config_digest);
        let resp = self.get(&path, None).await?;
        let config: ConfigBlob = resp.json(&path)?;

        let layers: Vec<LayerInfo> = manifest
            .layers
            .into_iter()
            .map(|layer| LayerInfo {
                digest: layer.digest.unwrap_or_default(),
                size: layer.size.unwrap_or(0),
                media_type: layer
                    .media_type
                    .unwrap_or_else(|| MEDIA_TYPE_DEFAULT_LAYER.to_string()),
            })
            .collect();
        let size = layers.iter().map(|l| l.size).sum::<u64>() + config_size;
        let architecture = first_non_empty(ARCHITECTURE_SOURCES, &config, platform);
        let os = first_non_empty(OS_SOURCES, &config, platform);
        let created = config.created_at();

        Ok(ImageDetails {
            digest: config_digest,
            media_type,
            size,
            created,
            architecture,
            os,
            layers,
            config: config.config.unwrap_or_default(),
        })
    }

    /// Entries of the manifest list behind `reference`; empty when it names
    /// a single-platform manifest.
    ///
    /// Registries may answer a list-only Accept header for a single OCI
    /// manifest with 404, so a 404 is checked against a HEAD that accepts
    /// any manifest before it is reported.
    #[instrument(skip(self))]
    pub async fn list_platforms(
        &self,
        repo: &str,
        reference: &str,
    ) -> Result<Vec<PlatformDescriptor>> {
        let fetched = self
            .fetch_manifest(repo, reference, ACCEPT_MANIFEST_LIST)
            .await;
        let (manifest, media_type) = match fetched {
            Ok(fetched) => fetched,
            Err(not_found @ RegistryError::NotFound { .. }) => {
                let path = format!("/v2/{}/manifests/{}", repo, reference);
                return match self.send(Method::HEAD, &path, Some(ACCEPT_ANY_MANIFEST)).await {
                    Ok(_) => {
                        debug!("reference is not a manifest list");
                        Ok(Vec::new())
                    }
                    Err(RegistryError::NotFound { .. }) => Err(not_found),
                    Err(e) => Err(e),
                };
            }
            Err(e) => return Err(e),
        };
        if ManifestKind::classify(&media_type) != Some(ManifestKind::Index) {
            return Ok(Vec::new());
        }
        Ok(manifest
            .manifests
            .into_iter()
            .map(|m| PlatformDescriptor {
                digest: m.digest,
                platform: m.platform,
                size: m.size,
            })
            .collect())
    }

    /// Resolve `tag` once and keep the result on it; later calls reuse it.
    pub async fn inspect_tag<'t>(&self, repo: &str, tag: &'t mut Tag) -> Result<&'t ImageDetails> {
        let details = match tag.details.take() {
            Some(details) => details,
            None => self.resolve(repo, &tag.name).await?,
        };
        tag.size = Some(details.size);
        tag.last_modified = tag.last_modified.or(details.created);
        Ok(&*tag.details.insert(details))
    }

    /// List tags and inspect each one in turn. Tags that fail to resolve are
    /// logged and returned without details.
    #[instrument(skip(self))]
    pub async fn list_tags_with_details(&self, repo: &str) -> Result<Vec<Tag>> {
        let mut tags = self.list_tags(repo).await?;
        for tag in tags.iter_mut() {
            let result = self.inspect_tag(repo, tag).await.map(|_| ());
            if let Err(e) = result {
                warn!(repository = repo, tag = %tag.name, error = %e, "could not resolve tag");
            }
        }
        Ok(tags)
    }

    /// Repository with tag count, total size and latest creation time filled in.
    pub async fn summarize_repository(&self, name: &str) -> Result<Repository> {
        let tags = self.list_tags_with_details(name).await?;
        let total_size = tags.iter().filter_map(|t| t.size).sum();
        let last_modified = tags.iter().filter_map(|t| t.timestamp()).max();
        Ok(Repository {
            name: name.to_string(),
            tag_count: Some(tags.len()),
            total_size: Some(total_size),
            last_modified,
            is_favorite: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::manifest::{
        MEDIA_TYPE_DOCKER_MANIFEST, MEDIA_TYPE_DOCKER_MANIFEST_LIST, MEDIA_TYPE_OCI_INDEX,
        MEDIA_TYPE_OCI_MANIFEST,
    };
    use crate::testing::FakeRegistry;

    #[tokio::test]
    async fn test_resolve_single_manifest() {
        let fake = FakeRegistry::new();
        let (_, config_digest) = fake.push_image("app", "1.0", "amd64", "linux", &[100, 250]);
        let client = RegistryClient::new(fake);

        let details = client.resolve("app", "1.0").await.unwrap();
        assert_eq!(details.digest, config_digest);
        assert_eq!(details.media_type, MEDIA_TYPE_DOCKER_MANIFEST);
        assert_eq!(details.architecture, "amd64");
        assert_eq!(details.os, "linux");
        assert_eq!(details.layers.len(), 2);
        assert!(details.size > 350);
        assert_eq!(details.config.cmd.as_deref(), Some(&["/app".to_string()][..]));
        assert!(details.created.is_some());

        let calls = client.transport().calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].path, "/v2/app/manifests/1.0");
        assert_eq!(calls[0].accept, Some(ACCEPT_ANY_MANIFEST));
        assert_eq!(calls[1].path, format!("/v2/app/blobs/{}", config_digest));
    }

    #[tokio::test]
    async fn test_size_is_layers_plus_config() {
        let fake = FakeRegistry::new();
        fake.put_blob("sha256:cfg", json!({"architecture": "amd64", "os": "linux"}));
        fake.put_raw_manifest(
            "app",
            "sized",
            MEDIA_TYPE_OCI_MANIFEST,
            json!({
                "schemaVersion": 2,
                "mediaType": MEDIA_TYPE_OCI_MANIFEST,
                "config": {"digest": "sha256:cfg", "size": 7},
                "layers": [{"digest": "sha256:l1", "size": 100}, {"digest": "sha256:l2"}]
            }),
        );
        let client = RegistryClient::new(fake);

        let details = client.resolve("app", "sized").await.unwrap();
        assert_eq!(details.size, 107);
        assert_eq!(details.digest, "sha256:cfg");
        assert_eq!(details.layers[1].size, 0);
        assert_eq!(details.layers[1].media_type, MEDIA_TYPE_DEFAULT_LAYER);
        assert!(details.created.is_none());
        assert_eq!(details.config, Default::default());
    }

    #[tokio::test]
    async fn test_resolve_index_uses_first_entry() {
        let fake = FakeRegistry::new();
        fake.push_index("multi", "latest", &[("arm64", "linux"), ("amd64", "linux")]);
        let client = RegistryClient::new(fake);

        let details = client.resolve("multi", "latest").await.unwrap();
        // Config blobs pushed by push_index carry no platform, so the index
        // entry's platform is used.
        assert_eq!(details.architecture, "arm64");
        assert_eq!(details.os, "linux");
        assert_eq!(details.media_type, MEDIA_TYPE_OCI_MANIFEST);
        assert_ne!(details.media_type, MEDIA_TYPE_OCI_INDEX);
        assert_eq!(
            details.layers.iter().map(|l| l.size).sum::<u64>(),
            3000
        );
        assert!(details.size > 3000);

        let calls = client.transport().calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].path, "/v2/multi/manifests/latest");
        assert!(calls[1].path.starts_with("/v2/multi/manifests/sha256:"));
        assert_eq!(calls[1].accept, Some(ACCEPT_IMAGE_MANIFEST));
        assert!(calls[2].path.starts_with("/v2/multi/blobs/sha256:"));
    }

    #[tokio::test]
    async fn test_config_platform_wins_over_index_entry() {
        let fake = FakeRegistry::new();
        let (digest, _) = fake.push_untagged(
            "app",
            MEDIA_TYPE_DOCKER_MANIFEST,
            Some(("s390x", "linux")),
            &[1],
        );
        fake.put_raw_manifest(
            "app",
            "multi",
            MEDIA_TYPE_DOCKER_MANIFEST_LIST,
            json!({
                "schemaVersion": 2,
                "mediaType": MEDIA_TYPE_DOCKER_MANIFEST_LIST,
                "manifests": [{"digest": digest, "size": 1,
                               "platform": {"architecture": "amd64", "os": "windows"}}]
            }),
        );
        let client = RegistryClient::new(fake);
        let details = client.resolve("app", "multi").await.unwrap();
        assert_eq!(details.architecture, "s390x");
        assert_eq!(details.os, "linux");
    }

    #[tokio::test]
    async fn test_unknown_when_no_source_has_platform() {
        let fake = FakeRegistry::new();
        let (digest, _) = fake.push_untagged("app", MEDIA_TYPE_OCI_MANIFEST, None, &[1]);
        fake.tag("app", "bare", &digest);
        let client = RegistryClient::new(fake);
        let details = client.resolve("app", "bare").await.unwrap();
        assert_eq!(details.architecture, "unknown");
        assert_eq!(details.os, "unknown");
    }

    #[tokio::test]
    async fn test_empty_index() {
        let fake = FakeRegistry::new();
        fake.put_raw_manifest(
            "app",
            "empty",
            MEDIA_TYPE_OCI_INDEX,
            json!({"schemaVersion": 2, "mediaType": MEDIA_TYPE_OCI_INDEX, "manifests": []}),
        );
        let client = RegistryClient::new(fake);
        let err = client.resolve("app", "empty").await.unwrap_err();
        assert!(matches!(err, RegistryError::EmptyManifestList { .. }));
    }

    #[tokio::test]
    async fn test_unsupported_media_type() {
        let fake = FakeRegistry::new();
        let legacy = "application/vnd.docker.distribution.manifest.v1+prettyjws";
        fake.put_raw_manifest(
            "app",
            "old",
            legacy,
            json!({"schemaVersion": 1, "mediaType": legacy}),
        );
        let client = RegistryClient::new(fake);
        match client.resolve("app", "old").await.unwrap_err() {
            RegistryError::UnsupportedManifestType(mt) => assert_eq!(mt, legacy),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_media_type_from_content_type() {
        let fake = FakeRegistry::new();
        fake.put_blob("sha256:cfg", json!({"architecture": "amd64", "os": "linux"}));
        // OCI manifests may leave mediaType out of the body.
        fake.put_raw_manifest(
            "app",
            "nomt",
            MEDIA_TYPE_OCI_MANIFEST,
            json!({"schemaVersion": 2, "config": {"digest": "sha256:cfg", "size": 1}, "layers": []}),
        );
        let client = RegistryClient::new(fake);
        let details = client.resolve("app", "nomt").await.unwrap();
        assert_eq!(details.media_type, MEDIA_TYPE_OCI_MANIFEST);
        assert_eq!(details.size, 1);
    }

    #[tokio::test]
    async fn test_missing_config_digest() {
        let fake = FakeRegistry::new();
        fake.put_raw_manifest(
            "app",
            "noconfig",
            MEDIA_TYPE_DOCKER_MANIFEST,
            json!({"schemaVersion": 2, "mediaType": MEDIA_TYPE_DOCKER_MANIFEST, "layers": []}),
        );
        let client = RegistryClient::new(fake);
        let err = client.resolve("app", "noconfig").await.unwrap_err();
        assert!(matches!(err, RegistryError::MissingConfigDigest { .. }));
        // No blob request was attempted.
        assert_eq!(client.transport().calls().len(), 1);
    }

    #[tokio::test]
    async fn test_list_platforms() {
        let fake = FakeRegistry::new();
        fake.push_index("multi", "latest", &[("amd64", "linux"), ("arm64", "linux")]);
        fake.push_image("multi", "single", "amd64", "linux", &[1]);
        let client = RegistryClient::new(fake);

        let platforms = client.list_platforms("multi", "latest").await.unwrap();
        assert_eq!(platforms.len(), 2);
        assert_eq!(
            platforms[1].platform.as_ref().map(|p| p.architecture.as_str()),
            Some("arm64")
        );
        assert_eq!(platforms[0].size, Some(700));

        let single = client.list_platforms("multi", "single").await.unwrap();
        assert!(single.is_empty());

        let calls = client.transport().calls();
        assert!(calls
            .iter()
            .all(|c| c.method == Method::GET && c.accept == Some(ACCEPT_MANIFEST_LIST)));
    }

    #[tokio::test]
    async fn test_list_platforms_of_single_oci_manifest() {
        let fake = FakeRegistry::new();
        let (digest, _) =
            fake.push_untagged("app", MEDIA_TYPE_OCI_MANIFEST, Some(("amd64", "linux")), &[1]);
        fake.tag("app", "single", &digest);
        let client = RegistryClient::new(fake);

        let platforms = client.list_platforms("app", "single").await.unwrap();
        assert!(platforms.is_empty());
        assert_eq!(
            client.transport().call_log(),
            vec![
                "GET /v2/app/manifests/single".to_string(),
                "HEAD /v2/app/manifests/single".to_string(),
            ]
        );
        assert_eq!(client.transport().calls()[1].accept, Some(ACCEPT_ANY_MANIFEST));

        let err = client.list_platforms("app", "missing").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_inspect_tag_is_memoized() {
        let fake = FakeRegistry::new();
        fake.push_image("app", "1.0", "amd64", "linux", &[10]);
        let client = RegistryClient::new(fake);

        let mut tag = Tag::new("1.0");
        let size = client.inspect_tag("app", &mut tag).await.unwrap().size;
        assert_eq!(tag.size, Some(size));
        client.inspect_tag("app", &mut tag).await.unwrap();
        assert_eq!(client.transport().calls().len(), 2);
    }

    #[tokio::test]
    async fn test_summarize_repository() {
        let fake = FakeRegistry::new();
        fake.push_image("app", "1.0", "amd64", "linux", &[100]);
        fake.push_image("app", "2.0", "amd64", "linux", &[200]);
        fake.put_raw_manifest(
            "app",
            "broken",
            MEDIA_TYPE_DOCKER_MANIFEST,
            json!({"schemaVersion": 2, "mediaType": MEDIA_TYPE_DOCKER_MANIFEST, "layers": []}),
        );
        let client = RegistryClient::new(fake);

        let tags = client.list_tags_with_details("app").await.unwrap();
        assert_eq!(tags.len(), 3);
        assert!(tags.iter().find(|t| t.name == "broken").unwrap().details.is_none());

        let repo = client.summarize_repository("app").await.unwrap();
        assert_eq!(repo.tag_count, Some(3));
        let expected: u64 = tags.iter().filter_map(|t| t.size).sum();
        assert_eq!(repo.total_size, Some(expected));
        assert!(expected > 300);
        assert!(repo.last_modified.is_some());
    }
}
