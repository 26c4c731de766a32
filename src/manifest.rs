//! Registry V2 wire types: catalog, tag lists, manifests, indices and config blobs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MEDIA_TYPE_DOCKER_MANIFEST: &str =
    "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Layer media type assumed when a manifest omits one.
pub const MEDIA_TYPE_DEFAULT_LAYER: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Accept header for reads that may return either kind of manifest.
pub const ACCEPT_ANY_MANIFEST: &str = concat!(
    "application/vnd.docker.distribution.manifest.v2+json, ",
    "application/vnd.docker.distribution.manifest.list.v2+json, ",
    "application/vnd.oci.image.manifest.v1+json, ",
    "application/vnd.oci.image.index.v1+json"
);

/// Accept header restricted to single-platform manifests.
pub const ACCEPT_IMAGE_MANIFEST: &str = concat!(
    "application/vnd.docker.distribution.manifest.v2+json, ",
    "application/vnd.oci.image.manifest.v1+json"
);

/// Accept header restricted to manifest lists and image indices.
pub const ACCEPT_MANIFEST_LIST: &str = concat!(
    "application/vnd.docker.distribution.manifest.list.v2+json, ",
    "application/vnd.oci.image.index.v1+json"
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    /// Single-platform image manifest (Docker v2 or OCI).
    Image,
    /// Manifest list or OCI image index.
    Index,
}

impl ManifestKind {
    pub fn classify(media_type: &str) -> Option<Self> {
        // Content-Type headers may carry parameters, e.g. "; charset=utf-8".
        let media_type = media_type.split(';').next().unwrap_or("").trim();
        match media_type {
            MEDIA_TYPE_DOCKER_MANIFEST | MEDIA_TYPE_OCI_MANIFEST => Some(ManifestKind::Image),
            MEDIA_TYPE_DOCKER_MANIFEST_LIST | MEDIA_TYPE_OCI_INDEX => Some(ManifestKind::Index),
            _ => None,
        }
    }
}

/// GET /v2/_catalog response
#[derive(Debug, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub repositories: Vec<String>,
}

/// GET /v2/<repo>/tags/list response
#[derive(Debug, Deserialize)]
pub struct TagList {
    #[serde(default)]
    pub name: Option<String>,
    /// Registries return `null` once every tag has been deleted.
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// GET /v2/<repo>/manifests/<reference>
///
/// One shape covers both manifests and indices; which fields are populated
/// depends on `media_type`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub config: Option<Descriptor>,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    #[serde(default)]
    pub manifests: Vec<PlatformManifest>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Entry of a manifest list / image index.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformManifest {
    #[serde(default)]
    pub media_type: Option<String>,
    pub digest: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub platform: Option<Platform>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// GET /v2/<repo>/blobs/<config-digest>
#[derive(Debug, Deserialize)]
pub struct ConfigBlob {
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub config: Option<ImageConfig>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl ConfigBlob {
    /// `created` parsed as RFC 3339; unparsable values count as absent.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Runtime defaults carried in the config blob's `config` object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposed_ports: Option<HashMap<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub empty_layer: Option<bool>,
}
