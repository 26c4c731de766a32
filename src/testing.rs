//! In-memory registry used by unit tests in place of [`HttpTransport`].
//!
//! [`HttpTransport`]: crate::transport::HttpTransport

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{RegistryError, Result};
use crate::manifest::{MEDIA_TYPE_DOCKER_MANIFEST, MEDIA_TYPE_OCI_INDEX, MEDIA_TYPE_OCI_MANIFEST};
use crate::transport::{Method, RegistryRequest, RegistryResponse, Transport};

#[derive(Default)]
struct FakeRepo {
    tags: BTreeMap<String, String>,
    manifests: HashMap<String, (String, Vec<u8>)>,
}

#[derive(Default)]
struct State {
    repos: BTreeMap<String, FakeRepo>,
    blobs: HashMap<String, Vec<u8>>,
    delete_failures: HashMap<String, u16>,
    omit_digest: bool,
    unreachable: bool,
    timeout: bool,
    delete_timeout: bool,
    next_id: u64,
}

impl State {
    fn digest(&mut self) -> String {
        self.next_id += 1;
        format!("sha256:{:064x}", self.next_id)
    }
}

/// A recorded request: method, path, Accept header and timeout.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub path: String,
    pub accept: Option<&'static str>,
    pub timeout: Duration,
}

#[derive(Default)]
pub struct FakeRegistry {
    state: Mutex<State>,
    calls: Mutex<Vec<Call>>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_repo(&self, repo: &str) {
        self.state
            .lock()
            .unwrap()
            .repos
            .entry(repo.to_string())
            .or_default();
    }

    /// Store a config blob and a Docker v2 manifest, tag it, and return
    /// `(manifest_digest, config_digest)`.
    pub fn push_image(
        &self,
        repo: &str,
        tag: &str,
        arch: &str,
        os: &str,
        layer_sizes: &[u64],
    ) -> (String, String) {
        let (manifest_digest, config_digest) =
            self.push_untagged(repo, MEDIA_TYPE_DOCKER_MANIFEST, Some((arch, os)), layer_sizes);
        self.tag(repo, tag, &manifest_digest);
        (manifest_digest, config_digest)
    }

    /// Store an untagged single-platform manifest. `platform = None` leaves
    /// architecture and os out of the config blob.
    pub fn push_untagged(
        &self,
        repo: &str,
        media_type: &str,
        platform: Option<(&str, &str)>,
        layer_sizes: &[u64],
    ) -> (String, String) {
        let mut state = self.state.lock().unwrap();
        let mut config = json!({
            "created": "2024-05-01T10:00:00Z",
            "config": {"Env": ["PATH=/usr/bin"], "Cmd": ["/app"]},
            "history": [{"created": "2024-05-01T10:00:00Z", "created_by": "COPY app /app"}]
        });
        if let Some((arch, os)) = platform {
            config["architecture"] = json!(arch);
            config["os"] = json!(os);
        }
        let config_body = serde_json::to_vec(&config).unwrap();
        let config_digest = state.digest();
        let config_size = config_body.len() as u64;
        state.blobs.insert(config_digest.clone(), config_body);

        let mut layers = Vec::new();
        for size in layer_sizes {
            let digest = state.digest();
            layers.push(json!({
                "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                "size": size,
                "digest": digest
            }));
        }
        let manifest = json!({
            "schemaVersion": 2,
            "mediaType": media_type,
            "config": {
                "mediaType": "application/vnd.docker.container.image.v1+json",
                "size": config_size,
                "digest": config_digest
            },
            "layers": layers
        });
        let manifest_digest = state.digest();
        state.repos.entry(repo.to_string()).or_default().manifests.insert(
            manifest_digest.clone(),
            (media_type.to_string(), serde_json::to_vec(&manifest).unwrap()),
        );
        (manifest_digest, config_digest)
    }

    /// Push one untagged image per platform and tag an OCI index over them.
    /// Returns the index digest.
    pub fn push_index(&self, repo: &str, tag: &str, platforms: &[(&str, &str)]) -> String {
        let mut entries = Vec::new();
        for (arch, os) in platforms {
            let (digest, _) = self.push_untagged(
                repo,
                MEDIA_TYPE_OCI_MANIFEST,
                None,
                &[1000, 2000],
            );
            entries.push(json!({
                "mediaType": MEDIA_TYPE_OCI_MANIFEST,
                "digest": digest,
                "size": 700,
                "platform": {"architecture": arch, "os": os}
            }));
        }
        let index = json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_OCI_INDEX,
            "manifests": entries
        });
        self.put_raw_manifest(repo, tag, MEDIA_TYPE_OCI_INDEX, index)
    }

    /// Store an arbitrary manifest body under `tag`. Returns its digest.
    pub fn put_raw_manifest(&self, repo: &str, tag: &str, content_type: &str, body: Value) -> String {
        let digest = {
            let mut state = self.state.lock().unwrap();
            let digest = state.digest();
            state.repos.entry(repo.to_string()).or_default().manifests.insert(
                digest.clone(),
                (content_type.to_string(), serde_json::to_vec(&body).unwrap()),
            );
            digest
        };
        self.tag(repo, tag, &digest);
        digest
    }

    pub fn put_blob(&self, digest: &str, body: Value) {
        self.state
            .lock()
            .unwrap()
            .blobs
            .insert(digest.to_string(), serde_json::to_vec(&body).unwrap());
    }

    pub fn tag(&self, repo: &str, tag: &str, digest: &str) {
        self.state
            .lock()
            .unwrap()
            .repos
            .entry(repo.to_string())
            .or_default()
            .tags
            .insert(tag.to_string(), digest.to_string());
    }

    pub fn fail_delete(&self, digest: &str, status: u16) {
        self.state
            .lock()
            .unwrap()
            .delete_failures
            .insert(digest.to_string(), status);
    }

    pub fn omit_digest_header(&self) {
        self.state.lock().unwrap().omit_digest = true;
    }

    pub fn go_down(&self) {
        self.state.lock().unwrap().unreachable = true;
    }

    pub fn time_out(&self) {
        self.state.lock().unwrap().timeout = true;
    }

    /// Time out DELETE requests only; lookups keep working.
    pub fn time_out_deletes(&self) {
        self.state.lock().unwrap().delete_timeout = true;
    }

    pub fn tags(&self, repo: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .repos
            .get(repo)
            .map(|r| r.tags.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Requests rendered as "METHOD path".
    pub fn call_log(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| format!("{} {}", c.method, c.path))
            .collect()
    }

    fn ok_json(body: Value) -> RegistryResponse {
        RegistryResponse {
            status: 200,
            content_type: Some("application/json".to_string()),
            content_digest: None,
            body: serde_json::to_vec(&body).unwrap(),
        }
    }

    fn handle(&self, state: &mut State, request: &RegistryRequest) -> Result<RegistryResponse> {
        let path = request.path.as_str();
        let not_found = || RegistryError::from_status(path, 404, "");

        if path == "/v2/" {
            return Ok(Self::ok_json(json!({})));
        }
        if path == "/v2/_catalog" {
            let names: Vec<&String> = state.repos.keys().collect();
            return Ok(Self::ok_json(json!({ "repositories": names })));
        }
        let rest = path.strip_prefix("/v2/").ok_or_else(not_found)?;

        if let Some(name) = rest.strip_suffix("/tags/list") {
            let repo = state.repos.get(name).ok_or_else(not_found)?;
            let tags: Option<Vec<&String>> = if repo.tags.is_empty() {
                None
            } else {
                Some(repo.tags.keys().collect())
            };
            return Ok(Self::ok_json(json!({ "name": name, "tags": tags })));
        }

        if let Some(idx) = rest.rfind("/blobs/") {
            let digest = &rest[idx + "/blobs/".len()..];
            let body = state.blobs.get(digest).ok_or_else(not_found)?;
            return Ok(RegistryResponse {
                status: 200,
                content_type: Some("application/octet-stream".to_string()),
                content_digest: Some(digest.to_string()),
                body: body.clone(),
            });
        }

        let idx = rest.rfind("/manifests/").ok_or_else(not_found)?;
        let name = &rest[..idx];
        let reference = &rest[idx + "/manifests/".len()..];
        let omit_digest = state.omit_digest;

        if request.method == Method::DELETE {
            if !reference.starts_with("sha256:") {
                return Err(RegistryError::from_status(path, 405, "tag deletes unsupported"));
            }
            if let Some(status) = state.delete_failures.get(reference) {
                return Err(RegistryError::from_status(path, *status, "forced failure"));
            }
            let repo = state.repos.get_mut(name).ok_or_else(not_found)?;
            repo.manifests.remove(reference).ok_or_else(not_found)?;
            repo.tags.retain(|_, d| d != reference);
            return Ok(RegistryResponse {
                status: 202,
                ..Default::default()
            });
        }

        let repo = state.repos.get(name).ok_or_else(not_found)?;
        let digest = if reference.starts_with("sha256:") {
            reference.to_string()
        } else {
            repo.tags.get(reference).cloned().ok_or_else(not_found)?
        };
        let (content_type, body) = repo.manifests.get(&digest).ok_or_else(not_found)?;
        // Like Distribution, OCI content is only served to clients that accept it.
        let is_oci = content_type == MEDIA_TYPE_OCI_MANIFEST || content_type == MEDIA_TYPE_OCI_INDEX;
        if let Some(accept) = request.accept {
            if is_oci && !accept.contains(content_type.as_str()) {
                return Err(RegistryError::from_status(
                    path,
                    404,
                    "OCI manifest found, but accept header does not support OCI manifests",
                ));
            }
        }
        Ok(RegistryResponse {
            status: 200,
            content_type: Some(content_type.clone()),
            content_digest: if omit_digest { None } else { Some(digest) },
            body: if request.method == Method::HEAD {
                Vec::new()
            } else {
                body.clone()
            },
        })
    }
}

#[async_trait]
impl Transport for FakeRegistry {
    fn base_url(&self) -> &str {
        "http://fake-registry"
    }

    async fn send(&self, request: RegistryRequest) -> Result<RegistryResponse> {
        self.calls.lock().unwrap().push(Call {
            method: request.method.clone(),
            path: request.path.clone(),
            accept: request.accept,
            timeout: request.timeout,
        });
        let mut state = self.state.lock().unwrap();
        let timed_out =
            state.timeout || (state.delete_timeout && request.method == Method::DELETE);
        if state.unreachable || timed_out {
            return Err(RegistryError::Unreachable {
                target: format!("http://fake-registry{}", request.path),
                reason: if timed_out {
                    "request timed out".to_string()
                } else {
                    "connection refused".to_string()
                },
                timed_out,
            });
        }
        self.handle(&mut state, &request)
    }
}
