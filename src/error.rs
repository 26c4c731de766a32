use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Failures raised by the registry client, resolver and delete paths.
///
/// Transport-level variants carry the request target for diagnostics.
/// Nothing in this crate retries on any of them.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("cannot reach registry at {target}: {reason}")]
    Unreachable {
        target: String,
        reason: String,
        timed_out: bool,
    },

    #[error("authentication failed for {target} (HTTP {status})")]
    AuthFailed { target: String, status: u16 },

    #[error("not found: {target}")]
    NotFound { target: String },

    #[error("operation not supported by registry: {target}")]
    Unsupported { target: String },

    #[error("registry upstream error for {target} (HTTP {status})")]
    UpstreamError { target: String, status: u16 },

    #[error("unsupported manifest type: {0}")]
    UnsupportedManifestType(String),

    #[error("no config digest found in manifest {reference}")]
    MissingConfigDigest { reference: String },

    #[error("no manifests found in manifest list {reference}")]
    EmptyManifestList { reference: String },

    #[error("registry did not return a content digest for {reference}")]
    DigestUnavailable { reference: String },

    #[error("invalid response from {target}: {source}")]
    InvalidResponse {
        target: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("request to {target} failed (HTTP {status}): {message}")]
    Other {
        target: String,
        status: u16,
        message: String,
    },
}

const CONNECTION_HINT: &str =
    "check that REGISTRY_HOST and REGISTRY_PROTOCOL point at a running registry";

impl RegistryError {
    /// Classify a non-success HTTP status for `target`.
    pub fn from_status(target: &str, status: u16, message: impl Into<String>) -> Self {
        let target = target.to_string();
        match status {
            401 | 403 => RegistryError::AuthFailed { target, status },
            404 => RegistryError::NotFound { target },
            405 => RegistryError::Unsupported { target },
            500..=599 => RegistryError::UpstreamError { target, status },
            _ => RegistryError::Other {
                target,
                status,
                message: message.into(),
            },
        }
    }

    /// HTTP status behind this error, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            RegistryError::AuthFailed { status, .. }
            | RegistryError::UpstreamError { status, .. }
            | RegistryError::Other { status, .. } => Some(*status),
            RegistryError::NotFound { .. } => Some(404),
            RegistryError::Unsupported { .. } => Some(405),
            _ => None,
        }
    }

    pub fn is_connection_failure(&self) -> bool {
        matches!(self, RegistryError::Unreachable { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RegistryError::Unreachable { timed_out: true, .. })
    }

    /// Single descriptive line for display; connection failures carry a
    /// configuration hint.
    pub fn user_message(&self) -> String {
        if self.is_connection_failure() {
            format!("{self} ({CONNECTION_HINT})")
        } else {
            self.to_string()
        }
    }
}

/// Errors raised by the command-line front end before any request is made.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid registry URL '{0}': expected http:// or https://")]
    InvalidRegistryUrl(String),

    #[error("Unknown quick filter '{0}'. Use one of: large, recent, linux-amd64")]
    UnknownQuickFilter(String),

    #[error("Invalid date '{0}': expected YYYY-MM-DD or RFC 3339")]
    InvalidDate(String),

    #[error("Invalid name pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}
