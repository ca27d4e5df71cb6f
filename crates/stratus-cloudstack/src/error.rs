//! CloudStack provider error types

use stratus_cloud::{CloudError, Retryable};
use thiserror::Error;

/// CloudStack error codes the control plane uses for conditions that
/// clear up on their own.
const RETRYABLE_CS_CODES: &[u32] = &[
    436, // resource allocation
    437, // resource in use (volume busy, NIC still attaching)
    530, // internal error
    533, // insufficient capacity
    534, // resource unavailable
];

#[derive(Error, Debug)]
pub enum CloudStackError {
    /// Error envelope returned by the control plane
    #[error("{command} failed ({code}): {text}")]
    Api {
        command: String,
        code: u32,
        cs_code: Option<u32>,
        text: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("async job {job_id} failed ({code}): {text}")]
    JobFailed {
        job_id: String,
        code: u32,
        text: String,
    },

    #[error("async job {job_id} did not finish within {seconds}s")]
    JobTimeout { job_id: String, seconds: u64 },

    /// The plane accepted a request but has not published its effects yet
    #[error("{0} is not ready yet")]
    NotReady(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("no disk offering of at least {size_gb} GB")]
    NoDiskOffering { size_gb: u64 },

    #[error("device index {0} has no /dev/xvd* name")]
    InvalidDevice(u32),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("unexpected response to {command}: {detail}")]
    UnexpectedResponse { command: String, detail: String },

    /// A deployment failed and compensation could not remove everything
    #[error("{cause} (rollback left behind: {})", .leaked.join(", "))]
    Rollback {
        cause: Box<CloudStackError>,
        leaked: Vec<String>,
    },

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Cloud error: {0}")]
    CloudError(#[from] CloudError),
}

impl CloudStackError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        CloudStackError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn unexpected(command: impl Into<String>, detail: impl Into<String>) -> Self {
        CloudStackError::UnexpectedResponse {
            command: command.into(),
            detail: detail.into(),
        }
    }

    /// True for "the thing is not there", which callers may treat as done
    /// during teardown.
    pub fn is_not_found(&self) -> bool {
        match self {
            CloudStackError::NotFound { .. } => true,
            CloudStackError::Api { cs_code, text, .. } => {
                // 4350 is the generic "invalid parameter value" code the
                // plane uses for ids that no longer resolve.
                *cs_code == Some(4350) && text.to_lowercase().contains("unable to find")
            }
            _ => false,
        }
    }
}

impl Retryable for CloudStackError {
    fn is_retryable(&self) -> bool {
        match self {
            CloudStackError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            CloudStackError::Api { code, .. } | CloudStackError::JobFailed { code, .. } => {
                RETRYABLE_CS_CODES.contains(code) || ((500..600).contains(code) && *code != 501)
            }
            CloudStackError::JobTimeout { .. } | CloudStackError::NotReady(_) => true,
            CloudStackError::Rollback { cause, .. } => cause.is_retryable(),
            _ => false,
        }
    }
}

impl From<CloudStackError> for CloudError {
    fn from(e: CloudStackError) -> Self {
        match e {
            CloudStackError::CloudError(inner) => inner,
            CloudStackError::NotFound { kind, name } => {
                CloudError::ResourceNotFound(format!("{} {}", kind, name))
            }
            CloudStackError::AlreadyExists { kind, name } => {
                CloudError::ResourceAlreadyExists(format!("{} {}", kind, name))
            }
            CloudStackError::Api { code: 401, text, .. } => CloudError::AuthenticationFailed(text),
            CloudStackError::InvalidConfig(msg) | CloudStackError::MissingEnvVar(msg) => {
                CloudError::InvalidConfig(msg)
            }
            CloudStackError::JobTimeout { job_id, seconds } => {
                CloudError::Timeout(format!("async job {} exceeded {}s", job_id, seconds))
            }
            other if other.is_retryable() => CloudError::Transient(other.to_string()),
            other => CloudError::ApiError(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CloudStackError>;
