use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ResolverError {
    #[error("malformed identifier pattern {pattern}: {reason}")]
    MalformedPattern { pattern: String, reason: String },

    #[error("identifier {identifier} has {found} facets, template {template} expects {expected}")]
    FacetCountMismatch {
        identifier: String,
        template: String,
        expected: usize,
        found: usize,
    },

    #[error("unknown project in identifier: {0}")]
    UnknownProject(String),

    #[error("none of the {0} configured search endpoints responded")]
    #[diagnostic(help("check network access or pass --endpoint with a reachable index node"))]
    NoLiveEndpoints(usize),

    #[error("query against {endpoint} failed: {message}")]
    EndpointQuery { endpoint: String, message: String },

    #[error("search record {id} is malformed: {reason}")]
    MalformedRecord { id: String, reason: String },

    #[error("records with id {id} differ between search endpoints")]
    InconsistentRecord { id: String },

    #[error("per-file chunk sizes disagree: {sizes:?}")]
    InconsistentChunkSize { sizes: Vec<u64> },

    #[error("no chunk size candidate fits {max_bytes} bytes for element size {element_size}")]
    NoAdmissibleChunkSize { max_bytes: f64, element_size: f64 },

    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("{url} returned status {status}: {message}")]
    Status {
        url: String,
        status: u16,
        message: String,
    },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("malformed response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("range request failed with status {status} for {url}")]
    RangeRequest { url: String, status: u16 },

    #[error("no identifiers given and no iids listed in the config file")]
    MissingIdentifiers,

    #[error("config file not found: {0}")]
    MissingConfig(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ResolverError {
    /// Whether a failed request is worth sending again.
    pub fn is_transient(&self) -> bool {
        match self {
            ResolverError::Timeout { .. } | ResolverError::Http { .. } => true,
            ResolverError::Status { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}
