use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::facets::ConcreteIdentifier;

/// Transfer protocol advertised in the third field of an index `url` entry
/// (`<url>|<mime type>|<protocol>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferProtocol {
    #[serde(rename = "HTTPServer")]
    HttpServer,
    #[serde(rename = "OPENDAP")]
    Opendap,
    #[serde(rename = "Globus")]
    Globus,
    #[serde(rename = "GridFTP")]
    GridFtp,
    #[serde(untagged)]
    Other(String),
}

impl fmt::Display for TransferProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferProtocol::HttpServer => write!(f, "HTTPServer"),
            TransferProtocol::Opendap => write!(f, "OPENDAP"),
            TransferProtocol::Globus => write!(f, "Globus"),
            TransferProtocol::GridFtp => write!(f, "GridFTP"),
            TransferProtocol::Other(name) => write!(f, "{name}"),
        }
    }
}

impl From<&str> for TransferProtocol {
    fn from(value: &str) -> Self {
        match value.trim() {
            "HTTPServer" => TransferProtocol::HttpServer,
            "OPENDAP" => TransferProtocol::Opendap,
            "Globus" => TransferProtocol::Globus,
            "GridFTP" => TransferProtocol::GridFtp,
            other => TransferProtocol::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ProtocolUrl {
    pub url: String,
    pub mime_type: String,
    pub protocol: TransferProtocol,
}

impl ProtocolUrl {
    /// The URL a client should open; OPENDAP entries point at an `.html` form page.
    pub fn access_url(&self) -> String {
        match self.protocol {
            TransferProtocol::Opendap => self
                .url
                .strip_suffix(".html")
                .unwrap_or(&self.url)
                .to_string(),
            _ => self.url.clone(),
        }
    }
}

impl FromStr for ProtocolUrl {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut parts = value.split('|');
        let url = parts.next().unwrap_or_default().trim();
        let mime_type = parts.next().unwrap_or_default().trim();
        let protocol = parts
            .next()
            .ok_or_else(|| format!("url entry without protocol: {value}"))?;
        if url.is_empty() {
            return Err(format!("url entry without address: {value}"));
        }
        Ok(Self {
            url: url.to_string(),
            mime_type: mime_type.to_string(),
            protocol: protocol.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Checksum {
    pub kind: String,
    pub value: String,
}

/// One file as described by one index node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FileRecord {
    pub record_id: String,
    pub instance_id: String,
    pub filename: String,
    pub data_node: String,
    pub size: u64,
    pub urls: Vec<ProtocolUrl>,
    pub checksum: Option<Checksum>,
    pub table_id: Option<String>,
}

impl FileRecord {
    /// The first URL whose protocol appears in `preference`, honoring its order.
    pub fn preferred_url(&self, preference: &[TransferProtocol]) -> Option<&ProtocolUrl> {
        preference
            .iter()
            .find_map(|protocol| self.urls.iter().find(|url| &url.protocol == protocol))
    }
}

/// One dataset (one identifier at one data node) as described by one index node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DatasetRecord {
    pub record_id: String,
    pub instance_id: String,
    pub data_node: String,
    pub number_of_files: Option<u64>,
}

/// A file chosen for download, carrying only the URL that will be used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedFile {
    pub filename: String,
    pub url: String,
    pub size: u64,
    pub checksum: Option<Checksum>,
    pub table_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingParams {
    /// Time steps per output chunk.
    pub chunk_size: Option<u64>,
    /// Number of pieces each input file is split into along time.
    pub subset_factor: Option<u64>,
    pub netcdf3: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedDataset {
    pub identifier: ConcreteIdentifier,
    pub data_node: String,
    /// Download URLs in time order.
    pub urls: Vec<String>,
    pub total_bytes: u64,
    pub files: Vec<SelectedFile>,
    pub params: ProcessingParams,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// A search endpoint that failed one of the batch queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointFailure {
    pub endpoint: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnresolvedKind {
    /// Files were found but no single data node serves a complete, reachable set.
    Partial,
    /// The index knows nothing matching the identifier.
    Missing,
    /// Resolution stopped on an error specific to this identifier.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Resolved(ResolvedDataset),
    Unresolved { kind: UnresolvedKind, reason: String },
}

impl Outcome {
    pub fn unresolved(kind: UnresolvedKind, reason: impl Into<String>) -> Self {
        Outcome::Unresolved {
            kind,
            reason: reason.into(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Outcome::Resolved(_))
    }
}
