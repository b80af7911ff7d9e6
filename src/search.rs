use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue, RANGE, USER_AGENT};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::domain::{Checksum, DatasetRecord, FileRecord, ProtocolUrl};
use crate::error::ResolverError;

pub const SOLR_JSON: &str = "application/solr+json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Implementations must not retry; retries and timeouts are applied by the caller.
#[async_trait]
pub trait EsgfHttp: Send + Sync {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpReply, ResolverError>;
    async fn head(&self, url: &str) -> Result<u16, ResolverError>;
    async fn range(&self, url: &str, start: u64, end: u64) -> Result<HttpReply, ResolverError>;
}

#[derive(Clone)]
pub struct ReqwestHttp {
    client: Client,
}

impl ReqwestHttp {
    pub fn new(connect_timeout: Duration) -> Result<Self, ResolverError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("esgf-resolver/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ResolverError::InvalidConfig(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|err| ResolverError::Http {
                url: String::new(),
                message: err.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EsgfHttp for ReqwestHttp {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpReply, ResolverError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|err| transport_error(url, err))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| transport_error(url, err))?;
        Ok(HttpReply {
            status,
            body: body.to_vec(),
        })
    }

    async fn head(&self, url: &str) -> Result<u16, ResolverError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|err| transport_error(url, err))?;
        Ok(response.status().as_u16())
    }

    async fn range(&self, url: &str, start: u64, end: u64) -> Result<HttpReply, ResolverError> {
        let response = self
            .client
            .get(url)
            .header(RANGE, format!("bytes={start}-{end}"))
            .send()
            .await
            .map_err(|err| transport_error(url, err))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| transport_error(url, err))?;
        Ok(HttpReply {
            status,
            body: body.to_vec(),
        })
    }
}

fn transport_error(url: &str, err: reqwest::Error) -> ResolverError {
    if err.is_timeout() {
        ResolverError::Timeout {
            url: url.to_string(),
        }
    } else {
        ResolverError::Http {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

pub async fn timed<T, F>(url: &str, limit: Duration, call: F) -> Result<T, ResolverError>
where
    F: Future<Output = Result<T, ResolverError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ResolverError::Timeout {
            url: url.to_string(),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Dataset,
    File,
}

impl RecordType {
    fn as_str(&self) -> &'static str {
        match self {
            RecordType::Dataset => "Dataset",
            RecordType::File => "File",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParams {
    pub record_type: RecordType,
    pub latest: bool,
    pub distrib: bool,
    pub replica: Option<bool>,
    pub exclude_retracted: bool,
    pub limit: u32,
    pub filters: Vec<(String, String)>,
}

impl SearchParams {
    pub fn datasets(filters: Vec<(String, String)>) -> Self {
        Self {
            record_type: RecordType::Dataset,
            latest: true,
            distrib: false,
            replica: None,
            exclude_retracted: true,
            limit: 500,
            filters,
        }
    }

    /// File search for a batch of `instance_id|data_node` dataset ids.
    pub fn files_for(dataset_ids: &[String]) -> Self {
        Self {
            record_type: RecordType::File,
            filters: dataset_ids
                .iter()
                .map(|id| ("dataset_id".to_string(), id.clone()))
                .collect(),
            ..Self::datasets(Vec::new())
        }
    }

    pub fn probe() -> Self {
        Self {
            limit: 0,
            ..Self::datasets(Vec::new())
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_replica(mut self, replica: Option<bool>) -> Self {
        self.replica = replica;
        self
    }

    pub fn with_distrib(mut self, distrib: bool) -> Self {
        self.distrib = distrib;
        self
    }

    pub fn with_latest(mut self, latest: bool) -> Self {
        self.latest = latest;
        self
    }

    pub fn with_retracted_filter(mut self, exclude_retracted: bool) -> Self {
        self.exclude_retracted = exclude_retracted;
        self
    }

    pub fn to_query(&self, offset: u64) -> Vec<(String, String)> {
        let mut query = vec![
            ("type".to_string(), self.record_type.as_str().to_string()),
            ("format".to_string(), SOLR_JSON.to_string()),
            ("latest".to_string(), self.latest.to_string()),
            ("distrib".to_string(), self.distrib.to_string()),
            ("limit".to_string(), self.limit.to_string()),
            ("offset".to_string(), offset.to_string()),
        ];
        if self.exclude_retracted {
            query.push(("retracted".to_string(), "false".to_string()));
        }
        if let Some(replica) = self.replica {
            query.push(("replica".to_string(), replica.to_string()));
        }
        query.extend(self.filters.iter().cloned());
        query
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse<T> {
    pub response: ResponseBody<T>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseBody<T> {
    #[serde(rename = "numFound")]
    pub num_found: u64,
    #[serde(default)]
    pub start: u64,
    pub docs: Vec<T>,
}

pub fn decode_page<T: DeserializeOwned>(
    url: &str,
    reply: &HttpReply,
) -> Result<ResponseBody<T>, ResolverError> {
    if !reply.is_success() {
        let message = String::from_utf8_lossy(&reply.body)
            .chars()
            .take(200)
            .collect::<String>();
        return Err(ResolverError::Status {
            url: url.to_string(),
            status: reply.status,
            message,
        });
    }
    let parsed: SearchResponse<T> =
        serde_json::from_slice(&reply.body).map_err(|err| ResolverError::Decode {
            url: url.to_string(),
            message: err.to_string(),
        })?;
    Ok(parsed.response)
}

/// Solr returns multi-valued fields as arrays, but not every index node agrees on which.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn first(&self) -> Option<&str> {
        match self {
            OneOrMany::One(value) => Some(value.as_str()),
            OneOrMany::Many(values) => values.first().map(String::as_str),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDatasetDoc {
    pub id: String,
    pub instance_id: String,
    pub data_node: String,
    #[serde(default)]
    pub number_of_files: Option<u64>,
}

impl From<RawDatasetDoc> for DatasetRecord {
    fn from(doc: RawDatasetDoc) -> Self {
        Self {
            record_id: doc.id,
            instance_id: doc.instance_id,
            data_node: doc.data_node,
            number_of_files: doc.number_of_files,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFileDoc {
    pub id: String,
    pub title: OneOrMany,
    pub data_node: String,
    pub size: u64,
    pub url: Vec<String>,
    #[serde(default)]
    pub checksum: Option<OneOrMany>,
    #[serde(default)]
    pub checksum_type: Option<OneOrMany>,
    #[serde(default)]
    pub table_id: Option<OneOrMany>,
    #[serde(default)]
    pub retracted: Option<bool>,
}

impl RawFileDoc {
    pub fn is_retracted(&self) -> bool {
        self.retracted.unwrap_or(false)
    }
}

impl TryFrom<RawFileDoc> for FileRecord {
    type Error = ResolverError;

    /// File ids come as `<instance_id>.<filename>|<data_node>` on some nodes and
    /// without the node suffix on others; `title` and `data_node` are trusted.
    fn try_from(doc: RawFileDoc) -> Result<Self, Self::Error> {
        let malformed = |reason: String| ResolverError::MalformedRecord {
            id: doc.id.clone(),
            reason,
        };
        let filename = doc
            .title
            .first()
            .map(str::to_string)
            .ok_or_else(|| malformed("missing title".to_string()))?;

        let dataset_part = match doc.id.split_once('|') {
            Some((head, node)) => {
                if node != doc.data_node {
                    return Err(malformed(format!(
                        "id names data node {node} but record says {}",
                        doc.data_node
                    )));
                }
                head
            }
            None => doc.id.as_str(),
        };
        let instance_id = dataset_part
            .strip_suffix(&filename)
            .and_then(|head| head.strip_suffix('.'))
            .unwrap_or(dataset_part)
            .to_string();

        let urls = doc
            .url
            .iter()
            .filter_map(|entry| entry.parse::<ProtocolUrl>().ok())
            .collect::<Vec<_>>();
        let checksum = match (&doc.checksum, &doc.checksum_type) {
            (Some(value), Some(kind)) => value.first().zip(kind.first()).map(|(value, kind)| Checksum {
                kind: kind.to_string(),
                value: value.to_string(),
            }),
            _ => None,
        };

        Ok(Self {
            record_id: doc.id.clone(),
            instance_id,
            filename,
            data_node: doc.data_node.clone(),
            size: doc.size,
            urls,
            checksum,
            table_id: doc
                .table_id
                .as_ref()
                .and_then(OneOrMany::first)
                .map(str::to_string),
        })
    }
}
