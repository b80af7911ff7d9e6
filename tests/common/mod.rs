#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Value, json};

use esgf_resolver::config::{Config, ConfigLoader, ResolvedConfig, RetrySection};
use esgf_resolver::error::ResolverError;
use esgf_resolver::search::{EsgfHttp, HttpReply};

const BASE_PARAMS: &[&str] = &[
    "type", "format", "latest", "distrib", "retracted", "limit", "offset", "replica",
];

pub enum FakeEndpoint {
    Live { datasets: Vec<Value>, files: Vec<Value> },
    Down,
    Scripted(Mutex<VecDeque<HttpReply>>),
}

/// An in-memory stand-in for a set of index nodes and data nodes.
#[derive(Default)]
pub struct FakeFederation {
    pub endpoints: HashMap<String, FakeEndpoint>,
    pub reachable: HashSet<String>,
    pub netcdf3: HashSet<String>,
    pub gets: Mutex<Vec<(String, Vec<(String, String)>)>>,
    pub heads: Mutex<Vec<String>>,
}

impl FakeFederation {
    pub fn with_endpoint(mut self, url: &str, endpoint: FakeEndpoint) -> Self {
        self.endpoints.insert(url.to_string(), endpoint);
        self
    }

    pub fn reachable(mut self, urls: &[String]) -> Self {
        self.reachable.extend(urls.iter().cloned());
        self
    }

    pub fn get_count(&self, url: &str) -> usize {
        self.gets
            .lock()
            .unwrap()
            .iter()
            .filter(|(called, _)| called == url)
            .count()
    }
}

pub fn scripted(replies: Vec<HttpReply>) -> FakeEndpoint {
    FakeEndpoint::Scripted(Mutex::new(replies.into()))
}

pub fn json_reply(status: u16, body: Value) -> HttpReply {
    HttpReply {
        status,
        body: serde_json::to_vec(&body).unwrap(),
    }
}

fn param<'a>(query: &'a [(String, String)], name: &str) -> Option<&'a str> {
    query
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn field_matches(doc: &Value, key: &str, wanted: &[&str]) -> bool {
    match doc.get(key) {
        Some(Value::String(value)) => wanted.contains(&value.as_str()),
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(Value::as_str)
            .any(|value| wanted.contains(&value)),
        _ => false,
    }
}

fn doc_matches(doc: &Value, query: &[(String, String)]) -> bool {
    let mut filters: HashMap<&str, Vec<&str>> = HashMap::new();
    for (key, value) in query {
        if !BASE_PARAMS.contains(&key.as_str()) {
            filters.entry(key.as_str()).or_default().push(value.as_str());
        }
    }
    filters
        .iter()
        .all(|(key, wanted)| field_matches(doc, key, wanted))
}

#[async_trait]
impl EsgfHttp for FakeFederation {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpReply, ResolverError> {
        self.gets
            .lock()
            .unwrap()
            .push((url.to_string(), query.to_vec()));
        match self.endpoints.get(url) {
            None | Some(FakeEndpoint::Down) => Err(ResolverError::Http {
                url: url.to_string(),
                message: "connection refused".to_string(),
            }),
            Some(FakeEndpoint::Scripted(replies)) => {
                replies
                    .lock()
                    .unwrap()
                    .pop_front()
                    .ok_or_else(|| ResolverError::Http {
                        url: url.to_string(),
                        message: "script exhausted".to_string(),
                    })
            }
            Some(FakeEndpoint::Live { datasets, files }) => {
                let docs = match param(query, "type") {
                    Some("File") => files,
                    _ => datasets,
                };
                let matching = docs
                    .iter()
                    .filter(|doc| doc_matches(doc, query))
                    .collect::<Vec<_>>();
                let offset = param(query, "offset")
                    .and_then(|value| value.parse::<usize>().ok())
                    .unwrap_or(0);
                let limit = param(query, "limit")
                    .and_then(|value| value.parse::<usize>().ok())
                    .unwrap_or(10);
                let page = matching
                    .iter()
                    .skip(offset)
                    .take(limit)
                    .map(|doc| (*doc).clone())
                    .collect::<Vec<_>>();
                Ok(json_reply(
                    200,
                    json!({
                        "responseHeader": {"status": 0},
                        "response": {"numFound": matching.len(), "start": offset, "docs": page}
                    }),
                ))
            }
        }
    }

    async fn head(&self, url: &str) -> Result<u16, ResolverError> {
        self.heads.lock().unwrap().push(url.to_string());
        if self.reachable.contains(url) {
            Ok(200)
        } else {
            Ok(503)
        }
    }

    async fn range(&self, url: &str, _start: u64, _end: u64) -> Result<HttpReply, ResolverError> {
        if self.netcdf3.contains(url) {
            Ok(HttpReply {
                status: 206,
                body: b"CDF".to_vec(),
            })
        } else if self.reachable.contains(url) {
            Ok(HttpReply {
                status: 206,
                body: b"\x89HD".to_vec(),
            })
        } else {
            Ok(HttpReply {
                status: 416,
                body: Vec::new(),
            })
        }
    }
}

pub fn test_config(endpoints: &[&str]) -> ResolvedConfig {
    let config = Config {
        endpoints: Some(endpoints.iter().map(|url| url.to_string()).collect()),
        retry: RetrySection {
            max_attempts: Some(3),
            initial_delay_ms: Some(1),
            max_delay_ms: Some(5),
            max_elapsed_secs: Some(5),
        },
        ..Config::default()
    };
    ConfigLoader::resolve_config(config, None).unwrap()
}

pub const CMIP6_FACETS: &[&str] = &[
    "mip_era",
    "activity_id",
    "institution_id",
    "source_id",
    "experiment_id",
    "variant_label",
    "table_id",
    "variable_id",
    "grid_label",
    "version",
];

/// A dataset-level doc the way an index node returns it, facets as arrays.
pub fn dataset_doc(instance_id: &str, data_node: &str) -> Value {
    let mut doc = json!({
        "id": format!("{instance_id}|{data_node}"),
        "instance_id": instance_id,
        "data_node": data_node,
        "score": 1.0,
    });
    for (name, value) in CMIP6_FACETS.iter().zip(instance_id.split('.')) {
        let value = if *name == "version" {
            value.trim_start_matches('v')
        } else {
            value
        };
        doc[*name] = json!([value]);
    }
    doc
}

pub fn file_url(data_node: &str, filename: &str) -> String {
    format!("http://{data_node}/thredds/fileServer/cmip6/{filename}")
}

pub fn file_doc(instance_id: &str, data_node: &str, filename: &str, size: u64) -> Value {
    json!({
        "id": format!("{instance_id}.{filename}|{data_node}"),
        "title": filename,
        "data_node": data_node,
        "dataset_id": format!("{instance_id}|{data_node}"),
        "size": size,
        "url": [
            format!("{}|application/netcdf|HTTPServer", file_url(data_node, filename)),
            format!("gsiftp://{data_node}:2811//cmip6/{filename}|application/gridftp|GridFTP"),
        ],
        "checksum": ["0f1e2d"],
        "checksum_type": ["SHA256"],
        "table_id": [instance_id.split('.').nth(6).unwrap()],
        "retracted": false,
    })
}
