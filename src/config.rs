use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::chunking::{DEFAULT_CHUNK_BYTES, DEFAULT_SUBSET_BYTES, default_divisors};
use crate::dispatch::RetryPolicy;
use crate::domain::TransferProtocol;
use crate::error::ResolverError;

pub const CONFIG_FILE_NAME: &str = "esgf-resolver.json";

pub fn default_endpoints() -> Vec<String> {
    [
        "https://esgf.ceda.ac.uk/esg-search/search",
        "https://esgf-data.dkrz.de/esg-search/search",
        "https://esgf-node.ipsl.upmc.fr/esg-search/search",
        "https://esg-dn1.nsc.liu.se/esg-search/search",
        "https://esgf-node.llnl.gov/esg-search/search",
        "https://esgf.nci.org.au/esg-search/search",
        "https://esgf-node.ornl.gov/esg-search/search",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

pub fn default_preferred_data_nodes() -> Vec<String> {
    [
        "aims3.llnl.gov",
        "esgf-data1.llnl.gov",
        "esgf-data.ucar.edu",
        "vesg.ipsl.upmc.fr",
        "esgf.ceda.ac.uk",
        "esgf3.dkrz.de",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub iids: Vec<String>,
    #[serde(default)]
    pub endpoints: Option<Vec<String>>,
    #[serde(default)]
    pub preferred_data_nodes: Option<Vec<String>>,
    #[serde(default)]
    pub protocols: Option<Vec<TransferProtocol>>,
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub concurrency: ConcurrencySection,
    #[serde(default)]
    pub timeouts: TimeoutSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub chunking: ChunkingSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SearchSection {
    pub limit: Option<u32>,
    pub latest: Option<bool>,
    pub distrib: Option<bool>,
    /// Unset leaves the `replica` filter out, so both originals and replicas come back.
    pub replica: Option<bool>,
    pub dataset_id_batch: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ConcurrencySection {
    pub query: Option<usize>,
    pub probe: Option<usize>,
    pub per_host: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TimeoutSection {
    pub request_secs: Option<u64>,
    pub probe_secs: Option<u64>,
    pub connect_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RetrySection {
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub max_elapsed_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ChunkingSection {
    pub chunk_bytes: Option<f64>,
    pub subset_bytes: Option<u64>,
    pub include_last: Option<bool>,
    /// Chunk-size candidates keyed by table id; replaces the built-in table.
    pub divisors: Option<HashMap<String, Vec<u64>>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchSettings {
    pub limit: u32,
    pub latest: bool,
    pub distrib: bool,
    pub replica: Option<bool>,
    pub dataset_id_batch: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSettings {
    pub chunk_bytes: f64,
    pub subset_bytes: u64,
    pub include_last: bool,
    pub divisors: HashMap<String, Vec<u64>>,
}

impl ChunkSettings {
    pub fn divisors_for(&self, table_id: &str) -> Option<&[u64]> {
        self.divisors.get(table_id).map(Vec::as_slice)
    }
}

/// Settings for one run, every default filled in.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub source: Option<Utf8PathBuf>,
    pub iids: Vec<String>,
    pub endpoints: Vec<String>,
    pub preferred_data_nodes: Vec<String>,
    pub protocols: Vec<TransferProtocol>,
    pub search: SearchSettings,
    pub query_concurrency: usize,
    pub probe_concurrency: usize,
    pub per_host: usize,
    pub request_timeout: Duration,
    pub probe_timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
    pub chunking: ChunkSettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Looks for a config file at `path`, then `./esgf-resolver.json`, then the user
    /// config directory. Without any file the built-in defaults apply.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, ResolverError> {
        if let Some(path) = path {
            let path = Utf8PathBuf::from(path);
            if !path.exists() {
                return Err(ResolverError::MissingConfig(path.into_std_path_buf()));
            }
            return Self::load(&path);
        }

        let local = Utf8PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Self::load(&local);
        }
        if let Some(user) = user_config_path().filter(|path| path.exists()) {
            return Self::load(&user);
        }
        Self::resolve_config(Config::default(), None)
    }

    pub fn load(path: &Utf8Path) -> Result<ResolvedConfig, ResolverError> {
        let content = fs::read_to_string(path)
            .map_err(|_| ResolverError::ConfigRead(path.as_std_path().to_path_buf()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| ResolverError::ConfigParse(err.to_string()))?;
        tracing::debug!(path = %path, "loaded config");
        Self::resolve_config(config, Some(path.to_path_buf()))
    }

    pub fn resolve_config(
        config: Config,
        source: Option<Utf8PathBuf>,
    ) -> Result<ResolvedConfig, ResolverError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(ResolverError::InvalidConfig(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let endpoints = config.endpoints.unwrap_or_else(default_endpoints);
        if endpoints.is_empty() {
            return Err(ResolverError::InvalidConfig(
                "endpoint list is empty".to_string(),
            ));
        }
        let protocols = config
            .protocols
            .unwrap_or_else(|| vec![TransferProtocol::HttpServer]);
        if protocols.is_empty() {
            return Err(ResolverError::InvalidConfig(
                "protocol preference list is empty".to_string(),
            ));
        }

        let search = SearchSettings {
            limit: config.search.limit.unwrap_or(500),
            latest: config.search.latest.unwrap_or(true),
            distrib: config.search.distrib.unwrap_or(false),
            replica: config.search.replica,
            dataset_id_batch: config.search.dataset_id_batch.unwrap_or(50).max(1),
        };

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: config.retry.max_attempts.unwrap_or(defaults.max_attempts).max(1),
            initial_delay: config
                .retry
                .initial_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_delay),
            max_delay: config
                .retry
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            max_elapsed: config
                .retry
                .max_elapsed_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_elapsed),
        };

        let chunking = ChunkSettings {
            chunk_bytes: config.chunking.chunk_bytes.unwrap_or(DEFAULT_CHUNK_BYTES),
            subset_bytes: config.chunking.subset_bytes.unwrap_or(DEFAULT_SUBSET_BYTES),
            include_last: config.chunking.include_last.unwrap_or(false),
            divisors: config.chunking.divisors.unwrap_or_else(default_divisor_table),
        };

        Ok(ResolvedConfig {
            schema_version,
            source,
            iids: config.iids,
            endpoints,
            preferred_data_nodes: config
                .preferred_data_nodes
                .unwrap_or_else(default_preferred_data_nodes),
            protocols,
            search,
            query_concurrency: config.concurrency.query.unwrap_or(100),
            probe_concurrency: config.concurrency.probe.unwrap_or(50),
            per_host: config.concurrency.per_host.unwrap_or(50),
            request_timeout: Duration::from_secs(config.timeouts.request_secs.unwrap_or(30)),
            probe_timeout: Duration::from_secs(config.timeouts.probe_secs.unwrap_or(10)),
            connect_timeout: Duration::from_secs(config.timeouts.connect_secs.unwrap_or(10)),
            retry,
            chunking,
        })
    }
}

pub fn default_divisor_table() -> HashMap<String, Vec<u64>> {
    ["Amon", "Omon", "SImon"]
        .into_iter()
        .map(|table| (table.to_string(), default_divisors()))
        .collect()
}

fn user_config_path() -> Option<Utf8PathBuf> {
    let dirs = ProjectDirs::from("", "", "esgf-resolver")?;
    Utf8PathBuf::from_path_buf(dirs.config_dir().join("config.json")).ok()
}
