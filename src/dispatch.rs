use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::de::DeserializeOwned;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, instrument, warn};

use crate::domain::EndpointFailure;
use crate::error::ResolverError;
use crate::search::{EsgfHttp, ResponseBody, SearchParams, decode_page, timed};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each further attempt.
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Total time after which no further attempt is started.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            max_elapsed: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// One semaphore per host, created on first use.
#[derive(Debug)]
pub struct HostLimiter {
    per_host: usize,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl HostLimiter {
    pub fn new(per_host: usize) -> Self {
        Self {
            per_host: per_host.max(1),
            hosts: Mutex::new(HashMap::new()),
        }
    }

    pub fn for_url(&self, url: &str) -> Arc<Semaphore> {
        let host = host_of(url);
        let mut hosts = self
            .hosts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            hosts
                .entry(host)
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_host))),
        )
    }

    pub fn host_count(&self) -> usize {
        self.hosts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

pub fn host_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

/// Concurrency caps shared by every component of one run.
#[derive(Debug, Clone)]
pub struct Pools {
    pub query: Arc<Semaphore>,
    pub probe: Arc<Semaphore>,
    pub hosts: Arc<HostLimiter>,
}

impl Pools {
    pub fn new(query: usize, probe: usize, per_host: usize) -> Self {
        Self {
            query: Arc::new(Semaphore::new(query.max(1))),
            probe: Arc::new(Semaphore::new(probe.max(1))),
            hosts: Arc::new(HostLimiter::new(per_host)),
        }
    }

    /// Host permit first: a queue on one slow host must not hold pool permits.
    pub(crate) async fn acquire(
        &self,
        pool: &Arc<Semaphore>,
        url: &str,
    ) -> Result<(OwnedSemaphorePermit, OwnedSemaphorePermit), ResolverError> {
        let closed = |_| ResolverError::Http {
            url: url.to_string(),
            message: "connection pool closed".to_string(),
        };
        let host = self.hosts.for_url(url).acquire_owned().await.map_err(closed)?;
        let global = Arc::clone(pool).acquire_owned().await.map_err(closed)?;
        Ok((host, global))
    }
}

/// Records gathered from every endpoint that answered, plus the ones that did not.
#[derive(Debug)]
pub struct Federated<T> {
    pub records: Vec<T>,
    pub failures: Vec<EndpointFailure>,
}

pub struct Dispatcher<C> {
    http: Arc<C>,
    pools: Pools,
    retry: RetryPolicy,
    timeout: Duration,
}

impl<C: EsgfHttp> Dispatcher<C> {
    pub fn new(http: Arc<C>, pools: Pools, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            http,
            pools,
            retry,
            timeout,
        }
    }

    /// Runs one search against one endpoint, following pagination until `numFound`.
    /// The next offset counts the docs received; the `start` a node echoes back is not trusted.
    #[instrument(skip(self, params), fields(kind = ?params.record_type))]
    pub async fn query<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &SearchParams,
    ) -> Result<Vec<T>, ResolverError> {
        let mut records = Vec::new();
        let mut offset = 0u64;
        loop {
            let page = self
                .fetch_page::<T>(endpoint, &params.to_query(offset))
                .await
                .map_err(|err| ResolverError::EndpointQuery {
                    endpoint: endpoint.to_string(),
                    message: err.to_string(),
                })?;
            let returned = page.docs.len() as u64;
            if page.start != offset {
                debug!(offset, start = page.start, "node echoed a different start");
            }
            let next = offset + returned;
            records.extend(page.docs);
            debug!(offset, returned, num_found = page.num_found, "search page");
            if returned == 0 || next <= offset || next >= page.num_found {
                break;
            }
            offset = next;
        }
        Ok(records)
    }

    /// Every endpoint × request pair at once; failures are kept per endpoint.
    pub async fn query_all<T: DeserializeOwned>(
        &self,
        endpoints: &[String],
        requests: &[SearchParams],
    ) -> Federated<T> {
        let jobs = endpoints
            .iter()
            .flat_map(|endpoint| requests.iter().map(move |request| (endpoint, request)))
            .map(|(endpoint, request)| async move {
                (endpoint, self.query::<T>(endpoint, request).await)
            });

        let mut federated = Federated {
            records: Vec::new(),
            failures: Vec::new(),
        };
        for (endpoint, result) in join_all(jobs).await {
            match result {
                Ok(records) => federated.records.extend(records),
                Err(err) => {
                    warn!(endpoint = %endpoint, error = %err, "endpoint query failed");
                    federated.failures.push(EndpointFailure {
                        endpoint: endpoint.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }
        federated
    }

    async fn fetch_page<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(String, String)],
    ) -> Result<ResponseBody<T>, ResolverError> {
        let started = Instant::now();
        let mut attempt = 1u32;
        loop {
            match self.fetch_once(endpoint, query).await {
                Ok(page) => return Ok(page),
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    if started.elapsed() + delay > self.retry.max_elapsed {
                        return Err(err);
                    }
                    warn!(
                        endpoint,
                        attempt,
                        ?delay,
                        error = %err,
                        "retrying search page"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch_once<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(String, String)],
    ) -> Result<ResponseBody<T>, ResolverError> {
        let _permits = self.pools.acquire(&self.pools.query, endpoint).await?;
        let reply = timed(endpoint, self.timeout, self.http.get(endpoint, query)).await?;
        decode_page(endpoint, &reply)
    }
}
