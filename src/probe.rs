use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::dispatch::Pools;
use crate::error::ResolverError;
use crate::search::{EsgfHttp, SearchParams, timed};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlStatus {
    pub url: String,
    pub reachable: bool,
    pub detail: Option<String>,
}

pub fn is_reachable_status(status: u16) -> bool {
    (200..400).contains(&status)
}

/// Liveness checks for index nodes and file URLs, all under the probe pool.
pub struct Prober<C> {
    http: Arc<C>,
    pools: Pools,
    timeout: Duration,
}

impl<C: EsgfHttp + 'static> Prober<C> {
    pub fn new(http: Arc<C>, pools: Pools, timeout: Duration) -> Self {
        Self {
            http,
            pools,
            timeout,
        }
    }

    /// Endpoints that answer a `limit=0` search, in their configured order.
    #[instrument(skip_all, fields(endpoints = endpoints.len()))]
    pub async fn probe_endpoints(&self, endpoints: &[String]) -> Result<Vec<String>, ResolverError> {
        let query = SearchParams::probe().to_query(0);
        let checks = endpoints.iter().map(|endpoint| {
            let query = &query;
            async move {
                let result = self.endpoint_alive(endpoint, query).await;
                (endpoint, result)
            }
        });

        let mut live = Vec::new();
        for (endpoint, result) in join_all(checks).await {
            match result {
                Ok(()) => live.push(endpoint.clone()),
                Err(err) => warn!(endpoint = %endpoint, error = %err, "search endpoint is down"),
            }
        }
        if live.is_empty() {
            return Err(ResolverError::NoLiveEndpoints(endpoints.len()));
        }
        info!(live = live.len(), "search endpoints responding");
        Ok(live)
    }

    async fn endpoint_alive(
        &self,
        endpoint: &str,
        query: &[(String, String)],
    ) -> Result<(), ResolverError> {
        let _permits = self.pools.acquire(&self.pools.probe, endpoint).await?;
        let reply = timed(endpoint, self.timeout, self.http.get(endpoint, query)).await?;
        if reply.is_success() {
            Ok(())
        } else {
            Err(ResolverError::Status {
                url: endpoint.to_string(),
                status: reply.status,
                message: "probe rejected".to_string(),
            })
        }
    }

    /// HEAD every URL; a 2xx or 3xx answer within the timeout counts as reachable.
    pub async fn probe_urls(&self, urls: &[String]) -> Vec<UrlStatus> {
        let checks = urls.iter().map(|url| async move {
            match head_status(self.http.as_ref(), &self.pools, url, self.timeout).await {
                Ok(status) if is_reachable_status(status) => UrlStatus {
                    url: url.clone(),
                    reachable: true,
                    detail: None,
                },
                Ok(status) => UrlStatus {
                    url: url.clone(),
                    reachable: false,
                    detail: Some(format!("status {status}")),
                },
                Err(err) => UrlStatus {
                    url: url.clone(),
                    reachable: false,
                    detail: Some(err.to_string()),
                },
            }
        });
        join_all(checks).await
    }

    /// Races a HEAD probe per URL and returns the first reachable one.
    pub async fn first_responsive(&self, urls: &[String]) -> Option<String> {
        let mut tasks = JoinSet::new();
        for url in urls {
            let http = Arc::clone(&self.http);
            let pools = self.pools.clone();
            let timeout = self.timeout;
            let url = url.clone();
            tasks.spawn(async move {
                let status = head_status(http.as_ref(), &pools, &url, timeout).await;
                (url, status)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((url, Ok(status))) if is_reachable_status(status) => {
                    tasks.abort_all();
                    return Some(url);
                }
                Ok((url, outcome)) => debug!(url = %url, ?outcome, "probe lost"),
                Err(err) => debug!(error = %err, "probe task ended early"),
            }
        }
        None
    }

    /// Reads the first three bytes of `url`; classic netCDF files start with `CDF`.
    pub async fn is_netcdf3(&self, url: &str) -> Result<bool, ResolverError> {
        let _permits = self.pools.acquire(&self.pools.probe, url).await?;
        let reply = timed(url, self.timeout, self.http.range(url, 0, 2)).await?;
        if reply.status != 206 {
            return Err(ResolverError::RangeRequest {
                url: url.to_string(),
                status: reply.status,
            });
        }
        Ok(reply.body.starts_with(b"CDF"))
    }
}

async fn head_status<C: EsgfHttp + ?Sized>(
    http: &C,
    pools: &Pools,
    url: &str,
    timeout: Duration,
) -> Result<u16, ResolverError> {
    let _permits = pools.acquire(&pools.probe, url).await?;
    timed(url, timeout, http.head(url)).await
}
