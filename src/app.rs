use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::chunking::{Frequency, choose_chunksize, count_timesteps, parse_date_range, subset_factor};
use crate::config::{ChunkSettings, ResolvedConfig};
use crate::dispatch::{Dispatcher, Pools};
use crate::domain::{
    DatasetRecord, EndpointFailure, FileRecord, Outcome, ProcessingParams, ResolvedDataset,
    SelectedFile, UnresolvedKind,
};
use crate::error::ResolverError;
use crate::facets::{ConcreteIdentifier, FacetSet, expand};
use crate::probe::Prober;
use crate::reconcile::{group_by, merge};
use crate::replica::{ReplicaSelector, Selection, SelectionReport};
use crate::search::{EsgfHttp, RawDatasetDoc, RawFileDoc, SearchParams};

#[derive(Debug, Clone, Serialize)]
pub struct ResolveReport {
    pub generated_at: DateTime<Utc>,
    pub live_endpoints: Vec<String>,
    pub endpoint_failures: Vec<EndpointFailure>,
    /// Keyed by concrete identifier, or by the pattern text when nothing concrete was found.
    pub entries: BTreeMap<String, Outcome>,
}

impl ResolveReport {
    pub fn resolved_count(&self) -> usize {
        self.entries.values().filter(|entry| entry.is_resolved()).count()
    }

    pub fn unresolved_count(&self) -> usize {
        self.entries.len() - self.resolved_count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpandResult {
    pub patterns: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub live_endpoints: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

/// A pattern after bracket expansion, kept next to the text it came from.
#[derive(Debug, Clone)]
pub struct WantedPattern {
    pub text: String,
    pub facets: FacetSet,
}

/// Expands every pattern; patterns that cannot be parsed come back as failures.
pub fn expand_patterns(patterns: &[String]) -> (Vec<WantedPattern>, Vec<(String, ResolverError)>) {
    let mut seen = BTreeSet::new();
    let mut wanted = Vec::new();
    let mut failed = Vec::new();
    for pattern in patterns {
        let expanded = match expand(pattern) {
            Ok(expanded) => expanded,
            Err(err) => {
                failed.push((pattern.clone(), err));
                continue;
            }
        };
        for text in expanded {
            if !seen.insert(text.clone()) {
                continue;
            }
            match FacetSet::parse(&text, true) {
                Ok(facets) => wanted.push(WantedPattern { text, facets }),
                Err(err) => failed.push((text, err)),
            }
        }
    }
    (wanted, failed)
}

pub struct Resolver<C> {
    config: Arc<ResolvedConfig>,
    dispatcher: Dispatcher<C>,
    prober: Prober<C>,
}

impl<C: EsgfHttp + 'static> Resolver<C> {
    pub fn new(http: Arc<C>, config: Arc<ResolvedConfig>) -> Self {
        let pools = Pools::new(
            config.query_concurrency,
            config.probe_concurrency,
            config.per_host,
        );
        let dispatcher = Dispatcher::new(
            Arc::clone(&http),
            pools.clone(),
            config.retry.clone(),
            config.request_timeout,
        );
        let prober = Prober::new(http, pools, config.probe_timeout);
        Self {
            config,
            dispatcher,
            prober,
        }
    }

    pub fn expand(&self, patterns: &[String], sink: &dyn ProgressSink) -> ExpandResult {
        let started = Instant::now();
        let mut result = BTreeMap::new();
        for pattern in patterns {
            let entry = match expand(pattern) {
                Ok(expanded) => expanded,
                Err(err) => {
                    warn!(pattern = %pattern, error = %err, "pattern rejected");
                    Vec::new()
                }
            };
            result.insert(pattern.clone(), entry);
        }
        sink.event(phase("Expand", format!("patterns={}", patterns.len()), started));
        ExpandResult { patterns: result }
    }

    pub async fn probe(&self, sink: &dyn ProgressSink) -> Result<ProbeResult, ResolverError> {
        let started = Instant::now();
        let live_endpoints = self.prober.probe_endpoints(&self.config.endpoints).await?;
        sink.event(phase(
            "Probe",
            format!("live={}/{}", live_endpoints.len(), self.config.endpoints.len()),
            started,
        ));
        Ok(ProbeResult { live_endpoints })
    }

    /// Runs one batch. Only a dead federation fails the batch; every other problem is
    /// recorded against the identifier it belongs to.
    #[instrument(skip_all, fields(patterns = patterns.len()))]
    pub async fn resolve(
        &self,
        patterns: &[String],
        sink: &dyn ProgressSink,
    ) -> Result<ResolveReport, ResolverError> {
        let started = Instant::now();
        let mut entries = BTreeMap::new();
        let mut endpoint_failures = Vec::new();

        let (wanted, rejected) = expand_patterns(patterns);
        for (text, err) in rejected {
            warn!(pattern = %text, error = %err, "pattern rejected");
            entries.insert(text, Outcome::unresolved(UnresolvedKind::Failed, err.to_string()));
        }
        sink.event(phase(
            "Expand",
            format!("patterns={}; expanded={}", patterns.len(), wanted.len()),
            started,
        ));
        if wanted.is_empty() {
            return Ok(ResolveReport {
                generated_at: Utc::now(),
                live_endpoints: Vec::new(),
                endpoint_failures,
                entries,
            });
        }

        let live = self.prober.probe_endpoints(&self.config.endpoints).await?;
        sink.event(phase(
            "Probe",
            format!("live={}/{}", live.len(), self.config.endpoints.len()),
            started,
        ));

        let requests = wanted
            .iter()
            .map(|pattern| {
                self.search_params(SearchParams::datasets(pattern.facets.query_filters()))
                    .with_retracted_filter(pattern.facets.template().filters_retracted())
            })
            .collect::<Vec<_>>();
        let datasets = self
            .dispatcher
            .query_all::<RawDatasetDoc>(&live, &requests)
            .await;
        let dataset_failures = datasets.failures.len();
        endpoint_failures.extend(datasets.failures);
        let found = datasets
            .records
            .into_iter()
            .map(DatasetRecord::from)
            .collect::<Vec<_>>();
        sink.event(phase(
            "Datasets",
            format!("records={}; failed_queries={dataset_failures}", found.len()),
            started,
        ));

        let mut identifiers: BTreeMap<ConcreteIdentifier, Vec<DatasetRecord>> = BTreeMap::new();
        for (instance_id, records) in group_by(found, |record| record.instance_id.as_str()) {
            let identifier = match instance_id.parse::<ConcreteIdentifier>() {
                Ok(identifier) => identifier,
                Err(err) => {
                    debug!(instance_id = %instance_id, error = %err, "skipping unparsable hit");
                    continue;
                }
            };
            if wanted
                .iter()
                .any(|pattern| pattern.facets.matches(identifier.facets()))
            {
                identifiers.insert(identifier, records);
            }
        }
        for pattern in &wanted {
            let hit = identifiers
                .keys()
                .any(|identifier| pattern.facets.matches(identifier.facets()));
            if !hit {
                let reason = if dataset_failures > 0 {
                    format!("no dataset found ({dataset_failures} endpoint queries failed)")
                } else {
                    "no dataset found on any live endpoint".to_string()
                };
                entries.insert(
                    pattern.text.clone(),
                    Outcome::unresolved(UnresolvedKind::Missing, reason),
                );
            }
        }

        // Keyed by whether the project's records carry a `retracted` field.
        let mut dataset_ids: BTreeMap<bool, Vec<String>> = BTreeMap::new();
        let mut pending = Vec::new();
        for (identifier, records) in identifiers {
            match merge(records) {
                Ok(records) => {
                    dataset_ids
                        .entry(identifier.facets().template().filters_retracted())
                        .or_default()
                        .extend(records.into_iter().map(|record| record.record_id));
                    pending.push(identifier);
                }
                Err(err) => {
                    warn!(identifier = %identifier, error = %err, "dataset records conflict");
                    entries.insert(
                        identifier.to_string(),
                        Outcome::unresolved(UnresolvedKind::Failed, err.to_string()),
                    );
                }
            }
        }

        let requests = dataset_ids
            .iter()
            .flat_map(|(filters_retracted, ids)| {
                ids.chunks(self.config.search.dataset_id_batch).map(move |batch| {
                    self.search_params(SearchParams::files_for(batch))
                        .with_retracted_filter(*filters_retracted)
                })
            })
            .collect::<Vec<_>>();
        let files = self.dispatcher.query_all::<RawFileDoc>(&live, &requests).await;
        endpoint_failures.extend(files.failures);
        let records = files
            .records
            .into_iter()
            .filter(|doc| {
                if doc.is_retracted() {
                    warn!(id = %doc.id, "dropping retracted file");
                }
                !doc.is_retracted()
            })
            .filter_map(|doc| match FileRecord::try_from(doc) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(error = %err, "dropping file record");
                    None
                }
            })
            .collect::<Vec<_>>();
        sink.event(phase(
            "Files",
            format!("records={}; identifiers={}", records.len(), pending.len()),
            started,
        ));

        let mut by_identifier = group_by(records, |record| record.instance_id.as_str());
        let jobs = pending.into_iter().map(|identifier| {
            let records = by_identifier.remove(identifier.as_str()).unwrap_or_default();
            async move {
                let outcome = self.finish(&identifier, records).await;
                (identifier, outcome)
            }
        });
        for (identifier, outcome) in join_all(jobs).await {
            entries.insert(identifier.to_string(), outcome);
        }

        let report = ResolveReport {
            generated_at: Utc::now(),
            live_endpoints: live,
            endpoint_failures,
            entries,
        };
        info!(
            resolved = report.resolved_count(),
            unresolved = report.unresolved_count(),
            "batch finished"
        );
        sink.event(phase(
            "Done",
            format!(
                "resolved={}; unresolved={}",
                report.resolved_count(),
                report.unresolved_count()
            ),
            started,
        ));
        Ok(report)
    }

    async fn finish(&self, identifier: &ConcreteIdentifier, records: Vec<FileRecord>) -> Outcome {
        if records.is_empty() {
            return Outcome::unresolved(
                UnresolvedKind::Missing,
                "dataset found but no file records returned",
            );
        }
        let records = match merge(records) {
            Ok(records) => records,
            Err(err) => return Outcome::unresolved(UnresolvedKind::Failed, err.to_string()),
        };

        let selector = ReplicaSelector::new(
            &self.prober,
            &self.config.protocols,
            &self.config.preferred_data_nodes,
        );
        let SelectionReport {
            selection,
            mut warnings,
        } = selector.select(&records).await;
        let choice = match selection {
            Selection::Chosen(choice) => choice,
            Selection::Unavailable(reason) => {
                return Outcome::unresolved(UnresolvedKind::Partial, reason);
            }
        };

        let mut params = plan_processing(
            &choice.files,
            identifier.facets(),
            &self.config.chunking,
            &mut warnings,
        );
        if let Some(last) = choice.files.last() {
            let mirrors = records
                .iter()
                .filter(|record| record.filename == last.filename)
                .filter_map(|record| record.preferred_url(&self.config.protocols))
                .map(|url| url.access_url())
                .collect::<Vec<_>>();
            match self.prober.first_responsive(&mirrors).await {
                Some(url) => match self.prober.is_netcdf3(&url).await {
                    Ok(netcdf3) => params.netcdf3 = netcdf3,
                    Err(err) => warnings.push(format!("netCDF format check failed: {err}")),
                },
                None => warnings.push(format!("no mirror of {} answered", last.filename)),
            }
        }

        Outcome::Resolved(ResolvedDataset {
            identifier: identifier.clone(),
            data_node: choice.data_node,
            urls: choice.files.iter().map(|file| file.url.clone()).collect(),
            total_bytes: choice.files.iter().map(|file| file.size).sum(),
            files: choice.files,
            params,
            warnings,
        })
    }

    fn search_params(&self, params: SearchParams) -> SearchParams {
        let search = &self.config.search;
        params
            .with_limit(search.limit)
            .with_latest(search.latest)
            .with_distrib(search.distrib)
            .with_replica(search.replica)
    }
}

/// Chunk size and subset factor for the chosen files; problems become warnings.
pub fn plan_processing(
    files: &[SelectedFile],
    facets: &FacetSet,
    settings: &ChunkSettings,
    warnings: &mut Vec<String>,
) -> ProcessingParams {
    let sizes = files.iter().map(|file| file.size).collect::<Vec<_>>();
    let mut params = ProcessingParams {
        subset_factor: subset_factor(&sizes, settings.subset_bytes),
        ..ProcessingParams::default()
    };

    let table_id = files
        .iter()
        .find_map(|file| file.table_id.as_deref())
        .or_else(|| facets.get("table_id"))
        .or_else(|| facets.get("time_frequency"));
    let Some(table_id) = table_id else {
        warnings.push("no table id, chunk size not planned".to_string());
        return params;
    };
    let (Some(frequency), Some(candidates)) = (
        Frequency::from_table_id(table_id),
        settings.divisors_for(table_id),
    ) else {
        warnings.push(format!("no chunk candidates for table {table_id}"));
        return params;
    };

    let timesteps = files
        .iter()
        .map(|file| {
            parse_date_range(&file.filename).and_then(|range| count_timesteps(&range, frequency))
        })
        .collect::<Option<Vec<_>>>();
    let Some(timesteps) = timesteps else {
        warnings.push("could not infer time steps from filenames".to_string());
        return params;
    };
    let element_sizes = sizes
        .iter()
        .zip(&timesteps)
        .map(|(size, steps)| *size as f64 / *steps as f64)
        .collect::<Vec<_>>();

    match choose_chunksize(
        candidates,
        settings.chunk_bytes,
        &element_sizes,
        &timesteps,
        settings.include_last,
    ) {
        Ok(chunk_size) => params.chunk_size = Some(chunk_size),
        Err(err) => warnings.push(err.to_string()),
    }
    params
}

fn phase(name: &str, detail: String, started: Instant) -> ProgressEvent {
    ProgressEvent {
        message: format!("phase={name}; {detail}"),
        elapsed: Some(started.elapsed()),
    }
}
