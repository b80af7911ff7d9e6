use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info, warn};

use crate::chunking::parse_date_range;
use crate::domain::{FileRecord, SelectedFile, TransferProtocol};
use crate::probe::Prober;
use crate::search::EsgfHttp;

/// A data node that serves every expected file, each one answering a HEAD probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaChoice {
    pub data_node: String,
    /// Ordered by the end date embedded in the filename, then by filename.
    pub files: Vec<SelectedFile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Chosen(ReplicaChoice),
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionReport {
    pub selection: Selection,
    pub warnings: Vec<String>,
}

pub struct ReplicaSelector<'a, C> {
    prober: &'a Prober<C>,
    protocols: &'a [TransferProtocol],
    preferred_nodes: &'a [String],
}

impl<'a, C: EsgfHttp + 'static> ReplicaSelector<'a, C> {
    pub fn new(
        prober: &'a Prober<C>,
        protocols: &'a [TransferProtocol],
        preferred_nodes: &'a [String],
    ) -> Self {
        Self {
            prober,
            protocols,
            preferred_nodes,
        }
    }

    /// Chooses one data node for the reconciled file records of a single identifier.
    pub async fn select(&self, records: &[FileRecord]) -> SelectionReport {
        let mut warnings = Vec::new();
        let mut by_node: BTreeMap<String, BTreeMap<String, SelectedFile>> = BTreeMap::new();
        for record in records {
            let Some(url) = record.preferred_url(self.protocols) else {
                let message = format!(
                    "dropped {} at {}: no URL with a supported protocol",
                    record.filename, record.data_node
                );
                warn!(file = %record.filename, node = %record.data_node, "no usable URL");
                warnings.push(message);
                continue;
            };
            by_node
                .entry(record.data_node.clone())
                .or_default()
                .entry(record.filename.clone())
                .or_insert_with(|| SelectedFile {
                    filename: record.filename.clone(),
                    url: url.access_url(),
                    size: record.size,
                    checksum: record.checksum.clone(),
                    table_id: record.table_id.clone(),
                });
        }

        let expected = by_node
            .values()
            .flat_map(|files| files.keys().cloned())
            .collect::<BTreeSet<_>>();
        if expected.is_empty() {
            return SelectionReport {
                selection: Selection::Unavailable("no file with a usable URL".to_string()),
                warnings,
            };
        }

        let candidates = by_node
            .into_iter()
            .filter(|(node, files)| {
                let complete = expected.iter().all(|name| files.contains_key(name));
                if !complete {
                    debug!(node = %node, have = files.len(), expected = expected.len(), "incomplete replica");
                }
                complete
            })
            .collect::<BTreeMap<_, _>>();
        if candidates.is_empty() {
            return SelectionReport {
                selection: Selection::Unavailable(format!(
                    "no data node holds all {} files",
                    expected.len()
                )),
                warnings,
            };
        }

        let urls = candidates
            .values()
            .flat_map(|files| files.values().map(|file| file.url.clone()))
            .collect::<Vec<_>>();
        let reachable = self
            .prober
            .probe_urls(&urls)
            .await
            .into_iter()
            .map(|status| (status.url, status.reachable))
            .collect::<HashMap<_, _>>();

        let mut live = candidates
            .into_iter()
            .filter(|(node, files)| {
                let all_up = files
                    .values()
                    .all(|file| reachable.get(&file.url).copied().unwrap_or(false));
                if !all_up {
                    warnings.push(format!("{node} has unreachable files"));
                }
                all_up
            })
            .collect::<BTreeMap<_, _>>();

        let node = self
            .preferred_nodes
            .iter()
            .find(|node| live.contains_key(*node))
            .cloned()
            .or_else(|| live.keys().next().cloned());
        let Some((data_node, files)) = node.and_then(|node| live.remove_entry(&node)) else {
            return SelectionReport {
                selection: Selection::Unavailable(
                    "no complete data node answered the probes".to_string(),
                ),
                warnings,
            };
        };

        info!(node = %data_node, files = files.len(), "replica chosen");
        SelectionReport {
            selection: Selection::Chosen(ReplicaChoice {
                data_node,
                files: time_ordered(files.into_values().collect()),
            }),
            warnings,
        }
    }
}

/// Dated files first by end date, then undated files; ties by filename.
pub fn time_ordered(mut files: Vec<SelectedFile>) -> Vec<SelectedFile> {
    files.sort_by_cached_key(|file| {
        let end = parse_date_range(&file.filename).map(|range| range.end);
        (end.is_none(), end, file.filename.clone())
    });
    files
}
