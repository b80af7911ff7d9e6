mod common;

use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;

use esgf_resolver::app::{ProgressEvent, ProgressSink, Resolver};
use esgf_resolver::domain::{Outcome, UnresolvedKind};
use esgf_resolver::error::ResolverError;

use common::{FakeEndpoint, FakeFederation, dataset_doc, file_doc, file_url, test_config};

const INDEX_A: &str = "https://index-a.test/esg-search/search";
const INDEX_B: &str = "https://index-b.test/esg-search/search";
const INDEX_DOWN: &str = "https://index-down.test/esg-search/search";

const TOS: &str = "CMIP6.CMIP.IPSL.IPSL-CM6A-LR.historical.r1i1p1f1.Omon.tos.gn.v20180803";
const ZOS: &str = "CMIP6.CMIP.IPSL.IPSL-CM6A-LR.historical.r1i1p1f1.Omon.zos.gn.v20180803";

const TOS_EARLY: &str = "tos_Omon_IPSL-CM6A-LR_historical_r1i1p1f1_gn_185001-194912.nc";
const TOS_LATE: &str = "tos_Omon_IPSL-CM6A-LR_historical_r1i1p1f1_gn_195001-201412.nc";
const ZOS_ALL: &str = "zos_Omon_IPSL-CM6A-LR_historical_r1i1p1f1_gn_185001-201412.nc";

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}

fn federation() -> FakeFederation {
    let datasets = vec![
        dataset_doc(TOS, "vesg.ipsl.upmc.fr"),
        dataset_doc(TOS, "esgf.ceda.ac.uk"),
        dataset_doc(ZOS, "esgf-data1.llnl.gov"),
    ];
    // The late file is listed first so the output order is not an accident of input order.
    let files = vec![
        file_doc(TOS, "vesg.ipsl.upmc.fr", TOS_LATE, 780_000_000),
        file_doc(TOS, "vesg.ipsl.upmc.fr", TOS_EARLY, 1_200_000_000),
        file_doc(TOS, "esgf.ceda.ac.uk", TOS_EARLY, 1_200_000_000),
        file_doc(ZOS, "esgf-data1.llnl.gov", ZOS_ALL, 900_000_000),
    ];

    let mut fake = FakeFederation::default()
        .with_endpoint(
            INDEX_A,
            FakeEndpoint::Live {
                datasets: datasets.clone(),
                files: files.clone(),
            },
        )
        .with_endpoint(INDEX_B, FakeEndpoint::Live { datasets, files })
        .with_endpoint(INDEX_DOWN, FakeEndpoint::Down)
        .reachable(&[
            file_url("vesg.ipsl.upmc.fr", TOS_EARLY),
            file_url("vesg.ipsl.upmc.fr", TOS_LATE),
            file_url("esgf.ceda.ac.uk", TOS_EARLY),
        ]);
    fake.netcdf3
        .insert(file_url("vesg.ipsl.upmc.fr", TOS_LATE));
    fake
}

#[tokio::test]
async fn resolves_complete_replica_and_reports_the_rest() {
    let fake = Arc::new(federation());
    let resolver = Resolver::new(
        Arc::clone(&fake),
        Arc::new(test_config(&[INDEX_A, INDEX_B, INDEX_DOWN])),
    );
    let sink = RecordingSink::default();
    let patterns = vec![
        "CMIP6.CMIP.IPSL.IPSL-CM6A-LR.historical.r1i1p1f1.Omon.[tos, zos].gn.*".to_string(),
        "CMIP6.CMIP.IPSL.IPSL-CM6A-LR.historical.r1i1p1f1.Omon.uo.gn.*".to_string(),
    ];

    let report = resolver.resolve(&patterns, &sink).await.unwrap();

    assert_eq!(report.live_endpoints, vec![INDEX_A.to_string(), INDEX_B.to_string()]);
    assert!(report.endpoint_failures.is_empty());
    assert_eq!(report.entries.len(), 3);

    let resolved = assert_matches!(&report.entries[TOS], Outcome::Resolved(dataset) => dataset);
    assert_eq!(resolved.data_node, "vesg.ipsl.upmc.fr");
    assert_eq!(
        resolved.urls,
        vec![
            file_url("vesg.ipsl.upmc.fr", TOS_EARLY),
            file_url("vesg.ipsl.upmc.fr", TOS_LATE),
        ]
    );
    assert_eq!(resolved.total_bytes, 1_980_000_000);
    assert_eq!(resolved.params.chunk_size, Some(120));
    assert_eq!(resolved.params.subset_factor, Some(3));
    assert!(resolved.params.netcdf3);

    assert_matches!(
        &report.entries[ZOS],
        Outcome::Unresolved { kind: UnresolvedKind::Partial, reason } if !reason.is_empty()
    );
    assert_matches!(
        &report.entries["CMIP6.CMIP.IPSL.IPSL-CM6A-LR.historical.r1i1p1f1.Omon.uo.gn.*"],
        Outcome::Unresolved { kind: UnresolvedKind::Missing, .. }
    );

    let messages = sink.messages.lock().unwrap();
    assert!(messages.iter().any(|message| message.starts_with("phase=Probe")));
    assert!(messages.iter().any(|message| message.starts_with("phase=Done")));
}

#[tokio::test]
async fn malformed_pattern_is_reported_not_fatal() {
    let fake = Arc::new(federation());
    let resolver = Resolver::new(fake, Arc::new(test_config(&[INDEX_A])));
    let patterns = vec![
        "CMIP6.CMIP.[IPSL.IPSL-CM6A-LR".to_string(),
        TOS.to_string(),
    ];

    let report = resolver
        .resolve(&patterns, &RecordingSink::default())
        .await
        .unwrap();

    assert_matches!(
        &report.entries["CMIP6.CMIP.[IPSL.IPSL-CM6A-LR"],
        Outcome::Unresolved { kind: UnresolvedKind::Failed, .. }
    );
    assert!(report.entries[TOS].is_resolved());
}

#[tokio::test]
async fn dead_federation_fails_the_batch() {
    let fake = Arc::new(FakeFederation::default().with_endpoint(INDEX_DOWN, FakeEndpoint::Down));
    let resolver = Resolver::new(
        fake,
        Arc::new(test_config(&[INDEX_DOWN, "https://unknown.test/esg-search/search"])),
    );

    let result = resolver
        .resolve(&[TOS.to_string()], &RecordingSink::default())
        .await;

    assert_matches!(result, Err(ResolverError::NoLiveEndpoints(2)));
}

#[tokio::test]
async fn conflicting_copies_fail_only_their_identifier() {
    let mut conflicting = file_doc(TOS, "vesg.ipsl.upmc.fr", TOS_EARLY, 1_200_000_000);
    conflicting["size"] = serde_json::json!(1_199_999_999u64);
    let fake = FakeFederation::default()
        .with_endpoint(
            INDEX_A,
            FakeEndpoint::Live {
                datasets: vec![dataset_doc(TOS, "vesg.ipsl.upmc.fr")],
                files: vec![file_doc(TOS, "vesg.ipsl.upmc.fr", TOS_EARLY, 1_200_000_000)],
            },
        )
        .with_endpoint(
            INDEX_B,
            FakeEndpoint::Live {
                datasets: vec![dataset_doc(TOS, "vesg.ipsl.upmc.fr")],
                files: vec![conflicting],
            },
        );
    let resolver = Resolver::new(Arc::new(fake), Arc::new(test_config(&[INDEX_A, INDEX_B])));

    let report = resolver
        .resolve(&[TOS.to_string()], &RecordingSink::default())
        .await
        .unwrap();

    assert_matches!(
        &report.entries[TOS],
        Outcome::Unresolved { kind: UnresolvedKind::Failed, reason } if reason.contains("differ")
    );
}

fn has_param(query: &[(String, String)], name: &str, value: &str) -> bool {
    query.iter().any(|(key, found)| key == name && found == value)
}

#[tokio::test]
async fn cordex_searches_leave_out_retracted_filter() {
    let fake = Arc::new(federation());
    let resolver = Resolver::new(Arc::clone(&fake), Arc::new(test_config(&[INDEX_A])));
    let cordex = "cordex-reklies.output.EUR-11.GERICS.MIROC-MIROC5.historical.r1i1p1.REMO2015.v1.mon.tas";

    let report = resolver
        .resolve(&[cordex.to_string(), TOS.to_string()], &RecordingSink::default())
        .await
        .unwrap();

    assert_matches!(
        &report.entries[cordex],
        Outcome::Unresolved { kind: UnresolvedKind::Missing, .. }
    );
    assert!(report.entries[TOS].is_resolved());

    let gets = fake.gets.lock().unwrap();
    let cordex_queries = gets
        .iter()
        .filter(|(_, query)| has_param(query, "project", "CORDEX-Reklies"))
        .collect::<Vec<_>>();
    assert_eq!(cordex_queries.len(), 1);
    assert!(cordex_queries
        .iter()
        .all(|(_, query)| query.iter().all(|(key, _)| key != "retracted")));
    assert!(gets
        .iter()
        .filter(|(_, query)| has_param(query, "variable_id", "tos"))
        .all(|(_, query)| has_param(query, "retracted", "false")));
}
