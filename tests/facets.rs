use std::str::FromStr;

use assert_matches::assert_matches;

use esgf_resolver::error::ResolverError;
use esgf_resolver::facets::{ConcreteIdentifier, FacetSet, FacetTemplate, expand, normalize_project};

#[test]
fn expand_cartesian_product_outer_group_first() {
    let expanded = expand("a.[b1,b2].c.[d1,d2]").unwrap();
    assert_eq!(expanded, vec!["a.b1.c.d1", "a.b1.c.d2", "a.b2.c.d1", "a.b2.c.d2"]);
}

#[test]
fn expand_three_groups() {
    let expanded = expand("CMIP6.[CMIP,ScenarioMIP].IPSL.IPSL-CM6A-LR.[historical,ssp585].r1i1p1f1.Omon.[tos,zos].gn.*")
        .unwrap();
    assert_eq!(expanded.len(), 8);
    assert_eq!(
        expanded[0],
        "CMIP6.CMIP.IPSL.IPSL-CM6A-LR.historical.r1i1p1f1.Omon.tos.gn.*"
    );
    assert_eq!(
        expanded[7],
        "CMIP6.ScenarioMIP.IPSL.IPSL-CM6A-LR.ssp585.r1i1p1f1.Omon.zos.gn.*"
    );
}

#[test]
fn identifier_round_trips() {
    let ids = [
        "CMIP6.CMIP.IPSL.IPSL-CM6A-LR.historical.r21i1p1f1.Omon.zmeso.gn.v20180803",
        "CORDEX.output.EUR-11.GERICS.MPI-M-MPI-ESM-LR.rcp85.r1i1p1.REMO2009.v1.mon.tas.v20160525",
    ];
    for id in ids {
        let facets = FacetSet::parse(id, false).unwrap();
        assert_eq!(facets.to_identifier(), id);
        let concrete = ConcreteIdentifier::from_str(id).unwrap();
        assert_eq!(concrete.as_str(), id);
        assert_eq!(concrete.facets(), &facets);
    }
}

#[test]
fn template_follows_project() {
    let cordex = FacetSet::parse(
        "cordex-reklies.output.EUR-11.GERICS.MIROC-MIROC5.historical.r1i1p1.REMO2015.v1.mon.tas.v20170329",
        true,
    )
    .unwrap();
    assert_eq!(cordex.template(), FacetTemplate::Cordex);
    assert_eq!(cordex.project(), "CORDEX-Reklies");
    assert_eq!(cordex.get("rcm_version"), Some("v1"));
    assert_eq!(cordex.get("version"), Some("20170329"));

    assert_matches!(
        FacetSet::parse("CMIP5.output1.IPSL.IPSL-CM5A-LR.historical.mon.ocean.Omon.r1i1p1.v20111119", false),
        Err(ResolverError::UnknownProject(_))
    );
    assert_matches!(
        FacetSet::parse("CMIP6.CMIP.IPSL.IPSL-CM6A-LR.historical", false),
        Err(ResolverError::FacetCountMismatch { expected: 10, found: 5, .. })
    );
}

#[test]
fn normalize_project_spellings() {
    assert_eq!(normalize_project("cmip6"), "CMIP6");
    assert_eq!(normalize_project("CORDEX-ESD"), "CORDEX-ESD");
    assert_eq!(normalize_project("cordex-adjust"), "CORDEX-Adjust");
    assert_eq!(normalize_project("obs4MIPs"), "obs4MIPs");
}

#[test]
fn wildcard_pattern_matches_concrete_identifier() {
    let pattern = FacetSet::parse("CMIP6.CMIP.*.*.historical.*.Omon.tos.gn.*", true).unwrap();
    let hit = FacetSet::parse(
        "CMIP6.CMIP.IPSL.IPSL-CM6A-LR.historical.r1i1p1f1.Omon.tos.gn.v20180803",
        false,
    )
    .unwrap();
    let other = FacetSet::parse(
        "CMIP6.CMIP.IPSL.IPSL-CM6A-LR.historical.r1i1p1f1.Omon.zos.gn.v20180803",
        false,
    )
    .unwrap();
    assert!(pattern.matches(&hit));
    assert!(!pattern.matches(&other));

    let pinned = FacetSet::parse(
        "CMIP6.CMIP.IPSL.IPSL-CM6A-LR.historical.r1i1p1f1.Omon.tos.gn.v20180803",
        true,
    )
    .unwrap();
    assert!(pinned.matches(&hit));
}

#[test]
fn concrete_identifier_rejects_wildcards() {
    assert_matches!(
        ConcreteIdentifier::from_str("CMIP6.CMIP.IPSL.IPSL-CM6A-LR.historical.r1i1p1f1.Omon.tos.gn.*"),
        Err(ResolverError::MalformedPattern { .. })
    );
}

#[test]
fn cordex_identifier_without_version() {
    let facets = FacetSet::parse(
        "cordex-reklies.output.EUR-11.GERICS.MIROC-MIROC5.historical.r1i1p1.REMO2015.v1.mon.tas",
        true,
    )
    .unwrap();
    assert_eq!(facets.get("variable"), Some("tas"));
    assert_eq!(facets.get("version"), Some("*"));
    assert!(facets.query_filters().iter().all(|(name, _)| name != "version"));

    let published = FacetSet::parse(
        "CORDEX-Reklies.output.EUR-11.GERICS.MIROC-MIROC5.historical.r1i1p1.REMO2015.v1.mon.tas.v20170329",
        false,
    )
    .unwrap();
    assert!(facets.matches(&published));

    assert_matches!(
        FacetSet::parse("CMIP6.CMIP.IPSL.IPSL-CM6A-LR.historical.r1i1p1f1.Omon.tos.gn", false),
        Err(ResolverError::FacetCountMismatch { expected: 10, found: 9, .. })
    );
}
