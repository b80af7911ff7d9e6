use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use esgf_resolver::app::{ProgressSink, ResolveReport, Resolver};
use esgf_resolver::config::{ConfigLoader, ResolvedConfig};
use esgf_resolver::domain::{Outcome, UnresolvedKind};
use esgf_resolver::error::ResolverError;
use esgf_resolver::output::{JsonOutput, OutputMode, TracingSink};
use esgf_resolver::search::ReqwestHttp;

#[derive(Parser)]
#[command(name = "esgf-resolver")]
#[command(about = "Resolve ESGF dataset identifiers into complete, reachable file URL lists")]
#[command(version, author)]
struct Cli {
    /// Print machine-readable JSON on stdout instead of a summary.
    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    /// Search endpoint to use instead of the configured list (repeatable).
    #[arg(long = "endpoint", global = true)]
    endpoints: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Resolve identifier patterns into download URLs and chunking hints")]
    Resolve(PatternArgs),
    #[command(about = "Expand bracket groups without contacting any endpoint")]
    Expand(PatternArgs),
    #[command(about = "Check which search endpoints respond")]
    Probe,
}

#[derive(Args)]
struct PatternArgs {
    /// Identifier patterns; the config's `iids` are used when none are given.
    patterns: Vec<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<ResolverError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ResolverError) -> u8 {
    match error {
        ResolverError::MalformedPattern { .. }
        | ResolverError::FacetCountMismatch { .. }
        | ResolverError::UnknownProject(_)
        | ResolverError::MissingIdentifiers
        | ResolverError::MissingConfig(_)
        | ResolverError::ConfigRead(_)
        | ResolverError::ConfigParse(_)
        | ResolverError::InvalidConfig(_) => 2,
        ResolverError::NoLiveEndpoints(_)
        | ResolverError::EndpointQuery { .. }
        | ResolverError::Http { .. }
        | ResolverError::Status { .. }
        | ResolverError::Timeout { .. }
        | ResolverError::RangeRequest { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Summary
    };

    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if !cli.endpoints.is_empty() {
        config.endpoints = cli.endpoints.clone();
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;

    match cli.command {
        Commands::Resolve(args) => {
            let patterns = patterns_or_config(args.patterns, &config)?;
            let resolver = build_resolver(config)?;
            let report = runtime.block_on(resolver.resolve(&patterns, sink(output_mode)))?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_report(&report).into_diagnostic()?,
                OutputMode::Summary => print_summary(&report),
            }
            Ok(())
        }
        Commands::Expand(args) => {
            let patterns = patterns_or_config(args.patterns, &config)?;
            let resolver = build_resolver(config)?;
            let result = resolver.expand(&patterns, sink(output_mode));
            match output_mode {
                OutputMode::Json => JsonOutput::print_expand(&result).into_diagnostic()?,
                OutputMode::Summary => {
                    for (pattern, expanded) in &result.patterns {
                        println!("{pattern}");
                        for identifier in expanded {
                            println!("  {identifier}");
                        }
                    }
                }
            }
            Ok(())
        }
        Commands::Probe => {
            let resolver = build_resolver(config)?;
            let result = runtime.block_on(resolver.probe(sink(output_mode)))?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_probe(&result).into_diagnostic()?,
                OutputMode::Summary => {
                    for endpoint in &result.live_endpoints {
                        println!("{endpoint}");
                    }
                }
            }
            Ok(())
        }
    }
}

fn patterns_or_config(
    patterns: Vec<String>,
    config: &ResolvedConfig,
) -> Result<Vec<String>, ResolverError> {
    if !patterns.is_empty() {
        return Ok(patterns);
    }
    if config.iids.is_empty() {
        return Err(ResolverError::MissingIdentifiers);
    }
    Ok(config.iids.clone())
}

fn build_resolver(config: ResolvedConfig) -> Result<Resolver<ReqwestHttp>, ResolverError> {
    let http = ReqwestHttp::new(config.connect_timeout)?;
    Ok(Resolver::new(Arc::new(http), Arc::new(config)))
}

fn sink(mode: OutputMode) -> &'static dyn ProgressSink {
    match mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Summary => &TracingSink,
    }
}

fn print_summary(report: &ResolveReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}ESGF resolver summary{reset}");
    println!(
        "{cyan}Live endpoints: {}{reset}",
        report.live_endpoints.len()
    );
    println!("{green}Resolved: {}{reset}", report.resolved_count());
    println!("{yellow}Unresolved: {}{reset}", report.unresolved_count());
    for failure in &report.endpoint_failures {
        println!("{red}! {}: {}{reset}", failure.endpoint, failure.message);
    }

    for (identifier, outcome) in &report.entries {
        match outcome {
            Outcome::Resolved(dataset) => {
                println!(
                    "{green}+ {identifier} @ {} ({} files, {:.1} MB){reset}",
                    dataset.data_node,
                    dataset.urls.len(),
                    dataset.total_bytes as f64 / 1e6
                );
                if let Some(chunk) = dataset.params.chunk_size {
                    println!("{green}   chunk: {chunk} time steps{reset}");
                }
                if let Some(factor) = dataset.params.subset_factor {
                    println!("{green}   subset: {factor}{reset}");
                }
                for warning in &dataset.warnings {
                    println!("{yellow}   warning: {warning}{reset}");
                }
            }
            Outcome::Unresolved { kind, reason } => {
                let color = match kind {
                    UnresolvedKind::Partial => yellow,
                    UnresolvedKind::Missing | UnresolvedKind::Failed => red,
                };
                println!("{color}- {identifier} [{kind:?}] {reason}{reset}");
            }
        }
    }
}
