use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ExpandResult, ProbeResult, ProgressEvent, ProgressSink, ResolveReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Summary,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &ResolveReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_expand(result: &ExpandResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_probe(result: &ProbeResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress to the log on stderr, keeping stdout for the report.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!(?elapsed, "{}", event.message),
            None => tracing::info!("{}", event.message),
        }
    }
}
