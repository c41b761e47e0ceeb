use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{ExportResult, ProgressEvent, ProgressSink};
use crate::resolver::LeafStatus;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_export(result: &ExportResult) -> io::Result<()> {
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

pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

pub fn print_summary(result: &ExportResult) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}ags-export summary: {}{reset}", result.source);
    println!(
        "{green}exported: {}{reset}  {yellow}skipped: {}{reset}  {red}failed: {}{reset}",
        result.count(LeafStatus::Exported),
        result.count(LeafStatus::Skipped),
        result.count(LeafStatus::Failed)
    );

    for leaf in &result.leaves {
        let label = leaf.name.as_deref().unwrap_or(leaf.url.as_str());
        match leaf.status {
            LeafStatus::Exported => {
                println!(
                    "{green}  + {label}: {} features in {} chunks (EPSG:{}){reset}",
                    leaf.features.unwrap_or(0),
                    leaf.chunks.unwrap_or(0),
                    leaf.srid.map(|srid| srid.to_string()).unwrap_or_default()
                );
                if let Some(path) = &leaf.path {
                    println!("{green}    {path}{reset}");
                }
            }
            LeafStatus::Skipped => println!(
                "{yellow}  ~ {label}: {}{reset}",
                leaf.error.as_deref().unwrap_or("skipped")
            ),
            LeafStatus::Failed => println!(
                "{red}  ! {label}: {}{reset}",
                leaf.error.as_deref().unwrap_or("failed")
            ),
        }
    }
}
