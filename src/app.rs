use std::fs;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::domain::ResourceUrl;
use crate::error::AgsError;
use crate::resolver::{ExportSettings, LeafReport, LeafStatus, Resolver};
use crate::service::FeatureService;

#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub source: String,
    pub output_dir: String,
    pub started_at: String,
    pub finished_at: String,
    pub leaves: Vec<LeafReport>,
}

impl ExportResult {
    pub fn count(&self, status: LeafStatus) -> usize {
        self.leaves
            .iter()
            .filter(|leaf| leaf.status == status)
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.count(LeafStatus::Failed) > 0
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Clone)]
pub struct App<S: FeatureService> {
    service: S,
    settings: ExportSettings,
}

impl<S: FeatureService> App<S> {
    pub fn new(service: S, settings: ExportSettings) -> Self {
        Self { service, settings }
    }

    pub fn export(
        &self,
        source: &ResourceUrl,
        sink: &dyn ProgressSink,
    ) -> Result<ExportResult, AgsError> {
        fs::create_dir_all(self.settings.output_dir.as_std_path()).map_err(|err| {
            AgsError::Filesystem(format!("create {}: {err}", self.settings.output_dir))
        })?;

        let started_at = iso_timestamp();
        let start = std::time::Instant::now();
        let leaves = Resolver::new(&self.service, &self.settings, sink).resolve(source);
        sink.event(ProgressEvent {
            message: format!("phase=Done; {} layers visited", leaves.len()),
            elapsed: Some(start.elapsed()),
        });

        let result = ExportResult {
            source: source.to_string(),
            output_dir: self.settings.output_dir.to_string(),
            started_at,
            finished_at: iso_timestamp(),
            leaves,
        };
        info!(
            exported = result.count(LeafStatus::Exported),
            skipped = result.count(LeafStatus::Skipped),
            failed = result.count(LeafStatus::Failed),
            "export finished"
        );
        Ok(result)
    }
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
