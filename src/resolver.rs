use std::fs;
use std::io::BufWriter;
use std::num::NonZeroUsize;
use std::sync::OnceLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::document::FeatureCollectionWriter;
use crate::domain::{GeometryKind, ResourceUrl, SpatialReferenceId};
use crate::enumerate::enumerate_ids;
use crate::error::AgsError;
use crate::plan::{ChunkPlan, plan_chunks};
use crate::runner::{ChunkFetcher, QueryOptions, RunSummary, run_chunks};
use crate::service::FeatureService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Leaf,
    Group,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildResource {
    pub id: i64,
    pub name: Option<String>,
    pub url: ResourceUrl,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDescriptor {
    pub url: ResourceUrl,
    pub id: Option<i64>,
    pub name: String,
    pub kind: ResourceKind,
    pub geometry_kind: GeometryKind,
    pub children: Vec<ChildResource>,
    pub query_capable: bool,
}

impl ResourceDescriptor {
    pub fn output_file_name(&self) -> String {
        static UNSAFE: OnceLock<Regex> = OnceLock::new();
        let re = UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_-]+").expect("valid regex"));
        let name = re.replace_all(self.name.trim(), "_");
        let name = name.trim_matches('_');
        let name = if name.is_empty() { "layer" } else { name };
        match self.id {
            Some(id) => format!("{id}_{name}.geojson"),
            None => format!("{name}.geojson"),
        }
    }
}

pub fn describe<S: FeatureService + ?Sized>(
    service: &S,
    url: &ResourceUrl,
) -> Result<ResourceDescriptor, AgsError> {
    let body = service.get_json(url.as_str(), &vec![("f", "json".to_string())])?;
    parse_descriptor(url, &body)
}

pub fn parse_descriptor(url: &ResourceUrl, body: &Value) -> Result<ResourceDescriptor, AgsError> {
    if !body.is_object() {
        return Err(AgsError::UnsupportedCapability(format!(
            "{url}: capability response is not an object"
        )));
    }
    let id = body.get("id").and_then(Value::as_i64);
    let name = body
        .get("name")
        .or_else(|| body.get("mapName"))
        .or_else(|| body.get("serviceDescription"))
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| url.as_str().rsplit('/').next().unwrap_or("layer").to_string());
    let geometry_kind = GeometryKind::from_esri(body.get("geometryType").and_then(Value::as_str));
    let query_capable = body
        .get("capabilities")
        .and_then(Value::as_str)
        .map(|caps| caps.split(',').any(|cap| cap.trim() == "Query"))
        .unwrap_or(false);

    // Service root: children live below this URL. The root lists every layer
    // flat; nested ones are reached through their group instead.
    if let Some(layers) = body.get("layers").and_then(Value::as_array) {
        let top_level = layers
            .iter()
            .filter(|entry| is_top_level(entry))
            .cloned()
            .collect::<Vec<_>>();
        let mut children = parse_children(url, Some(&Value::Array(top_level)))?;
        children.extend(parse_children(url, body.get("tables"))?);
        return Ok(ResourceDescriptor {
            url: url.clone(),
            id,
            name,
            kind: ResourceKind::Group,
            geometry_kind: GeometryKind::None,
            children,
            query_capable,
        });
    }

    // Group layer: sub-layers are siblings under the same service.
    let sub_layers = body
        .get("subLayers")
        .and_then(Value::as_array)
        .is_some_and(|layers| !layers.is_empty());
    let group_type = body.get("type").and_then(Value::as_str) == Some("Group Layer");
    if sub_layers || group_type {
        let base = url.parent().ok_or_else(|| {
            AgsError::UnsupportedCapability(format!("{url}: group layer without a parent service"))
        })?;
        return Ok(ResourceDescriptor {
            url: url.clone(),
            id,
            name,
            kind: ResourceKind::Group,
            geometry_kind: GeometryKind::None,
            children: parse_children(&base, body.get("subLayers"))?,
            query_capable,
        });
    }

    if body.get("capabilities").is_none() {
        return Err(AgsError::UnsupportedCapability(format!(
            "{url}: capability response has no capabilities"
        )));
    }

    Ok(ResourceDescriptor {
        url: url.clone(),
        id,
        name,
        kind: ResourceKind::Leaf,
        geometry_kind,
        children: Vec::new(),
        query_capable,
    })
}

fn is_top_level(entry: &Value) -> bool {
    match entry.get("parentLayerId") {
        None | Some(Value::Null) => true,
        Some(parent) => parent.as_i64() == Some(-1),
    }
}

fn parse_children(
    base: &ResourceUrl,
    value: Option<&Value>,
) -> Result<Vec<ChildResource>, AgsError> {
    let Some(entries) = value.and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    entries
        .iter()
        .map(|entry| {
            let id = entry.get("id").and_then(Value::as_i64).ok_or_else(|| {
                AgsError::UnsupportedCapability(format!("{base}: child entry without id: {entry}"))
            })?;
            Ok(ChildResource {
                id,
                name: entry.get("name").and_then(Value::as_str).map(str::to_string),
                url: base.join(id),
            })
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub output_dir: Utf8PathBuf,
    pub query: QueryOptions,
    pub chunk_size: NonZeroUsize,
    pub chunk_threshold: usize,
    pub force: bool,
    pub max_depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LeafStatus {
    Exported,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeafReport {
    pub url: String,
    pub id: Option<i64>,
    pub name: Option<String>,
    pub status: LeafStatus,
    pub path: Option<String>,
    pub chunks: Option<usize>,
    pub features: Option<usize>,
    pub srid: Option<SpatialReferenceId>,
    pub error: Option<String>,
}

impl LeafReport {
    fn problem(
        url: &ResourceUrl,
        id: Option<i64>,
        name: Option<String>,
        status: LeafStatus,
        err: &AgsError,
    ) -> Self {
        Self {
            url: url.to_string(),
            id,
            name,
            status,
            path: None,
            chunks: None,
            features: None,
            srid: None,
            error: Some(err.to_string()),
        }
    }
}

pub struct Resolver<'a, S: FeatureService + ?Sized> {
    service: &'a S,
    settings: &'a ExportSettings,
    sink: &'a dyn ProgressSink,
}

impl<'a, S: FeatureService + ?Sized> Resolver<'a, S> {
    pub fn new(service: &'a S, settings: &'a ExportSettings, sink: &'a dyn ProgressSink) -> Self {
        Self {
            service,
            settings,
            sink,
        }
    }

    pub fn resolve(&self, root: &ResourceUrl) -> Vec<LeafReport> {
        let mut reports = Vec::new();
        self.visit(root, None, 0, &mut reports);
        reports
    }

    fn visit(
        &self,
        url: &ResourceUrl,
        name_hint: Option<&str>,
        depth: usize,
        reports: &mut Vec<LeafReport>,
    ) {
        self.sink.event(ProgressEvent {
            message: format!("phase=Resolve; {url}"),
            elapsed: None,
        });
        if depth > self.settings.max_depth {
            let err = AgsError::UnsupportedCapability(format!(
                "{url}: resource tree deeper than {}",
                self.settings.max_depth
            ));
            warn!(%url, "{err}");
            reports.push(LeafReport::problem(
                url,
                None,
                name_hint.map(str::to_string),
                LeafStatus::Failed,
                &err,
            ));
            return;
        }

        let descriptor = match describe(self.service, url) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                warn!(%url, error = %err, "capability fetch failed");
                reports.push(LeafReport::problem(
                    url,
                    None,
                    name_hint.map(str::to_string),
                    LeafStatus::Failed,
                    &err,
                ));
                return;
            }
        };

        match descriptor.kind {
            ResourceKind::Group => {
                info!(%url, children = descriptor.children.len(), "group");
                for child in &descriptor.children {
                    self.visit(&child.url, child.name.as_deref(), depth + 1, reports);
                }
            }
            ResourceKind::Leaf => reports.push(self.export_leaf(&descriptor)),
        }
    }

    fn export_leaf(&self, descriptor: &ResourceDescriptor) -> LeafReport {
        let name = Some(descriptor.name.clone());
        match self.run_leaf(descriptor) {
            Ok((path, summary)) => LeafReport {
                url: descriptor.url.to_string(),
                id: descriptor.id,
                name,
                status: LeafStatus::Exported,
                path: Some(path.to_string()),
                chunks: Some(summary.chunks),
                features: Some(summary.features),
                srid: Some(summary.srid),
                error: None,
            },
            Err(err @ AgsError::ChunkCountExceeded { .. }) => {
                warn!(url = %descriptor.url, "{err}");
                LeafReport::problem(
                    &descriptor.url,
                    descriptor.id,
                    name,
                    LeafStatus::Skipped,
                    &err,
                )
            }
            Err(err) => {
                warn!(url = %descriptor.url, error = %err, "layer export failed");
                LeafReport::problem(
                    &descriptor.url,
                    descriptor.id,
                    name,
                    LeafStatus::Failed,
                    &err,
                )
            }
        }
    }

    fn run_leaf(
        &self,
        descriptor: &ResourceDescriptor,
    ) -> Result<(Utf8PathBuf, RunSummary), AgsError> {
        if !descriptor.query_capable {
            return Err(AgsError::UnsupportedCapability(format!(
                "{}: layer does not support Query",
                descriptor.url
            )));
        }
        info!(url = %descriptor.url, geometry = %descriptor.geometry_kind, "exporting layer");

        let ids = enumerate_ids(self.service, &descriptor.url)?;
        let ranges = match plan_chunks(
            ids.len(),
            self.settings.chunk_size,
            self.settings.chunk_threshold,
            self.settings.force,
        ) {
            ChunkPlan::Ranges(ranges) => ranges,
            ChunkPlan::Rejected { chunks, threshold } => {
                return Err(AgsError::ChunkCountExceeded { chunks, threshold });
            }
        };
        self.sink.event(ProgressEvent {
            message: format!(
                "phase=Plan; {} ids in {} chunks",
                ids.len(),
                ranges.len()
            ),
            elapsed: None,
        });

        let destination = self.settings.output_dir.join(descriptor.output_file_name());
        let partial = open_partial(&self.settings.output_dir)?;
        let mut writer = FeatureCollectionWriter::begin(BufWriter::new(partial))?;
        let fetcher = ChunkFetcher::new(
            self.service,
            &descriptor.url,
            descriptor.geometry_kind,
            &self.settings.query,
        );
        // On error the temp file is dropped, so no truncated document is left.
        let summary = run_chunks(
            &fetcher,
            &ids,
            &ranges,
            &mut writer,
            self.settings.query.out_sr,
            self.sink,
        )?;
        let partial = writer
            .finish(summary.srid)?
            .into_inner()
            .map_err(|err| AgsError::Filesystem(err.to_string()))?;
        partial
            .persist(destination.as_std_path())
            .map_err(|err| AgsError::Filesystem(format!("persist {destination}: {err}")))?;

        self.sink.event(ProgressEvent {
            message: format!("phase=Store; wrote {destination}"),
            elapsed: None,
        });
        Ok((destination, summary))
    }
}

fn open_partial(dir: &Utf8Path) -> Result<tempfile::NamedTempFile, AgsError> {
    fs::create_dir_all(dir.as_std_path()).map_err(|err| AgsError::Filesystem(err.to_string()))?;
    tempfile::Builder::new()
        .prefix(".ags-export")
        .suffix(".partial")
        .tempfile_in(dir.as_std_path())
        .map_err(|err| AgsError::Filesystem(err.to_string()))
}
