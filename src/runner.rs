use std::io::Write;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::app::{ProgressEvent, ProgressSink};
use crate::convert::{self, OutputFeature, RawFeature};
use crate::document::FeatureCollectionWriter;
use crate::domain::{
    FieldSelection, GeometryKind, RecordIdentifierSet, ResourceUrl, SpatialReferenceId,
};
use crate::error::AgsError;
use crate::plan::ChunkRange;
use crate::service::FeatureService;

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub out_fields: FieldSelection,
    pub return_geometry: bool,
    pub out_sr: SpatialReferenceId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeaturePage {
    pub spatial_reference: Option<SpatialReferenceId>,
    pub features: Vec<OutputFeature>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub chunks: usize,
    pub features: usize,
    pub srid: SpatialReferenceId,
}

pub struct ChunkFetcher<'a, S: FeatureService + ?Sized> {
    service: &'a S,
    layer: &'a ResourceUrl,
    geometry_kind: GeometryKind,
    options: &'a QueryOptions,
}

impl<'a, S: FeatureService + ?Sized> ChunkFetcher<'a, S> {
    pub fn new(
        service: &'a S,
        layer: &'a ResourceUrl,
        geometry_kind: GeometryKind,
        options: &'a QueryOptions,
    ) -> Self {
        Self {
            service,
            layer,
            geometry_kind,
            options,
        }
    }

    pub fn fetch(&self, field: &str, low: i64, high: i64) -> Result<FeaturePage, AgsError> {
        let params = vec![
            ("outFields", self.options.out_fields.as_param()),
            ("where", format!("{field} BETWEEN {low} AND {high}")),
            ("returnGeometry", self.options.return_geometry.to_string()),
            ("outSR", self.options.out_sr.to_string()),
            ("f", "json".to_string()),
        ];
        let invalid = |reason: String| AgsError::ChunkFetchFailed {
            start: low,
            end: high,
            reason,
        };

        let mut body = match self.service.get_json(&self.layer.query_endpoint(), &params) {
            Ok(body) => body,
            Err(AgsError::ServiceStatus { status, message }) => {
                return Err(invalid(format!(
                    "Invalid response: status {status}: {message}"
                )));
            }
            Err(err) => return Err(err),
        };

        let spatial_reference = parse_spatial_reference(&body);
        let Some(Value::Array(items)) = body.get_mut("features").map(Value::take) else {
            return Err(invalid("Invalid response: missing features".to_string()));
        };

        let features = items
            .into_iter()
            .map(|item| {
                let raw: RawFeature = serde_json::from_value(item)
                    .map_err(|err| invalid(format!("Invalid response: {err}")))?;
                Ok(if self.options.return_geometry {
                    convert::convert(raw, self.geometry_kind)
                } else {
                    convert::attributes_only(raw)
                })
            })
            .collect::<Result<Vec<_>, AgsError>>()?;

        Ok(FeaturePage {
            spatial_reference,
            features,
        })
    }
}

pub fn parse_spatial_reference(body: &Value) -> Option<SpatialReferenceId> {
    let reference = body.get("spatialReference")?;
    reference
        .get("latestWkid")
        .and_then(Value::as_u64)
        .or_else(|| reference.get("wkid").and_then(Value::as_u64))
        .and_then(|wkid| u32::try_from(wkid).ok())
        .map(SpatialReferenceId::new)
}

// Strictly sequential; the first failing chunk ends the run.
pub fn run_chunks<S, W>(
    fetcher: &ChunkFetcher<'_, S>,
    ids: &RecordIdentifierSet,
    ranges: &[ChunkRange],
    writer: &mut FeatureCollectionWriter<W>,
    default_srid: SpatialReferenceId,
    sink: &dyn ProgressSink,
) -> Result<RunSummary, AgsError>
where
    S: FeatureService + ?Sized,
    W: Write,
{
    let mut srid: Option<SpatialReferenceId> = None;
    let started = Instant::now();

    for (index, range) in ranges.iter().enumerate() {
        let Some((low, high)) = range.bounds(ids) else {
            continue;
        };
        sink.event(ProgressEvent {
            message: format!(
                "phase=Fetch; chunk {}/{} ({} {low}..={high})",
                index + 1,
                ranges.len(),
                ids.field_name()
            ),
            elapsed: Some(started.elapsed()),
        });

        let page = fetcher.fetch(ids.field_name(), low, high)?;
        if srid.is_none() {
            srid = page.spatial_reference;
        }
        debug!(low, high, features = page.features.len(), "chunk fetched");
        if page.features.is_empty() {
            continue;
        }
        writer.write_batch(&page.features)?;
    }

    let summary = RunSummary {
        chunks: ranges.len(),
        features: writer.features_written(),
        srid: srid.unwrap_or(default_srid),
    };
    info!(
        chunks = summary.chunks,
        features = summary.features,
        srid = %summary.srid,
        "chunks complete"
    );
    Ok(summary)
}
