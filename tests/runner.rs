use std::num::NonZeroUsize;
use std::sync::Mutex;

use assert_matches::assert_matches;
use serde_json::{Value, json};

use ags_export::document::FeatureCollectionWriter;
use ags_export::domain::{
    FieldSelection, GeometryKind, RecordIdentifierSet, ResourceUrl, SpatialReferenceId,
};
use ags_export::error::AgsError;
use ags_export::output::JsonOutput;
use ags_export::plan::{ChunkPlan, plan_chunks};
use ags_export::runner::{ChunkFetcher, QueryOptions, run_chunks};
use ags_export::service::{FeatureService, QueryParams};

struct ScriptedPages {
    pages: Mutex<Vec<Value>>,
    wheres: Mutex<Vec<String>>,
}

impl ScriptedPages {
    fn new(pages: Vec<Value>) -> Self {
        let mut pages = pages;
        pages.reverse();
        Self {
            pages: Mutex::new(pages),
            wheres: Mutex::new(Vec::new()),
        }
    }
}

impl FeatureService for ScriptedPages {
    fn get_json(&self, _url: &str, params: &QueryParams) -> Result<Value, AgsError> {
        if let Some((_, clause)) = params.iter().find(|(key, _)| *key == "where") {
            self.wheres.lock().unwrap().push(clause.clone());
        }
        self.pages
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| AgsError::Transport("script exhausted".to_string()))
    }
}

fn polyline(id: i64) -> Value {
    json!({
        "attributes": {"OBJECTID": id, "ROUTE": format!("R{id}")},
        "geometry": {"paths": [[[0.0, 0.0], [id as f64, 1.0]]]}
    })
}

fn options() -> QueryOptions {
    QueryOptions {
        out_fields: FieldSelection::All,
        return_geometry: true,
        out_sr: SpatialReferenceId::WGS84,
    }
}

fn ranges(ids: &RecordIdentifierSet, size: usize) -> Vec<ags_export::plan::ChunkRange> {
    match plan_chunks(ids.len(), NonZeroUsize::new(size).unwrap(), usize::MAX, false) {
        ChunkPlan::Ranges(ranges) => ranges,
        ChunkPlan::Rejected { .. } => unreachable!(),
    }
}

#[test]
fn streamed_output_matches_converted_pages() {
    let layer: ResourceUrl = "https://gis.example.com/rest/services/Roads/MapServer/1"
        .parse()
        .unwrap();
    let ids = RecordIdentifierSet::new("OBJECTID", (1..=6).collect());
    let service = ScriptedPages::new(vec![
        json!({"features": [polyline(1), polyline(2)]}),
        json!({"features": []}),
        json!({"features": [polyline(5)], "spatialReference": {"wkid": 26918}}),
    ]);
    let options = options();
    let fetcher = ChunkFetcher::new(&service, &layer, GeometryKind::Polyline, &options);

    let mut writer = FeatureCollectionWriter::begin(Vec::new()).unwrap();
    let summary = run_chunks(
        &fetcher,
        &ids,
        &ranges(&ids, 2),
        &mut writer,
        SpatialReferenceId::WGS84,
        &JsonOutput,
    )
    .unwrap();
    assert_eq!(summary.features, 3);
    assert_eq!(summary.srid, SpatialReferenceId::new(26918));

    let bytes = writer.finish(summary.srid).unwrap();
    let doc: Value = serde_json::from_slice(&bytes).unwrap();
    let features = doc["features"].as_array().unwrap();
    assert_eq!(features.len(), 3);
    assert_eq!(features[2]["properties"]["ROUTE"], json!("R5"));
    assert_eq!(
        features[0]["geometry"],
        json!({"type": "MultiLineString", "coordinates": [[[0.0, 0.0], [1.0, 1.0]]]})
    );
    assert_eq!(doc["crs"]["properties"]["name"], json!("EPSG:26918"));

    assert_eq!(
        *service.wheres.lock().unwrap(),
        vec![
            "OBJECTID BETWEEN 1 AND 2",
            "OBJECTID BETWEEN 3 AND 4",
            "OBJECTID BETWEEN 5 AND 6"
        ]
    );
}

#[test]
fn malformed_chunk_fails_fast() {
    let layer: ResourceUrl = "https://gis.example.com/rest/services/Roads/MapServer/1"
        .parse()
        .unwrap();
    let ids = RecordIdentifierSet::new("OBJECTID", vec![10, 20, 30, 40]);
    let service = ScriptedPages::new(vec![
        json!({"features": [polyline(10)]}),
        json!({"features": [polyline(20)]}),
        json!({"features": {"not": "a list"}}),
        json!({"features": [polyline(40)]}),
    ]);
    let options = options();
    let fetcher = ChunkFetcher::new(&service, &layer, GeometryKind::Polyline, &options);

    let mut writer = FeatureCollectionWriter::begin(Vec::new()).unwrap();
    let err = run_chunks(
        &fetcher,
        &ids,
        &ranges(&ids, 1),
        &mut writer,
        SpatialReferenceId::WGS84,
        &JsonOutput,
    )
    .unwrap_err();

    assert_matches!(err, AgsError::ChunkFetchFailed { start: 30, end: 30, .. });
    assert_eq!(writer.features_written(), 2);
    assert_eq!(service.wheres.lock().unwrap().len(), 3);
    assert_eq!(service.pages.lock().unwrap().len(), 1);
}
