use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::GeometryKind;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawFeature {
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub geometry: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point([f64; 2]),
    MultiPoint(Value),
    Polygon(Value),
    MultiLineString(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputFeature {
    pub properties: Map<String, Value>,
    pub geometry: Option<Geometry>,
}

impl Serialize for OutputFeature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("type", "Feature")?;
        map.serialize_entry("geometry", &self.geometry)?;
        map.serialize_entry("properties", &self.properties)?;
        map.end()
    }
}

// Keyed on the layer's geometry kind, not the feature's.
pub fn convert(raw: RawFeature, kind: GeometryKind) -> OutputFeature {
    let geometry = raw
        .geometry
        .as_ref()
        .and_then(|shape| convert_geometry(shape, kind));
    OutputFeature {
        properties: raw.attributes,
        geometry,
    }
}

pub fn attributes_only(raw: RawFeature) -> OutputFeature {
    OutputFeature {
        properties: raw.attributes,
        geometry: None,
    }
}

fn convert_geometry(shape: &Value, kind: GeometryKind) -> Option<Geometry> {
    match kind {
        GeometryKind::Point => {
            let x = shape.get("x").and_then(Value::as_f64)?;
            let y = shape.get("y").and_then(Value::as_f64)?;
            Some(Geometry::Point([x, y]))
        }
        GeometryKind::Multipoint => nested(shape, "points").map(Geometry::MultiPoint),
        GeometryKind::Polygon => nested(shape, "rings").map(Geometry::Polygon),
        GeometryKind::Polyline => nested(shape, "paths").map(Geometry::MultiLineString),
        GeometryKind::None => None,
    }
}

fn nested(shape: &Value, key: &str) -> Option<Value> {
    shape.get(key).filter(|value| value.is_array()).cloned()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn raw(value: Value) -> RawFeature {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn point_becomes_coordinate_pair() {
        let feature = raw(json!({
            "attributes": {"OBJECTID": 1, "NAME": "Fire Station 4"},
            "geometry": {"x": -75.16, "y": 39.95}
        }));
        let out = convert(feature, GeometryKind::Point);
        assert_eq!(out.geometry, Some(Geometry::Point([-75.16, 39.95])));
        assert_eq!(out.properties["NAME"], json!("Fire Station 4"));
    }

    #[test]
    fn empty_point_drops_geometry() {
        let feature = raw(json!({
            "attributes": {"OBJECTID": 1},
            "geometry": {"x": "NaN", "y": null}
        }));
        assert_eq!(convert(feature, GeometryKind::Point).geometry, None);
    }

    #[test]
    fn rings_and_paths_pass_through() {
        let rings = json!([[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]);
        let polygon = convert(
            raw(json!({"attributes": {}, "geometry": {"rings": rings.clone()}})),
            GeometryKind::Polygon,
        );
        assert_eq!(polygon.geometry, Some(Geometry::Polygon(rings)));

        let paths = json!([[[0.0, 0.0], [2.0, 2.0]], [[5.0, 5.0], [6.0, 7.0]]]);
        let line = convert(
            raw(json!({"attributes": {}, "geometry": {"paths": paths.clone()}})),
            GeometryKind::Polyline,
        );
        assert_eq!(line.geometry, Some(Geometry::MultiLineString(paths)));
    }

    #[test]
    fn multipoint_points_pass_through() {
        let points = json!([[1.5, 2.5], [3.0, 4.0], [-7.25, 0.0]]);
        let out = convert(
            raw(json!({"attributes": {"OBJECTID": 3}, "geometry": {"points": points.clone()}})),
            GeometryKind::Multipoint,
        );
        assert_eq!(out.geometry, Some(Geometry::MultiPoint(points)));
        assert_eq!(
            serde_json::to_value(&out).unwrap()["geometry"],
            json!({"type": "MultiPoint", "coordinates": [[1.5, 2.5], [3.0, 4.0], [-7.25, 0.0]]})
        );
    }

    #[test]
    fn unknown_kind_keeps_attributes() {
        let attributes = json!({"OBJECTID": 12, "ZONE": "R-2"});
        let feature = raw(json!({
            "attributes": attributes.clone(),
            "geometry": {"xmin": 0, "ymin": 0, "xmax": 1, "ymax": 1}
        }));
        let out = convert(feature, GeometryKind::None);
        assert!(out.geometry.is_none());
        assert_eq!(Value::Object(out.properties), attributes);
    }

    #[test]
    fn conversion_is_deterministic() {
        let feature = raw(json!({"attributes": {"a": 1}, "geometry": {"x": 1.5, "y": 2.5}}));
        assert_eq!(
            convert(feature.clone(), GeometryKind::Point),
            convert(feature, GeometryKind::Point)
        );
    }

    #[test]
    fn serializes_as_geojson_feature() {
        let out = convert(
            raw(json!({"attributes": {"id": 3}, "geometry": {"x": 1.0, "y": 2.0}})),
            GeometryKind::Point,
        );
        assert_eq!(
            serde_json::to_value(&out).unwrap(),
            json!({
                "type": "Feature",
                "geometry": {"type": "Point", "coordinates": [1.0, 2.0]},
                "properties": {"id": 3}
            })
        );

        let bare = attributes_only(raw(json!({"attributes": {"id": 4}})));
        assert_eq!(
            serde_json::to_value(&bare).unwrap(),
            json!({"type": "Feature", "geometry": null, "properties": {"id": 4}})
        );
    }
}
