use std::fmt;
use std::str::FromStr;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::AgsError;

// No query, no fragment, no trailing slash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceUrl(String);

impl ResourceUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn join(&self, segment: impl fmt::Display) -> ResourceUrl {
        ResourceUrl(format!("{}/{segment}", self.0))
    }

    pub fn parent(&self) -> Option<ResourceUrl> {
        let (head, _) = self.0.rsplit_once('/')?;
        if head.ends_with('/') || !head.contains("://") {
            return None;
        }
        Some(ResourceUrl(head.to_string()))
    }

    pub fn query_endpoint(&self) -> String {
        format!("{}/query", self.0)
    }
}

impl fmt::Display for ResourceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ResourceUrl {
    type Err = AgsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut url =
            Url::parse(value.trim()).map_err(|err| AgsError::InvalidUrl(format!("{value}: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AgsError::InvalidUrl(value.to_string()));
        }
        url.set_query(None);
        url.set_fragment(None);
        let normalized = url.as_str().trim_end_matches('/').to_string();
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryKind {
    Point,
    Multipoint,
    Polygon,
    Polyline,
    None,
}

impl GeometryKind {
    pub fn from_esri(value: Option<&str>) -> Self {
        match value {
            Some("esriGeometryPoint") => GeometryKind::Point,
            Some("esriGeometryMultipoint") => GeometryKind::Multipoint,
            Some("esriGeometryPolygon") => GeometryKind::Polygon,
            Some("esriGeometryPolyline") => GeometryKind::Polyline,
            _ => GeometryKind::None,
        }
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryKind::Point => write!(f, "point"),
            GeometryKind::Multipoint => write!(f, "multipoint"),
            GeometryKind::Polygon => write!(f, "polygon"),
            GeometryKind::Polyline => write!(f, "polyline"),
            GeometryKind::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpatialReferenceId(u32);

impl SpatialReferenceId {
    pub const WGS84: SpatialReferenceId = SpatialReferenceId(4326);

    pub fn new(wkid: u32) -> Self {
        Self(wkid)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SpatialReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSelection {
    All,
    Named(Vec<String>),
}

impl FieldSelection {
    pub fn as_param(&self) -> String {
        match self {
            FieldSelection::All => "*".to_string(),
            FieldSelection::Named(fields) => fields.join(","),
        }
    }
}

impl FromStr for FieldSelection {
    type Err = AgsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let fields = value
            .split(',')
            .map(str::trim)
            .filter(|field| !field.is_empty())
            .collect::<Vec<_>>();
        if fields.is_empty() {
            return Err(AgsError::InvalidConfig(format!(
                "empty field selection: {value:?}"
            )));
        }
        if fields.contains(&"*") {
            return Ok(FieldSelection::All);
        }
        Ok(FieldSelection::Named(
            fields.into_iter().map(str::to_string).collect(),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordIdentifierSet {
    field: String,
    ids: Vec<i64>,
}

impl RecordIdentifierSet {
    pub fn new(field: impl Into<String>, mut ids: Vec<i64>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        Self {
            field: field.into(),
            ids,
        }
    }

    pub fn field_name(&self) -> &str {
        &self.field
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
