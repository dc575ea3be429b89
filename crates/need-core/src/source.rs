//! Cluster coordinate sources.
//!
//! Coordinates arrive either as a CSV table or as a GeoJSON point/polygon
//! file. Both expose the same `(cluster_id, position)` records to the matcher.

use std::collections::HashSet;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::coords::{coerce_f64, LatLon};
use crate::error::{NeedError, Result};
use crate::tables::{find_alias, ClusterSite, CLUSTER_ID};

const LAT_ALIASES: &[&str] = &["lat", "latitude", "latnum"];
const LON_ALIASES: &[&str] = &["lon", "longitude", "longnum", "lonnum"];

pub trait CoordinateSource {
    /// Human-readable origin, used in log lines.
    fn describe(&self) -> String;

    /// Load cluster positions, de-duplicated by id (first occurrence wins).
    fn load(&self) -> Result<Vec<ClusterSite>>;
}

/// CSV table with `cluster_id` and a latitude/longitude column pair.
#[derive(Debug, Clone)]
pub struct CsvCoordinates {
    pub path: PathBuf,
}

impl CsvCoordinates {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CoordinateSource for CsvCoordinates {
    fn describe(&self) -> String {
        format!("csv:{}", self.path.display())
    }

    fn load(&self) -> Result<Vec<ClusterSite>> {
        read_coordinate_csv(fs::File::open(&self.path)?)
    }
}

/// GeoJSON `FeatureCollection` of points or polygons.
#[derive(Debug, Clone)]
pub struct GeoJsonCoordinates {
    pub path: PathBuf,
    /// Feature property holding the cluster id.
    pub id_property: String,
}

impl GeoJsonCoordinates {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), id_property: CLUSTER_ID.to_string() }
    }
}

impl CoordinateSource for GeoJsonCoordinates {
    fn describe(&self) -> String {
        format!("geojson:{}", self.path.display())
    }

    fn load(&self) -> Result<Vec<ClusterSite>> {
        let doc: Value = serde_json::from_str(&fs::read_to_string(&self.path)?)?;
        sites_from_geojson(&doc, &self.id_property)
    }
}

/// Pick a coordinate source by availability: CSV first, then the point file.
/// `None` means the run falls back to uniform weights.
pub fn discover(csv: Option<&Path>, points: Option<&Path>) -> Option<Box<dyn CoordinateSource>> {
    if let Some(p) = csv.filter(|p| p.exists()) {
        return Some(Box::new(CsvCoordinates::new(p)));
    }
    if let Some(p) = points.filter(|p| p.exists()) {
        return Some(Box::new(GeoJsonCoordinates::new(p)));
    }
    None
}

pub fn read_coordinate_csv<R: Read>(input: R) -> Result<Vec<ClusterSite>> {
    const TABLE: &str = "cluster coordinates";
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).flexible(true).from_reader(input);
    let header: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
    let id_col = header
        .iter()
        .position(|h| h == CLUSTER_ID)
        .ok_or_else(|| NeedError::missing_column(TABLE, CLUSTER_ID))?;
    let lat_col = find_alias(&header, LAT_ALIASES)
        .ok_or_else(|| NeedError::missing_column(TABLE, "lat"))?;
    let lon_col = find_alias(&header, LON_ALIASES)
        .ok_or_else(|| NeedError::missing_column(TABLE, "lon"))?;

    let mut seen = HashSet::new();
    let mut sites = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        let cluster_id = rec.get(id_col).unwrap_or("").trim().to_string();
        if !seen.insert(cluster_id.clone()) {
            continue;
        }
        let lat = rec.get(lat_col).and_then(coerce_f64);
        let lon = rec.get(lon_col).and_then(coerce_f64);
        sites.push(ClusterSite { cluster_id, position: LatLon::from_parts(lat, lon) });
    }
    Ok(sites)
}

pub fn sites_from_geojson(doc: &Value, id_property: &str) -> Result<Vec<ClusterSite>> {
    let features = doc
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            NeedError::MalformedPoints("expected a FeatureCollection with `features`".into())
        })?;

    let mut seen = HashSet::new();
    let mut sites = Vec::new();
    for (i, feature) in features.iter().enumerate() {
        let id = match feature.get("properties").and_then(|p| p.get(id_property)) {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(NeedError::MalformedPoints(format!(
                    "feature {i} has no `{id_property}` property"
                )))
            }
        };
        if !seen.insert(id.clone()) {
            continue;
        }
        let position = feature.get("geometry").and_then(representative_point);
        sites.push(ClusterSite { cluster_id: id, position });
    }
    Ok(sites)
}

/// Point geometries map directly; polygons reduce to the mean of their
/// exterior-ring vertices (closing vertex excluded).
fn representative_point(geometry: &Value) -> Option<LatLon> {
    let coords = geometry.get("coordinates")?;
    match geometry.get("type")?.as_str()? {
        "Point" => position(coords),
        "Polygon" => ring_mean(coords.get(0)?),
        "MultiPolygon" => {
            let vertices: Vec<LatLon> = coords
                .as_array()?
                .iter()
                .filter_map(|poly| poly.get(0))
                .filter_map(ring_vertices)
                .flatten()
                .collect();
            mean(&vertices)
        }
        _ => None,
    }
}

/// GeoJSON positions are `[lon, lat]`.
fn position(v: &Value) -> Option<LatLon> {
    let lon = v.get(0)?.as_f64()?;
    let lat = v.get(1)?.as_f64()?;
    Some(LatLon::new(lat, lon))
}

fn ring_vertices(ring: &Value) -> Option<Vec<LatLon>> {
    let mut pts: Vec<LatLon> = ring.as_array()?.iter().filter_map(position).collect();
    if pts.len() > 1 && pts.first() == pts.last() {
        pts.pop();
    }
    Some(pts)
}

fn ring_mean(ring: &Value) -> Option<LatLon> {
    mean(&ring_vertices(ring)?)
}

fn mean(pts: &[LatLon]) -> Option<LatLon> {
    if pts.is_empty() {
        return None;
    }
    let n = pts.len() as f64;
    let lat = pts.iter().map(|p| p.lat).sum::<f64>() / n;
    let lon = pts.iter().map(|p| p.lon).sum::<f64>() / n;
    Some(LatLon::new(lat, lon))
}
