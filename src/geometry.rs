//! Feature geometry extraction and the GeoJSON exchange boundary.
//!
//! The imagery backend consumes geometry by reference: the pipeline writes a
//! GeoJSON document to a temporary file and passes the path to the client.
//! The temp file is a scoped resource, removed when the guard drops on every
//! exit path, including cancellation and client failure.

use crate::layer::Feature;
use serde::{Deserialize, Serialize};
use std::io::Write;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Errors raised while extracting or materializing a geometry document.
#[derive(Debug, Error)]
pub enum GeometryError {
    /// The feature has no geometry or its coordinate set is empty. The
    /// single validation gate before any network call.
    #[error("feature geometry is empty")]
    Empty,

    #[error("failed to write geometry document: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize geometry document: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A feature geometry in GeoJSON wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Vec<f64>),
    MultiPoint(Vec<Vec<f64>>),
    LineString(Vec<Vec<f64>>),
    MultiLineString(Vec<Vec<Vec<f64>>>),
    Polygon(Vec<Vec<Vec<f64>>>),
    MultiPolygon(Vec<Vec<Vec<Vec<f64>>>>),
}

impl Geometry {
    /// True when the geometry carries no coordinates at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Geometry::Point(coords) => coords.is_empty(),
            Geometry::MultiPoint(points) => points.is_empty(),
            Geometry::LineString(points) => points.is_empty(),
            Geometry::MultiLineString(lines) => lines.iter().all(Vec::is_empty),
            Geometry::Polygon(rings) => rings.iter().all(Vec::is_empty),
            Geometry::MultiPolygon(polygons) => {
                polygons.iter().flatten().all(Vec::is_empty)
            }
        }
    }
}

/// A provider-ready geometry document derived from one feature.
#[derive(Debug, Clone)]
pub struct GeometryDocument {
    geometry: Geometry,
}

impl GeometryDocument {
    /// Write the document to a scoped temporary `.geojson` file. The
    /// returned guard removes the file when dropped.
    pub fn write_temp(&self) -> Result<NamedTempFile, GeometryError> {
        let mut file = tempfile::Builder::new()
            .prefix("skyfetch-")
            .suffix(".geojson")
            .tempfile()?;
        serde_json::to_writer(&mut file, &self.geometry)?;
        file.flush()?;
        Ok(file)
    }

    /// The wrapped geometry.
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }
}

/// Convert a feature's geometry into the provider exchange format, rejecting
/// empty geometries.
pub fn extract(feature: &Feature) -> Result<GeometryDocument, GeometryError> {
    let geometry = feature.geometry.as_ref().ok_or(GeometryError::Empty)?;
    if geometry.is_empty() {
        return Err(GeometryError::Empty);
    }
    Ok(GeometryDocument { geometry: geometry.clone() })
}
