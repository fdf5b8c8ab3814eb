//! In-memory vector layer model.
//!
//! The hosting application owns the feature collection; the pipelines only
//! read geometries and write one attribute per feature. Attribute writes are
//! buffered in an editing session and applied by a single terminal
//! `commit_changes`, while schema changes (`ensure_field`) apply immediately
//! and must happen before an editing session opens. That separation keeps a
//! structural migration from interleaving with in-flight data edits.

use crate::geometry::Geometry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors raised by layer operations.
#[derive(Debug, Error)]
pub enum LayerError {
    #[error("unknown feature {0}")]
    UnknownFeature(FeatureId),

    #[error("unknown field {0:?}")]
    UnknownField(String),

    #[error("no editing session open")]
    NotEditing,

    #[error("schema cannot change while an editing session is open")]
    EditingInProgress,

    #[error("invalid GeoJSON collection: {0}")]
    Format(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Identifier of a feature within its layer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct FeatureId(pub u64);

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Attribute field kinds supported by the layer schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Text,
    Integer,
    Real,
}

/// A declared attribute column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
}

impl Field {
    pub fn text(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: FieldKind::Text }
    }
}

/// A single geometry + attributes record.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: FeatureId,
    pub geometry: Option<Geometry>,
    pub attributes: BTreeMap<String, Value>,
}

impl Feature {
    /// The committed value of one attribute, if set.
    pub fn attribute(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field)
    }
}

#[derive(Debug, Clone)]
struct PendingEdit {
    feature: FeatureId,
    field: String,
    value: Value,
}

/// A feature collection with schema, selection, and buffered editing.
#[derive(Debug, Default)]
pub struct VectorLayer {
    fields: Vec<Field>,
    features: Vec<Feature>,
    selection: Vec<FeatureId>,
    display_expression: Option<String>,
    editing: bool,
    pending: Vec<PendingEdit>,
    next_id: u64,
}

impl VectorLayer {
    /// An empty layer with the given schema.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields, ..Self::default() }
    }

    /// Append a feature, returning its assigned id.
    pub fn add_feature(
        &mut self,
        geometry: Option<Geometry>,
        attributes: BTreeMap<String, Value>,
    ) -> FeatureId {
        let id = FeatureId(self.next_id);
        self.next_id += 1;
        self.features.push(Feature { id, geometry, attributes });
        id
    }

    pub fn feature(&self, id: FeatureId) -> Option<&Feature> {
        self.features.iter().find(|f| f.id == id)
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Add a text field to the schema if absent. Schema changes commit
    /// immediately and are rejected while an editing session is open.
    /// Returns true when the field was created.
    pub fn ensure_field(&mut self, name: &str) -> Result<bool, LayerError> {
        if self.has_field(name) {
            return Ok(false);
        }
        if self.editing {
            return Err(LayerError::EditingInProgress);
        }
        self.fields.push(Field::text(name));
        Ok(true)
    }

    /// Open an editing session. Attribute writes buffer until commit.
    pub fn start_editing(&mut self) {
        self.editing = true;
    }

    pub fn is_editing(&self) -> bool {
        self.editing
    }

    /// Buffer an attribute write, overwriting any previously buffered value
    /// for the same slot at commit time.
    pub fn set_attribute(
        &mut self,
        id: FeatureId,
        field: &str,
        value: Value,
    ) -> Result<(), LayerError> {
        if !self.editing {
            return Err(LayerError::NotEditing);
        }
        if !self.has_field(field) {
            return Err(LayerError::UnknownField(field.to_string()));
        }
        if self.feature(id).is_none() {
            return Err(LayerError::UnknownFeature(id));
        }
        self.pending.push(PendingEdit {
            feature: id,
            field: field.to_string(),
            value,
        });
        Ok(())
    }

    /// Apply all buffered edits and close the editing session. Returns the
    /// number of edits applied. Edits apply in order, so the latest write to
    /// a slot wins.
    pub fn commit_changes(&mut self) -> usize {
        let edits = std::mem::take(&mut self.pending);
        let applied = edits.len();
        for edit in edits {
            if let Some(feature) =
                self.features.iter_mut().find(|f| f.id == edit.feature)
            {
                feature.attributes.insert(edit.field, edit.value);
            }
        }
        self.editing = false;
        applied
    }

    /// Discard buffered edits and close the editing session.
    pub fn rollback(&mut self) {
        self.pending.clear();
        self.editing = false;
    }

    /// Select every feature, in collection order.
    pub fn select_all(&mut self) {
        self.selection = self.features.iter().map(|f| f.id).collect();
    }

    /// Select the given features, preserving collection order. Unknown ids
    /// are rejected.
    pub fn select(&mut self, ids: &[FeatureId]) -> Result<(), LayerError> {
        for id in ids {
            if self.feature(*id).is_none() {
                return Err(LayerError::UnknownFeature(*id));
            }
        }
        self.selection = self
            .features
            .iter()
            .map(|f| f.id)
            .filter(|id| ids.contains(id))
            .collect();
        Ok(())
    }

    /// Ids of the selected features, in collection order.
    pub fn selected(&self) -> Vec<FeatureId> {
        self.selection.clone()
    }

    /// Persistent hint telling the hosting UI which field to render for
    /// feature display.
    pub fn set_display_expression(&mut self, expression: impl Into<String>) {
        self.display_expression = Some(expression.into());
    }

    pub fn display_expression(&self) -> Option<&str> {
        self.display_expression.as_deref()
    }

    /// Parse a GeoJSON FeatureCollection. The schema is the union of all
    /// property keys, typed as text.
    pub fn from_geojson(text: &str) -> Result<Self, LayerError> {
        let collection: GeoJsonCollection = serde_json::from_str(text)?;
        if collection.kind != "FeatureCollection" {
            return Err(LayerError::Format(format!(
                "expected FeatureCollection, got {:?}",
                collection.kind
            )));
        }

        let mut layer = VectorLayer::default();
        for member in collection.features {
            if member.kind != "Feature" {
                return Err(LayerError::Format(format!(
                    "expected Feature, got {:?}",
                    member.kind
                )));
            }
            for key in member.properties.keys() {
                if !layer.has_field(key) {
                    layer.fields.push(Field::text(key.clone()));
                }
            }
            layer.add_feature(member.geometry, member.properties);
        }
        Ok(layer)
    }

    /// Serialize the layer back to a GeoJSON FeatureCollection.
    pub fn to_geojson(&self) -> Result<String, LayerError> {
        let collection = GeoJsonCollection {
            kind: "FeatureCollection".to_string(),
            features: self
                .features
                .iter()
                .map(|f| GeoJsonFeature {
                    kind: "Feature".to_string(),
                    geometry: f.geometry.clone(),
                    properties: f.attributes.clone(),
                })
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&collection)?)
    }

    pub fn read_geojson_file(path: &Path) -> Result<Self, LayerError> {
        Self::from_geojson(&fs::read_to_string(path)?)
    }

    pub fn write_geojson_file(&self, path: &Path) -> Result<(), LayerError> {
        fs::write(path, self.to_geojson()?)?;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GeoJsonFeature {
    #[serde(rename = "type")]
    kind: String,
    geometry: Option<Geometry>,
    #[serde(default)]
    properties: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeoJsonCollection {
    #[serde(rename = "type")]
    kind: String,
    features: Vec<GeoJsonFeature>,
}
