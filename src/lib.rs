//! Skyfetch
//!
//! Batch imagery fetch and burst creation for vector layer features. For
//! each selected feature the imagery pipeline derives a GeoJSON geometry
//! document, queries the remote imagery provider for aerial frames
//! intersecting it, joins the materialized keyframe/metadata trees into
//! per-frame records, and writes a rendered HTML thumbnail list back onto
//! the feature's attribute row. A sibling pipeline submits burst-creation
//! jobs instead.
//!
//! ## Architecture
//!
//! ```text
//! ConfigStore ──┐
//!               ▼
//!         ImageryPipeline ── per selected feature ──▶ GeometryExtractor
//!               │                                          │
//!               │                                          ▼ (temp .geojson)
//!               │                                    ImageryQuery (HTTP)
//!               │                                          │
//!               │                keyframes/*.jpg + metadata/*.json
//!               │                                          │
//!               │                                          ▼
//!               │                                     ResultProjector
//!               │                                          │
//!               ▼                                          ▼
//!         VectorLayer ◀── buffered attribute edits ── AttributePresenter
//! ```
//!
//! The pipelines are strictly sequential: one in-flight query at a time,
//! cancellation polled between features, all attribute edits committed as
//! one terminal operation.

pub mod auth;
pub mod bursts;
pub mod client;
pub mod config;
pub mod geometry;
pub mod layer;
pub mod pipeline;
pub mod presenter;
pub mod progress;
pub mod projector;

// Re-export main types
pub use auth::{AuthError, AuthToken, Credentials};
pub use bursts::{BurstPipeline, BurstReport, BURST_FIELD};
pub use client::{
    BurstCreation, BurstOutcome, ClientError, HttpBurstClient, HttpImageryClient,
    ImageryQuery, QueryRequest,
};
pub use config::{Config, ConfigError, ConfigStore};
pub use geometry::{Geometry, GeometryDocument, GeometryError};
pub use layer::{Feature, FeatureId, Field, FieldKind, LayerError, VectorLayer};
pub use pipeline::{
    ImageryPipeline, PipelineError, QueryOptions, RunParams, RunReport, IMAGERY_FIELD,
};
pub use progress::{CancelToken, ProgressSink, TracingProgress};
pub use projector::FrameRecord;
