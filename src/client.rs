//! External collaborator contracts and their HTTP implementations.
//!
//! The pipelines depend on two named capabilities: an imagery query that
//! materializes per-frame images and sidecar metadata on disk, and a burst
//! creation call that submits backend jobs. Production implementations speak
//! JSON over HTTP; tests substitute deterministic doubles behind the same
//! traits.

use crate::auth::AuthToken;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Errors surfaced by the external clients. Always per-feature: one failing
/// call never aborts the run.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("failed to read or write frame data: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// One imagery query for one feature.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Path of the GeoJSON geometry document, passed by reference.
    pub geometry_path: PathBuf,
    /// Directory the client materializes frames into.
    pub output_dir: PathBuf,
    /// Encoded credentials.
    pub auth: AuthToken,
    /// Restrict results to the most recent capture per location.
    pub latest_only: bool,
    /// Inclusive start of the requested date range.
    pub start_day: Option<NaiveDate>,
    /// Inclusive end of the requested date range.
    pub end_day: Option<NaiveDate>,
    /// Reuse frames already present on disk instead of re-downloading.
    pub use_cache: bool,
}

/// Result of one burst creation call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BurstOutcome {
    /// Whether the backend accepted the job.
    #[serde(default)]
    pub success: bool,
    /// Descriptors of the created bursts.
    #[serde(default)]
    pub bursts: Vec<Value>,
}

/// Capability: query the provider for frames intersecting a geometry and
/// materialize them on disk. An empty path set means "no frames found", not
/// an error.
#[async_trait]
pub trait ImageryQuery: Send + Sync {
    async fn query(&self, request: &QueryRequest) -> Result<HashSet<PathBuf>, ClientError>;
}

/// Capability: submit a burst creation job for a geometry.
#[async_trait]
pub trait BurstCreation: Send + Sync {
    async fn create(
        &self,
        geometry_path: &Path,
        authorization: &str,
    ) -> Result<BurstOutcome, ClientError>;
}

/// On-disk locations of one frame and its sidecar under the provider layout
/// `<output>/<sequence>/keyframes/<idx>.jpg` and
/// `<output>/<sequence>/metadata/<idx>.json`.
pub fn frame_paths(output_dir: &Path, sequence: &str, idx: u64) -> (PathBuf, PathBuf) {
    let sequence_dir = output_dir.join(sequence);
    (
        sequence_dir.join("keyframes").join(format!("{idx}.jpg")),
        sequence_dir.join("metadata").join(format!("{idx}.json")),
    )
}

#[derive(Serialize)]
struct QueryBody<'a> {
    geometry: &'a Value,
    latest: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_day: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_day: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    frames: Vec<FrameDescriptor>,
}

#[derive(Debug, Deserialize)]
struct FrameDescriptor {
    sequence: String,
    idx: u64,
    timestamp: DateTime<Utc>,
    url: String,
    #[serde(default)]
    position: Option<FramePosition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FramePosition {
    lat: Option<f64>,
    lon: Option<f64>,
}

/// Sidecar record written next to each downloaded keyframe.
#[derive(Serialize)]
struct FrameSidecar<'a> {
    idx: u64,
    sequence: &'a str,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<&'a FramePosition>,
}

/// HTTP implementation of [`ImageryQuery`].
pub struct HttpImageryClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpImageryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn download_frame(
        &self,
        frame: &FrameDescriptor,
        request: &QueryRequest,
        keyframe_path: &Path,
    ) -> Result<(), ClientError> {
        if request.use_cache && keyframe_path.exists() {
            debug!(path = %keyframe_path.display(), "Keyframe already cached");
            return Ok(());
        }
        let response = self
            .http
            .get(&frame.url)
            .header(AUTHORIZATION, request.auth.basic_header())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        let bytes = response.bytes().await?;
        tokio::fs::write(keyframe_path, &bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl ImageryQuery for HttpImageryClient {
    #[instrument(skip(self, request), fields(output_dir = %request.output_dir.display()))]
    async fn query(&self, request: &QueryRequest) -> Result<HashSet<PathBuf>, ClientError> {
        let geometry: Value =
            serde_json::from_str(&tokio::fs::read_to_string(&request.geometry_path).await?)?;

        let response = self
            .http
            .post(format!("{}/imagery/query", self.base_url))
            .header(AUTHORIZATION, request.auth.basic_header())
            .json(&QueryBody {
                geometry: &geometry,
                latest: request.latest_only,
                start_day: request.start_day,
                end_day: request.end_day,
            })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        let body: QueryResponse = response.json().await?;

        let mut written = HashSet::new();
        for frame in &body.frames {
            let (keyframe_path, metadata_path) =
                frame_paths(&request.output_dir, &frame.sequence, frame.idx);
            for path in [&keyframe_path, &metadata_path] {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }

            self.download_frame(frame, request, &keyframe_path).await?;

            let sidecar = FrameSidecar {
                idx: frame.idx,
                sequence: &frame.sequence,
                timestamp: frame.timestamp,
                position: frame.position.as_ref(),
            };
            tokio::fs::write(&metadata_path, serde_json::to_vec_pretty(&sidecar)?).await?;

            written.insert(keyframe_path);
            written.insert(metadata_path);
        }

        info!(
            frames = body.frames.len(),
            paths = written.len(),
            "Imagery query complete"
        );
        Ok(written)
    }
}

/// HTTP implementation of [`BurstCreation`].
pub struct HttpBurstClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBurstClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl BurstCreation for HttpBurstClient {
    #[instrument(skip(self, geometry_path, authorization))]
    async fn create(
        &self,
        geometry_path: &Path,
        authorization: &str,
    ) -> Result<BurstOutcome, ClientError> {
        let geometry: Value =
            serde_json::from_str(&tokio::fs::read_to_string(geometry_path).await?)?;

        let response = self
            .http
            .post(format!("{}/bursts", self.base_url))
            .header(AUTHORIZATION, authorization)
            .json(&serde_json::json!({ "geometry": geometry }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let outcome: BurstOutcome = response.json().await?;
        debug!(
            success = outcome.success,
            bursts = outcome.bursts.len(),
            "Burst creation call complete"
        );
        Ok(outcome)
    }
}
