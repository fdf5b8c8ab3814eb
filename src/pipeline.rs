//! The feature-to-imagery orchestration pipeline.
//!
//! Strictly sequential over the selected features:
//! Preparing (resolve and persist config, encode credentials, schema
//! migration) → PerFeature (extract → query → project → present) →
//! Committing (display hint, one terminal commit of all buffered edits).
//! One feature's failure never aborts the run; fatal preconditions are
//! reported before any feature is touched.

use crate::auth::{AuthToken, Credentials};
use crate::client::{ImageryQuery, QueryRequest};
use crate::config::{ConfigError, ConfigStore};
use crate::geometry;
use crate::layer::{FeatureId, LayerError, VectorLayer};
use crate::presenter;
use crate::progress::{CancelToken, ProgressSink};
use crate::projector;
use chrono::NaiveDate;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Attribute field the imagery pipeline writes.
pub const IMAGERY_FIELD: &str = "imagery_metadata";

/// Conditions fatal to a whole run. Per-feature conditions are reported
/// through the progress sink and the run report instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no features selected")]
    NoSelection,

    #[error("could not persist configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("could not create field {field:?}: {source}")]
    SchemaMigration {
        field: String,
        #[source]
        source: LayerError,
    },
}

/// Per-run inputs that override the stored configuration.
#[derive(Debug, Clone, Default)]
pub struct RunParams {
    /// Explicit credentials; merged over the stored config and persisted.
    pub credentials: Option<Credentials>,
    /// Explicit output directory for downloaded frames.
    pub output_dir: Option<PathBuf>,
}

/// Imagery query shaping options, constant across one run.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Restrict results to the most recent capture per location.
    pub latest_only: bool,
    pub start_day: Option<NaiveDate>,
    pub end_day: Option<NaiveDate>,
    /// Reuse frames already on disk instead of re-downloading.
    pub use_cache: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            latest_only: true,
            start_day: None,
            end_day: None,
            use_cache: true,
        }
    }
}

/// Terminal summary of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Features that received a rendered payload, including empty ones.
    pub processed: usize,
    /// Features skipped at the validation gate (empty geometry).
    pub skipped: usize,
    /// Features whose client call or attribute write failed.
    pub failed: usize,
    /// Whether cancellation stopped the run early.
    pub cancelled: bool,
}

impl RunReport {
    /// Features the loop reached before finishing or being cancelled.
    pub fn attempted(&self) -> usize {
        self.processed + self.skipped + self.failed
    }
}

/// Outputs of the Preparing phase shared by both pipelines.
pub(crate) struct Prepared {
    pub auth: AuthToken,
    pub output_dir: PathBuf,
    pub selected: Vec<FeatureId>,
}

/// Preparing phase: merge and persist config, check the selection, run the
/// schema migration in its own transaction, and encode credentials.
pub(crate) fn prepare(
    store: &ConfigStore,
    layer: &mut VectorLayer,
    params: &RunParams,
    field: &str,
) -> Result<Prepared, PipelineError> {
    let mut config = store.load();
    if let Some(credentials) = &params.credentials {
        config.apply_credentials(credentials);
    }
    if let Some(output_dir) = &params.output_dir {
        config.output_dir = Some(output_dir.clone());
    }
    store.save(&config)?;

    let selected = layer.selected();
    if selected.is_empty() {
        return Err(PipelineError::NoSelection);
    }

    // Schema migration commits on its own, before any data edit buffers.
    let added = layer
        .ensure_field(field)
        .map_err(|source| PipelineError::SchemaMigration {
            field: field.to_string(),
            source,
        })?;
    if added {
        info!(field, "Added attribute field to layer schema");
    }

    let auth = AuthToken::encode(config.username(), config.api_key());
    let output_dir = config
        .output_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("skyfetch"));

    Ok(Prepared {
        auth,
        output_dir,
        selected,
    })
}

/// Orchestrates imagery queries for each selected feature and writes the
/// rendered thumbnail payload into `imagery_metadata`.
pub struct ImageryPipeline {
    client: Arc<dyn ImageryQuery>,
    store: ConfigStore,
    options: QueryOptions,
}

impl ImageryPipeline {
    pub fn new(client: Arc<dyn ImageryQuery>, store: ConfigStore) -> Self {
        Self {
            client,
            store,
            options: QueryOptions::default(),
        }
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    /// Run the pipeline over the layer's selected features.
    pub async fn run(
        &self,
        layer: &mut VectorLayer,
        params: RunParams,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<RunReport, PipelineError> {
        let prepared = prepare(&self.store, layer, &params, IMAGERY_FIELD)?;
        let total = prepared.selected.len();
        let mut report = RunReport::default();

        layer.start_editing();
        for (index, id) in prepared.selected.iter().copied().enumerate() {
            if cancel.is_cancelled() {
                progress.push_info("Cancelled; stopping before the next feature");
                report.cancelled = true;
                break;
            }
            progress.set_progress(index as f64 * 100.0 / total as f64);

            let document = match layer.feature(id).map(geometry::extract) {
                Some(Ok(document)) => document,
                Some(Err(_)) => {
                    progress.push_warning(&format!("Skipping feature {id}: empty geometry"));
                    report.skipped += 1;
                    continue;
                }
                None => {
                    warn!(feature = %id, "Selected feature no longer exists");
                    report.skipped += 1;
                    continue;
                }
            };

            // The temp document lives exactly as long as the query call.
            let temp = match document.write_temp() {
                Ok(temp) => temp,
                Err(err) => {
                    progress.push_warning(&format!(
                        "Feature {id}: could not write geometry document: {err}"
                    ));
                    report.failed += 1;
                    continue;
                }
            };
            let request = QueryRequest {
                geometry_path: temp.path().to_path_buf(),
                output_dir: prepared.output_dir.clone(),
                auth: prepared.auth.clone(),
                latest_only: self.options.latest_only,
                start_day: self.options.start_day,
                end_day: self.options.end_day,
                use_cache: self.options.use_cache,
            };
            let result = self.client.query(&request).await;
            drop(temp);

            let paths = match result {
                Ok(paths) => paths,
                Err(err) => {
                    warn!(feature = %id, error = %err, "Imagery query failed");
                    progress.push_warning(&format!("Feature {id}: imagery query failed: {err}"));
                    report.failed += 1;
                    continue;
                }
            };
            if paths.is_empty() {
                info!(feature = %id, "No frames found");
            }

            let records = projector::project(&paths);
            let payload = presenter::render(&records);
            if let Err(err) = presenter::apply(layer, id, IMAGERY_FIELD, payload) {
                warn!(feature = %id, error = %err, "Failed to queue attribute write");
                progress.push_warning(&format!("Feature {id}: attribute write failed: {err}"));
                report.failed += 1;
                continue;
            }

            info!(feature = %id, frames = records.len(), "Feature processed");
            report.processed += 1;
        }

        // Committing: display hint, then all buffered edits as one terminal
        // operation. Cancellation keeps the edits queued so far.
        layer.set_display_expression(IMAGERY_FIELD);
        let committed = layer.commit_changes();
        progress.set_progress(100.0);
        progress.push_info(&format!(
            "Processed {} feature(s), committed {} attribute edit(s)",
            report.processed, committed
        ));

        Ok(report)
    }
}
