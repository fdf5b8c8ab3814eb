//! Burst creation pipeline.
//!
//! Same Preparing → PerFeature → Committing shape as the imagery pipeline,
//! but each feature submits a burst-creation job instead of querying frames,
//! and the run tracks a success counter instead of projecting metadata.

use crate::client::BurstCreation;
use crate::config::ConfigStore;
use crate::geometry;
use crate::layer::VectorLayer;
use crate::pipeline::{prepare, PipelineError, RunParams};
use crate::progress::{CancelToken, ProgressSink};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Attribute field the burst pipeline writes.
pub const BURST_FIELD: &str = "burst_metadata";

/// Terminal summary of one burst run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BurstReport {
    /// Features for which the backend accepted a burst job.
    pub created: usize,
    /// Features skipped at the validation gate (empty geometry).
    pub skipped: usize,
    /// Features whose call failed or was rejected by the backend.
    pub failed: usize,
    /// Whether cancellation stopped the run early.
    pub cancelled: bool,
}

impl BurstReport {
    /// The user-visible result message.
    pub fn message(&self) -> String {
        if self.created > 0 {
            format!("Successfully created {} burst(s)", self.created)
        } else {
            "Error processing features to create bursts".to_string()
        }
    }
}

/// Orchestrates burst-creation jobs for each selected feature and writes the
/// burst descriptor list into `burst_metadata`.
pub struct BurstPipeline {
    client: Arc<dyn BurstCreation>,
    store: ConfigStore,
}

impl BurstPipeline {
    pub fn new(client: Arc<dyn BurstCreation>, store: ConfigStore) -> Self {
        Self { client, store }
    }

    /// Run the pipeline over the layer's selected features.
    pub async fn run(
        &self,
        layer: &mut VectorLayer,
        params: RunParams,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<BurstReport, PipelineError> {
        let prepared = prepare(&self.store, layer, &params, BURST_FIELD)?;
        let authorization = prepared.auth.basic_header();
        let total = prepared.selected.len();
        let mut report = BurstReport::default();

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
            let result = self.client.create(temp.path(), &authorization).await;
            drop(temp);

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(feature = %id, error = %err, "Burst creation call failed");
                    progress.push_warning(&format!("Feature {id}: burst creation failed: {err}"));
                    report.failed += 1;
                    continue;
                }
            };
            if !outcome.success {
                warn!(feature = %id, "Backend rejected burst creation");
                progress.push_warning(&format!("Feature {id}: burst creation rejected"));
                report.failed += 1;
                continue;
            }

            let payload = Value::Array(outcome.bursts).to_string();
            if let Err(err) =
                layer.set_attribute(id, BURST_FIELD, Value::String(payload))
            {
                warn!(feature = %id, error = %err, "Failed to queue attribute write");
                report.failed += 1;
                continue;
            }

            info!(feature = %id, "Burst created");
            report.created += 1;
        }

        let committed = layer.commit_changes();
        progress.set_progress(100.0);
        info!(
            created = report.created,
            committed, "Burst run complete"
        );
        progress.push_info(&report.message());

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credentials;
    use crate::client::{BurstOutcome, ClientError};
    use crate::geometry::Geometry;
    use crate::layer::{FeatureId, Field};
    use crate::progress::TracingProgress;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct ScriptedBursts {
        results: Mutex<Vec<Result<BurstOutcome, ClientError>>>,
        seen_authorization: Mutex<Vec<String>>,
    }

    impl ScriptedBursts {
        fn new(results: Vec<Result<BurstOutcome, ClientError>>) -> Self {
            Self {
                results: Mutex::new(results),
                seen_authorization: Mutex::new(Vec::new()),
            }
        }

        fn accepted(bursts: Vec<serde_json::Value>) -> Result<BurstOutcome, ClientError> {
            Ok(BurstOutcome { success: true, bursts })
        }

        fn rejected() -> Result<BurstOutcome, ClientError> {
            Ok(BurstOutcome { success: false, bursts: vec![] })
        }
    }

    #[async_trait]
    impl BurstCreation for ScriptedBursts {
        async fn create(
            &self,
            _geometry_path: &Path,
            authorization: &str,
        ) -> Result<BurstOutcome, ClientError> {
            self.seen_authorization
                .lock()
                .unwrap()
                .push(authorization.to_string());
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                Self::rejected()
            } else {
                results.remove(0)
            }
        }
    }

    fn layer_with_points(count: usize) -> (VectorLayer, Vec<FeatureId>) {
        let mut layer = VectorLayer::new(vec![Field::text("name")]);
        for i in 0..count {
            layer.add_feature(
                Some(Geometry::Point(vec![i as f64, i as f64])),
                BTreeMap::new(),
            );
        }
        layer.select_all();
        let ids = layer.selected();
        (layer, ids)
    }

    #[tokio::test]
    async fn test_success_tally_and_message() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(ScriptedBursts::new(vec![
            ScriptedBursts::accepted(vec![json!({"id": "b1"})]),
            ScriptedBursts::rejected(),
            ScriptedBursts::accepted(vec![json!({"id": "b2"})]),
        ]));
        let (mut layer, ids) = layer_with_points(3);
        let pipeline =
            BurstPipeline::new(client, ConfigStore::at(dir.path().join("config.json")));

        let report = pipeline
            .run(&mut layer, RunParams::default(), &TracingProgress, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(report.created, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.message(), "Successfully created 2 burst(s)");
        // The rejected feature's attribute stays unset.
        assert_eq!(layer.feature(ids[1]).unwrap().attribute(BURST_FIELD), None);
    }

    #[tokio::test]
    async fn test_zero_successes_reports_error_message() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(ScriptedBursts::new(vec![
            Err(ClientError::Api { status: 401, message: "unauthorized".to_string() }),
        ]));
        let (mut layer, _) = layer_with_points(1);
        let pipeline =
            BurstPipeline::new(client, ConfigStore::at(dir.path().join("config.json")));

        let report = pipeline
            .run(&mut layer, RunParams::default(), &TracingProgress, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(report.created, 0);
        assert_eq!(report.message(), "Error processing features to create bursts");
    }

    #[tokio::test]
    async fn test_burst_descriptors_written_as_json_string() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(ScriptedBursts::new(vec![ScriptedBursts::accepted(vec![
            json!({"id": "b1"}),
        ])]));
        let (mut layer, ids) = layer_with_points(1);
        let pipeline =
            BurstPipeline::new(client, ConfigStore::at(dir.path().join("config.json")));

        pipeline
            .run(&mut layer, RunParams::default(), &TracingProgress, &CancelToken::new())
            .await
            .unwrap();

        let stored = layer
            .feature(ids[0])
            .unwrap()
            .attribute(BURST_FIELD)
            .unwrap()
            .as_str()
            .unwrap()
            .to_string();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&stored).unwrap();
        assert_eq!(parsed, vec![json!({"id": "b1"})]);
        assert!(layer.has_field(BURST_FIELD));
    }

    #[tokio::test]
    async fn test_calls_carry_basic_authorization() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(ScriptedBursts::new(vec![ScriptedBursts::accepted(vec![])]));
        let (mut layer, _) = layer_with_points(1);
        let pipeline = BurstPipeline::new(
            client.clone(),
            ConfigStore::at(dir.path().join("config.json")),
        );

        pipeline
            .run(
                &mut layer,
                RunParams {
                    credentials: Some(Credentials {
                        username: "u".to_string(),
                        api_key: "k".to_string(),
                    }),
                    output_dir: None,
                },
                &TracingProgress,
                &CancelToken::new(),
            )
            .await
            .unwrap();

        let seen = client.seen_authorization.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0],
            crate::auth::AuthToken::encode("u", "k").basic_header()
        );
    }

    #[tokio::test]
    async fn test_cancellation_skips_remaining_features() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(ScriptedBursts::new(vec![ScriptedBursts::accepted(vec![])]));
        let (mut layer, _) = layer_with_points(3);
        let cancel = CancelToken::new();
        cancel.cancel();
        let pipeline =
            BurstPipeline::new(client, ConfigStore::at(dir.path().join("config.json")));

        let report = pipeline
            .run(&mut layer, RunParams::default(), &TracingProgress, &cancel)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.created, 0);
    }
}
