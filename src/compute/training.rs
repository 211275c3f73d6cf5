// Training pipeline

use super::artifact::{ArtifactStore, LocalModelStore, ModelArtifact};
use super::evaluation::EvaluationMetrics;
use super::model::ClassifierParams;
use super::registry::ModelRegistry;
use crate::config::TrainingConfig;
use crate::error::{ChurnError, Result};
use crate::observability;
use crate::types::{LabeledRecord, ModelType, ModelVersion};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Minimum rows in the whole frame.
pub const MIN_ROWS: usize = 5;

/// Minimum rows per label.
pub const MIN_ROWS_PER_CLASS: usize = 2;

/// Result of one training run.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    /// The registered (now active) version
    pub version: ModelVersion,
    /// Held-out metrics
    pub metrics: EvaluationMetrics,
    /// Tracking store run id
    pub run_id: String,
    /// Local fallback artifact path
    pub local_path: PathBuf,
    pub train_rows: usize,
    pub test_rows: usize,
}

/// Fits, evaluates, stores and registers new model versions.
pub struct TrainingPipeline {
    registry: ModelRegistry,
    tracking: Arc<dyn ArtifactStore>,
    local: LocalModelStore,
    config: TrainingConfig,
}

impl TrainingPipeline {
    pub fn new(
        registry: ModelRegistry,
        tracking: Arc<dyn ArtifactStore>,
        local: LocalModelStore,
        config: TrainingConfig,
    ) -> Self {
        Self {
            registry,
            tracking,
            local,
            config,
        }
    }

    /// Hyperparameters for a classifier family after config overrides.
    pub fn params_for(&self, model_type: ModelType) -> ClassifierParams {
        let mut params = ClassifierParams::for_model_type(model_type);
        params.seed = self.config.seed;
        if let Some(n) = self.config.n_estimators {
            params.n_estimators = n;
        }
        if let Some(depth) = self.config.max_depth {
            params.max_depth = depth;
        }
        params
    }

    /// Trains a classifier named by string (`random_forest`,
    /// `gradient_boosting`).
    pub async fn train_named(&self, rows: Vec<LabeledRecord>, model_type: &str) -> Result<TrainingOutcome> {
        let model_type = model_type.parse::<ModelType>()?;
        self.train(rows, model_type).await
    }

    /// Runs the full pipeline and registers the result as the active version.
    pub async fn train(&self, rows: Vec<LabeledRecord>, model_type: ModelType) -> Result<TrainingOutcome> {
        let started = Instant::now();
        check_class_balance(&rows)?;

        let version = generate_version_id(Utc::now());
        let params = self.params_for(model_type);
        let test_size = self.config.test_size;

        info!(
            version = %version,
            model_type = %model_type,
            rows = rows.len(),
            "Training started"
        );

        let fit_version = version.clone();
        let (mut artifact, metrics, train_rows, test_rows) =
            tokio::task::spawn_blocking(move || -> Result<_> {
                let (train, test) = stratified_split(&rows, test_size, params.seed)?;
                let artifact = ModelArtifact::fit(fit_version, model_type, &train, &params)?;
                let metrics = evaluate(&artifact, &test)?;
                Ok((artifact, metrics, train.len(), test.len()))
            })
            .await
            .map_err(|e| ChurnError::Internal(format!("training task failed: {}", e)))??;

        artifact.metadata.metrics = metrics.to_map();

        let run_id = self.tracking.save(&artifact).await?;
        let local_path = self.local.save(&version, &artifact).await?;
        debug!(run_id = %run_id, path = %local_path.display(), "Artifact stored");

        let registered = self
            .registry
            .register(&version, model_type, &run_id, &artifact.metadata.metrics)
            .await?;

        observability::record_training(model_type.as_str(), started.elapsed(), metrics.accuracy);
        info!(
            version = %version,
            accuracy = metrics.accuracy,
            roc_auc = metrics.roc_auc,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Training completed"
        );

        Ok(TrainingOutcome {
            version: registered,
            metrics,
            run_id,
            local_path,
            train_rows,
            test_rows,
        })
    }
}

/// `v{YYYYmmdd_HHMMSS}_{4 hex}`; the random suffix separates versions
/// trained within the same second.
pub fn generate_version_id(now: DateTime<Utc>) -> String {
    format!("v{}_{:04x}", now.format("%Y%m%d_%H%M%S"), rand::random::<u16>())
}

fn check_class_balance(rows: &[LabeledRecord]) -> Result<()> {
    if rows.len() < MIN_ROWS {
        return Err(ChurnError::InsufficientData(format!(
            "need at least {} rows, got {}",
            MIN_ROWS,
            rows.len()
        )));
    }
    let positives = rows.iter().filter(|r| r.churn).count();
    let negatives = rows.len() - positives;
    if positives < MIN_ROWS_PER_CLASS || negatives < MIN_ROWS_PER_CLASS {
        return Err(ChurnError::InsufficientData(format!(
            "need at least {} rows per class, got {} churned and {} retained",
            MIN_ROWS_PER_CLASS, positives, negatives
        )));
    }
    Ok(())
}

/// Splits rows into train and held-out sets, preserving the label ratio.
/// Each class contributes at least one row to each side.
pub fn stratified_split(
    rows: &[LabeledRecord],
    test_size: f64,
    seed: u64,
) -> Result<(Vec<LabeledRecord>, Vec<LabeledRecord>)> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(ChurnError::InvalidArgument(format!(
            "test_size must be strictly between 0 and 1, got {}",
            test_size
        )));
    }
    check_class_balance(rows)?;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();

    for label in [false, true] {
        let mut members: Vec<&LabeledRecord> = rows.iter().filter(|r| r.churn == label).collect();
        members.shuffle(&mut rng);

        let n = members.len();
        let n_test = ((n as f64 * test_size).round() as usize).clamp(1, n - 1);
        for (i, row) in members.into_iter().enumerate() {
            if i < n_test {
                test.push(row.clone());
            } else {
                train.push(row.clone());
            }
        }
    }

    train.shuffle(&mut rng);
    test.shuffle(&mut rng);
    Ok((train, test))
}

/// Scores held-out rows with the artifact's own transformer.
pub fn evaluate(artifact: &ModelArtifact, rows: &[LabeledRecord]) -> Result<EvaluationMetrics> {
    let frame: Vec<_> = rows.iter().map(|r| r.features.clone()).collect();
    let vectors = artifact.transformer.transform_batch(&frame)?;

    let mut y_true = Vec::with_capacity(rows.len());
    let mut y_pred = Vec::with_capacity(rows.len());
    let mut y_score = Vec::with_capacity(rows.len());
    for (row, vector) in rows.iter().zip(&vectors) {
        let (label, probability) = artifact.predict_vector(vector)?;
        y_true.push(row.churn);
        y_pred.push(label == 1);
        y_score.push(probability);
    }

    Ok(EvaluationMetrics::compute(&y_true, &y_pred, &y_score))
}
